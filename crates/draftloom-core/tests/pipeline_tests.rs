//! End-to-end pipeline tests
//!
//! Exercises the full render/heal/version flow against the SQLite store
//! and an in-process sandbox boundary.

use std::sync::Arc;

use draftloom_core::classify::{ErrorCategory, Fixability, Severity, classify};
use draftloom_core::config::Config;
use draftloom_core::draft::{DraftSession, FileBackupStore, RenderOutcome};
use draftloom_core::execute::{CapabilityTable, ComponentHost, InstantiatedUnit, RawError};
use draftloom_core::history::DraftStore;
use draftloom_core::recovery::RecoveryEngine;
use draftloom_core::sandbox::InProcessBoundary;
use draftloom_core::storage::{Database, SqliteDraftStore};
use draftloom_core::transpile::{TranspileFailure, Transpiler, TranspilerLoader};
use uuid::Uuid;

/// Transpiler stand-in: rejects obviously broken input the way a real
/// parser would, then strips markup from the rest
struct TestTranspiler;

impl Transpiler for TestTranspiler {
    fn transform(&self, source: &str) -> Result<String, TranspileFailure> {
        if source.matches('{').count() != source.matches('}').count() {
            return Err(TranspileFailure::new(
                "Unexpected end of input: unmatched '{'",
            ));
        }
        if source.matches('(').count() != source.matches(')').count() {
            return Err(TranspileFailure::new("Unexpected token: unmatched '('"));
        }
        Ok(source.replace(['<', '>'], " "))
    }
}

/// Host stand-in: exports capitalized top-level declarations
struct TestHost;

impl ComponentHost for TestHost {
    fn instantiate(
        &self,
        code: &str,
        _capabilities: &CapabilityTable,
    ) -> Result<InstantiatedUnit, RawError> {
        let mut exports = Vec::new();
        for line in code.lines() {
            let trimmed = line.trim_start();
            let candidate = trimmed
                .strip_prefix("function ")
                .or_else(|| trimmed.strip_prefix("const "));
            if let Some(rest) = candidate {
                let name: String = rest
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                if name.chars().next().is_some_and(|c| c.is_uppercase()) {
                    exports.push(name);
                }
            }
        }
        Ok(InstantiatedUnit { exports })
    }
}

async fn session_over_sqlite() -> (DraftSession, Arc<SqliteDraftStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::in_memory().await.unwrap();
    let store = Arc::new(SqliteDraftStore::new(db.pool().clone()));
    let draft_id = store.ensure_draft("integration-draft").await.unwrap();

    let backup = Arc::new(FileBackupStore::new(dir.path()).unwrap());
    let loader = Arc::new(TranspilerLoader::with_transpiler(Arc::new(TestTranspiler)));
    let boundary = Arc::new(InProcessBoundary::new(
        Arc::new(TestTranspiler),
        Arc::new(TestHost),
        CapabilityTable::standard(),
    ));

    let session = DraftSession::builder(
        draft_id,
        store.clone(),
        backup,
        loader,
        Arc::new(TestHost),
    )
    .config(Config::default())
    .sandbox_boundary(boundary)
    .build();

    (session, store, dir)
}

#[tokio::test]
async fn renders_fenced_ai_output_end_to_end() {
    let (session, _store, _dir) = session_over_sqlite().await;

    let raw = r#"Here's your landing page:

```jsx
import React from 'react';

export default function LandingPage() {
  return <div className="hero">Welcome</div>;
}
```
"#;

    let outcome = session.render(raw).await.unwrap();
    match outcome {
        RenderOutcome::Rendered { component, .. } => assert_eq!(component, "LandingPage"),
        RenderOutcome::Failed { error } => panic!("render failed: {}", error.message),
    }
}

#[tokio::test]
async fn broken_brace_scenario_heals_with_bracket_fixer() {
    // The spec scenario: one unmatched '{' and an unmatched <div>
    let (session, _store, _dir) = session_over_sqlite().await;

    let outcome = session
        .render("function Foo(){ return <div>\n")
        .await
        .unwrap();

    match outcome {
        RenderOutcome::Rendered {
            recovered_with, ..
        } => {
            assert_eq!(recovered_with.as_deref(), Some("balance_braces"));
        }
        RenderOutcome::Failed { error } => panic!("expected recovery, got: {}", error.message),
    }

    // The patched source is one closing brace longer and balanced
    let code = session.current_code().unwrap();
    assert_eq!(code.matches('{').count(), code.matches('}').count());
}

#[test]
fn broken_brace_scenario_classifies_syntax_high_auto() {
    let error = RawError::new("TranspileError", "Unexpected end of input: unmatched '{'");
    let categorized = classify(&error, None);
    assert_eq!(categorized.category, ErrorCategory::Syntax);
    assert_eq!(categorized.severity, Severity::High);
    assert_eq!(categorized.fixability, Fixability::Auto);
}

#[test]
fn brace_balance_output_is_longer_by_the_deficit() {
    // For inputs with more '{' than '}', the patched text has equal
    // counts and is longer by exactly the deficit
    let engine = RecoveryEngine::new();
    let error = RawError::new("SyntaxError", "Unexpected end of input");

    let inputs = [
        "function A() {",
        "if (x) { if (y) { if (z) {",
        "const f = () => { return { a: { b: 1",
    ];
    for input in inputs {
        let deficit = input.matches('{').count() - input.matches('}').count();
        let outcome = engine.attempt_recovery(&error, input);
        let patched = outcome.patched.expect("expected a patch");
        assert_eq!(patched.matches('{').count(), patched.matches('}').count());
        assert_eq!(patched.len(), input.len() + deficit);
    }
}

#[tokio::test]
async fn undo_then_redo_restores_pre_undo_code() {
    let (session, _store, _dir) = session_over_sqlite().await;

    for body in ["first", "second", "third"] {
        session
            .render(&format!("function App(){{ return \"{body}\"; }}\n"))
            .await
            .unwrap();
    }

    let before_undo = session.current_code().unwrap();
    session.undo().unwrap();
    assert_ne!(session.current_code().unwrap(), before_undo);

    let redone = session.redo().unwrap();
    assert_eq!(redone, before_undo);
}

#[tokio::test]
async fn restore_version_keeps_later_versions_retrievable() {
    let (session, store, _dir) = session_over_sqlite().await;

    for i in 1..=5 {
        session
            .render(&format!("function App(){{ return {i}; }}\n"))
            .await
            .unwrap();
        session.save_version(Some(format!("version {i}"))).await.unwrap();
    }

    let restored = session.restore_version(2).await.unwrap();
    assert!(restored.code.contains("return 2;"));
    assert!(session.current_code().unwrap().contains("return 2;"));

    // Version 5 is still there
    let five = session.versions().get(5).await.unwrap().unwrap();
    assert!(five.code.contains("return 5;"));

    // And the store reflects the restored live code
    let metadata = store
        .get_draft_metadata(session.draft_id())
        .await
        .unwrap();
    assert!(
        metadata
            .get("current_code")
            .and_then(|v| v.as_str())
            .unwrap()
            .contains("return 2;")
    );
}

#[tokio::test]
async fn sandboxed_execution_through_the_session() {
    let (session, _store, _dir) = session_over_sqlite().await;

    let reply = session
        .execute_sandboxed("function App() { return null; }", Some("App"), &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.component, "App");

    // The boundary is reused across calls
    let reply = session
        .execute_sandboxed("function App() { return 1; }", Some("App"), &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.component, "App");
}

#[tokio::test]
async fn unhealable_error_lands_in_the_queue_with_draft_metadata() {
    let (session, _store, _dir) = session_over_sqlite().await;

    let outcome = session
        .render("function lowercase() { return 1; }\n")
        .await
        .unwrap();
    assert!(!outcome.is_rendered());

    let queued = session.queue().snapshot();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].attempts, 0);
    assert_eq!(
        queued[0]
            .metadata
            .as_ref()
            .and_then(|m| m.get("draft_id"))
            .and_then(|v| v.as_str()),
        Some(session.draft_id().to_string().as_str())
    );
}

#[tokio::test]
async fn queue_drain_retries_with_decreasing_priority() {
    let (session, _store, _dir) = session_over_sqlite().await;

    session
        .render("function lowercase() { return 1; }\n")
        .await
        .unwrap();

    let observed = Arc::new(std::sync::Mutex::new(Vec::new()));
    let observed_in = observed.clone();
    session
        .queue()
        .process_queue(move |item| {
            let observed = observed_in.clone();
            async move {
                observed.lock().unwrap().push((item.attempts, item.priority));
                Ok(false)
            }
        })
        .await;

    assert!(session.queue().is_empty());
    assert_eq!(*observed.lock().unwrap(), vec![(1, 5), (2, 4), (3, 3)]);
}

#[tokio::test]
async fn draft_ids_round_trip_through_sqlite() {
    let db = Database::in_memory().await.unwrap();
    let store = SqliteDraftStore::new(db.pool().clone());

    let id = store.ensure_draft("stable-name").await.unwrap();
    assert_eq!(store.ensure_draft("stable-name").await.unwrap(), id);

    let drafts = store.list_drafts().await.unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0], (id, "stable-name".to_string()));
    assert_ne!(id, Uuid::nil());
}
