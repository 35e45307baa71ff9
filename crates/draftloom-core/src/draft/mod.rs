//! Draft session orchestration
//!
//! A draft owns one current code value, an undo/redo history, a persisted
//! version log, and the render pipeline wiring: normalize, execute,
//! classify, recover inline, queue what cannot be healed. No failure
//! silently disappears: every path ends in a successful re-render, a
//! queued retry, or a visible failure state.

pub mod autosave;
pub mod supervisor;

pub use autosave::{Autosaver, BackupStore, FileBackupStore, SaveStatus};
pub use supervisor::{RenderState, RenderSupervisor};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::{CategorizedError, classify};
use crate::config::Config;
use crate::error::Result;
use crate::execute::{ComponentHost, ExecutionEngine, RawError};
use crate::history::undo::UndoRedoManager;
use crate::history::versions::{DraftStore, VersionLog, VersionSnapshot};
use crate::monitor::RuntimeMonitor;
use crate::normalize::{NormalizedSource, normalize};
use crate::queue::ErrorQueue;
use crate::recovery::RecoveryEngine;
use crate::sandbox::{ExecutionReply, Sandbox, SandboxBoundary};
use crate::transpile::TranspilerLoader;

/// Outcome of a render attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Rendered {
        component: String,
        render_ms: u64,
        /// Name of the recovery strategy that healed the source, when the
        /// first attempt failed and a patched re-execution succeeded
        recovered_with: Option<String>,
    },
    Failed {
        error: CategorizedError,
    },
}

impl RenderOutcome {
    pub fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered { .. })
    }
}

/// Callback observing every accepted code change
pub type CodeUpdateFn = Box<dyn Fn(&str) + Send + Sync>;

/// Builder for a draft session
pub struct DraftSessionBuilder {
    draft_id: Uuid,
    store: Arc<dyn DraftStore>,
    backup: Arc<dyn BackupStore>,
    loader: Arc<TranspilerLoader>,
    host: Arc<dyn ComponentHost>,
    boundary: Option<Arc<dyn SandboxBoundary>>,
    on_code_update: Option<CodeUpdateFn>,
    config: Config,
}

impl DraftSessionBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Enable the sandboxed execution path with the given boundary
    pub fn sandbox_boundary(mut self, boundary: Arc<dyn SandboxBoundary>) -> Self {
        self.boundary = Some(boundary);
        self
    }

    /// Observe every accepted code change (renders, auto-fixes, undo/redo,
    /// restores)
    pub fn on_code_update(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_code_update = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> DraftSession {
        let capabilities = crate::execute::CapabilityTable::standard();
        let engine = Arc::new(ExecutionEngine::new(
            self.loader.clone(),
            self.host,
            capabilities,
        ));
        let autosaver = Autosaver::new(
            self.draft_id,
            self.backup,
            self.store.clone(),
            Duration::from_millis(self.config.autosave.debounce_ms),
        );

        DraftSession {
            draft_id: self.draft_id,
            engine,
            recovery: RecoveryEngine::new(),
            queue: Arc::new(ErrorQueue::new()),
            monitor: Arc::new(RuntimeMonitor::new()),
            history: Mutex::new(UndoRedoManager::with_capacity(
                self.config.history.undo_capacity,
            )),
            versions: VersionLog::new(self.store, self.draft_id),
            autosaver,
            supervisor: Mutex::new(RenderSupervisor::new()),
            boundary: self.boundary,
            sandbox: OnceCell::new(),
            on_code_update: self.on_code_update,
            config: self.config,
        }
    }
}

/// A single evolving generated page and its pipeline services
///
/// The undo/redo stacks and the current-code slot are owned exclusively
/// by the session and mutated only through its operations.
pub struct DraftSession {
    draft_id: Uuid,
    engine: Arc<ExecutionEngine>,
    recovery: RecoveryEngine,
    queue: Arc<ErrorQueue>,
    monitor: Arc<RuntimeMonitor>,
    history: Mutex<UndoRedoManager>,
    versions: VersionLog,
    autosaver: Autosaver,
    supervisor: Mutex<RenderSupervisor>,
    boundary: Option<Arc<dyn SandboxBoundary>>,
    /// Single reused sandbox instance, created lazily on first use
    sandbox: OnceCell<Sandbox>,
    on_code_update: Option<CodeUpdateFn>,
    config: Config,
}

impl DraftSession {
    pub fn builder(
        draft_id: Uuid,
        store: Arc<dyn DraftStore>,
        backup: Arc<dyn BackupStore>,
        loader: Arc<TranspilerLoader>,
        host: Arc<dyn ComponentHost>,
    ) -> DraftSessionBuilder {
        DraftSessionBuilder {
            draft_id,
            store,
            backup,
            loader,
            host,
            boundary: None,
            on_code_update: None,
            config: Config::default(),
        }
    }

    pub fn draft_id(&self) -> Uuid {
        self.draft_id
    }

    pub fn current_code(&self) -> Option<String> {
        self.history
            .lock()
            .ok()
            .and_then(|history| history.current_code().map(String::from))
    }

    pub fn render_state(&self) -> RenderState {
        self.supervisor
            .lock()
            .map(|supervisor| supervisor.state())
            .unwrap_or(RenderState::Idle)
    }

    pub fn queue(&self) -> &ErrorQueue {
        &self.queue
    }

    pub fn monitor(&self) -> &RuntimeMonitor {
        &self.monitor
    }

    pub fn versions(&self) -> &VersionLog {
        &self.versions
    }

    pub fn autosave_status(&self) -> tokio::sync::watch::Receiver<SaveStatus> {
        self.autosaver.status()
    }

    /// Register an additional recovery strategy
    pub fn register_strategy(&mut self, strategy: crate::recovery::RecoveryStrategy) {
        self.recovery.register(strategy);
    }

    /// Run raw AI-authored text through the full pipeline
    ///
    /// Normalize, execute, and on failure classify and attempt one inline
    /// recovery cycle; a successful patched re-execution suppresses the
    /// original failure. Anything unhealed is queued for deferred
    /// processing and surfaced as a failed outcome.
    pub async fn render(&self, raw: &str) -> Result<RenderOutcome> {
        {
            let mut supervisor = self.supervisor.lock().expect("supervisor lock poisoned");
            supervisor.begin_render()?;
        }

        let source = normalize(raw);
        self.accept_edit(&source.code, Some("render".to_string()));

        match self.engine.execute(&source).await {
            Ok(rendered) => {
                self.monitor.record_perf("render", rendered.render_ms);
                {
                    let mut supervisor =
                        self.supervisor.lock().expect("supervisor lock poisoned");
                    supervisor.rendered()?;
                }
                info!(
                    draft_id = %self.draft_id,
                    component = %rendered.component.name,
                    render_ms = rendered.render_ms,
                    "Draft rendered"
                );
                Ok(RenderOutcome::Rendered {
                    component: rendered.component.name,
                    render_ms: rendered.render_ms,
                    recovered_with: None,
                })
            }
            Err(error) => self.heal_and_retry(source, error).await,
        }
    }

    /// Inline recovery cycle: classify, patch, re-execute once
    async fn heal_and_retry(
        &self,
        source: NormalizedSource,
        error: RawError,
    ) -> Result<RenderOutcome> {
        let context = self.monitor.failure_context();
        let categorized = classify(&error, Some(&context));

        {
            let mut supervisor = self.supervisor.lock().expect("supervisor lock poisoned");
            supervisor.begin_recovery(categorized.clone())?;
        }

        let outcome = self.recovery.attempt_categorized(&categorized, &source.code);

        if let (Some(patched), Some(strategy)) = (outcome.patched, outcome.strategy) {
            debug!(
                draft_id = %self.draft_id,
                strategy = %strategy,
                "Re-executing with patched source"
            );
            let patched_source = NormalizedSource {
                code: patched.clone(),
                component_name: source.component_name.clone(),
            };
            self.accept_edit(&patched, Some(format!("auto-fix: {strategy}")));

            match self.engine.execute(&patched_source).await {
                Ok(rendered) => {
                    self.monitor.record_perf("render", rendered.render_ms);
                    {
                        let mut supervisor =
                            self.supervisor.lock().expect("supervisor lock poisoned");
                        supervisor.rendered()?;
                    }
                    info!(
                        draft_id = %self.draft_id,
                        strategy = %strategy,
                        "Draft recovered and rendered"
                    );
                    // The original failure is suppressed from the
                    // user-visible path
                    return Ok(RenderOutcome::Rendered {
                        component: rendered.component.name,
                        render_ms: rendered.render_ms,
                        recovered_with: Some(strategy),
                    });
                }
                Err(second_error) => {
                    let recategorized = classify(&second_error, Some(&context));
                    return self.surface_failure(recategorized);
                }
            }
        }

        self.surface_failure(categorized)
    }

    /// Queue an unhealed failure and mark the draft errored
    fn surface_failure(&self, error: CategorizedError) -> Result<RenderOutcome> {
        warn!(
            draft_id = %self.draft_id,
            category = %error.category,
            severity = %error.severity,
            message = %error.message,
            "Render failed"
        );
        self.queue.enqueue(
            error.clone(),
            Some(self.config.queue.default_priority),
            Some(serde_json::json!({ "draft_id": self.draft_id })),
        );
        {
            let mut supervisor = self.supervisor.lock().expect("supervisor lock poisoned");
            supervisor.failed(error.clone())?;
        }
        Ok(RenderOutcome::Failed { error })
    }

    /// Accept a source change into history and auto-save
    ///
    /// A failing backup write is logged, not fatal: the in-memory history
    /// already holds the change and the debounced remote write still runs.
    fn accept_edit(&self, code: &str, description: Option<String>) {
        let changed = {
            let mut history = self.history.lock().expect("history lock poisoned");
            history.save_state(code, description)
        };
        if changed {
            self.notify_code_change(code);
        }
    }

    /// Auto-save and announce an accepted code change
    fn notify_code_change(&self, code: &str) {
        if let Err(e) = self.autosaver.note_edit(code) {
            warn!(draft_id = %self.draft_id, error = %e, "Auto-save scheduling failed");
        }
        if let Some(callback) = &self.on_code_update {
            callback(code);
        }
    }

    /// Step the draft back one state
    ///
    /// Returns the code that became current, or `None` when there is
    /// nothing to undo; an empty stack is not an error.
    pub fn undo(&self) -> Option<String> {
        let state = {
            let mut history = self.history.lock().expect("history lock poisoned");
            history.undo()
        }?;
        self.notify_code_change(&state.code);
        Some(state.code)
    }

    /// Step the draft forward one state; the mirror of `undo`
    pub fn redo(&self) -> Option<String> {
        let state = {
            let mut history = self.history.lock().expect("history lock poisoned");
            history.redo()
        }?;
        self.notify_code_change(&state.code);
        Some(state.code)
    }

    pub fn can_undo(&self) -> bool {
        self.history
            .lock()
            .map(|history| history.can_undo())
            .unwrap_or(false)
    }

    pub fn can_redo(&self) -> bool {
        self.history
            .lock()
            .map(|history| history.can_redo())
            .unwrap_or(false)
    }

    /// Snapshot the current code into the persisted version log
    pub async fn save_version(&self, description: Option<String>) -> Result<VersionSnapshot> {
        let code = self.current_code().ok_or_else(|| {
            crate::error::Error::InvalidInput("draft has no current code to snapshot".to_string())
        })?;
        self.versions.save_version(&code, description, None).await
    }

    /// Restore a persisted version into the live code
    ///
    /// Forward-creating: later versions remain retrievable afterwards.
    pub async fn restore_version(&self, version: i64) -> Result<VersionSnapshot> {
        let snapshot = self.versions.restore_version(version).await?;
        self.accept_edit(&snapshot.code, Some(format!("restore version {version}")));
        Ok(snapshot)
    }

    /// Execute the current code through the sandboxed path
    ///
    /// The sandbox boundary is created lazily on first use and reused for
    /// the life of the session.
    pub async fn execute_sandboxed(
        &self,
        code: &str,
        component_name: Option<&str>,
        dependencies: &[String],
    ) -> Result<std::result::Result<ExecutionReply, RawError>> {
        let boundary = self.boundary.clone().ok_or_else(|| {
            crate::error::Error::InvalidInput(
                "no sandbox boundary configured for this session".to_string(),
            )
        })?;

        let sandbox = self
            .sandbox
            .get_or_try_init(|| Sandbox::initialize(boundary, &self.config.sandbox))
            .await?;

        Ok(sandbox.execute_code(code, component_name, dependencies).await)
    }
}
