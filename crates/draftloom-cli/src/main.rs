//! Draftloom CLI - inspect and heal AI-generated component code

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use draftloom_core::classify::{classify, compute_stats};
use draftloom_core::config::Config;
use draftloom_core::execute::RawError;
use draftloom_core::history::VersionLog;
use draftloom_core::normalize::normalize;
use draftloom_core::recovery::RecoveryEngine;
use draftloom_core::storage::{Database, DatabaseConfig, SqliteDraftStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "draftloom")]
#[command(author, version, about = "Live execution and self-healing pipeline for AI-generated UI code", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Database path (defaults to the config directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize raw AI output (strip fences, imports, exports)
    Normalize {
        /// File containing the raw component text
        file: PathBuf,
    },

    /// Classify and attempt recovery over a source file
    Heal {
        /// File containing the component source
        file: PathBuf,
        /// Error message to classify (synthesized from the source if omitted)
        #[arg(short, long)]
        message: Option<String>,
        /// Error kind name, e.g. SyntaxError
        #[arg(short, long, default_value = "SyntaxError")]
        kind: String,
        /// Write the patched source back to the file
        #[arg(short, long)]
        write: bool,
    },

    /// Manage persisted draft versions
    Versions {
        #[command(subcommand)]
        action: VersionAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum VersionAction {
    /// List versions of a draft
    List {
        /// Draft name
        draft: String,
    },
    /// Snapshot a file as the draft's next version
    Save {
        /// Draft name
        draft: String,
        /// File containing the code to snapshot
        file: PathBuf,
        /// Optional description
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Restore a version into the draft's live code
    Restore {
        /// Draft name
        draft: String,
        /// Version number
        version: i64,
    },
    /// Print a version's code
    Show {
        /// Draft name
        draft: String,
        /// Version number
        version: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Normalize { file } => cmd_normalize(&file, cli.format),
        Commands::Heal {
            file,
            message,
            kind,
            write,
        } => cmd_heal(&file, message, &kind, write, cli.format),
        Commands::Versions { action } => {
            let store = open_store(cli.db).await?;
            match action {
                VersionAction::List { draft } => cmd_versions_list(&store, &draft, cli.format).await,
                VersionAction::Save {
                    draft,
                    file,
                    description,
                } => cmd_versions_save(&store, &draft, &file, description).await,
                VersionAction::Restore { draft, version } => {
                    cmd_versions_restore(&store, &draft, version).await
                }
                VersionAction::Show { draft, version } => {
                    cmd_versions_show(&store, &draft, version).await
                }
            }
        }
        Commands::Doctor => cmd_doctor(cli.db).await,
    }
}

async fn open_database(db: Option<PathBuf>) -> anyhow::Result<Database> {
    let path = match db {
        Some(path) => path,
        None => Config::database_path()?,
    };
    Database::new(DatabaseConfig::with_path(path)).await
}

async fn open_store(db: Option<PathBuf>) -> anyhow::Result<Arc<SqliteDraftStore>> {
    let database = open_database(db).await?;
    Ok(Arc::new(SqliteDraftStore::new(database.pool().clone())))
}

fn read_source(file: &PathBuf) -> anyhow::Result<String> {
    std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read source file: {}", file.display()))
}

fn cmd_normalize(file: &PathBuf, format: OutputFormat) -> anyhow::Result<()> {
    let raw = read_source(file)?;
    let normalized = normalize(&raw);

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "component_name": normalized.component_name,
                "code": normalized.code,
            })
        ),
        OutputFormat::Text => {
            if let Some(name) = &normalized.component_name {
                eprintln!("component: {name}");
            }
            print!("{}", normalized.code);
        }
    }
    Ok(())
}

/// Synthesize a plausible failure from a quick structural scan
///
/// Lets `heal` run without the caller hand-writing an error message.
fn synthesize_failure(code: &str) -> Option<RawError> {
    let braces = (code.matches('{').count(), code.matches('}').count());
    if braces.0 != braces.1 {
        return Some(RawError::new(
            "SyntaxError",
            "Unexpected end of input: unmatched '{'",
        ));
    }

    let parens = (code.matches('(').count(), code.matches(')').count());
    if parens.0 != parens.1 {
        return Some(RawError::new(
            "SyntaxError",
            "Unexpected token: unmatched '('",
        ));
    }

    if code.contains("eval(") {
        return Some(RawError::new(
            "EvalError",
            "dynamic evaluation is not allowed in generated code",
        ));
    }

    None
}

fn cmd_heal(
    file: &PathBuf,
    message: Option<String>,
    kind: &str,
    write: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let code = read_source(file)?;

    let error = match message {
        Some(message) => RawError::new(kind, message),
        None => match synthesize_failure(&code) {
            Some(error) => error,
            None => {
                if format == OutputFormat::Json {
                    println!("{}", serde_json::json!({ "healthy": true }));
                } else {
                    println!("No structural problems found in {}", file.display());
                }
                return Ok(());
            }
        },
    };

    let categorized = classify(&error, None);
    debug!(category = %categorized.category, "Classified synthesized failure");

    let engine = RecoveryEngine::new();
    let outcome = engine.attempt_recovery(&error, &code);

    match format {
        OutputFormat::Json => {
            let stats = compute_stats(std::slice::from_ref(&categorized));
            println!(
                "{}",
                serde_json::json!({
                    "healthy": false,
                    "category": categorized.category,
                    "severity": categorized.severity,
                    "fixability": categorized.fixability,
                    "recovered": outcome.success,
                    "strategy": outcome.strategy,
                    "critical_count": stats.critical_count,
                })
            );
        }
        OutputFormat::Text => {
            println!(
                "error: {} ({}/{}/{})",
                categorized.message,
                categorized.category,
                categorized.severity,
                categorized.fixability
            );
            match &outcome.strategy {
                Some(strategy) => println!("recovered with: {strategy}"),
                None => println!("no recovery strategy applied"),
            }
        }
    }

    if let Some(patched) = outcome.patched {
        if write {
            std::fs::write(file, &patched)
                .with_context(|| format!("Failed to write patched source: {}", file.display()))?;
            println!("patched source written to {}", file.display());
        } else if format == OutputFormat::Text {
            println!("--- patched ---");
            print!("{patched}");
        }
    }

    Ok(())
}

async fn cmd_versions_list(
    store: &Arc<SqliteDraftStore>,
    draft: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let draft_id = store.ensure_draft(draft).await?;
    let log = VersionLog::new(store.clone(), draft_id);
    let versions = log.list().await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&versions)?);
        }
        OutputFormat::Text => {
            if versions.is_empty() {
                println!("No versions for draft '{draft}'");
                return Ok(());
            }
            for snapshot in versions {
                println!(
                    "v{}  {}  {}  {}",
                    snapshot.version,
                    snapshot.created_at.format("%Y-%m-%d %H:%M:%S"),
                    &snapshot.content_hash[..12],
                    snapshot.description.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

async fn cmd_versions_save(
    store: &Arc<SqliteDraftStore>,
    draft: &str,
    file: &PathBuf,
    description: Option<String>,
) -> anyhow::Result<()> {
    let code = read_source(file)?;
    let draft_id = store.ensure_draft(draft).await?;
    let log = VersionLog::new(store.clone(), draft_id);

    let snapshot = log.save_version(&code, description, None).await?;
    println!("Saved version {} of draft '{draft}'", snapshot.version);
    Ok(())
}

async fn cmd_versions_restore(
    store: &Arc<SqliteDraftStore>,
    draft: &str,
    version: i64,
) -> anyhow::Result<()> {
    let draft_id = store.ensure_draft(draft).await?;
    let log = VersionLog::new(store.clone(), draft_id);

    let snapshot = log.restore_version(version).await?;
    println!(
        "Restored draft '{draft}' to version {} ({} bytes)",
        snapshot.version,
        snapshot.code.len()
    );
    Ok(())
}

async fn cmd_versions_show(
    store: &Arc<SqliteDraftStore>,
    draft: &str,
    version: i64,
) -> anyhow::Result<()> {
    let draft_id = store.ensure_draft(draft).await?;
    let log = VersionLog::new(store.clone(), draft_id);

    match log.get(version).await? {
        Some(snapshot) => {
            print!("{}", snapshot.code);
            Ok(())
        }
        None => bail!("Version {version} not found for draft '{draft}'"),
    }
}

async fn cmd_doctor(db: Option<PathBuf>) -> anyhow::Result<()> {
    let database = open_database(db).await?;

    database.health_check().await?;
    println!("database: ok ({})", database.path().display());

    let status = database.migration_status().await?;
    println!(
        "schema: v{} (target v{}){}",
        status.current_version,
        status.target_version,
        if status.needs_migration {
            " - migration needed"
        } else {
            ""
        }
    );

    let config = Config::load()?;
    println!(
        "config: {} mirrors, {} ms sandbox timeout",
        config.transpiler.mirrors.len(),
        config.sandbox.timeout_ms
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesize_failure_braces() {
        let error = synthesize_failure("function App() {").unwrap();
        assert_eq!(error.name, "SyntaxError");
        assert!(error.message.contains("unmatched '{'"));
    }

    #[test]
    fn test_synthesize_failure_parens() {
        let error = synthesize_failure("call(arg").unwrap();
        assert!(error.message.contains("unmatched '('"));
    }

    #[test]
    fn test_synthesize_failure_eval() {
        let error = synthesize_failure("eval('x')").unwrap();
        assert_eq!(error.name, "EvalError");
    }

    #[test]
    fn test_synthesize_failure_clean() {
        assert!(synthesize_failure("function App() { return null; }").is_none());
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
