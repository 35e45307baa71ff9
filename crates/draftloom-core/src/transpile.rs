//! External transpiler acquisition
//!
//! The pipeline depends on a JSX/TS-aware transpiler but does not embed
//! one. This module defines the collaborator boundary and a lazy loader
//! that fetches the transpiler bundle from any of several equivalent
//! mirrors with retry, exponential backoff, and a hard overall deadline.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::Client as HttpClient;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::TranspilerConfig;
use crate::error::{Error, Result};

/// Failure raised by a transpiler implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranspileFailure {
    pub message: String,
}

impl TranspileFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TranspileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TranspileFailure {}

/// The external transpiler collaborator
///
/// Implementations convert markup-flavored source into directly
/// executable text, or raise a failure without executing anything.
pub trait Transpiler: Send + Sync {
    fn transform(&self, source: &str) -> std::result::Result<String, TranspileFailure>;
}

/// Factory turning a fetched transpiler bundle into a usable instance
///
/// Supplied by the host environment; the core only moves bytes.
pub type TranspilerFactory =
    Arc<dyn Fn(Vec<u8>) -> Result<Arc<dyn Transpiler>> + Send + Sync>;

/// Lazy, single-initialization transpiler loader
///
/// The first caller to `acquire` drives the mirror fetch; everyone else
/// suspends on the same cell. Retries use exponential backoff with jitter
/// per mirror, falling back to the next mirror after exhausting retries,
/// all bounded by a hard deadline.
pub struct TranspilerLoader {
    config: TranspilerConfig,
    http: HttpClient,
    factory: Option<TranspilerFactory>,
    cell: OnceCell<Arc<dyn Transpiler>>,
}

impl TranspilerLoader {
    /// Create a loader that fetches the bundle from configured mirrors
    pub fn new(config: TranspilerConfig, factory: TranspilerFactory) -> Self {
        Self {
            config,
            http: HttpClient::new(),
            factory: Some(factory),
            cell: OnceCell::new(),
        }
    }

    /// Create a loader pre-seeded with a transpiler (embedded hosts, tests)
    pub fn with_transpiler(transpiler: Arc<dyn Transpiler>) -> Self {
        Self {
            config: TranspilerConfig::default(),
            http: HttpClient::new(),
            factory: None,
            cell: OnceCell::new_with(Some(transpiler)),
        }
    }

    /// Whether a transpiler is already available without suspending
    pub fn available(&self) -> bool {
        self.cell.initialized()
    }

    /// Get the transpiler if it is already loaded
    pub fn get(&self) -> Option<Arc<dyn Transpiler>> {
        self.cell.get().cloned()
    }

    /// Acquire the transpiler, fetching it if necessary
    ///
    /// Suspends until a mirror yields a working bundle or the overall
    /// deadline passes, whichever comes first.
    pub async fn acquire(&self) -> Result<Arc<dyn Transpiler>> {
        let deadline = Duration::from_millis(self.config.acquire_deadline_ms);

        let acquired = tokio::time::timeout(
            deadline,
            self.cell.get_or_try_init(|| self.fetch_from_mirrors()),
        )
        .await
        .map_err(|_| {
            Error::TranspilerUnavailable(format!(
                "acquisition exceeded {} ms deadline",
                self.config.acquire_deadline_ms
            ))
        })??;

        Ok(acquired.clone())
    }

    /// Try each mirror in order with per-mirror retries
    async fn fetch_from_mirrors(&self) -> Result<Arc<dyn Transpiler>> {
        let factory = self.factory.as_ref().ok_or_else(|| {
            Error::TranspilerUnavailable("no transpiler factory configured".to_string())
        })?;

        let mut last_error: Option<Error> = None;

        for mirror in &self.config.mirrors {
            for attempt in 1..=self.config.max_retries {
                debug!(mirror = %mirror, attempt, "Fetching transpiler bundle");

                match self.fetch_one(mirror).await {
                    Ok(bytes) => {
                        info!(
                            mirror = %mirror,
                            bytes = bytes.len(),
                            "Transpiler bundle fetched"
                        );
                        return factory(bytes);
                    }
                    Err(e) => {
                        warn!(mirror = %mirror, attempt, error = %e, "Transpiler fetch failed");
                        last_error = Some(e);
                        if attempt < self.config.max_retries {
                            let backoff = calculate_backoff(self.config.backoff_base_ms, attempt);
                            tokio::time::sleep(Duration::from_millis(backoff)).await;
                        }
                    }
                }
            }
            warn!(mirror = %mirror, "Mirror exhausted, falling back to next");
        }

        Err(last_error.unwrap_or_else(|| {
            Error::TranspilerUnavailable("no mirrors configured".to_string())
        }))
    }

    /// Fetch the bundle bytes from a single mirror
    async fn fetch_one(&self, mirror: &str) -> Result<Vec<u8>> {
        let response = self.http.get(mirror).send().await?;

        if !response.status().is_success() {
            return Err(Error::TranspilerUnavailable(format!(
                "mirror {} responded with status {}",
                mirror,
                response.status()
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Exponential backoff with jitter
fn calculate_backoff(base_ms: u64, attempt: u32) -> u64 {
    let exponential = base_ms.saturating_mul(1u64 << (attempt - 1).min(10));
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 4);
    exponential + jitter
}

/// Heuristic check for markup syntax in source text
///
/// Used both to decide whether transpilation is required and as the
/// residual-markup guard on transpiler output. Looks for closing tags,
/// self-closing tags, or an angle bracket opening an element name.
pub fn contains_markup(source: &str) -> bool {
    if source.contains("</") || source.contains("/>") {
        return true;
    }

    let bytes = source.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'<'
            && bytes
                .get(i + 1)
                .is_some_and(|&next| next.is_ascii_alphabetic())
            && bytes[i + 1..].contains(&b'>')
        {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UppercaseTranspiler;

    impl Transpiler for UppercaseTranspiler {
        fn transform(&self, source: &str) -> std::result::Result<String, TranspileFailure> {
            Ok(source.to_uppercase())
        }
    }

    #[test]
    fn test_contains_markup() {
        assert!(contains_markup("return <div>hi</div>;"));
        assert!(contains_markup("return <br />;"));
        assert!(contains_markup("<App>"));
        assert!(!contains_markup("const x = a < b;"));
        assert!(!contains_markup("function App() { return null; }"));
    }

    #[test]
    fn test_backoff_grows() {
        let first = calculate_backoff(1_000, 1);
        let third = calculate_backoff(1_000, 3);
        assert!(first >= 1_000);
        assert!(third >= 4_000);
    }

    #[tokio::test]
    async fn test_preseeded_loader_is_available() {
        let loader = TranspilerLoader::with_transpiler(Arc::new(UppercaseTranspiler));
        assert!(loader.available());

        let transpiler = loader.acquire().await.unwrap();
        assert_eq!(transpiler.transform("abc").unwrap(), "ABC");
    }

    #[tokio::test]
    async fn test_loader_without_factory_or_seed_fails() {
        let config = TranspilerConfig {
            mirrors: vec![],
            acquire_deadline_ms: 1_000,
            ..TranspilerConfig::default()
        };
        let factory: TranspilerFactory = Arc::new(|_bytes| {
            Err(Error::TranspilerUnavailable("unused".to_string()))
        });
        let loader = TranspilerLoader::new(config, factory);

        let result = loader.acquire().await;
        assert!(matches!(result, Err(Error::TranspilerUnavailable(_))));
    }
}
