//! Transpile-and-execute engine
//!
//! Turns normalized source text into a resolved component by transpiling
//! it, linking it against an explicit capability table, and instantiating
//! it through the rendering-library collaborator. The capability table is
//! the only thing that crosses into generated code; no ambient scope.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::normalize::NormalizedSource;
use crate::transpile::{TranspileFailure, TranspilerLoader, contains_markup};

/// Conventional component names tried when discovery found nothing
pub const FALLBACK_COMPONENT_NAMES: &[&str] =
    &["App", "LandingPage", "Home", "Page", "Main", "Component"];

/// A raw execution failure, annotated with pipeline context
///
/// Every failure leaving the engine carries its stage, source length, and
/// transpiler availability so the categorizer has something to work with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawError {
    /// Error kind name, e.g. "SyntaxError", "TypeError"
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    /// Contextual metadata accumulated as the error moves through the pipeline
    pub context: HashMap<String, String>,
}

impl RawError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            context: HashMap::new(),
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Attach a contextual key/value pair
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.context.insert(key.into(), value.into());
    }
}

impl std::fmt::Display for RawError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RawError {}

impl From<TranspileFailure> for RawError {
    fn from(failure: TranspileFailure) -> Self {
        RawError::new("TranspileError", failure.message)
    }
}

/// The approved binding set exposed to generated code
///
/// Rendering primitives, a fixed library of pre-vetted UI components, and
/// a read-only data object. Nothing else is reachable from inside the
/// compile unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityTable {
    /// Rendering primitives (state, effect, ref, memoized callback/value)
    pub primitives: Vec<String>,
    /// Pre-vetted UI building block names
    pub components: Vec<String>,
    /// Read-only data exposed to the component
    pub data: serde_json::Value,
}

impl CapabilityTable {
    /// The standard binding set for generated UI code
    pub fn standard() -> Self {
        Self {
            primitives: vec![
                "useState".to_string(),
                "useEffect".to_string(),
                "useRef".to_string(),
                "useCallback".to_string(),
                "useMemo".to_string(),
            ],
            components: vec![
                "Button".to_string(),
                "Card".to_string(),
                "Input".to_string(),
                "Badge".to_string(),
                "Icon".to_string(),
            ],
            data: serde_json::json!({}),
        }
    }

    /// Standard bindings plus a read-only data object
    pub fn with_data(data: serde_json::Value) -> Self {
        Self {
            data,
            ..Self::standard()
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.primitives.iter().any(|p| p == name) || self.components.iter().any(|c| c == name)
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// A compile unit instantiated by the component host
///
/// `exports` are the callable names the evaluated code defined inside its
/// isolated scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantiatedUnit {
    pub exports: Vec<String>,
}

/// The rendering-library collaborator
///
/// Evaluates executable (already transpiled) text inside an isolated scope
/// that exposes only the capability table, and reports what the code
/// defined.
pub trait ComponentHost: Send + Sync {
    fn instantiate(
        &self,
        code: &str,
        capabilities: &CapabilityTable,
    ) -> std::result::Result<InstantiatedUnit, RawError>;
}

/// A resolved, renderable component handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub unit: InstantiatedUnit,
}

/// Successful execution: the component plus timing metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub component: Component,
    pub render_ms: u64,
}

/// Pipeline stage recorded in error annotations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AwaitTranspiler,
    Transpile,
    MarkupGuard,
    Instantiate,
    Resolve,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitTranspiler => "await_transpiler",
            Self::Transpile => "transpile",
            Self::MarkupGuard => "markup_guard",
            Self::Instantiate => "instantiate",
            Self::Resolve => "resolve",
        }
    }
}

/// Transpile-and-execute engine
pub struct ExecutionEngine {
    loader: Arc<TranspilerLoader>,
    host: Arc<dyn ComponentHost>,
    capabilities: CapabilityTable,
    rendered_once: AtomicBool,
}

impl ExecutionEngine {
    pub fn new(
        loader: Arc<TranspilerLoader>,
        host: Arc<dyn ComponentHost>,
        capabilities: CapabilityTable,
    ) -> Self {
        Self {
            loader,
            host,
            capabilities,
            rendered_once: AtomicBool::new(false),
        }
    }

    /// Whether this engine has produced at least one successful render
    ///
    /// Gates secondary, best-effort code-quality suggestions downstream.
    pub fn has_rendered(&self) -> bool {
        self.rendered_once.load(Ordering::Relaxed)
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Execute normalized source, resolving it to a component
    ///
    /// Suspends on transpiler acquisition when markup is present and the
    /// transpiler has not loaded yet. Failures are annotated before being
    /// returned; untranspiled markup is never evaluated.
    pub async fn execute(
        &self,
        source: &NormalizedSource,
    ) -> std::result::Result<Rendered, RawError> {
        let start = Instant::now();
        let needs_transpile = contains_markup(&source.code);

        let transpiler = if needs_transpile && !self.loader.available() {
            // Suspend rather than fail; past the loader's hard deadline we
            // proceed anyway and let categorization absorb the failure.
            match self.loader.acquire().await {
                Ok(transpiler) => Some(transpiler),
                Err(e) => {
                    warn!(error = %e, "Proceeding without transpiler after acquisition failure");
                    None
                }
            }
        } else {
            self.loader.get()
        };

        let code = match (&transpiler, needs_transpile) {
            (Some(transpiler), _) => match transpiler.transform(&source.code) {
                Ok(code) => code,
                Err(failure) => {
                    return Err(self.annotated(failure.into(), Stage::Transpile, source));
                }
            },
            (None, true) => {
                return Err(self.annotated(
                    RawError::new("TranspileError", "transpiler is not available"),
                    Stage::AwaitTranspiler,
                    source,
                ));
            }
            (None, false) => source.code.clone(),
        };

        // Transpiler silent-failure guard: residual markup must never be evaluated
        if contains_markup(&code) {
            return Err(self.annotated(
                RawError::new(
                    "TranspileError",
                    "transpiled output still contains markup syntax",
                ),
                Stage::MarkupGuard,
                source,
            ));
        }

        let unit = self
            .host
            .instantiate(&code, &self.capabilities)
            .map_err(|e| self.annotated(e, Stage::Instantiate, source))?;

        let Some(name) = resolve_component_name(source.component_name.as_deref(), &unit.exports)
        else {
            return Err(self.annotated(
                RawError::new("TypeError", "component function is not valid"),
                Stage::Resolve,
                source,
            ));
        };

        let render_ms = start.elapsed().as_millis() as u64;
        self.rendered_once.store(true, Ordering::Relaxed);
        debug!(component = %name, render_ms, "Component resolved");

        Ok(Rendered {
            component: Component { name, unit },
            render_ms,
        })
    }

    fn annotated(&self, mut error: RawError, stage: Stage, source: &NormalizedSource) -> RawError {
        error.annotate("stage", stage.as_str());
        error.annotate("source_len", source.code.len().to_string());
        error.annotate(
            "transpiler_available",
            self.loader.available().to_string(),
        );
        error
    }
}

/// Resolve the component among the unit's exports
///
/// Prefers the name discovered during normalization, then the fixed list
/// of conventional names, then a single unambiguous export.
fn resolve_component_name(preferred: Option<&str>, exports: &[String]) -> Option<String> {
    if let Some(name) = preferred
        && exports.iter().any(|e| e == name)
    {
        return Some(name.to_string());
    }

    for candidate in FALLBACK_COMPONENT_NAMES {
        if exports.iter().any(|e| e == candidate) {
            return Some((*candidate).to_string());
        }
    }

    if exports.len() == 1 {
        return Some(exports[0].clone());
    }

    None
}
