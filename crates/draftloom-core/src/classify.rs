//! Error categorization
//!
//! Stateless, deterministic classification of raw failures into
//! category/severity/fixability, plus pure aggregation helpers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::execute::RawError;

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Syntax,
    Runtime,
    Network,
    Transpilation,
    Validation,
    Memory,
    Timeout,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Runtime => "runtime",
            Self::Network => "network",
            Self::Transpilation => "transpilation",
            Self::Validation => "validation",
            Self::Memory => "memory",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a failure can be repaired automatically, with guidance, or only by hand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fixability {
    Auto,
    Guided,
    Manual,
}

impl Fixability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Guided => "guided",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for Fixability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failure after classification; never mutated afterwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizedError {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub fixability: Fixability,
    pub message: String,
    pub stack: Option<String>,
    pub context: Option<HashMap<String, String>>,
}

struct Rule {
    markers: &'static [&'static str],
    category: ErrorCategory,
    severity: Severity,
    fixability: Fixability,
}

/// Ordered rule table; the first match wins
const RULES: &[Rule] = &[
    Rule {
        markers: &[
            "unexpected token",
            "unexpected end of input",
            "unterminated",
            "unmatched",
            "expected expression",
            "missing semicolon",
        ],
        category: ErrorCategory::Syntax,
        severity: Severity::High,
        fixability: Fixability::Auto,
    },
    Rule {
        markers: &[
            "jsx",
            "adjacent jsx",
            "transpile",
            "babel",
            "markup syntax",
            "plugin-transform",
        ],
        category: ErrorCategory::Transpilation,
        severity: Severity::High,
        fixability: Fixability::Auto,
    },
    Rule {
        markers: &["maximum call stack", "stack overflow", "too much recursion"],
        category: ErrorCategory::Runtime,
        severity: Severity::Critical,
        fixability: Fixability::Guided,
    },
    Rule {
        markers: &[
            "cannot read propert",
            "undefined is not",
            "null is not",
            "is not a function",
            "is not defined",
            "component function is not valid",
        ],
        category: ErrorCategory::Runtime,
        severity: Severity::High,
        fixability: Fixability::Guided,
    },
    Rule {
        markers: &[
            "failed to fetch",
            "networkerror",
            "network request",
            "rate limit",
            "too many requests",
            "econnrefused",
            "socket hang up",
        ],
        category: ErrorCategory::Network,
        severity: Severity::Medium,
        fixability: Fixability::Guided,
    },
    Rule {
        markers: &["out of memory", "heap limit", "allocation fail"],
        category: ErrorCategory::Memory,
        severity: Severity::Critical,
        fixability: Fixability::Manual,
    },
    Rule {
        markers: &["timed out", "timeout", "deadline exceeded"],
        category: ErrorCategory::Timeout,
        severity: Severity::Medium,
        fixability: Fixability::Auto,
    },
    Rule {
        markers: &[
            "validation failed",
            "invalid prop",
            "required prop",
            "exceeds maximum",
        ],
        category: ErrorCategory::Validation,
        severity: Severity::Medium,
        fixability: Fixability::Guided,
    },
];

/// Classify a raw failure
///
/// Pure and deterministic: the same error and context always produce the
/// same categorization. Matches the ordered rule table against the
/// lower-cased `name: message` text, then falls back to inferring the
/// category from the error name alone.
pub fn classify(error: &RawError, context: Option<&HashMap<String, String>>) -> CategorizedError {
    let haystack = format!("{}: {}", error.name, error.message).to_lowercase();

    let (category, severity, fixability) = RULES
        .iter()
        .find(|rule| rule.markers.iter().any(|marker| haystack.contains(marker)))
        .map(|rule| (rule.category, rule.severity, rule.fixability))
        .unwrap_or_else(|| infer_from_name(&error.name));

    let merged_context = merge_context(&error.context, context);

    CategorizedError {
        category,
        severity,
        fixability,
        message: error.message.clone(),
        stack: error.stack.clone(),
        context: merged_context,
    }
}

/// Fallback inference from the error's name alone
fn infer_from_name(name: &str) -> (ErrorCategory, Severity, Fixability) {
    let name = name.to_lowercase();
    if name.contains("syntax") {
        (ErrorCategory::Syntax, Severity::High, Fixability::Auto)
    } else if name.contains("type") || name.contains("reference") {
        (ErrorCategory::Runtime, Severity::High, Fixability::Guided)
    } else if name.contains("network") || name.contains("fetch") {
        (ErrorCategory::Network, Severity::Medium, Fixability::Guided)
    } else {
        (ErrorCategory::Unknown, Severity::Medium, Fixability::Guided)
    }
}

fn merge_context(
    own: &HashMap<String, String>,
    extra: Option<&HashMap<String, String>>,
) -> Option<HashMap<String, String>> {
    if own.is_empty() && extra.is_none_or(|e| e.is_empty()) {
        return None;
    }

    let mut merged = own.clone();
    if let Some(extra) = extra {
        for (key, value) in extra {
            merged.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    Some(merged)
}

/// Group errors by their `category-severity` key
pub fn group_by_category_severity(
    errors: &[CategorizedError],
) -> HashMap<String, Vec<&CategorizedError>> {
    let mut groups: HashMap<String, Vec<&CategorizedError>> = HashMap::new();
    for error in errors {
        let key = format!("{}-{}", error.category, error.severity);
        groups.entry(key).or_default().push(error);
    }
    groups
}

/// Per-run error statistics
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorStats {
    pub total: usize,
    pub by_category: HashMap<ErrorCategory, usize>,
    pub by_severity: HashMap<Severity, usize>,
    pub most_common_category: Option<ErrorCategory>,
    pub critical_count: usize,
}

/// Compute statistics over a batch of categorized errors
pub fn compute_stats(errors: &[CategorizedError]) -> ErrorStats {
    let mut stats = ErrorStats {
        total: errors.len(),
        ..ErrorStats::default()
    };

    for error in errors {
        *stats.by_category.entry(error.category).or_insert(0) += 1;
        *stats.by_severity.entry(error.severity).or_insert(0) += 1;
        if error.severity == Severity::Critical {
            stats.critical_count += 1;
        }
    }

    stats.most_common_category = stats
        .by_category
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.as_str().cmp(a.0.as_str())))
        .map(|(category, _)| *category);

    stats
}
