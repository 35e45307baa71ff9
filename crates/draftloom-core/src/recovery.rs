//! Error recovery strategies
//!
//! A registry of pure, priority-ordered text-to-text repairs. A strategy
//! either returns patched text or nothing; the first one to change the
//! input wins. Strategies must be idempotent under re-application:
//! running a strategy on its own output yields no further change.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, warn};

use crate::classify::{CategorizedError, ErrorCategory, classify};
use crate::execute::RawError;
use crate::normalize::close_unterminated_attr_quotes;

/// Pure text transform: `(error, code) -> patched code | None`
pub type StrategyFn =
    Box<dyn Fn(&CategorizedError, &str) -> Option<String> + Send + Sync>;

/// A registered repair strategy
pub struct RecoveryStrategy {
    name: String,
    categories: Vec<ErrorCategory>,
    priority: i32,
    transform: StrategyFn,
}

impl RecoveryStrategy {
    pub fn new(
        name: impl Into<String>,
        categories: Vec<ErrorCategory>,
        priority: i32,
        transform: impl Fn(&CategorizedError, &str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            categories,
            priority,
            transform: Box::new(transform),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// A strategy applies when its category set intersects
    /// `{error category, unknown}`. Declaring `Unknown` makes a strategy
    /// universal; errors categorized `Unknown` match every strategy.
    pub fn applies_to(&self, category: ErrorCategory) -> bool {
        category == ErrorCategory::Unknown
            || self.categories.contains(&category)
            || self.categories.contains(&ErrorCategory::Unknown)
    }
}

impl std::fmt::Debug for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryStrategy")
            .field("name", &self.name)
            .field("categories", &self.categories)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Outcome of a recovery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub patched: Option<String>,
    pub strategy: Option<String>,
}

impl RecoveryOutcome {
    fn failed() -> Self {
        Self {
            success: false,
            patched: None,
            strategy: None,
        }
    }
}

/// Registry of recovery strategies, ordered by descending priority
///
/// Append-only at runtime: strategies may be registered, never removed.
pub struct RecoveryEngine {
    strategies: Vec<RecoveryStrategy>,
}

impl RecoveryEngine {
    /// Create an engine with the built-in strategies registered
    pub fn new() -> Self {
        let mut engine = Self {
            strategies: Vec::new(),
        };
        engine.register(RecoveryStrategy::new(
            "balance_braces",
            vec![ErrorCategory::Syntax, ErrorCategory::Transpilation],
            100,
            |_, code| balance_delimiters(code, '{', '}'),
        ));
        engine.register(RecoveryStrategy::new(
            "balance_parens",
            vec![ErrorCategory::Syntax],
            90,
            |_, code| balance_delimiters(code, '(', ')'),
        ));
        engine.register(RecoveryStrategy::new(
            "close_quotes",
            vec![ErrorCategory::Syntax],
            80,
            |_, code| {
                let (patched, closed) = close_unterminated_attr_quotes(code);
                (closed > 0).then_some(patched)
            },
        ));
        engine.register(RecoveryStrategy::new(
            "fix_self_closing_tags",
            vec![ErrorCategory::Syntax, ErrorCategory::Transpilation],
            70,
            |_, code| fix_self_closing_tags(code),
        ));
        engine.register(RecoveryStrategy::new(
            "neutralize_eval",
            vec![ErrorCategory::Unknown],
            60,
            |_, code| neutralize_eval(code),
        ));
        engine
    }

    /// Register a strategy, keeping the registry sorted by priority
    pub fn register(&mut self, strategy: RecoveryStrategy) {
        debug!(strategy = %strategy.name, priority = strategy.priority, "Registering recovery strategy");
        self.strategies.push(strategy);
        self.strategies.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn strategies(&self) -> impl Iterator<Item = &RecoveryStrategy> {
        self.strategies.iter()
    }

    /// Classify a raw failure and attempt recovery
    pub fn attempt_recovery(&self, error: &RawError, code: &str) -> RecoveryOutcome {
        let categorized = classify(error, None);
        self.attempt_categorized(&categorized, code)
    }

    /// Attempt recovery for an already-categorized failure
    ///
    /// Tries applicable strategies in priority order; the first strategy
    /// returning text different from the input wins. A panic inside a
    /// strategy is contained and treated as "no recovery".
    pub fn attempt_categorized(&self, error: &CategorizedError, code: &str) -> RecoveryOutcome {
        for strategy in &self.strategies {
            if !strategy.applies_to(error.category) {
                continue;
            }

            let result = catch_unwind(AssertUnwindSafe(|| (strategy.transform)(error, code)));
            match result {
                Ok(Some(patched)) if patched != code => {
                    debug!(strategy = %strategy.name, "Recovery strategy produced a patch");
                    return RecoveryOutcome {
                        success: true,
                        patched: Some(patched),
                        strategy: Some(strategy.name.clone()),
                    };
                }
                Ok(_) => {}
                Err(_) => {
                    warn!(strategy = %strategy.name, "Recovery strategy panicked; treated as no recovery");
                }
            }
        }

        RecoveryOutcome::failed()
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Balance a delimiter pair
///
/// Appends the missing closers when openers outnumber closers, or strips
/// excess trailing closers in the opposite case. Balanced input yields no
/// change, which also makes the strategy idempotent.
fn balance_delimiters(code: &str, open: char, close: char) -> Option<String> {
    let opens = code.matches(open).count();
    let closes = code.matches(close).count();

    match opens.cmp(&closes) {
        std::cmp::Ordering::Greater => {
            let deficit = opens - closes;
            let mut patched = code.to_string();
            patched.extend(std::iter::repeat_n(close, deficit));
            Some(patched)
        }
        std::cmp::Ordering::Less => {
            let mut excess = closes - opens;
            let mut patched = String::with_capacity(code.len());
            // Drop the last `excess` closers, scanning from the end
            for c in code.chars().rev() {
                if excess > 0 && c == close {
                    excess -= 1;
                    continue;
                }
                patched.push(c);
            }
            Some(patched.chars().rev().collect())
        }
        std::cmp::Ordering::Equal => None,
    }
}

/// Void elements that must be self-closing in JSX
const VOID_ELEMENTS: &[&str] = &["br", "hr", "img", "input", "meta", "link", "source", "area"];

/// Normalize malformed self-closing JSX tags, e.g. `<br>` to `<br />`
fn fix_self_closing_tags(code: &str) -> Option<String> {
    let mut patched = code.to_string();
    let mut changed = false;

    for element in VOID_ELEMENTS {
        let mut search_from = 0;
        loop {
            let open_marker = format!("<{element}");
            let Some(relative) = patched[search_from..].find(&open_marker) else {
                break;
            };
            let tag_start = search_from + relative;
            let after_name = tag_start + open_marker.len();

            // Only whole tag names: `<br>` yes, `<brand>` no
            let next = patched[after_name..].chars().next();
            if next.is_some_and(|c| c.is_alphanumeric() || c == '-') {
                search_from = after_name;
                continue;
            }

            let Some(close_offset) = patched[after_name..].find('>') else {
                break;
            };
            let close_pos = after_name + close_offset;

            if patched[..close_pos].ends_with('/') {
                search_from = close_pos + 1;
                continue;
            }

            patched.insert_str(close_pos, " /");
            changed = true;
            search_from = close_pos + 3;
        }
    }

    changed.then_some(patched)
}

/// Neutralize explicit dynamic-evaluation calls
///
/// An `eval(...)` call is replaced with a harmless `null` literal. A
/// dynamic `Function` constructor is deliberately left unhandled; that
/// repair is deferred to higher-level, AI-assisted fixing.
fn neutralize_eval(code: &str) -> Option<String> {
    let mut patched = String::with_capacity(code.len());
    let mut rest = code;
    let mut changed = false;

    while let Some(pos) = rest.find("eval(") {
        // Reject identifiers merely ending in "eval", e.g. `retrieval(`
        let preceded_by_ident = pos > 0
            && rest[..pos]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.');
        if preceded_by_ident {
            patched.push_str(&rest[..pos + 5]);
            rest = &rest[pos + 5..];
            continue;
        }

        let call_start = pos + "eval".len();
        match matching_paren(&rest[call_start..]) {
            Some(end) => {
                patched.push_str(&rest[..pos]);
                patched.push_str("null");
                rest = &rest[call_start + end + 1..];
                changed = true;
            }
            None => {
                patched.push_str(&rest[..pos + 5]);
                rest = &rest[pos + 5..];
            }
        }
    }
    patched.push_str(rest);

    changed.then_some(patched)
}

/// Find the offset of the parenthesis matching the one at offset 0
fn matching_paren(text: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string: Option<char> = None;

    for (i, c) in text.char_indices() {
        match in_string {
            Some(quote) => {
                if c == quote {
                    in_string = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => in_string = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}
