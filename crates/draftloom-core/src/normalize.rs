//! Source normalization for AI-authored component code
//!
//! Raw model output arrives wrapped in markdown fences, carrying import
//! statements the execution scope supplies itself, and using a handful of
//! export-default spellings. This module flattens all of that into plain
//! source text with a single local component binding.

use tracing::debug;

/// Name invented for an anonymous default export
pub const DEFAULT_COMPONENT_NAME: &str = "LandingPage";

/// Module specifiers whose import lines are elided because the execution
/// scope injects those bindings directly
const ELIDED_MODULES: &[&str] = &["react", "react-dom", "react-dom/client", "lucide-react"];

/// Normalized source text plus the component name discovered along the way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSource {
    /// Source with fences stripped, imports elided, and exports localized
    pub code: String,
    /// Component name discovered during normalization, if any
    pub component_name: Option<String>,
}

/// Normalize raw AI-authored text into executable source
///
/// Strips markdown code fences, elides recognized import statements,
/// rewrites `export default` into a local named binding, and defensively
/// closes attribute values left unterminated at end-of-line. The quote
/// repair is a lossy heuristic and can misfire on legitimate multi-line
/// strings; it is advisory, not a correctness guarantee.
pub fn normalize(raw: &str) -> NormalizedSource {
    let unfenced = strip_code_fences(raw);

    let mut lines = Vec::new();
    let mut component_name: Option<String> = None;

    for line in unfenced.lines() {
        if is_elided_import(line) {
            continue;
        }

        if let Some((rewritten, name)) = rewrite_export_default(line) {
            if component_name.is_none() {
                component_name = Some(name);
            }
            if let Some(rewritten) = rewritten {
                lines.push(rewritten);
            }
            continue;
        }

        // Plain named exports become local declarations
        if let Some(rest) = line.strip_prefix("export ") {
            lines.push(rest.to_string());
            continue;
        }

        lines.push(line.to_string());
    }

    let mut code = lines.join("\n");
    if unfenced.ends_with('\n') {
        code.push('\n');
    }

    let (code, closed) = close_unterminated_attr_quotes(&code);
    if closed > 0 {
        debug!(closed, "closed unterminated attribute quotes during normalization");
    }

    if component_name.is_none() {
        component_name = discover_component_name(&code);
    }

    NormalizedSource {
        code,
        component_name,
    }
}

/// Strip markdown code fences, keeping the fenced content
///
/// When the text contains fenced blocks, their contents are concatenated
/// and everything outside the fences (prose) is dropped. Text without
/// fences passes through unchanged.
pub fn strip_code_fences(raw: &str) -> String {
    if !raw.contains("```") {
        return raw.to_string();
    }

    let mut out = String::new();
    let mut in_block = false;

    for line in raw.lines() {
        if line.trim_start().starts_with("```") {
            in_block = !in_block;
            continue;
        }
        if in_block {
            out.push_str(line);
            out.push('\n');
        }
    }

    // A lone opening fence with no closer: treat the remainder as code
    if out.is_empty() && in_block {
        return raw.to_string();
    }

    out
}

/// Check whether an import line should be elided
fn is_elided_import(line: &str) -> bool {
    let trimmed = line.trim_start();
    if !trimmed.starts_with("import ") && !trimmed.starts_with("import{") {
        return false;
    }

    match import_specifier(trimmed) {
        Some(spec) => {
            // Relative sibling components and known injected modules
            spec.starts_with("./")
                || spec.starts_with("../")
                || spec.starts_with("@/")
                || ELIDED_MODULES.contains(&spec.as_str())
        }
        None => false,
    }
}

/// Extract the module specifier from an import line
fn import_specifier(line: &str) -> Option<String> {
    let quote_pos = line.find(['\'', '"'])?;
    let quote = line.as_bytes()[quote_pos] as char;
    let rest = &line[quote_pos + 1..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string())
}

/// Rewrite an `export default` line to a local binding
///
/// Returns `Some((rewritten_line, component_name))` when the line is a
/// default export; the rewritten line is `None` when the export was a bare
/// identifier whose declaration already exists.
fn rewrite_export_default(line: &str) -> Option<(Option<String>, String)> {
    let indent_len = line.len() - line.trim_start().len();
    let (indent, trimmed) = line.split_at(indent_len);
    let rest = trimmed.strip_prefix("export default ")?;
    let rest = rest.trim_start();

    // export default function Name(...) -> function Name(...)
    if let Some(fn_rest) = rest.strip_prefix("function") {
        let fn_rest = fn_rest.trim_start();
        let name: String = fn_rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
            .collect();
        if name.is_empty() {
            // Anonymous default function gains a conventional name
            let body = fn_rest.trim_start();
            return Some((
                Some(format!(
                    "{indent}function {DEFAULT_COMPONENT_NAME}{body}"
                )),
                DEFAULT_COMPONENT_NAME.to_string(),
            ));
        }
        return Some((Some(format!("{indent}{rest}")), name));
    }

    // export default Name; -> declaration already exists, drop the line
    let bare = rest.trim_end().trim_end_matches(';');
    if !bare.is_empty()
        && bare
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
    {
        return Some((None, bare.to_string()));
    }

    // export default <expr> -> const LandingPage = <expr>
    Some((
        Some(format!("{indent}const {DEFAULT_COMPONENT_NAME} = {rest}")),
        DEFAULT_COMPONENT_NAME.to_string(),
    ))
}

/// Find the first capitalized function or const binding in the source
fn discover_component_name(code: &str) -> Option<String> {
    for line in code.lines() {
        let trimmed = line.trim_start();
        let candidate = if let Some(rest) = trimmed.strip_prefix("function ") {
            rest
        } else if let Some(rest) = trimmed.strip_prefix("const ") {
            rest
        } else {
            continue;
        };

        let name: String = candidate
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
            .collect();
        if name.chars().next().is_some_and(|c| c.is_uppercase()) {
            return Some(name);
        }
    }
    None
}

/// Defensively close attribute values left unterminated at end-of-line
///
/// A common truncation bug leaves `className="card` with no closing quote.
/// When a line's last attribute-style `="` or `='` has no matching closer
/// before end-of-line, the quote is appended. Returns the repaired text
/// and how many lines were touched. Known limitation: legitimate
/// multi-line string literals can trip this.
pub fn close_unterminated_attr_quotes(code: &str) -> (String, usize) {
    let mut out = Vec::new();
    let mut closed = 0usize;

    for line in code.lines() {
        match unterminated_attr_quote(line) {
            Some(quote) => {
                out.push(format!("{line}{quote}"));
                closed += 1;
            }
            None => out.push(line.to_string()),
        }
    }

    let mut repaired = out.join("\n");
    if code.ends_with('\n') {
        repaired.push('\n');
    }
    (repaired, closed)
}

/// Detect an attribute quote opened but not closed before end-of-line
fn unterminated_attr_quote(line: &str) -> Option<char> {
    let bytes = line.as_bytes();
    let mut i = 0;
    let mut open: Option<char> = None;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match open {
            Some(q) => {
                if c == q {
                    open = None;
                }
            }
            None => {
                if (c == '"' || c == '\'') && i > 0 && bytes[i - 1] == b'=' {
                    open = Some(c);
                }
            }
        }
        i += 1;
    }

    open
}
