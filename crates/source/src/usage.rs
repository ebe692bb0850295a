//! Per-line usage scanning for key state variables.

use crate::functions::SourceUnit;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(uint\d*|int\d*|address|bool|bytes\d*|string|mapping)\b").expect("static regex")
});
static SAME_LINE_CONDITION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(require|assert|if|while)\s*\(").expect("static regex"));

/// How a key variable is touched on a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageKind {
    Read,
    Write,
    /// Introduction of the name at contract scope; never a runtime
    /// operation.
    Declaration,
}

/// One appearance of a key variable in the source.
#[derive(Debug, Clone)]
pub struct Usage {
    /// 1-based source line.
    pub line: usize,
    /// Trimmed raw text of the line.
    pub code: String,
    pub kind: UsageKind,
    /// Name of the containing function, when the line sits inside one.
    pub function: Option<String>,
    /// True when a conditional construct appears on this line or earlier
    /// in the same function body.
    pub has_condition: bool,
}

/// Collects every usage of `var` in the unit, ascending by line.
pub fn find_usages(unit: &SourceUnit, var: &str) -> Vec<Usage> {
    let word = Regex::new(&format!(r"\b{}\b", regex::escape(var))).expect("escaped identifier");
    // Assignment but not comparison: `=` (or a compound op) not followed
    // by another `=`.
    let write = Regex::new(&format!(
        r"\b{}\b\s*(?:\+\+|--|(?:\+|-|\*|/|%|\||&|\^|<<|>>)?=(?:[^=]|$))",
        regex::escape(var)
    ))
    .expect("escaped identifier");
    let prefix_incr = Regex::new(&format!(r"(?:\+\+|--)\s*\b{}\b", regex::escape(var)))
        .expect("escaped identifier");

    let mut usages = Vec::new();
    for line_no in 1..=unit.lines.len() {
        let code = unit.code_line(line_no);
        if !word.is_match(code) {
            continue;
        }

        let function = unit.function_at(line_no);
        let kind = if function.is_none() && TYPE_RE.is_match(code) {
            UsageKind::Declaration
        } else if write.is_match(code) || prefix_incr.is_match(code) {
            UsageKind::Write
        } else {
            UsageKind::Read
        };

        let has_condition = SAME_LINE_CONDITION_RE.is_match(code)
            || function.is_some_and(|f| unit.condition_before(f, line_no));

        usages.push(Usage {
            line: line_no,
            code: unit.raw_line(line_no).trim().to_string(),
            kind,
            function: function.map(|f| f.name.clone()),
            has_condition,
        });
    }

    tracing::debug!(var, usages = usages.len(), "usage scan complete");
    usages
}
