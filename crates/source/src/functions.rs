//! Line-oriented extraction of contracts and functions from Solidity
//! source text.
//!
//! This is intentionally not a grammar-based parser. The scanner works a
//! line at a time with a bracket counter, which is enough to recover
//! function spans, headers, and modifier lists across the 0.4–0.8 syntax
//! range, including legacy `function ContractName()` constructors and
//! unnamed fallback functions.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static CONTRACT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:contract|library|interface)\s+(\w+)(?:\s+is\s+([^{]+))?").expect("static regex")
});
static MODIFIER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bmodifier\s+(\w+)").expect("static regex"));
static CONSTRUCTOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bconstructor\s*\(").expect("static regex"));
static UNNAMED_FN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bfunction\s*\(\s*\)").expect("static regex"));
static RECEIVE_FALLBACK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(receive|fallback)\s*\(\s*\)").expect("static regex"));
static FUNCTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bfunction\s+(\w+)").expect("static regex"));
static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_]\w*").expect("static regex"));
static ACCESS_MODIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(only|is|require|restricted|auth)").expect("static regex"));
static REQUIRE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(require|assert)\s*\(").expect("static regex"));
static CONDITION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(require|assert|if|while)\s*\(|\bthrow\b").expect("static regex"));

/// Header keywords that are not modifier invocations.
const HEADER_KEYWORDS: &[&str] = &[
    "public", "external", "internal", "private", "view", "pure", "constant", "payable", "returns",
    "virtual", "override", "memory", "storage", "calldata",
];

/// Identity expressions a guard may compare the caller against.
const AUTHORITY_PATTERNS: &[&str] = &["msg.sender", "tx.origin", "owner", "admin"];

/// Function visibility; unannotated functions default to public on the
/// compiler lines this tool targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    External,
    Internal,
    Private,
}

/// State-mutability keyword on the function header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mutability {
    Default,
    View,
    Pure,
    Constant,
    Payable,
}

/// A contract (or library/interface) declaration.
#[derive(Debug, Clone)]
pub struct ContractDecl {
    pub name: String,
    pub parents: Vec<String>,
    pub line: usize,
}

/// One function, constructor, modifier definition, or fallback.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub contract: Option<String>,
    /// 1-based, inclusive span.
    pub start_line: usize,
    pub end_line: usize,
    pub visibility: Visibility,
    pub mutability: Mutability,
    /// Modifier invocations by name, arguments stripped.
    pub modifiers: Vec<String>,
    pub is_constructor: bool,
    pub is_fallback_or_receive: bool,
    pub is_modifier: bool,
}

impl Function {
    /// View/pure/constant functions cannot write contract state.
    pub fn is_view_or_pure(&self) -> bool {
        matches!(
            self.mutability,
            Mutability::View | Mutability::Pure | Mutability::Constant
        )
    }

    /// True when the function is callable from outside the contract.
    pub fn is_externally_reachable(&self) -> bool {
        matches!(self.visibility, Visibility::Public | Visibility::External)
    }
}

/// Parsed source text with its contract and function tables.
#[derive(Debug)]
pub struct SourceUnit {
    /// Comment-stripped lines (`//` and `/* */` blanked); every scan and
    /// guard check reads these so commented-out code never counts.
    pub lines: Vec<String>,
    /// Verbatim source lines, kept only for report snippets.
    pub raw_lines: Vec<String>,
    pub contracts: Vec<ContractDecl>,
    pub functions: Vec<Function>,
}

impl SourceUnit {
    /// Parses raw Solidity text.
    pub fn parse(text: &str) -> SourceUnit {
        let raw_lines: Vec<String> = text.lines().map(|line| line.to_string()).collect();
        let lines = strip_comments(&raw_lines);

        let contracts = scan_contracts(&lines);
        let functions = scan_functions(&lines, &contracts);

        tracing::debug!(
            contracts = contracts.len(),
            functions = functions.len(),
            "source parsed"
        );
        SourceUnit {
            lines,
            raw_lines,
            contracts,
            functions,
        }
    }

    /// The function whose span covers the 1-based `line`.
    pub fn function_at(&self, line: usize) -> Option<&Function> {
        self.functions
            .iter()
            .find(|function| function.start_line <= line && line <= function.end_line)
    }

    /// Comment-stripped text of the 1-based `line`, empty when out of
    /// range.
    pub fn code_line(&self, line: usize) -> &str {
        self.lines
            .get(line.wrapping_sub(1))
            .map(|text| text.as_str())
            .unwrap_or("")
    }

    /// Verbatim text of the 1-based `line`, for report snippets.
    pub fn raw_line(&self, line: usize) -> &str {
        self.raw_lines
            .get(line.wrapping_sub(1))
            .map(|text| text.as_str())
            .unwrap_or("")
    }

    /// Whether a line lies outside every function/modifier body.
    pub fn is_contract_scope(&self, line: usize) -> bool {
        self.function_at(line).is_none()
    }

    /// Heuristic access-control check: a recognised guard modifier on the
    /// header, or a `require`/`assert` in the body comparing against a
    /// caller identity or a known authority variable.
    pub fn has_access_control(&self, function: &Function) -> bool {
        if function
            .modifiers
            .iter()
            .any(|name| ACCESS_MODIFIER_RE.is_match(name))
        {
            return true;
        }

        self.body_lines(function).any(|(_, text)| {
            REQUIRE_LINE_RE.is_match(text)
                && AUTHORITY_PATTERNS
                    .iter()
                    .any(|pattern| text.contains(pattern))
        })
    }

    /// True when any line of the body carries a conditional construct.
    pub fn body_has_condition(&self, function: &Function) -> bool {
        self.body_lines(function)
            .any(|(_, text)| CONDITION_RE.is_match(text))
    }

    /// True when a conditional construct appears before (or on) the given
    /// line within the function body. Guards protect only the writes that
    /// follow them.
    pub fn condition_before(&self, function: &Function, line: usize) -> bool {
        self.body_lines(function)
            .take_while(|(body_line, _)| *body_line <= line)
            .any(|(_, text)| CONDITION_RE.is_match(text))
    }

    /// Iterates `(line_number, comment_stripped_text)` over the function
    /// body, header included.
    pub fn body_lines<'a>(
        &'a self,
        function: &'a Function,
    ) -> impl Iterator<Item = (usize, &'a str)> + 'a {
        (function.start_line..=function.end_line).filter_map(move |line| {
            self.lines
                .get(line - 1)
                .map(|text| (line, text.as_str()))
        })
    }
}

// Blanks `//` and `/* */` comments in one forward pass, preserving line
// count so line numbers stay aligned with the raw text.
fn strip_comments(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut in_block = false;
    for raw in lines {
        let mut text = String::with_capacity(raw.len());
        let mut chars = raw.chars().peekable();
        while let Some(ch) = chars.next() {
            if in_block {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    in_block = false;
                }
                continue;
            }
            match (ch, chars.peek()) {
                ('/', Some('/')) => break,
                ('/', Some('*')) => {
                    chars.next();
                    in_block = true;
                }
                _ => text.push(ch),
            }
        }
        out.push(text);
    }
    out
}

fn scan_contracts(lines: &[String]) -> Vec<ContractDecl> {
    let mut contracts = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if let Some(caps) = CONTRACT_RE.captures(line) {
            let parents = caps
                .get(2)
                .map(|group| {
                    IDENT_RE
                        .find_iter(group.as_str())
                        .map(|m| m.as_str().to_string())
                        .collect()
                })
                .unwrap_or_default();
            contracts.push(ContractDecl {
                name: caps[1].to_string(),
                parents,
                line: idx + 1,
            });
        }
    }
    contracts
}

struct FunctionStart {
    line: usize,
    name: String,
    is_constructor: bool,
    is_modifier: bool,
    is_fallback: bool,
}

fn scan_functions(lines: &[String], contracts: &[ContractDecl]) -> Vec<Function> {
    let contract_names: Vec<&str> = contracts.iter().map(|c| c.name.as_str()).collect();
    let mut starts: Vec<FunctionStart> = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;

        if let Some(caps) = MODIFIER_RE.captures(line) {
            starts.push(FunctionStart {
                line: line_no,
                name: caps[1].to_string(),
                is_constructor: false,
                is_modifier: true,
                is_fallback: false,
            });
            continue;
        }

        if CONSTRUCTOR_RE.is_match(line) {
            starts.push(FunctionStart {
                line: line_no,
                name: "constructor".into(),
                is_constructor: true,
                is_modifier: false,
                is_fallback: false,
            });
            continue;
        }

        if UNNAMED_FN_RE.is_match(line) {
            starts.push(FunctionStart {
                line: line_no,
                name: "fallback".into(),
                is_constructor: false,
                is_modifier: false,
                is_fallback: true,
            });
            continue;
        }

        if let Some(caps) = FUNCTION_RE.captures(line) {
            let name = caps[1].to_string();
            // Pre-0.5 constructors share the contract's name.
            let is_constructor = contract_names.contains(&name.as_str());
            let is_fallback = name == "fallback" || name == "receive";
            starts.push(FunctionStart {
                line: line_no,
                name: if is_constructor {
                    "constructor".into()
                } else {
                    name
                },
                is_constructor,
                is_modifier: false,
                is_fallback,
            });
            continue;
        }

        if let Some(caps) = RECEIVE_FALLBACK_RE.captures(line) {
            starts.push(FunctionStart {
                line: line_no,
                name: caps[1].to_string(),
                is_constructor: false,
                is_modifier: false,
                is_fallback: true,
            });
        }
    }

    let mut functions = Vec::new();
    for (idx, start) in starts.iter().enumerate() {
        let hard_stop = starts
            .get(idx + 1)
            .map(|next| next.line - 1)
            .unwrap_or(lines.len());
        let end_line = find_body_end(lines, start.line, hard_stop);
        let header = header_text(lines, start.line, end_line);
        let (visibility, mutability, modifiers) = parse_header(&header);

        let contract = contracts
            .iter()
            .filter(|contract| contract.line <= start.line)
            .next_back()
            .map(|contract| contract.name.clone());

        functions.push(Function {
            name: start.name.clone(),
            contract,
            start_line: start.line,
            end_line,
            visibility,
            mutability,
            modifiers,
            is_constructor: start.is_constructor,
            is_fallback_or_receive: start.is_fallback,
            is_modifier: start.is_modifier,
        });
    }
    functions
}

/// Finds the line on which the function body's braces balance out, capped
/// by `hard_stop` (the line before the next function or EOF).
fn find_body_end(lines: &[String], start_line: usize, hard_stop: usize) -> usize {
    let mut depth: i64 = 0;
    let mut body_opened = false;

    for line_no in start_line..=hard_stop.min(lines.len()) {
        let text = &lines[line_no - 1];
        for ch in text.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    body_opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        // A bodyless declaration (interface member) ends on its `;`.
        if !body_opened && text.contains(';') {
            return line_no;
        }
        if body_opened && depth <= 0 {
            return line_no;
        }
    }
    hard_stop.max(start_line)
}

/// Concatenates the header declaration: everything from the start line up
/// to (and including) the line that opens the body or ends the prototype.
fn header_text(lines: &[String], start_line: usize, end_line: usize) -> String {
    let mut header = String::new();
    for line_no in start_line..=end_line.min(lines.len()) {
        let text = &lines[line_no - 1];
        match text.find('{') {
            Some(pos) => {
                header.push_str(&text[..pos]);
                return header;
            }
            None => {
                header.push_str(text);
                header.push(' ');
            }
        }
        if text.contains(';') {
            return header;
        }
    }
    header
}

/// Splits the header into visibility, mutability, and the modifier-name
/// list: identifier tokens between the closing parameter paren and the
/// body that are neither keywords nor part of a `returns (...)` clause.
fn parse_header(header: &str) -> (Visibility, Mutability, Vec<String>) {
    let after_params = skip_parameter_list(header);
    let before_returns = after_params
        .split_once("returns")
        .map(|(head, _)| head)
        .unwrap_or(after_params);
    let flattened = blank_parenthesised(before_returns);

    let mut visibility = Visibility::Public;
    let mut mutability = Mutability::Default;
    let mut modifiers = Vec::new();

    for token in IDENT_RE.find_iter(&flattened).map(|m| m.as_str()) {
        match token {
            "public" => visibility = Visibility::Public,
            "external" => visibility = Visibility::External,
            "internal" => visibility = Visibility::Internal,
            "private" => visibility = Visibility::Private,
            "view" => mutability = Mutability::View,
            "pure" => mutability = Mutability::Pure,
            "constant" => mutability = Mutability::Constant,
            "payable" => mutability = Mutability::Payable,
            _ if HEADER_KEYWORDS.contains(&token) => {}
            _ => modifiers.push(token.to_string()),
        }
    }
    (visibility, mutability, modifiers)
}

/// Returns the slice of `header` after the parameter list's closing paren.
fn skip_parameter_list(header: &str) -> &str {
    let Some(open) = header.find('(') else {
        return header;
    };
    let mut depth = 0usize;
    for (pos, ch) in header[open..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return &header[open + pos + 1..];
                }
            }
            _ => {}
        }
    }
    ""
}

/// Blanks out parenthesised argument lists so modifier names survive
/// tokenisation but their arguments do not.
fn blank_parenthesised(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for ch in text.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}
