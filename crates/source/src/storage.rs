//! Storage-slot resolution from declaration order.
//!
//! One variable per 32-byte slot at this fidelity: scalars take one slot,
//! mappings and dynamic arrays take their base slot, fixed arrays of
//! length N take N consecutive slots, constants and immutables take none.
//! Packing of sub-word scalars is deliberately not modelled.

use crate::functions::{ContractDecl, SourceUnit};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

static MAPPING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*mapping\s*\(").expect("static regex"));
static ARRAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:uint\d*|int\d*|address|bool|bytes\d*|string|[A-Z]\w*)\s*\[\s*(\d*)\s*\]")
        .expect("static regex")
});
static SCALAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:uint\d*|int\d*|address|bool|bytes\d*|string)\s+").expect("static regex")
});
static STRUCT_VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[A-Z]\w*\s+(?:public\s+|private\s+|internal\s+)?\w+\s*(?:=|;)").expect("static regex"));
static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_]\w*").expect("static regex"));
static BLOCK_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(struct|enum|event|using|function|modifier|constructor)\b").expect("static regex"));

const DECL_KEYWORDS: &[&str] = &[
    "public", "private", "internal", "constant", "immutable", "payable", "memory", "storage",
];

/// Declared shape of a state variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    Scalar,
    Mapping,
    Array,
    Struct,
}

/// A key variable bound to its declaration slot.
#[derive(Debug, Clone, Serialize)]
pub struct SlotBinding {
    pub name: String,
    /// `None` when the variable was not found or the resolution is
    /// ambiguous across contracts.
    pub slot: Option<u64>,
    pub kind: SlotKind,
    /// True when several contracts declare the variable at different
    /// slots and no single layout wins.
    pub ambiguous: bool,
}

#[derive(Debug, Clone)]
struct Declaration {
    name: String,
    slot: u64,
    kind: SlotKind,
}

/// Resolves each key variable to a slot using per-contract declaration
/// order, preferring declarations in the most-derived contract.
pub fn resolve_slots(unit: &SourceUnit, key_vars: &[String]) -> Vec<SlotBinding> {
    let layouts: BTreeMap<String, Vec<Declaration>> = unit
        .contracts
        .iter()
        .map(|contract| (contract.name.clone(), contract_layout(unit, contract)))
        .collect();

    // A contract nobody lists as a parent is a leaf of the hierarchy.
    let parent_names: Vec<&str> = unit
        .contracts
        .iter()
        .flat_map(|contract| contract.parents.iter().map(|p| p.as_str()))
        .collect();
    let leaf_contracts: Vec<&str> = unit
        .contracts
        .iter()
        .map(|contract| contract.name.as_str())
        .filter(|name| !parent_names.contains(name))
        .collect();

    key_vars
        .iter()
        .map(|var| {
            let mut candidates: Vec<(&str, &Declaration)> = Vec::new();
            for (contract, decls) in &layouts {
                // Last declaration wins within one contract.
                if let Some(decl) = decls.iter().rev().find(|decl| decl.name == *var) {
                    candidates.push((contract.as_str(), decl));
                }
            }

            let preferred: Vec<&(&str, &Declaration)> = candidates
                .iter()
                .filter(|(contract, _)| leaf_contracts.contains(contract))
                .collect();
            let pool = if preferred.is_empty() {
                candidates.iter().collect::<Vec<_>>()
            } else {
                preferred
            };

            let binding = match pool.as_slice() {
                [] => SlotBinding {
                    name: var.clone(),
                    slot: None,
                    kind: SlotKind::Scalar,
                    ambiguous: false,
                },
                [(_, decl)] => SlotBinding {
                    name: var.clone(),
                    slot: Some(decl.slot),
                    kind: decl.kind,
                    ambiguous: false,
                },
                many => {
                    let first = many[0].1;
                    if many.iter().all(|(_, decl)| decl.slot == first.slot) {
                        SlotBinding {
                            name: var.clone(),
                            slot: Some(first.slot),
                            kind: first.kind,
                            ambiguous: false,
                        }
                    } else {
                        tracing::warn!(var, "slot ambiguous across contracts; marking unknown");
                        SlotBinding {
                            name: var.clone(),
                            slot: None,
                            kind: first.kind,
                            ambiguous: true,
                        }
                    }
                }
            };

            tracing::debug!(
                var,
                slot = ?binding.slot,
                ambiguous = binding.ambiguous,
                "slot resolved"
            );
            binding
        })
        .collect()
}

/// Scans the contract span for state-variable declarations, assigning
/// slots in file order.
fn contract_layout(unit: &SourceUnit, contract: &ContractDecl) -> Vec<Declaration> {
    let span_end = unit
        .contracts
        .iter()
        .map(|other| other.line)
        .filter(|line| *line > contract.line)
        .min()
        .map(|next| next - 1)
        .unwrap_or(unit.lines.len());

    let mut declarations = Vec::new();
    let mut next_slot: u64 = 0;
    let mut nested_depth: i64 = 0;

    for line_no in contract.line + 1..=span_end {
        // Function and modifier bodies never declare state.
        if unit.function_at(line_no).is_some() {
            continue;
        }
        let code = unit.code_line(line_no);

        // Skip struct/enum/event definitions and their bodies.
        if BLOCK_OPEN_RE.is_match(code) {
            nested_depth += braces_delta(code).max(0);
            continue;
        }
        if nested_depth > 0 {
            nested_depth += braces_delta(code);
            nested_depth = nested_depth.max(0);
            continue;
        }

        let kind = if MAPPING_RE.is_match(code) {
            Some(SlotKind::Mapping)
        } else if ARRAY_RE.is_match(code) {
            Some(SlotKind::Array)
        } else if SCALAR_RE.is_match(code) {
            Some(SlotKind::Scalar)
        } else if STRUCT_VAR_RE.is_match(code) {
            Some(SlotKind::Struct)
        } else {
            None
        };
        let Some(kind) = kind else { continue };

        if code.contains("constant") || code.contains("immutable") {
            continue;
        }
        let Some(name) = declared_name(code) else {
            continue;
        };

        let width = match kind {
            SlotKind::Array => ARRAY_RE
                .captures(code)
                .and_then(|caps| caps[1].parse::<u64>().ok())
                .unwrap_or(1),
            _ => 1,
        };

        declarations.push(Declaration {
            name,
            slot: next_slot,
            kind,
        });
        next_slot += width;
    }

    declarations
}

fn braces_delta(code: &str) -> i64 {
    code.chars().fold(0i64, |acc, ch| match ch {
        '{' => acc + 1,
        '}' => acc - 1,
        _ => acc,
    })
}

/// The declared identifier: the last name before `=` or `;` that is not a
/// keyword. Works for `uint256 public totalSupply;` as well as
/// `mapping(address => uint) balances;`.
fn declared_name(code: &str) -> Option<String> {
    // The `=>` arrows inside a mapping type would confuse the assignment
    // split; skip past the balanced type parens first.
    let scan = if MAPPING_RE.is_match(code) {
        mapping_type_end(code).map(|pos| &code[pos..]).unwrap_or(code)
    } else {
        code
    };
    let head = scan.split(['=', ';']).next()?;
    NAME_RE
        .find_iter(head)
        .map(|m| m.as_str())
        .filter(|name| !DECL_KEYWORDS.contains(name))
        .last()
        .map(|name| name.to_string())
}

/// Byte index just past the balanced `(...)` of a mapping type.
fn mapping_type_end(code: &str) -> Option<usize> {
    let open = code.find('(')?;
    let mut depth = 0usize;
    for (pos, ch) in code[open..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + pos + 1);
                }
            }
            _ => {}
        }
    }
    None
}
