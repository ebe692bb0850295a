//! Verdict synthesis: joins bytecode-side taint evidence with source-side
//! guard evidence into per-location classifications.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use warden_core::Opcode;
use warden_core::cfg::CfgBundle;
use warden_core::decoder::Disassembly;
use warden_core::guards::{GuardTag, classify_path};
use warden_core::taint::TaintReport;
use warden_source::{Function, LineIndex, SlotBinding, SourceUnit, SrcMapEntry, Usage, UsageKind};

/// Risk level for one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Safe,
    Suspicious,
    Dangerous,
}

/// How corroborated the evidence behind a verdict is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Which detector produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Taint,
    SourceSupplement,
}

/// Who spotted a sensitive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    Source,
    Bytecode,
    Both,
}

/// Bytecode evidence attached to one source line: the union of guard tags
/// over every taint path reaching a write on that line.
#[derive(Debug, Clone, Default)]
pub struct SinkEvidence {
    pub tags: BTreeSet<GuardTag>,
    /// True when path enumeration hit a hard bound for any sink here.
    pub incomplete: bool,
}

/// One classified write location for a key variable.
#[derive(Debug, Clone)]
pub struct Finding {
    pub variable: String,
    pub line: usize,
    pub code: String,
    pub function: Option<String>,
    pub selector: Option<String>,
    pub classification: Classification,
    pub confidence: Confidence,
    pub method: DetectionMethod,
    pub has_source_guard: bool,
    pub has_bytecode_guard: bool,
    pub bytecode_tags: BTreeSet<GuardTag>,
    pub incomplete: bool,
    pub reason: String,
}

/// A sensitive operation (selfdestruct and friends), reported regardless
/// of key-variable membership.
#[derive(Debug, Clone, Serialize)]
pub struct SensitiveFinding {
    pub line: usize,
    pub code: String,
    pub keyword: String,
    pub function: Option<String>,
    pub classification: Classification,
    pub confidence: Confidence,
    pub has_access_control: bool,
    pub detection_source: DetectionSource,
    pub reason: String,
}

const SENSITIVE_KEYWORDS: &[(&str, &str)] = &[
    ("selfdestruct", "contract self-destruction"),
    ("suicide", "contract self-destruction (legacy name)"),
    ("delegatecall", "delegated call executing foreign code in this context"),
    ("callcode", "legacy delegated call"),
];

/// Collapses the taint sinks relevant to one variable onto source lines,
/// classifying the guard evidence of every path along the way.
///
/// A sink is relevant when its statically recovered slot matches the
/// binding, or when both are unknown (reduced-specificity reporting for
/// unresolvable variables).
pub fn sink_evidence_by_line(
    bundle: &CfgBundle,
    taint: &TaintReport,
    binding: &SlotBinding,
    disassembly: &Disassembly,
    srcmap: &[SrcMapEntry],
    line_index: &LineIndex,
) -> BTreeMap<usize, SinkEvidence> {
    let mut by_line: BTreeMap<usize, SinkEvidence> = BTreeMap::new();

    for sink in &taint.sinks {
        let relevant = match binding.slot {
            Some(slot) => sink.slot == Some(slot),
            None => sink.slot.is_none(),
        };
        if !relevant {
            continue;
        }

        let Some(instr_index) = disassembly
            .instructions
            .iter()
            .position(|ins| ins.pc == sink.pc)
        else {
            continue;
        };
        let Some(line) = warden_source::line_for_instruction(srcmap, line_index, instr_index)
        else {
            tracing::debug!(pc = sink.pc, "no source line for sink; dropping");
            continue;
        };

        let entry = by_line.entry(line).or_default();
        entry.incomplete |= sink.incomplete;
        for path in &sink.paths {
            let evidence = classify_path(bundle, &path.blocks);
            entry.tags.extend(evidence.tags);
        }
    }

    by_line
}

/// Classifies every runtime write of `var`, combining taint evidence with
/// the source-side view.
///
/// `sink_lines` carries, per source line, the merged guard evidence of the
/// taint paths that reach a storage write on that line (already filtered
/// to this variable's slot).
pub fn evaluate_variable(
    unit: &SourceUnit,
    var: &str,
    usages: &[Usage],
    sink_lines: &BTreeMap<usize, SinkEvidence>,
    selectors: &BTreeMap<String, String>,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    for usage in usages {
        if usage.kind != UsageKind::Write {
            continue;
        }
        let Some(function) = usage.function.as_deref().and_then(|name| {
            unit.functions
                .iter()
                .find(|f| f.name == name && f.start_line <= usage.line && usage.line <= f.end_line)
        }) else {
            // A write outside any function can only be a declaration
            // initialiser that the usage scan did not fold.
            continue;
        };
        if is_filtered_context(function) {
            continue;
        }

        let has_source_guard = usage.has_condition
            || !function.modifiers.is_empty()
            || unit.body_has_condition(function);
        let selector = selectors.get(&function.name).cloned();

        let finding = match sink_lines.get(&usage.line) {
            Some(evidence) => {
                let has_bytecode_guard = !evidence.tags.is_empty();
                let has_access_tag = evidence.tags.contains(&GuardTag::AccessControl);
                let (classification, confidence) =
                    verdict_for(has_bytecode_guard, has_source_guard, has_access_tag);
                Finding {
                    variable: var.to_string(),
                    line: usage.line,
                    code: usage.code.clone(),
                    function: Some(function.name.clone()),
                    selector,
                    classification,
                    confidence,
                    method: DetectionMethod::Taint,
                    has_source_guard,
                    has_bytecode_guard,
                    bytecode_tags: evidence.tags.clone(),
                    incomplete: evidence.incomplete,
                    reason: taint_reason(classification, has_bytecode_guard, has_source_guard),
                }
            }
            None => {
                // Supplementary detection: the write never showed up as a
                // taint sink (the value may not depend on call data), but
                // an unprotected public setter is still an attack surface.
                if !function.is_externally_reachable() {
                    continue;
                }
                let has_access_control = unit.has_access_control(function);
                let (classification, confidence, reason) = if has_access_control {
                    (
                        Classification::Safe,
                        Confidence::Medium,
                        "write guarded by caller-identity check in source".to_string(),
                    )
                } else if has_source_guard {
                    (
                        Classification::Suspicious,
                        Confidence::Medium,
                        "write guarded by a condition that does not check the caller".to_string(),
                    )
                } else {
                    (
                        Classification::Dangerous,
                        Confidence::Low,
                        "publicly reachable write with no guard of any kind".to_string(),
                    )
                };
                Finding {
                    variable: var.to_string(),
                    line: usage.line,
                    code: usage.code.clone(),
                    function: Some(function.name.clone()),
                    selector,
                    classification,
                    confidence,
                    method: DetectionMethod::SourceSupplement,
                    has_source_guard,
                    has_bytecode_guard: false,
                    bytecode_tags: BTreeSet::new(),
                    incomplete: false,
                    reason,
                }
            }
        };
        findings.push(finding);
    }

    findings.sort_by_key(|finding| finding.line);
    findings
}

/// Writes in these contexts are not a runtime attack surface.
fn is_filtered_context(function: &Function) -> bool {
    function.is_constructor
        || function.is_view_or_pure()
        || function.is_fallback_or_receive
        || function.is_modifier
}

/// The evidence-combination table.
fn verdict_for(
    has_bytecode_guard: bool,
    has_source_guard: bool,
    has_access_tag: bool,
) -> (Classification, Confidence) {
    match (has_bytecode_guard, has_source_guard, has_access_tag) {
        (true, true, true) => (Classification::Safe, Confidence::High),
        (true, true, false) => (Classification::Suspicious, Confidence::Medium),
        (true, false, true) => (Classification::Suspicious, Confidence::Medium),
        (true, false, false) => (Classification::Suspicious, Confidence::Low),
        (false, true, _) => (Classification::Suspicious, Confidence::Medium),
        (false, false, _) => (Classification::Dangerous, Confidence::Low),
    }
}

fn taint_reason(
    classification: Classification,
    has_bytecode_guard: bool,
    has_source_guard: bool,
) -> String {
    match classification {
        Classification::Safe => {
            "tainted write protected by a caller-identity comparison on every observed path".into()
        }
        Classification::Suspicious => match (has_bytecode_guard, has_source_guard) {
            (true, true) => "tainted write behind a condition that does not check the caller".into(),
            (true, false) => "bytecode shows a guard the source scan could not confirm".into(),
            _ => "source shows a guard the bytecode paths do not corroborate".into(),
        },
        Classification::Dangerous => {
            "untrusted input flows into this storage write with no guard on any path".into()
        }
    }
}

/// Scans source and bytecode for sensitive operations and merges the two
/// views by line.
pub fn sensitive_findings(
    unit: &SourceUnit,
    disassembly: &Disassembly,
    srcmap: &[SrcMapEntry],
    line_index: Option<&LineIndex>,
) -> Vec<SensitiveFinding> {
    let mut by_line: BTreeMap<usize, SensitiveFinding> = BTreeMap::new();

    // Source side. `code_line` is already comment-stripped, so sensitive
    // calls inside comments never match.
    for line_no in 1..=unit.lines.len() {
        let lowered = unit.code_line(line_no).to_lowercase();
        for (keyword, description) in SENSITIVE_KEYWORDS {
            if !lowered.contains(keyword) || inside_string_literal(&lowered, keyword) {
                continue;
            }
            let Some(function) = unit.function_at(line_no) else {
                continue;
            };
            let protected = function_is_protected(unit, function);
            by_line.insert(
                line_no,
                SensitiveFinding {
                    line: line_no,
                    code: unit.raw_line(line_no).trim().to_string(),
                    keyword: (*keyword).to_string(),
                    function: Some(function.name.clone()),
                    classification: if protected {
                        Classification::Suspicious
                    } else {
                        Classification::Dangerous
                    },
                    confidence: Confidence::Medium,
                    has_access_control: protected,
                    detection_source: DetectionSource::Source,
                    reason: (*description).to_string(),
                },
            );
            break;
        }
    }

    // Bytecode side, mapped back through the source map.
    if let Some(index) = line_index {
        for (instr_index, ins) in disassembly.instructions.iter().enumerate() {
            let keyword = match ins.op {
                Opcode::SELFDESTRUCT => "selfdestruct",
                Opcode::DELEGATECALL => "delegatecall",
                Opcode::CALLCODE => "callcode",
                _ => continue,
            };
            let Some(line) = warden_source::line_for_instruction(srcmap, index, instr_index) else {
                continue;
            };
            match by_line.get_mut(&line) {
                Some(existing) => existing.detection_source = DetectionSource::Both,
                None => {
                    let function = unit.function_at(line);
                    let protected = function.is_some_and(|f| function_is_protected(unit, f));
                    by_line.insert(
                        line,
                        SensitiveFinding {
                            line,
                            code: unit.raw_line(line).trim().to_string(),
                            keyword: keyword.to_string(),
                            function: function.map(|f| f.name.clone()),
                            classification: if protected {
                                Classification::Suspicious
                            } else {
                                Classification::Dangerous
                            },
                            confidence: Confidence::Medium,
                            has_access_control: protected,
                            detection_source: DetectionSource::Bytecode,
                            reason: format!("{} opcode reached from this line", keyword),
                        },
                    );
                }
            }
        }
    }

    by_line.into_values().collect()
}

/// A sensitive call is tolerable when the surrounding function cannot be
/// driven by an arbitrary caller.
fn function_is_protected(unit: &SourceUnit, function: &Function) -> bool {
    function.is_constructor
        || function.is_modifier
        || function.is_view_or_pure()
        || !function.is_externally_reachable()
        || unit.has_access_control(function)
}

/// Crude string-literal check: the keyword only counts when it appears
/// outside double quotes.
fn inside_string_literal(line: &str, keyword: &str) -> bool {
    let Some(pos) = line.find(keyword) else {
        return false;
    };
    line[..pos].matches('"').count() % 2 == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_source::find_usages;

    fn selectors() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    const UNGUARDED: &str = r#"
contract Simple {
    address public owner;

    function setOwner(address next) public {
        owner = next;
    }
}
"#;

    #[test]
    fn unguarded_tainted_write_is_dangerous_low() {
        let unit = SourceUnit::parse(UNGUARDED);
        let usages = find_usages(&unit, "owner");
        let write_line = usages
            .iter()
            .find(|u| u.kind == UsageKind::Write)
            .map(|u| u.line)
            .unwrap();
        let mut sinks = BTreeMap::new();
        sinks.insert(write_line, SinkEvidence::default());

        let findings = evaluate_variable(&unit, "owner", &usages, &sinks, &selectors());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].classification, Classification::Dangerous);
        assert_eq!(findings[0].confidence, Confidence::Low);
        assert!(!findings[0].has_bytecode_guard);
        assert!(!findings[0].has_source_guard);
    }

    #[test]
    fn access_controlled_write_is_safe_high() {
        let source = r#"
contract Owned {
    address public owner;

    modifier onlyOwner() { require(msg.sender == owner); _; }

    function setOwner(address next) public onlyOwner {
        owner = next;
    }
}
"#;
        let unit = SourceUnit::parse(source);
        let usages = find_usages(&unit, "owner");
        let write_line = usages
            .iter()
            .find(|u| u.kind == UsageKind::Write && u.function.as_deref() == Some("setOwner"))
            .map(|u| u.line)
            .unwrap();
        let mut evidence = SinkEvidence::default();
        evidence.tags.extend([
            GuardTag::ConditionalJump,
            GuardTag::Comparison,
            GuardTag::Revert,
            GuardTag::AccessControl,
        ]);
        let mut sinks = BTreeMap::new();
        sinks.insert(write_line, evidence);

        let findings = evaluate_variable(&unit, "owner", &usages, &sinks, &selectors());
        let finding = findings.iter().find(|f| f.line == write_line).unwrap();
        assert_eq!(finding.classification, Classification::Safe);
        assert_eq!(finding.confidence, Confidence::High);
    }

    #[test]
    fn constructor_write_produces_no_finding() {
        let source = r#"
contract Owned {
    address public owner;

    constructor() public {
        owner = msg.sender;
    }
}
"#;
        let unit = SourceUnit::parse(source);
        let usages = find_usages(&unit, "owner");
        let sinks = BTreeMap::new();
        let findings = evaluate_variable(&unit, "owner", &usages, &sinks, &selectors());
        assert!(findings.is_empty());
    }

    #[test]
    fn view_function_named_return_is_filtered() {
        let source = r#"
contract Owned {
    address public owner;

    function getOwner() public view returns (address o) {
        o = owner;
    }
}
"#;
        let unit = SourceUnit::parse(source);
        let usages = find_usages(&unit, "owner");
        let findings = evaluate_variable(&unit, "owner", &usages, &BTreeMap::new(), &selectors());
        assert!(findings.is_empty());
    }

    #[test]
    fn supplement_flags_public_write_missed_by_taint() {
        // The write does not depend on call data, so taint never records
        // a sink, but anyone can still call reset().
        let source = r#"
contract Counter {
    uint256 public total;

    function reset() public {
        total = 0;
    }
}
"#;
        let unit = SourceUnit::parse(source);
        let usages = find_usages(&unit, "total");
        let findings = evaluate_variable(&unit, "total", &usages, &BTreeMap::new(), &selectors());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].method, DetectionMethod::SourceSupplement);
        assert_eq!(findings[0].classification, Classification::Dangerous);
    }

    #[test]
    fn sensitive_selfdestruct_without_guard_is_dangerous() {
        let source = r#"
contract Killable {
    address public owner;

    function kill() public {
        selfdestruct(owner);
    }
}
"#;
        let unit = SourceUnit::parse(source);
        let findings = sensitive_findings(&unit, &Disassembly::default(), &[], None);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].keyword, "selfdestruct");
        assert_eq!(findings[0].classification, Classification::Dangerous);
        assert_eq!(findings[0].detection_source, DetectionSource::Source);
    }

    #[test]
    fn sensitive_call_behind_modifier_is_suspicious() {
        let source = r#"
contract Killable {
    address public owner;

    modifier onlyOwner() { require(msg.sender == owner); _; }

    function kill() public onlyOwner {
        selfdestruct(owner);
    }
}
"#;
        let unit = SourceUnit::parse(source);
        let findings = sensitive_findings(&unit, &Disassembly::default(), &[], None);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].classification, Classification::Suspicious);
        assert!(findings[0].has_access_control);
    }
}
