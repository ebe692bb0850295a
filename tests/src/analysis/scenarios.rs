//! End-to-end scenarios joining hand-assembled bytecode, a hand-built
//! source map, and real Solidity snippets through the full verdict
//! pipeline.

use std::collections::BTreeMap;
use warden_analysis::{
    Classification, Confidence, DetectionMethod, build_report, evaluate_variable,
    sensitive_findings, sink_evidence_by_line,
};
use warden_core::cfg::{CfgBundle, build_cfg};
use warden_core::decoder::{Disassembly, decode_bytecode};
use warden_core::guards::GuardTag;
use warden_core::taint::{TaintConfig, TaintReport, run_taint};
use warden_source::{LineIndex, SlotBinding, SourceUnit, find_usages, parse_srcmap, resolve_slots};

/// Builds a source map with one entry per instruction, all pointing at
/// `default_line`, except the listed overrides.
fn srcmap_for(
    source: &str,
    instruction_count: usize,
    default_line_text: &str,
    overrides: &[(usize, &str)],
) -> String {
    let offset_of = |needle: &str| {
        source
            .find(needle)
            .unwrap_or_else(|| panic!("fixture text `{needle}` missing from source"))
    };
    let default_offset = offset_of(default_line_text);
    (0..instruction_count)
        .map(|index| {
            let offset = overrides
                .iter()
                .find(|(at, _)| *at == index)
                .map(|(_, text)| offset_of(text))
                .unwrap_or(default_offset);
            format!("{offset}:1:0:-")
        })
        .collect::<Vec<_>>()
        .join(";")
}

struct Pipeline {
    unit: SourceUnit,
    bindings: Vec<SlotBinding>,
    bundle: CfgBundle,
    disassembly: Disassembly,
    taint: TaintReport,
    srcmap: Vec<warden_source::SrcMapEntry>,
    line_index: LineIndex,
}

fn run_pipeline(source: &str, bytecode: &str, srcmap: &str, key_vars: &[&str]) -> Pipeline {
    let unit = SourceUnit::parse(source);
    let key_vars: Vec<String> = key_vars.iter().map(|v| v.to_string()).collect();
    let bindings = resolve_slots(&unit, &key_vars);

    let (disassembly, _, _) = decode_bytecode(bytecode, false).expect("fixture decodes");
    let bundle = build_cfg(&disassembly).expect("cfg builds");

    let key_slots = bindings.iter().filter_map(|b| b.slot).collect();
    let include_unknown = bindings.iter().any(|b| b.slot.is_none());
    let taint = run_taint(&bundle, &key_slots, include_unknown, &TaintConfig::default());

    let srcmap = parse_srcmap(srcmap).expect("fixture srcmap parses");
    let line_index = LineIndex::new(source);

    Pipeline {
        unit,
        bindings,
        bundle,
        disassembly,
        taint,
        srcmap,
        line_index,
    }
}

fn findings_for(pipeline: &Pipeline, var: &str) -> Vec<warden_analysis::Finding> {
    let binding = pipeline
        .bindings
        .iter()
        .find(|b| b.name == var)
        .expect("binding present");
    let usages = find_usages(&pipeline.unit, var);
    let sinks = sink_evidence_by_line(
        &pipeline.bundle,
        &pipeline.taint,
        binding,
        &pipeline.disassembly,
        &pipeline.srcmap,
        &pipeline.line_index,
    );
    evaluate_variable(&pipeline.unit, var, &usages, &sinks, &BTreeMap::new())
}

// ---------------------------------------------------------------------
// Scenario: unguarded owner setter.
// ---------------------------------------------------------------------

const UNGUARDED_SOURCE: &str = r#"contract Simple {
    address public owner;

    function setOwner(address n) public {
        owner = n;
    }
}
"#;

/// PUSH1 0; CALLDATALOAD; PUSH1 0; SSTORE; STOP
const UNGUARDED_BYTECODE: &str = "60003560005500";

#[test]
fn unguarded_setter_is_dangerous_low() {
    let srcmap = srcmap_for(UNGUARDED_SOURCE, 5, "owner = n;", &[]);
    let pipeline = run_pipeline(UNGUARDED_SOURCE, UNGUARDED_BYTECODE, &srcmap, &["owner"]);
    let findings = findings_for(&pipeline, "owner");

    assert_eq!(findings.len(), 1);
    let finding = &findings[0];
    assert_eq!(finding.classification, Classification::Dangerous);
    assert_eq!(finding.confidence, Confidence::Low);
    assert_eq!(finding.method, DetectionMethod::Taint);
    assert!(finding.bytecode_tags.is_empty());
    assert!(!finding.has_source_guard);
    assert!(finding.code.contains("owner = n"));
}

// ---------------------------------------------------------------------
// Scenario: modifier-guarded setter.
// ---------------------------------------------------------------------

const GUARDED_SOURCE: &str = r#"contract Owned {
    address public owner;

    modifier onlyOwner() {
        require(msg.sender == owner);
        _;
    }

    function setOwner(address n) public onlyOwner {
        owner = n;
    }
}
"#;

/// CALLER; PUSH1 0; SLOAD; EQ; PUSH1 0x0d; JUMPI | PUSH1 0; PUSH1 0;
/// REVERT | JUMPDEST; PUSH1 0; CALLDATALOAD; PUSH1 0; SSTORE; STOP
const GUARDED_BYTECODE: &str = "3360005414600d5760006000fd5b60003560005500";

#[test]
fn modifier_guarded_setter_is_safe_high() {
    // 15 instructions; the SSTORE is instruction index 13.
    let srcmap = srcmap_for(
        GUARDED_SOURCE,
        15,
        "require(msg.sender == owner);",
        &[(13, "owner = n;")],
    );
    let pipeline = run_pipeline(GUARDED_SOURCE, GUARDED_BYTECODE, &srcmap, &["owner"]);
    let findings = findings_for(&pipeline, "owner");

    let finding = findings
        .iter()
        .find(|f| f.code.contains("owner = n"))
        .expect("setter write classified");
    assert_eq!(finding.classification, Classification::Safe);
    assert_eq!(finding.confidence, Confidence::High);
    assert!(finding.bytecode_tags.contains(&GuardTag::AccessControl));
    assert!(finding.bytecode_tags.contains(&GuardTag::Revert));
    assert!(finding.has_source_guard);
}

// ---------------------------------------------------------------------
// Scenario: require-guarded setter without an identity check.
// ---------------------------------------------------------------------

const LIMIT_SOURCE: &str = r#"contract Wallet {
    address public owner;
    uint256 public withdrawLimit;

    function setLimit(uint256 newLimit) public {
        require(newLimit > 0);
        withdrawLimit = newLimit;
    }
}
"#;

/// PUSH1 0; CALLDATALOAD; PUSH1 0; DUP2; GT; PUSH1 0x0f; JUMPI | PUSH1 0;
/// PUSH1 0; REVERT | JUMPDEST; PUSH1 1; SSTORE; STOP
const LIMIT_BYTECODE: &str = "60003560008111600f5760006000fd5b60015500";

#[test]
fn value_guarded_setter_is_suspicious_medium() {
    // 14 instructions; the SSTORE is instruction index 12.
    let srcmap = srcmap_for(
        LIMIT_SOURCE,
        14,
        "require(newLimit > 0);",
        &[(12, "withdrawLimit = newLimit;")],
    );
    let pipeline = run_pipeline(LIMIT_SOURCE, LIMIT_BYTECODE, &srcmap, &["withdrawLimit"]);
    let findings = findings_for(&pipeline, "withdrawLimit");

    let finding = findings
        .iter()
        .find(|f| f.code.contains("withdrawLimit = newLimit"))
        .expect("limit write classified");
    assert_eq!(finding.classification, Classification::Suspicious);
    assert_eq!(finding.confidence, Confidence::Medium);
    assert!(finding.bytecode_tags.contains(&GuardTag::Comparison));
    assert!(finding.bytecode_tags.contains(&GuardTag::ConditionalJump));
    assert!(finding.bytecode_tags.contains(&GuardTag::Revert));
    assert!(!finding.bytecode_tags.contains(&GuardTag::AccessControl));
}

// ---------------------------------------------------------------------
// Scenario: constructor initialisation is filtered out.
// ---------------------------------------------------------------------

#[test]
fn constructor_write_is_filtered() {
    let source = r#"contract Owned {
    address public owner;

    constructor() public {
        owner = msg.sender;
    }
}
"#;
    let unit = SourceUnit::parse(source);
    let usages = find_usages(&unit, "owner");
    let findings = evaluate_variable(&unit, "owner", &usages, &BTreeMap::new(), &BTreeMap::new());
    assert!(findings.is_empty());
}

// ---------------------------------------------------------------------
// Scenario: view-function return assignment is filtered out.
// ---------------------------------------------------------------------

#[test]
fn view_return_assignment_is_filtered() {
    let source = r#"contract Owned {
    address public owner;

    function getOwner() public view returns (address o) {
        o = owner;
    }
}
"#;
    let unit = SourceUnit::parse(source);
    let usages = find_usages(&unit, "owner");
    let findings = evaluate_variable(&unit, "owner", &usages, &BTreeMap::new(), &BTreeMap::new());
    assert!(findings.is_empty());
}

// ---------------------------------------------------------------------
// Scenario: selfdestruct in a public function.
// ---------------------------------------------------------------------

#[test]
fn public_selfdestruct_is_one_dangerous_finding() {
    let source = r#"contract Killable {
    address public owner;

    function kill() public {
        selfdestruct(owner);
    }
}
"#;
    let unit = SourceUnit::parse(source);
    let findings = sensitive_findings(&unit, &Disassembly::default(), &[], None);
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].classification, Classification::Dangerous);
    assert_eq!(findings[0].keyword, "selfdestruct");
    assert_eq!(findings[0].function.as_deref(), Some("kill"));
}

// ---------------------------------------------------------------------
// Determinism.
// ---------------------------------------------------------------------

#[test]
fn repeated_runs_serialize_identically() {
    let build = || {
        let srcmap = srcmap_for(UNGUARDED_SOURCE, 5, "owner = n;", &[]);
        let pipeline = run_pipeline(UNGUARDED_SOURCE, UNGUARDED_BYTECODE, &srcmap, &["owner"]);
        let findings = findings_for(&pipeline, "owner");
        let binding = pipeline.bindings.into_iter().next().expect("binding");
        let sensitive = sensitive_findings(
            &pipeline.unit,
            &pipeline.disassembly,
            &pipeline.srcmap,
            Some(&pipeline.line_index),
        );
        let report = build_report(
            "simple.sol",
            vec![(binding, findings)],
            sensitive,
            pipeline.bundle.dynamic_jumps,
        );
        serde_json::to_string_pretty(&report).expect("serializes")
    };
    assert_eq!(build(), build());
}

#[test]
fn key_variable_order_is_preserved_in_results() {
    let srcmap = srcmap_for(LIMIT_SOURCE, 14, "require(newLimit > 0);", &[]);
    let pipeline = run_pipeline(
        LIMIT_SOURCE,
        LIMIT_BYTECODE,
        &srcmap,
        &["withdrawLimit", "owner"],
    );
    let names: Vec<&str> = pipeline.bindings.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["withdrawLimit", "owner"]);
    assert_eq!(pipeline.bindings[0].slot, Some(1));
    assert_eq!(pipeline.bindings[1].slot, Some(0));
}
