//! Deterministic report assembly.
//!
//! Identical inputs must produce byte-identical `final_report.json`:
//! results follow the order key variables were requested in, and the
//! locations inside each result are sorted ascending by source line, then
//! by variable name.

use crate::verdict::{Classification, Confidence, DetectionMethod, Finding, SensitiveFinding};
use serde::{Serialize, Serializer};
use warden_core::guards::GuardTag;
use warden_source::SlotBinding;

/// One reported location inside a variable's result.
#[derive(Debug, Clone, Serialize)]
pub struct LocationEntry {
    pub line: usize,
    pub code: String,
    pub function: Option<String>,
    pub selector: Option<String>,
    pub has_source_condition: bool,
    pub has_bytecode_condition: bool,
    pub bytecode_condition_types: Vec<GuardTag>,
    pub confidence: Confidence,
    pub detection_method: DetectionMethod,
    pub incomplete: bool,
    pub warning: String,
}

/// Aggregated result for one key variable.
#[derive(Debug, Serialize)]
pub struct VariableResult {
    pub variable: String,
    #[serde(serialize_with = "slot_or_unknown")]
    pub storage_slot: Option<u64>,
    pub slot_ambiguous: bool,
    pub has_vulnerability: bool,
    pub dangerous_paths_count: usize,
    pub suspicious_paths_count: usize,
    pub dangerous_locations: Vec<LocationEntry>,
    pub suspicious_locations: Vec<LocationEntry>,
}

/// Run-level counters.
#[derive(Debug, Serialize)]
pub struct Summary {
    pub total_variables: usize,
    pub vulnerable_variables: usize,
    pub safe_variables: usize,
    pub sensitive_operation_count: usize,
    /// Jumps that fell back to the conservative all-JUMPDESTs edge set.
    pub dynamic_jumps: usize,
}

/// Root object of `final_report.json`.
#[derive(Debug, Serialize)]
pub struct FinalReport {
    pub contract_path: String,
    pub key_variables: Vec<String>,
    pub compilation_failed: bool,
    pub summary: Summary,
    pub results: Vec<VariableResult>,
    pub sensitive_operations: Vec<SensitiveFinding>,
}

/// Serializes a missing slot as the string `"unknown"`.
fn slot_or_unknown<S: Serializer>(slot: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
    match slot {
        Some(slot) => serializer.serialize_u64(*slot),
        None => serializer.serialize_str("unknown"),
    }
}

/// Builds the final report from per-variable findings.
///
/// `per_variable` pairs each requested key variable (in request order)
/// with its slot binding and findings.
pub fn build_report(
    contract_path: &str,
    per_variable: Vec<(SlotBinding, Vec<Finding>)>,
    sensitive: Vec<SensitiveFinding>,
    dynamic_jumps: usize,
) -> FinalReport {
    let key_variables: Vec<String> = per_variable
        .iter()
        .map(|(binding, _)| binding.name.clone())
        .collect();

    let mut results = Vec::with_capacity(per_variable.len());
    for (binding, mut findings) in per_variable {
        findings.sort_by(|a, b| (a.line, &a.variable).cmp(&(b.line, &b.variable)));

        let mut dangerous = Vec::new();
        let mut suspicious = Vec::new();
        for finding in &findings {
            let entry = location_entry(finding);
            match finding.classification {
                Classification::Dangerous => dangerous.push(entry),
                Classification::Suspicious => suspicious.push(entry),
                // Safe locations are reflected in the counters only.
                Classification::Safe => {}
            }
        }

        let has_vulnerability = !dangerous.is_empty() || !suspicious.is_empty();
        results.push(VariableResult {
            variable: binding.name.clone(),
            storage_slot: binding.slot,
            slot_ambiguous: binding.ambiguous,
            has_vulnerability,
            dangerous_paths_count: dangerous.len(),
            suspicious_paths_count: suspicious.len(),
            dangerous_locations: dangerous,
            suspicious_locations: suspicious,
        });
    }

    let vulnerable = results.iter().filter(|r| r.has_vulnerability).count();
    let summary = Summary {
        total_variables: results.len(),
        vulnerable_variables: vulnerable,
        safe_variables: results.len() - vulnerable,
        sensitive_operation_count: sensitive.len(),
        dynamic_jumps,
    };

    tracing::debug!(
        variables = summary.total_variables,
        vulnerable = summary.vulnerable_variables,
        sensitive = summary.sensitive_operation_count,
        "report assembled"
    );

    FinalReport {
        contract_path: contract_path.to_string(),
        key_variables,
        compilation_failed: false,
        summary,
        results,
        sensitive_operations: sensitive,
    }
}

/// The report emitted when the compiler produced no runtime bytecode.
pub fn failed_compilation_report(contract_path: &str, key_variables: &[String]) -> FinalReport {
    FinalReport {
        contract_path: contract_path.to_string(),
        key_variables: key_variables.to_vec(),
        compilation_failed: true,
        summary: Summary {
            total_variables: 0,
            vulnerable_variables: 0,
            safe_variables: 0,
            sensitive_operation_count: 0,
            dynamic_jumps: 0,
        },
        results: Vec::new(),
        sensitive_operations: Vec::new(),
    }
}

fn location_entry(finding: &Finding) -> LocationEntry {
    LocationEntry {
        line: finding.line,
        code: finding.code.clone(),
        function: finding.function.clone(),
        selector: finding.selector.clone(),
        has_source_condition: finding.has_source_guard,
        has_bytecode_condition: finding.has_bytecode_guard,
        bytecode_condition_types: finding.bytecode_tags.iter().copied().collect(),
        confidence: finding.confidence,
        detection_method: finding.method,
        incomplete: finding.incomplete,
        warning: finding.reason.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::{Classification, Confidence, DetectionMethod};
    use std::collections::BTreeSet;
    use warden_source::SlotKind;

    fn binding(name: &str, slot: Option<u64>) -> SlotBinding {
        SlotBinding {
            name: name.into(),
            slot,
            kind: SlotKind::Scalar,
            ambiguous: false,
        }
    }

    fn finding(variable: &str, line: usize, classification: Classification) -> Finding {
        Finding {
            variable: variable.into(),
            line,
            code: format!("{variable} = x;"),
            function: Some("f".into()),
            selector: None,
            classification,
            confidence: Confidence::Low,
            method: DetectionMethod::Taint,
            has_source_guard: false,
            has_bytecode_guard: false,
            bytecode_tags: BTreeSet::new(),
            incomplete: false,
            reason: "test".into(),
        }
    }

    #[test]
    fn results_follow_request_order_and_lines_sort() {
        let report = build_report(
            "a.sol",
            vec![
                (
                    binding("zeta", Some(1)),
                    vec![
                        finding("zeta", 9, Classification::Dangerous),
                        finding("zeta", 3, Classification::Dangerous),
                    ],
                ),
                (binding("alpha", Some(0)), vec![]),
            ],
            Vec::new(),
            0,
        );
        assert_eq!(report.key_variables, vec!["zeta", "alpha"]);
        let lines: Vec<usize> = report.results[0]
            .dangerous_locations
            .iter()
            .map(|l| l.line)
            .collect();
        assert_eq!(lines, vec![3, 9]);
        assert!(!report.results[1].has_vulnerability);
    }

    #[test]
    fn safe_findings_keep_the_variable_out_of_the_vulnerable_count() {
        let report = build_report(
            "a.sol",
            vec![(
                binding("owner", Some(0)),
                vec![finding("owner", 5, Classification::Safe)],
            )],
            Vec::new(),
            0,
        );
        assert_eq!(report.summary.vulnerable_variables, 0);
        assert_eq!(report.summary.safe_variables, 1);
        assert!(report.results[0].dangerous_locations.is_empty());
    }

    #[test]
    fn unknown_slot_serializes_as_string() {
        let report = build_report("a.sol", vec![(binding("x", None), vec![])], Vec::new(), 2);
        let json = serde_json::to_value(&report).expect("serializable");
        assert_eq!(json["results"][0]["storage_slot"], "unknown");
        assert_eq!(json["summary"]["dynamic_jumps"], 2);
    }

    #[test]
    fn identical_inputs_serialize_identically() {
        let make = || {
            build_report(
                "a.sol",
                vec![(
                    binding("owner", Some(0)),
                    vec![finding("owner", 5, Classification::Dangerous)],
                )],
                Vec::new(),
                1,
            )
        };
        let a = serde_json::to_string_pretty(&make()).expect("json");
        let b = serde_json::to_string_pretty(&make()).expect("json");
        assert_eq!(a, b);
    }
}
