//! Joins the bytecode-side evidence (taint sinks, guard tags) with the
//! source-side view (usages, function attributes, modifier lists) into
//! per-location verdicts, and assembles the deterministic final report
//! plus the intermediate debugging artefacts.

pub mod artifacts;
pub mod error;
pub mod report;
pub mod verdict;

pub use error::{Error, Result};
pub use report::{FinalReport, LocationEntry, Summary, VariableResult, build_report, failed_compilation_report};
pub use verdict::{
    Classification, Confidence, DetectionMethod, DetectionSource, Finding, SensitiveFinding,
    SinkEvidence, evaluate_variable, sensitive_findings, sink_evidence_by_line,
};
