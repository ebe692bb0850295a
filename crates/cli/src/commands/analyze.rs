//! The full pipeline: compile, disassemble, build the CFG, trace taint,
//! classify guards, join with the source view, and write the report.

use crate::commands::CliError;
use crate::solc::SolcDriver;
use clap::Args;
use std::collections::BTreeSet;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use warden_analysis::{artifacts, build_report, failed_compilation_report};
use warden_core::cfg::build_cfg;
use warden_core::decoder::decode_bytecode;
use warden_core::taint::{TaintConfig, run_taint};
use warden_source::{LineIndex, SourceUnit, find_usages, parse_srcmap, resolve_slots};

/// Arguments for the `analyze` subcommand.
#[derive(Args)]
pub struct AnalyzeArgs {
    /// Path to the Solidity source file.
    #[arg(long)]
    pub contract: PathBuf,
    /// Comma-separated key state variables to audit (e.g. owner,totalSupply).
    #[arg(long = "key-vars", value_delimiter = ',', required = true)]
    pub key_vars: Vec<String>,
    /// Compiler version to build with (e.g. 0.4.25).
    #[arg(long = "solc-version")]
    pub solc_version: String,
    /// Directory for the report and intermediate artefacts.
    #[arg(long = "output-dir", default_value = "./output")]
    pub output_dir: PathBuf,
}

impl super::Command for AnalyzeArgs {
    fn execute(self) -> Result<(), Box<dyn Error>> {
        let key_vars: Vec<String> = self
            .key_vars
            .iter()
            .map(|raw| raw.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        if key_vars.is_empty() {
            return Err(CliError::InvalidInput("empty key-variable list".into()).into());
        }
        let source_text = fs::read_to_string(&self.contract).map_err(|e| {
            CliError::InvalidInput(format!(
                "cannot read contract {}: {e}",
                self.contract.display()
            ))
        })?;

        let unit = SourceUnit::parse(&source_text);
        let Some(primary_contract) = primary_contract(&unit) else {
            return Err(CliError::InvalidInput("no contract declaration in source".into()).into());
        };
        println!("analyzing {} ({})", self.contract.display(), primary_contract);

        // Compile. A failing compiler still leaves a marked report behind.
        let driver = SolcDriver::new(&self.solc_version, &source_text);
        let contract_path = self.contract.display().to_string();
        let compiled = driver.compile(&self.contract, &self.output_dir, &primary_contract);
        let artifacts_bundle = match compiled {
            Ok(bundle) if !bundle.runtime_bytecode.trim().is_empty() => bundle,
            Ok(_) => {
                let report = failed_compilation_report(&contract_path, &key_vars);
                artifacts::write_final_report(&self.output_dir, &report)?;
                return Err(
                    CliError::CompilationFailed("no runtime bytecode produced".into()).into(),
                );
            }
            Err(err) => {
                let report = failed_compilation_report(&contract_path, &key_vars);
                artifacts::write_final_report(&self.output_dir, &report)?;
                return Err(CliError::CompilationFailed(err.to_string()).into());
            }
        };

        // Bytecode side.
        let (disassembly, _info, _bytes) =
            decode_bytecode(&artifacts_bundle.runtime_bytecode, false)?;
        let bundle = build_cfg(&disassembly)?;
        println!(
            "  {} instructions, {} blocks, {} dynamic jumps",
            disassembly.instructions.len(),
            bundle.block_starts().len(),
            bundle.dynamic_jumps
        );

        // Source side.
        let bindings = resolve_slots(&unit, &key_vars);
        for binding in &bindings {
            match binding.slot {
                Some(slot) => println!("  {} -> slot {}", binding.name, slot),
                None => println!("  {} -> slot unknown", binding.name),
            }
        }
        artifacts::write_storage_map(&self.output_dir, &bindings)?;
        let srcmap = match parse_srcmap(&artifacts_bundle.srcmap_runtime) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(%err, "source map unusable; continuing without line mapping");
                Vec::new()
            }
        };
        let line_index = LineIndex::new(&source_text);

        // Taint.
        let key_slots: BTreeSet<u64> = bindings.iter().filter_map(|b| b.slot).collect();
        let include_unknown = bindings.iter().any(|b| b.slot.is_none());
        let taint = run_taint(&bundle, &key_slots, include_unknown, &TaintConfig::default());
        println!(
            "  {} taint sources, {} tainted key-slot writes",
            taint.source_blocks.len(),
            taint.sinks.len()
        );

        // Verdicts.
        let mut per_variable = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let usages = find_usages(&unit, &binding.name);
            let sinks = warden_analysis::sink_evidence_by_line(
                &bundle,
                &taint,
                &binding,
                &disassembly,
                &srcmap,
                &line_index,
            );
            let findings = warden_analysis::evaluate_variable(
                &unit,
                &binding.name,
                &usages,
                &sinks,
                &artifacts_bundle.selectors,
            );
            per_variable.push((binding, findings));
        }
        let sensitive =
            warden_analysis::sensitive_findings(&unit, &disassembly, &srcmap, Some(&line_index));

        let report = build_report(&contract_path, per_variable, sensitive, bundle.dynamic_jumps);

        // Artefacts.
        artifacts::write_disassembly(&self.output_dir, &disassembly)?;
        artifacts::write_cfg(&self.output_dir, &bundle)?;
        artifacts::write_taint(&self.output_dir, &taint)?;
        let report_path = artifacts::write_final_report(&self.output_dir, &report)?;

        println!(
            "done: {} variable(s), {} vulnerable, {} sensitive operation(s)",
            report.summary.total_variables,
            report.summary.vulnerable_variables,
            report.summary.sensitive_operation_count
        );
        for result in &report.results {
            let status = if result.has_vulnerability { "AT RISK" } else { "ok" };
            println!(
                "  {:<24} {} ({} dangerous, {} suspicious)",
                result.variable,
                status,
                result.dangerous_paths_count,
                result.suspicious_paths_count
            );
        }
        println!("report written to {}", report_path.display());
        Ok(())
    }
}

/// The contract the user is analysing: the most-derived declaration in the
/// file, with file order as the tie-break.
fn primary_contract(unit: &SourceUnit) -> Option<String> {
    let parents: Vec<&str> = unit
        .contracts
        .iter()
        .flat_map(|contract| contract.parents.iter().map(|p| p.as_str()))
        .collect();
    unit.contracts
        .iter()
        .filter(|contract| !parents.contains(&contract.name.as_str()))
        .next_back()
        .or_else(|| unit.contracts.last())
        .map(|contract| contract.name.clone())
}
