//! Intermediate JSON artefacts for debugging and downstream tools.

use crate::error::Result;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use warden_core::cfg::CfgBundle;
use warden_core::decoder::Disassembly;
use warden_core::taint::TaintReport;
use warden_source::SlotBinding;

#[derive(Serialize)]
struct InstructionEntry<'a> {
    pc: usize,
    op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    imm: Option<&'a String>,
}

#[derive(Serialize)]
struct DisassemblyArtifact<'a> {
    instruction_count: usize,
    jumpdests: Vec<usize>,
    instructions: Vec<InstructionEntry<'a>>,
}

#[derive(Serialize)]
struct CfgArtifact {
    block_starts: Vec<usize>,
    dynamic_jumps: usize,
    edges: Vec<warden_core::cfg::CfgEdge>,
}

#[derive(Serialize)]
struct TaintSinkArtifact<'a> {
    block: usize,
    pc: usize,
    slot: Option<u64>,
    incomplete: bool,
    paths: &'a [warden_core::taint::TaintPath],
}

#[derive(Serialize)]
struct TaintArtifact<'a> {
    source_blocks: &'a [usize],
    sinks: Vec<TaintSinkArtifact<'a>>,
}

fn intermediate_dir(output_dir: &Path) -> Result<PathBuf> {
    let dir = output_dir.join("intermediate");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<()> {
    let path = dir.join(name);
    let file = fs::File::create(&path)?;
    serde_json::to_writer_pretty(file, value)?;
    tracing::debug!(path = %path.display(), "artefact written");
    Ok(())
}

/// Writes `intermediate/disassembly.json`.
pub fn write_disassembly(output_dir: &Path, disassembly: &Disassembly) -> Result<()> {
    let dir = intermediate_dir(output_dir)?;
    let artifact = DisassemblyArtifact {
        instruction_count: disassembly.instructions.len(),
        jumpdests: disassembly.jumpdests.iter().copied().collect(),
        instructions: disassembly
            .instructions
            .iter()
            .map(|ins| InstructionEntry {
                pc: ins.pc,
                op: ins.op.to_string(),
                imm: ins.imm.as_ref(),
            })
            .collect(),
    };
    write_json(&dir, "disassembly.json", &artifact)
}

/// Writes `intermediate/cfg_edges.json`.
pub fn write_cfg(output_dir: &Path, bundle: &CfgBundle) -> Result<()> {
    let dir = intermediate_dir(output_dir)?;
    let artifact = CfgArtifact {
        block_starts: bundle.block_starts(),
        dynamic_jumps: bundle.dynamic_jumps,
        edges: bundle.edge_list(),
    };
    write_json(&dir, "cfg_edges.json", &artifact)
}

/// Writes `intermediate/storage_map.json`.
pub fn write_storage_map(output_dir: &Path, bindings: &[SlotBinding]) -> Result<()> {
    let dir = intermediate_dir(output_dir)?;
    write_json(&dir, "storage_map.json", &bindings)
}

/// Writes `intermediate/taint_paths.json`.
pub fn write_taint(output_dir: &Path, report: &TaintReport) -> Result<()> {
    let dir = intermediate_dir(output_dir)?;
    let artifact = TaintArtifact {
        source_blocks: &report.source_blocks,
        sinks: report
            .sinks
            .iter()
            .map(|sink| TaintSinkArtifact {
                block: sink.block,
                pc: sink.pc,
                slot: sink.slot,
                incomplete: sink.incomplete,
                paths: &sink.paths,
            })
            .collect(),
    };
    write_json(&dir, "taint_paths.json", &artifact)
}

/// Writes the final report JSON and returns its path.
pub fn write_final_report(
    output_dir: &Path,
    report: &crate::report::FinalReport,
) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let path = output_dir.join("final_report.json");
    let file = fs::File::create(&path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(path)
}
