//! This module processes input bytecode, constructs a CFG, and generates a
//! Graphviz .dot file representing it. The output can be written to a file
//! or printed to stdout.

use clap::Args;
use std::error::Error;
use std::fs;
use std::path::Path;
use warden_core::cfg::{Block, CfgBundle, EdgeType, build_cfg};
use warden_core::decoder::decode_bytecode;

/// Arguments for the `cfg` subcommand.
#[derive(Args)]
pub struct CfgArgs {
    /// Input bytecode as a hex string (0x...) or file path containing hex.
    pub input: String,
    /// Output file for Graphviz .dot (default: stdout)
    #[arg(short, long)]
    output: Option<String>,
}

impl super::Command for CfgArgs {
    fn execute(self) -> Result<(), Box<dyn Error>> {
        let is_file = !self.input.starts_with("0x") && Path::new(&self.input).is_file();
        let (disassembly, _, _) = decode_bytecode(&self.input, is_file)?;
        let bundle = build_cfg(&disassembly)?;

        let dot = generate_dot(&bundle);
        if let Some(out_path) = self.output {
            fs::write(out_path, &dot)?;
        } else {
            println!("{dot}");
        }
        Ok(())
    }
}

/// Generates a Graphviz .dot representation of the CFG.
fn generate_dot(bundle: &CfgBundle) -> String {
    let mut dot = String::from("digraph CFG {\n");

    for node in bundle.cfg.node_indices() {
        let label = match &bundle.cfg[node] {
            Block::Entry => "Entry".to_string(),
            Block::Exit => "Exit".to_string(),
            Block::Body(body) => {
                let instrs: Vec<String> =
                    body.instructions.iter().map(|ins| ins.to_string()).collect();
                format!("Block_{:x}\\n{}", body.start, instrs.join("\\n"))
            }
        };
        dot.push_str(&format!("    {} [label=\"{}\"];\n", node.index(), label));
    }

    for edge in bundle.cfg.edge_indices() {
        let (src, dst) = bundle.cfg.edge_endpoints(edge).expect("edge endpoints");
        let label = match bundle.cfg[edge] {
            EdgeType::Fallthrough => "Fallthrough",
            EdgeType::Jump => "Jump",
            EdgeType::BranchTrue => "BranchTrue",
            EdgeType::BranchFalse => "BranchFalse",
            EdgeType::Dynamic => "Dynamic",
        };
        dot.push_str(&format!(
            "    {} -> {} [label=\"{}\"];\n",
            src.index(),
            dst.index(),
            label
        ));
    }

    dot.push_str("}\n");
    dot
}
