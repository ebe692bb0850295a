//! Decode bytecode to an annotated instruction listing.

use clap::Args;
use std::error::Error;
use std::fs;
use std::path::Path;
use warden_core::decoder::decode_bytecode;

/// Arguments for the `disasm` subcommand.
#[derive(Args)]
pub struct DisasmArgs {
    /// Input bytecode as a hex string (0x...) or file path containing hex.
    pub input: String,
    /// Output file for the listing (default: stdout).
    #[arg(short, long)]
    output: Option<String>,
}

impl super::Command for DisasmArgs {
    fn execute(self) -> Result<(), Box<dyn Error>> {
        let is_file = !self.input.starts_with("0x") && Path::new(&self.input).is_file();
        let (disassembly, info, _bytes) = decode_bytecode(&self.input, is_file)?;

        let mut listing = String::new();
        listing.push_str(&format!(
            "; {} bytes, keccak 0x{}\n",
            info.byte_length,
            hex::encode(info.keccak_hash)
        ));
        for ins in &disassembly.instructions {
            listing.push_str(&ins.to_string());
            listing.push('\n');
        }

        if let Some(out_path) = self.output {
            fs::write(out_path, &listing)?;
        } else {
            print!("{listing}");
        }
        Ok(())
    }
}
