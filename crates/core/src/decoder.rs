//! Turns raw runtime bytecode into an instruction stream.

use crate::Opcode;
use crate::result::{Error, Result};
use hex::FromHex;
use std::collections::BTreeSet;
use std::{fmt, fs, path::Path};
use tiny_keccak::{Hasher, Keccak};

/// Represents a single disassembled instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    /// the instruction's program counter (in bytes)
    pub pc: usize,
    /// Parsed opcode enum
    pub op: Opcode,
    /// any immediate data (hex string without 0x), if present
    pub imm: Option<String>,
}

impl Instruction {
    /// Returns the number of bytes this instruction occupies in bytecode.
    #[inline]
    pub fn byte_size(&self) -> usize {
        1 + self.op.immediate_size()
    }

    /// Parses the push immediate as a machine integer. Returns `None` for
    /// non-push instructions and for immediates wider than a `usize`.
    pub fn push_value(&self) -> Option<usize> {
        if !self.op.is_push() {
            return None;
        }
        if matches!(self.op, Opcode::PUSH0) {
            return Some(0);
        }
        let imm = self.imm.as_deref()?;
        // Wide constants (addresses, hashes) never name slots or targets.
        let trimmed = imm.trim_start_matches('0');
        if trimmed.len() > 16 {
            return None;
        }
        usize::from_str_radix(imm, 16).ok()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(imm) = &self.imm {
            write!(f, "{:06x}  {:<8} 0x{}", self.pc, self.op.to_string(), imm)
        } else {
            write!(f, "{:06x}  {}", self.pc, self.op)
        }
    }
}

/// Source type of the bytecode input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    HexString,
    File,
}

/// Metadata about the decoded bytecode blob.
#[derive(Debug)]
pub struct DecodeInfo {
    /// number of bytes
    pub byte_length: usize,
    /// a 32-byte Keccak-256 hash of the raw bytes
    pub keccak_hash: [u8; 32],
    /// input from the variants of SourceType
    pub source: SourceType,
}

/// The instruction stream together with the set of offsets that are legal
/// jump destinations (offsets that decoded as JUMPDEST and were not
/// absorbed as push data).
#[derive(Debug, Default)]
pub struct Disassembly {
    pub instructions: Vec<Instruction>,
    pub jumpdests: BTreeSet<usize>,
    /// Total length of the decoded byte range.
    pub code_len: usize,
}

/// Normalizes hex strings by removing whitespace, the 0x prefix, and
/// ensuring even length.
pub fn normalize_hex_string(input: &str) -> Result<String> {
    let stripped: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let clean = stripped.strip_prefix("0x").unwrap_or(&stripped);

    if let Some(bad) = clean.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(Error::HexDecode(hex::FromHexError::InvalidHexCharacter {
            c: bad,
            index: 0,
        }));
    }

    // Pad with a leading zero so the string decodes to whole bytes.
    Ok(if clean.len() % 2 == 1 {
        format!("0{clean}")
    } else {
        clean.to_string()
    })
}

/// Normalizes input into a byte vector from a hex string or file.
pub fn input_to_bytes(input: &str, is_file: bool) -> Result<Vec<u8>> {
    let raw = if is_file {
        let path = Path::new(input);
        fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            source: e,
        })?
    } else {
        input.to_string()
    };
    let normalized = normalize_hex_string(&raw)?;
    Vec::from_hex(&normalized).map_err(Error::HexDecode)
}

/// Disassembles runtime bytecode into an instruction stream.
///
/// PUSH1..PUSH32 consume the following 1..32 bytes as immediate data. An
/// immediate that runs past the end of the code terminates decoding
/// cleanly: the truncated push and everything after it are treated as an
/// unreachable tail. Unrecognised bytes are kept as opaque `UNKNOWN`
/// instructions; they end a basic block like INVALID does.
///
/// Empty input yields an empty stream, which downstream stages tolerate.
pub fn disassemble(bytes: &[u8]) -> Disassembly {
    let mut instructions = Vec::new();
    let mut jumpdests = BTreeSet::new();

    let mut pc = 0usize;
    while pc < bytes.len() {
        let op = Opcode::from_byte(bytes[pc]);
        let imm_len = op.immediate_size();

        if imm_len > 0 {
            let end = pc + 1 + imm_len;
            if end > bytes.len() {
                tracing::warn!(
                    pc,
                    imm_len,
                    remaining = bytes.len() - pc - 1,
                    "push immediate truncated by end of code; stopping decode"
                );
                break;
            }
            instructions.push(Instruction {
                pc,
                op,
                imm: Some(hex::encode(&bytes[pc + 1..end])),
            });
            pc = end;
            continue;
        }

        if matches!(op, Opcode::JUMPDEST) {
            jumpdests.insert(pc);
        }
        instructions.push(Instruction { pc, op, imm: None });
        pc += 1;
    }

    tracing::debug!(
        instructions = instructions.len(),
        jumpdests = jumpdests.len(),
        "disassembly complete"
    );

    Disassembly {
        instructions,
        jumpdests,
        code_len: bytes.len(),
    }
}

/// Decodes bytecode from a hex string or file into an instruction stream
/// with provenance metadata and the raw bytes.
pub fn decode_bytecode(input: &str, is_file: bool) -> Result<(Disassembly, DecodeInfo, Vec<u8>)> {
    let bytes = input_to_bytes(input, is_file)?;

    let mut keccak = Keccak::v256();
    keccak.update(&bytes);
    let mut hash = [0u8; 32];
    keccak.finalize(&mut hash);

    let disassembly = disassemble(&bytes);
    let info = DecodeInfo {
        byte_length: bytes.len(),
        keccak_hash: hash,
        source: if is_file {
            SourceType::File
        } else {
            SourceType::HexString
        },
    };
    Ok((disassembly, info, bytes))
}
