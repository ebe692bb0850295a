//! Bytecode-level analyses for EVM contracts: disassembly, basic blocks,
//! control-flow graph construction, reaching-taint dataflow, and guard
//! classification along taint paths.

pub mod blocks;
pub mod cfg;
pub mod decoder;
pub mod guards;
pub mod opcode;
pub mod result;
pub mod taint;

pub use opcode::Opcode;
pub use result::{Error, Result};

/// Returns true if the opcode terminates execution.
///
/// Terminal opcodes are those that end the execution of a program or
/// transaction, such as STOP, RETURN, REVERT, SELFDESTRUCT, and INVALID.
/// Unrecognised bytes behave like INVALID when executed.
#[inline]
pub fn is_terminal_opcode(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::STOP
            | Opcode::RETURN
            | Opcode::REVERT
            | Opcode::SELFDESTRUCT
            | Opcode::INVALID
            | Opcode::UNKNOWN(_)
    )
}

/// Returns true if the opcode ends a basic block.
///
/// Block-ending opcodes include terminal opcodes as well as control flow
/// opcodes like JUMP and JUMPI that transfer control to different parts of
/// the program.
#[inline]
pub fn is_block_ending_opcode(opcode: Opcode) -> bool {
    is_terminal_opcode(opcode) || matches!(opcode, Opcode::JUMP | Opcode::JUMPI)
}

/// High-level convenience function that takes raw bytecode to a CFG
/// bundle, returning the disassembly and decode metadata alongside it.
pub fn process_bytecode_to_cfg(
    bytecode: &str,
    is_file: bool,
) -> Result<(cfg::CfgBundle, decoder::Disassembly, decoder::DecodeInfo)> {
    let (disassembly, info, _bytes) = decoder::decode_bytecode(bytecode, is_file)?;
    let bundle = cfg::build_cfg(&disassembly)?;
    Ok((bundle, disassembly, info))
}
