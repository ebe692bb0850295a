//! Basic-block construction over the decoded instruction stream.

use crate::decoder::{Disassembly, Instruction};
use crate::{Opcode, is_block_ending_opcode};
use std::collections::HashMap;

/// A contiguous instruction range `[start, end)`.
///
/// Blocks open at offset 0, at every JUMPDEST, and immediately after a
/// JUMP/JUMPI (the fall-through of a conditional branch is frequently not a
/// JUMPDEST in compiler output). A block ends at a control-transfer
/// instruction or immediately before the next JUMPDEST.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub start: usize,
    pub end: usize,
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    /// The instruction that ends the block, if the block is non-empty.
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    /// True when the offset falls inside this block's byte range.
    pub fn contains(&self, pc: usize) -> bool {
        pc >= self.start && pc < self.end
    }
}

/// Splits the instruction stream into ordered basic blocks, returning the
/// blocks and a map from block-start offset to index in the returned list.
///
/// Instructions that trail a terminal opcode (STOP, RETURN, REVERT, …)
/// without an intervening JUMPDEST can only be dead code or embedded data;
/// they are left out of every block.
pub fn split_blocks(disassembly: &Disassembly) -> (Vec<BasicBlock>, HashMap<usize, usize>) {
    let mut blocks: Vec<BasicBlock> = Vec::new();
    let mut current: Option<BasicBlock> = None;
    // A jump terminator leaves the next instruction reachable as
    // fall-through; a terminal opcode does not.
    let mut open_next = true;

    for ins in &disassembly.instructions {
        let is_dest = disassembly.jumpdests.contains(&ins.pc);

        if is_dest {
            if let Some(mut block) = current.take() {
                block.end = ins.pc;
                blocks.push(block);
            }
            current = Some(BasicBlock {
                start: ins.pc,
                end: ins.pc,
                instructions: vec![ins.clone()],
            });
        } else {
            match current.as_mut() {
                Some(block) => block.instructions.push(ins.clone()),
                None if open_next => {
                    current = Some(BasicBlock {
                        start: ins.pc,
                        end: ins.pc,
                        instructions: vec![ins.clone()],
                    });
                }
                None => {
                    tracing::debug!(pc = ins.pc, op = %ins.op, "skipping unreachable instruction");
                    continue;
                }
            }
        }

        if is_block_ending_opcode(ins.op) {
            let mut block = current.take().expect("block open at terminator");
            block.end = ins.pc + ins.byte_size();
            blocks.push(block);
            open_next = matches!(ins.op, Opcode::JUMP | Opcode::JUMPI);
        }
    }

    if let Some(mut block) = current.take() {
        block.end = block
            .instructions
            .last()
            .map(|ins| ins.pc + ins.byte_size())
            .unwrap_or(block.start);
        blocks.push(block);
    }

    let index: HashMap<usize, usize> = blocks
        .iter()
        .enumerate()
        .map(|(idx, block)| (block.start, idx))
        .collect();

    tracing::debug!(blocks = blocks.len(), "basic blocks built");
    (blocks, index)
}
