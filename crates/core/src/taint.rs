//! Reaching-taint dataflow from untrusted transaction inputs to storage
//! writes.
//!
//! The abstract state per block is deliberately small: one taint bit per
//! stack word (counted from the top, up to [`STACK_TAINT_DEPTH`]), a single
//! coarse bit for the whole of memory, and the set of storage slots known
//! to hold tainted data. States merge by pointwise union, so the fixpoint
//! over-approximates: the engine is biased toward reporting taint rather
//! than missing it. Paths are enumerated after the fixpoint so the guard
//! classifier can report per-path evidence instead of join-point mush.

use crate::Opcode;
use crate::blocks::BasicBlock;
use crate::cfg::CfgBundle;
use crate::decoder::Instruction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

/// Stack depth covered by the taint mask. Deeper words lose their bit,
/// which real contracts do not get near.
pub const STACK_TAINT_DEPTH: usize = 64;

/// How many instructions before an SLOAD/SSTORE are searched for the PUSH
/// that supplies the slot operand.
const SLOT_SCAN_WINDOW: usize = 8;

/// Safety budget for path enumeration; branchy CFGs can queue far more
/// partial paths than ever reach a sink.
const PATH_EXPANSION_BUDGET: usize = 50_000;

/// Hard bounds on path enumeration.
#[derive(Debug, Clone, Copy)]
pub struct TaintConfig {
    /// Maximum number of blocks on a recorded path.
    pub max_path_blocks: usize,
    /// Maximum times a single block may repeat on one path (allows one
    /// loop iteration).
    pub max_block_visits: usize,
    /// Maximum recorded paths per sink before it is marked incomplete.
    pub max_paths_per_sink: usize,
}

impl Default for TaintConfig {
    fn default() -> Self {
        Self {
            max_path_blocks: 50,
            max_block_visits: 2,
            max_paths_per_sink: 256,
        }
    }
}

/// Per-block abstract taint state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaintState {
    /// Bit `i` is the taint of the stack word `i` positions below the top.
    stack: u64,
    /// Coarse taint bit for all of memory.
    memory: bool,
    /// Storage slots currently holding tainted data.
    storage: BTreeSet<u64>,
}

impl TaintState {
    fn push(&mut self, tainted: bool) {
        self.stack = (self.stack << 1) | u64::from(tainted);
    }

    fn pop(&mut self) -> bool {
        let tainted = self.stack & 1 != 0;
        self.stack >>= 1;
        tainted
    }

    fn peek(&self, depth: usize) -> bool {
        depth < STACK_TAINT_DEPTH && (self.stack >> depth) & 1 != 0
    }

    fn dup(&mut self, n: u8) {
        let tainted = self.peek(n as usize - 1);
        self.push(tainted);
    }

    fn swap(&mut self, n: u8) {
        let top = self.peek(0);
        let deep = self.peek(n as usize);
        if top != deep {
            self.stack ^= 1 | (1u64 << n);
        }
    }

    /// Pointwise union. Returns true when `self` changed.
    fn merge(&mut self, other: &TaintState) -> bool {
        let before = (self.stack, self.memory, self.storage.len());
        self.stack |= other.stack;
        self.memory |= other.memory;
        self.storage.extend(other.storage.iter().copied());
        before != (self.stack, self.memory, self.storage.len())
    }
}

/// One enumerated source-to-sink path, as block-start offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintPath {
    pub blocks: Vec<usize>,
}

/// A storage write of a tainted value into a watched slot.
#[derive(Debug, Clone, Serialize)]
pub struct TaintSink {
    /// Start offset of the block containing the write.
    pub block: usize,
    /// Offset of the SSTORE itself.
    pub pc: usize,
    /// Statically recovered slot operand; `None` when the slot is
    /// stack-computed (mapping/array element or unresolved).
    pub slot: Option<u64>,
    /// Source-to-sink paths feeding this write.
    pub paths: Vec<TaintPath>,
    /// True when a hard bound cut enumeration short.
    pub incomplete: bool,
}

/// Full result of the taint phase.
#[derive(Debug, Default)]
pub struct TaintReport {
    /// Blocks containing at least one taint-source instruction, ascending.
    pub source_blocks: Vec<usize>,
    /// Watched-slot writes of tainted values, ascending by (block, pc).
    pub sinks: Vec<TaintSink>,
}

/// Runs the dataflow and path enumeration.
///
/// `key_slots` are the storage slots bound to key variables;
/// `include_unknown_slots` additionally treats writes with unresolvable
/// slot operands as sinks (used when a key variable's own slot is
/// unknown, trading specificity for coverage).
pub fn run_taint(
    bundle: &CfgBundle,
    key_slots: &BTreeSet<u64>,
    include_unknown_slots: bool,
    config: &TaintConfig,
) -> TaintReport {
    let starts = bundle.block_starts();
    if starts.is_empty() {
        return TaintReport::default();
    }

    // Fixpoint over in-states, pointwise union at joins.
    let mut in_states: BTreeMap<usize, TaintState> = starts
        .iter()
        .map(|start| (*start, TaintState::default()))
        .collect();
    let mut queue: VecDeque<usize> = starts.iter().copied().collect();
    let mut queued: HashSet<usize> = starts.iter().copied().collect();
    let mut passes = 0usize;

    while let Some(start) = queue.pop_front() {
        queued.remove(&start);
        passes += 1;
        let Some(block) = bundle.block_at(start) else {
            continue;
        };
        let mut state = in_states[&start].clone();
        execute_block(&mut state, block, &mut |_, _, _| {});

        for succ in bundle.successor_starts(start) {
            let entry = in_states.entry(succ).or_default();
            if entry.merge(&state) && queued.insert(succ) {
                queue.push_back(succ);
            }
        }
    }
    tracing::debug!(passes, blocks = starts.len(), "taint fixpoint reached");

    // Collection pass over the stable states.
    let mut sinks: Vec<TaintSink> = Vec::new();
    for start in &starts {
        let Some(block) = bundle.block_at(*start) else {
            continue;
        };
        let mut state = in_states[start].clone();
        execute_block(&mut state, block, &mut |ins, slot, value_tainted| {
            if !value_tainted {
                return;
            }
            let watched = match slot {
                Some(slot) => key_slots.contains(&slot),
                None => include_unknown_slots,
            };
            if watched {
                sinks.push(TaintSink {
                    block: *start,
                    pc: ins.pc,
                    slot,
                    paths: Vec::new(),
                    incomplete: false,
                });
            }
        });
    }

    let source_blocks: Vec<usize> = starts
        .iter()
        .copied()
        .filter(|start| {
            bundle
                .block_at(*start)
                .is_some_and(|block| block.instructions.iter().any(|ins| ins.op.is_taint_source()))
        })
        .collect();

    for sink in &mut sinks {
        enumerate_paths(bundle, &source_blocks, sink, config);
    }

    tracing::debug!(
        sources = source_blocks.len(),
        sinks = sinks.len(),
        "taint analysis complete"
    );
    TaintReport {
        source_blocks,
        sinks,
    }
}

/// Applies the transfer function of every instruction in `block`,
/// reporting each SSTORE as `(instruction, static slot, value tainted)`.
fn execute_block<F>(state: &mut TaintState, block: &BasicBlock, on_sstore: &mut F)
where
    F: FnMut(&Instruction, Option<u64>, bool),
{
    for (idx, ins) in block.instructions.iter().enumerate() {
        match ins.op {
            Opcode::PUSH0 | Opcode::PUSH(_) => state.push(false),
            Opcode::DUP(n) => state.dup(n),
            Opcode::SWAP(n) => state.swap(n),
            Opcode::POP => {
                state.pop();
            }
            Opcode::CALLDATALOAD => {
                state.pop();
                state.push(true);
            }
            Opcode::CALLVALUE
            | Opcode::CALLER
            | Opcode::ORIGIN
            | Opcode::CALLDATASIZE
            | Opcode::GASPRICE => state.push(true),
            Opcode::CALLDATACOPY => {
                for _ in 0..3 {
                    state.pop();
                }
                state.memory = true;
            }
            Opcode::MLOAD => {
                state.pop();
                state.push(state.memory);
            }
            Opcode::MSTORE | Opcode::MSTORE8 => {
                state.pop(); // offset
                if state.pop() {
                    state.memory = true;
                }
            }
            Opcode::SHA3 => {
                let a = state.pop();
                let b = state.pop();
                state.push(a || b || state.memory);
            }
            Opcode::SLOAD => {
                let slot = static_slot_operand(block, idx);
                state.pop();
                let tainted = match slot {
                    Some(slot) => state.storage.contains(&slot),
                    None => !state.storage.is_empty(),
                };
                state.push(tainted);
            }
            Opcode::SSTORE => {
                let slot = static_slot_operand(block, idx);
                state.pop(); // slot operand
                let value_tainted = state.pop();
                if value_tainted && let Some(slot) = slot {
                    state.storage.insert(slot);
                }
                on_sstore(ins, slot, value_tainted);
            }
            op if op.is_call() => {
                let (pops, _) = op.stack_arity();
                for _ in 0..pops {
                    state.pop();
                }
                // Return data comes from outside this contract.
                state.push(true);
            }
            op => {
                let (pops, pushes) = op.stack_arity();
                let mut tainted = false;
                for _ in 0..pops {
                    tainted |= state.pop();
                }
                for _ in 0..pushes {
                    state.push(tainted);
                }
            }
        }
    }
}

/// Recovers the constant slot operand of the storage instruction at
/// `idx`, scanning backwards over stack-neutral shuffles for the PUSH
/// that supplied it. Mapping and array accesses hash their keys first, so
/// the scan stops at anything that reshapes the value.
fn static_slot_operand(block: &BasicBlock, idx: usize) -> Option<u64> {
    for back in 1..=SLOT_SCAN_WINDOW {
        let Some(prev) = idx.checked_sub(back) else {
            break;
        };
        let ins = &block.instructions[prev];
        if ins.op.is_push() {
            return ins.push_value().map(|value| value as u64);
        }
        if matches!(ins.op, Opcode::DUP(_) | Opcode::SWAP(_)) {
            continue;
        }
        break;
    }
    None
}

/// Breadth-first path enumeration from every source block to one sink.
fn enumerate_paths(
    bundle: &CfgBundle,
    source_blocks: &[usize],
    sink: &mut TaintSink,
    config: &TaintConfig,
) {
    let mut queue: VecDeque<Vec<usize>> = source_blocks.iter().map(|src| vec![*src]).collect();
    let mut budget = PATH_EXPANSION_BUDGET;

    while let Some(path) = queue.pop_front() {
        if budget == 0 {
            tracing::warn!(
                sink = format_args!("0x{:x}", sink.pc),
                "path expansion budget exhausted; sink marked incomplete"
            );
            sink.incomplete = true;
            break;
        }
        budget -= 1;

        let current = *path.last().expect("paths are never empty");
        if current == sink.block {
            sink.paths.push(TaintPath { blocks: path });
            if sink.paths.len() >= config.max_paths_per_sink {
                sink.incomplete = true;
                break;
            }
            continue;
        }
        if path.len() >= config.max_path_blocks {
            continue;
        }
        for succ in bundle.successor_starts(current) {
            let visits = path.iter().filter(|block| **block == succ).count();
            if visits >= config.max_block_visits {
                continue;
            }
            let mut extended = path.clone();
            extended.push(succ);
            queue.push_back(extended);
        }
    }
}
