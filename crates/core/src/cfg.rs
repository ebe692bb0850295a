//! Control-flow graph construction.
//!
//! Jump targets on the EVM are stack-computed, so edges are recovered in
//! two tiers: a backward scan for the PUSH immediate that feeds each
//! JUMP/JUMPI, and a conservative fallback that connects an unresolved jump
//! to every valid JUMPDEST in the program. Conditional jumps always get
//! both the taken edge and the fall-through edge; dropping the taken branch
//! is what makes an analysis blind to guard code.

use crate::blocks::{BasicBlock, split_blocks};
use crate::decoder::Disassembly;
use crate::result::{Error, Result};
use crate::{Opcode, is_terminal_opcode};
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// How many instructions before a JUMP/JUMPI are searched for the PUSH
/// that supplies the target.
const JUMP_SCAN_WINDOW: usize = 10;

/// CFG node representation.
#[derive(Debug, Clone)]
pub enum Block {
    Entry,
    Exit,
    Body(BasicBlock),
}

/// Edge classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeType {
    Fallthrough,
    Jump,
    BranchTrue,
    BranchFalse,
    /// Over-approximation edge added when a jump target could not be
    /// resolved statically.
    Dynamic,
}

/// A serializable view of one CFG edge, keyed by block-start offsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfgEdge {
    pub from: usize,
    pub to: usize,
    pub kind: EdgeType,
}

/// The CFG together with its lookup tables.
#[derive(Debug)]
pub struct CfgBundle {
    pub cfg: StableDiGraph<Block, EdgeType>,
    pub pc_to_block: HashMap<usize, NodeIndex>,
    pub jumpdests: BTreeSet<usize>,
    /// Count of jumps that fell back to the all-JUMPDESTs approximation.
    pub dynamic_jumps: usize,
}

enum JumpResolution {
    /// A PUSH immediate was found before any stack-mutating instruction.
    Static(Option<usize>),
    /// No immediate could be recovered; the target is dynamic.
    Unresolved,
}

impl CfgBundle {
    /// Returns the body block stored at `node`, if it is one.
    pub fn body(&self, node: NodeIndex) -> Option<&BasicBlock> {
        match self.cfg.node_weight(node)? {
            Block::Body(body) => Some(body),
            _ => None,
        }
    }

    /// Looks up a body block by its start offset.
    pub fn block_at(&self, start: usize) -> Option<&BasicBlock> {
        self.pc_to_block.get(&start).and_then(|node| self.body(*node))
    }

    /// Body block starts in ascending offset order.
    pub fn block_starts(&self) -> Vec<usize> {
        let mut starts: Vec<usize> = self.pc_to_block.keys().copied().collect();
        starts.sort_unstable();
        starts
    }

    /// Successor block starts of the block at `start`, ascending and
    /// deduplicated. Sentinel nodes are not successors.
    pub fn successor_starts(&self, start: usize) -> Vec<usize> {
        let Some(node) = self.pc_to_block.get(&start) else {
            return Vec::new();
        };
        let mut out: BTreeSet<usize> = BTreeSet::new();
        for edge in self.cfg.edges(*node) {
            if let Some(body) = self.body(edge.target()) {
                out.insert(body.start);
            }
        }
        out.into_iter().collect()
    }

    /// Successors of a block paired with the edge kind that reaches them,
    /// ascending by target start.
    pub fn successor_edges(&self, start: usize) -> Vec<(usize, EdgeType)> {
        let Some(node) = self.pc_to_block.get(&start) else {
            return Vec::new();
        };
        let mut out: Vec<(usize, EdgeType)> = self
            .cfg
            .edges(*node)
            .filter_map(|edge| self.body(edge.target()).map(|body| (body.start, *edge.weight())))
            .collect();
        out.sort_unstable_by_key(|(target, _)| *target);
        out
    }

    /// All body-to-body edges sorted by (from, to), for artefact output.
    pub fn edge_list(&self) -> Vec<CfgEdge> {
        let mut edges: Vec<CfgEdge> = self
            .cfg
            .edge_references()
            .filter_map(|edge| {
                let from = self.body(edge.source())?.start;
                let to = self.body(edge.target())?.start;
                Some(CfgEdge {
                    from,
                    to,
                    kind: *edge.weight(),
                })
            })
            .collect();
        edges.sort_unstable_by_key(|edge| (edge.from, edge.to));
        edges
    }
}

/// Builds the CFG from a disassembled instruction stream.
pub fn build_cfg(disassembly: &Disassembly) -> Result<CfgBundle> {
    let (blocks, _) = split_blocks(disassembly);
    validate_block_starts(&blocks, &disassembly.jumpdests)?;

    let mut cfg = StableDiGraph::new();
    let entry = cfg.add_node(Block::Entry);
    let exit = cfg.add_node(Block::Exit);

    let mut pc_to_block = HashMap::new();
    let mut ordered: Vec<(NodeIndex, usize)> = Vec::new();
    for block in &blocks {
        let start = block.start;
        let node = cfg.add_node(Block::Body(block.clone()));
        pc_to_block.insert(start, node);
        ordered.push((node, start));
    }

    match ordered.first() {
        Some((first, _)) => {
            cfg.add_edge(entry, *first, EdgeType::Fallthrough);
        }
        None => {
            cfg.add_edge(entry, exit, EdgeType::Fallthrough);
        }
    }

    let dest_nodes: Vec<(usize, NodeIndex)> = disassembly
        .jumpdests
        .iter()
        .filter_map(|dest| pc_to_block.get(dest).map(|node| (*dest, *node)))
        .collect();

    let mut dynamic_jumps = 0usize;

    for (idx, block) in blocks.iter().enumerate() {
        let node = ordered[idx].0;
        let next = ordered.get(idx + 1).map(|(n, _)| *n);
        let Some(term) = block.terminator() else {
            continue;
        };

        match term.op {
            op if is_terminal_opcode(op) => {
                cfg.add_edge(node, exit, EdgeType::Fallthrough);
            }
            Opcode::JUMP => match resolve_jump_target(block) {
                JumpResolution::Static(target) => {
                    if !connect_static(&mut cfg, &pc_to_block, &disassembly.jumpdests, node, target, EdgeType::Jump) {
                        tracing::debug!(
                            block = format_args!("0x{:x}", block.start),
                            "jump target is not a valid JUMPDEST; no edge added"
                        );
                    }
                }
                JumpResolution::Unresolved => {
                    dynamic_jumps += 1;
                    connect_dynamic(&mut cfg, node, &dest_nodes, block.start);
                }
            },
            Opcode::JUMPI => {
                match resolve_jump_target(block) {
                    JumpResolution::Static(target) => {
                        if !connect_static(&mut cfg, &pc_to_block, &disassembly.jumpdests, node, target, EdgeType::BranchTrue) {
                            tracing::debug!(
                                block = format_args!("0x{:x}", block.start),
                                "branch target is not a valid JUMPDEST; taken edge dropped"
                            );
                        }
                    }
                    JumpResolution::Unresolved => {
                        dynamic_jumps += 1;
                        connect_dynamic(&mut cfg, node, &dest_nodes, block.start);
                    }
                }
                // The fall-through edge is unconditional: the guard may fail.
                match next {
                    Some(next_node) => {
                        cfg.add_edge(node, next_node, EdgeType::BranchFalse);
                    }
                    None => {
                        cfg.add_edge(node, exit, EdgeType::BranchFalse);
                    }
                }
            }
            // Block cut short by a following JUMPDEST.
            _ => match next {
                Some(next_node) => {
                    cfg.add_edge(node, next_node, EdgeType::Fallthrough);
                }
                None => {
                    cfg.add_edge(node, exit, EdgeType::Fallthrough);
                }
            },
        }
    }

    tracing::debug!(
        blocks = blocks.len(),
        edges = cfg.edge_count(),
        dynamic_jumps,
        "cfg built"
    );

    Ok(CfgBundle {
        cfg,
        pc_to_block,
        jumpdests: disassembly.jumpdests.clone(),
        dynamic_jumps,
    })
}

/// Ensures every discovered JUMPDEST opens a block.
fn validate_block_starts(blocks: &[BasicBlock], jumpdests: &BTreeSet<usize>) -> Result<()> {
    let starts: BTreeSet<usize> = blocks.iter().map(|block| block.start).collect();
    let orphaned: Vec<usize> = jumpdests.difference(&starts).copied().collect();
    if !orphaned.is_empty() {
        return Err(Error::InvalidBlockStructure(format!(
            "JUMPDESTs not aligned with block starts: {orphaned:?}"
        )));
    }
    Ok(())
}

/// Scans backwards from the block terminator for the PUSH that supplies
/// the jump target. The scan gives up once it crosses an instruction that
/// reshapes the value (arithmetic, a load, or another jump), or after
/// [`JUMP_SCAN_WINDOW`] instructions.
fn resolve_jump_target(block: &BasicBlock) -> JumpResolution {
    let len = block.instructions.len();
    if len < 2 {
        return JumpResolution::Unresolved;
    }

    for ins in block.instructions[..len - 1]
        .iter()
        .rev()
        .take(JUMP_SCAN_WINDOW)
    {
        if ins.op.is_push() {
            return JumpResolution::Static(ins.push_value());
        }
        if matches!(
            ins.op,
            Opcode::ADD
                | Opcode::SUB
                | Opcode::MUL
                | Opcode::DIV
                | Opcode::MOD
                | Opcode::MLOAD
                | Opcode::SLOAD
                | Opcode::JUMP
        ) {
            return JumpResolution::Unresolved;
        }
    }
    JumpResolution::Unresolved
}

/// Adds the edge for a statically resolved target when it lands on a valid
/// JUMPDEST. Returns false when the target had to be dropped.
fn connect_static(
    cfg: &mut StableDiGraph<Block, EdgeType>,
    pc_to_block: &HashMap<usize, NodeIndex>,
    jumpdests: &BTreeSet<usize>,
    source: NodeIndex,
    target: Option<usize>,
    kind: EdgeType,
) -> bool {
    let Some(target) = target else {
        return false;
    };
    if !jumpdests.contains(&target) {
        return false;
    }
    match pc_to_block.get(&target) {
        Some(node) => {
            cfg.add_edge(source, *node, kind);
            true
        }
        None => false,
    }
}

/// Connects an unresolved jump to every valid JUMPDEST.
fn connect_dynamic(
    cfg: &mut StableDiGraph<Block, EdgeType>,
    source: NodeIndex,
    dest_nodes: &[(usize, NodeIndex)],
    block_start: usize,
) {
    tracing::warn!(
        block = format_args!("0x{block_start:x}"),
        targets = dest_nodes.len(),
        "dynamic jump target; over-approximating with all JUMPDESTs"
    );
    for (_, node) in dest_nodes {
        cfg.add_edge(source, *node, EdgeType::Dynamic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::disassemble;

    fn cfg_for(bytes: &[u8]) -> CfgBundle {
        build_cfg(&disassemble(bytes)).expect("cfg should build")
    }

    #[test]
    fn static_jump_produces_single_edge() {
        // PUSH1 0x04; JUMP | STOP | JUMPDEST; STOP
        let bundle = cfg_for(&[0x60, 0x04, 0x56, 0x00, 0x5b, 0x00]);
        assert_eq!(bundle.successor_starts(0), vec![4]);
        assert_eq!(bundle.dynamic_jumps, 0);
    }

    #[test]
    fn jumpi_gets_both_branches() {
        // PUSH1 1; PUSH1 0x06; JUMPI | STOP | JUMPDEST; STOP
        let bundle = cfg_for(&[0x60, 0x01, 0x60, 0x06, 0x57, 0x00, 0x5b, 0x00]);
        assert_eq!(bundle.successor_starts(0), vec![5, 6]);
    }

    #[test]
    fn terminal_blocks_have_no_successors() {
        let bundle = cfg_for(&[0x60, 0x00, 0x60, 0x00, 0xfd]);
        assert!(bundle.successor_starts(0).is_empty());
    }

    #[test]
    fn dynamic_jump_fans_out_to_every_jumpdest() {
        // MLOAD feeds the JUMP: PUSH1 0; MLOAD; JUMP; JUMPDEST; STOP; JUMPDEST; STOP
        let bundle = cfg_for(&[0x60, 0x00, 0x51, 0x56, 0x5b, 0x00, 0x5b, 0x00]);
        assert_eq!(bundle.successor_starts(0), vec![4, 6]);
        assert_eq!(bundle.dynamic_jumps, 1);
    }

    #[test]
    fn invalid_static_target_drops_the_edge_without_fallback() {
        // PUSH1 0x03 jumps into the middle of nowhere (offset 3 is STOP,
        // not a JUMPDEST).
        let bundle = cfg_for(&[0x60, 0x03, 0x56, 0x00, 0x5b, 0x00]);
        assert!(bundle.successor_starts(0).is_empty());
        assert_eq!(bundle.dynamic_jumps, 0);
    }

    #[test]
    fn edge_list_is_sorted_and_typed() {
        let bundle = cfg_for(&[0x60, 0x01, 0x60, 0x06, 0x57, 0x00, 0x5b, 0x00]);
        let edges = bundle.edge_list();
        assert!(edges.windows(2).all(|w| (w[0].from, w[0].to) <= (w[1].from, w[1].to)));
        assert!(edges.iter().any(|e| e.kind == EdgeType::BranchTrue));
        assert!(edges.iter().any(|e| e.kind == EdgeType::BranchFalse));
    }
}
