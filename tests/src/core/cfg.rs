//! Structural invariants of the CFG builder over multi-block fixtures.

use warden_core::Opcode;
use warden_core::cfg::{CfgBundle, build_cfg};
use warden_core::decoder::disassemble;

/// CALLER; PUSH1 0; SLOAD; EQ; PUSH1 0x0d; JUMPI | PUSH1 0; PUSH1 0;
/// REVERT | JUMPDEST; PUSH1 0; CALLDATALOAD; PUSH1 0; SSTORE; STOP
const GUARDED_SETTER: &str = "3360005414600d5760006000fd5b60003560005500";

/// PUSH1 0; MLOAD; JUMP | JUMPDEST; STOP | JUMPDEST; PUSH1 0;
/// CALLDATALOAD; PUSH1 1; SSTORE; STOP. The JUMP target is loaded from
/// memory, forcing the dynamic fallback.
const DYNAMIC_JUMP: &str = "600051565b005b60003560015500";

fn bundle_for(hex_code: &str) -> CfgBundle {
    let bytes = hex::decode(hex_code).expect("valid fixture hex");
    build_cfg(&disassemble(&bytes)).expect("cfg builds")
}

fn fixtures() -> Vec<CfgBundle> {
    vec![bundle_for(GUARDED_SETTER), bundle_for(DYNAMIC_JUMP)]
}

#[test]
fn every_edge_targets_a_block_start() {
    for bundle in fixtures() {
        let starts = bundle.block_starts();
        for start in &starts {
            for succ in bundle.successor_starts(*start) {
                assert!(
                    starts.contains(&succ),
                    "edge 0x{start:x} -> 0x{succ:x} targets a non-block offset"
                );
            }
        }
    }
}

#[test]
fn terminal_blocks_have_empty_successor_sets() {
    for bundle in fixtures() {
        for start in bundle.block_starts() {
            let block = bundle.block_at(start).expect("block exists");
            let terminal = block.terminator().is_some_and(|term| {
                matches!(
                    term.op,
                    Opcode::STOP
                        | Opcode::RETURN
                        | Opcode::REVERT
                        | Opcode::SELFDESTRUCT
                        | Opcode::INVALID
                )
            });
            if terminal {
                assert!(
                    bundle.successor_starts(start).is_empty(),
                    "terminal block 0x{start:x} has successors"
                );
            }
        }
    }
}

#[test]
fn jumpi_blocks_have_both_branches_when_both_resolve() {
    let bundle = bundle_for(GUARDED_SETTER);
    let jumpi_start = bundle
        .block_starts()
        .into_iter()
        .find(|start| {
            bundle
                .block_at(*start)
                .and_then(|b| b.terminator())
                .is_some_and(|t| t.op == Opcode::JUMPI)
        })
        .expect("fixture has a JUMPI block");
    let successors = bundle.successor_starts(jumpi_start);
    assert_eq!(successors.len(), 2, "taken branch and fall-through");
    assert_eq!(successors, vec![8, 0x0d]);
}

#[test]
fn dynamic_fallback_connects_to_every_jumpdest_and_is_counted() {
    let bundle = bundle_for(DYNAMIC_JUMP);
    assert_eq!(bundle.dynamic_jumps, 1);
    let successors = bundle.successor_starts(0);
    let jumpdests: Vec<usize> = bundle.jumpdests.iter().copied().collect();
    assert_eq!(successors, jumpdests);
    assert!(successors.len() >= 2);
}

#[test]
fn instructions_stay_inside_their_block_bounds() {
    for bundle in fixtures() {
        for start in bundle.block_starts() {
            let block = bundle.block_at(start).expect("block exists");
            for ins in &block.instructions {
                assert!(block.start <= ins.pc && ins.pc < block.end);
            }
        }
    }
}
