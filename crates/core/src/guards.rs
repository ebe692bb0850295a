//! Classifies the guard evidence found along a taint path.

use crate::Opcode;
use crate::cfg::CfgBundle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One piece of guard evidence observed on a path.
///
/// `AccessControl` is never observed directly; it is synthesised when a
/// caller-identity load (CALLER/ORIGIN) and a comparison occur on the same
/// path. The synthesis is a heuristic (a comparison between the caller and
/// a non-authority value also triggers it), so the raw tag set is kept in
/// reports for reviewers to audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardTag {
    ConditionalJump,
    Comparison,
    Revert,
    AccessControl,
}

/// The tag set for one path plus a raw match count for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardEvidence {
    pub tags: BTreeSet<GuardTag>,
    pub evidence_count: usize,
}

impl GuardEvidence {
    pub fn has(&self, tag: GuardTag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Walks every instruction in every block along `path` and collects tags.
///
/// A REVERT counts when it sits on the untaken side of a JUMPI that is on
/// the path: that is where the compiler parks `require` failure code.
pub fn classify_path(bundle: &CfgBundle, path: &[usize]) -> GuardEvidence {
    let mut evidence = GuardEvidence::default();
    let mut caller_identity_seen = false;
    let on_path: BTreeSet<usize> = path.iter().copied().collect();

    for start in path {
        let Some(block) = bundle.block_at(*start) else {
            continue;
        };

        for ins in &block.instructions {
            match ins.op {
                Opcode::JUMPI => {
                    evidence.tags.insert(GuardTag::ConditionalJump);
                    evidence.evidence_count += 1;
                }
                Opcode::CALLER | Opcode::ORIGIN => {
                    caller_identity_seen = true;
                }
                op if op.is_comparison() => {
                    evidence.tags.insert(GuardTag::Comparison);
                    evidence.evidence_count += 1;
                }
                _ => {}
            }
        }

        if block
            .terminator()
            .is_some_and(|term| term.op == Opcode::JUMPI)
            && side_branch_reverts(bundle, *start, &on_path)
        {
            evidence.tags.insert(GuardTag::Revert);
            evidence.evidence_count += 1;
        }
    }

    if caller_identity_seen && evidence.has(GuardTag::Comparison) {
        evidence.tags.insert(GuardTag::AccessControl);
    }
    evidence
}

/// True when a successor of `start` that the path does not take contains a
/// REVERT.
fn side_branch_reverts(bundle: &CfgBundle, start: usize, on_path: &BTreeSet<usize>) -> bool {
    bundle
        .successor_starts(start)
        .into_iter()
        .filter(|succ| !on_path.contains(succ))
        .filter_map(|succ| bundle.block_at(succ))
        .any(|block| {
            block
                .instructions
                .iter()
                .any(|ins| ins.op == Opcode::REVERT)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfg;
    use crate::decoder::disassemble;

    fn bundle_for(hex_code: &str) -> CfgBundle {
        let bytes = hex::decode(hex_code).expect("valid fixture hex");
        build_cfg(&disassemble(&bytes)).expect("cfg")
    }

    #[test]
    fn straight_line_write_collects_nothing() {
        let bundle = bundle_for("60003560005500");
        let evidence = classify_path(&bundle, &[0]);
        assert!(evidence.is_empty());
        assert_eq!(evidence.evidence_count, 0);
    }

    #[test]
    fn caller_check_with_revert_branch_synthesises_access_control() {
        // CALLER; PUSH1 0; SLOAD; EQ; PUSH1 0x0d; JUMPI | PUSH1 0; PUSH1 0;
        // REVERT | JUMPDEST; PUSH1 0; CALLDATALOAD; PUSH1 0; SSTORE; STOP
        let bundle = bundle_for("3360005414600d5760006000fd5b60003560005500");
        let evidence = classify_path(&bundle, &[0, 0x0d]);
        assert!(evidence.has(GuardTag::ConditionalJump));
        assert!(evidence.has(GuardTag::Comparison));
        assert!(evidence.has(GuardTag::Revert));
        assert!(evidence.has(GuardTag::AccessControl));
    }

    #[test]
    fn value_check_without_identity_stays_plain_comparison() {
        // CALLDATALOAD > 0 guard: PUSH1 0; CALLDATALOAD; PUSH1 0; DUP2;
        // GT; PUSH1 0x0f; JUMPI | PUSH1 0; PUSH1 0; REVERT | JUMPDEST;
        // PUSH1 1; SSTORE; STOP
        let bundle = bundle_for("60003560008111600f5760006000fd5b60015500");
        let evidence = classify_path(&bundle, &[0, 0x0f]);
        assert!(evidence.has(GuardTag::Comparison));
        assert!(evidence.has(GuardTag::Revert));
        assert!(!evidence.has(GuardTag::AccessControl));
    }

    #[test]
    fn revert_on_the_taken_branch_is_not_a_guard_for_this_path() {
        // The path that goes through the revert side never reaches a sink;
        // the tag must come from the *other* branch only.
        let bundle = bundle_for("3360005414600d5760006000fd5b60003560005500");
        let evidence = classify_path(&bundle, &[0, 8]);
        assert!(!evidence.has(GuardTag::Revert));
    }
}
