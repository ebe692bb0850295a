//! Source-side analysis for the vulnerability detector: a line-oriented
//! Solidity scanner recovering contracts, functions, and key-variable
//! usages; declaration-order storage-slot resolution; and the compiler
//! source-map parser that ties bytecode offsets back to source lines.
//!
//! The scanner is intentionally not a full grammar. Downstream consumers
//! depend only on the `Function`/`Usage`/`SlotBinding` shapes, so a
//! grammar-based parser can be swapped in behind the same interface.

pub mod error;
pub mod functions;
pub mod srcmap;
pub mod storage;
pub mod usage;

pub use error::{Error, Result};
pub use functions::{ContractDecl, Function, Mutability, SourceUnit, Visibility};
pub use srcmap::{JumpKind, LineIndex, SrcMapEntry, line_for_instruction, parse_srcmap};
pub use storage::{SlotBinding, SlotKind, resolve_slots};
pub use usage::{Usage, UsageKind, find_usages};
