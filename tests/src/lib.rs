//! Integration tests spanning the workspace crates. Bytecode fixtures are
//! hand-assembled hex with the layout documented next to each constant.

#[cfg(test)]
mod analysis;
#[cfg(test)]
mod core;
