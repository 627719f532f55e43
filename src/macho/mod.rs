//! Mach-O file format handling.
//!
//! This module provides the on-disk structures and a parser for the header
//! and load commands, which are all the dumper needs to know about the format.

mod constants;
mod parser;
mod structs;

#[cfg(test)]
pub(crate) mod testutil;

pub use constants::*;
pub use parser::*;
pub use structs::*;
