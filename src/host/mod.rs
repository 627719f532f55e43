//! Host-side implementations of the dump capabilities.

mod fs;
mod ipa;
mod snapshot;

pub use fs::*;
pub use ipa::*;
pub use snapshot::*;
