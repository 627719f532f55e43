//! Format-aware patching of encrypted images.
//!
//! # Pipeline
//!
//! 1. **Locate** - Find the first `LC_ENCRYPTION_INFO[_64]` record
//! 2. **Size** - Derive the file size from the segment layout when no disk
//!    copy is available
//! 3. **Merge** - Overwrite the encrypted window with plaintext read from the
//!    running process and clear `cryptid`

mod encryption;
mod layout;
mod merge;

pub use encryption::*;
pub use layout::*;
pub use merge::*;
