//! Dumping decrypted images from a running process.
//!
//! # Dump Flow
//!
//! For each application image:
//!
//! 1. **Resolve** - Look up the load base and device path by short name
//! 2. **Read** - Read the on-disk image; on failure fall back to memory only
//! 3. **Merge** - Replace the encrypted window with the live plaintext
//! 4. **Write** - Write `<output_dir>/<name>.decrypted`
//!
//! The environment is reached only through [`Capabilities`].

mod capabilities;
mod dumper;
mod modules;
mod options;
mod result;

pub use capabilities::*;
pub use dumper::*;
pub use modules::*;
pub use options::*;
pub use result::*;
