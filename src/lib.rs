//! cryptdump - Decrypted image dumper for FairPlay-encrypted Mach-O binaries.
//!
//! An encrypted application binary stores one window of its `__TEXT`
//! segment encrypted on disk, described by an `LC_ENCRYPTION_INFO[_64]` load
//! command. Once the loader has mapped the image the window reads back as
//! plaintext. This library reads that window out of a running process,
//! splices it into the on-disk image and clears the `cryptid` flag, producing
//! a standalone decrypted binary.
//!
//! # Features
//!
//! - 32-bit and 64-bit little-endian Mach-O images
//! - One parser for files on disk and images mapped in another process
//! - Memory-only fallback when the disk image cannot be read
//! - Process access injected through capability traits
//! - IPA packaging of the bundle with the dumps swapped in
//!
//! # Example
//!
//! ```no_run
//! use cryptdump::dump::{Capabilities, DumpOptions, Dumper};
//! use cryptdump::host::{LocalFs, Snapshot};
//!
//! fn main() -> cryptdump::Result<()> {
//!     let snapshot = Snapshot::load("snapshot/manifest.json")?;
//!     let files = LocalFs::new().with_root("device-root");
//!
//!     let dumper = Dumper::new(
//!         Capabilities::new(&snapshot, &files),
//!         DumpOptions::default().with_output_dir("out"),
//!     );
//!     let batch = dumper.dump_all()?;
//!     println!("{}/{} images dumped", batch.succeeded(), batch.processed());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dump;
pub mod error;
pub mod host;
pub mod macho;
pub mod patch;
pub mod source;
pub mod util;

// Re-export main types
pub use dump::{Capabilities, DumpOptions, DumpOutcome, DumpResult, Dumper, FallbackPolicy};
pub use error::{Error, Result};
pub use macho::{MachHeader, MachVariant};
pub use patch::{EncryptionInfo, EncryptionState};
pub use source::{AddressSpaceReader, ByteSource, RemoteImage};
