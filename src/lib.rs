//! # zipedit: ZIP archive reader, writer and in-place editor
//!
//! `zipedit` reads, writes and incrementally edits PKZIP archives, both the
//! classic 32-bit format and the ZIP64 extension. Archives live on a
//! seekable file or a growable in-memory buffer; entries stream through
//! bounded buffers in both directions, so memory usage stays constant no
//! matter how large an entry is.
//!
//! ## Features
//!
//! - **Read**: backward EOCD scan, ZIP64 resolution, ordered entry catalog
//! - **Write**: streaming Stored/Deflate entries with on-the-fly CRC-32
//! - **Edit in place**: add, overwrite and remove entries in an existing
//!   archive; the central directory is rewritten last so a failed operation
//!   leaves the previous directory intact
//! - **Two backings**: files on disk and in-memory buffers, same semantics
//!
//! ## Quick Start
//!
//! ### Building an archive in memory
//!
//! ```
//! use zipedit::{AddOptions, Archive};
//!
//! let mut archive = Archive::create_in_memory()?;
//! archive.add_buffer("hello.txt", b"Hello, World!", AddOptions::default())?;
//!
//! let data = archive.read_entry("hello.txt")?;
//! assert_eq!(data, b"Hello, World!");
//! # Ok::<(), zipedit::ZipError>(())
//! ```
//!
//! ### Editing an archive on disk
//!
//! ```no_run
//! use zipedit::{AccessMode, AddOptions, Archive};
//!
//! let mut archive = Archive::open("backup.zip", AccessMode::Update)?;
//! archive.add_buffer("notes/today.txt", b"rotated", AddOptions::stored())?;
//! archive.remove_entry("notes/yesterday.txt")?;
//!
//! for entry in archive.entries() {
//!     println!("{}: {} bytes", entry.path(), entry.uncompressed_size());
//! }
//! # Ok::<(), zipedit::ZipError>(())
//! ```
//!
//! Dropping an [`Archive`] closes its backing; file archives are synced
//! after every mutating operation.

pub mod archive;
pub mod cancel;
pub mod entry;
pub mod error;

mod backing;
mod compression;
mod records;

pub use archive::{AccessMode, AddOptions, Archive, ExtractOptions, DEFAULT_BUFFER_SIZE};
pub use cancel::CancelToken;
pub use entry::{CompressionMethod, Entry, EntryKind, FileAttributes};
pub use error::{Result, ZipError};
