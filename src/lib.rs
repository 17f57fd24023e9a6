//! star-rs: seekable archive container with a trailing index
//!
//! A star archive stores the raw bytes of every regular file back to back,
//! followed by an index describing every filesystem object (files,
//! directories, symlinks, device nodes, FIFOs). The index is loaded once at
//! open time, after which any entry can be read at random without touching
//! the rest of the archive.
//!
//! - [`archive`]: the container codec, writer and reader
//! - [`source`]: local directory trees and tar streams as writer input
//! - [`extract`]: recreating entries on disk
//! - [`list`]: listing formats
//!
//! # Example
//!
//! ```no_run
//! use star_rs::{write_archive, ArchiveReader, LocalSource};
//! use std::fs::File;
//!
//! // Create an archive
//! let mut source = LocalSource::new(["docs"]);
//! write_archive(File::create("docs.star")?, &mut source)?;
//!
//! // Read from archive
//! let reader = ArchiveReader::open("docs.star")?;
//! let data = reader.read_file("docs/readme.txt")?;
//! # Ok::<(), star_rs::error::StarError>(())
//! ```

// Core modules
pub mod archive;
pub mod config;
pub mod error;
pub mod extract;
pub mod list;
pub mod source;

// Re-export commonly used types
pub use archive::{
    write_archive, ArchiveReader, ArchiveWriter, Entry, EntryKind, EntryReaderAt, EntryStream,
    ReadAt, StarHeader, WriteAt, FORMAT_VERSION, HEADER_SIZE, MAGIC_NUMBER, PAYLOAD_START,
};
pub use config::StarConfig;
pub use error::{Result, StarError};
pub use extract::{ExtractOptions, Extractor};
pub use list::{format_entry, ListOptions, TimeField};
pub use source::{FsObject, LocalSource, MemorySource, Source, TarSource};
