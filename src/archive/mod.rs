pub mod codec;
mod entry;
mod format;
mod io;
mod reader;
mod writer;

pub use entry::Entry;
pub use format::{
    decode_mode, encode_mode, from_unix_nanos, from_unix_parts, to_unix_nanos, EntryKind,
    StarHeader, FORMAT_VERSION, HEADER_SIZE, MAGIC_NUMBER, PAYLOAD_START, RESERVED_GAP,
};
pub use io::{ReadAt, WriteAt};
pub use reader::{ArchiveReader, EntryReaderAt, EntryStream};
pub use writer::{write_archive, ArchiveWriter};
