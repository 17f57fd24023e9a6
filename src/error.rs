use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for star operations
pub type Result<T> = std::result::Result<T, StarError>;

/// Unified error type for all star operations
#[derive(Debug, Error)]
pub enum StarError {
    // Codec errors
    #[error("Truncated input: need {needed} bytes, got {available}")]
    TruncatedInput { needed: usize, available: usize },

    #[error("String too long to encode: {0} bytes (max {max})", max = u32::MAX)]
    StringTooLong(usize),

    #[error("Corrupt entry: decoding {field}: {source}")]
    CorruptEntry {
        field: &'static str,
        #[source]
        source: Box<StarError>,
    },

    #[error("Invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("Unsupported mode bits: {0:#010x}")]
    UnsupportedMode(u32),

    // Container errors
    #[error("Invalid magic number: expected {expected:#x}, found {found:#x}")]
    BadMagic { expected: u64, found: u64 },

    #[error("Unsupported archive version: {0}")]
    UnsupportedVersion(u8),

    #[error("Corrupt index at byte {offset} of {declared}: {source}")]
    CorruptIndex {
        offset: usize,
        declared: u32,
        #[source]
        source: Box<StarError>,
    },

    #[error("Entry {name:?} spans [{offset}, {offset}+{size}) outside the payload region")]
    EntryOutOfBounds { name: String, offset: u64, size: u64 },

    #[error("Index too large: {0} bytes (max {max})", max = u32::MAX)]
    IndexTooLarge(u64),

    #[error("Size mismatch for {name:?}: declared {declared} bytes, read {actual}")]
    SizeMismatch {
        name: String,
        declared: u64,
        actual: u64,
    },

    #[error("Writing entry {name:?}: {source}")]
    Write {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Finishing archive: writing {stage}: {source}")]
    Finish {
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    // Lookup errors
    #[error("File not found in archive: {0}")]
    NotFound(String),

    #[error("Offset {offset} out of range for entry of {size} bytes")]
    OutOfRange { offset: u64, size: u64 },

    // Filesystem collaborator errors
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Tar error: {0}")]
    Tar(String),

    // Configuration and output
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Stream(#[from] io::Error),
}

impl StarError {
    /// Wrap a decode failure with the name of the field being decoded
    pub(crate) fn in_field(self, field: &'static str) -> Self {
        StarError::CorruptEntry {
            field,
            source: Box::new(self),
        }
    }
}

/// Attach a filesystem path to I/O errors
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| StarError::Io {
            path: path.into(),
            source,
        })
    }
}
