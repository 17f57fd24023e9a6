use crate::archive::codec::{get_u32, get_u64, put_u32, put_u64};
use crate::error::{Result, StarError};
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Magic number: 0xab 'r' 'a' 't' 's' 0xcd, big-endian in the first 8 bytes
pub const MAGIC_NUMBER: u64 = 0xab72_6174_73cd;

/// Current format version
pub const FORMAT_VERSION: u8 = 0x00;

/// Header size in bytes: magic(8) version(1) payload length(8) index length(4)
pub const HEADER_SIZE: u64 = 21;

/// Unused bytes between the header and the first payload byte; written as zeros
pub const RESERVED_GAP: u64 = 4;

/// Absolute offset of the first payload byte
pub const PAYLOAD_START: u64 = HEADER_SIZE + RESERVED_GAP;

pub(crate) const VERSION_OFFSET: u64 = 8;
pub(crate) const PAYLOAD_LENGTH_OFFSET: u64 = 9;
pub(crate) const INDEX_LENGTH_OFFSET: u64 = 17;

// Wire mode: type and special flags live above the permission bits
const MODE_DIR: u32 = 1 << 31;
const MODE_APPEND: u32 = 1 << 30;
const MODE_EXCLUSIVE: u32 = 1 << 29;
const MODE_TEMPORARY: u32 = 1 << 28;
const MODE_SYMLINK: u32 = 1 << 27;
const MODE_DEVICE: u32 = 1 << 26;
const MODE_NAMED_PIPE: u32 = 1 << 25;
const MODE_SOCKET: u32 = 1 << 24;
const MODE_SETUID: u32 = 1 << 23;
const MODE_SETGID: u32 = 1 << 22;
const MODE_CHAR_DEVICE: u32 = 1 << 21;
const MODE_STICKY: u32 = 1 << 20;
const MODE_IRREGULAR: u32 = 1 << 19;
const MODE_PERM: u32 = 0o777;

// Flags with no POSIX counterpart; an entry carrying one cannot be restored faithfully
const MODE_UNSUPPORTED: u32 = MODE_APPEND | MODE_EXCLUSIVE | MODE_TEMPORARY;

const MODE_TYPE: u32 =
    MODE_DIR | MODE_SYMLINK | MODE_DEVICE | MODE_NAMED_PIPE | MODE_SOCKET | MODE_CHAR_DEVICE | MODE_IRREGULAR;

// POSIX special bits
const S_ISUID: u32 = 0o4000;
const S_ISGID: u32 = 0o2000;
const S_ISVTX: u32 = 0o1000;

/// Archive header at the beginning of the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarHeader {
    pub version: u8,
    pub payload_length: u64,
    pub index_length: u32,
}

impl StarHeader {
    pub fn new() -> Self {
        Self {
            version: FORMAT_VERSION,
            payload_length: 0,
            index_length: 0,
        }
    }

    /// Absolute offset of the index
    pub fn index_offset(&self) -> Option<u64> {
        HEADER_SIZE.checked_add(self.payload_length)
    }

    /// Encode the fixed header followed by the zeroed reserved gap
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAYLOAD_START as usize);
        put_u64(&mut buf, MAGIC_NUMBER);
        buf.push(self.version);
        put_u64(&mut buf, self.payload_length);
        put_u32(&mut buf, self.index_length);
        buf.extend_from_slice(&[0u8; RESERVED_GAP as usize]);
        buf
    }

    /// Decode a header from the first `HEADER_SIZE` bytes of `src`
    pub fn decode(src: &[u8]) -> Result<Self> {
        let (rest, magic) = get_u64(src)?;
        if magic != MAGIC_NUMBER {
            return Err(StarError::BadMagic {
                expected: MAGIC_NUMBER,
                found: magic,
            });
        }
        let (rest, version) = match rest.split_first() {
            Some((v, rest)) => (rest, *v),
            None => {
                return Err(StarError::TruncatedInput {
                    needed: 1,
                    available: 0,
                })
            }
        };
        let (rest, payload_length) = get_u64(rest)?;
        let (_, index_length) = get_u32(rest)?;

        let header = Self {
            version,
            payload_length,
            index_length,
        };
        header.validate_version()?;
        Ok(header)
    }

    /// Validate version compatibility
    pub fn validate_version(&self) -> Result<()> {
        if self.version != FORMAT_VERSION {
            return Err(StarError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

impl Default for StarHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Type of an archived filesystem object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink { target: String },
    CharDevice { major: u32, minor: u32 },
    BlockDevice { major: u32, minor: u32 },
    Fifo,
}

impl EntryKind {
    pub fn is_regular(&self) -> bool {
        matches!(self, EntryKind::Regular)
    }

    /// Single-character type tag as shown by `ls -l`
    pub fn type_char(&self) -> char {
        match self {
            EntryKind::Regular => '-',
            EntryKind::Directory => 'd',
            EntryKind::Symlink { .. } => 'l',
            EntryKind::CharDevice { .. } => 'c',
            EntryKind::BlockDevice { .. } => 'b',
            EntryKind::Fifo => 'p',
        }
    }

    fn type_bits(&self) -> u32 {
        match self {
            EntryKind::Regular => 0,
            EntryKind::Directory => MODE_DIR,
            EntryKind::Symlink { .. } => MODE_SYMLINK,
            EntryKind::CharDevice { .. } => MODE_DEVICE | MODE_CHAR_DEVICE,
            EntryKind::BlockDevice { .. } => MODE_DEVICE,
            EntryKind::Fifo => MODE_NAMED_PIPE,
        }
    }
}

/// Build the wire mode from a kind and POSIX permission bits
pub fn encode_mode(kind: &EntryKind, permissions: u32) -> u32 {
    let mut mode = kind.type_bits() | (permissions & MODE_PERM);
    if permissions & S_ISUID != 0 {
        mode |= MODE_SETUID;
    }
    if permissions & S_ISGID != 0 {
        mode |= MODE_SETGID;
    }
    if permissions & S_ISVTX != 0 {
        mode |= MODE_STICKY;
    }
    mode
}

/// Split a wire mode into its kind and POSIX permission bits.
///
/// Link targets and device numbers are not part of the mode; the caller fills
/// them in from their own fields.
pub fn decode_mode(mode: u32, target: &str, major: u32, minor: u32) -> Result<(EntryKind, u32)> {
    if mode & MODE_UNSUPPORTED != 0 {
        return Err(StarError::UnsupportedMode(mode));
    }
    let kind = match mode & MODE_TYPE {
        0 => EntryKind::Regular,
        MODE_DIR => EntryKind::Directory,
        MODE_SYMLINK => EntryKind::Symlink {
            target: target.to_string(),
        },
        t if t == MODE_DEVICE | MODE_CHAR_DEVICE => EntryKind::CharDevice { major, minor },
        MODE_DEVICE => EntryKind::BlockDevice { major, minor },
        MODE_NAMED_PIPE => EntryKind::Fifo,
        _ => return Err(StarError::UnsupportedMode(mode)),
    };

    let mut permissions = mode & MODE_PERM;
    if mode & MODE_SETUID != 0 {
        permissions |= S_ISUID;
    }
    if mode & MODE_SETGID != 0 {
        permissions |= S_ISGID;
    }
    if mode & MODE_STICKY != 0 {
        permissions |= S_ISVTX;
    }
    Ok((kind, permissions))
}

/// Signed nanoseconds since the Unix epoch, saturating at the i64 range
pub fn to_unix_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => i64::try_from(e.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    }
}

pub fn from_unix_nanos(nanos: i64) -> SystemTime {
    if nanos >= 0 {
        UNIX_EPOCH + Duration::from_nanos(nanos as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos(nanos.unsigned_abs())
    }
}

/// Build a timestamp from `stat`-style seconds and nanoseconds
pub fn from_unix_parts(secs: i64, nanos: i64) -> SystemTime {
    from_unix_nanos(secs.saturating_mul(1_000_000_000).saturating_add(nanos))
}
