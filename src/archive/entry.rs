use crate::archive::codec::{get_str, get_u32, get_u64, put_str, put_u32, put_u64};
use crate::archive::format::{decode_mode, encode_mode, from_unix_nanos, to_unix_nanos, EntryKind};
use crate::error::Result;
use std::time::{SystemTime, UNIX_EPOCH};

/// Index record describing one archived filesystem object
///
/// Wire layout, all integers big-endian:
/// - name: u32 length + UTF-8 bytes
/// - linkname: u32 length + UTF-8 bytes
/// - offset: u64
/// - size: u64
/// - uid, gid: u32
/// - mtime, atime, ctime: u64 (signed nanoseconds since the epoch)
/// - mode: u32
/// - major, minor: u32
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    /// POSIX permission bits including setuid/setgid/sticky
    pub permissions: u32,
    pub uid: u32,
    pub gid: u32,
    /// Absolute payload offset within the container (regular files only)
    pub offset: u64,
    /// Payload length in bytes, 0 for non-regular entries
    pub size: u64,
    pub mtime: SystemTime,
    pub atime: SystemTime,
    pub ctime: SystemTime,
}

impl Entry {
    /// Create an entry with zeroed ownership, offset and timestamps
    pub fn new(name: impl Into<String>, kind: EntryKind, permissions: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            permissions,
            uid: 0,
            gid: 0,
            offset: 0,
            size: 0,
            mtime: UNIX_EPOCH,
            atime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
        }
    }

    pub fn is_regular(&self) -> bool {
        self.kind.is_regular()
    }

    /// Symlink target, empty for other kinds
    pub fn linkname(&self) -> &str {
        match &self.kind {
            EntryKind::Symlink { target } => target,
            _ => "",
        }
    }

    pub fn major(&self) -> u32 {
        match self.kind {
            EntryKind::CharDevice { major, .. } | EntryKind::BlockDevice { major, .. } => major,
            _ => 0,
        }
    }

    pub fn minor(&self) -> u32 {
        match self.kind {
            EntryKind::CharDevice { minor, .. } | EntryKind::BlockDevice { minor, .. } => minor,
            _ => 0,
        }
    }

    /// Mode as stored on disk (type bits plus permissions)
    pub fn mode(&self) -> u32 {
        encode_mode(&self.kind, self.permissions)
    }

    /// Append the wire encoding of this entry to `dst`
    pub fn marshal_into(&self, dst: &mut Vec<u8>) -> Result<()> {
        put_str(dst, &self.name)?;
        put_str(dst, self.linkname())?;
        put_u64(dst, self.offset);
        put_u64(dst, self.size);
        put_u32(dst, self.uid);
        put_u32(dst, self.gid);
        put_u64(dst, to_unix_nanos(self.mtime) as u64);
        put_u64(dst, to_unix_nanos(self.atime) as u64);
        put_u64(dst, to_unix_nanos(self.ctime) as u64);
        put_u32(dst, self.mode());
        put_u32(dst, self.major());
        put_u32(dst, self.minor());
        Ok(())
    }

    pub fn marshal(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(72 + self.name.len() + self.linkname().len());
        self.marshal_into(&mut buf)?;
        Ok(buf)
    }

    /// Decode one entry from the front of `src`, returning the remainder
    pub fn unmarshal(src: &[u8]) -> Result<(&[u8], Entry)> {
        let (src, name) = get_str(src).map_err(|e| e.in_field("name"))?;
        let (src, linkname) = get_str(src).map_err(|e| e.in_field("linkname"))?;
        let (src, offset) = get_u64(src).map_err(|e| e.in_field("offset"))?;
        let (src, size) = get_u64(src).map_err(|e| e.in_field("size"))?;
        let (src, uid) = get_u32(src).map_err(|e| e.in_field("uid"))?;
        let (src, gid) = get_u32(src).map_err(|e| e.in_field("gid"))?;
        let (src, mtime) = get_u64(src).map_err(|e| e.in_field("mtime"))?;
        let (src, atime) = get_u64(src).map_err(|e| e.in_field("atime"))?;
        let (src, ctime) = get_u64(src).map_err(|e| e.in_field("ctime"))?;
        let (src, mode) = get_u32(src).map_err(|e| e.in_field("mode"))?;
        let (src, major) = get_u32(src).map_err(|e| e.in_field("major"))?;
        let (src, minor) = get_u32(src).map_err(|e| e.in_field("minor"))?;

        let (kind, permissions) =
            decode_mode(mode, linkname, major, minor).map_err(|e| e.in_field("mode"))?;

        let entry = Entry {
            name: name.to_string(),
            kind,
            permissions,
            uid,
            gid,
            offset,
            size,
            mtime: from_unix_nanos(mtime as i64),
            atime: from_unix_nanos(atime as i64),
            ctime: from_unix_nanos(ctime as i64),
        };
        Ok((src, entry))
    }
}
