use crate::archive::entry::Entry;
use crate::archive::format::{
    StarHeader, HEADER_SIZE, MAGIC_NUMBER, PAYLOAD_START, VERSION_OFFSET,
};
use crate::archive::io::ReadAt;
use crate::error::{IoResultExt, Result, StarError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

/// Index bytes are pulled in chunks so a lying header cannot force a huge allocation
const INDEX_CHUNK_SIZE: usize = 64 * 1024;

/// Archive reader with O(1) entry lookup
///
/// The whole index is loaded at open time. After that the reader is immutable
/// and any number of entry readers may be used from several threads at once.
pub struct ArchiveReader<R: ReadAt> {
    input: R,
    header: StarHeader,
    entries: Vec<Entry>,
    by_name: HashMap<String, usize>,
}

impl ArchiveReader<File> {
    /// Open an archive file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_path(path)?;
        Self::new(file)
    }
}

/// This is essentially our "API"; the public facing portion of our code.
impl<R: ReadAt> ArchiveReader<R> {
    /// Parse the header and load the index from `input`
    pub fn new(input: R) -> Result<Self> {
        let header = read_header(&input)?;
        let (entries, by_name) = load_index(&input, &header)?;

        debug!(
            entries = entries.len(),
            payload_length = header.payload_length,
            index_length = header.index_length,
            "loaded index"
        );

        Ok(Self {
            input,
            header,
            entries,
            by_name,
        })
    }

    /// Get archive header information
    pub fn header(&self) -> &StarHeader {
        &self.header
    }

    /// Get number of entries in archive
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// All entries in index order
    pub fn list_entries(&self) -> &[Entry] {
        &self.entries
    }

    /// All entry names in index order
    pub fn list_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Look up an entry by name. With duplicate names the last one in the index wins.
    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Check if an entry exists in the archive
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    fn lookup(&self, name: &str) -> Result<&Entry> {
        self.entry(name)
            .ok_or_else(|| StarError::NotFound(name.to_string()))
    }

    /// Positioned reads over one entry's payload
    pub fn open_random_access(&self, name: &str) -> Result<EntryReaderAt<'_, R>> {
        let entry = self.lookup(name)?;
        Ok(EntryReaderAt {
            input: &self.input,
            start: entry.offset,
            size: entry.size,
        })
    }

    /// Forward-only stream over one entry's payload
    pub fn open_sequential(&self, name: &str) -> Result<EntryStream<'_, R>> {
        let entry = self.lookup(name)?;
        Ok(EntryStream {
            input: &self.input,
            start: entry.offset,
            size: entry.size,
            pos: 0,
        })
    }

    /// Read an entry's whole payload into memory
    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let mut stream = self.open_sequential(name)?;
        let mut data = Vec::with_capacity(stream.len().min(INDEX_CHUNK_SIZE as u64) as usize);
        stream.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Consume the reader and return the underlying input
    pub fn into_inner(self) -> R {
        self.input
    }
}

/// Read the fixed header, checking the magic before anything else is read
fn read_header<R: ReadAt>(input: &R) -> Result<StarHeader> {
    let mut buf = [0u8; HEADER_SIZE as usize];

    let magic_len = VERSION_OFFSET as usize;
    let n = input.read_full_at(&mut buf[..magic_len], 0)?;
    if n < magic_len {
        return Err(StarError::TruncatedInput {
            needed: magic_len,
            available: n,
        });
    }
    let mut magic = [0u8; 8];
    magic.copy_from_slice(&buf[..magic_len]);
    let found = u64::from_be_bytes(magic);
    if found != MAGIC_NUMBER {
        return Err(StarError::BadMagic {
            expected: MAGIC_NUMBER,
            found,
        });
    }

    // the magic is followed directly by the version byte
    let rest = &mut buf[magic_len..];
    let n = input.read_full_at(rest, VERSION_OFFSET)?;
    if n < rest.len() {
        return Err(StarError::TruncatedInput {
            needed: rest.len(),
            available: n,
        });
    }
    StarHeader::decode(&buf)
}

type Index = (Vec<Entry>, HashMap<String, usize>);

fn load_index<R: ReadAt>(input: &R, header: &StarHeader) -> Result<Index> {
    let declared = header.index_length;
    let index_offset = header.index_offset().ok_or(StarError::TruncatedInput {
        needed: declared as usize,
        available: 0,
    })?;
    let bytes = read_index_bytes(input, index_offset, declared as usize)?;

    let mut entries = Vec::new();
    let mut by_name = HashMap::new();
    let mut rest = bytes.as_slice();
    while !rest.is_empty() {
        let consumed = bytes.len() - rest.len();
        let (next, entry) = Entry::unmarshal(rest).map_err(|e| StarError::CorruptIndex {
            offset: consumed,
            declared,
            source: Box::new(e),
        })?;
        check_bounds(&entry, index_offset)?;

        by_name.insert(entry.name.clone(), entries.len());
        entries.push(entry);
        rest = next;
    }

    Ok((entries, by_name))
}

fn read_index_bytes<R: ReadAt>(input: &R, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(len.min(INDEX_CHUNK_SIZE));
    let mut chunk = vec![0u8; len.min(INDEX_CHUNK_SIZE)];
    while bytes.len() < len {
        let want = (len - bytes.len()).min(chunk.len());
        let n = input.read_full_at(&mut chunk[..want], offset.saturating_add(bytes.len() as u64))?;
        bytes.extend_from_slice(&chunk[..n]);
        if n < want {
            return Err(StarError::TruncatedInput {
                needed: len,
                available: bytes.len(),
            });
        }
    }
    Ok(bytes)
}

/// Regular payloads must sit inside `[PAYLOAD_START, index_offset)`
fn check_bounds(entry: &Entry, index_offset: u64) -> Result<()> {
    if !entry.is_regular() {
        return Ok(());
    }
    let in_bounds = entry.offset >= PAYLOAD_START
        && entry
            .offset
            .checked_add(entry.size)
            .is_some_and(|end| end <= index_offset);
    if !in_bounds {
        return Err(StarError::EntryOutOfBounds {
            name: entry.name.clone(),
            offset: entry.offset,
            size: entry.size,
        });
    }
    Ok(())
}

/// Random access to one entry's payload
///
/// Offsets are relative to the start of the entry. Reads never cross into
/// neighbouring payload.
pub struct EntryReaderAt<'a, R: ReadAt> {
    input: &'a R,
    start: u64,
    size: u64,
}

impl<R: ReadAt> EntryReaderAt<'_, R> {
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Read up to `buf.len()` bytes at `offset` within the entry.
    ///
    /// Reading at exactly the entry size returns 0; past it fails with `OutOfRange`.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset > self.size {
            return Err(StarError::OutOfRange {
                offset,
                size: self.size,
            });
        }
        let n = (buf.len() as u64).min(self.size - offset) as usize;
        if n == 0 {
            return Ok(0);
        }
        Ok(self.input.read_at(&mut buf[..n], self.start + offset)?)
    }
}

/// Sequential stream over one entry's payload
pub struct EntryStream<'a, R: ReadAt> {
    input: &'a R,
    start: u64,
    size: u64,
    pos: u64,
}

impl<R: ReadAt> EntryStream<'_, R> {
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Bytes left before end of stream
    pub fn remaining(&self) -> u64 {
        self.size - self.pos
    }
}

impl<R: ReadAt> Read for EntryStream<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (buf.len() as u64).min(self.remaining()) as usize;
        if n == 0 {
            return Ok(0);
        }
        let got = self.input.read_at(&mut buf[..n], self.start + self.pos)?;
        if got == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive ends inside entry payload",
            ));
        }
        self.pos += got as u64;
        Ok(got)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::format::EntryKind;
    use crate::archive::writer::{write_archive, ArchiveWriter};
    use crate::source::{FsObject, MemorySource};
    use std::cell::RefCell;

    fn build(source: &mut MemorySource) -> Vec<u8> {
        write_archive(Vec::new(), source).unwrap()
    }

    fn two_files() -> Vec<u8> {
        let mut source = MemorySource::new();
        source.add_file("first", b"0123456789".to_vec(), 0o644);
        source.add_file("second", b"abcdef".to_vec(), 0o644);
        build(&mut source)
    }

    #[test]
    fn test_single_file_scenario() {
        let mut source = MemorySource::new();
        source.add_file("a.txt", b"hello".to_vec(), 0o644);
        let buf = build(&mut source);
        let reader = ArchiveReader::new(buf.as_slice()).unwrap();

        assert_eq!(reader.list_names(), ["a.txt"]);
        let mut content = String::new();
        reader
            .open_sequential("a.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "hello");

        let header = reader.header();
        assert_eq!(header.payload_length, 9);
        assert_eq!(
            buf.len() as u64,
            header.index_offset().unwrap() + header.index_length as u64
        );
    }

    #[test]
    fn test_empty_directory_scenario() {
        let mut source = MemorySource::new();
        source.add_dir("d", 0o755);
        let reader = ArchiveReader::new(build(&mut source)).unwrap();

        let entry = reader.entry("d").unwrap();
        assert_eq!(entry.size, 0);
        assert_eq!(entry.kind, EntryKind::Directory);
        assert_eq!(entry.mode() & (1 << 31), 1 << 31);
        assert_eq!(reader.header().payload_length, 4);
    }

    #[test]
    fn test_empty_archive() {
        let reader = ArchiveReader::new(build(&mut MemorySource::new())).unwrap();
        assert_eq!(reader.entry_count(), 0);
        assert!(reader.list_names().is_empty());
    }

    #[test]
    fn test_random_access_boundaries() {
        let buf = two_files();
        let reader = ArchiveReader::new(buf.as_slice()).unwrap();
        let ra = reader.open_random_access("second").unwrap();
        assert_eq!(ra.len(), 6);

        let mut out = [0u8; 4];
        assert_eq!(ra.read_at(&mut out, 2).unwrap(), 4);
        assert_eq!(&out, b"cdef");

        // Clamped at the end of the entry, never reading into the index
        assert_eq!(ra.read_at(&mut out, 4).unwrap(), 2);
        assert_eq!(&out[..2], b"ef");

        assert_eq!(ra.read_at(&mut out, 6).unwrap(), 0);
        match ra.read_at(&mut out, 7) {
            Err(StarError::OutOfRange { offset, size }) => {
                assert_eq!(offset, 7);
                assert_eq!(size, 6);
            }
            other => panic!("Expected OutOfRange, got: {:?}", other),
        }
    }

    #[test]
    fn test_random_access_does_not_cross_entries() {
        let buf = two_files();
        let reader = ArchiveReader::new(buf.as_slice()).unwrap();
        let ra = reader.open_random_access("first").unwrap();

        let mut out = [0u8; 32];
        let n = ra.read_at(&mut out, 0).unwrap();
        assert_eq!(&out[..n], b"0123456789");
    }

    #[test]
    fn test_sequential_stops_at_bound() {
        let buf = two_files();
        let reader = ArchiveReader::new(buf.as_slice()).unwrap();
        let mut stream = reader.open_sequential("first").unwrap();

        let mut out = [0u8; 4];
        let mut total = Vec::new();
        loop {
            let n = stream.read(&mut out).unwrap();
            if n == 0 {
                break;
            }
            total.extend_from_slice(&out[..n]);
        }
        assert_eq!(total, b"0123456789");
        assert_eq!(stream.remaining(), 0);
        assert_eq!(stream.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_not_found() {
        let reader = ArchiveReader::new(two_files()).unwrap();
        assert!(!reader.contains("missing"));
        assert!(matches!(
            reader.open_sequential("missing"),
            Err(StarError::NotFound(name)) if name == "missing"
        ));
        assert!(matches!(
            reader.open_random_access("missing"),
            Err(StarError::NotFound(_))
        ));
    }

    #[test]
    fn test_bad_magic_reads_nothing_else() {
        struct Recording {
            data: Vec<u8>,
            reads: RefCell<Vec<u64>>,
        }
        impl ReadAt for Recording {
            fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
                self.reads.borrow_mut().push(offset);
                self.data.read_at(buf, offset)
            }
        }

        let mut data = two_files();
        data[2] ^= 0xFF;
        let input = Recording {
            data,
            reads: RefCell::new(Vec::new()),
        };
        match ArchiveReader::new(&input) {
            Err(StarError::BadMagic { expected, .. }) => assert_eq!(expected, MAGIC_NUMBER),
            Err(other) => panic!("Expected BadMagic, got: {:?}", other),
            Ok(_) => panic!("Expected BadMagic"),
        }
        assert_eq!(*input.reads.borrow(), [0]);
    }

    #[test]
    fn test_short_input_is_truncated() {
        let buf = two_files();
        assert!(matches!(
            ArchiveReader::new(&buf[..5]),
            Err(StarError::TruncatedInput {
                needed: 8,
                available: 5
            })
        ));
        assert!(matches!(
            ArchiveReader::new(&buf[..15]),
            Err(StarError::TruncatedInput {
                needed: 13,
                available: 7
            })
        ));
        // Index cut short
        assert!(matches!(
            ArchiveReader::new(&buf[..buf.len() - 3]),
            Err(StarError::TruncatedInput { .. })
        ));
    }

    #[test]
    fn test_index_length_mismatch_is_corrupt() {
        let mut buf = two_files();
        let declared = u32::from_be_bytes(buf[17..21].try_into().unwrap());
        buf[17..21].copy_from_slice(&(declared - 1).to_be_bytes());

        match ArchiveReader::new(buf.as_slice()) {
            Err(StarError::CorruptIndex {
                declared: d,
                source,
                ..
            }) => {
                assert_eq!(d, declared - 1);
                assert!(matches!(*source, StarError::CorruptEntry { .. }));
            }
            Err(other) => panic!("Expected CorruptIndex, got: {:?}", other),
            Ok(_) => panic!("Expected CorruptIndex"),
        }
    }

    #[test]
    fn test_entry_outside_payload_is_rejected() {
        let mut index = Vec::new();
        let mut entry = Entry::new("escape", EntryKind::Regular, 0o644);
        entry.offset = 25;
        entry.size = 100;
        entry.marshal_into(&mut index).unwrap();

        let mut buf = StarHeader {
            payload_length: 4,
            index_length: index.len() as u32,
            ..StarHeader::new()
        }
        .encode();
        buf.extend_from_slice(&index);

        match ArchiveReader::new(buf) {
            Err(StarError::EntryOutOfBounds { name, size, .. }) => {
                assert_eq!(name, "escape");
                assert_eq!(size, 100);
            }
            Err(other) => panic!("Expected EntryOutOfBounds, got: {:?}", other),
            Ok(_) => panic!("Expected EntryOutOfBounds"),
        }
    }

    #[test]
    fn test_duplicate_names_last_wins() {
        let mut writer = ArchiveWriter::new(Vec::new()).unwrap();
        for data in [&b"old"[..], &b"newer"[..]] {
            let mut entry = Entry::new("dup", EntryKind::Regular, 0o644);
            entry.size = data.len() as u64;
            writer.append(FsObject::with_data(entry, data)).unwrap();
        }
        let reader = ArchiveReader::new(writer.finish().unwrap()).unwrap();

        assert_eq!(reader.entry_count(), 2);
        assert_eq!(reader.read_file("dup").unwrap(), b"newer");
    }

    #[test]
    fn test_open_file_on_disk() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), two_files()).unwrap();

        let reader = ArchiveReader::open(temp.path()).unwrap();
        assert_eq!(reader.read_file("second").unwrap(), b"abcdef");
    }
}
