use crate::archive::entry::Entry;
use crate::archive::format::{
    StarHeader, HEADER_SIZE, INDEX_LENGTH_OFFSET, PAYLOAD_LENGTH_OFFSET, PAYLOAD_START,
};
use crate::archive::io::WriteAt;
use crate::error::{IoResultExt, Result, StarError};
use crate::source::{FsObject, Source};
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, info};

/// Size of the buffer payload bytes are streamed through
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Archive writer for creating star containers
///
/// Payload bytes are written as objects arrive; the index is held in memory
/// and written after the last payload byte by [`ArchiveWriter::finish`].
pub struct ArchiveWriter<W: WriteAt> {
    sink: W,
    entries: Vec<Entry>,
    current_offset: u64,
    buf: Vec<u8>,
}

impl ArchiveWriter<File> {
    /// Create a new archive file, truncating any existing one
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_path(path)?;
        Self::new(file)
    }
}

impl<W: WriteAt> ArchiveWriter<W> {
    /// Start a container on `sink` by writing the placeholder header
    pub fn new(mut sink: W) -> Result<Self> {
        sink.write_all_at(&StarHeader::new().encode(), 0)?;

        Ok(Self {
            sink,
            entries: Vec::new(),
            current_offset: PAYLOAD_START,
            buf: vec![0u8; COPY_BUFFER_SIZE],
        })
    }

    /// Number of entries appended so far
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Add one filesystem object.
    ///
    /// Regular files have their content copied to the payload region at the
    /// current offset. Every other kind is recorded with a size of zero and
    /// contributes no payload bytes.
    pub fn append(&mut self, object: FsObject<'_>) -> Result<()> {
        let FsObject { mut entry, data } = object;
        entry.offset = self.current_offset;

        if entry.is_regular() {
            let copied = match data {
                Some(reader) => self.copy_payload(&entry, reader)?,
                None => 0,
            };
            if copied != entry.size {
                return Err(StarError::SizeMismatch {
                    name: entry.name,
                    declared: entry.size,
                    actual: copied,
                });
            }
            self.current_offset = self.current_offset.checked_add(copied).ok_or_else(|| {
                StarError::Write {
                    name: entry.name.clone(),
                    source: io::Error::new(io::ErrorKind::InvalidInput, "payload offset overflow"),
                }
            })?;
        } else {
            entry.size = 0;
        }

        debug!(
            name = %entry.name,
            kind = %entry.kind.type_char(),
            offset = entry.offset,
            size = entry.size,
            "appended entry"
        );
        self.entries.push(entry);
        Ok(())
    }

    /// Stream up to `entry.size` bytes from `reader` into the payload region.
    ///
    /// Returns the number of bytes the reader produced, which exceeds the
    /// declared size when the reader is longer than announced.
    fn copy_payload(&mut self, entry: &Entry, reader: Box<dyn Read + '_>) -> Result<u64> {
        let write_err = |source| StarError::Write {
            name: entry.name.clone(),
            source,
        };

        let mut limited = reader.take(entry.size);
        let mut copied = 0u64;
        loop {
            let n = match limited.read(&mut self.buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(write_err(e)),
            };
            self.sink
                .write_all_at(&self.buf[..n], entry.offset + copied)
                .map_err(write_err)?;
            copied += n as u64;
        }

        // Count anything past the declared size so the mismatch is reported accurately
        let mut rest = limited.into_inner();
        let extra = io::copy(&mut rest, &mut io::sink()).map_err(write_err)?;
        Ok(copied + extra)
    }

    /// Write the index, patch the header length fields and return the sink
    pub fn finish(mut self) -> Result<W> {
        let index_offset = self.current_offset;
        let payload_length = index_offset - HEADER_SIZE;

        self.entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut index = Vec::new();
        for entry in &self.entries {
            entry.marshal_into(&mut index)?;
        }
        let index_length = u32::try_from(index.len())
            .map_err(|_| StarError::IndexTooLarge(index.len() as u64))?;

        let stage =
            |stage: &'static str| move |source: io::Error| StarError::Finish { stage, source };
        self.sink
            .write_all_at(&index, index_offset)
            .map_err(stage("index"))?;
        self.sink
            .write_all_at(&payload_length.to_be_bytes(), PAYLOAD_LENGTH_OFFSET)
            .map_err(stage("payload length"))?;
        self.sink
            .write_all_at(&index_length.to_be_bytes(), INDEX_LENGTH_OFFSET)
            .map_err(stage("index length"))?;
        self.sink.flush().map_err(stage("flush"))?;

        info!(
            entries = self.entries.len(),
            payload_length,
            index_length,
            "archive finished"
        );
        Ok(self.sink)
    }
}

/// Write a complete container from every object `source` yields
pub fn write_archive<W, S>(sink: W, source: &mut S) -> Result<W>
where
    W: WriteAt,
    S: Source + ?Sized,
{
    let mut writer = ArchiveWriter::new(sink)?;
    while let Some(object) = source.next_object()? {
        writer.append(object)?;
    }
    writer.finish()
}
