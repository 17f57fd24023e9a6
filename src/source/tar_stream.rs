use crate::archive::{from_unix_parts, Entry, EntryKind};
use crate::error::{Result, StarError};
use crate::source::{member_name, FsObject, Source};
use std::io::{self, Read};
use std::time::SystemTime;
use tar::EntryType;
use tracing::{debug, warn};

/// Source adapting a tar stream
///
/// Entries are handed to the writer as they are read; file contents are
/// streamed straight from the tar reader without buffering.
pub struct TarSource<'a, R: 'a + Read> {
    entries: tar::Entries<'a, R>,
}

impl<'a, R: 'a + Read> TarSource<'a, R> {
    pub fn new(archive: &'a mut tar::Archive<R>) -> Result<Self> {
        let entries = archive.entries().map_err(tar_error)?;
        Ok(Self { entries })
    }
}

fn tar_error(e: io::Error) -> StarError {
    StarError::Tar(e.to_string())
}

/// A numeric header field left blank (all NUL or spaces) reads as zero
fn numeric<T: Default>(raw: &[u8], parsed: io::Result<T>) -> Result<T> {
    if raw.iter().all(|&b| b == 0 || b == b' ') {
        return Ok(T::default());
    }
    parsed.map_err(tar_error)
}

/// Timestamps carried in PAX records, overriding the ustar/GNU header fields
#[derive(Default)]
struct PaxTimes {
    mtime: Option<SystemTime>,
    atime: Option<SystemTime>,
    ctime: Option<SystemTime>,
}

impl PaxTimes {
    fn read<R: Read>(entry: &mut tar::Entry<'_, R>) -> Result<Self> {
        let mut times = Self::default();
        let extensions = match entry.pax_extensions().map_err(tar_error)? {
            Some(extensions) => extensions,
            None => return Ok(times),
        };
        for extension in extensions {
            let extension = extension.map_err(tar_error)?;
            let (Ok(key), Ok(value)) = (extension.key(), extension.value()) else {
                continue;
            };
            let slot = match key {
                "mtime" => &mut times.mtime,
                "atime" => &mut times.atime,
                "ctime" => &mut times.ctime,
                _ => continue,
            };
            *slot = parse_pax_time(value);
        }
        Ok(times)
    }
}

/// Parse a PAX decimal timestamp such as `1600000000.123456789`
fn parse_pax_time(value: &str) -> Option<SystemTime> {
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let (secs, frac) = digits.split_once('.').unwrap_or((digits, ""));
    let secs: i64 = secs.parse().ok()?;

    let mut nanos = 0i64;
    for (i, c) in frac.chars().take(9).enumerate() {
        let digit = c.to_digit(10)? as i64;
        nanos += digit * 10i64.pow(8 - i as u32);
    }

    if negative {
        Some(from_unix_parts(-secs, -nanos))
    } else {
        Some(from_unix_parts(secs, nanos))
    }
}

impl<'a, R: 'a + Read> Source for TarSource<'a, R> {
    fn next_object(&mut self) -> Result<Option<FsObject<'_>>> {
        loop {
            let mut tar_entry = match self.entries.next() {
                Some(entry) => entry.map_err(tar_error)?,
                None => return Ok(None),
            };

            let raw_path = tar_entry.path().map_err(tar_error)?.into_owned();
            let name = match member_name(&raw_path)? {
                Some(name) => name,
                None => continue,
            };

            let header = tar_entry.header();
            let kind = match header.entry_type() {
                EntryType::Regular | EntryType::Continuous => EntryKind::Regular,
                EntryType::Directory => EntryKind::Directory,
                EntryType::Symlink => {
                    let target = tar_entry
                        .link_name()
                        .map_err(tar_error)?
                        .unwrap_or_default();
                    let target = target
                        .to_str()
                        .ok_or_else(|| StarError::InvalidPath(target.display().to_string()))?;
                    EntryKind::Symlink {
                        target: target.to_string(),
                    }
                }
                EntryType::Char => EntryKind::CharDevice {
                    major: header.device_major().map_err(tar_error)?.unwrap_or(0),
                    minor: header.device_minor().map_err(tar_error)?.unwrap_or(0),
                },
                EntryType::Block => EntryKind::BlockDevice {
                    major: header.device_major().map_err(tar_error)?.unwrap_or(0),
                    minor: header.device_minor().map_err(tar_error)?.unwrap_or(0),
                },
                EntryType::Fifo => EntryKind::Fifo,
                EntryType::XGlobalHeader => {
                    debug!(name = %name, "ignoring global pax header");
                    continue;
                }
                EntryType::Link => {
                    warn!(name = %name, "skipping hard link");
                    continue;
                }
                other => {
                    warn!(name = %name, kind = ?other, "skipping unsupported tar entry");
                    continue;
                }
            };

            let raw = header.as_old();
            let permissions = numeric(&raw.mode, header.mode())? & 0o7777;
            let mut entry = Entry::new(name, kind, permissions);
            entry.uid = numeric(&raw.uid, header.uid())? as u32;
            entry.gid = numeric(&raw.gid, header.gid())? as u32;

            let header_mtime = from_unix_parts(numeric(&raw.mtime, header.mtime())? as i64, 0);
            // GNU headers leave atime/ctime zeroed unless written incrementally
            let (gnu_atime, gnu_ctime) = match header.as_gnu() {
                Some(gnu) => (
                    gnu.atime().ok().filter(|&t| t != 0).map(|t| from_unix_parts(t as i64, 0)),
                    gnu.ctime().ok().filter(|&t| t != 0).map(|t| from_unix_parts(t as i64, 0)),
                ),
                None => (None, None),
            };

            let pax = PaxTimes::read(&mut tar_entry)?;
            entry.mtime = pax.mtime.unwrap_or(header_mtime);
            entry.atime = pax.atime.or(gnu_atime).unwrap_or(entry.mtime);
            entry.ctime = pax.ctime.or(gnu_ctime).unwrap_or(entry.mtime);

            if entry.is_regular() {
                entry.size = tar_entry.size();
                return Ok(Some(FsObject::with_data(entry, tar_entry)));
            }
            return Ok(Some(FsObject::new(entry)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::to_unix_nanos;

    fn append_file(builder: &mut tar::Builder<Vec<u8>>, name: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o640);
        header.set_uid(1000);
        header.set_gid(1000);
        header.set_mtime(1_600_000_000);
        header.set_entry_type(EntryType::Regular);
        builder.append_data(&mut header, name, data).unwrap();
    }

    fn append_special(builder: &mut tar::Builder<Vec<u8>>, name: &str, kind: EntryType, link: &str) {
        let mut header = tar::Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o755);
        header.set_uid(1000);
        header.set_gid(1000);
        header.set_mtime(1_600_000_000);
        header.set_entry_type(kind);
        if !link.is_empty() {
            header.set_link_name(link).unwrap();
        }
        builder.append_data(&mut header, name, io::empty()).unwrap();
    }

    #[test]
    fn test_tar_entries_are_mapped() {
        let mut builder = tar::Builder::new(Vec::new());
        append_special(&mut builder, "dir/", EntryType::Directory, "");
        append_file(&mut builder, "dir/file.txt", b"tar payload");
        append_special(&mut builder, "dir/link", EntryType::Symlink, "file.txt");
        append_special(&mut builder, "dir/hard", EntryType::Link, "dir/file.txt");
        append_special(&mut builder, "dir/fifo", EntryType::Fifo, "");
        let bytes = builder.into_inner().unwrap();

        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut source = TarSource::new(&mut archive).unwrap();
        let mut seen = Vec::new();
        while let Some(object) = source.next_object().unwrap() {
            let mut data = Vec::new();
            if let Some(mut reader) = object.data {
                reader.read_to_end(&mut data).unwrap();
            }
            seen.push((object.entry, data));
        }

        let names: Vec<&str> = seen.iter().map(|(e, _)| e.name.as_str()).collect();
        assert_eq!(names, ["dir", "dir/file.txt", "dir/link", "dir/fifo"]);

        let (file, data) = &seen[1];
        assert_eq!(data, b"tar payload");
        assert_eq!(file.size, 11);
        assert_eq!(file.permissions, 0o640);
        assert_eq!(file.uid, 1000);
        assert_eq!(to_unix_nanos(file.mtime), 1_600_000_000_000_000_000);

        assert_eq!(seen[2].0.linkname(), "file.txt");
        assert_eq!(seen[3].0.kind, EntryKind::Fifo);
    }

    #[test]
    fn test_blank_numeric_fields_read_as_zero() {
        let mut header = tar::Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o700);
        header.set_entry_type(EntryType::Directory);
        // uid, gid and mtime stay all-NUL
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_data(&mut header, "blank/", io::empty()).unwrap();
        let bytes = builder.into_inner().unwrap();

        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut source = TarSource::new(&mut archive).unwrap();
        let object = source.next_object().unwrap().unwrap();
        assert_eq!(object.entry.name, "blank");
        assert_eq!((object.entry.uid, object.entry.gid), (0, 0));
        assert_eq!(object.entry.permissions, 0o700);
        assert_eq!(to_unix_nanos(object.entry.mtime), 0);
    }

    #[test]
    fn test_garbage_numeric_field_is_an_error() {
        let mut header = tar::Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o700);
        header.set_entry_type(EntryType::Directory);
        header.as_old_mut().uid.copy_from_slice(b"zzzzzzz\0");
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_data(&mut header, "bad/", io::empty()).unwrap();
        let bytes = builder.into_inner().unwrap();

        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut source = TarSource::new(&mut archive).unwrap();
        assert!(matches!(source.next_object(), Err(StarError::Tar(_))));
    }

    #[test]
    fn test_unread_payload_is_skipped() {
        let mut builder = tar::Builder::new(Vec::new());
        append_file(&mut builder, "one", &[1u8; 2000]);
        append_file(&mut builder, "two", b"second");
        let bytes = builder.into_inner().unwrap();

        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut source = TarSource::new(&mut archive).unwrap();
        let first = source.next_object().unwrap().unwrap();
        assert_eq!(first.entry.name, "one");
        drop(first);

        let second = source.next_object().unwrap().unwrap();
        let mut data = Vec::new();
        second.data.unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, b"second");
    }

    #[test]
    fn test_parse_pax_time() {
        let t = parse_pax_time("1600000000.5").unwrap();
        assert_eq!(to_unix_nanos(t), 1_600_000_000_500_000_000);
        let t = parse_pax_time("12").unwrap();
        assert_eq!(to_unix_nanos(t), 12_000_000_000);
        let t = parse_pax_time("-1.25").unwrap();
        assert_eq!(to_unix_nanos(t), -1_250_000_000);
        assert!(parse_pax_time("abc").is_none());
    }
}
