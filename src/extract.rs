//! Materialize archive entries on a local filesystem

use crate::archive::{ArchiveReader, Entry, EntryKind, ReadAt};
use crate::error::{IoResultExt, Result, StarError};
use filetime::FileTime;
use nix::sys::stat::{makedev, mknod, Mode, SFlag};
use std::fs::{self, OpenOptions, Permissions};
use std::io::{self, Read};
use std::os::unix::fs::{lchown, symlink, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Extraction behaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Restore archived uid/gid (needs privileges)
    pub same_owner: bool,
    /// Replace existing files instead of failing
    pub overwrite: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            same_owner: nix::unistd::geteuid().is_root(),
            overwrite: false,
        }
    }
}

/// Directory metadata applied once everything inside it exists
struct PendingDir {
    path: PathBuf,
    depth: usize,
    permissions: u32,
    atime: SystemTime,
    mtime: SystemTime,
}

/// Writes entries below a root directory
pub struct Extractor {
    root: PathBuf,
    options: ExtractOptions,
    pending_dirs: Vec<PendingDir>,
}

impl Extractor {
    pub fn new(root: impl Into<PathBuf>, options: ExtractOptions) -> Self {
        Self {
            root: root.into(),
            options,
            pending_dirs: Vec::new(),
        }
    }

    /// Create one filesystem object for `entry`, reading regular file content from `data`.
    ///
    /// Directory permissions and times are held back until [`Extractor::finish`].
    pub fn extract_entry(&mut self, entry: &Entry, data: impl Read) -> Result<()> {
        let relative = match sanitize_name(&entry.name)? {
            Some(relative) => relative,
            None => {
                debug!(name = %entry.name, "skipping entry with empty path");
                return Ok(());
            }
        };
        self.reject_symlinked_parents(&relative)?;

        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }

        match &entry.kind {
            EntryKind::Directory => {
                self.make_room(&path)?;
                if is_symlink(&path) {
                    return Err(StarError::InvalidPath(relative.display().to_string()));
                }
                fs::create_dir_all(&path).with_path(&path)?;
                self.restore_owner(entry, &path)?;
                self.pending_dirs.push(PendingDir {
                    depth: relative.components().count(),
                    path,
                    permissions: entry.permissions,
                    atime: entry.atime,
                    mtime: entry.mtime,
                });
                debug!(name = %entry.name, "created directory");
                return Ok(());
            }
            EntryKind::Regular => {
                self.make_room(&path)?;
                let mut file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .with_path(&path)?;
                let mut data = data.take(entry.size);
                let copied = io::copy(&mut data, &mut file).with_path(&path)?;
                if copied != entry.size {
                    return Err(StarError::SizeMismatch {
                        name: entry.name.clone(),
                        declared: entry.size,
                        actual: copied,
                    });
                }
            }
            EntryKind::Symlink { target } => {
                self.make_room(&path)?;
                symlink(target, &path).with_path(&path)?;
            }
            EntryKind::CharDevice { major, minor } => {
                self.make_room(&path)?;
                make_node(&path, SFlag::S_IFCHR, entry.permissions, *major, *minor)?;
            }
            EntryKind::BlockDevice { major, minor } => {
                self.make_room(&path)?;
                make_node(&path, SFlag::S_IFBLK, entry.permissions, *major, *minor)?;
            }
            EntryKind::Fifo => {
                self.make_room(&path)?;
                nix::unistd::mkfifo(&path, Mode::from_bits_truncate(entry.permissions))
                    .map_err(io::Error::from)
                    .with_path(&path)?;
            }
        }

        self.restore_owner(entry, &path)?;
        if !matches!(entry.kind, EntryKind::Symlink { .. }) {
            // After chown, which clears setuid/setgid
            fs::set_permissions(&path, Permissions::from_mode(entry.permissions)).with_path(&path)?;
        }
        set_times(&path, entry.atime, entry.mtime)?;

        debug!(name = %entry.name, kind = %entry.kind.type_char(), "extracted");
        Ok(())
    }

    /// Apply held-back directory metadata, deepest directories first
    pub fn finish(mut self) -> Result<()> {
        self.pending_dirs.sort_by(|a, b| b.depth.cmp(&a.depth));
        for dir in &self.pending_dirs {
            // chmod follows symlinks; the path must still be the directory we made
            match fs::symlink_metadata(&dir.path) {
                Ok(meta) if meta.is_dir() => {}
                _ => return Err(StarError::InvalidPath(dir.path.display().to_string())),
            }
            fs::set_permissions(&dir.path, Permissions::from_mode(dir.permissions))
                .with_path(&dir.path)?;
            set_times(&dir.path, dir.atime, dir.mtime)?;
        }
        Ok(())
    }

    /// Extract every entry in index order
    pub fn extract_all<R: ReadAt>(self, reader: &ArchiveReader<R>) -> Result<usize> {
        self.extract_where(reader, |_| true)
    }

    /// Extract the named entries, plus everything below named directories
    pub fn extract_matching<R, S>(self, reader: &ArchiveReader<R>, names: &[S]) -> Result<usize>
    where
        R: ReadAt,
        S: AsRef<str>,
    {
        let wanted: Vec<&str> = names
            .iter()
            .map(|n| n.as_ref().trim_end_matches('/'))
            .collect();
        for w in &wanted {
            if !reader.list_entries().iter().any(|e| covers(w, &e.name)) {
                return Err(StarError::NotFound(w.to_string()));
            }
        }
        self.extract_where(reader, |entry| wanted.iter().any(|w| covers(w, &entry.name)))
    }

    fn extract_where<R, F>(mut self, reader: &ArchiveReader<R>, mut filter: F) -> Result<usize>
    where
        R: ReadAt,
        F: FnMut(&Entry) -> bool,
    {
        let mut count = 0;
        for entry in reader.list_entries() {
            // Shadowed duplicates: lookup by name serves the last one
            if !reader.entry(&entry.name).is_some_and(|e| std::ptr::eq(e, entry)) {
                warn!(name = %entry.name, "skipping shadowed duplicate entry");
                continue;
            }
            if !filter(entry) {
                continue;
            }
            let data = reader.open_sequential(&entry.name)?;
            self.extract_entry(entry, data)?;
            count += 1;
        }
        self.finish()?;
        Ok(count)
    }

    /// Refuse to write through a symlink created by an earlier entry
    fn reject_symlinked_parents(&self, relative: &Path) -> Result<()> {
        let mut current = self.root.clone();
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                break;
            }
            current.push(component);
            if is_symlink(&current) {
                return Err(StarError::InvalidPath(relative.display().to_string()));
            }
        }
        Ok(())
    }

    /// With `overwrite`, remove a non-directory already at `path`
    fn make_room(&self, path: &Path) -> Result<()> {
        if !self.options.overwrite {
            return Ok(());
        }
        match fs::symlink_metadata(path) {
            Ok(meta) if !meta.is_dir() => fs::remove_file(path).with_path(path),
            _ => Ok(()),
        }
    }

    fn restore_owner(&self, entry: &Entry, path: &Path) -> Result<()> {
        if !self.options.same_owner {
            return Ok(());
        }
        match lchown(path, Some(entry.uid), Some(entry.gid)) {
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(name = %entry.name, uid = entry.uid, gid = entry.gid, "cannot restore ownership");
                Ok(())
            }
            other => other.with_path(path),
        }
    }
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink())
}

/// `name` is `pattern` itself or lies below it
fn covers(pattern: &str, name: &str) -> bool {
    match name.strip_prefix(pattern) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Map an archive member name to a relative path below the extraction root.
///
/// Leading `/` and `.` components are dropped. `..` is rejected. Returns
/// `None` when nothing is left.
pub fn sanitize_name(name: &str) -> Result<Option<PathBuf>> {
    let mut path = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(StarError::InvalidPath(name.to_string()))
            }
        }
    }
    if path.as_os_str().is_empty() {
        return Ok(None);
    }
    Ok(Some(path))
}

fn make_node(path: &Path, kind: SFlag, permissions: u32, major: u32, minor: u32) -> Result<()> {
    let dev = makedev(major as u64, minor as u64);
    mknod(path, kind, Mode::from_bits_truncate(permissions), dev)
        .map_err(io::Error::from)
        .with_path(path)
}

/// Set atime and mtime without following symlinks
fn set_times(path: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()> {
    filetime::set_symlink_file_times(
        path,
        FileTime::from_system_time(atime),
        FileTime::from_system_time(mtime),
    )
    .with_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::from_unix_parts;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    fn options() -> ExtractOptions {
        ExtractOptions {
            same_owner: false,
            overwrite: false,
        }
    }

    fn file_entry(name: &str, size: u64) -> Entry {
        let mut entry = Entry::new(name, EntryKind::Regular, 0o640);
        entry.size = size;
        entry.mtime = from_unix_parts(1_500_000_000, 0);
        entry.atime = from_unix_parts(1_500_000_100, 0);
        entry
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(
            sanitize_name("/etc/passwd").unwrap(),
            Some(PathBuf::from("etc/passwd"))
        );
        assert_eq!(sanitize_name("./a/./b").unwrap(), Some(PathBuf::from("a/b")));
        assert_eq!(sanitize_name("/").unwrap(), None);
        assert!(matches!(
            sanitize_name("../escape"),
            Err(StarError::InvalidPath(_))
        ));
        assert!(matches!(
            sanitize_name("a/../../escape"),
            Err(StarError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_regular_file_metadata_restored() {
        let dir = TempDir::new().unwrap();
        let mut extractor = Extractor::new(dir.path(), options());
        extractor
            .extract_entry(&file_entry("nested/f.txt", 5), &b"hello"[..])
            .unwrap();
        extractor.finish().unwrap();

        // Check times before reading, which may bump atime
        let path = dir.path().join("nested/f.txt");
        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.mode() & 0o7777, 0o640);
        assert_eq!(meta.mtime(), 1_500_000_000);
        assert_eq!(meta.atime(), 1_500_000_100);
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn test_existing_file_needs_overwrite() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f"), b"old").unwrap();

        let mut extractor = Extractor::new(dir.path(), options());
        let err = extractor
            .extract_entry(&file_entry("f", 3), &b"new"[..])
            .unwrap_err();
        assert!(matches!(err, StarError::Io { .. }));

        let mut extractor = Extractor::new(
            dir.path(),
            ExtractOptions {
                overwrite: true,
                ..options()
            },
        );
        extractor
            .extract_entry(&file_entry("f", 3), &b"new"[..])
            .unwrap();
        assert_eq!(fs::read(dir.path().join("f")).unwrap(), b"new");
    }

    #[test]
    fn test_symlink_is_not_followed() {
        let dir = TempDir::new().unwrap();
        let mut extractor = Extractor::new(dir.path(), options());
        let mut link = Entry::new(
            "link",
            EntryKind::Symlink {
                target: "missing-target".to_string(),
            },
            0o777,
        );
        link.mtime = from_unix_parts(1_400_000_000, 0);
        extractor.extract_entry(&link, io::empty()).unwrap();

        let path = dir.path().join("link");
        assert_eq!(fs::read_link(&path).unwrap(), PathBuf::from("missing-target"));
        assert_eq!(fs::symlink_metadata(&path).unwrap().mtime(), 1_400_000_000);
    }

    #[test]
    fn test_write_through_symlink_is_rejected() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let mut extractor = Extractor::new(dir.path(), options());

        let link = Entry::new(
            "evil",
            EntryKind::Symlink {
                target: outside.path().to_str().unwrap().to_string(),
            },
            0o777,
        );
        extractor.extract_entry(&link, io::empty()).unwrap();

        let err = extractor
            .extract_entry(&file_entry("evil/owned", 1), &b"x"[..])
            .unwrap_err();
        assert!(matches!(err, StarError::InvalidPath(_)));
        assert!(!outside.path().join("owned").exists());
    }

    #[test]
    fn test_directory_metadata_applied_last() {
        let dir = TempDir::new().unwrap();
        let mut extractor = Extractor::new(dir.path(), options());

        let mut ro = Entry::new("ro", EntryKind::Directory, 0o555);
        ro.mtime = from_unix_parts(1_300_000_000, 0);
        extractor.extract_entry(&ro, io::empty()).unwrap();
        // Still writable until finish
        extractor
            .extract_entry(&file_entry("ro/inner", 2), &b"ok"[..])
            .unwrap();
        extractor.finish().unwrap();

        let meta = fs::metadata(dir.path().join("ro")).unwrap();
        assert_eq!(meta.mode() & 0o7777, 0o555);
        assert_eq!(meta.mtime(), 1_300_000_000);

        fs::set_permissions(dir.path().join("ro"), Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_fifo_created() {
        let dir = TempDir::new().unwrap();
        let mut extractor = Extractor::new(dir.path(), options());
        extractor
            .extract_entry(&Entry::new("pipe", EntryKind::Fifo, 0o600), io::empty())
            .unwrap();

        use std::os::unix::fs::FileTypeExt;
        let meta = fs::symlink_metadata(dir.path().join("pipe")).unwrap();
        assert!(meta.file_type().is_fifo());
    }

    #[test]
    fn test_short_data_is_size_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut extractor = Extractor::new(dir.path(), options());
        let err = extractor
            .extract_entry(&file_entry("short", 10), &b"abc"[..])
            .unwrap_err();
        assert!(matches!(
            err,
            StarError::SizeMismatch {
                declared: 10,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_directory_over_symlink_is_rejected() {
        let dir = TempDir::new().unwrap();
        let outside = dir.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::set_permissions(&outside, Permissions::from_mode(0o700)).unwrap();
        let root = dir.path().join("root");
        fs::create_dir(&root).unwrap();
        symlink(&outside, root.join("d")).unwrap();

        let mut extractor = Extractor::new(&root, options());
        let err = extractor
            .extract_entry(&Entry::new("d/", EntryKind::Directory, 0o777), io::empty())
            .unwrap_err();
        assert!(matches!(err, StarError::InvalidPath(name) if name == "d"));
        extractor.finish().unwrap();
        assert_eq!(fs::metadata(&outside).unwrap().mode() & 0o7777, 0o700);
    }

    #[test]
    fn test_finish_rejects_directory_swapped_for_symlink() {
        let dir = TempDir::new().unwrap();
        let outside = dir.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::set_permissions(&outside, Permissions::from_mode(0o700)).unwrap();
        let root = dir.path().join("root");

        let mut extractor = Extractor::new(&root, options());
        extractor
            .extract_entry(&Entry::new("d", EntryKind::Directory, 0o777), io::empty())
            .unwrap();
        // the directory is replaced by a link before its metadata is applied
        fs::remove_dir(root.join("d")).unwrap();
        symlink(&outside, root.join("d")).unwrap();

        assert!(matches!(extractor.finish(), Err(StarError::InvalidPath(_))));
        assert_eq!(fs::metadata(&outside).unwrap().mode() & 0o7777, 0o700);
    }
}
