use crate::archive::{from_unix_parts, Entry, EntryKind};
use crate::error::{IoResultExt, Result, StarError};
use crate::source::{member_name, FsObject, Source};
use std::collections::{HashSet, VecDeque};
use std::fs::{self, File, Metadata};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Source reading a local directory tree
///
/// Each input path is archived recursively; directories come before their
/// contents and siblings are visited in file name order. Symlinks are stored
/// as links, never followed.
pub struct LocalSource {
    base: Option<PathBuf>,
    roots: VecDeque<PathBuf>,
    walker: Option<walkdir::IntoIter>,
    excluded: HashSet<(u64, u64)>,
}

impl LocalSource {
    /// Archive `paths` in the order given, dropping repeats
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut seen = HashSet::new();
        let roots = paths
            .into_iter()
            .map(Into::into)
            .filter(|p: &PathBuf| seen.insert(p.clone()))
            .collect();

        Self {
            base: None,
            roots,
            walker: None,
            excluded: HashSet::new(),
        }
    }

    /// Resolve input paths against `dir`; member names stay relative to it
    pub fn with_base(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base = Some(dir.into());
        self
    }

    /// Never yield the file identified by `meta` (typically the archive being written)
    pub fn exclude(mut self, meta: &Metadata) -> Self {
        self.excluded.insert((meta.dev(), meta.ino()));
        self
    }

    fn start_root(&mut self, root: PathBuf) {
        if root.is_absolute() {
            warn!(path = %root.display(), "removing leading '/' from member names");
        }
        let walk_path = match &self.base {
            Some(base) => base.join(&root),
            None => root,
        };
        self.walker = Some(
            WalkDir::new(walk_path)
                .follow_links(false)
                .follow_root_links(false)
                .sort_by_file_name()
                .into_iter(),
        );
    }

    fn object_for(&self, path: &Path) -> Result<Option<FsObject<'static>>> {
        let relative = match &self.base {
            Some(base) => path.strip_prefix(base).unwrap_or(path),
            None => path,
        };
        let name = match member_name(relative)? {
            Some(name) => name,
            None => return Ok(None),
        };

        let meta = fs::symlink_metadata(path).with_path(path)?;
        if self.excluded.contains(&(meta.dev(), meta.ino())) {
            debug!(name = %name, "skipping excluded file");
            return Ok(None);
        }

        let kind = match kind_from_metadata(path, &meta)? {
            Some(kind) => kind,
            None => {
                warn!(name = %name, "skipping socket");
                return Ok(None);
            }
        };

        let mut entry = Entry::new(name, kind, meta.mode() & 0o7777);
        entry.uid = meta.uid();
        entry.gid = meta.gid();
        entry.mtime = from_unix_parts(meta.mtime(), meta.mtime_nsec());
        entry.atime = from_unix_parts(meta.atime(), meta.atime_nsec());
        entry.ctime = from_unix_parts(meta.ctime(), meta.ctime_nsec());

        if entry.is_regular() {
            entry.size = meta.len();
            let file = File::open(path).with_path(path)?;
            return Ok(Some(FsObject::with_data(entry, file)));
        }
        Ok(Some(FsObject::new(entry)))
    }
}

/// Map `lstat` metadata to an entry kind; `None` for sockets
fn kind_from_metadata(path: &Path, meta: &Metadata) -> Result<Option<EntryKind>> {
    let ft = meta.file_type();
    let kind = if ft.is_file() {
        EntryKind::Regular
    } else if ft.is_dir() {
        EntryKind::Directory
    } else if ft.is_symlink() {
        let target = fs::read_link(path).with_path(path)?;
        let target = target
            .to_str()
            .ok_or_else(|| StarError::InvalidPath(target.display().to_string()))?;
        EntryKind::Symlink {
            target: target.to_string(),
        }
    } else if ft.is_block_device() {
        let (major, minor) = device_numbers(meta);
        EntryKind::BlockDevice { major, minor }
    } else if ft.is_char_device() {
        let (major, minor) = device_numbers(meta);
        EntryKind::CharDevice { major, minor }
    } else if ft.is_fifo() {
        EntryKind::Fifo
    } else {
        return Ok(None);
    };
    Ok(Some(kind))
}

fn device_numbers(meta: &Metadata) -> (u32, u32) {
    let rdev = meta.rdev();
    (
        nix::sys::stat::major(rdev) as u32,
        nix::sys::stat::minor(rdev) as u32,
    )
}

impl Source for LocalSource {
    fn next_object(&mut self) -> Result<Option<FsObject<'_>>> {
        loop {
            let next = match self.walker.as_mut() {
                Some(walker) => walker.next(),
                None => match self.roots.pop_front() {
                    Some(root) => {
                        self.start_root(root);
                        continue;
                    }
                    None => return Ok(None),
                },
            };

            match next {
                Some(Ok(dent)) => {
                    if let Some(object) = self.object_for(dent.path())? {
                        return Ok(Some(object));
                    }
                }
                Some(Err(e)) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    return Err(StarError::Io {
                        path,
                        source: e.into(),
                    });
                }
                None => self.walker = None,
            }
        }
    }
}
