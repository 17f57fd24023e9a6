//! Producers of filesystem objects for the archive writer
//!
//! A [`Source`] is pulled one object at a time until it returns `None`.
//! Objects may borrow from their source, so each one must be consumed before
//! the next is requested.

mod local;
mod tar_stream;

pub use self::local::LocalSource;
pub use self::tar_stream::TarSource;

use crate::archive::{Entry, EntryKind};
use crate::error::{Result, StarError};
use std::collections::VecDeque;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Component, Path};

/// One filesystem object: its metadata plus content for regular files
///
/// `entry.size` is the number of bytes `data` will yield. The writer assigns
/// `entry.offset` itself.
pub struct FsObject<'a> {
    pub entry: Entry,
    pub data: Option<Box<dyn Read + 'a>>,
}

impl<'a> FsObject<'a> {
    /// Object without content (directories, links, devices)
    pub fn new(entry: Entry) -> Self {
        Self { entry, data: None }
    }

    pub fn with_data(entry: Entry, data: impl Read + 'a) -> Self {
        Self {
            entry,
            data: Some(Box::new(data)),
        }
    }
}

impl fmt::Debug for FsObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsObject")
            .field("entry", &self.entry)
            .field("data", &self.data.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Turn a filesystem or tar path into an archive member name.
///
/// Root and `.` components are dropped, so `/etc/./hosts` becomes
/// `etc/hosts`. Returns `None` when nothing is left. Parent components and
/// non UTF-8 names are rejected.
pub(crate) fn member_name(path: &Path) -> Result<Option<String>> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => return Err(StarError::InvalidPath(path.display().to_string())),
            },
            Component::ParentDir => {
                return Err(StarError::InvalidPath(path.display().to_string()))
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(parts.join("/")))
}

/// Pull-based sequence of filesystem objects
pub trait Source {
    /// Next object, or `None` once the sequence is exhausted
    fn next_object(&mut self) -> Result<Option<FsObject<'_>>>;
}

impl<S: Source + ?Sized> Source for &mut S {
    fn next_object(&mut self) -> Result<Option<FsObject<'_>>> {
        (**self).next_object()
    }
}

/// In-memory source, yielding objects in insertion order
#[derive(Debug, Default)]
pub struct MemorySource {
    objects: VecDeque<(Entry, Option<Vec<u8>>)>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an entry; for regular files `entry.size` is taken from `data`
    pub fn push(&mut self, mut entry: Entry, data: Option<Vec<u8>>) -> &mut Self {
        if let Some(bytes) = &data {
            entry.size = bytes.len() as u64;
        }
        self.objects.push_back((entry, data));
        self
    }

    pub fn add_file(&mut self, name: &str, data: Vec<u8>, permissions: u32) -> &mut Self {
        self.push(Entry::new(name, EntryKind::Regular, permissions), Some(data))
    }

    pub fn add_dir(&mut self, name: &str, permissions: u32) -> &mut Self {
        self.push(Entry::new(name, EntryKind::Directory, permissions), None)
    }

    pub fn add_symlink(&mut self, name: &str, target: &str) -> &mut Self {
        let kind = EntryKind::Symlink {
            target: target.to_string(),
        };
        self.push(Entry::new(name, kind, 0o777), None)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Source for MemorySource {
    fn next_object(&mut self) -> Result<Option<FsObject<'_>>> {
        Ok(self.objects.pop_front().map(|(entry, data)| match data {
            Some(bytes) => FsObject::with_data(entry, Cursor::new(bytes)),
            None => FsObject::new(entry),
        }))
    }
}
