//! Human and machine readable archive listings

use crate::archive::{to_unix_nanos, Entry, EntryKind};
use crate::error::Result;
use chrono::{DateTime, Local};
use humansize::{FormatSize, BINARY};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::SystemTime;

/// Which timestamp a long listing shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeField {
    #[default]
    Mtime,
    Atime,
    Ctime,
}

impl TimeField {
    fn pick(self, entry: &Entry) -> SystemTime {
        match self {
            TimeField::Mtime => entry.mtime,
            TimeField::Atime => entry.atime,
            TimeField::Ctime => entry.ctime,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// `ls -l` style lines
    pub long: bool,
    /// Print only the last path component
    pub basename: bool,
    /// Sizes in KiB/MiB/...
    pub human: bool,
    pub time: TimeField,
}

/// Format one listing line (without trailing newline)
pub fn format_entry(entry: &Entry, opts: &ListOptions) -> String {
    let name = if opts.basename {
        basename(&entry.name)
    } else {
        &entry.name
    };
    if !opts.long {
        return name.to_string();
    }

    let size = match entry.kind {
        EntryKind::CharDevice { major, minor } | EntryKind::BlockDevice { major, minor } => {
            format!("{},{}", major, minor)
        }
        _ if opts.human => entry.size.format_size(BINARY),
        _ => entry.size.to_string(),
    };

    let mut line = format!(
        "{}{} {} {}\t{}\t{} {}",
        entry.kind.type_char(),
        format_permissions(entry.permissions),
        entry.uid,
        entry.gid,
        size,
        format_time(opts.time.pick(entry)),
        name
    );
    if let EntryKind::Symlink { target } = &entry.kind {
        line.push_str(" -> ");
        line.push_str(target);
    }
    line
}

fn basename(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name)
}

/// `rwxr-xr-x` including setuid/setgid/sticky markers
pub fn format_permissions(permissions: u32) -> String {
    let mut s = String::with_capacity(9);
    for (shift, special, set, unset) in [(6, 0o4000, 's', 'S'), (3, 0o2000, 's', 'S'), (0, 0o1000, 't', 'T')] {
        let bits = (permissions >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        let exec = bits & 0o1 != 0;
        s.push(match (permissions & special != 0, exec) {
            (true, true) => set,
            (true, false) => unset,
            (false, true) => 'x',
            (false, false) => '-',
        });
    }
    s
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// JSON view of one index entry
#[derive(Serialize)]
struct EntryRecord<'a> {
    name: &'a str,
    #[serde(flatten)]
    kind: &'a EntryKind,
    mode: String,
    uid: u32,
    gid: u32,
    offset: u64,
    size: u64,
    mtime_ns: i64,
    atime_ns: i64,
    ctime_ns: i64,
}

impl<'a> From<&'a Entry> for EntryRecord<'a> {
    fn from(entry: &'a Entry) -> Self {
        Self {
            name: &entry.name,
            kind: &entry.kind,
            mode: format!("{:04o}", entry.permissions),
            uid: entry.uid,
            gid: entry.gid,
            offset: entry.offset,
            size: entry.size,
            mtime_ns: to_unix_nanos(entry.mtime),
            atime_ns: to_unix_nanos(entry.atime),
            ctime_ns: to_unix_nanos(entry.ctime),
        }
    }
}

/// The whole index as a pretty-printed JSON array
pub fn entries_to_json(entries: &[Entry]) -> Result<String> {
    let records: Vec<EntryRecord<'_>> = entries.iter().map(EntryRecord::from).collect();
    Ok(serde_json::to_string_pretty(&records)?)
}
