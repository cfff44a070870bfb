//! Host-facing views of `RGetAttr` and `RStatFs`.

use bitflags::bitflags;
use chrono::{DateTime, Utc};

use crate::fcall::{Attr, StatFs, Time};

/// Label every mounted volume reports
pub const VOLUME_LABEL: &str = "9P";

/// Unit of `Stat::blocks`
pub const STAT_BLOCK_SIZE: u64 = 512;

bitflags! {
    /// Attribute bits of a [`FileInfo`]
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct FileAttributes: u64 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
    }
}

/// Per-file information as presented to a host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    /// Last path component; empty for the volume root
    pub file_name: String,
    pub file_size: u64,
    /// Bytes allocated on the server
    pub physical_size: u64,
    /// Status change time; 9P2000.L servers seldom fill in a birth time
    pub create_time: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
    pub modification_time: DateTime<Utc>,
    pub attribute: FileAttributes,
}

impl FileInfo {
    pub fn from_attr(file_name: &str, attr: &Attr) -> FileInfo {
        let mut attribute = FileAttributes::READ_ONLY;
        if attr.qid.is_dir() {
            attribute |= FileAttributes::DIRECTORY;
        }

        FileInfo {
            file_name: file_name.to_owned(),
            file_size: attr.stat.size,
            physical_size: attr.stat.blocks.saturating_mul(STAT_BLOCK_SIZE),
            create_time: to_datetime(attr.stat.ctime),
            last_access_time: to_datetime(attr.stat.atime),
            modification_time: to_datetime(attr.stat.mtime),
            attribute,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.attribute.contains(FileAttributes::DIRECTORY)
    }
}

/// Volume-wide information
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsInfo {
    pub volume_size: u64,
    pub free_space: u64,
    pub block_size: u32,
    pub read_only: bool,
    pub volume_label: String,
}

impl From<&StatFs> for FsInfo {
    fn from(statfs: &StatFs) -> FsInfo {
        let bsize = statfs.bsize as u64;
        FsInfo {
            volume_size: bsize.saturating_mul(statfs.blocks),
            free_space: bsize.saturating_mul(statfs.bfree),
            block_size: statfs.bsize,
            read_only: true,
            volume_label: VOLUME_LABEL.to_owned(),
        }
    }
}

/// Epoch seconds and nanoseconds as a UTC calendar time.
///
/// Values chrono cannot represent collapse to the epoch.
pub fn to_datetime(time: Time) -> DateTime<Utc> {
    i64::try_from(time.sec)
        .ok()
        .zip(u32::try_from(time.nsec).ok())
        .and_then(|(sec, nsec)| DateTime::from_timestamp(sec, nsec))
        .unwrap_or_default()
}

/// Last component of `path`, ignoring trailing separators
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
}
