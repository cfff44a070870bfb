//! Wire data model of the 9P2000.L subset a read-only client needs.

use bitflags::bitflags;
use enum_primitive::*;

/// 9P2000.L version string
pub const P92000L: &str = "9P2000.L";

/// What a server puts in `RVersion` when it speaks none of the offered dialects
pub const VERSION_UNKNOWN: &str = "unknown";

/// Tag reserved for the version handshake
pub const NOTAG: u16 = !0;

/// "No fid"; the `afid` of an unauthenticated `TAttach`
pub const NOFID: u32 = !0;

/// Tag used by every transaction after the version handshake.
///
/// Only one request is ever in flight on a session, so a single tag suffices.
pub const SESSION_TAG: u16 = 1;

/// Default msize proposed in `TVersion`
pub const DEFAULT_MSIZE: u32 = 0x2000;

/// Smallest msize a session accepts from the server
pub const MIN_MSIZE: u32 = 256;

/// Size of the common header: size[4] type[1] tag[2]
pub const HEADER_SIZE: u32 = 7;

/// Size of a qid on the wire: type[1] version[4] path[8]
pub const QID_SIZE: u32 = 13;

/// Bytes of an msize reserved for the `TRead`/`RRead` framing
pub const IOHDRSZ: u32 = 24;

/// Bytes of an msize reserved for the `TReadDir`/`RReadDir` framing
pub const READDIRHDRSZ: u32 = 24;

/// Longest symbolic link target accepted from `RReadLink`
pub const MAX_PATH: usize = 4096;

/// v9fs default port
pub const V9FS_PORT: u16 = 564;

/// Open flags for `TlOpen`, Linux `O_*` values
pub mod lopen {
    /// Open for reading only
    pub const RDONLY: u32 = 0x0000;
    /// Open for writing only
    pub const WRONLY: u32 = 0x0001;
    /// Open for reading and writing
    pub const RDWR: u32 = 0x0002;
    /// Mask for the access mode
    pub const ACCMODE: u32 = 0x0003;
}

bitflags! {
    /// Object kind bits carried in a qid
    #[derive(Copy, Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord)]
    pub struct QIdType: u8 {
        const DIR       = 0x80;
        const APPEND    = 0x40;
        const EXCL      = 0x20;
        const MOUNT     = 0x10;
        const AUTH      = 0x08;
        const TMP       = 0x04;
        const SYMLINK   = 0x02;
        const LINK      = 0x01;
        const FILE      = 0x00;
    }
}

bitflags! {
    /// Attribute groups requested by `TGetAttr` and reported back in `valid`
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub struct GetAttrMask: u64 {
        const MODE          = 0x00000001;
        const NLINK         = 0x00000002;
        const UID           = 0x00000004;
        const GID           = 0x00000008;
        const RDEV          = 0x00000010;
        const ATIME         = 0x00000020;
        const MTIME         = 0x00000040;
        const CTIME         = 0x00000080;
        const INO           = 0x00000100;
        const SIZE          = 0x00000200;
        const BLOCKS        = 0x00000400;

        const BTIME         = 0x00000800;
        const GEN           = 0x00001000;
        const DATA_VERSION  = 0x00002000;

        /// The `struct stat` groups
        const BASIC         = 0x000007ff;
        /// Everything, including birth time, generation and data version
        const ALL           = 0x00003fff;
    }
}

/// Server-side identity of a file.
///
/// Two qids name the same object iff their `path` matches; `version` only tells
/// whether it changed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct QId {
    pub typ: QIdType,
    /// Bumped by the server on modification
    pub version: u32,
    /// Unique within the export
    pub path: u64,
}

impl QId {
    /// Whether both qids refer to the same server-side object
    pub fn same_object(&self, other: &QId) -> bool {
        self.path == other.path
    }

    /// Whether `other` is the same object at a different version
    pub fn is_stale(&self, other: &QId) -> bool {
        self.same_object(other) && self.version != other.version
    }

    pub fn is_dir(&self) -> bool {
        self.typ.contains(QIdType::DIR)
    }

    pub fn is_symlink(&self) -> bool {
        self.typ.contains(QIdType::SYMLINK)
    }
}

/// Body of `RStatFs`, laid out like Linux `struct statfs`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct StatFs {
    pub typ: u32,
    /// Block size `blocks`, `bfree` and `bavail` are counted in
    pub bsize: u32,
    pub blocks: u64,
    pub bfree: u64,
    /// Free blocks available to unprivileged users
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub fsid: u64,
    pub namelen: u32,
}

/// Seconds and nanoseconds since the Unix epoch
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time {
    pub sec: u64,
    pub nsec: u64,
}

/// The `struct stat` part of `RGetAttr`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u64,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    /// Allocation in 512-byte units
    pub blocks: u64,
    pub atime: Time,
    pub mtime: Time,
    pub ctime: Time,
}

/// Complete attribute block carried by `RGetAttr`.
///
/// Fields outside of `valid` are whatever the server put on the wire; they are
/// decoded regardless of the mask.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attr {
    /// Which groups the server claims to have filled in
    pub valid: GetAttrMask,
    pub qid: QId,
    pub stat: Stat,
    /// Time of creation
    pub btime: Time,
    /// Inode generation number
    pub generation: u64,
    /// Data version
    pub data_version: u64,
}

/// One record of an `RReadDir` payload
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    pub qid: QId,
    /// Continuation cookie for the entry following this one
    pub offset: u64,
    /// `d_type` of `struct dirent`
    pub typ: u8,
    pub name: String,
}

impl DirEntry {
    /// Encoded length: qid, offset[8], type[1], name[s]
    pub fn size(&self) -> u32 {
        QID_SIZE + 8 + 1 + 2 + self.name.len() as u32
    }

    /// `.` and `..` entries
    pub fn is_dot(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// Entries of one `RReadDir`, in server order
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntryData {
    pub data: Vec<DirEntry>,
}

impl DirEntryData {
    pub fn new() -> DirEntryData {
        DirEntryData::default()
    }

    pub fn with(data: Vec<DirEntry>) -> DirEntryData {
        DirEntryData { data }
    }

    pub fn data(&self) -> &[DirEntry] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<DirEntry> {
        self.data
    }

    /// Encoded length of all entries, the `count` of `RReadDir`
    pub fn size(&self) -> u32 {
        self.data.iter().map(DirEntry::size).sum()
    }

    pub fn push(&mut self, entry: DirEntry) {
        self.data.push(entry);
    }
}

/// Payload of `RRead`
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Data(pub Vec<u8>);

enum_from_primitive! {
    #[doc = "Message ids of the supported subset"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub enum MsgType {
        // 9P2000.L
        TlError         = 6,
        RlError,
        TStatFs         = 8,
        RStatFs,
        TlOpen          = 12,
        RlOpen,
        TReadLink       = 22,
        RReadLink,
        TGetAttr        = 24,
        RGetAttr,
        TReadDir        = 40,
        RReadDir,

        // 9P2000
        TVersion        = 100,
        RVersion,
        TAttach         = 104,
        RAttach,
        TWalk           = 110,
        RWalk,
        TRead           = 116,
        RRead,
        TClunk          = 120,
        RClunk,
    }
}

impl MsgType {
    pub fn is_t(&self) -> bool {
        !self.is_r()
    }

    pub fn is_r(&self) -> bool {
        use crate::MsgType::*;

        matches!(
            *self,
            RlError
                | RStatFs
                | RlOpen
                | RReadLink
                | RGetAttr
                | RReadDir
                | RVersion
                | RAttach
                | RWalk
                | RRead
                | RClunk
        )
    }

    /// The response type a server answers this request with
    pub fn response(&self) -> Option<MsgType> {
        use crate::MsgType::*;

        match *self {
            TStatFs => Some(RStatFs),
            TlOpen => Some(RlOpen),
            TReadLink => Some(RReadLink),
            TGetAttr => Some(RGetAttr),
            TReadDir => Some(RReadDir),
            TVersion => Some(RVersion),
            TAttach => Some(RAttach),
            TWalk => Some(RWalk),
            TRead => Some(RRead),
            TClunk => Some(RClunk),
            _ => None,
        }
    }
}

impl<'a> From<&'a FCall> for MsgType {
    fn from(fcall: &'a FCall) -> MsgType {
        match *fcall {
            FCall::RlError { .. } => MsgType::RlError,
            FCall::TStatFs { .. } => MsgType::TStatFs,
            FCall::RStatFs { .. } => MsgType::RStatFs,
            FCall::TlOpen { .. } => MsgType::TlOpen,
            FCall::RlOpen { .. } => MsgType::RlOpen,
            FCall::TReadLink { .. } => MsgType::TReadLink,
            FCall::RReadLink { .. } => MsgType::RReadLink,
            FCall::TGetAttr { .. } => MsgType::TGetAttr,
            FCall::RGetAttr { .. } => MsgType::RGetAttr,
            FCall::TReadDir { .. } => MsgType::TReadDir,
            FCall::RReadDir { .. } => MsgType::RReadDir,
            FCall::TAttach { .. } => MsgType::TAttach,
            FCall::RAttach { .. } => MsgType::RAttach,
            FCall::TVersion { .. } => MsgType::TVersion,
            FCall::RVersion { .. } => MsgType::RVersion,
            FCall::TWalk { .. } => MsgType::TWalk,
            FCall::RWalk { .. } => MsgType::RWalk,
            FCall::TRead { .. } => MsgType::TRead,
            FCall::RRead { .. } => MsgType::RRead,
            FCall::TClunk { .. } => MsgType::TClunk,
            FCall::RClunk => MsgType::RClunk,
        }
    }
}

/// Message bodies of the supported subset
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FCall {
    // 9P2000.L
    RlError {
        ecode: u32,
    },
    TStatFs {
        fid: u32,
    },
    RStatFs {
        statfs: StatFs,
    },
    TlOpen {
        fid: u32,
        flags: u32,
    },
    RlOpen {
        qid: QId,
        iounit: u32,
    },
    TReadLink {
        fid: u32,
    },
    RReadLink {
        target: String,
    },
    TGetAttr {
        fid: u32,
        req_mask: GetAttrMask,
    },
    RGetAttr {
        attr: Attr,
    },
    TReadDir {
        fid: u32,
        offset: u64,
        count: u32,
    },
    RReadDir {
        data: DirEntryData,
    },

    // 9P2000.u
    TAttach {
        fid: u32,
        afid: u32,
        uname: String,
        aname: String,
    },
    RAttach {
        qid: QId,
    },

    // 9P2000
    TVersion {
        msize: u32,
        version: String,
    },
    RVersion {
        msize: u32,
        version: String,
    },
    TWalk {
        fid: u32,
        newfid: u32,
        wnames: Vec<String>,
    },
    RWalk {
        wqids: Vec<QId>,
    },
    TRead {
        fid: u32,
        offset: u64,
        count: u32,
    },
    RRead {
        data: Data,
    },
    TClunk {
        fid: u32,
    },
    RClunk,
}

/// A tagged message; responses echo the request's tag
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Msg {
    pub tag: u16,
    pub body: FCall,
}
