//! Open file handles.
//!
//! A handle owns one fid. What `read` means depends on the qid type the fid was
//! established with: bytes for regular files, one directory entry per call for
//! directories, the link target for symbolic links.

use std::{collections::VecDeque, sync::Arc};

use log::{debug, error, warn};

use crate::{
    error::Error,
    fcall::{Attr, DirEntry, GetAttrMask, QId, lopen},
    info::{self, FileInfo, FsInfo},
    resolver::{self, Location},
    session::Session,
    utils::Result,
};

/// What a handle refers to, from its qid type
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
}

impl FileKind {
    pub fn of(qid: &QId) -> FileKind {
        if qid.is_dir() {
            FileKind::Directory
        } else if qid.is_symlink() {
            FileKind::Symlink
        } else {
            FileKind::Regular
        }
    }
}

/// Result of [`FileHandle::read`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Number of bytes copied into the buffer; 0 at end of file
    Data(usize),
    /// Next directory entry, `None` once the directory is exhausted
    Entry(Option<FileInfo>),
    /// Length of the link target copied into the buffer
    Link(usize),
}

pub struct FileHandle {
    session: Arc<Session>,
    root: Location,
    location: Location,
    path: String,
    kind: FileKind,
    position: u64,
    /// Fid opened for I/O; a clone of `location` for directories
    io_fid: Option<u32>,
    iounit: u32,
    attr: Option<Attr>,
    link_target: Option<String>,
    pending: VecDeque<DirEntry>,
    exhausted: bool,
}

impl FileHandle {
    /// Adopt an established fid; regular files are opened for reading right away.
    pub(crate) async fn establish(
        session: Arc<Session>,
        root: Location,
        location: Location,
        path: String,
    ) -> Result<FileHandle> {
        let mut handle = FileHandle {
            session,
            root,
            kind: FileKind::of(&location.qid),
            location,
            path,
            position: 0,
            io_fid: None,
            iounit: 0,
            attr: None,
            link_target: None,
            pending: VecDeque::new(),
            exhausted: false,
        };

        if handle.kind == FileKind::Regular {
            if let Err(e) = handle.ensure_open().await {
                handle.release(handle.location.fid).await;
                return Err(e);
            }
        }
        Ok(handle)
    }

    pub fn fid(&self) -> u32 {
        self.location.fid
    }

    pub fn qid(&self) -> QId {
        self.location.qid
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Server-advised I/O size once opened, 0 if none
    pub fn iounit(&self) -> u32 {
        self.iounit
    }

    /// Attributes from the last [`FileHandle::get_info`]
    pub fn cached_attr(&self) -> Option<&Attr> {
        self.attr.as_ref()
    }

    /// Open `path` relative to this handle, or from the volume root if it is absolute
    pub async fn open(&self, path: &str) -> Result<FileHandle> {
        if path.is_empty() {
            return Err(Error::InvalidParameter("empty path".to_owned()));
        }

        let location = resolver::resolve(&self.session, self.root, self.location, path).await?;
        let full = join(&self.path, path);
        debug!("open {:?} as fid {}", full, location.fid);
        FileHandle::establish(self.session.clone(), self.root, location, full).await
    }

    /// Read according to the handle's kind
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        match self.kind {
            FileKind::Regular => self.read_data(buf).await.map(ReadOutcome::Data),
            FileKind::Directory => self.read_entry().await.map(ReadOutcome::Entry),
            FileKind::Symlink => self.read_link(buf).await.map(ReadOutcome::Link),
        }
    }

    /// Fill `buf` from the current position in chunks of at most `msize - IOHDRSZ`.
    ///
    /// Stops early at end of file. On failure the position is restored to where the
    /// call started.
    pub async fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.kind != FileKind::Regular {
            return Err(Error::InvalidParameter(format!("{:?} is not a file", self.path)));
        }
        let fid = self.ensure_open().await?;

        let ceiling = self.session.read_ceiling() as usize;
        let start = self.position;
        let mut done = 0;
        while done < buf.len() {
            let want = ceiling.min(buf.len() - done);
            let data = match self
                .session
                .read(fid, self.position, want as u32)
                .await
            {
                Ok(data) => data,
                Err(e) => {
                    error!(
                        "read of {:?} failed at {}, rewinding to {}: {}",
                        self.path, self.position, start, e
                    );
                    self.position = start;
                    return Err(e);
                }
            };
            if data.is_empty() {
                break;
            }

            buf[done..done + data.len()].copy_from_slice(&data);
            done += data.len();
            self.position += data.len() as u64;
        }
        Ok(done)
    }

    /// Next directory entry other than `.` and `..`, `None` at the end.
    ///
    /// The handle's position tracks the continuation cookie of the last entry
    /// returned or skipped. An entry whose attributes cannot be fetched is kept and
    /// comes back on the next call.
    pub async fn read_entry(&mut self) -> Result<Option<FileInfo>> {
        if self.kind != FileKind::Directory {
            return Err(Error::InvalidParameter(format!("{:?} is not a directory", self.path)));
        }
        let fid = self.ensure_open().await?;

        loop {
            let entry = match self.pending.pop_front() {
                Some(entry) => entry,
                None if self.exhausted => return Ok(None),
                None => {
                    let count = self.session.readdir_ceiling();
                    let entries = self
                        .session
                        .readdir(fid, self.position, count)
                        .await?;
                    if entries.is_empty() {
                        self.exhausted = true;
                        return Ok(None);
                    }
                    self.pending.extend(entries);
                    continue;
                }
            };

            if entry.is_dot() {
                self.position = entry.offset;
                continue;
            }
            return match self.entry_info(&entry).await {
                Ok(info) => {
                    self.position = entry.offset;
                    Ok(Some(info))
                }
                Err(e) => {
                    self.pending.push_front(entry);
                    Err(e)
                }
            };
        }
    }

    async fn entry_info(&self, entry: &DirEntry) -> Result<FileInfo> {
        let fid = self.session.fids().next_fid();
        self.session
            .walk(self.location.fid, fid, &[entry.name.as_str()])
            .await?;

        let attr = self.session.getattr(fid, GetAttrMask::ALL).await;
        if let Err(e) = self.session.clunk(fid).await {
            warn!("clunk of entry fid {} failed: {}", fid, e);
        }
        Ok(FileInfo::from_attr(&entry.name, &attr?))
    }

    /// Copy the link target into `buf`, fetching it once per handle
    pub async fn read_link(&mut self, buf: &mut [u8]) -> Result<usize> {
        let target = self.link_target().await?;
        if buf.len() < target.len() {
            return Err(Error::BufferTooSmall {
                required: target.len(),
                capacity: buf.len(),
            });
        }

        let n = target.len();
        buf[..n].copy_from_slice(target.as_bytes());
        Ok(n)
    }

    pub async fn link_target(&mut self) -> Result<&str> {
        if self.kind != FileKind::Symlink {
            return Err(Error::InvalidParameter(format!("{:?} is not a link", self.path)));
        }
        if self.link_target.is_none() {
            self.link_target = Some(self.session.readlink(self.location.fid).await?);
        }
        Ok(self.link_target.as_deref().unwrap_or_default())
    }

    /// Fresh attributes as a [`FileInfo`]
    pub async fn get_info(&mut self) -> Result<FileInfo> {
        let attr = self
            .session
            .getattr(self.location.fid, GetAttrMask::ALL)
            .await?;
        self.attr = Some(attr);
        Ok(FileInfo::from_attr(info::file_name(&self.path), &attr))
    }

    pub async fn fs_info(&self) -> Result<FsInfo> {
        let statfs = self.session.statfs(self.location.fid).await?;
        Ok(FsInfo::from(&statfs))
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move a file to any offset; directories only rewind to 0
    pub fn set_position(&mut self, position: u64) -> Result<()> {
        if self.kind == FileKind::Directory {
            if position != 0 {
                return Err(Error::InvalidParameter(format!(
                    "directory position {}",
                    position
                )));
            }
            self.pending.clear();
            self.exhausted = false;
        }
        self.position = position;
        Ok(())
    }

    /// Accepted and discarded; the volume is read-only
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        debug!("ignoring {} byte write to {:?}", buf.len(), self.path);
        Ok(buf.len())
    }

    /// Nothing is ever buffered
    pub fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Accepted and ignored; the handle stays open
    pub fn delete(&mut self) -> Result<()> {
        debug!("ignoring delete of {:?}", self.path);
        Ok(())
    }

    /// Clunk every fid the handle holds, reporting the first failure
    pub async fn close(self) -> Result<()> {
        debug!("close {:?}", self.path);
        let io = match self.io_fid.filter(|fid| *fid != self.location.fid) {
            Some(fid) => self.session.clunk(fid).await,
            None => Ok(()),
        };
        let own = self.session.clunk(self.location.fid).await;
        io.and(own)
    }

    /// Open for reading on first use and return the fid to do I/O on.
    ///
    /// Directories are opened on a clone so the handle's own fid stays walkable.
    async fn ensure_open(&mut self) -> Result<u32> {
        if let Some(fid) = self.io_fid {
            return Ok(fid);
        }

        let fid = match self.kind {
            FileKind::Directory => {
                let clone = self.session.fids().next_fid();
                self.session.walk(self.location.fid, clone, &[]).await?;
                clone
            }
            _ => self.location.fid,
        };

        let (qid, iounit) = match self.session.lopen(fid, lopen::RDONLY).await {
            Ok(opened) => opened,
            Err(e) => {
                if fid != self.location.fid {
                    self.release(fid).await;
                }
                return Err(e);
            }
        };
        if !qid.same_object(&self.location.qid) {
            warn!("{:?} changed identity while opening", self.path);
        } else if qid.is_stale(&self.location.qid) {
            debug!("{:?} modified since it was walked", self.path);
        }
        if fid == self.location.fid {
            self.location.qid = qid;
        }
        self.iounit = iounit;
        self.io_fid = Some(fid);
        Ok(fid)
    }

    async fn release(&self, fid: u32) {
        if let Err(e) = self.session.clunk(fid).await {
            warn!("clunk of fid {} failed: {}", fid, e);
        }
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("fid", &self.location.fid)
            .field("kind", &self.kind)
            .field("position", &self.position)
            .finish()
    }
}

/// Path of `path` opened relative to `base`
fn join(base: &str, path: &str) -> String {
    if path.starts_with(['/', '\\']) || base.is_empty() {
        return path.to_owned();
    }
    format!("{}/{}", base.trim_end_matches(['/', '\\']), path)
}
