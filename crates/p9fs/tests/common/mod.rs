#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use p9fs::{
    serialize::{decode_frame, encode_frame},
    transport::{Endpoints, Transport},
    *,
};

pub const ENOENT: u32 = 2;
pub const EIO: u32 = 5;
pub const EBADF: u32 = 9;

#[derive(Clone, Debug)]
pub enum Node {
    File(Vec<u8>),
    Dir,
    Link(String),
}

struct Entry {
    qid: QId,
    node: Node,
}

struct Inner {
    msize: u32,
    version: String,
    tree: BTreeMap<String, Entry>,
    next_path: u64,
    fids: HashMap<u32, String>,
    requests: Vec<Msg>,
    reads: usize,
    fail_read: Option<usize>,
    failing: Option<MsgType>,
    wrong_tag: bool,
    closed: bool,
}

/// In-memory 9P2000.L export answering requests as they are transmitted
#[derive(Clone)]
pub struct FakeServer {
    inner: Arc<Mutex<Inner>>,
    fragment: usize,
    outbound: Vec<u8>,
}

impl FakeServer {
    pub fn new(msize: u32) -> FakeServer {
        let server = FakeServer {
            inner: Arc::new(Mutex::new(Inner {
                msize,
                version: P92000L.to_owned(),
                tree: BTreeMap::new(),
                next_path: 1,
                fids: HashMap::new(),
                requests: Vec::new(),
                reads: 0,
                fail_read: None,
                failing: None,
                wrong_tag: false,
                closed: false,
            })),
            fragment: usize::MAX,
            outbound: Vec::new(),
        };
        server.add("/", Node::Dir)
    }

    fn add(self, path: &str, node: Node) -> FakeServer {
        {
            let mut inner = self.inner.lock().unwrap();
            let typ = match node {
                Node::Dir => QIdType::DIR,
                Node::Link(_) => QIdType::SYMLINK,
                Node::File(_) => QIdType::FILE,
            };
            let qid = QId {
                typ,
                version: 0,
                path: inner.next_path,
            };
            inner.next_path += 1;
            inner.tree.insert(path.to_owned(), Entry { qid, node });
        }
        self
    }

    pub fn dir(self, path: &str) -> FakeServer {
        self.add(path, Node::Dir)
    }

    pub fn file(self, path: &str, data: &[u8]) -> FakeServer {
        self.add(path, Node::File(data.to_vec()))
    }

    pub fn link(self, path: &str, target: &str) -> FakeServer {
        self.add(path, Node::Link(target.to_owned()))
    }

    pub fn version(self, version: &str) -> FakeServer {
        self.inner.lock().unwrap().version = version.to_owned();
        self
    }

    /// Hand responses out at most `n` bytes per receive
    pub fn fragment(mut self, n: usize) -> FakeServer {
        self.fragment = n;
        self
    }

    /// Answer the `n`th read (1-based) with EIO
    pub fn fail_read(self, n: usize) -> FakeServer {
        self.inner.lock().unwrap().fail_read = Some(n);
        self
    }

    /// From now on answer every request of type `typ` with EIO. A failed clunk still
    /// releases its fid.
    pub fn fail(&self, typ: Option<MsgType>) {
        self.inner.lock().unwrap().failing = typ;
    }

    /// Answer every request after the handshake with the wrong tag
    pub fn wrong_tag(self) -> FakeServer {
        self.inner.lock().unwrap().wrong_tag = true;
        self
    }

    pub fn requests(&self) -> Vec<Msg> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.inner.lock().unwrap().requests.clear();
    }

    /// Fids the server currently considers established
    pub fn live_fids(&self) -> Vec<u32> {
        let mut fids: Vec<u32> = self.inner.lock().unwrap().fids.keys().copied().collect();
        fids.sort();
        fids
    }

    pub fn closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub async fn mount(&self, msize: u32) -> Result<Volume> {
        let mut config = Config::new("127.0.0.1:564".parse().unwrap());
        config.msize = msize;
        Volume::mount_with(Box::new(self.clone()), config).await
    }
}

impl Inner {
    fn answer(&mut self, msg: Msg) -> Msg {
        let tag = match msg.body {
            FCall::TVersion { .. } => msg.tag,
            _ if self.wrong_tag => msg.tag.wrapping_add(1),
            _ => msg.tag,
        };
        let body = match self.handle(msg.body) {
            Ok(body) => body,
            Err(ecode) => FCall::RlError { ecode },
        };
        Msg { tag, body }
    }

    fn lookup(&self, fid: u32) -> std::result::Result<(&String, &Entry), u32> {
        let path = self.fids.get(&fid).ok_or(EBADF)?;
        let entry = self.tree.get(path).ok_or(ENOENT)?;
        Ok((path, entry))
    }

    fn children(&self, dir: &str) -> Vec<(&String, &Entry)> {
        self.tree
            .iter()
            .filter(|(path, _)| path.as_str() != "/" && parent(path) == dir)
            .collect()
    }

    fn attr(entry: &Entry) -> Attr {
        let size = match entry.node {
            Node::File(ref data) => data.len() as u64,
            Node::Link(ref target) => target.len() as u64,
            Node::Dir => 4096,
        };
        let time = Time {
            sec: 1_600_000_000,
            nsec: 0,
        };
        Attr {
            valid: GetAttrMask::ALL,
            qid: entry.qid,
            stat: Stat {
                mode: if entry.qid.is_dir() { 0o40755 } else { 0o100644 },
                nlink: 1,
                size,
                blksize: 4096,
                blocks: size.div_ceil(512),
                atime: time,
                mtime: time,
                ctime: time,
                ..Stat::default()
            },
            btime: time,
            ..Attr::default()
        }
    }

    fn handle(&mut self, body: FCall) -> std::result::Result<FCall, u32> {
        if self.failing == Some(MsgType::from(&body)) {
            if let FCall::TClunk { fid } = body {
                self.fids.remove(&fid);
            }
            return Err(EIO);
        }
        match body {
            FCall::TVersion { msize, version } => {
                let version = if version == P92000L {
                    self.version.clone()
                } else {
                    VERSION_UNKNOWN.to_owned()
                };
                Ok(FCall::RVersion {
                    msize: self.msize.min(msize),
                    version,
                })
            }
            FCall::TAttach { fid, .. } => {
                self.fids.insert(fid, "/".to_owned());
                Ok(FCall::RAttach {
                    qid: self.tree["/"].qid,
                })
            }
            FCall::TWalk { fid, newfid, wnames } => {
                let mut path = self.lookup(fid)?.0.clone();
                let mut wqids = Vec::new();
                for name in &wnames {
                    let next = match name.as_str() {
                        ".." => parent(&path).to_owned(),
                        _ if path == "/" => format!("/{}", name),
                        _ => format!("{}/{}", path, name),
                    };
                    match self.tree.get(&next) {
                        Some(entry) => wqids.push(entry.qid),
                        None => break,
                    }
                    path = next;
                }
                if wqids.is_empty() && !wnames.is_empty() {
                    return Err(ENOENT);
                }
                if wqids.len() == wnames.len() {
                    self.fids.insert(newfid, path);
                }
                Ok(FCall::RWalk { wqids })
            }
            FCall::TlOpen { fid, .. } => {
                let qid = self.lookup(fid)?.1.qid;
                Ok(FCall::RlOpen { qid, iounit: 0 })
            }
            FCall::TRead { fid, offset, count } => {
                self.reads += 1;
                if self.fail_read == Some(self.reads) {
                    return Err(EIO);
                }
                match self.lookup(fid)?.1.node {
                    Node::File(ref data) => {
                        let start = (offset as usize).min(data.len());
                        let end = (start + count as usize).min(data.len());
                        Ok(FCall::RRead {
                            data: Data(data[start..end].to_vec()),
                        })
                    }
                    _ => Err(EBADF),
                }
            }
            FCall::TReadDir { fid, offset, count } => {
                let (path, entry) = self.lookup(fid)?;
                let parent_qid = self.tree[parent(path)].qid;
                let mut listing = vec![
                    (".".to_owned(), entry.qid),
                    ("..".to_owned(), parent_qid),
                ];
                for (child, entry) in self.children(path) {
                    listing.push((name(child).to_owned(), entry.qid));
                }

                let mut data = DirEntryData::new();
                for (i, (name, qid)) in listing.into_iter().enumerate().skip(offset as usize) {
                    let entry = DirEntry {
                        qid,
                        offset: i as u64 + 1,
                        typ: 0,
                        name,
                    };
                    if data.size() + entry.size() > count {
                        break;
                    }
                    data.push(entry);
                }
                Ok(FCall::RReadDir { data })
            }
            FCall::TReadLink { fid } => match self.lookup(fid)?.1.node {
                Node::Link(ref target) => Ok(FCall::RReadLink {
                    target: target.clone(),
                }),
                _ => Err(EBADF),
            },
            FCall::TGetAttr { fid, .. } => Ok(FCall::RGetAttr {
                attr: Self::attr(self.lookup(fid)?.1),
            }),
            FCall::TStatFs { fid } => {
                self.lookup(fid)?;
                Ok(FCall::RStatFs {
                    statfs: StatFs {
                        typ: 0x01021997,
                        bsize: 4096,
                        blocks: 1000,
                        bfree: 400,
                        bavail: 300,
                        files: 100,
                        ffree: 50,
                        fsid: 7,
                        namelen: 255,
                    },
                })
            }
            FCall::TClunk { fid } => match self.fids.remove(&fid) {
                Some(_) => Ok(FCall::RClunk),
                None => Err(EBADF),
            },
            _ => Err(EBADF),
        }
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn configure(&mut self, _: &Endpoints) -> Result<()> {
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn transmit(&mut self, buf: &[u8]) -> Result<()> {
        let msg = decode_frame(buf)?;
        let reply = {
            let mut inner = self.inner.lock().unwrap();
            inner.requests.push(msg.clone());
            inner.answer(msg)
        };
        self.outbound.extend_from_slice(&encode_frame(&reply)?);
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.fragment).min(self.outbound.len());
        buf[..n].copy_from_slice(&self.outbound[..n]);
        self.outbound.drain(..n);
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.lock().unwrap().closed = true;
        Ok(())
    }
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Message types of `requests`, in order
pub fn types(requests: &[Msg]) -> Vec<MsgType> {
    requests.iter().map(|m| MsgType::from(&m.body)).collect()
}
