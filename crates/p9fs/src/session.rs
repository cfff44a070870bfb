//! 9P2000.L session: version handshake and the per-message operations.
//!
//! Every operation is a single transaction: encode the request, run it through the
//! transport, check the tag and message id, decode. A response carrying another id is
//! handed to [`error::map_response`](crate::error::map_response).
//!
//! Only one transaction is in flight at a time. The transport sits behind an async mutex
//! held for the whole exchange, which is what makes the fixed [`SESSION_TAG`] safe.

use std::{io::Cursor, time::Duration};

use byteorder::{ByteOrder, LittleEndian};
use bytes::BytesMut;
use log::{debug, warn};
use tokio::sync::Mutex;

use crate::{
    error::{self, Error},
    fcall::*,
    fid::FidAllocator,
    io_err,
    serialize::{self, decode_bounded_string},
    transaction::transact,
    transport::Transport,
    utils::Result,
};

/// An established (or establishing) connection to one 9P server
pub struct Session {
    transport: Mutex<Box<dyn Transport>>,
    msize: u32,
    version: String,
    timeout: Option<Duration>,
    fids: FidAllocator,
}

impl Session {
    /// Wrap a connected transport. Call [`Session::version`] before anything else.
    pub fn new(transport: Box<dyn Transport>, timeout: Option<Duration>) -> Session {
        Session {
            transport: Mutex::new(transport),
            msize: DEFAULT_MSIZE,
            version: String::new(),
            timeout,
            fids: FidAllocator::new(),
        }
    }

    /// Negotiated maximum message size
    pub fn msize(&self) -> u32 {
        self.msize
    }

    /// Negotiated protocol version, empty before the handshake
    pub fn version_string(&self) -> &str {
        &self.version
    }

    pub fn fids(&self) -> &FidAllocator {
        &self.fids
    }

    /// Largest payload a single `TRead` can return
    pub fn read_ceiling(&self) -> u32 {
        self.msize - IOHDRSZ
    }

    /// Largest payload a single `TReadDir` can return
    pub fn readdir_ceiling(&self) -> u32 {
        self.msize - READDIRHDRSZ
    }

    /// Propose `msize` and 9P2000.L; adopt the server's msize on success.
    pub async fn version(&mut self, msize: u32) -> Result<u32> {
        if msize < MIN_MSIZE {
            return Err(Error::InvalidParameter(format!("msize {}", msize)));
        }

        let request = FCall::TVersion {
            msize,
            version: P92000L.to_owned(),
        };
        let (server_msize, version) = match self.call(NOTAG, request, msize).await? {
            FCall::RVersion { msize, version } => (msize, version),
            other => return Err(unexpected(MsgType::RVersion, &other)),
        };

        if version != P92000L {
            warn!("server speaks {:?}", version);
            return Err(Error::UnsupportedVersion(version));
        }
        if server_msize < MIN_MSIZE {
            return Err(Error::Decode(io_err!(
                InvalidData,
                format!("server msize {} is unusable", server_msize)
            )));
        }

        self.msize = server_msize.min(msize);
        self.version = version;
        debug!("negotiated {} with msize {}", self.version, self.msize);
        Ok(self.msize)
    }

    /// Attach a fresh fid to the root of `aname` without authentication
    pub async fn attach(&self, uname: &str, aname: &str) -> Result<(u32, QId)> {
        let fid = self.fids.next_fid();
        let request = FCall::TAttach {
            fid,
            afid: NOFID,
            uname: uname.to_owned(),
            aname: aname.to_owned(),
        };
        match self.rpc(request).await? {
            FCall::RAttach { qid } => Ok((fid, qid)),
            other => Err(unexpected(MsgType::RAttach, &other)),
        }
    }

    /// Walk `fid` through `wnames` into `newfid` in one transaction.
    ///
    /// `newfid` is only established when every component resolved; a short `RWalk`
    /// is reported as not-found.
    pub async fn walk(&self, fid: u32, newfid: u32, wnames: &[&str]) -> Result<Vec<QId>> {
        let request = FCall::TWalk {
            fid,
            newfid,
            wnames: wnames.iter().map(|s| (*s).to_owned()).collect(),
        };
        let wqids = match self.rpc(request).await? {
            FCall::RWalk { wqids } => wqids,
            other => return Err(unexpected(MsgType::RWalk, &other)),
        };

        if wqids.len() > wnames.len() {
            return Err(Error::Decode(io_err!(
                InvalidData,
                format!("{} qids for {} names", wqids.len(), wnames.len())
            )));
        }
        if wqids.len() < wnames.len() {
            debug!("walk stopped after {} of {:?}", wqids.len(), wnames);
            return Err(Error::Server(error::ServerError::NotFound));
        }
        Ok(wqids)
    }

    pub async fn lopen(&self, fid: u32, flags: u32) -> Result<(QId, u32)> {
        match self.rpc(FCall::TlOpen { fid, flags }).await? {
            FCall::RlOpen { qid, iounit } => Ok((qid, iounit)),
            other => Err(unexpected(MsgType::RlOpen, &other)),
        }
    }

    /// Fetch attributes; every field is taken as sent regardless of `valid`
    pub async fn getattr(&self, fid: u32, req_mask: GetAttrMask) -> Result<Attr> {
        match self.rpc(FCall::TGetAttr { fid, req_mask }).await? {
            FCall::RGetAttr { attr } => Ok(attr),
            other => Err(unexpected(MsgType::RGetAttr, &other)),
        }
    }

    pub async fn statfs(&self, fid: u32) -> Result<StatFs> {
        match self.rpc(FCall::TStatFs { fid }).await? {
            FCall::RStatFs { statfs } => Ok(statfs),
            other => Err(unexpected(MsgType::RStatFs, &other)),
        }
    }

    /// Read up to `count` bytes at `offset`; `count` is capped to what fits in msize.
    ///
    /// The result may be shorter than requested. Empty means end of file.
    pub async fn read(&self, fid: u32, offset: u64, count: u32) -> Result<Vec<u8>> {
        let count = count.min(self.read_ceiling());
        let data = match self.rpc(FCall::TRead { fid, offset, count }).await? {
            FCall::RRead { data } => data.0,
            other => return Err(unexpected(MsgType::RRead, &other)),
        };

        if data.len() > count as usize {
            return Err(Error::Decode(io_err!(
                InvalidData,
                format!("{} bytes returned for a {} byte read", data.len(), count)
            )));
        }
        Ok(data)
    }

    /// Read directory entries starting at the continuation cookie `offset`.
    ///
    /// Empty means the end of the directory.
    pub async fn readdir(&self, fid: u32, offset: u64, count: u32) -> Result<Vec<DirEntry>> {
        let count = count.min(self.readdir_ceiling());
        match self.rpc(FCall::TReadDir { fid, offset, count }).await? {
            FCall::RReadDir { data } => Ok(data.into_inner()),
            other => Err(unexpected(MsgType::RReadDir, &other)),
        }
    }

    /// Symbolic link target, at most [`MAX_PATH`] bytes
    pub async fn readlink(&self, fid: u32) -> Result<String> {
        let frame = self
            .transaction(SESSION_TAG, FCall::TReadLink { fid }, self.msize)
            .await?;
        let mut body = Cursor::new(&frame[HEADER_SIZE as usize..]);
        let target = decode_bounded_string(&mut body, MAX_PATH)?;
        debug!("\t← RReadLink {{ target: {:?} }}", target);
        Ok(target)
    }

    pub async fn clunk(&self, fid: u32) -> Result<()> {
        match self.rpc(FCall::TClunk { fid }).await? {
            FCall::RClunk => Ok(()),
            other => Err(unexpected(MsgType::RClunk, &other)),
        }
    }

    /// Shut the transport down
    pub async fn shutdown(&self) -> Result<()> {
        self.transport.lock().await.close().await
    }

    async fn rpc(&self, body: FCall) -> Result<FCall> {
        self.call(SESSION_TAG, body, self.msize).await
    }

    async fn call(&self, tag: u16, body: FCall, capacity: u32) -> Result<FCall> {
        let frame = self.transaction(tag, body, capacity).await?;
        let msg = serialize::decode_frame(&frame).map_err(Error::Decode)?;
        debug!("\t← {:?}", msg);
        Ok(msg.body)
    }

    /// Run one exchange and return the response frame once its tag and id check out
    async fn transaction(&self, tag: u16, body: FCall, capacity: u32) -> Result<BytesMut> {
        let typ = MsgType::from(&body);
        let expected = typ.response().ok_or_else(|| {
            Error::InvalidParameter(format!("{:?} is not a request", typ))
        })?;

        let msg = Msg { tag, body };
        let request = serialize::encode_frame(&msg)
            .map_err(|e| Error::InvalidParameter(e.to_string()))?;
        if request.len() > self.msize.max(capacity) as usize {
            return Err(Error::InvalidParameter(format!(
                "{:?} needs {} bytes, msize is {}",
                typ,
                request.len(),
                self.msize
            )));
        }
        debug!("\t→ {:?}", msg);

        let response = {
            let mut transport = self.transport.lock().await;
            transact(&mut **transport, &request, capacity as usize, self.timeout).await?
        };

        let got_tag = LittleEndian::read_u16(&response[5..7]);
        if got_tag != tag {
            return Err(Error::TagMismatch {
                expected: tag,
                got: got_tag,
            });
        }

        let got = response[4];
        if got == expected as u8 {
            return Ok(response);
        }
        if got == MsgType::RlError as u8 {
            if let Err(e) = error::map_response(&response) {
                warn!("{:?}: {}", typ, e);
                return Err(e);
            }
        }
        Err(Error::UnexpectedResponse { expected, got })
    }
}

fn unexpected(expected: MsgType, body: &FCall) -> Error {
    Error::UnexpectedResponse {
        expected,
        got: MsgType::from(body) as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Endpoints;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex as StdMutex};

    /// Answers each request with the next canned response, keeping what was sent
    struct Canned {
        sent: Arc<StdMutex<Vec<Msg>>>,
        replies: VecDeque<Vec<u8>>,
        pending: Vec<u8>,
    }

    #[async_trait]
    impl Transport for Canned {
        async fn configure(&mut self, _: &Endpoints) -> Result<()> {
            Ok(())
        }

        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn transmit(&mut self, buf: &[u8]) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(serialize::decode_frame(buf).unwrap());
            self.pending = self.replies.pop_front().unwrap_or_default();
            Ok(())
        }

        async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    fn frame(tag: u16, body: FCall) -> Vec<u8> {
        serialize::encode_frame(&Msg { tag, body }).unwrap().to_vec()
    }

    fn session(replies: Vec<Vec<u8>>) -> (Session, Arc<StdMutex<Vec<Msg>>>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let transport = Canned {
            sent: sent.clone(),
            replies: replies.into(),
            pending: Vec::new(),
        };
        (Session::new(Box::new(transport), None), sent)
    }

    fn rversion(msize: u32, version: &str) -> Vec<u8> {
        frame(
            NOTAG,
            FCall::RVersion {
                msize,
                version: version.to_owned(),
            },
        )
    }

    #[tokio::test]
    async fn version_adopts_server_msize() {
        let (mut s, sent) = session(vec![rversion(8192, P92000L)]);
        assert_eq!(s.version(65536).await.unwrap(), 8192);
        assert_eq!(s.msize(), 8192);
        assert_eq!(s.version_string(), P92000L);

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].tag, NOTAG);
        assert_eq!(
            sent[0].body,
            FCall::TVersion {
                msize: 65536,
                version: P92000L.to_owned()
            }
        );
    }

    #[tokio::test]
    async fn version_mismatch_is_fatal() {
        let (mut s, _) = session(vec![rversion(8192, "9P2000.u")]);
        match s.version(8192).await {
            Err(Error::UnsupportedVersion(v)) => assert_eq!(v, "9P2000.u"),
            other => panic!("unexpected {:?}", other),
        }

        let (mut s, _) = session(vec![rversion(8192, VERSION_UNKNOWN)]);
        assert!(matches!(
            s.version(8192).await,
            Err(Error::UnsupportedVersion(_))
        ));
    }

    #[tokio::test]
    async fn tag_mismatch() {
        let (mut s, _) = session(vec![
            rversion(8192, P92000L),
            frame(7, FCall::RClunk),
        ]);
        s.version(8192).await.unwrap();
        match s.clunk(3).await {
            Err(Error::TagMismatch { expected, got }) => assert_eq!((expected, got), (1, 7)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn rlerror_goes_through_mapper() {
        let (mut s, _) = session(vec![
            rversion(8192, P92000L),
            frame(SESSION_TAG, FCall::RlError { ecode: 2 }),
            frame(SESSION_TAG, FCall::RlError { ecode: 0 }),
            frame(SESSION_TAG, FCall::RAttach { qid: QId::default() }),
        ]);
        s.version(8192).await.unwrap();

        assert!(s.clunk(3).await.unwrap_err().is_not_found());
        assert!(matches!(
            s.clunk(3).await,
            Err(Error::UnexpectedResponse {
                expected: MsgType::RClunk,
                got: 7
            })
        ));
        assert!(matches!(
            s.clunk(3).await,
            Err(Error::UnexpectedResponse {
                expected: MsgType::RClunk,
                got: 105
            })
        ));
    }

    #[tokio::test]
    async fn attach_uses_nofid_afid() {
        let root = QId {
            typ: QIdType::DIR,
            version: 0,
            path: 1,
        };
        let (mut s, sent) = session(vec![
            rversion(8192, P92000L),
            frame(SESSION_TAG, FCall::RAttach { qid: root }),
        ]);
        s.version(8192).await.unwrap();
        let (fid, qid) = s.attach("root", "/export").await.unwrap();
        assert_eq!(fid, 1);
        assert!(qid.is_dir());

        let sent = sent.lock().unwrap();
        assert_eq!(
            sent[1].body,
            FCall::TAttach {
                fid: 1,
                afid: NOFID,
                uname: "root".to_owned(),
                aname: "/export".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn read_is_capped_to_msize() {
        let (mut s, sent) = session(vec![
            rversion(1024, P92000L),
            frame(
                SESSION_TAG,
                FCall::RRead {
                    data: Data(vec![1; 10]),
                },
            ),
        ]);
        s.version(1024).await.unwrap();
        assert_eq!(s.read(5, 0, 1 << 20).await.unwrap().len(), 10);

        let sent = sent.lock().unwrap();
        assert_eq!(
            sent[1].body,
            FCall::TRead {
                fid: 5,
                offset: 0,
                count: 1024 - IOHDRSZ
            }
        );
    }

    #[tokio::test]
    async fn payload_count_beyond_frame_is_a_decode_error() {
        // size 11, then a count of 0xFFFFFFF0 with no payload behind it
        let bogus = |typ: MsgType| vec![11, 0, 0, 0, typ as u8, 1, 0, 0xF0, 0xFF, 0xFF, 0xFF];
        let (mut s, _) = session(vec![
            rversion(8192, P92000L),
            bogus(MsgType::RRead),
            bogus(MsgType::RReadDir),
        ]);
        s.version(8192).await.unwrap();
        assert!(matches!(s.read(5, 0, 100).await, Err(Error::Decode(_))));
        assert!(matches!(s.readdir(5, 0, 100).await, Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn short_walk_is_not_found() {
        let (mut s, _) = session(vec![
            rversion(8192, P92000L),
            frame(
                SESSION_TAG,
                FCall::RWalk {
                    wqids: vec![QId::default()],
                },
            ),
        ]);
        s.version(8192).await.unwrap();
        assert!(s.walk(1, 2, &["a", "b"]).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn readlink_bounded() {
        let long = "x".repeat(MAX_PATH + 1);
        let (mut s, _) = session(vec![
            rversion(8192, P92000L),
            frame(SESSION_TAG, FCall::RReadLink { target: "../lib".to_owned() }),
            frame(SESSION_TAG, FCall::RReadLink { target: long }),
        ]);
        s.version(8192).await.unwrap();
        assert_eq!(s.readlink(4).await.unwrap(), "../lib");
        match s.readlink(4).await {
            Err(Error::BufferTooSmall { required, capacity }) => {
                assert_eq!((required, capacity), (MAX_PATH + 1, MAX_PATH));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn oversized_request_never_hits_the_wire() {
        let (mut s, sent) = session(vec![rversion(256, P92000L)]);
        s.version(256).await.unwrap();
        let name = "n".repeat(300);
        assert!(matches!(
            s.walk(1, 2, &[&name]).await,
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(sent.lock().unwrap().len(), 1);
    }
}
