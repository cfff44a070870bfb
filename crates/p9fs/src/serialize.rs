//! Little-endian wire codec for the 9P2000.L subset.
//!
//! Every message travels as `size[4] type[1] tag[2] body`, little-endian, where `size`
//! counts the whole message including itself. [`encode_frame`] produces such a frame and
//! [`decode_frame`] parses one back. [`frame_codec`] and [`raw_frame_codec`] cut a byte
//! stream into messages.

use crate::{error::Error, fcall::*, io_err, res};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, BytesMut};
use num_traits::FromPrimitive;
use std::io::{Cursor, Read, Result};
use std::mem;
use std::ops::{Shl, Shr};
use tokio_util::codec::{Encoder as _, LengthDelimitedCodec};

macro_rules! decode {
    ($decoder:expr) => {
        Decodable::decode(&mut $decoder)?
    };

    ($typ:ident, $buf:expr) => {
        $typ::from_bits_truncate(decode!($buf))
    };
}

/// Read `size` bytes announced by a count on the wire. The buffer grows with the bytes
/// actually present, so a bogus count costs no more than the frame that carries it.
fn read_exact<R: Read>(r: &mut R, size: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.by_ref().take(size as u64).read_to_end(&mut buf)?;
    if buf.len() != size {
        return res!(io_err!(
            UnexpectedEof,
            format!("Count of {} bytes overruns the message", size)
        ));
    }
    Ok(buf)
}

/// Result of an `<<`/`>>` chain; the first failure short-circuits the rest
pub struct SResult<T>(::std::io::Result<T>);

impl<W> SResult<Encoder<W>> {
    /// Total bytes written by the chain, or its first error
    pub fn written(self) -> Result<usize> {
        self.0.map(|enc| enc.bytes_written())
    }
}

impl<R> SResult<Decoder<R>> {
    pub fn done(self) -> Result<()> {
        self.0.map(|_| ())
    }
}

/// Writer side of the `<<` chain, counting bytes as it goes
#[derive(Clone, Debug)]
pub struct Encoder<W> {
    writer: W,
    bytes: usize,
}

impl<W: WriteBytesExt> Encoder<W> {
    pub fn new(writer: W) -> Encoder<W> {
        Encoder { writer, bytes: 0 }
    }

    /// `encoder << data` without the chain
    pub fn encode<T: Encodable>(&mut self, data: &T) -> Result<usize> {
        let bytes = data.encode(&mut self.writer)?;
        self.bytes += bytes;
        Ok(bytes)
    }
}

impl<W> Encoder<W> {
    pub fn bytes_written(&self) -> usize {
        self.bytes
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for Encoder<W> {
    type Output = SResult<Encoder<W>>;
    fn shl(self, rhs: &'a T) -> Self::Output {
        SResult(Ok(self)) << rhs
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for SResult<Encoder<W>> {
    type Output = Self;
    fn shl(self, rhs: &'a T) -> Self::Output {
        SResult(self.0.and_then(|mut encoder| {
            encoder.encode(rhs)?;
            Ok(encoder)
        }))
    }
}

/// Reader side of the `>>` chain
#[derive(Clone, Debug)]
pub struct Decoder<R> {
    reader: R,
}

impl<R: ReadBytesExt> Decoder<R> {
    pub fn new(reader: R) -> Decoder<R> {
        Decoder { reader }
    }

    pub fn decode<T: Decodable>(&mut self) -> Result<T> {
        Decodable::decode(&mut self.reader)
    }
}

impl<'a, T: Decodable, R: ReadBytesExt> Shr<&'a mut T> for Decoder<R> {
    type Output = SResult<Decoder<R>>;
    fn shr(self, rhs: &'a mut T) -> Self::Output {
        SResult(Ok(self)) >> rhs
    }
}

impl<'a, T: Decodable, R: ReadBytesExt> Shr<&'a mut T> for SResult<Decoder<R>> {
    type Output = Self;
    fn shr(self, rhs: &'a mut T) -> Self::Output {
        SResult(self.0.and_then(|mut decoder| {
            *rhs = decoder.decode()?;
            Ok(decoder)
        }))
    }
}

/// Types with a 9P wire encoding
pub trait Encodable {
    /// Write `self` to `w`, returning the bytes written
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize>;
}

impl Encodable for u8 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u8(*self).and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u16 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u16::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u32 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u32::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u64 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u64::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for String {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        if self.len() > u16::MAX as usize {
            return res!(io_err!(InvalidInput, "String longer than 65535 bytes"));
        }
        let bytes = (self.len() as u16).encode(w)?;
        w.write_all(self.as_bytes())?;
        Ok(bytes + self.len())
    }
}

impl Encodable for QId {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w) << &self.typ.bits() << &self.version << &self.path).written()
    }
}

impl Encodable for StatFs {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w)
            << &self.typ
            << &self.bsize
            << &self.blocks
            << &self.bfree
            << &self.bavail
            << &self.files
            << &self.ffree
            << &self.fsid
            << &self.namelen)
            .written()
    }
}

impl Encodable for Time {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w) << &self.sec << &self.nsec).written()
    }
}

impl Encodable for Stat {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w)
            << &self.mode
            << &self.uid
            << &self.gid
            << &self.nlink
            << &self.rdev
            << &self.size
            << &self.blksize
            << &self.blocks
            << &self.atime
            << &self.mtime
            << &self.ctime)
            .written()
    }
}

impl Encodable for Attr {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w)
            << &self.valid.bits()
            << &self.qid
            << &self.stat
            << &self.btime
            << &self.generation
            << &self.data_version)
            .written()
    }
}

impl Encodable for DirEntry {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w) << &self.qid << &self.offset << &self.typ << &self.name).written()
    }
}

impl Encodable for DirEntryData {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        self.data()
            .iter()
            .fold(Encoder::new(w) << &self.size(), |acc, e| acc << e)
            .written()
    }
}

impl Encodable for Data {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let size = self.0.len();
        let bytes = (size as u32).encode(w)? + size;
        w.write_all(&self.0)?;
        Ok(bytes)
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        self.iter()
            .fold(Encoder::new(w) << &(self.len() as u16), |acc, s| acc << s)
            .written()
    }
}

/// Encodes `type[1] tag[2] body`; the leading size is left to the framing layer
impl Encodable for Msg {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        use crate::FCall::*;

        let typ = MsgType::from(&self.body);
        let buf = Encoder::new(w) << &(typ as u8) << &self.tag;

        let buf = match self.body {
            RlError { ref ecode } => buf << ecode,
            TStatFs { ref fid } => buf << fid,
            RStatFs { ref statfs } => buf << statfs,
            TlOpen { ref fid, ref flags } => buf << fid << flags,
            RlOpen {
                ref qid,
                ref iounit,
            } => buf << qid << iounit,
            TReadLink { ref fid } => buf << fid,
            RReadLink { ref target } => buf << target,
            TGetAttr {
                ref fid,
                ref req_mask,
            } => buf << fid << &req_mask.bits(),
            RGetAttr { ref attr } => buf << attr,
            TReadDir {
                ref fid,
                ref offset,
                ref count,
            } => buf << fid << offset << count,
            RReadDir { ref data } => buf << data,
            TAttach {
                ref fid,
                ref afid,
                ref uname,
                ref aname,
            } => buf << fid << afid << uname << aname,
            RAttach { ref qid } => buf << qid,
            TVersion {
                ref msize,
                ref version,
            }
            | RVersion {
                ref msize,
                ref version,
            } => buf << msize << version,
            TWalk {
                ref fid,
                ref newfid,
                ref wnames,
            } => buf << fid << newfid << wnames,
            RWalk { ref wqids } => buf << wqids,
            TRead {
                ref fid,
                ref offset,
                ref count,
            } => buf << fid << offset << count,
            RRead { ref data } => buf << data,
            TClunk { ref fid } => buf << fid,
            RClunk => buf,
        };

        buf.written()
    }
}

/// Types that can be read back from their 9P wire encoding
pub trait Decodable: Sized {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self>;
}

impl Decodable for u8 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u8()
    }
}

impl Decodable for u16 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u16::<LittleEndian>()
    }
}

impl Decodable for u32 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u32::<LittleEndian>()
    }
}

impl Decodable for u64 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u64::<LittleEndian>()
    }
}

impl Decodable for String {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        String::from_utf8(read_exact(r, len as usize)?)
            .map_err(|_| io_err!(InvalidData, "Invalid UTF-8 sequence"))
    }
}

impl Decodable for QId {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(QId {
            typ: decode!(QIdType, *r),
            version: decode!(*r),
            path: decode!(*r),
        })
    }
}

impl Decodable for StatFs {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let mut statfs = StatFs::default();
        (Decoder::new(r)
            >> &mut statfs.typ
            >> &mut statfs.bsize
            >> &mut statfs.blocks
            >> &mut statfs.bfree
            >> &mut statfs.bavail
            >> &mut statfs.files
            >> &mut statfs.ffree
            >> &mut statfs.fsid
            >> &mut statfs.namelen)
            .done()?;
        Ok(statfs)
    }
}

impl Decodable for Time {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(Time {
            sec: decode!(*r),
            nsec: decode!(*r),
        })
    }
}

impl Decodable for Stat {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let mut stat = Stat::default();
        (Decoder::new(r)
            >> &mut stat.mode
            >> &mut stat.uid
            >> &mut stat.gid
            >> &mut stat.nlink
            >> &mut stat.rdev
            >> &mut stat.size
            >> &mut stat.blksize
            >> &mut stat.blocks
            >> &mut stat.atime
            >> &mut stat.mtime
            >> &mut stat.ctime)
            .done()?;
        Ok(stat)
    }
}

impl Decodable for Attr {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(Attr {
            valid: decode!(GetAttrMask, *r),
            qid: decode!(*r),
            stat: decode!(*r),
            btime: decode!(*r),
            generation: decode!(*r),
            data_version: decode!(*r),
        })
    }
}

impl Decodable for DirEntry {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(DirEntry {
            qid: decode!(*r),
            offset: decode!(*r),
            typ: decode!(*r),
            name: decode!(*r),
        })
    }
}

/// The count prefix of `RReadDir` is a byte count, not an entry count
impl Decodable for DirEntryData {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let count: u32 = decode!(*r);
        let mut cursor = Cursor::new(read_exact(r, count as usize)?);
        let mut data = DirEntryData::new();
        while (cursor.position() as usize) < cursor.get_ref().len() {
            data.push(decode!(cursor));
        }
        Ok(data)
    }
}

impl Decodable for Data {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u32 = decode!(*r);
        Ok(Data(read_exact(r, len as usize)?))
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u16 = decode!(*r);
        (0..len).map(|_| Decodable::decode(&mut *r)).collect()
    }
}

/// Decode a protocol string into a destination of `capacity` bytes.
///
/// Fails with [`Error::BufferTooSmall`] when the encoded length exceeds `capacity`,
/// leaving the reader positioned just after the length prefix.
pub fn decode_bounded_string<R: ReadBytesExt>(r: &mut R, capacity: usize) -> crate::Result<String> {
    let len: u16 = Decodable::decode(r).map_err(Error::Decode)?;
    if len as usize > capacity {
        return Err(Error::BufferTooSmall {
            required: len as usize,
            capacity,
        });
    }
    let raw = read_exact(r, len as usize).map_err(Error::Decode)?;
    String::from_utf8(raw).map_err(|_| Error::Decode(io_err!(InvalidData, "Invalid UTF-8 sequence")))
}

impl Decodable for Msg {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        use crate::MsgType::*;

        let mut buf = r;

        let msg_type = MsgType::from_u8(decode!(buf));
        let tag = decode!(buf);
        let body = match msg_type {
            Some(RlError) => FCall::RlError {
                ecode: decode!(buf),
            },
            Some(TStatFs) => FCall::TStatFs { fid: decode!(buf) },
            Some(RStatFs) => FCall::RStatFs {
                statfs: decode!(buf),
            },
            Some(TlOpen) => FCall::TlOpen {
                fid: decode!(buf),
                flags: decode!(buf),
            },
            Some(RlOpen) => FCall::RlOpen {
                qid: decode!(buf),
                iounit: decode!(buf),
            },
            Some(TReadLink) => FCall::TReadLink { fid: decode!(buf) },
            Some(RReadLink) => FCall::RReadLink {
                target: decode!(buf),
            },
            Some(TGetAttr) => FCall::TGetAttr {
                fid: decode!(buf),
                req_mask: decode!(GetAttrMask, buf),
            },
            Some(RGetAttr) => FCall::RGetAttr { attr: decode!(buf) },
            Some(TReadDir) => FCall::TReadDir {
                fid: decode!(buf),
                offset: decode!(buf),
                count: decode!(buf),
            },
            Some(RReadDir) => FCall::RReadDir { data: decode!(buf) },
            Some(TAttach) => FCall::TAttach {
                fid: decode!(buf),
                afid: decode!(buf),
                uname: decode!(buf),
                aname: decode!(buf),
            },
            Some(RAttach) => FCall::RAttach { qid: decode!(buf) },
            Some(TVersion) => FCall::TVersion {
                msize: decode!(buf),
                version: decode!(buf),
            },
            Some(RVersion) => FCall::RVersion {
                msize: decode!(buf),
                version: decode!(buf),
            },
            Some(TWalk) => FCall::TWalk {
                fid: decode!(buf),
                newfid: decode!(buf),
                wnames: decode!(buf),
            },
            Some(RWalk) => FCall::RWalk {
                wqids: decode!(buf),
            },
            Some(TRead) => FCall::TRead {
                fid: decode!(buf),
                offset: decode!(buf),
                count: decode!(buf),
            },
            Some(RRead) => FCall::RRead { data: decode!(buf) },
            Some(TClunk) => FCall::TClunk { fid: decode!(buf) },
            Some(RClunk) => FCall::RClunk,
            Some(TlError) | None => return res!(io_err!(InvalidData, "Invalid message type")),
        };

        Ok(Msg { tag, body })
    }
}

/// Length-delimited framing for 9P: a 4-byte little-endian size that counts itself.
///
/// Frames yielded by the decoder carry `type[1] tag[2] body` only; the encoder
/// prepends the size.
pub fn frame_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(-4)
        .max_frame_length(max_frame_length)
        .little_endian()
        .new_codec()
}

/// Like [`frame_codec`], but decoded frames keep the size field so callers see the
/// message exactly as it was received.
pub fn raw_frame_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(0)
        .num_skip(0)
        .max_frame_length(max_frame_length)
        .little_endian()
        .new_codec()
}

/// Serialize `msg` into a complete frame, size field included
pub fn encode_frame(msg: &Msg) -> Result<BytesMut> {
    let mut writer = BytesMut::with_capacity(HEADER_SIZE as usize).writer();
    msg.encode(&mut writer)?;
    let body = writer.into_inner().freeze();

    let mut frame = BytesMut::with_capacity(body.len() + 4);
    frame_codec(u32::MAX as usize).encode(body, &mut frame)?;
    Ok(frame)
}

/// Parse a complete frame, size field included
pub fn decode_frame(frame: &[u8]) -> Result<Msg> {
    let mut cursor = Cursor::new(frame);
    let size: u32 = decode!(cursor);
    if size as usize != frame.len() {
        return res!(io_err!(
            InvalidData,
            format!("Frame size {} does not match {} bytes", size, frame.len())
        ));
    }

    let msg = read_msg(&mut cursor)?;
    if (cursor.position() as usize) != frame.len() {
        return res!(io_err!(InvalidData, "Trailing bytes after message body"));
    }
    Ok(msg)
}

/// Read `type[1] tag[2] body` from `r`
pub fn read_msg<R: ReadBytesExt>(r: &mut R) -> Result<Msg> {
    Decodable::decode(r)
}

/// Write `type[1] tag[2] body` to `w`
pub fn write_msg<W: WriteBytesExt>(w: &mut W, msg: &Msg) -> Result<usize> {
    msg.encode(w)
}
