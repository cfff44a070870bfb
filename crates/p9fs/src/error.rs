//! Local error taxonomy and the mapping from `RlError` responses onto it.

use std::{fmt, io};

use byteorder::{ByteOrder, LittleEndian};
use nix::errno::Errno;

use crate::fcall::{HEADER_SIZE, MsgType};

/// Size of an `RlError` message: header plus `ecode[4]`
pub const RLERROR_SIZE: usize = HEADER_SIZE as usize + 4;

/// Error kind a server reported through `RlError`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServerError {
    PermissionDenied,
    NotFound,
    Io,
    /// Any code outside the fixed table, carried as received
    Device(u32),
}

impl ServerError {
    /// Classify a non-zero Linux errno value
    pub fn from_ecode(ecode: u32) -> ServerError {
        match Errno::from_raw(ecode as i32) {
            Errno::EPERM => ServerError::PermissionDenied,
            Errno::ENOENT => ServerError::NotFound,
            Errno::EIO => ServerError::Io,
            _ => ServerError::Device(ecode),
        }
    }

    pub fn errno(&self) -> Errno {
        match *self {
            ServerError::PermissionDenied => Errno::EPERM,
            ServerError::NotFound => Errno::ENOENT,
            ServerError::Io => Errno::EIO,
            ServerError::Device(_) => Errno::ENODEV,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ServerError::PermissionDenied => write!(f, "permission denied"),
            ServerError::NotFound => write!(f, "not found"),
            ServerError::Io => write!(f, "i/o error"),
            ServerError::Device(ecode) => write!(f, "device error (ecode {})", ecode),
        }
    }
}

/// The error type used in this library
#[derive(Debug)]
pub enum Error {
    /// Send/receive failure or refused connection
    Transport(io::Error),
    /// Server answered the handshake with another protocol version
    UnsupportedVersion(String),
    /// Response id is neither the expected one nor a usable `RlError`
    UnexpectedResponse { expected: MsgType, got: u8 },
    /// Response tag differs from the request tag
    TagMismatch { expected: u16, got: u16 },
    /// Malformed response body
    Decode(io::Error),
    /// Error reported by the server
    Server(ServerError),
    /// Destination cannot hold the result; `required` is what it would take
    BufferTooSmall { required: usize, capacity: usize },
    OutOfResources,
    /// Input rejected before any wire activity
    InvalidParameter(String),
    /// A transaction did not complete within the configured timeout
    TimedOut,
}

impl Error {
    /// Get an errno representation
    pub fn errno(&self) -> Errno {
        match *self {
            Error::Transport(ref e) | Error::Decode(ref e) => io_error_to_errno(e),
            Error::UnsupportedVersion(_) => Errno::EPROTONOSUPPORT,
            Error::UnexpectedResponse { .. } | Error::TagMismatch { .. } => Errno::EPROTO,
            Error::Server(ref e) => e.errno(),
            Error::BufferTooSmall { .. } => Errno::ERANGE,
            Error::OutOfResources => Errno::ENOMEM,
            Error::InvalidParameter(_) => Errno::EINVAL,
            Error::TimedOut => Errno::ETIMEDOUT,
        }
    }

    /// Whether the server said the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(*self, Error::Server(ServerError::NotFound))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Transport(ref e) => write!(f, "transport: {}", e),
            Error::UnsupportedVersion(ref v) => write!(f, "unsupported protocol version {:?}", v),
            Error::UnexpectedResponse { expected, got } => {
                write!(f, "expected {:?}, received message type {}", expected, got)
            }
            Error::TagMismatch { expected, got } => {
                write!(f, "tag mismatch: sent {:#06x}, received {:#06x}", expected, got)
            }
            Error::Decode(ref e) => write!(f, "malformed response: {}", e),
            Error::Server(ref e) => write!(f, "server: {}", e),
            Error::BufferTooSmall { required, capacity } => {
                write!(f, "buffer too small: {} bytes required, {} available", required, capacity)
            }
            Error::OutOfResources => write!(f, "out of resources"),
            Error::InvalidParameter(ref what) => write!(f, "invalid parameter: {}", what),
            Error::TimedOut => write!(f, "transaction timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Transport(ref e) | Error::Decode(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Transport(e)
    }
}

impl From<ServerError> for Error {
    fn from(e: ServerError) -> Self {
        Error::Server(e)
    }
}

fn io_error_to_errno(e: &io::Error) -> Errno {
    if let Some(raw) = e.raw_os_error() {
        return Errno::from_raw(raw);
    }
    match e.kind() {
        io::ErrorKind::UnexpectedEof => Errno::ECONNRESET,
        io::ErrorKind::InvalidData => Errno::EPROTO,
        io::ErrorKind::TimedOut => Errno::ETIMEDOUT,
        _ => Errno::EIO,
    }
}

/// Interpret a whole response frame that did not carry the expected message id.
///
/// The frame is read as `RlError`: ecode 0 is success, the fixed table maps the
/// rest. A frame too short to hold an `RlError` yields `BufferTooSmall`.
pub fn map_response(frame: &[u8]) -> crate::Result<()> {
    if frame.len() < RLERROR_SIZE {
        return Err(Error::BufferTooSmall {
            required: RLERROR_SIZE,
            capacity: frame.len(),
        });
    }

    match LittleEndian::read_u32(&frame[HEADER_SIZE as usize..RLERROR_SIZE]) {
        0 => Ok(()),
        ecode => Err(Error::Server(ServerError::from_ecode(ecode))),
    }
}
