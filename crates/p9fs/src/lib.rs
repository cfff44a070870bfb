#![forbid(unsafe_code)]
//! Asynchronous, read-only 9P2000.L filesystem client for Rust.
//!
//! This crate connects to a 9P2000.L server (diod, QEMU's virtfs)
//! over TCP and exposes the export as a tree of read-only file handles.
//!
//! # Overview
//!
//! The stack is layered bottom-up:
//!
//! - [`fcall`] and [`serialize`]: the wire data model and its little-endian codec
//! - [`transport`]: the byte stream a session talks over
//! - [`transaction`]: one request/response exchange on that stream
//! - [`session`]: version handshake and the per-message operations
//! - [`resolver`]: turns a path into a fid, one walk per component
//! - [`file`] and [`volume`]: the host-facing surface
//!
//! # Example
//!
//! ```no_run
//! use p9fs::{Config, Result, Volume, file::ReadOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::new("10.0.2.2:564".parse().unwrap());
//!     let volume = Volume::mount(config).await?;
//!
//!     let mut root = volume.open_volume().await?;
//!     while let ReadOutcome::Entry(Some(entry)) = root.read(&mut []).await? {
//!         println!("{} {}", entry.file_size, entry.file_name);
//!     }
//!     root.close().await?;
//!
//!     let mut hosts = volume.open("/etc/hosts").await?;
//!     let mut buf = vec![0; 4096];
//!     let n = hosts.read_data(&mut buf).await?;
//!     print!("{}", String::from_utf8_lossy(&buf[..n]));
//!     hosts.close().await?;
//!
//!     volume.unmount().await
//! }
//! ```
//!
//! # Protocol Details
//!
//! ## Message Flow
//!
//! 1. **Version Negotiation**: `TVersion` with `NOTAG`; the server's msize becomes the
//!    session's upper bound for every later message
//! 2. **Attach**: `TAttach` with `afid = NOFID`, no authentication
//! 3. **Walk**: one `TWalk` per path component; a zero-name walk clones a fid
//! 4. **Operations**: `TlOpen`, `TRead`, `TReadDir`, `TReadLink`, `TGetAttr`, `TStatFs`
//! 5. **Cleanup**: `TClunk` for every fid the client established
//!
//! ## Fid Management
//!
//! Fids come from a per-session counter starting at 1 and are not reused until it wraps.
//! The resolver clunks every intermediate fid it creates, on success and on failure, so
//! a caller only ever owns the final one.
//!
//! # Error Handling
//!
//! Everything returns [`Result`], whose error is [`Error`]. `RlError` responses are
//! classified by [`error::map_response`]: `EPERM`, `ENOENT` and `EIO` get their own
//! [`ServerError`] kinds, anything else is reported as a device error carrying the code.
//!
//! # Concurrency
//!
//! A session runs one transaction at a time under a fixed tag. Handles may be used
//! from several tasks; their transactions are serialized.
pub mod config;
pub mod error;
pub mod fcall;
pub mod fid;
pub mod file;
pub mod info;
pub mod resolver;
pub mod serialize;
pub mod session;
pub mod transaction;
pub mod transport;
#[macro_use]
pub mod utils;
pub mod volume;

pub use crate::config::Config;
pub use crate::error::{Error, ServerError};
pub use crate::fcall::*;
pub use crate::file::{FileHandle, FileKind, ReadOutcome};
pub use crate::info::{FileInfo, FsInfo};
pub use crate::utils::Result;
pub use crate::volume::Volume;
