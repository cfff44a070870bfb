//! One request/response exchange over a [`Transport`].

use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use bytes::BytesMut;
use log::trace;
use tokio_util::codec::Decoder as _;

use crate::{
    error::Error,
    fcall::HEADER_SIZE,
    io_err, res,
    serialize::raw_frame_codec,
    transport::Transport,
    utils::Result,
};

/// Send `request` and collect exactly one response frame of at most `capacity` bytes.
///
/// Receives stop as soon as the response's own size field is satisfied; nothing past
/// the frame is read. The returned buffer holds the whole message, size field included.
pub async fn transact(
    transport: &mut (dyn Transport + '_),
    request: &[u8],
    capacity: usize,
    timeout: Option<Duration>,
) -> Result<BytesMut> {
    let exchange = exchange(transport, request, capacity);
    match timeout {
        Some(limit) => tokio::time::timeout(limit, exchange)
            .await
            .map_err(|_| Error::TimedOut)?,
        None => exchange.await,
    }
}

async fn exchange(
    transport: &mut (dyn Transport + '_),
    request: &[u8],
    capacity: usize,
) -> Result<BytesMut> {
    transport.transmit(request).await?;

    let mut codec = raw_frame_codec(capacity);
    let mut acc = BytesMut::with_capacity(HEADER_SIZE as usize);
    loop {
        let wanted = match acc.len() {
            n if n < 4 => 4 - n,
            n => {
                let size = LittleEndian::read_u32(&acc[..4]) as usize;
                if size > capacity {
                    return Err(Error::BufferTooSmall {
                        required: size,
                        capacity,
                    });
                }
                if size < HEADER_SIZE as usize {
                    return Err(Error::Decode(io_err!(
                        InvalidData,
                        format!("response size {} is shorter than a header", size)
                    )));
                }
                if let Some(frame) = codec.decode(&mut acc).map_err(Error::Decode)? {
                    return Ok(frame);
                }
                size - n
            }
        };

        let start = acc.len();
        acc.resize(start + wanted, 0);
        let received = transport.receive(&mut acc[start..]).await?;
        acc.truncate(start + received);
        trace!("received {} of {} bytes", received, wanted);

        if received == 0 {
            return res!(io_err!(UnexpectedEof, "connection closed mid-response"));
        }
    }
}
