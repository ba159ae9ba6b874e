use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed, LengthDelimitedCodec};
use tracing::trace;

use super::error::{IpcError, IpcResult};
use super::messages::{Envelope, Message};

/// Largest accepted packet
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Length-delimited packets carrying one [`Message`] each
#[derive(Debug)]
pub struct IpcCodec {
    packets: LengthDelimitedCodec,
}

impl Default for IpcCodec {
    fn default() -> Self {
        Self {
            packets: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_PACKET_SIZE)
                .new_codec(),
        }
    }
}

impl Decoder for IpcCodec {
    type Item = Message;
    type Error = IpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(packet) = self.packets.decode(src)? else {
            return Ok(None);
        };
        let envelope = Envelope::decode(packet.freeze())?;
        Message::try_from(envelope).map(Some)
    }
}

impl Encoder<Message> for IpcCodec {
    type Error = IpcError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let packet = item.to_envelope()?.encode()?;
        self.packets.encode(packet, dst)?;
        Ok(())
    }
}

pub type IpcStream = Framed<TcpStream, IpcCodec>;

pub fn framed(stream: TcpStream) -> IpcStream {
    Framed::new(stream, IpcCodec::default())
}

/// Connect to an endpoint, retrying while the peer is not listening yet
pub async fn connect(addr: SocketAddr, attempts: u32, delay: Duration) -> IpcResult<IpcStream> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(framed(stream));
            }
            Err(e) if attempt < attempts => {
                trace!(%addr, attempt, "endpoint not reachable yet: {e}");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
