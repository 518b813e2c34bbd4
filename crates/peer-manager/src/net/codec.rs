//! Default TCP transport for the [`Dialer`]/[`PeerConnection`] boundary.
//! Frames the wire with `bitcoin`'s consensus-encoded `RawNetworkMessage`,
//! buffering partial reads the same way the stream decoder collaborator
//! this crate expects from an embedder would.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bitcoin::consensus::encode::{self, Decodable, Encodable};
use bitcoin::network::message::{NetworkMessage, RawNetworkMessage};
use bitcoin::network::Magic;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::net::peer::{Dialer, PeerConnection};

const READ_CHUNK: usize = 8 * 1024;

/// Accumulates bytes off the wire and yields whole messages as soon as
/// enough of them have arrived.
struct Decoder {
    magic: Magic,
    unparsed: Vec<u8>,
}

impl Decoder {
    fn new(magic: Magic) -> Self {
        Self {
            magic,
            unparsed: Vec::with_capacity(READ_CHUNK),
        }
    }

    fn input(&mut self, bytes: &[u8]) {
        self.unparsed.extend_from_slice(bytes);
    }

    fn decode_next(&mut self) -> io::Result<Option<NetworkMessage>> {
        let mut cursor = io::Cursor::new(self.unparsed.as_slice());
        match RawNetworkMessage::consensus_decode(&mut cursor) {
            Ok(raw) => {
                let consumed = cursor.position() as usize;
                self.unparsed.drain(..consumed);
                if raw.magic != self.magic {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "network magic mismatch",
                    ));
                }
                Ok(Some(raw.payload))
            }
            Err(encode::Error::Io(ref err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                Ok(None)
            }
            Err(err) => Err(io::Error::new(io::ErrorKind::InvalidData, err)),
        }
    }
}

/// A plain TCP connection, framed as above.
pub struct TcpConnection {
    stream: TcpStream,
    decoder: Decoder,
    magic: Magic,
    buf: [u8; READ_CHUNK],
}

#[async_trait]
impl PeerConnection for TcpConnection {
    async fn send(&mut self, message: NetworkMessage) -> io::Result<()> {
        let raw = RawNetworkMessage {
            magic: self.magic,
            payload: message,
        };
        let mut out = Vec::new();
        raw.consensus_encode(&mut out)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        self.stream.write_all(&out).await
    }

    async fn recv(&mut self) -> io::Result<Option<NetworkMessage>> {
        loop {
            if let Some(msg) = self.decoder.decode_next()? {
                return Ok(Some(msg));
            }
            let n = self.stream.read(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.input(&self.buf[..n]);
        }
    }
}

/// [`Dialer`] that opens a plain TCP connection and frames it with the
/// network's magic bytes. The embedding application is free to supply a
/// different [`Dialer`] (TLS, a test double, ...) instead.
pub struct TcpDialer {
    magic: Magic,
}

impl TcpDialer {
    pub fn new(magic: Magic) -> Self {
        Self { magic }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn connect(&self, addr: SocketAddr) -> io::Result<Box<dyn PeerConnection>> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(TcpConnection {
            stream,
            decoder: Decoder::new(self.magic),
            magic: self.magic,
            buf: [0u8; READ_CHUNK],
        }))
    }
}
