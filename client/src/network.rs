use imd_shared::codec::{decode_energies, decode_handshake, decode_header, decode_positions, encode_forces, encode_header};
use imd_shared::records::ENERGY_RECORD_SIZE;
use imd_shared::{CodecError, EnergyRecord, ForceBatch, MessageKind, PayloadOrder, Vec3, HEADER_SIZE};
use log::{debug, info};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// How long the server gets to send its handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed payload: {0}")]
    Codec(#[from] CodecError),

    #[error("server did not send a valid IMD handshake")]
    Handshake,

    #[error("timed out waiting for the server")]
    Timeout,

    #[error("unexpected {0} from server")]
    Unexpected(MessageKind),
}

/// Data streamed by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Energies(EnergyRecord),
    /// Positions in Å, in the server's tracked atom order.
    Positions(Vec<Vec3>),
}

/// Client side of an IMD connection.
pub struct ImdClient<S = TcpStream> {
    stream: S,
    order: PayloadOrder,
}

impl ImdClient<TcpStream> {
    /// Connects and validates the handshake. The session only starts
    /// streaming after [`go`](Self::go).
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        info!("Connecting to IMD server at {}", addr);
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        match timeout(HANDSHAKE_TIMEOUT, Self::handshake(stream)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }
}

impl<S> ImdClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads the handshake from an already connected stream.
    pub async fn handshake(mut stream: S) -> Result<Self, ClientError> {
        let mut bytes = [0u8; HEADER_SIZE];
        stream.read_exact(&mut bytes).await?;
        let order = decode_handshake(&bytes).ok_or(ClientError::Handshake)?;
        debug!("Handshake accepted, payload order {:?}", order);
        Ok(Self { stream, order })
    }

    /// Byte order the server uses for payloads, relative to ours.
    pub fn payload_order(&self) -> PayloadOrder {
        self.order
    }

    pub async fn send_header(&mut self, kind: MessageKind, length: i32) -> Result<(), ClientError> {
        self.stream.write_all(&encode_header(kind, length)).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn go(&mut self) -> Result<(), ClientError> {
        self.send_header(MessageKind::Go, 0).await
    }

    /// Toggles the pause state of the simulation.
    pub async fn pause(&mut self) -> Result<(), ClientError> {
        self.send_header(MessageKind::Pause, 0).await
    }

    pub async fn kill(&mut self) -> Result<(), ClientError> {
        self.send_header(MessageKind::Kill, 0).await
    }

    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        self.send_header(MessageKind::Disconnect, 0).await
    }

    /// Asks for a frame every `rate` steps; 0 restores the server default.
    pub async fn set_rate(&mut self, rate: i32) -> Result<(), ClientError> {
        self.send_header(MessageKind::TransferRate, rate).await
    }

    /// Sends pull forces (kcal mol⁻¹ Å⁻¹) on atoms given by their position
    /// in the server's tracked list. An empty batch releases all atoms.
    pub async fn send_forces(&mut self, batch: &ForceBatch) -> Result<(), ClientError> {
        self.stream.write_all(&encode_forces(batch, self.order)).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Waits for the next energy record or position batch.
    pub async fn next_frame(&mut self) -> Result<Frame, ClientError> {
        let mut bytes = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut bytes).await?;
        let header = decode_header(&bytes);

        match header.kind {
            MessageKind::Energies => {
                let mut payload = [0u8; ENERGY_RECORD_SIZE];
                self.stream.read_exact(&mut payload).await?;
                Ok(Frame::Energies(decode_energies(&payload, self.order)?))
            }
            MessageKind::Coordinates => {
                let count = usize::try_from(header.length)
                    .map_err(|_| CodecError::NegativeCount(header.length))?;
                let mut payload = vec![0u8; count * 12];
                self.stream.read_exact(&mut payload).await?;
                Ok(Frame::Positions(decode_positions(&payload, count, self.order)?))
            }
            other => Err(ClientError::Unexpected(other)),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
