//! One socket to one server, opened with the master/slave id handshake.

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use super::identity::{
    client_master_id, is_normal, AuthorizeMode, ConnectionType, SessionIdentity,
};
use super::protocol::{Object, Status};
use super::resolver::{Endpoint, EndpointResolver};
use crate::error::{Error, Result};

/// A wire connection to the server.
///
/// Owns the socket exclusively. The socket is split into buffered halves that
/// carry the object channel once the handshake has completed.
pub struct WireConnection {
    /// Buffered read half
    reader: Option<BufReader<ReadHalf<TcpStream>>>,
    /// Buffered write half
    writer: Option<BufWriter<WriteHalf<TcpStream>>>,
    /// Identity agreed during the handshake
    identity: SessionIdentity,
    /// Address actually connected to
    peer: SocketAddr,
}

impl WireConnection {
    /// Connect to `endpoint` and run the handshake.
    ///
    /// `slave_id` is the id the client would like; pass
    /// [`SLAVE_ID_ANY`](super::identity::SLAVE_ID_ANY) to let the server choose.
    pub async fn open(
        resolver: &EndpointResolver,
        endpoint: &Endpoint,
        protocol_version: u32,
        authorization: AuthorizeMode,
        slave_id: i32,
    ) -> Result<Self> {
        let stream = resolver.connect(endpoint).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let (read_half, write_half) = tokio::io::split(stream);
        let mut conn = Self {
            reader: Some(BufReader::new(read_half)),
            writer: Some(BufWriter::new(write_half)),
            identity: SessionIdentity {
                connection_type: ConnectionType::for_peer(peer.ip()),
                master_id: client_master_id(protocol_version, authorization),
                slave_id,
            },
            peer,
        };

        if let Err(e) = conn.handshake().await {
            conn.close().await;
            return Err(e);
        }

        debug!(%endpoint, %peer, identity = %conn.identity, "port opened");
        Ok(conn)
    }

    /// Exchange `(master_id, slave_id)` with the server.
    async fn handshake(&mut self) -> Result<()> {
        let SessionIdentity {
            master_id,
            slave_id,
            ..
        } = self.identity;
        let writer = self.writer_mut()?;
        writer.write_i32(master_id as i32).await?;
        writer.write_i32(slave_id).await?;
        writer.flush().await?;

        let reader = self.reader_mut()?;
        let master_id = reader.read_i32().await? as u32;
        let slave_id = reader.read_i32().await?;

        if !is_normal(slave_id) {
            return Err(Error::HandshakeFailed(format!(
                "server assigned invalid slave id {:#x}",
                slave_id as u32
            )));
        }

        self.identity.master_id = master_id;
        self.identity.slave_id = slave_id;
        Ok(())
    }

    /// Identity agreed with the server.
    pub fn identity(&self) -> SessionIdentity {
        self.identity
    }

    /// Address the socket is connected to.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Buffer one object for sending.
    pub async fn write_object(&mut self, object: &Object) -> Result<()> {
        let encoded: BytesMut = object.encode();
        self.writer_mut()?.write_all(&encoded).await?;
        Ok(())
    }

    /// Send everything buffered so far.
    pub async fn flush(&mut self) -> Result<()> {
        self.writer_mut()?.flush().await?;
        Ok(())
    }

    /// Read the next object.
    pub async fn read_object(&mut self) -> Result<Object> {
        Object::read_from(self.reader_mut()?).await
    }

    /// Read an integer object.
    pub async fn read_integer(&mut self) -> Result<i32> {
        match self.read_object().await? {
            Object::Integer(value) => Ok(value),
            Object::Status(Status::Error) => Err(self.read_object().await?.into_error()),
            other => Err(Error::Protocol(format!("Expected integer, got {:?}", other))),
        }
    }

    /// Read the status that terminates a request.
    ///
    /// An error status is followed by an error-info object describing it.
    pub async fn read_status(&mut self) -> Result<()> {
        match self.read_object().await? {
            Object::Status(Status::Success) => Ok(()),
            Object::Status(Status::Error) => Err(self.read_object().await?.into_error()),
            Object::Status(Status::Canceled) => {
                Err(Error::server("HY008", "operation canceled"))
            }
            other => Err(Error::Protocol(format!("Expected status, got {:?}", other))),
        }
    }

    /// Reserved for protocol-level resynchronization. Never blocks.
    pub fn sync(&mut self) {}

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.reader.is_none() && self.writer.is_none()
    }

    /// Close both halves of the socket. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            // The peer may already be gone
            let _ = writer.shutdown().await;
        }
        self.reader = None;
    }

    fn reader_mut(&mut self) -> Result<&mut BufReader<ReadHalf<TcpStream>>> {
        self.reader
            .as_mut()
            .ok_or_else(|| Error::Unexpected("port is closed".to_string()))
    }

    fn writer_mut(&mut self) -> Result<&mut BufWriter<WriteHalf<TcpStream>>> {
        self.writer
            .as_mut()
            .ok_or_else(|| Error::Unexpected("port is closed".to_string()))
    }
}
