// Transport collaborators: unreliable (UDP) and reliable (TCP) sends.
//
// The engine only ever sees plaintext; both transports wrap/unwrap every
// buffer through the crypto keyring before it touches the wire.

use crate::address::Address;
use crate::crypto::KeyRing;
use crate::error::{Result, SwimError};
use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// Best-effort datagram send. Buffer length must not exceed the configured
/// `MaxDatagramLengthSend`.
#[async_trait]
pub trait UnreliableTransport: Send + Sync {
    async fn send(&self, address: Address, buffer: &[u8]) -> Result<()>;
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, Address)>;
    fn local_addr(&self) -> Result<Address>;
}

/// Length-prefixed (u32 LE) reliable stream send, used exclusively for
/// `ListRequest`/`ListResponse`.
#[async_trait]
pub trait ReliableTransport: Send + Sync {
    async fn send(&self, address: Address, buffer: &[u8]) -> Result<()>;
}

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    keys: Arc<KeyRing>,
}

impl UdpTransport {
    /// Binds the listen socket. `bind_address` is a raw socket address
    /// (unlike `Address`, it may legitimately be `0.0.0.0` to listen on
    /// every interface).
    pub async fn bind(bind_address: SocketAddr, keys: Arc<KeyRing>) -> Result<Self> {
        let socket = UdpSocket::bind(bind_address).await?;
        Ok(UdpTransport { socket: Arc::new(socket), keys })
    }
}

#[async_trait]
impl UnreliableTransport for UdpTransport {
    async fn send(&self, address: Address, buffer: &[u8]) -> Result<()> {
        let sealed = self.keys.seal(buffer)?;
        self.socket
            .send_to(&sealed, address.socket_addr())
            .await
            .map_err(|e| SwimError::TransportSend(e.to_string()))?;
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
        let mut sealed = vec![0u8; buf.len()];
        let (n, from) = self
            .socket
            .recv_from(&mut sealed)
            .await
            .map_err(|e| SwimError::TransportReceive(e.to_string()))?;
        let plaintext = self.keys.open(&sealed[..n])?;
        if plaintext.len() > buf.len() {
            return Err(SwimError::BufferTooSmall(
                "decrypted datagram larger than receive buffer".into(),
            ));
        }
        buf[..plaintext.len()].copy_from_slice(&plaintext);
        let address = Address::new(from)?;
        Ok((plaintext.len(), address))
    }

    fn local_addr(&self) -> Result<Address> {
        let addr = self
            .socket
            .local_addr()
            .map_err(|e| SwimError::TransportReceive(e.to_string()))?;
        Address::new(addr)
    }
}

pub struct TcpTransport {
    keys: Arc<KeyRing>,
}

impl TcpTransport {
    pub fn new(keys: Arc<KeyRing>) -> Self {
        TcpTransport { keys }
    }

    /// Accept loop: every connection is read once (length-prefixed
    /// ciphertext frame) and handed to `on_message`.
    pub async fn serve<F>(&self, bind_address: SocketAddr, on_message: F) -> Result<()>
    where
        F: Fn(Address, Vec<u8>) + Send + Sync + Clone + 'static,
    {
        let listener = TcpListener::bind(bind_address).await?;
        loop {
            let (mut stream, peer) = listener
                .accept()
                .await
                .map_err(|e| SwimError::TransportReceive(e.to_string()))?;
            let address = Address::new(peer)?;
            let keys = self.keys.clone();
            let on_message = on_message.clone();
            tokio::spawn(async move {
                match read_framed(&mut stream, &keys).await {
                    Ok(plaintext) => on_message(address, plaintext),
                    Err(e) => tracing::debug!(peer = %address, error = %e, "reliable frame decode failed"),
                }
            });
        }
    }
}

async fn read_framed(stream: &mut TcpStream, keys: &KeyRing) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut sealed = vec![0u8; len];
    stream.read_exact(&mut sealed).await?;
    keys.open(&sealed)
}

#[async_trait]
impl ReliableTransport for TcpTransport {
    async fn send(&self, address: Address, buffer: &[u8]) -> Result<()> {
        let sealed = self.keys.seal(buffer)?;
        let mut stream = TcpStream::connect(address.socket_addr())
            .await
            .map_err(|e| SwimError::TransportSend(e.to_string()))?;
        let mut framed = BytesMut::with_capacity(4 + sealed.len());
        framed.put_u32_le(sealed.len() as u32);
        framed.put_slice(&sealed);
        stream
            .write_all(&framed)
            .await
            .map_err(|e| SwimError::TransportSend(e.to_string()))?;
        Ok(())
    }
}

/// Frame a reliable-transport payload for manual testing/inspection:
/// length-prefixed (u32 LE) as written to the wire by `TcpTransport::send`.
pub fn frame(buffer: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(4 + buffer.len());
    out.put_u32_le(buffer.len() as u32);
    out.put_slice(buffer);
    out
}

pub fn unframe(mut buf: BytesMut) -> Result<BytesMut> {
    if buf.len() < 4 {
        return Err(SwimError::BufferTooSmall("frame header truncated".into()));
    }
    let len = buf.get_u32_le() as usize;
    if buf.len() < len {
        return Err(SwimError::BufferTooSmall("frame body truncated".into()));
    }
    Ok(buf.split_to(len))
}
