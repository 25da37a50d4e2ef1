use std::io;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::{timeout, Duration};

use crate::device::constants::CLOSE_DEADLINE;
use crate::device::types::PeerAddress;

pub type OutputStream = Box<dyn AsyncWrite + Send + Unpin>;

pub trait SocketHandle: Send {
    fn close(&mut self) -> io::Result<()>;
}

/**
 * An open connection: the socket and its output stream, opened and closed together.
 */
pub struct Link {
    socket: Box<dyn SocketHandle>,
    stream: OutputStream,
}

impl Link {
    pub fn new(socket: Box<dyn SocketHandle>, stream: OutputStream) -> Self {
        Link { socket, stream }
    }

    pub async fn write_record(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    // The stream is closed before the socket; a failure on either is logged on its own.
    pub async fn close(self) {
        let Link { mut socket, mut stream } = self;

        match timeout(Duration::from_millis(CLOSE_DEADLINE), stream.shutdown()).await {
            Ok(Ok(())) => debug!("Output stream closed"),
            Ok(Err(err)) => warn!("Error closing output stream: {}", err),
            Err(_) => warn!("Closing output stream took too long"),
        }
        drop(stream);

        match socket.close() {
            Ok(()) => debug!("Socket closed"),
            Err(err) => warn!("Error closing socket: {}", err),
        }
    }
}

/**
 * Opens links to a peer. A partially opened socket must be released when the
 * returned future fails or is dropped.
 */
pub trait Connector: Send + Sync {
    fn connect(&self, peer: &PeerAddress) -> BoxFuture<'static, io::Result<Link>>;
}

struct TcpSocket {
    read_half: Option<OwnedReadHalf>,
}

impl SocketHandle for TcpSocket {
    fn close(&mut self) -> io::Result<()> {
        // the connection is released once both halves are gone
        self.read_half.take();
        Ok(())
    }
}

/**
 * Connects to `host:port` peers over TCP.
 */
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, peer: &PeerAddress) -> BoxFuture<'static, io::Result<Link>> {
        let address = peer.address.clone();
        debug!("Opening TCP stream to {} for service {}", address, peer.service_uuid);

        async move {
            let stream = TcpStream::connect(&address).await?;
            stream.set_nodelay(true)?;

            let (read_half, write_half) = stream.into_split();
            let socket = TcpSocket { read_half: Some(read_half) };
            Ok(Link::new(Box::new(socket), Box::new(write_half)))
        }.boxed()
    }
}
