#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use futures::future::{pending, BoxFuture};
use futures::FutureExt;
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep, timeout, Duration, Instant};

use pulse_bridge::bus::SubscriberHandle;
use pulse_bridge::device::transport::{Connector, Link, SocketHandle};
use pulse_bridge::device::types::PeerAddress;
use pulse_bridge::error::SubscriberError;
use pulse_bridge::tracking::types::TrackerEvent;
use pulse_bridge::wire::RecordSplitter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Hands out an in-memory stream whose far end is sent to the test.
    Open,
    /// Never completes.
    Hang,
    Refuse,
    /// Opens, but every write fails.
    BrokenWrites,
}

#[derive(Default)]
pub struct Counters {
    pub attempts: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub abandoned: AtomicUsize,
}

impl Counters {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

struct MemorySocket {
    counters: Arc<Counters>,
}

impl SocketHandle for MemorySocket {
    fn close(&mut self) -> io::Result<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// Counts connect futures dropped before they completed.
struct AbandonGuard {
    counters: Arc<Counters>,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        self.counters.abandoned.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FailingWriter;

impl AsyncWrite for FailingWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

pub struct MemoryConnector {
    mode: Mutex<ConnectMode>,
    pub counters: Arc<Counters>,
    peers: UnboundedSender<DuplexStream>,
}

impl MemoryConnector {
    pub fn new(mode: ConnectMode) -> (Arc<Self>, UnboundedReceiver<DuplexStream>) {
        let (peers, far_ends) = unbounded_channel();
        let connector = Arc::new(MemoryConnector {
            mode: Mutex::new(mode),
            counters: Arc::new(Counters::default()),
            peers,
        });
        (connector, far_ends)
    }

    pub fn set_mode(&self, mode: ConnectMode) {
        *self.mode.lock().unwrap() = mode;
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, _peer: &PeerAddress) -> BoxFuture<'static, io::Result<Link>> {
        let mode = *self.mode.lock().unwrap();
        let counters = self.counters.clone();
        let peers = self.peers.clone();
        counters.attempts.fetch_add(1, Ordering::SeqCst);

        async move {
            let socket = Box::new(MemorySocket { counters: counters.clone() });

            match mode {
                ConnectMode::Open => {
                    let (near, far) = duplex(64 * 1024);
                    counters.opened.fetch_add(1, Ordering::SeqCst);
                    let _ = peers.send(far);
                    Ok(Link::new(socket, Box::new(near)))
                },
                ConnectMode::BrokenWrites => {
                    counters.opened.fetch_add(1, Ordering::SeqCst);
                    Ok(Link::new(socket, Box::new(FailingWriter)))
                },
                ConnectMode::Refuse => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
                ConnectMode::Hang => {
                    let _guard = AbandonGuard { counters };
                    pending::<()>().await;
                    unreachable!()
                },
            }
        }.boxed()
    }
}

pub fn peer() -> PeerAddress {
    PeerAddress::new("memory:1")
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);

    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Reads from `stream` until `count` complete records have arrived.
pub async fn read_records<R: AsyncRead + Unpin>(stream: &mut R, count: usize) -> Vec<String> {
    let mut splitter = RecordSplitter::new();
    let mut records = Vec::new();
    let mut buffer = [0u8; 1024];

    while records.len() < count {
        let read = timeout(Duration::from_secs(2), stream.read(&mut buffer))
            .await
            .expect("timed out waiting for records")
            .expect("read failed");
        assert!(read > 0, "stream closed after {} records", records.len());
        records.extend(splitter.push(&buffer[..read]));
    }
    records
}

pub type EventLog = Arc<Mutex<Vec<TrackerEvent>>>;

pub fn recorder() -> (SubscriberHandle, EventLog) {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let handle: SubscriberHandle = Arc::new(move |event: &TrackerEvent| -> Result<(), SubscriberError> {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });
    (handle, log)
}
