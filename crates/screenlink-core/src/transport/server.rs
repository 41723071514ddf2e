//! Accept loop shared by the TCP and unix socket transports.
//!
//! Every accepted connection gets a reader task. Each request it reads is
//! answered by its own task, so a handler that defers its answer does not
//! hold up later requests on the same connection. Replies carry the call id
//! of their request and go out as soon as they are ready.
//!
//! A panicking handler is answered with an `Aborted` failure; the connection
//! and the server keep running.
//!
//! # Shutdown
//!
//! [`ServerHandle::shutdown`] (or dropping the handle) flips a single watch
//! flag. The accept loop and every connection stop on it, and calls still in
//! flight on a closed connection are dropped. A unix socket file is removed
//! only while it is still the one this server created.

use super::protocol::{read_request, write_reply};
use super::{socket, InboundDispatch, WireReply, WireRequest};
use crate::address::{ConnectionAddress, TransportKind};
use crate::config::TransportConfig;
use crate::error::{Result, ScreenlinkError};
use crate::status::CallFailure;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[cfg(unix)]
use super::embedded::SocketFile;

/// Handle to a running server. Dropping shuts down the server.
pub struct ServerHandle {
    location: ConnectionAddress,
    #[cfg(unix)]
    socket_file: Option<SocketFile>,
    stop_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl ServerHandle {
    /// The location clients should connect to.
    ///
    /// For a TCP server bound without a port this carries the assigned port.
    pub fn location(&self) -> &ConnectionAddress {
        &self.location
    }

    /// Stop accepting, close every connection and release the socket file.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        if self.stop_tx.send_replace(true) {
            return;
        }
        info!("Server at {} stopping", self.location);

        #[cfg(unix)]
        if let Some(file) = self.socket_file.take() {
            if let Err(e) = file.remove_if_owned() {
                warn!("Failed to remove socket {}: {}", file.path().display(), e);
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        self.accept_task.abort();
    }
}

trait InboundStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> InboundStream for T {}

type BoxedInbound = Box<dyn InboundStream>;

type SharedWriter = Arc<Mutex<WriteHalf<BoxedInbound>>>;

enum Acceptor {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

impl Acceptor {
    async fn accept(&self) -> std::io::Result<(BoxedInbound, String)> {
        match self {
            Acceptor::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                let _ = stream.set_nodelay(true);
                Ok((Box::new(stream), peer.to_string()))
            }
            #[cfg(unix)]
            Acceptor::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), "local peer".to_string()))
            }
        }
    }
}

/// Counts open connections against a fixed limit.
struct ConnectionSlots {
    active: Arc<AtomicUsize>,
    max: usize,
}

/// One open connection. Gives its slot back when dropped, however the
/// connection task ends.
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl ConnectionSlots {
    fn new(max: usize) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    fn try_acquire(&self) -> Option<ConnectionSlot> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()?;
        Some(ConnectionSlot {
            active: self.active.clone(),
        })
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bind `address` and spawn the accept loop.
pub(crate) async fn start(
    address: ConnectionAddress,
    dispatch: Arc<dyn InboundDispatch>,
) -> Result<ServerHandle> {
    #[cfg(unix)]
    let mut socket_file = None;

    let (acceptor, location) = match address.transport() {
        TransportKind::RawSocket => {
            let (listener, location) = socket::bind(&address).await?;
            (Acceptor::Tcp(listener), location)
        }
        #[cfg(unix)]
        TransportKind::Embedded => {
            let (listener, file) = super::embedded::bind(&address)?;
            socket_file = Some(file);
            (Acceptor::Unix(listener), address)
        }
        _ => {
            return Err(ScreenlinkError::UnsupportedTransport {
                scheme: address.scheme().to_string(),
                url: address.to_string(),
            })
        }
    };

    info!("Server listening on {}", location);

    let (stop_tx, stop_rx) = watch::channel(false);
    let slots = ConnectionSlots::new(TransportConfig::MAX_CONNECTIONS);
    let accept_task = tokio::spawn(accept_loop(acceptor, dispatch, stop_rx, slots));

    Ok(ServerHandle {
        location,
        #[cfg(unix)]
        socket_file,
        stop_tx,
        accept_task,
    })
}

async fn accept_loop(
    acceptor: Acceptor,
    dispatch: Arc<dyn InboundDispatch>,
    mut stop_rx: watch::Receiver<bool>,
    slots: ConnectionSlots,
) {
    loop {
        let accepted = tokio::select! {
            _ = stop_rx.changed() => break,
            accepted = acceptor.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Accept error: {}", e);
                continue;
            }
        };

        let Some(slot) = slots.try_acquire() else {
            warn!(
                "Rejecting connection from {}: at max capacity ({})",
                peer, slots.max
            );
            continue;
        };

        debug!("Connection from {} ({} open)", peer, slots.active());
        tokio::spawn(serve_connection(
            stream,
            peer,
            dispatch.clone(),
            stop_rx.clone(),
            slot,
        ));
    }
    debug!("Accept loop stopped");
}

/// Read requests from one connection and spawn a task answering each.
async fn serve_connection(
    stream: BoxedInbound,
    peer: String,
    dispatch: Arc<dyn InboundDispatch>,
    mut stop_rx: watch::Receiver<bool>,
    _slot: ConnectionSlot,
) {
    let (mut read_half, write_half) = tokio::io::split(stream);
    let writer: SharedWriter = Arc::new(Mutex::new(write_half));
    // Calls in flight watch this; it closes when the connection does.
    let (closed_tx, closed_rx) = watch::channel(());

    loop {
        let next = tokio::select! {
            _ = stop_rx.changed() => break,
            next = read_request(&mut read_half) => next,
        };

        match next {
            Ok(Some((call_id, request))) => {
                tokio::spawn(answer_call(
                    call_id,
                    request,
                    dispatch.clone(),
                    writer.clone(),
                    closed_rx.clone(),
                ));
            }
            Ok(None) => {
                debug!("Connection {} closed by peer", peer);
                break;
            }
            Err(e) => {
                debug!("Connection {} ended: {}", peer, e);
                break;
            }
        }
    }

    drop(closed_tx);
}

async fn answer_call(
    call_id: u64,
    request: WireRequest,
    dispatch: Arc<dyn InboundDispatch>,
    writer: SharedWriter,
    mut closed_rx: watch::Receiver<()>,
) {
    let function_id = request.function_id;
    let handled = AssertUnwindSafe(dispatch.dispatch(request.clone())).catch_unwind();

    let reply = tokio::select! {
        // Only fires once the connection is gone.
        _ = closed_rx.changed() => return,
        outcome = handled => outcome.unwrap_or_else(|panic| {
            let message = panic_message(&*panic);
            error!("Handler for function {} panicked: {}", function_id, message);
            WireReply::failed(&CallFailure::aborted(format!("handler panicked: {}", message)))
        }),
    };

    let mut write_half = writer.lock().await;
    if let Err(e) = write_reply(&mut *write_half, call_id, &request, &reply).await {
        debug!("Failed to send reply to call {}: {}", call_id, e);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::FailureKind;
    use crate::transport::protocol::{read_reply, write_request};
    use tokio::net::TcpStream;
    use tokio::sync::Notify;

    /// Echoes payloads. Function 0 panics; function 1 waits for `gate`.
    struct TestDispatch {
        gate: Arc<Notify>,
    }

    impl TestDispatch {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Arc::new(Notify::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl InboundDispatch for TestDispatch {
        async fn dispatch(&self, request: WireRequest) -> WireReply {
            match request.function_id {
                0 => panic!("handler blew up"),
                1 => self.gate.notified().await,
                _ => {}
            }
            WireReply::ok(request.payload)
        }
    }

    fn tcp_address() -> ConnectionAddress {
        ConnectionAddress::parse("tcp+tv://127.0.0.1").unwrap()
    }

    fn request(function_id: u32, payload: &[u8]) -> WireRequest {
        WireRequest {
            com_id: Some("abc".to_string()),
            function_id,
            payload: payload.to_vec(),
        }
    }

    async fn connect(handle: &ServerHandle) -> TcpStream {
        TcpStream::connect(("127.0.0.1", handle.location().port()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_server_start_and_shutdown() {
        let mut handle = start(tcp_address(), TestDispatch::new()).await.unwrap();

        assert!(handle.location().port() > 0);
        handle.shutdown();
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_echo_roundtrip() {
        let mut handle = start(tcp_address(), TestDispatch::new()).await.unwrap();
        let mut stream = connect(&handle).await;

        let request = request(7, br#"{"hello":"world"}"#);
        write_request(&mut stream, 41, &request).await.unwrap();
        let envelope = read_reply(&mut stream).await.unwrap().unwrap();

        assert_eq!(envelope.call_id(), 41);
        assert_eq!(
            envelope.into_reply(&request).unwrap(),
            WireReply::ok(request.payload.clone())
        );

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_deferred_call_does_not_block_the_connection() {
        let dispatch = TestDispatch::new();
        let mut handle = start(tcp_address(), dispatch.clone()).await.unwrap();
        let mut stream = connect(&handle).await;

        write_request(&mut stream, 1, &request(1, b"\"slow\"")).await.unwrap();
        write_request(&mut stream, 2, &request(2, b"\"fast\"")).await.unwrap();

        let first = read_reply(&mut stream).await.unwrap().unwrap();
        assert_eq!(first.call_id(), 2);
        assert_eq!(first.payload, b"\"fast\"");

        dispatch.gate.notify_one();
        let second = read_reply(&mut stream).await.unwrap().unwrap();
        assert_eq!(second.call_id(), 1);
        assert_eq!(second.payload, b"\"slow\"");

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_panicking_handler_is_answered_and_connection_survives() {
        let mut handle = start(tcp_address(), TestDispatch::new()).await.unwrap();
        let mut stream = connect(&handle).await;

        let panicking = request(0, b"{}");
        write_request(&mut stream, 1, &panicking).await.unwrap();
        let reply = read_reply(&mut stream)
            .await
            .unwrap()
            .unwrap()
            .into_reply(&panicking)
            .unwrap();
        let failure = reply.status.into_result().unwrap_err();
        assert_eq!(failure.kind, FailureKind::Aborted);
        assert_eq!(failure.message, "handler panicked: handler blew up");

        let next = request(2, b"\"after\"");
        write_request(&mut stream, 2, &next).await.unwrap();
        let envelope = read_reply(&mut stream).await.unwrap().unwrap();
        assert_eq!(envelope.payload, b"\"after\"");

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_closes_connection_on_garbage() {
        let mut handle = start(tcp_address(), TestDispatch::new()).await.unwrap();
        let mut stream = connect(&handle).await;

        tokio::io::AsyncWriteExt::write_all(&mut stream, b"not an envelope")
            .await
            .unwrap();

        let mut buf = Vec::new();
        let read = tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut buf).await;
        assert!(read.map(|n| n == 0).unwrap_or(true));

        handle.shutdown();
    }

    #[test]
    fn test_connection_slot_is_released_on_panic() {
        let slots = ConnectionSlots::new(1);
        let slot = slots.try_acquire().unwrap();
        assert!(slots.try_acquire().is_none());

        let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let _held = slot;
            panic!("connection task blew up");
        }));
        assert!(result.is_err());

        assert_eq!(slots.active(), 0);
        assert!(slots.try_acquire().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_server_removes_socket_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.sock");
        let address = ConnectionAddress::parse(&format!("unix://{}", path.display())).unwrap();

        let mut handle = start(address, TestDispatch::new()).await.unwrap();
        assert!(path.exists());
        assert_eq!(handle.location().path(), path.to_str().unwrap());

        handle.shutdown();
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_server_leaves_replacement_socket_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.sock");
        let address = ConnectionAddress::parse(&format!("unix://{}", path.display())).unwrap();

        let mut first = start(address.clone(), TestDispatch::new()).await.unwrap();
        std::fs::rename(&path, dir.path().join("old.sock")).unwrap();
        let mut second = start(address, TestDispatch::new()).await.unwrap();

        first.shutdown();
        assert!(path.exists());
        std::os::unix::net::UnixStream::connect(&path).unwrap();

        second.shutdown();
        assert!(!path.exists());
    }
}
