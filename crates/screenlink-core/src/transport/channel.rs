//! Stream-backed client channel.
//!
//! The channel connects on its first call and keeps the connection for
//! subsequent ones. When the connection breaks it is dropped and the next
//! call reconnects.
//!
//! # Concurrency
//!
//! Calls share the connection. Each request carries a call id; a reader task
//! owns the read half and hands every reply to the call waiting for that id,
//! so a slow call never holds up the others. Writes are serialized by a
//! tokio `Mutex` on the write half, which keeps calls issued in sequence in
//! that order on the wire.

use super::protocol::{read_reply, write_request, ReplyEnvelope};
use super::{socket, ClientChannel, TransportError, WireReply, WireRequest};
use crate::address::{ConnectionAddress, TransportKind};
use crate::config::TransportConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub(crate) trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

type BoxedStream = Box<dyn Stream>;

/// Calls written on a connection that still wait for their reply.
struct PendingCalls {
    open: bool,
    calls: HashMap<u64, oneshot::Sender<ReplyEnvelope>>,
}

type SharedPending = Arc<std::sync::Mutex<PendingCalls>>;

fn lock_pending(pending: &SharedPending) -> MutexGuard<'_, PendingCalls> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One open connection. Dropping it stops the reply reader.
struct Connection {
    writer: Mutex<WriteHalf<BoxedStream>>,
    pending: SharedPending,
    reader: JoinHandle<()>,
}

impl Connection {
    fn new(stream: BoxedStream, peer: String) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending = Arc::new(std::sync::Mutex::new(PendingCalls {
            open: true,
            calls: HashMap::new(),
        }));
        let reader = tokio::spawn(route_replies(read_half, pending.clone(), peer));
        Self {
            writer: Mutex::new(write_half),
            pending,
            reader,
        }
    }

    fn is_open(&self) -> bool {
        lock_pending(&self.pending).open
    }

    /// Register interest in the reply to `call_id`.
    ///
    /// Returns `None` once the reader has seen the connection end.
    fn expect_reply(&self, call_id: u64) -> Option<oneshot::Receiver<ReplyEnvelope>> {
        let mut pending = lock_pending(&self.pending);
        if !pending.open {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        pending.calls.insert(call_id, tx);
        Some(rx)
    }

    fn forget(&self, call_id: u64) {
        lock_pending(&self.pending).calls.remove(&call_id);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Read replies until the connection ends, waking the matching call for each.
///
/// On exit every call still waiting sees its sender dropped.
async fn route_replies(mut reader: ReadHalf<BoxedStream>, pending: SharedPending, peer: String) {
    loop {
        match read_reply(&mut reader).await {
            Ok(Some(envelope)) => {
                let waiter = lock_pending(&pending).calls.remove(&envelope.call_id());
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(envelope);
                    }
                    None => warn!(
                        "Dropping reply to unknown call {} from {}",
                        envelope.call_id(),
                        peer
                    ),
                }
            }
            Ok(None) => {
                debug!("Connection to {} closed by peer", peer);
                break;
            }
            Err(e) => {
                debug!("Connection to {} failed: {}", peer, e);
                break;
            }
        }
    }

    let mut pending = lock_pending(&pending);
    pending.open = false;
    pending.calls.clear();
}

/// Client channel over TCP or a unix socket.
pub struct StreamChannel {
    destination: ConnectionAddress,
    connection: Mutex<Option<Arc<Connection>>>,
    next_call_id: AtomicU64,
    attempts: u32,
    retry_delay: Duration,
}

impl StreamChannel {
    /// Create a channel with the default retry policy.
    pub fn new(destination: ConnectionAddress) -> Self {
        Self::with_retry(
            destination,
            TransportConfig::CALL_RETRY_ATTEMPTS,
            TransportConfig::CALL_RETRY_DELAY,
        )
    }

    /// Create a channel that tries each call up to `attempts` times.
    ///
    /// Only attempts that failed before the request was written are retried.
    pub fn with_retry(
        destination: ConnectionAddress,
        attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            destination,
            connection: Mutex::new(None),
            next_call_id: AtomicU64::new(1),
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    async fn open(&self) -> Result<BoxedStream, TransportError> {
        let connect = async {
            let stream: BoxedStream = match self.destination.transport() {
                TransportKind::RawSocket => Box::new(socket::connect(&self.destination).await?),
                #[cfg(unix)]
                TransportKind::Embedded => {
                    Box::new(super::embedded::connect(&self.destination).await?)
                }
                other => {
                    return Err(TransportError::connect(
                        &self.destination,
                        format!("{} transport is not available", other),
                    ))
                }
            };
            Ok::<_, TransportError>(stream)
        };

        tokio::time::timeout(TransportConfig::CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| TransportError::connect(&self.destination, "connect timed out"))?
    }

    /// The live connection, opening one if there is none.
    async fn connection(&self) -> Result<Arc<Connection>, TransportError> {
        let mut current = self.connection.lock().await;
        if let Some(connection) = current.as_ref().filter(|c| c.is_open()) {
            return Ok(connection.clone());
        }

        let stream = self.open().await?;
        let connection = Arc::new(Connection::new(stream, self.destination.to_string()));
        *current = Some(connection.clone());
        Ok(connection)
    }

    /// Forget `connection` unless another call already replaced it.
    async fn discard(&self, connection: &Arc<Connection>) {
        let mut current = self.connection.lock().await;
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, connection)) {
            *current = None;
        }
    }

    async fn try_call(&self, request: &WireRequest) -> Result<WireReply, TransportError> {
        let connection = self.connection().await?;
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);

        let Some(reply_rx) = connection.expect_reply(call_id) else {
            self.discard(&connection).await;
            return Err(TransportError::Send(std::io::ErrorKind::NotConnected.into()));
        };

        // Written from its own task: a cancelled call must not leave half an
        // envelope on the shared stream.
        let writer = connection.clone();
        let outgoing = request.clone();
        let written = tokio::spawn(async move {
            let mut write_half = writer.writer.lock().await;
            write_request(&mut *write_half, call_id, &outgoing).await
        })
        .await
        .unwrap_or_else(|e| Err(TransportError::Send(std::io::Error::other(e))));

        if let Err(e) = written {
            connection.forget(call_id);
            self.discard(&connection).await;
            return Err(match e {
                TransportError::Io(io) => TransportError::Send(io),
                other => other,
            });
        }

        match reply_rx.await {
            Ok(envelope) => envelope.into_reply(request),
            Err(_) => {
                self.discard(&connection).await;
                Err(TransportError::Closed)
            }
        }
    }
}

#[async_trait::async_trait]
impl ClientChannel for StreamChannel {
    async fn call(&self, request: WireRequest) -> Result<WireReply, TransportError> {
        let mut attempt = 1;

        loop {
            match self.try_call(&request).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    if !e.is_retryable() || attempt >= self.attempts {
                        debug!(
                            "Call {} to {} failed after {} attempt(s): {}",
                            request.function_id, self.destination, attempt, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Call {} to {} failed (attempt {}/{}): {}",
                        request.function_id, self.destination, attempt, self.attempts, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    fn destination(&self) -> &ConnectionAddress {
        &self.destination
    }
}
