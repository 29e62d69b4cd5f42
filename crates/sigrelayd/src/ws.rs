//! WebSocket implementation of [`Connection`] using tokio-tungstenite.
//!
//! A driver task owns the `WebSocketStream` and multiplexes three sources:
//!
//! ```text
//!   WsConnection::send / ping ──(outbound mpsc)──┐
//!   WsConnection::close ─────────(oneshot)───────┼──▶ driver ──▶ socket
//!   WsConnection::recv ◀──(inbound mpsc)─────────┘      │
//!   WsConnection::ping ◀──(pong watch)───────────────────┘
//! ```
//!
//! When the driver ends, the inbound and pong senders are dropped, which is
//! how `recv` and `ping` learn that the connection is closed.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use sigrelay_protocol::CloseCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::connection::{Connection, ConnectionError, Payload};

/// Messages buffered from the socket before the reader applies backpressure
const INBOUND_BUFFER: usize = 256;

/// Messages queued for the socket before `send` suspends
const OUTBOUND_BUFFER: usize = 64;

/// How long to wait for the peer to acknowledge a close frame
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Close reasons are limited to 123 bytes by RFC 6455
const MAX_CLOSE_REASON: usize = 123;

/// Performs the server side of the WebSocket handshake.
///
/// Returns the connection and the request target path (without query).
pub async fn accept<S>(
    stream: S,
    max_message_size: usize,
) -> Result<(WsConnection, String), tungstenite::Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut target = String::new();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        target = request.uri().path().to_string();
        Ok(response)
    };

    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config.max_frame_size = Some(max_message_size);

    let stream =
        tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(config)).await?;
    Ok((WsConnection::spawn(stream), target))
}

/// A WebSocket peer, driven by a background task.
pub struct WsConnection {
    outbound: mpsc::Sender<Message>,
    inbound: Mutex<mpsc::Receiver<Payload>>,
    pongs: watch::Receiver<u64>,
    next_ping: AtomicU64,
    /// Taken by the first `close` call
    close_request: StdMutex<Option<oneshot::Sender<CloseFrame<'static>>>>,
    ended: CancellationToken,
}

impl WsConnection {
    /// Wraps an accepted stream and spawns its driver task.
    pub fn spawn<S>(stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let (pong_tx, pong_rx) = watch::channel(0);
        let (close_tx, close_rx) = oneshot::channel();
        let ended = CancellationToken::new();

        let driver = Driver {
            stream,
            outbound: outbound_rx,
            inbound: inbound_tx,
            pongs: pong_tx,
            close_request: close_rx,
        };
        let driver_ended = ended.clone();
        tokio::spawn(async move {
            driver.run().await;
            driver_ended.cancel();
        });

        Self {
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
            pongs: pong_rx,
            next_ping: AtomicU64::new(0),
            close_request: StdMutex::new(Some(close_tx)),
            ended,
        }
    }

    fn close_requested(&self) -> bool {
        self.close_request
            .lock()
            .map(|request| request.is_none())
            .unwrap_or(true)
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn is_open(&self) -> bool {
        !self.ended.is_cancelled() && !self.close_requested()
    }

    fn close(&self, code: CloseCode, reason: &str) {
        let request = match self.close_request.lock() {
            Ok(mut request) => request.take(),
            Err(_) => None,
        };
        if let Some(request) = request {
            let _ = request.send(CloseFrame {
                code: WsCloseCode::from(code.as_u16()),
                reason: Cow::Owned(truncate_reason(reason).to_string()),
            });
        }
    }

    async fn recv(&self) -> Result<Payload, ConnectionError> {
        let mut inbound = self.inbound.lock().await;
        inbound.recv().await.ok_or(ConnectionError::Closed)
    }

    async fn send(&self, payload: Payload) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        let message = match payload {
            Payload::Text(text) => Message::Text(text),
            Payload::Binary(bytes) => Message::Binary(bytes),
        };
        self.outbound
            .send(message)
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    async fn ping(&self) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        let seq = self.next_ping.fetch_add(1, Ordering::Relaxed) + 1;
        let mut pongs = self.pongs.clone();

        self.outbound
            .send(Message::Ping(seq.to_be_bytes().to_vec()))
            .await
            .map_err(|_| ConnectionError::Closed)?;

        loop {
            if *pongs.borrow_and_update() >= seq {
                return Ok(());
            }
            pongs.changed().await.map_err(|_| ConnectionError::Closed)?;
        }
    }
}

/// Cuts `reason` to the longest prefix that fits in a close frame.
fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

struct Driver<S> {
    stream: WebSocketStream<S>,
    outbound: mpsc::Receiver<Message>,
    inbound: mpsc::Sender<Payload>,
    pongs: watch::Sender<u64>,
    close_request: oneshot::Receiver<CloseFrame<'static>>,
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                request = &mut self.close_request => {
                    // A dropped handle closes normally.
                    let frame = request.unwrap_or(CloseFrame {
                        code: WsCloseCode::Normal,
                        reason: Cow::Borrowed(""),
                    });
                    self.close(frame).await;
                    return;
                }

                message = self.outbound.recv() => {
                    let Some(message) = message else {
                        // Handle dropped; the close request arm fires next.
                        continue;
                    };
                    if let Err(e) = self.stream.send(message).await {
                        debug!(error = %e, "WebSocket send failed");
                        return;
                    }
                }

                frame = self.stream.next() => {
                    if !self.handle_frame(frame).await {
                        return;
                    }
                }
            }
        }
    }

    /// Returns false once the connection has ended.
    async fn handle_frame(&mut self, frame: Option<Result<Message, tungstenite::Error>>) -> bool {
        match frame {
            Some(Ok(Message::Text(text))) => self.deliver(Payload::Text(text)).await,
            Some(Ok(Message::Binary(bytes))) => self.deliver(Payload::Binary(bytes)).await,
            Some(Ok(Message::Pong(data))) => {
                if let Ok(seq) = <[u8; 8]>::try_from(data.as_slice()) {
                    let seq = u64::from_be_bytes(seq);
                    self.pongs.send_if_modified(|latest| {
                        if seq > *latest {
                            *latest = seq;
                            true
                        } else {
                            false
                        }
                    });
                }
                true
            }
            // tungstenite queues the pong itself
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Frame(_))) => true,
            Some(Ok(Message::Close(frame))) => {
                trace!(frame = ?frame, "Peer sent close");
                // Keep polling so tungstenite can flush its close reply.
                true
            }
            Some(Err(tungstenite::Error::ConnectionClosed)) | None => false,
            Some(Err(e)) => {
                debug!(error = %e, "WebSocket receive failed");
                false
            }
        }
    }

    async fn deliver(&mut self, payload: Payload) -> bool {
        // A full queue stops reading from the socket.
        if self.inbound.send(payload).await.is_err() {
            trace!("Inbound receiver dropped");
        }
        true
    }

    async fn close(&mut self, frame: CloseFrame<'static>) {
        debug!(code = u16::from(frame.code), reason = %frame.reason, "Sending close frame");
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!(error = %e, "Close frame not sent");
            return;
        }

        let drain = async {
            while let Some(Ok(_)) = self.stream.next().await {}
        };
        if timeout(CLOSE_TIMEOUT, drain).await.is_err() {
            warn!("Peer did not acknowledge close");
        }
    }
}
