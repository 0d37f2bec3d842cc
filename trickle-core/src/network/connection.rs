use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::client::FrameTransport;
use crate::codec::ClientCodec;
use crate::error::TrickleError;
use crate::flags::FrameOptions;
use crate::protocol::{ClientMessage, ClipMessage, FrameMessage, InputBatch, ServerMessage};
use crate::session::auth;

type Reply<T> = oneshot::Sender<Result<T, TrickleError>>;

/// Outstanding requests, keyed by sequence number.
#[derive(Default)]
struct Routes {
    frames: HashMap<u64, Reply<FrameMessage>>,
    acks: HashMap<u64, Reply<()>>,
    /// Set once the reader stopped; why it stopped.
    closed: Option<CloseReason>,
}

#[derive(Debug, Clone)]
enum CloseReason {
    Host(String),
    Io(String),
    Eof,
}

impl CloseReason {
    fn to_error(&self) -> TrickleError {
        match self {
            Self::Host(reason) => TrickleError::protocol(format!("host closed session: {reason}")),
            Self::Io(e) => TrickleError::Transport(io::Error::new(io::ErrorKind::ConnectionReset, e.clone())),
            Self::Eof => TrickleError::ChannelClosed,
        }
    }
}

/// Logged-in TCP connection to a host.
///
/// A background writer task drains an mpsc queue into the socket and a
/// background reader task routes each reply to the request waiting on
/// its sequence number.
pub struct TcpTransport {
    session_id: String,
    tx: mpsc::Sender<ClientMessage>,
    routes: Arc<Mutex<Routes>>,
    clip_rx: watch::Receiver<Option<ClipMessage>>,
}

impl TcpTransport {
    /// Connect and run the challenge-response login.
    pub async fn connect(addr: impl ToSocketAddrs, password: &str) -> Result<Self, TrickleError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let mut framed = Framed::new(stream, ClientCodec::new());

        framed.send(ClientMessage::StartSession).await?;
        let (session_id, salt, challenge) = match next_message(&mut framed).await? {
            ServerMessage::Challenge {
                session_id,
                salt,
                challenge,
            } => (session_id, salt, challenge),
            ServerMessage::Close { reason } => {
                return Err(TrickleError::protocol(format!("host refused session: {reason}")));
            }
            _ => return Err(TrickleError::ProtocolViolation("expected Challenge")),
        };

        let response = auth::login_response(&challenge, &salt, password);
        framed.send(ClientMessage::Login { response }).await?;
        match next_message(&mut framed).await? {
            ServerMessage::LoggedIn { logged_in: true } => {}
            ServerMessage::LoggedIn { logged_in: false } => return Err(TrickleError::LoginRejected),
            _ => return Err(TrickleError::ProtocolViolation("expected LoggedIn")),
        }
        info!(session = %session_id, "logged in");

        Ok(Self::spawn(session_id, framed))
    }

    fn spawn(session_id: String, framed: Framed<TcpStream, ClientCodec>) -> Self {
        let (net_writer, net_reader) = framed.split();
        let (tx, rx) = mpsc::channel(64);
        let routes = Arc::new(Mutex::new(Routes::default()));
        let (clip_tx, clip_rx) = watch::channel(None);

        tokio::spawn(write_loop(net_writer, rx));
        tokio::spawn(read_loop(net_reader, Arc::clone(&routes), clip_tx));

        Self {
            session_id,
            tx,
            routes,
            clip_rx,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Latest clipboard text pushed by the host.
    pub fn clipboard(&self) -> watch::Receiver<Option<ClipMessage>> {
        self.clip_rx.clone()
    }

    /// Tell the host the session is over.
    pub async fn close(&self) -> Result<(), TrickleError> {
        self.tx.send(ClientMessage::Close).await?;
        Ok(())
    }

    async fn register<T>(
        &self,
        seq: u64,
        pick: impl FnOnce(&mut Routes) -> &mut HashMap<u64, Reply<T>>,
    ) -> Result<oneshot::Receiver<Result<T, TrickleError>>, TrickleError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut routes = self.routes.lock().await;
        if let Some(reason) = &routes.closed {
            return Err(reason.to_error());
        }
        pick(&mut *routes).insert(seq, reply_tx);
        Ok(reply_rx)
    }
}

#[async_trait]
impl FrameTransport for TcpTransport {
    async fn request_frame(
        &self,
        seq: u64,
        max_width: u32,
        max_height: u32,
        options: FrameOptions,
    ) -> Result<FrameMessage, TrickleError> {
        let reply = self.register(seq, |r| &mut r.frames).await?;
        self.tx
            .send(ClientMessage::RequestFrame {
                seq,
                max_width,
                max_height,
                options,
            })
            .await?;
        reply.await.map_err(|_| TrickleError::ChannelClosed)?
    }

    async fn send_events(&self, seq: u64, batch: InputBatch) -> Result<(), TrickleError> {
        let reply = self.register(seq, |r| &mut r.acks).await?;
        self.tx.send(ClientMessage::SendEvents { seq, batch }).await?;
        reply.await.map_err(|_| TrickleError::ChannelClosed)?
    }
}

async fn next_message(framed: &mut Framed<TcpStream, ClientCodec>) -> Result<ServerMessage, TrickleError> {
    match framed.next().await {
        Some(message) => message,
        None => Err(TrickleError::ChannelClosed),
    }
}

async fn write_loop(
    mut net_writer: SplitSink<Framed<TcpStream, ClientCodec>, ClientMessage>,
    mut rx: mpsc::Receiver<ClientMessage>,
) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, ClientMessage::Close);
        if let Err(e) = net_writer.send(message).await {
            warn!(error = %e, "network write failed");
            break;
        }
        if closing {
            break;
        }
    }
}

async fn read_loop(
    mut net_reader: SplitStream<Framed<TcpStream, ClientCodec>>,
    routes: Arc<Mutex<Routes>>,
    clip_tx: watch::Sender<Option<ClipMessage>>,
) {
    let reason = loop {
        let message = match net_reader.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!(error = %e, "network read failed");
                break CloseReason::Io(e.to_string());
            }
            None => break CloseReason::Eof,
        };

        match message {
            ServerMessage::Frame(mut frame) => {
                if let Some(clip) = frame.clip.take() {
                    let _ = clip_tx.send(Some(clip));
                }
                let waiter = routes.lock().await.frames.remove(&frame.seq);
                match waiter {
                    Some(reply) => {
                        let _ = reply.send(Ok(frame));
                    }
                    None => debug!(seq = frame.seq, "unsolicited frame dropped"),
                }
            }
            ServerMessage::EventsAck { seq } => {
                if let Some(reply) = routes.lock().await.acks.remove(&seq) {
                    let _ = reply.send(Ok(()));
                }
            }
            ServerMessage::Clip(clip) => {
                let _ = clip_tx.send(Some(clip));
            }
            ServerMessage::Close { reason } => {
                info!(%reason, "host closed session");
                break CloseReason::Host(reason);
            }
            other => {
                warn!(kind = other.kind(), "unexpected message after login");
                break CloseReason::Host(format!("unexpected {}", other.kind()));
            }
        }
    };

    let mut routes = routes.lock().await;
    for (_, reply) in routes.frames.drain() {
        let _ = reply.send(Err(reason.to_error()));
    }
    for (_, reply) in routes.acks.drain() {
        let _ = reply.send(Err(reason.to_error()));
    }
    routes.closed = Some(reason);
}
