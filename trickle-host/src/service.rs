//! Host service core logic.
//!
//! Accepts viewer connections and runs one task per connection. Each
//! task owns its [`HostSession`] outright; capture and encoding run on
//! the blocking pool with the session moved in and back out.
//!
//! ```text
//! accept ──► slot free? ──no──► Close { "host busy" }
//!               │yes
//!               ▼
//!   StartSession → Challenge
//!   Login        → LoggedIn ──false──► close
//!   RequestFrame → schedule → (replay | capture+encode per ready seq) → Frame
//!   SendEvents   → dedupe → InputSink → EventsAck
//!   Close        → done
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use trickle_core::codec::HostCodec;
use trickle_core::error::TrickleError;
use trickle_core::protocol::{ClientMessage, ClipMessage, FrameMessage, ServerMessage};
use trickle_core::session::{FrameRequest, HostSession, Scheduled, SessionConfig};

use crate::config::HostConfig;
use crate::input::InputSink;
use crate::source::FrameSource;

type Connection = Framed<TcpStream, HostCodec>;

/// How long a refused viewer gets to send its first message.
const REFUSE_GRACE: Duration = Duration::from_secs(2);

// ── HostService ──────────────────────────────────────────────────

/// The top-level host service.
pub struct HostService {
    config: HostConfig,
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn InputSink>,
    running: Arc<AtomicBool>,
    sessions: Arc<AtomicUsize>,
}

/// What every connection task shares.
struct Shared {
    session: SessionConfig,
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn InputSink>,
    running: Arc<AtomicBool>,
}

impl HostService {
    pub fn new(config: HostConfig, source: Arc<dyn FrameSource>, sink: Arc<dyn InputSink>) -> Self {
        Self {
            config,
            source,
            sink,
            running: Arc::new(AtomicBool::new(false)),
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Obtain a handle that can be used to stop the service from
    /// another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Connections currently holding a session slot.
    pub fn active_sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Bind the configured address and serve until stopped.
    pub async fn run(&self) -> io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        self.serve(listener).await
    }

    /// Serve viewers on an already bound listener until stopped.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        self.running.store(true, Ordering::SeqCst);
        info!("trickle host listening on {}", listener.local_addr()?);

        let shared = Arc::new(Shared {
            session: self.config.to_session_config(),
            source: Arc::clone(&self.source),
            sink: Arc::clone(&self.sink),
            running: Arc::clone(&self.running),
        });
        let max_sessions = self.config.network.max_sessions.max(1);

        while self.is_running() {
            let accept = tokio::select! {
                result = listener.accept() => result,
                _ = wait_for_stop(&self.running) => break,
            };

            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            let Some(slot) = SessionSlot::claim(&self.sessions, max_sessions) else {
                warn!(%peer, max_sessions, "refusing viewer: host busy");
                tokio::spawn(refuse(stream));
                continue;
            };

            info!(%peer, "viewer connected");
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let _slot = slot;
                match serve_connection(stream, peer, shared).await {
                    Ok(()) => info!(%peer, "viewer disconnected"),
                    Err(e) => error!(%peer, error = %e, "session failed"),
                }
            });
        }

        self.running.store(false, Ordering::SeqCst);
        info!("trickle host stopped");
        Ok(())
    }
}

/// A claimed session slot, released on drop.
struct SessionSlot(Arc<AtomicUsize>);

impl SessionSlot {
    fn claim(sessions: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        sessions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Self(Arc::clone(sessions)))
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Answer the viewer's first message with `Close` and hang up.
async fn refuse(stream: TcpStream) {
    let mut conn = Framed::new(stream, HostCodec::new());
    let _ = tokio::time::timeout(REFUSE_GRACE, conn.next()).await;
    let _ = conn.send(ServerMessage::close("host busy")).await;
}

// ── Connection ───────────────────────────────────────────────────

async fn serve_connection(stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) -> Result<(), TrickleError> {
    stream.set_nodelay(true)?;
    let mut conn = Framed::new(stream, HostCodec::new());
    let mut session = HostSession::new(shared.session.clone());
    let mut last_clip = None;
    debug!(%peer, session = %session.id(), "session created");

    loop {
        let next = tokio::select! {
            next = conn.next() => next,
            _ = wait_for_stop(&shared.running) => {
                let _ = conn.send(ServerMessage::close("host shutting down")).await;
                return Ok(());
            }
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                let _ = conn.send(ServerMessage::close(e.to_string())).await;
                return Err(e);
            }
            None => return Ok(()),
        };

        match dispatch(&mut conn, session, &mut last_clip, &shared, message).await {
            Ok((returned, true)) => session = returned,
            Ok((_, false)) => return Ok(()),
            Err(e) => {
                let _ = conn.send(ServerMessage::close(e.to_string())).await;
                return Err(e);
            }
        }
    }
}

/// Handle one message. The session is handed back with `false` when
/// the connection should end.
async fn dispatch(
    conn: &mut Connection,
    mut session: HostSession,
    last_clip: &mut Option<String>,
    shared: &Shared,
    message: ClientMessage,
) -> Result<(HostSession, bool), TrickleError> {
    match message {
        ClientMessage::StartSession => {
            let challenge = session.start()?;
            conn.send(challenge).await?;
        }

        ClientMessage::Login { response } => {
            let reply = session.login(&response)?;
            let accepted = matches!(reply, ServerMessage::LoggedIn { logged_in: true });
            conn.send(reply).await?;
            return Ok((session, accepted));
        }

        ClientMessage::RequestFrame {
            seq,
            max_width,
            max_height,
            options,
        } => {
            let request = FrameRequest {
                seq,
                max_width,
                max_height,
                options,
            };
            match session.schedule(request)? {
                Scheduled::Replay(frame) => {
                    debug!(seq, "replaying frame");
                    conn.send(ServerMessage::Frame(frame)).await?;
                }
                Scheduled::Ready(ready) => {
                    for request in ready {
                        let (returned, mut frame) = encode_frame(session, shared, request).await?;
                        session = returned;
                        let clip = shared.source.clipboard();
                        if clip.is_some() && clip != *last_clip {
                            last_clip.clone_from(&clip);
                            frame.clip = clip.map(|text| ClipMessage { text });
                        }
                        conn.send(ServerMessage::Frame(frame)).await?;
                    }
                }
            }
        }

        ClientMessage::SendEvents { seq, batch } => {
            if let Some(batch) = session.accept_events(seq, batch)? {
                shared.sink.inject(session.id(), &batch)?;
            } else {
                debug!(seq, "repeated input batch ignored");
            }
            conn.send(ServerMessage::EventsAck { seq }).await?;
        }

        ClientMessage::Close => {
            info!(session = %session.id(), "viewer closed session");
            session.close();
            return Ok((session, false));
        }
    }
    Ok((session, true))
}

/// Capture, classify and encode one frame on the blocking pool.
async fn encode_frame(
    mut session: HostSession,
    shared: &Shared,
    request: FrameRequest,
) -> Result<(HostSession, FrameMessage), TrickleError> {
    let source = Arc::clone(&shared.source);
    let (session, encoded) = tokio::task::spawn_blocking(move || {
        let encoded = session.encode_next(&request, source.capture());
        (session, encoded)
    })
    .await
    .map_err(|e| TrickleError::Other(format!("encoder task failed: {e}")))?;
    Ok((session, encoded?))
}

/// Resolves when `running` becomes false.
async fn wait_for_stop(running: &AtomicBool) {
    loop {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::LoggingInputSink;
    use crate::source::PatternSource;

    fn service(max_sessions: usize) -> HostService {
        let mut config = HostConfig::default();
        config.network.max_sessions = max_sessions;
        HostService::new(
            config,
            Arc::new(PatternSource::new(64, 48)),
            Arc::new(LoggingInputSink::new()),
        )
    }

    #[test]
    fn service_creates_stopped() {
        let svc = service(1);
        assert!(!svc.is_running());
        assert_eq!(svc.active_sessions(), 0);
    }

    #[test]
    fn stop_handle_works() {
        let svc = service(1);
        let handle = svc.stop_handle();
        handle.store(true, Ordering::SeqCst);
        assert!(svc.is_running());
        svc.stop();
        assert!(!svc.is_running());
    }

    #[test]
    fn slots_are_bounded_and_released() {
        let sessions = Arc::new(AtomicUsize::new(0));
        let first = SessionSlot::claim(&sessions, 2).unwrap();
        let second = SessionSlot::claim(&sessions, 2).unwrap();
        assert!(SessionSlot::claim(&sessions, 2).is_none());
        drop(first);
        assert_eq!(sessions.load(Ordering::SeqCst), 1);
        assert!(SessionSlot::claim(&sessions, 2).is_some());
        drop(second);
    }
}
