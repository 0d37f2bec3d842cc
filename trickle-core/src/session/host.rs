//! Host-side per-connection session state.
//!
//! A [`HostSession`] owns everything one viewer connection mutates: the
//! login phase, the retained previous frame, the request ordering state
//! and the reply cache. Exclusive `&mut` access is what keeps a single
//! capture → classify → encode pass in flight per session.
//!
//! ```text
//!  AwaitingStart ──StartSession──► Challenged ──Login ok──► LoggedIn
//!        │                             │                      │
//!        └─────────────────────────────┴── Login bad / Close ─┴──► Closed
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::delta::{BlockClassifier, ClassifierOptions, DEFAULT_BLOCK_SIZE, DeltaEncoder, EncoderConfig};
use crate::error::TrickleError;
use crate::flags::FrameOptions;
use crate::protocol::{FrameMessage, InputBatch, ServerMessage};
use crate::session::auth;
use crate::surface::PixelSurface;

/// Replies kept for replay of repeated requests.
pub const DEFAULT_REPLAY_DEPTH: usize = 8;

/// Requests ahead of the expected sequence held at most.
const MAX_HELD_REQUESTS: usize = 8;

// ── SessionPhase ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    AwaitingStart,
    Challenged {
        challenge: String,
    },
    LoggedIn {
        since: Instant,
    },
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingStart => write!(f, "AwaitingStart"),
            Self::Challenged { .. } => write!(f, "Challenged"),
            Self::LoggedIn { .. } => write!(f, "LoggedIn"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl SessionPhase {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, Self::LoggedIn { .. })
    }

    pub fn logged_in_for(&self) -> Option<Duration> {
        match self {
            Self::LoggedIn { since } => Some(since.elapsed()),
            _ => None,
        }
    }
}

// ── Configuration ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub block_size: u32,
    pub encoder: EncoderConfig,
    pub password: String,
    pub replay_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            encoder: EncoderConfig::default(),
            password: String::new(),
            replay_depth: DEFAULT_REPLAY_DEPTH,
        }
    }
}

// ── Requests ─────────────────────────────────────────────────────

/// A `RequestFrame` as scheduled by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRequest {
    pub seq: u64,
    /// 0 = no limit.
    pub max_width: u32,
    pub max_height: u32,
    pub options: FrameOptions,
}

/// What to do with an incoming request.
#[derive(Debug, Clone, PartialEq)]
pub enum Scheduled {
    /// Already answered; resend this reply.
    Replay(FrameMessage),
    /// Requests now due, in sequence order. Empty when the request was
    /// held for an earlier one.
    Ready(Vec<FrameRequest>),
}

// ── HostSession ──────────────────────────────────────────────────

#[derive(Debug)]
pub struct HostSession {
    id: String,
    salt: String,
    digest: blake3::Hash,
    phase: SessionPhase,
    classifier: BlockClassifier,
    encoder: DeltaEncoder,
    previous: Option<PixelSurface>,
    next_seq: u64,
    held: BTreeMap<u64, FrameRequest>,
    replies: VecDeque<FrameMessage>,
    replay_depth: usize,
    last_input_seq: u64,
}

impl HostSession {
    pub fn new(config: SessionConfig) -> Self {
        let salt = auth::random_token();
        Self {
            id: auth::random_token(),
            digest: auth::password_digest(&salt, &config.password),
            salt,
            phase: SessionPhase::AwaitingStart,
            classifier: BlockClassifier::new(config.block_size),
            encoder: DeltaEncoder::new(config.encoder),
            previous: None,
            next_seq: 1,
            held: BTreeMap::new(),
            replies: VecDeque::with_capacity(config.replay_depth),
            replay_depth: config.replay_depth.max(1),
            last_input_seq: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    /// Whether a previous frame is retained.
    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    // ── Login ────────────────────────────────────────────────────

    /// `StartSession`: issue a challenge.
    ///
    /// Valid from: `AwaitingStart`.
    pub fn start(&mut self) -> Result<ServerMessage, TrickleError> {
        match self.phase {
            SessionPhase::AwaitingStart => {
                let challenge = auth::random_token();
                self.phase = SessionPhase::Challenged {
                    challenge: challenge.clone(),
                };
                debug!(session = %self.id, "challenge issued");
                Ok(ServerMessage::Challenge {
                    session_id: self.id.clone(),
                    salt: self.salt.clone(),
                    challenge,
                })
            }
            _ => Err(TrickleError::ProtocolViolation(
                "cannot start: session already started",
            )),
        }
    }

    /// `Login`: check the response. A wrong response closes the session.
    ///
    /// Valid from: `Challenged`.
    pub fn login(&mut self, response: &str) -> Result<ServerMessage, TrickleError> {
        let SessionPhase::Challenged { challenge } = &self.phase else {
            return Err(TrickleError::ProtocolViolation(
                "cannot log in: no challenge outstanding",
            ));
        };

        let ok = auth::verify_response(response, challenge, &self.digest);
        if ok {
            info!(session = %self.id, "viewer logged in");
            self.phase = SessionPhase::LoggedIn {
                since: Instant::now(),
            };
        } else {
            warn!(session = %self.id, "login rejected");
            self.phase = SessionPhase::Closed;
        }
        Ok(ServerMessage::LoggedIn { logged_in: ok })
    }

    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
        self.previous = None;
        self.held.clear();
    }

    fn require_login(&self) -> Result<(), TrickleError> {
        if self.phase.is_logged_in() {
            Ok(())
        } else {
            Err(TrickleError::ProtocolViolation("not logged in"))
        }
    }

    // ── Frames ───────────────────────────────────────────────────

    /// Order an incoming frame request.
    ///
    /// Repeats of answered sequences replay the cached reply; a request
    /// ahead of the expected sequence waits for the gap to fill; one
    /// older than the cache is [`TrickleError::UnknownSequence`].
    pub fn schedule(&mut self, request: FrameRequest) -> Result<Scheduled, TrickleError> {
        self.require_login()?;

        if request.seq < self.next_seq {
            return self
                .replies
                .iter()
                .find(|reply| reply.seq == request.seq)
                .map(|reply| Scheduled::Replay(reply.clone()))
                .ok_or(TrickleError::UnknownSequence(request.seq));
        }

        if request.seq > self.next_seq {
            self.held.insert(request.seq, request);
            if self.held.len() > MAX_HELD_REQUESTS {
                return Err(TrickleError::protocol(format!(
                    "more than {MAX_HELD_REQUESTS} requests ahead of sequence {}",
                    self.next_seq
                )));
            }
            debug!(seq = request.seq, expected = self.next_seq, "request held");
            return Ok(Scheduled::Ready(Vec::new()));
        }

        let mut ready = vec![request];
        self.next_seq += 1;
        while let Some(held) = self.held.remove(&self.next_seq) {
            ready.push(held);
            self.next_seq += 1;
        }
        Ok(Scheduled::Ready(ready))
    }

    /// Classify `current` against the retained frame, encode it and
    /// retain it for the next pass. The reply is cached for replay.
    pub fn encode_next(
        &mut self,
        request: &FrameRequest,
        current: PixelSurface,
    ) -> Result<FrameMessage, TrickleError> {
        self.require_login()?;
        let current = fit(current, request.max_width, request.max_height);

        // The retained frame is only replaced once the message is built.
        let frame = if request.options.contains(FrameOptions::FULL_REFRESH) {
            self.encoder.encode_full(&current, self.classifier.block_size())
        } else {
            let options = ClassifierOptions {
                solids: !request.options.contains(FrameOptions::NO_SOLIDS),
                duplicates: !request.options.contains(FrameOptions::NO_DUPLICATES),
                ..self.classifier.options()
            };
            let classifier = BlockClassifier::with_options(self.classifier.block_size(), options);
            let classification = classifier.classify(self.previous.as_ref(), &current);
            self.encoder.encode(&classification, &current)?
        };

        let message = frame.into_message(request.seq)?;
        self.previous = Some(current);

        debug!(
            seq = message.seq,
            tiles = message.stats.tiles,
            bytes = message.stats.payload_bytes,
            micros = message.stats.encode_micros,
            "frame ready"
        );

        if self.replies.len() == self.replay_depth {
            self.replies.pop_front();
        }
        self.replies.push_back(message.clone());
        Ok(message)
    }

    // ── Input ────────────────────────────────────────────────────

    /// Accept an input batch. Returns `None` for a batch already seen.
    pub fn accept_events(
        &mut self,
        seq: u64,
        batch: InputBatch,
    ) -> Result<Option<InputBatch>, TrickleError> {
        self.require_login()?;
        if seq <= self.last_input_seq {
            return Ok(None);
        }
        self.last_input_seq = seq;
        Ok(Some(batch))
    }
}

/// Crop `surface` to the viewer's limits (0 = no limit).
fn fit(surface: PixelSurface, max_width: u32, max_height: u32) -> PixelSurface {
    let width = if max_width == 0 { surface.width() } else { surface.width().min(max_width) };
    let height = if max_height == 0 { surface.height() } else { surface.height().min(max_height) };
    if width == surface.width() && height == surface.height() {
        surface
    } else {
        surface.resized(width, height)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Rect;

    fn request(seq: u64) -> FrameRequest {
        FrameRequest {
            seq,
            max_width: 0,
            max_height: 0,
            options: FrameOptions::empty(),
        }
    }

    fn logged_in() -> HostSession {
        let mut session = HostSession::new(SessionConfig {
            password: "secret".into(),
            ..Default::default()
        });
        let ServerMessage::Challenge { salt, challenge, .. } = session.start().unwrap() else {
            panic!("expected challenge");
        };
        let reply = session
            .login(&auth::login_response(&challenge, &salt, "secret"))
            .unwrap();
        assert_eq!(reply, ServerMessage::LoggedIn { logged_in: true });
        session
    }

    #[test]
    fn login_with_wrong_password_closes() {
        let mut session = HostSession::new(SessionConfig {
            password: "secret".into(),
            ..Default::default()
        });
        let ServerMessage::Challenge { salt, challenge, .. } = session.start().unwrap() else {
            panic!("expected challenge");
        };
        let reply = session
            .login(&auth::login_response(&challenge, &salt, "guess"))
            .unwrap();
        assert_eq!(reply, ServerMessage::LoggedIn { logged_in: false });
        assert_eq!(*session.phase(), SessionPhase::Closed);
    }

    #[test]
    fn phase_transitions_are_checked() {
        let mut session = HostSession::new(SessionConfig::default());
        assert!(session.login("00").is_err());
        session.start().unwrap();
        assert!(matches!(session.start(), Err(TrickleError::ProtocolViolation(_))));
        assert!(session.schedule(request(1)).is_err());
    }

    #[test]
    fn requests_run_in_sequence_order() {
        let mut session = logged_in();
        assert_eq!(session.schedule(request(2)).unwrap(), Scheduled::Ready(vec![]));
        assert_eq!(session.schedule(request(3)).unwrap(), Scheduled::Ready(vec![]));
        assert_eq!(
            session.schedule(request(1)).unwrap(),
            Scheduled::Ready(vec![request(1), request(2), request(3)])
        );
    }

    #[test]
    fn repeated_request_replays_reply() {
        let mut session = logged_in();
        let frame = PixelSurface::filled(32, 32, 0x102030);

        session.schedule(request(1)).unwrap();
        let first = session.encode_next(&request(1), frame).unwrap();

        assert_eq!(session.schedule(request(1)).unwrap(), Scheduled::Replay(first));
    }

    #[test]
    fn sequence_older_than_cache_is_unknown() {
        let mut session = logged_in();
        let frame = PixelSurface::new(16, 16);
        for seq in 1..=10 {
            session.schedule(request(seq)).unwrap();
            session.encode_next(&request(seq), frame.clone()).unwrap();
        }
        assert!(matches!(session.schedule(request(3)), Ok(Scheduled::Replay(_))));
        assert!(matches!(
            session.schedule(request(2)),
            Err(TrickleError::UnknownSequence(2))
        ));
    }

    #[test]
    fn previous_frame_is_retained_between_passes() {
        let mut session = logged_in();
        let mut frame = PixelSurface::filled(64, 64, 0x445566);

        let first = session.encode_next(&request(1), frame.clone()).unwrap();
        assert_eq!(first.stats.unchanged, 0);
        assert!(session.has_previous());

        frame.fill(0x000000, Rect::new(0, 0, 16, 16));
        let second = session.encode_next(&request(2), frame).unwrap();
        assert_eq!(second.frames[0].draw, "X64Y64B16S1K15");
        assert_eq!(second.stats.unchanged, 15);
    }

    #[test]
    fn full_refresh_sends_whole_surface() {
        let mut session = logged_in();
        let frame = PixelSurface::filled(32, 32, 0x445566);
        session.encode_next(&request(1), frame.clone()).unwrap();

        let refresh = FrameRequest {
            options: FrameOptions::FULL_REFRESH,
            ..request(2)
        };
        let msg = session.encode_next(&refresh, frame.clone()).unwrap();
        assert_eq!(msg.frames[0].draw, "X32Y32B16!");
        assert!(msg.stats.full_frame);

        // The refreshed frame is the base for the next delta.
        assert!(session.has_previous());
        let next = session.encode_next(&request(3), frame).unwrap();
        assert_eq!(next.stats.unchanged, 4);
    }

    #[test]
    fn frames_are_cropped_to_viewer_limits() {
        let mut session = logged_in();
        let limited = FrameRequest {
            max_width: 20,
            max_height: 10,
            ..request(1)
        };
        let msg = session.encode_next(&limited, PixelSurface::new(64, 64)).unwrap();
        assert!(msg.frames[0].draw.starts_with("X20Y10B16"));
    }

    #[test]
    fn repeated_input_batches_are_dropped() {
        let mut session = logged_in();
        assert!(session.accept_events(1, InputBatch::default()).unwrap().is_some());
        assert!(session.accept_events(1, InputBatch::default()).unwrap().is_none());
        assert!(session.accept_events(2, InputBatch::default()).unwrap().is_some());
    }
}
