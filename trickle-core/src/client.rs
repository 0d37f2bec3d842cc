//! Viewer-side frame consumer.
//!
//! One task runs one scheduling loop. Every source of work re-enters it
//! through `tokio::select!`:
//!
//! ```text
//!            ┌──────── tick (7–25 ms) ─────────┐
//!            │  poll_request → spawn fetch      │
//!            │  take_batch   → spawn send       │
//!            │  stall check                     │
//!            ▼                                  │
//!  fetch done ──► pipeline.complete / fail ──► draw every ready frame in order
//!  send done  ──► propagate transport errors
//!  input evt  ──► batcher.push
//! ```
//!
//! Tile payloads of one frame are decompressed concurrently on the
//! blocking pool and joined; any tile failing drops the whole frame.
//! After a drop, the next request asks for `FULL_REFRESH` and every
//! frame below that sequence is discarded undrawn, since the host
//! encoded it against the frame the viewer never drew.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::{BoxFuture, try_join_all};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::delta::DrawDecoder;
use crate::error::TrickleError;
use crate::flags::FrameOptions;
use crate::protocol::{FrameMessage, FrameStats, InputBatch, InputEvent};
use crate::session::{FramePipeline, InputBatcher};
use crate::surface::PixelSurface;

/// Frames averaged for the fps figure.
const FPS_WINDOW: usize = 60;

// ── FrameTransport ───────────────────────────────────────────────

/// The viewer's view of a logged-in session.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    async fn request_frame(
        &self,
        seq: u64,
        max_width: u32,
        max_height: u32,
        options: FrameOptions,
    ) -> Result<FrameMessage, TrickleError>;

    async fn send_events(&self, seq: u64, batch: InputBatch) -> Result<(), TrickleError>;
}

// ── ClientStats ──────────────────────────────────────────────────

/// Running totals exposed to the UI.
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    pub frames_drawn: u64,
    /// Frames dropped because a payload would not decode.
    pub frames_failed: u64,
    /// Compressed payload bytes received.
    pub bytes_received: u64,
    pub rtt: Duration,
    pub fps: f64,
    pub last_seq: u64,
    /// Encoder counters of the last drawn frame.
    pub last_frame: FrameStats,
}

/// A frame with every tile payload decompressed.
struct DecodedFrame {
    tiles: Vec<(String, PixelSurface)>,
    stats: FrameStats,
    bytes: u64,
}

type Fetch = BoxFuture<'static, (u64, Result<DecodedFrame, TrickleError>)>;
type Dispatch = BoxFuture<'static, Result<(), TrickleError>>;

// ── ScreenClient ─────────────────────────────────────────────────

/// Drives the frame pipeline against a [`FrameTransport`] and keeps the
/// decoded canvas.
///
/// The canvas is published through a `tokio::sync::watch` channel so a
/// renderer can read the latest frame without blocking the loop. It
/// survives reconnects.
pub struct ScreenClient {
    config: ClientConfig,
    decoder: DrawDecoder,
    running: Arc<AtomicBool>,
    canvas_tx: watch::Sender<PixelSurface>,
    canvas_rx: watch::Receiver<PixelSurface>,
    stats_tx: watch::Sender<ClientStats>,
    stats_rx: watch::Receiver<ClientStats>,
    stats: ClientStats,
    draw_times: VecDeque<Instant>,
}

impl ScreenClient {
    pub fn new(config: ClientConfig) -> Self {
        let (canvas_tx, canvas_rx) = watch::channel(PixelSurface::default());
        let (stats_tx, stats_rx) = watch::channel(ClientStats::default());
        let decoder = DrawDecoder::new().with_max_size(config.max_width, config.max_height);
        Self {
            config,
            decoder,
            running: Arc::new(AtomicBool::new(true)),
            canvas_tx,
            canvas_rx,
            stats_tx,
            stats_rx,
            stats: ClientStats::default(),
            draw_times: VecDeque::with_capacity(FPS_WINDOW),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Latest decoded canvas.
    pub fn canvas_receiver(&self) -> watch::Receiver<PixelSurface> {
        self.canvas_rx.clone()
    }

    pub fn stats_receiver(&self) -> watch::Receiver<ClientStats> {
        self.stats_rx.clone()
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    /// A cloneable stop handle; storing `false` ends [`run`](Self::run).
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the scheduling loop until stopped or a session-fatal error.
    ///
    /// Returns `Ok(())` after [`stop`](Self::stop). Decode failures only
    /// drop the affected frame; everything else ends the session.
    pub async fn run(
        &mut self,
        transport: Arc<dyn FrameTransport>,
        input: &mut mpsc::Receiver<InputEvent>,
    ) -> Result<(), TrickleError> {
        let started = now();
        let stall_timeout = self.config.stall_timeout();
        let mut pipeline = FramePipeline::<DecodedFrame>::new();
        let mut batcher = InputBatcher::new(self.config.input_idle(), started);
        let mut fetches: FuturesUnordered<Fetch> = FuturesUnordered::new();
        let mut sends: FuturesUnordered<Dispatch> = FuturesUnordered::new();
        let mut tick = tokio::time::interval(self.config.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_progress = started;
        let mut input_open = true;
        let mut resync = Resync::Clean;

        let result = loop {
            if !self.is_running() {
                break Ok(());
            }

            tokio::select! {
                _ = tick.tick() => {
                    let now = now();
                    while let Some(seq) = pipeline.poll_request(now) {
                        let mut options = self.config.options;
                        if resync == Resync::Pending {
                            options |= FrameOptions::FULL_REFRESH;
                            resync = Resync::Until(seq);
                        }
                        fetches.push(fetch(
                            Arc::clone(&transport),
                            seq,
                            self.config.max_width,
                            self.config.max_height,
                            options,
                        ));
                    }
                    if let Some((seq, batch)) = batcher.take_batch(now) {
                        let transport = Arc::clone(&transport);
                        sends.push(async move { transport.send_events(seq, batch).await }.boxed());
                    }
                    if pipeline.in_flight() > 0 && now.saturating_duration_since(last_progress) > stall_timeout {
                        warn!(?stall_timeout, "no frame completed in time");
                        break Err(TrickleError::Timeout(stall_timeout));
                    }
                }

                Some((seq, outcome)) = fetches.next(), if !fetches.is_empty() => {
                    let now = now();
                    let applied = pipeline.next_apply();
                    match outcome {
                        Ok(frame) => {
                            pipeline.complete(seq, now, frame);
                        }
                        Err(e) if e.is_frame_local() => {
                            warn!(seq, error = %e, "frame dropped");
                            self.stats.frames_failed += 1;
                            if !resync.discards(seq) {
                                resync = Resync::Pending;
                            }
                            pipeline.fail(seq, now);
                        }
                        Err(e) => break Err(e),
                    }
                    if let Err(e) = self.draw_ready(&mut pipeline, resync) {
                        break Err(e);
                    }
                    // Only moving past the oldest sequence counts against a stall.
                    if pipeline.next_apply() != applied {
                        last_progress = now;
                    }
                }

                Some(sent) = sends.next(), if !sends.is_empty() => {
                    if let Err(e) = sent {
                        break Err(e);
                    }
                }

                event = input.recv(), if input_open => match event {
                    Some(event) => batcher.push(event),
                    None => input_open = false,
                },
            }
        };

        pipeline.stop();
        match &result {
            Ok(()) => info!(frames = self.stats.frames_drawn, "client stopped"),
            Err(e) => warn!(error = %e, "session ended"),
        }
        result
    }

    /// Draw every frame the pipeline releases, in sequence order.
    fn draw_ready(
        &mut self,
        pipeline: &mut FramePipeline<DecodedFrame>,
        resync: Resync,
    ) -> Result<(), TrickleError> {
        let mut drew = false;
        while let Some((seq, frame)) = pipeline.next_ready() {
            if resync.discards(seq) {
                debug!(seq, "stale frame discarded");
                continue;
            }
            for (draw, payload) in &frame.tiles {
                self.decoder.apply(draw, payload)?;
            }
            drew = true;
            self.record_draw(seq, &frame, pipeline.rtt());
            debug!(seq, bytes = frame.bytes, tiles = frame.tiles.len(), "frame drawn");
        }

        if drew {
            self.canvas_tx.send_replace(self.decoder.canvas().clone());
        }
        let _ = self.stats_tx.send(self.stats.clone());
        Ok(())
    }

    fn record_draw(&mut self, seq: u64, frame: &DecodedFrame, rtt: Duration) {
        let now = now();
        if self.draw_times.len() == FPS_WINDOW {
            self.draw_times.pop_front();
        }
        self.draw_times.push_back(now);

        self.stats.frames_drawn += 1;
        self.stats.bytes_received += frame.bytes;
        self.stats.rtt = rtt;
        self.stats.last_seq = seq;
        self.stats.last_frame = frame.stats;
        self.stats.fps = match (self.draw_times.front(), self.draw_times.back()) {
            (Some(first), Some(last)) if self.draw_times.len() > 1 => {
                let span = last.saturating_duration_since(*first).as_secs_f64();
                if span > 0.0 {
                    (self.draw_times.len() - 1) as f64 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
    }
}

/// Recovery state after a dropped frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resync {
    Clean,
    /// A frame was dropped; the next request carries `FULL_REFRESH`.
    Pending,
    /// The refresh went out with this sequence.
    Until(u64),
}

impl Resync {
    /// Whether a frame with `seq` was encoded against a dropped one.
    fn discards(self, seq: u64) -> bool {
        match self {
            Resync::Clean => false,
            Resync::Pending => true,
            Resync::Until(refresh) => seq < refresh,
        }
    }
}

/// Clock that follows `tokio::time::pause`.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn fetch(
    transport: Arc<dyn FrameTransport>,
    seq: u64,
    max_width: u32,
    max_height: u32,
    options: FrameOptions,
) -> Fetch {
    async move {
        let outcome = match transport.request_frame(seq, max_width, max_height, options).await {
            Ok(message) => decode_tiles(message).await,
            Err(e) => Err(e),
        };
        (seq, outcome)
    }
    .boxed()
}

async fn decode_tiles(message: FrameMessage) -> Result<DecodedFrame, TrickleError> {
    let bytes = message.payload_bytes();
    let stats = message.stats;
    let jobs = message.frames.into_iter().map(|tile| async move {
        let payload = tokio::task::spawn_blocking(move || tile.image.decode())
            .await
            .map_err(|e| TrickleError::decode(format!("payload worker failed: {e}")))??;
        Ok::<_, TrickleError>((tile.draw, payload))
    });
    let tiles = try_join_all(jobs).await?;
    Ok(DecodedFrame {
        tiles,
        stats,
        bytes,
    })
}

// ── Reconnect ────────────────────────────────────────────────────

/// Run `client` over transports from `connect`, reconnecting with
/// exponential backoff after reconnect-worthy errors.
///
/// The retry budget resets whenever a session manages to draw a frame.
/// `LoginRejected` and errors past the budget are returned as-is.
pub async fn run_with_reconnect<C, Fut>(
    client: &mut ScreenClient,
    input: &mut mpsc::Receiver<InputEvent>,
    mut connect: C,
) -> Result<(), TrickleError>
where
    C: FnMut() -> Fut,
    Fut: Future<Output = Result<Arc<dyn FrameTransport>, TrickleError>>,
{
    let policy = client.config().reconnect.clone();
    let mut attempt = 0u32;

    loop {
        let drawn_before = client.stats().frames_drawn;
        let outcome = match connect().await {
            Ok(transport) => client.run(transport, input).await,
            Err(e) => Err(e),
        };
        if client.stats().frames_drawn > drawn_before {
            attempt = 0;
        }

        match outcome {
            Ok(()) => return Ok(()),
            Err(e) if e.is_reconnectable() && attempt < policy.max_retries && client.is_running() => {
                let delay = policy.delay(attempt);
                attempt += 1;
                warn!(attempt, ?delay, error = %e, "reconnecting");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(error = %e, attempts = attempt, "giving up");
                return Err(e);
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::auth;
    use crate::session::{FrameRequest, HostSession, Scheduled, SessionConfig};
    use crate::surface::Rect;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicU64};

    /// The host session in-process.
    struct Loopback {
        session: Mutex<HostSession>,
        done: Mutex<HashMap<u64, FrameMessage>>,
        /// Sequence whose payload gets corrupted.
        corrupt: Option<u64>,
        /// Hold the corrupted reply until the next sequence is requested.
        hold: bool,
        /// Sequences from here on are never answered.
        silent_from: Option<u64>,
        highest: AtomicU64,
    }

    fn frame_for(seq: u64) -> PixelSurface {
        let mut frame = PixelSurface::filled(64, 48, 0x203040);
        let pixels: Vec<u32> = (0..256u32).map(|i| i * 977 + seq as u32 * 13).collect();
        let tile = PixelSurface::from_pixels(16, 16, pixels);
        tile.copy_to(tile.bounds(), &mut frame, (seq % 4) as u32 * 16, 16);
        frame.fill(seq as u32 * 0x010101, Rect::new(0, 32, 16, 16));
        frame
    }

    impl Loopback {
        fn new(corrupt: Option<u64>) -> Self {
            let mut session = HostSession::new(SessionConfig {
                password: "pw".into(),
                ..Default::default()
            });
            let crate::protocol::ServerMessage::Challenge { salt, challenge, .. } =
                session.start().unwrap()
            else {
                panic!("expected challenge");
            };
            session
                .login(&auth::login_response(&challenge, &salt, "pw"))
                .unwrap();
            Self {
                session: Mutex::new(session),
                done: Mutex::new(HashMap::new()),
                corrupt,
                hold: false,
                silent_from: None,
                highest: AtomicU64::new(0),
            }
        }

        /// Corrupt `seq` once `seq + 1` is in flight; `seq + 2` never answers.
        fn corrupt_behind(seq: u64) -> Self {
            Self {
                hold: true,
                silent_from: Some(seq + 2),
                ..Self::new(Some(seq))
            }
        }
    }

    #[async_trait]
    impl FrameTransport for Loopback {
        async fn request_frame(
            &self,
            seq: u64,
            max_width: u32,
            max_height: u32,
            options: FrameOptions,
        ) -> Result<FrameMessage, TrickleError> {
            self.highest.fetch_max(seq, Ordering::SeqCst);
            if self.silent_from.is_some_and(|silent| seq >= silent) {
                return futures::future::pending().await;
            }
            let request = FrameRequest {
                seq,
                max_width,
                max_height,
                options,
            };
            {
                let mut session = self.session.lock().unwrap();
                let ready = match session.schedule(request)? {
                    Scheduled::Replay(message) => return Ok(message),
                    Scheduled::Ready(ready) => ready,
                };
                let mut done = self.done.lock().unwrap();
                for req in ready {
                    done.insert(req.seq, session.encode_next(&req, frame_for(req.seq))?);
                }
            }

            // A request ahead of sequence waits for the gap to fill.
            let mut message = loop {
                let finished = self.done.lock().unwrap().remove(&seq);
                match finished {
                    Some(message) => break message,
                    None => tokio::task::yield_now().await,
                }
            };
            if self.corrupt == Some(seq) {
                while self.hold && self.highest.load(Ordering::SeqCst) <= seq {
                    tokio::task::yield_now().await;
                }
                let tile = message.frames.first_mut().expect("changed frame has a tile");
                tile.image.width = 4;
                tile.image.height = 4;
                tile.image.data = vec![1, 2, 3];
            }
            Ok(message)
        }

        async fn send_events(&self, _seq: u64, _batch: InputBatch) -> Result<(), TrickleError> {
            Ok(())
        }
    }

    /// Never answers.
    struct Silent;

    #[async_trait]
    impl FrameTransport for Silent {
        async fn request_frame(
            &self,
            _seq: u64,
            _max_width: u32,
            _max_height: u32,
            _options: FrameOptions,
        ) -> Result<FrameMessage, TrickleError> {
            futures::future::pending().await
        }

        async fn send_events(&self, _seq: u64, _batch: InputBatch) -> Result<(), TrickleError> {
            Ok(())
        }
    }

    /// Answers every sequence but the first with an empty frame.
    struct LostFirst;

    #[async_trait]
    impl FrameTransport for LostFirst {
        async fn request_frame(
            &self,
            seq: u64,
            _max_width: u32,
            _max_height: u32,
            _options: FrameOptions,
        ) -> Result<FrameMessage, TrickleError> {
            if seq == 1 {
                return futures::future::pending().await;
            }
            Ok(FrameMessage {
                seq,
                frames: Vec::new(),
                stats: FrameStats::default(),
                clip: None,
            })
        }

        async fn send_events(&self, _seq: u64, _batch: InputBatch) -> Result<(), TrickleError> {
            Ok(())
        }
    }

    /// Stop `client` once it has drawn past `seq`.
    fn stop_after(client: &ScreenClient, seq: u64) {
        let mut stats = client.stats_receiver();
        let stop = client.stop_handle();
        tokio::spawn(async move {
            while stats.changed().await.is_ok() {
                if stats.borrow().last_seq >= seq {
                    stop.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });
    }

    #[tokio::test]
    async fn draws_frames_in_order() {
        let mut client = ScreenClient::new(ClientConfig::default());
        let canvas = client.canvas_receiver();
        let (_input_tx, mut input_rx) = mpsc::channel(8);
        stop_after(&client, 5);

        client
            .run(Arc::new(Loopback::new(None)), &mut input_rx)
            .await
            .unwrap();

        let stats = client.stats().clone();
        assert!(stats.frames_drawn >= 5);
        assert_eq!(stats.frames_failed, 0);
        assert_eq!(*canvas.borrow(), frame_for(stats.last_seq));
    }

    #[tokio::test]
    async fn undecodable_frame_is_skipped_and_refreshed() {
        let mut client = ScreenClient::new(ClientConfig::default());
        let canvas = client.canvas_receiver();
        let (_input_tx, mut input_rx) = mpsc::channel(8);
        stop_after(&client, 8);

        client
            .run(Arc::new(Loopback::new(Some(2))), &mut input_rx)
            .await
            .unwrap();

        let stats = client.stats().clone();
        assert_eq!(stats.frames_failed, 1);
        assert_eq!(*canvas.borrow(), frame_for(stats.last_seq));
    }

    #[tokio::test]
    async fn frames_behind_a_dropped_one_are_not_drawn() {
        let mut client = ScreenClient::new(ClientConfig::default());
        let canvas = client.canvas_receiver();
        let (_input_tx, mut input_rx) = mpsc::channel(8);

        let mut stats = client.stats_receiver();
        let stop = client.stop_handle();
        tokio::spawn(async move {
            while stats.changed().await.is_ok() {
                if stats.borrow().frames_failed > 0 {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            stop.store(false, Ordering::SeqCst);
        });

        client
            .run(Arc::new(Loopback::corrupt_behind(2)), &mut input_rx)
            .await
            .unwrap();

        // Frame 3 was encoded against the dropped frame 2.
        let stats = client.stats().clone();
        assert_eq!(stats.frames_failed, 1);
        assert_eq!(stats.frames_drawn, 1);
        assert_eq!(stats.last_seq, 1);
        assert_eq!(*canvas.borrow(), frame_for(1));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_host_times_out() {
        let mut client = ScreenClient::new(ClientConfig {
            stall_timeout_ms: 200,
            ..Default::default()
        });
        let (_input_tx, mut input_rx) = mpsc::channel(8);
        let err = client.run(Arc::new(Silent), &mut input_rx).await.unwrap_err();
        assert!(matches!(err, TrickleError::Timeout(_)));
        assert!(err.is_reconnectable());
    }

    #[tokio::test(start_paused = true)]
    async fn later_replies_do_not_hide_a_lost_frame() {
        let mut client = ScreenClient::new(ClientConfig {
            stall_timeout_ms: 200,
            ..Default::default()
        });
        let (_input_tx, mut input_rx) = mpsc::channel(8);
        let err = client.run(Arc::new(LostFirst), &mut input_rx).await.unwrap_err();
        assert!(matches!(err, TrickleError::Timeout(_)));
        assert_eq!(client.stats().frames_drawn, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_budget() {
        let mut client = ScreenClient::new(ClientConfig::default());
        let (_input_tx, mut input_rx) = mpsc::channel(8);
        let attempts = AtomicU32::new(0);

        let err = run_with_reconnect(&mut client, &mut input_rx, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<Arc<dyn FrameTransport>, _>(TrickleError::Transport(std::io::Error::from(
                    std::io::ErrorKind::ConnectionRefused,
                )))
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, TrickleError::Transport(_)));
        // First try plus `max_retries` retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn login_rejection_is_not_retried() {
        let mut client = ScreenClient::new(ClientConfig::default());
        let (_input_tx, mut input_rx) = mpsc::channel(8);
        let attempts = AtomicU32::new(0);

        let err = run_with_reconnect(&mut client, &mut input_rx, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<Arc<dyn FrameTransport>, _>(TrickleError::LoginRejected) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, TrickleError::LoginRejected));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
