//! Integration tests: full session lifecycles through `HostContext`
//! against in-memory transport, pipeline and probe fakes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use daisy_core::{
    Codec, ConnectionType, ControllerConfig, DaisyError, DependencyProbe, DenyReason, Handshake,
    HostContext, LinkInfo, MediaPipeline, PairingRequest, QualityProfile, RawCounters, Session,
    SessionId, SessionState, StreamQuality, Transport,
};

// ── Fakes ────────────────────────────────────────────────────────

struct Link {
    tx: mpsc::UnboundedSender<RawCounters>,
    last: RawCounters,
}

/// Transport whose counter streams are fed by the test.
#[derive(Default)]
struct FakeTransport {
    links: Mutex<HashMap<SessionId, Link>>,
    hang_open: AtomicBool,
    opened: AtomicUsize,
}

/// Extra bytes reported by `close_connection` beyond the last reading.
const CLOSE_TAIL_BYTES: u64 = 1_000;

impl FakeTransport {
    fn push(&self, id: &SessionId, counters: RawCounters) -> bool {
        let mut links = self.links.lock();
        match links.get_mut(id) {
            Some(link) => {
                link.last = counters;
                link.tx.send(counters).is_ok()
            }
            None => false,
        }
    }

    /// Drop the sending side so the counter stream ends.
    fn sever(&self, id: &SessionId) {
        self.links.lock().remove(id);
    }

    fn is_open(&self, id: &SessionId) -> bool {
        self.links.lock().contains_key(id)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open_connection(
        &self,
        session: &SessionId,
        _connection_type: ConnectionType,
    ) -> Result<Handshake, DaisyError> {
        if self.hang_open.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.links.lock().insert(
            session.clone(),
            Link {
                tx,
                last: RawCounters::default(),
            },
        );
        let counters = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|c| (c, rx))
        })
        .boxed();
        Ok(Handshake {
            link: LinkInfo {
                interface_name: "en0".into(),
                ip_address: "192.168.1.20".into(),
            },
            counters,
        })
    }

    async fn close_connection(&self, session: &SessionId) -> Result<RawCounters, DaisyError> {
        match self.links.lock().remove(session) {
            Some(link) => Ok(RawCounters {
                bytes_sent: link.last.bytes_sent + CLOSE_TAIL_BYTES,
                ..link.last
            }),
            None => Ok(RawCounters::default()),
        }
    }
}

#[derive(Default)]
struct FakePipeline {
    frames: AtomicU64,
    applied: Mutex<Vec<(SessionId, StreamQuality)>>,
    hang_negotiate: AtomicBool,
}

impl FakePipeline {
    fn applied_for(&self, id: &SessionId) -> Vec<StreamQuality> {
        self.applied
            .lock()
            .iter()
            .filter(|(s, _)| s == id)
            .map(|(_, q)| *q)
            .collect()
    }
}

#[async_trait]
impl MediaPipeline for FakePipeline {
    async fn negotiate(
        &self,
        _session: &SessionId,
        _connection_type: ConnectionType,
    ) -> Result<Codec, DaisyError> {
        if self.hang_negotiate.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(Codec::H264)
    }

    async fn apply_quality(
        &self,
        session: &SessionId,
        quality: &StreamQuality,
    ) -> Result<(), DaisyError> {
        self.applied.lock().push((session.clone(), *quality));
        Ok(())
    }

    fn frames_sent(&self, _session: &SessionId) -> u64 {
        self.frames.fetch_add(30, Ordering::SeqCst) + 30
    }
}

#[derive(Default)]
struct FakeProbe {
    hang: AtomicBool,
}

#[async_trait]
impl DependencyProbe for FakeProbe {
    async fn ping(&self, _timeout: Duration) -> Result<Duration, DaisyError> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(Duration::from_millis(2))
    }
}

// ── Helpers ──────────────────────────────────────────────────────

struct Harness {
    ctx: Arc<HostContext>,
    transport: Arc<FakeTransport>,
    pipeline: Arc<FakePipeline>,
    probe: Arc<FakeProbe>,
}

fn test_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.driver.handshake_timeout = Duration::from_secs(1);
    config.driver.telemetry_timeout = Duration::from_secs(3);
    config.driver.teardown_timeout = Duration::from_secs(1);
    config.driver.retry_backoff = Duration::from_millis(20);
    config.driver.max_backoff = Duration::from_millis(100);
    config.health.probe_timeout = Duration::from_millis(50);
    config.shutdown_grace = Duration::from_secs(2);
    config
}

fn harness(config: ControllerConfig) -> Harness {
    let transport = Arc::new(FakeTransport::default());
    let pipeline = Arc::new(FakePipeline::default());
    let probe = Arc::new(FakeProbe::default());
    let ctx = HostContext::new(config, transport.clone(), pipeline.clone(), probe.clone());
    Harness {
        ctx,
        transport,
        pipeline,
        probe,
    }
}

fn pair(ctx: &HostContext, code: &str, device_id: &str) -> String {
    assert_ok!(ctx.register_pairing_code(code));
    let response = ctx.authorize(&PairingRequest::new(code, device_id, "Studio iPad"));
    assert!(response.success, "pairing failed: {:?}", response.message);
    response.token.expect("granted response carries a token")
}

/// Cumulative reading number `n` with `lost` total lost packets.
fn reading(n: u64, lost: u64) -> RawCounters {
    RawCounters {
        bytes_sent: n * 100_000,
        packets_sent: n * 100,
        packets_lost: lost,
        round_trip: Duration::from_millis(5),
    }
}

async fn wait_until<F>(ctx: &HostContext, id: &SessionId, what: &str, f: F) -> Session
where
    F: Fn(&Session) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(session) = ctx.session(id) {
            if f(&session) {
                return session;
            }
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what} on {id}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn streaming(h: &Harness, code: &str, device: &str, ct: ConnectionType) -> SessionId {
    let token = pair(&h.ctx, code, device);
    let id = assert_ok!(h.ctx.open_session(&token, ct));
    wait_until(&h.ctx, &id, "streaming", |s| s.state == SessionState::Streaming).await;
    id
}

// ── Pairing / ownership ──────────────────────────────────────────

#[tokio::test]
async fn test_pair_then_duplicate_client() {
    let h = harness(test_config());
    let token = pair(&h.ctx, "123456", "ipad-1");

    let id = assert_ok!(h.ctx.open_session(&token, ConnectionType::WiFi6));
    let err = assert_err!(h.ctx.registry().create("ipad-1".into(), ConnectionType::WiFi6));
    assert!(matches!(err, DaisyError::DuplicateClient(ref c) if c.as_str() == "ipad-1"));

    // Code and token are both single use.
    let again = h.ctx.authorize(&PairingRequest::new("123456", "ipad-1", "Studio iPad"));
    assert!(!again.success);
    let err = assert_err!(h.ctx.open_session(&token, ConnectionType::WiFi6));
    assert!(matches!(err, DaisyError::Denied(DenyReason::InvalidToken)));

    let clients = h.ctx.clients();
    assert_eq!(clients.len(), 1);
    assert!(clients[0].connected);

    let session = assert_ok!(h.ctx.close_session(&id).await);
    assert_eq!(session.state, SessionState::Disconnected);
    assert!(!assert_ok!(h.ctx.client(&"ipad-1".into())).connected);
}

// ── Adaptation ───────────────────────────────────────────────────

#[tokio::test]
async fn test_heavy_loss_halves_bitrate_until_floor() {
    let h = harness(test_config());
    let ct = ConnectionType::WiFi6;
    let id = streaming(&h, "123456", "ipad-1", ct).await;
    let profile = QualityProfile::for_connection(ct);

    let initial = assert_ok!(h.ctx.session(&id)).quality.unwrap();
    assert_eq!(initial.bitrate, profile.default_bps);

    let mut expected = initial.bitrate;
    for n in 1..=5 {
        assert!(h.transport.push(&id, reading(n, n * 8)));
        let session = wait_until(&h.ctx, &id, "sample folded", |s| {
            s.stats.is_some_and(|st| st.bytes_sent == n * 100_000)
        })
        .await;
        expected = (expected / 2).max(profile.floor_bps);
        assert_eq!(session.quality.unwrap().bitrate, expected, "after sample {n}");
        assert_eq!(session.state, SessionState::Streaming);
    }
    assert_eq!(expected, profile.floor_bps);

    let applied = h.pipeline.applied_for(&id);
    assert_eq!(applied.first().map(|q| q.bitrate), Some(profile.default_bps));
    assert_eq!(applied.last().map(|q| q.bitrate), Some(profile.floor_bps));
}

#[tokio::test]
async fn test_renegotiate_resets_quality_and_swaps_codec() {
    let h = harness(test_config());
    let ct = ConnectionType::Ethernet;
    let id = streaming(&h, "222222", "ipad-2", ct).await;

    assert!(h.transport.push(&id, reading(1, 30)));
    wait_until(&h.ctx, &id, "bitrate drop", |s| {
        s.quality.is_some_and(|q| q.bitrate < QualityProfile::for_connection(ct).default_bps)
    })
    .await;

    assert_ok!(h.ctx.renegotiate(&id, Codec::Hevc).await);
    let session = wait_until(&h.ctx, &id, "hevc", |s| {
        s.quality.is_some_and(|q| q.codec == Codec::Hevc)
    })
    .await;
    let quality = session.quality.unwrap();
    assert_eq!(quality.bitrate, QualityProfile::for_connection(ct).default_bps);
    assert_eq!(session.stats.unwrap().bytes_sent, 100_000);
}

// ── Health ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_dependency_timeouts_mark_unhealthy() {
    let h = harness(test_config());
    let _id = streaming(&h, "123456", "ipad-1", ConnectionType::Usb).await;

    let healthy = h.ctx.check_health().await;
    assert!(healthy.healthy);

    h.probe.hang.store(true, Ordering::SeqCst);
    h.ctx.check_health().await;
    let status = h.ctx.check_health().await;
    assert!(!status.healthy);
    assert!(!status.rust_service.reachable);
    assert_eq!(status.rust_service.consecutive_failures, 2);
    assert_eq!(status.active_sessions, 1);

    // The snapshot does not ping and agrees with the last check.
    let snapshot = h.ctx.health();
    assert!(!snapshot.rust_service.reachable);
    assert_eq!(snapshot.active_sessions, 1);
}

// ── Reaper ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_idle_connected_session_is_reaped() {
    let mut config = test_config();
    config.registry.idle_timeout = Duration::from_millis(100);
    config.registry.reconnect_window = Duration::from_millis(100);
    config.driver.handshake_timeout = Duration::from_secs(30);
    config.driver.auto_reconnect = false;
    let h = harness(config);
    h.pipeline.hang_negotiate.store(true, Ordering::SeqCst);

    let token = pair(&h.ctx, "123456", "ipad-1");
    let id = assert_ok!(h.ctx.open_session(&token, ConnectionType::WiFi5));
    wait_until(&h.ctx, &id, "connected", |s| s.state == SessionState::Connected).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    let report = h.ctx.reap();
    assert_eq!(report.failed, vec![id.clone()]);
    assert_eq!(assert_ok!(h.ctx.session(&id)).state, SessionState::Error);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let report = h.ctx.reap();
    assert_eq!(report.abandoned.len(), 1);
    assert_eq!(report.abandoned[0].state, SessionState::Disconnected);
    assert!(assert_err!(h.ctx.session(&id)).is_not_found());

    let deadline = Instant::now() + Duration::from_secs(5);
    while h.transport.is_open(&id) {
        assert!(Instant::now() < deadline, "driver never released the transport");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_evict_twice_is_not_found() {
    let h = harness(test_config());
    let id = streaming(&h, "123456", "ipad-1", ConnectionType::Usb).await;
    assert_ok!(h.ctx.close_session(&id).await);

    assert_ok!(h.ctx.registry().evict(&id));
    let err = assert_err!(h.ctx.registry().evict(&id));
    assert!(err.is_not_found());
}

// ── Counters ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_counters_survive_reconnect_and_drain() {
    let h = harness(test_config());
    let ct = ConnectionType::WiFi5;
    let id = streaming(&h, "123456", "ipad-1", ct).await;

    let mut last_bytes = 0;
    let mut observe = |s: &Session| {
        let bytes = s.stats.map(|st| st.bytes_sent).unwrap_or(0);
        assert!(bytes >= last_bytes, "bytes_sent went backwards");
        last_bytes = bytes;
    };

    for n in 1..=3 {
        assert!(h.transport.push(&id, reading(n, 0)));
    }
    let s = wait_until(&h.ctx, &id, "3 samples", |s| {
        s.stats.is_some_and(|st| st.bytes_sent == 300_000)
    })
    .await;
    observe(&s);
    let frames_before = s.stats.unwrap().frames_sent;

    // Drop the link; the driver fails the session and retries on its own.
    h.transport.sever(&id);
    let s = wait_until(&h.ctx, &id, "reconnected", |s| {
        s.retries == 1 && s.state == SessionState::Streaming
    })
    .await;
    observe(&s);
    assert_eq!(h.transport.opened.load(Ordering::SeqCst), 2);
    assert!(s.stats.unwrap().frames_sent >= frames_before);

    assert!(h.transport.push(&id, reading(1, 0)));
    let s = wait_until(&h.ctx, &id, "sample after reconnect", |s| {
        s.stats.is_some_and(|st| st.bytes_sent == 400_000)
    })
    .await;
    observe(&s);

    let closed = assert_ok!(h.ctx.close_session(&id).await);
    observe(&closed);
    assert_eq!(closed.state, SessionState::Disconnected);
    assert_eq!(closed.stats.unwrap().bytes_sent, 400_000 + CLOSE_TAIL_BYTES);
}

// ── Lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn test_session_ended_callback_fires() {
    let h = harness(test_config());
    let (tx, mut rx) = mpsc::unbounded_channel();
    h.ctx.on_session_ended(move |id| {
        let _ = tx.send(id.clone());
    });

    let id = streaming(&h, "123456", "ipad-1", ConnectionType::Usb).await;
    assert_ok!(h.ctx.close_session(&id).await);

    let ended = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timeout")
        .expect("callback channel closed");
    assert_eq!(ended, id);
    assert_eq!(assert_ok!(h.ctx.session(&id)).state, SessionState::Disconnected);
}

#[tokio::test]
async fn test_close_while_connecting() {
    let h = harness(test_config());
    h.transport.hang_open.store(true, Ordering::SeqCst);
    let token = pair(&h.ctx, "123456", "ipad-1");
    let id = assert_ok!(h.ctx.open_session(&token, ConnectionType::WiFi4));

    let session = assert_ok!(h.ctx.close_session(&id).await);
    assert_eq!(session.state, SessionState::Disconnected);
    assert!(session.stats.is_none());
}

#[tokio::test]
async fn test_shutdown_drains_every_session() {
    let h = harness(test_config());
    let a = streaming(&h, "111111", "ipad-a", ConnectionType::Usb).await;
    let b = streaming(&h, "222222", "ipad-b", ConnectionType::WiFi6).await;
    assert!(h.transport.push(&a, reading(1, 0)));
    wait_until(&h.ctx, &a, "sample", |s| {
        s.stats.is_some_and(|st| st.bytes_sent == 100_000)
    })
    .await;

    assert_eq!(h.ctx.shutdown().await, 0);

    for id in [&a, &b] {
        let session = assert_ok!(h.ctx.session(id));
        assert_eq!(session.state, SessionState::Disconnected);
        assert!(!h.transport.is_open(id));
    }
    assert_eq!(
        assert_ok!(h.ctx.session(&a)).stats.unwrap().bytes_sent,
        100_000 + CLOSE_TAIL_BYTES
    );

    let token = pair(&h.ctx, "333333", "ipad-c");
    assert_err!(h.ctx.open_session(&token, ConnectionType::Usb));
}

#[tokio::test]
async fn test_maintenance_loop_stops_on_signal() {
    let mut config = test_config();
    config.reaper_interval = Duration::from_millis(20);
    let h = harness(config);
    let stop = tokio_util::sync::CancellationToken::new();
    let handle = tokio::spawn({
        let ctx = h.ctx.clone();
        let stop = stop.clone();
        async move { ctx.run_maintenance(stop).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.ctx.health().rust_service.last_check.is_some());

    stop.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("maintenance loop did not stop")
        .unwrap();
}
