//! I/O scheduling: when to read, and the break pulse after writes.
//!
//! The scheduler never sleeps. Interval ticks come from a tokio [`Interval`]
//! and break steps are deadlines the owning loop waits on, so everything runs
//! on the loop that owns the [`SerialConnection`].

use crate::connection::SerialConnection;
use crate::config::{DEFAULT_BREAK_HOLD_MS, DEFAULT_BREAK_SETTLE_MS};
use crate::events::SerialEvent;
use crate::port::{PortError, SerialTransport};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Highest accepted sampling frequency.
pub const MAX_FREQUENCY_HZ: u32 = 1000;

/// What causes a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleTrigger {
    /// Read whenever the transport reports new bytes.
    Edge,
    /// Read on a fixed clock while connected.
    Interval(Duration),
}

impl SampleTrigger {
    /// Interval trigger with a period in milliseconds. Zero is rejected.
    pub fn from_millis(period_ms: u64) -> Option<Self> {
        (period_ms > 0).then(|| Self::Interval(Duration::from_millis(period_ms)))
    }

    /// Interval trigger with a period of `1000 / hz` milliseconds.
    pub fn from_frequency_hz(hz: u32) -> Option<Self> {
        if hz == 0 || hz > MAX_FREQUENCY_HZ {
            return None;
        }
        Self::from_millis(u64::from(1000 / hz))
    }

    pub fn period(&self) -> Option<Duration> {
        match self {
            Self::Edge => None,
            Self::Interval(period) => Some(*period),
        }
    }
}

/// Shape of the break pulse sent after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakTiming {
    /// Delay between the write returning and break being asserted.
    pub settle: Duration,
    /// How long break stays asserted.
    pub hold: Duration,
}

impl Default for BreakTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(DEFAULT_BREAK_SETTLE_MS),
            hold: Duration::from_millis(DEFAULT_BREAK_HOLD_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum BreakStep {
    Assert,
    Release,
}

/// Pending break steps ordered by deadline.
///
/// Pulses may overlap when writes come faster than settle + hold. The line
/// stays in break from the first assert until the last release.
#[derive(Debug, Default)]
struct BreakScheduler {
    pending: BinaryHeap<Reverse<(Instant, u64, BreakStep)>>,
    seq: u64,
    depth: usize,
}

impl BreakScheduler {
    fn schedule(&mut self, now: Instant, timing: BreakTiming) {
        let assert_at = now + timing.settle;
        self.push(assert_at, BreakStep::Assert);
        self.push(assert_at + timing.hold, BreakStep::Release);
    }

    fn push(&mut self, at: Instant, step: BreakStep) {
        self.seq += 1;
        self.pending.push(Reverse((at, self.seq, step)));
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.peek().map(|Reverse((at, _, _))| *at)
    }

    fn fire_due(&mut self, now: Instant, transport: &mut dyn SerialTransport) {
        while let Some(Reverse((at, _, step))) = self.pending.peek().copied() {
            if at > now {
                break;
            }
            self.pending.pop();

            match step {
                BreakStep::Assert => {
                    self.depth += 1;
                    if self.depth == 1 {
                        trace!("asserting break");
                        if let Err(e) = transport.set_break() {
                            warn!(error = %e, "failed to assert break");
                        }
                    }
                }
                BreakStep::Release => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        trace!("releasing break");
                        if let Err(e) = transport.clear_break() {
                            warn!(error = %e, "failed to release break");
                        }
                    }
                }
            }
        }
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.depth = 0;
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.depth == 0
    }
}

/// Drives reads and writes for one connection.
#[derive(Debug)]
pub struct IoScheduler {
    trigger: SampleTrigger,
    ticker: Option<Interval>,
    breaks: BreakScheduler,
    auto_break: bool,
    timing: BreakTiming,
}

impl IoScheduler {
    /// A zero interval period cannot drive a clock and falls back to edge
    /// sampling.
    pub fn new(trigger: SampleTrigger, auto_break: bool, timing: BreakTiming) -> Self {
        let trigger = match trigger {
            SampleTrigger::Interval(period) if period.is_zero() => {
                warn!("zero sampling period, using edge sampling");
                SampleTrigger::Edge
            }
            other => other,
        };
        Self {
            trigger,
            ticker: None,
            breaks: BreakScheduler::default(),
            auto_break,
            timing,
        }
    }

    pub fn trigger(&self) -> SampleTrigger {
        self.trigger
    }

    pub fn set_auto_break(&mut self, enabled: bool) {
        self.auto_break = enabled;
    }

    pub fn auto_break(&self) -> bool {
        self.auto_break
    }

    /// Bring timers in line with the connection state.
    ///
    /// Arms the interval clock on the first call after a connect, with the
    /// first tick one period later. Disarms it and drops pending break steps
    /// once disconnected. Must be called from within a tokio runtime.
    pub fn sync(&mut self, connected: bool) {
        if connected {
            if let (SampleTrigger::Interval(period), None) = (self.trigger, &self.ticker) {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.ticker = Some(ticker);
                debug!(period_ms = period.as_millis() as u64, "sampling clock armed");
            }
        } else {
            if self.ticker.take().is_some() {
                debug!("sampling clock disarmed");
            }
            if !self.breaks.is_idle() {
                debug!("dropping pending break pulses");
                self.breaks.clear();
            }
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.is_some()
    }

    /// Wait for the next interval tick. Never completes while disarmed.
    pub async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Deadline of the next break step, if any.
    pub fn next_break(&self) -> Option<Instant> {
        self.breaks.next_deadline()
    }

    /// Run every break step due at `now`.
    pub fn fire_breaks(&mut self, conn: &mut SerialConnection, now: Instant) {
        match conn.transport_mut() {
            Some(transport) => self.breaks.fire_due(now, transport),
            None => self.breaks.clear(),
        }
    }

    /// Handle a data-arrived notification. Only edge mode reads here.
    pub fn on_data_arrived(&mut self, conn: &mut SerialConnection) {
        if self.trigger != SampleTrigger::Edge {
            return;
        }
        match drain(conn) {
            Ok(bytes) if bytes.is_empty() => trace!("arrival with nothing to drain"),
            Ok(bytes) => emit_packet(conn, bytes),
            Err(e) => conn.handle_transport_error(e.to_string()),
        }
    }

    /// Handle an interval tick.
    pub fn on_tick(&mut self, conn: &mut SerialConnection) {
        if !conn.is_connected() {
            return;
        }
        match drain(conn) {
            Ok(bytes) if bytes.is_empty() => conn.notifier().emit(SerialEvent::PacketEmpty),
            Ok(bytes) => emit_packet(conn, bytes),
            Err(e) => conn.handle_transport_error(e.to_string()),
        }
    }

    /// Write `data`, returning the count accepted or `-1` when not connected.
    ///
    /// A failed write is a transport error and disconnects. With auto-break
    /// on, a successful non-empty write schedules a break pulse; the write
    /// itself never waits for it.
    pub fn write(&mut self, conn: &mut SerialConnection, data: &[u8]) -> isize {
        let Some(transport) = conn.transport_mut() else {
            return -1;
        };
        match transport.write_bytes(data) {
            Ok(written) => {
                trace!(written, "wrote packet");
                if self.auto_break && written > 0 {
                    self.breaks.schedule(Instant::now(), self.timing);
                }
                written as isize
            }
            Err(e) => {
                conn.handle_transport_error(e.to_string());
                self.sync(false);
                -1
            }
        }
    }
}

/// Read until the input queue reports empty.
fn drain(conn: &mut SerialConnection) -> Result<Vec<u8>, PortError> {
    let Some(transport) = conn.transport_mut() else {
        return Ok(Vec::new());
    };
    let mut packet = Vec::new();
    while transport.bytes_available()? > 0 {
        let chunk = transport.read_available()?;
        if chunk.is_empty() {
            break;
        }
        packet.extend_from_slice(&chunk);
    }
    Ok(packet)
}

fn emit_packet(conn: &SerialConnection, bytes: Vec<u8>) {
    debug!(len = bytes.len(), "packet ready");
    conn.notifier().emit(SerialEvent::PacketReady { bytes });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::EventNotifier;
    use crate::port::{FrameSettings, MockBackend, SerialBackend};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn connected(backend: &MockBackend, port: &str) -> SerialConnection {
        let mut conn = SerialConnection::new(
            Arc::new(backend.clone()),
            EventNotifier::new(32),
            FrameSettings::default(),
            true,
        );
        conn.connect(port, 9600).unwrap();
        conn
    }

    #[test]
    fn test_frequency_conversion() {
        assert_eq!(
            SampleTrigger::from_frequency_hz(4),
            Some(SampleTrigger::Interval(Duration::from_millis(250)))
        );
        assert_eq!(
            SampleTrigger::from_frequency_hz(3),
            Some(SampleTrigger::Interval(Duration::from_millis(333)))
        );
        assert_eq!(SampleTrigger::from_frequency_hz(0), None);
        assert_eq!(SampleTrigger::from_frequency_hz(1001), None);
        assert_eq!(SampleTrigger::from_millis(0), None);
        assert_eq!(SampleTrigger::Edge.period(), None);
    }

    #[test]
    fn test_zero_period_falls_back_to_edge() {
        let scheduler = IoScheduler::new(
            SampleTrigger::Interval(Duration::ZERO),
            false,
            BreakTiming::default(),
        );
        assert_eq!(scheduler.trigger(), SampleTrigger::Edge);
    }

    #[test]
    fn test_edge_drain_coalesces() {
        let backend = MockBackend::new().with_port("COM3");
        let device = backend.device("COM3").unwrap();
        let mut conn = connected(&backend, "COM3");
        let mut events = conn.subscribe();
        let mut scheduler = IoScheduler::new(SampleTrigger::Edge, false, BreakTiming::default());

        device.push_arrival(b"AB");
        device.push_arrival(b"CD");
        scheduler.on_data_arrived(&mut conn);
        scheduler.on_data_arrived(&mut conn);

        assert_eq!(
            events.drain(),
            vec![SerialEvent::PacketReady {
                bytes: b"ABCD".to_vec()
            }]
        );
    }

    #[test]
    fn test_interval_mode_ignores_arrivals() {
        let backend = MockBackend::new().with_port("COM3");
        let device = backend.device("COM3").unwrap();
        let mut conn = connected(&backend, "COM3");
        let mut events = conn.subscribe();
        let mut scheduler = IoScheduler::new(
            SampleTrigger::Interval(Duration::from_millis(100)),
            false,
            BreakTiming::default(),
        );

        device.push_arrival(b"x");
        scheduler.on_data_arrived(&mut conn);
        assert!(events.drain().is_empty());

        scheduler.on_tick(&mut conn);
        assert_eq!(
            events.drain(),
            vec![SerialEvent::PacketReady { bytes: b"x".to_vec() }]
        );
        scheduler.on_tick(&mut conn);
        assert_eq!(events.drain(), vec![SerialEvent::PacketEmpty]);
    }

    #[test]
    fn test_write_while_disconnected() {
        let backend = MockBackend::new().with_port("COM3");
        let mut conn = SerialConnection::new(
            Arc::new(backend.clone()),
            EventNotifier::default(),
            FrameSettings::default(),
            true,
        );
        let mut events = conn.subscribe();
        let mut scheduler = IoScheduler::new(SampleTrigger::Edge, true, BreakTiming::default());

        assert_eq!(scheduler.write(&mut conn, b"hello"), -1);
        assert!(events.drain().is_empty());
        assert_eq!(scheduler.next_break(), None);
    }

    #[test]
    fn test_write_failure_disconnects() {
        let backend = MockBackend::new().with_port("COM3");
        let device = backend.device("COM3").unwrap();
        let mut conn = connected(&backend, "COM3");
        let mut events = conn.subscribe();
        let mut scheduler = IoScheduler::new(SampleTrigger::Edge, true, BreakTiming::default());

        device.fail_next_write("broken pipe");
        assert_eq!(scheduler.write(&mut conn, b"hello"), -1);

        assert!(!conn.is_connected());
        let events = events.drain();
        assert!(matches!(
            events[0],
            SerialEvent::ErrorOccurred {
                kind: ErrorKind::TransportError,
                ..
            }
        ));
        assert_eq!(events[1], SerialEvent::StatusChanged { connected: false });
        assert_eq!(scheduler.next_break(), None);
    }

    #[test]
    fn test_break_only_after_nonempty_write() {
        let backend = MockBackend::new().with_port("COM3");
        let mut conn = connected(&backend, "COM3");
        let mut scheduler = IoScheduler::new(SampleTrigger::Edge, true, BreakTiming::default());

        assert_eq!(scheduler.write(&mut conn, b""), 0);
        assert_eq!(scheduler.next_break(), None);

        let before = Instant::now();
        assert_eq!(scheduler.write(&mut conn, b"hi"), 2);
        let deadline = scheduler.next_break().unwrap();
        assert!(deadline >= before + Duration::from_millis(DEFAULT_BREAK_SETTLE_MS));
    }

    #[test]
    fn test_overlapping_pulses_nest() {
        let backend = MockBackend::new().with_port("COM3");
        let device = backend.device("COM3").unwrap();
        let mut opened = backend.open("COM3", 9600).unwrap();
        let timing = BreakTiming {
            settle: Duration::from_millis(10),
            hold: Duration::from_millis(5),
        };
        let mut breaks = BreakScheduler::default();
        let t0 = Instant::now();

        breaks.schedule(t0, timing);
        breaks.schedule(t0 + Duration::from_millis(2), timing);

        breaks.fire_due(t0 + Duration::from_millis(12), opened.transport.as_mut());
        assert_eq!(device.break_log().len(), 1);
        assert!(device.break_log()[0].asserted);

        // First release is swallowed while the second pulse is still held.
        breaks.fire_due(t0 + Duration::from_millis(15), opened.transport.as_mut());
        assert_eq!(device.break_log().len(), 1);

        breaks.fire_due(t0 + Duration::from_millis(17), opened.transport.as_mut());
        let log = device.break_log();
        assert_eq!(log.len(), 2);
        assert!(!log[1].asserted);
        assert!(breaks.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_arms_and_disarms_clock() {
        let mut scheduler = IoScheduler::new(
            SampleTrigger::Interval(Duration::from_millis(50)),
            false,
            BreakTiming::default(),
        );
        scheduler.sync(false);
        assert!(!scheduler.is_ticking());

        let start = Instant::now();
        scheduler.sync(true);
        scheduler.tick().await;
        assert_eq!(start.elapsed(), Duration::from_millis(50));

        scheduler.sync(false);
        assert!(!scheduler.is_ticking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_edge_mode_never_ticks() {
        let mut scheduler = IoScheduler::new(SampleTrigger::Edge, false, BreakTiming::default());
        scheduler.sync(true);
        assert!(!scheduler.is_ticking());

        let waited = tokio::time::timeout(Duration::from_secs(5), scheduler.tick()).await;
        assert!(waited.is_err());
    }
}
