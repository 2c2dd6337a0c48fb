//! Fire-and-forget marker bus.
//!
//! The presentation timeline only ever pushes onto a lock-free queue. A
//! sender thread drains it into the transport, sends keepalives while idle,
//! and tries to reconnect streams that stopped accepting markers. When no
//! stream connects at startup the bus runs local-only: markers are logged
//! and counted, nothing is sent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use stroop_timing::Timer;
use tracing::{debug, info, warn};

use crate::codes::{Marker, MarkerCode, MarkerStream};
use crate::transport::SyncTransport;

const IDLE_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct BusOptions {
    pub capacity: usize,
    /// Idle time before a keepalive goes out on the control stream.
    pub keepalive: Option<Duration>,
    /// How long sends must have been failing before a reconnect is tried.
    pub recovery_after: Duration,
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            capacity: 1024,
            keepalive: Some(Duration::from_secs(5)),
            recovery_after: Duration::from_secs(3),
            connect_attempts: 3,
            connect_retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    local_only: AtomicU64,
    keepalives: AtomicU64,
    reconnects: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    pub connected: bool,
    pub queued: u64,
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
    pub local_only: u64,
    pub keepalives: u64,
    pub reconnects: u64,
}

pub struct MarkerBus {
    queue: Arc<ArrayQueue<Marker>>,
    counters: Arc<Counters>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    dropped_warned: AtomicBool,
}

impl MarkerBus {
    /// Connects both marker streams and starts the sender thread. Connection
    /// failure is logged once and leaves the bus local-only.
    pub fn start<T, C>(mut transport: T, clock: C, opts: BusOptions) -> Self
    where
        T: SyncTransport,
        C: Timer + 'static,
    {
        let mut handles: [Option<T::Handle>; 2] = [None, None];
        let mut missing = Vec::new();
        for stream in MarkerStream::ALL {
            handles[stream.slot()] = connect_with_retry(&mut transport, stream, &opts);
            if handles[stream.slot()].is_none() {
                missing.push(stream.name());
            }
        }

        if missing.len() == MarkerStream::ALL.len() {
            warn!("no marker stream available; continuing with local-only marker logging");
            return Self::local_only_with_capacity(opts.capacity);
        }
        if !missing.is_empty() {
            warn!(streams = ?missing, "some marker streams are unavailable; their markers will not be delivered");
        }

        let queue = Arc::new(ArrayQueue::new(opts.capacity.max(1)));
        let counters = Arc::new(Counters::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let sender = Sender {
            transport,
            handles,
            clock,
            queue: queue.clone(),
            counters: counters.clone(),
            shutdown: shutdown.clone(),
            opts,
            last_success: Instant::now(),
            last_activity: Instant::now(),
            failure_warned: false,
        };
        let worker = thread::Builder::new()
            .name("marker-bus".into())
            .spawn(move || sender.run());

        match worker {
            Ok(handle) => {
                info!("marker bus connected");
                Self {
                    queue,
                    counters,
                    shutdown,
                    worker: Some(handle),
                    dropped_warned: AtomicBool::new(false),
                }
            }
            Err(e) => {
                warn!("failed to spawn marker sender thread: {e}; markers are local-only");
                Self::local_only_with_capacity(queue.capacity())
            }
        }
    }

    pub fn local_only() -> Self {
        Self::local_only_with_capacity(1)
    }

    fn local_only_with_capacity(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
            counters: Arc::new(Counters::default()),
            shutdown: Arc::new(AtomicBool::new(true)),
            worker: None,
            dropped_warned: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.worker.is_some()
    }

    /// Never blocks. A full queue drops the marker.
    pub fn send(&self, marker: Marker) {
        let Some(worker) = &self.worker else {
            self.counters.local_only.fetch_add(1, Ordering::Relaxed);
            debug!(code = %marker.code.wire(), ts_ns = marker.timestamp_ns, "marker {} (local only)", marker.code.label());
            return;
        };
        match self.queue.push(marker) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                worker.thread().unpark();
            }
            Err(lost) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.dropped_warned.swap(true, Ordering::Relaxed) {
                    warn!("marker queue full; dropped {}", lost.code);
                }
            }
        }
    }

    pub fn emit(&self, code: MarkerCode, timestamp_ns: u64) {
        self.send(Marker::new(code, timestamp_ns));
    }

    /// Waits up to `timeout` for queued markers to leave. Returns whether the
    /// queue emptied. Only for run boundaries, never inside a trial.
    pub fn drain(&self, timeout: Duration) -> bool {
        let Some(worker) = &self.worker else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        loop {
            let c = &self.counters;
            let done = c.sent.load(Ordering::Acquire) + c.failed.load(Ordering::Acquire)
                >= c.queued.load(Ordering::Acquire);
            if done {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            worker.thread().unpark();
            thread::sleep(IDLE_POLL);
        }
    }

    pub fn stats(&self) -> BusStats {
        let c = &self.counters;
        BusStats {
            connected: self.is_connected(),
            queued: c.queued.load(Ordering::Relaxed),
            sent: c.sent.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            local_only: c.local_only.load(Ordering::Relaxed),
            keepalives: c.keepalives.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Stops the sender thread after it has flushed the queue.
    pub fn shutdown(mut self) -> BusStats {
        let connected = self.is_connected();
        self.stop();
        BusStats {
            connected,
            ..self.stats()
        }
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            if worker.join().is_err() {
                warn!("marker sender thread panicked");
            }
        }
    }
}

impl Drop for MarkerBus {
    fn drop(&mut self) {
        self.stop();
    }
}

fn connect_with_retry<T: SyncTransport>(
    transport: &mut T,
    stream: MarkerStream,
    opts: &BusOptions,
) -> Option<T::Handle> {
    let attempts = opts.connect_attempts.max(1);
    for attempt in 1..=attempts {
        match transport.connect(stream) {
            Ok(h) => {
                info!(stream = stream.name(), attempt, "marker stream connected");
                return Some(h);
            }
            Err(e) => {
                debug!(attempt, "{e}");
                if attempt < attempts {
                    thread::sleep(opts.connect_retry_delay);
                }
            }
        }
    }
    None
}

struct Sender<T: SyncTransport, C> {
    transport: T,
    handles: [Option<T::Handle>; 2],
    clock: C,
    queue: Arc<ArrayQueue<Marker>>,
    counters: Arc<Counters>,
    shutdown: Arc<AtomicBool>,
    opts: BusOptions,
    last_success: Instant,
    last_activity: Instant,
    failure_warned: bool,
}

impl<T: SyncTransport, C: Timer> Sender<T, C> {
    fn run(mut self) {
        loop {
            while let Some(marker) = self.queue.pop() {
                let counter = if self.deliver(&marker) {
                    &self.counters.sent
                } else {
                    &self.counters.failed
                };
                counter.fetch_add(1, Ordering::Release);
            }
            if self.shutdown.load(Ordering::Acquire) && self.queue.is_empty() {
                break;
            }
            if let Some(every) = self.opts.keepalive {
                if self.last_activity.elapsed() >= every {
                    let ka = Marker::new(MarkerCode::Keepalive, self.clock.now());
                    if self.deliver(&ka) {
                        self.counters.keepalives.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            thread::park_timeout(IDLE_POLL);
        }
        debug!("marker sender stopped");
    }

    fn deliver(&mut self, marker: &Marker) -> bool {
        self.last_activity = Instant::now();
        let stream = marker.code.stream();
        let ok = self.try_send(stream, marker);
        if ok || !self.should_recover() {
            return ok;
        }
        if self.reconnect(stream) {
            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
            return self.try_send(stream, marker);
        }
        false
    }

    fn try_send(&mut self, stream: MarkerStream, marker: &Marker) -> bool {
        let result = match self.handles[stream.slot()].as_mut() {
            Some(handle) => self.transport.send(handle, marker),
            None => {
                self.note_failure(format_args!(
                    "marker stream {} is not connected; {} not delivered",
                    stream, marker.code
                ));
                return false;
            }
        };
        match result {
            Ok(()) => {
                self.last_success = Instant::now();
                true
            }
            Err(e) => {
                self.note_failure(format_args!("{e}"));
                false
            }
        }
    }

    fn note_failure(&mut self, msg: std::fmt::Arguments<'_>) {
        if !self.failure_warned {
            warn!("marker delivery degraded: {msg}");
            self.failure_warned = true;
        } else {
            debug!("{msg}");
        }
    }

    fn should_recover(&self) -> bool {
        self.last_success.elapsed() >= self.opts.recovery_after
    }

    fn reconnect(&mut self, stream: MarkerStream) -> bool {
        for _ in 0..self.opts.connect_attempts.max(1) {
            if let Ok(h) = self.transport.connect(stream) {
                info!(stream = stream.name(), "marker stream recovered");
                self.handles[stream.slot()] = Some(h);
                self.last_success = Instant::now();
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, NullTransport};
    use stroop_core::{Congruency, ContrastMode};
    use stroop_timing::ManualTimer;

    fn quick() -> BusOptions {
        BusOptions {
            keepalive: None,
            connect_retry_delay: Duration::ZERO,
            ..BusOptions::default()
        }
    }

    #[test]
    fn markers_arrive_in_order() {
        let transport = MemoryTransport::new();
        let bus = MarkerBus::start(transport.clone(), ManualTimer::new(), quick());
        assert!(bus.is_connected());

        bus.emit(MarkerCode::BlockStart(1), 10);
        bus.emit(MarkerCode::Onset(ContrastMode::HighContrast, Congruency::Congruent), 20);
        bus.emit(MarkerCode::TestPulse(0), 30);
        assert!(bus.drain(Duration::from_secs(2)));

        let events: Vec<_> = transport
            .delivered_on(MarkerStream::Events)
            .into_iter()
            .map(|m| m.timestamp_ns)
            .collect();
        assert_eq!(events, vec![10, 20]);
        assert_eq!(transport.delivered_on(MarkerStream::Control).len(), 1);

        let stats = bus.shutdown();
        assert!(stats.connected);
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn unreachable_transport_degrades_to_local_only() {
        let bus = MarkerBus::start(MemoryTransport::unreachable(), ManualTimer::new(), quick());
        assert!(!bus.is_connected());
        for i in 0..10 {
            bus.emit(MarkerCode::ItiStart(ContrastMode::LowContrast), i);
        }
        assert!(bus.drain(Duration::ZERO));
        let stats = bus.stats();
        assert_eq!(stats.local_only, 10);
        assert_eq!(stats.sent, 0);
    }

    #[test]
    fn null_transport_swallows_markers() {
        let bus = MarkerBus::start(NullTransport, ManualTimer::new(), quick());
        assert!(bus.is_connected());
        bus.emit(MarkerCode::ExperimentStart, 0);
        bus.emit(MarkerCode::ExperimentComplete, 1);
        assert!(bus.drain(Duration::from_secs(2)));
        let stats = bus.shutdown();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.local_only, 0);
    }

    #[test]
    fn send_failures_are_counted_and_recovered() {
        let transport = MemoryTransport::new();
        let opts = BusOptions {
            recovery_after: Duration::ZERO,
            ..quick()
        };
        let bus = MarkerBus::start(transport.clone(), ManualTimer::new(), opts);

        transport.set_failing(true);
        bus.emit(MarkerCode::BlockStart(1), 1);
        assert!(bus.drain(Duration::from_secs(2)));
        transport.set_failing(false);
        bus.emit(MarkerCode::BlockEnd(1), 2);
        assert!(bus.drain(Duration::from_secs(2)));

        let stats = bus.shutdown();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.sent, 1);
        assert!(stats.reconnects >= 1);
        assert_eq!(transport.delivered().len(), 1);
    }

    #[test]
    fn idle_bus_sends_keepalive_on_control_stream() {
        let transport = MemoryTransport::new();
        let opts = BusOptions {
            keepalive: Some(Duration::from_millis(5)),
            ..quick()
        };
        let bus = MarkerBus::start(transport.clone(), ManualTimer::starting_at(99), opts);
        thread::sleep(Duration::from_millis(60));
        let stats = bus.shutdown();
        assert!(stats.keepalives >= 1);
        let control = transport.delivered_on(MarkerStream::Control);
        assert!(control.iter().all(|m| m.code == MarkerCode::Keepalive));
        assert_eq!(control[0].timestamp_ns, 99);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let transport = MemoryTransport::new();
        transport.set_failing(true);
        let opts = BusOptions {
            capacity: 1,
            ..quick()
        };
        let bus = MarkerBus::start(transport, ManualTimer::new(), opts);
        for i in 0..1000 {
            bus.emit(MarkerCode::TestPulse((i % 5) as u8), i);
        }
        let stats = bus.stats();
        assert_eq!(stats.queued + stats.dropped, 1000);
    }
}
