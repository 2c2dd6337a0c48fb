use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Monotonic nanosecond clock shared by the presentation surface, the input
/// backend and the trial runner, so every timestamp lives on one timeline.
pub trait Timer: Clone + Send + Sync {
    /// Nanoseconds since the timer's epoch.
    fn now(&self) -> u64;
    fn elapsed(&self, since_ns: u64) -> Duration {
        Duration::from_nanos(self.now().saturating_sub(since_ns))
    }
    fn sleep(&self, d: Duration);
    /// Records one onset-latency sample (draw request to confirmed frame).
    fn record_frame(&mut self, d: Duration);
    fn timing_stats(&self) -> TimingStats;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingStats {
    pub samples: usize,
    pub mean_ns: f64,
    pub jitter_ns: f64,
    pub min_ns: f64,
    pub max_ns: f64,
}

/// Bounded window of frame samples; oldest samples fall off first.
#[derive(Debug, Clone)]
pub struct FrameLog {
    samples: VecDeque<Duration>,
    max_samples: usize,
}

impl FrameLog {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    pub fn push(&mut self, d: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(d);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn stats(&self) -> TimingStats {
        if self.samples.is_empty() {
            return TimingStats::default();
        }
        let times: Vec<f64> = self.samples.iter().map(|d| d.as_nanos() as f64).collect();
        let n = times.len() as f64;
        let mean = times.iter().sum::<f64>() / n;
        let var = times.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        TimingStats {
            samples: times.len(),
            mean_ns: mean,
            jitter_ns: var.sqrt(),
            min_ns: min,
            max_ns: max,
        }
    }
}

impl Default for FrameLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[derive(Debug, Clone)]
pub struct HighPrecisionTimer {
    pub start: Instant,
    pub frames: FrameLog,
}

impl Timer for HighPrecisionTimer {
    fn now(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
    fn sleep(&self, d: Duration) {
        self.high_precision_sleep(d)
    }
    fn record_frame(&mut self, d: Duration) {
        self.frames.push(d);
    }
    fn timing_stats(&self) -> TimingStats {
        self.frames.stats()
    }
}

/// Below this the non-Linux sleep spins instead of yielding to the scheduler.
#[cfg(not(target_os = "linux"))]
const SPIN_THRESHOLD: Duration = Duration::from_millis(2);

impl HighPrecisionTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            frames: FrameLog::default(),
        }
    }

    pub fn high_precision_sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let deadline = Instant::now() + duration;
        #[cfg(target_os = "linux")]
        self.linux_sleep_until(deadline);
        #[cfg(not(target_os = "linux"))]
        self.hybrid_sleep_until(deadline);
    }

    // clock_nanosleep returns early on EINTR, so keep sleeping the remainder.
    #[cfg(target_os = "linux")]
    fn linux_sleep_until(&self, deadline: Instant) {
        use libc::{clock_nanosleep, timespec, CLOCK_MONOTONIC};

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;
            let req = timespec {
                tv_sec: remaining.as_secs() as libc::time_t,
                tv_nsec: remaining.subsec_nanos() as libc::c_long,
            };
            unsafe {
                clock_nanosleep(CLOCK_MONOTONIC, 0, &req, std::ptr::null_mut());
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn hybrid_sleep_until(&self, deadline: Instant) {
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;
            if remaining > SPIN_THRESHOLD {
                std::thread::sleep(remaining - SPIN_THRESHOLD);
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

impl Default for HighPrecisionTimer {
    fn default() -> Self {
        Self::new()
    }
}
