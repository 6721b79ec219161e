use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Time source for polling and deadlines.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);

    /// Like [`Clock::sleep`], but may return early once `stop` is requested.
    fn sleep_unless_stopped(&self, duration: Duration, _stop: &StopFlag) {
        self.sleep(duration);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// How often a sleeping poll looks at the stop flag.
    pub const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(200);
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn sleep_unless_stopped(&self, duration: Duration, stop: &StopFlag) {
        let until = Instant::now() + duration;
        while !stop.is_requested() {
            let left = until.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            std::thread::sleep(left.min(Self::STOP_CHECK_INTERVAL));
        }
    }
}

type SleepCallback = Box<dyn FnMut(Duration) + Send>;

/// Clock that only advances when slept on. The optional callback runs on
/// every sleep, which lets tests play the part of a trainer writing
/// checkpoints while the loop waits.
pub struct ManualClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<u32>,
    on_sleep: Mutex<Option<SleepCallback>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(0),
            on_sleep: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn on_sleep(self, callback: impl FnMut(Duration) + Send + 'static) -> Self {
        if let Ok(mut slot) = self.on_sleep.lock() {
            *slot = Some(Box::new(callback));
        }
        self
    }

    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }

    #[must_use]
    pub fn sleeps(&self) -> u32 {
        self.sleeps.lock().map(|s| *s).unwrap_or_default()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed.lock().map(|e| *e).unwrap_or_default()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        if let Ok(mut sleeps) = self.sleeps.lock() {
            *sleeps += 1;
        }
        if let Ok(mut callback) = self.on_sleep.lock() {
            if let Some(cb) = callback.as_mut() {
                cb(duration);
            }
        }
    }
}

/// Externally requested stop, shared between the loop and e.g. a signal
/// handler.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
