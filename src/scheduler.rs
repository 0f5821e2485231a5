use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crate::system::collector::Collector;
use crate::system::source::ProcessSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::Idle,
            1 => SchedulerState::Running,
            2 => SchedulerState::Stopping,
            _ => SchedulerState::Stopped,
        }
    }
}

/// How long to sleep after a tick that took `elapsed`, so ticks start roughly
/// every `interval`. Never negative.
pub fn sleep_after_tick(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

#[derive(Clone, Debug)]
struct Shared {
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

impl Shared {
    fn new() -> Self {
        Shared {
            stop: Arc::new(AtomicBool::new(false)),
            state: Arc::new(AtomicU8::new(SchedulerState::Idle as u8)),
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Raises the stop flag. A loop that is already running reports
    /// `Stopping` until its last tick has finished.
    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.state.compare_exchange(
            SchedulerState::Running as u8,
            SchedulerState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Drives collector ticks at a fixed cadence until asked to stop.
///
/// The loop owns the collector; nothing else touches it until the loop has
/// returned it.
pub struct Scheduler<S> {
    collector: Collector<S>,
    interval: Duration,
    shared: Shared,
}

impl<S: ProcessSource> Scheduler<S> {
    pub fn new(collector: Collector<S>, interval: Duration) -> Self {
        Scheduler {
            collector,
            interval,
            shared: Shared::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    /// Flag that ends the loop after the tick in progress.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shared.stop)
    }

    /// Runs the loop on the current thread and returns the collector once
    /// the stop flag is observed.
    pub fn run(mut self) -> Collector<S> {
        self.shared.set_state(SchedulerState::Running);
        tracing::debug!(
            root_pid = self.collector.root_pid(),
            interval_ms = self.interval.as_millis() as u64,
            "polling started"
        );

        while !self.shared.stop_requested() {
            let started = Instant::now();
            {
                let _tick_span = tracing::debug_span!("collector.tick").entered();
                // Failures are logged by the collector; the next tick retries.
                let _ = self.collector.tick(SystemTime::now());
            }

            if self.shared.stop_requested() {
                break;
            }
            let pause = sleep_after_tick(self.interval, started.elapsed());
            if !pause.is_zero() {
                thread::sleep(pause);
            }
        }

        self.shared.set_state(SchedulerState::Stopping);
        tracing::debug!(
            ticks = self.collector.ticks(),
            failed = self.collector.failed_ticks(),
            "polling stopped"
        );
        self.shared.set_state(SchedulerState::Stopped);
        self.collector
    }
}

impl<S: ProcessSource + Send + 'static> Scheduler<S> {
    /// Starts the loop on a dedicated thread.
    pub fn spawn(self) -> io::Result<SchedulerHandle<S>> {
        let shared = self.shared.clone();
        let thread = thread::Builder::new()
            .name("onlooker-poller".to_string())
            .spawn(move || self.run())?;
        Ok(SchedulerHandle { shared, thread })
    }
}

/// Owner side of a running scheduler thread.
pub struct SchedulerHandle<S> {
    shared: Shared,
    thread: JoinHandle<Collector<S>>,
}

impl<S> SchedulerHandle<S> {
    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    /// Stops the loop and waits for it. The returned collector is no longer
    /// shared with any thread.
    pub fn stop_and_join(self) -> thread::Result<Collector<S>> {
        self.request_stop();
        self.thread.join()
    }
}
