//! Headless capture → process → display pipeline.
//!
//! Three threads hand frames forward through `LatestSlot`s. A slot holds at
//! most one value and a new value replaces an unread one, so the consumer
//! always sees the freshest frame and the producer never waits on a slow
//! consumer.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::display::DisplaySink;
use crate::frame::Frame;
use crate::ingest::SourceSelector;
use crate::obstacle::ObstacleEvent;

/// Result of waiting on a `LatestSlot`.
#[derive(Debug, PartialEq, Eq)]
pub enum Take<T> {
    Value(T),
    TimedOut,
    /// The slot was closed and holds nothing more.
    Closed,
}

struct SlotState<T> {
    value: Option<T>,
    closed: bool,
    overwritten: u64,
}

/// Single-slot channel with overwrite-on-write semantics.
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                closed: false,
                overwritten: 0,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        // A panicking holder cannot leave the slot half-written.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `value`, replacing any unread one. Returns true if a value was
    /// overwritten. Values published after `close` are dropped.
    pub fn publish(&self, value: T) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        let overwrote = state.value.replace(value).is_some();
        if overwrote {
            state.overwritten += 1;
        }
        drop(state);
        self.ready.notify_one();
        overwrote
    }

    /// Wait up to `timeout` for a value.
    pub fn take_timeout(&self, timeout: Duration) -> Take<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(value) = state.value.take() {
                return Take::Value(value);
            }
            if state.closed {
                return Take::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return Take::TimedOut;
            }
            state = match self.ready.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Refuse further values and wake every waiter. An unread value can
    /// still be taken.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn overwritten(&self) -> u64 {
        self.lock().overwritten
    }
}

// ----------------------------------------------------------------------------
// Monitor
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct MonitorSettings {
    /// Pause after a failed acquisition.
    pub retry_pause: Duration,
    /// How long consumers wait before re-checking the shutdown flag.
    pub poll_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            retry_pause: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub frames_captured: u64,
    pub frames_overwritten: u64,
    pub frames_processed: u64,
    pub frames_displayed: u64,
    pub obstacle_frames: u64,
    pub acquisition_failures: u64,
}

#[derive(Default)]
struct Counters {
    captured: AtomicU64,
    processed: AtomicU64,
    displayed: AtomicU64,
    obstacles: AtomicU64,
    failures: AtomicU64,
}

type Processed = (Frame, ObstacleEvent);

pub struct Monitor;

impl Monitor {
    pub fn spawn(
        selector: SourceSelector,
        display: Box<dyn DisplaySink>,
        settings: MonitorSettings,
    ) -> Result<MonitorHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let raw: Arc<LatestSlot<Frame>> = Arc::new(LatestSlot::new());
        let processed: Arc<LatestSlot<Processed>> = Arc::new(LatestSlot::new());
        let counters = Arc::new(Counters::default());

        let mut joins = Vec::with_capacity(3);
        joins.push(spawn_named("monitor-capture", {
            let shutdown = shutdown.clone();
            let raw = raw.clone();
            let counters = counters.clone();
            let settings = settings.clone();
            move || capture_loop(selector, &raw, &counters, &shutdown, &settings)
        })?);
        joins.push(spawn_named("monitor-process", {
            let raw = raw.clone();
            let processed = processed.clone();
            let counters = counters.clone();
            let poll = settings.poll_interval;
            move || process_loop(&raw, &processed, &counters, poll)
        })?);
        joins.push(spawn_named("monitor-display", {
            let processed = processed.clone();
            let counters = counters.clone();
            let poll = settings.poll_interval;
            move || display_loop(display, &processed, &counters, poll)
        })?);

        Ok(MonitorHandle {
            shutdown,
            raw,
            processed,
            counters,
            joins,
        })
    }
}

pub struct MonitorHandle {
    shutdown: Arc<AtomicBool>,
    raw: Arc<LatestSlot<Frame>>,
    processed: Arc<LatestSlot<Processed>>,
    counters: Arc<Counters>,
    joins: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            frames_captured: self.counters.captured.load(Ordering::SeqCst),
            frames_overwritten: self.raw.overwritten() + self.processed.overwritten(),
            frames_processed: self.counters.processed.load(Ordering::SeqCst),
            frames_displayed: self.counters.displayed.load(Ordering::SeqCst),
            obstacle_frames: self.counters.obstacles.load(Ordering::SeqCst),
            acquisition_failures: self.counters.failures.load(Ordering::SeqCst),
        }
    }

    /// Handle for signalling shutdown from elsewhere (e.g. a Ctrl-C handler).
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stop all three threads and return the final statistics.
    pub fn stop(mut self) -> Result<MonitorStats> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.raw.close();
        let mut panicked = Vec::new();
        for join in self.joins.drain(..) {
            let name = join.thread().name().unwrap_or("monitor").to_string();
            if join.join().is_err() {
                panicked.push(name);
            }
        }
        if !panicked.is_empty() {
            return Err(anyhow!("monitor threads panicked: {}", panicked.join(", ")));
        }
        Ok(self.stats())
    }
}

fn spawn_named<F>(name: &str, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .with_context(|| format!("spawn {} thread", name))
}

fn capture_loop(
    mut selector: SourceSelector,
    raw: &LatestSlot<Frame>,
    counters: &Counters,
    shutdown: &AtomicBool,
    settings: &MonitorSettings,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match selector.get_frame() {
            Ok(frame) => {
                counters.captured.fetch_add(1, Ordering::SeqCst);
                raw.publish(frame);
            }
            Err(err) => {
                counters.failures.fetch_add(1, Ordering::SeqCst);
                log::warn!("monitor-capture: {}", err);
                std::thread::sleep(settings.retry_pause);
            }
        }
    }
    selector.close_all();
    raw.close();
    log::debug!("monitor-capture: stopped");
}

fn process_loop(
    raw: &LatestSlot<Frame>,
    processed: &LatestSlot<Processed>,
    counters: &Counters,
    poll: Duration,
) {
    loop {
        match raw.take_timeout(poll) {
            Take::Value(frame) => {
                let event = ObstacleEvent::observe(&frame);
                counters.processed.fetch_add(1, Ordering::SeqCst);
                if event.is_obstacle {
                    counters.obstacles.fetch_add(1, Ordering::SeqCst);
                }
                processed.publish((frame, event));
            }
            Take::TimedOut => {}
            Take::Closed => break,
        }
    }
    processed.close();
    log::debug!("monitor-process: stopped");
}

fn display_loop(
    mut display: Box<dyn DisplaySink>,
    processed: &LatestSlot<Processed>,
    counters: &Counters,
    poll: Duration,
) {
    let mut obstacle_ahead = false;
    loop {
        match processed.take_timeout(poll) {
            Take::Value((frame, event)) => {
                if event.is_obstacle != obstacle_ahead {
                    obstacle_ahead = event.is_obstacle;
                    if obstacle_ahead {
                        log::info!("monitor-display: obstacle ahead");
                    } else {
                        log::info!("monitor-display: path clear");
                    }
                }
                match display.show(&frame, Some(&event.map)) {
                    Ok(()) => {
                        counters.displayed.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) => log::warn!("monitor-display: {:#}", err),
                }
            }
            Take::TimedOut => {}
            Take::Closed => break,
        }
    }
    display.close();
    log::debug!("monitor-display: stopped");
}
