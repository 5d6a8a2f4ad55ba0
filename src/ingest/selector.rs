//! Priority-ordered composition of frame sources.
//!
//! Policy per `get_frame` call:
//! 1. read from the active source (opening it first if it is not connected)
//! 2. on failure, exactly one reconnect (`close` + `open` + read) on that source
//! 3. on a second failure, advance to the next source in priority order and
//!    try it once
//!
//! A payload that fails to decode is returned as-is: the link is still up and
//! the bytes after the bad payload stay buffered for the next read.
//!
//! Once the last source has failed, later calls retry it quietly until a
//! frame arrives, so a dead camera does not flood the speech queue.
//!
//! Every transition is announced so the user always hears what the camera is
//! doing. Failed sources are never disabled; `toggle` or `promote` brings them
//! back.

use super::{ConnectionState, FrameSource, SourceStats};
use crate::error::{ConnectionError, FrameError};
use crate::frame::Frame;
use crate::speech::Announcer;

pub struct SourceSelector {
    sources: Vec<Box<dyn FrameSource>>,
    active: usize,
    announcer: Announcer,
    exhausted: bool,
}

impl SourceSelector {
    /// `sources` are in priority order; the first one starts active.
    pub fn new(
        sources: Vec<Box<dyn FrameSource>>,
        announcer: Announcer,
    ) -> Result<Self, ConnectionError> {
        if sources.is_empty() {
            return Err(ConnectionError::new(
                "source selector",
                "no frame sources configured",
            ));
        }
        Ok(Self {
            sources,
            active: 0,
            announcer,
            exhausted: false,
        })
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_name(&self) -> &str {
        self.sources[self.active].name()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Startup probe: open the active source, walking down the priority list
    /// until one opens.
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        let mut last_err = None;
        for index in self.active..self.sources.len() {
            if index != self.active {
                self.announcer
                    .say(format!("Falling back to {}.", self.sources[index].name()));
                self.active = index;
            }
            let source = &mut self.sources[index];
            self.announcer
                .say(format!("Attempting to connect to {}...", source.name()));
            match source.open() {
                Ok(()) => {
                    self.announcer
                        .say(format!("Successfully connected to {}!", source.name()));
                    return Ok(());
                }
                Err(err) => {
                    log::warn!("SourceSelector: {}", err);
                    self.announcer
                        .say(format!("Could not connect to {}.", source.name()));
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ConnectionError::new("source selector", "no frame sources configured")
        }))
    }

    /// Acquire one frame, applying the reconnect-then-fallback policy.
    pub fn get_frame(&mut self) -> Result<Frame, FrameError> {
        let first_err = match self.read_active() {
            Ok(frame) => return Ok(self.recovered(frame)),
            Err(err @ FrameError::Decode(_)) => return Err(err),
            Err(err) => err,
        };
        log::warn!(
            "SourceSelector: {} failed: {}",
            self.active_name(),
            first_err
        );

        let source = &mut self.sources[self.active];
        if !self.exhausted {
            self.announcer
                .say(format!("Attempting to reconnect to {}...", source.name()));
        }
        source.close();
        let second_err = match source.open().map_err(FrameError::from) {
            Ok(()) => match source.read_frame() {
                Ok(frame) => return Ok(self.recovered(frame)),
                Err(err) => err,
            },
            Err(err) => err,
        };
        log::warn!(
            "SourceSelector: reconnect to {} failed: {}",
            self.active_name(),
            second_err
        );

        let next = self.active + 1;
        if next >= self.sources.len() {
            self.exhausted = true;
            return Err(second_err);
        }
        self.active = next;
        self.announcer
            .say(format!("Falling back to {}.", self.active_name()));
        match self.read_active() {
            Ok(frame) => Ok(self.recovered(frame)),
            Err(err) => Err(err),
        }
    }

    /// True once the last source has failed and no frame has arrived since.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Switch to the next source (wrapping). Returns the new active name.
    pub fn toggle(&mut self) -> &str {
        let next = (self.active + 1) % self.sources.len();
        self.switch_to(next);
        self.active_name()
    }

    /// Make `index` the active source. Returns false for an unknown index.
    pub fn promote(&mut self, index: usize) -> bool {
        if index >= self.sources.len() {
            return false;
        }
        if index != self.active {
            self.switch_to(index);
        }
        true
    }

    pub fn close_all(&mut self) {
        for source in &mut self.sources {
            source.close();
        }
    }

    pub fn stats(&self) -> Vec<SourceStats> {
        self.sources.iter().map(|source| source.stats()).collect()
    }

    fn recovered(&mut self, frame: Frame) -> Frame {
        if self.exhausted {
            log::info!("SourceSelector: {} recovered", self.active_name());
            self.exhausted = false;
        }
        frame
    }

    fn switch_to(&mut self, index: usize) {
        self.sources[self.active].close();
        self.active = index;
        self.exhausted = false;
        self.announcer
            .say(format!("Switched to {}.", self.active_name()));
    }

    fn read_active(&mut self) -> Result<Frame, FrameError> {
        let source = &mut self.sources[self.active];
        if matches!(
            source.state(),
            ConnectionState::Disconnected | ConnectionState::Failed
        ) {
            if self.exhausted {
                log::debug!("SourceSelector: retrying {}", source.name());
            } else {
                self.announcer
                    .say(format!("Connecting to {}.", source.name()));
            }
            source.open()?;
        }
        source.read_frame()
    }
}
