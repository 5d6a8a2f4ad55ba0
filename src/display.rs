//! Display sinks.
//!
//! The assistant has no window of its own. A sink receives the current frame
//! (and, in navigation, the closeness map) each iteration. Failures are
//! reported to the caller, which logs them; they never stop a mode loop.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::frame::{ClosenessMap, Frame};

pub trait DisplaySink: Send {
    fn show(&mut self, frame: &Frame, closeness: Option<&ClosenessMap>) -> Result<()>;

    fn close(&mut self) {}
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn show(&mut self, _frame: &Frame, _closeness: Option<&ClosenessMap>) -> Result<()> {
        Ok(())
    }
}

/// Writes `camera.jpg` and `closeness.png` into a directory, rate limited so
/// an external image viewer can follow along.
#[derive(Debug)]
pub struct SnapshotDisplay {
    dir: PathBuf,
    min_interval: Duration,
    last_write: Option<Instant>,
    written: u64,
}

impl SnapshotDisplay {
    pub const FRAME_FILE: &'static str = "camera.jpg";
    pub const CLOSENESS_FILE: &'static str = "closeness.png";

    pub fn new(dir: impl Into<PathBuf>, min_interval: Duration) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create snapshot directory {}", dir.display()))?;
        Ok(Self {
            dir,
            min_interval,
            last_write: None,
            written: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl DisplaySink for SnapshotDisplay {
    fn show(&mut self, frame: &Frame, closeness: Option<&ClosenessMap>) -> Result<()> {
        let now = Instant::now();
        if let Some(last) = self.last_write {
            if now.duration_since(last) < self.min_interval {
                return Ok(());
            }
        }
        self.last_write = Some(now);
        frame.save(&self.dir.join(Self::FRAME_FILE))?;
        if let Some(map) = closeness {
            map.save(&self.dir.join(Self::CLOSENESS_FILE))?;
        }
        self.written += 1;
        Ok(())
    }

    fn close(&mut self) {
        log::info!(
            "SnapshotDisplay: wrote {} snapshots to {}",
            self.written,
            self.dir.display()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::solid_frame;
    use crate::obstacle::compute_closeness;

    #[test]
    fn snapshot_display_writes_frame_and_map() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut display = SnapshotDisplay::new(dir.path(), Duration::ZERO)?;
        let frame = solid_frame(16, 12, [90, 90, 90]);
        let (map, _) = compute_closeness(&frame);
        display.show(&frame, Some(&map))?;

        assert!(dir.path().join(SnapshotDisplay::FRAME_FILE).exists());
        assert!(dir.path().join(SnapshotDisplay::CLOSENESS_FILE).exists());
        let reloaded = image::open(dir.path().join(SnapshotDisplay::CLOSENESS_FILE))?;
        assert_eq!(reloaded.width(), 16);
        Ok(())
    }

    #[test]
    fn snapshot_display_is_rate_limited() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut display = SnapshotDisplay::new(dir.path(), Duration::from_secs(60))?;
        let frame = solid_frame(8, 8, [1, 2, 3]);
        display.show(&frame, None)?;
        display.show(&frame, None)?;
        assert_eq!(display.written(), 1);
        assert!(!dir.path().join(SnapshotDisplay::CLOSENESS_FILE).exists());
        Ok(())
    }
}
