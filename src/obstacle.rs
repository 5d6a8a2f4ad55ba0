//! Brightness-as-proximity obstacle heuristic.
//!
//! There is no depth sensor. Brighter regions are treated as nearer: intensity
//! is scaled by a fixed gain, clamped, and thresholded, and a frame is flagged
//! when enough pixels cross the threshold. The computation is frame-local and
//! stateless; rate limiting of announcements lives in `ObstacleCooldown`.

use std::time::{Duration, Instant};

use crate::frame::{ClosenessMap, Frame, CHANNELS};

/// Intensity gain applied before clamping (1.5x, as a 3/2 ratio).
pub const GAIN_NUMERATOR: u32 = 3;
pub const GAIN_DENOMINATOR: u32 = 2;

/// Closeness values strictly above this are "near".
pub const NEAR_THRESHOLD: u8 = 120;

/// More near pixels than this flags an obstacle.
pub const AREA_THRESHOLD: usize = 5000;

/// Minimum spacing between obstacle announcements.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3);

/// Compute the closeness map and obstacle flag for one frame.
pub fn compute_closeness(frame: &Frame) -> (ClosenessMap, bool) {
    let values: Vec<u8> = frame
        .pixels()
        .chunks_exact(CHANNELS)
        .map(|px| closeness(luma(px[0], px[1], px[2])))
        .collect();
    let map = ClosenessMap::new(frame.width(), frame.height(), values);
    let is_obstacle = map.count_above(NEAR_THRESHOLD) > AREA_THRESHOLD;
    (map, is_obstacle)
}

/// ITU-R BT.601 luma, rounded.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    let weighted = 299 * r as u32 + 587 * g as u32 + 114 * b as u32;
    ((weighted + 500) / 1000) as u8
}

fn closeness(intensity: u8) -> u8 {
    (intensity as u32 * GAIN_NUMERATOR / GAIN_DENOMINATOR).min(255) as u8
}

/// One heuristic observation, tied to the frame it was computed from.
#[derive(Debug)]
pub struct ObstacleEvent {
    pub at: Instant,
    pub is_obstacle: bool,
    pub map: ClosenessMap,
}

impl ObstacleEvent {
    pub fn observe(frame: &Frame) -> Self {
        let (map, is_obstacle) = compute_closeness(frame);
        Self {
            at: frame.captured_at(),
            is_obstacle,
            map,
        }
    }
}

/// Suppresses repeated announcements for a sustained obstacle.
#[derive(Debug)]
pub struct ObstacleCooldown {
    interval: Duration,
    last_fired: Option<Instant>,
}

impl Default for ObstacleCooldown {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl ObstacleCooldown {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
        }
    }

    /// Returns true (and restarts the window) when an announcement may fire.
    pub fn try_fire(&mut self, now: Instant) -> bool {
        let ready = match self.last_fired {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if ready {
            self.last_fired = Some(now);
        }
        ready
    }

    pub fn reset(&mut self) {
        self.last_fired = None;
    }
}
