// src/tracker.rs - Movement tracker for one bounded phase
//
// One tracker is created on entry to each timed state (run, stop, return,
// jog) and discarded on exit. It watches elapsed time and, when a distance
// cap is configured, revolution-derived distance, and reports completion
// exactly once.
//
// There is no safety factor in here. The caller provides its own buffer
// on time and distance as needed.

use std::time::{Duration, Instant};

/// Floor on the interval between revolution pulses when deriving speed,
/// so a near-zero interval cannot blow the division up.
const MIN_REVOLUTION_INTERVAL: Duration = Duration::from_millis(10);

/// Tracks one bounded movement phase.
///
/// `revolution_increment` is the configured pulley dimension added to the
/// accumulated distance per revolution pulse. Note this is the pulley
/// *diameter*, used directly, not the circumference; documented behavior
/// carried over from the field-tested rig, pending confirmation from the
/// domain owner.
///
/// Completion is a one-shot signal: whichever of `tick()` / `revolve()`
/// first satisfies a cap returns `true` exactly once, and both return
/// `false` forever after. The owner performs the phase transition when it
/// sees the signal. A tracker with no duration cap and no distance cap is
/// a pure stopwatch.
#[derive(Debug)]
pub struct MovementTracker {
    start: Instant,
    max_duration: Option<Duration>,
    max_distance: Option<f64>,
    max_revolutions: Option<u64>,
    revolution_increment: f64,
    revolutions: u64,
    distance: f64,
    last_revolution: Instant,
    last_speed: Option<f64>,
    max_speed: Option<f64>,
    final_duration: Option<Duration>,
    completed: bool,
}

impl MovementTracker {
    /// Starts the clock immediately.
    pub fn new(
        max_duration: Option<Duration>,
        max_distance: Option<f64>,
        revolution_increment: f64,
    ) -> Self {
        debug_assert!(
            max_distance.is_none() || revolution_increment >= 0.01,
            "pulley increment too small for a distance cap"
        );
        let now = Instant::now();
        // We can only count whole revolutions, so a distance cap may be
        // overshot by up to one pulley increment.
        let max_revolutions =
            max_distance.map(|distance| (distance / revolution_increment).floor() as u64);
        Self {
            start: now,
            max_duration,
            max_distance,
            max_revolutions,
            revolution_increment,
            revolutions: 0,
            distance: 0.0,
            last_revolution: now,
            last_speed: None,
            max_speed: None,
            final_duration: None,
            completed: false,
        }
    }

    /// One confirmed revolution-sensor pulse. Returns `true` if this pulse
    /// first satisfied the distance or revolution cap.
    #[must_use]
    pub fn revolve(&mut self) -> bool {
        if self.completed {
            return false;
        }
        let now = Instant::now();
        self.revolutions += 1;
        self.distance += self.revolution_increment;

        let interval = now
            .duration_since(self.last_revolution)
            .max(MIN_REVOLUTION_INTERVAL);
        let speed = self.revolution_increment / interval.as_secs_f64();
        self.last_speed = Some(speed);
        if self.max_speed.is_none_or(|max| speed > max) {
            self.max_speed = Some(speed);
        }
        self.last_revolution = now;

        let revolution_cap = self.max_revolutions.is_some_and(|cap| self.revolutions >= cap);
        let distance_cap = self.max_distance.is_some_and(|cap| self.distance >= cap);
        if revolution_cap || distance_cap {
            self.complete(now);
            return true;
        }
        false
    }

    /// Periodic time check, called at high frequency regardless of
    /// revolutions. Returns `true` if the duration cap was first reached.
    #[must_use]
    pub fn tick(&mut self) -> bool {
        if self.completed {
            return false;
        }
        if let Some(cap) = self.max_duration {
            let now = Instant::now();
            if now.duration_since(self.start) >= cap {
                self.complete(now);
                return true;
            }
        }
        false
    }

    fn complete(&mut self, now: Instant) {
        self.completed = true;
        self.final_duration = Some(now.duration_since(self.start));
        // Freeze speed reporting; the phase is over.
        self.last_speed = None;
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn revolutions(&self) -> u64 {
        self.revolutions
    }

    pub fn last_speed(&self) -> Option<f64> {
        self.last_speed
    }

    pub fn max_speed(&self) -> Option<f64> {
        self.max_speed
    }

    /// Elapsed-so-far while live, frozen final duration once completed.
    pub fn duration(&self) -> Duration {
        match self.final_duration {
            Some(duration) => duration,
            None => self.start.elapsed(),
        }
    }
}
