// src/hardware/mod.rs - Output and input capability interfaces
//
// The control core never touches GPIO directly. A concrete binding (real
// pins on the control box, or the in-process simulation below) implements
// these traits and is handed to the controller at construction time.

pub mod sim;

use std::time::Duration;

/// Logical motor direction as reported by the drive outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Stopped,
}

/// Drive motor outputs. `speed` is a duty fraction in `0.0..=1.0`,
/// validated by the configuration layer before it ever reaches here.
pub trait Motor: Send {
    fn forward(&mut self, speed: f64);
    fn backward(&mut self, speed: f64);
    fn stop(&mut self);
    fn direction(&self) -> Direction;
}

/// Brake solenoid. The brake is fail-safe: engaged means clamped, and the
/// de-energized state of the solenoid is engaged.
pub trait Brake: Send {
    fn engage(&mut self);
    fn disengage(&mut self);
}

/// Operator-facing indicator light.
pub trait Indicator: Send {
    fn on(&mut self);
    fn off(&mut self);
    fn blink(&mut self, on_time: Duration, off_time: Duration);
}

/// One raw digital input line. Samples are electrically noisy; the
/// debounce layer in `inputs` is responsible for confirmation.
pub trait InputLine: Send {
    fn sample(&self) -> bool;
}

/// The full set of actuation outputs owned by the controller. The
/// controller is the sole writer of all of these.
pub struct Outputs {
    pub motor: Box<dyn Motor>,
    pub brake: Box<dyn Brake>,
    pub engage_led: Box<dyn Indicator>,
    pub go_led: Box<dyn Indicator>,
}
