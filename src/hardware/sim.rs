// src/hardware/sim.rs - In-process simulated I/O binding
//
// Atomics-backed implementations of the hardware capability traits. Every
// sim device is cheaply cloneable; the clone shares state with the boxed
// copy handed to the controller, so tests (and the demo binary) can read
// outputs back and drive input lines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::hardware::{Brake, Direction, Indicator, InputLine, Motor, Outputs};
use crate::inputs::Channel;

/// Point-in-time readback of the simulated motor outputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorSnapshot {
    pub direction: Direction,
    pub speed: f64,
}

/// Readback of a simulated indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    On,
    Off,
    Blinking { on_time: Duration, off_time: Duration },
}

fn lock<T>(shared: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct SimMotor {
    shared: Arc<Mutex<MotorSnapshot>>,
}

impl SimMotor {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(MotorSnapshot {
                direction: Direction::Stopped,
                speed: 0.0,
            })),
        }
    }

    pub fn snapshot(&self) -> MotorSnapshot {
        *lock(&self.shared)
    }
}

impl Default for SimMotor {
    fn default() -> Self {
        Self::new()
    }
}

impl Motor for SimMotor {
    fn forward(&mut self, speed: f64) {
        *lock(&self.shared) = MotorSnapshot {
            direction: Direction::Forward,
            speed,
        };
    }

    fn backward(&mut self, speed: f64) {
        *lock(&self.shared) = MotorSnapshot {
            direction: Direction::Backward,
            speed,
        };
    }

    fn stop(&mut self) {
        *lock(&self.shared) = MotorSnapshot {
            direction: Direction::Stopped,
            speed: 0.0,
        };
    }

    fn direction(&self) -> Direction {
        lock(&self.shared).direction
    }
}

#[derive(Clone)]
pub struct SimBrake {
    // true = clamped; the de-energized rest state
    engaged: Arc<AtomicBool>,
}

impl SimBrake {
    pub fn new() -> Self {
        Self {
            engaged: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }
}

impl Default for SimBrake {
    fn default() -> Self {
        Self::new()
    }
}

impl Brake for SimBrake {
    fn engage(&mut self) {
        self.engaged.store(true, Ordering::Release);
    }

    fn disengage(&mut self) {
        self.engaged.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct SimIndicator {
    shared: Arc<Mutex<IndicatorState>>,
}

impl SimIndicator {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(IndicatorState::Off)),
        }
    }

    pub fn state(&self) -> IndicatorState {
        *lock(&self.shared)
    }
}

impl Default for SimIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Indicator for SimIndicator {
    fn on(&mut self) {
        *lock(&self.shared) = IndicatorState::On;
    }

    fn off(&mut self) {
        *lock(&self.shared) = IndicatorState::Off;
    }

    fn blink(&mut self, on_time: Duration, off_time: Duration) {
        *lock(&self.shared) = IndicatorState::Blinking { on_time, off_time };
    }
}

/// One simulated raw input line.
#[derive(Clone)]
pub struct SimInputLine {
    level: Arc<AtomicBool>,
}

impl SimInputLine {
    pub fn new(initial: bool) -> Self {
        Self {
            level: Arc::new(AtomicBool::new(initial)),
        }
    }

    pub fn set(&self, level: bool) {
        self.level.store(level, Ordering::Release);
    }
}

impl InputLine for SimInputLine {
    fn sample(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }
}

/// Cloneable readback handles for every simulated output.
#[derive(Clone)]
pub struct SimOutputsProbe {
    pub motor: SimMotor,
    pub brake: SimBrake,
    pub engage_led: SimIndicator,
    pub go_led: SimIndicator,
}

/// Build a full simulated output set plus its readback probe.
pub fn sim_outputs() -> (Outputs, SimOutputsProbe) {
    let probe = SimOutputsProbe {
        motor: SimMotor::new(),
        brake: SimBrake::new(),
        engage_led: SimIndicator::new(),
        go_led: SimIndicator::new(),
    };
    let outputs = Outputs {
        motor: Box::new(probe.motor.clone()),
        brake: Box::new(probe.brake.clone()),
        engage_led: Box::new(probe.engage_led.clone()),
        go_led: Box::new(probe.go_led.clone()),
    };
    (outputs, probe)
}

/// One simulated raw line per logical input channel. The e-stop line is
/// normally energized, so it rests high.
pub struct SimInputBank {
    lines: HashMap<Channel, SimInputLine>,
}

impl SimInputBank {
    pub fn new() -> Self {
        let mut lines = HashMap::new();
        for channel in Channel::ALL {
            lines.insert(channel, SimInputLine::new(channel == Channel::EStop));
        }
        Self { lines }
    }

    /// Shared handle to one channel's raw line.
    pub fn line(&self, channel: Channel) -> SimInputLine {
        self.lines[&channel].clone()
    }

    /// Drive one channel's raw level, as the physical switch would.
    pub fn set(&self, channel: Channel, level: bool) {
        self.lines[&channel].set(level);
    }
}

impl Default for SimInputBank {
    fn default() -> Self {
        Self::new()
    }
}
