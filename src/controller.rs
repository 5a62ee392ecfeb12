// src/controller.rs - Safety-interlocked state machine
//
// The controller is the only component with side effects on outputs. Two
// loops call into it: the input poll task (confirmed edges) and the main
// tick loop. Both serialize through one mutex around the whole
// controller; chained transitions run to completion inside a single
// `&mut self` call under the already-held guard, so the same logical
// owner re-enters without touching the lock again.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::Config;
use crate::hardware::Outputs;
use crate::inputs::{Channel, Handler, InputAggregator};
use crate::tracker::MovementTracker;

/// Budget for one tick or handler pass. A stalled control loop while the
/// motor may be powered is itself a safety fault.
pub const ACCEPTABLE_LATENCY: Duration = Duration::from_millis(100);

/// Pause between fail-safe actuation and process exit, so the brake
/// solenoid settles before power-down paths run.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Process exit status for a fail-safe shutdown.
pub const FAIL_SAFE_EXIT: i32 = 2;

const GO_BLINK_ON: Duration = Duration::from_secs(1);
const GO_BLINK_OFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Boot and self-check; both indicators lit.
    Starting,
    /// Idle and safe: brake engaged, motor off, engage light on.
    AwaitEngage,
    /// Engage held, waiting for the line to reach the start position.
    AwaitSet,
    /// Positioned and armed; go light on.
    AwaitGo,
    /// Powered forward run, bounded by time and distance.
    Running,
    /// Braking after a run, bounded by time.
    Stopping,
    /// Powered low-speed reverse back toward the start position.
    Returning,
    /// Manual low-speed nudge, active only while held.
    JogForward,
    JogBackward,
    /// Terminal fail-safe state; no outgoing transitions.
    Error,
}

impl State {
    pub fn name(self) -> &'static str {
        match self {
            State::Starting => "starting",
            State::AwaitEngage => "await_engage",
            State::AwaitSet => "await_set",
            State::AwaitGo => "await_go",
            State::Running => "running",
            State::Stopping => "stopping",
            State::Returning => "returning",
            State::JogForward => "jog_forward",
            State::JogBackward => "jog_backward",
            State::Error => "error",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct Controller {
    config: Config,
    outputs: Outputs,
    state: State,
    // Confirmed levels, latched from every edge regardless of whether a
    // transition fires; entry actions and tick re-check them.
    engage_active: bool,
    limit_active: bool,
    // Exactly one live tracker per active timed state.
    tracker: Option<MovementTracker>,
    fault: Option<String>,
}

impl Controller {
    pub fn new(config: Config, outputs: Outputs) -> Self {
        let mut controller = Self {
            config,
            outputs,
            state: State::Starting,
            engage_active: false,
            limit_active: false,
            tracker: None,
            fault: None,
        };
        controller.enter_starting();
        controller
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The reason for a fail-safe shutdown, once one has happened.
    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    // ----------------------------------------
    // Tick

    /// One pass of the periodic state-advance logic. Dispatch is an
    /// exhaustive match so a new state cannot silently fall through.
    pub fn tick(&mut self) {
        match self.state {
            State::Starting => self.from_starting_to_await_engage(),
            State::AwaitEngage => {
                if self.engage_active {
                    self.from_await_engage_to_await_set();
                }
            }
            State::AwaitSet => {
                if self.limit_active {
                    self.from_await_set_to_await_go();
                }
            }
            State::AwaitGo => {
                if !self.limit_active {
                    self.from_await_go_to_await_set();
                }
            }
            State::Running => {
                if self.tracker_tick() {
                    self.from_running_to_stopping();
                }
            }
            State::Stopping => {
                if self.tracker_tick() {
                    self.from_stopping_to_await_engage();
                }
            }
            State::Returning => {
                if self.tracker_tick() {
                    // The line never reached the limit inside its time
                    // budget; stop where we are.
                    self.from_returning_to_await_engage();
                }
            }
            State::JogForward | State::JogBackward => {
                // Jog trackers carry no caps; ticking only advances stats.
                let _ = self.tracker_tick();
            }
            State::Error => {
                // The process should already be exiting.
                self.fail_safe("tick while in error state");
            }
        }
    }

    fn tracker_tick(&mut self) -> bool {
        match self.tracker.as_mut() {
            Some(tracker) => tracker.tick(),
            None => false,
        }
    }

    // ----------------------------------------
    // Events

    pub fn on_engage_activated(&mut self) {
        tracing::info!("Event: engage activated");
        self.engage_active = true;
        match self.state {
            State::AwaitEngage => self.from_await_engage_to_await_set(),
            // Engage need only be held to initiate a movement.
            State::Running | State::Stopping => {}
            State::Error => {}
            _ => self.protocol_violation("engage activated"),
        }
    }

    pub fn on_engage_deactivated(&mut self) {
        tracing::info!("Event: engage deactivated");
        self.engage_active = false;
        match self.state {
            State::AwaitSet => self.from_await_set_to_await_engage(),
            State::AwaitGo => self.from_await_go_to_await_engage(),
            State::Returning => self.from_returning_to_await_engage(),
            State::JogForward => self.from_jog_forward_to_await_engage(),
            State::JogBackward => self.from_jog_backward_to_await_engage(),
            // Releasing engage mid-run is fine: the run completes on its
            // own caps.
            State::Running | State::Stopping => {}
            State::Error => {}
            _ => tracing::warn!("Warn: engage released while in state {}", self.state),
        }
    }

    pub fn on_limit_activated(&mut self) {
        tracing::info!("Event: limit activated");
        self.limit_active = true;
        match self.state {
            // Momentum, or the line being pulled by hand; latch only.
            State::Starting | State::AwaitEngage => {}
            State::AwaitSet => self.from_await_set_to_await_go(),
            // Jog stops at the end of travel.
            State::JogForward => self.from_jog_forward_to_await_engage(),
            State::JogBackward => self.from_jog_backward_to_await_engage(),
            State::Returning => self.from_returning_to_await_engage(),
            State::Error => {}
            _ => self.protocol_violation("limit activated"),
        }
    }

    pub fn on_limit_deactivated(&mut self) {
        tracing::info!("Event: limit deactivated");
        self.limit_active = false;
        match self.state {
            State::AwaitGo => self.from_await_go_to_await_set(),
            // The run pulling the line off the start position, or a jog
            // doing the same; latch only.
            State::AwaitEngage | State::Running | State::JogForward | State::JogBackward => {}
            State::Error => {}
            _ => self.protocol_violation("limit deactivated"),
        }
    }

    pub fn on_go_activated(&mut self) {
        tracing::info!("Event: go activated");
        match self.state {
            State::AwaitGo => self.from_await_go_to_running(),
            // Pressing go anywhere else, including mid-run, is harmless.
            _ => {}
        }
    }

    pub fn on_go_deactivated(&mut self) {
        tracing::info!("Event: go deactivated");
    }

    pub fn on_return_activated(&mut self) {
        tracing::info!("Event: return activated");
        match self.state {
            State::AwaitSet if self.limit_active => {
                tracing::warn!("Warn: ignoring return request, already at start position");
            }
            State::AwaitSet => self.from_await_set_to_returning(),
            State::AwaitEngage => {
                tracing::warn!("Warn: can't return without engage held");
            }
            State::AwaitGo => {
                tracing::warn!("Warn: ignoring return request, already at start position");
            }
            // A momentary operator control; pressing it mid-movement is
            // harmless.
            _ => {}
        }
    }

    pub fn on_return_deactivated(&mut self) {
        tracing::info!("Event: return deactivated");
    }

    pub fn on_jog_forward_activated(&mut self) {
        tracing::info!("Event: jog forward activated");
        match self.state {
            State::AwaitEngage => {
                tracing::warn!("Warn: can't jog forward without engage held");
            }
            State::AwaitSet => self.from_await_set_to_jog_forward(),
            State::AwaitGo => self.from_await_go_to_jog_forward(),
            State::Returning => self.from_returning_to_jog_forward(),
            // Ignored while a run is in progress.
            _ => {}
        }
    }

    pub fn on_jog_forward_deactivated(&mut self) {
        tracing::info!("Event: jog forward deactivated");
        match self.state {
            State::JogForward => self.from_jog_forward_to_await_engage(),
            State::Error => {}
            // Releasing engage first already put us somewhere safe.
            _ => tracing::warn!("Warn: not in jog_forward when jog released"),
        }
    }

    pub fn on_jog_backward_activated(&mut self) {
        tracing::info!("Event: jog backward activated");
        if self.limit_active {
            tracing::warn!("Warn: ignoring jog backward request due to limit switch");
            return;
        }
        match self.state {
            State::AwaitEngage => {
                tracing::warn!("Warn: can't jog backward without engage held");
            }
            State::AwaitSet => self.from_await_set_to_jog_backward(),
            State::AwaitGo => self.from_await_go_to_jog_backward(),
            State::Returning => self.from_returning_to_jog_backward(),
            _ => {}
        }
    }

    pub fn on_jog_backward_deactivated(&mut self) {
        tracing::info!("Event: jog backward deactivated");
        match self.state {
            State::JogBackward => self.from_jog_backward_to_await_engage(),
            State::Error => {}
            _ => tracing::warn!("Warn: not in jog_backward when jog released"),
        }
    }

    pub fn on_estop_activated(&mut self) {
        self.fail_safe("e-stop pressed");
    }

    pub fn on_estop_deactivated(&mut self) {
        self.fail_safe("e-stop released");
    }

    /// One confirmed revolution of the pulley.
    pub fn on_rotate_pulse(&mut self) {
        let Some(tracker) = self.tracker.as_mut() else {
            // Residual line motion with no phase in progress.
            tracing::debug!("Event: rotate pulse with no live tracker");
            return;
        };
        let completed = tracker.revolve();
        tracing::debug!(
            "Event: rotate pulse, {:.2} m over {} revolutions",
            tracker.distance(),
            tracker.revolutions()
        );
        if completed && self.state == State::Running {
            self.from_running_to_stopping();
        }
    }

    // ----------------------------------------
    // Fail-safe

    fn protocol_violation(&mut self, event: &str) {
        let reason = format!("unexpected {} while in state {}", event, self.state);
        self.fail_safe(&reason);
    }

    /// Brake on, motor off, terminal state. The process layer observes the
    /// error state and exits with `FAIL_SAFE_EXIT` after `SETTLE_DELAY`;
    /// this function itself never terminates the process, so it stays
    /// testable and the caller controls teardown ordering.
    pub fn fail_safe(&mut self, reason: &str) {
        tracing::error!("Fail-safe shutdown: {}", reason);
        self.outputs.brake.engage();
        self.outputs.motor.stop();
        self.tracker = None;
        self.state = State::Error;
        if self.fault.is_none() {
            self.fault = Some(reason.to_string());
        }
    }

    // ----------------------------------------
    // Entry and exit actions

    fn enter_starting(&mut self) {
        self.state = State::Starting;
        self.outputs.engage_led.on();
        self.outputs.go_led.on();
    }

    fn exit_starting(&mut self) {
        self.outputs.engage_led.off();
        self.outputs.go_led.off();
    }

    fn enter_await_engage(&mut self) {
        self.state = State::AwaitEngage;
        self.outputs.motor.stop();
        self.outputs.brake.engage();
        self.outputs.engage_led.on();
        if self.engage_active {
            self.from_await_engage_to_await_set();
        }
    }

    fn exit_await_engage(&mut self) {
        // The operator is holding engage: the system is free to move.
        self.outputs.engage_led.off();
        self.outputs.brake.disengage();
    }

    fn enter_await_set(&mut self) {
        self.state = State::AwaitSet;
        self.outputs.go_led.blink(GO_BLINK_ON, GO_BLINK_OFF);
        if self.limit_active {
            self.from_await_set_to_await_go();
        }
    }

    fn exit_await_set(&mut self) {
        self.outputs.go_led.off();
    }

    fn enter_await_go(&mut self) {
        self.state = State::AwaitGo;
        self.outputs.go_led.on();
    }

    fn exit_await_go(&mut self) {
        self.outputs.go_led.off();
    }

    fn enter_running(&mut self) {
        self.state = State::Running;
        self.outputs.motor.forward(self.config.speed.full_speed);
        self.tracker = Some(MovementTracker::new(
            Some(Duration::from_secs_f64(self.config.timing.run_time_s)),
            Some(self.config.geometry.run_length_m),
            self.config.geometry.pulley_diameter_m,
        ));
    }

    fn exit_running(&mut self) {
        self.outputs.motor.stop();
        self.log_phase("run");
    }

    fn enter_stopping(&mut self) {
        self.state = State::Stopping;
        self.outputs.brake.engage();
        // Extra motor stop for good measure.
        self.outputs.motor.stop();
        self.tracker = Some(MovementTracker::new(
            Some(Duration::from_secs_f64(self.config.timing.stop_time_s)),
            None,
            self.config.geometry.pulley_diameter_m,
        ));
    }

    fn exit_stopping(&mut self) {
        self.log_phase("stop");
    }

    fn enter_returning(&mut self) {
        self.state = State::Returning;
        self.outputs.motor.backward(self.config.speed.low_speed);
        self.tracker = Some(MovementTracker::new(
            Some(Duration::from_secs_f64(self.config.timing.return_time_s)),
            None,
            self.config.geometry.pulley_diameter_m,
        ));
    }

    fn exit_returning(&mut self) {
        self.outputs.motor.stop();
        self.log_phase("return");
    }

    fn enter_jog_forward(&mut self) {
        self.state = State::JogForward;
        self.outputs.motor.forward(self.config.speed.low_speed);
        self.tracker = Some(MovementTracker::new(
            None,
            None,
            self.config.geometry.pulley_diameter_m,
        ));
    }

    fn exit_jog_forward(&mut self) {
        // No brake here: a jog ends by coasting.
        self.outputs.motor.stop();
        self.log_phase("jog forward");
    }

    fn enter_jog_backward(&mut self) {
        self.state = State::JogBackward;
        self.outputs.motor.backward(self.config.speed.low_speed);
        self.tracker = Some(MovementTracker::new(
            None,
            None,
            self.config.geometry.pulley_diameter_m,
        ));
    }

    fn exit_jog_backward(&mut self) {
        self.outputs.motor.stop();
        self.log_phase("jog backward");
    }

    fn log_phase(&mut self, name: &str) {
        let Some(tracker) = self.tracker.take() else {
            return;
        };
        let max_speed = match tracker.max_speed() {
            Some(speed) => format!("{speed:.2} m/s"),
            None => "unknown".to_string(),
        };
        tracing::info!(
            "Statistics for {}: distance {:.2} m, duration {:.2} s, revolutions {}, max speed {}",
            name,
            tracker.distance(),
            tracker.duration().as_secs_f64(),
            tracker.revolutions(),
            max_speed,
        );
    }

    // ----------------------------------------
    // Named transitions. Each logs, runs the old state's exit action,
    // then the new state's entry action; entry may chain further.

    fn from_starting_to_await_engage(&mut self) {
        tracing::info!("State: starting -> await_engage");
        self.exit_starting();
        self.enter_await_engage();
    }

    fn from_await_engage_to_await_set(&mut self) {
        tracing::info!("State: await_engage -> await_set");
        self.exit_await_engage();
        self.enter_await_set();
    }

    fn from_await_set_to_await_engage(&mut self) {
        tracing::info!("State: await_set -> await_engage");
        self.exit_await_set();
        self.enter_await_engage();
    }

    fn from_await_set_to_await_go(&mut self) {
        tracing::info!("State: await_set -> await_go");
        self.exit_await_set();
        self.enter_await_go();
    }

    fn from_await_set_to_returning(&mut self) {
        tracing::info!("State: await_set -> returning");
        self.exit_await_set();
        self.enter_returning();
    }

    fn from_await_set_to_jog_forward(&mut self) {
        tracing::info!("State: await_set -> jog_forward");
        self.exit_await_set();
        self.enter_jog_forward();
    }

    fn from_await_set_to_jog_backward(&mut self) {
        tracing::info!("State: await_set -> jog_backward");
        self.exit_await_set();
        self.enter_jog_backward();
    }

    fn from_await_go_to_await_engage(&mut self) {
        tracing::info!("State: await_go -> await_engage");
        self.exit_await_go();
        self.enter_await_engage();
    }

    fn from_await_go_to_await_set(&mut self) {
        // Unusual: the limit sensor came unset while the motor was not
        // moving the machine.
        tracing::info!("State: await_go -> await_set");
        self.exit_await_go();
        self.enter_await_set();
    }

    fn from_await_go_to_running(&mut self) {
        tracing::info!("State: await_go -> running");
        self.exit_await_go();
        self.enter_running();
    }

    fn from_await_go_to_jog_forward(&mut self) {
        tracing::info!("State: await_go -> jog_forward");
        self.exit_await_go();
        self.enter_jog_forward();
    }

    fn from_await_go_to_jog_backward(&mut self) {
        tracing::info!("State: await_go -> jog_backward");
        self.exit_await_go();
        self.enter_jog_backward();
    }

    fn from_running_to_stopping(&mut self) {
        tracing::info!("State: running -> stopping");
        self.exit_running();
        self.enter_stopping();
    }

    fn from_stopping_to_await_engage(&mut self) {
        tracing::info!("State: stopping -> await_engage");
        self.exit_stopping();
        self.enter_await_engage();
    }

    fn from_returning_to_await_engage(&mut self) {
        tracing::info!("State: returning -> await_engage");
        self.exit_returning();
        self.enter_await_engage();
    }

    fn from_returning_to_jog_forward(&mut self) {
        tracing::info!("State: returning -> jog_forward");
        self.exit_returning();
        self.enter_jog_forward();
    }

    fn from_returning_to_jog_backward(&mut self) {
        tracing::info!("State: returning -> jog_backward");
        self.exit_returning();
        self.enter_jog_backward();
    }

    fn from_jog_forward_to_await_engage(&mut self) {
        tracing::info!("State: jog_forward -> await_engage");
        self.exit_jog_forward();
        self.enter_await_engage();
    }

    fn from_jog_backward_to_await_engage(&mut self) {
        tracing::info!("State: jog_backward -> await_engage");
        self.exit_jog_backward();
        self.enter_await_engage();
    }
}

/// Lock the shared controller, recovering the data from a poisoned lock
/// (a panicked handler must not stop the fail-safe path).
pub fn lock(controller: &Arc<Mutex<Controller>>) -> MutexGuard<'_, Controller> {
    controller.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wire every input channel's confirmed edges to the controller's event
/// handlers. Statically registered at construction time; each handler
/// locks the shared controller once and runs to completion.
pub fn wire_inputs(aggregator: &mut InputAggregator, controller: &Arc<Mutex<Controller>>) {
    let hook = |handler: fn(&mut Controller)| -> Handler {
        let controller = Arc::clone(controller);
        Box::new(move || handler(&mut lock(&controller)))
    };

    aggregator.register(
        Channel::Engage,
        Some(hook(Controller::on_engage_activated)),
        Some(hook(Controller::on_engage_deactivated)),
    );
    aggregator.register(
        Channel::Go,
        Some(hook(Controller::on_go_activated)),
        Some(hook(Controller::on_go_deactivated)),
    );
    aggregator.register(
        Channel::Return,
        Some(hook(Controller::on_return_activated)),
        Some(hook(Controller::on_return_deactivated)),
    );
    aggregator.register(
        Channel::JogForward,
        Some(hook(Controller::on_jog_forward_activated)),
        Some(hook(Controller::on_jog_forward_deactivated)),
    );
    aggregator.register(
        Channel::JogBackward,
        Some(hook(Controller::on_jog_backward_activated)),
        Some(hook(Controller::on_jog_backward_deactivated)),
    );
    aggregator.register(
        Channel::Limit,
        Some(hook(Controller::on_limit_activated)),
        Some(hook(Controller::on_limit_deactivated)),
    );
    aggregator.register(
        Channel::Rotate,
        Some(hook(Controller::on_rotate_pulse)),
        None,
    );
    aggregator.register(
        Channel::EStop,
        Some(hook(Controller::on_estop_activated)),
        Some(hook(Controller::on_estop_deactivated)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::Direction;
    use crate::hardware::sim::{IndicatorState, SimOutputsProbe, sim_outputs};
    use std::thread::sleep;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.timing.run_time_s = 0.2;
        config.timing.stop_time_s = 0.2;
        config.timing.return_time_s = 0.2;
        config.validate().expect("test config must validate");
        config
    }

    fn booted(config: Config) -> (Controller, SimOutputsProbe) {
        let (outputs, probe) = sim_outputs();
        let mut controller = Controller::new(config, outputs);
        assert_eq!(controller.state(), State::Starting);
        controller.tick();
        assert_eq!(controller.state(), State::AwaitEngage);
        (controller, probe)
    }

    #[test]
    fn boots_into_await_engage_with_safe_outputs() {
        let (controller, probe) = booted(fast_config());
        assert_eq!(controller.state(), State::AwaitEngage);
        assert!(probe.brake.is_engaged());
        assert_eq!(probe.motor.snapshot().direction, Direction::Stopped);
        assert_eq!(probe.engage_led.state(), IndicatorState::On);
        assert_eq!(probe.go_led.state(), IndicatorState::Off);
    }

    #[test]
    fn full_cycle_engage_set_go_run_stop() {
        let (mut controller, probe) = booted(fast_config());

        controller.on_engage_activated();
        assert_eq!(controller.state(), State::AwaitSet);
        assert!(!probe.brake.is_engaged());
        assert!(matches!(
            probe.go_led.state(),
            IndicatorState::Blinking { .. }
        ));

        controller.on_limit_activated();
        assert_eq!(controller.state(), State::AwaitGo);
        assert_eq!(probe.go_led.state(), IndicatorState::On);

        controller.on_go_activated();
        assert_eq!(controller.state(), State::Running);
        let motor = probe.motor.snapshot();
        assert_eq!(motor.direction, Direction::Forward);
        assert_eq!(motor.speed, 1.0);

        // The run pulls the line off the start position and the operator
        // lets go of engage; both are accepted without a transition.
        controller.on_limit_deactivated();
        controller.on_engage_deactivated();
        assert_eq!(controller.state(), State::Running);

        sleep(Duration::from_millis(250));
        controller.tick();
        assert_eq!(controller.state(), State::Stopping);
        assert!(probe.brake.is_engaged());
        assert_eq!(probe.motor.snapshot().direction, Direction::Stopped);

        sleep(Duration::from_millis(250));
        controller.tick();
        assert_eq!(controller.state(), State::AwaitEngage);
        assert_eq!(probe.engage_led.state(), IndicatorState::On);
    }

    #[test]
    fn run_completes_by_distance_cap() {
        let mut config = fast_config();
        config.timing.run_time_s = 30.0;
        config.geometry.run_length_m = 2.2;
        config.geometry.pulley_diameter_m = 0.22;
        let (mut controller, probe) = booted(config);

        controller.on_engage_activated();
        controller.on_limit_activated();
        controller.on_go_activated();
        assert_eq!(controller.state(), State::Running);

        for _ in 0..9 {
            controller.on_rotate_pulse();
            assert_eq!(controller.state(), State::Running);
        }
        controller.on_rotate_pulse();
        assert_eq!(controller.state(), State::Stopping);
        assert!(probe.brake.is_engaged());
    }

    #[test]
    fn estop_from_await_set_is_terminal_and_fail_safe() {
        let (mut controller, probe) = booted(fast_config());
        controller.on_engage_activated();
        assert_eq!(controller.state(), State::AwaitSet);

        controller.on_estop_activated();
        assert_eq!(controller.state(), State::Error);
        assert!(probe.brake.is_engaged());
        assert_eq!(probe.motor.snapshot().direction, Direction::Stopped);
        assert_eq!(controller.fault(), Some("e-stop pressed"));

        // Error is terminal: further events leave the state unchanged.
        controller.on_go_activated();
        controller.on_engage_activated();
        controller.on_jog_forward_activated();
        controller.on_limit_activated();
        assert_eq!(controller.state(), State::Error);
        // and the original fault is preserved
        assert_eq!(controller.fault(), Some("e-stop pressed"));
    }

    #[test]
    fn estop_release_is_also_fail_safe() {
        let (mut controller, _probe) = booted(fast_config());
        controller.on_estop_deactivated();
        assert_eq!(controller.state(), State::Error);
        assert_eq!(controller.fault(), Some("e-stop released"));
    }

    #[test]
    fn latched_limit_chains_await_set_into_await_go() {
        let (mut controller, _probe) = booted(fast_config());
        // Limit becomes active while idle: latched, no transition.
        controller.on_limit_activated();
        assert_eq!(controller.state(), State::AwaitEngage);
        // Entering await_set sees the latch and chains straight through.
        controller.on_engage_activated();
        assert_eq!(controller.state(), State::AwaitGo);
    }

    #[test]
    fn engage_held_through_stop_chains_back_to_await_set() {
        let (mut controller, _probe) = booted(fast_config());
        controller.on_engage_activated();
        controller.on_limit_activated();
        controller.on_go_activated();
        controller.on_limit_deactivated();
        assert_eq!(controller.state(), State::Running);

        sleep(Duration::from_millis(250));
        controller.tick(); // running -> stopping
        sleep(Duration::from_millis(250));
        controller.tick(); // stopping -> await_engage -> await_set
        assert_eq!(controller.state(), State::AwaitSet);
    }

    #[test]
    fn jog_release_with_engage_held_settles_in_await_set() {
        let (mut controller, probe) = booted(fast_config());
        controller.on_engage_activated();
        controller.on_jog_forward_activated();
        assert_eq!(controller.state(), State::JogForward);
        let motor = probe.motor.snapshot();
        assert_eq!(motor.direction, Direction::Forward);
        assert_eq!(motor.speed, 0.25);

        controller.on_jog_forward_deactivated();
        // await_engage entry sees engage still held and chains onward
        assert_eq!(controller.state(), State::AwaitSet);
        assert_eq!(probe.motor.snapshot().direction, Direction::Stopped);
    }

    #[test]
    fn jog_backward_refused_at_the_limit() {
        let (mut controller, _probe) = booted(fast_config());
        controller.on_limit_activated();
        controller.on_engage_activated();
        assert_eq!(controller.state(), State::AwaitGo);
        controller.on_jog_backward_activated();
        assert_eq!(controller.state(), State::AwaitGo);
    }

    #[test]
    fn limit_stops_a_jog() {
        let (mut controller, _probe) = booted(fast_config());
        controller.on_engage_activated();
        controller.on_jog_backward_activated();
        assert_eq!(controller.state(), State::JogBackward);
        controller.on_limit_activated();
        // back to idle, then engage chains into await_set, then the limit
        // latch chains into await_go
        assert_eq!(controller.state(), State::AwaitGo);
    }

    #[test]
    fn return_runs_backward_until_the_limit() {
        let (mut controller, probe) = booted(fast_config());
        controller.on_engage_activated();
        assert_eq!(controller.state(), State::AwaitSet);

        controller.on_return_activated();
        assert_eq!(controller.state(), State::Returning);
        let motor = probe.motor.snapshot();
        assert_eq!(motor.direction, Direction::Backward);
        assert_eq!(motor.speed, 0.25);

        controller.on_limit_activated();
        // returning -> await_engage, engage held -> await_set, limit
        // latched -> await_go
        assert_eq!(controller.state(), State::AwaitGo);
        assert_eq!(probe.motor.snapshot().direction, Direction::Stopped);
    }

    #[test]
    fn return_refused_at_the_start_position() {
        let (mut controller, _probe) = booted(fast_config());
        controller.on_limit_activated();
        controller.on_engage_activated();
        assert_eq!(controller.state(), State::AwaitGo);
        controller.on_return_activated();
        assert_eq!(controller.state(), State::AwaitGo);
    }

    #[test]
    fn return_time_budget_expiry_is_a_safe_stop() {
        let (mut controller, probe) = booted(fast_config());
        controller.on_engage_activated();
        controller.on_return_activated();
        assert_eq!(controller.state(), State::Returning);

        sleep(Duration::from_millis(250));
        controller.tick();
        // engage still held, so await_engage chains into await_set
        assert_eq!(controller.state(), State::AwaitSet);
        assert_eq!(probe.motor.snapshot().direction, Direction::Stopped);
    }

    #[test]
    fn jog_interrupts_a_return() {
        let (mut controller, probe) = booted(fast_config());
        controller.on_engage_activated();
        controller.on_return_activated();
        assert_eq!(controller.state(), State::Returning);
        controller.on_jog_forward_activated();
        assert_eq!(controller.state(), State::JogForward);
        assert_eq!(probe.motor.snapshot().direction, Direction::Forward);
    }

    #[test]
    fn undefined_limit_edge_is_a_protocol_violation() {
        let (mut controller, probe) = booted(fast_config());
        controller.on_engage_activated();
        assert_eq!(controller.state(), State::AwaitSet);
        // A limit release edge with the limit never active points at a
        // wiring fault or state-tracking bug.
        controller.on_limit_deactivated();
        assert_eq!(controller.state(), State::Error);
        assert!(probe.brake.is_engaged());
        assert!(controller.fault().unwrap().contains("limit deactivated"));
    }

    #[test]
    fn rotate_pulse_while_idle_is_ignored() {
        let (mut controller, _probe) = booted(fast_config());
        controller.on_rotate_pulse();
        assert_eq!(controller.state(), State::AwaitEngage);
    }

    #[test]
    fn jog_release_while_not_jogging_only_warns() {
        let (mut controller, _probe) = booted(fast_config());
        controller.on_engage_activated();
        controller.on_jog_forward_deactivated();
        assert_eq!(controller.state(), State::AwaitSet);
    }

    #[test]
    fn fail_safe_discards_the_live_tracker() {
        let (mut controller, _probe) = booted(fast_config());
        controller.on_engage_activated();
        controller.on_limit_activated();
        controller.on_go_activated();
        assert_eq!(controller.state(), State::Running);
        controller.on_estop_activated();
        assert_eq!(controller.state(), State::Error);
        // rotate pulses after the fail-safe have nowhere to go
        controller.on_rotate_pulse();
        assert_eq!(controller.state(), State::Error);
    }
}
