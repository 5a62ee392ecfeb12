// End-to-end cycle through the real loops: the poll task confirms edges
// into the controller while a tick loop (like the binary's) advances the
// timed phases.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use towline::config::Config;
use towline::controller::{self, Controller, State};
use towline::hardware::Direction;
use towline::hardware::sim::{SimInputBank, SimOutputsProbe, sim_outputs};
use towline::inputs::{Channel, InputAggregator};

const DEBOUNCE: u32 = 3;

fn fast_config() -> Config {
    let mut config = Config::default();
    config.timing.run_time_s = 0.15;
    config.timing.stop_time_s = 0.15;
    config.validate().expect("test config must validate");
    config
}

struct Rig {
    bank: SimInputBank,
    probe: SimOutputsProbe,
    controller: Arc<Mutex<Controller>>,
    aggregator: towline::inputs::AggregatorHandle,
    tick_shutdown: tokio::sync::watch::Sender<bool>,
    tick_task: tokio::task::JoinHandle<()>,
}

impl Rig {
    fn start(config: Config) -> Self {
        let bank = SimInputBank::new();
        let (outputs, probe) = sim_outputs();
        let controller = Arc::new(Mutex::new(Controller::new(config, outputs)));

        let mut aggregator = InputAggregator::new();
        for channel in Channel::ALL {
            aggregator.add_channel(
                channel,
                Box::new(bank.line(channel)),
                DEBOUNCE,
                channel == Channel::EStop,
            );
        }
        controller::wire_inputs(&mut aggregator, &controller);
        let aggregator = aggregator.spawn();

        let (tick_shutdown, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let tick_controller = Arc::clone(&controller);
        let tick_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {
                        let mut controller = controller::lock(&tick_controller);
                        controller.tick();
                        // the binary exits here; the rig just stops ticking
                        if controller.state() == State::Error {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            bank,
            probe,
            controller,
            aggregator,
            tick_shutdown,
            tick_task,
        }
    }

    fn state(&self) -> State {
        controller::lock(&self.controller).state()
    }

    async fn shut_down(self) {
        let _ = self.tick_shutdown.send(true);
        let _ = self.tick_task.await;
        self.aggregator.stop().await;
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(60)).await;
}

#[tokio::test]
async fn full_cycle_engage_set_go_run_stop() {
    let rig = Rig::start(fast_config());

    settle().await;
    assert_eq!(rig.state(), State::AwaitEngage);
    assert!(rig.probe.brake.is_engaged());

    rig.bank.set(Channel::Engage, true);
    settle().await;
    assert_eq!(rig.state(), State::AwaitSet);
    assert!(!rig.probe.brake.is_engaged());

    rig.bank.set(Channel::Limit, true);
    settle().await;
    assert_eq!(rig.state(), State::AwaitGo);

    rig.bank.set(Channel::Go, true);
    settle().await;
    assert_eq!(rig.state(), State::Running);
    assert_eq!(rig.probe.motor.snapshot().direction, Direction::Forward);

    // the run pulls the line off the start and the operator lets go
    rig.bank.set(Channel::Limit, false);
    rig.bank.set(Channel::Engage, false);
    rig.bank.set(Channel::Go, false);

    // run (0.15 s) then stop (0.15 s) complete on their own
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(rig.state(), State::AwaitEngage);
    assert!(rig.probe.brake.is_engaged());
    assert_eq!(rig.probe.motor.snapshot().direction, Direction::Stopped);

    rig.shut_down().await;
}

#[tokio::test]
async fn estop_drop_fail_safes_mid_sequence() {
    let rig = Rig::start(fast_config());

    settle().await;
    rig.bank.set(Channel::Engage, true);
    settle().await;
    assert_eq!(rig.state(), State::AwaitSet);

    // the normally-energized loop drops
    rig.bank.set(Channel::EStop, false);
    settle().await;
    assert_eq!(rig.state(), State::Error);
    assert!(rig.probe.brake.is_engaged());
    assert_eq!(rig.probe.motor.snapshot().direction, Direction::Stopped);

    // terminal: further operator input changes nothing
    rig.bank.set(Channel::Go, true);
    rig.bank.set(Channel::Limit, true);
    settle().await;
    assert_eq!(rig.state(), State::Error);

    rig.shut_down().await;
}

#[tokio::test]
async fn rotate_pulses_complete_a_short_run() {
    let mut config = fast_config();
    config.timing.run_time_s = 30.0;
    config.geometry.run_length_m = 2.2;
    config.geometry.pulley_diameter_m = 0.22;
    config.validate().expect("test config must validate");
    let rig = Rig::start(config);

    settle().await;
    rig.bank.set(Channel::Engage, true);
    rig.bank.set(Channel::Limit, true);
    settle().await;
    rig.bank.set(Channel::Go, true);
    settle().await;
    assert_eq!(rig.state(), State::Running);
    rig.bank.set(Channel::Limit, false);
    settle().await;

    // ten confirmed pulley revolutions reach the 2.2 m cap
    for _ in 0..10 {
        rig.bank.set(Channel::Rotate, true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        rig.bank.set(Channel::Rotate, false);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(rig.state(), State::Stopping);
    assert!(rig.probe.brake.is_engaged());

    rig.shut_down().await;
}
