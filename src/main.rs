// src/main.rs - Process wiring: config, I/O binding, the two loops
use clap::Parser;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use towline::config;
use towline::controller::{self, Controller, State};
use towline::hardware::sim::{SimInputBank, sim_outputs};
use towline::inputs::{Channel, InputAggregator};

#[derive(Parser, Debug)]
#[command(name = "towline", about = "Control core for a motorized pull-line launch mechanism")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "towline.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    tracing::info!("Starting towline control core");
    tracing::info!("Loading configuration from: {}", args.config);

    // Configuration errors fail fast, before any hardware actuation.
    let config = config::load_config(&args.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", args.config, e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    tracing::info!(
        "Run: {} m over {} s, stop {} s, pulley {} m",
        config.geometry.run_length_m,
        config.timing.run_time_s,
        config.timing.stop_time_s,
        config.geometry.pulley_diameter_m,
    );

    // I/O binding. The simulated binding stands in for the control box
    // GPIO; a real binding implements the same hardware traits and plugs
    // in here unchanged.
    let bank = SimInputBank::new();
    let (outputs, _probe) = sim_outputs();

    let controller = Arc::new(Mutex::new(Controller::new(config.clone(), outputs)));

    let mut aggregator = InputAggregator::new();
    for channel in Channel::ALL {
        aggregator.add_channel(
            channel,
            Box::new(bank.line(channel)),
            config.input.debounce_consecutive,
            // the e-stop loop is normally energized
            channel == Channel::EStop,
        );
    }
    controller::wire_inputs(&mut aggregator, &controller);
    let aggregator = aggregator.spawn();

    tracing::info!("Main loop running");
    let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let exit_status = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted; exiting");
                break 0;
            }
            _ = interval.tick() => {
                let start = Instant::now();
                let state = {
                    let mut controller = controller::lock(&controller);
                    controller.tick();
                    let elapsed = start.elapsed();
                    if elapsed > controller::ACCEPTABLE_LATENCY {
                        controller.fail_safe(&format!(
                            "tick latency {:.3} s over budget",
                            elapsed.as_secs_f64()
                        ));
                    }
                    controller.state()
                };
                if state == State::Error {
                    break controller::FAIL_SAFE_EXIT;
                }
            }
        }
    };

    // Join the poll task before tearing anything down, so no handler can
    // fire into a dead controller.
    aggregator.stop().await;

    if exit_status != 0 {
        tokio::time::sleep(controller::SETTLE_DELAY).await;
        std::process::exit(exit_status);
    }
    Ok(())
}
