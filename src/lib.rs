// towline - control core for a motorized pull-line launch mechanism
//
// The library carries the three collaborating cores: the debounced input
// layer (`inputs`), the movement/period tracker (`tracker`), and the
// safety-interlocked state machine (`controller`). Configuration and the
// hardware capability traits frame them; the binary wires everything to a
// concrete I/O binding and runs the two loops.

pub mod config;
pub mod controller;
pub mod hardware;
pub mod inputs;
pub mod tracker;

pub use config::{Config, ConfigError, load_config};
pub use controller::{ACCEPTABLE_LATENCY, Controller, FAIL_SAFE_EXIT, SETTLE_DELAY, State};
pub use hardware::{Direction, Outputs};
pub use inputs::{Channel, DebouncedChannel, Edge, InputAggregator};
pub use tracker::MovementTracker;
