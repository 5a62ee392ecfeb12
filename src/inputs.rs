// src/inputs.rs - Debounced input channels and the polling aggregator
//
// Raw lines are sampled on a dedicated 1 ms poll task. A sample only
// becomes a confirmed edge after `threshold` consecutive identical
// readings, which rejects electrical glitches without a wall-clock
// debounce window (the sampling cadence is fixed, so agreement count and
// elapsed time are interchangeable).

use std::fmt;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

use crate::hardware::InputLine;

/// Fixed sampling cadence of the poll task.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A confirmed logical transition on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Pressed,
    Released,
}

/// Every logical input the control box wires in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Engage,
    Go,
    Return,
    JogForward,
    JogBackward,
    Limit,
    Rotate,
    EStop,
}

impl Channel {
    pub const ALL: [Channel; 8] = [
        Channel::Engage,
        Channel::Go,
        Channel::Return,
        Channel::JogForward,
        Channel::JogBackward,
        Channel::Limit,
        Channel::Rotate,
        Channel::EStop,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Channel::Engage => "engage",
            Channel::Go => "go",
            Channel::Return => "return",
            Channel::JogForward => "jog_forward",
            Channel::JogBackward => "jog_backward",
            Channel::Limit => "limit",
            Channel::Rotate => "rotate",
            Channel::EStop => "estop",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Confirmation-by-sustained-agreement debounce filter for one raw line.
///
/// `invert` is for normally-energized safety lines (the e-stop loop):
/// the line rests high and a drop to low is the press.
#[derive(Debug)]
pub struct DebouncedChannel {
    invert: bool,
    confirmed: bool,
    tracking: bool,
    consecutive: u32,
    threshold: u32,
}

impl DebouncedChannel {
    pub fn new(threshold: u32, invert: bool) -> Self {
        // Inverted lines idle energized, so they start confirmed high.
        let rest = invert;
        Self {
            invert,
            confirmed: rest,
            tracking: rest,
            consecutive: 0,
            threshold,
        }
    }

    /// Last confirmed raw level.
    pub fn confirmed(&self) -> bool {
        self.confirmed
    }

    /// Whether the confirmed level means "active", accounting for polarity.
    pub fn is_active(&self) -> bool {
        self.confirmed != self.invert
    }

    /// Consume one raw reading. Emits an edge only when a new level has
    /// held for `threshold` consecutive samples; any disagreeing sample
    /// rebases the tracking run and starts the count over.
    pub fn sample(&mut self, raw: bool) -> Option<Edge> {
        if raw == self.tracking {
            self.consecutive = self.consecutive.saturating_add(1);
            if self.consecutive >= self.threshold && raw != self.confirmed {
                self.confirmed = raw;
                let active = raw != self.invert;
                return Some(if active { Edge::Pressed } else { Edge::Released });
            }
            None
        } else {
            self.tracking = raw;
            self.consecutive = 1;
            None
        }
    }
}

/// Handler invoked synchronously on the poll task when an edge confirms.
pub type Handler = Box<dyn Fn() + Send>;

struct PolledChannel {
    channel: Channel,
    line: Box<dyn InputLine>,
    debounce: DebouncedChannel,
    on_pressed: Option<Handler>,
    on_released: Option<Handler>,
}

impl PolledChannel {
    fn poll(&mut self) {
        let raw = self.line.sample();
        let Some(edge) = self.debounce.sample(raw) else {
            return;
        };
        match edge {
            Edge::Pressed => {
                tracing::info!("Input: pressed {}", self.channel);
                match &self.on_pressed {
                    Some(handler) => handler(),
                    None => tracing::debug!("Input: no pressed handler for {}", self.channel),
                }
            }
            Edge::Released => {
                tracing::info!("Input: released {}", self.channel);
                match &self.on_released {
                    Some(handler) => handler(),
                    None => tracing::debug!("Input: no released handler for {}", self.channel),
                }
            }
        }
    }
}

/// Owns every debounced channel and the poll loop that feeds them.
///
/// Channels and handlers are wired up front, then `spawn()` moves the
/// whole set onto a dedicated task. Handlers run synchronously on that
/// task; mutual exclusion against the tick loop is the controller's
/// responsibility.
pub struct InputAggregator {
    channels: Vec<PolledChannel>,
}

impl InputAggregator {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    pub fn add_channel(
        &mut self,
        channel: Channel,
        line: Box<dyn InputLine>,
        threshold: u32,
        invert: bool,
    ) {
        self.channels.push(PolledChannel {
            channel,
            line,
            debounce: DebouncedChannel::new(threshold, invert),
            on_pressed: None,
            on_released: None,
        });
    }

    /// Install the edge handlers for one channel. Either side may be
    /// `None` (the rotate sensor only cares about rising edges).
    pub fn register(
        &mut self,
        channel: Channel,
        on_pressed: Option<Handler>,
        on_released: Option<Handler>,
    ) {
        match self.channels.iter_mut().find(|c| c.channel == channel) {
            Some(polled) => {
                polled.on_pressed = on_pressed;
                polled.on_released = on_released;
            }
            None => tracing::warn!("Input: register on unknown channel {}", channel),
        }
    }

    /// Move the channel set onto its polling task.
    pub fn spawn(self) -> AggregatorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut channels = self.channels;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {
                        for polled in channels.iter_mut() {
                            polled.poll();
                        }
                    }
                }
            }
            tracing::debug!("Input: poll task stopped");
        });
        AggregatorHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

impl Default for InputAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Running poll task. `stop()` is a scoped shutdown: it signals the loop
/// and waits for it to finish, so no handler can fire afterwards.
pub struct AggregatorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AggregatorHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
