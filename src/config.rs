// src/config.rs - Static configuration with construction-time validation
//
// Every numeric field carries a hard allowed range so a mistyped value
// cannot reach the controller; the controller trusts validated values.
// Channel numbers are logical identifiers handed to the hardware binding.

use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{field} = {value} outside allowed range {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("low_speed ({low}) must not exceed full_speed ({full})")]
    SpeedOrdering { low: f64, full: f64 },
    #[error("channel {channel} assigned to both {first} and {second}")]
    DuplicateChannel {
        channel: u8,
        first: &'static str,
        second: &'static str,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub geometry: GeometryConfig,

    #[serde(default)]
    pub speed: SpeedConfig,

    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub channels: ChannelConfig,

    #[serde(default)]
    pub outputs: OutputConfig,
}

/// Phase time caps, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingConfig {
    #[serde(default = "default_run_time")]
    pub run_time_s: f64,

    #[serde(default = "default_stop_time")]
    pub stop_time_s: f64,

    #[serde(default = "default_return_time")]
    pub return_time_s: f64,
}

/// Physical layout of the line and pulley.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeometryConfig {
    /// Length of the powered acceleration area, meters.
    #[serde(default = "default_run_length")]
    pub run_length_m: f64,

    /// Per-revolution distance increment, meters. This is the pulley
    /// diameter used directly (not circumference); see tracker module.
    #[serde(default = "default_pulley_diameter")]
    pub pulley_diameter_m: f64,
}

/// Motor duty fractions per phase kind.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpeedConfig {
    /// Duty for a powered run.
    #[serde(default = "default_full_speed")]
    pub full_speed: f64,

    /// Duty for jog and return movements.
    #[serde(default = "default_low_speed")]
    pub low_speed: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    /// Consecutive identical samples required to confirm an edge.
    #[serde(default = "default_debounce_consecutive")]
    pub debounce_consecutive: u32,
}

/// Logical channel number per input role.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    #[serde(default = "default_engage_channel")]
    pub engage: u8,
    #[serde(default = "default_go_channel")]
    pub go: u8,
    #[serde(rename = "return", default = "default_return_channel")]
    pub return_button: u8,
    #[serde(default = "default_jog_forward_channel")]
    pub jog_forward: u8,
    #[serde(default = "default_jog_backward_channel")]
    pub jog_backward: u8,
    #[serde(default = "default_limit_channel")]
    pub limit: u8,
    #[serde(default = "default_rotate_channel")]
    pub rotate: u8,
    #[serde(default = "default_estop_channel")]
    pub estop: u8,
}

/// Logical channel number per output role.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_motor_forward_channel")]
    pub motor_forward: u8,
    #[serde(default = "default_motor_backward_channel")]
    pub motor_backward: u8,
    #[serde(default = "default_brake_channel")]
    pub brake: u8,
    #[serde(default = "default_engage_led_channel")]
    pub engage_led: u8,
    #[serde(default = "default_go_led_channel")]
    pub go_led: u8,
}

fn default_run_time() -> f64 {
    5.0
}
fn default_stop_time() -> f64 {
    3.0
}
fn default_return_time() -> f64 {
    30.0
}
fn default_run_length() -> f64 {
    30.0
}
fn default_pulley_diameter() -> f64 {
    0.22
}
fn default_full_speed() -> f64 {
    1.0
}
fn default_low_speed() -> f64 {
    0.25
}
fn default_debounce_consecutive() -> u32 {
    20
}
fn default_engage_channel() -> u8 {
    17
}
fn default_go_channel() -> u8 {
    27
}
fn default_return_channel() -> u8 {
    22
}
fn default_jog_forward_channel() -> u8 {
    23
}
fn default_jog_backward_channel() -> u8 {
    24
}
fn default_limit_channel() -> u8 {
    25
}
fn default_rotate_channel() -> u8 {
    26
}
fn default_estop_channel() -> u8 {
    4
}
fn default_motor_forward_channel() -> u8 {
    12
}
fn default_motor_backward_channel() -> u8 {
    13
}
fn default_brake_channel() -> u8 {
    5
}
fn default_engage_led_channel() -> u8 {
    6
}
fn default_go_led_channel() -> u8 {
    16
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            run_time_s: default_run_time(),
            stop_time_s: default_stop_time(),
            return_time_s: default_return_time(),
        }
    }
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            run_length_m: default_run_length(),
            pulley_diameter_m: default_pulley_diameter(),
        }
    }
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            full_speed: default_full_speed(),
            low_speed: default_low_speed(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            debounce_consecutive: default_debounce_consecutive(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            engage: default_engage_channel(),
            go: default_go_channel(),
            return_button: default_return_channel(),
            jog_forward: default_jog_forward_channel(),
            jog_backward: default_jog_backward_channel(),
            limit: default_limit_channel(),
            rotate: default_rotate_channel(),
            estop: default_estop_channel(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            motor_forward: default_motor_forward_channel(),
            motor_backward: default_motor_backward_channel(),
            brake: default_brake_channel(),
            engage_led: default_engage_led_channel(),
            go_led: default_go_led_channel(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            geometry: GeometryConfig::default(),
            speed: SpeedConfig::default(),
            input: InputConfig::default(),
            channels: ChannelConfig::default(),
            outputs: OutputConfig::default(),
        }
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

impl Config {
    /// Range-check every field and reject duplicate channel assignments.
    /// Runs before any hardware actuation; failures never reach runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("timing.run_time_s", self.timing.run_time_s, 0.1, 120.0)?;
        check_range("timing.stop_time_s", self.timing.stop_time_s, 0.1, 60.0)?;
        check_range(
            "timing.return_time_s",
            self.timing.return_time_s,
            0.1,
            300.0,
        )?;
        check_range(
            "geometry.run_length_m",
            self.geometry.run_length_m,
            1.0,
            500.0,
        )?;
        check_range(
            "geometry.pulley_diameter_m",
            self.geometry.pulley_diameter_m,
            0.01,
            1.0,
        )?;
        check_range("speed.full_speed", self.speed.full_speed, 0.05, 1.0)?;
        check_range("speed.low_speed", self.speed.low_speed, 0.05, 1.0)?;
        if self.speed.low_speed > self.speed.full_speed {
            return Err(ConfigError::SpeedOrdering {
                low: self.speed.low_speed,
                full: self.speed.full_speed,
            });
        }
        check_range(
            "input.debounce_consecutive",
            f64::from(self.input.debounce_consecutive),
            2.0,
            100.0,
        )?;

        let assignments: [(&'static str, u8); 13] = [
            ("channels.engage", self.channels.engage),
            ("channels.go", self.channels.go),
            ("channels.return", self.channels.return_button),
            ("channels.jog_forward", self.channels.jog_forward),
            ("channels.jog_backward", self.channels.jog_backward),
            ("channels.limit", self.channels.limit),
            ("channels.rotate", self.channels.rotate),
            ("channels.estop", self.channels.estop),
            ("outputs.motor_forward", self.outputs.motor_forward),
            ("outputs.motor_backward", self.outputs.motor_backward),
            ("outputs.brake", self.outputs.brake),
            ("outputs.engage_led", self.outputs.engage_led),
            ("outputs.go_led", self.outputs.go_led),
        ];
        for (i, &(first_name, first)) in assignments.iter().enumerate() {
            for &(second_name, second) in &assignments[i + 1..] {
                if first == second {
                    return Err(ConfigError::DuplicateChannel {
                        channel: first,
                        first: first_name,
                        second: second_name,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timing.run_time_s, 5.0);
        assert_eq!(config.geometry.pulley_diameter_m, 0.22);
        assert_eq!(config.input.debounce_consecutive, 20);
    }

    #[test]
    fn loads_a_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[timing]
run_time_s = 8.0
stop_time_s = 4.0

[geometry]
run_length_m = 45.0
pulley_diameter_m = 0.18

[channels]
engage = 20
"#
        )
        .unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.timing.run_time_s, 8.0);
        assert_eq!(config.geometry.pulley_diameter_m, 0.18);
        assert_eq!(config.channels.engage, 20);
        // untouched sections keep their defaults
        assert_eq!(config.timing.return_time_s, 30.0);
        assert_eq!(config.speed.full_speed, 1.0);
    }

    #[test]
    fn rejects_out_of_range_run_time() {
        let mut config = Config::default();
        config.timing.run_time_s = 600.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field, .. }) if field == "timing.run_time_s"
        ));
    }

    #[test]
    fn rejects_tiny_pulley() {
        let mut config = Config::default();
        config.geometry.pulley_diameter_m = 0.001;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field, .. }) if field == "geometry.pulley_diameter_m"
        ));
    }

    #[test]
    fn rejects_inverted_speed_ordering() {
        let mut config = Config::default();
        config.speed.low_speed = 0.9;
        config.speed.full_speed = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SpeedOrdering { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_channel_assignment() {
        let mut config = Config::default();
        config.channels.go = config.channels.engage;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateChannel { .. })
        ));
    }

    #[test]
    fn rejects_input_output_collision() {
        let mut config = Config::default();
        config.outputs.brake = config.channels.limit;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateChannel { .. })
        ));
    }

    #[test]
    fn rejects_debounce_threshold_of_one() {
        let mut config = Config::default();
        config.input.debounce_consecutive = 1;
        assert!(config.validate().is_err());
    }
}
