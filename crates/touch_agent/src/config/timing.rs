//! Timing configuration for device operations

use lazy_static::lazy_static;
use std::env;
use std::time::Duration;

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Action timing configuration for text input operations
#[derive(Debug, Clone, PartialEq)]
pub struct ActionTimingConfig {
    pub keyboard_switch_delay: f64,
    pub text_clear_delay: f64,
    pub text_input_delay: f64,
    pub keyboard_restore_delay: f64,
}

impl Default for ActionTimingConfig {
    fn default() -> Self {
        Self {
            keyboard_switch_delay: env_f64("TOUCH_AGENT_KEYBOARD_SWITCH_DELAY", 1.0),
            text_clear_delay: env_f64("TOUCH_AGENT_TEXT_CLEAR_DELAY", 1.0),
            text_input_delay: env_f64("TOUCH_AGENT_TEXT_INPUT_DELAY", 1.0),
            keyboard_restore_delay: env_f64("TOUCH_AGENT_KEYBOARD_RESTORE_DELAY", 1.0),
        }
    }
}

/// Device timing configuration: settle delays after each dispatched action
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTimingConfig {
    pub tap_delay: f64,
    pub double_tap_delay: f64,
    pub double_tap_interval: f64,
    pub long_press_delay: f64,
    /// Requested hold time for `Long Press`; the surface caps the dispatched duration
    pub long_press_duration_ms: u64,
    pub swipe_delay: f64,
    pub back_delay: f64,
    pub home_delay: f64,
    pub launch_delay: f64,
    pub type_delay: f64,
}

impl Default for DeviceTimingConfig {
    fn default() -> Self {
        Self {
            tap_delay: env_f64("TOUCH_AGENT_TAP_DELAY", 1.0),
            double_tap_delay: env_f64("TOUCH_AGENT_DOUBLE_TAP_DELAY", 1.0),
            double_tap_interval: env_f64("TOUCH_AGENT_DOUBLE_TAP_INTERVAL", 0.1),
            long_press_delay: env_f64("TOUCH_AGENT_LONG_PRESS_DELAY", 1.0),
            long_press_duration_ms: env_f64("TOUCH_AGENT_LONG_PRESS_DURATION_MS", 3000.0) as u64,
            swipe_delay: env_f64("TOUCH_AGENT_SWIPE_DELAY", 1.0),
            back_delay: env_f64("TOUCH_AGENT_BACK_DELAY", 1.0),
            home_delay: env_f64("TOUCH_AGENT_HOME_DELAY", 1.0),
            launch_delay: env_f64("TOUCH_AGENT_LAUNCH_DELAY", 1.0),
            type_delay: env_f64("TOUCH_AGENT_TYPE_DELAY", 0.5),
        }
    }
}

/// Capture timing configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureTimingConfig {
    /// Pause before re-trying a capture that failed with a retryable cause
    pub capture_retry_delay: f64,
    /// Upper bound for a single device command, in seconds
    pub command_timeout: f64,
}

impl Default for CaptureTimingConfig {
    fn default() -> Self {
        Self {
            capture_retry_delay: env_f64("TOUCH_AGENT_CAPTURE_RETRY_DELAY", 1.0),
            command_timeout: env_f64("TOUCH_AGENT_COMMAND_TIMEOUT", 10.0),
        }
    }
}

/// Master timing configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingConfig {
    pub action: ActionTimingConfig,
    pub device: DeviceTimingConfig,
    pub capture: CaptureTimingConfig,
}

impl TimingConfig {
    /// Timing with every delay set to zero, for simulated devices
    pub fn immediate() -> Self {
        Self {
            action: ActionTimingConfig {
                keyboard_switch_delay: 0.0,
                text_clear_delay: 0.0,
                text_input_delay: 0.0,
                keyboard_restore_delay: 0.0,
            },
            device: DeviceTimingConfig {
                tap_delay: 0.0,
                double_tap_delay: 0.0,
                double_tap_interval: 0.0,
                long_press_delay: 0.0,
                long_press_duration_ms: 3000,
                swipe_delay: 0.0,
                back_delay: 0.0,
                home_delay: 0.0,
                launch_delay: 0.0,
                type_delay: 0.0,
            },
            capture: CaptureTimingConfig {
                capture_retry_delay: 0.0,
                command_timeout: 10.0,
            },
        }
    }
}

/// Sleep for a delay expressed in seconds; non-positive delays return at once
pub async fn pause(seconds: f64) {
    if seconds > 0.0 {
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    }
}

lazy_static! {
    /// Global timing configuration instance
    pub static ref TIMING_CONFIG: TimingConfig = TimingConfig::default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_has_no_delays() {
        let timing = TimingConfig::immediate();
        assert_eq!(timing.device.tap_delay, 0.0);
        assert_eq!(timing.capture.capture_retry_delay, 0.0);
        assert_eq!(timing.action.text_input_delay, 0.0);
    }

    #[test]
    fn test_env_fallback() {
        assert_eq!(env_f64("TOUCH_AGENT_TEST_UNSET_VARIABLE", 2.5), 2.5);
    }
}
