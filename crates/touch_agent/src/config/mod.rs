//! Configuration module for touch_agent
//!
//! This module contains:
//! - `apps`: App package mappings for `Launch`
//! - `timing`: Timing configurations for device operations
//! - `i18n`: Internationalization support
//! - `prompts`: System instruction for the model

mod apps;
mod i18n;
mod prompts;
mod timing;

pub use apps::{get_app_name, get_package_name, list_supported_apps, APP_PACKAGES};
pub use i18n::{get_message, get_messages, Language, MESSAGES_EN, MESSAGES_ZH};
pub use prompts::get_system_prompt;
pub use timing::{
    pause, ActionTimingConfig, CaptureTimingConfig, DeviceTimingConfig, TimingConfig,
    TIMING_CONFIG,
};
