//! touch_agent: drive a touchscreen device from a multimodal chat model
//!
//! Each cycle captures the screen, sends it with the running conversation to
//! the model, parses the single action it replies with and dispatches that
//! action to the device, until the model finishes or a limit is hit.
//!
//! - `surface`: capture, gestures and text injection behind a `DeviceBackend`
//! - `model`: the bounded multimodal conversation and its HTTP transport
//! - `actions`: the action DSL and its execution
//! - `policy`: failure classification and retry budgets
//! - `agent`: the loop itself, with listener, permission and cancellation seams
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use touch_agent::{
//!     connect_backend, AgentConfig, AgentLoop, AutomationSurface, ConversationClient,
//!     DeviceType, ModelConfig, TimingConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let surface = Arc::new(AutomationSurface::new());
//!     connect_backend(&surface, DeviceType::Adb, None, &TimingConfig::default()).await?;
//!
//!     let model_config = ModelConfig::new("http://localhost:8000/v1", "autoglm-phone-9b");
//!     let client = ConversationClient::new(model_config)?;
//!     let mut agent = AgentLoop::new(surface, client, AgentConfig::new().with_max_steps(50));
//!
//!     let result = agent.run("Open Settings and turn on Wi-Fi").await;
//!     println!("{}: {}", result.success, result.message);
//!     Ok(())
//! }
//! ```

pub mod error;

pub mod config;

pub mod surface;

pub mod actions;
pub mod agent;
pub mod device_factory;
pub mod model;
pub mod policy;
pub mod screenshot_saver;

#[cfg(test)]
mod testing;

pub use error::{
    ActionError, ActionParseError, AgentError, CaptureError, ModelError, Result, SurfaceError,
};

pub use config::{
    get_app_name, get_message, get_messages, get_package_name, get_system_prompt,
    list_supported_apps, ActionTimingConfig, CaptureTimingConfig, DeviceTimingConfig, Language,
    TimingConfig, APP_PACKAGES, MESSAGES_EN, MESSAGES_ZH, TIMING_CONFIG,
};

pub use surface::adb::{AdbBackend, DeviceInfo};
pub use surface::sim::SimulatedDevice;
pub use surface::{
    AutomationSurface, DeviceBackend, GestureSpec, GlobalAction, NodeRef, Screen, Screenshot,
    ViewNode, MAX_SWIPE_DURATION_MS,
};

pub use device_factory::{connect_backend, create_backend, list_devices, DeviceType};

pub use model::{
    parse_reply, ChatTransport, ConversationClient, HttpTransport, Message, MessageBuilder,
    ModelConfig, ModelResponse,
};

pub use actions::{parse_action, ActionCommand, ActionHandler, ActionResult, GridPoint};

pub use policy::{can_retry, should_stop_loop, ErrorInfo, ErrorKind, ErrorPolicy, Severity};

pub use agent::{
    AgentConfig, AgentLoop, AllowAll, CancelToken, ChannelListener, LoopState, NoopListener,
    PermissionProvider, StepResult, TaskEvent, TaskListener,
};

pub use screenshot_saver::ScreenshotSaver;
