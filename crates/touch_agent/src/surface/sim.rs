//! In-memory device backend that records everything dispatched to it

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{codec, DeviceBackend, GestureSpec, GlobalAction, NodeRef, Screen, ViewNode};
use crate::config::get_package_name;
use crate::error::{CaptureError, SurfaceError};

#[derive(Debug, Default)]
struct SimState {
    screen: Screen,
    gestures: Vec<GestureSpec>,
    global_actions: Vec<GlobalAction>,
    launched: Vec<String>,
    typed: Vec<String>,
    tree: Option<ViewNode>,
    extra_apps: Vec<String>,
    capture_failures: VecDeque<CaptureError>,
    min_capture_interval: Option<Duration>,
    last_capture: Option<Instant>,
    captures: usize,
    reject_gestures: bool,
}

/// Simulated touchscreen device
#[derive(Debug, Default)]
pub struct SimulatedDevice {
    state: Mutex<SimState>,
}

impl SimulatedDevice {
    /// A device with the given resolution showing the launcher
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Mutex::new(SimState {
                screen: Screen::new(width, height, "com.android.launcher"),
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the view hierarchy returned by `query_tree`
    pub fn set_tree(&self, tree: Option<ViewNode>) {
        self.state().tree = tree;
    }

    /// Queue a failure for the next capture; queued failures are returned in order
    pub fn fail_next_capture(&self, err: CaptureError) {
        self.state().capture_failures.push_back(err);
    }

    /// Refuse captures that arrive sooner than `interval` after the previous one
    pub fn set_min_capture_interval(&self, interval: Duration) {
        self.state().min_capture_interval = Some(interval);
    }

    /// Make every gesture dispatch report "not accepted"
    pub fn reject_gestures(&self, reject: bool) {
        self.state().reject_gestures = reject;
    }

    /// Allow launching an app name that is not in the app table
    pub fn install_app(&self, name: impl Into<String>) {
        self.state().extra_apps.push(name.into());
    }

    pub fn gestures(&self) -> Vec<GestureSpec> {
        self.state().gestures.clone()
    }

    pub fn global_actions(&self) -> Vec<GlobalAction> {
        self.state().global_actions.clone()
    }

    pub fn launched_apps(&self) -> Vec<String> {
        self.state().launched.clone()
    }

    pub fn typed_text(&self) -> Vec<String> {
        self.state().typed.clone()
    }

    pub fn capture_count(&self) -> usize {
        self.state().captures
    }
}

#[async_trait]
impl DeviceBackend for SimulatedDevice {
    async fn screen(&self) -> Result<Screen, SurfaceError> {
        Ok(self.state().screen.clone())
    }

    async fn capture(&self) -> Result<Vec<u8>, CaptureError> {
        let (width, height, shade) = {
            let mut state = self.state();
            if let Some(err) = state.capture_failures.pop_front() {
                return Err(err);
            }
            let now = Instant::now();
            if let (Some(min), Some(last)) = (state.min_capture_interval, state.last_capture) {
                if now.duration_since(last) < min {
                    return Err(CaptureError::IntervalTooShort);
                }
            }
            state.last_capture = Some(now);
            state.captures += 1;
            (
                state.screen.width,
                state.screen.height,
                (state.captures * 40 % 256) as u8,
            )
        };

        let frame = RgbaImage::from_pixel(width, height, Rgba([shade, shade, shade, 255]));
        codec::encode_png(&frame).map_err(|e| CaptureError::Decode(e.to_string()))
    }

    async fn dispatch_gesture(&self, gesture: &GestureSpec) -> Result<bool, SurfaceError> {
        let mut state = self.state();
        if state.reject_gestures {
            return Ok(false);
        }
        state.gestures.push(*gesture);
        Ok(true)
    }

    async fn global_action(&self, action: GlobalAction) -> Result<bool, SurfaceError> {
        let mut state = self.state();
        state.global_actions.push(action);
        if action == GlobalAction::Home {
            state.screen.package = "com.android.launcher".to_string();
        }
        Ok(true)
    }

    async fn query_tree(&self) -> Result<Option<ViewNode>, SurfaceError> {
        Ok(self.state().tree.clone())
    }

    async fn set_node_text(&self, node: &NodeRef, text: &str) -> Result<bool, SurfaceError> {
        let mut state = self.state();
        let exists = state
            .tree
            .as_ref()
            .and_then(|root| root.at_path(&node.path))
            .map_or(false, |n| n.editable);
        if !exists {
            return Ok(false);
        }
        state.typed.push(text.to_string());
        Ok(true)
    }

    async fn launch_app(&self, app_name: &str) -> Result<bool, SurfaceError> {
        let mut state = self.state();
        let package = match get_package_name(app_name) {
            Some(pkg) => pkg.to_string(),
            None if state.extra_apps.iter().any(|a| a == app_name) => {
                format!("sim.{}", app_name.to_lowercase())
            }
            None => return Ok(false),
        };
        state.launched.push(app_name.to_string());
        state.screen.package = package;
        Ok(true)
    }
}
