//! Automation surface: screen capture, gesture dispatch and text injection
//!
//! This module provides:
//! - `DeviceBackend`: capability trait implemented per device transport
//! - `AutomationSurface`: connection-aware handle that validates and shapes gestures
//! - `adb`: backend for Android devices reached through ADB
//! - `sim`: in-memory backend for tests and dry runs
//! - `codec`: lossless PNG encoding of captured frames
//! - `view_tree`: view hierarchy and editable-field discovery

pub mod adb;
pub mod codec;
pub mod sim;
pub mod view_tree;

use async_trait::async_trait;
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

use crate::error::{CaptureError, SurfaceError};
pub use view_tree::{find_editable_focus_target, Bounds, NodeRef, ViewNode};

/// Longest swipe the OS still classifies as a swipe rather than a drag
pub const MAX_SWIPE_DURATION_MS: u64 = 500;

/// Current screen metrics and foreground app
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Screen {
    pub width: u32,
    pub height: u32,
    /// Package identifier of the foreground app
    pub package: String,
}

impl Screen {
    pub fn new(width: u32, height: u32, package: impl Into<String>) -> Self {
        Self {
            width,
            height,
            package: package.into(),
        }
    }

    /// Whether a point lies on screen; both edges are inclusive
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && i64::from(x) <= i64::from(self.width) && i64::from(y) <= i64::from(self.height)
    }
}

/// A gesture as handed to the backend. Coordinates are device pixels.
///
/// A long press has no variant of its own: it is a `Swipe` whose start and
/// end coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureSpec {
    Tap {
        x: i32,
        y: i32,
    },
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        duration_ms: u64,
    },
    DoubleTap {
        x: i32,
        y: i32,
    },
}

impl GestureSpec {
    /// True for a zero-displacement swipe, i.e. a long press
    pub fn is_stationary(&self) -> bool {
        matches!(self, Self::Swipe { x1, y1, x2, y2, .. } if x1 == x2 && y1 == y2)
    }
}

/// OS-level navigation actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalAction {
    Back,
    Home,
}

/// A decoded screen capture
#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    pub image: RgbaImage,
}

impl Screenshot {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Lossless PNG bytes of the frame
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        codec::encode_png(&self.image)
    }

    pub fn to_data_uri(&self) -> Result<String, image::ImageError> {
        codec::to_data_uri(&self.image)
    }
}

/// Capabilities a device transport must provide.
///
/// Gesture and navigation methods report whether the request was accepted,
/// not whether it took effect; callers re-observe the screen for that.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// Current screen metrics and foreground package
    async fn screen(&self) -> Result<Screen, SurfaceError>;

    /// Raw encoded frame (PNG or any format `image` can sniff)
    async fn capture(&self) -> Result<Vec<u8>, CaptureError>;

    async fn dispatch_gesture(&self, gesture: &GestureSpec) -> Result<bool, SurfaceError>;

    async fn global_action(&self, action: GlobalAction) -> Result<bool, SurfaceError>;

    /// Snapshot of the current view hierarchy, if one is available
    async fn query_tree(&self) -> Result<Option<ViewNode>, SurfaceError>;

    async fn set_node_text(&self, node: &NodeRef, text: &str) -> Result<bool, SurfaceError>;

    /// Start an app by human-readable name; `Ok(false)` if it is unknown
    async fn launch_app(&self, app_name: &str) -> Result<bool, SurfaceError>;
}

/// Connection-aware handle over a `DeviceBackend`.
///
/// Shared as `Arc<AutomationSurface>`; only one agent loop should drive it at
/// a time.
pub struct AutomationSurface {
    backend: RwLock<Option<Arc<dyn DeviceBackend>>>,
    connected: AtomicBool,
    screen: RwLock<Screen>,
    focus_target: Mutex<Option<NodeRef>>,
}

impl Default for AutomationSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl AutomationSurface {
    /// Create a disconnected surface
    pub fn new() -> Self {
        Self {
            backend: RwLock::new(None),
            connected: AtomicBool::new(false),
            screen: RwLock::new(Screen::default()),
            focus_target: Mutex::new(None),
        }
    }

    /// Bind a backend and read its initial screen metrics
    pub async fn connect(&self, backend: Arc<dyn DeviceBackend>) -> Result<Screen, SurfaceError> {
        let screen = backend.screen().await?;
        *self.backend.write().unwrap_or_else(PoisonError::into_inner) = Some(backend);
        self.on_screen_changed(screen.clone());
        self.connected.store(true, Ordering::SeqCst);
        info!(
            "Automation surface connected ({}x{}, {})",
            screen.width, screen.height, screen.package
        );
        Ok(screen)
    }

    /// Drop the backend; every later operation fails with `Disconnected`
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.backend.write().unwrap_or_else(PoisonError::into_inner) = None;
        *self.focus_target.lock().unwrap_or_else(PoisonError::into_inner) = None;
        info!("Automation surface disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn backend(&self) -> Result<Arc<dyn DeviceBackend>, SurfaceError> {
        if !self.is_connected() {
            return Err(SurfaceError::Disconnected);
        }
        self.backend
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SurfaceError::Disconnected)
    }

    /// Last known screen state
    pub fn screen(&self) -> Screen {
        self.screen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record a screen change pushed by the platform
    pub fn on_screen_changed(&self, screen: Screen) {
        *self.screen.write().unwrap_or_else(PoisonError::into_inner) = screen;
    }

    /// Pull fresh screen state from the backend
    pub async fn refresh_screen(&self) -> Result<Screen, SurfaceError> {
        let screen = self.backend()?.screen().await?;
        self.on_screen_changed(screen.clone());
        Ok(screen)
    }

    /// Capture and decode the current screen
    pub async fn capture_screen(&self) -> Result<Screenshot, CaptureError> {
        let backend = self.backend().map_err(|_| CaptureError::Disconnected)?;
        let bytes = backend.capture().await?;
        let image = codec::decode_capture(&bytes)?;
        debug!("Captured screen {}x{}", image.width(), image.height());
        Ok(Screenshot::new(image))
    }

    /// Tap at a point; `Ok(false)` without dispatch if it lies off screen
    pub async fn tap(&self, x: i32, y: i32) -> Result<bool, SurfaceError> {
        let backend = self.backend()?;
        if !self.screen().contains(x, y) {
            debug!("Rejected tap outside screen bounds at ({}, {})", x, y);
            return Ok(false);
        }
        backend.dispatch_gesture(&GestureSpec::Tap { x, y }).await
    }

    /// Swipe between two points; the dispatched duration is capped at
    /// `MAX_SWIPE_DURATION_MS`
    pub async fn swipe(
        &self,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        duration_ms: u64,
    ) -> Result<bool, SurfaceError> {
        let backend = self.backend()?;
        let screen = self.screen();
        if !screen.contains(x1, y1) || !screen.contains(x2, y2) {
            debug!(
                "Rejected swipe outside screen bounds ({}, {}) -> ({}, {})",
                x1, y1, x2, y2
            );
            return Ok(false);
        }
        let gesture = GestureSpec::Swipe {
            x1,
            y1,
            x2,
            y2,
            duration_ms: duration_ms.min(MAX_SWIPE_DURATION_MS),
        };
        backend.dispatch_gesture(&gesture).await
    }

    /// Long press, dispatched as a stationary swipe
    pub async fn long_press(&self, x: i32, y: i32, duration_ms: u64) -> Result<bool, SurfaceError> {
        self.swipe(x, y, x, y, duration_ms).await
    }

    pub async fn double_tap(&self, x: i32, y: i32) -> Result<bool, SurfaceError> {
        let backend = self.backend()?;
        if !self.screen().contains(x, y) {
            debug!("Rejected double tap outside screen bounds at ({}, {})", x, y);
            return Ok(false);
        }
        backend.dispatch_gesture(&GestureSpec::DoubleTap { x, y }).await
    }

    pub async fn go_back(&self) -> Result<bool, SurfaceError> {
        self.backend()?.global_action(GlobalAction::Back).await
    }

    pub async fn go_home(&self) -> Result<bool, SurfaceError> {
        self.backend()?.global_action(GlobalAction::Home).await
    }

    pub async fn launch_app(&self, app_name: &str) -> Result<bool, SurfaceError> {
        self.backend()?.launch_app(app_name).await
    }

    /// Locate the node that should receive text and remember it for `set_text`
    pub async fn find_editable_focus_target(&self) -> Result<Option<NodeRef>, SurfaceError> {
        let tree = self.backend()?.query_tree().await?;
        let target = tree.as_ref().and_then(find_editable_focus_target);
        *self.focus_target.lock().unwrap_or_else(PoisonError::into_inner) = target.clone();
        Ok(target)
    }

    /// Inject text into the last target found; `Ok(false)` if there is none
    pub async fn set_text(&self, text: &str) -> Result<bool, SurfaceError> {
        let backend = self.backend()?;
        let target = self
            .focus_target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match target {
            Some(node) => backend.set_node_text(&node, text).await,
            None => {
                debug!("set_text called without an input target");
                Ok(false)
            }
        }
    }
}
