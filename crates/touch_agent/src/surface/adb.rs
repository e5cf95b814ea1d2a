//! ADB (Android Debug Bridge) backend for Android devices

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::Regex;
use std::process::Output;
use std::time::Duration;
use tempfile::tempdir;
use tokio::process::Command;
use tracing::{debug, warn};

use super::view_tree::parse_hierarchy_xml;
use super::{DeviceBackend, GestureSpec, GlobalAction, NodeRef, Screen, ViewNode};
use crate::config::{get_package_name, pause, TimingConfig, TIMING_CONFIG};
use crate::error::{CaptureError, SurfaceError};

const ADB_KEYBOARD_IME: &str = "com.android.adbkeyboard/.AdbIME";
const REMOTE_SCREENSHOT: &str = "/sdcard/tmp.png";
const REMOTE_HIERARCHY: &str = "/sdcard/window_dump.xml";

lazy_static! {
    static ref WM_SIZE: Regex = Regex::new(r"(Physical|Override) size:\s*(\d+)x(\d+)").unwrap();
    static ref FOCUSED_PACKAGE: Regex = Regex::new(r"\s([A-Za-z][\w]*(?:\.[\w]+)+)/").unwrap();
}

/// Information about a device known to the ADB server
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub status: String,
    pub model: Option<String>,
}

/// List devices reported by `adb devices -l`
pub async fn list_devices() -> Result<Vec<DeviceInfo>, SurfaceError> {
    let output = tokio::time::timeout(
        Duration::from_secs(5),
        Command::new("adb").arg("devices").arg("-l").output(),
    )
    .await
    .map_err(|_| SurfaceError::Timeout("List devices timeout after 5s".to_string()))??;

    Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_device_list(stdout: &str) -> Vec<DeviceInfo> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let device_id = parts.next()?.to_string();
            let status = parts.next()?.to_string();
            let model = parts
                .find_map(|p| p.strip_prefix("model:"))
                .map(|m| m.to_string());
            Some(DeviceInfo {
                device_id,
                status,
                model,
            })
        })
        .collect()
}

fn parse_wm_size(output: &str) -> Option<(u32, u32)> {
    let mut physical = None;
    for cap in WM_SIZE.captures_iter(output) {
        let size = (cap[2].parse().ok()?, cap[3].parse().ok()?);
        if &cap[1] == "Override" {
            return Some(size);
        }
        physical = Some(size);
    }
    physical
}

fn parse_focused_package(dumpsys: &str) -> Option<String> {
    dumpsys
        .lines()
        .filter(|line| line.contains("mCurrentFocus") || line.contains("mFocusedApp"))
        .find_map(|line| FOCUSED_PACKAGE.captures(line).map(|c| c[1].to_string()))
}

fn combined_output(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

/// Device backend that shells out to the `adb` binary
#[derive(Debug, Clone)]
pub struct AdbBackend {
    device_id: Option<String>,
    timing: TimingConfig,
}

impl AdbBackend {
    pub fn new(device_id: Option<String>) -> Self {
        Self {
            device_id,
            timing: TIMING_CONFIG.clone(),
        }
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// `adb` command with the optional device specifier applied
    fn command(&self) -> Command {
        let mut cmd = Command::new("adb");
        if let Some(id) = &self.device_id {
            cmd.arg("-s").arg(id);
        }
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<Output, SurfaceError> {
        let mut cmd = self.command();
        cmd.args(args);
        let timeout = self.timing.capture.command_timeout;
        tokio::time::timeout(Duration::from_secs_f64(timeout), cmd.output())
            .await
            .map_err(|_| SurfaceError::Timeout(format!("adb {} after {}s", args.join(" "), timeout)))?
            .map_err(SurfaceError::Io)
    }

    async fn shell(&self, args: &[&str]) -> Result<Output, SurfaceError> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        self.run(&full).await
    }

    async fn tap_once(&self, x: i32, y: i32) -> Result<bool, SurfaceError> {
        let output = self
            .shell(&["input", "tap", &x.to_string(), &y.to_string()])
            .await?;
        Ok(output.status.success())
    }

    /// Switch to ADB Keyboard if needed, returning the IME to restore
    async fn detect_and_set_adb_keyboard(&self) -> Result<String, SurfaceError> {
        let output = self
            .shell(&["settings", "get", "secure", "default_input_method"])
            .await?;
        let current_ime = combined_output(&output).trim().to_string();

        if !current_ime.contains(ADB_KEYBOARD_IME) {
            self.shell(&["ime", "set", ADB_KEYBOARD_IME]).await?;
        }

        // Warm up the keyboard
        self.broadcast_text("").await?;
        Ok(current_ime)
    }

    async fn broadcast_text(&self, text: &str) -> Result<bool, SurfaceError> {
        let encoded = general_purpose::STANDARD.encode(text.as_bytes());
        let output = self
            .shell(&["am", "broadcast", "-a", "ADB_INPUT_B64", "--es", "msg", &encoded])
            .await?;
        Ok(output.status.success())
    }

    async fn clear_text(&self) -> Result<(), SurfaceError> {
        self.shell(&["am", "broadcast", "-a", "ADB_CLEAR_TEXT"]).await?;
        Ok(())
    }

    async fn restore_keyboard(&self, ime: &str) -> Result<(), SurfaceError> {
        if !ime.is_empty() && !ime.contains(ADB_KEYBOARD_IME) {
            self.shell(&["ime", "set", ime]).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceBackend for AdbBackend {
    async fn screen(&self) -> Result<Screen, SurfaceError> {
        let size = combined_output(&self.shell(&["wm", "size"]).await?);
        let (width, height) = parse_wm_size(&size)
            .ok_or_else(|| SurfaceError::Parse(format!("unexpected wm size output: {}", size.trim())))?;

        let window = self.shell(&["dumpsys", "window"]).await?;
        let package = parse_focused_package(&String::from_utf8_lossy(&window.stdout))
            .unwrap_or_default();

        Ok(Screen::new(width, height, package))
    }

    async fn capture(&self) -> Result<Vec<u8>, CaptureError> {
        let unavailable = |e: SurfaceError| CaptureError::ServiceUnavailable(e.to_string());

        let temp_dir = tempdir().map_err(|e| CaptureError::ServiceUnavailable(e.to_string()))?;
        let local_path = temp_dir.path().join("screenshot.png");

        let output = self
            .shell(&["screencap", "-p", REMOTE_SCREENSHOT])
            .await
            .map_err(unavailable)?;
        let combined = combined_output(&output);
        debug!("screencap output: {}", combined);

        // Secure windows make screencap report a failure instead of a frame
        if combined.contains("Status: -1") || combined.contains("Failed") {
            return Err(CaptureError::Denied(combined.trim().to_string()));
        }

        let local = local_path.to_string_lossy().to_string();
        let pull = self
            .run(&["pull", REMOTE_SCREENSHOT, &local])
            .await
            .map_err(unavailable)?;
        if !pull.status.success() {
            return Err(CaptureError::ServiceUnavailable(format!(
                "adb pull failed: {}",
                combined_output(&pull).trim()
            )));
        }

        let bytes = tokio::fs::read(&local_path)
            .await
            .map_err(|e| CaptureError::ServiceUnavailable(e.to_string()))?;
        debug!("Screenshot file size: {} bytes", bytes.len());

        // Cleanup is automatic when temp_dir goes out of scope
        Ok(bytes)
    }

    async fn dispatch_gesture(&self, gesture: &GestureSpec) -> Result<bool, SurfaceError> {
        match *gesture {
            GestureSpec::Tap { x, y } => self.tap_once(x, y).await,
            GestureSpec::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            } => {
                let output = self
                    .shell(&[
                        "input",
                        "swipe",
                        &x1.to_string(),
                        &y1.to_string(),
                        &x2.to_string(),
                        &y2.to_string(),
                        &duration_ms.to_string(),
                    ])
                    .await?;
                Ok(output.status.success())
            }
            GestureSpec::DoubleTap { x, y } => {
                if !self.tap_once(x, y).await? {
                    return Ok(false);
                }
                pause(self.timing.device.double_tap_interval).await;
                self.tap_once(x, y).await
            }
        }
    }

    async fn global_action(&self, action: GlobalAction) -> Result<bool, SurfaceError> {
        let keycode = match action {
            GlobalAction::Back => "4",
            GlobalAction::Home => "KEYCODE_HOME",
        };
        let output = self.shell(&["input", "keyevent", keycode]).await?;
        Ok(output.status.success())
    }

    async fn query_tree(&self) -> Result<Option<ViewNode>, SurfaceError> {
        let dump = self.shell(&["uiautomator", "dump", REMOTE_HIERARCHY]).await?;
        if !dump.status.success() {
            warn!("uiautomator dump failed: {}", combined_output(&dump).trim());
            return Ok(None);
        }
        let xml = self.shell(&["cat", REMOTE_HIERARCHY]).await?;
        parse_hierarchy_xml(&String::from_utf8_lossy(&xml.stdout))
    }

    async fn set_node_text(&self, node: &NodeRef, text: &str) -> Result<bool, SurfaceError> {
        if !node.focused {
            let (x, y) = node.bounds.center();
            if !self.tap_once(x, y).await? {
                return Ok(false);
            }
            pause(self.timing.device.tap_delay).await;
        }

        let original_ime = self.detect_and_set_adb_keyboard().await?;
        pause(self.timing.action.keyboard_switch_delay).await;

        self.clear_text().await?;
        pause(self.timing.action.text_clear_delay).await;

        let accepted = self.broadcast_text(text).await?;
        pause(self.timing.action.text_input_delay).await;

        self.restore_keyboard(&original_ime).await?;
        pause(self.timing.action.keyboard_restore_delay).await;

        Ok(accepted)
    }

    async fn launch_app(&self, app_name: &str) -> Result<bool, SurfaceError> {
        let package = match get_package_name(app_name) {
            Some(pkg) => pkg,
            None => return Ok(false),
        };
        let output = self
            .shell(&[
                "monkey",
                "-p",
                package,
                "-c",
                "android.intent.category.LAUNCHER",
                "1",
            ])
            .await?;
        let combined = combined_output(&output);
        Ok(output.status.success() && !combined.contains("No activities found"))
    }
}
