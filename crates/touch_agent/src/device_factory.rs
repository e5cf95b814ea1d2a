//! Selects and connects a device backend

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::TimingConfig;
use crate::error::SurfaceError;
use crate::surface::adb::{self, AdbBackend, DeviceInfo};
use crate::surface::sim::SimulatedDevice;
use crate::surface::{AutomationSurface, DeviceBackend, Screen};

/// Resolution of the simulated device
pub const SIM_SCREEN: (u32, u32) = (1080, 2400);

/// Type of device connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    #[default]
    Adb,
    /// In-memory device, for dry runs
    Simulated,
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "adb" | "android" => Ok(Self::Adb),
            "sim" | "simulated" | "simulator" => Ok(Self::Simulated),
            other => Err(format!("unknown device type: {}", other)),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Adb => "adb",
            Self::Simulated => "sim",
        })
    }
}

/// Build the backend for `device_type`
pub fn create_backend(
    device_type: DeviceType,
    device_id: Option<String>,
    timing: &TimingConfig,
) -> Arc<dyn DeviceBackend> {
    match device_type {
        DeviceType::Adb => Arc::new(AdbBackend::new(device_id).with_timing(timing.clone())),
        DeviceType::Simulated => Arc::new(SimulatedDevice::new(SIM_SCREEN.0, SIM_SCREEN.1)),
    }
}

/// Build the backend and bind it to `surface`
pub async fn connect_backend(
    surface: &AutomationSurface,
    device_type: DeviceType,
    device_id: Option<String>,
    timing: &TimingConfig,
) -> Result<Screen, SurfaceError> {
    surface
        .connect(create_backend(device_type, device_id, timing))
        .await
}

/// Devices reachable through `device_type`
pub async fn list_devices(device_type: DeviceType) -> Result<Vec<DeviceInfo>, SurfaceError> {
    match device_type {
        DeviceType::Adb => adb::list_devices().await,
        DeviceType::Simulated => Ok(vec![DeviceInfo {
            device_id: "sim-0".to_string(),
            status: "device".to_string(),
            model: Some("simulated".to_string()),
        }]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_parse() {
        assert_eq!(DeviceType::default(), DeviceType::Adb);
        assert_eq!("sim".parse::<DeviceType>(), Ok(DeviceType::Simulated));
        assert_eq!("ADB".parse::<DeviceType>(), Ok(DeviceType::Adb));
        assert!("hdc".parse::<DeviceType>().is_err());
        assert_eq!(DeviceType::Simulated.to_string(), "sim");
    }

    #[tokio::test]
    async fn test_connect_simulated() {
        let surface = AutomationSurface::new();
        let screen = connect_backend(
            &surface,
            DeviceType::Simulated,
            None,
            &TimingConfig::immediate(),
        )
        .await
        .unwrap();
        assert_eq!((screen.width, screen.height), SIM_SCREEN);
        assert!(surface.is_connected());
        assert_eq!(list_devices(DeviceType::Simulated).await.unwrap().len(), 1);
    }
}
