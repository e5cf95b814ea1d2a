//! Executes parsed actions against the automation surface

use tracing::{debug, info};

use super::parser::ActionCommand;
use crate::config::{pause, TimingConfig};
use crate::error::ActionError;
use crate::surface::AutomationSurface;

/// Duration of a model-requested swipe; the surface caps it anyway
const SWIPE_DURATION_MS: u64 = 300;

/// Result of an action execution
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub should_finish: bool,
    pub message: String,
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            should_finish: false,
            message: message.into(),
        }
    }

    pub fn finish(message: impl Into<String>) -> Self {
        Self {
            should_finish: true,
            message: message.into(),
        }
    }
}

/// Maps model actions onto surface calls, then waits for the screen to settle
pub struct ActionHandler {
    timing: TimingConfig,
}

impl Default for ActionHandler {
    fn default() -> Self {
        Self::new(TimingConfig::default())
    }
}

impl ActionHandler {
    pub fn new(timing: TimingConfig) -> Self {
        Self { timing }
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Execute one command. `Ok` means the dispatch was accepted; whether it
    /// had the intended effect shows up in the next capture.
    pub async fn execute(
        &self,
        surface: &AutomationSurface,
        command: &ActionCommand,
    ) -> Result<ActionResult, ActionError> {
        let screen = surface.screen();
        let device = &self.timing.device;
        debug!(action = %command, width = screen.width, height = screen.height, "executing action");

        let (accepted, settle) = match command {
            ActionCommand::Finish { message } => return Ok(ActionResult::finish(message.clone())),
            ActionCommand::Launch { app } => {
                if !surface.launch_app(app).await? {
                    return Err(ActionError::LaunchFailed(app.clone()));
                }
                (true, device.launch_delay)
            }
            ActionCommand::Tap { element } => {
                let (x, y) = element.to_pixels(screen.width, screen.height);
                (surface.tap(x, y).await?, device.tap_delay)
            }
            ActionCommand::Swipe { start, end } => {
                let (x1, y1) = start.to_pixels(screen.width, screen.height);
                let (x2, y2) = end.to_pixels(screen.width, screen.height);
                (
                    surface.swipe(x1, y1, x2, y2, SWIPE_DURATION_MS).await?,
                    device.swipe_delay,
                )
            }
            ActionCommand::LongPress { element } => {
                let (x, y) = element.to_pixels(screen.width, screen.height);
                (
                    surface.long_press(x, y, device.long_press_duration_ms).await?,
                    device.long_press_delay,
                )
            }
            ActionCommand::DoubleTap { element } => {
                let (x, y) = element.to_pixels(screen.width, screen.height);
                (surface.double_tap(x, y).await?, device.double_tap_delay)
            }
            ActionCommand::Type { text } => {
                if surface.find_editable_focus_target().await?.is_none() {
                    return Err(ActionError::InputFieldNotFound);
                }
                (surface.set_text(text).await?, device.type_delay)
            }
            ActionCommand::Back => (surface.go_back().await?, device.back_delay),
            ActionCommand::Home => (surface.go_home().await?, device.home_delay),
            ActionCommand::Wait { seconds } => {
                info!("Waiting {}s for the screen to settle", seconds);
                (true, *seconds)
            }
        };

        if !accepted {
            return Err(ActionError::Rejected(command.name().to_string()));
        }
        pause(settle).await;
        Ok(ActionResult::success(command.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::parser::GridPoint;
    use crate::error::SurfaceError;
    use crate::surface::sim::SimulatedDevice;
    use crate::surface::{Bounds, GestureSpec, GlobalAction, ViewNode};
    use std::sync::Arc;

    async fn setup() -> (Arc<SimulatedDevice>, AutomationSurface, ActionHandler) {
        let device = Arc::new(SimulatedDevice::new(1080, 2400));
        let surface = AutomationSurface::new();
        surface.connect(device.clone()).await.unwrap();
        (device, surface, ActionHandler::new(TimingConfig::immediate()))
    }

    fn point(x: u16, y: u16) -> GridPoint {
        GridPoint::new(x, y).unwrap()
    }

    #[tokio::test]
    async fn test_tap_maps_grid_to_pixels() {
        let (device, surface, handler) = setup().await;
        let result = handler
            .execute(&surface, &ActionCommand::Tap { element: point(500, 250) })
            .await
            .unwrap();
        assert!(!result.should_finish);
        assert_eq!(device.gestures(), vec![GestureSpec::Tap { x: 540, y: 600 }]);
    }

    #[tokio::test]
    async fn test_long_press_is_stationary_and_capped() {
        let (device, surface, handler) = setup().await;
        handler
            .execute(&surface, &ActionCommand::LongPress { element: point(100, 100) })
            .await
            .unwrap();
        let gesture = device.gestures()[0];
        assert!(gesture.is_stationary());
        assert!(matches!(gesture, GestureSpec::Swipe { duration_ms: 500, .. }));
    }

    #[tokio::test]
    async fn test_navigation_and_finish() {
        let (device, surface, handler) = setup().await;
        handler.execute(&surface, &ActionCommand::Back).await.unwrap();
        handler.execute(&surface, &ActionCommand::Home).await.unwrap();
        assert_eq!(
            device.global_actions(),
            vec![GlobalAction::Back, GlobalAction::Home]
        );

        let result = handler
            .execute(
                &surface,
                &ActionCommand::Finish {
                    message: "done".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(result, ActionResult::finish("done"));
    }

    #[tokio::test]
    async fn test_launch_unknown_app_fails() {
        let (device, surface, handler) = setup().await;
        let err = handler
            .execute(&surface, &ActionCommand::Launch { app: "Foo".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::LaunchFailed(app) if app == "Foo"));
        assert!(device.launched_apps().is_empty());
    }

    #[tokio::test]
    async fn test_type_requires_input_field() {
        let (device, surface, handler) = setup().await;
        let typed = ActionCommand::Type { text: "hi".into() };
        assert!(matches!(
            handler.execute(&surface, &typed).await,
            Err(ActionError::InputFieldNotFound)
        ));

        device.set_tree(Some(ViewNode::new("FrameLayout").with_child(
            ViewNode::new("android.widget.EditText")
                .with_bounds(Bounds::new(0, 0, 100, 100))
                .editable(),
        )));
        handler.execute(&surface, &typed).await.unwrap();
        assert_eq!(device.typed_text(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_rejected_gesture_and_disconnect() {
        let (device, surface, handler) = setup().await;
        device.reject_gestures(true);
        let tap = ActionCommand::Tap { element: point(1, 1) };
        assert!(matches!(
            handler.execute(&surface, &tap).await,
            Err(ActionError::Rejected(name)) if name == "Tap"
        ));

        surface.disconnect();
        assert!(matches!(
            handler.execute(&surface, &tap).await,
            Err(ActionError::Surface(SurfaceError::Disconnected))
        ));
    }
}
