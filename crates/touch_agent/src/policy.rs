//! Error classification: severity, user-facing text and retry budget
//!
//! Every failure from the surface, the model client or the action layer is
//! turned into an [`ErrorInfo`]. Fatal errors end the loop. Recoverable ones
//! are fed back to the model as the next user turn until the same kind has
//! repeated past its budget. Warnings are only logged.

use serde::Serialize;
use std::fmt;
use tracing::warn;

use crate::config::{get_message, Language};
use crate::error::{ActionError, ActionParseError, CaptureError, ModelError, SurfaceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    ScreenshotFailed,
    ApiCallFailed,
    ActionExecutionFailed,
    ServiceDisconnected,
    MaxStepsReached,
    NetworkTimeout,
    PermissionDenied,
    AppLaunchFailed,
    InputFieldNotFound,
    ActionParseFailed,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Fatal,
    Recoverable,
    Warning,
}

/// A classified failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub severity: Severity,
    /// Short actionable sentence for the human
    pub user_message: String,
    /// Underlying error text, for logs
    pub technical_message: String,
    pub retryable: bool,
    pub max_retries: u32,
}

impl ErrorInfo {
    pub fn should_stop_loop(&self) -> bool {
        self.severity == Severity::Fatal
    }

    pub fn can_retry(&self, attempts_so_far: u32) -> bool {
        self.retryable && attempts_so_far < self.max_retries
    }

    /// Whether a Recoverable failure preceded by `consecutive` failures of the
    /// same kind still goes back to the model. Non-retryable kinds get one round.
    pub fn can_feed_back(&self, consecutive: u32) -> bool {
        if self.retryable {
            self.can_retry(consecutive)
        } else {
            consecutive == 0
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.user_message)
    }
}

pub fn should_stop_loop(info: &ErrorInfo) -> bool {
    info.should_stop_loop()
}

pub fn can_retry(info: &ErrorInfo, attempts_so_far: u32) -> bool {
    info.can_retry(attempts_so_far)
}

/// Known substrings of model-call failures and the phrase and budget they map to
const API_PHRASES: &[(&str, &str, ErrorKind, u32)] = &[
    ("401", "err_api_unauthorized", ErrorKind::ApiCallFailed, 0),
    ("unauthorized", "err_api_unauthorized", ErrorKind::ApiCallFailed, 0),
    ("429", "err_api_rate_limited", ErrorKind::ApiCallFailed, 1),
    ("rate limit", "err_api_rate_limited", ErrorKind::ApiCallFailed, 1),
    ("timed out", "err_api_timeout", ErrorKind::NetworkTimeout, 1),
    ("timeout", "err_api_timeout", ErrorKind::NetworkTimeout, 1),
    ("malformed", "err_api_malformed", ErrorKind::ApiCallFailed, 1),
    ("connection", "err_api_network", ErrorKind::ApiCallFailed, 1),
    ("network", "err_api_network", ErrorKind::ApiCallFailed, 1),
    ("dns", "err_api_network", ErrorKind::ApiCallFailed, 1),
];

/// Language-aware classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorPolicy {
    lang: Language,
}

impl ErrorPolicy {
    pub fn new(lang: Language) -> Self {
        Self { lang }
    }

    pub fn lang(&self) -> Language {
        self.lang
    }

    fn info(
        &self,
        kind: ErrorKind,
        severity: Severity,
        message_key: &str,
        technical: impl Into<String>,
        max_retries: u32,
    ) -> ErrorInfo {
        ErrorInfo {
            kind,
            severity,
            user_message: get_message(message_key, self.lang).to_string(),
            technical_message: technical.into(),
            retryable: max_retries > 0,
            max_retries,
        }
    }

    pub fn classify_capture(&self, err: &CaptureError) -> ErrorInfo {
        let technical = err.to_string();
        match err {
            CaptureError::Disconnected => self.service_disconnected(),
            CaptureError::IntervalTooShort => self.info(
                ErrorKind::ScreenshotFailed,
                Severity::Fatal,
                "err_screenshot_interval",
                technical,
                2,
            ),
            CaptureError::VersionUnsupported => self.info(
                ErrorKind::ScreenshotFailed,
                Severity::Fatal,
                "err_screenshot_unsupported",
                technical,
                0,
            ),
            CaptureError::Decode(_) => self.info(
                ErrorKind::ScreenshotFailed,
                Severity::Fatal,
                "err_screenshot_decode",
                technical,
                0,
            ),
            CaptureError::ServiceUnavailable(_) | CaptureError::Denied(_) => self.info(
                ErrorKind::ScreenshotFailed,
                Severity::Fatal,
                "err_screenshot_failed",
                technical,
                0,
            ),
        }
    }

    pub fn classify_api(&self, err: &ModelError) -> ErrorInfo {
        let technical = err.to_string();
        match err {
            ModelError::Http { status: 401, .. } => {
                self.info(ErrorKind::ApiCallFailed, Severity::Fatal, "err_api_unauthorized", technical, 0)
            }
            ModelError::Http { status: 429, .. } => {
                self.info(ErrorKind::ApiCallFailed, Severity::Fatal, "err_api_rate_limited", technical, 1)
            }
            ModelError::Http { status, .. } if *status >= 500 => {
                self.info(ErrorKind::ApiCallFailed, Severity::Fatal, "err_api_server", technical, 1)
            }
            ModelError::Http { .. } | ModelError::InvalidRequest(_) => {
                self.info(ErrorKind::ApiCallFailed, Severity::Fatal, "err_api_failed", technical, 0)
            }
            ModelError::Timeout(_) => {
                self.info(ErrorKind::NetworkTimeout, Severity::Fatal, "err_api_timeout", technical, 1)
            }
            ModelError::MalformedResponse(_) => {
                self.info(ErrorKind::ApiCallFailed, Severity::Fatal, "err_api_malformed", technical, 1)
            }
            ModelError::Network(message) => self.classify_api_message(message),
        }
    }

    /// Classify a free-form model-call failure by the substrings it contains
    pub fn classify_api_message(&self, message: &str) -> ErrorInfo {
        let lower = message.to_lowercase();
        let (key, kind, retries) = API_PHRASES
            .iter()
            .find(|(needle, ..)| lower.contains(needle))
            .map(|(_, key, kind, retries)| (*key, *kind, *retries))
            .unwrap_or(("err_api_network", ErrorKind::ApiCallFailed, 1));
        self.info(kind, Severity::Fatal, key, message, retries)
    }

    /// Dispatch failures are recoverable; a disconnected surface is not
    pub fn classify_action(&self, err: &ActionError) -> ErrorInfo {
        let technical = err.to_string();
        match err {
            ActionError::Surface(surface) => self.classify_surface(surface),
            ActionError::LaunchFailed(_) => self.info(
                ErrorKind::AppLaunchFailed,
                Severity::Recoverable,
                "err_app_launch_failed",
                technical,
                0,
            ),
            ActionError::InputFieldNotFound => self.input_field_not_found(),
            ActionError::Rejected(_) => self.info(
                ErrorKind::ActionExecutionFailed,
                Severity::Recoverable,
                "err_action_failed",
                technical,
                2,
            ),
        }
    }

    pub fn classify_surface(&self, err: &SurfaceError) -> ErrorInfo {
        match err {
            SurfaceError::Disconnected => self.service_disconnected(),
            other => self.info(
                ErrorKind::ActionExecutionFailed,
                Severity::Recoverable,
                "err_action_failed",
                other.to_string(),
                2,
            ),
        }
    }

    pub fn service_disconnected(&self) -> ErrorInfo {
        self.info(
            ErrorKind::ServiceDisconnected,
            Severity::Fatal,
            "err_service_disconnected",
            "automation surface is disconnected",
            0,
        )
    }

    pub fn max_steps_reached(&self, max_steps: usize) -> ErrorInfo {
        self.info(
            ErrorKind::MaxStepsReached,
            Severity::Fatal,
            "err_max_steps",
            format!("reached the limit of {} steps", max_steps),
            0,
        )
    }

    pub fn input_field_not_found(&self) -> ErrorInfo {
        self.info(
            ErrorKind::InputFieldNotFound,
            Severity::Recoverable,
            "err_input_field_not_found",
            ActionError::InputFieldNotFound.to_string(),
            2,
        )
    }

    pub fn action_parse_failed(&self, err: &ActionParseError) -> ErrorInfo {
        self.info(
            ErrorKind::ActionParseFailed,
            Severity::Recoverable,
            "err_action_parse_failed",
            err.to_string(),
            2,
        )
    }

    pub fn permission_denied(&self, detail: impl Into<String>) -> ErrorInfo {
        self.info(
            ErrorKind::PermissionDenied,
            Severity::Fatal,
            "err_permission_denied",
            detail,
            0,
        )
    }

    /// A non-blocking problem; logged here and never surfaced
    pub fn warning(&self, kind: ErrorKind, technical: impl Into<String>) -> ErrorInfo {
        let info = self.info(kind, Severity::Warning, "err_unknown", technical, 0);
        warn!(kind = %info.kind, "{}", info.technical_message);
        info
    }

    pub fn unknown(&self, technical: impl Into<String>) -> ErrorInfo {
        self.info(ErrorKind::Unknown, Severity::Fatal, "err_unknown", technical, 0)
    }

    /// Correction text injected as the next user turn after a recoverable failure
    pub fn feedback_for_model(&self, info: &ErrorInfo) -> String {
        let hint_key = match info.kind {
            ErrorKind::ActionExecutionFailed => "hint_action_failed",
            ErrorKind::AppLaunchFailed => "hint_app_launch_failed",
            ErrorKind::InputFieldNotFound => "hint_input_field_not_found",
            ErrorKind::ActionParseFailed => "hint_action_parse_failed",
            _ => "hint_default",
        };
        format!(
            "{}: {} {}",
            get_message("feedback_failed", self.lang),
            info.user_message,
            get_message(hint_key, self.lang)
        )
    }
}
