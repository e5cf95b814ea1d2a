//! Internationalization (i18n) tables for user-facing and model-facing text

use phf::phf_map;
use serde::{Deserialize, Serialize};

/// Language options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    English,
    Chinese,
}

impl Language {
    /// Parse language from a code or name, defaulting to English
    pub fn from_code(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "cn" | "zh" | "chinese" => Self::Chinese,
            _ => Self::English,
        }
    }

    /// Get language code string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chinese => "cn",
            Self::English => "en",
        }
    }
}

/// English messages
pub static MESSAGES_EN: phf::Map<&'static str, &'static str> = phf_map! {
    "thinking" => "Thinking",
    "action" => "Action",
    "task_completed" => "Task Completed",
    "task_failed" => "Task Failed",
    "task_cancelled" => "Task cancelled",
    "done" => "Done",
    "starting_task" => "Starting task",
    "step" => "Step",
    "result" => "Result",
    "action_succeeded" => "Action executed",

    "err_screenshot_failed" => "Could not capture the screen.",
    "err_screenshot_interval" => "Screen captures are too frequent, retrying shortly.",
    "err_screenshot_unsupported" => "Screen capture is not supported on this device.",
    "err_screenshot_decode" => "The captured screen image could not be read.",
    "err_api_unauthorized" => "The model service rejected the API key. Check your credentials.",
    "err_api_rate_limited" => "The model service is rate limiting requests. Try again later.",
    "err_api_server" => "The model service is temporarily unavailable.",
    "err_api_timeout" => "The model service did not respond in time.",
    "err_api_network" => "Could not reach the model service. Check your network connection.",
    "err_api_malformed" => "The model service returned an unreadable response.",
    "err_api_failed" => "The model request failed.",
    "err_action_failed" => "The device did not accept the requested action.",
    "err_app_launch_failed" => "The requested app could not be started.",
    "err_service_disconnected" => "The automation service is not connected. Enable it and try again.",
    "err_max_steps" => "Stopped after reaching the maximum number of steps.",
    "err_permission_denied" => "Required permissions are missing. Grant them and try again.",
    "err_input_field_not_found" => "No text field is available for typing.",
    "err_action_parse_failed" => "The model reply could not be understood.",
    "err_unknown" => "An unexpected error occurred.",

    "hint_action_failed" => "Compare the coordinates with the latest screenshot and target a visible element, or use a different gesture.",
    "hint_app_launch_failed" => "Do not launch this app again. Go Home and open it from the launcher, or choose another app.",
    "hint_input_field_not_found" => "Tap an input field to focus it before using Type.",
    "hint_action_parse_failed" => "Reply with <think>...</think><answer>...</answer> containing exactly one supported action.",
    "hint_default" => "Look at the current screen and decide the next step.",
    "feedback_failed" => "The previous action failed",
};

/// Chinese messages
pub static MESSAGES_ZH: phf::Map<&'static str, &'static str> = phf_map! {
    "thinking" => "思考过程",
    "action" => "执行动作",
    "task_completed" => "任务完成",
    "task_failed" => "任务失败",
    "task_cancelled" => "任务已取消",
    "done" => "完成",
    "starting_task" => "开始执行任务",
    "step" => "步骤",
    "result" => "结果",
    "action_succeeded" => "动作已执行",

    "err_screenshot_failed" => "无法截取屏幕。",
    "err_screenshot_interval" => "截图过于频繁，稍后重试。",
    "err_screenshot_unsupported" => "当前设备不支持截图。",
    "err_screenshot_decode" => "截图图像无法解析。",
    "err_api_unauthorized" => "模型服务拒绝了 API Key，请检查凭据。",
    "err_api_rate_limited" => "模型服务请求过于频繁，请稍后再试。",
    "err_api_server" => "模型服务暂时不可用。",
    "err_api_timeout" => "模型服务响应超时。",
    "err_api_network" => "无法连接模型服务，请检查网络。",
    "err_api_malformed" => "模型服务返回了无法解析的响应。",
    "err_api_failed" => "模型请求失败。",
    "err_action_failed" => "设备未接受该操作。",
    "err_app_launch_failed" => "无法启动指定的应用。",
    "err_service_disconnected" => "自动化服务未连接，请开启后重试。",
    "err_max_steps" => "已达到最大步数，任务停止。",
    "err_permission_denied" => "缺少必要权限，请授权后重试。",
    "err_input_field_not_found" => "没有可输入文字的输入框。",
    "err_action_parse_failed" => "无法理解模型的回复。",
    "err_unknown" => "发生未知错误。",

    "hint_action_failed" => "请对照最新截图检查坐标，点击可见元素，或换一种手势。",
    "hint_app_launch_failed" => "不要再次启动该应用。请回到桌面从启动器打开，或选择其他应用。",
    "hint_input_field_not_found" => "请先点击输入框使其获得焦点，再使用 Type。",
    "hint_action_parse_failed" => "请使用 <think>...</think><answer>...</answer> 格式，并且只包含一个支持的动作。",
    "hint_default" => "请观察当前屏幕并决定下一步。",
    "feedback_failed" => "上一步操作失败",
};

/// Get UI messages dictionary by language
pub fn get_messages(lang: Language) -> &'static phf::Map<&'static str, &'static str> {
    match lang {
        Language::English => &MESSAGES_EN,
        Language::Chinese => &MESSAGES_ZH,
    }
}

/// Get a single message by key and language
/// Returns the message if found, otherwise returns the key as a fallback
pub fn get_message<'a>(key: &'a str, lang: Language) -> &'a str {
    match get_messages(lang).get(key) {
        Some(msg) => msg,
        None => key,
    }
}
