//! Test doubles shared by the unit tests

use async_openai::types::CreateChatCompletionRequest;
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::agent::{StepResult, TaskEvent, TaskListener};
use crate::error::ModelError;
use crate::model::ChatTransport;
use crate::policy::ErrorInfo;
use crate::surface::Screenshot;

/// Replays canned replies and records every request body it was given
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    replies: Arc<Mutex<VecDeque<Result<String, ModelError>>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Result<String, ModelError>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    /// Text items of the last user message of request `index`
    pub fn last_user_text(&self, index: usize) -> String {
        let requests = self.requests();
        let message = requests[index]["messages"]
            .as_array()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m["role"] == "user")
            .cloned()
            .unwrap();
        match &message["content"] {
            Value::String(text) => text.clone(),
            Value::Array(parts) => parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect(),
            other => panic!("unexpected content {}", other),
        }
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn complete(&self, request: &CreateChatCompletionRequest) -> Result<String, ModelError> {
        self.requests
            .lock()
            .unwrap()
            .push(serde_json::to_value(request).unwrap());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::InvalidRequest("script exhausted".into())))
    }
}

/// Collects every listener callback in order
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<TaskEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl TaskListener for RecordingListener {
    fn on_start(&self, task: &str) {
        self.events.lock().unwrap().push(TaskEvent::Started {
            task: task.to_string(),
        });
    }

    fn on_progress(&self, current: usize, total: usize, message: &str) {
        self.events.lock().unwrap().push(TaskEvent::Progress {
            current,
            total,
            message: message.to_string(),
        });
    }

    fn on_complete(&self, result: &StepResult) {
        self.events
            .lock()
            .unwrap()
            .push(TaskEvent::Completed(result.clone()));
    }

    fn on_error(&self, error: &ErrorInfo) {
        self.events.lock().unwrap().push(TaskEvent::Error(error.clone()));
    }
}

pub fn solid_screenshot(width: u32, height: u32) -> Screenshot {
    Screenshot::new(RgbaImage::from_pixel(width, height, Rgba([30, 60, 90, 255])))
}
