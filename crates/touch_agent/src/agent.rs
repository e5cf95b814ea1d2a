//! The perceive → decide → act loop driving a device from model output

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::actions::{parse_action, ActionCommand, ActionHandler};
use crate::config::{get_app_name, get_message, get_system_prompt, pause, Language, TimingConfig, TIMING_CONFIG};
use crate::error::SurfaceError;
use crate::model::{ConversationClient, MessageBuilder, ModelResponse};
use crate::policy::{ErrorInfo, ErrorKind, ErrorPolicy};
use crate::screenshot_saver::ScreenshotSaver;
use crate::surface::{AutomationSurface, Screenshot};

/// Configuration for the agent loop
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub lang: Language,
    pub system_prompt: Option<String>,
    /// Log the model's reasoning at info level
    pub verbose: bool,
    /// Directory to save screenshots (if set, every captured frame is written)
    pub screenshot_dir: Option<PathBuf>,
    pub timing: TimingConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            lang: Language::English,
            system_prompt: None,
            verbose: true,
            screenshot_dir: None,
            timing: TIMING_CONFIG.clone(),
        }
    }
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_lang(mut self, lang: Language) -> Self {
        self.lang = lang;
        self
    }

    /// Set custom system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = Some(dir.into());
        self
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Get the system prompt (custom or default based on language)
    pub fn get_system_prompt(&self) -> String {
        self.system_prompt
            .clone()
            .unwrap_or_else(|| get_system_prompt(self.lang))
    }
}

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Perceiving,
    Deciding,
    Acting,
    Finished,
    Aborted(ErrorKind),
    Cancelled,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Aborted(_) | Self::Cancelled)
    }
}

/// Summary of one loop run
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub success: bool,
    pub message: String,
    /// Model decisions made
    pub items_processed: usize,
    /// Step limit of the run
    pub items_total: usize,
    /// Share of decisions that were carried out without error
    pub accuracy: f64,
    pub duration_ms: u64,
    pub state: LoopState,
    pub error: Option<ErrorInfo>,
}

/// Progress notifications emitted by a running loop
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Started {
        task: String,
    },
    Thinking {
        step: usize,
        text: String,
    },
    Progress {
        current: usize,
        total: usize,
        message: String,
    },
    Completed(StepResult),
    Error(ErrorInfo),
}

/// Receives progress from the loop. The loop only emits; rendering is up to
/// the implementor.
pub trait TaskListener: Send + Sync {
    fn on_start(&self, _task: &str) {}

    /// The model's reasoning for a step
    fn on_thinking(&self, _step: usize, _thinking: &str) {}

    fn on_progress(&self, _current: usize, _total: usize, _message: &str) {}

    fn on_complete(&self, _result: &StepResult) {}

    /// Called for fatal errors only
    fn on_error(&self, _error: &ErrorInfo) {}
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl TaskListener for NoopListener {}

/// Forwards events to another task over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: TaskEvent) {
        if self.tx.send(event).is_err() {
            debug!("task event dropped: receiver closed");
        }
    }
}

impl TaskListener for ChannelListener {
    fn on_start(&self, task: &str) {
        self.emit(TaskEvent::Started {
            task: task.to_string(),
        });
    }

    fn on_thinking(&self, step: usize, thinking: &str) {
        self.emit(TaskEvent::Thinking {
            step,
            text: thinking.to_string(),
        });
    }

    fn on_progress(&self, current: usize, total: usize, message: &str) {
        self.emit(TaskEvent::Progress {
            current,
            total,
            message: message.to_string(),
        });
    }

    fn on_complete(&self, result: &StepResult) {
        self.emit(TaskEvent::Completed(result.clone()));
    }

    fn on_error(&self, error: &ErrorInfo) {
        self.emit(TaskEvent::Error(error.clone()));
    }
}

/// Gates whether a loop may start at all
pub trait PermissionProvider: Send + Sync {
    /// The privileged automation service is enabled
    fn automation_enabled(&self) -> bool;

    /// Drawing over other apps is permitted
    fn overlay_permitted(&self) -> bool;
}

/// Grants everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PermissionProvider for AllowAll {
    fn automation_enabled(&self) -> bool {
        true
    }

    fn overlay_permitted(&self) -> bool {
        true
    }
}

/// Cooperative cancellation flag, checked at every cycle boundary and before
/// every retry
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum Halt {
    Abort(ErrorInfo),
    Cancelled,
}

#[derive(Debug, Default)]
struct Tally {
    decisions: usize,
    successes: usize,
}

impl Tally {
    fn accuracy(&self) -> f64 {
        if self.decisions == 0 {
            0.0
        } else {
            self.successes as f64 / self.decisions as f64
        }
    }
}

/// Consecutive Recoverable failures of one kind
#[derive(Debug, Default)]
struct FailureStreak {
    kind: Option<ErrorKind>,
    count: u32,
}

impl FailureStreak {
    /// Record a failure and return how many of the same kind directly preceded it
    fn record(&mut self, kind: ErrorKind) -> u32 {
        if self.kind == Some(kind) {
            self.count += 1;
        } else {
            self.kind = Some(kind);
            self.count = 0;
        }
        self.count
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Drives one task at a time on an automation surface.
///
/// The conversation client is owned by the loop, so one conversation never
/// serves two loops.
pub struct AgentLoop {
    config: AgentConfig,
    surface: Arc<AutomationSurface>,
    client: ConversationClient,
    handler: ActionHandler,
    policy: ErrorPolicy,
    listener: Arc<dyn TaskListener>,
    permissions: Arc<dyn PermissionProvider>,
    cancel: CancelToken,
    screenshot_saver: Option<ScreenshotSaver>,
    state: watch::Sender<LoopState>,
}

impl AgentLoop {
    pub fn new(
        surface: Arc<AutomationSurface>,
        client: ConversationClient,
        config: AgentConfig,
    ) -> Self {
        let client = client.with_system_prompt(config.get_system_prompt());
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            handler: ActionHandler::new(config.timing.clone()),
            policy: ErrorPolicy::new(config.lang),
            config,
            surface,
            client,
            listener: Arc::new(NoopListener),
            permissions: Arc::new(AllowAll),
            cancel: CancelToken::new(),
            screenshot_saver: None,
            state,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn TaskListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionProvider>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the cancellation flag, e.g. before the next task of a session
    pub fn set_cancel_token(&mut self, cancel: CancelToken) {
        self.cancel = cancel;
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Observe state transitions from another task
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn client(&self) -> &ConversationClient {
        &self.client
    }

    pub fn surface(&self) -> &Arc<AutomationSurface> {
        &self.surface
    }

    /// Run `task` to completion, abort or cancellation
    pub async fn run(&mut self, task: &str) -> StepResult {
        let task_id = Uuid::new_v4();
        let span = info_span!("task", id = %task_id);
        self.run_task(task).instrument(span).await
    }

    async fn run_task(&mut self, task: &str) -> StepResult {
        let started = Instant::now();
        let mut tally = Tally::default();
        let max_steps = self.config.max_steps;

        self.client.reset();
        self.set_state(LoopState::Idle);
        info!("{}: {}", get_message("starting_task", self.config.lang), task);
        self.listener.on_start(task);

        if let Err(info) = self.check_permissions() {
            return self.abort(info, &tally, started);
        }
        self.prepare_saver().await;

        let mut feedback: Option<String> = None;
        let mut streak = FailureStreak::default();
        loop {
            if self.cancel.is_cancelled() {
                return self.cancelled(&tally, started);
            }
            if tally.decisions >= max_steps {
                let info = self.policy.max_steps_reached(max_steps);
                return self.abort(info, &tally, started);
            }
            let step = tally.decisions + 1;

            self.set_state(LoopState::Perceiving);
            let screenshot = match self.capture_with_retry().await {
                Ok(shot) => shot,
                Err(halt) => return self.halt(halt, &tally, started),
            };
            let current_app = match self.current_app().await {
                Ok(app) => app,
                Err(info) => return self.abort(info, &tally, started),
            };
            self.save_screenshot(&screenshot).await;

            let screen_info = MessageBuilder::build_screen_info(&current_app);
            let text = match (step, feedback.take()) {
                (1, _) => format!("{}\n\n{}", task, screen_info),
                (_, Some(feedback)) => {
                    format!("{}\n\n** Screen Info **\n\n{}", feedback, screen_info)
                }
                (_, None) => format!("** Screen Info **\n\n{}", screen_info),
            };

            self.set_state(LoopState::Deciding);
            let reply = match self.decide(&text, &screenshot).await {
                Ok(reply) => reply,
                Err(halt) => return self.halt(halt, &tally, started),
            };
            tally.decisions += 1;

            let response = ModelResponse::parse(&reply);
            if self.config.verbose {
                info!(step, "{}: {}", get_message("thinking", self.config.lang), response.thinking);
            } else {
                debug!(step, thinking = %response.thinking);
            }
            self.listener.on_thinking(step, &response.thinking);
            self.listener.on_progress(step, max_steps, &response.action);

            let command = match parse_action(&response.action) {
                Ok(command) => command,
                Err(err) => {
                    let info = self.policy.action_parse_failed(&err);
                    match self.recover(info, &mut streak, step) {
                        Ok(text) => feedback = Some(text),
                        Err(info) => return self.abort(info, &tally, started),
                    }
                    continue;
                }
            };
            info!(step, action = %command, "{}", get_message("action", self.config.lang));

            if let ActionCommand::Finish { message } = &command {
                tally.successes += 1;
                return self.finish(message.clone(), &tally, started);
            }

            self.set_state(LoopState::Acting);
            match self.handler.execute(&self.surface, &command).await {
                Ok(result) => {
                    tally.successes += 1;
                    streak.clear();
                    feedback = Some(format!(
                        "{}: {}",
                        get_message("action_succeeded", self.config.lang),
                        result.message
                    ));
                }
                Err(err) => {
                    let info = self.policy.classify_action(&err);
                    if info.should_stop_loop() {
                        return self.abort(info, &tally, started);
                    }
                    match self.recover(info, &mut streak, step) {
                        Ok(text) => feedback = Some(text),
                        Err(info) => return self.abort(info, &tally, started),
                    }
                }
            }
        }
    }

    /// Feedback for the model, or the error itself once its kind has repeated
    /// past the budget
    fn recover(
        &self,
        info: ErrorInfo,
        streak: &mut FailureStreak,
        step: usize,
    ) -> Result<String, ErrorInfo> {
        let consecutive = streak.record(info.kind);
        if !info.can_feed_back(consecutive) {
            return Err(info);
        }
        warn!(step, kind = %info.kind, consecutive, "{}", info.technical_message);
        Ok(self.policy.feedback_for_model(&info))
    }

    fn set_state(&self, state: LoopState) {
        debug!(?state, "loop state");
        self.state.send_replace(state);
    }

    fn check_permissions(&self) -> Result<(), ErrorInfo> {
        if !self.permissions.automation_enabled() {
            return Err(self
                .policy
                .permission_denied("automation service is not enabled"));
        }
        if !self.permissions.overlay_permitted() {
            return Err(self.policy.permission_denied("overlay permission not granted"));
        }
        if !self.surface.is_connected() {
            return Err(self.policy.service_disconnected());
        }
        Ok(())
    }

    async fn capture_with_retry(&self) -> Result<Screenshot, Halt> {
        let mut attempts = 0;
        loop {
            let err = match self.surface.capture_screen().await {
                Ok(shot) => return Ok(shot),
                Err(err) => err,
            };
            let info = self.policy.classify_capture(&err);
            if !info.can_retry(attempts) {
                return Err(Halt::Abort(info));
            }
            if self.cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }
            attempts += 1;
            warn!(attempt = attempts, max = info.max_retries, "retrying capture: {}", err);
            pause(self.config.timing.capture.capture_retry_delay).await;
        }
    }

    /// Send the turn; on a retryable failure re-send the same pending turn
    /// until the budget is spent
    async fn decide(&mut self, text: &str, screenshot: &Screenshot) -> Result<String, Halt> {
        let mut result = self.client.send(text, Some(screenshot)).await;
        let mut attempts = 0;
        loop {
            let err = match result {
                Ok(reply) => return Ok(reply),
                Err(err) => err,
            };
            let info = self.policy.classify_api(&err);
            if !info.can_retry(attempts) {
                return Err(Halt::Abort(info));
            }
            if self.cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }
            attempts += 1;
            warn!(
                attempt = attempts,
                max = info.max_retries,
                status = err.status(),
                "retrying model call: {}",
                err
            );
            result = self.client.retry_pending().await;
        }
    }

    async fn current_app(&self) -> Result<String, ErrorInfo> {
        let screen = match self.surface.refresh_screen().await {
            Ok(screen) => screen,
            Err(SurfaceError::Disconnected) => return Err(self.policy.service_disconnected()),
            Err(err) => {
                self.policy
                    .warning(ErrorKind::Unknown, format!("screen refresh failed: {}", err));
                self.surface.screen()
            }
        };
        Ok(get_app_name(&screen.package)
            .map(str::to_string)
            .unwrap_or(screen.package))
    }

    async fn prepare_saver(&mut self) {
        if let Some(saver) = self.screenshot_saver.as_mut() {
            if let Err(e) = saver.new_session().await {
                self.policy.warning(
                    ErrorKind::ScreenshotFailed,
                    format!("failed to create screenshot session: {}", e),
                );
            }
            return;
        }
        if let Some(dir) = &self.config.screenshot_dir {
            match ScreenshotSaver::new(dir).await {
                Ok(saver) => self.screenshot_saver = Some(saver),
                Err(e) => {
                    self.policy.warning(
                        ErrorKind::ScreenshotFailed,
                        format!("failed to create screenshot directory: {}", e),
                    );
                }
            }
        }
    }

    async fn save_screenshot(&mut self, screenshot: &Screenshot) {
        if let Some(saver) = self.screenshot_saver.as_mut() {
            if let Err(e) = saver.save(screenshot).await {
                self.policy.warning(
                    ErrorKind::ScreenshotFailed,
                    format!("failed to save screenshot: {}", e),
                );
            }
        }
    }

    fn summary(
        &self,
        success: bool,
        message: String,
        error: Option<ErrorInfo>,
        tally: &Tally,
        started: Instant,
    ) -> StepResult {
        StepResult {
            success,
            message,
            items_processed: tally.decisions,
            items_total: self.config.max_steps,
            accuracy: tally.accuracy(),
            duration_ms: started.elapsed().as_millis() as u64,
            state: self.state(),
            error,
        }
    }

    fn finish(&self, message: String, tally: &Tally, started: Instant) -> StepResult {
        self.set_state(LoopState::Finished);
        info!(steps = tally.decisions, "{}: {}", get_message("task_completed", self.config.lang), message);
        let result = self.summary(true, message, None, tally, started);
        self.listener.on_complete(&result);
        result
    }

    fn abort(&self, info: ErrorInfo, tally: &Tally, started: Instant) -> StepResult {
        self.set_state(LoopState::Aborted(info.kind));
        error!(kind = %info.kind, steps = tally.decisions, "{}", info.technical_message);
        self.listener.on_error(&info);
        let result = self.summary(false, info.user_message.clone(), Some(info), tally, started);
        self.listener.on_complete(&result);
        result
    }

    fn cancelled(&self, tally: &Tally, started: Instant) -> StepResult {
        self.set_state(LoopState::Cancelled);
        let message = get_message("task_cancelled", self.config.lang).to_string();
        info!(steps = tally.decisions, "{}", message);
        let result = self.summary(false, message, None, tally, started);
        self.listener.on_complete(&result);
        result
    }

    fn halt(&self, halt: Halt, tally: &Tally, started: Instant) -> StepResult {
        match halt {
            Halt::Abort(info) => self.abort(info, tally, started),
            Halt::Cancelled => self.cancelled(tally, started),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CaptureError, ModelError};
    use crate::model::ModelConfig;
    use crate::surface::sim::SimulatedDevice;
    use crate::surface::GlobalAction;
    use crate::testing::{RecordingListener, ScriptedTransport};
    use tempfile::tempdir;

    const FINISH: &str = "<think>ok</think><answer>finish(message=\"done\")</answer>";
    const BACK: &str = "<think>go back</think><answer>do(action=\"Back\")</answer>";
    const GARBLED: &str = "I am not sure what to do";
    const LAUNCH_FOO: &str = "<answer>do(action=\"Launch\", app=\"Foo\")</answer>";

    struct Harness {
        device: Arc<SimulatedDevice>,
        transport: ScriptedTransport,
        listener: Arc<RecordingListener>,
        agent: AgentLoop,
    }

    async fn harness(replies: Vec<Result<String, ModelError>>, max_steps: usize) -> Harness {
        let device = Arc::new(SimulatedDevice::new(1080, 2400));
        let surface = Arc::new(AutomationSurface::new());
        surface.connect(device.clone()).await.unwrap();

        let transport = ScriptedTransport::new(replies);
        let client =
            ConversationClient::with_transport(ModelConfig::default(), Box::new(transport.clone()));
        let listener = Arc::new(RecordingListener::default());
        let config = AgentConfig::new()
            .with_max_steps(max_steps)
            .with_timing(TimingConfig::immediate());
        let agent = AgentLoop::new(surface, client, config).with_listener(listener.clone());

        Harness {
            device,
            transport,
            listener,
            agent,
        }
    }

    fn ok(reply: &str) -> Result<String, ModelError> {
        Ok(reply.to_string())
    }

    fn http(status: u16) -> Result<String, ModelError> {
        Err(ModelError::Http {
            status,
            body: "upstream".into(),
        })
    }

    #[test]
    fn test_agent_config_builder() {
        let config = AgentConfig::new()
            .with_max_steps(50)
            .with_lang(Language::Chinese)
            .with_verbose(false)
            .with_system_prompt("custom");

        assert_eq!(config.max_steps, 50);
        assert_eq!(config.lang, Language::Chinese);
        assert!(!config.verbose);
        assert_eq!(config.get_system_prompt(), "custom");
        assert_eq!(AgentConfig::default().max_steps, 100);
    }

    #[tokio::test]
    async fn test_finish_reply_ends_loop() {
        let mut h = harness(vec![ok(FINISH)], 10).await;
        let result = h.agent.run("open settings").await;

        assert!(result.success);
        assert_eq!(result.message, "done");
        assert_eq!(result.state, LoopState::Finished);
        assert_eq!(result.items_processed, 1);
        assert_eq!(result.accuracy, 1.0);
        assert_eq!(h.agent.state(), LoopState::Finished);
        assert_eq!(h.transport.requests().len(), 1);
        assert!(h.device.global_actions().is_empty());

        let first = h.transport.last_user_text(0);
        assert!(first.starts_with("open settings\n\n"));
        assert!(first.contains("current_app"));

        let events = h.listener.events();
        assert_eq!(
            events.first(),
            Some(&TaskEvent::Started {
                task: "open settings".into()
            })
        );
        assert!(matches!(events.last(), Some(TaskEvent::Completed(r)) if r.success));
    }

    #[tokio::test]
    async fn test_max_steps_aborts() {
        let mut h = harness(vec![ok(BACK), ok(BACK), ok(BACK), ok(FINISH)], 3).await;
        let result = h.agent.run("loop forever").await;

        assert!(!result.success);
        assert_eq!(result.state, LoopState::Aborted(ErrorKind::MaxStepsReached));
        assert_eq!(result.items_processed, 3);
        assert_eq!(result.items_total, 3);
        assert_eq!(h.transport.requests().len(), 3);
        assert_eq!(h.device.global_actions(), vec![GlobalAction::Back; 3]);

        let events = h.listener.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, TaskEvent::Error(info) if info.kind == ErrorKind::MaxStepsReached)));
        assert!(matches!(events.last(), Some(TaskEvent::Completed(r)) if !r.success));
    }

    #[tokio::test]
    async fn test_launch_failure_is_fed_back_and_loop_continues() {
        let mut h = harness(
            vec![
                ok("<think>open it</think><answer>do(action=\"Launch\", app=\"Foo\")</answer>"),
                ok(FINISH),
            ],
            10,
        )
        .await;
        let result = h.agent.run("open Foo").await;

        assert!(result.success);
        assert_eq!(result.items_processed, 2);
        assert_eq!(result.accuracy, 0.5);
        assert_eq!(h.transport.requests().len(), 2);

        let feedback = h.transport.last_user_text(1);
        assert!(feedback.starts_with(get_message("feedback_failed", Language::English)));
        assert!(feedback.contains(get_message("hint_app_launch_failed", Language::English)));
        assert!(feedback.contains("** Screen Info **"));
        assert!(!h
            .listener
            .events()
            .iter()
            .any(|e| matches!(e, TaskEvent::Error(_))));
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_fed_back() {
        let mut h = harness(vec![ok(GARBLED), ok(FINISH)], 10).await;
        let result = h.agent.run("anything").await;

        assert!(result.success);
        let feedback = h.transport.last_user_text(1);
        assert!(feedback.contains(get_message("hint_action_parse_failed", Language::English)));
    }

    #[tokio::test]
    async fn test_successful_action_is_reported_in_next_turn() {
        let mut h = harness(vec![ok(BACK), ok(FINISH)], 10).await;
        let result = h.agent.run("go back once").await;

        assert!(result.success);
        let turn = h.transport.last_user_text(1);
        assert!(turn.starts_with("Action executed: Back\n\n** Screen Info **"));
        assert!(turn.contains("current_app"));
    }

    #[tokio::test]
    async fn test_parse_failures_within_budget_recover() {
        let mut h = harness(vec![ok(GARBLED), ok(GARBLED), ok(FINISH)], 10).await;
        let result = h.agent.run("task").await;

        assert!(result.success);
        assert_eq!(h.transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_repeated_parse_failures_exhaust_budget() {
        let replies = (0..6).map(|_| ok(GARBLED)).collect();
        let mut h = harness(replies, 6).await;
        let result = h.agent.run("task").await;

        assert!(!result.success);
        assert_eq!(result.state, LoopState::Aborted(ErrorKind::ActionParseFailed));
        assert_eq!(
            result.message,
            get_message("err_action_parse_failed", Language::English)
        );
        assert_eq!(h.transport.requests().len(), 3);
        assert!(h
            .listener
            .events()
            .iter()
            .any(|e| matches!(e, TaskEvent::Error(info) if info.kind == ErrorKind::ActionParseFailed)));
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let mut h = harness(
            vec![
                ok(GARBLED),
                ok(GARBLED),
                ok(BACK),
                ok(GARBLED),
                ok(GARBLED),
                ok(FINISH),
            ],
            10,
        )
        .await;
        let result = h.agent.run("task").await;

        assert!(result.success);
        assert_eq!(h.transport.requests().len(), 6);
    }

    #[tokio::test]
    async fn test_repeated_launch_failure_aborts() {
        let mut h = harness(vec![ok(LAUNCH_FOO), ok(LAUNCH_FOO), ok(FINISH)], 10).await;
        let result = h.agent.run("open Foo").await;

        assert_eq!(result.state, LoopState::Aborted(ErrorKind::AppLaunchFailed));
        assert_eq!(h.transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_type_without_field_asks_model_to_focus() {
        let mut h = harness(
            vec![
                ok("<answer>do(action=\"Type\", text=\"hello\")</answer>"),
                ok(FINISH),
            ],
            10,
        )
        .await;
        h.agent.run("search").await;

        let feedback = h.transport.last_user_text(1);
        assert!(feedback.contains(get_message("hint_input_field_not_found", Language::English)));
        assert!(h.device.typed_text().is_empty());
    }

    #[tokio::test]
    async fn test_capture_interval_retried_twice_then_escalates() {
        let mut h = harness(vec![ok(FINISH)], 10).await;
        h.device.fail_next_capture(CaptureError::IntervalTooShort);
        h.device.fail_next_capture(CaptureError::IntervalTooShort);
        let result = h.agent.run("task").await;
        assert!(result.success);
        assert_eq!(h.device.capture_count(), 1);

        let mut h = harness(vec![ok(FINISH)], 10).await;
        for _ in 0..3 {
            h.device.fail_next_capture(CaptureError::IntervalTooShort);
        }
        let result = h.agent.run("task").await;
        assert_eq!(result.state, LoopState::Aborted(ErrorKind::ScreenshotFailed));
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_non_retryable_capture_failure_aborts_at_once() {
        let mut h = harness(vec![ok(FINISH)], 10).await;
        h.device.fail_next_capture(CaptureError::VersionUnsupported);
        let result = h.agent.run("task").await;

        assert_eq!(result.state, LoopState::Aborted(ErrorKind::ScreenshotFailed));
        assert_eq!(
            result.message,
            get_message("err_screenshot_unsupported", Language::English)
        );
    }

    #[tokio::test]
    async fn test_api_retry_then_success() {
        let mut h = harness(vec![http(503), ok(FINISH)], 10).await;
        let result = h.agent.run("task").await;

        assert!(result.success);
        let requests = h.transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
        assert_eq!(result.items_processed, 1);
    }

    #[tokio::test]
    async fn test_api_retry_then_abort() {
        let mut h = harness(vec![http(503), http(503), ok(FINISH)], 10).await;
        let result = h.agent.run("task").await;

        assert!(!result.success);
        assert_eq!(result.state, LoopState::Aborted(ErrorKind::ApiCallFailed));
        assert_eq!(result.message, get_message("err_api_server", Language::English));
        assert_eq!(h.transport.requests().len(), 2);
        assert_eq!(result.items_processed, 0);
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let mut h = harness(vec![http(401), ok(FINISH)], 10).await;
        let result = h.agent.run("task").await;

        assert_eq!(result.state, LoopState::Aborted(ErrorKind::ApiCallFailed));
        assert_eq!(h.transport.requests().len(), 1);
        assert!(!result.message.contains("upstream"));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let mut h = harness(vec![ok(FINISH)], 10).await;
        let token = h.agent.cancel_token();
        token.cancel();
        let result = h.agent.run("task").await;

        assert_eq!(result.state, LoopState::Cancelled);
        assert!(!result.success);
        assert!(h.transport.requests().is_empty());
    }

    struct CancelOnProgress(CancelToken);

    impl TaskListener for CancelOnProgress {
        fn on_progress(&self, _current: usize, _total: usize, _message: &str) {
            self.0.cancel();
        }
    }

    #[tokio::test]
    async fn test_cancel_is_observed_at_cycle_boundary() {
        let h = harness(vec![ok(BACK), ok(FINISH)], 10).await;
        let token = CancelToken::new();
        let mut agent = h
            .agent
            .with_cancel_token(token.clone())
            .with_listener(Arc::new(CancelOnProgress(token)));
        let result = agent.run("task").await;

        assert_eq!(result.state, LoopState::Cancelled);
        assert_eq!(h.transport.requests().len(), 1);
        assert_eq!(h.device.global_actions(), vec![GlobalAction::Back]);
    }

    /// Fails every call with 503 and cancels the task while the call is in flight
    struct CancelDuringCall {
        token: CancelToken,
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl crate::model::ChatTransport for CancelDuringCall {
        async fn complete(
            &self,
            _request: &async_openai::types::CreateChatCompletionRequest,
        ) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.token.cancel();
            http(503)
        }
    }

    #[tokio::test]
    async fn test_cancelled_retry_is_not_attempted() {
        let device = Arc::new(SimulatedDevice::new(1080, 2400));
        let surface = Arc::new(AutomationSurface::new());
        surface.connect(device).await.unwrap();

        let token = CancelToken::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let transport = CancelDuringCall {
            token: token.clone(),
            calls: calls.clone(),
        };
        let client = ConversationClient::with_transport(ModelConfig::default(), Box::new(transport));
        let config = AgentConfig::new().with_timing(TimingConfig::immediate());
        let mut agent = AgentLoop::new(surface, client, config).with_cancel_token(token);

        let result = agent.run("task").await;
        assert_eq!(result.state, LoopState::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct NoOverlay;

    impl PermissionProvider for NoOverlay {
        fn automation_enabled(&self) -> bool {
            true
        }

        fn overlay_permitted(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_missing_permission_refuses_to_start() {
        let h = harness(vec![ok(FINISH)], 10).await;
        let mut agent = h.agent.with_permissions(Arc::new(NoOverlay));
        let result = agent.run("task").await;

        assert_eq!(result.state, LoopState::Aborted(ErrorKind::PermissionDenied));
        assert_eq!(h.device.capture_count(), 0);
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_disconnected_surface_aborts() {
        let mut h = harness(vec![ok(BACK), ok(FINISH)], 10).await;
        h.agent.surface().disconnect();
        let result = h.agent.run("task").await;

        assert_eq!(result.state, LoopState::Aborted(ErrorKind::ServiceDisconnected));
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_conversation_is_reset_between_runs() {
        let mut h = harness(vec![ok(FINISH), ok(FINISH)], 10).await;
        h.agent.run("first").await;
        h.agent.run("second").await;

        let requests = h.transport.requests();
        assert_eq!(requests[1]["messages"].as_array().unwrap().len(), 2);
        assert!(h.transport.last_user_text(1).starts_with("second"));
    }

    #[tokio::test]
    async fn test_frames_are_saved_when_configured() {
        let dir = tempdir().unwrap();
        let h = harness(vec![ok(BACK), ok(FINISH)], 10).await;
        let mut agent = AgentLoop {
            config: h.agent.config.clone().with_screenshot_dir(dir.path()),
            ..h.agent
        };
        agent.run("task").await;

        let session = std::fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap();
        assert_eq!(std::fs::read_dir(session.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_channel_listener_forwards_events() {
        let (listener, mut rx) = ChannelListener::new();
        let h = harness(vec![ok(FINISH)], 10).await;
        let mut agent = h.agent.with_listener(Arc::new(listener));
        agent.run("task").await;
        drop(agent);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events[0], TaskEvent::Started { .. }));
        assert!(matches!(events[1], TaskEvent::Thinking { step: 1, .. }));
        assert!(matches!(
            events[2],
            TaskEvent::Progress {
                current: 1,
                total: 10,
                ..
            }
        ));
        assert!(matches!(events[3], TaskEvent::Completed(_)));
    }
}
