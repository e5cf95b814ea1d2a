//! touchagent - drive a touchscreen device from a multimodal model
//!
//! Usage:
//!     touchagent [OPTIONS] [TASK]
//!
//! Environment Variables:
//!     TOUCH_AGENT_BASE_URL: Model API base URL (default: http://localhost:8000/v1)
//!     TOUCH_AGENT_MODEL: Model name (default: autoglm-phone-9b)
//!     TOUCH_AGENT_API_KEY: API key for model authentication (default: EMPTY)
//!     TOUCH_AGENT_MAX_STEPS: Maximum steps per task (default: 100)
//!     TOUCH_AGENT_DEVICE_ID: ADB device ID for multi-device setups
//!     TOUCH_AGENT_DEVICE_TYPE: adb or sim (default: adb)
//!     TOUCH_AGENT_LANG: en or cn (default: en)
//!     TOUCH_AGENT_SCREENSHOT_DIR: directory for captured frames
//!     RUST_LOG: log filter (default: info)

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use touch_agent::{
    connect_backend, get_message, list_devices, list_supported_apps, AgentConfig, AgentLoop,
    AutomationSurface, CancelToken, ChannelListener, ConversationClient, DeviceType, Language,
    ModelConfig, ModelError, PermissionProvider, StepResult, TaskEvent, TimingConfig,
};

/// touchagent - AI-driven touchscreen automation
#[derive(Parser, Debug)]
#[command(name = "touchagent")]
#[command(about = "Drive a touchscreen device from a multimodal model")]
#[command(after_help = r#"Examples:
    # Interactive mode against the default endpoint
    touchagent

    # Specify model endpoint and key
    touchagent --base-url http://localhost:8000/v1 --apikey sk-xxxxx

    # Run with a specific device
    touchagent --device-id emulator-5554 "Open Settings"

    # Dry run against the simulated device
    touchagent --device-type sim "Open Settings"

    # List connected devices or supported apps
    touchagent --list-devices
    touchagent --list-apps
"#)]
struct Cli {
    /// Model API base URL
    #[arg(long, env = "TOUCH_AGENT_BASE_URL", default_value = "http://localhost:8000/v1")]
    base_url: String,

    /// Model name
    #[arg(long, env = "TOUCH_AGENT_MODEL", default_value = "autoglm-phone-9b")]
    model: String,

    /// API key for model authentication
    #[arg(long, env = "TOUCH_AGENT_API_KEY", default_value = "EMPTY")]
    apikey: String,

    /// Maximum steps per task
    #[arg(long, env = "TOUCH_AGENT_MAX_STEPS", default_value = "100")]
    max_steps: usize,

    /// ADB device ID
    #[arg(short = 'd', long, env = "TOUCH_AGENT_DEVICE_ID")]
    device_id: Option<String>,

    /// Device type: adb for Android, sim for the in-memory simulator
    #[arg(long, env = "TOUCH_AGENT_DEVICE_TYPE", default_value = "adb", value_parser = ["adb", "sim"])]
    device_type: String,

    /// List connected devices and exit
    #[arg(long)]
    list_devices: bool,

    /// List supported apps and exit
    #[arg(long)]
    list_apps: bool,

    /// Suppress the model's reasoning
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Language for the system prompt and messages
    #[arg(long, env = "TOUCH_AGENT_LANG", default_value = "en", value_parser = ["cn", "en"])]
    lang: String,

    /// Directory to save screenshots (creates timestamped subdirectory per session)
    #[arg(long, env = "TOUCH_AGENT_SCREENSHOT_DIR")]
    screenshot_dir: Option<String>,

    /// Task to execute (interactive mode if not provided)
    task: Option<String>,
}

/// Permission state established by the preflight checks
struct PreflightPermissions {
    device_ready: bool,
}

impl PermissionProvider for PreflightPermissions {
    fn automation_enabled(&self) -> bool {
        self.device_ready
    }

    fn overlay_permitted(&self) -> bool {
        true
    }
}

fn print_failed(error: &str, solutions: &[&str]) {
    println!("\u{274C} FAILED");
    println!("   Error: {}", error);
    if !solutions.is_empty() {
        println!("   Solution:");
        for (i, line) in solutions.iter().enumerate() {
            println!("     {}. {}", i + 1, line);
        }
    }
}

/// Check that adb works and a device is attached
async fn check_system_requirements(device_type: DeviceType, device_id: Option<&str>) -> bool {
    if device_type == DeviceType::Simulated {
        return true;
    }

    println!("\u{1F50D} Checking system requirements...");
    println!("{}", "-".repeat(50));

    print!("1. Checking ADB installation... ");
    io::stdout().flush().ok();

    if which::which("adb").is_err() {
        print_failed(
            "ADB is not installed or not in PATH.",
            &[
                "macOS: brew install android-platform-tools",
                "Linux: sudo apt install android-tools-adb",
                "Windows: Download from https://developer.android.com/studio/releases/platform-tools",
            ],
        );
        return false;
    }

    let version = tokio::time::timeout(
        Duration::from_secs(10),
        Command::new("adb").arg("version").output(),
    )
    .await;
    match version {
        Ok(Ok(output)) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let version_line = stdout.lines().next().unwrap_or("installed");
            println!("\u{2705} OK ({})", version_line);
        }
        Ok(Ok(_)) => {
            print_failed("ADB command failed to run.", &[]);
            return false;
        }
        Ok(Err(e)) => {
            print_failed(&e.to_string(), &[]);
            return false;
        }
        Err(_) => {
            print_failed("ADB command timed out.", &[]);
            return false;
        }
    }

    print!("2. Checking connected devices... ");
    io::stdout().flush().ok();

    match list_devices(device_type).await {
        Ok(devices) => {
            let ready: Vec<&str> = devices
                .iter()
                .filter(|d| d.status == "device")
                .filter(|d| device_id.map_or(true, |id| d.device_id == id))
                .map(|d| d.device_id.as_str())
                .collect();
            if ready.is_empty() {
                print_failed(
                    "No devices connected.",
                    &[
                        "Enable USB debugging on your Android device",
                        "Connect via USB and authorize the connection",
                        "Or connect remotely: adb connect <ip>:<port>",
                    ],
                );
                return false;
            }
            let suffix = if ready.len() > 2 { "..." } else { "" };
            println!(
                "\u{2705} OK ({} device(s): {}{})",
                ready.len(),
                ready.iter().take(2).copied().collect::<Vec<_>>().join(", "),
                suffix
            );
        }
        Err(e) => {
            print_failed(&e.to_string(), &[]);
            return false;
        }
    }

    print!("3. Checking ADB Keyboard... ");
    io::stdout().flush().ok();

    match check_adb_keyboard(device_id).await {
        Ok(true) => println!("\u{2705} OK"),
        Ok(false) => {
            print_failed(
                "ADB Keyboard is not installed on the device.",
                &[
                    "Download ADB Keyboard APK from https://github.com/senzhk/ADBKeyBoard/blob/master/ADBKeyboard.apk",
                    "Install it on your device: adb install ADBKeyboard.apk",
                    "Enable it in Settings > System > Languages & Input > Virtual Keyboard",
                ],
            );
            return false;
        }
        Err(e) => {
            print_failed(&e.to_string(), &[]);
            return false;
        }
    }

    println!("{}", "-".repeat(50));
    println!("\u{2705} All system checks passed!\n");
    true
}

/// Check if ADB Keyboard is installed
async fn check_adb_keyboard(device_id: Option<&str>) -> Result<bool> {
    let mut cmd = Command::new("adb");
    if let Some(id) = device_id {
        cmd.arg("-s").arg(id);
    }
    cmd.args(["shell", "ime", "list", "-s"]);

    let output = tokio::time::timeout(Duration::from_secs(10), cmd.output())
        .await
        .map_err(|_| anyhow!("adb shell ime list timeout"))??;

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.contains("com.android.adbkeyboard/.AdbIME"))
}

/// Check if the model API is accessible
async fn check_model_api(model_config: &ModelConfig) -> bool {
    println!("\u{1F50D} Checking model API...");
    println!("{}", "-".repeat(50));

    print!("1. Checking API connectivity ({})... ", model_config.base_url);
    io::stdout().flush().ok();

    let result = match ConversationClient::new(model_config.clone()) {
        Ok(client) => client.check_connection().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            println!("\u{2705} OK");
            println!("{}", "-".repeat(50));
            println!("\u{2705} Model API checks passed!\n");
            true
        }
        Err(ModelError::Network(_)) => {
            print_failed(
                &format!("Cannot connect to {}", model_config.base_url),
                &[
                    "Check if the model server is running",
                    "Verify the base URL is correct",
                ],
            );
            false
        }
        Err(ModelError::Timeout(_)) => {
            print_failed(
                &format!("Connection to {} timed out", model_config.base_url),
                &["Check your network connection", "Verify the server is responding"],
            );
            false
        }
        Err(e) => {
            print_failed(&e.to_string(), &[]);
            false
        }
    }
}

async fn print_devices(device_type: DeviceType) -> Result<()> {
    let devices = list_devices(device_type).await?;
    if devices.is_empty() {
        println!("No devices connected.");
        return Ok(());
    }
    println!("Connected devices:");
    println!("{}", "-".repeat(60));
    for device in devices {
        let status_icon = if device.status == "device" {
            "\u{2713}"
        } else {
            "\u{2717}"
        };
        let model_info = device
            .model
            .map(|m| format!(" ({})", m))
            .unwrap_or_default();
        println!(
            "  {} {:<30} [{}]{}",
            status_icon, device.device_id, device.status, model_info
        );
    }
    Ok(())
}

fn print_supported_apps() {
    println!("Supported apps:");
    for app in list_supported_apps() {
        println!("  - {}", app);
    }
}

fn print_header(
    device_type: DeviceType,
    device_id: Option<&str>,
    model_config: &ModelConfig,
    agent_config: &AgentConfig,
) {
    println!("{}", "=".repeat(50));
    println!("touchagent - AI-driven touchscreen automation");
    println!("{}", "=".repeat(50));
    println!("Model: {}", model_config.model_name);
    println!("Base URL: {}", model_config.base_url);
    println!("Max Steps: {}", agent_config.max_steps);
    println!("Language: {:?}", agent_config.lang);
    println!("Device Type: {}", device_type.to_string().to_uppercase());
    if let Some(device_id) = device_id {
        println!("Device: {}", device_id);
    }
    if let Some(ref screenshot_dir) = agent_config.screenshot_dir {
        println!("Screenshot Dir: {}", screenshot_dir.display());
    }
    println!("{}", "=".repeat(50));
}

fn render_event(event: &TaskEvent, lang: Language, quiet: bool) {
    match event {
        TaskEvent::Started { task } => {
            println!("\n{}: {}\n", get_message("starting_task", lang), task);
        }
        TaskEvent::Thinking { text, .. } => {
            if !quiet {
                println!("{}", "=".repeat(50));
                println!("\u{1F4AD} {}:", get_message("thinking", lang));
                println!("{}", "-".repeat(50));
                println!("{}", text);
            }
        }
        TaskEvent::Progress {
            current,
            total,
            message,
        } => {
            println!(
                "\u{1F3AF} {} {}/{} {}: {}",
                get_message("step", lang),
                current,
                total,
                get_message("action", lang),
                message
            );
        }
        TaskEvent::Error(info) => {
            eprintln!("\u{274C} {}", info.user_message);
        }
        TaskEvent::Completed(result) => render_result(result, lang),
    }
}

fn render_result(result: &StepResult, lang: Language) {
    println!("\n{}", "=".repeat(50));
    let label = if result.success {
        format!("\u{2705} {}", get_message("task_completed", lang))
    } else {
        format!("\u{274C} {}", get_message("task_failed", lang))
    };
    println!("{}: {}", label, result.message);
    println!(
        "{}: {}/{} steps, {:.0}% accepted, {:.1}s",
        get_message("result", lang),
        result.items_processed,
        result.items_total,
        result.accuracy * 100.0,
        result.duration_ms as f64 / 1000.0
    );
    println!("{}\n", "=".repeat(50));
}

/// What a Ctrl-C means while a task is running
#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// First press: stop after the current step
    Cancel,
    /// Second press: leave without waiting for the step to end
    Exit,
}

fn on_interrupt(cancel: &CancelToken) -> Interrupt {
    if cancel.is_cancelled() {
        Interrupt::Exit
    } else {
        cancel.cancel();
        Interrupt::Cancel
    }
}

/// Run one task on a background task while this task renders its events.
/// Ctrl-C cancels the task cooperatively; a second Ctrl-C exits.
async fn run_task(
    mut agent: AgentLoop,
    mut events: mpsc::UnboundedReceiver<TaskEvent>,
    task: String,
    lang: Language,
    quiet: bool,
) -> Result<(AgentLoop, mpsc::UnboundedReceiver<TaskEvent>, StepResult)> {
    let cancel = CancelToken::new();
    agent.set_cancel_token(cancel.clone());

    let mut handle = tokio::spawn(async move {
        let result = agent.run(&task).await;
        (agent, result)
    });

    let (agent, result) = loop {
        tokio::select! {
            Some(event) = events.recv() => render_event(&event, lang, quiet),
            _ = tokio::signal::ctrl_c() => match on_interrupt(&cancel) {
                Interrupt::Cancel => {
                    eprintln!("\nCancelling after the current step... (Ctrl-C again to quit)");
                }
                Interrupt::Exit => {
                    eprintln!("\nInterrupted. Goodbye!");
                    std::process::exit(130);
                }
            },
            joined = &mut handle => break joined?,
        }
    };

    while let Ok(event) = events.try_recv() {
        render_event(&event, lang, quiet);
    }
    Ok((agent, events, result))
}

/// Run interactive mode
async fn run_interactive_mode(
    mut agent: AgentLoop,
    mut events: mpsc::UnboundedReceiver<TaskEvent>,
    lang: Language,
    quiet: bool,
) -> Result<()> {
    println!("\nEntering interactive mode. Type 'quit' to exit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = io::stdout();

    loop {
        print!("Enter your task: ");
        stdout.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                println!("\n\nInterrupted. Goodbye!");
                std::process::exit(130);
            }
        };
        let input = match line {
            Ok(Some(input)) => input,
            Ok(None) => {
                println!("\nGoodbye!");
                break;
            }
            Err(_) => {
                println!("\n\nInterrupted. Goodbye!");
                break;
            }
        };

        let task = input.trim();

        if task.eq_ignore_ascii_case("quit")
            || task.eq_ignore_ascii_case("exit")
            || task.eq_ignore_ascii_case("q")
        {
            println!("Goodbye!");
            break;
        }

        if task.is_empty() {
            continue;
        }

        let (returned, rx, _) = run_task(agent, events, task.to_string(), lang, quiet).await?;
        agent = returned;
        events = rx;
    }

    Ok(())
}

/// Agent settings from the command line. Reasoning reaches the terminal
/// through `TaskEvent::Thinking`, so the loop does not log it as well.
fn build_agent_config(args: &Cli, lang: Language, timing: &TimingConfig) -> AgentConfig {
    let mut agent_config = AgentConfig::new()
        .with_max_steps(args.max_steps)
        .with_lang(lang)
        .with_verbose(false)
        .with_timing(timing.clone());
    if let Some(screenshot_dir) = &args.screenshot_dir {
        agent_config = agent_config.with_screenshot_dir(screenshot_dir);
    }
    agent_config
}

fn init_logging(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(args.quiet);

    let device_type: DeviceType = args.device_type.parse().map_err(|e: String| anyhow!(e))?;

    if args.list_apps {
        print_supported_apps();
        return Ok(());
    }

    if args.list_devices {
        print_devices(device_type).await?;
        return Ok(());
    }

    let device_ready = check_system_requirements(device_type, args.device_id.as_deref()).await;
    if !device_ready {
        std::process::exit(1);
    }

    let lang = Language::from_code(&args.lang);
    let model_config = ModelConfig::new(&args.base_url, &args.model)
        .with_api_key(&args.apikey)
        .with_lang(lang);

    if !check_model_api(&model_config).await {
        std::process::exit(1);
    }

    let timing = match device_type {
        DeviceType::Adb => TimingConfig::default(),
        DeviceType::Simulated => TimingConfig::immediate(),
    };
    let agent_config = build_agent_config(&args, lang, &timing);

    print_header(
        device_type,
        args.device_id.as_deref(),
        &model_config,
        &agent_config,
    );

    let surface = Arc::new(AutomationSurface::new());
    let screen = connect_backend(&surface, device_type, args.device_id.clone(), &timing).await?;
    tracing::info!(
        device_type = %device_type,
        width = screen.width,
        height = screen.height,
        package = %screen.package,
        "Device connected"
    );

    let client = ConversationClient::new(model_config)?;
    let (listener, events) = ChannelListener::new();
    let agent = AgentLoop::new(surface.clone(), client, agent_config)
        .with_listener(Arc::new(listener))
        .with_permissions(Arc::new(PreflightPermissions { device_ready }));

    if let Some(task) = args.task {
        let (_, _, result) = run_task(agent, events, task, lang, args.quiet).await?;
        surface.disconnect();
        if !result.success {
            std::process::exit(1);
        }
    } else {
        run_interactive_mode(agent, events, lang, args.quiet).await?;
        surface.disconnect();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_interrupt_exits() {
        let cancel = CancelToken::new();
        assert_eq!(on_interrupt(&cancel), Interrupt::Cancel);
        assert!(cancel.is_cancelled());
        assert_eq!(on_interrupt(&cancel), Interrupt::Exit);
    }

    #[test]
    fn test_agent_config_leaves_reasoning_to_events() {
        let args = Cli::parse_from([
            "touchagent",
            "--max-steps",
            "7",
            "--screenshot-dir",
            "/tmp/frames",
            "open settings",
        ]);
        let config = build_agent_config(&args, Language::English, &TimingConfig::immediate());

        assert!(!config.verbose);
        assert_eq!(config.max_steps, 7);
        assert_eq!(
            config.screenshot_dir.as_deref(),
            Some(std::path::Path::new("/tmp/frames"))
        );
        assert_eq!(args.task.as_deref(), Some("open settings"));
    }
}
