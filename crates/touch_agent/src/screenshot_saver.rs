//! Persists captured frames as PNG files, one directory per session

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::error::Result;
use crate::surface::Screenshot;

fn session_name() -> String {
    let session_start: DateTime<Local> = Local::now();
    session_start.format("%Y-%m-%d_%H-%M-%S-%3f").to_string()
}

/// Manages screenshot persistence with timestamped directories and filenames
#[derive(Debug, Clone)]
pub struct ScreenshotSaver {
    base_dir: PathBuf,
    session_dir: PathBuf,
    step_count: usize,
}

impl ScreenshotSaver {
    /// Create a saver and its first session directory
    /// (`<base_dir>/yyyy-mm-dd_HH-MM-SS-mmm`)
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let session_dir = base_dir.join(session_name());
        fs::create_dir_all(&session_dir).await?;

        info!("Screenshot session directory: {}", session_dir.display());

        Ok(Self {
            base_dir,
            session_dir,
            step_count: 0,
        })
    }

    /// Write the frame losslessly as `step_NNN_<timestamp>.png`
    pub async fn save(&mut self, screenshot: &Screenshot) -> Result<PathBuf> {
        self.step_count += 1;
        let now: DateTime<Local> = Local::now();
        let filename = format!(
            "step_{:03}_{}.png",
            self.step_count,
            now.format("%Y-%m-%d_%H-%M-%S-%3f")
        );
        let file_path = self.session_dir.join(&filename);

        let png = screenshot.to_png()?;
        fs::write(&file_path, &png).await?;

        debug!("Saved screenshot: {} ({} bytes)", file_path.display(), png.len());
        Ok(file_path)
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Start a fresh session directory for the next task
    pub async fn new_session(&mut self) -> Result<()> {
        self.session_dir = self.base_dir.join(session_name());
        fs::create_dir_all(&self.session_dir).await?;
        self.step_count = 0;

        info!(
            "New screenshot session directory: {}",
            self.session_dir.display()
        );
        Ok(())
    }
}
