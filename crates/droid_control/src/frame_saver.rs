//! Persists captured frames to timestamped session directories

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::error::Result;
use crate::frame::CapturedFrame;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S-%3f";

/// Writes frames as `frame_NNN_<timestamp>.png` under one session directory
#[derive(Debug, Clone)]
pub struct FrameSaver {
    base_dir: PathBuf,
    session_dir: PathBuf,
    frame_count: usize,
}

impl FrameSaver {
    /// Create the saver and its `yyyy-mm-dd_HH-MM-SS-mmm` session directory
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let session_dir = create_session_dir(&base_dir).await?;

        Ok(Self {
            base_dir,
            session_dir,
            frame_count: 0,
        })
    }

    pub async fn save(&mut self, frame: &CapturedFrame) -> Result<PathBuf> {
        self.frame_count += 1;
        let now: DateTime<Local> = Local::now();
        let file_path = self.session_dir.join(format!(
            "frame_{:03}_{}.png",
            self.frame_count,
            now.format(TIMESTAMP_FORMAT)
        ));

        let png = frame.encode_png()?;
        fs::write(&file_path, &png).await?;

        debug!("saved frame: {} ({} bytes)", file_path.display(), png.len());
        Ok(file_path)
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Start a fresh session directory and reset the counter
    pub async fn new_session(&mut self) -> Result<()> {
        self.session_dir = create_session_dir(&self.base_dir).await?;
        self.frame_count = 0;
        Ok(())
    }
}

async fn create_session_dir(base_dir: &Path) -> Result<PathBuf> {
    let session_name = Local::now().format(TIMESTAMP_FORMAT).to_string();
    let session_dir = base_dir.join(session_name);
    fs::create_dir_all(&session_dir).await?;
    info!("frame session directory: {}", session_dir.display());
    Ok(session_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_saver_creates_session() {
        let temp_dir = tempdir().unwrap();
        let saver = FrameSaver::new(temp_dir.path()).await.unwrap();

        assert!(saver.session_dir().exists());
        assert!(saver.session_dir().starts_with(saver.base_dir()));
        assert_eq!(saver.frame_count(), 0);
    }

    #[tokio::test]
    async fn test_save_writes_decodable_png() {
        let temp_dir = tempdir().unwrap();
        let mut saver = FrameSaver::new(temp_dir.path()).await.unwrap();
        let frame = CapturedFrame::new(RgbImage::from_pixel(3, 2, image::Rgb([9, 8, 7])));

        let first = saver.save(&frame).await.unwrap();
        let second = saver.save(&frame).await.unwrap();
        assert_eq!(saver.frame_count(), 2);

        let name = first.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("frame_001_"));
        assert!(second
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("frame_002_"));

        let decoded = image::open(&first).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (3, 2));
    }

    #[tokio::test]
    async fn test_new_session_resets_count() {
        let temp_dir = tempdir().unwrap();
        let mut saver = FrameSaver::new(temp_dir.path()).await.unwrap();
        saver
            .save(&CapturedFrame::new(RgbImage::new(1, 1)))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        saver.new_session().await.unwrap();
        assert_eq!(saver.frame_count(), 0);
        assert!(saver.session_dir().exists());
    }
}
