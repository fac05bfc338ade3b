//! Completion handshake between the collect and remove phases.
//!
//! The collector publishes its image list as JSON next to two named pipes,
//! then writes [`COLLECT_COMPLETE`] into the collect pipe. The remover waits
//! for that marker, reads the list, removes what it can and answers with
//! [`ERASE_COMPLETE`] on the erase pipe. Anything other than the exact marker
//! is corruption and fails the node run.

use crate::error::{AgentError, Result};
use nix::errno::Errno;
use nix::sys::stat::Mode;
use prune_core::ImageRecord;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const COLLECT_COMPLETE: &str = "collect-complete";
pub const ERASE_COMPLETE: &str = "erase-complete";

const COLLECT_PIPE: &str = "collect";
const ERASE_PIPE: &str = "erase";
const IMAGES_FILE: &str = "images.json";

/// Create a named pipe at `path`. An existing pipe is reused.
pub fn create_pipe(path: &Path) -> Result<()> {
    match nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o666)) {
        Ok(()) | Err(Errno::EEXIST) => Ok(()),
        Err(e) => Err(AgentError::Io(std::io::Error::from(e))),
    }
}

/// Write `marker` to `path`. Blocks until a reader opens a pipe.
pub async fn signal(path: &Path, marker: &str, timeout: Duration) -> Result<()> {
    let path = path.to_path_buf();
    let marker = marker.to_string();
    let description = format!("signal {}", path.display());

    blocking(timeout, description, move || {
        let mut file = std::fs::OpenOptions::new().write(true).open(&path)?;
        file.write_all(marker.as_bytes())?;
        tracing::debug!("[Handshake] Wrote {} to {}", marker, path.display());
        Ok(())
    })
    .await
}

/// Read `path` to the end and require its content to be exactly `expected`
pub async fn wait_for_marker(path: &Path, expected: &str, timeout: Duration) -> Result<()> {
    let path = path.to_path_buf();
    let description = format!("wait for {} on {}", expected, path.display());

    let data = blocking(timeout, description, move || {
        let mut file = std::fs::File::open(&path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    })
    .await?;

    if data != expected.as_bytes() {
        let got = String::from_utf8_lossy(&data);
        return Err(AgentError::Corruption(format!(
            "expected {:?}, got {:?}",
            expected, got
        )));
    }
    Ok(())
}

async fn blocking<T, F>(timeout: Duration, description: String, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::time::timeout(timeout, tokio::task::spawn_blocking(op))
        .await
        .map_err(|_| AgentError::Timeout(description.clone()))?
        .map_err(|e| AgentError::Runtime(format!("{} failed: {}", description, e)))?
}

/// The pair of pipes plus image list shared by a collector and a remover
#[derive(Debug, Clone)]
pub struct Handshake {
    dir: PathBuf,
    timeout: Duration,
}

impl Handshake {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
        }
    }

    pub fn collect_pipe(&self) -> PathBuf {
        self.dir.join(COLLECT_PIPE)
    }

    pub fn erase_pipe(&self) -> PathBuf {
        self.dir.join(ERASE_PIPE)
    }

    pub fn images_file(&self) -> PathBuf {
        self.dir.join(IMAGES_FILE)
    }

    /// Create the shared directory and both pipes. Safe to call from both sides.
    pub fn prepare(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        create_pipe(&self.collect_pipe())?;
        create_pipe(&self.erase_pipe())?;
        Ok(())
    }

    /// Collector side: write the image list, then signal that it is complete
    pub async fn publish_images(&self, images: &[ImageRecord]) -> Result<()> {
        let target = self.images_file();
        let temp = self.dir.join(format!("{}.tmp", IMAGES_FILE));
        std::fs::write(&temp, serde_json::to_vec(images)?)?;
        std::fs::rename(&temp, &target)?;

        tracing::info!(
            "[Handshake] Published {} images to {}",
            images.len(),
            target.display()
        );
        signal(&self.collect_pipe(), COLLECT_COMPLETE, self.timeout).await
    }

    /// Remover side: wait for the collector, then read its image list
    pub async fn receive_images(&self) -> Result<Vec<ImageRecord>> {
        wait_for_marker(&self.collect_pipe(), COLLECT_COMPLETE, self.timeout).await?;

        let data = std::fs::read(self.images_file())?;
        let images: Vec<ImageRecord> = serde_json::from_slice(&data)
            .map_err(|e| AgentError::Corruption(format!("image list: {}", e)))?;
        tracing::info!("[Handshake] Received {} images", images.len());
        Ok(images)
    }

    /// Remover side: report that removal finished
    pub async fn finish_erase(&self) -> Result<()> {
        signal(&self.erase_pipe(), ERASE_COMPLETE, self.timeout).await
    }

    /// Collector side: wait for the remover to finish
    pub async fn await_erase(&self) -> Result<()> {
        wait_for_marker(&self.erase_pipe(), ERASE_COMPLETE, self.timeout).await
    }
}
