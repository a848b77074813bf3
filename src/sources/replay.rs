//! Replay source for directories of encoded frames

use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

use crate::source::FrameSource;
use crate::{Result, StreamError};

const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

/// Replays the JPEG files of a directory in name order, looping forever.
///
/// Stands in for a camera when streaming recorded frames to a backend.
#[derive(Debug)]
pub struct ReplaySource {
    frames: Vec<PathBuf>,
    position: usize,
}

impl ReplaySource {
    /// Index the frames of a directory.
    ///
    /// Fails if the directory cannot be read or holds no `.jpg`/`.jpeg` file.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut entries =
            tokio::fs::read_dir(dir).await.map_err(|e| StreamError::io_error(dir.to_path_buf(), e))?;

        let mut frames = Vec::new();
        while let Some(entry) =
            entries.next_entry().await.map_err(|e| StreamError::io_error(dir.to_path_buf(), e))?
        {
            let path = entry.path();
            if is_frame_file(&path) {
                frames.push(path);
            }
        }

        if frames.is_empty() {
            return Err(StreamError::capture_source(format!(
                "no .jpg or .jpeg frames in {}",
                dir.display()
            )));
        }
        frames.sort();

        info!("Replaying {} frames from {}", frames.len(), dir.display());
        Ok(Self { frames, position: 0 })
    }

    /// Number of frames in one loop.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Restart from the first frame.
    pub fn rewind(&mut self) {
        debug!("Replay rewound");
        self.position = 0;
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| FRAME_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

#[async_trait::async_trait]
impl FrameSource for ReplaySource {
    async fn next_frame(&mut self) -> Result<Vec<u8>> {
        let path = &self.frames[self.position];
        self.position = (self.position + 1) % self.frames.len();

        trace!("Replaying {}", path.display());
        tokio::fs::read(path).await.map_err(|e| {
            StreamError::capture_source_with_source(
                format!("failed to read frame {}", path.display()),
                Box::new(e),
            )
        })
    }
}
