//! Source that repeats one encoded frame

use crate::Result;
use crate::source::FrameSource;

/// Yields the same frame on every tick.
///
/// Useful for probing a backend without a camera.
#[derive(Debug, Clone)]
pub struct StaticSource {
    frame: Vec<u8>,
}

impl StaticSource {
    pub fn new(frame: impl Into<Vec<u8>>) -> Self {
        Self { frame: frame.into() }
    }
}

#[async_trait::async_trait]
impl FrameSource for StaticSource {
    async fn next_frame(&mut self) -> Result<Vec<u8>> {
        Ok(self.frame.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repeats_frame() {
        let mut source = StaticSource::new(vec![0xff, 0xd8]);
        assert_eq!(source.next_frame().await.unwrap(), vec![0xff, 0xd8]);
        assert_eq!(source.next_frame().await.unwrap(), vec![0xff, 0xd8]);
    }
}
