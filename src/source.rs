//! Frame source trait

use crate::Result;

/// A local producer of encoded camera frames.
///
/// The session controller asks for one frame per capture tick and bounds
/// the call with a timeout, so implementations may wait on hardware. A
/// transient failure skips only the current tick.
#[async_trait::async_trait]
pub trait FrameSource: Send + 'static {
    /// Acquire the next encoded frame (JPEG bytes for the default backend).
    async fn next_frame(&mut self) -> Result<Vec<u8>>;
}

#[async_trait::async_trait]
impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    async fn next_frame(&mut self) -> Result<Vec<u8>> {
        (**self).next_frame().await
    }
}
