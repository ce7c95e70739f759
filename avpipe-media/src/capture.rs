//! On-demand capture of the last displayed picture

use crate::error::MediaResult;
use crate::frame::VideoFrame;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;

/// Destination of captured frames
pub trait CaptureHandler: Send + Debug {
    /// Store `frame` under `name`
    fn capture(&mut self, name: &str, frame: &VideoFrame) -> MediaResult<()>;
}

/// Keeps captured frames in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryCapture {
    frames: Arc<Mutex<Vec<(String, VideoFrame)>>>,
}

impl MemoryCapture {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured frames, oldest first
    pub fn frames(&self) -> Vec<(String, VideoFrame)> {
        self.frames.lock().clone()
    }

    /// Number of captured frames
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Whether nothing was captured yet
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl CaptureHandler for MemoryCapture {
    fn capture(&mut self, name: &str, frame: &VideoFrame) -> MediaResult<()> {
        self.frames.lock().push((name.to_string(), frame.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    #[test]
    fn test_clones_share_storage() {
        let store = MemoryCapture::new();
        let mut handler = store.clone();
        let frame = VideoFrame::new(2.0, 1, 1, PixelFormat::Gray8, vec![7u8]);
        handler.capture("shot-1", &frame).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.frames()[0].0, "shot-1");
    }
}
