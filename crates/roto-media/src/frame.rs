//! Frame and batch types.

use image::RgbImage;

/// One decoded video frame.
///
/// The index is assigned at extraction and never reordered; whoever
/// holds the frame owns its pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Zero-based position in the source video
    pub index: u64,
    /// RGB pixel data
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// An ordered run of consecutive frames.
#[derive(Debug, Clone)]
pub struct FrameBatch {
    /// Index of the first frame in the batch
    pub start_index: u64,
    /// Frames in ascending index order
    pub frames: Vec<Frame>,
}

impl FrameBatch {
    pub fn new(start_index: u64, frames: Vec<Frame>) -> Self {
        Self {
            start_index,
            frames,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_dimensions() {
        let frame = Frame::new(0, RgbImage::new(64, 32));
        assert_eq!(frame.width(), 64);
        assert_eq!(frame.height(), 32);
    }

    #[test]
    fn test_batch_len() {
        let frames = (0..3).map(|i| Frame::new(i, RgbImage::new(8, 8))).collect();
        let batch = FrameBatch::new(0, frames);
        assert_eq!(batch.len(), 3);
        assert!(!batch.is_empty());
    }
}
