//! Memory-vs-disk strategy decision.
//!
//! Pure arithmetic over the probed descriptor; never touches the
//! filesystem, so the decision is cheap and testable.

use serde::{Deserialize, Serialize};

use crate::probe::VideoDescriptor;

/// Videos longer than this always take the disk path, whatever the
/// memory budget says.
pub const LARGE_VIDEO_FRAME_THRESHOLD: u64 = 1000;

/// Default memory budget: 4 GiB.
pub const DEFAULT_MEMORY_BUDGET_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// How frames travel between the decoder and the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStrategy {
    /// Raw RGB frames piped through memory
    Memory,
    /// PNG sequence spilled to scratch disk
    Disk,
}

/// Inputs to the strategy decision.
#[derive(Debug, Clone, Copy)]
pub struct ResourceBudget {
    /// Peak bytes the frame pipeline may hold in memory
    pub memory_bytes: u64,
    /// Frames held per batch
    pub batch_size: u32,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            memory_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            batch_size: 30,
        }
    }
}

/// Decide how a video should be processed.
///
/// A batch holds each frame twice (input and output copies). The disk
/// path is taken only when that footprint strictly exceeds the budget,
/// or the video is strictly longer than
/// [`LARGE_VIDEO_FRAME_THRESHOLD`]; values exactly at either limit stay
/// in memory.
pub fn decide_strategy(descriptor: &VideoDescriptor, budget: &ResourceBudget) -> ProcessingStrategy {
    let batch_footprint = descriptor
        .frame_bytes()
        .saturating_mul(budget.batch_size as u64)
        .saturating_mul(2);

    if batch_footprint > budget.memory_bytes || descriptor.frame_count > LARGE_VIDEO_FRAME_THRESHOLD
    {
        ProcessingStrategy::Disk
    } else {
        ProcessingStrategy::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(width: u32, height: u32, frame_count: u64) -> VideoDescriptor {
        VideoDescriptor {
            width,
            height,
            fps: 30.0,
            frame_count,
            duration: frame_count as f64 / 30.0,
            codec: "h264".to_string(),
        }
    }

    #[test]
    fn test_small_video_stays_in_memory() {
        let d = descriptor(640, 360, 300);
        let budget = ResourceBudget::default();
        assert_eq!(decide_strategy(&d, &budget), ProcessingStrategy::Memory);
    }

    #[test]
    fn test_large_footprint_spills_to_disk() {
        let d = descriptor(3840, 2160, 900);
        let budget = ResourceBudget {
            memory_bytes: 256 * 1024 * 1024,
            batch_size: 30,
        };
        assert_eq!(decide_strategy(&d, &budget), ProcessingStrategy::Disk);
    }

    #[test]
    fn test_footprint_exactly_at_budget_stays_in_memory() {
        let d = descriptor(100, 100, 500);
        let budget = ResourceBudget {
            memory_bytes: d.frame_bytes() * 30 * 2,
            batch_size: 30,
        };
        assert_eq!(decide_strategy(&d, &budget), ProcessingStrategy::Memory);

        let tighter = ResourceBudget {
            memory_bytes: budget.memory_bytes - 1,
            batch_size: 30,
        };
        assert_eq!(decide_strategy(&d, &tighter), ProcessingStrategy::Disk);
    }

    #[test]
    fn test_frame_count_threshold_is_exclusive() {
        let budget = ResourceBudget::default();

        let at = descriptor(64, 64, LARGE_VIDEO_FRAME_THRESHOLD);
        assert_eq!(decide_strategy(&at, &budget), ProcessingStrategy::Memory);

        let over = descriptor(64, 64, LARGE_VIDEO_FRAME_THRESHOLD + 1);
        assert_eq!(decide_strategy(&over, &budget), ProcessingStrategy::Disk);
    }

    #[test]
    fn test_long_video_spills_even_with_huge_budget() {
        let d = descriptor(64, 64, 100_000);
        let budget = ResourceBudget {
            memory_bytes: u64::MAX,
            batch_size: 30,
        };
        assert_eq!(decide_strategy(&d, &budget), ProcessingStrategy::Disk);
    }
}
