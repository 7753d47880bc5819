//! Frame extraction.
//!
//! Two paths, one interface. The memory path streams raw RGB frames
//! from an FFmpeg decode pipe; the disk path extracts a zero-padded
//! PNG sequence into scratch space first and loads it back batch by
//! batch, deleting each file once consumed.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use image::RgbImage;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};
use tracing::{debug, warn};

use crate::command::{spawn_piped, FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::estimator::ProcessingStrategy;
use crate::frame::{Frame, FrameBatch};
use crate::probe::VideoDescriptor;

/// Filename template for the disk-spill sequence. Zero padding makes
/// lexicographic order equal frame order.
pub const FRAME_FILE_TEMPLATE: &str = "frame_%08d.png";

/// A source of ordered frame batches.
pub struct FrameSource {
    descriptor: VideoDescriptor,
    batch_size: u32,
    next_index: u64,
    skipped: u64,
    total_frames: u64,
    inner: SourceInner,
}

enum SourceInner {
    Memory {
        child: Child,
        stdout: ChildStdout,
        finished: bool,
    },
    Disk {
        files: VecDeque<PathBuf>,
    },
}

impl FrameSource {
    /// Open a video for batch extraction.
    ///
    /// `descriptor` carries the target (already resized) dimensions;
    /// a scale filter brings the decoded frames to match. Disk-path
    /// extraction runs to completion here, under `scratch_dir`.
    pub async fn open(
        input: impl AsRef<Path>,
        descriptor: &VideoDescriptor,
        strategy: ProcessingStrategy,
        batch_size: u32,
        scratch_dir: &Path,
    ) -> MediaResult<Self> {
        let input = input.as_ref();
        let scale = scale_filter(descriptor);

        match strategy {
            ProcessingStrategy::Memory => {
                let cmd = FfmpegCommand::new(input, "pipe:1")
                    .no_progress()
                    .video_filter(scale)
                    .no_audio()
                    .output_args(["-f", "rawvideo", "-pix_fmt", "rgb24"]);

                let mut child = spawn_piped(&cmd, Stdio::null(), Stdio::piped())?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| MediaError::internal("decode stdout not captured"))?;

                Ok(Self {
                    descriptor: descriptor.clone(),
                    batch_size,
                    next_index: 0,
                    skipped: 0,
                    total_frames: descriptor.frame_count,
                    inner: SourceInner::Memory {
                        child,
                        stdout,
                        finished: false,
                    },
                })
            }
            ProcessingStrategy::Disk => {
                let pattern = scratch_dir.join(FRAME_FILE_TEMPLATE);
                let cmd = FfmpegCommand::new(input, &pattern)
                    .video_filter(scale)
                    .no_audio();

                FfmpegRunner::new().run(&cmd).await?;

                let files = list_frame_files(scratch_dir)?;
                if files.is_empty() {
                    return Err(MediaError::invalid_video("Extraction produced no frames"));
                }
                if files.len() as u64 != descriptor.frame_count {
                    debug!(
                        expected = descriptor.frame_count,
                        actual = files.len(),
                        "Frame count differs from probe estimate"
                    );
                }

                Ok(Self::from_frame_files(descriptor, batch_size, files))
            }
        }
    }

    /// Build a disk-backed source over an already-extracted sequence.
    fn from_frame_files(descriptor: &VideoDescriptor, batch_size: u32, files: Vec<PathBuf>) -> Self {
        Self {
            descriptor: descriptor.clone(),
            batch_size,
            next_index: 0,
            skipped: 0,
            total_frames: files.len() as u64,
            inner: SourceInner::Disk {
                files: files.into(),
            },
        }
    }

    /// Total frames this source expects to yield, before skips.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Frames dropped because their spilled file could not be read.
    pub fn skipped_frames(&self) -> u64 {
        self.skipped
    }

    /// Pull the next batch, or `None` when the video is exhausted.
    pub async fn next_batch(&mut self) -> MediaResult<Option<FrameBatch>> {
        let batch_size = self.batch_size as usize;
        let start_index = self.next_index;
        let mut frames = Vec::with_capacity(batch_size);

        match &mut self.inner {
            SourceInner::Memory {
                child,
                stdout,
                finished,
            } => {
                if *finished {
                    return Ok(None);
                }

                let frame_bytes = self.descriptor.frame_bytes() as usize;
                while frames.len() < batch_size {
                    let mut buf = vec![0u8; frame_bytes];
                    let read = read_full(stdout, &mut buf).await?;
                    if read == 0 {
                        *finished = true;
                        let status = child.wait().await?;
                        if !status.success() {
                            return Err(MediaError::ffmpeg_failed(
                                "Decode pipe exited with non-zero status",
                                None,
                                status.code(),
                            ));
                        }
                        break;
                    }
                    if read < frame_bytes {
                        return Err(MediaError::TruncatedFrame {
                            frame_index: self.next_index,
                            message: format!("got {read} of {frame_bytes} bytes"),
                        });
                    }

                    let image =
                        RgbImage::from_raw(self.descriptor.width, self.descriptor.height, buf)
                            .ok_or_else(|| MediaError::internal("frame buffer size mismatch"))?;
                    frames.push(Frame::new(self.next_index, image));
                    self.next_index += 1;
                }
            }
            SourceInner::Disk { files } => {
                while frames.len() < batch_size {
                    let Some(path) = files.pop_front() else {
                        break;
                    };

                    let loaded = tokio::task::spawn_blocking({
                        let path = path.clone();
                        move || image::open(&path).map(|img| img.to_rgb8())
                    })
                    .await
                    .map_err(|e| MediaError::internal(format!("frame load task: {e}")))?;

                    // Consumed either way; the sequence never rewinds
                    let _ = std::fs::remove_file(&path);

                    match loaded {
                        Ok(image) => {
                            frames.push(Frame::new(self.next_index, image));
                            self.next_index += 1;
                        }
                        Err(e) => {
                            warn!(
                                path = %path.display(),
                                error = %e,
                                "Skipping unreadable extracted frame"
                            );
                            self.skipped += 1;
                        }
                    }
                }
            }
        }

        if frames.is_empty() {
            Ok(None)
        } else {
            Ok(Some(FrameBatch::new(start_index, frames)))
        }
    }
}

/// Scale filter matching the (possibly resized) descriptor.
fn scale_filter(descriptor: &VideoDescriptor) -> String {
    format!("scale={}:{}", descriptor.width, descriptor.height)
}

/// List extracted frame files in playback order.
fn list_frame_files(dir: &Path) -> MediaResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.extension().map(|e| e == "png").unwrap_or(false)
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("frame_"))
                    .unwrap_or(false)
        })
        .collect();
    // Zero-padded names: lexicographic order is frame order
    files.sort();
    Ok(files)
}

/// Read until the buffer is full or the stream ends.
async fn read_full(reader: &mut ChildStdout, buf: &mut [u8]) -> MediaResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn descriptor(width: u32, height: u32) -> VideoDescriptor {
        VideoDescriptor {
            width,
            height,
            fps: 30.0,
            frame_count: 4,
            duration: 0.13,
            codec: "h264".to_string(),
        }
    }

    #[tokio::test]
    async fn test_disk_source_skips_unreadable_frame() {
        let dir = TempDir::new().unwrap();
        for i in 1u32..=4 {
            let img = RgbImage::from_pixel(8, 8, image::Rgb([(i * 10) as u8, 0, 0]));
            img.save(dir.path().join(format!("frame_{i:08}.png"))).unwrap();
        }
        // Third frame's file is garbage
        std::fs::write(dir.path().join("frame_00000003.png"), b"not a png").unwrap();

        let files = list_frame_files(dir.path()).unwrap();
        let mut source = FrameSource::from_frame_files(&descriptor(8, 8), 2, files);

        let mut indices = Vec::new();
        while let Some(batch) = source.next_batch().await.unwrap() {
            indices.extend(batch.frames.iter().map(|f| f.index));
        }

        // Indices stay contiguous; the bad frame only shrinks the count
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(source.skipped_frames(), 1);
        assert_eq!(source.total_frames(), 4);
    }

    #[test]
    fn test_list_frame_files_ordering() {
        let dir = TempDir::new().unwrap();
        for name in ["frame_00000010.png", "frame_00000002.png", "frame_00000001.png"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        // Stray files are ignored
        std::fs::write(dir.path().join("audio.wav"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let files = list_frame_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "frame_00000001.png",
                "frame_00000002.png",
                "frame_00000010.png"
            ]
        );
    }

    #[test]
    fn test_scale_filter() {
        let d = VideoDescriptor {
            width: 960,
            height: 540,
            fps: 30.0,
            frame_count: 10,
            duration: 0.33,
            codec: "h264".to_string(),
        };
        assert_eq!(scale_filter(&d), "scale=960:540");
    }
}
