//! Frame reassembly into an H.264 container.
//!
//! Mirror of [`crate::extract`]: the memory path feeds raw RGB frames
//! into an FFmpeg encode pipe, the disk path writes a PNG sequence and
//! encodes it in one pass at the end. Both pad odd dimensions up to
//! even values, which libx264 requires for 4:2:0 output.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use roto_models::OutputQuality;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tracing::debug;

use crate::command::{spawn_piped, FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::estimator::ProcessingStrategy;
use crate::extract::FRAME_FILE_TEMPLATE;
use crate::frame::FrameBatch;
use crate::probe::VideoDescriptor;

/// Pads both dimensions up to the next even value.
pub const EVEN_PAD_FILTER: &str = "pad=width=ceil(iw/2)*2:height=ceil(ih/2)*2:color=black";

/// A sink accepting ordered frame batches and producing the output file.
pub struct FrameSink {
    descriptor: VideoDescriptor,
    quality: OutputQuality,
    output: PathBuf,
    frames_written: u64,
    inner: SinkInner,
}

enum SinkInner {
    Memory { child: Child, stdin: ChildStdin },
    Disk { dir: PathBuf },
}

impl FrameSink {
    /// Create a sink for the given output file.
    ///
    /// Disk mode stages its PNG sequence under `scratch_dir`.
    pub async fn create(
        output: impl AsRef<Path>,
        descriptor: &VideoDescriptor,
        quality: OutputQuality,
        strategy: ProcessingStrategy,
        scratch_dir: &Path,
    ) -> MediaResult<Self> {
        let output = output.as_ref().to_path_buf();

        let inner = match strategy {
            ProcessingStrategy::Memory => {
                let cmd = encode_pipe_command(&output, descriptor, quality);
                let mut child = spawn_piped(&cmd, Stdio::piped(), Stdio::null())?;
                let stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| MediaError::internal("encode stdin not captured"))?;
                SinkInner::Memory { child, stdin }
            }
            ProcessingStrategy::Disk => {
                let dir = scratch_dir.join("encode");
                std::fs::create_dir_all(&dir)?;
                SinkInner::Disk { dir }
            }
        };

        Ok(Self {
            descriptor: descriptor.clone(),
            quality,
            output,
            frames_written: 0,
            inner,
        })
    }

    /// Append a batch. Batches must arrive in index order.
    pub async fn write_batch(&mut self, batch: &FrameBatch) -> MediaResult<()> {
        match &mut self.inner {
            SinkInner::Memory { stdin, .. } => {
                for frame in &batch.frames {
                    stdin.write_all(frame.image.as_raw()).await?;
                    self.frames_written += 1;
                }
            }
            SinkInner::Disk { dir } => {
                for frame in &batch.frames {
                    // 1-based to match the encode pass's -start_number
                    let path = dir.join(format!("frame_{:08}.png", self.frames_written + 1));
                    let image = frame.image.clone();
                    tokio::task::spawn_blocking(move || image.save(&path))
                        .await
                        .map_err(|e| MediaError::internal(format!("frame save task: {e}")))??;
                    self.frames_written += 1;
                }
            }
        }
        Ok(())
    }

    /// Frames accepted so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Close the sink and finalize the output file.
    pub async fn finish(self) -> MediaResult<()> {
        match self.inner {
            SinkInner::Memory { mut child, stdin } => {
                // Closing stdin signals end of stream
                drop(stdin);
                let status = child.wait().await?;
                if !status.success() {
                    return Err(MediaError::ffmpeg_failed(
                        "Encode pipe exited with non-zero status",
                        None,
                        status.code(),
                    ));
                }
            }
            SinkInner::Disk { dir } => {
                let cmd =
                    encode_sequence_command(&dir, &self.output, &self.descriptor, self.quality);
                let total_ms = (self.frames_written as f64 / self.descriptor.fps * 1000.0) as i64;
                FfmpegRunner::new()
                    .run_with_progress(&cmd, move |p| {
                        debug!(
                            frame = p.frame,
                            percent = format!("{:.1}", p.percentage(total_ms)),
                            "Encoding output"
                        );
                    })
                    .await?;
            }
        }

        debug!(
            frames = self.frames_written,
            output = %self.output.display(),
            "Output finalized"
        );
        Ok(())
    }
}

/// Encode command reading raw RGB frames from stdin.
fn encode_pipe_command(
    output: &Path,
    descriptor: &VideoDescriptor,
    quality: OutputQuality,
) -> FfmpegCommand {
    FfmpegCommand::new("pipe:0", output)
        .no_progress()
        .input_args([
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
            &format!("{}x{}", descriptor.width, descriptor.height),
            "-framerate",
            &format!("{:.6}", descriptor.fps),
        ])
        .video_filter(EVEN_PAD_FILTER)
        .output_args(quality.to_ffmpeg_args())
}

/// Encode command reading the staged PNG sequence.
fn encode_sequence_command(
    dir: &Path,
    output: &Path,
    descriptor: &VideoDescriptor,
    quality: OutputQuality,
) -> FfmpegCommand {
    FfmpegCommand::new(dir.join(FRAME_FILE_TEMPLATE), output)
        .input_args([
            "-framerate",
            &format!("{:.6}", descriptor.fps),
            "-start_number",
            "1",
        ])
        .video_filter(EVEN_PAD_FILTER)
        .output_args(quality.to_ffmpeg_args())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use image::RgbImage;
    use tempfile::TempDir;

    fn descriptor(width: u32, height: u32) -> VideoDescriptor {
        VideoDescriptor {
            width,
            height,
            fps: 30.0,
            frame_count: 10,
            duration: 0.33,
            codec: "h264".to_string(),
        }
    }

    #[tokio::test]
    async fn test_disk_sink_stages_contiguous_sequence() {
        let scratch = TempDir::new().unwrap();
        let mut sink = FrameSink::create(
            scratch.path().join("out.mp4"),
            &descriptor(8, 8),
            OutputQuality::Medium,
            ProcessingStrategy::Disk,
            scratch.path(),
        )
        .await
        .unwrap();

        let img = || RgbImage::from_pixel(8, 8, image::Rgb([1, 2, 3]));
        // Second batch carries a source-index gap from a skipped frame;
        // staged filenames must still count up without holes
        let first = FrameBatch::new(0, vec![Frame::new(0, img()), Frame::new(1, img())]);
        let second = FrameBatch::new(2, vec![Frame::new(3, img())]);
        sink.write_batch(&first).await.unwrap();
        sink.write_batch(&second).await.unwrap();
        assert_eq!(sink.frames_written(), 3);

        let mut names: Vec<String> = std::fs::read_dir(scratch.path().join("encode"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "frame_00000001.png",
                "frame_00000002.png",
                "frame_00000003.png"
            ]
        );
    }

    #[test]
    fn test_pipe_command_args() {
        let cmd = encode_pipe_command(
            Path::new("out.mp4"),
            &descriptor(639, 359),
            OutputQuality::High,
        );
        let args = cmd.build_args();

        assert!(args.contains(&"pipe:0".to_string()));
        assert!(args.contains(&"639x359".to_string()));
        assert!(args.contains(&EVEN_PAD_FILTER.to_string()));
        assert!(args.contains(&"18".to_string()));
        assert!(args.contains(&"slow".to_string()));
        assert!(args.contains(&"yuv420p".to_string()));
    }

    #[test]
    fn test_sequence_command_args() {
        let cmd = encode_sequence_command(
            Path::new("/scratch/encode"),
            Path::new("out.mp4"),
            &descriptor(640, 360),
            OutputQuality::Low,
        );
        let args = cmd.build_args();

        assert!(args.iter().any(|a| a.ends_with(FRAME_FILE_TEMPLATE)));
        assert!(args.contains(&"-start_number".to_string()));
        assert!(args.contains(&"28".to_string()));
        assert!(args.contains(&"faster".to_string()));
    }
}
