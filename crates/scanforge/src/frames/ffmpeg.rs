//! ffmpeg-backed frame source.
//!
//! Dimensions come from `ffprobe`; frames are streamed from an `ffmpeg`
//! child as raw `rgb24` over stdout, exactly one frame buffer at a time.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use image::RgbImage;

use super::{DecodedFrame, FrameSource, VideoDecoder};
use crate::error::ExtractionError;

#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegDecoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Reads the first video stream's width and height.
    fn probe_dimensions(&self, path: &Path) -> Result<(u32, u32), ExtractionError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-of",
                "csv=p=0:s=x",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ExtractionError::UnreadableSource {
                path: path.to_path_buf(),
                reason: format!("failed to run {}: {}", self.ffprobe.display(), e),
            })?;

        if !output.status.success() {
            return Err(ExtractionError::UnreadableSource {
                path: path.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_dimensions(&stdout).ok_or_else(|| ExtractionError::UnreadableSource {
            path: path.to_path_buf(),
            reason: format!("no decodable video stream (probe said {:?})", stdout.trim()),
        })
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, ExtractionError> {
        let (width, height) = self.probe_dimensions(path)?;

        // -noautorotate and -map 0:v:0 keep output frames at the probed
        // stream's dimensions.
        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExtractionError::UnreadableSource {
                path: path.to_path_buf(),
                reason: format!("failed to run {}: {}", self.ffmpeg.display(), e),
            })?;

        let stdout = child.stdout.take();
        let stderr_drain = child.stderr.take().map(|stderr| {
            let label = crate::sanitize::redact_path(path);
            std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    log::debug!("ffmpeg [{}]: {}", label, line);
                }
            })
        });

        let Some(stdout) = stdout else {
            // Drop of the guard kills and reaps the child.
            drop(FfmpegFrames::guard(child, stderr_drain));
            return Err(ExtractionError::UnreadableSource {
                path: path.to_path_buf(),
                reason: "ffmpeg stdout was not captured".to_string(),
            });
        };

        log::debug!(
            "Streaming {}x{} frames from {}",
            width,
            height,
            path.display()
        );

        Ok(Box::new(FfmpegFrames {
            child: Some(child),
            stdout: Some(stdout),
            stderr_drain,
            width,
            height,
            finished: false,
        }))
    }
}

fn parse_dimensions(probe_output: &str) -> Option<(u32, u32)> {
    let line = probe_output.lines().find(|l| !l.trim().is_empty())?;
    let (w, h) = line.trim().split_once('x')?;
    let width: u32 = w.trim().parse().ok()?;
    let height: u32 = h.trim().parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// Live ffmpeg decode. Dropping it kills and reaps the child process.
struct FfmpegFrames {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr_drain: Option<JoinHandle<()>>,
    width: u32,
    height: u32,
    finished: bool,
}

impl FfmpegFrames {
    fn guard(child: Child, stderr_drain: Option<JoinHandle<()>>) -> Self {
        Self {
            child: Some(child),
            stdout: None,
            stderr_drain,
            width: 0,
            height: 0,
            finished: true,
        }
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl Iterator for FfmpegFrames {
    type Item = DecodedFrame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let frame_len = self.frame_len();
        let stdout = self.stdout.as_mut()?;

        let mut buffer = vec![0u8; frame_len];
        let filled = match read_full(stdout, &mut buffer) {
            Ok(n) => n,
            Err(e) => {
                self.finished = true;
                return Some(DecodedFrame::empty(format!("decoder pipe error: {}", e)));
            }
        };

        if filled == 0 {
            self.finished = true;
            return None;
        }
        if filled < frame_len {
            self.finished = true;
            return Some(DecodedFrame::empty(format!(
                "truncated frame ({} of {} bytes)",
                filled, frame_len
            )));
        }

        match RgbImage::from_raw(self.width, self.height, buffer) {
            Some(img) => Some(DecodedFrame::Image(img)),
            None => Some(DecodedFrame::empty("frame buffer size mismatch")),
        }
    }
}

impl Drop for FfmpegFrames {
    fn drop(&mut self) {
        // Close the pipe first so a blocked ffmpeg write fails fast.
        self.stdout.take();
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
        if let Some(handle) = self.stderr_drain.take() {
            let _ = handle.join();
        }
    }
}

/// Reads until `buf` is full or EOF. Returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(parse_dimensions("1920x1080\n"), Some((1920, 1080)));
        assert_eq!(parse_dimensions("\n640x480"), Some((640, 480)));
        assert_eq!(parse_dimensions(""), None);
        assert_eq!(parse_dimensions("0x480"), None);
        assert_eq!(parse_dimensions("N/AxN/A"), None);
    }

    #[test]
    fn test_read_full_reports_short_reads() {
        let data = [1u8, 2, 3, 4, 5];
        let mut reader: &[u8] = &data;
        let mut buf = [0u8; 3];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);

        let mut buf = [0u8; 3];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_missing_ffprobe_is_unreadable_source() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mov");
        std::fs::write(&video, b"not really a video").unwrap();

        let decoder = FfmpegDecoder::new(
            "/nonexistent/bin/ffmpeg",
            "/nonexistent/bin/ffprobe",
        );
        let result = decoder.open(&video);
        assert!(matches!(
            result,
            Err(ExtractionError::UnreadableSource { .. })
        ));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        /// Decoder whose ffprobe reports 2x2 and whose ffmpeg runs `body`.
        fn stub_decoder(dir: &Path, body: &str) -> FfmpegDecoder {
            let ffprobe = write_script(dir, "ffprobe", "echo 2x2");
            let ffmpeg = write_script(dir, "ffmpeg", body);
            FfmpegDecoder::new(ffmpeg, ffprobe)
        }

        #[test]
        fn test_frames_sliced_from_raw_stream() {
            let dir = tempfile::tempdir().unwrap();
            // Three 12-byte frames followed by a 5-byte partial one.
            let decoder = stub_decoder(
                dir.path(),
                "printf 'AAAAAAAAAAAABBBBBBBBBBBBCCCCCCCCCCCCxyzzy'",
            );

            let frames: Vec<DecodedFrame> =
                decoder.open(&dir.path().join("clip.mov")).unwrap().collect();

            assert_eq!(frames.len(), 4);
            for (frame, byte) in frames.iter().zip([b'A', b'B', b'C']) {
                match frame {
                    DecodedFrame::Image(img) => {
                        assert_eq!(img.dimensions(), (2, 2));
                        assert!(img.as_raw().iter().all(|&b| b == byte));
                    }
                    other => panic!("Expected image, got {:?}", other),
                }
            }
            assert!(frames[3].is_empty());
        }

        #[test]
        fn test_exact_stream_has_no_trailing_empty() {
            let dir = tempfile::tempdir().unwrap();
            let decoder = stub_decoder(dir.path(), "printf 'AAAAAAAAAAAA'");

            let frames: Vec<DecodedFrame> =
                decoder.open(&dir.path().join("clip.mov")).unwrap().collect();
            assert_eq!(frames.len(), 1);
            assert!(!frames[0].is_empty());
        }

        #[test]
        fn test_ffmpeg_reads_first_video_stream_only() {
            let dir = tempfile::tempdir().unwrap();
            let args_file = dir.path().join("args.txt");
            let decoder = stub_decoder(
                dir.path(),
                &format!("echo \"$@\" > '{}'", args_file.display()),
            );

            let frames: Vec<DecodedFrame> =
                decoder.open(&dir.path().join("clip.mov")).unwrap().collect();
            assert!(frames.is_empty());

            let args = std::fs::read_to_string(&args_file).unwrap();
            assert!(args.contains("-map 0:v:0"), "args were {}", args);
            assert!(args.contains("-pix_fmt rgb24"));
        }

        #[test]
        fn test_probe_failure_is_unreadable_source() {
            let dir = tempfile::tempdir().unwrap();
            let ffprobe = write_script(dir.path(), "ffprobe", "echo 'moov atom not found' >&2; exit 1");
            let decoder = FfmpegDecoder::new("/nonexistent/bin/ffmpeg", ffprobe);

            match decoder.open(&dir.path().join("clip.mov")) {
                Err(ExtractionError::UnreadableSource { reason, .. }) => {
                    assert!(reason.contains("moov atom not found"))
                }
                Err(other) => panic!("Expected UnreadableSource, got {:?}", other),
                Ok(_) => panic!("Expected UnreadableSource, got a frame source"),
            }
        }

        #[cfg(target_os = "linux")]
        #[test]
        fn test_early_drop_reaps_ffmpeg() {
            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("ffmpeg.pid");
            let decoder = stub_decoder(
                dir.path(),
                &format!(
                    "echo $$ > '{}'\nprintf 'AAAAAAAAAAAA'\nexec sleep 30",
                    pid_file.display()
                ),
            );

            let mut source = decoder.open(&dir.path().join("clip.mov")).unwrap();
            assert!(matches!(source.next(), Some(DecodedFrame::Image(_))));
            let pid = std::fs::read_to_string(&pid_file).unwrap();
            let pid = pid.trim().to_string();
            assert!(Path::new(&format!("/proc/{}", pid)).exists());

            drop(source);

            // Killed and waited on, so not even a zombie entry remains.
            assert!(!Path::new(&format!("/proc/{}", pid)).exists());
        }
    }
}
