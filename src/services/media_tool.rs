//! The media tool: probe/thumbnail/sprite/
//! transcode. Each invocation is a subprocess spawned in its own process
//! group so a timeout can kill the whole tree, with stdout/stderr drained
//! concurrently via `wait_with_output` to avoid pipe-buffer deadlock.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::errors::{EngineError, Result};
use crate::model::media::ProbeOutput;

#[derive(Debug, Clone)]
pub struct ThumbnailOpts {
    pub timestamp_s: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct SpriteOpts {
    pub fps: f64,
    pub cols: u32,
    pub rows: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

#[derive(Debug, Clone)]
pub struct TranscodeOpts {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: Option<u32>,
    /// Probed source duration, used to scale `out_time_ms=` progress
    /// lines into a meaningful 0..100 percentage.
    pub duration_s: f64,
}

/// Forwards 0..100 progress reports from inside a step executor up to
/// the Flow Scheduler.
#[derive(Clone)]
pub struct ProgressSink(Arc<dyn Fn(u8) + Send + Sync>);

impl ProgressSink {
    pub fn new(report: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self(Arc::new(report))
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Clamps to 0..100 so a caller's arithmetic slip can never surface
    /// as out-of-range progress.
    pub fn report(&self, pct: u8) {
        (self.0)(pct.min(100));
    }
}

#[async_trait]
pub trait MediaTool: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ProbeOutput>;
    async fn generate_thumbnail(&self, path: &Path, out_path: &Path, opts: &ThumbnailOpts) -> Result<()>;
    async fn generate_sprite(&self, path: &Path, out_path: &Path, opts: &SpriteOpts) -> Result<()>;
    async fn transcode(&self, path: &Path, out_path: &Path, opts: &TranscodeOpts, progress: ProgressSink) -> Result<()>;
}

/// Shells out to `ffprobe`/`ffmpeg`. Binary names are configurable so a
/// deployment can point at a vendored build.
pub struct ProcessMediaTool {
    ffprobe_bin: String,
    ffmpeg_bin: String,
    timeout: Duration,
}

impl ProcessMediaTool {
    pub fn new(ffprobe_bin: impl Into<String>, ffmpeg_bin: impl Into<String>, timeout: Duration) -> Self {
        Self { ffprobe_bin: ffprobe_bin.into(), ffmpeg_bin: ffmpeg_bin.into(), timeout }
    }
}

impl Default for ProcessMediaTool {
    fn default() -> Self {
        Self::new("ffprobe", "ffmpeg", Duration::from_secs(600))
    }
}

async fn run_with_group(mut command: tokio::process::Command, timeout: Duration) -> Result<std::process::Output> {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        unsafe {
            command.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }
    }

    command.stdout(std::process::Stdio::piped()).stderr(std::process::Stdio::piped());
    let child = command.spawn()?;

    #[cfg(unix)]
    let child_pid = child.id();

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            #[cfg(unix)]
            if let Some(pid) = child_pid {
                unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
                loop {
                    let ret = unsafe { libc::waitpid(-(pid as i32), std::ptr::null_mut(), libc::WNOHANG) };
                    if ret <= 0 {
                        break;
                    }
                }
            }
            Err(EngineError::retryable(format!("media tool timed out after {timeout:?}")))
        }
    }
}

#[async_trait]
impl MediaTool for ProcessMediaTool {
    async fn probe(&self, path: &Path) -> Result<ProbeOutput> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(EngineError::terminal(format!("probe input missing: {}", path.display())));
        }

        let mut cmd = tokio::process::Command::new(&self.ffprobe_bin);
        cmd.args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path);

        let output = run_with_group(cmd, self.timeout).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::terminal(format!("ffprobe failed: {stderr}")));
        }

        parse_ffprobe_json(&output.stdout)
    }

    async fn generate_thumbnail(&self, path: &Path, out_path: &Path, opts: &ThumbnailOpts) -> Result<()> {
        let mut cmd = tokio::process::Command::new(&self.ffmpeg_bin);
        cmd.args(["-y", "-ss"])
            .arg(format!("{:.3}", opts.timestamp_s))
            .arg("-i")
            .arg(path)
            .args(["-frames:v", "1", "-vf"])
            .arg(format!("scale={}:{}", opts.width, opts.height))
            .arg(out_path);
        run_ffmpeg(cmd, self.timeout).await
    }

    async fn generate_sprite(&self, path: &Path, out_path: &Path, opts: &SpriteOpts) -> Result<()> {
        let mut cmd = tokio::process::Command::new(&self.ffmpeg_bin);
        cmd.args(["-y", "-i"])
            .arg(path)
            .args(["-vf"])
            .arg(format!(
                "fps={},scale={}:{},tile={}x{}",
                opts.fps, opts.tile_width, opts.tile_height, opts.cols, opts.rows
            ))
            .arg(out_path);
        run_ffmpeg(cmd, self.timeout).await
    }

    async fn transcode(&self, path: &Path, out_path: &Path, opts: &TranscodeOpts, progress: ProgressSink) -> Result<()> {
        let mut cmd = tokio::process::Command::new(&self.ffmpeg_bin);
        cmd.args(["-y", "-i"])
            .arg(path)
            .args(["-c:v", &opts.codec, "-vf"])
            .arg(format!("scale={}:{}", opts.width, opts.height));
        if let Some(bitrate) = opts.bitrate {
            cmd.args(["-b:v", &format!("{bitrate}k")]);
        }
        cmd.args(["-progress", "pipe:1", "-nostats"]).arg(out_path);

        cmd.stdout(std::process::Stdio::piped()).stderr(std::process::Stdio::piped());
        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().expect("stdout piped");
        let mut lines = BufReader::new(stdout).lines();
        let duration_s = opts.duration_s;
        let progress_lines = progress.clone();

        let reporter = tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(ms) = line.strip_prefix("out_time_ms=").and_then(|v| v.trim().parse::<i64>().ok()) {
                    let elapsed_s = ms as f64 / 1_000_000.0;
                    let pct = if duration_s > 0.0 { (elapsed_s / duration_s * 100.0).min(99.0).max(0.0) } else { 0.0 };
                    progress_lines.report(pct as u8);
                }
            }
        });

        let status = tokio::time::timeout(self.timeout, child.wait())
            .await
            .map_err(|_| EngineError::retryable(format!("transcode timed out after {:?}", self.timeout)))??;
        let _ = reporter.await;

        if !status.success() {
            return Err(EngineError::retryable(format!("ffmpeg transcode exited with {status}")));
        }
        progress.report(100);
        Ok(())
    }
}

async fn run_ffmpeg(mut cmd: tokio::process::Command, timeout: Duration) -> Result<()> {
    cmd.stdout(std::process::Stdio::null());
    let output = run_with_group(cmd, timeout).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EngineError::retryable(format!("ffmpeg failed: {stderr}")));
    }
    Ok(())
}

fn parse_ffprobe_json(bytes: &[u8]) -> Result<ProbeOutput> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let format = value.get("format").ok_or_else(|| EngineError::terminal("ffprobe output missing 'format'"))?;
    let streams = value
        .get("streams")
        .and_then(|s| s.as_array())
        .ok_or_else(|| EngineError::terminal("ffprobe output missing 'streams'"))?;

    let video = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(|v| v.as_str()) == Some("video"))
        .ok_or_else(|| EngineError::terminal("no video stream found"))?;
    let has_audio = streams.iter().any(|s| s.get("codec_type").and_then(|v| v.as_str()) == Some("audio"));

    let duration: f64 = format
        .get("duration")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);
    let width = video.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let height = video.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let codec = video.get("codec_name").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
    let fps = video
        .get("r_frame_rate")
        .and_then(|v| v.as_str())
        .and_then(parse_rational)
        .unwrap_or(0.0);

    Ok(ProbeOutput {
        duration,
        width,
        height,
        codec,
        fps,
        bitrate: format.get("bit_rate").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()),
        format: format.get("format_name").and_then(|v| v.as_str()).map(String::from),
        size: format.get("size").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()),
        has_audio: Some(has_audio),
    })
}

fn parse_rational(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den == 0.0 { None } else { Some(num / den) }
}

/// Canned-response test double. Keyed
/// by the local input path so a scenario can stage per-media probe
/// output or failures.
pub struct StubMediaTool {
    probes: Mutex<HashMap<PathBuf, Result<ProbeOutput>>>,
}

impl StubMediaTool {
    pub fn new() -> Self {
        Self { probes: Mutex::new(HashMap::new()) }
    }

    pub fn stage_probe(&self, path: impl Into<PathBuf>, output: ProbeOutput) {
        self.probes.lock().unwrap().insert(path.into(), Ok(output));
    }

    pub fn stage_probe_failure(&self, path: impl Into<PathBuf>, err: EngineError) {
        self.probes.lock().unwrap().insert(path.into(), Err(err));
    }
}

impl Default for StubMediaTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaTool for StubMediaTool {
    async fn probe(&self, path: &Path) -> Result<ProbeOutput> {
        self.probes
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| Err(EngineError::terminal(format!("no staged probe for {}", path.display()))))
    }

    async fn generate_thumbnail(&self, _path: &Path, out_path: &Path, _opts: &ThumbnailOpts) -> Result<()> {
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(out_path, b"stub-thumbnail").await?;
        Ok(())
    }

    async fn generate_sprite(&self, _path: &Path, out_path: &Path, _opts: &SpriteOpts) -> Result<()> {
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(out_path, b"stub-sprite").await?;
        Ok(())
    }

    async fn transcode(&self, _path: &Path, out_path: &Path, _opts: &TranscodeOpts, progress: ProgressSink) -> Result<()> {
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        progress.report(50);
        tokio::fs::write(out_path, b"stub-proxy").await?;
        progress.report(100);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rational_frame_rate_parses() {
        assert_eq!(parse_rational("30000/1001"), Some(30000.0 / 1001.0));
        assert_eq!(parse_rational("30/1"), Some(30.0));
        assert_eq!(parse_rational("bad"), None);
    }

    #[tokio::test]
    async fn stub_tool_returns_staged_probe() {
        let tool = StubMediaTool::new();
        let probe = ProbeOutput {
            duration: 10.0,
            width: 100,
            height: 50,
            codec: "h264".into(),
            fps: 30.0,
            bitrate: None,
            format: None,
            size: None,
            has_audio: Some(true),
        };
        tool.stage_probe("/tmp/in.mp4", probe.clone());
        let got = tool.probe(Path::new("/tmp/in.mp4")).await.unwrap();
        assert_eq!(got, probe);
    }

    #[tokio::test]
    async fn stub_tool_errors_on_unstaged_path() {
        let tool = StubMediaTool::new();
        assert!(tool.probe(Path::new("/tmp/missing.mp4")).await.is_err());
    }
}
