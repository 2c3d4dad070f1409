#![forbid(unsafe_code)]

//! Bridge to the external `yt-dlp` program.
//!
//! The orchestrator never talks to yt-dlp directly; it goes through the
//! [`Extractor`] trait so tests can substitute a scripted double. The real
//! implementation spawns one yt-dlp process per attempt: metadata probes use
//! `--dump-single-json --skip-download`, downloads add `--newline` so the
//! progress stream arrives as parseable whole lines on stdout.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::format::RawMediaInfo;
use crate::identity::ClientIdentity;

/// One progress sample relayed to the client during a download.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub percentage: f64,
    pub speed: String,
    pub eta: String,
}

pub type ProgressSender = mpsc::Sender<ProgressUpdate>;

/// Whether an attempt only probes metadata or also transfers the file.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionMode {
    MetadataOnly,
    Download { dest_dir: PathBuf },
}

/// Everything a single attempt needs. The identity changes between retries;
/// the rest stays fixed for the request.
pub struct AttemptRequest<'a> {
    pub url: &'a str,
    pub config: &'a ExtractionConfig,
    pub identity: &'static ClientIdentity,
    pub mode: &'a ExtractionMode,
    pub progress: Option<&'a ProgressSender>,
}

/// Raw result of a successful attempt, before normalization.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub info: RawMediaInfo,
    /// File name written under the destination directory (download mode).
    pub filename: Option<String>,
}

/// Seam between the orchestrator and the external extraction capability.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn attempt(&self, request: AttemptRequest<'_>) -> Result<Extracted, ExtractError>;
}

/// The production extractor, backed by the `yt-dlp` binary.
pub struct YtDlp {
    program: PathBuf,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new()
    }
}

impl YtDlp {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
        }
    }

    /// Points the bridge at a different executable. Tests use this to swap
    /// in a scripted stand-in.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments shared by both modes: output shaping, timeouts, and the
    /// per-attempt identity headers. Internal retries stay at zero because
    /// the orchestrator owns the attempt budget.
    fn base_command(&self, config: &ExtractionConfig, identity: &ClientIdentity) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--no-warnings")
            .arg("--no-check-certificates")
            .arg("--geo-bypass")
            .arg("--retries")
            .arg("0")
            .arg("--socket-timeout")
            .arg(config.socket_timeout.as_secs().to_string())
            .arg("--format")
            .arg(format!("best[height<={}]", config.max_height))
            .arg("--user-agent")
            .arg(identity.user_agent)
            .arg("--add-header")
            .arg(format!("Accept:{}", identity.accept))
            .arg("--add-header")
            .arg(format!("Accept-Language:{}", identity.accept_language));
        command.stdin(Stdio::null());
        command.kill_on_drop(true);
        command
    }

    async fn fetch_info(
        &self,
        url: &str,
        config: &ExtractionConfig,
        identity: &ClientIdentity,
    ) -> Result<Extracted, ExtractError> {
        let mut command = self.base_command(config, identity);
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-progress")
            .arg(url);

        let output = command.output().await.map_err(|err| {
            ExtractError::Unexpected(format!("spawning {}: {err}", self.program.display()))
        })?;

        if !output.status.success() {
            return Err(ExtractError::Upstream(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(ExtractError::EmptyResult);
        }

        let info: RawMediaInfo = serde_json::from_str(stdout.trim())
            .map_err(|err| ExtractError::Unexpected(format!("parsing extractor JSON: {err}")))?;

        Ok(Extracted {
            info,
            filename: None,
        })
    }

    async fn download(
        &self,
        url: &str,
        config: &ExtractionConfig,
        identity: &ClientIdentity,
        dest_dir: &Path,
        progress: Option<&ProgressSender>,
    ) -> Result<Extracted, ExtractError> {
        tokio::fs::create_dir_all(dest_dir).await.map_err(|err| {
            ExtractError::Unexpected(format!("creating {}: {err}", dest_dir.display()))
        })?;

        let template = dest_dir.join("%(title)s.%(ext)s");
        let mut command = self.base_command(config, identity);
        command
            .arg("--newline")
            .arg("--print-json")
            .arg("--output")
            .arg(template.as_os_str())
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|err| {
            ExtractError::Unexpected(format!("spawning {}: {err}", self.program.display()))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::Unexpected("child stdout unavailable".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractError::Unexpected("child stderr unavailable".into()))?;

        // Drain stderr concurrently so a chatty process cannot deadlock on a
        // full pipe while we read stdout.
        let stderr_task = tokio::spawn(async move {
            let mut buffer = String::new();
            let _ = stderr.read_to_string(&mut buffer).await;
            buffer
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut info_line: Option<String> = None;
        let mut destination: Option<PathBuf> = None;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|err| ExtractError::Unexpected(format!("reading extractor output: {err}")))?
        {
            if line.starts_with('{') {
                info_line = Some(line);
                continue;
            }
            if let Some(path) = parse_destination_line(&line) {
                destination = Some(path);
                continue;
            }
            if let Some(update) = parse_progress_line(&line)
                && let Some(sender) = progress
                && !sender.is_closed()
            {
                // A closed receiver means the client went away; dropping the
                // sample is the correct behavior, not an error.
                let _ = sender.send(update).await;
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|err| ExtractError::Unexpected(format!("waiting for extractor: {err}")))?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(ExtractError::Upstream(stderr_text.trim().to_string()));
        }

        let raw = info_line.ok_or(ExtractError::EmptyResult)?;
        let info: RawMediaInfo = serde_json::from_str(&raw)
            .map_err(|err| ExtractError::Unexpected(format!("parsing extractor JSON: {err}")))?;

        let filename = destination
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .or_else(|| fallback_filename(&info));

        Ok(Extracted { info, filename })
    }
}

#[async_trait]
impl Extractor for YtDlp {
    async fn attempt(&self, request: AttemptRequest<'_>) -> Result<Extracted, ExtractError> {
        match request.mode {
            ExtractionMode::MetadataOnly => {
                self.fetch_info(request.url, request.config, request.identity)
                    .await
            }
            ExtractionMode::Download { dest_dir } => {
                self.download(
                    request.url,
                    request.config,
                    request.identity,
                    dest_dir,
                    request.progress,
                )
                .await
            }
        }
    }
}

/// Runs `<name> --version` to fail loudly at startup when yt-dlp is missing.
pub fn ensure_program_available(name: &str) -> anyhow::Result<()> {
    let status = std::process::Command::new(name)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => anyhow::bail!("{} is installed but returned a failure status", name),
        Err(err) => anyhow::bail!("{} is not installed or not in PATH: {}", name, err),
    }
}

/// Parses a `--newline` progress line such as
/// `[download]  42.7% of 10.00MiB at 1.20MiB/s ETA 00:15`.
fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let rest = line.strip_prefix("[download]")?.trim();
    let mut percentage = None;
    let mut speed = String::new();
    let mut eta = String::new();

    let mut tokens = rest.split_whitespace();
    while let Some(token) = tokens.next() {
        if let Some(value) = token.strip_suffix('%') {
            percentage = value.parse::<f64>().ok();
        } else if token == "at" {
            if let Some(value) = tokens.next() {
                speed = value.to_string();
            }
        } else if token == "ETA" {
            if let Some(value) = tokens.next() {
                eta = value.to_string();
            }
        }
    }

    Some(ProgressUpdate {
        percentage: percentage?,
        speed,
        eta,
    })
}

/// Extracts the output path from a `[download] Destination: <path>` line.
fn parse_destination_line(line: &str) -> Option<PathBuf> {
    let rest = line.strip_prefix("[download] Destination:")?.trim();
    if rest.is_empty() {
        return None;
    }
    Some(PathBuf::from(rest))
}

/// Derives a file name from the reported title and container when yt-dlp
/// never printed a destination line (already-downloaded files, for one).
fn fallback_filename(info: &RawMediaInfo) -> Option<String> {
    let title = info.title.as_deref()?.trim();
    if title.is_empty() {
        return None;
    }
    let ext = info.ext.as_deref().unwrap_or("mp4");
    Some(format!("{}.{}", sanitize_title(title), ext))
}

/// Keeps the name usable as a single path segment.
fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn stub_program(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("yt-dlp-stub");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn request<'a>(
        url: &'a str,
        config: &'a ExtractionConfig,
        mode: &'a ExtractionMode,
        progress: Option<&'a ProgressSender>,
    ) -> AttemptRequest<'a> {
        AttemptRequest {
            url,
            config,
            identity: identity::pick(0),
            mode,
            progress,
        }
    }

    const INFO_JSON: &str = r#"{"title":"Clip","duration":90,"uploader":"Someone",
        "description":"d","ext":"mp4","formats":[
        {"format_id":"22","ext":"mp4","resolution":"1280x720","filesize":1000,"url":"http://v"}]}"#;

    #[tokio::test]
    async fn fetch_info_parses_stub_json() {
        let dir = tempdir().unwrap();
        let json = INFO_JSON.replace('\n', " ");
        let program = stub_program(dir.path(), &format!("echo '{json}'"));
        let ytdlp = YtDlp::with_program(program);
        let config = ExtractionConfig::default();
        let mode = ExtractionMode::MetadataOnly;

        let extracted = ytdlp
            .attempt(request("http://example.test/v", &config, &mode, None))
            .await
            .unwrap();
        assert_eq!(extracted.info.title.as_deref(), Some("Clip"));
        assert_eq!(extracted.info.formats.len(), 1);
        assert!(extracted.filename.is_none());
    }

    #[tokio::test]
    async fn fetch_info_failure_surfaces_stderr() {
        let dir = tempdir().unwrap();
        let program = stub_program(
            dir.path(),
            "echo 'ERROR: Private video' >&2\nexit 1",
        );
        let ytdlp = YtDlp::with_program(program);
        let config = ExtractionConfig::default();
        let mode = ExtractionMode::MetadataOnly;

        let err = ytdlp
            .attempt(request("http://example.test/v", &config, &mode, None))
            .await
            .unwrap_err();
        match err {
            ExtractError::Upstream(message) => assert!(message.contains("Private video")),
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_info_empty_stdout_is_empty_result() {
        let dir = tempdir().unwrap();
        let program = stub_program(dir.path(), "exit 0");
        let ytdlp = YtDlp::with_program(program);
        let config = ExtractionConfig::default();
        let mode = ExtractionMode::MetadataOnly;

        let err = ytdlp
            .attempt(request("http://example.test/v", &config, &mode, None))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::EmptyResult));
    }

    #[tokio::test]
    async fn download_relays_progress_and_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out");
        let json = INFO_JSON.replace('\n', " ");
        let body = format!(
            "echo '[download] Destination: {}/Clip.mp4'\n\
             echo '[download]  25.0% of 10.00MiB at 1.00MiB/s ETA 00:30'\n\
             echo '[download] 100.0% of 10.00MiB at 2.00MiB/s ETA 00:00'\n\
             echo '{json}'",
            dest.display()
        );
        let program = stub_program(dir.path(), &body);
        let ytdlp = YtDlp::with_program(program);
        let config = ExtractionConfig::default();
        let mode = ExtractionMode::Download {
            dest_dir: dest.clone(),
        };
        let (tx, mut rx) = mpsc::channel(16);

        let extracted = ytdlp
            .attempt(request("http://example.test/v", &config, &mode, Some(&tx)))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(extracted.filename.as_deref(), Some("Clip.mp4"));
        assert!(dest.is_dir());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.percentage, 25.0);
        assert_eq!(first.speed, "1.00MiB/s");
        assert_eq!(first.eta, "00:30");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.percentage, 100.0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn download_failure_reports_upstream_message() {
        let dir = tempdir().unwrap();
        let program = stub_program(
            dir.path(),
            "echo 'ERROR: Video unavailable' >&2\nexit 1",
        );
        let ytdlp = YtDlp::with_program(program);
        let config = ExtractionConfig::default();
        let mode = ExtractionMode::Download {
            dest_dir: dir.path().join("out"),
        };

        let err = ytdlp
            .attempt(request("http://example.test/v", &config, &mode, None))
            .await
            .unwrap_err();
        match err {
            ExtractError::Upstream(message) => assert!(message.contains("Video unavailable")),
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[test]
    fn parse_progress_line_full_sample() {
        let update =
            parse_progress_line("[download]  42.7% of 10.00MiB at 1.20MiB/s ETA 00:15").unwrap();
        assert_eq!(update.percentage, 42.7);
        assert_eq!(update.speed, "1.20MiB/s");
        assert_eq!(update.eta, "00:15");
    }

    #[test]
    fn parse_progress_line_without_eta() {
        let update = parse_progress_line("[download] 100% of 10.00MiB in 00:05").unwrap();
        assert_eq!(update.percentage, 100.0);
        assert!(update.eta.is_empty());
    }

    #[test]
    fn parse_progress_line_rejects_non_progress() {
        assert!(parse_progress_line("[info] Writing video metadata").is_none());
        assert!(parse_progress_line("[download] Destination: /tmp/x.mp4").is_none());
        assert!(parse_progress_line("plain text").is_none());
    }

    #[test]
    fn parse_destination_line_extracts_path() {
        assert_eq!(
            parse_destination_line("[download] Destination: /tmp/video.mp4"),
            Some(PathBuf::from("/tmp/video.mp4"))
        );
        assert_eq!(parse_destination_line("[download] Destination:"), None);
        assert_eq!(parse_destination_line("[download] 50% of 1MiB"), None);
    }

    #[test]
    fn fallback_filename_sanitizes_title() {
        let info = RawMediaInfo {
            title: Some("a/b\\c".into()),
            ext: Some("webm".into()),
            ..RawMediaInfo::default()
        };
        assert_eq!(fallback_filename(&info).as_deref(), Some("a_b_c.webm"));
    }
}
