//! Link classification and the yt-dlp wrapper that turns a URL into a local file.

use crate::config::Downloader;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s<>]+").unwrap());
static HOST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://(?:[^@/?#]*@)?([^:/?#]+)").unwrap());

const TIKTOK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const MAX_TITLE_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to start {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },
    #[error("download timed out after {0:?}")]
    Timeout(Duration),
    #[error("download failed: {0}")]
    Failed(String),
    #[error("download finished but produced no file")]
    MissingOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    YouTube,
    Instagram,
    TikTok,
    Twitter,
    Facebook,
    Vimeo,
    Pinterest,
    Reddit,
}

impl Platform {
    pub const ALL: [Platform; 8] = [
        Platform::YouTube,
        Platform::Instagram,
        Platform::TikTok,
        Platform::Twitter,
        Platform::Facebook,
        Platform::Vimeo,
        Platform::Pinterest,
        Platform::Reddit,
    ];

    fn domains(&self) -> &'static [&'static str] {
        match self {
            Platform::YouTube => &["youtube.com", "youtu.be"],
            Platform::Instagram => &["instagram.com"],
            Platform::TikTok => &["tiktok.com"],
            Platform::Twitter => &["twitter.com", "x.com"],
            Platform::Facebook => &["facebook.com", "fb.watch"],
            Platform::Vimeo => &["vimeo.com"],
            Platform::Pinterest => &["pinterest.com"],
            Platform::Reddit => &["reddit.com", "redd.it"],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Platform::YouTube => "YouTube",
            Platform::Instagram => "Instagram",
            Platform::TikTok => "TikTok",
            Platform::Twitter => "Twitter/X",
            Platform::Facebook => "Facebook",
            Platform::Vimeo => "Vimeo",
            Platform::Pinterest => "Pinterest",
            Platform::Reddit => "Reddit",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Platform::YouTube => "📺",
            Platform::Instagram => "📱",
            Platform::TikTok => "🎵",
            Platform::Twitter => "🐦",
            Platform::Facebook => "👥",
            Platform::Vimeo => "🎬",
            Platform::Pinterest => "📌",
            Platform::Reddit => "🤖",
        }
    }

    /// Classifies by host: exact domain or any subdomain of it.
    pub fn detect(url: &str) -> Option<Platform> {
        let host = HOST_RE.captures(url)?.get(1)?.as_str().to_ascii_lowercase();
        Platform::ALL.into_iter().find(|p| {
            p.domains().iter().any(|d| {
                host == *d
                    || host
                        .strip_suffix(d)
                        .is_some_and(|prefix| prefix.ends_with('.'))
            })
        })
    }

    /// Only YouTube offers a quality choice; everything else is fetched at `best`.
    pub fn offers_quality_choice(&self) -> bool {
        matches!(self, Platform::YouTube)
    }
}

/// First http(s) link in a message, if any.
pub fn extract_url(text: &str) -> Option<&str> {
    URL_RE.find(text).map(|m| m.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    P480,
    P720,
    P1080,
    Mp3,
    Best,
}

impl Quality {
    pub const CALLBACK_PREFIX: &'static str = "quality_";

    pub const CHOICES: [Quality; 4] = [Quality::P480, Quality::P720, Quality::P1080, Quality::Mp3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::P480 => "480",
            Quality::P720 => "720",
            Quality::P1080 => "1080",
            Quality::Mp3 => "mp3",
            Quality::Best => "best",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Quality::P480 => "480p",
            Quality::P720 => "720p",
            Quality::P1080 => "1080p",
            Quality::Mp3 => "🎵 MP3",
            Quality::Best => "Best",
        }
    }

    pub fn callback_data(&self) -> String {
        format!("{}{}", Self::CALLBACK_PREFIX, self.as_str())
    }

    pub fn from_callback_data(data: &str) -> Option<Quality> {
        match data.strip_prefix(Self::CALLBACK_PREFIX)? {
            "480" => Some(Quality::P480),
            "720" => Some(Quality::P720),
            "1080" => Some(Quality::P1080),
            "mp3" => Some(Quality::Mp3),
            "best" => Some(Quality::Best),
            _ => None,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Quality::Mp3)
    }

    /// yt-dlp `--format` selector.
    pub fn format_spec(&self) -> String {
        match self {
            Quality::P480 | Quality::P720 | Quality::P1080 => {
                let h = self.as_str();
                format!(
                    "bestvideo[height<={h}][ext=mp4]+bestaudio[ext=m4a]/best[height<={h}][ext=mp4]"
                )
            }
            Quality::Mp3 => "bestaudio/best".to_string(),
            Quality::Best => "best".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMedia {
    pub path: PathBuf,
    pub title: String,
}

impl FetchedMedia {
    /// Removes the downloaded file, then its job directory if that is now empty.
    pub async fn cleanup(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => info!(path = %self.path.display(), "deleted downloaded file"),
            Err(err) => warn!(?err, path = %self.path.display(), "failed to delete downloaded file"),
        }
        if let Some(dir) = self.path.parent() {
            let _ = tokio::fs::remove_dir(dir).await;
        }
    }
}

/// The external extraction engine: a URL and a format in, a local file out.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        platform: Platform,
        quality: Quality,
        user_id: i64,
    ) -> Result<FetchedMedia, MediaError>;
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    settings: Downloader,
    download_dir: PathBuf,
}

impl YtDlp {
    pub fn new(settings: Downloader, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            download_dir: download_dir.into(),
        }
    }

    /// Probe `yt-dlp --version`.
    pub async fn ensure_available(&self) -> Result<String, MediaError> {
        let output = Command::new(&self.settings.ytdlp_bin)
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| MediaError::Spawn {
                bin: self.settings.ytdlp_bin.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(MediaError::Failed(format!(
                "{} --version exited with {}",
                self.settings.ytdlp_bin, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn build_args(
        &self,
        url: &str,
        platform: Platform,
        quality: Quality,
        output_template: &Path,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--format".into(),
            quality.format_spec(),
            "--output".into(),
            output_template.to_string_lossy().into_owned(),
            "--no-playlist".into(),
            "--no-warnings".into(),
            "--no-color".into(),
            "--no-check-certificates".into(),
            "--retries".into(),
            self.settings.retries.to_string(),
            "--fragment-retries".into(),
            self.settings.retries.to_string(),
            "--no-simulate".into(),
            "--print".into(),
            "title".into(),
            "--print".into(),
            "after_move:filepath".into(),
        ];
        if self.settings.socket_timeout_secs > 0 {
            args.push("--socket-timeout".into());
            args.push(self.settings.socket_timeout_secs.to_string());
        }
        if quality.is_audio() {
            args.extend(
                ["--extract-audio", "--audio-format", "mp3", "--audio-quality", "192K"]
                    .map(String::from),
            );
        }
        if platform == Platform::TikTok {
            args.push("--user-agent".into());
            args.push(TIKTOK_USER_AGENT.into());
        }
        args.push(url.to_string());
        args
    }
}

/// yt-dlp prints the title first and the final path last.
fn parse_print_output(stdout: &str) -> Option<(String, PathBuf)> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let title = lines.next()?.to_string();
    let path = lines.last()?;
    Some((title, PathBuf::from(path)))
}

pub fn shorten_title(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE_CHARS {
        return title.to_string();
    }
    let head: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
    format!("{head}...")
}

#[async_trait]
impl MediaFetcher for YtDlp {
    #[instrument(skip(self, platform), fields(platform = platform.name()))]
    async fn fetch(
        &self,
        url: &str,
        platform: Platform,
        quality: Quality,
        user_id: i64,
    ) -> Result<FetchedMedia, MediaError> {
        let job_dir = self.download_dir.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&job_dir)
            .await
            .map_err(|e| MediaError::Failed(format!("cannot create {}: {e}", job_dir.display())))?;
        let template = job_dir.join(format!("{user_id}_%(title)s.%(ext)s"));
        let args = self.build_args(url, platform, quality, &template);
        debug!(bin = %self.settings.ytdlp_bin, ?args, "running yt-dlp");

        let limit = Duration::from_secs(self.settings.timeout_secs);
        let run = Command::new(&self.settings.ytdlp_bin)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(limit, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                let _ = tokio::fs::remove_dir_all(&job_dir).await;
                return Err(MediaError::Spawn {
                    bin: self.settings.ytdlp_bin.clone(),
                    source,
                });
            }
            Err(_) => {
                let _ = tokio::fs::remove_dir_all(&job_dir).await;
                return Err(MediaError::Timeout(limit));
            }
        };

        if !output.status.success() {
            let _ = tokio::fs::remove_dir_all(&job_dir).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("yt-dlp exited with an error");
            warn!(status = %output.status, %stderr, "yt-dlp failed");
            return Err(MediaError::Failed(last.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some((title, path)) = parse_print_output(&stdout) else {
            let _ = tokio::fs::remove_dir_all(&job_dir).await;
            return Err(MediaError::MissingOutput);
        };
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let _ = tokio::fs::remove_dir_all(&job_dir).await;
            return Err(MediaError::MissingOutput);
        }

        info!(path = %path.display(), "download finished");
        Ok(FetchedMedia {
            path,
            title: shorten_title(&title),
        })
    }
}
