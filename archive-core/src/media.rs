use async_trait::async_trait;
use common::{ArchiveError, MediaInfo, MediaKind, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// 媒体信息探测接口
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;
}

/// ffprobe 命令行实现
pub struct FfprobeProbe {
    ffprobe_path: String,
}

impl FfprobeProbe {
    pub fn new() -> Self {
        Self {
            ffprobe_path: "ffprobe".to_string(),
        }
    }

    pub fn with_path(ffprobe_path: String) -> Self {
        Self { ffprobe_path }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        if !path.exists() {
            return Err(ArchiveError::FileNotFound(path.display().to_string()));
        }

        let output = AsyncCommand::new(&self.ffprobe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .output()
            .await
            .map_err(|e| ArchiveError::ProbeFailed {
                path: path.display().to_string(),
                reason: format!("Failed to execute ffprobe: {}", e),
            })?;

        if !output.status.success() {
            return Err(ArchiveError::ProbeFailed {
                path: path.display().to_string(),
                reason: format!("ffprobe exited with {}", output.status),
            });
        }

        let info = parse_ffprobe_json(&output.stdout).map_err(|reason| ArchiveError::ProbeFailed {
            path: path.display().to_string(),
            reason,
        })?;
        debug!("Probed {:?}: {:.2}s", path, info.duration);
        Ok(info)
    }
}

/// 解析 ffprobe JSON 输出
pub fn parse_ffprobe_json(raw: &[u8]) -> std::result::Result<MediaInfo, String> {
    let parsed: FfprobeOutput =
        serde_json::from_slice(raw).map_err(|e| format!("Invalid ffprobe output: {}", e))?;

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    if video.is_none() && audio.is_none() {
        return Err("No audio or video stream".to_string());
    }

    let format_duration = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok());
    let stream_duration = video
        .or(audio)
        .and_then(|s| s.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok());

    let size = parsed
        .format
        .as_ref()
        .and_then(|f| f.size.as_deref())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(MediaInfo {
        duration: format_duration.or(stream_duration).unwrap_or(0.0),
        width: video.and_then(|v| v.width),
        height: video.and_then(|v| v.height),
        fps: video.and_then(|v| v.avg_frame_rate.as_deref()).and_then(parse_frame_rate),
        kind: if video.is_some() { MediaKind::Video } else { MediaKind::Audio },
        size,
    })
}

/// "30000/1001" → 29.97
fn parse_frame_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                None
            } else {
                Some(num / den)
            }
        }
        None => rate.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_output() {
        let raw = br#"{
            "streams": [
                {"codec_type": "video", "width": 1920, "height": 1080, "avg_frame_rate": "60/1"},
                {"codec_type": "audio", "duration": "3600.1"}
            ],
            "format": {"duration": "3600.5", "size": "1048576"}
        }"#;
        let info = parse_ffprobe_json(raw).unwrap();
        assert_eq!(info.duration, 3600.5);
        assert_eq!(info.resolution().as_deref(), Some("1920x1080"));
        assert_eq!(info.fps, Some(60.0));
        assert_eq!(info.kind, MediaKind::Video);
        assert_eq!(info.size, 1048576);
    }

    #[test]
    fn test_parse_audio_only() {
        let raw = br#"{"streams": [{"codec_type": "audio", "duration": "12.0"}], "format": {}}"#;
        let info = parse_ffprobe_json(raw).unwrap();
        assert_eq!(info.kind, MediaKind::Audio);
        assert_eq!(info.duration, 12.0);
    }

    #[test]
    fn test_parse_rejects_streamless() {
        assert!(parse_ffprobe_json(br#"{"streams": []}"#).is_err());
        assert_eq!(parse_frame_rate("0/0"), None);
    }
}
