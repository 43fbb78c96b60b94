//! On-disk metadata of a recording
//!
//! Each recording owns a directory under the recordings path holding:
//! - the artifact itself (`<name>.mp4` or `<name>.wav`)
//! - `.recording.<id>`: JSON description, written at start and sealed at stop
//! - `<id>.info`: ffprobe-style report produced by the recorder process,
//!   consumed once when the recording stops

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use super::entity::{Recording, RecordingStatus};

/// Prefix of the description file of every recording
pub const RECORDING_ENTITY_FILE: &str = ".recording.";

/// Path of the description file inside a recording directory
pub fn description_file(recording_dir: &Path, recording_id: &str) -> PathBuf {
    recording_dir.join(format!("{}{}", RECORDING_ENTITY_FILE, recording_id))
}

/// Path of the report written by the recorder process
pub fn info_file(recording_dir: &Path, recording_id: &str) -> PathBuf {
    recording_dir.join(format!("{}.info", recording_id))
}

/// Write the description file of a recording, creating its directory
pub async fn write_description(recording_dir: &Path, recording: &Recording) -> Result<PathBuf> {
    tokio::fs::create_dir_all(recording_dir)
        .await
        .with_context(|| format!("Failed to create recording directory {:?}", recording_dir))?;

    let path = description_file(recording_dir, &recording.id);
    let json = serde_json::to_vec_pretty(recording)?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("Failed to write recording description {:?}", path))?;

    debug!("Wrote recording description {:?}", path);
    Ok(path)
}

/// Read a description file back
pub async fn read_description(path: &Path) -> Result<Recording> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read recording description {:?}", path))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Finalize a recording with the measured size and duration and persist it
///
/// A failed recording stays failed; anything else becomes stopped.
pub async fn seal_description(
    recording_dir: &Path,
    recording: &mut Recording,
    size: u64,
    duration: f64,
) -> Result<PathBuf> {
    recording.size = size;
    recording.duration = if duration > 0.0 { duration } else { 0.0 };
    if recording.status != RecordingStatus::Failed {
        recording.status = RecordingStatus::Stopped;
    }

    let path = write_description(recording_dir, recording).await?;
    info!(
        recording_id = %recording.id,
        size = recording.size,
        duration = recording.duration,
        status = ?recording.status,
        "Sealed recording metadata"
    );
    Ok(path)
}

/// Properties of a produced artifact, as reported by the recorder process
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactInfo {
    pub duration_seconds: f64,
    pub size_bytes: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub has_audio: bool,
    pub has_video: bool,
}

impl ArtifactInfo {
    pub async fn read(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read artifact report {:?}", path))?;
        Self::parse(&bytes).with_context(|| format!("Malformed artifact report {:?}", path))
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let report: ProbeReport = serde_json::from_slice(bytes)?;

        let video = report.streams.iter().find(|s| s.codec_type == "video");
        let has_audio = report.streams.iter().any(|s| s.codec_type == "audio");

        Ok(Self {
            duration_seconds: report.format.duration,
            size_bytes: report.format.size,
            width: video.and_then(|s| s.width),
            height: video.and_then(|s| s.height),
            has_audio,
            has_video: video.is_some(),
        })
    }

    /// "WIDTHxHEIGHT" of the video stream
    pub fn resolution(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Some(format!("{}x{}", width, height)),
            _ => None,
        }
    }

    /// Copy the reported properties into a recording
    pub fn apply_to(&self, recording: &mut Recording) {
        recording.duration = self.duration_seconds;
        recording.size = self.size_bytes;
        recording.resolution = self.resolution();
        recording.has_audio = self.has_audio;
        recording.has_video = self.has_video;
    }
}

#[derive(Debug, Deserialize)]
struct ProbeReport {
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(deserialize_with = "number_or_string")]
    duration: f64,
    #[serde(deserialize_with = "number_or_string")]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
}

// ffprobe writes numbers as strings ("12.480000")
fn number_or_string<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Number(T),
        Text(String),
    }

    match Raw::<T>::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text.trim().parse().map_err(de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingProperties;
    use tempfile::TempDir;

    const PROBE_REPORT: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720},
            {"index": 1, "codec_type": "audio", "codec_name": "aac"}
        ],
        "format": {"filename": "/recordings/ses/ses.mp4", "duration": "12.480000", "size": "204800"}
    }"#;

    #[test]
    fn test_parse_probe_report() {
        let info = ArtifactInfo::parse(PROBE_REPORT.as_bytes()).unwrap();

        assert!((info.duration_seconds - 12.48).abs() < 1e-9);
        assert_eq!(info.size_bytes, 204800);
        assert_eq!(info.resolution().as_deref(), Some("1280x720"));
        assert!(info.has_audio);
        assert!(info.has_video);
    }

    #[test]
    fn test_parse_numeric_fields_and_video_only() {
        let info = ArtifactInfo::parse(
            br#"{"format": {"duration": 3, "size": 1024},
                 "streams": [{"codec_type": "video", "width": 640, "height": 480}]}"#,
        )
        .unwrap();

        assert_eq!(info.duration_seconds, 3.0);
        assert_eq!(info.size_bytes, 1024);
        assert!(!info.has_audio);
        assert!(info.has_video);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ArtifactInfo::parse(b"not json").is_err());
        assert!(ArtifactInfo::parse(br#"{"format": {"duration": "abc", "size": "1"}}"#).is_err());
    }

    #[tokio::test]
    async fn test_seal_keeps_failed_status() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut recording = Recording::new("ses", "ses", RecordingProperties::default());
        recording.fail();

        let path = seal_description(temp_dir.path(), &mut recording, 42, -1.0).await?;
        let sealed = read_description(&path).await?;

        assert_eq!(sealed.status, RecordingStatus::Failed);
        assert_eq!(sealed.size, 42);
        assert_eq!(sealed.duration, 0.0);
        assert_eq!(path, description_file(temp_dir.path(), "ses"));

        Ok(())
    }

    #[tokio::test]
    async fn test_seal_marks_stopped() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut recording = Recording::new("ses", "ses", RecordingProperties::default());
        recording.status = RecordingStatus::Started;

        seal_description(temp_dir.path(), &mut recording, 10, 2.5).await?;
        assert_eq!(recording.status, RecordingStatus::Stopped);
        assert_eq!(recording.duration, 2.5);

        Ok(())
    }
}
