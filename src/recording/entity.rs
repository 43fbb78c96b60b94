use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Layout the recorder process captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingLayout {
    BestFit,
    PictureInPicture,
    VerticalPresentation,
    HorizontalPresentation,
    Custom,
}

impl RecordingLayout {
    /// Upper snake case name, as sent by clients ("BEST_FIT")
    pub fn name(&self) -> &'static str {
        match self {
            RecordingLayout::BestFit => "BEST_FIT",
            RecordingLayout::PictureInPicture => "PICTURE_IN_PICTURE",
            RecordingLayout::VerticalPresentation => "VERTICAL_PRESENTATION",
            RecordingLayout::HorizontalPresentation => "HORIZONTAL_PRESENTATION",
            RecordingLayout::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for RecordingLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for RecordingLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "BEST_FIT" => Ok(RecordingLayout::BestFit),
            "PICTURE_IN_PICTURE" => Ok(RecordingLayout::PictureInPicture),
            "VERTICAL_PRESENTATION" => Ok(RecordingLayout::VerticalPresentation),
            "HORIZONTAL_PRESENTATION" => Ok(RecordingLayout::HorizontalPresentation),
            "CUSTOM" => Ok(RecordingLayout::Custom),
            other => Err(format!("Unknown recording layout: {}", other)),
        }
    }
}

/// Lifecycle of a recording
///
/// `Starting -> Started -> Stopped`, with `Failed` reachable from any
/// non-final state. `Stopped` and `Failed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Starting,
    Started,
    Stopped,
    Failed,
}

impl RecordingStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, RecordingStatus::Stopped | RecordingStatus::Failed)
    }
}

/// How a recording is produced. Chosen once when the recording starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordingStrategyKind {
    /// A recorder process captures the layout URL into an mp4 file
    ExternalProcess,
    /// The in-process engine mixes the participants' audio into a wav file
    Composition,
}

impl RecordingStrategyKind {
    pub fn for_properties(properties: &RecordingProperties) -> Self {
        if properties.has_video {
            RecordingStrategyKind::ExternalProcess
        } else {
            RecordingStrategyKind::Composition
        }
    }

    /// Extension of the artifact this strategy produces
    pub fn extension(&self) -> &'static str {
        match self {
            RecordingStrategyKind::ExternalProcess => "mp4",
            RecordingStrategyKind::Composition => "wav",
        }
    }
}

/// Configuration requested for a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingProperties {
    /// Display name; empty means "use the recording id"
    pub name: String,
    pub recording_layout: RecordingLayout,
    /// Path of a custom layout, only used with `RecordingLayout::Custom`
    pub custom_layout: String,
    /// "WIDTHxHEIGHT"
    pub resolution: String,
    pub has_audio: bool,
    pub has_video: bool,
}

impl Default for RecordingProperties {
    fn default() -> Self {
        Self {
            name: String::new(),
            recording_layout: RecordingLayout::BestFit,
            custom_layout: String::new(),
            resolution: "1920x1080".to_string(),
            has_audio: true,
            has_video: true,
        }
    }
}

/// A single recording of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub session_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub status: RecordingStatus,
    pub strategy: RecordingStrategyKind,
    /// Properties as requested when the recording started
    pub properties: RecordingProperties,

    // Filled in from the produced artifact when the recording stops
    pub resolution: Option<String>,
    pub has_audio: bool,
    pub has_video: bool,
    /// Size in bytes
    pub size: u64,
    /// Duration in seconds
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Recording {
    pub fn new(
        session_id: impl Into<String>,
        id: impl Into<String>,
        properties: RecordingProperties,
    ) -> Self {
        let strategy = RecordingStrategyKind::for_properties(&properties);
        let resolution = properties.has_video.then(|| properties.resolution.clone());

        Self {
            id: id.into(),
            session_id: session_id.into(),
            created_at: Utc::now(),
            status: RecordingStatus::Starting,
            strategy,
            has_audio: properties.has_audio,
            has_video: properties.has_video,
            resolution,
            properties,
            size: 0,
            duration: 0.0,
            url: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.properties.name
    }

    pub fn layout(&self) -> RecordingLayout {
        self.properties.recording_layout
    }

    pub fn custom_layout(&self) -> &str {
        &self.properties.custom_layout
    }

    /// File name of the produced artifact ("<name>.mp4" or "<name>.wav")
    pub fn artifact_file_name(&self) -> String {
        format!("{}.{}", self.name(), self.strategy.extension())
    }

    /// Mark the recording as failed, whatever state it was in
    pub fn fail(&mut self) {
        self.status = RecordingStatus::Failed;
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
