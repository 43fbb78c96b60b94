//! Recording lifecycle
//!
//! A recording is produced by one of two strategies, chosen once from its
//! properties when it starts:
//! - `ExternalProcessRecorder` launches a recorder process that captures the
//!   session layout into an mp4 file (recordings with video)
//! - `CompositeRecorder` mixes the participants' streams in process
//!   (audio-only recordings)
//!
//! `RecordingService` orchestrates both and keeps the registry of recordings.

pub mod composition;
pub mod entity;
pub mod external;
pub mod handles;
pub mod layout;
pub mod metadata;
pub mod registry;
pub mod service;
pub mod strategy;

pub use composition::CompositeRecorder;
pub use entity::{
    Recording, RecordingLayout, RecordingProperties, RecordingStatus, RecordingStrategyKind,
};
pub use external::{ExternalProcessRecorder, RecoveryOutcome};
pub use handles::HandleMap;
pub use metadata::ArtifactInfo;
pub use registry::RecordingRegistry;
pub use service::RecordingService;
pub use strategy::{RecorderContext, RecordingStrategy};
