pub mod audio;
pub mod composite;
pub mod config;
pub mod error;
pub mod nats;
pub mod process;
pub mod recording;
pub mod session;

pub use audio::{AudioFrame, MixerConfig, StreamMixer, WavTrackWriter};
pub use composite::{
    AttachOutcome, CompositionEngine, CompositionEngineFactory, EngineError, WavEngineFactory,
};
pub use config::{Config, RecordingConfig, TimeoutConfig};
pub use error::RecordingError;
pub use nats::{NatsNotifier, RecordingEventMessage};
pub use process::{LaunchSpec, LocalProcessRuntime, ProcessHandle, ProcessRuntime, RuntimeError};
pub use recording::{
    Recording, RecordingLayout, RecordingProperties, RecordingService, RecordingStatus,
    RecordingStrategyKind, RecoveryOutcome,
};
pub use session::{LogNotifier, Participant, PublisherStream, Session, SessionNotifier, StopReason};
