pub mod frame;
pub mod mixer;
pub mod wav;

pub use frame::AudioFrame;
pub use mixer::{MixerConfig, StreamMixer};
pub use wav::WavTrackWriter;
