// Audio mixer for combining participant streams
//
// The mixer keeps one buffer per attached publisher stream, aligns them by
// arrival order and mixes the samples together using simple addition with
// clipping. A frame is emitted once every attached stream has data, or once
// the oldest buffered data falls behind the newest by more than the
// configured buffering delay (a silent publisher must not stall the mix).

use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

use super::frame::AudioFrame;

/// Configuration for audio mixer
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Target sample rate for output
    pub sample_rate: u32,
    /// Number of channels in output
    pub channels: u16,
    /// Maximum buffering delay in milliseconds (default: 200ms)
    /// Frames older than this are mixed without waiting for the other streams
    pub max_buffer_delay_ms: u64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            max_buffer_delay_ms: 200,
        }
    }
}

/// Audio mixer that combines any number of publisher streams
pub struct StreamMixer {
    config: MixerConfig,
    /// Buffers for each attached stream, keyed by stream id
    buffers: HashMap<String, VecDeque<AudioFrame>>,
    current_position_ms: u64,
}

impl StreamMixer {
    pub fn new(config: MixerConfig) -> Self {
        info!(
            "Stream mixer initialized: {}Hz, {} channels",
            config.sample_rate, config.channels
        );

        Self {
            config,
            buffers: HashMap::new(),
            current_position_ms: 0,
        }
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    pub fn stream_count(&self) -> usize {
        self.buffers.len()
    }

    /// Start buffering frames for a stream
    pub fn add_stream(&mut self, stream_id: &str) {
        self.buffers.entry(stream_id.to_string()).or_default();
    }

    /// Stop buffering frames for a stream, discarding whatever is still queued
    pub fn remove_stream(&mut self, stream_id: &str) {
        if let Some(buffer) = self.buffers.remove(stream_id) {
            if !buffer.is_empty() {
                debug!(
                    "Discarding {} buffered frames of detached stream {}",
                    buffer.len(),
                    stream_id
                );
            }
        }
    }

    /// Buffer a frame coming from one of the attached streams
    pub fn push(&mut self, stream_id: &str, frame: AudioFrame) {
        // Validate frame format
        if frame.sample_rate != self.config.sample_rate {
            warn!(
                "Frame sample rate mismatch on {}: expected {}, got {}. Dropping frame.",
                stream_id, self.config.sample_rate, frame.sample_rate
            );
            return;
        }

        if frame.channels != self.config.channels {
            warn!(
                "Frame channel count mismatch on {}: expected {}, got {}. Dropping frame.",
                stream_id, self.config.channels, frame.channels
            );
            return;
        }

        match self.buffers.get_mut(stream_id) {
            Some(buffer) => buffer.push_back(frame),
            None => {
                debug!("Skipping frame from unknown stream {}", stream_id);
                return;
            }
        }

        self.cleanup_old_frames();
    }

    /// Mix the next frame if enough data is buffered
    pub fn next_ready(&mut self) -> Result<Option<AudioFrame>> {
        let non_empty = self.buffers.values().filter(|b| !b.is_empty()).count();
        if non_empty == 0 {
            return Ok(None);
        }

        if non_empty == self.buffers.len()
            || self.buffered_span_ms() > self.config.max_buffer_delay_ms
        {
            return self.mix_next_chunk();
        }

        Ok(None)
    }

    /// Mix everything still buffered
    pub fn flush(&mut self) -> Result<Vec<AudioFrame>> {
        let mut mixed_frames = Vec::new();
        while let Some(mixed) = self.mix_next_chunk()? {
            mixed_frames.push(mixed);
        }
        Ok(mixed_frames)
    }

    /// Distance between the oldest and newest buffered frame
    fn buffered_span_ms(&self) -> u64 {
        let fronts = self.buffers.values().filter_map(|b| b.front());
        let backs = self.buffers.values().filter_map(|b| b.back());

        let oldest = fronts.map(|f| f.timestamp_ms).min();
        let newest = backs.map(|f| f.timestamp_ms).max();

        match (oldest, newest) {
            (Some(oldest), Some(newest)) => newest.saturating_sub(oldest),
            _ => 0,
        }
    }

    /// Remove frames that are too old (beyond max buffer delay)
    fn cleanup_old_frames(&mut self) {
        let cutoff_time = self
            .current_position_ms
            .saturating_sub(self.config.max_buffer_delay_ms);

        for (stream_id, buffer) in &mut self.buffers {
            while let Some(frame) = buffer.front() {
                if frame.timestamp_ms < cutoff_time {
                    warn!(
                        "Dropping old frame of {} at {}ms (current position: {}ms)",
                        stream_id, frame.timestamp_ms, self.current_position_ms
                    );
                    buffer.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Pop one frame from every non-empty buffer and mix them
    fn mix_next_chunk(&mut self) -> Result<Option<AudioFrame>> {
        let frames_to_mix: Vec<AudioFrame> = self
            .buffers
            .values_mut()
            .filter_map(|buffer| buffer.pop_front())
            .collect();

        if frames_to_mix.is_empty() {
            return Ok(None);
        }

        let mixed = self.mix_multiple_frames(&frames_to_mix)?;
        self.current_position_ms = self.current_position_ms.max(mixed.timestamp_ms);
        Ok(Some(mixed))
    }

    /// Mix multiple audio frames together by adding their samples
    fn mix_multiple_frames(&self, frames: &[AudioFrame]) -> Result<AudioFrame> {
        if frames.is_empty() {
            anyhow::bail!("Cannot mix zero frames");
        }

        // Use the earliest timestamp
        let timestamp_ms = frames
            .iter()
            .map(|f| f.timestamp_ms)
            .min()
            .unwrap_or(0);

        // Output is as long as the longest frame
        let max_len = frames.iter().map(|f| f.samples.len()).max().unwrap_or(0);
        let mut mixed_samples = Vec::with_capacity(max_len);

        for i in 0..max_len {
            let sum: i32 = frames
                .iter()
                .map(|frame| frame.samples.get(i).copied().unwrap_or(0) as i32)
                .sum();

            // Clip to prevent overflow
            let mixed = sum.clamp(i16::MIN as i32, i16::MAX as i32);
            mixed_samples.push(mixed as i16);
        }

        debug!(
            "Mixed {} frames at {}ms: {} samples total",
            frames.len(),
            timestamp_ms,
            mixed_samples.len()
        );

        Ok(AudioFrame {
            samples: mixed_samples,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            timestamp_ms,
        })
    }
}
