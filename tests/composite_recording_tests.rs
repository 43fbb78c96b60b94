// Integration tests for audio-only recordings mixed in process
//
// These tests verify that the participants' streams are mixed into a WAV
// file, and that the metadata is sealed even when the engine misbehaves.

mod common;

use anyhow::Result;
use common::{
    fast_timeouts, recording_config, Event, FakeRuntime, RecordingNotifier, StuckEngineFactory,
};
use loqa_recording::composite::CompositionEngineFactory;
use loqa_recording::recording::metadata;
use loqa_recording::{
    AudioFrame, Participant, PublisherStream, RecordingError, RecordingProperties,
    RecordingService, RecordingStatus, RecordingStrategyKind, Session, StopReason,
    WavEngineFactory,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn audio_only(name: &str) -> RecordingProperties {
    RecordingProperties {
        name: name.to_string(),
        has_video: false,
        ..Default::default()
    }
}

fn service(
    dir: &TempDir,
    engines: Arc<dyn CompositionEngineFactory>,
    notifier: Arc<RecordingNotifier>,
) -> RecordingService {
    RecordingService::new(
        recording_config(dir.path()),
        fast_timeouts(),
        Arc::new(FakeRuntime::default()),
        engines,
        notifier,
    )
}

fn tone(value: i16, timestamp_ms: u64) -> AudioFrame {
    AudioFrame::new(vec![value; 1600], 16000, 1, timestamp_ms)
}

#[tokio::test]
async fn test_mixes_participants_into_wav() -> Result<()> {
    let dir = TempDir::new()?;
    let notifier = Arc::new(RecordingNotifier::default());
    let service = service(&dir, Arc::new(WavEngineFactory::default()), notifier.clone());

    let alice = PublisherStream::new("str_alice");
    let bob = PublisherStream::new("str_bob");
    let session = Session::new("ses_abc")
        .with_participant(Participant::publisher("alice", alice.clone()))
        .with_participant(Participant::publisher("bob", bob.clone()))
        .with_participant(Participant::subscriber("carol"));

    let recording = service.start_recording(&session, audio_only("podcast")).await?;
    assert_eq!(recording.strategy, RecordingStrategyKind::Composition);
    assert_eq!(recording.status, RecordingStatus::Started);
    assert!(service.has_composite("ses_abc").await);
    assert!(service.recorder_process("ses_abc").await.is_none());

    // Description written at start
    let recording_dir = dir.path().join("ses_abc");
    let description = metadata::description_file(&recording_dir, "ses_abc");
    assert!(description.exists());

    for i in 0..10 {
        alice.publish(tone(100, i * 100));
        bob.publish(tone(200, i * 100));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stopped = service
        .stop_recording(Some(&session), recording, Some(StopReason::LastParticipantLeft))
        .await?;

    assert_eq!(stopped.status, RecordingStatus::Stopped);
    // Both streams cover the same second; late frames may be mixed apart
    assert!(stopped.duration >= 0.99 && stopped.duration <= 2.01);
    assert!(stopped.size > 44);
    assert!(!service.has_composite("ses_abc").await);

    let wav = recording_dir.join("podcast.wav");
    assert_eq!(std::fs::metadata(&wav)?.len(), stopped.size);
    let reader = hound::WavReader::open(&wav)?;
    assert_eq!(reader.spec().sample_rate, 16000);

    let sealed = metadata::read_description(&description).await?;
    assert_eq!(sealed.status, RecordingStatus::Stopped);
    assert_eq!(sealed.size, stopped.size);

    // Streams are detached once the recording stops
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(alice.subscriber_count(), 0);
    assert_eq!(bob.subscriber_count(), 0);

    assert_eq!(
        notifier.events(),
        vec![
            Event::Started("ses_abc".to_string()),
            Event::Stopped("ses_abc".to_string(), StopReason::LastParticipantLeft),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_stop_timeout_still_seals_metadata() -> Result<()> {
    let dir = TempDir::new()?;
    let engines = Arc::new(StuckEngineFactory::default());
    let service = service(&dir, engines.clone(), Arc::new(RecordingNotifier::default()));

    let session = Session::new("ses_abc")
        .with_participant(Participant::publisher("alice", PublisherStream::new("str_alice")));

    let recording = service.start_recording(&session, audio_only("")).await?;
    let stopped = service
        .stop_recording(Some(&session), recording, Some(StopReason::AutomaticStop))
        .await?;

    assert_eq!(stopped.status, RecordingStatus::Failed);
    assert_eq!(stopped.size, 0);
    assert_eq!(stopped.duration, 0.0);

    let engine = &engines.engines()[0];
    assert!(engine.flush_requested());
    assert!(engine.was_detached());
    assert!(!service.has_composite("ses_abc").await);

    let description = metadata::description_file(&dir.path().join("ses_abc"), "ses_abc");
    let sealed = metadata::read_description(&description).await?;
    assert_eq!(sealed.status, RecordingStatus::Failed);

    Ok(())
}

#[tokio::test]
async fn test_attach_failure_releases_engine() -> Result<()> {
    let dir = TempDir::new()?;
    let engines = Arc::new(StuckEngineFactory::failing());
    let service = service(&dir, engines.clone(), Arc::new(RecordingNotifier::default()));

    let session = Session::new("ses_abc")
        .with_participant(Participant::publisher("alice", PublisherStream::new("str_alice")));

    let result = service.start_recording(&session, audio_only("")).await;
    assert!(matches!(result, Err(RecordingError::Composition { .. })));

    assert!(!service.has_composite("ses_abc").await);
    assert!(engines.engines()[0].flush_requested());
    assert_eq!(
        service.recording("ses_abc").await.map(|r| r.status),
        Some(RecordingStatus::Failed)
    );
    assert!(!service.is_recording("ses_abc").await);

    // The description written at start is sealed as failed
    let description = metadata::description_file(&dir.path().join("ses_abc"), "ses_abc");
    let sealed = metadata::read_description(&description).await?;
    assert_eq!(sealed.status, RecordingStatus::Failed);
    assert_eq!(sealed.size, 0);

    Ok(())
}

#[tokio::test]
async fn test_publishers_join_and_leave() -> Result<()> {
    let dir = TempDir::new()?;
    let service = service(
        &dir,
        Arc::new(WavEngineFactory::default()),
        Arc::new(RecordingNotifier::default()),
    );

    let alice = PublisherStream::new("str_alice");
    let session = Session::new("ses_abc")
        .with_participant(Participant::publisher("alice", alice.clone()));

    // Nothing to join before the recording starts
    let bob = PublisherStream::new("str_bob");
    assert!(!service.join_publisher(&session, &bob).await?);

    let recording = service.start_recording(&session, audio_only("")).await?;

    assert!(service.join_publisher(&session, &bob).await?);
    assert_eq!(bob.subscriber_count(), 1);

    assert!(service.leave_publisher("ses_abc", "str_bob").await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(bob.subscriber_count(), 0);
    assert_eq!(alice.subscriber_count(), 1);

    service.stop_recording(Some(&session), recording, None).await?;
    assert!(!service.leave_publisher("ses_abc", "str_alice").await);
    assert!(!service.join_publisher(&session, &bob).await?);

    Ok(())
}

#[tokio::test]
async fn test_stop_without_session_and_twice() -> Result<()> {
    let dir = TempDir::new()?;
    let notifier = Arc::new(RecordingNotifier::default());
    let service = service(&dir, Arc::new(WavEngineFactory::default()), notifier.clone());

    let session = Session::new("ses_abc");
    let recording = service.start_recording(&session, audio_only("")).await?;
    let stale_copy = recording.clone();

    let stopped = service
        .stop_recording(None, recording, Some(StopReason::SessionClosedByServer))
        .await?;
    assert_eq!(stopped.status, RecordingStatus::Stopped);
    assert_eq!(stopped.duration, 0.0);

    let again = service.stop_recording(None, stale_copy, None).await?;
    assert_eq!(again, stopped);
    assert_eq!(notifier.events(), vec![Event::Started("ses_abc".to_string())]);

    Ok(())
}
