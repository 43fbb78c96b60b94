use anyhow::Result;
use clap::{Parser, Subcommand};
use loqa_recording::recording::layout;
use loqa_recording::{
    AudioFrame, Config, LocalProcessRuntime, LogNotifier, NatsNotifier, Participant,
    PublisherStream, Recording, RecordingLayout, RecordingProperties, RecordingService, Session,
    SessionNotifier, StopReason, WavEngineFactory,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loqa-recording")]
#[command(about = "Record live media sessions")]
struct Args {
    /// Config file, without extension
    #[arg(short, long, default_value = "config/loqa-recording")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the URL a recorder process captures for a session
    LayoutUrl {
        session_id: String,

        #[arg(short, long, default_value = "BEST_FIT")]
        layout: RecordingLayout,

        /// Custom layout path, with --layout CUSTOM
        #[arg(long, default_value = "")]
        custom_layout: String,
    },

    /// Record a session with synthetic publishers
    Record {
        session_id: String,

        /// Recording name (defaults to the recording id)
        #[arg(short, long, default_value = "")]
        name: String,

        /// Record audio only, mixed in process
        #[arg(long)]
        audio_only: bool,

        /// Record video without audio
        #[arg(long, conflicts_with = "audio_only")]
        no_audio: bool,

        #[arg(long, default_value = "1920x1080")]
        resolution: String,

        /// Seconds to record before stopping
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Number of synthetic publishers in the session
        #[arg(short, long, default_value = "2")]
        publishers: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("Loqa Recording v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match args.command {
        Command::LayoutUrl {
            session_id,
            layout,
            custom_layout,
        } => {
            let session = Session::new(session_id);
            let recording = Recording::new(
                session.session_id.clone(),
                session.short_session_id(),
                RecordingProperties {
                    recording_layout: layout,
                    custom_layout,
                    ..Default::default()
                },
            );
            println!(
                "{}",
                layout::capture_url(&cfg.recording, &recording, session.short_session_id())
            );
            Ok(())
        }
        Command::Record {
            session_id,
            name,
            audio_only,
            no_audio,
            resolution,
            duration,
            publishers,
        } => {
            let properties = RecordingProperties {
                name,
                resolution,
                has_audio: !no_audio,
                has_video: !audio_only,
                ..Default::default()
            };
            record(cfg, session_id, properties, duration, publishers).await
        }
    }
}

async fn record(
    cfg: Config,
    session_id: String,
    properties: RecordingProperties,
    duration: u64,
    publishers: usize,
) -> Result<()> {
    let nats = match &cfg.nats {
        Some(nats) => Some(Arc::new(NatsNotifier::connect(&nats.url).await?)),
        None => None,
    };
    let notifier: Arc<dyn SessionNotifier> = match &nats {
        Some(nats) => nats.clone(),
        None => Arc::new(LogNotifier),
    };

    let service = RecordingService::new(
        cfg.recording.clone(),
        cfg.timeouts.clone(),
        Arc::new(LocalProcessRuntime::new()),
        Arc::new(WavEngineFactory::default()),
        notifier,
    );

    let mut session = Session::new(session_id);
    let streams: Vec<PublisherStream> = (0..publishers)
        .map(|i| PublisherStream::new(format!("str_{}", i)))
        .collect();
    for (i, stream) in streams.iter().enumerate() {
        session = session.with_participant(Participant::publisher(
            format!("participant_{}", i),
            stream.clone(),
        ));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let feeds: Vec<_> = streams
        .iter()
        .enumerate()
        .map(|(i, stream)| {
            tokio::spawn(publish_tone(
                stream.clone(),
                220.0 * (i + 1) as f32,
                shutdown_rx.clone(),
            ))
        })
        .collect();

    let recording = service.start_recording(&session, properties).await?;
    info!(
        "Recording {} started ({:?}), stopping in {} seconds",
        recording.id, recording.strategy, duration
    );

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(duration)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    let result = service
        .stop_recording(Some(&session), recording, Some(StopReason::RecordingStoppedByServer))
        .await;

    let _ = shutdown_tx.send(true);
    for feed in futures::future::join_all(feeds).await {
        if let Err(e) = feed {
            warn!("Publisher task failed: {}", e);
        }
    }

    if let Some(nats) = nats {
        nats.close().await?;
    }

    let recording = result?;
    info!(
        "Recording {} finished with status {:?}: {:.1}s, {} bytes",
        recording.id, recording.status, recording.duration, recording.size
    );
    if let Some(url) = &recording.url {
        info!("Available at {}", url);
    }

    Ok(())
}

/// Publish a sine tone in 100ms frames until shutdown
async fn publish_tone(
    stream: PublisherStream,
    frequency: f32,
    mut shutdown: watch::Receiver<bool>,
) {
    const SAMPLE_RATE: u32 = 16000;
    const FRAME_SAMPLES: usize = 1600;

    let mut interval = tokio::time::interval(Duration::from_millis(100));
    let mut timestamp_ms = 0;
    let mut phase = 0usize;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        let samples = (0..FRAME_SAMPLES)
            .map(|n| {
                let t = (phase + n) as f32 / SAMPLE_RATE as f32;
                ((t * frequency * std::f32::consts::TAU).sin() * 6000.0) as i16
            })
            .collect();
        phase += FRAME_SAMPLES;

        stream.publish(AudioFrame::new(samples, SAMPLE_RATE, 1, timestamp_ms));
        timestamp_ms += 100;
    }
}
