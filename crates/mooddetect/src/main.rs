mod console;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moodconf::MoodConfig;
use serde::Serialize;

use mooddetect::capture::FileCamera;
use mooddetect::inference::HttpExpressionDetector;
use mooddetect::playback::TimedAudioBackend;
use mooddetect::present::track_title;
use mooddetect::tracks::HttpTrackSource;
use mooddetect::{telemetry, FrameDimensions, Mood, SessionOrchestrator, SessionSettings};

/// Detect a mood from the camera and play matching music
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to layer over the discovered ones
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// File standing in for the camera (overrides capture.frame_path)
    #[arg(long, global = true, env = "MOODDETECT_FRAME_PATH")]
    frame: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive session: detect, play, like
    Run,
    /// Run one detection cycle and print the result as JSON
    Detect,
    /// Print the effective configuration and where it came from
    Config,
}

#[derive(Serialize)]
struct DetectOutput {
    mood: Mood,
    tracks: Vec<TrackOutput>,
}

#[derive(Serialize)]
struct TrackOutput {
    number: usize,
    id: String,
    title: String,
    audio_url: Option<String>,
}

fn build_session(config: &MoodConfig) -> Result<SessionOrchestrator> {
    let frame_path = config
        .capture
        .frame_path
        .clone()
        .context("No frame source configured; pass --frame or set capture.frame_path")?;
    let timeout = Duration::from_millis(config.endpoints.timeout_ms);

    let camera = FileCamera::new(
        frame_path,
        FrameDimensions {
            width: config.capture.width,
            height: config.capture.height,
        },
    );
    let detector = HttpExpressionDetector::new(&config.endpoints.inference_url, timeout)?;
    let tracks = HttpTrackSource::new(&config.endpoints.songs_url, timeout)?;
    let audio = TimedAudioBackend::new(timeout)?;

    Ok(SessionOrchestrator::new(
        Arc::new(camera),
        Arc::new(detector),
        Arc::new(tracks),
        Arc::new(audio),
        SessionSettings::from_config(config),
    ))
}

/// Load the model and bring the camera up.
async fn start(session: &SessionOrchestrator) -> Result<()> {
    session
        .initialize()
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.user_message()))
        .context("Failed to initialize session")?;
    let dimensions = session
        .start_capture()
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.user_message()))
        .context("Failed to start capture")?;
    tracing::info!(width = dimensions.width, height = dimensions.height, "session ready");
    Ok(())
}

async fn detect_once(session: &SessionOrchestrator) -> Result<()> {
    start(session).await?;
    let (mood, tracks) = session
        .detect()
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.user_message()))?;

    let output = DetectOutput {
        tracks: tracks
            .iter()
            .map(|t| TrackOutput {
                number: t.display_index + 1,
                id: t.id.to_string(),
                title: track_title(&mood, t),
                audio_url: t.audio_url.clone(),
            })
            .collect(),
        mood,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = MoodConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(frame) = cli.frame {
        config.capture.frame_path = Some(frame);
    }

    if let Command::Config = cli.command {
        for file in &sources.files {
            println!("# loaded {}", file.display());
        }
        for var in &sources.env_overrides {
            println!("# env {}", var);
        }
        print!("{}", config.to_toml());
        return Ok(());
    }

    let _telemetry = telemetry::init(
        config.telemetry.otlp_endpoint.as_deref(),
        &config.telemetry.log_level,
    )
    .context("Failed to initialize telemetry")?;

    let session = build_session(&config)?;

    let result = match cli.command {
        Command::Run => match start(&session).await {
            Ok(()) => console::run(&session).await,
            Err(e) => Err(e),
        },
        Command::Detect => detect_once(&session).await,
        Command::Config => Ok(()),
    };

    session.teardown();
    result
}
