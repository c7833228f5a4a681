use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voice_iat::config::DEFAULT_CONFIG_PATH;
use voice_iat::{
    build_authorization, connection_url, AudioBackendConfig, AudioBackendFactory, AudioFile,
    AudioSource, Config, FileTranscriber, SessionEvent, VoiceSession, WsConnector,
};

#[derive(Parser)]
#[command(name = "voice-iat")]
#[command(about = "Streaming speech recognition client", long_about = None)]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream audio and print transcripts as they arrive
    Listen {
        /// Replay a WAV file instead of the microphone
        #[arg(long)]
        wav: Option<String>,

        /// Stop after this many seconds (Ctrl-C stops early)
        #[arg(short, long)]
        seconds: Option<u64>,
    },
    /// Print a signed connection URL
    Sign,
    /// Upload a WAV file and wait for its transcript
    Transcribe {
        /// WAV file to transcribe
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    match cli.command {
        Commands::Listen { wav, seconds } => listen(&cfg, wav, seconds).await,
        Commands::Sign => sign(&cfg),
        Commands::Transcribe { file } => transcribe(&cfg, &file).await,
    }
}

async fn listen(cfg: &Config, wav: Option<String>, seconds: Option<u64>) -> Result<()> {
    let session_config = cfg.session_config()?;
    let source = match wav {
        Some(path) => AudioSource::File(path),
        None => AudioSource::Microphone,
    };
    let backend = AudioBackendFactory::create(source, AudioBackendConfig::default())?;

    let mut session = VoiceSession::new(session_config, Arc::new(WsConnector), backend);
    let (tx, mut events) = mpsc::unbounded_channel();
    session.start(tx)?;

    let limit = async {
        match seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(limit);

    let mut stop_sent = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Result(text)) => println!("… {}", text),
                Some(SessionEvent::Warning(w)) => warn!("{}", w),
                Some(SessionEvent::End(text)) => {
                    println!("{}", text);
                    break;
                }
                Some(SessionEvent::Error(e)) => {
                    session.closed().await;
                    return Err(e.into());
                }
                None => break,
            },
            _ = &mut limit, if !stop_sent => {
                info!("Time limit reached, stopping");
                session.stop();
                stop_sent = true;
            }
            res = tokio::signal::ctrl_c(), if !stop_sent => {
                res.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted, stopping");
                session.stop();
                stop_sent = true;
            }
        }
    }

    if let Some(stats) = session.closed().await {
        info!(
            "Sent {} frames ({} bytes), received {} messages",
            stats.frames_sent, stats.audio_bytes_sent, stats.messages_received
        );
    }
    Ok(())
}

fn sign(cfg: &Config) -> Result<()> {
    let credentials = cfg.validate_credentials()?;
    let auth = build_authorization(
        &cfg.endpoint.host,
        &cfg.endpoint.path,
        &credentials.api_key,
        &credentials.api_secret,
    )?;
    println!("{}", connection_url(&cfg.endpoint.host, &cfg.endpoint.path, &auth));
    Ok(())
}

async fn transcribe(cfg: &Config, path: &str) -> Result<()> {
    let transcriber = FileTranscriber::new(cfg.transfer_config()?)?;
    let audio = AudioFile::open(path).with_context(|| format!("Failed to open {}", path))?;
    info!(
        "Transcribing {} ({:.1}s, {} Hz, {} ch)",
        path, audio.duration_seconds, audio.sample_rate, audio.channels
    );

    let text = transcriber
        .transcribe(&audio.mono_samples(), audio.sample_rate)
        .await?;
    println!("{}", text);
    Ok(())
}
