use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};
use zoonote_live::config::AudioConfig;
use zoonote_live::{
    Config, MicrophoneBackend, SessionConfig, SessionStatus, StreamingSessionController,
};

#[derive(Parser, Debug)]
#[command(
    name = "zoonote-live",
    about = "Live transcription session for animal-care voice notes"
)]
struct Args {
    /// Recognition service base URL
    #[arg(long, default_value = "ws://localhost:8000")]
    url: String,

    /// Language code
    #[arg(long, default_value = "ru")]
    lang: String,

    /// Recording duration in seconds (0 = run until Ctrl-C)
    #[arg(long, default_value_t = 0)]
    duration: u64,

    /// Input device name substring (default device when omitted)
    #[arg(long)]
    device: Option<String>,

    /// Config file path; overrides the url/lang flags when present
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let (url, lang, audio) = match &args.config {
        Some(path) => {
            let cfg = Config::load(path)?;
            info!("Loaded config: {}", cfg.service.name);
            (cfg.engine.url, cfg.engine.language, cfg.audio)
        }
        None => (
            args.url.clone(),
            args.lang.clone(),
            AudioConfig {
                device: args.device.clone(),
                ..AudioConfig::default()
            },
        ),
    };

    let controller = StreamingSessionController::new(
        SessionConfig {
            engine_url: url,
            ..SessionConfig::default()
        },
        Box::new(MicrophoneBackend::new(audio)),
    );

    controller.start(&lang).await?;
    info!("Recording... press Ctrl-C to stop");

    let deadline = async {
        if args.duration > 0 {
            sleep(Duration::from_secs(args.duration)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(deadline);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut shown = String::new();
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = &mut deadline => {
                info!("Recording duration reached");
                break;
            }
            _ = sleep(Duration::from_millis(300)) => {
                let doc = controller.document().await;
                let text = doc.display_text();
                if text != shown {
                    println!("{}", text);
                    shown = text;
                }
                if controller.status().await == SessionStatus::Failed {
                    warn!(
                        "Session failed: {}",
                        doc.last_error.as_deref().unwrap_or("unknown error")
                    );
                    break;
                }
            }
        }
    }

    controller.stop().await?;

    let doc = controller.document().await;
    let stats = controller.stats().await;

    println!("--- transcript ---");
    println!("{}", doc.committed);
    if !doc.entities.is_empty() {
        println!("--- entities ---");
        for (category, value) in &doc.entities {
            println!("{}: {}", category, value);
        }
    }
    info!(
        "Frames sent: {}, dropped: {}, events received: {}",
        stats.frames_sent, stats.frames_dropped, stats.events_received
    );

    Ok(())
}
