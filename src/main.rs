use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use room_guard::camera::{CameraManager, CaptureStore};
use room_guard::classifier::{load_trusted_gallery, GalleryClassifier, RemoteFaceEncoder};
use room_guard::config::GuardConfig;
use room_guard::listener::{NoSpeechInput, SpeechInput, SpeechListener};
use room_guard::llm::OllamaResponder;
use room_guard::monitor::{Collaborators, Orchestrator};
use room_guard::notifier::AlertSystem;
use room_guard::registry::IntruderRegistry;
use room_guard::siren::Siren;
use room_guard::stt;
use room_guard::tts::CommandSpeaker;

#[derive(Parser, Debug)]
#[command(name = "room-guard", version, about = "Watch a room, challenge strangers, sound the alarm")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start guarding immediately instead of waiting for the activation phrase
    #[arg(long)]
    skip_activation: bool,

    /// Directory of trusted face images (`name.jpg`, `name_2.jpg`, ...)
    #[arg(long)]
    trusted_faces: Option<PathBuf>,

    /// Face encoder service base URL
    #[arg(long)]
    encoder_url: Option<String>,

    /// Ollama model used for spoken warnings
    #[arg(long)]
    llm_model: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut GuardConfig) {
        if let Some(dir) = &self.trusted_faces {
            config.trusted_faces_dir = dir.clone();
        }
        if let Some(url) = &self.encoder_url {
            config.recognition.encoder_url = url.clone();
        }
        if let Some(model) = &self.llm_model {
            config.llm.model = model.clone();
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let mut config = GuardConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let camera = CameraManager::start(&config.camera).context("Camera unavailable")?;

    let encoder = RemoteFaceEncoder::new(&config.recognition.encoder_url);
    let trusted = load_trusted_gallery(&config.trusted_faces_dir, &encoder)
        .context("Failed to load trusted faces")?;
    if trusted.is_empty() {
        warn!(dir = %config.trusted_faces_dir.display(), "no trusted faces loaded, everyone is a stranger");
    }
    let registry = IntruderRegistry::open(&config.intruder_db_dir).context("Failed to open intruder registry")?;
    let intruders = registry
        .records()
        .iter()
        .map(|r| (r.id.clone(), r.embedding.clone()))
        .collect();
    let classifier = GalleryClassifier::new(Box::new(encoder), trusted, intruders, &config.recognition);

    let input: Arc<dyn SpeechInput> = match stt::create_engine(&config.speech) {
        Ok(engine) => Arc::new(SpeechListener::new(
            engine,
            Duration::from_secs(config.conversation.phrase_limit_secs),
        )),
        Err(e) => {
            if !cli.skip_activation {
                bail!("{:#}; voice activation needs speech recognition (or pass --skip-activation)", e);
            }
            warn!("{:#}; intruder replies will be treated as silence", e);
            Arc::new(NoSpeechInput)
        }
    };

    let parts = Collaborators {
        camera: Box::new(camera),
        classifier: Box::new(classifier),
        speech: Arc::new(CommandSpeaker::new(&config.tts)),
        input,
        responder: Arc::new(OllamaResponder::connect(&config.llm)),
        alarm: Arc::new(Siren::new(&config.siren)),
        notifier: Arc::new(AlertSystem::new(&config.alerts, config.conversation.max_escalation)?),
        registry,
        captures: CaptureStore::new(&config.captures_dir)?,
    };
    let mut guard = Orchestrator::new(&config, parts);

    if !guard.activate(&running, cli.skip_activation) {
        guard.shutdown();
        return Ok(());
    }
    guard.run(&running);
    guard.deactivate();
    Ok(())
}
