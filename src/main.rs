// Main entry point for the discovery player console
// Wires config, local state, catalogs and both playback backends into one
// session, then hands stdin to the console driver.

mod app;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use discovery_player::assistant::AssistantClient;
use discovery_player::catalog::audius::AudiusCatalog;
use discovery_player::catalog::extractor::YouTubeExtractor;
use discovery_player::catalog::youtube::YouTubeCatalog;
use discovery_player::config::Config;
use discovery_player::firestore::FirestoreClient;
use discovery_player::player::audio::AudioPlayer;
use discovery_player::player::controller::PlayerController;
use discovery_player::player::youtube::YouTubeHandle;
use discovery_player::player::MediaBackend;
use discovery_player::session::{Command, Session};
use discovery_player::store::{FileStore, KeyValueStore};

use app::{Catalogs, ConsoleApp};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they never interleave with command output
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();
    let http = reqwest::Client::new();

    let store: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::open(config.data_dir.clone())
            .with_context(|| format!("opening state directory {}", config.data_dir.display()))?,
    );

    let youtube = config
        .youtube_api_key
        .clone()
        .map(|key| Arc::new(YouTubeCatalog::new(http.clone(), key)));
    if youtube.is_none() {
        warn!("YOUTUBE_API_KEY not set: search and related videos are disabled");
    }
    let songs = config.firestore_project.as_deref().map(|project| {
        Arc::new(FirestoreClient::new(http.clone(), project, config.firestore_token.clone()))
    });
    let assistant = config.assistant_url.as_deref().map(|url| {
        Arc::new(AssistantClient::new(http.clone(), url, config.like_url.clone()))
    });
    let catalogs = Catalogs {
        youtube: youtube.clone(),
        audius: Arc::new(AudiusCatalog::new(http.clone(), &config.audius_api)),
        songs: songs.clone(),
        assistant: assistant.clone(),
    };

    let native: Box<dyn MediaBackend> = Box::new(AudioPlayer::new(http.clone()));
    let embedded: Box<dyn MediaBackend> = Box::new(YouTubeHandle::new(
        YouTubeExtractor::new(config.cache_dir.clone()),
        AudioPlayer::new(http.clone()),
    ));
    let controller = PlayerController::new(native, Some(embedded));

    let mut session = Session::new(controller, store.clone()).with_decay_days(config.decay_days);
    if let Some(youtube) = youtube {
        session = session.with_related(youtube);
    }
    if let Some(songs) = songs {
        session = session.with_profile(songs);
    }
    if let Some(assistant) = assistant {
        session = session.with_assistant(assistant);
    }

    let (commands, command_rx) = mpsc::channel(64);
    if let Some(uid) = config.user_id.clone() {
        commands.send(Command::SignIn(uid)).await?;
    }
    app::load_pool(&config, &catalogs, commands.clone());

    let console = tokio::spawn(ConsoleApp::new(commands, catalogs, store).run());

    info!("session started");
    session.run(command_rx).await;

    console.await??;
    Ok(())
}
