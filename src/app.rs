// Console driver
// Reads line commands from stdin and turns them into session commands.
// Searches and assistant requests run here so the session loop never waits
// on them; their results come back as numbered lists / session commands.

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use discovery_player::assistant::AssistantClient;
use discovery_player::catalog::audius::AudiusCatalog;
use discovery_player::catalog::youtube::YouTubeCatalog;
use discovery_player::catalog::{local, merge_into_pool};
use discovery_player::config::Config;
use discovery_player::firestore::FirestoreClient;
use discovery_player::genre::GenreProfile;
use discovery_player::memory::ListeningMemory;
use discovery_player::session::Command;
use discovery_player::store::{self, KeyValueStore, KEY_YT_RESULTS};
use discovery_player::track::Track;

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Search(String),
    Play(usize),
    Queue(usize),
    Next,
    Previous,
    Toggle,
    Pause,
    Resume,
    Seek(f64),
    Volume(u32),
    Remove(String),
    Move(usize, isize),
    Clear,
    Say(String),
    Top,
    Downvote(String),
    Blacklist(String),
    Login(String),
    Logout,
    Visible,
    Status,
    Help,
    Quit,
}

const HELP: &str = "\
commands:
  search <text>        find tracks (numbered results)
  play <n> | queue <n> play or queue result n
  next | prev | p      skip, go back, play/pause
  pause | resume
  seek <0-100>         jump to a percentage of the track
  vol <0-100>
  rm <id> | mv <i> up|down | clear
  say <text>           ask the assistant
  top                  favourite artists and genres
  downvote <artist> | blacklist <artist>
  login <uid> | logout
  status | visible | help | quit";

// Unknown or malformed lines are None
pub fn parse_line(line: &str) -> Option<Input> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    let text = || (!rest.is_empty()).then(|| rest.to_string());

    let input = match word.to_lowercase().as_str() {
        "search" | "s" => Input::Search(text()?),
        "play" => Input::Play(rest.parse().ok()?),
        "queue" | "q" => Input::Queue(rest.parse().ok()?),
        "next" | "n" => Input::Next,
        "prev" | "previous" => Input::Previous,
        "p" | "toggle" => Input::Toggle,
        "pause" => Input::Pause,
        "resume" => Input::Resume,
        "seek" => Input::Seek(rest.parse::<f64>().ok()? / 100.0),
        "vol" | "volume" => Input::Volume(rest.parse().ok()?),
        "rm" | "remove" => Input::Remove(text()?),
        "mv" | "move" => {
            let (index, direction) = rest.split_once(char::is_whitespace)?;
            let direction = match direction.trim() {
                "up" => -1,
                "down" => 1,
                _ => return None,
            };
            Input::Move(index.parse().ok()?, direction)
        }
        "clear" => Input::Clear,
        "say" => Input::Say(text()?),
        "top" => Input::Top,
        "downvote" => Input::Downvote(text()?),
        "blacklist" => Input::Blacklist(text()?),
        "login" => Input::Login(text()?),
        "logout" => Input::Logout,
        "visible" => Input::Visible,
        "status" => Input::Status,
        "help" | "?" => Input::Help,
        "quit" | "exit" => Input::Quit,
        _ => return None,
    };
    Some(input)
}

pub struct Catalogs {
    pub youtube: Option<Arc<YouTubeCatalog>>,
    pub audius: Arc<AudiusCatalog>,
    pub songs: Option<Arc<FirestoreClient>>,
    pub assistant: Option<Arc<AssistantClient>>,
}

// Loads every startup catalog in the background and hands the merged pool
// to the session. A failing source is skipped.
pub fn load_pool(config: &Config, catalogs: &Catalogs, commands: mpsc::Sender<Command>) {
    let catalog_path = config.catalog_path.clone();
    let trending_limit = config.trending_limit;
    let audius = catalogs.audius.clone();
    let songs = catalogs.songs.clone();

    tokio::spawn(async move {
        let mut pool: Vec<Track> = Vec::new();

        if let Some(path) = catalog_path {
            match local::load_catalog(&path).await {
                Ok(tracks) => {
                    merge_into_pool(&mut pool, tracks);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "local catalog unavailable"),
            }
        }

        if let Some(songs) = songs {
            match songs.songs().await {
                Ok(tracks) => {
                    merge_into_pool(&mut pool, tracks);
                }
                Err(e) => warn!(error = %e, "songs collection unavailable"),
            }
        }

        match audius.trending(trending_limit).await {
            Ok(tracks) => {
                merge_into_pool(&mut pool, tracks);
            }
            Err(e) => warn!(error = %e, "Audius trending unavailable"),
        }

        info!(tracks = pool.len(), "catalog pool ready");
        let _ = commands.send(Command::AddToPool(pool)).await;
    });
}

pub struct ConsoleApp {
    commands: mpsc::Sender<Command>,
    catalogs: Catalogs,
    store: Arc<dyn KeyValueStore>,
    memory: ListeningMemory,
    genre: GenreProfile,
    results: Vec<Track>,
}

impl ConsoleApp {
    pub fn new(commands: mpsc::Sender<Command>, catalogs: Catalogs, store: Arc<dyn KeyValueStore>) -> Self {
        ConsoleApp {
            commands,
            catalogs,
            memory: ListeningMemory::new(store.clone()),
            genre: GenreProfile::new(store.clone()),
            results: store::load_or_default(store.as_ref(), KEY_YT_RESULTS),
            store,
        }
    }

    // Reads stdin until EOF or `quit`, then asks the session to shut down
    pub async fn run(mut self) -> Result<()> {
        println!("{}", HELP);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let Some(input) = parse_line(&line) else {
                println!("unknown command, try `help`");
                continue;
            };
            if input == Input::Quit {
                break;
            }
            if !self.handle(input).await {
                break;
            }
        }

        let _ = self.commands.send(Command::Shutdown).await;
        Ok(())
    }

    // false once the session is gone
    async fn send(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    async fn handle(&mut self, input: Input) -> bool {
        match input {
            Input::Search(query) => {
                self.search(&query).await;
                true
            }
            Input::Play(n) | Input::Queue(n) => {
                let enqueue_only = matches!(input, Input::Queue(_));
                let Some(track) = n.checked_sub(1).and_then(|i| self.results.get(i)) else {
                    println!("no result #{}", n);
                    return true;
                };
                let record = serde_json::to_value(track).unwrap_or(Value::Null);
                self.send(Command::Select {
                    record,
                    enqueue_only,
                })
                .await
            }
            Input::Next => self.send(Command::Next).await,
            Input::Previous => self.send(Command::Previous).await,
            Input::Toggle => self.send(Command::PlayPause).await,
            Input::Pause => self.send(Command::Pause).await,
            Input::Resume => self.send(Command::Resume).await,
            Input::Seek(fraction) => self.send(Command::Seek(fraction)).await,
            Input::Volume(v) => self.send(Command::Volume(v)).await,
            Input::Remove(id) => self.send(Command::Remove(id)).await,
            Input::Move(index, direction) => self.send(Command::Move { index, direction }).await,
            Input::Clear => self.send(Command::ClearQueue).await,
            Input::Say(text) => self.ask(&text).await,
            Input::Top => {
                self.print_interests();
                true
            }
            Input::Downvote(artist) => self.send(Command::Downvote(artist)).await,
            Input::Blacklist(artist) => self.send(Command::Blacklist(artist)).await,
            Input::Login(uid) => self.send(Command::SignIn(uid)).await,
            Input::Logout => self.send(Command::SignOut).await,
            Input::Visible => self.send(Command::VisibilityRestored).await,
            Input::Status => self.print_status().await,
            Input::Help => {
                println!("{}", HELP);
                true
            }
            Input::Quit => false,
        }
    }

    async fn search(&mut self, query: &str) {
        let mut results: Vec<Track> = Vec::new();

        if let Some(youtube) = &self.catalogs.youtube {
            match youtube.search(query).await {
                Ok(tracks) => {
                    store::save(self.store.as_ref(), KEY_YT_RESULTS, &tracks);
                    merge_into_pool(&mut results, tracks);
                }
                Err(e) => warn!(error = %e, "YouTube search failed"),
            }
        }
        match self.catalogs.audius.search(query).await {
            Ok(tracks) => {
                merge_into_pool(&mut results, tracks);
            }
            Err(e) => warn!(error = %e, "Audius search failed"),
        }

        if results.is_empty() {
            println!("no results for \"{}\"", query);
        }
        for (i, track) in results.iter().enumerate() {
            println!("{:>3}. {} - {} [{}]", i + 1, track.artist, track.title, track.category);
        }

        self.results = results.clone();
        let _ = self.commands.send(Command::AddToPool(results)).await;
    }

    async fn ask(&self, text: &str) -> bool {
        let Some(assistant) = &self.catalogs.assistant else {
            println!("assistant not configured (MELO_API)");
            return true;
        };
        match assistant.send(text).await {
            Ok(reply) => {
                if let Some(spoken) = &reply.reply {
                    println!("assistant: {}", spoken);
                }
                self.send(Command::Assistant(reply)).await
            }
            Err(e) => {
                warn!(error = %e, "assistant request failed");
                true
            }
        }
    }

    fn print_interests(&self) {
        println!("artists:");
        for interest in self.memory.top_interests(5) {
            println!("  {:<24} {}", interest.artist, interest.score);
        }
        println!("genres:");
        for (genre, score) in self.genre.ranked(5) {
            println!("  {:<24} {}", genre, score);
        }
    }

    async fn print_status(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::Snapshot(tx)).await {
            return false;
        }
        let Ok(snapshot) = rx.await else {
            return false;
        };

        println!("user: {}", snapshot.user.as_deref().unwrap_or("(signed out)"));
        match &snapshot.current {
            Some(t) => println!(
                "{} {} - {}",
                if snapshot.is_playing { "▶" } else { "⏸" },
                t.artist,
                t.title
            ),
            None => println!("nothing selected"),
        }
        for (i, t) in snapshot.explicit.iter().enumerate() {
            println!("  {}. {} - {} ({})", i, t.artist, t.title, t.id);
        }
        println!(
            "autoplay: {} | next up: {} | history: {} | pool: {}",
            snapshot.autoplay.len(),
            snapshot.next_up,
            snapshot.history,
            snapshot.pool
        );
        true
    }
}
