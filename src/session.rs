// ==========================================
// PLAYBACK SESSION
// ==========================================
// The orchestrator. Owns every piece of playback state:
// - explicit + autoplay queues, play history, session played set
// - the current selection and the "is playing" flag
// - the related-videos list prefetched for the current video ("next up")
// - the known-track pool used for autoplay
//
// Everything runs on one task. Slow work (source fetches, related lookups,
// autoplay generation, profile writes) is spawned and reports back through
// an internal channel as an `Event`. Each selection bumps `generation`;
// results tagged with an older generation are dropped on arrival.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::assistant::{AssistantAction, AssistantClient, AssistantReply};
use crate::autoplay::{CandidateGenerator, CandidateRequest};
use crate::catalog::{merge_into_pool, RelatedSource};
use crate::error::PlaybackError;
use crate::genre::{GenreProfile, InterestAction, FALLBACK_GENRE};
use crate::memory::ListeningMemory;
use crate::player::controller::{PlayerController, Slot};
use crate::player::history::PlayHistory;
use crate::player::queue::{AdvanceGate, NextSource, QueueManager};
use crate::player::{LoadedSource, SourceLoader};
use crate::profile::{Preferences, ProfileStore, RecentPlay};
use crate::store::{self, KeyValueStore, KEY_PLAYED_YT, KEY_RECENT_PLAYED};
use crate::track::Track;

pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
pub const RECENT_PLAYED_CAP: usize = 10;

// ==========================================
// OUTCOMES
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    // Playback needs a signed-in user; nothing changed
    AuthRequired,
    Queued,
    // Enqueue of an id already queued (or without an id)
    Ignored,
    // Fetching in the background; shown as playing until it fails
    Playing,
    // Selected, but there is no backend that can play it
    PlaybackBlocked,
    // No usable source (bad video id, empty audio URL)
    InvalidSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    // Another advance is in flight or cooling down
    Rejected,
    Started(SelectOutcome),
    // Queues empty; autoplay candidates are being generated
    Generating,
    // Nothing queued and nothing to seed from
    Stopped,
}

// ==========================================
// COMMANDS & EVENTS
// ==========================================

#[derive(Debug)]
pub enum Command {
    Select { record: Value, enqueue_only: bool },
    EnqueueMany(Vec<Value>),
    Next,
    Previous,
    PlayPause,
    Pause,
    Resume,
    Seek(f64),
    Volume(u32),
    Remove(String),
    Move { index: usize, direction: isize },
    ClearQueue,
    Assistant(AssistantReply),
    SignIn(String),
    SignOut,
    AddToPool(Vec<Track>),
    VisibilityRestored,
    Downvote(String),
    Blacklist(String),
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown,
}

// Completions of spawned work
#[derive(Debug)]
pub enum Event {
    Loaded {
        generation: u64,
        slot: Slot,
        result: Result<LoadedSource, PlaybackError>,
    },
    RelatedLoaded { generation: u64, tracks: Vec<Track> },
    AutoplayReady { generation: u64, candidates: Vec<Track> },
    PreferencesLoaded { user: String, preferences: Preferences },
    Done,
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub user: Option<String>,
    pub current: Option<Track>,
    pub is_playing: bool,
    pub explicit: Vec<Track>,
    pub autoplay: Vec<Track>,
    pub next_up: usize,
    pub history: usize,
    pub pool: usize,
}

pub struct Session {
    user: Option<String>,
    preferences: Preferences,
    queue: QueueManager,
    history: PlayHistory,
    played: HashSet<String>,
    current: Option<Track>,
    is_playing: bool,
    next_up: Vec<Track>,
    pool: Vec<Track>,

    controller: PlayerController,
    store: Arc<dyn KeyValueStore>,
    memory: ListeningMemory,
    genre: GenreProfile,
    generator: CandidateGenerator,
    related: Option<Arc<dyn RelatedSource>>,
    profile: Option<Arc<dyn ProfileStore>>,
    assistant: Option<Arc<AssistantClient>>,
    decay_days: u32,

    gate: AdvanceGate,
    generation: u64,
    // Spawned tasks whose Event has not been handled yet
    pending: usize,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl Session {
    pub fn new(controller: PlayerController, store: Arc<dyn KeyValueStore>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Session {
            user: None,
            preferences: Preferences::default(),
            queue: QueueManager::new(),
            history: PlayHistory::default(),
            played: HashSet::new(),
            current: None,
            is_playing: false,
            next_up: Vec::new(),
            pool: Vec::new(),
            controller,
            memory: ListeningMemory::new(store.clone()),
            genre: GenreProfile::new(store.clone()),
            store,
            generator: CandidateGenerator::default(),
            related: None,
            profile: None,
            assistant: None,
            decay_days: 7,
            gate: AdvanceGate::default(),
            generation: 0,
            pending: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn with_related(mut self, related: Arc<dyn RelatedSource>) -> Self {
        self.generator = CandidateGenerator::new(Some(related.clone()));
        self.related = Some(related);
        self
    }

    pub fn with_profile(mut self, profile: Arc<dyn ProfileStore>) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_assistant(mut self, assistant: Arc<AssistantClient>) -> Self {
        self.assistant = Some(assistant);
        self
    }

    pub fn with_decay_days(mut self, days: u32) -> Self {
        self.decay_days = days;
        self
    }

    // ==========================================
    // ACCESSORS
    // ==========================================

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn history(&self) -> &PlayHistory {
        &self.history
    }

    pub fn played(&self) -> &HashSet<String> {
        &self.played
    }

    pub fn next_up(&self) -> &[Track] {
        &self.next_up
    }

    pub fn pool(&self) -> &[Track] {
        &self.pool
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn memory(&self) -> &ListeningMemory {
        &self.memory
    }

    pub fn genre(&self) -> &GenreProfile {
        &self.genre
    }

    pub fn controller(&self) -> &PlayerController {
        &self.controller
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            user: self.user.clone(),
            current: self.current.clone(),
            is_playing: self.is_playing,
            explicit: self.queue.explicit().iter().cloned().collect(),
            autoplay: self.queue.autoplay().iter().cloned().collect(),
            next_up: self.next_up.len(),
            history: self.history.len(),
            pool: self.pool.len(),
        }
    }

    // ==========================================
    // ACCOUNT
    // ==========================================

    // Switching to a different account starts a fresh played set
    pub async fn sign_in(&mut self, uid: &str) {
        if self.user.as_deref() != Some(uid) {
            self.played.clear();
        }
        self.user = Some(uid.to_string());
        info!(user = uid, "signed in");

        if let Some(profile) = self.profile.clone() {
            let user = uid.to_string();
            self.spawn(async move {
                match profile.load_preferences(&user).await {
                    Ok(preferences) => Event::PreferencesLoaded { user, preferences },
                    Err(e) => {
                        warn!(error = %e, "failed to load preferences");
                        Event::Done
                    }
                }
            });
        }

        self.maybe_auto_start().await;
    }

    pub fn sign_out(&mut self) {
        info!(user = ?self.user, "signed out");
        self.user = None;
        self.preferences = Preferences::default();
        self.played.clear();
    }

    // ==========================================
    // SELECTION
    // ==========================================

    pub async fn select_value(&mut self, record: &Value, enqueue_only: bool) -> SelectOutcome {
        self.select_track(Track::normalize(record), enqueue_only).await
    }

    pub async fn select_track(&mut self, track: Track, enqueue_only: bool) -> SelectOutcome {
        if self.user.is_none() && !enqueue_only {
            info!(title = %track.title, "sign in to play");
            return SelectOutcome::AuthRequired;
        }

        if enqueue_only {
            let outcome = if self.queue.enqueue(track) {
                SelectOutcome::Queued
            } else {
                SelectOutcome::Ignored
            };
            self.maybe_auto_start().await;
            return outcome;
        }

        self.start_track(track).await
    }

    // Auth check, then start; used by every internal "play this" path
    async fn play(&mut self, track: Track) -> SelectOutcome {
        if self.user.is_none() {
            return SelectOutcome::AuthRequired;
        }
        self.start_track(track).await
    }

    async fn start_track(&mut self, track: Track) -> SelectOutcome {
        self.generation += 1;
        info!(id = %track.id, title = %track.title, category = %track.category, "selected");

        self.history.push(&track);
        self.played.insert(track.id.clone());
        self.record_listening(&track);
        self.current = Some(track.clone());

        if track.category.is_embedded_video() {
            return self.start_video(&track).await;
        }

        self.next_up.clear();
        if track.audio.is_empty() {
            warn!(id = %track.id, "no audio source");
            self.controller.halt();
            self.is_playing = false;
            return SelectOutcome::InvalidSource;
        }

        let loader = self.controller.begin_native(track.category);
        self.is_playing = true;
        self.spawn_load(loader, Slot::Native, track.audio.clone());
        SelectOutcome::Playing
    }

    async fn start_video(&mut self, track: &Track) -> SelectOutcome {
        let Some(video_id) = track.valid_video_id() else {
            warn!(id = %track.id, video_id = ?track.video_id(), "invalid video id");
            return SelectOutcome::InvalidSource;
        };

        self.next_up.clear();
        self.is_playing = true;
        self.remember_played_video(&video_id);

        if let Some(related) = self.related.clone() {
            let generation = self.generation;
            let vid = video_id.clone();
            self.spawn(async move {
                let tracks = match related.related(&vid).await {
                    Ok(tracks) => tracks,
                    Err(e) => {
                        warn!(video_id = %vid, error = %e, "related prefetch failed");
                        Vec::new()
                    }
                };
                Event::RelatedLoaded { generation, tracks }
            });
        }

        match self.controller.begin_embedded(&video_id) {
            Ok(loader) => {
                self.spawn_load(loader, Slot::Embedded, video_id);
                SelectOutcome::Playing
            }
            Err(e) => {
                warn!(video_id = %video_id, error = %e, "video did not start");
                self.is_playing = false;
                SelectOutcome::PlaybackBlocked
            }
        }
    }

    fn spawn_load(&mut self, loader: Arc<dyn SourceLoader>, slot: Slot, source: String) {
        let generation = self.generation;
        self.spawn(async move {
            let result = loader.fetch(&source).await;
            Event::Loaded {
                generation,
                slot,
                result,
            }
        });
    }

    // Local listening state: memory, decay, listen counts, genre weights,
    // recently played. Then the best-effort profile mirror.
    fn record_listening(&mut self, track: &Track) {
        let now = Utc::now().timestamp_millis();

        self.memory.record_play_at(&track.artist, now);
        self.memory.decay_at(self.decay_days, now);
        self.genre.count_listen(track);
        let (genre, _) = self.genre.update(track, InterestAction::Play);
        self.remember_recent(track, now);

        if let (Some(user), Some(profile)) = (self.user.clone(), self.profile.clone()) {
            let play = RecentPlay::new(track, Some(genre), now);
            self.spawn(async move {
                if let Err(e) = profile.mirror_play(&user, &play).await {
                    warn!(error = %e, "failed to mirror play to profile");
                }
                Event::Done
            });
        }
    }

    // Most recent first, one entry per id
    fn remember_recent(&self, track: &Track, now: i64) {
        let mut recent: Vec<Value> = store::load_or_default(self.store.as_ref(), KEY_RECENT_PLAYED);
        recent.retain(|entry| entry.get("id").and_then(Value::as_str) != Some(track.id.as_str()));

        if let Ok(Value::Object(mut entry)) = serde_json::to_value(track) {
            entry.insert("playedAt".to_string(), Value::from(now));
            recent.insert(0, Value::Object(entry));
        }
        recent.truncate(RECENT_PLAYED_CAP);
        store::save(self.store.as_ref(), KEY_RECENT_PLAYED, &recent);
    }

    fn remember_played_video(&self, video_id: &str) {
        let mut played: Vec<String> = store::load_or_default(self.store.as_ref(), KEY_PLAYED_YT);
        if !played.iter().any(|id| id == video_id) {
            played.push(video_id.to_string());
            store::save(self.store.as_ref(), KEY_PLAYED_YT, &played);
        }
    }

    // ==========================================
    // NAVIGATION
    // ==========================================

    // User skip. Counts as a skip for the genre weights when something
    // was actually playing.
    pub async fn skip(&mut self) -> AdvanceOutcome {
        let skipped = self.current.clone().filter(|_| self.is_playing);
        let outcome = self.next().await;
        if outcome != AdvanceOutcome::Rejected {
            if let Some(track) = skipped {
                self.genre.update(&track, InterestAction::Skip);
            }
        }
        outcome
    }

    pub async fn next(&mut self) -> AdvanceOutcome {
        if !self.gate.try_begin() {
            debug!("advance already in progress");
            return AdvanceOutcome::Rejected;
        }

        match self.queue.take_next(self.current.as_ref()) {
            NextSource::Explicit(track) | NextSource::Autoplay(track) => {
                let outcome = self.play(track).await;
                self.gate.finish();
                AdvanceOutcome::Started(outcome)
            }
            NextSource::Generate(seed) => {
                let request = CandidateRequest {
                    prefetched: self.prefetched_for(&seed),
                    seed: Some(seed),
                    pool: self.pool.clone(),
                    played: self.played.clone(),
                    blocked_artists: self.memory.blacklisted_artists(),
                };
                let generator = self.generator.clone();
                let generation = self.generation;
                self.spawn(async move {
                    let candidates = generator.generate(request).await;
                    Event::AutoplayReady {
                        generation,
                        candidates,
                    }
                });
                AdvanceOutcome::Generating
            }
            NextSource::Idle => {
                self.gate.finish();
                AdvanceOutcome::Stopped
            }
        }
    }

    // The next-up list only describes the video it was fetched for
    fn prefetched_for(&self, seed: &Track) -> Vec<Track> {
        let is_cued = seed.valid_video_id().as_deref() == self.controller.embedded_id()
            && self.current.as_ref().is_some_and(|c| c.id == seed.id);
        if is_cued {
            self.next_up.clone()
        } else {
            Vec::new()
        }
    }

    // Pops the current entry and replays the one before it. With fewer than
    // two entries this is a no-op.
    pub async fn previous(&mut self) -> Option<SelectOutcome> {
        let track = self.history.previous()?;
        let outcome = self.play(track.clone()).await;
        if outcome != SelectOutcome::AuthRequired {
            self.genre.update(&track, InterestAction::Replay);
        }
        Some(outcome)
    }

    // ==========================================
    // QUEUE MUTATIONS
    // ==========================================

    pub async fn enqueue_many(&mut self, records: &[Value]) -> usize {
        let tracks = records.iter().map(Track::normalize).collect();
        let added = self.queue.enqueue_many(tracks);
        self.maybe_auto_start().await;
        added
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.queue.remove(id)
    }

    pub fn move_item(&mut self, index: usize, direction: isize) -> bool {
        self.queue.move_item(index, direction)
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    pub fn add_to_pool(&mut self, tracks: Vec<Track>) -> usize {
        merge_into_pool(&mut self.pool, tracks)
    }

    // Nothing selected yet and something explicitly queued: start it
    async fn maybe_auto_start(&mut self) -> Option<SelectOutcome> {
        if self.user.is_none() || self.current.is_some() || self.queue.explicit().is_empty() {
            return None;
        }
        let track = self.queue.pop_explicit()?;
        info!(id = %track.id, "auto-starting queue head");
        Some(self.start_track(track).await)
    }

    // ==========================================
    // TRANSPORT
    // ==========================================

    // While a fetch is pending only the intent changes; it is applied when
    // the source arrives
    pub fn play_pause(&mut self) -> bool {
        if self.controller.is_loading() {
            self.is_playing = !self.is_playing;
            return self.is_playing;
        }
        if let Some(playing) = self.controller.play_pause() {
            self.is_playing = playing;
        }
        self.is_playing
    }

    pub fn pause(&mut self) {
        self.controller.pause();
        self.is_playing = false;
    }

    pub fn resume(&mut self) {
        if self.current.is_none() {
            return;
        }
        if self.controller.is_loading() {
            self.is_playing = true;
            return;
        }
        match self.controller.resume() {
            Ok(()) => self.is_playing = true,
            Err(e) => {
                warn!(error = %e, "resume refused");
                self.is_playing = false;
            }
        }
    }

    pub fn seek(&mut self, fraction: f64) {
        self.controller.seek(fraction);
    }

    pub fn set_volume(&mut self, volume: u32) {
        self.controller.set_volume(volume.min(100));
    }

    // Downvoting the artist on air also counts against the track's genre
    pub fn downvote(&mut self, artist: &str) {
        self.memory.downvote(artist);
        let key = crate::memory::key_for(artist);
        if let Some(track) = self.current.clone().filter(|t| t.artist_key() == key) {
            self.genre.update(&track, InterestAction::Dislike);
        }
    }

    pub fn blacklist(&mut self, artist: &str) {
        self.memory.blacklist(artist);
    }

    // ==========================================
    // VOICE ASSISTANT
    // ==========================================
    // Returns the spoken reply, if any.
    pub async fn handle_assistant(&mut self, reply: AssistantReply) -> Option<String> {
        let now = Utc::now().timestamp_millis();
        let song = reply.song.as_ref().map(|s| Track::from_assistant(s, now));

        match reply.action {
            AssistantAction::AddToQueue => {
                let tracks: Vec<Track> = match &reply.queue {
                    Some(queue) => queue
                        .iter()
                        .enumerate()
                        .map(|(i, s)| Track::from_assistant(s, now + i as i64))
                        .collect(),
                    None => song.into_iter().collect(),
                };
                let added = self.queue.enqueue_many(tracks);
                debug!(added, "assistant queued tracks");
                self.maybe_auto_start().await;
            }
            AssistantAction::Pause => self.pause(),
            AssistantAction::Resume => self.resume(),
            AssistantAction::Next => {
                self.skip().await;
            }
            AssistantAction::Previous => {
                self.previous().await;
            }
            AssistantAction::Like => {
                if let (Some(track), Some(raw)) = (song, reply.song.clone()) {
                    let (genre, _) = self.genre.update(&track, InterestAction::Like);
                    // a liked track vouches for its artist's genre
                    if genre != FALLBACK_GENRE {
                        self.genre.learn(&track.artist, &genre);
                    }
                    self.send_like(raw);
                }
            }
            AssistantAction::PlayDirect | AssistantAction::Unknown => {
                if let Some(track) = song {
                    if self.current.is_none() {
                        self.queue.enqueue(track);
                        self.maybe_auto_start().await;
                    } else {
                        self.select_track(track, false).await;
                    }
                }
            }
        }

        reply.reply
    }

    fn send_like(&mut self, song: Value) {
        let Some(assistant) = self.assistant.clone() else {
            return;
        };
        let user = self.user.clone().unwrap_or_else(|| "guest".to_string());
        self.spawn(async move {
            if let Err(e) = assistant.like(&user, &song).await {
                warn!(error = %e, "failed to like song");
            }
            Event::Done
        });
    }

    // ==========================================
    // POLLING
    // ==========================================

    // 500 ms tick: publish progress, advance once at end of track
    pub async fn on_tick(&mut self) -> Option<AdvanceOutcome> {
        self.controller.publish_progress();
        if self.controller.poll_ended() {
            info!("track ended");
            return Some(self.next().await);
        }
        None
    }

    // The view came back: catch an end-of-track nobody advanced on
    pub async fn on_visibility_restored(&mut self) -> Option<AdvanceOutcome> {
        if self.controller.missed_native_end() {
            info!("missed end of track while hidden");
            return Some(self.next().await);
        }
        None
    }

    pub fn keep_alive(&mut self) {
        self.controller.keep_alive();
    }

    // ==========================================
    // ASYNC COMPLETIONS
    // ==========================================

    fn spawn<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = Event> + Send + 'static,
    {
        let tx = self.events_tx.clone();
        self.pending += 1;
        tokio::spawn(async move {
            let _ = tx.send(task.await);
        });
    }

    pub async fn handle_event(&mut self, event: Event) {
        self.pending = self.pending.saturating_sub(1);

        match event {
            Event::Loaded {
                generation,
                slot,
                result,
            } => {
                if generation != self.generation {
                    debug!(generation, current = self.generation, "dropping stale load");
                    return;
                }
                if let Err(e) = self.controller.finish_load(slot, result, self.is_playing) {
                    warn!(error = %e, "playback did not start");
                    self.is_playing = false;
                }
            }
            Event::RelatedLoaded { generation, tracks } => {
                if generation != self.generation {
                    debug!(generation, current = self.generation, "dropping stale related list");
                    return;
                }
                debug!(count = tracks.len(), "next-up list ready");
                self.next_up = tracks;
            }
            Event::AutoplayReady {
                generation,
                candidates,
            } => {
                self.gate.finish();
                if generation != self.generation {
                    debug!(generation, current = self.generation, "dropping stale autoplay list");
                    return;
                }

                let mut candidates = candidates.into_iter();
                let Some(first) = candidates.next() else {
                    info!("no autoplay candidates, playback stops");
                    self.controller.pause();
                    self.is_playing = false;
                    return;
                };
                self.queue.set_autoplay(candidates.collect());
                self.play(first).await;
            }
            Event::PreferencesLoaded { user, preferences } => {
                if self.user.as_deref() == Some(user.as_str()) {
                    if preferences.needs_onboarding() {
                        info!(user = %user, "profile has no languages or artists yet");
                    }
                    self.preferences = preferences;
                }
            }
            Event::Done => {}
        }
    }

    // Waits for every spawned task and applies its result
    pub async fn settle(&mut self) {
        while self.pending > 0 {
            match self.events_rx.recv().await {
                Some(event) => self.handle_event(event).await,
                None => break,
            }
        }
    }

    // ==========================================
    // EVENT LOOP
    // ==========================================

    pub async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Select {
                record,
                enqueue_only,
            } => {
                let outcome = self.select_value(&record, enqueue_only).await;
                debug!(?outcome, "select");
            }
            Command::EnqueueMany(records) => {
                self.enqueue_many(&records).await;
            }
            Command::Next => {
                let outcome = self.skip().await;
                debug!(?outcome, "next");
            }
            Command::Previous => {
                if self.previous().await.is_none() {
                    info!("no previous track");
                }
            }
            Command::PlayPause => {
                self.play_pause();
            }
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Seek(fraction) => self.seek(fraction),
            Command::Volume(volume) => self.set_volume(volume),
            Command::Remove(id) => {
                self.remove(&id);
            }
            Command::Move { index, direction } => {
                self.move_item(index, direction);
            }
            Command::ClearQueue => self.clear_queue(),
            Command::Assistant(reply) => {
                if let Some(text) = self.handle_assistant(reply).await {
                    info!(reply = %text, "assistant");
                }
            }
            Command::SignIn(uid) => self.sign_in(&uid).await,
            Command::SignOut => self.sign_out(),
            Command::AddToPool(tracks) => {
                let added = self.add_to_pool(tracks);
                debug!(added, pool = self.pool.len(), "pool updated");
            }
            Command::VisibilityRestored => {
                self.on_visibility_restored().await;
            }
            Command::Downvote(artist) => self.downvote(&artist),
            Command::Blacklist(artist) => self.blacklist(&artist),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    // Runs until Shutdown or until every command sender is gone.
    // The timers live exactly as long as this loop.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut progress = interval(PROGRESS_INTERVAL);
        progress.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut keep_alive = interval(KEEP_ALIVE_INTERVAL);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                _ = progress.tick() => {
                    self.on_tick().await;
                }
                _ = keep_alive.tick() => self.keep_alive(),
            }
        }

        self.controller.clear_embedded();
        self.controller.stop_native();
        info!("session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoplay::tests::FakeRelated;
    use crate::error::CatalogError;
    use crate::player::fake::FakeBackend;
    use crate::player::queue::ADVANCE_COOLDOWN;
    use crate::store::MemoryStore;
    use crate::track::Category;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeProfile {
        plays: Mutex<Vec<(String, RecentPlay)>>,
    }

    #[async_trait]
    impl ProfileStore for FakeProfile {
        async fn load_preferences(&self, _uid: &str) -> Result<Preferences, CatalogError> {
            Ok(Preferences {
                favorite_artists: vec!["Drake".into()],
                selected_languages: vec!["English".into()],
                ..Default::default()
            })
        }

        async fn mirror_play(&self, uid: &str, play: &RecentPlay) -> Result<(), CatalogError> {
            self.plays.lock().unwrap().push((uid.to_string(), play.clone()));
            Ok(())
        }
    }

    struct Harness {
        session: Session,
        native: FakeBackend,
        embedded: FakeBackend,
        store: Arc<MemoryStore>,
    }

    fn harness() -> Harness {
        let native = FakeBackend::default();
        let embedded = FakeBackend::default();
        let store = Arc::new(MemoryStore::new());
        let controller =
            PlayerController::new(Box::new(native.clone()), Some(Box::new(embedded.clone())));
        Harness {
            session: Session::new(controller, store.clone()),
            native,
            embedded,
            store,
        }
    }

    async fn signed_in() -> Harness {
        let mut h = harness();
        h.session.sign_in("u1").await;
        h
    }

    fn local(id: &str) -> Track {
        Track::new(id, id, "artist", &format!("/music/{}.mp3", id), Category::Local)
    }

    fn video(id: &str) -> Track {
        Track::new(
            &format!("yt-{}", id),
            id,
            "channel",
            &format!("https://www.youtube.com/watch?v={}", id),
            Category::YouTube,
        )
    }

    fn ids<'a>(tracks: impl IntoIterator<Item = &'a Track>) -> Vec<&'a str> {
        tracks.into_iter().map(|t| t.id.as_str()).collect()
    }

    #[tokio::test]
    async fn playback_requires_sign_in_but_queueing_does_not() {
        let mut h = harness();

        let outcome = h.session.select_track(local("a"), false).await;
        assert_eq!(outcome, SelectOutcome::AuthRequired);
        assert!(h.session.history().is_empty());
        assert!(h.native.state().loads.is_empty());

        let outcome = h.session.select_track(local("a"), true).await;
        assert_eq!(outcome, SelectOutcome::Queued);
        assert_eq!(h.session.current(), None);
        assert_eq!(ids(h.session.queue().explicit()), vec!["a"]);
    }

    #[tokio::test]
    async fn selecting_a_local_track_plays_and_records() {
        let mut h = signed_in().await;

        let outcome = h
            .session
            .select_value(&json!({ "id": "a", "title": "A", "artist": "Drake", "audio": "/a.mp3" }), false)
            .await;

        assert_eq!(outcome, SelectOutcome::Playing);
        assert!(h.session.is_playing());
        h.session.settle().await;
        assert_eq!(h.native.state().loads, vec!["/a.mp3"]);
        assert!(h.native.state().playing);
        assert!(h.session.played().contains("a"));
        assert_eq!(h.session.history().len(), 1);
        assert_eq!(h.session.memory().record("drake").map(|r| r.score), Some(1));

        let recent: Vec<Value> = store::load_or_default(h.store.as_ref(), KEY_RECENT_PLAYED);
        assert_eq!(recent[0]["id"], "a");
        assert!(recent[0]["playedAt"].is_i64());
    }

    #[tokio::test]
    async fn double_select_keeps_one_history_entry() {
        let mut h = signed_in().await;
        h.session.select_track(local("a"), false).await;
        h.session.select_track(local("a"), false).await;
        assert_eq!(h.session.history().len(), 1);
    }

    #[tokio::test]
    async fn recent_played_is_deduplicated_and_capped() {
        let mut h = signed_in().await;
        for i in 0..12 {
            h.session.select_track(local(&format!("t{}", i)), false).await;
        }
        h.session.select_track(local("t5"), false).await;

        let recent: Vec<Value> = store::load_or_default(h.store.as_ref(), KEY_RECENT_PLAYED);
        assert_eq!(recent.len(), RECENT_PLAYED_CAP);
        assert_eq!(recent[0]["id"], "t5");
        assert_eq!(recent.iter().filter(|e| e["id"] == "t5").count(), 1);
    }

    #[tokio::test]
    async fn explicit_queue_drains_before_autoplay() {
        let mut h = signed_in().await;
        h.session.select_track(local("seed"), false).await;
        h.session.queue.enqueue(local("A"));
        h.session.queue.set_autoplay(vec![local("B")]);

        let outcome = h.session.next().await;
        assert_eq!(outcome, AdvanceOutcome::Started(SelectOutcome::Playing));
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("A"));
        assert_eq!(ids(h.session.queue().autoplay()), vec!["B"]);
    }

    #[tokio::test]
    async fn next_with_nothing_to_play_is_a_no_op() {
        let mut h = signed_in().await;
        assert_eq!(h.session.next().await, AdvanceOutcome::Stopped);
        assert_eq!(h.session.current(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_generation_fills_the_queue_and_blocks_overlap() {
        let mut h = signed_in().await;
        let mut pool = vec![local("seed")];
        pool.extend((1..=4).map(|i| local(&format!("p{}", i))));
        h.session.add_to_pool(pool);
        h.session.select_track(local("seed"), false).await;

        assert_eq!(h.session.next().await, AdvanceOutcome::Generating);
        // end-of-track from the other backend while generation is pending
        assert_eq!(h.session.next().await, AdvanceOutcome::Rejected);

        h.session.settle().await;
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("p1"));
        assert_eq!(ids(h.session.queue().autoplay()), vec!["p2", "p3", "p4"]);

        // still cooling down
        assert_eq!(h.session.next().await, AdvanceOutcome::Rejected);
        tokio::time::advance(ADVANCE_COOLDOWN).await;
        assert_eq!(
            h.session.next().await,
            AdvanceOutcome::Started(SelectOutcome::Playing)
        );
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("p2"));
    }

    #[tokio::test]
    async fn empty_candidates_stop_playback() {
        let mut h = signed_in().await;
        h.session.select_track(local("only"), false).await;

        assert_eq!(h.session.next().await, AdvanceOutcome::Generating);
        h.session.settle().await;
        assert!(!h.session.is_playing());
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("only"));
    }

    #[tokio::test]
    async fn stale_autoplay_results_are_dropped() {
        let mut h = signed_in().await;
        h.session.add_to_pool(vec![local("p1")]);
        h.session.select_track(local("seed"), false).await;

        assert_eq!(h.session.next().await, AdvanceOutcome::Generating);
        h.session.select_track(local("manual"), false).await;
        h.session.settle().await;

        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("manual"));
        assert!(h.session.queue().autoplay().is_empty());
    }

    #[tokio::test]
    async fn video_selection_cues_the_embedded_player() {
        let related = Arc::new(FakeRelated::new(vec![video("aaaaaaaaaaa"), video("bbbbbbbbbbb")]));
        let mut h = harness();
        h.session = h.session.with_related(related.clone());
        h.session.sign_in("u1").await;
        h.native.state().playing = true;

        let outcome = h.session.select_track(video("dQw4w9WgXcQ"), false).await;
        assert_eq!(outcome, SelectOutcome::Playing);
        assert!(!h.native.state().playing);
        assert_eq!(h.session.controller().embedded_id(), Some("dQw4w9WgXcQ"));

        h.session.settle().await;
        assert_eq!(h.embedded.state().loads, vec!["dQw4w9WgXcQ"]);
        assert!(h.embedded.state().playing);
        assert_eq!(h.session.next_up().len(), 2);

        let played: Vec<String> = store::load_or_default(h.store.as_ref(), KEY_PLAYED_YT);
        assert_eq!(played, vec!["dQw4w9WgXcQ"]);

        // autoplay reuses the prefetched list; the only new lookup is the
        // prefetch for the video it went on to cue
        assert_eq!(h.session.next().await, AdvanceOutcome::Generating);
        h.session.settle().await;
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("yt-aaaaaaaaaaa"));
        assert_eq!(*related.calls.lock().unwrap(), vec!["dQw4w9WgXcQ", "aaaaaaaaaaa"]);
    }

    #[tokio::test]
    async fn stale_related_list_is_dropped() {
        let related = Arc::new(FakeRelated::new(vec![video("aaaaaaaaaaa")]));
        let mut h = harness();
        h.session = h.session.with_related(related);
        h.session.sign_in("u1").await;

        h.session.select_track(video("dQw4w9WgXcQ"), false).await;
        h.session.select_track(local("a"), false).await;
        h.session.settle().await;
        assert!(h.session.next_up().is_empty());
    }

    #[tokio::test]
    async fn invalid_video_id_aborts_without_touching_native() {
        let mut h = signed_in().await;
        h.session.select_track(local("a"), false).await;
        h.session.settle().await;

        let mut bad = video("short");
        bad.audio = String::new();
        let outcome = h.session.select_track(bad, false).await;

        assert_eq!(outcome, SelectOutcome::InvalidSource);
        assert!(h.native.state().playing);
        assert!(h.embedded.state().loads.is_empty());
    }

    #[tokio::test]
    async fn refused_play_is_reported_as_blocked() {
        let mut h = signed_in().await;
        h.native.state().refuse_play = true;

        let outcome = h.session.select_track(local("a"), false).await;
        assert_eq!(outcome, SelectOutcome::Playing);
        h.session.settle().await;
        assert!(!h.session.is_playing());
        assert_eq!(h.native.state().loads, vec!["/music/a.mp3"]);
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("a"));
    }

    #[tokio::test]
    async fn failed_fetch_leaves_nothing_playing() {
        let mut h = signed_in().await;
        h.native.state().fail_load = true;
        assert_eq!(h.session.select_track(local("a"), false).await, SelectOutcome::Playing);
        h.session.settle().await;
        assert!(!h.session.is_playing());
        assert!(h.native.state().loads.is_empty());
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("a"));

        h.embedded.state().fail_load = true;
        assert_eq!(
            h.session.select_track(video("dQw4w9WgXcQ"), false).await,
            SelectOutcome::Playing
        );
        h.session.settle().await;
        assert!(!h.session.is_playing());
        assert!(h.embedded.state().loads.is_empty());
    }

    #[tokio::test]
    async fn empty_audio_silences_a_cued_video() {
        let mut h = signed_in().await;
        h.session.select_track(video("dQw4w9WgXcQ"), false).await;
        h.session.settle().await;
        assert!(h.embedded.state().playing);

        let mut silent = local("silent");
        silent.audio = String::new();
        let outcome = h.session.select_track(silent, false).await;

        assert_eq!(outcome, SelectOutcome::InvalidSource);
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("silent"));
        assert!(!h.session.is_playing());
        assert!(!h.embedded.state().playing);
        assert_eq!(h.session.controller().embedded_id(), None);
        assert_eq!(h.session.controller().active_category(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_fetch_is_never_installed() {
        let mut h = signed_in().await;
        h.native.state().load_delay = Some(Duration::from_secs(5));

        h.session.select_track(local("a"), false).await;
        h.session.select_track(local("b"), false).await;
        h.session.settle().await;

        let native = h.native.state();
        assert_eq!(native.fetches, vec!["/music/a.mp3", "/music/b.mp3"]);
        assert_eq!(native.loads, vec!["/music/b.mp3"]);
        assert!(native.playing);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_during_fetch_holds_the_new_track() {
        let mut h = signed_in().await;
        h.native.state().load_delay = Some(Duration::from_secs(5));

        h.session.select_track(local("a"), false).await;
        h.session.pause();
        h.session.settle().await;

        assert_eq!(h.native.state().loads, vec!["/music/a.mp3"]);
        assert!(!h.native.state().playing);
        assert!(!h.session.is_playing());

        h.session.resume();
        assert!(h.native.state().playing);
        assert!(h.session.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_does_not_hold_up_commands() {
        let mut h = signed_in().await;
        h.native.state().load_delay = Some(Duration::from_secs(30));
        let native = h.native.clone();
        let (commands, rx) = mpsc::channel(8);

        let driver = tokio::spawn(async move {
            commands
                .send(Command::Select {
                    record: json!({ "id": "slow", "audio": "/slow.mp3" }),
                    enqueue_only: false,
                })
                .await
                .unwrap();

            let asked = tokio::time::Instant::now();
            let (tx, reply) = oneshot::channel();
            commands.send(Command::Snapshot(tx)).await.unwrap();
            let snapshot = reply.await.unwrap();
            let waited = asked.elapsed();
            let installed_early = native.state().loads.len();

            tokio::time::sleep(Duration::from_secs(31)).await;
            let installed_late = native.state().loads.clone();
            let playing = native.state().playing;

            commands.send(Command::Shutdown).await.unwrap();
            (snapshot, waited, installed_early, installed_late, playing)
        });

        h.session.run(rx).await;
        let (snapshot, waited, installed_early, installed_late, playing) = driver.await.unwrap();

        assert!(waited < Duration::from_secs(1));
        assert_eq!(snapshot.current.map(|t| t.id), Some("slow".to_string()));
        assert!(snapshot.is_playing);
        assert_eq!(installed_early, 0);
        assert_eq!(installed_late, vec!["/slow.mp3"]);
        assert!(playing);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_ticks_only_while_the_loop_runs() {
        let h = harness();
        let native = h.native.clone();
        let (commands, rx) = mpsc::channel(8);

        let driver = tokio::spawn(async move {
            tokio::time::sleep(KEEP_ALIVE_INTERVAL + Duration::from_secs(1)).await;
            commands.send(Command::Shutdown).await.unwrap();
        });
        h.session.run(rx).await;
        driver.await.unwrap();

        // first tick is immediate, the second lands at 15 s
        let ticks = native.state().keep_alives;
        assert!(ticks >= 2);
        assert!(native.state().stops >= 1);

        tokio::time::sleep(KEEP_ALIVE_INTERVAL * 4).await;
        assert_eq!(native.state().keep_alives, ticks);
    }

    #[tokio::test]
    async fn previous_walks_back_once_per_entry() {
        let mut h = signed_in().await;
        h.session.select_track(local("a"), false).await;
        h.session.select_track(local("b"), false).await;

        assert_eq!(h.session.previous().await, Some(SelectOutcome::Playing));
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("a"));
        assert_eq!(h.session.history().len(), 1);

        assert_eq!(h.session.previous().await, None);
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("a"));
    }

    #[tokio::test]
    async fn downvoting_the_artist_on_air_counts_against_its_genre() {
        let mut h = signed_in().await;
        let track = local("a");
        let genre = h.session.genre().resolve(&track);
        h.session.select_track(track, false).await;

        h.session.downvote(" Artist ");
        h.session.downvote("someone else");

        let weight = h
            .session
            .genre()
            .ranked(10)
            .into_iter()
            .find(|(g, _)| *g == genre)
            .map(|(_, w)| w);
        assert_eq!(weight, Some(2 - 5));
        assert!(h.session.memory().record("artist").is_some());
    }

    #[tokio::test]
    async fn queueing_with_nothing_selected_auto_starts() {
        let mut h = signed_in().await;
        let added = h
            .session
            .enqueue_many(&[json!({ "id": "a", "audio": "/a.mp3" }), json!({ "id": "b", "audio": "/b.mp3" })])
            .await;

        assert_eq!(added, 2);
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("a"));
        assert_eq!(ids(h.session.queue().explicit()), vec!["b"]);

        // something is selected now: enqueue does not interrupt
        h.session.select_track(local("c"), true).await;
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("a"));
    }

    #[tokio::test]
    async fn sign_in_starts_a_queue_built_while_signed_out() {
        let mut h = harness();
        h.session.select_track(local("a"), true).await;
        assert_eq!(h.session.current(), None);

        h.session.sign_in("u1").await;
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn end_of_track_advances_once() {
        let mut h = signed_in().await;
        h.session.select_track(local("a"), false).await;
        h.session.settle().await;
        h.session.queue.enqueue(local("b"));
        h.session.queue.enqueue(local("c"));

        h.native.state().ended = true;
        assert_eq!(
            h.session.on_tick().await,
            Some(AdvanceOutcome::Started(SelectOutcome::Playing))
        );
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("b"));

        // the stale end flag is not read while "b" is still being fetched
        h.native.state().ended = true;
        assert_eq!(h.session.on_tick().await, None);
        h.session.settle().await;

        // new source loaded, a duplicate end signal inside the cooldown
        h.native.state().ended = true;
        assert_eq!(h.session.on_tick().await, Some(AdvanceOutcome::Rejected));
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("b"));
    }

    #[tokio::test]
    async fn visibility_restore_catches_a_missed_end() {
        let mut h = signed_in().await;
        h.session.select_track(local("a"), false).await;
        h.session.settle().await;
        h.session.queue.enqueue(local("b"));

        assert_eq!(h.session.on_visibility_restored().await, None);
        h.native.state().ended = true;
        assert!(h.session.on_visibility_restored().await.is_some());
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("b"));
    }

    #[tokio::test]
    async fn sign_out_resets_the_played_set() {
        let mut h = signed_in().await;
        h.session.select_track(local("a"), false).await;
        assert!(!h.session.played().is_empty());

        h.session.sign_out();
        assert!(h.session.played().is_empty());
        assert_eq!(h.session.user(), None);
    }

    #[tokio::test]
    async fn plays_are_mirrored_and_preferences_loaded() {
        let profile = Arc::new(FakeProfile::default());
        let mut h = harness();
        h.session = h.session.with_profile(profile.clone());
        h.session.sign_in("u1").await;

        h.session
            .select_track(Track::new("a", "God's Plan", "Drake", "/a.mp3", Category::Local), false)
            .await;
        h.session.settle().await;

        let plays = profile.plays.lock().unwrap();
        assert_eq!(plays.len(), 1);
        assert_eq!(plays[0].0, "u1");
        assert_eq!(plays[0].1.genre.as_deref(), Some("Hip-Hop"));
        assert_eq!(h.session.preferences().favorite_artists, vec!["Drake"]);
    }

    fn reply(body: Value) -> AssistantReply {
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn assistant_queue_and_transport_actions() {
        let mut h = signed_in().await;

        let text = h
            .session
            .handle_assistant(reply(json!({
                "reply": "Queued two songs",
                "action": "add_to_queue",
                "queue": [
                    { "title": "One", "audio": "/1.mp3", "category": "Local" },
                    { "title": "Two", "audio": "/2.mp3", "category": "Local" }
                ]
            })))
            .await;
        assert_eq!(text.as_deref(), Some("Queued two songs"));
        // nothing was selected, so the first one started
        assert_eq!(h.session.current().map(|t| t.title.as_str()), Some("One"));
        assert_eq!(h.session.queue().explicit().len(), 1);

        h.session.handle_assistant(reply(json!({ "action": "pause" }))).await;
        assert!(!h.session.is_playing());
        h.session.handle_assistant(reply(json!({ "action": "resume" }))).await;
        assert!(h.session.is_playing());
    }

    #[tokio::test]
    async fn assistant_direct_play_queues_when_idle_and_plays_otherwise() {
        let mut h = signed_in().await;
        let song = json!({ "id": "s1", "title": "S1", "audio": "/s1.mp3", "category": "Local" });

        h.session
            .handle_assistant(reply(json!({ "action": "play_direct", "song": song })))
            .await;
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("s1"));

        h.session
            .handle_assistant(reply(json!({
                "action": "something_new",
                "song": { "id": "s2", "audio": "/s2.mp3", "category": "Local" }
            })))
            .await;
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("s2"));

        h.session.handle_assistant(reply(json!({ "action": "something_new" }))).await;
        assert_eq!(h.session.current().map(|t| t.id.as_str()), Some("s2"));
    }

    #[tokio::test]
    async fn liking_a_track_teaches_its_artist_genre() {
        let mut h = signed_in().await;
        let later = Track::new("n2", "Untitled", "Newband", "/n2.mp3", Category::Local);
        assert_eq!(h.session.genre().resolve(&later), FALLBACK_GENRE);

        h.session
            .handle_assistant(reply(json!({
                "action": "like",
                "song": { "title": "Sad Song", "artist": "Newband", "audio": "/s.mp3" }
            })))
            .await;
        assert_eq!(h.session.genre().resolve(&later), "Sad Vibes");

        // nothing to learn from a fallback genre
        h.session
            .handle_assistant(reply(json!({
                "action": "like",
                "song": { "title": "Untitled", "artist": "Otherband", "audio": "/o.mp3" }
            })))
            .await;
        let other = Track::new("o2", "Other", "Otherband", "/o2.mp3", Category::Local);
        assert_eq!(h.session.genre().resolve(&other), FALLBACK_GENRE);
    }

    #[tokio::test]
    async fn commands_drive_the_session() {
        let mut h = signed_in().await;
        h.session
            .handle_command(Command::Select {
                record: json!({ "id": "a", "audio": "/a.mp3" }),
                enqueue_only: false,
            })
            .await;
        h.session.handle_command(Command::Volume(150)).await;

        let (tx, rx) = oneshot::channel();
        h.session.handle_command(Command::Snapshot(tx)).await;
        let snapshot = rx.await.unwrap();
        assert_eq!(snapshot.user.as_deref(), Some("u1"));
        assert_eq!(snapshot.current.map(|t| t.id), Some("a".to_string()));
        assert!(snapshot.is_playing);
    }
}
