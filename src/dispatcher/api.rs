use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

use super::{decode::DecodeWorker, Command, Dispatcher, PlaybackStatus, PlayerState};
use crate::{
    bindings::{Decoder, Fetcher, HttpFetcher, Renderer},
    buffer::BufferManager,
    config::PlayerConfig,
    events::{Event, EventBus},
    loader::ContentLoader,
};

/// Handle controlling a player.
///
/// Every control method returns right away: the order is queued and carried
/// out by the player's task. Observers reflect the state once the order was
/// handled.
///
/// Cloning a `Player` gives another handle on the same player, which stops
/// once every handle is dropped.
#[derive(Clone)]
pub struct Player {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<PlaybackStatus>,
    events: EventBus,
    loader: Arc<ContentLoader>,
    buffer: Arc<BufferManager>,
}

impl Player {
    /// Create a player and start its task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: PlayerConfig,
        fetcher: Arc<dyn Fetcher>,
        decoder: Box<dyn Decoder>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        let loader = Arc::new(ContentLoader::new(
            fetcher,
            config.loader.clone(),
            events.clone(),
        ));
        loader.set_preload_settings(config.preload.enabled, config.preload.min_duration);
        let buffer = Arc::new(BufferManager::new(config.buffer.clone(), events.clone()));

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(PlaybackStatus::default());
        let decoder = DecodeWorker::spawn(decoder, config.decode_pipeline_depth, internal_tx.clone());

        let dispatcher = Dispatcher {
            config,
            state: PlayerState::Inited,
            loader: loader.clone(),
            buffer: buffer.clone(),
            events: events.clone(),
            renderer,
            decoder,
            internal_tx,
            status_tx,
            content: None,
            generation: 0,
            epoch: 0,
            in_flight: Default::default(),
            playback_time: 0.,
            playback_rate: 1.,
            playing: false,
            decoding: false,
            waiting_for_segment: false,
            fetching_enabled: true,
            preloading: false,
            pull_timer: None,
            refresh_timer: None,
            retry_timer: None,
            next_timer_id: 0,
        };
        tokio::spawn(dispatcher.run(commands_rx, internal_rx));
        info!("Player: Created");

        Self {
            commands: commands_tx,
            status: status_rx,
            events,
            loader,
            buffer,
        }
    }

    /// Create a player fetching through plain HTTP(S) requests.
    pub fn with_http(
        config: PlayerConfig,
        decoder: Box<dyn Decoder>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self::new(config, Arc::new(HttpFetcher::new()), decoder, renderer)
    }

    /// Start loading the content whose master or media playlist is at `url`,
    /// replacing the current one if any.
    pub fn load_movie(&self, url: &str) {
        self.send(Command::LoadMovie(url.to_owned()));
    }

    /// Start or resume playback. If nothing is buffered yet, playback starts
    /// as soon as the first segment arrives.
    pub fn play(&self) {
        self.send(Command::Play);
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    /// Stop playback and go back to the beginning of the content, which stays
    /// loaded.
    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    /// Move playback to the segment containing `time`, in seconds.
    pub fn seek(&self, time: f64) {
        self.send(Command::Seek(time));
    }

    /// Rates which are not strictly positive are ignored.
    pub fn set_playback_rate(&self, rate: f64) {
        self.send(Command::SetPlaybackRate(rate));
    }

    pub fn set_preload_settings(&self, enabled: bool, min_duration: f64) {
        self.send(Command::SetPreloadSettings {
            enabled,
            min_duration,
        });
    }

    /// Force the maximum and minimum buffered durations, in seconds, whatever
    /// the type of content.
    pub fn set_buffer_sizes(&self, max: f64, min: f64) {
        self.send(Command::SetBufferSizes { max, min });
    }

    /// Go back to buffer sizes depending on the type of content.
    pub fn release_buffer_sizes(&self) {
        self.send(Command::ReleaseBufferSizes);
    }

    pub fn player_state(&self) -> PlayerState {
        self.status.borrow().state
    }

    pub fn current_playback_time(&self) -> f64 {
        self.status.borrow().current_time
    }

    pub fn is_playing(&self) -> bool {
        self.status.borrow().is_playing
    }

    pub fn playback_rate(&self) -> f64 {
        self.status.borrow().playback_rate
    }

    /// Receiver notified each time the [`PlaybackStatus`] changes.
    pub fn watch_state(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.clone()
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Current bandwidth estimate, in bits per second.
    pub fn current_bandwidth(&self) -> f64 {
        self.loader.current_bandwidth()
    }

    /// Duration, in seconds, ready to be decoded.
    pub fn buffered_duration(&self) -> f64 {
        self.buffer.buffered_duration()
    }

    /// Amount of segments in the loader's cache.
    pub fn cached_segment_count(&self) -> usize {
        self.loader.cached_segment_count()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Player: Controller task is not running anymore");
        }
    }
}
