use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Command, Dispatcher, InternalEvent, PlaybackStatus, TimerReason};

/// Entry points of the `Dispatcher`: each message received is handled here,
/// then routed to the corresponding core method.
impl Dispatcher {
    /// Handle messages until every `Player` handle is dropped.
    pub(super) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<InternalEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(event) = internal.recv() => self.on_internal_event(event),
            }
            self.publish_status();
        }
        info!("Core: Every handle dropped, shutting down");
        self.shutdown();
    }

    fn on_command(&mut self, command: Command) {
        debug!(?command, "Core: Command received");
        match command {
            Command::LoadMovie(url) => self.load_movie(&url),
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Stop => self.stop(),
            Command::Seek(time) => self.seek(time),
            Command::SetPlaybackRate(rate) => self.set_playback_rate(rate),
            Command::SetPreloadSettings {
                enabled,
                min_duration,
            } => {
                self.config.preload.enabled = enabled;
                self.config.preload.min_duration = min_duration;
                self.loader.set_preload_settings(enabled, min_duration);
            }
            Command::SetBufferSizes { max, min } => {
                self.buffer.set_buffer_sizes(max, min);
                self.schedule_fetches();
            }
            Command::ReleaseBufferSizes => {
                self.buffer.release_buffer_sizes();
                self.schedule_fetches();
            }
        }
    }

    fn on_internal_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::PlaylistLoaded {
                generation,
                purpose,
                url,
                result,
            } => {
                if generation != self.generation {
                    debug!(url = %url, "Core: Ignoring playlist of a previous content");
                    return;
                }
                match result {
                    Ok(playlist) => self.on_playlist_loaded(purpose, url, playlist),
                    Err(err) => self.on_playlist_error(purpose, url, err),
                }
            }
            InternalEvent::SegmentLoaded {
                generation,
                quality,
                index,
                duration,
                result,
            } => {
                if generation != self.generation {
                    debug!(index, "Core: Ignoring segment of a previous content");
                    return;
                }
                self.in_flight.remove(&(quality, index));
                match result {
                    Ok(data) => self.on_segment_loaded(quality, index, data, duration),
                    Err(err) => self.on_segment_error(index, err),
                }
            }
            InternalEvent::PreloadDone { generation, result } => {
                if generation == self.generation {
                    self.on_preload_done(result);
                }
            }
            InternalEvent::Decoded {
                epoch,
                index,
                duration,
                result,
            } => {
                if epoch != self.epoch {
                    self.on_stale_decoded(index);
                    return;
                }
                self.on_decoded(index, duration, result);
            }
            InternalEvent::TimerEnded(id, reason) => {
                let timer = match reason {
                    TimerReason::NextPull => &mut self.pull_timer,
                    TimerReason::PlaylistRefresh => &mut self.refresh_timer,
                    TimerReason::SegmentRetry => &mut self.retry_timer,
                };
                if timer.as_ref().map(|t| t.id) != Some(id) {
                    debug!(?reason, "Core: Ignoring cancelled timer");
                    return;
                }
                *timer = None;
                match reason {
                    TimerReason::NextPull => self.on_pull_timer(),
                    TimerReason::PlaylistRefresh => self.on_refresh_timer(),
                    TimerReason::SegmentRetry => self.on_retry_timer(),
                }
            }
        }
    }

    fn publish_status(&self) {
        let status = PlaybackStatus {
            state: self.state,
            current_time: self.playback_time,
            is_playing: self.playing,
            playback_rate: self.playback_rate,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
