use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{
    decode::DecodeJob, ContentState, Dispatcher, InternalEvent, MediaState, PlayerState,
    PlaylistPurpose, Timer, TimerId, TimerReason,
};
use crate::{
    adaptive,
    bindings::{DecodeError, DecodedPicture},
    buffer::{BufferManager, QualityKey},
    config::StreamPolicy,
    error::{HlsError, HlsResult},
    events::PlayerEvent,
    parser::{Playlist, Segment, StreamType},
    utils::url::parse_absolute,
};

/// Tolerance used when comparing cumulated durations.
const DURATION_EPSILON: f64 = 1e-6;

impl Dispatcher {
    pub(super) fn load_movie(&mut self, url: &str) {
        info!(url, "Core: Loading new content");
        self.reset_content();
        let url = match parse_absolute(url) {
            Ok(url) => url,
            Err(err) => {
                warn!(url, "Core: Invalid content URL");
                self.set_state(PlayerState::ErrorLoadingPlaylist);
                self.events.publish(PlayerEvent::PlaylistLoadFailed {
                    url: url.to_owned(),
                    error: err.to_string(),
                });
                return;
            }
        };
        self.set_state(PlayerState::LoadingNewMovie);
        self.content = Some(ContentState::default());
        self.fetch_playlist(url, PlaylistPurpose::Root);
    }

    pub(super) fn play(&mut self) {
        if self.playing {
            return;
        }
        info!("Core: Play");
        self.playing = true;
        self.fetching_enabled = true;
        if self.refresh_timer.is_none() {
            self.schedule_refresh();
        }
        if self.pull_timer.is_none() && !self.decoding {
            self.pull_next();
        }
    }

    /// Stop scheduling pulls. What's buffered stays buffered.
    pub(super) fn pause(&mut self) {
        if !self.playing {
            return;
        }
        info!("Core: Pause");
        self.playing = false;
        self.cancel_pull_timer();
    }

    pub(super) fn stop(&mut self) {
        info!("Core: Stop");
        self.internal_stop();
        if self.media().is_some() {
            self.set_state(PlayerState::PlaylistLoaded);
        }
    }

    pub(super) fn seek(&mut self, time: f64) {
        let Some(media) = self.media() else {
            warn!(time, "Core: Cannot seek, no content loaded");
            return;
        };
        let Some(pos) = media.playlist.segment_index_for_time(time) else {
            warn!(time, "Core: Cannot seek, the media playlist has no segment");
            return;
        };
        let start = media.playlist.segment_start(pos);
        let index = media.playlist.first_sequence() + pos as u64;
        info!(time, index, start, "Core: Seeking");
        self.epoch += 1;
        self.waiting_for_segment = false;
        self.cancel_pull_timer();
        self.playback_time = start;
        self.buffer.seek_to(index);
        self.fetching_enabled = true;
        self.schedule_fetches();
        if self.playing {
            self.pull_next();
        }
    }

    pub(super) fn set_playback_rate(&mut self, rate: f64) {
        if !rate.is_finite() || rate <= 0. {
            warn!(rate, "Core: Ignoring invalid playback rate");
            return;
        }
        if self.playing {
            self.pause();
            self.playback_rate = rate;
            self.play();
        } else {
            self.playback_rate = rate;
        }
    }

    /// Cancel every timer. The decoder stops with the `DecodeWorker`.
    pub(super) fn shutdown(&mut self) {
        self.cancel_pull_timer();
        cancel_timer(&mut self.refresh_timer);
        cancel_timer(&mut self.retry_timer);
    }

    pub(super) fn on_playlist_loaded(&mut self, purpose: PlaylistPurpose, url: Url, playlist: Playlist) {
        match purpose {
            PlaylistPurpose::Root if playlist.is_master() => self.on_master_playlist(playlist),
            PlaylistPurpose::Root => {
                self.set_state(PlayerState::PlaylistLoaded);
                self.start_media(QualityKey::new(0, 0), url, playlist);
            }
            PlaylistPurpose::Media(quality) => self.start_media(quality, url, playlist),
            PlaylistPurpose::Switch(quality) => self.on_switch_playlist(quality, url, playlist),
            PlaylistPurpose::Refresh(quality) => self.on_refreshed_playlist(quality, playlist),
        }
    }

    pub(super) fn on_playlist_error(&mut self, purpose: PlaylistPurpose, url: Url, err: HlsError) {
        error!(url = %url, ?purpose, "Core: Playlist loading failed: {}", err);
        self.events.publish(PlayerEvent::PlaylistLoadFailed {
            url: url.to_string(),
            error: err.to_string(),
        });
        match purpose {
            PlaylistPurpose::Root | PlaylistPurpose::Media(_) => {
                self.set_state(PlayerState::ErrorLoadingPlaylist);
            }
            PlaylistPurpose::Switch(quality) => {
                // Keep playing the current variant.
                if let Some(content) = self.content.as_mut() {
                    if content.switching_to == Some(quality) {
                        content.switching_to = None;
                    }
                }
                if self.media().is_some() {
                    self.set_state(self.playback_state());
                }
            }
            PlaylistPurpose::Refresh(_) => {
                self.set_state(PlayerState::ErrorLoadingPlaylist);
                if let Some(interval) = self.refresh_interval() {
                    self.start_refresh_timer(interval);
                }
            }
        }
    }

    pub(super) fn on_segment_loaded(&mut self, quality: QualityKey, index: u64, data: Bytes, duration: f64) {
        debug!(quality = %quality, index, "Core: Segment loaded");
        let is_target = self.media().map_or(false, |m| m.quality == quality);
        if is_target {
            self.buffer.add_segment(quality, index, data, duration, false);
        } else {
            self.buffer.store_segment(quality, index, data, duration);
        }
        self.check_best_variant();
        if self.waiting_for_segment && self.playing && self.pull_timer.is_none() {
            self.pull_next();
        }
        self.schedule_fetches();
    }

    /// The request was already retried by the loader: give up on segments for
    /// a while and try again after that.
    pub(super) fn on_segment_error(&mut self, index: u64, err: HlsError) {
        error!(index, "Core: Segment loading failed: {}", err);
        self.set_state(PlayerState::ErrorLoadingSegments);
        self.events.publish(PlayerEvent::SegmentLoadFailed {
            index,
            error: err.to_string(),
        });
        if self.retry_timer.is_none() {
            let delay = self.config.loader.backoff_max;
            self.retry_timer = Some(self.start_timer(delay, TimerReason::SegmentRetry));
        }
    }

    pub(super) fn on_preload_done(&mut self, result: HlsResult<usize>) {
        self.preloading = false;
        match result {
            Ok(count) => info!(count, "Core: Preloading done"),
            Err(err) => warn!("Core: Preloading failed: {}", err),
        }
        self.schedule_fetches();
        if self.playing && self.pull_timer.is_none() {
            self.pull_next();
        }
    }

    pub(super) fn on_decoded(
        &mut self,
        index: u64,
        duration: f64,
        result: Result<Vec<DecodedPicture>, DecodeError>,
    ) {
        self.decoding = false;
        let pictures = match result {
            Ok(pictures) => pictures,
            Err(err) => {
                let err = HlsError::from(err);
                error!(index, "Core: {}", err);
                self.internal_stop();
                self.set_state(PlayerState::ErrorLoadingSegments);
                self.events.publish(PlayerEvent::DecodeFailed {
                    index,
                    error: err.to_string(),
                });
                return;
            }
        };
        debug!(index, pictures = pictures.len(), "Core: Presenting segment");
        for picture in pictures {
            self.renderer.present(picture);
        }
        let delay = duration / self.playback_rate;
        self.playback_time += delay;
        if self.playing {
            let delay = Duration::try_from_secs_f64(delay).unwrap_or_default();
            self.pull_timer = Some(self.start_timer(delay, TimerReason::NextPull));
        }
    }

    /// Output of a segment given to the decoder before a stop or seek. It is
    /// not presented, but the decoder is free again.
    pub(super) fn on_stale_decoded(&mut self, index: u64) {
        debug!(index, "Core: Ignoring decoded output from before a seek or stop");
        self.decoding = false;
        if self.playing && self.pull_timer.is_none() {
            self.pull_next();
        }
    }

    pub(super) fn on_pull_timer(&mut self) {
        if self.playing {
            self.pull_next();
        }
    }

    pub(super) fn on_refresh_timer(&mut self) {
        let Some(media) = self.media() else {
            return;
        };
        let quality = media.quality;
        let url = media.url.clone();
        debug!(url = %url, "Core: Refreshing media playlist");
        self.fetch_playlist(url, PlaylistPurpose::Refresh(quality));
    }

    pub(super) fn on_retry_timer(&mut self) {
        info!("Core: Retrying segment requests");
        if self.state == PlayerState::ErrorLoadingSegments {
            self.set_state(self.playback_state());
        }
        self.schedule_fetches();
    }

    fn on_master_playlist(&mut self, master: Playlist) {
        self.set_state(PlayerState::PlaylistLoaded);
        let qualities = rank_variants(&master);
        let bandwidth = self.loader.current_bandwidth() / self.playback_rate;
        let Some((variant_index, variant)) = adaptive::best_variant(&master.variants, bandwidth) else {
            error!("Core: Master playlist without variant");
            self.set_state(PlayerState::ErrorLoadingPlaylist);
            self.events.publish(PlayerEvent::PlaylistLoadFailed {
                url: master.url.as_ref().map(|u| u.to_string()).unwrap_or_default(),
                error: HlsError::NoSuitableVariant.to_string(),
            });
            return;
        };
        let quality = qualities[variant_index];
        let variant_bandwidth = variant.bandwidth;
        let variant_url = variant.url.clone();
        info!(quality = %quality, bandwidth = variant_bandwidth, "Core: Variant chosen");
        if let Some(content) = self.content.as_mut() {
            content.master = Some(master);
            content.qualities = qualities;
        }
        self.events.publish(PlayerEvent::VariantSelected {
            quality,
            bandwidth: variant_bandwidth,
        });
        match parse_absolute(&variant_url) {
            Ok(url) => self.fetch_playlist(url, PlaylistPurpose::Media(quality)),
            Err(err) => {
                error!(url = variant_url.as_str(), "Core: Invalid variant URL");
                self.set_state(PlayerState::ErrorLoadingPlaylist);
                self.events.publish(PlayerEvent::PlaylistLoadFailed {
                    url: variant_url,
                    error: err.to_string(),
                });
            }
        }
    }

    /// Set playback up for the media playlist of `quality`.
    fn start_media(&mut self, quality: QualityKey, url: Url, playlist: Playlist) {
        self.set_state(PlayerState::StartLoadingMovie);
        let url = playlist.url.clone().unwrap_or(url);
        let policy = *self.config.policies.get(playlist.stream_type);
        apply_media_playlist(&self.buffer, quality, &playlist, &policy);
        let start_pos = playlist
            .wanted_start()
            .and_then(|t| playlist.segment_index_for_time(t))
            .unwrap_or(0);
        self.playback_time = playlist.segment_start(start_pos);
        self.buffer.seek_to(playlist.first_sequence() + start_pos as u64);
        info!(
            quality = %quality,
            stream_type = ?playlist.stream_type,
            segments = playlist.segments.len(),
            start = self.playback_time,
            "Core: Media playlist ready"
        );

        let preload = self.loader.preload_settings();
        if preload.enabled {
            self.preloading = true;
            let loader = self.loader.clone();
            let tx = self.internal_tx.clone();
            let generation = self.generation;
            let to_preload = playlist.clone();
            tokio::spawn(async move {
                let result = loader.preload_segments(&to_preload).await;
                let _ = tx.send(InternalEvent::PreloadDone { generation, result });
            });
        }
        if let Some(content) = self.content.as_mut() {
            content.media = Some(MediaState {
                quality,
                url,
                playlist,
            });
        }
        self.set_state(self.playback_state());
        self.schedule_refresh();
        self.schedule_fetches();
        if self.playing && self.pull_timer.is_none() {
            self.pull_next();
        }
    }

    fn on_switch_playlist(&mut self, quality: QualityKey, url: Url, playlist: Playlist) {
        let Some(content) = self.content.as_mut() else {
            return;
        };
        if content.switching_to != Some(quality) {
            debug!(quality = %quality, "Core: Ignoring media playlist of a variant not wanted anymore");
            return;
        }
        content.switching_to = None;
        self.set_state(PlayerState::QualityChangeNeeded);
        let policy = *self.config.policies.get(playlist.stream_type);
        apply_media_playlist(&self.buffer, quality, &playlist, &policy);
        if let Some(content) = self.content.as_mut() {
            content.media = Some(MediaState {
                quality,
                url,
                playlist,
            });
        }
        info!(quality = %quality, "Core: Switching quality");
        self.set_state(self.playback_state());
        self.schedule_refresh();
        self.schedule_fetches();
    }

    fn on_refreshed_playlist(&mut self, quality: QualityKey, playlist: Playlist) {
        let Some(media) = self.content.as_mut().and_then(|c| c.media.as_mut()) else {
            return;
        };
        if media.quality != quality {
            debug!(quality = %quality, "Core: Ignoring refresh of a previous variant");
            return;
        }
        media.playlist = playlist;
        let policy = *self.config.policies.get(media.playlist.stream_type);
        debug!(
            first = media.playlist.first_sequence(),
            segments = media.playlist.segments.len(),
            "Core: Media playlist refreshed"
        );
        apply_media_playlist(&self.buffer, quality, &media.playlist, &policy);
        if self.state == PlayerState::ErrorLoadingPlaylist {
            self.set_state(self.playback_state());
        }
        // The request gave a new bandwidth sample.
        self.check_best_variant();
        self.schedule_refresh();
        self.schedule_fetches();
    }

    /// Check which variant is best for the current bandwidth estimate and, if
    /// it changed, start loading its media playlist.
    fn check_best_variant(&mut self) {
        let bandwidth = self.loader.current_bandwidth() / self.playback_rate;
        let Some(content) = self.content.as_mut() else {
            return;
        };
        let (Some(master), Some(media)) = (content.master.as_ref(), content.media.as_ref()) else {
            return;
        };
        let Some((variant_index, variant)) = adaptive::best_variant(&master.variants, bandwidth) else {
            return;
        };
        let quality = content.qualities[variant_index];
        let target = content.switching_to.unwrap_or(media.quality);
        if quality == target {
            return;
        }
        let url = match parse_absolute(&variant.url) {
            Ok(url) => url,
            Err(err) => {
                warn!(url = variant.url.as_str(), "Core: Invalid variant URL: {}", err);
                return;
            }
        };
        info!(
            bandwidth,
            quality = %quality,
            variant_bandwidth = variant.bandwidth,
            "Core: Better variant found"
        );
        let variant_bandwidth = variant.bandwidth;
        content.switching_to = Some(quality);
        self.set_state(PlayerState::BandwidthChanged);
        self.events.publish(PlayerEvent::VariantSelected {
            quality,
            bandwidth: variant_bandwidth,
        });
        self.fetch_playlist(url, PlaylistPurpose::Switch(quality));
    }

    /// Request as many segments of the active variant as needed to fill the
    /// buffer up to its maximum duration, counting what is already buffered,
    /// downloaded and being requested.
    pub(super) fn schedule_fetches(&mut self) {
        if !self.fetching_enabled || self.preloading || self.retry_timer.is_some() {
            return;
        }
        let Some(media) = self.media() else {
            return;
        };
        let quality = media.quality;
        let max = self.buffer.max_buffer();
        let in_flight: f64 = self
            .in_flight
            .iter()
            .filter(|((q, _), _)| *q == quality)
            .map(|(_, duration)| duration)
            .sum();
        let mut outstanding =
            self.buffer.buffered_duration() + self.buffer.ahead_duration(quality) + in_flight;
        let mut index = self
            .buffer
            .next_needed_index(quality)
            .max(media.playlist.first_sequence());
        let mut to_fetch: Vec<(u64, Segment)> = vec![];
        while let Some(segment) = media.playlist.segment_by_sequence(index) {
            let skip = self.buffer.is_downloaded(quality, index)
                || self.in_flight.contains_key(&(quality, index));
            if !skip {
                if outstanding > 0. && outstanding + segment.duration > max + DURATION_EPSILON {
                    break;
                }
                outstanding += segment.duration;
                to_fetch.push((index, segment.clone()));
            }
            index += 1;
        }
        for (index, segment) in to_fetch {
            self.fetch_segment(quality, index, segment);
        }
    }

    /// Give the next buffered segment to the decoder.
    pub(super) fn pull_next(&mut self) {
        self.cancel_pull_timer();
        if self.decoding {
            return;
        }
        if self.media().is_none() {
            self.waiting_for_segment = true;
            return;
        }
        match self.buffer.get_next_segment() {
            Some(segment) => {
                self.waiting_for_segment = false;
                debug!(index = segment.index, quality = %segment.quality, "Core: Decoding segment");
                let job = DecodeJob {
                    epoch: self.epoch,
                    index: segment.index,
                    duration: segment.duration,
                    data: segment.data,
                };
                match self.decoder.submit(job) {
                    Ok(()) => self.decoding = true,
                    Err(job) => {
                        let err = DecodeError::DecodeFailed("The decoder is not available".to_owned());
                        self.on_decoded(job.index, job.duration, Err(err));
                        return;
                    }
                }
            }
            None if self.buffer.is_final() => {
                info!("Core: Content ended");
                self.playing = false;
                self.waiting_for_segment = false;
                self.events.publish(PlayerEvent::Ended);
                return;
            }
            None => {
                debug!("Core: Waiting for a segment");
                self.waiting_for_segment = true;
            }
        }
        self.schedule_fetches();
    }

    /// Stop playback and go back to the start of the content, keeping what
    /// was downloaded.
    fn internal_stop(&mut self) {
        self.playing = false;
        self.waiting_for_segment = false;
        self.fetching_enabled = false;
        self.epoch += 1;
        self.cancel_pull_timer();
        cancel_timer(&mut self.refresh_timer);
        cancel_timer(&mut self.retry_timer);
        self.playback_time = 0.;
        self.loader.clear_cache();
        let first_sequence = self.media().map(|m| m.playlist.first_sequence());
        match first_sequence {
            Some(first) => self.buffer.seek_to(first),
            None => self.buffer.clear_buffer(),
        }
    }

    /// Forget the current content, before loading a new one.
    fn reset_content(&mut self) {
        self.internal_stop();
        self.generation += 1;
        self.content = None;
        self.in_flight.clear();
        self.preloading = false;
        self.fetching_enabled = true;
        self.buffer.reset();
    }

    fn fetch_playlist(&mut self, url: Url, purpose: PlaylistPurpose) {
        let loader = self.loader.clone();
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = loader.load_playlist(&url).await;
            let _ = tx.send(InternalEvent::PlaylistLoaded {
                generation,
                purpose,
                url,
                result,
            });
        });
    }

    fn fetch_segment(&mut self, quality: QualityKey, index: u64, segment: Segment) {
        debug!(quality = %quality, index, "Core: Requesting segment");
        self.in_flight.insert((quality, index), segment.duration);
        let loader = self.loader.clone();
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = loader.load_segment(&segment).await;
            let _ = tx.send(InternalEvent::SegmentLoaded {
                generation,
                quality,
                index,
                duration: segment.duration,
                result,
            });
        });
    }

    /// (Re)start the refresh timer of the active media playlist, so it fires
    /// once the refresh interval elapsed since the playlist was loaded.
    fn schedule_refresh(&mut self) {
        cancel_timer(&mut self.refresh_timer);
        let Some(interval) = self.refresh_interval() else {
            return;
        };
        let elapsed = self
            .media()
            .and_then(|m| m.playlist.created_at)
            .map(|created_at| created_at.elapsed())
            .unwrap_or_default();
        self.start_refresh_timer(interval.saturating_sub(elapsed));
    }

    fn start_refresh_timer(&mut self, delay: Duration) {
        cancel_timer(&mut self.refresh_timer);
        self.refresh_timer = Some(self.start_timer(delay, TimerReason::PlaylistRefresh));
    }

    fn refresh_interval(&self) -> Option<Duration> {
        let media = self.media()?;
        self.config
            .policies
            .get(media.playlist.stream_type)
            .refresh_interval
    }

    fn start_timer(&mut self, delay: Duration, reason: TimerReason) -> Timer {
        let id = TimerId(self.next_timer_id);
        self.next_timer_id += 1;
        let tx = self.internal_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(InternalEvent::TimerEnded(id, reason));
        });
        Timer { id, handle }
    }

    fn cancel_pull_timer(&mut self) {
        cancel_timer(&mut self.pull_timer);
    }

    fn set_state(&mut self, state: PlayerState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Core: State change");
            self.state = state;
            self.events.publish(PlayerEvent::StateChanged(state));
        }
    }

    /// State in which the player is when everything goes well.
    fn playback_state(&self) -> PlayerState {
        if self.loader.preload_settings().enabled {
            PlayerState::PlayingWithPreload
        } else {
            PlayerState::PlayingWithoutPreload
        }
    }

    fn media(&self) -> Option<&MediaState> {
        self.content.as_ref().and_then(|c| c.media.as_ref())
    }
}

/// Apply the policy of the playlist's type and declare its segments to the
/// buffer.
fn apply_media_playlist(
    buffer: &BufferManager,
    quality: QualityKey,
    playlist: &Playlist,
    policy: &StreamPolicy,
) {
    buffer.apply_stream_policy(policy);
    buffer.register_line(
        quality,
        playlist.first_sequence(),
        playlist.segments.len() as u64,
        playlist.stream_type == StreamType::Vod,
    );
}

fn cancel_timer(timer: &mut Option<Timer>) {
    if let Some(timer) = timer.take() {
        timer.handle.abort();
    }
}

/// Quality of each variant: its rank once variants are sorted by ascending
/// bandwidth, ties keeping their order.
fn rank_variants(master: &Playlist) -> Vec<QualityKey> {
    let mut order: Vec<usize> = (0..master.variants.len()).collect();
    order.sort_by_key(|&i| master.variants[i].bandwidth);
    let mut qualities = vec![QualityKey::new(0, 0); master.variants.len()];
    for (rank, variant_index) in order.into_iter().enumerate() {
        qualities[variant_index] = QualityKey::new(variant_index, rank);
    }
    qualities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_rank_variants() {
        let master = parse(
            "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=2000
high.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=500
low.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1000
mid.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=500
low2.m3u8
",
        )
        .unwrap();
        assert_eq!(
            rank_variants(&master),
            vec![
                QualityKey::new(0, 3),
                QualityKey::new(1, 0),
                QualityKey::new(2, 2),
                QualityKey::new(3, 1),
            ]
        );
    }
}
