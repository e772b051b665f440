//! Playback control of the renderer.
//!
//! The [`Player`] turns transport commands into device commands. Playing a
//! track first makes sure the backend has it downloaded, then either plays
//! it straight from its URI or selects it in the device queue, moving it
//! into place when needed.
//!
//! The renderer does not report the end of a track, so the player keeps a
//! deadline computed from the track duration. The receiver polls it through
//! [`Player::track_end`] and calls [`Player::end_track`] when it passes.
//! Look-ahead downloads work the same way through
//! [`Player::next_prefetch`] and [`Player::prefetch_tick`].

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};

use crate::{
    backend::Backend,
    config::Config,
    device::Device,
    error::Result,
    events::Event,
    playlist::{Playlist, TrackId},
    prefetch::Prefetcher,
    protocol::metube::MusicRecord,
    reconcile::Reconciler,
    resolver::Resolver,
    util,
};

/// Transport operations of a cast receiver.
///
/// Every operation reports success, or returns a value with a safe default,
/// and logs its failures instead of returning them.
#[async_trait]
pub trait Transport: Send {
    async fn play(&mut self, id: &TrackId, position: Duration) -> bool;
    async fn pause(&mut self) -> bool;
    async fn resume(&mut self) -> bool;
    async fn stop(&mut self) -> bool;
    async fn seek(&mut self, position: Duration) -> bool;
    async fn set_volume(&mut self, level: u8) -> bool;
    async fn volume(&self) -> Volume;
    async fn position(&self) -> Duration;
    async fn duration(&self) -> Duration;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Volume {
    /// From 0 to 100.
    pub level: u8,
    pub muted: bool,
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.level)?;
        if self.muted {
            write!(f, " (muted)")?;
        }
        Ok(())
    }
}

/// Software timer of the time played since the last seek.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Stopwatch {
    #[default]
    Stopped,
    Running {
        since: Instant,
        elapsed: Duration,
    },
    Paused {
        elapsed: Duration,
    },
}

impl Stopwatch {
    pub fn start(&mut self) {
        *self = Self::Running {
            since: Instant::now(),
            elapsed: Duration::ZERO,
        };
    }

    pub fn pause(&mut self) {
        if self.is_running() {
            *self = Self::Paused {
                elapsed: self.elapsed(),
            };
        }
    }

    /// Continues a paused timer, or starts it afresh otherwise.
    pub fn resume(&mut self) {
        match *self {
            Self::Paused { elapsed } => {
                *self = Self::Running {
                    since: Instant::now(),
                    elapsed,
                };
            }
            Self::Stopped => self.start(),
            Self::Running { .. } => {}
        }
    }

    /// Clears the elapsed time, keeping the timer running or paused.
    pub fn reset(&mut self) {
        match *self {
            Self::Running { .. } => self.start(),
            Self::Paused { .. } => {
                *self = Self::Paused {
                    elapsed: Duration::ZERO,
                };
            }
            Self::Stopped => {}
        }
    }

    pub fn stop(&mut self) {
        *self = Self::Stopped;
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match *self {
            Self::Stopped => Duration::ZERO,
            Self::Running { since, elapsed } => elapsed + since.elapsed(),
            Self::Paused { elapsed } => elapsed,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// State of the track being played.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    pub track: Option<TrackId>,

    /// Position the track was last started or seeked at.
    pub seek_offset: Duration,

    /// Length of the track from its metadata.
    pub duration: Duration,

    /// Position to report while a play request is in progress.
    pub temp_position: Option<Duration>,

    pub stopwatch: Stopwatch,
}

impl Session {
    /// Time left until the end of the track, by the software timer.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.duration
            .saturating_sub(self.seek_offset + self.stopwatch.elapsed())
    }
}

pub struct Player {
    device: Arc<dyn Device>,
    resolver: Resolver,
    reconciler: Reconciler,
    prefetcher: Prefetcher,
    playlist: watch::Receiver<Playlist>,
    prefetch_interval: Duration,

    session: Session,
    track_end: Option<Instant>,
    next_prefetch: Option<Instant>,

    event_tx: Option<mpsc::UnboundedSender<Event>>,
}

impl Player {
    /// Grace period after the computed end of a track before moving on, so
    /// that the renderer gets to play the last second.
    const END_OF_TRACK_GRACE: Duration = Duration::from_secs(1);

    /// Creates a player that reads the playlist from `playlist`.
    #[must_use]
    pub fn new(
        config: &Config,
        device: Arc<dyn Device>,
        backend: Arc<dyn Backend>,
        playlist: watch::Receiver<Playlist>,
    ) -> Self {
        let resolver = Resolver::new(backend.clone(), config.download_poll_interval);
        let reconciler = Reconciler::new(device.clone(), backend, config.audio_url.clone());
        let prefetcher = Prefetcher::new(resolver.clone(), config.max_look_ahead);

        Self {
            device,
            resolver,
            reconciler,
            prefetcher,
            playlist,
            prefetch_interval: config.prefetch_interval,
            session: Session::default(),
            track_end: None,
            next_prefetch: None,
            event_tx: None,
        }
    }

    /// Registers a channel to send [`Event`]s to.
    pub fn register(&mut self, event_tx: mpsc::UnboundedSender<Event>) {
        self.event_tx = Some(event_tx);
    }

    fn notify(&self, event: Event) {
        if let Some(event_tx) = &self.event_tx {
            if let Err(e) = event_tx.send(event) {
                error!("failed to send event: {e}");
            }
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// When the current track is due to end.
    #[must_use]
    pub fn track_end(&self) -> Option<Instant> {
        self.track_end
    }

    /// When the next look-ahead pass is due, while the loop is running.
    #[must_use]
    pub fn next_prefetch(&self) -> Option<Instant> {
        self.next_prefetch
    }

    /// Schedules the end of the track from its remaining time. Nothing is
    /// scheduled while the timer is not running or the duration is unknown.
    fn schedule_track_end(&mut self) {
        self.track_end = None;

        if !self.session.stopwatch.is_running() {
            return;
        }
        if self.session.duration.is_zero() {
            debug!("track duration unknown, not scheduling its end");
            return;
        }

        let remaining = self.session.remaining();
        trace!("track ends in {}", util::format_hms(remaining));
        self.track_end = Some(Instant::now() + remaining + Self::END_OF_TRACK_GRACE);
    }

    /// Handles the end of the current track: pauses the device, resets the
    /// session timer and asks the receiver to move on.
    pub async fn end_track(&mut self) {
        info!("track ended");
        self.track_end = None;

        if let Err(e) = self.device.pause().await {
            error!("error pausing device at end of track: {e}");
        }
        self.session.seek_offset = Duration::ZERO;
        self.session.stopwatch.stop();

        if let Some(track) = self.session.track.clone() {
            self.notify(Event::TrackEnded(track));
        }
    }

    fn start_prefetch(&mut self) {
        if self.next_prefetch.is_none() {
            debug!(
                "starting look-ahead downloads every {}s",
                self.prefetch_interval.as_secs()
            );
            self.next_prefetch = Some(Instant::now() + self.prefetch_interval);
        }
    }

    pub fn stop_prefetch(&mut self) {
        if self.next_prefetch.take().is_some() {
            debug!("stopping look-ahead downloads");
        }
    }

    /// Runs a scheduled look-ahead pass and schedules the next one.
    pub fn prefetch_tick(&mut self) -> JoinHandle<()> {
        self.next_prefetch = Some(Instant::now() + self.prefetch_interval);
        self.refresh_queue()
    }

    /// Starts a look-ahead download and aligns the device queue with the
    /// playlist in the background.
    pub fn refresh_queue(&self) -> JoinHandle<()> {
        let playlist = self.playlist.borrow().clone();
        let prefetcher = self.prefetcher.clone();
        let reconciler = self.reconciler.clone();

        tokio::spawn(async move {
            prefetcher.pass(&playlist).await;
            reconciler.heal(&playlist).await;
        })
    }

    fn align_queue(&self) {
        let playlist = self.playlist.borrow().clone();
        let reconciler = self.reconciler.clone();

        tokio::spawn(async move { reconciler.heal(&playlist).await });
    }

    /// Empties the device queue.
    pub async fn clear_queue(&self) -> bool {
        match self.reconciler.clear().await {
            Ok(()) => true,
            Err(e) => {
                error!("error clearing device queue: {e}");
                false
            }
        }
    }

    /// Looks the downloaded `id` up on the device and starts it.
    ///
    /// Plays straight from `uri` when the device queue does not hold it.
    /// Otherwise the entry is moved to where the playlist wants it, if it
    /// belongs there at all, and selected.
    async fn start(&self, id: &TrackId, uri: &str) -> Result<bool> {
        let Some(index) = self.reconciler.find_device_index(uri).await else {
            debug!("{id} not in device queue, playing {uri}");
            return self.device.play(Some(uri)).await;
        };

        let target = self.playlist.borrow().offset_from_current(id);
        let position = match target {
            Some(target) if target != index => {
                debug!("moving {id} from device queue position {index} to {target}");
                self.device.move_queue_entries(index, 1, target).await?;
                target
            }
            Some(target) => target,
            None => {
                debug!("{id} not upcoming in playlist, playing at device queue position {index}");
                index
            }
        };

        if !self.device.select_queue_entry(position).await? {
            return Ok(false);
        }
        self.device.play(None).await
    }

    fn unavailable(&mut self, id: &TrackId) -> bool {
        error!("{id} is unavailable, skipping");
        self.session.temp_position = None;
        self.notify(Event::TrackUnavailable(id.clone()));
        false
    }
}

#[async_trait]
impl Transport for Player {
    async fn play(&mut self, id: &TrackId, position: Duration) -> bool {
        info!("playing {id} from {}", util::format_hms(position));

        self.session.temp_position = Some(position);
        self.session.stopwatch.stop();
        self.track_end = None;

        let Some(record) = self
            .resolver
            .ensure_downloaded(id)
            .await
            .filter(MusicRecord::is_playable)
        else {
            return self.unavailable(id);
        };

        let uri = match self.reconciler.uri_for(&record) {
            Ok(uri) => uri,
            Err(e) => {
                error!("error locating {id}: {e}");
                return self.unavailable(id);
            }
        };

        match self.start(id, &uri).await {
            Ok(true) => {}
            Ok(false) => {
                error!("device refused to play {id}");
                return false;
            }
            Err(e) => {
                error!("error playing {id}: {e}");
                return false;
            }
        }

        info!("now playing \"{}\"", record.title);
        self.session.temp_position = None;
        self.session.track = Some(id.clone());
        self.session.duration = record.duration();
        self.session.seek_offset = Duration::ZERO;
        self.session.stopwatch.start();

        if !self.seek(position).await {
            self.schedule_track_end();
        }

        self.start_prefetch();
        self.align_queue();
        self.notify(Event::TrackChanged);
        true
    }

    async fn pause(&mut self) -> bool {
        if let Err(e) = self.device.pause().await {
            error!("error pausing: {e}");
            return false;
        }

        self.session.stopwatch.pause();
        self.track_end = None;
        self.notify(Event::Pause);
        true
    }

    async fn resume(&mut self) -> bool {
        match self.device.play(None).await {
            Ok(true) => {}
            Ok(false) => {
                error!("device refused to resume");
                return false;
            }
            Err(e) => {
                error!("error resuming: {e}");
                return false;
            }
        }

        self.session.stopwatch.resume();
        self.schedule_track_end();
        self.notify(Event::Play);
        true
    }

    async fn stop(&mut self) -> bool {
        if let Err(e) = self.device.stop().await {
            error!("error stopping: {e}");
            return false;
        }

        self.session.seek_offset = Duration::ZERO;
        self.session.stopwatch.stop();
        self.track_end = None;
        self.stop_prefetch();
        self.notify(Event::Stop);
        true
    }

    async fn seek(&mut self, position: Duration) -> bool {
        if let Err(e) = self.device.seek(position).await {
            error!("error seeking to {}: {e}", util::format_hms(position));
            return false;
        }

        self.session.stopwatch.reset();
        self.session.seek_offset = position;
        self.schedule_track_end();
        true
    }

    async fn set_volume(&mut self, level: u8) -> bool {
        let level = level.min(100);
        debug!("setting volume to {level}%");
        match self.device.set_volume(level).await {
            Ok(()) => true,
            Err(e) => {
                error!("error setting volume: {e}");
                false
            }
        }
    }

    async fn volume(&self) -> Volume {
        match self.device.volume().await {
            Ok(level) => Volume {
                level,
                muted: false,
            },
            Err(e) => {
                error!("error getting volume: {e}");
                Volume::default()
            }
        }
    }

    async fn position(&self) -> Duration {
        if let Some(position) = self.session.temp_position {
            return position;
        }

        match self.device.current_track().await {
            Ok(track) => track.position,
            Err(e) => {
                error!("error getting position: {e}");
                Duration::ZERO
            }
        }
    }

    async fn duration(&self) -> Duration {
        match self.device.current_track().await {
            Ok(track) => track.duration,
            Err(e) => {
                error!("error getting duration: {e}");
                Duration::ZERO
            }
        }
    }
}
