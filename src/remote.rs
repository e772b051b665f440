//! The cast receiver session.
//!
//! A [`Receiver`] owns the playlist that connected senders control and the
//! [`Player`] that plays it. Commands from senders arrive on a channel;
//! everything else the receiver reacts to comes from the player: its
//! events, its end-of-track deadline and its look-ahead schedule. All of it
//! is handled on one cooperative loop in [`Receiver::run`].
//!
//! Senders are tracked by name. The first one to connect starts from an
//! empty device queue, and so does the next session once the last one has
//! left.

use std::{collections::BTreeSet, fmt, str::FromStr, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};

use crate::{
    backend::Backend,
    config::Config,
    device::Device,
    error::{Error, Result},
    events::Event,
    player::{Player, Transport},
    playlist::{Playlist, TrackId},
    util,
};

/// A request from a sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Connect {
        sender: String,
    },
    Disconnect {
        sender: String,
        implicit: bool,
    },
    SetPlaylist {
        ids: Vec<TrackId>,
        current: Option<TrackId>,
    },
    /// Plays `id`, or the current track when `None`, from `position`.
    Play {
        id: Option<TrackId>,
        position: Duration,
    },
    Pause,
    Resume,
    Stop,
    Seek(Duration),
    Next,
    Previous,
    SetVolume(u8),
    Status,
    /// Runs a look-ahead download and queue alignment pass right away.
    Refresh,
}

/// Parses a position as seconds or `H:MM:SS`.
fn parse_position(value: &str) -> Result<Duration> {
    if value.contains(':') {
        return util::parse_hms(value)
            .ok_or_else(|| Error::invalid_argument(format!("invalid position: {value}")));
    }

    let secs: f64 = value
        .parse()
        .map_err(|_| Error::invalid_argument(format!("invalid position: {value}")))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(Error::out_of_range(format!("invalid position: {value}")));
    }
    Ok(Duration::from_secs_f64(secs))
}

impl FromStr for Command {
    type Err = Error;

    /// Parses a command line like `play dQw4w9WgXcQ 30` or `volume 25`.
    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(Error::invalid_argument("empty command"));
        };
        let args: Vec<&str> = words.collect();

        let argument = |index: usize| {
            args.get(index)
                .copied()
                .ok_or_else(|| Error::invalid_argument(format!("{verb}: missing argument")))
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "connect" => Self::Connect {
                sender: argument(0)?.to_owned(),
            },
            "disconnect" => Self::Disconnect {
                sender: argument(0)?.to_owned(),
                implicit: args.get(1).is_some_and(|arg| *arg == "implicit"),
            },
            "playlist" => {
                let ids: Vec<TrackId> = argument(0)?
                    .split(',')
                    .filter(|id| !id.is_empty())
                    .map(TrackId::from)
                    .collect();
                let current = args
                    .get(1)
                    .map(|id| TrackId::from(*id))
                    .or_else(|| ids.first().cloned());
                Self::SetPlaylist { ids, current }
            }
            "play" => Self::Play {
                id: args.first().map(|id| TrackId::from(*id)),
                position: args
                    .get(1)
                    .map_or(Ok(Duration::ZERO), |position| parse_position(position))?,
            },
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "stop" => Self::Stop,
            "seek" => Self::Seek(parse_position(argument(0)?)?),
            "next" => Self::Next,
            "previous" | "prev" => Self::Previous,
            "volume" => Self::SetVolume(argument(0)?.parse()?),
            "status" => Self::Status,
            "refresh" => Self::Refresh,
            _ => return Err(Error::invalid_argument(format!("unknown command: {verb}"))),
        };

        if args.len() > command.max_arguments() {
            return Err(Error::invalid_argument(format!(
                "{verb}: too many arguments"
            )));
        }

        Ok(command)
    }
}

impl Command {
    fn max_arguments(&self) -> usize {
        match self {
            Self::Disconnect { .. } | Self::SetPlaylist { .. } | Self::Play { .. } => 2,
            Self::Connect { .. } | Self::Seek(_) | Self::SetVolume(_) => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { sender } => write!(f, "connect {sender}"),
            Self::Disconnect { sender, implicit } => {
                write!(f, "disconnect {sender}")?;
                if *implicit {
                    write!(f, " (implicit)")?;
                }
                Ok(())
            }
            Self::SetPlaylist { ids, current } => {
                write!(f, "playlist of {} track(s)", ids.len())?;
                if let Some(current) = current {
                    write!(f, " at {current}")?;
                }
                Ok(())
            }
            Self::Play { id, position } => {
                write!(f, "play")?;
                if let Some(id) = id {
                    write!(f, " {id}")?;
                }
                write!(f, " from {}", util::format_hms(*position))
            }
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Stop => write!(f, "stop"),
            Self::Seek(position) => write!(f, "seek to {}", util::format_hms(*position)),
            Self::Next => write!(f, "next"),
            Self::Previous => write!(f, "previous"),
            Self::SetVolume(level) => write!(f, "volume {level}%"),
            Self::Status => write!(f, "status"),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}

/// Resolves at `deadline`, or never without one.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub struct Receiver {
    device_name: String,
    player: Player,

    playlist: watch::Sender<Playlist>,
    playlist_changes: watch::Receiver<Playlist>,
    event_rx: mpsc::UnboundedReceiver<Event>,

    senders: BTreeSet<String>,
}

impl Receiver {
    #[must_use]
    pub fn new(config: &Config, device: Arc<dyn Device>, backend: Arc<dyn Backend>) -> Self {
        let (playlist, playlist_changes) = watch::channel(Playlist::default());
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut player = Player::new(config, device, backend, playlist.subscribe());
        player.register(event_tx);

        Self {
            device_name: config.device_name.clone(),
            player,
            playlist,
            playlist_changes,
            event_rx,
            senders: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn playlist(&self) -> Playlist {
        self.playlist.borrow().clone()
    }

    #[must_use]
    pub fn senders(&self) -> &BTreeSet<String> {
        &self.senders
    }

    /// Handles commands and player timers until the command channel closes.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Command>) {
        info!("{} ready for senders", self.device_name);

        loop {
            let track_end = self.player.track_end();
            let next_prefetch = self.player.next_prefetch();

            tokio::select! {
                biased;

                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("command channel closed");
                        break;
                    };
                    self.handle_command(command).await;
                }

                Some(event) = self.event_rx.recv() => self.handle_event(event).await,

                () = wait_until(track_end) => self.player.end_track().await,

                () = wait_until(next_prefetch) => {
                    trace!("look-ahead pass due");
                    self.player.prefetch_tick();
                }

                Ok(()) = self.playlist_changes.changed() => {
                    info!("playlist updated, pulling new items");
                    self.player.refresh_queue();
                }
            }
        }
    }

    /// Stops playback before the process exits.
    pub async fn shutdown(&mut self) {
        self.player.stop_prefetch();
        if self.player.session().track.is_some() {
            self.player.stop().await;
        }
    }

    pub async fn handle_command(&mut self, command: Command) {
        debug!("command: {command}");

        let ok = match command {
            Command::Connect { sender } => {
                self.connect(sender).await;
                true
            }
            Command::Disconnect { sender, implicit } => {
                self.disconnect(&sender, implicit).await;
                true
            }
            Command::SetPlaylist { ids, current } => {
                self.set_playlist(ids, current);
                true
            }
            Command::Play { id, position } => self.play(id, position).await,
            Command::Pause => self.player.pause().await,
            Command::Resume => self.player.resume().await,
            Command::Stop => self.player.stop().await,
            Command::Seek(position) => self.player.seek(position).await,
            Command::Next => self.skip(true).await,
            Command::Previous => self.skip(false).await,
            Command::SetVolume(level) => self.player.set_volume(level).await,
            Command::Status => {
                self.log_status().await;
                true
            }
            Command::Refresh => {
                self.player.refresh_queue();
                true
            }
        };

        if !ok {
            warn!("command did not complete");
        }
    }

    async fn handle_event(&mut self, event: Event) {
        trace!("event: {event:?}");

        match event {
            Event::TrackEnded(id) => {
                if self.is_current(&id) {
                    info!("{id} ended, moving to next");
                    self.skip(true).await;
                }
            }
            Event::TrackUnavailable(id) => {
                if self.is_current(&id) {
                    info!("{id} unavailable, moving to next");
                    self.skip(true).await;
                }
            }
            Event::Play | Event::Pause | Event::Stop | Event::TrackChanged => {}
        }
    }

    /// Whether `id` is still the current track. Events about a track that
    /// a sender has since moved away from are stale.
    fn is_current(&self, id: &TrackId) -> bool {
        let current = self.playlist.borrow().current() == Some(id);
        if !current {
            debug!("ignoring stale event for {id}");
        }
        current
    }

    async fn connect(&mut self, sender: String) {
        if !self.senders.insert(sender.clone()) {
            debug!("{sender} already connected");
            return;
        }

        info!(
            "connected to {sender}, total connected senders: {}",
            self.senders.len()
        );
        if self.senders.len() == 1 {
            self.player.clear_queue().await;
        }
    }

    async fn disconnect(&mut self, sender: &str, implicit: bool) {
        if !self.senders.remove(sender) {
            warn!("{sender} was not connected");
            return;
        }

        info!(
            "disconnected from {sender}{}, remaining connected senders: {}",
            if implicit { " (implicit)" } else { "" },
            self.senders.len()
        );

        self.player.stop_prefetch();
        if self.senders.is_empty() {
            if !implicit {
                self.player.stop().await;
            }
            self.player.clear_queue().await;
        }
    }

    /// Replaces the playlist. Only changes to the ids are announced; moving
    /// the current pointer is not a playlist update.
    fn set_playlist(&mut self, ids: Vec<TrackId>, current: Option<TrackId>) {
        let updated = self.playlist.send_if_modified(|playlist| {
            let changed = playlist.ids() != ids.as_slice();
            *playlist = Playlist::new(ids, current);
            changed
        });

        let playlist = self.playlist.borrow();
        debug!(
            "playlist has {} track(s), current: {}{}",
            playlist.ids().len(),
            playlist
                .current()
                .map_or_else(|| "none".to_owned(), ToString::to_string),
            if updated { "" } else { " (unchanged)" }
        );
    }

    /// Moves the current pointer to `id` without announcing an update.
    fn set_current(&mut self, id: &TrackId) {
        let mut found = false;
        self.playlist.send_if_modified(|playlist| {
            found = playlist.set_current(id);
            false
        });
        if !found {
            debug!("{id} is not in the playlist");
        }
    }

    async fn play(&mut self, id: Option<TrackId>, position: Duration) -> bool {
        let id = match id {
            Some(id) => {
                self.set_current(&id);
                id
            }
            None => {
                let current = self.playlist.borrow().current().cloned();
                let Some(id) = current else {
                    warn!("nothing to play");
                    return false;
                };
                id
            }
        };

        self.player.play(&id, position).await
    }

    /// Moves to the next or previous track. Running off the end of the
    /// playlist stops playback.
    async fn skip(&mut self, forward: bool) -> bool {
        let target = {
            let playlist = self.playlist.borrow();
            if forward {
                playlist.next().cloned()
            } else {
                playlist.previous().cloned()
            }
        };

        match target {
            Some(id) => self.play(Some(id), Duration::ZERO).await,
            None if forward => {
                info!("end of playlist");
                self.player.stop().await
            }
            None => {
                debug!("already at start of playlist");
                self.play(None, Duration::ZERO).await
            }
        }
    }

    async fn log_status(&self) {
        let session = self.player.session();
        let track = session
            .track
            .as_ref()
            .map_or_else(|| "nothing".to_owned(), ToString::to_string);
        let position = self.player.position().await;
        let duration = self.player.duration().await;
        let volume = self.player.volume().await;

        info!(
            "playing {track} at {} of {}, volume {volume}, {} sender(s) connected",
            util::format_hms(position),
            util::format_hms(duration),
            self.senders.len()
        );
    }
}
