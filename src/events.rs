//! Events emitted by the player.
//!
//! The player reports state changes over an unbounded channel registered
//! with [`Player::register`](crate::player::Player::register). Two of them
//! ask the receiver to act: [`TrackEnded`](Event::TrackEnded) and
//! [`TrackUnavailable`](Event::TrackUnavailable) both move playback on to
//! the next track of the playlist. They carry the track they concern, so
//! that the receiver can drop them once a sender has moved elsewhere.

use crate::playlist::TrackId;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// Playback has started or resumed.
    Play,

    /// Playback has paused.
    Pause,

    /// Playback has stopped.
    Stop,

    /// A new track is playing.
    TrackChanged,

    /// The track has played to its end.
    TrackEnded(TrackId),

    /// The track could not be downloaded and was skipped.
    TrackUnavailable(TrackId),
}
