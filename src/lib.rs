//! A cast receiver that plays on a Sonos speaker.
//!
//! Senders hand over a playlist of track ids. Each track is downloaded and
//! transcoded by a MeTube backend, then played by the speaker from the
//! backend's file server. Upcoming tracks are downloaded ahead of time and
//! kept in order at the head of the speaker's own queue, so that playback
//! continues without waiting on downloads.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod http;
pub mod player;
pub mod playlist;
pub mod prefetch;
pub mod protocol;
pub mod reconcile;
pub mod remote;
pub mod resolver;
pub mod signal;
pub mod sonos;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;
