//! Wire types of the MeTube download backend.
//!
//! # Wire Format
//!
//! `GET /history` returns the three lists the backend keeps:
//! ```json
//! {
//!     "queue":   [ { "id": "dQw4w9WgXcQ", "status": "pending", ... } ],
//!     "pending": [],
//!     "done":    [
//!         {
//!             "id": "dQw4w9WgXcQ",
//!             "title": "Never Gonna Give You Up",
//!             "size": 3423180,
//!             "filename": "Never Gonna Give You Up.mp3",
//!             "status": "finished",
//!             "entry": { "duration": 213, "artist": "Rick Astley" }
//!         }
//!     ]
//! }
//! ```
//!
//! Location (which list holds a record) and status are independent: a
//! record in `done` may be `finished` or `error`.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};

use crate::playlist::TrackId;

/// The backend list a record was found in.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Queue,
    Pending,
    Done,
}

impl Location {
    /// Lists in the order they are searched.
    pub const ALL: [Self; 3] = [Self::Queue, Self::Pending, Self::Done];

    /// Whether a record in this list is still being worked on.
    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Queue | Self::Pending)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue => write!(f, "queue"),
            Self::Pending => write!(f, "pending"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Download status. Intermediate states the backend reports while
/// working (`preparing`, `downloading`, ...) read as `Pending`.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Finished,
    Error,
    #[default]
    #[serde(other)]
    Pending,
}

/// Descriptive metadata of the downloaded media.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Entry {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub creator: Option<String>,
    pub thumbnail: Option<String>,

    /// Length in seconds.
    pub duration: Option<f64>,
    pub duration_string: Option<String>,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MusicRecord {
    pub id: TrackId,

    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub title: String,

    #[serde(default)]
    pub size: Option<u64>,

    /// File name under the backend's audio URL, once downloaded.
    #[serde(default)]
    pub filename: Option<String>,

    #[serde(default)]
    pub status: Status,

    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub entry: Entry,

    /// Set when the record is looked up in a [`History`].
    #[serde(skip)]
    pub location: Option<Location>,
}

impl MusicRecord {
    /// Track length from the metadata, zero when unknown.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.entry
            .duration
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map_or(Duration::ZERO, Duration::from_secs_f64)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status == Status::Finished
    }

    /// Finished and with a file to point the renderer at.
    #[must_use]
    pub fn is_playable(&self) -> bool {
        self.is_finished() && self.filename.as_deref().is_some_and(|name| !name.is_empty())
    }
}

/// Response of `GET /history`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct History {
    pub queue: Vec<MusicRecord>,
    pub pending: Vec<MusicRecord>,
    pub done: Vec<MusicRecord>,
}

impl History {
    #[must_use]
    pub fn list(&self, location: Location) -> &[MusicRecord] {
        match location {
            Location::Queue => &self.queue,
            Location::Pending => &self.pending,
            Location::Done => &self.done,
        }
    }

    /// Looks `id` up in `location`, or in all lists in search order, and
    /// tags the match with the list it was found in.
    #[must_use]
    pub fn find(&self, id: &TrackId, location: Option<Location>) -> Option<MusicRecord> {
        Location::ALL
            .into_iter()
            .filter(|candidate| location.map_or(true, |wanted| wanted == *candidate))
            .find_map(|candidate| {
                self.list(candidate)
                    .iter()
                    .find(|record| record.id == *id)
                    .map(|record| MusicRecord {
                        location: Some(candidate),
                        ..record.clone()
                    })
            })
    }
}

/// Body of `POST /add`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AddRequest {
    pub url: TrackId,
    pub quality: &'static str,
    pub format: &'static str,
    pub playlist_strict_mode: bool,
    pub auto_start: bool,
}

impl AddRequest {
    /// Best available audio, transcoded to MP3, started right away.
    #[must_use]
    pub fn audio(id: TrackId) -> Self {
        Self {
            url: id,
            quality: "best",
            format: "mp3",
            playlist_strict_mode: false,
            auto_start: true,
        }
    }
}

/// Body of `POST /delete`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeleteRequest {
    pub ids: Vec<TrackId>,
    #[serde(rename = "where")]
    pub location: Location,
}

/// Acknowledgement of `POST /add` and `POST /delete`:
/// `{"status": "ok"}` or `{"status": "error", "msg": "..."}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Reply {
    pub status: Option<String>,
    pub msg: Option<String>,
}

impl Reply {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status.as_deref() == Some("error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HISTORY: &str = r#"{
        "queue": [
            { "id": "q1", "title": "Queued", "size": null, "filename": null,
              "status": "downloading", "entry": null }
        ],
        "pending": [],
        "done": [
            { "id": "d1", "title": "Done", "size": 1024, "filename": "Done.mp3",
              "status": "finished", "entry": { "duration": 213.5, "artist": "Someone" } },
            { "id": "d2", "title": null, "status": "error" }
        ]
    }"#;

    #[test]
    fn parses_history() {
        let history: History = serde_json::from_str(HISTORY).unwrap();
        assert_eq!(history.queue.len(), 1);
        assert_eq!(history.done.len(), 2);

        let queued = &history.queue[0];
        assert_eq!(queued.status, Status::Pending);
        assert_eq!(queued.entry, Entry::default());

        let done = &history.done[0];
        assert!(done.is_playable());
        assert_eq!(done.duration(), Duration::from_secs_f64(213.5));

        let failed = &history.done[1];
        assert_eq!(failed.status, Status::Error);
        assert_eq!(failed.title, "");
        assert!(!failed.is_playable());
    }

    #[test]
    fn find_tags_location_and_respects_scope() {
        let history: History = serde_json::from_str(HISTORY).unwrap();

        let found = history.find(&"q1".into(), None).unwrap();
        assert_eq!(found.location, Some(Location::Queue));

        assert!(history.find(&"q1".into(), Some(Location::Done)).is_none());
        assert_eq!(
            history
                .find(&"d1".into(), Some(Location::Done))
                .and_then(|record| record.location),
            Some(Location::Done)
        );
        assert!(history.find(&"nope".into(), None).is_none());
    }

    #[test]
    fn request_bodies() {
        let add = serde_json::to_value(AddRequest::audio("abc".into())).unwrap();
        assert_eq!(
            add,
            serde_json::json!({
                "url": "abc",
                "quality": "best",
                "format": "mp3",
                "playlist_strict_mode": false,
                "auto_start": true,
            })
        );

        let delete = serde_json::to_value(DeleteRequest {
            ids: vec!["abc".into()],
            location: Location::Done,
        })
        .unwrap();
        assert_eq!(
            delete,
            serde_json::json!({ "ids": ["abc"], "where": "done" })
        );
    }

    #[test]
    fn replies() {
        let ok: Reply = serde_json::from_str(r#"{"status": "ok"}"#).unwrap();
        assert!(!ok.is_error());

        let failed: Reply =
            serde_json::from_str(r#"{"status": "error", "msg": "unsupported url"}"#).unwrap();
        assert!(failed.is_error());
        assert_eq!(failed.msg.as_deref(), Some("unsupported url"));
    }
}
