//! The renderer as seen by the playback controller.
//!
//! A [`Device`] plays URIs and keeps its own play queue, addressed by
//! 1-based position. Its queue is the source of truth for its own order
//! and may change under our feet, so a [`Queue`] snapshot is fetched
//! fresh whenever it is needed and never kept.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Capabilities the playback controller needs from a renderer.
#[async_trait]
pub trait Device: Send + Sync {
    /// Plays `uri`, or resumes the current queue entry when `None`.
    async fn play(&self, uri: Option<&str>) -> Result<bool>;

    async fn pause(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Seeks within the current track.
    async fn seek(&self, position: Duration) -> Result<()>;

    /// Makes the entry at `position` the current track without starting it.
    async fn select_queue_entry(&self, position: usize) -> Result<bool>;

    /// Moves `count` entries starting at `from` so that the first of them
    /// ends up at position `to`.
    async fn move_queue_entries(&self, from: usize, count: usize, to: usize) -> Result<()>;

    /// Inserts `uri` so that it ends up at `position`.
    async fn insert_queue_entry(&self, uri: &str, position: usize) -> Result<()>;

    async fn remove_queue_entries(&self, from: usize, count: usize) -> Result<()>;

    async fn queue(&self) -> Result<Queue>;

    /// Volume from 0 to 100.
    async fn volume(&self) -> Result<u8>;

    async fn set_volume(&self, level: u8) -> Result<()>;

    async fn current_track(&self) -> Result<TrackPosition>;
}

/// An entry of the device queue.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueueEntry {
    /// Composite id of parent and position, like `Q:0/3`.
    pub id: String,
    pub parent_id: String,
    pub uri: String,
}

impl QueueEntry {
    /// The 1-based position encoded in the composite id.
    #[must_use]
    pub fn position(&self) -> Option<usize> {
        self.id
            .strip_prefix(&self.parent_id)
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|position| position.parse().ok())
    }
}

/// Snapshot of the device queue.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Queue {
    pub entries: Vec<QueueEntry>,
    pub total: usize,
}

impl Queue {
    /// 1-based position of the first entry playing `uri`.
    #[must_use]
    pub fn position_of(&self, uri: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|entry| entry.uri == uri)
            .and_then(QueueEntry::position)
    }

    /// URIs in queue order, for planning against a local copy.
    #[must_use]
    pub fn uris(&self) -> Vec<String> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .filter_map(|entry| entry.position().map(|position| (position, entry)))
            .collect();
        entries.sort_by_key(|(position, _)| *position);
        entries
            .into_iter()
            .map(|(_, entry)| entry.uri.clone())
            .collect()
    }
}

/// Progress of the track the device is playing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackPosition {
    pub position: Duration,
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(position: usize, uri: &str) -> QueueEntry {
        QueueEntry {
            id: format!("Q:0/{position}"),
            parent_id: "Q:0".to_owned(),
            uri: uri.to_owned(),
        }
    }

    #[test]
    fn position_from_composite_id() {
        assert_eq!(entry(3, "x").position(), Some(3));

        let foreign = QueueEntry {
            id: "SQ:1/2".to_owned(),
            parent_id: "Q:0".to_owned(),
            uri: "x".to_owned(),
        };
        assert_eq!(foreign.position(), None);
    }

    #[test]
    fn lookup_by_uri() {
        let queue = Queue {
            entries: vec![entry(1, "a"), entry(2, "b"), entry(3, "a")],
            total: 3,
        };
        assert_eq!(queue.position_of("a"), Some(1));
        assert_eq!(queue.position_of("b"), Some(2));
        assert_eq!(queue.position_of("c"), None);
    }

    #[test]
    fn uris_in_position_order() {
        let queue = Queue {
            entries: vec![entry(2, "b"), entry(1, "a")],
            total: 2,
        };
        assert_eq!(queue.uris(), vec!["a".to_owned(), "b".to_owned()]);
    }
}
