//! The logical playlist as published by the cast session.
//!
//! The session layer owns the playlist and publishes it through a
//! [`tokio::sync::watch`] channel; everything else only reads it. Order is
//! sender-authoritative.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a track as known to the sender and the backend.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Ordered track ids with a pointer to the current one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Playlist {
    ids: Vec<TrackId>,
    current: Option<TrackId>,
}

impl Playlist {
    /// Creates a playlist. A `current` id that is not in `ids` is dropped.
    #[must_use]
    pub fn new(ids: Vec<TrackId>, current: Option<TrackId>) -> Self {
        let current = current.filter(|id| ids.contains(id));
        Self { ids, current }
    }

    #[must_use]
    pub fn ids(&self) -> &[TrackId] {
        &self.ids
    }

    #[must_use]
    pub fn current(&self) -> Option<&TrackId> {
        self.current.as_ref()
    }

    /// Index of the current id, if any.
    fn current_index(&self) -> Option<usize> {
        let current = self.current.as_ref()?;
        self.ids.iter().position(|id| id == current)
    }

    /// Points the playlist at `id`. Returns `false` and leaves the pointer
    /// alone if `id` is not in the playlist.
    pub fn set_current(&mut self, id: &TrackId) -> bool {
        if self.ids.contains(id) {
            self.current = Some(id.clone());
            true
        } else {
            false
        }
    }

    /// The ids from the current one (inclusive) to the end.
    #[must_use]
    pub fn from_current(&self) -> &[TrackId] {
        self.current_index().map_or(&[][..], |index| &self.ids[index..])
    }

    /// Up to `count` ids following the current one.
    #[must_use]
    pub fn upcoming(&self, count: usize) -> &[TrackId] {
        match self.current_index() {
            Some(index) => {
                let start = index + 1;
                let end = start.saturating_add(count).min(self.ids.len());
                &self.ids[start..end]
            }
            None => &[],
        }
    }

    /// 1-based position of `id` counting from the current id, which is at
    /// position 1. `None` if `id` is not at or after the current id.
    #[must_use]
    pub fn offset_from_current(&self, id: &TrackId) -> Option<usize> {
        self.from_current()
            .iter()
            .position(|other| other == id)
            .map(|index| index + 1)
    }

    #[must_use]
    pub fn next(&self) -> Option<&TrackId> {
        self.current_index().and_then(|index| self.ids.get(index + 1))
    }

    #[must_use]
    pub fn previous(&self) -> Option<&TrackId> {
        self.current_index()
            .and_then(|index| index.checked_sub(1))
            .and_then(|index| self.ids.get(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist(ids: &[&str], current: Option<&str>) -> Playlist {
        Playlist::new(
            ids.iter().copied().map(TrackId::from).collect(),
            current.map(TrackId::from),
        )
    }

    #[test]
    fn offsets_count_from_current() {
        let list = playlist(&["a", "b", "c", "d"], Some("b"));
        assert_eq!(list.offset_from_current(&"b".into()), Some(1));
        assert_eq!(list.offset_from_current(&"d".into()), Some(3));
        assert_eq!(list.offset_from_current(&"a".into()), None);
    }

    #[test]
    fn upcoming_excludes_current_and_is_bounded() {
        let list = playlist(&["a", "b", "c", "d"], Some("a"));
        assert_eq!(list.upcoming(2), &[TrackId::from("b"), TrackId::from("c")]);
        assert_eq!(list.upcoming(10).len(), 3);

        let list = playlist(&["a", "b"], Some("b"));
        assert!(list.upcoming(10).is_empty());
    }

    #[test]
    fn unknown_current_is_dropped() {
        let list = playlist(&["a"], Some("z"));
        assert_eq!(list.current(), None);
        assert!(list.from_current().is_empty());
        assert_eq!(list.next(), None);
    }

    #[test]
    fn next_and_previous() {
        let mut list = playlist(&["a", "b", "c"], Some("b"));
        assert_eq!(list.next(), Some(&"c".into()));
        assert_eq!(list.previous(), Some(&"a".into()));

        assert!(list.set_current(&"a".into()));
        assert_eq!(list.previous(), None);
        assert!(!list.set_current(&"x".into()));
        assert_eq!(list.current(), Some(&"a".into()));
    }
}
