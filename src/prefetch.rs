//! Look-ahead downloads of upcoming tracks.
//!
//! Each pass looks at the tracks following the current one and starts a
//! download for the first that the backend does not have, or that failed
//! to download. Only one download is started per pass so the backend is
//! not flooded when a long playlist arrives; the next pass picks up the
//! next track.

use tokio::task::JoinHandle;

use crate::{
    playlist::{Playlist, TrackId},
    protocol::metube::{History, Status},
    resolver::Resolver,
};

/// The first of `upcoming` that is unknown to the backend or failed.
#[must_use]
pub fn next_missing<'a>(history: &History, upcoming: &'a [TrackId]) -> Option<&'a TrackId> {
    upcoming.iter().find(|id| {
        history
            .find(id, None)
            .is_none_or(|record| record.status == Status::Error)
    })
}

#[derive(Clone)]
pub struct Prefetcher {
    resolver: Resolver,
    max_look_ahead: usize,
}

impl Prefetcher {
    #[must_use]
    pub fn new(resolver: Resolver, max_look_ahead: usize) -> Self {
        Self {
            resolver,
            max_look_ahead,
        }
    }

    /// Scans the upcoming tracks of `playlist` and starts downloading the
    /// first missing one in the background.
    ///
    /// Returns the handle of the started download, if any.
    pub async fn pass(&self, playlist: &Playlist) -> Option<JoinHandle<()>> {
        let upcoming = playlist.upcoming(self.max_look_ahead);
        if upcoming.is_empty() {
            trace!("nothing to prefetch");
            return None;
        }

        let history = match self.resolver.backend().history().await {
            Ok(history) => history,
            Err(e) => {
                error!("error retrieving history for prefetch: {e}");
                return None;
            }
        };

        let id = next_missing(&history, upcoming)?.clone();
        debug!("prefetching {id}");

        let resolver = self.resolver.clone();
        Some(tokio::spawn(async move {
            if resolver.ensure_downloaded(&id).await.is_none() {
                warn!("prefetch of {id} did not complete");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        protocol::metube::Location,
        testing::{record, song, FakeBackend, Request},
    };

    fn prefetcher(backend: &Arc<FakeBackend>, max_look_ahead: usize) -> Prefetcher {
        let resolver = Resolver::new(backend.clone(), Duration::from_millis(250));
        Prefetcher::new(resolver, max_look_ahead)
    }

    fn playlist(ids: &[&str], current: &str) -> Playlist {
        Playlist::new(
            ids.iter().copied().map(TrackId::from).collect(),
            Some(current.into()),
        )
    }

    #[test]
    fn missing_and_failed_tracks_are_picked() {
        let mut history = History::default();
        history.done.push(song("a", 100));
        history.queue.push(record("b", Status::Pending, None));
        history.done.push(record("c", Status::Error, None));

        let ids: Vec<TrackId> = ["a", "b", "c", "d"].map(TrackId::from).to_vec();
        assert_eq!(next_missing(&history, &ids), Some(&ids[2]));
        assert_eq!(next_missing(&history, &ids[3..]), Some(&ids[3]));
        assert_eq!(next_missing(&history, &ids[..2]), None);
    }

    #[tokio::test(start_paused = true)]
    async fn one_download_per_pass() {
        let backend = Arc::new(FakeBackend::default());
        backend.insert(Location::Done, song("a", 100));

        let handle = prefetcher(&backend, 10)
            .pass(&playlist(&["a", "b", "c", "d"], "a"))
            .await;
        handle.expect("download started").await.unwrap();

        let added: Vec<_> = backend
            .requests()
            .into_iter()
            .filter(|request| matches!(request, Request::Add(_)))
            .collect();
        assert_eq!(added, vec![Request::Add("b".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn look_ahead_is_bounded() {
        let backend = Arc::new(FakeBackend::default());
        backend.insert(Location::Done, song("b", 100));

        let list = playlist(&["a", "b", "c"], "a");
        assert!(prefetcher(&backend, 1).pass(&list).await.is_none());
        assert!(backend.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn current_track_is_not_prefetched() {
        let backend = Arc::new(FakeBackend::default());

        let list = playlist(&["a"], "a");
        assert!(prefetcher(&backend, 10).pass(&list).await.is_none());
        assert_eq!(backend.history_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_failure_skips_the_pass() {
        let backend = Arc::new(FakeBackend::default());
        backend.fail_history(true);

        let list = playlist(&["a", "b"], "a");
        assert!(prefetcher(&backend, 10).pass(&list).await.is_none());
        assert!(backend.requests().is_empty());
    }
}
