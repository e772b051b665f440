//! Resolution of track ids to downloaded files.
//!
//! The backend offers no push notifications, so waiting for a download is a
//! bounded poll of its history: one lookup every poll interval (250 ms by
//! default) for at most 60 seconds. Every backend failure is logged and
//! reads as "not found", which makes the caller skip the track instead of
//! retrying forever.

use std::{sync::Arc, time::Duration};

use crate::{
    backend::Backend,
    playlist::TrackId,
    protocol::metube::{Location, MusicRecord, Status},
};

#[derive(Clone)]
pub struct Resolver {
    backend: Arc<dyn Backend>,
    poll_interval: Duration,
    max_attempts: u32,
}

impl Resolver {
    /// Longest time to wait for a download to show up as done.
    pub const MAX_WAIT: Duration = Duration::from_secs(60);

    /// Creates a resolver that polls every `poll_interval` while waiting.
    /// The number of polls is derived so that the total wait stays
    /// [`MAX_WAIT`](Self::MAX_WAIT): 240 at the default 250 ms.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, poll_interval: Duration) -> Self {
        let poll_interval = poll_interval.max(Duration::from_millis(1));
        let max_attempts = (Self::MAX_WAIT.as_millis() / poll_interval.as_millis()).max(1);

        Self {
            backend,
            poll_interval,
            max_attempts: u32::try_from(max_attempts).unwrap_or(u32::MAX),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Looks `id` up in `location`, or in all lists when `None`.
    ///
    /// With `wait`, keeps polling until the record appears or the wait is
    /// exhausted. A failed backend call ends the lookup right away.
    pub async fn resolve(
        &self,
        id: &TrackId,
        location: Option<Location>,
        wait: bool,
    ) -> Option<MusicRecord> {
        let mut attempt = 0;
        loop {
            trace!("resolving {id} (attempt {attempt})");

            let history = match self.backend.history().await {
                Ok(history) => history,
                Err(e) => {
                    error!("error retrieving history for {id}: {e}");
                    return None;
                }
            };

            if let Some(record) = history.find(id, location) {
                return Some(record);
            }

            if !wait || attempt >= self.max_attempts {
                if wait {
                    warn!("{id} did not show up within {}s", Self::MAX_WAIT.as_secs());
                }
                return None;
            }

            attempt += 1;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Returns the finished record of `id`, downloading it first if needed.
    ///
    /// A record in error is deleted from `done` before a fresh download is
    /// requested. No download is requested while one is queued or pending.
    pub async fn ensure_downloaded(&self, id: &TrackId) -> Option<MusicRecord> {
        debug!("ensuring {id} is downloaded");

        let existing = self.resolve(id, None, false).await;
        match existing.as_ref().map(|record| record.status) {
            Some(Status::Finished) => return existing,
            Some(Status::Error) => {
                debug!("{id} failed to download before, retrying");
                if let Err(e) = self.backend.delete(&[id.clone()], Location::Done).await {
                    error!("error deleting failed download of {id}: {e}");
                }
            }
            _ => {}
        }

        let in_flight = existing
            .as_ref()
            .and_then(|record| record.location)
            .is_some_and(Location::is_in_flight);
        if !in_flight {
            info!("requesting download of {id}");
            if let Err(e) = self.backend.add(id).await {
                error!("error requesting download of {id}: {e}");
                return None;
            }
        }

        self.resolve(id, Some(Location::Done), true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{record, FakeBackend, Request};
    use tokio::time::Instant;

    fn resolver(backend: &Arc<FakeBackend>) -> Resolver {
        Resolver::new(backend.clone(), Duration::from_millis(250))
    }

    #[test]
    fn attempts_follow_poll_interval() {
        let backend = Arc::new(FakeBackend::default());
        assert_eq!(resolver(&backend).max_attempts, 240);
        assert_eq!(
            Resolver::new(backend, Duration::from_secs(1)).max_attempts,
            60
        );
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_searches_all_lists_without_waiting() {
        let backend = Arc::new(FakeBackend::default());
        backend.insert(Location::Pending, record("a", Status::Pending, None));

        let found = resolver(&backend).resolve(&"a".into(), None, false).await;
        assert_eq!(found.and_then(|r| r.location), Some(Location::Pending));
        assert!(resolver(&backend)
            .resolve(&"a".into(), Some(Location::Done), false)
            .await
            .is_none());
        assert_eq!(backend.history_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_is_bounded() {
        let backend = Arc::new(FakeBackend::default());
        let start = Instant::now();

        let found = resolver(&backend)
            .resolve(&"missing".into(), Some(Location::Done), true)
            .await;

        assert!(found.is_none());
        assert_eq!(backend.history_calls(), 241);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_returns_once_done() {
        let backend = Arc::new(FakeBackend::default());
        backend.finish_after_polls("a", 4, record("a", Status::Finished, Some("a.mp3")));

        let found = resolver(&backend)
            .resolve(&"a".into(), Some(Location::Done), true)
            .await;
        assert!(found.is_some_and(|record| record.is_playable()));
        assert_eq!(backend.history_calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_failure_is_not_found() {
        let backend = Arc::new(FakeBackend::default());
        backend.fail_history(true);

        let start = Instant::now();
        let found = resolver(&backend).resolve(&"a".into(), None, true).await;
        assert!(found.is_none());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_records_are_returned_as_is() {
        let backend = Arc::new(FakeBackend::default());
        backend.insert(Location::Done, record("a", Status::Finished, Some("a.mp3")));

        let found = resolver(&backend).ensure_downloaded(&"a".into()).await;
        assert!(found.is_some());
        assert!(backend.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_records_are_added_then_awaited() {
        let backend = Arc::new(FakeBackend::default());
        backend.finish_after_polls("a", 2, record("a", Status::Finished, Some("a.mp3")));

        let found = resolver(&backend).ensure_downloaded(&"a".into()).await;
        assert!(found.is_some());
        assert_eq!(backend.requests(), vec![Request::Add("a".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_records_are_not_added_again() {
        for location in [Location::Queue, Location::Pending] {
            let backend = Arc::new(FakeBackend::default());
            backend.insert(location, record("a", Status::Pending, None));

            let found = resolver(&backend).ensure_downloaded(&"a".into()).await;
            assert!(found.is_none());
            assert!(backend.requests().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_downloads_are_deleted_and_retried() {
        let backend = Arc::new(FakeBackend::default());
        backend.insert(Location::Done, record("x", Status::Error, None));
        backend.finish_after_polls("x", 3, record("x", Status::Finished, Some("x.mp3")));

        let found = resolver(&backend).ensure_downloaded(&"x".into()).await;
        assert!(found.is_some_and(|record| record.is_playable()));
        assert_eq!(
            backend.requests(),
            vec![
                Request::Delete(vec!["x".into()], Location::Done),
                Request::Add("x".into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delete_does_not_prevent_retry() {
        let backend = Arc::new(FakeBackend::default());
        backend.insert(Location::Done, record("x", Status::Error, None));
        backend.fail_delete(true);

        resolver(&backend).ensure_downloaded(&"x".into()).await;
        assert!(backend
            .requests()
            .contains(&Request::Add("x".into())));
    }
}
