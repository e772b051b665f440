//! Alignment of the device queue with the logical playlist.
//!
//! Starting at the current track, the longest run of tracks that are
//! downloaded and finished must sit at device positions 1, 2, 3, ... in
//! playlist order. The run ends at the first track that is not ready;
//! nothing past it is touched until it is.
//!
//! Device queue operations are positional, so every pass works from one
//! fresh snapshot and plans against a local copy that is updated after each
//! planned operation. Running a pass twice without outside changes plans
//! nothing the second time.

use std::sync::Arc;

use url::Url;

use crate::{
    backend::Backend,
    device::Device,
    error::{Error, Result},
    playlist::Playlist,
    protocol::metube::{Location, MusicRecord},
    util,
};

/// A single device queue mutation, with 1-based positions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueOp {
    Insert { uri: String, position: usize },
    Move { from: usize, to: usize },
}

/// Plans the operations that put `targets` at the head of a device queue
/// currently holding `queue`, in order.
#[must_use]
pub fn plan(queue: &[String], targets: &[String]) -> Vec<QueueOp> {
    let mut model = queue.to_vec();
    let mut ops = Vec::new();

    for (index, uri) in targets.iter().enumerate() {
        // Entries before `index` are already placed; only look behind them.
        let found = model[index..]
            .iter()
            .position(|other| other == uri)
            .map(|offset| index + offset);

        match found {
            Some(found) if found == index => {}
            Some(found) => {
                let entry = model.remove(found);
                model.insert(index, entry);
                ops.push(QueueOp::Move {
                    from: found + 1,
                    to: index + 1,
                });
            }
            None => {
                model.insert(index, uri.clone());
                ops.push(QueueOp::Insert {
                    uri: uri.clone(),
                    position: index + 1,
                });
            }
        }
    }

    ops
}

#[derive(Clone)]
pub struct Reconciler {
    device: Arc<dyn Device>,
    backend: Arc<dyn Backend>,
    audio_url: Url,
}

impl Reconciler {
    #[must_use]
    pub fn new(device: Arc<dyn Device>, backend: Arc<dyn Backend>, audio_url: Url) -> Self {
        Self {
            device,
            backend,
            audio_url,
        }
    }

    /// The URI the device plays `record` from.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the record has no file yet.
    pub fn uri_for(&self, record: &MusicRecord) -> Result<String> {
        let filename = record
            .filename
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::not_found(format!("{} has no file", record.id)))?;
        util::join_url(&self.audio_url, filename).map(String::from)
    }

    /// 1-based position of `uri` in a fresh device queue snapshot.
    pub async fn find_device_index(&self, uri: &str) -> Option<usize> {
        match self.device.queue().await {
            Ok(queue) => queue.position_of(uri),
            Err(e) => {
                error!("error checking device queue for {uri}: {e}");
                None
            }
        }
    }

    /// Runs one alignment pass and returns the number of operations issued.
    ///
    /// # Errors
    ///
    /// Returns error if the device or the backend cannot be queried, or a
    /// device operation fails. Operations issued before the failure stay.
    pub async fn align(&self, playlist: &Playlist) -> Result<usize> {
        let snapshot = self.device.queue().await?;
        let history = self.backend.history().await?;

        let mut targets = Vec::new();
        for id in playlist.from_current() {
            match history.find(id, Some(Location::Done)) {
                Some(record) if record.is_playable() => targets.push(self.uri_for(&record)?),
                _ => {
                    trace!("{id} not ready, aligning {} track(s)", targets.len());
                    break;
                }
            }
        }

        let ops = plan(&snapshot.uris(), &targets);
        for op in &ops {
            match op {
                QueueOp::Insert { uri, position } => {
                    info!("adding {uri} to device queue at {position}");
                    self.device.insert_queue_entry(uri, *position).await?;
                }
                QueueOp::Move { from, to } => {
                    info!("moving device queue entry from {from} to {to}");
                    self.device.move_queue_entries(*from, 1, *to).await?;
                }
            }
        }

        Ok(ops.len())
    }

    /// Runs one alignment pass, logging the outcome. A failed pass is left
    /// to the next one.
    pub async fn heal(&self, playlist: &Playlist) {
        match self.align(playlist).await {
            Ok(0) => trace!("device queue already aligned"),
            Ok(count) => debug!("device queue aligned with {count} operation(s)"),
            Err(e) => error!("error aligning device queue: {e}"),
        }
    }

    /// Removes every entry from the device queue.
    ///
    /// # Errors
    ///
    /// Returns error if the device queue cannot be read or cleared.
    pub async fn clear(&self) -> Result<()> {
        let queue = self.device.queue().await?;
        info!("device queue has {} track(s), clearing", queue.total);
        if queue.total > 0 {
            self.device.remove_queue_entries(1, queue.total).await?;
        }
        Ok(())
    }
}
