//! In-memory stand-ins for the backend and the renderer.

use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use url::Url;

use crate::{
    backend::Backend,
    device::{Device, Queue, QueueEntry, TrackPosition},
    error::{Error, Result},
    playlist::TrackId,
    protocol::metube::{Entry, History, Location, MusicRecord, Status},
};

pub fn audio_url() -> Url {
    Url::parse("http://localhost:8081/audio_download").unwrap()
}

pub fn record(id: &str, status: Status, filename: Option<&str>) -> MusicRecord {
    MusicRecord {
        id: id.into(),
        title: format!("title of {id}"),
        size: None,
        filename: filename.map(str::to_owned),
        status,
        entry: Entry::default(),
        location: None,
    }
}

/// A finished record of `id` lasting `secs`, served as `{id}.mp3`.
pub fn song(id: &str, secs: u64) -> MusicRecord {
    let mut record = record(id, Status::Finished, Some(&format!("{id}.mp3")));
    #[allow(clippy::cast_precision_loss)]
    let duration = secs as f64;
    record.entry.duration = Some(duration);
    record
}

/// URI the device is given for [`song`] `id`.
pub fn song_uri(id: &str) -> String {
    format!("{}/{id}.mp3", audio_url())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Add(TrackId),
    Delete(Vec<TrackId>, Location),
}

#[derive(Default)]
struct BackendState {
    history: History,
    history_calls: usize,
    scheduled: Vec<(usize, MusicRecord)>,
    requests: Vec<Request>,
    fail_history: bool,
    fail_add: bool,
    fail_delete: bool,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn insert(&self, location: Location, record: MusicRecord) {
        let mut state = lock(&self.state);
        let list = match location {
            Location::Queue => &mut state.history.queue,
            Location::Pending => &mut state.history.pending,
            Location::Done => &mut state.history.done,
        };
        list.retain(|other| other.id != record.id);
        list.push(record);
    }

    /// Moves `record` to `done` once `polls` more history calls have missed
    /// it: it shows up on call `polls + 1`.
    pub fn finish_after_polls(&self, id: &str, polls: usize, record: MusicRecord) {
        assert_eq!(record.id.as_str(), id);
        let mut state = lock(&self.state);
        let due = state.history_calls + polls;
        state.scheduled.push((due, record));
    }

    pub fn history_calls(&self) -> usize {
        lock(&self.state).history_calls
    }

    pub fn requests(&self) -> Vec<Request> {
        lock(&self.state).requests.clone()
    }

    pub fn fail_history(&self, fail: bool) {
        lock(&self.state).fail_history = fail;
    }

    pub fn fail_add(&self, fail: bool) {
        lock(&self.state).fail_add = fail;
    }

    pub fn fail_delete(&self, fail: bool) {
        lock(&self.state).fail_delete = fail;
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn history(&self) -> Result<History> {
        let mut state = lock(&self.state);
        if state.fail_history {
            return Err(Error::unavailable("history unavailable"));
        }

        state.history_calls += 1;
        let calls = state.history_calls;
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.scheduled)
            .into_iter()
            .partition(|(at, _)| calls > *at);
        state.scheduled = waiting;
        for (_, record) in due {
            for location in Location::ALL {
                let list = match location {
                    Location::Queue => &mut state.history.queue,
                    Location::Pending => &mut state.history.pending,
                    Location::Done => &mut state.history.done,
                };
                list.retain(|other| other.id != record.id);
            }
            state.history.done.push(record);
        }

        Ok(state.history.clone())
    }

    async fn add(&self, id: &TrackId) -> Result<()> {
        let mut state = lock(&self.state);
        state.requests.push(Request::Add(id.clone()));
        if state.fail_add {
            return Err(Error::unavailable("add refused"));
        }
        Ok(())
    }

    async fn delete(&self, ids: &[TrackId], location: Location) -> Result<()> {
        let mut state = lock(&self.state);
        state.requests.push(Request::Delete(ids.to_vec(), location));
        if state.fail_delete {
            return Err(Error::unavailable("delete refused"));
        }

        let list = match location {
            Location::Queue => &mut state.history.queue,
            Location::Pending => &mut state.history.pending,
            Location::Done => &mut state.history.done,
        };
        list.retain(|record| !ids.contains(&record.id));
        Ok(())
    }
}

/// Mutating calls made on a [`FakeDevice`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceCall {
    Play(Option<String>),
    Pause,
    Stop,
    Seek(Duration),
    Select(usize),
    Move(usize, usize, usize),
    Insert(String, usize),
    Remove(usize, usize),
    SetVolume(u8),
}

struct DeviceState {
    queue: Vec<String>,
    selected: Option<usize>,
    calls: Vec<DeviceCall>,
    volume: Option<u8>,
    track: TrackPosition,
    fail: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            queue: Vec::new(),
            selected: None,
            calls: Vec::new(),
            volume: Some(30),
            track: TrackPosition::default(),
            fail: false,
        }
    }
}

/// A renderer with an exact positional queue.
#[derive(Default)]
pub struct FakeDevice {
    state: Mutex<DeviceState>,
}

impl FakeDevice {
    pub fn set_queue(&self, uris: &[&str]) {
        lock(&self.state).queue = uris.iter().map(|uri| (*uri).to_owned()).collect();
    }

    pub fn queue_uris(&self) -> Vec<String> {
        lock(&self.state).queue.clone()
    }

    /// 1-based position of the selected entry.
    pub fn selected(&self) -> Option<usize> {
        lock(&self.state).selected
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Makes every call fail.
    pub fn fail(&self, fail: bool) {
        lock(&self.state).fail = fail;
    }

    /// Volume reported by the device, or a failing volume query for `None`.
    pub fn set_reported_volume(&self, volume: Option<u8>) {
        lock(&self.state).volume = volume;
    }

    pub fn set_track(&self, position: Duration, duration: Duration) {
        lock(&self.state).track = TrackPosition { position, duration };
    }

    fn log_call(&self, call: DeviceCall) -> Result<MutexGuard<'_, DeviceState>> {
        let mut state = lock(&self.state);
        if state.fail {
            return Err(Error::unavailable("device unreachable"));
        }
        state.calls.push(call);
        Ok(state)
    }

    fn check_position(state: &DeviceState, position: usize) -> Result<()> {
        if position == 0 || position > state.queue.len() {
            return Err(Error::out_of_range(format!("no queue entry at {position}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Device for FakeDevice {
    async fn play(&self, uri: Option<&str>) -> Result<bool> {
        let mut state = self.log_call(DeviceCall::Play(uri.map(str::to_owned)))?;
        if let Some(uri) = uri {
            state.queue.push(uri.to_owned());
            state.selected = Some(state.queue.len());
        }
        Ok(true)
    }

    async fn pause(&self) -> Result<()> {
        self.log_call(DeviceCall::Pause).map(|_| ())
    }

    async fn stop(&self) -> Result<()> {
        self.log_call(DeviceCall::Stop).map(|_| ())
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        let mut state = self.log_call(DeviceCall::Seek(position))?;
        state.track.position = position;
        Ok(())
    }

    async fn select_queue_entry(&self, position: usize) -> Result<bool> {
        let mut state = self.log_call(DeviceCall::Select(position))?;
        Self::check_position(&state, position)?;
        state.selected = Some(position);
        Ok(true)
    }

    async fn move_queue_entries(&self, from: usize, count: usize, to: usize) -> Result<()> {
        let mut state = self.log_call(DeviceCall::Move(from, count, to))?;
        Self::check_position(&state, from)?;
        let end = (from - 1 + count).min(state.queue.len());
        let moved: Vec<_> = state.queue.drain(from - 1..end).collect();
        let at = to.saturating_sub(1).min(state.queue.len());
        for (offset, uri) in moved.into_iter().enumerate() {
            state.queue.insert(at + offset, uri);
        }
        Ok(())
    }

    async fn insert_queue_entry(&self, uri: &str, position: usize) -> Result<()> {
        let mut state = self.log_call(DeviceCall::Insert(uri.to_owned(), position))?;
        let at = position.saturating_sub(1).min(state.queue.len());
        state.queue.insert(at, uri.to_owned());
        Ok(())
    }

    async fn remove_queue_entries(&self, from: usize, count: usize) -> Result<()> {
        let mut state = self.log_call(DeviceCall::Remove(from, count))?;
        Self::check_position(&state, from)?;
        let end = (from - 1 + count).min(state.queue.len());
        state.queue.drain(from - 1..end);
        Ok(())
    }

    async fn queue(&self) -> Result<Queue> {
        let state = lock(&self.state);
        if state.fail {
            return Err(Error::unavailable("device unreachable"));
        }

        let entries: Vec<_> = state
            .queue
            .iter()
            .enumerate()
            .map(|(index, uri)| QueueEntry {
                id: format!("Q:0/{}", index + 1),
                parent_id: "Q:0".to_owned(),
                uri: uri.clone(),
            })
            .collect();
        Ok(Queue {
            total: entries.len(),
            entries,
        })
    }

    async fn volume(&self) -> Result<u8> {
        let state = lock(&self.state);
        match state.volume {
            Some(volume) if !state.fail => Ok(volume),
            _ => Err(Error::unavailable("volume unavailable")),
        }
    }

    async fn set_volume(&self, level: u8) -> Result<()> {
        let mut state = self.log_call(DeviceCall::SetVolume(level))?;
        state.volume = Some(level);
        Ok(())
    }

    async fn current_track(&self) -> Result<TrackPosition> {
        let state = lock(&self.state);
        if state.fail {
            return Err(Error::unavailable("device unreachable"));
        }
        Ok(state.track)
    }
}
