//! Client for the download/transcode backend.
//!
//! The backend downloads a track by id, transcodes it and serves the
//! result as a file. Its state is observed by polling the history, which
//! lists every known record in one of three lists: `queue`, `pending` and
//! `done`.

use async_trait::async_trait;
use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    http::Client as HttpClient,
    playlist::TrackId,
    protocol::{
        self,
        metube::{AddRequest, DeleteRequest, History, Location, Reply},
    },
    util,
};

/// The operations this crate needs from a download backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetches all records the backend knows about.
    async fn history(&self) -> Result<History>;

    /// Requests a download of `id`, started immediately.
    async fn add(&self, id: &TrackId) -> Result<()>;

    /// Deletes the records of `ids` from the list at `location`.
    async fn delete(&self, ids: &[TrackId], location: Location) -> Result<()>;
}

/// A MeTube instance.
pub struct MeTube {
    http_client: HttpClient,
    history_url: Url,
    add_url: Url,
    delete_url: Url,
}

impl MeTube {
    /// Creates a client for the backend at `config.backend_url`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built or the backend URL
    /// cannot be a base.
    pub fn new(config: &Config) -> Result<Self> {
        let base = &config.backend_url;
        Ok(Self {
            http_client: HttpClient::new(config)?,
            history_url: util::join_url(base, "history")?,
            add_url: util::join_url(base, "add")?,
            delete_url: util::join_url(base, "delete")?,
        })
    }
}

#[async_trait]
impl Backend for MeTube {
    async fn history(&self) -> Result<History> {
        let request = self.http_client.get(self.history_url.clone());
        let body = self.http_client.text(request).await?;
        protocol::json(&body, "history")
    }

    async fn add(&self, id: &TrackId) -> Result<()> {
        debug!("requesting download of {id}");
        let request = self
            .http_client
            .post_json(self.add_url.clone(), &AddRequest::audio(id.clone()))?;
        let body = self.http_client.text(request).await?;
        protocol::json::<Reply>(&body, "add").and_then(check)
    }

    async fn delete(&self, ids: &[TrackId], location: Location) -> Result<()> {
        debug!("deleting {} record(s) from {location}", ids.len());
        let request = self.http_client.post_json(
            self.delete_url.clone(),
            &DeleteRequest {
                ids: ids.to_vec(),
                location,
            },
        )?;
        let body = self.http_client.text(request).await?;
        protocol::json::<Reply>(&body, "delete").and_then(check)
    }
}

/// Turns an error acknowledgement into an error.
fn check(reply: Reply) -> Result<()> {
    if reply.is_error() {
        return Err(Error::failed_precondition(
            reply.msg.unwrap_or_else(|| "backend refused request".to_owned()),
        ));
    }
    Ok(())
}
