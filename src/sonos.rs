//! A Sonos speaker driven over UPnP.
//!
//! Sonos speakers expose their controls as SOAP services on port 1400.
//! Playback from the speaker's own queue requires the transport to point at
//! `x-rincon-queue:{UDN}#0`, where the UDN comes from the device
//! description. It is fetched once and cached.
//!
//! Queue reordering on Sonos takes an "insert before" position, counted
//! before the moved entries are taken out. [`Device::move_queue_entries`]
//! takes the resulting position instead and translates.

use std::{borrow::Cow, collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use tokio::sync::OnceCell;
use url::Url;

use crate::{
    config::Config,
    device::{Device, Queue, QueueEntry, TrackPosition},
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::upnp::{self, Service},
    util,
};

/// Sonos reorders by "insert before" counted on the queue before the move;
/// `to` is where the first moved entry ends up.
fn insert_before(from: usize, count: usize, to: usize) -> usize {
    if to > from {
        to + count
    } else {
        to
    }
}

pub struct Sonos {
    http_client: HttpClient,
    base_url: Url,
    udn: OnceCell<String>,
}

impl Sonos {
    /// Port of the speaker's UPnP services.
    pub const DEFAULT_PORT: u16 = 1400;

    /// Object id of the speaker's play queue in its content directory.
    const QUEUE_OBJECT_ID: &'static str = "Q:0";

    /// Entries requested per `Browse` call.
    const BROWSE_PAGE_SIZE: usize = 100;

    const DEVICE_DESCRIPTION_PATH: &'static str = "/xml/device_description.xml";

    /// Creates a client for the speaker at `config.device_address`, given as
    /// a host name or IP address with optional port.
    ///
    /// # Errors
    ///
    /// Returns error if the address does not form a valid URL or the HTTP
    /// client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let mut base_url = Url::parse(&format!("http://{}", config.device_address))?;
        if base_url.host_str().is_none_or(str::is_empty) || base_url.path() != "/" {
            return Err(Error::invalid_argument(format!(
                "invalid device address {}",
                config.device_address
            )));
        }
        if base_url.port().is_none() {
            base_url
                .set_port(Some(Self::DEFAULT_PORT))
                .map_err(|()| Error::invalid_argument("cannot set device port"))?;
        }
        debug!("sonos device at {base_url}");

        Ok(Self {
            http_client: HttpClient::new(config)?,
            base_url,
            udn: OnceCell::new(),
        })
    }

    /// Invokes `action` on `service` and returns the response arguments.
    async fn call(
        &self,
        service: Service,
        action: &str,
        args: &[(&str, Cow<'_, str>)],
    ) -> Result<HashMap<String, String>> {
        trace!("{action}: {args:?}");
        let url = self.base_url.join(service.control_path())?;
        let body = upnp::envelope(service, action, args);

        let soap_action = HeaderValue::from_str(&service.soap_action(action))
            .map_err(|e| Error::internal(e.to_string()))?;
        let request = self.http_client.post_xml(
            url,
            body,
            [(HeaderName::from_static("soapaction"), soap_action)],
        );

        let response = self.http_client.text(request).await?;
        upnp::leaf_values(&response)
    }

    async fn av_transport(
        &self,
        action: &str,
        args: &[(&str, Cow<'_, str>)],
    ) -> Result<HashMap<String, String>> {
        let mut with_instance = Vec::with_capacity(args.len() + 1);
        with_instance.push(("InstanceID", Cow::Borrowed("0")));
        with_instance.extend_from_slice(args);
        self.call(Service::AvTransport, action, &with_instance).await
    }

    /// The speaker's unique device name, like `RINCON_000E58A0123401400`.
    async fn udn(&self) -> Result<&str> {
        self.udn
            .get_or_try_init(|| async {
                let url = self.base_url.join(Self::DEVICE_DESCRIPTION_PATH)?;
                let description = self.http_client.text(self.http_client.get(url)).await?;
                let values = upnp::leaf_values(&description)?;
                let udn = upnp::argument(&values, "UDN")?;
                let udn = udn.strip_prefix("uuid:").unwrap_or(udn).to_owned();
                debug!("sonos udn: {udn}");
                Ok::<_, Error>(udn)
            })
            .await
            .map(String::as_str)
    }

    /// Points the transport at the speaker's own queue.
    async fn use_queue(&self) -> Result<()> {
        let queue_uri = format!("x-rincon-queue:{}#0", self.udn().await?);
        self.av_transport(
            "SetAVTransportURI",
            &[
                ("CurrentURI", queue_uri.into()),
                ("CurrentURIMetaData", "".into()),
            ],
        )
        .await
        .map(|_| ())
    }

    /// Adds `uri` at `position`, or at the end for position 0, and returns
    /// the position it was enqueued at.
    async fn enqueue(&self, uri: &str, position: usize) -> Result<usize> {
        let response = self
            .av_transport(
                "AddURIToQueue",
                &[
                    ("EnqueuedURI", uri.into()),
                    ("EnqueuedURIMetaData", "".into()),
                    ("DesiredFirstTrackNumberEnqueued", position.to_string().into()),
                    ("EnqueueAsNext", "0".into()),
                ],
            )
            .await?;
        let enqueued = upnp::argument(&response, "FirstTrackNumberEnqueued")?.parse()?;
        Ok(enqueued)
    }

    async fn browse_queue(&self, start: usize) -> Result<(Vec<QueueEntry>, usize, usize)> {
        let response = self
            .call(
                Service::ContentDirectory,
                "Browse",
                &[
                    ("ObjectID", Self::QUEUE_OBJECT_ID.into()),
                    ("BrowseFlag", "BrowseDirectChildren".into()),
                    ("Filter", "*".into()),
                    ("StartingIndex", start.to_string().into()),
                    ("RequestedCount", Self::BROWSE_PAGE_SIZE.to_string().into()),
                    ("SortCriteria", "".into()),
                ],
            )
            .await?;

        let returned = upnp::argument(&response, "NumberReturned")?.parse()?;
        let total = upnp::argument(&response, "TotalMatches")?.parse()?;
        let didl = upnp::argument(&response, "Result")?;
        let entries = if didl.is_empty() {
            Vec::new()
        } else {
            upnp::didl_items(didl)?
                .into_iter()
                .map(|item| QueueEntry {
                    id: item.id,
                    parent_id: item.parent_id,
                    uri: item.uri,
                })
                .collect()
        };

        Ok((entries, returned, total))
    }
}

#[async_trait]
impl Device for Sonos {
    async fn play(&self, uri: Option<&str>) -> Result<bool> {
        if let Some(uri) = uri {
            let position = self.enqueue(uri, 0).await?;
            debug!("enqueued {uri} at {position}");
            if !self.select_queue_entry(position).await? {
                return Ok(false);
            }
        }

        self.av_transport("Play", &[("Speed", "1".into())])
            .await
            .map(|_| true)
    }

    async fn pause(&self) -> Result<()> {
        self.av_transport("Pause", &[]).await.map(|_| ())
    }

    async fn stop(&self) -> Result<()> {
        self.av_transport("Stop", &[]).await.map(|_| ())
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        self.av_transport(
            "Seek",
            &[
                ("Unit", "REL_TIME".into()),
                ("Target", util::format_hms(position).into()),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn select_queue_entry(&self, position: usize) -> Result<bool> {
        if position == 0 {
            return Err(Error::out_of_range("queue positions start at 1"));
        }

        self.use_queue().await?;
        self.av_transport(
            "Seek",
            &[
                ("Unit", "TRACK_NR".into()),
                ("Target", position.to_string().into()),
            ],
        )
        .await
        .map(|_| true)
    }

    async fn move_queue_entries(&self, from: usize, count: usize, to: usize) -> Result<()> {
        if from == 0 || to == 0 || count == 0 {
            return Err(Error::out_of_range(format!(
                "cannot move {count} entries from {from} to {to}"
            )));
        }
        if from == to {
            return Ok(());
        }

        self.av_transport(
            "ReorderTracksInQueue",
            &[
                ("StartingIndex", from.to_string().into()),
                ("NumberOfTracks", count.to_string().into()),
                (
                    "InsertBefore",
                    insert_before(from, count, to).to_string().into(),
                ),
                ("UpdateID", "0".into()),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn insert_queue_entry(&self, uri: &str, position: usize) -> Result<()> {
        if position == 0 {
            return Err(Error::out_of_range("queue positions start at 1"));
        }

        self.enqueue(uri, position).await.map(|_| ())
    }

    async fn remove_queue_entries(&self, from: usize, count: usize) -> Result<()> {
        self.av_transport(
            "RemoveTrackRangeFromQueue",
            &[
                ("UpdateID", "0".into()),
                ("StartingIndex", from.to_string().into()),
                ("NumberOfTracks", count.to_string().into()),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn queue(&self) -> Result<Queue> {
        let mut queue = Queue::default();
        loop {
            let (entries, returned, total) = self.browse_queue(queue.entries.len()).await?;
            queue.total = total;
            queue.entries.extend(entries);
            if returned == 0 || queue.entries.len() >= total {
                break;
            }
        }

        Ok(queue)
    }

    async fn volume(&self) -> Result<u8> {
        let response = self
            .call(
                Service::RenderingControl,
                "GetVolume",
                &[("InstanceID", "0".into()), ("Channel", "Master".into())],
            )
            .await?;
        let volume = upnp::argument(&response, "CurrentVolume")?.parse()?;
        Ok(volume)
    }

    async fn set_volume(&self, level: u8) -> Result<()> {
        self.call(
            Service::RenderingControl,
            "SetVolume",
            &[
                ("InstanceID", "0".into()),
                ("Channel", "Master".into()),
                ("DesiredVolume", level.min(100).to_string().into()),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn current_track(&self) -> Result<TrackPosition> {
        let response = self.av_transport("GetPositionInfo", &[]).await?;
        let position = upnp::argument(&response, "RelTime")
            .ok()
            .and_then(util::parse_hms)
            .unwrap_or_default();
        let duration = upnp::argument(&response, "TrackDuration")
            .ok()
            .and_then(util::parse_hms)
            .unwrap_or_default();
        Ok(TrackPosition { position, duration })
    }
}
