use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,

    /// Name the receiver announces to senders.
    pub device_name: String,

    /// Address of the Sonos speaker, as `host` or `host:port`.
    pub device_address: String,

    /// Base URL of the download backend's API.
    pub backend_url: Url,

    /// Base URL under which the backend serves finished audio files.
    pub audio_url: Url,

    /// Period of the look-ahead download and queue alignment loop.
    pub prefetch_interval: Duration,

    /// Number of upcoming tracks to scan for missing downloads.
    pub max_look_ahead: usize,

    /// Interval between backend polls while waiting for a download.
    pub download_poll_interval: Duration,

    pub user_agent: String,
}

impl Config {
    pub const DEFAULT_BACKEND_URL: &'static str = "http://localhost:8081";

    /// Path under the backend URL that serves finished downloads.
    pub const AUDIO_PATH: &'static str = "audio_download";

    pub const DEFAULT_PREFETCH_INTERVAL: Duration = Duration::from_secs(20);
    pub const DEFAULT_MAX_LOOK_AHEAD: usize = 10;
    pub const DEFAULT_DOWNLOAD_POLL_INTERVAL: Duration = Duration::from_millis(250);

    /// Creates a configuration for the speaker at `device_address` with
    /// all other settings at their defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the device address is empty.
    pub fn new(device_address: &str) -> Result<Self> {
        let device_address = device_address.trim();
        if device_address.is_empty() {
            return Err(Error::invalid_argument("device address is empty"));
        }

        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let user_agent = format!("{app_name}/{app_version}");
        trace!("user agent: {user_agent}");

        let backend_url = Url::parse(Self::DEFAULT_BACKEND_URL)?;
        let audio_url = crate::util::join_url(&backend_url, Self::AUDIO_PATH)?;

        Ok(Self {
            device_name: app_name.clone(),
            app_name,
            app_version,

            device_address: device_address.to_owned(),

            backend_url,
            audio_url,

            prefetch_interval: Self::DEFAULT_PREFETCH_INTERVAL,
            max_look_ahead: Self::DEFAULT_MAX_LOOK_AHEAD,
            download_poll_interval: Self::DEFAULT_DOWNLOAD_POLL_INTERVAL,

            user_agent,
        })
    }

    /// Points the configuration at another backend. Unless `audio_url` is
    /// given, audio is expected under the backend's download path.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if either URL cannot be a base URL.
    pub fn set_backend(&mut self, backend_url: Url, audio_url: Option<Url>) -> Result<()> {
        if backend_url.cannot_be_a_base() {
            return Err(Error::invalid_argument(format!(
                "backend url {backend_url} cannot be a base"
            )));
        }

        self.audio_url = match audio_url {
            Some(url) if url.cannot_be_a_base() => {
                return Err(Error::invalid_argument(format!(
                    "audio url {url} cannot be a base"
                )))
            }
            Some(url) => url,
            None => crate::util::join_url(&backend_url, Self::AUDIO_PATH)?,
        };
        self.backend_url = backend_url;

        Ok(())
    }
}
