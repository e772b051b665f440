//! UPnP SOAP envelopes and responses as spoken by Sonos speakers.
//!
//! Requests are SOAP 1.1 envelopes posted to a service's control URL with a
//! `SOAPACTION` header. Responses carry their output arguments as leaf
//! elements of `<u:{Action}Response>`:
//!
//! ```xml
//! <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
//!   <s:Body>
//!     <u:GetVolumeResponse xmlns:u="urn:schemas-upnp-org:service:RenderingControl:1">
//!       <CurrentVolume>23</CurrentVolume>
//!     </u:GetVolumeResponse>
//!   </s:Body>
//! </s:Envelope>
//! ```
//!
//! Queue listings come back from `Browse` as an escaped DIDL-Lite document
//! in the `Result` argument, one `<item>` per queue entry.

use std::{borrow::Cow, collections::HashMap};

use quick_xml::{escape::escape, events::Event, Reader};

use crate::error::{Error, Result};

/// The UPnP services used to drive a speaker.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Service {
    AvTransport,
    RenderingControl,
    ContentDirectory,
}

impl Service {
    #[must_use]
    pub fn urn(self) -> &'static str {
        match self {
            Self::AvTransport => "urn:schemas-upnp-org:service:AVTransport:1",
            Self::RenderingControl => "urn:schemas-upnp-org:service:RenderingControl:1",
            Self::ContentDirectory => "urn:schemas-upnp-org:service:ContentDirectory:1",
        }
    }

    #[must_use]
    pub fn control_path(self) -> &'static str {
        match self {
            Self::AvTransport => "/MediaRenderer/AVTransport/Control",
            Self::RenderingControl => "/MediaRenderer/RenderingControl/Control",
            Self::ContentDirectory => "/MediaServer/ContentDirectory/Control",
        }
    }

    /// Value of the `SOAPACTION` header for `action`.
    #[must_use]
    pub fn soap_action(self, action: &str) -> String {
        format!("\"{}#{action}\"", self.urn())
    }
}

/// Builds the request envelope for `action` with `args` in order.
#[must_use]
pub fn envelope(service: Service, action: &str, args: &[(&str, Cow<'_, str>)]) -> String {
    let mut body = String::with_capacity(512);
    body.push_str(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
         s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\"><s:Body>",
    );
    body.push_str(&format!("<u:{action} xmlns:u=\"{}\">", service.urn()));
    for (name, value) in args {
        body.push_str(&format!("<{name}>{}</{name}>", escape(value.as_ref())));
    }
    body.push_str(&format!("</u:{action}></s:Body></s:Envelope>"));
    body
}

/// Collects the text of every leaf element in `xml`, keyed by local name.
///
/// Works for SOAP responses, whose output arguments are uniquely named
/// leaves, and for device descriptions when only the first occurrence of
/// a name matters.
///
/// # Errors
///
/// Returns `DataLoss` if `xml` is not well-formed.
pub fn leaf_values(xml: &str) -> Result<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut values = HashMap::new();
    let mut open: Option<String> = None;
    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                open = Some(String::from_utf8_lossy(element.local_name().as_ref()).into_owned());
            }
            Event::Empty(element) => {
                let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
                values.entry(name).or_default();
            }
            Event::Text(text) => {
                if let Some(name) = open.take() {
                    values.entry(name).or_insert(text.unescape()?.into_owned());
                }
            }
            Event::End(_) => {
                // An element closed without text in between is an empty value.
                if let Some(name) = open.take() {
                    values.entry(name).or_default();
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(values)
}

/// Returns the output argument `name` of a SOAP response.
///
/// # Errors
///
/// Returns `NotFound` if the response lacks the argument.
pub fn argument<'a>(values: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    values
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| Error::not_found(format!("response argument {name} missing")))
}

/// An `<item>` of a DIDL-Lite queue listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DidlItem {
    pub id: String,
    pub parent_id: String,
    pub uri: String,
    pub title: Option<String>,
}

/// Parses the items of a DIDL-Lite document.
///
/// # Errors
///
/// Returns `DataLoss` if `didl` is not well-formed.
pub fn didl_items(didl: &str) -> Result<Vec<DidlItem>> {
    let mut reader = Reader::from_str(didl);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<DidlItem> = None;
    let mut field: Option<Vec<u8>> = None;
    loop {
        match reader.read_event()? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"item" => {
                    let mut item = DidlItem::default();
                    if let Some(id) = element.try_get_attribute("id")? {
                        item.id = id.unescape_value()?.into_owned();
                    }
                    if let Some(parent) = element.try_get_attribute("parentID")? {
                        item.parent_id = parent.unescape_value()?.into_owned();
                    }
                    current = Some(item);
                }
                name @ (b"res" | b"title") => field = Some(name.to_vec()),
                _ => field = None,
            },
            Event::Text(text) => {
                if let (Some(item), Some(name)) = (current.as_mut(), field.take()) {
                    let value = text.unescape()?.into_owned();
                    match name.as_slice() {
                        b"res" if item.uri.is_empty() => item.uri = value,
                        b"title" => item.title = Some(value),
                        _ => {}
                    }
                }
            }
            Event::End(element) => {
                field = None;
                if element.local_name().as_ref() == b"item" {
                    if let Some(item) = current.take() {
                        items.push(item);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(items)
}
