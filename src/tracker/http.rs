use super::client::AnnounceRequest;
use super::error::TrackerError;
use super::response::{parse_announce_response, AnnounceResponse};
use crate::constants::{HTTP_TRACKER_TIMEOUT, USER_AGENT};
use reqwest::Client;

pub struct HttpTracker {
    client: Client,
    url: String,
}

impl HttpTracker {
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        let client = Client::builder()
            .timeout(HTTP_TRACKER_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(TrackerError::Http)?;

        Self::with_client(url, client)
    }

    /// Uses a caller-supplied HTTP client (proxy, TLS and timeout settings).
    pub fn with_client(url: &str, client: Client) -> Result<Self, TrackerError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TrackerError::UnsupportedTransport(url.to_string()));
        }

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub async fn announce(
        &self,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, TrackerError> {
        let url = self.announce_url(request);

        let response = self.client.get(&url).send().await?;
        let bytes = response.bytes().await?;

        parse_announce_response(&bytes)
    }

    /// Builds the announce URL. `info_hash` and `peer_id` are raw bytes, so
    /// they are percent-encoded by hand rather than through a UTF-8 query
    /// serializer.
    pub(crate) fn announce_url(&self, request: &AnnounceRequest) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{}info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            self.url,
            separator,
            url_encode(request.info_hash.as_bytes()),
            url_encode(request.peer_id.as_bytes()),
            request.port,
            request.uploaded,
            request.downloaded,
            request.left
        );

        let event_str = request.event.as_str();
        if !event_str.is_empty() {
            url.push_str(&format!("&event={}", event_str));
        }

        url
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn url_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~' {
                format!("{}", b as char)
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect()
}
