//! Resolving the replication sequence number a run dumps.
//!
//! A state source is either the number itself, an `http(s)://` URL or an
//! `s3://bucket/key` location of an osmosis-style `state.txt` document:
//!
//! ```text
//! #Sat May 04 12:00:02 UTC 2024
//! sequenceNumber=42
//! timestamp=2024-05-04T12\:00\:00Z
//! ```

use crate::storage::ObjectStore;
use crate::upstream::{check_response, send_error};
use planet_dumper_common::{Error, Result, SequenceNumber};
use reqwest::{Client, Url};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Where the sequence number of a run comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSource {
    Literal(SequenceNumber),
    Http(Url),
    ObjectStore { bucket: String, key: String },
}

impl FromStr for StateSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(number) = s.parse::<SequenceNumber>() {
            return Ok(StateSource::Literal(number));
        }

        if let Some(location) = s.strip_prefix("s3://") {
            return match location.split_once('/') {
                Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                    Ok(StateSource::ObjectStore {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    })
                }
                _ => Err(format!(
                    "invalid s3 state location '{s}', expected s3://<bucket>/<key>"
                )),
            };
        }

        match Url::parse(s) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(StateSource::Http(url)),
            _ => Err(format!(
                "invalid state source '{s}', expected a sequence number, \
                 an http(s) url or s3://<bucket>/<key>"
            )),
        }
    }
}

impl fmt::Display for StateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateSource::Literal(number) => write!(f, "{number}"),
            StateSource::Http(url) => write!(f, "{url}"),
            StateSource::ObjectStore { bucket, key } => write!(f, "s3://{bucket}/{key}"),
        }
    }
}

/// Extract the `sequenceNumber=<n>` value from a state document.
pub fn parse_sequence_number(document: &str) -> Result<SequenceNumber> {
    let value = document
        .lines()
        .find_map(|line| line.trim_end().strip_prefix("sequenceNumber="))
        .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| Error::invalid_state("no sequenceNumber=<n> line in state document"))?;

    value
        .parse::<SequenceNumber>()
        .map_err(|e| Error::invalid_state(format!("sequence number out of range: {e}")))
}

/// Resolves a [`StateSource`] once and remembers the result.
pub struct SequenceStateResolver {
    source: StateSource,
    http: Client,
    store: Option<Arc<dyn ObjectStore>>,
    resolved: OnceCell<SequenceNumber>,
}

impl SequenceStateResolver {
    pub fn new(source: StateSource, http: Client) -> Self {
        Self {
            source,
            http,
            store: None,
            resolved: OnceCell::new(),
        }
    }

    /// Object store used for `s3://` sources.
    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn source(&self) -> &StateSource {
        &self.source
    }

    /// The sequence number, fetching the state document on first use only.
    pub async fn resolve(&self) -> Result<SequenceNumber> {
        self.resolved
            .get_or_try_init(|| async {
                let number = self.fetch().await?;
                info!(source = %self.source, state = %number, "resolved sequence number");
                Ok(number)
            })
            .await
            .copied()
    }

    async fn fetch(&self) -> Result<SequenceNumber> {
        match &self.source {
            StateSource::Literal(number) => Ok(*number),
            StateSource::Http(url) => {
                debug!(%url, "fetching state document");
                let response = self
                    .http
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| send_error("state document", e))?;
                let response = check_response("state document", response).await?;
                let body = response
                    .text()
                    .await
                    .map_err(|e| send_error("state document", e))?;
                parse_sequence_number(&body)
            }
            StateSource::ObjectStore { bucket, key } => {
                let store = self
                    .store
                    .as_ref()
                    .ok_or_else(|| Error::config("an s3:// state source needs an object store"))?;
                debug!(bucket, key, "reading state document");
                let body = store.get_object_text(bucket, key).await?;
                parse_sequence_number(&body)
            }
        }
    }
}
