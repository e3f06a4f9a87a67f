use crate::upstream::{check_response, send_error};
use planet_dumper_common::{DumpMetadata, Result};
use reqwest::Client;

const DUMPS_PATH: &str = "dumps";
const SERVICE: &str = "dump-server";

/// Registers published dumps with a dump-server.
pub struct DumpServerClient {
    client: Client,
    endpoint: String,
    headers: Vec<(String, String)>,
}

impl DumpServerClient {
    pub fn new(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            headers: Vec::new(),
        }
    }

    /// Attach a header verbatim to every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_bearer_token(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {token}"))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST the metadata to `<endpoint>/dumps`.
    pub async fn register(&self, metadata: &DumpMetadata) -> Result<()> {
        let url = format!("{}/{}", self.endpoint, DUMPS_PATH);
        tracing::info!(%url, name = %metadata.name, "registering dump on dump-server");

        let mut request = self.client.post(&url).json(metadata);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| send_error(SERVICE, e))?;
        check_response(SERVICE, response).await?;
        Ok(())
    }
}
