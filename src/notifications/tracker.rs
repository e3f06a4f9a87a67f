//! Reporting run progress to an external action-tracking service.

use crate::upstream::{check_response, send_error};
use async_trait::async_trait;
use parking_lot::Mutex;
use planet_dumper_common::{Error, Result, SequenceNumber};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

const SERVICE: &str = "action tracker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    Active,
    Completed,
    Failed,
}

/// Tracks one action per run: created once the state is known, updated
/// when the run ends.
#[async_trait]
pub trait ActionTracker: Send + Sync {
    async fn create_action(&self, state: SequenceNumber, metadata: Value) -> Result<()>;

    async fn update_action(&self, status: ActionStatus, metadata: Value) -> Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateActionBody<'a> {
    state: SequenceNumber,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_id: Option<u32>,
    status: ActionStatus,
    metadata: &'a Value,
}

#[derive(Debug, Serialize)]
struct UpdateActionBody<'a> {
    status: ActionStatus,
    metadata: &'a Value,
}

#[derive(Debug, Deserialize)]
struct CreatedAction {
    #[serde(alias = "actionId")]
    id: Value,
}

/// [`ActionTracker`] speaking to `<endpoint>/actions`.
pub struct HttpActionTracker {
    client: Client,
    endpoint: String,
    service_id: Option<u32>,
    action_id: Mutex<Option<String>>,
}

impl HttpActionTracker {
    pub fn new(client: Client, endpoint: &str, service_id: Option<u32>) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            service_id,
            action_id: Mutex::new(None),
        }
    }

    pub fn action_id(&self) -> Option<String> {
        self.action_id.lock().clone()
    }
}

#[async_trait]
impl ActionTracker for HttpActionTracker {
    async fn create_action(&self, state: SequenceNumber, metadata: Value) -> Result<()> {
        let url = format!("{}/actions", self.endpoint);
        let body = CreateActionBody {
            state,
            service_id: self.service_id,
            status: ActionStatus::Active,
            metadata: &metadata,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;
        let response = check_response(SERVICE, response).await?;

        let created: CreatedAction = response
            .json()
            .await
            .map_err(|e| Error::general(format!("invalid {SERVICE} response: {e}")))?;
        let id = match created.id {
            Value::String(id) => id,
            other => other.to_string(),
        };

        info!(action_id = %id, state = %state, "created action");
        *self.action_id.lock() = Some(id);
        Ok(())
    }

    async fn update_action(&self, status: ActionStatus, metadata: Value) -> Result<()> {
        let id = self
            .action_id()
            .ok_or_else(|| Error::general("no action has been created for this run"))?;
        let url = format!("{}/actions/{}", self.endpoint, id);

        let response = self
            .client
            .patch(&url)
            .json(&UpdateActionBody {
                status,
                metadata: &metadata,
            })
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;
        check_response(SERVICE, response).await?;

        debug!(action_id = %id, ?status, "updated action");
        Ok(())
    }
}
