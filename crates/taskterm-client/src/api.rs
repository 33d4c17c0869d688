use tracing::debug;

use taskterm_types::{ExecSessionRequest, ExecSessionResponse, SessionDescriptor, TasktermError};

use crate::config::ClientConfig;

/// HTTP client for exec-session creation.
pub struct ExecApi {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl ExecApi {
    pub fn new(config: &ClientConfig) -> Result<Self, TasktermError> {
        // Cookie store so a backend-issued affinity cookie sticks to
        // follow-up requests as well as the socket.
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.connect_timeout)
            .build()
            .map_err(|e| TasktermError::Api(format!("http client construction failed: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn create_url(&self) -> String {
        format!("{}/api/exec-sessions", self.base_url)
    }

    /// Ask the backend for a new exec session into the task's container.
    /// Returns the one-time connection key and router address.
    pub async fn create_exec_session(
        &self,
        descriptor: &SessionDescriptor,
    ) -> Result<ExecSessionResponse, TasktermError> {
        let request = ExecSessionRequest {
            workflow: descriptor.workflow.clone(),
            task: descriptor.task.clone(),
            command: descriptor.command.clone(),
        };

        let mut builder = self.client.post(self.create_url()).json(&request);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TasktermError::Api(format!("exec session request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TasktermError::Api(format!(
                "backend rejected exec session ({status}): {body}"
            )));
        }

        let created: ExecSessionResponse = response
            .json()
            .await
            .map_err(|e| TasktermError::Api(format!("malformed exec session response: {e}")))?;
        debug!(router = %created.router_address, "exec session created");
        Ok(created)
    }
}

/// Build the socket URL for a created exec session: the router's http(s)
/// address rewritten to ws(s), plus the routing path for this workflow and
/// connection key.
pub fn socket_url(
    router_address: &str,
    workflow: &str,
    connection_key: &str,
) -> Result<String, TasktermError> {
    let trimmed = router_address.trim_end_matches('/');
    let ws_base = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(TasktermError::InvalidRouterAddress(
            router_address.to_string(),
        ));
    };
    Ok(format!(
        "{ws_base}/api/router/exec/{workflow}/client/{connection_key}"
    ))
}
