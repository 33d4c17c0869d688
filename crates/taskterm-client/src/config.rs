use std::time::Duration;

use anyhow::{Context, Result};

/// Configuration for reaching the exec backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the backend that creates exec sessions.
    pub base_url: String,
    /// Optional bearer token sent with exec-session creation.
    pub auth_token: Option<String>,
    /// Timeout for the exec-session HTTP call and the socket open.
    pub connect_timeout: Duration,
    /// How long a freshly opened connection may stay silent before it is
    /// treated as a PTY that accepted the connection but never attached.
    pub first_data_grace: Duration,
    /// Terminal dimensions used when a session has no container to measure.
    pub default_cols: u16,
    pub default_rows: u16,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            connect_timeout: Duration::from_secs(10),
            first_data_grace: Duration::from_secs(30),
            default_cols: taskterm_terminal::DEFAULT_COLS,
            default_rows: taskterm_terminal::DEFAULT_ROWS,
        }
    }

    /// Read configuration from the environment (`TASKTERM_BASE_URL`,
    /// optionally `TASKTERM_AUTH_TOKEN`). The caller is expected to have
    /// loaded any `.env` file first.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("TASKTERM_BASE_URL")
            .context("TASKTERM_BASE_URL is not set")?;
        let mut config = Self::new(base_url);
        config.auth_token = std::env::var("TASKTERM_AUTH_TOKEN").ok();
        Ok(config)
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_first_data_grace(mut self, grace: Duration) -> Self {
        self.first_data_grace = grace;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
