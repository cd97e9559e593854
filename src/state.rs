use std::time::Duration;

use crate::config::AppConfig;
use crate::error::StreamError;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub client: reqwest::Client,
    endpoint: String,
}

impl AppState {
    /// Build the state, including the upstream HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Transport`] when the client cannot be built
    /// (for example an unusable proxy URL).
    pub fn new(config: AppConfig) -> Result<Self, StreamError> {
        let client = build_reqwest_client(
            Duration::from_secs(config.server.timeout),
            config.upstream.proxy.as_deref(),
        )?;
        let endpoint = config.upstream.endpoint();
        Ok(Self {
            config,
            client,
            endpoint,
        })
    }

    /// Full URL requests are forwarded to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn build_reqwest_client(
    timeout: Duration,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, StreamError> {
    let mut builder = reqwest::Client::builder()
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout);

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url.trim())
            .map_err(|err| StreamError::Transport(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| StreamError::Transport(format!("Failed to build HTTP client: {err}")))
}
