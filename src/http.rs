use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE};
use tracing::debug;

use crate::config::HttpConfig;
use crate::error::{Result, SyncError};

/// Blocking client shared by the page fetch and the API calls.
pub fn build_client(cfg: &HttpConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(cfg.user_agent.clone())
        .timeout(cfg.page_timeout.max(cfg.api_timeout))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?;
    Ok(client)
}

/// GET `url` with the given query and timeout; non-2xx is an error.
pub fn get_text(
    client: &Client,
    url: &str,
    query: &[(&str, &str)],
    accept: &str,
    timeout: Duration,
) -> Result<String> {
    let resp = client
        .get(url)
        .query(query)
        .timeout(timeout)
        .header(ACCEPT, accept)
        .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
        .send()?;

    let status = resp.status();
    if !status.is_success() {
        return Err(SyncError::Status { url: url.to_string(), status: status.as_u16() });
    }

    let body = resp.text()?;
    debug!(url, bytes = body.len(), "fetched");
    Ok(body)
}
