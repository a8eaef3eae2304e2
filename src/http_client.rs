use crate::uci_client::StoreError;
use anyhow::{Context, Result, ensure};
use reqwest::{Client, Response};
use std::{path::Path, time::Duration};

/// Create a Unix socket client for local service communication
///
/// Accepts either a raw path or a URI with `unix://` scheme. Every request
/// made with the client is bounded by `timeout`.
///
/// # Arguments
/// * `socket_path` - Path to the Unix socket (with or without `unix://` prefix)
/// * `timeout` - Deadline for a complete request/response exchange
///
/// # Examples
/// ```no_run
/// use foris_web::http_client::unix_socket_client;
/// use std::time::Duration;
///
/// // Raw path
/// let client = unix_socket_client("/var/run/foris/uci.sock", Duration::from_secs(5))
///     .expect("failed to create client");
///
/// // URI with unix:// scheme
/// let client = unix_socket_client("unix:///var/run/foris/uci.sock", Duration::from_secs(5))
///     .expect("failed to create client");
/// ```
pub fn unix_socket_client(socket_path: &str, timeout: Duration) -> Result<Client> {
    let socket_path = Path::new(socket_path.strip_prefix("unix://").unwrap_or(socket_path));

    // Verify the socket path exists
    ensure!(
        socket_path
            .try_exists()
            .context("failed to check if socket path exists")?,
        "failed since socket path does not exist: {socket_path:?}"
    );

    Client::builder()
        .unix_socket(socket_path)
        .timeout(timeout)
        .build()
        .context("failed to create Unix socket HTTP client")
}

/// Classify a transport failure
///
/// A missed deadline means the outcome of the call is unknown, anything
/// else means the daemon could not be talked to.
pub fn transport_error(err: reqwest::Error, context_msg: &str) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Unreachable(format!("{context_msg}: {err}"))
    }
}

/// Handle a store daemon response by checking status and extracting body
///
/// # Arguments
/// * `res` - The HTTP response to handle
/// * `context_msg` - Context message describing the request (e.g., "POST /uci/apply/v1")
///
/// # Returns
/// * `Ok(String)` - The response body if the status is successful
/// * `Err(StoreError::Rejected)` - The daemon refused the request (4xx)
/// * `Err(StoreError::Unreachable)` - The daemon failed (5xx) or the body could not be read
/// * `Err(StoreError::Timeout)` - The body did not arrive before the deadline
pub async fn handle_store_response(res: Response, context_msg: &str) -> Result<String, StoreError> {
    let status = res.status();
    let body = res
        .text()
        .await
        .map_err(|e| transport_error(e, context_msg))?;

    if status.is_success() {
        Ok(body)
    } else if status.is_client_error() {
        Err(StoreError::Rejected(format!(
            "{context_msg} failed with status {status} and body: {body}"
        )))
    } else {
        Err(StoreError::Unreachable(format!(
            "{context_msg} failed with status {status} and body: {body}"
        )))
    }
}
