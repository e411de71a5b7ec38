//! Shared JSON-RPC and polling utilities.

use std::{future::Future, time::Duration};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between polling attempts.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Lower bound for the polling interval of short waits.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
///
/// # Returns
/// The deserialized result, or an error if the request failed or returned an error response.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error: {}",
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Polling interval for a wait bounded by `timeout`.
///
/// Short waits poll proportionally faster so they are not dominated by a single sleep.
fn poll_interval(timeout: Duration) -> Duration {
    (timeout / 10).clamp(MIN_POLL_INTERVAL, DEFAULT_POLL_INTERVAL)
}

/// Wait for a service to be ready by repeatedly calling a check function.
///
/// # Arguments
/// * `name` - Name of the service (for error messages)
/// * `timeout` - Maximum time to wait
/// * `check_fn` - Function that returns Ok(()) when the service is ready
///
/// # Returns
/// Ok(()) when the service is ready, or an error after timeout.
pub async fn wait_until_ready<F, Fut>(
    name: &str,
    timeout: Duration,
    check_fn: F,
) -> Result<(), anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), anyhow::Error>>,
{
    poll_until(name, timeout, || {
        let check = check_fn();
        async move { check.await.map(Some) }
    })
    .await
}

/// Repeatedly call `check_fn` until it yields a value, at a fixed interval.
///
/// `Ok(None)` means "not yet"; errors are logged and retried. The whole wait,
/// including an in-flight check, is cut off once `timeout` elapses.
pub async fn poll_until<T, F, Fut>(
    name: &str,
    timeout: Duration,
    check_fn: F,
) -> Result<T, anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>, anyhow::Error>>,
{
    let interval = poll_interval(timeout);

    let poll = async {
        loop {
            match check_fn().await {
                Ok(Some(value)) => return value,
                Ok(None) => {
                    tracing::trace!(target_name = %name, "Not ready yet, polling again...");
                }
                Err(e) => {
                    tracing::trace!(error = %e, target_name = %name, "Check failed, retrying...");
                }
            }
            tokio::time::sleep(interval).await;
        }
    };

    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| anyhow::anyhow!("Timeout after {:?} waiting for {}", timeout, name))
}
