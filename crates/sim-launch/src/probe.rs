//! Bounded liveness probing of the simulation server.

use std::time::Duration;

use crate::ServerError;

/// Single liveness check against the server's alive endpoint.
///
/// Returns `Ok(true)` on any successful HTTP response within the timeout,
/// independent of the payload. Timeouts and refused connections mean the
/// server is not alive and return `Ok(false)`; anything else (e.g. a
/// malformed response) is an unexpected failure and propagates.
pub async fn probe(
    client: &reqwest::Client,
    alive_url: &str,
    timeout: Duration,
) -> Result<bool, ServerError> {
    match client.get(alive_url).timeout(timeout).send().await {
        Ok(response) => {
            let alive = response.status().is_success();
            log::debug!(
                "[probe] {} -> {} (alive={})",
                alive_url,
                response.status(),
                alive
            );
            Ok(alive)
        }
        Err(e) if e.is_timeout() || e.is_connect() => {
            log::debug!("[probe] {} -> not alive ({e})", alive_url);
            Ok(false)
        }
        Err(e) => Err(ServerError::Probe(e)),
    }
}
