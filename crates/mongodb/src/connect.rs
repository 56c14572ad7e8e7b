//! Connection management: connect, readiness probing and URI helpers.

use std::time::Duration;

use crate::mongo_store::MongoStore;
use crate::store::DocumentStore;
use crate::SyncError;

/// Default number of readiness probes before giving up.
pub const DEFAULT_READY_ATTEMPTS: u32 = 30;

/// Default delay between two readiness probes.
pub const DEFAULT_READY_DELAY: Duration = Duration::from_secs(1);

/// Server selection timeout of a single readiness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Bounded retry policy used while a local store is starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_READY_ATTEMPTS,
            delay: DEFAULT_READY_DELAY,
        }
    }
}

/// Connect to `uri` and check that the server answers a ping.
pub async fn connect(uri: &str) -> Result<MongoStore, SyncError> {
    tracing::debug!("Connecting to MongoDB at {}", mask_uri(uri));
    let store = MongoStore::from_uri(uri)
        .await
        .map_err(|e| connection_error(uri, e))?;

    if let Err(e) = store.ping().await {
        store.close().await;
        return Err(connection_error(uri, e));
    }

    tracing::info!("Connected to {}", mask_uri(uri));
    Ok(store)
}

/// Whether a server at `uri` answers an administrative ping.
pub async fn is_ready(uri: &str) -> bool {
    let Ok(store) = MongoStore::with_timeout(uri, PROBE_TIMEOUT).await else {
        return false;
    };
    let ready = store.ping().await.is_ok();
    store.close().await;
    ready
}

/// Probe `uri` until it answers or the policy's attempts are exhausted.
pub async fn wait_until_ready(uri: &str, policy: ReadinessPolicy) -> Result<(), SyncError> {
    wait_until(uri, policy, || is_ready(uri)).await
}

/// Retry loop shared by [`wait_until_ready`] and its tests.
pub(crate) async fn wait_until<F, Fut>(
    uri: &str,
    policy: ReadinessPolicy,
    mut probe: F,
) -> Result<(), SyncError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for attempt in 1..=policy.attempts {
        if probe().await {
            tracing::debug!("{} ready after {} attempt(s)", mask_uri(uri), attempt);
            return Ok(());
        }
        tracing::debug!(
            "Waiting for {} ({}/{})",
            mask_uri(uri),
            attempt,
            policy.attempts
        );
        if attempt < policy.attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    Err(SyncError::Connection {
        uri: mask_uri(uri),
        reason: format!("not ready after {} attempts", policy.attempts),
    })
}

fn connection_error(uri: &str, err: crate::StoreError) -> SyncError {
    SyncError::Connection {
        uri: mask_uri(uri),
        reason: err.to_string(),
    }
}

/// Hide the credentials of a connection string for logging.
pub fn mask_uri(uri: &str) -> String {
    if let Some(at_pos) = uri.rfind('@') {
        if let Some(protocol_end) = uri.find("://") {
            if protocol_end < at_pos {
                let protocol = &uri[..protocol_end + 3];
                let after_at = &uri[at_pos..];
                return format!("{protocol}***{after_at}");
            }
        }
    }
    uri.to_string()
}

/// Database name from the path segment of a connection string.
///
/// `mongodb+srv://user:pw@cluster0.example.net/payload?retryWrites=true`
/// yields `payload`. Returns `None` when the URI has no path segment.
pub fn database_from_uri(uri: &str) -> Option<String> {
    let after_scheme = match uri.find("://") {
        Some(pos) => &uri[pos + 3..],
        None => uri,
    };
    let without_query = after_scheme.split('?').next().unwrap_or_default();
    // Credentials may contain '/', the host list ends at the first '/' after '@'
    let hosts_start = without_query.rfind('@').map(|pos| pos + 1).unwrap_or(0);
    let path = &without_query[hosts_start..];
    let name = path.split_once('/').map(|(_, name)| name)?;
    let name = name.trim_matches('/');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Whether `uri` points at a store on this machine.
pub fn is_loopback_uri(uri: &str) -> bool {
    let after_scheme = match uri.find("://") {
        Some(pos) => &uri[pos + 3..],
        None => uri,
    };
    let authority = after_scheme
        .split(['/', '?'])
        .next()
        .unwrap_or_default();
    let hosts = authority
        .rsplit_once('@')
        .map(|(_, hosts)| hosts)
        .unwrap_or(authority);
    !hosts.is_empty()
        && hosts.split(',').all(|host| {
            let host = host_without_port(host);
            matches!(host, "localhost" | "127.0.0.1" | "::1" | "0.0.0.0")
        })
}

/// Port of the first host of `uri`, defaulting to 27017.
pub fn port_from_uri(uri: &str) -> u16 {
    let after_scheme = match uri.find("://") {
        Some(pos) => &uri[pos + 3..],
        None => uri,
    };
    let authority = after_scheme
        .split(['/', '?'])
        .next()
        .unwrap_or_default();
    let hosts = authority
        .rsplit_once('@')
        .map(|(_, hosts)| hosts)
        .unwrap_or(authority);
    let first = hosts.split(',').next().unwrap_or_default();
    let port = if first.starts_with('[') {
        first.rsplit_once("]:").map(|(_, port)| port)
    } else {
        first.rsplit_once(':').map(|(_, port)| port)
    };
    port.and_then(|p| p.parse().ok()).unwrap_or(27017)
}

fn host_without_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or_default();
    }
    host.split(':').next().unwrap_or_default()
}
