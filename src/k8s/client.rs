// Client creation with custom user-agent support for kube 2.x
use crate::error::Result as KrResult;
use hyper::http::{HeaderName, HeaderValue};
use kube::{Client, Config};
use tracing::warn;

/// Environment variable that overrides the default user agent
pub const USER_AGENT_ENV: &str = "KRUIT_USER_AGENT";

/// Resolve the user agent to send, preferring `KRUIT_USER_AGENT` over `default`
#[must_use]
pub fn user_agent(default: &str) -> String {
    std::env::var(USER_AGENT_ENV)
        .ok()
        .filter(|ua| !ua.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Create a new k8s client for the watch streams
///
/// Kubeconfig resolution is left entirely to `Config::infer`.
///
/// # Errors
///
/// Will return `Err` if the kube config cannot be inferred or the client cannot be built
pub async fn new(custom_user_agent: Option<&str>) -> KrResult<Client> {
    let mut config = Config::infer().await?;

    if let Some(default) = custom_user_agent {
        let ua = user_agent(default);
        match HeaderValue::from_str(&ua) {
            Ok(header_value) => {
                config
                    .headers
                    .push((HeaderName::from_static("user-agent"), header_value));
            }
            Err(e) => warn!("ignoring invalid user agent {:?}: {}", ua, e),
        }
    }

    let client = Client::try_from(config)?;

    Ok(client)
}
