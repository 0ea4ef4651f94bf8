use super::HealthChecker;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;

/// Shared HTTP client for health probes.
///
/// One pooled client across all checkers; individual requests carry their
/// own timeout, the 30s here is only a backstop.
static SHARED_HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_shared_client() -> &'static Client {
    SHARED_HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .build()
            .expect("Failed to create shared HTTP client")
    })
}

/// Responsiveness probe against an HTTP endpoint.
///
/// Ollama answers `200 OK` on `GET /` while serving; a process that holds
/// the port but no longer answers requests fails this check even though the
/// binding probe still passes.
pub struct HttpChecker {
    url: String,
    timeout: Duration,
}

impl HttpChecker {
    /// # Errors
    ///
    /// Returns an error if the URL is malformed or not http/https.
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        Self::validate_url(&url)?;
        Ok(Self { url, timeout })
    }

    fn validate_url(url: &str) -> Result<()> {
        match url::Url::parse(url) {
            Ok(parsed) => {
                let scheme = parsed.scheme();
                if scheme != "http" && scheme != "https" {
                    return Err(Error::Config(format!(
                        "Invalid health URL '{}': scheme must be http or https, got '{}'",
                        url, scheme
                    )));
                }
                Ok(())
            }
            Err(e) => Err(Error::Config(format!(
                "Invalid health URL '{}': {}",
                url, e
            ))),
        }
    }
}

#[async_trait]
impl HealthChecker for HttpChecker {
    async fn check(&self) -> Result<bool> {
        match get_shared_client()
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}
