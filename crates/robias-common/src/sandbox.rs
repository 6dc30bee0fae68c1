use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;
use crate::error::RobiasError;

const DEFAULT_HOSTS: &[&str] = &[
    "api.openai.com", // Responses + Files APIs
    "localhost",      // self-hosted OpenAI-compatible servers
    "127.0.0.1",
];

/// An HTTP client that only talks to approved LLM API hosts.
/// API keys and paper contents must never be sent anywhere else.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl SandboxClient {
    pub fn new(timeout: Duration) -> Result<Self, RobiasError> {
        let allowlist = DEFAULT_HOSTS.iter().map(|h| h.to_string()).collect();

        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("robias/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, allowlist })
    }

    /// Appends an exact hostname to the allowlist.
    pub fn allow_domain(&mut self, domain: &str) {
        self.allowlist.insert(domain.to_string());
    }

    /// Allows the host of a configured base URL (e.g. a self-hosted endpoint).
    pub fn allow_url(&mut self, base_url: &str) -> Result<(), RobiasError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| RobiasError::Config(format!("invalid base URL {base_url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| RobiasError::Config(format!("base URL has no host: {base_url}")))?;
        self.allow_domain(host);
        Ok(())
    }

    /// True when the URL's host is allowlisted, or is a subdomain of an allowlisted host.
    pub fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else { return false };
        let Some(host) = parsed.host_str() else { return false };
        self.allowlist.iter().any(|allowed| {
            host == allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, RobiasError> {
        self.request(reqwest::Method::GET, url)
    }

    pub fn post(&self, url: &str) -> Result<reqwest::RequestBuilder, RobiasError> {
        self.request(reqwest::Method::POST, url)
    }

    pub fn delete(&self, url: &str) -> Result<reqwest::RequestBuilder, RobiasError> {
        self.request(reqwest::Method::DELETE, url)
    }

    /// A request builder for `url`, or `SecurityError` if the host is not allowlisted.
    pub fn request(&self, method: reqwest::Method, url: &str) -> Result<reqwest::RequestBuilder, RobiasError> {
        if !self.is_allowed(url) {
            return Err(RobiasError::SecurityError(format!("host not allowlisted: {url}")));
        }

        Ok(self.client.request(method, url))
    }
}
