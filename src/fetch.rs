use anyhow::{Context, Result};
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Anything that can turn a URL into an HTML document.
pub trait PageSource {
    fn fetch(&self, url: &str) -> Result<String>;
}

/// Blocking HTTP GET; one request at a time.
pub struct HttpClient {
    client: reqwest::blocking::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

impl PageSource for HttpClient {
    fn fetch(&self, url: &str) -> Result<String> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()?;
        response
            .text()
            .with_context(|| format!("Failed to read body of {}", url))
    }
}

/// URL → HTML pages served from memory.
#[cfg(test)]
impl PageSource for std::collections::HashMap<String, String> {
    fn fetch(&self, url: &str) -> Result<String> {
        self.get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("HTTP 404 Not Found for {}", url))
    }
}
