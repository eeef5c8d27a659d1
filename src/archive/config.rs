use reqwest::{Client, RequestBuilder};
use std::env;
use std::time::Duration;

/// Environment variables holding archive credentials (NASA Earthdata login).
pub const USER_ENV: &str = "NASA_USER";
pub const PASSWORD_ENV: &str = "NASA_PASS";

/// HTTP basic-auth credentials for the archive.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where and how to reach the bulk reanalysis archive.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Base URL, e.g. `https://archive.example.org/merra2-daily`.
    pub base_url: String,
    /// Dataset version segment of every file URL and cache key.
    pub dataset_version: String,
    pub credentials: Option<Credentials>,
    /// Per-request timeout applied by the HTTP client.
    pub request_timeout: Duration,
}

impl ArchiveConfig {
    pub fn new(base_url: impl Into<String>, dataset_version: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            dataset_version: dataset_version.into(),
            credentials: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Like [`ArchiveConfig::new`], picking up credentials from `NASA_USER` and
    /// `NASA_PASS` when both are set.
    pub fn from_env(base_url: impl Into<String>, dataset_version: impl Into<String>) -> Self {
        let mut config = Self::new(base_url, dataset_version);
        if let (Ok(username), Ok(password)) = (env::var(USER_ENV), env::var(PASSWORD_ENV)) {
            config.credentials = Some(Credentials { username, password });
        }
        config
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        });
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// URL of `file` inside the configured dataset version.
    pub fn version_url(&self, file: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.dataset_version,
            file
        )
    }

    pub(crate) fn http_client(&self) -> reqwest::Result<Client> {
        Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
    }

    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(c) => request.basic_auth(&c.username, Some(&c.password)),
            None => request,
        }
    }
}
