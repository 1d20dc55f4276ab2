//! Remote endpoint descriptors.
//!
//! A [`ServerConnection`] is an immutable value object naming a CodeScan
//! server: URL, credentials and optional organization. Connections live in
//! the global settings and are looked up by name when resolving a binding.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const CODESCAN_CLOUD_URL: &str = "https://app.codescan.io";

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection name must not be empty")]
    EmptyName,

    #[error("invalid server URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("connection '{0}' has no credentials")]
    MissingCredentials(String),
}

/// Credentials for a server connection. Either a token or a login/password
/// pair, never both.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Credentials {
    Token { token: String },
    Login { login: String, password: String },
}

// Credentials must never end up in logs or error reports.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Token { .. } => f.write_str("Credentials::Token(***)"),
            Credentials::Login { login, .. } => {
                write!(f, "Credentials::Login({login}, ***)")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConnection {
    name: String,
    host_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_key: Option<String>,
    #[serde(default)]
    enable_proxy: bool,
    // Last field: serializes as a nested table, which TOML requires after
    // plain values.
    credentials: Credentials,
}

impl ServerConnection {
    pub fn builder() -> ServerConnectionBuilder {
        ServerConnectionBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host_url(&self) -> &str {
        &self.host_url
    }

    pub fn organization_key(&self) -> Option<&str> {
        self.organization_key.as_deref()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn enable_proxy(&self) -> bool {
        self.enable_proxy
    }

    pub fn is_codescan_cloud(&self) -> bool {
        self.host_url.trim_end_matches('/') == CODESCAN_CLOUD_URL
    }
}

#[derive(Default)]
pub struct ServerConnectionBuilder {
    name: Option<String>,
    host_url: Option<String>,
    organization_key: Option<String>,
    credentials: Option<Credentials>,
    enable_proxy: bool,
}

impl ServerConnectionBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn host_url(mut self, url: impl Into<String>) -> Self {
        self.host_url = Some(url.into());
        self
    }

    pub fn organization_key(mut self, key: impl Into<String>) -> Self {
        self.organization_key = Some(key.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::Token {
            token: token.into(),
        });
        self
    }

    pub fn login(mut self, login: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::Login {
            login: login.into(),
            password: password.into(),
        });
        self
    }

    pub fn enable_proxy(mut self, enable: bool) -> Self {
        self.enable_proxy = enable;
        self
    }

    pub fn build(self) -> Result<ServerConnection, ConnectionError> {
        let name = match self.name {
            Some(n) if !n.trim().is_empty() => n,
            _ => return Err(ConnectionError::EmptyName),
        };
        let host_url = self.host_url.unwrap_or_else(|| CODESCAN_CLOUD_URL.to_string());
        if let Err(source) = Url::parse(&host_url) {
            return Err(ConnectionError::InvalidUrl {
                url: host_url,
                source,
            });
        }
        let credentials = self
            .credentials
            .ok_or_else(|| ConnectionError::MissingCredentials(name.clone()))?;

        Ok(ServerConnection {
            name,
            host_url,
            organization_key: self.organization_key,
            credentials,
            enable_proxy: self.enable_proxy,
        })
    }
}
