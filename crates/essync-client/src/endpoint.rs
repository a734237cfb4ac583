//! Connection settings for one cluster.

use serde::{Deserialize, Serialize};

/// Where a cluster lives and how to authenticate against it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// `http` or `https`. Defaults to `https` on port 443, `http` otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
}

impl ClusterEndpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: String::new(),
            password: String::new(),
            scheme: None,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Scheme used when none is configured explicitly.
    #[must_use]
    pub fn effective_scheme(&self) -> &str {
        match self.scheme.as_deref() {
            Some(scheme) => scheme,
            None if self.port == 443 => "https",
            None => "http",
        }
    }

    /// Base URL without a trailing slash, e.g. `https://es.example.com:443`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.effective_scheme(),
            self.host.trim_end_matches('/'),
            self.port
        )
    }

    /// Credentials, if a user name is configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.user.is_empty() {
            None
        } else {
            Some((self.user.as_str(), self.password.as_str()))
        }
    }
}

impl std::fmt::Debug for ClusterEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("scheme", &self.effective_scheme())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_443_defaults_to_https() {
        let ep = ClusterEndpoint::new("es.example.com", 443);
        assert_eq!(ep.base_url(), "https://es.example.com:443");
    }

    #[test]
    fn other_ports_default_to_http() {
        let ep = ClusterEndpoint::new("localhost", 9200);
        assert_eq!(ep.base_url(), "http://localhost:9200");
    }

    #[test]
    fn explicit_scheme_wins() {
        let mut ep = ClusterEndpoint::new("localhost", 9243);
        ep.scheme = Some("https".into());
        assert_eq!(ep.base_url(), "https://localhost:9243");
    }

    #[test]
    fn credentials_require_a_user() {
        let ep = ClusterEndpoint::new("localhost", 9200);
        assert!(ep.credentials().is_none());
        let ep = ep.with_credentials("elastic", "changeme");
        assert_eq!(ep.credentials(), Some(("elastic", "changeme")));
    }

    #[test]
    fn debug_redacts_password() {
        let ep = ClusterEndpoint::new("localhost", 9200).with_credentials("elastic", "hunter2");
        let shown = format!("{ep:?}");
        assert!(!shown.contains("hunter2"), "got: {shown}");
        assert!(shown.contains("***"));
    }
}
