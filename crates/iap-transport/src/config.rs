//! Relay connection configuration

use crate::{TransportError, TransportResult};
use url::Url;

/// Default relay endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://tunnel.cloudproxy.app";

/// WebSocket subprotocol spoken by the relay
pub const DEFAULT_SUBPROTOCOL: &str = "relay.tunnel.cloudproxy.app";

/// Origin header sent with the handshake
pub const DEFAULT_ORIGIN: &str = "bot:iap-tunneler";

/// Network interface used when none is given
pub const DEFAULT_INTERFACE: &str = "nic0";

const WEBSOCKET_VERSION: &str = "v4";
const CONNECT_PATH: &str = "connect";

/// Where and how to open the relay connection
///
/// The access token must already be minted; this crate does not acquire
/// credentials.
#[derive(Clone)]
pub struct ConnectConfig {
    /// Relay base URL (`wss://` in production, `ws://` for local testing)
    pub endpoint: String,

    /// Project that owns the target instance
    pub project: String,

    /// Zone of the target instance
    pub zone: String,

    /// Target instance name
    pub instance: String,

    /// Network interface on the instance (default `nic0`)
    pub interface: String,

    /// Port on the instance to reach
    pub port: u16,

    /// OAuth bearer token
    pub access_token: String,

    /// Origin header value
    pub origin: String,

    /// WebSocket subprotocol to negotiate
    pub subprotocol: String,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            project: String::new(),
            zone: String::new(),
            instance: String::new(),
            interface: DEFAULT_INTERFACE.to_string(),
            port: 0,
            access_token: String::new(),
            origin: DEFAULT_ORIGIN.to_string(),
            subprotocol: DEFAULT_SUBPROTOCOL.to_string(),
        }
    }
}

impl std::fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("endpoint", &self.endpoint)
            .field("project", &self.project)
            .field("zone", &self.zone)
            .field("instance", &self.instance)
            .field("interface", &self.interface)
            .field("port", &self.port)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

impl ConnectConfig {
    /// Check required fields
    pub fn validate(&self) -> TransportResult<()> {
        let required = [
            ("project", &self.project),
            ("zone", &self.zone),
            ("instance", &self.instance),
            ("interface", &self.interface),
            ("access token", &self.access_token),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(TransportError::InvalidRequest(format!(
                    "{} must not be empty",
                    name
                )));
            }
        }

        if self.port == 0 {
            return Err(TransportError::InvalidRequest(
                "port must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the connect URL with the target encoded in the query string
    pub fn url(&self) -> TransportResult<Url> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| {
            TransportError::InvalidRequest(format!("invalid endpoint {}: {}", self.endpoint, e))
        })?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::InvalidRequest(format!(
                    "unsupported endpoint scheme: {}",
                    other
                )))
            }
        }

        url.set_path(&format!("/{}/{}", WEBSOCKET_VERSION, CONNECT_PATH));
        url.query_pairs_mut()
            .clear()
            .append_pair("project", &self.project)
            .append_pair("zone", &self.zone)
            .append_pair("instance", &self.instance)
            .append_pair("interface", &self.interface)
            .append_pair("port", &self.port.to_string());

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConnectConfig {
        ConnectConfig {
            project: "my-project".to_string(),
            zone: "us-central1-a".to_string(),
            instance: "vm-1".to_string(),
            port: 22,
            access_token: "secret-value".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ConnectConfig::default();
        assert_eq!(config.endpoint, "wss://tunnel.cloudproxy.app");
        assert_eq!(config.interface, "nic0");
        assert_eq!(config.origin, "bot:iap-tunneler");
        assert_eq!(config.subprotocol, "relay.tunnel.cloudproxy.app");
    }

    #[test]
    fn test_url() {
        let url = sample().url().unwrap();
        assert_eq!(
            url.as_str(),
            "wss://tunnel.cloudproxy.app/v4/connect?project=my-project&zone=us-central1-a&instance=vm-1&interface=nic0&port=22"
        );
    }

    #[test]
    fn test_url_rejects_http_scheme() {
        let config = ConnectConfig {
            endpoint: "https://tunnel.cloudproxy.app".to_string(),
            ..sample()
        };
        assert!(matches!(
            config.url(),
            Err(TransportError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_validate() {
        assert!(sample().validate().is_ok());

        let missing_token = ConnectConfig {
            access_token: String::new(),
            ..sample()
        };
        assert!(missing_token.validate().is_err());

        let zero_port = ConnectConfig { port: 0, ..sample() };
        assert!(zero_port.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", sample());
        assert!(!rendered.contains("secret-value"));
        assert!(rendered.contains("<redacted>"));
    }
}
