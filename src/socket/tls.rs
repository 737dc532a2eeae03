use crate::base::neterror::NetError;
use crate::http::protocol::Protocol;
use boring::ssl::{ConnectConfiguration, SslConnector, SslMethod, SslVerifyMode, SslVersion};

/// TLS client configuration shared by the ALPN probe and the protocol drivers.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub min_version: Option<SslVersion>,
    pub max_version: Option<SslVersion>,
    pub alpn_protos: Vec<Protocol>,
    /// Verify the peer certificate chain and host name.
    pub verify: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            min_version: Some(SslVersion::TLS1_2),
            max_version: Some(SslVersion::TLS1_3),
            alpn_protos: vec![Protocol::Http2, Protocol::Http11],
            verify: true,
        }
    }
}

impl TlsConfig {
    pub fn new(alpn_protos: Vec<Protocol>, verify: bool) -> Self {
        Self {
            alpn_protos,
            verify,
            ..Self::default()
        }
    }

    /// ALPN list in wire format: each token prefixed by its length.
    ///
    /// Tokens that cannot appear in a ClientHello (h2c) are skipped.
    pub fn alpn_wire(&self) -> Vec<u8> {
        let mut wire = Vec::new();
        for proto in self.alpn_protos.iter().filter(|p| p.is_tls_alpn()) {
            let id = proto.alpn_id();
            wire.push(id.len() as u8);
            wire.extend_from_slice(id.as_bytes());
        }
        wire
    }

    /// Build a connector carrying this configuration.
    pub fn connector(&self) -> Result<SslConnector, NetError> {
        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|_| NetError::SslProtocolError)?;

        if let Some(min) = self.min_version {
            builder
                .set_min_proto_version(Some(min))
                .map_err(|_| NetError::SslProtocolError)?;
        }
        if let Some(max) = self.max_version {
            builder
                .set_max_proto_version(Some(max))
                .map_err(|_| NetError::SslProtocolError)?;
        }

        let wire = self.alpn_wire();
        if !wire.is_empty() {
            builder
                .set_alpn_protos(&wire)
                .map_err(|_| NetError::SslProtocolError)?;
        }

        if self.verify {
            builder.set_verify(SslVerifyMode::PEER);
        } else {
            builder.set_verify(SslVerifyMode::NONE);
        }

        Ok(builder.build())
    }

    /// Per-connection configuration for `host`.
    pub fn configure(
        &self,
        connector: &SslConnector,
        host: &str,
    ) -> Result<ConnectConfiguration, NetError> {
        let mut config = connector
            .configure()
            .map_err(|_| NetError::SslProtocolError)?;
        // RFC 6066: no SNI for literal IP addresses.
        config.set_use_server_name_indication(Self::should_set_sni(host));
        if !self.verify {
            config.set_verify_hostname(false);
        }
        Ok(config)
    }

    /// SNI MUST NOT be set for raw IP addresses.
    pub fn should_set_sni(host: &str) -> bool {
        host.parse::<std::net::IpAddr>().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpn_wire_format() {
        let config = TlsConfig::new(vec![Protocol::Http2, Protocol::Http11], true);
        assert_eq!(config.alpn_wire(), b"\x02h2\x08http/1.1".to_vec());
    }

    #[test]
    fn test_alpn_wire_skips_cleartext() {
        let config = TlsConfig::new(vec![Protocol::Http2Cleartext, Protocol::Http10], true);
        assert_eq!(config.alpn_wire(), b"\x08http/1.0".to_vec());
    }

    #[test]
    fn test_sni_for_hostnames_only() {
        assert!(TlsConfig::should_set_sni("example.com"));
        assert!(!TlsConfig::should_set_sni("127.0.0.1"));
        assert!(!TlsConfig::should_set_sni("::1"));
    }

    #[test]
    fn test_connector_builds() {
        assert!(TlsConfig::default().connector().is_ok());
        assert!(TlsConfig::new(vec![Protocol::Http11], false)
            .connector()
            .is_ok());
    }
}
