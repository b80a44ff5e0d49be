//! TLS configuration for database connections
//!
//! Four modes are understood: `disabled`, `require` (encrypt, trust any
//! certificate), `verify-ca` (chain must validate, hostname is not checked)
//! and `verify-full` (chain and hostname). TLS material is referenced by
//! path; its content participates in the connection-identity fingerprint so
//! rotated certificates get a fresh pool.

use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};

/// TLS mode for database connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SslMode {
    /// Plain TCP connection
    #[default]
    Disabled,
    /// TLS without certificate verification
    Require,
    /// TLS, verify the server certificate chain against the CA
    VerifyCa,
    /// TLS, verify chain and server hostname
    VerifyFull,
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SslMode::Disabled => write!(f, "disabled"),
            SslMode::Require => write!(f, "require"),
            SslMode::VerifyCa => write!(f, "verify-ca"),
            SslMode::VerifyFull => write!(f, "verify-full"),
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "" | "disabled" | "disable" | "off" | "false" => Ok(SslMode::Disabled),
            "require" | "required" => Ok(SslMode::Require),
            "verify-ca" | "verify_ca" => Ok(SslMode::VerifyCa),
            "verify-full" | "verify_full" => Ok(SslMode::VerifyFull),
            _ => Err(Error::config(format!(
                "invalid TLS mode '{}'; valid values: disabled, require, verify-ca, verify-full",
                s
            ))),
        }
    }
}

/// TLS configuration for database connections
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TlsConfig {
    /// TLS mode
    pub mode: SslMode,
    /// CA certificate (PEM), required for verify-ca and verify-full
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate (PEM) for mutual TLS
    pub client_cert_path: Option<PathBuf>,
    /// Client private key (PEM), required with a client certificate
    pub client_key_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Create a TLS config with the given mode
    pub fn new(mode: SslMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Set the CA certificate path
    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Set client certificate and key paths
    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    /// Check if TLS is enabled
    pub fn is_enabled(&self) -> bool {
        self.mode != SslMode::Disabled
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if matches!(self.mode, SslMode::VerifyCa | SslMode::VerifyFull)
            && self.ca_cert_path.is_none()
        {
            return Err(Error::config(format!(
                "CA certificate path required for TLS mode '{}'",
                self.mode
            )));
        }
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(Error::config(
                "client certificate and client key must be given together",
            ));
        }
        Ok(())
    }

    /// SHA-256 over the mode, material paths, and material content.
    ///
    /// Unreadable files contribute only their path.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.mode.to_string().as_bytes());
        for path in [
            &self.ca_cert_path,
            &self.client_cert_path,
            &self.client_key_path,
        ] {
            hasher.update([0u8]);
            if let Some(path) = path {
                hasher.update(path.to_string_lossy().as_bytes());
                if let Ok(content) = std::fs::read(path) {
                    hasher.update(&content);
                }
            }
        }
        hex::encode(hasher.finalize())
    }
}

/// Build a rustls `ClientConfig` for the configured mode
pub fn build_rustls_config(config: &TlsConfig) -> Result<rustls::ClientConfig> {
    use rustls::pki_types::CertificateDer;

    config.validate()?;
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut root_store = rustls::RootCertStore::empty();
    if let Some(ca_path) = &config.ca_cert_path {
        for cert in read_certs(ca_path)? {
            root_store
                .add(cert)
                .map_err(|e| Error::config(format!("failed to add CA cert: {}", e)))?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    let root_store = Arc::new(root_store);

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::config(format!("TLS protocol setup failed: {}", e)))?;

    let builder = match config.mode {
        SslMode::Require | SslMode::Disabled => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification::new(
                provider,
            ))),
        SslMode::VerifyCa => {
            let inner = rustls::client::WebPkiServerVerifier::builder_with_provider(
                root_store,
                provider,
            )
            .build()
            .map_err(|e| Error::config(format!("failed to build verifier: {}", e)))?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::CaOnlyVerification::new(inner)))
        }
        SslMode::VerifyFull => builder.with_root_certificates(root_store),
    };

    let client_config = match (&config.client_cert_path, &config.client_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let certs: Vec<CertificateDer<'static>> = read_certs(cert_path)?;
            let key_pem = std::fs::read(key_path)
                .map_err(|e| Error::config(format!("failed to read client key: {}", e)))?;
            let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
                .map_err(|e| Error::config(format!("failed to parse client key: {}", e)))?
                .ok_or_else(|| Error::config("no private key found in client key file"))?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| Error::config(format!("failed to set client auth: {}", e)))?
        }
        _ => builder.with_no_client_auth(),
    };

    Ok(client_config)
}

fn read_certs(path: &PathBuf) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let pem = std::fs::read(path).map_err(|e| {
        Error::config(format!("failed to read certificate {}: {}", path.display(), e))
    })?;
    rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::config(format!("failed to parse certificate: {}", e)))
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::client::WebPkiServerVerifier;
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{CertificateError, DigitallySignedStruct, Error, SignatureScheme};
    use std::sync::Arc;

    /// Accepts any server certificate (`require` mode)
    #[derive(Debug)]
    pub struct NoCertificateVerification(Arc<rustls::crypto::CryptoProvider>);

    impl NoCertificateVerification {
        pub fn new(provider: Arc<rustls::crypto::CryptoProvider>) -> Self {
            Self(provider)
        }
    }

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            rustls::crypto::verify_tls12_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }

    /// Validates the chain but tolerates a hostname mismatch (`verify-ca` mode)
    #[derive(Debug)]
    pub struct CaOnlyVerification(Arc<WebPkiServerVerifier>);

    impl CaOnlyVerification {
        pub fn new(inner: Arc<WebPkiServerVerifier>) -> Self {
            Self(inner)
        }
    }

    impl ServerCertVerifier for CaOnlyVerification {
        fn verify_server_cert(
            &self,
            end_entity: &CertificateDer<'_>,
            intermediates: &[CertificateDer<'_>],
            server_name: &ServerName<'_>,
            ocsp_response: &[u8],
            now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            match self.0.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            ) {
                Err(Error::InvalidCertificate(CertificateError::NotValidForName)) => {
                    Ok(ServerCertVerified::assertion())
                }
                other => other,
            }
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            self.0.verify_tls12_signature(message, cert, dss)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            self.0.verify_tls13_signature(message, cert, dss)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.supported_verify_schemes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_ssl_mode_parsing() {
        assert_eq!("disabled".parse::<SslMode>().unwrap(), SslMode::Disabled);
        assert_eq!("".parse::<SslMode>().unwrap(), SslMode::Disabled);
        assert_eq!("REQUIRE".parse::<SslMode>().unwrap(), SslMode::Require);
        assert_eq!("verify-ca".parse::<SslMode>().unwrap(), SslMode::VerifyCa);
        assert_eq!(
            "verify_full".parse::<SslMode>().unwrap(),
            SslMode::VerifyFull
        );
        assert!("prefer".parse::<SslMode>().is_err());
    }

    #[test]
    fn test_validation() {
        assert!(TlsConfig::new(SslMode::Disabled).validate().is_ok());
        assert!(TlsConfig::new(SslMode::Require).validate().is_ok());
        assert!(TlsConfig::new(SslMode::VerifyFull).validate().is_err());
        assert!(TlsConfig::new(SslMode::VerifyCa)
            .with_ca_cert("/etc/ssl/ca.pem")
            .validate()
            .is_ok());

        let mut half = TlsConfig::new(SslMode::Require);
        half.client_cert_path = Some("/tmp/client.pem".into());
        assert!(half.validate().is_err());
    }

    #[test]
    fn test_fingerprint_tracks_material_content() {
        let mut ca = tempfile::NamedTempFile::new().unwrap();
        ca.write_all(b"first").unwrap();
        let config = TlsConfig::new(SslMode::VerifyCa).with_ca_cert(ca.path());
        let before = config.fingerprint();
        assert_eq!(before, config.fingerprint());

        ca.write_all(b"rotated").unwrap();
        ca.flush().unwrap();
        assert_ne!(before, config.fingerprint());
    }

    #[test]
    fn test_fingerprint_differs_by_mode() {
        let a = TlsConfig::new(SslMode::Disabled).fingerprint();
        let b = TlsConfig::new(SslMode::Require).fingerprint();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_require_mode_builds_without_material() {
        assert!(build_rustls_config(&TlsConfig::new(SslMode::Require)).is_ok());
    }
}
