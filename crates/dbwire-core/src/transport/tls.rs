//! rustls client configuration (feature-gated).
//!
//! - `reject_unauthorized = false`: encrypt, accept any certificate
//! - `ca` PEM set: verify against those roots only
//! - otherwise: verify against the webpki-roots bundle
//!
//! A `cert` + `key` pair enables client certificate authentication.

#[cfg(feature = "tls")]
use std::sync::Arc;

#[cfg(feature = "tls")]
use crate::config::TlsOptions;
#[cfg(feature = "tls")]
use crate::error::Result;
use crate::error::{ConnectionErrorKind, Error};

#[cfg(feature = "tls")]
fn tls_error(message: impl Into<String>) -> Error {
    Error::connection(ConnectionErrorKind::Ssl, message)
}

#[cfg(feature = "tls")]
pub(crate) fn server_name(host: &str) -> Result<rustls::pki_types::ServerName<'static>> {
    rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| tls_error(format!("Invalid server name '{host}': {e}")))
}

/// Build a rustls `ClientConfig` for the given options.
#[cfg(feature = "tls")]
pub(crate) fn build_client_config(options: &TlsOptions) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("Failed to set TLS versions: {e}")))?;

    let builder = if options.reject_unauthorized {
        builder.with_root_certificates(root_store(options.ca.as_deref())?)
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
    };

    add_client_auth(builder, options)
}

#[cfg(feature = "tls")]
fn root_store(ca_pem: Option<&str>) -> Result<rustls::RootCertStore> {
    let mut store = rustls::RootCertStore::empty();
    let Some(pem) = ca_pem else {
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(store);
    };

    let certs = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("Failed to parse CA certificate: {e}")))?;
    if certs.is_empty() {
        return Err(tls_error("No certificates found in CA bundle"));
    }
    for cert in certs {
        store
            .add(cert)
            .map_err(|e| tls_error(format!("Failed to add CA certificate: {e}")))?;
    }
    Ok(store)
}

#[cfg(feature = "tls")]
fn add_client_auth(
    builder: rustls::ConfigBuilder<rustls::ClientConfig, rustls::client::WantsClientCert>,
    options: &TlsOptions,
) -> Result<rustls::ClientConfig> {
    let (Some(cert_pem), Some(key_pem)) = (&options.cert, &options.key) else {
        return Ok(builder.with_no_client_auth());
    };

    let certs = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("Failed to parse client certificate: {e}")))?;
    if certs.is_empty() {
        return Err(tls_error("No certificates found in client certificate"));
    }

    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| tls_error(format!("Failed to parse client key: {e}")))?
        .ok_or_else(|| tls_error("No private key found in client key"))?;

    builder
        .with_client_auth_cert(certs, key)
        .map_err(|e| tls_error(format!("Failed to configure client auth: {e}")))
}

#[cfg(feature = "tls")]
#[derive(Debug)]
struct NoVerifier;

#[cfg(feature = "tls")]
impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        use rustls::SignatureScheme;
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// Check once whether this build can open TLS sessions.
pub(crate) fn probe() -> std::result::Result<(), String> {
    #[cfg(feature = "tls")]
    {
        build_client_config(&TlsOptions::default())
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
    #[cfg(not(feature = "tls"))]
    {
        Err("this build was compiled without the `tls` feature".to_string())
    }
}

pub(crate) fn unsupported(reason: &str) -> Error {
    Error::connection(
        ConnectionErrorKind::TlsUnsupported,
        format!("TLS unsupported: {reason}"),
    )
}

#[cfg(all(test, feature = "tls"))]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_build() {
        assert!(build_client_config(&TlsOptions::default()).is_ok());
        assert!(build_client_config(&TlsOptions::insecure()).is_ok());
    }

    #[test]
    fn test_garbage_ca_rejected() {
        let options = TlsOptions {
            ca: Some("not a pem bundle".to_string()),
            ..TlsOptions::default()
        };
        let err = build_client_config(&options).unwrap_err();
        assert_eq!(err.connection_kind(), Some(ConnectionErrorKind::Ssl));
    }

    #[test]
    fn test_server_name_accepts_ip_and_dns() {
        assert!(server_name("db.example.com").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
    }
}
