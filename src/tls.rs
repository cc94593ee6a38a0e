use std::{fs::File, io::BufReader, sync::Arc};

use anyhow::{Context, Result, anyhow};
use rustls::{
    ServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer},
};
use rustls_pemfile::{certs, private_key};
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;

/// Builds the listener's TLS acceptor from PEM certificate and key files.
pub fn load_tls_acceptor(tls_config: &TlsConfig) -> Result<TlsAcceptor> {
    let cert_file = File::open(&tls_config.cert_file)
        .with_context(|| format!("Failed to open certificate file: {}", tls_config.cert_file))?;
    let key_file = File::open(&tls_config.key_file)
        .with_context(|| format!("Failed to open private key file: {}", tls_config.key_file))?;

    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut BufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .context("Failed to parse certificate file")?;
    if cert_chain.is_empty() {
        return Err(anyhow!("No certificates found in certificate file"));
    }

    let private_key: PrivateKeyDer<'static> = private_key(&mut BufReader::new(key_file))
        .context("Failed to parse private key file")?
        .ok_or_else(|| anyhow!("No private key found in key file"))?;

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .context("Failed to create TLS server config")?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_missing_certificate_file() {
        let config = TlsConfig {
            cert_file: "/nonexistent/relay-cert.pem".to_string(),
            key_file: "/nonexistent/relay-key.pem".to_string(),
        };
        let err = load_tls_acceptor(&config).err().unwrap();
        assert!(err.to_string().contains("/nonexistent/relay-cert.pem"));
    }

    #[test]
    fn reports_empty_certificate_file() {
        let dir = std::env::temp_dir().join(format!("ws-tunnel-relay-tls-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert = dir.join("empty-cert.pem");
        let key = dir.join("empty-key.pem");
        std::fs::write(&cert, "").unwrap();
        std::fs::write(&key, "").unwrap();

        let config = TlsConfig {
            cert_file: cert.display().to_string(),
            key_file: key.display().to_string(),
        };
        let err = load_tls_acceptor(&config).err().unwrap();
        assert!(err.to_string().contains("No certificates found"));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn reports_missing_private_key() {
        let dir = std::env::temp_dir().join(format!("ws-tunnel-relay-tls-key-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert = dir.join("cert.pem");
        let key = dir.join("key.pem");
        std::fs::write(&cert, "-----BEGIN CERTIFICATE-----\nAAECAw==\n-----END CERTIFICATE-----\n").unwrap();
        std::fs::write(&key, "no key material here\n").unwrap();

        let config = TlsConfig {
            cert_file: cert.display().to_string(),
            key_file: key.display().to_string(),
        };
        let err = load_tls_acceptor(&config).err().unwrap();
        assert!(err.to_string().contains("No private key found"));

        let _ = std::fs::remove_dir_all(dir);
    }
}
