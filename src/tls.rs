use rustls::{Certificate, PrivateKey, ServerConfig};
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use std::fs;
use std::io::Cursor;
use std::sync::Arc;

use crate::error::{AppError, Result};

/// Load the LDAPS server configuration from PEM certificate and key files.
pub fn load_tls_config(cert_path: &str, key_path: &str) -> Result<Arc<ServerConfig>> {
    let cert_pem = fs::read(cert_path)
        .map_err(|e| AppError::Internal(format!("Failed to open certificate file: {}", e)))?;
    let key_pem = fs::read(key_path)
        .map_err(|e| AppError::Internal(format!("Failed to open key file: {}", e)))?;
    load_tls_config_from_pem(&cert_pem, &key_pem)
}

/// Build the server configuration from in-memory PEM data.
pub fn load_tls_config_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<ServerConfig>> {
    let certs: Vec<Certificate> = certs(&mut Cursor::new(cert_pem))
        .map_err(|e| AppError::Internal(format!("Failed to parse certificates: {}", e)))?
        .into_iter()
        .map(Certificate)
        .collect();

    if certs.is_empty() {
        return Err(AppError::Internal(
            "No certificates found in PEM data".to_string(),
        ));
    }

    let key = load_private_key(key_pem)?;

    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| AppError::Internal(format!("Failed to build TLS config: {}", e)))?;

    Ok(Arc::new(config))
}

/// First PKCS#8 key, falling back to a PKCS#1 RSA key.
fn load_private_key(key_pem: &[u8]) -> Result<PrivateKey> {
    let pkcs8 = pkcs8_private_keys(&mut Cursor::new(key_pem))
        .map_err(|e| AppError::Internal(format!("Failed to parse PKCS#8 keys: {}", e)))?;
    if let Some(key) = pkcs8.into_iter().next() {
        return Ok(PrivateKey(key));
    }

    let rsa = rsa_private_keys(&mut Cursor::new(key_pem))
        .map_err(|e| AppError::Internal(format!("Failed to parse RSA keys: {}", e)))?;
    rsa.into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| AppError::Internal("No private keys found in PEM data".to_string()))
}

/// Errors that only mean the peer went away, typically without sending a
/// close_notify alert first.
pub fn is_benign_tls_closure_error(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    if matches!(
        err.kind(),
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
    ) {
        return true;
    }
    let message = err.to_string().to_lowercase();
    message.contains("closenotify") || message.contains("close_notify")
}
