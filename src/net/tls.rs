//! TLS configuration and certificate loading.

use std::io;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

use crate::config::SslConfig;

fn require_file(path: &Path, what: &str) -> io::Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{what} not found: {}", path.display()),
        ))
    }
}

/// Load the PEM certificate chain and private key of `[server.ssl]`.
///
/// Relative paths are taken from `cwd`.
pub async fn load_tls_config(ssl: &SslConfig, cwd: &Path) -> io::Result<RustlsConfig> {
    let cert = cwd.join(&ssl.cert);
    let key = cwd.join(&ssl.key);
    require_file(&cert, "Certificate file")?;
    require_file(&key, "Private key file")?;
    RustlsConfig::from_pem_file(cert, key).await
}
