//! TLS context shared by the discovery request and the WebSocket upgrade.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

use crate::error::{DeviceSdkError, Result};

/// Build the rustls client configuration.
///
/// Server certificates are verified against the webpki roots plus any CA
/// certificates in `ca_bundle`.  When a certificate/key pair is given it is
/// presented as the client identity.  Failing to read or parse any of the
/// configured files is fatal.
pub(crate) async fn client_config(
    identity: Option<(&Path, &Path)>,
    ca_bundle: Option<&Path>,
) -> Result<Arc<ClientConfig>> {
    let roots = root_store(ca_bundle).await?;

    let builder = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| DeviceSdkError::Tls(e.to_string()))?
    .with_root_certificates(roots);

    let config = match identity {
        Some((cert_path, key_path)) => {
            let cert_pem = read_pem(cert_path).await?;
            let key_pem = read_pem(key_path).await?;

            let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(&cert_pem)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    DeviceSdkError::Tls(format!("certificate {}: {e}", cert_path.display()))
                })?;
            if certs.is_empty() {
                return Err(DeviceSdkError::Tls(format!(
                    "no certificates found in {}",
                    cert_path.display()
                )));
            }

            let key = PrivateKeyDer::from_pem_slice(&key_pem).map_err(|e| {
                DeviceSdkError::Tls(format!("private key {}: {e}", key_path.display()))
            })?;

            tracing::debug!(
                cert = %cert_path.display(),
                chain_len = certs.len(),
                "presenting client certificate"
            );

            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| DeviceSdkError::Tls(e.to_string()))?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

async fn root_store(ca_bundle: Option<&Path>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let Some(path) = ca_bundle else {
        return Ok(roots);
    };
    let pem = read_pem(path).await?;
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(&pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| DeviceSdkError::Tls(format!("CA bundle {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(DeviceSdkError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    let added = certs.len();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| DeviceSdkError::Tls(format!("CA bundle {}: {e}", path.display())))?;
    }
    tracing::debug!(ca = %path.display(), added, "trusting extra CA certificates");
    Ok(roots)
}

async fn read_pem(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| DeviceSdkError::Tls(format!("read {}: {e}", path.display())))
}
