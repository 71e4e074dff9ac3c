//! Certificate verification that records its verdict instead of only
//! acting on it.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use x509_parser::prelude::*;

/// What the verifier saw during one check's handshake.
#[derive(Debug, Default)]
pub struct CertRecord {
    valid: AtomicBool,
    subject: Mutex<Option<String>>,
}

impl CertRecord {
    pub fn valid(&self) -> bool { self.valid.load(Ordering::SeqCst) }

    pub fn subject(&self) -> Option<String> {
        self.subject.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn store(&self, valid: bool, subject: Option<String>) {
        self.valid.store(valid, Ordering::SeqCst);
        *self.subject.lock().unwrap_or_else(|e| e.into_inner()) = subject;
    }
}

#[derive(Debug)]
struct RecordingVerifier {
    inner: Arc<WebPkiServerVerifier>,
    enforce: bool,
    record: Arc<CertRecord>,
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verdict = self.inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);
        self.record.store(verdict.is_ok(), subject_cn(end_entity));
        match verdict {
            Ok(v) => Ok(v),
            Err(e) if self.enforce => Err(e),
            Err(_) => Ok(ServerCertVerified::assertion()),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn subject_cn(cert: &CertificateDer<'_>) -> Option<String> {
    let (_, x509) = X509Certificate::from_der(cert.as_ref()).ok()?;
    let cn = x509.subject().iter_common_name().next().and_then(|cn| cn.as_str().ok())?;
    Some(cn.to_string())
}

/// Client TLS config backed by the webpki root set. With `enforce` off the
/// handshake proceeds past a bad chain; the verdict still lands in `record`.
pub fn client_config(enforce: bool, record: Arc<CertRecord>) -> anyhow::Result<ClientConfig> {
    let provider: Arc<CryptoProvider> = Arc::new(ring::default_provider());
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone()).build()?;
    let verifier = RecordingVerifier { inner, enforce, record };
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}
