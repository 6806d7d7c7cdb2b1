use std::{fs, io, path::Path};

use rcgen::{CertificateParams, DnType, ExtendedKeyUsagePurpose, KeyPair, KeyUsagePurpose};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, pem::PemObject};

use crate::Result;

fn invalid_data(what: &str, source: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("failed to parse {what}: {source}"))
}

pub trait ToCertificate {
    fn to_certificate(self) -> io::Result<Vec<CertificateDer<'static>>>;
}

impl ToCertificate for Vec<CertificateDer<'static>> {
    fn to_certificate(self) -> io::Result<Vec<CertificateDer<'static>>> {
        Ok(self)
    }
}

impl ToCertificate for CertificateDer<'static> {
    fn to_certificate(self) -> io::Result<Vec<CertificateDer<'static>>> {
        Ok(vec![self])
    }
}

impl ToCertificate for &Path {
    fn to_certificate(self) -> io::Result<Vec<CertificateDer<'static>>> {
        fs::read(self)?.as_slice().to_certificate()
    }
}

/// Pem first, if the data holds no pem certificate it is taken as a single der certificate.
impl ToCertificate for &[u8] {
    fn to_certificate(self) -> io::Result<Vec<CertificateDer<'static>>> {
        if let Ok(certs) = CertificateDer::pem_slice_iter(self).collect::<Result<Vec<_>, _>>() {
            if !certs.is_empty() {
                return Ok(certs);
            }
        }
        if self.is_empty() {
            return Err(invalid_data("certificate", "no data"));
        }
        Ok(vec![CertificateDer::from(self.to_vec())])
    }
}

impl<const N: usize> ToCertificate for &[u8; N] {
    fn to_certificate(self) -> io::Result<Vec<CertificateDer<'static>>> {
        <&[u8]>::to_certificate(self)
    }
}

pub trait ToPrivateKey {
    fn to_private_key(self) -> io::Result<PrivateKeyDer<'static>>;
}

impl ToPrivateKey for PrivateKeyDer<'static> {
    fn to_private_key(self) -> io::Result<PrivateKeyDer<'static>> {
        Ok(self)
    }
}

impl ToPrivateKey for &Path {
    fn to_private_key(self) -> io::Result<PrivateKeyDer<'static>> {
        fs::read(self)?.as_slice().to_private_key()
    }
}

impl ToPrivateKey for &[u8] {
    fn to_private_key(self) -> io::Result<PrivateKeyDer<'static>> {
        if let Ok(key) = PrivateKeyDer::from_pem_slice(self) {
            return Ok(key);
        }
        PrivateKeyDer::try_from(self.to_vec()).map_err(|e| invalid_data("private key", e))
    }
}

impl<const N: usize> ToPrivateKey for &[u8; N] {
    fn to_private_key(self) -> io::Result<PrivateKeyDer<'static>> {
        <&[u8]>::to_private_key(self)
    }
}

/// A freshly generated self-signed certificate and its ECDSA P-256 key.
#[derive(Debug)]
pub struct SelfSigned {
    cert_pem: String,
    key_pem: String,
    cert_der: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl SelfSigned {
    /// Generate a certificate for `hosts`, a comma separated list of dns names and ip addresses.
    ///
    /// Dns names may be wildcards, e.g. `*.example.com,localhost,127.0.0.1`.
    pub fn generate(hosts: &str) -> Result<Self> {
        let names = hosts
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_owned)
            .collect::<Vec<_>>();

        let mut params = CertificateParams::new(names)?;
        params
            .distinguished_name
            .push(DnType::CommonName, "qhandle self signed");
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let key_pair = KeyPair::generate()?;
        let cert = params.self_signed(&key_pair)?;
        tracing::debug!(hosts, "generated self signed certificate");

        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
            cert_der: cert.der().clone(),
            key_der: key_pair.serialize_der(),
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    pub fn cert_der(&self) -> CertificateDer<'static> {
        self.cert_der.clone()
    }

    pub fn key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()))
    }

    /// Write the key and the certificate as pem files.
    pub fn write_pem(&self, key_path: impl AsRef<Path>, cert_path: impl AsRef<Path>) -> Result<()> {
        fs::write(key_path, &self.key_pem)?;
        fs::write(cert_path, &self.cert_pem)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rustls::{
        client::danger::ServerCertVerifier,
        pki_types::{ServerName, UnixTime},
    };

    use super::*;

    #[test]
    fn pem_and_der_certificates() {
        let signed = SelfSigned::generate("localhost").unwrap();

        let from_pem = signed.cert_pem().as_bytes().to_certificate().unwrap();
        assert_eq!(from_pem, vec![signed.cert_der()]);

        let der = signed.cert_der().to_vec();
        let from_der = der.as_slice().to_certificate().unwrap();
        assert_eq!(from_der, vec![signed.cert_der()]);

        assert!(b"".to_certificate().is_err());
    }

    #[test]
    fn pem_and_der_keys() {
        let signed = SelfSigned::generate("localhost").unwrap();

        let from_pem = signed.key_pem().as_bytes().to_private_key().unwrap();
        assert_eq!(from_pem.secret_der(), signed.key_der().secret_der());

        let der = signed.key_der().secret_der().to_vec();
        let from_der = der.as_slice().to_private_key().unwrap();
        assert!(matches!(from_der, PrivateKeyDer::Pkcs8(_)));

        assert!(b"not a key".to_private_key().is_err());
    }

    #[test]
    fn ip_and_wildcard_hosts() {
        let signed = SelfSigned::generate("*.example.com, localhost,127.0.0.1").unwrap();
        let server_cert = signed.cert_der();
        let mut roots = rustls::RootCertStore::empty();
        roots.add(server_cert.clone()).unwrap();
        let verifier = rustls::client::WebPkiServerVerifier::builder_with_provider(
            Arc::new(roots),
            crate::crypto_provider(),
        )
        .build()
        .unwrap();

        let verify = |name: &'static str| {
            let server_name = ServerName::try_from(name).unwrap();
            verifier.verify_server_cert(&server_cert, &[], &server_name, &[], UnixTime::now())
        };
        assert!(verify("localhost").is_ok());
        assert!(verify("127.0.0.1").is_ok());
        assert!(verify("api.example.com").is_ok());
        assert!(verify("example.com").is_err());
        assert!(verify("10.0.0.1").is_err());
        assert!(verify("other.invalid").is_err());
    }

    #[test]
    fn write_and_read_back_files() {
        let dir = std::env::temp_dir().join(format!("qhandle-cert-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let (key_path, cert_path) = (dir.join("tls.key"), dir.join("tls.crt"));

        let signed = SelfSigned::generate("localhost").unwrap();
        signed.write_pem(&key_path, &cert_path).unwrap();

        let certs = cert_path.as_path().to_certificate().unwrap();
        assert_eq!(certs, vec![signed.cert_der()]);
        assert!(key_path.as_path().to_private_key().is_ok());

        let missing = dir.join("missing.crt");
        let error = missing.as_path().to_certificate().unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::NotFound);

        fs::remove_dir_all(&dir).unwrap();
    }
}
