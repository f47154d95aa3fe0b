//! Leaf certificate issuance

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType,
};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};

use crate::ca::{CertEngine, write_with_mode};
use crate::error::{EngineError, Result};
use crate::{fatal, user_and_hostname};

/// Leaf certificate validity period (2 years and 3 months).
///
/// Stays below the 825 day limit Apple platforms apply to TLS certificates.
const LEAF_VALIDITY_DAYS: i64 = 730 + 90;

const LEAF_ORGANIZATION: &str = "mkcert development certificate";

/// Kind of a validated name, deciding its subject alternative name type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Ip,
    Email,
    Url,
    /// ASCII hostname, possibly a `*.` wildcard or punycode.
    Hostname,
}

/// A name already classified by the caller
pub trait SubjectName {
    fn kind(&self) -> HostKind;
    fn name(&self) -> &str;
}

impl SubjectName for (HostKind, &str) {
    fn kind(&self) -> HostKind {
        self.0
    }

    fn name(&self) -> &str {
        self.1
    }
}

/// Output paths for a certificate covering `hosts`, written into `out_dir`.
///
/// The name is taken from the first host, with `:` replaced by `_` and `*` by
/// `_wildcard`; `+N` is appended when `N` more hosts are covered.
///
/// Returns `(cert_path, key_path)`.
pub fn file_names<S: AsRef<str>>(hosts: &[S], out_dir: &Path) -> (PathBuf, PathBuf) {
    let mut name = hosts
        .first()
        .map(|h| h.as_ref().replace(':', "_").replace('*', "_wildcard"))
        .unwrap_or_else(|| "cert".to_string());
    if hosts.len() > 1 {
        name.push_str(&format!("+{}", hosts.len() - 1));
    }

    (
        out_dir.join(format!("{name}.pem")),
        out_dir.join(format!("{name}-key.pem")),
    )
}

/// Whether `host` is a wildcard directly under a top-level domain (`*.com`).
///
/// Browsers refuse such certificates.
pub fn is_wildcard_too_broad(host: &str) -> bool {
    host.strip_prefix("*.")
        .is_some_and(|rest| !rest.is_empty() && !rest.contains('.'))
}

impl CertEngine {
    /// Issue a certificate for `hosts` signed by the loaded CA.
    ///
    /// Hosts are expected to be validated already; each one's [`HostKind`]
    /// picks its SAN type. Writes the files named by [`file_names`] and
    /// returns their paths.
    ///
    /// Aborts through [`fatal`] on any failure.
    pub fn make_cert<N: SubjectName>(&self, hosts: &[N], out_dir: &Path) -> (PathBuf, PathBuf) {
        match self.try_make_cert(hosts, out_dir) {
            Ok(paths) => paths,
            Err(e) => fatal(e),
        }
    }

    fn try_make_cert<N: SubjectName>(&self, hosts: &[N], out_dir: &Path) -> Result<(PathBuf, PathBuf)> {
        let Some(ca_key_pem) = self.ca.as_ref().and_then(|ca| ca.key_pem.as_deref()) else {
            return Err(EngineError::MissingCaKey);
        };
        let Some(ca_cert_pem) = self.ca_cert_pem() else {
            return Err(EngineError::MissingCaKey);
        };
        if hosts.is_empty() {
            return Err(EngineError::Validation(
                "At least one name is required".to_string(),
            ));
        }

        let ca_key = KeyPair::from_pem(ca_key_pem)
            .map_err(|e| EngineError::Parse(format!("Failed to parse CA private key: {}", e)))?;
        let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, ca_key)
            .map_err(|e| EngineError::Parse(format!("Failed to parse CA certificate: {}", e)))?;

        let params = leaf_params(hosts)?;
        let leaf_key =
            KeyPair::generate().map_err(|e| EngineError::KeypairGeneration(e.to_string()))?;
        let leaf_cert = params.signed_by(&leaf_key, &issuer).map_err(|e| {
            EngineError::CertificateGeneration(format!("Failed to sign leaf certificate: {}", e))
        })?;

        let names: Vec<&str> = hosts.iter().map(SubjectName::name).collect();
        let (cert_path, key_path) = file_names(&names, out_dir);
        if cert_path == key_path {
            let combined = format!("{}{}", leaf_cert.pem(), leaf_key.serialize_pem());
            write_with_mode(&cert_path, &combined, 0o600)?;
        } else {
            write_with_mode(&cert_path, &leaf_cert.pem(), 0o644)?;
            write_with_mode(&key_path, &leaf_key.serialize_pem(), 0o600)?;
        }

        tracing::info!(
            "Created a new certificate valid for {:?} at {}",
            names,
            cert_path.display()
        );
        for name in names.iter().filter(|n| is_wildcard_too_broad(n)) {
            tracing::warn!("{name} is a second-level wildcard; browsers will not accept it");
        }

        Ok((cert_path, key_path))
    }
}

fn leaf_params<N: SubjectName>(hosts: &[N]) -> Result<CertificateParams> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, LEAF_ORGANIZATION);
    dn.push(DnType::OrganizationalUnitName, user_and_hostname());
    params.distinguished_name = dn;

    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];

    let mut server_names = false;
    let mut emails = false;
    let mut sans = Vec::with_capacity(hosts.len());
    for host in hosts {
        let name = host.name();
        let san = match host.kind() {
            HostKind::Ip => {
                server_names = true;
                let ip = name.parse::<IpAddr>().map_err(|e| {
                    EngineError::Validation(format!("Invalid IP address '{}': {}", name, e))
                })?;
                SanType::IpAddress(ip)
            }
            HostKind::Url => {
                server_names = true;
                SanType::URI(ia5(name)?)
            }
            HostKind::Email => {
                emails = true;
                SanType::Rfc822Name(ia5(name)?)
            }
            HostKind::Hostname => {
                server_names = true;
                SanType::DnsName(ia5(name)?)
            }
        };
        sans.push(san);
    }
    params.subject_alt_names = sans;

    if server_names {
        params
            .extended_key_usages
            .push(ExtendedKeyUsagePurpose::ServerAuth);
    }
    if emails {
        params
            .extended_key_usages
            .push(ExtendedKeyUsagePurpose::EmailProtection);
    }

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(LEAF_VALIDITY_DAYS);
    Ok(params)
}

fn ia5(value: &str) -> Result<rcgen::string::Ia5String> {
    value
        .try_into()
        .map_err(|e| EngineError::Validation(format!("Invalid name '{}': {:?}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use x509_parser::extensions::{GeneralName, ParsedExtension};

    fn engine(root: &Path) -> CertEngine {
        let mut engine = CertEngine::new(root);
        engine.load_ca();
        engine
    }

    fn parse_sans(cert_pem: &str) -> Vec<String> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes()).unwrap();
        let cert = pem.parse_x509().unwrap();
        let san_ext = cert
            .extensions()
            .iter()
            .find(|ext| ext.oid == x509_parser::oid_registry::OID_X509_EXT_SUBJECT_ALT_NAME)
            .expect("Certificate should have SAN extension");
        let ParsedExtension::SubjectAlternativeName(san) = san_ext.parsed_extension() else {
            panic!("Expected SubjectAlternativeName");
        };
        san.general_names
            .iter()
            .map(|name| match name {
                GeneralName::DNSName(d) => format!("dns:{d}"),
                GeneralName::RFC822Name(e) => format!("email:{e}"),
                GeneralName::URI(u) => format!("uri:{u}"),
                GeneralName::IPAddress(ip) => format!("ip:{} bytes", ip.len()),
                other => format!("{other:?}"),
            })
            .collect()
    }

    #[test]
    fn file_names_single_host() {
        let (cert, key) = file_names(&["example.com"], Path::new("/out"));
        assert_eq!(cert, Path::new("/out/example.com.pem"));
        assert_eq!(key, Path::new("/out/example.com-key.pem"));
    }

    #[test]
    fn file_names_multiple_hosts_count_the_extra_ones() {
        let (cert, key) = file_names(&["example.com", "localhost", "127.0.0.1"], Path::new("out"));
        assert_eq!(cert, Path::new("out/example.com+2.pem"));
        assert_eq!(key, Path::new("out/example.com+2-key.pem"));
    }

    #[test]
    fn file_names_replace_wildcard_and_colon() {
        let (cert, _) = file_names(&["*.example.com"], Path::new("out"));
        assert_eq!(cert, Path::new("out/_wildcard.example.com.pem"));

        let (cert, _) = file_names(&["::1"], Path::new("out"));
        assert_eq!(cert, Path::new("out/__1.pem"));
    }

    #[test]
    fn wildcard_breadth() {
        assert!(is_wildcard_too_broad("*.com"));
        assert!(!is_wildcard_too_broad("*.example.com"));
        assert!(!is_wildcard_too_broad("example.com"));
    }

    #[test]
    fn make_cert_writes_cert_and_key() {
        let ca = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let engine = engine(ca.path());

        let (cert_path, key_path) =
            engine.make_cert(&[(HostKind::Hostname, "foo.baz.com")], out.path());

        let cert_pem = std::fs::read_to_string(&cert_path).unwrap();
        let key_pem = std::fs::read_to_string(&key_path).unwrap();
        assert!(cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(key_pem.contains("BEGIN PRIVATE KEY"));
        assert_eq!(parse_sans(&cert_pem), vec!["dns:foo.baz.com".to_string()]);
    }

    #[test]
    fn make_cert_types_each_subject_alternative_name() {
        let ca = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let engine = engine(ca.path());

        let (cert_path, _) = engine.make_cert(
            &[
                (HostKind::Hostname, "example.com"),
                (HostKind::Ip, "127.0.0.1"),
                (HostKind::Email, "dev@example.com"),
                (HostKind::Url, "https://example.com/app"),
            ],
            out.path(),
        );

        let sans = parse_sans(&std::fs::read_to_string(cert_path).unwrap());
        assert_eq!(
            sans,
            vec![
                "dns:example.com".to_string(),
                "ip:4 bytes".to_string(),
                "email:dev@example.com".to_string(),
                "uri:https://example.com/app".to_string(),
            ]
        );
    }

    #[test]
    fn san_type_follows_the_given_kind_not_the_text() {
        let ca = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let engine = engine(ca.path());

        let (cert_path, _) = engine.make_cert(
            &[
                (HostKind::Url, "urn:example:thing"),
                (HostKind::Hostname, "dev.example.com"),
            ],
            out.path(),
        );

        let sans = parse_sans(&std::fs::read_to_string(cert_path).unwrap());
        assert_eq!(
            sans,
            vec![
                "uri:urn:example:thing".to_string(),
                "dns:dev.example.com".to_string(),
            ]
        );
    }

    #[test]
    fn ip_kind_with_a_non_ip_name_is_fatal() {
        let ca = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let engine = engine(ca.path());

        let payload = std::panic::catch_unwind(|| {
            engine.make_cert(&[(HostKind::Ip, "example.com")], out.path());
        })
        .unwrap_err();
        let err = payload.downcast::<EngineError>().unwrap();
        assert!(err.to_string().contains("Invalid IP address"), "{err}");
    }

    #[test]
    fn leaf_is_signed_by_the_ca() {
        let ca = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let engine = engine(ca.path());
        let (cert_path, _) = engine.make_cert(&[(HostKind::Hostname, "localhost")], out.path());

        let leaf_pem = std::fs::read_to_string(cert_path).unwrap();
        let (_, leaf) = x509_parser::pem::parse_x509_pem(leaf_pem.as_bytes()).unwrap();
        let leaf = leaf.parse_x509().unwrap();
        let (_, root) =
            x509_parser::pem::parse_x509_pem(engine.ca_cert_pem().unwrap().as_bytes()).unwrap();
        let root = root.parse_x509().unwrap();

        assert_eq!(leaf.issuer().to_string(), root.subject().to_string());
        let leaf_is_ca = leaf
            .basic_constraints()
            .unwrap()
            .is_some_and(|bc| bc.value.ca);
        assert!(!leaf_is_ca);
    }

    #[test]
    fn make_cert_without_ca_is_fatal() {
        let out = TempDir::new().unwrap();
        let engine = CertEngine::default();

        let payload = std::panic::catch_unwind(|| {
            engine.make_cert(&[(HostKind::Hostname, "foo.baz.com")], out.path());
        })
        .unwrap_err();
        let err = payload.downcast::<EngineError>().unwrap();
        assert!(err.to_string().contains("can't create new certificates"));
    }

    #[cfg(unix)]
    #[test]
    fn leaf_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let ca = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let (_, key_path) =
            engine(ca.path()).make_cert(&[(HostKind::Hostname, "localhost")], out.path());

        let mode = std::fs::metadata(key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
