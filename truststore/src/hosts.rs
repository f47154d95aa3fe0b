//! Host validation
//!
//! Classifies each requested name as an IP literal, an email address, an
//! absolute URL or a hostname, and normalizes internationalized hostnames to
//! their ASCII (punycode) form before they reach the certificate engine.

use std::fmt;
use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;
use truststore_engine::SubjectName;

use crate::error::{Error, Result};

pub use truststore_engine::HostKind;

// Non-empty labels; the ends are checked separately.
static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\*\.)?[0-9a-z_-]+(\.[0-9a-z_-]+)*$").expect("valid hostname regex")
});

// Bare RFC 5322 addr-spec with a dot-atom local part.
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)*$",
    )
    .expect("valid email regex")
});

/// A validated certificate subject name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    kind: HostKind,
    text: String,
}

impl Identifier {
    fn new(kind: HostKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn kind(&self) -> HostKind {
        self.kind
    }

    /// Normalized text of the name, as written into the certificate.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_wildcard(&self) -> bool {
        self.kind == HostKind::Hostname && self.text.starts_with("*.")
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl SubjectName for Identifier {
    fn kind(&self) -> HostKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.text
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

/// Validate and normalize `hosts`.
///
/// Returns one entry per input, in order. Hostnames with non-ASCII labels are
/// replaced by their punycode form in the returned list; the input is never
/// modified. Fails on the first invalid entry, naming it as given.
pub fn validate_hosts<S: AsRef<str>>(hosts: &[S]) -> Result<Vec<Identifier>> {
    hosts.iter().map(|h| classify(h.as_ref())).collect()
}

/// Classify and normalize a single name.
pub fn classify(name: &str) -> Result<Identifier> {
    if name.parse::<IpAddr>().is_ok() {
        return Ok(Identifier::new(HostKind::Ip, name));
    }
    if EMAIL_RE.is_match(name) {
        return Ok(Identifier::new(HostKind::Email, name));
    }
    if is_absolute_url(name) {
        return Ok(Identifier::new(HostKind::Url, name));
    }

    let ascii = to_ascii(name)?;
    if !is_hostname(&ascii) {
        return Err(Error::InvalidHost {
            host: name.to_string(),
        });
    }
    Ok(Identifier::new(HostKind::Hostname, ascii))
}

/// A scheme followed by `//` and a non-empty host.
///
/// The WHATWG parser fills in a host for `http:example.com` and
/// `http:\\example.com`; only names spelling out the authority count.
fn is_absolute_url(name: &str) -> bool {
    let Ok(url) = url::Url::parse(name) else {
        return false;
    };
    let has_authority = name
        .split_once("://")
        .is_some_and(|(scheme, _)| scheme.eq_ignore_ascii_case(url.scheme()));
    has_authority && url.host_str().is_some_and(|h| !h.is_empty())
}

fn is_hostname(ascii: &str) -> bool {
    let bare = ascii.strip_prefix("*.").unwrap_or(ascii);
    let alnum_ends = bare.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && bare.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    alnum_ends && HOSTNAME_RE.is_match(ascii)
}

fn to_ascii(name: &str) -> Result<String> {
    if name.is_ascii() {
        return Ok(name.to_string());
    }
    idna::domain_to_ascii(name).map_err(|e| Error::InvalidHostEncoding {
        host: name.to_string(),
        reason: e.to_string(),
    })
}
