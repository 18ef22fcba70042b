use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use url::{Host, Url};

/// Why a URL was refused.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// Private, link-local, or unspecified address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    #[error("Localhost not allowed")]
    Localhost,
}

fn parse_http(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
}

/// Validates a URL handed out by the remote service, such as a subscription
/// icon, before it is fetched.
///
/// Only public HTTP(S) hosts pass: `localhost`, loopback, private,
/// link-local, and unspecified addresses are refused so a hostile listing
/// cannot point the client at the local network.
///
/// ```
/// use ldrmirror::util::validate_url;
///
/// assert!(validate_url("https://example.com/favicon.ico").is_ok());
/// assert!(validate_url("http://192.168.1.1/icon.png").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = parse_http(url_str)?;
    match url.host() {
        Some(Host::Domain(domain)) if domain.eq_ignore_ascii_case("localhost") => {
            Err(UrlValidationError::Localhost)
        }
        Some(Host::Ipv4(ip)) if ip.is_loopback() => Err(UrlValidationError::Localhost),
        Some(Host::Ipv6(ip)) if ip.is_loopback() => Err(UrlValidationError::Localhost),
        Some(Host::Ipv4(ip)) if is_internal_v4(ip) => {
            Err(UrlValidationError::PrivateIp(ip.to_string()))
        }
        Some(Host::Ipv6(ip)) if is_internal_v6(ip) => {
            Err(UrlValidationError::PrivateIp(ip.to_string()))
        }
        _ => Ok(url),
    }
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    // fc00::/7 unique local, fe80::/10 link-local
    ip.is_unspecified() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

/// Validates the configured reader service root.
///
/// Unlike [`validate_url`], loopback and private hosts are accepted: the
/// service is chosen by the user and is often self-hosted. The returned URL
/// always ends in `/` so endpoint paths join beneath it.
pub fn validate_base_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let mut url = parse_http(url_str)?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(UrlValidationError::InvalidUrl(url::ParseError::EmptyHost));
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Same scheme, host and port.
pub fn is_same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}
