//! # Cluster address canonicalisation
//!
//! The canonical form of a cluster address is `https://<lowercase(host)>:
//! <port>`, with port defaulted to 443 and an `https://` prefix inferred
//! when absent. Parsing fails with [`Error::InvalidAddress`] when a scheme
//! other than `https` is given explicitly, when the host is empty, or when
//! the input cannot be parsed as an authority at all.

use crate::error::{Error, Result};

/// Canonicalise a cluster address per §4.1.
///
/// Idempotent: `parse_cluster_address(&parse_cluster_address(a)?)? ==
/// parse_cluster_address(a)?` for every address `a` that parses
/// successfully.
pub fn parse_cluster_address(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid(input, "address is empty"));
    }

    let (scheme, rest) = match trimmed.split_once("://") {
        Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
        None => (None, trimmed),
    };

    if let Some(scheme) = &scheme {
        if scheme != "https" {
            return Err(invalid(input, "must use https scheme"));
        }
    }

    // Unlike a generic URL, the host half may itself contain slashes (cloud
    // providers commonly address clusters by a fully-qualified resource
    // name such as `projects/p/locations/l/clusters/c`), so we do not split
    // on '/' the way a path-aware URL parser would.
    let authority = rest;
    if authority.is_empty() {
        return Err(invalid(input, "host is empty"));
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            (host, port.to_string())
        }
        Some(_) => return Err(invalid(input, "invalid port")),
        None => (authority, "443".to_string()),
    };

    if host.is_empty() {
        return Err(invalid(input, "host is empty"));
    }

    Ok(format!("https://{}:{port}", host.to_ascii_lowercase()))
}

fn invalid(input: &str, reason: &str) -> Error {
    Error::InvalidAddress {
        address: input.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_https_and_lowercases_host() {
        assert_eq!(
            parse_cluster_address("EXAMPLE.COM:8080").unwrap(),
            "https://example.com:8080"
        );
    }

    #[test]
    fn defaults_port_to_443() {
        assert_eq!(
            parse_cluster_address("example.com").unwrap(),
            "https://example.com:443"
        );
    }

    #[test]
    fn rejects_non_https_scheme() {
        let err = parse_cluster_address("http://example.com:443").unwrap_err();
        assert!(err.to_string().contains("must use https scheme"));
    }

    #[test]
    fn rejects_empty_host() {
        assert!(parse_cluster_address("https://:8080").is_err());
    }

    #[test]
    fn rejects_empty_input() {
        assert!(parse_cluster_address("").is_err());
    }

    #[test]
    fn parsing_is_idempotent() {
        for input in ["EXAMPLE.COM:8080", "example.com", "cluster/resource/name"] {
            let once = parse_cluster_address(input).unwrap();
            let twice = parse_cluster_address(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn accepts_explicit_https_scheme() {
        assert_eq!(
            parse_cluster_address("https://cluster/resource/name").unwrap(),
            "https://cluster/resource/name:443"
        );
    }
}
