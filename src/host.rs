//! Host-name canonicalization (§3: "Host name").
//!
//! Every filter lookup and persisted pattern uses the canonical form: a
//! lowercase, IDNA-encoded ASCII host. A decode failure falls back to a
//! lowercased raw string rather than a hard error (Open Question, resolved
//! in favor of "fall back" per SPEC_FULL.md §9) — that fallback is usable for
//! routing the current connection but is never written to a filter file.

/// Result of canonicalizing a raw host string.
pub struct CanonicalHost {
    /// The canonical form to use for lookups and (if `persistable`) storage.
    pub value: String,
    /// False when IDNA encoding failed and `value` is a best-effort fallback.
    pub persistable: bool,
}

/// Canonicalize a raw host (as taken from a `CONNECT` target or `Host:`
/// header, with any `:port` suffix already stripped) into its lookup form.
pub fn canonicalize(raw: &str) -> CanonicalHost {
    let trimmed = raw.trim();
    match idna::domain_to_ascii(trimmed) {
        Ok(ascii) => CanonicalHost {
            value: ascii,
            persistable: true,
        },
        Err(_) => CanonicalHost {
            value: trimmed.to_ascii_lowercase(),
            persistable: false,
        },
    }
}

/// Splits a `host[:port]` token into its host and an optional port,
/// tolerating IPv6 literals in brackets (`[::1]:443`).
pub fn split_host_port(token: &str) -> (&str, Option<u16>) {
    let token = token.trim();
    if let Some(rest) = token.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let host = &rest[..end];
            let after = &rest[end + 1..];
            let port = after
                .strip_prefix(':')
                .and_then(|p| p.parse::<u16>().ok());
            return (host, port);
        }
    }
    match token.rfind(':') {
        Some(idx) if token[idx + 1..].chars().all(|c| c.is_ascii_digit()) && idx + 1 < token.len() => {
            let port = token[idx + 1..].parse::<u16>().ok();
            (&token[..idx], port)
        }
        _ => (token, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_lowercases_ascii() {
        let c = canonicalize("Example.COM");
        assert_eq!(c.value, "example.com");
        assert!(c.persistable);
    }

    #[test]
    fn canonicalize_encodes_unicode() {
        let c = canonicalize("bücher.example");
        assert!(c.value.starts_with("xn--"));
        assert!(c.persistable);
    }

    #[test]
    fn split_host_port_default() {
        assert_eq!(split_host_port("example.com"), ("example.com", None));
        assert_eq!(split_host_port("example.com:8080"), ("example.com", Some(8080)));
    }

    #[test]
    fn split_host_port_ipv6_literal() {
        assert_eq!(split_host_port("[::1]:443"), ("::1", Some(443)));
        assert_eq!(split_host_port("[::1]"), ("::1", None));
    }
}
