//! Pattern classification and matching for filter-list entries (§3).

/// One parsed line of a blacklist/whitelist file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// `example.com` — matches only the exact canonical host.
    Exact(String),
    /// `*.example.com` — matches `example.com` and any subdomain of it.
    /// Stored without the `*.` prefix, i.e. `example.com`.
    SubdomainWildcard(String),
    /// `a*b.com` — general shell-glob semantics, matched with `glob::Pattern`.
    Glob(glob::Pattern),
}

impl Pattern {
    /// Parses one non-comment, non-blank line into its pattern kind.
    ///
    /// `glob::Pattern::new` only fails on malformed bracket syntax; such a
    /// line is treated as a literal exact-match pattern rather than dropped,
    /// since the file is append-only and we must never silently lose an
    /// operator-supplied entry.
    pub fn parse(line: &str) -> Pattern {
        if let Some(suffix) = line.strip_prefix("*.") {
            return Pattern::SubdomainWildcard(suffix.to_ascii_lowercase());
        }
        if line.contains('*') || line.contains('?') || line.contains('[') {
            if let Ok(p) = glob::Pattern::new(&line.to_ascii_lowercase()) {
                return Pattern::Glob(p);
            }
        }
        Pattern::Exact(line.to_ascii_lowercase())
    }

    /// The literal line that should be persisted to the filter file.
    pub fn as_line(&self) -> String {
        match self {
            Pattern::Exact(s) => s.clone(),
            Pattern::SubdomainWildcard(s) => format!("*.{s}"),
            Pattern::Glob(p) => p.as_str().to_string(),
        }
    }

    /// Whether this pattern matches a canonical (lowercase) host.
    pub fn matches(&self, host: &str) -> bool {
        match self {
            Pattern::Exact(s) => s == host,
            Pattern::SubdomainWildcard(suffix) => {
                host == suffix || host.ends_with(&format!(".{suffix}"))
            }
            Pattern::Glob(p) => p.matches(host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_matches_only_itself() {
        let p = Pattern::parse("example.com");
        assert!(p.matches("example.com"));
        assert!(!p.matches("www.example.com"));
    }

    #[test]
    fn subdomain_wildcard_matches_base_and_subdomains() {
        let p = Pattern::parse("*.example.com");
        assert!(p.matches("example.com"));
        assert!(p.matches("x.example.com"));
        assert!(p.matches("y.x.example.com"));
        assert!(!p.matches("notexample.com"));
    }

    #[test]
    fn general_glob_matches_shell_semantics() {
        let p = Pattern::parse("a*b.com");
        assert!(p.matches("ab.com"));
        assert!(p.matches("a123b.com"));
        assert!(!p.matches("a123c.com"));
    }

    #[test]
    fn parse_is_case_insensitive() {
        let p = Pattern::parse("*.Example.COM");
        assert!(p.matches("x.example.com"));
    }
}
