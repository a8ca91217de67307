//! # Filter Store (component A)
//!
//! In-memory blacklist + whitelist with wildcard matching and a durable,
//! append-only on-disk mirror. Whitelist precedence is enforced inside
//! [`FilterStore::is_blacklisted`]: a host that matches both lists is
//! whitelisted.
//!
//! Readers take a short-lived [`std::sync::RwLock`] read guard over the
//! in-memory sets; the guard is never held across an `.await`. Writers
//! serialise per-list through the same lock for the in-memory mutation, and
//! through an independent [`tokio::sync::Mutex`] that guards only the file
//! handle — the two locks are never nested with network I/O in between.

pub mod pattern;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tokio::io::AsyncWriteExt;

use crate::error::ProxyError;
use crate::host::canonicalize;
use pattern::Pattern;

#[derive(Debug, Default)]
struct ListState {
    exact: HashSet<String>,
    patterns: Vec<Pattern>,
}

impl ListState {
    fn contains(&self, host: &str) -> bool {
        if self.exact.contains(host) {
            return true;
        }
        self.patterns.iter().any(|p| p.matches(host))
    }

    /// Returns `true` if the host was newly inserted (not already present).
    fn insert(&mut self, line: &str) -> bool {
        if self.contains(line) {
            return false;
        }
        match Pattern::parse(line) {
            Pattern::Exact(h) => self.exact.insert(h),
            p => {
                self.patterns.push(p);
                true
            }
        }
    }
}

/// One side of the filter store (either the blacklist or the whitelist),
/// paired with its backing file.
#[derive(Debug)]
struct FilterList {
    state: RwLock<ListState>,
    path: Option<PathBuf>,
    file_lock: tokio::sync::Mutex<()>,
}

impl FilterList {
    fn empty() -> Self {
        FilterList {
            state: RwLock::new(ListState::default()),
            path: None,
            file_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn contains(&self, host: &str) -> bool {
        self.state.read().unwrap().contains(host)
    }

    fn len(&self) -> usize {
        let s = self.state.read().unwrap();
        s.exact.len() + s.patterns.len()
    }

    /// Loads non-comment, non-blank lines from `path` into memory, replacing
    /// whatever was there before. Does not touch the file otherwise.
    fn load_lines(&mut self, lines: &[String]) {
        let mut state = ListState::default();
        for line in lines {
            state.insert(line);
        }
        self.state = RwLock::new(state);
    }

    /// Inserts `host` if absent and best-effort appends it to the backing
    /// file. The in-memory insertion is visible to subsequent lookups
    /// regardless of whether the append below succeeds (§3 invariant).
    async fn add(&self, host: &str) -> bool {
        let inserted = {
            let mut state = self.state.write().unwrap();
            state.insert(host)
        };
        if inserted {
            if let Some(path) = &self.path {
                let _guard = self.file_lock.lock().await;
                if let Err(e) = append_line(path, host).await {
                    log::error!("failed to append {} to {}: {}", host, path.display(), e);
                }
            }
        }
        inserted
    }
}

async fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut f = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    f.write_all(line.as_bytes()).await?;
    f.write_all(b"\n").await?;
    f.flush().await
}

fn read_pattern_lines(path: &Path) -> io::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// The combined blacklist/whitelist filtering engine.
pub struct FilterStore {
    blacklist: FilterList,
    whitelist: FilterList,
}

impl FilterStore {
    /// Loads the blacklist and (optionally) whitelist per §4.A.
    ///
    /// When `auto_blacklist` is true, static blacklist loading is skipped
    /// entirely and a missing blacklist file is not an error. Otherwise a
    /// missing blacklist file at an explicitly configured path is fatal.
    pub fn load(
        blacklist_path: &Path,
        whitelist_path: Option<&Path>,
        auto_blacklist: bool,
    ) -> Result<FilterStore, ProxyError> {
        let mut blacklist = FilterList::empty();
        if !auto_blacklist {
            if !blacklist_path.exists() {
                return Err(ProxyError::Config(format!(
                    "blacklist file {} not found",
                    blacklist_path.display()
                )));
            }
            let lines = read_pattern_lines(blacklist_path).map_err(|e| {
                ProxyError::Config(format!(
                    "failed to read blacklist {}: {}",
                    blacklist_path.display(),
                    e
                ))
            })?;
            blacklist.load_lines(&lines);
            blacklist.path = Some(blacklist_path.to_path_buf());
        } else {
            // Auto-blacklist mode still appends probe results to this path.
            blacklist.path = Some(blacklist_path.to_path_buf());
        }

        let mut whitelist = FilterList::empty();
        if let Some(path) = whitelist_path {
            if path.exists() {
                match read_pattern_lines(path) {
                    Ok(lines) => whitelist.load_lines(&lines),
                    Err(e) => log::warn!("failed to read whitelist {}: {}", path.display(), e),
                }
            } else if let Err(e) = create_empty_whitelist(path) {
                log::warn!("failed to create whitelist {}: {}", path.display(), e);
            }
            whitelist.path = Some(path.to_path_buf());
        }

        Ok(FilterStore { blacklist, whitelist })
    }

    /// A store with no backing files, useful for tests and for embedding.
    pub fn in_memory() -> FilterStore {
        FilterStore {
            blacklist: FilterList::empty(),
            whitelist: FilterList::empty(),
        }
    }

    pub fn is_whitelisted(&self, host: &str) -> bool {
        self.whitelist.contains(host)
    }

    pub fn is_blacklisted(&self, host: &str) -> bool {
        if self.is_whitelisted(host) {
            return false;
        }
        self.blacklist.contains(host)
    }

    pub async fn add_blacklist(&self, host: &str) -> bool {
        self.blacklist.add(host).await
    }

    pub async fn add_whitelist(&self, host: &str) -> bool {
        self.whitelist.add(host).await
    }

    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }

    pub fn whitelist_len(&self) -> usize {
        self.whitelist.len()
    }
}

fn create_empty_whitelist(path: &Path) -> io::Result<()> {
    std::fs::write(
        path,
        "# Whitelist - domains that should never be fragmented\n\
         # One domain per line\n\
         # Lines starting with # are comments\n",
    )
}

/// Convenience used by the connection handler: canonicalizes `raw_host` and
/// reports both its canonical form and whether it is whitelisted.
pub fn canonical_and_whitelisted(store: &FilterStore, raw_host: &str) -> (String, bool) {
    let canon = canonicalize(raw_host);
    let whitelisted = store.is_whitelisted(&canon.value);
    (canon.value, whitelisted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn whitelist_precedence_over_blacklist() {
        let store = FilterStore::in_memory();
        // simulate both lists containing the same host via direct inserts
        {
            let mut s = store.blacklist.state.write().unwrap();
            s.insert("example.com");
        }
        {
            let mut s = store.whitelist.state.write().unwrap();
            s.insert("example.com");
        }
        assert!(store.is_whitelisted("example.com"));
        assert!(!store.is_blacklisted("example.com"));
    }

    #[tokio::test]
    async fn add_blacklist_is_idempotent() {
        let store = FilterStore::in_memory();
        assert!(store.add_blacklist("evil.test").await);
        assert!(!store.add_blacklist("evil.test").await);
        assert_eq!(store.blacklist_len(), 1);
        assert!(store.is_blacklisted("evil.test"));
    }

    #[tokio::test]
    async fn add_blacklist_persists_even_without_path() {
        let store = FilterStore::in_memory();
        store.add_blacklist("blocked.test").await;
        assert!(store.is_blacklisted("blocked.test"));
    }

    #[tokio::test]
    async fn load_then_add_round_trips_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blacklist.txt");
        std::fs::write(&path, "# comment\n\nexample.com\n*.blocked.test\n").unwrap();

        let store = FilterStore::load(&path, None, false).unwrap();
        assert!(store.is_blacklisted("example.com"));
        assert!(store.is_blacklisted("x.blocked.test"));

        store.add_blacklist("new.test").await.then_some(()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("new.test"));

        // Reloading reproduces the same effective set.
        let reloaded = FilterStore::load(&path, None, false).unwrap();
        assert!(reloaded.is_blacklisted("new.test"));
        assert!(reloaded.is_blacklisted("example.com"));
    }

    #[test]
    fn missing_blacklist_is_fatal_unless_auto() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.txt");
        assert!(FilterStore::load(&missing, None, false).is_err());
        assert!(FilterStore::load(&missing, None, true).is_ok());
    }

    #[test]
    fn missing_whitelist_is_created_empty() {
        let dir = TempDir::new().unwrap();
        let wl = dir.path().join("whitelist.txt");
        let bl = dir.path().join("blacklist.txt");
        std::fs::write(&bl, "").unwrap();
        let _store = FilterStore::load(&bl, Some(&wl), false).unwrap();
        assert!(wl.exists());
    }
}
