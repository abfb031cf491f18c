//! Published-file registry.
//!
//! Every published file is reachable only through an unguessable token with
//! an expiry deadline. The token is the whole access control: the server
//! never serves a path that was not explicitly published, and an expired
//! token is indistinguishable from one that never existed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PublishedEntry {
    pub path: String,
    pub filename: String,
    pub deadline: Instant,
}

#[derive(Default)]
struct RegistryInner {
    by_token: HashMap<String, PublishedEntry>,
    /// Reverse index so republishing a path refreshes its token instead of
    /// minting a second one.
    by_path: HashMap<String, String>,
    last_activity: Option<Instant>,
}

#[derive(Default)]
pub struct FileRegistry {
    inner: Mutex<RegistryInner>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a path under a fresh token, or refresh the deadline of its
    /// existing token. Returns (token, filename).
    pub fn publish(&self, path: &str, ttl: Duration) -> (String, String) {
        let filename = filename_of(path);
        let mut inner = self.lock();
        inner.last_activity = Some(Instant::now());

        if let Some(token) = inner.by_path.get(path).cloned() {
            if let Some(entry) = inner.by_token.get_mut(&token) {
                entry.deadline = Instant::now() + ttl;
                debug!(token, path, "publish refreshed");
                return (token, entry.filename.clone());
            }
        }

        let token = new_token();
        inner.by_token.insert(
            token.clone(),
            PublishedEntry {
                path: path.to_string(),
                filename: filename.clone(),
                deadline: Instant::now() + ttl,
            },
        );
        inner.by_path.insert(path.to_string(), token.clone());
        debug!(token, path, "file published");
        (token, filename)
    }

    /// Look up a token. Expired entries are dropped on the way out, so a
    /// stale token 404s exactly like an unknown one.
    pub fn lookup(&self, token: &str) -> Option<PublishedEntry> {
        let mut inner = self.lock();
        inner.last_activity = Some(Instant::now());

        let entry = inner.by_token.get(token)?.clone();
        if entry.deadline <= Instant::now() {
            inner.by_token.remove(token);
            inner.by_path.remove(&entry.path);
            debug!(token, "expired token dropped on lookup");
            return None;
        }
        Some(entry)
    }

    /// Withdraw a published path. Its token stops working immediately.
    pub fn revoke_path(&self, path: &str) -> bool {
        let mut inner = self.lock();
        match inner.by_path.remove(path) {
            Some(token) => {
                inner.by_token.remove(&token);
                true
            }
            None => false,
        }
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .by_token
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(t, _)| t.clone())
            .collect();
        for token in &expired {
            if let Some(entry) = inner.by_token.remove(token) {
                inner.by_path.remove(&entry.path);
            }
        }
        expired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().by_token.is_empty()
    }

    /// Time since the last publish or lookup, if any activity happened.
    pub fn idle_for(&self) -> Option<Duration> {
        self.lock().last_activity.map(|at| at.elapsed())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 128 bits of randomness as 32 lowercase hex characters. URL-safe without
/// any escaping.
fn new_token() -> String {
    format!("{:032x}", rand::rng().random::<u128>())
}

fn filename_of(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_32_hex_chars_and_unique() {
        let registry = FileRegistry::new();
        let (a, _) = registry.publish("/music/a.mp3", Duration::from_secs(60));
        let (b, _) = registry.publish("/music/b.mp3", Duration::from_secs(60));
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn republish_reuses_the_token() {
        let registry = FileRegistry::new();
        let (a, _) = registry.publish("/music/a.mp3", Duration::from_secs(60));
        let (again, _) = registry.publish("/music/a.mp3", Duration::from_secs(60));
        assert_eq!(a, again);
    }

    #[test]
    fn expired_token_looks_unknown() {
        let registry = FileRegistry::new();
        let (token, _) = registry.publish("/music/a.mp3", Duration::ZERO);
        assert!(registry.lookup(&token).is_none());
        // The expired entry was dropped entirely.
        assert!(registry.is_empty());
    }

    #[test]
    fn revoke_stops_the_token() {
        let registry = FileRegistry::new();
        let (token, _) = registry.publish("/music/a.mp3", Duration::from_secs(60));
        assert!(registry.lookup(&token).is_some());
        assert!(registry.revoke_path("/music/a.mp3"));
        assert!(registry.lookup(&token).is_none());
        assert!(!registry.revoke_path("/music/a.mp3"));
    }

    #[test]
    fn prune_drops_only_expired_entries() {
        let registry = FileRegistry::new();
        registry.publish("/a.mp3", Duration::ZERO);
        registry.publish("/b.mp3", Duration::from_secs(60));
        assert_eq!(registry.prune(), 1);
        assert!(!registry.is_empty());
    }

    #[test]
    fn filename_comes_from_the_last_path_segment() {
        let registry = FileRegistry::new();
        let (_, name) = registry.publish("/music/Album Name/01 track.flac", Duration::from_secs(60));
        assert_eq!(name, "01 track.flac");
    }
}
