use crate::context::Role;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::debug;

/// Role recorded for renders without a caller
pub const ANONYMOUS_ROLE: &str = "anonymous";

/// Identity of a cached render.
///
/// The content is stored as a SHA-256 digest so keys stay small whatever the
/// article size.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub hook: String,
    pub slug: String,
    pub content_hash: String,
    pub role: String,
}

impl CacheKey {
    pub fn new(hook: &str, slug: &str, content: &str, role: Option<Role>) -> Self {
        Self {
            hook: hook.to_string(),
            slug: slug.to_string(),
            content_hash: hex::encode(Sha256::digest(content.as_bytes())),
            role: role.map_or_else(|| ANONYMOUS_ROLE.to_string(), |r| r.to_string()),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

struct Inner {
    entries: LruCache<CacheKey, Entry>,
    by_slug: HashMap<String, HashSet<CacheKey>>,
    // bumped by every invalidation of the slug
    generations: HashMap<String, u64>,
}

impl Inner {
    fn generation(&self, slug: &str) -> u64 {
        self.generations.get(slug).copied().unwrap_or(0)
    }

    fn store(&mut self, key: CacheKey, value: String, expires_at: Instant) {
        self.by_slug
            .entry(key.slug.clone())
            .or_default()
            .insert(key.clone());

        if let Some((evicted, _)) = self.entries.push(key.clone(), Entry { value, expires_at }) {
            // push hands back the old entry on replace, or the LRU victim
            if evicted != key {
                self.unindex(&evicted);
            }
        }
    }

    fn unindex(&mut self, key: &CacheKey) {
        if let Some(keys) = self.by_slug.get_mut(&key.slug) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_slug.remove(&key.slug);
            }
        }
    }
}

/// Bounded, time-limited store of pipeline outputs with per-slug invalidation
pub struct RenderCache {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl RenderCache {
    /// A zero capacity is raised to one
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                by_slug: HashMap::new(),
                generations: HashMap::new(),
            }),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fetch a live entry, dropping it instead if it has expired
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.pop(key);
            inner.unindex(key);
            debug!("Render cache entry for '{}' expired", key.slug);
        }
        None
    }

    pub fn insert(&self, key: CacheKey, value: String) {
        self.inner
            .lock()
            .store(key, value, Instant::now() + self.ttl);
    }

    /// Invalidation count of `slug`, to be read before computing a render
    /// that will be passed to [`RenderCache::insert_if_current`]
    pub fn generation(&self, slug: &str) -> u64 {
        self.inner.lock().generation(slug)
    }

    /// Store `value` only if `key.slug` has not been invalidated since
    /// `generation` was read. Returns whether the entry was stored.
    pub fn insert_if_current(&self, key: CacheKey, generation: u64, value: String) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation(&key.slug) != generation {
            debug!("Discarding stale render of '{}'", key.slug);
            return false;
        }
        inner.store(key, value, Instant::now() + self.ttl);
        true
    }

    /// Remove every entry rendered for `slug`; returns how many were dropped.
    ///
    /// Renders of `slug` started before this call can no longer be stored.
    pub fn invalidate_slug(&self, slug: &str) -> usize {
        let mut inner = self.inner.lock();
        *inner.generations.entry(slug.to_string()).or_default() += 1;
        let Some(keys) = inner.by_slug.remove(slug) else {
            return 0;
        };
        let removed = keys
            .iter()
            .filter(|key| inner.entries.pop(*key).is_some())
            .count();
        debug!("Invalidated {} cached renders for '{}'", removed, slug);
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.by_slug.clear();
    }

    /// Number of stored entries, including expired ones not yet pruned
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const HOOK: &str = "onArticleRender";

    fn cache() -> RenderCache {
        RenderCache::new(Duration::from_secs(60), 16)
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = cache();
        let key = CacheKey::new(HOOK, "home", "# Home", None);
        assert_eq!(cache.get(&key), None);

        cache.insert(key.clone(), "<h1>Home</h1>".to_string());
        assert_eq!(cache.get(&key).as_deref(), Some("<h1>Home</h1>"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_key_covers_every_component() {
        let base = CacheKey::new(HOOK, "home", "body", Some(Role::Read));
        assert_ne!(base, CacheKey::new("other", "home", "body", Some(Role::Read)));
        assert_ne!(base, CacheKey::new(HOOK, "away", "body", Some(Role::Read)));
        assert_ne!(base, CacheKey::new(HOOK, "home", "body!", Some(Role::Read)));
        assert_ne!(base, CacheKey::new(HOOK, "home", "body", Some(Role::Admin)));
        assert_ne!(base, CacheKey::new(HOOK, "home", "body", None));
        assert_eq!(base, CacheKey::new(HOOK, "home", "body", Some(Role::Read)));

        assert_eq!(CacheKey::new(HOOK, "s", "c", None).role, ANONYMOUS_ROLE);
        assert_eq!(base.content_hash.len(), 64);
    }

    #[test]
    fn test_entries_expire() {
        let cache = RenderCache::new(Duration::from_millis(20), 16);
        let key = CacheKey::new(HOOK, "home", "body", None);
        cache.insert(key.clone(), "out".to_string());
        assert!(cache.get(&key).is_some());

        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
        assert_eq!(cache.invalidate_slug("home"), 0);
    }

    #[test]
    fn test_invalidation_is_exact() {
        let cache = cache();
        let s = CacheKey::new(HOOK, "S", "a", None);
        let s_admin = CacheKey::new(HOOK, "S", "a", Some(Role::Admin));
        let ss = CacheKey::new(HOOK, "SS", "a", None);
        let s_prefixed = CacheKey::new(HOOK, "S/child", "a", None);
        for key in [&s, &s_admin, &ss, &s_prefixed] {
            cache.insert(key.clone(), "out".to_string());
        }

        assert_eq!(cache.invalidate_slug("S"), 2);
        assert_eq!(cache.get(&s), None);
        assert_eq!(cache.get(&s_admin), None);
        assert!(cache.get(&ss).is_some());
        assert!(cache.get(&s_prefixed).is_some());
        assert_eq!(cache.invalidate_slug("S"), 0);
    }

    #[test]
    fn test_eviction_keeps_index_consistent() {
        let cache = RenderCache::new(Duration::from_secs(60), 2);
        let a = CacheKey::new(HOOK, "a", "1", None);
        let b = CacheKey::new(HOOK, "b", "1", None);
        let c = CacheKey::new(HOOK, "c", "1", None);

        cache.insert(a.clone(), "a".to_string());
        cache.insert(b.clone(), "b".to_string());
        // touch a so b becomes least recently used
        assert!(cache.get(&a).is_some());
        cache.insert(c.clone(), "c".to_string());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&b), None);
        assert_eq!(cache.invalidate_slug("b"), 0);
        assert_eq!(cache.invalidate_slug("a"), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_replacing_entry_keeps_it_indexed() {
        let cache = cache();
        let key = CacheKey::new(HOOK, "home", "body", None);
        cache.insert(key.clone(), "first".to_string());
        cache.insert(key.clone(), "second".to_string());

        assert_eq!(cache.get(&key).as_deref(), Some("second"));
        assert_eq!(cache.invalidate_slug("home"), 1);
    }

    #[test]
    fn test_render_started_before_invalidation_is_not_stored() {
        let cache = cache();
        let key = CacheKey::new(HOOK, "S", "body", None);

        let before = cache.generation("S");
        cache.invalidate_slug("S");
        assert!(!cache.insert_if_current(key.clone(), before, "old".to_string()));
        assert_eq!(cache.get(&key), None);

        let current = cache.generation("S");
        assert_ne!(current, before);
        assert!(cache.insert_if_current(key.clone(), current, "new".to_string()));
        assert_eq!(cache.get(&key).as_deref(), Some("new"));

        // other slugs are unaffected
        let other = CacheKey::new(HOOK, "SS", "body", None);
        assert!(cache.insert_if_current(other.clone(), before, "ok".to_string()));
        assert!(cache.get(&other).is_some());
    }

    #[test]
    fn test_zero_capacity_is_usable() {
        let cache = RenderCache::new(Duration::from_secs(60), 0);
        let key = CacheKey::new(HOOK, "home", "body", None);
        cache.insert(key.clone(), "out".to_string());
        assert!(cache.get(&key).is_some());

        cache.clear();
        assert!(cache.is_empty());
    }
}
