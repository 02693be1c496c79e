//! Timed eviction of stale block caches.
//!
//! Every table handle remembers when its decoded blocks were last touched.
//! A background timer walks the levels and clears any cache that has gone
//! unread for longer than the configured TTL, bounding memory at the cost
//! of re-reading the block on the next lookup.

use crate::Shared;

/// One eviction pass over every level's files. Runs under the engine lock;
/// the walk is cheap because it only inspects timestamps.
pub(crate) fn run_cache_gc(shared: &Shared) {
    let ttl = shared.config.cache_ttl;
    let mut state = shared.state.lock();

    let mut evicted = 0usize;
    for level in state.levels.iter_mut() {
        for file in level.files.iter_mut() {
            if file.evict_if_stale(ttl) {
                log::debug!("evicted block cache for {}", file.filename);
                evicted += 1;
            }
        }
    }
    if evicted > 0 {
        log::info!("cache GC evicted {} table cache(s)", evicted);
    }
}
