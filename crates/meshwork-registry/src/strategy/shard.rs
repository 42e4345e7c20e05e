use super::{Candidate, Strategy};
use meshwork_common::Context;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Configuration for [`ShardStrategy`].
#[derive(Debug, Clone)]
pub struct ShardOptions {
    /// Dot path of the parameter the ring is keyed by. A `#` prefix reads
    /// from call meta instead of params (e.g. `"#session.id"`).
    pub shard_key: String,
    /// Virtual nodes per endpoint on the ring. More vnodes smooth the key
    /// distribution at the cost of a bigger ring.
    ///
    /// Default: 10
    pub vnodes: u32,
}

impl Default for ShardOptions {
    fn default() -> Self {
        ShardOptions {
            shard_key: "shard".to_string(),
            vnodes: 10,
        }
    }
}

struct RingState {
    /// Node ids the ring was built from, in candidate order.
    ids: Vec<String>,
    /// hash point -> candidate index.
    ring: BTreeMap<u64, usize>,
}

/// Consistent-hash ring selection.
///
/// The same shard key always resolves to the same endpoint while the
/// endpoint set is unchanged; when the set changes, only the keys owned by
/// the affected ring arcs move. Calls without a resolvable shard key fall
/// back to round-robin.
#[derive(Debug)]
pub struct ShardStrategy {
    opts: ShardOptions,
    ring: Mutex<Option<RingState>>,
    fallback_counter: AtomicUsize,
}

impl std::fmt::Debug for RingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingState")
            .field("ids", &self.ids)
            .field("points", &self.ring.len())
            .finish()
    }
}

impl ShardStrategy {
    pub fn new(opts: ShardOptions) -> Self {
        ShardStrategy {
            opts,
            ring: Mutex::new(None),
            fallback_counter: AtomicUsize::new(0),
        }
    }

    /// Reads the shard key out of the call context.
    fn shard_value(&self, ctx: &Context) -> Option<String> {
        let (root, path) = match self.opts.shard_key.strip_prefix('#') {
            Some(rest) => (&ctx.meta, rest),
            None => (&ctx.params, self.opts.shard_key.as_str()),
        };
        let mut current = root;
        for seg in path.split('.') {
            current = current.get(seg)?;
        }
        match current {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn hash(input: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        input.hash(&mut hasher);
        hasher.finish()
    }

    /// Rebuilds the ring iff the candidate set changed since last time.
    fn ring_lookup(&self, candidates: &[Candidate<'_>], key: &str) -> usize {
        let ids: Vec<String> = candidates.iter().map(|c| c.node_id.to_string()).collect();
        let mut guard = self.ring.lock().expect("shard ring lock");

        let rebuild = match guard.as_ref() {
            Some(state) => state.ids != ids,
            None => true,
        };
        if rebuild {
            let mut ring = BTreeMap::new();
            for (idx, id) in ids.iter().enumerate() {
                for replica in 0..self.opts.vnodes {
                    ring.insert(Self::hash(&format!("{}:{}", id, replica)), idx);
                }
            }
            *guard = Some(RingState { ids, ring });
        }

        let state = guard.as_ref().expect("ring just built");
        let point = Self::hash(key);
        state
            .ring
            .range(point..)
            .next()
            .or_else(|| state.ring.iter().next())
            .map(|(_, idx)| *idx)
            .expect("ring is non-empty for non-empty candidates")
    }
}

impl Strategy for ShardStrategy {
    fn select(&self, candidates: &[Candidate<'_>], ctx: Option<&Context>) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let key = ctx.and_then(|c| self.shard_value(c));
        match key {
            Some(key) => Some(self.ring_lookup(candidates, &key)),
            None => {
                let i = self.fallback_counter.fetch_add(1, Ordering::Relaxed);
                Some(i % candidates.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidates<'a>(ids: &'a [String]) -> Vec<Candidate<'a>> {
        ids.iter()
            .map(|id| Candidate {
                node_id: id,
                local: false,
                cpu: None,
            })
            .collect()
    }

    fn ctx_with_key(key: &str) -> Context {
        Context::new("node-1", "users.get", json!({ "shard": key }))
    }

    #[test]
    fn test_empty_list_returns_none() {
        let strategy = ShardStrategy::new(ShardOptions::default());
        assert_eq!(strategy.select(&[], None), None);
    }

    #[test]
    fn test_same_key_same_endpoint() {
        let ids: Vec<String> = (0..5).map(|i| format!("node-{}", i)).collect();
        let list = candidates(&ids);
        let strategy = ShardStrategy::new(ShardOptions::default());

        let ctx = ctx_with_key("user-42");
        let first = strategy.select(&list, Some(&ctx)).unwrap();
        for _ in 0..20 {
            assert_eq!(strategy.select(&list, Some(&ctx)), Some(first));
        }
    }

    #[test]
    fn test_keys_spread_across_endpoints() {
        let ids: Vec<String> = (0..4).map(|i| format!("node-{}", i)).collect();
        let list = candidates(&ids);
        let strategy = ShardStrategy::new(ShardOptions::default());

        let mut seen = [false; 4];
        for i in 0..200 {
            let ctx = ctx_with_key(&format!("key-{}", i));
            seen[strategy.select(&list, Some(&ctx)).unwrap()] = true;
        }
        assert_eq!(seen, [true, true, true, true]);
    }

    #[test]
    fn test_minimal_redistribution_on_set_change() {
        let ids5: Vec<String> = (0..5).map(|i| format!("node-{}", i)).collect();
        let strategy = ShardStrategy::new(ShardOptions::default());

        let keys: Vec<String> = (0..300).map(|i| format!("key-{}", i)).collect();
        let before: Vec<String> = keys
            .iter()
            .map(|k| {
                let list = candidates(&ids5);
                let ctx = ctx_with_key(k);
                ids5[strategy.select(&list, Some(&ctx)).unwrap()].clone()
            })
            .collect();

        // Drop the last endpoint and re-resolve every key.
        let ids4: Vec<String> = ids5[..4].to_vec();
        let mut moved = 0;
        for (k, old) in keys.iter().zip(&before) {
            let list = candidates(&ids4);
            let ctx = ctx_with_key(k);
            let now = ids4[strategy.select(&list, Some(&ctx)).unwrap()].clone();
            if old != &now {
                moved += 1;
                // Keys may only move off the removed endpoint.
                assert_eq!(old, "node-4");
            }
        }
        // Roughly a fifth of the keys lived on the removed endpoint.
        assert!(moved > 0 && moved < keys.len() / 2);
    }

    #[test]
    fn test_meta_shard_key() {
        let ids: Vec<String> = (0..3).map(|i| format!("node-{}", i)).collect();
        let list = candidates(&ids);
        let strategy = ShardStrategy::new(ShardOptions {
            shard_key: "#session.id".to_string(),
            vnodes: 10,
        });

        let ctx = Context::new("node-1", "users.get", json!({}))
            .with_meta(json!({"session": {"id": "abc"}}));
        let first = strategy.select(&list, Some(&ctx)).unwrap();
        assert_eq!(strategy.select(&list, Some(&ctx)), Some(first));
    }

    #[test]
    fn test_missing_key_falls_back_to_round_robin() {
        let ids: Vec<String> = (0..3).map(|i| format!("node-{}", i)).collect();
        let list = candidates(&ids);
        let strategy = ShardStrategy::new(ShardOptions::default());

        let ctx = Context::new("node-1", "users.get", json!({"other": 1}));
        let picks: Vec<usize> = (0..3)
            .map(|_| strategy.select(&list, Some(&ctx)).unwrap())
            .collect();
        assert_eq!(picks, vec![0, 1, 2]);
    }

    #[test]
    fn test_numeric_shard_key() {
        let ids: Vec<String> = (0..3).map(|i| format!("node-{}", i)).collect();
        let list = candidates(&ids);
        let strategy = ShardStrategy::new(ShardOptions::default());

        let ctx = Context::new("node-1", "users.get", json!({"shard": 42}));
        let first = strategy.select(&list, Some(&ctx)).unwrap();
        assert_eq!(strategy.select(&list, Some(&ctx)), Some(first));
    }
}
