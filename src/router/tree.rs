//! Prefix-keyed route index.
//!
//! Every method gets a map from a three byte literal prefix to the routes
//! whose first literal segment starts with it. Routes without a
//! deterministic prefix live under the empty key and are merged into every
//! other bucket, so bucket selection can never hide a parameterized route.

use crate::http::Method;
use crate::router::route::Route;
use std::collections::HashMap;
use std::sync::Arc;

type Buckets = HashMap<String, Vec<Arc<Route>>>;

#[derive(Debug)]
pub struct TreeIndex {
    stacks: Vec<Buckets>,
}

impl Default for TreeIndex {
    fn default() -> Self {
        Self {
            stacks: (0..Method::COUNT).map(|_| Buckets::new()).collect(),
        }
    }
}

impl TreeIndex {
    /// Builds the index from per-method stacks in registration order.
    pub(crate) fn build(stack: &[Vec<Route>]) -> Self {
        let mut index = TreeIndex::default();
        for (method, routes) in stack.iter().enumerate().take(Method::COUNT) {
            let mut buckets = Buckets::new();
            for route in routes {
                buckets
                    .entry(route.tree_key().to_owned())
                    .or_default()
                    .push(Arc::new(route.clone()));
            }

            let global = buckets.get("").cloned().unwrap_or_default();
            for (key, bucket) in buckets.iter_mut() {
                if !key.is_empty() {
                    bucket.extend(global.iter().cloned());
                }
                bucket.sort_by_key(|route| route.position);
                bucket.dedup_by_key(|route| route.position);
            }
            index.stacks[method] = buckets;
        }
        index
    }

    /// Routes to scan for `key`, falling back to the empty-key bucket.
    pub fn bucket(&self, method: Method, key: &str) -> &[Arc<Route>] {
        let Some(buckets) = self.stacks.get(method.index()) else {
            return &[];
        };
        buckets
            .get(key)
            .or_else(|| buckets.get(""))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn keys(&self, method: Method) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .stacks
            .get(method.index())
            .map(|buckets| buckets.keys().map(String::as_str).collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.iter().all(HashMap::is_empty)
    }
}
