//! Memoizing wrapper for async functions

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};

use super::entry::SetOptions;
use super::manager::{CacheValue, SmartCache};

/// Wrap `f` so calls are served from `cache`, keyed by `key_fn(&arg)`
///
/// Misses call `f` once per key even under concurrency and store the result
/// with `ttl`. Errors from `f` are returned as-is and never cached.
///
/// ```ignore
/// let fetch_user = with_cache(cache.clone(), load_user, |id: &u64| format!("user:{}", id), None);
/// let user = fetch_user(42).await?;
/// ```
pub fn with_cache<A, V, E, F, Fut, K>(
    cache: SmartCache<V>,
    f: F,
    key_fn: K,
    ttl: Option<Duration>,
) -> impl Fn(A) -> BoxFuture<'static, Result<V, E>> + Send + Sync
where
    A: Send + 'static,
    V: CacheValue,
    E: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    K: Fn(&A) -> String + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let options = match ttl {
        Some(ttl) => SetOptions::new().ttl(ttl),
        None => SetOptions::new(),
    };

    move |arg: A| {
        let cache = cache.clone();
        let f = f.clone();
        let options = options.clone();
        let key = key_fn(&arg);

        async move { cache.get_or_load_with(&key, options, move || f(arg)).await }.boxed()
    }
}
