//! Star/endorsement verification with a time-boxed cache.
//!
//! The full endorser list is paged in at most once per TTL; lookups and
//! refreshes share one lock so readers never observe a half-built set.

use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::{sync::Mutex, time::Instant};
use tracing::debug;

use crate::ports::EndorsementPort;

const CACHE_TTL: Duration = Duration::from_secs(300);
const PAGE_SIZE: u32 = 100;

#[derive(Default)]
struct CacheState {
    endorsers: HashSet<String>,
    fetched_at: Option<Instant>,
}

pub struct StarVerifier {
    port: Arc<dyn EndorsementPort>,
    ttl: Duration,
    cache: Mutex<CacheState>,
}

impl StarVerifier {
    pub fn new(port: Arc<dyn EndorsementPort>) -> Self {
        Self::with_ttl(port, CACHE_TTL)
    }

    pub fn with_ttl(port: Arc<dyn EndorsementPort>, ttl: Duration) -> Self {
        Self {
            port,
            ttl,
            cache: Mutex::new(CacheState::default()),
        }
    }

    /// Whether `identity` appears in the endorser list. Case-insensitive,
    /// tolerates a leading `@`.
    pub async fn has_endorsed(&self, identity: &str) -> bool {
        let needle = normalize(identity);
        if needle.is_empty() {
            return false;
        }
        let mut cache = self.cache.lock().await;
        self.refresh_if_stale(&mut cache).await;
        cache.endorsers.contains(&needle)
    }

    /// Size of the endorser set, refreshing first if the cache is stale.
    pub async fn endorser_count(&self) -> usize {
        let mut cache = self.cache.lock().await;
        self.refresh_if_stale(&mut cache).await;
        cache.endorsers.len()
    }

    async fn refresh_if_stale(&self, cache: &mut CacheState) {
        if let Some(at) = cache.fetched_at {
            if at.elapsed() < self.ttl && !cache.endorsers.is_empty() {
                return;
            }
        }

        // Collect into a local set first; the cache is only replaced once
        // pagination is over, so a partial walk never leaks to readers.
        // An error mid-walk keeps what was fetched so far.
        let mut collected = HashSet::new();
        let mut page = 1u32;
        loop {
            match self.port.endorsers_page(page, PAGE_SIZE).await {
                Ok(batch) => {
                    let len = batch.len();
                    collected.extend(batch.into_iter().map(|h| normalize(&h)));
                    if len < PAGE_SIZE as usize {
                        break;
                    }
                    page += 1;
                }
                Err(e) => {
                    debug!("endorser listing stopped at page {page}: {e}");
                    break;
                }
            }
        }

        cache.endorsers = collected;
        cache.fetched_at = Some(Instant::now());
    }
}

fn normalize(identity: &str) -> String {
    identity.trim().trim_start_matches('@').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeListing {
        pages: Vec<Result<Vec<String>>>,
        calls: AtomicUsize,
    }

    impl FakeListing {
        fn new(pages: Vec<Result<Vec<String>>>) -> Self {
            Self {
                pages,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EndorsementPort for FakeListing {
        async fn endorsers_page(&self, page: u32, _per_page: u32) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.pages.get((page - 1) as usize) {
                Some(Ok(v)) => Ok(v.clone()),
                Some(Err(_)) => Err(crate::Error::External("listing failed".into())),
                None => Ok(Vec::new()),
            }
        }
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive_and_strips_at() {
        let port = Arc::new(FakeListing::new(vec![Ok(vec!["OctoCat".to_string()])]));
        let verifier = StarVerifier::new(port);

        assert!(verifier.has_endorsed("octocat").await);
        assert!(verifier.has_endorsed("@OCTOCAT").await);
        assert!(!verifier.has_endorsed("someone-else").await);
        assert!(!verifier.has_endorsed("").await);
    }

    #[tokio::test]
    async fn cache_avoids_refetch_within_ttl() {
        let port = Arc::new(FakeListing::new(vec![Ok(vec!["a".to_string()])]));
        let verifier = StarVerifier::new(port.clone());

        assert!(verifier.has_endorsed("a").await);
        assert!(verifier.has_endorsed("a").await);
        assert_eq!(verifier.endorser_count().await, 1);
        // Short first page ends pagination, so one call total.
        assert_eq!(port.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn partial_results_survive_a_failing_page() {
        let full_page: Vec<String> = (0..100).map(|i| format!("user{i}")).collect();
        let port = Arc::new(FakeListing::new(vec![
            Ok(full_page),
            Err(crate::Error::External("boom".into())),
        ]));
        let verifier = StarVerifier::new(port);

        assert!(verifier.has_endorsed("user42").await);
        assert_eq!(verifier.endorser_count().await, 100);
    }
}
