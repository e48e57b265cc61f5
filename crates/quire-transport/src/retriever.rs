//! Blob retrieval with ordered mirror failover.
//!
//! One blob walks the mirror list in order, one attempt per mirror, each
//! bounded by the per-mirror timeout. Different blobs are fetched
//! concurrently. Worst-case latency for one blob is
//! `per_mirror_timeout * mirrors`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{self, AbortHandle, Aborted};
use serde::Deserialize;
use tracing::{debug, warn};

use quire_core::BlobHandle;

use crate::error::{FetchError, MirrorError, Result};

/// A storage mirror serving blobs by content-address handle.
#[async_trait]
pub trait Mirror: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &str;

    /// Fetch one blob. Any error moves the retriever to the next mirror.
    async fn get(&self, handle: &BlobHandle) -> std::result::Result<Bytes, MirrorError>;
}

/// Retriever settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub per_mirror_timeout: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            per_mirror_timeout: Duration::from_secs(10),
        }
    }
}

/// Fetches blobs from an ordered list of mirrors.
pub struct BlobRetriever {
    mirrors: Vec<Arc<dyn Mirror>>,
    config: RetrieverConfig,
}

impl BlobRetriever {
    pub fn new(mirrors: Vec<Arc<dyn Mirror>>, config: RetrieverConfig) -> Self {
        Self { mirrors, config }
    }

    pub fn mirror_count(&self) -> usize {
        self.mirrors.len()
    }

    /// Fetch one blob, trying mirrors in order.
    pub async fn fetch(&self, handle: &BlobHandle) -> Result<Bytes> {
        let timeout = self.config.per_mirror_timeout;

        for (attempt, mirror) in self.mirrors.iter().enumerate() {
            debug!(%handle, mirror = mirror.name(), attempt, "fetching blob");
            let outcome = tokio::time::timeout(timeout, mirror.get(handle))
                .await
                .unwrap_or(Err(MirrorError::Timeout));
            match outcome {
                Ok(bytes) => {
                    debug!(%handle, mirror = mirror.name(), len = bytes.len(), "blob fetched");
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!(%handle, mirror = mirror.name(), error = %e, "mirror failed");
                }
            }
        }

        Err(FetchError::NotFound {
            handle: handle.clone(),
            attempts: self.mirrors.len(),
        })
    }

    /// Fetch several blobs concurrently. Results follow input order; one
    /// blob's failure does not affect the others.
    pub async fn fetch_many(&self, handles: &[BlobHandle]) -> Vec<Result<Bytes>> {
        future::join_all(handles.iter().map(|handle| self.fetch(handle))).await
    }

    /// Fetch one blob with an abort handle.
    ///
    /// Aborting resolves the future to [`FetchError::Aborted`] at its next
    /// poll and drops any in-flight mirror request.
    pub fn fetch_abortable<'a>(
        &'a self,
        handle: &'a BlobHandle,
    ) -> (impl Future<Output = Result<Bytes>> + Send + 'a, AbortHandle) {
        let (fetch, abort) = future::abortable(self.fetch(handle));
        let fetch = async move {
            match fetch.await {
                Ok(result) => result,
                Err(Aborted) => Err(FetchError::Aborted),
            }
        };
        (fetch, abort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Serve(&'static [u8]),
        Fail(u16),
        Hang,
    }

    struct TestMirror {
        name: String,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl TestMirror {
        fn new(name: &str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Mirror for TestMirror {
        fn name(&self) -> &str {
            &self.name
        }

        async fn get(&self, _handle: &BlobHandle) -> std::result::Result<Bytes, MirrorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Serve(body) => Ok(Bytes::from_static(body)),
                Behaviour::Fail(status) => Err(MirrorError::Status(status)),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(MirrorError::Transport("unreachable".into()))
                }
            }
        }
    }

    fn retriever(mirrors: &[Arc<TestMirror>]) -> BlobRetriever {
        BlobRetriever::new(
            mirrors
                .iter()
                .map(|m| Arc::clone(m) as Arc<dyn Mirror>)
                .collect(),
            RetrieverConfig::default(),
        )
    }

    fn handle(s: &str) -> BlobHandle {
        BlobHandle::new(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_reaches_last_mirror() {
        let mirrors = [
            TestMirror::new("a", Behaviour::Fail(500)),
            TestMirror::new("b", Behaviour::Hang),
            TestMirror::new("c", Behaviour::Fail(404)),
            TestMirror::new("d", Behaviour::Serve(b"blob")),
        ];
        let bytes = retriever(&mirrors).fetch(&handle("h1")).await.unwrap();

        assert_eq!(&bytes[..], b"blob");
        for mirror in &mirrors {
            assert_eq!(mirror.calls(), 1, "mirror {}", mirror.name);
        }
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let mirrors = [
            TestMirror::new("a", Behaviour::Serve(b"first")),
            TestMirror::new("b", Behaviour::Serve(b"second")),
        ];
        let bytes = retriever(&mirrors).fetch(&handle("h1")).await.unwrap();

        assert_eq!(&bytes[..], b"first");
        assert_eq!(mirrors[1].calls(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_mirrors_is_not_found() {
        let mirrors = [
            TestMirror::new("a", Behaviour::Fail(503)),
            TestMirror::new("b", Behaviour::Fail(404)),
        ];
        let err = retriever(&mirrors).fetch(&handle("gone")).await.unwrap_err();

        assert_eq!(
            err,
            FetchError::NotFound {
                handle: handle("gone"),
                attempts: 2
            }
        );
    }

    #[tokio::test]
    async fn test_repeated_fetch_is_identical() {
        let mirrors = [TestMirror::new("a", Behaviour::Serve(b"same bytes"))];
        let retriever = retriever(&mirrors);

        let first = retriever.fetch(&handle("h")).await.unwrap();
        let second = retriever.fetch(&handle("h")).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fetch_many_keeps_order_and_isolates_failures() {
        struct ByHandle;

        #[async_trait]
        impl Mirror for ByHandle {
            fn name(&self) -> &str {
                "by-handle"
            }

            async fn get(&self, handle: &BlobHandle) -> std::result::Result<Bytes, MirrorError> {
                match handle.as_str() {
                    "missing" => Err(MirrorError::Status(404)),
                    other => Ok(Bytes::copy_from_slice(other.as_bytes())),
                }
            }
        }

        let retriever = BlobRetriever::new(vec![Arc::new(ByHandle)], RetrieverConfig::default());
        let results = retriever
            .fetch_many(&[handle("one"), handle("missing"), handle("three")])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(&results[0].as_ref().unwrap()[..], b"one");
        assert!(matches!(results[1], Err(FetchError::NotFound { .. })));
        assert_eq!(&results[2].as_ref().unwrap()[..], b"three");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_cancels_fetch() {
        let mirrors = [TestMirror::new("slow", Behaviour::Hang)];
        let retriever = retriever(&mirrors);
        let h = handle("h");

        let (fetch, abort) = retriever.fetch_abortable(&h);
        abort.abort();
        assert_eq!(fetch.await, Err(FetchError::Aborted));
    }

    #[tokio::test]
    async fn test_no_mirrors_is_not_found() {
        let retriever = BlobRetriever::new(Vec::new(), RetrieverConfig::default());
        assert!(matches!(
            retriever.fetch(&handle("h")).await,
            Err(FetchError::NotFound { attempts: 0, .. })
        ));
    }
}
