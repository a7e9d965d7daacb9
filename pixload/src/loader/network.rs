use std::sync::Arc;

use pixload_core::{ByteSource, Request};
use pixload_http::{FetchOutcome, NetworkFetcher};
use tracing::debug;

use super::{Loader, Manager};
use crate::{WorkerPool, metrics};

/// Terminal stage: fetches the resource through a [`NetworkFetcher`].
///
/// Requests carrying cached metadata are conditional revalidations and run
/// on the dedicated revalidation pool, so a burst of expiring entries never
/// delays foreground fetches.
#[derive(Debug, Clone)]
pub struct NetworkLoader {
    fetcher: Arc<NetworkFetcher>,
    pool: WorkerPool,
    revalidation: WorkerPool,
}

impl NetworkLoader {
    /// Creates the stage.
    pub fn new(fetcher: Arc<NetworkFetcher>, pool: WorkerPool, revalidation: WorkerPool) -> Self {
        Self {
            fetcher,
            pool,
            revalidation,
        }
    }
}

impl Loader for NetworkLoader {
    fn name(&self) -> &'static str {
        "network"
    }

    fn load(&self, manager: Manager, request: Request) {
        let revalidating = request.metadata().is_some();
        let pool = if revalidating { &self.revalidation } else { &self.pool };
        let fetcher = self.fetcher.clone();
        let key = request.key().clone();

        manager.clone().spawn(pool, &key, async move {
            metrics::record_network_fetch(revalidating);
            let progress = |fraction: f32| manager.deliver_progress(fraction);
            let key = request.key();
            match fetcher.fetch(request.url(), request.metadata(), &progress).await {
                Ok(FetchOutcome::NotModified(metadata)) => {
                    debug!(%key, "not modified");
                    metrics::record_not_modified();
                    manager.deliver_not_modified(metadata);
                }
                Ok(FetchOutcome::Fetched { body, metadata }) => {
                    debug!(%key, bytes = body.len(), "loaded from network");
                    manager.deliver_stream(ByteSource::Memory(body), metadata);
                }
                Err(error) => {
                    debug!(%key, %error, "network fetch failed");
                    manager.deliver_error(error.into());
                }
            }
        });
    }
}
