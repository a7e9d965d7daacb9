use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use pixload_core::ImageCodec;
use pixload_disk::DiskCache;
use pixload_http::{Connector, MaxAgeOverride, NetworkFetcher, NetworkFetcherBuilder};
use pixload_memory::MemoryCache;
use tracing::{debug, warn};

use crate::config::{DEFAULT_MEMORY_SIZE, LoaderConfig};
use crate::dispatch::{CallbackExecutor, Dispatcher, ThreadExecutor};
use crate::image_loader::{ImageLoader, Shared};
use crate::loader::{DiskLoader, MemoryLoader, NetworkLoader, TransformingLoader};
use crate::manager::LoaderManager;
use crate::pending::PendingRequests;
use crate::pool::{DEFAULT_NETWORK_THREADS, Pools};
use crate::BuildError;

/// Builder for [`ImageLoader`].
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use pixload::ImageLoader;
/// # use pixload_core::{CodecError, Image, ImageCodec, ImageFormat};
/// # struct MyCodec;
/// # impl ImageCodec for MyCodec {
/// #     fn decode(&self, _: &[u8]) -> Result<Image, CodecError> { unimplemented!() }
/// #     fn encode(&self, _: &Image, _: ImageFormat, _: u8) -> Result<Vec<u8>, CodecError> {
/// #         unimplemented!()
/// #     }
/// # }
///
/// let loader = ImageLoader::builder()
///     .memory_cache(32 * 1024 * 1024)
///     .disk_cache("/var/cache/images", 128 * 1024 * 1024)
///     .network_threads(2)
///     .connect_timeout(Duration::from_secs(5))
///     .codec(std::sync::Arc::new(MyCodec))
///     .build()?;
/// # Ok::<(), pixload::BuildError>(())
/// ```
pub struct ImageLoaderBuilder {
    memory_size: usize,
    disk: Option<(PathBuf, u64)>,
    network_threads: usize,
    fetcher: NetworkFetcherBuilder,
    codec: Option<Arc<dyn ImageCodec>>,
    executor: Option<Arc<dyn CallbackExecutor>>,
}

impl Default for ImageLoaderBuilder {
    fn default() -> Self {
        Self {
            memory_size: byte_count(DEFAULT_MEMORY_SIZE.as_u64()),
            disk: None,
            network_threads: DEFAULT_NETWORK_THREADS,
            fetcher: NetworkFetcher::builder(),
            codec: None,
            executor: None,
        }
    }
}

impl ImageLoaderBuilder {
    /// Sets the decoded size held by the memory cache. Zero disables it.
    pub fn memory_cache(mut self, max_bytes: usize) -> Self {
        self.memory_size = max_bytes;
        self
    }

    /// Enables the disk cache in `dir`.
    pub fn disk_cache(mut self, dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        self.disk = Some((dir.into(), max_bytes));
        self
    }

    /// Sets the number of workers for foreground fetches.
    pub fn network_threads(mut self, threads: usize) -> Self {
        self.network_threads = threads;
        self
    }

    /// Sets the connect timeout of the HTTP connector.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.fetcher = self.fetcher.connect_timeout(timeout);
        self
    }

    /// Sets the read timeout of the HTTP connector.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.fetcher = self.fetcher.read_timeout(timeout);
        self
    }

    /// Sets the max-age for responses without freshness headers.
    pub fn default_max_age(mut self, max_age: Duration) -> Self {
        self.fetcher = self.fetcher.default_max_age(max_age);
        self
    }

    /// Overrides response freshness.
    pub fn forced_max_age(mut self, forced: MaxAgeOverride) -> Self {
        self.fetcher = self.fetcher.forced_max_age(forced);
        self
    }

    /// Serves URLs with `scheme` through `connector`.
    pub fn scheme_handler(
        mut self,
        scheme: impl Into<String>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        self.fetcher = self.fetcher.scheme_handler(scheme, connector);
        self
    }

    /// Sets the codec used to decode fetched bytes and encode transformed
    /// images for the disk cache.
    pub fn codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Sets where listener callbacks run. Defaults to a [`ThreadExecutor`].
    pub fn callback_executor(mut self, executor: Arc<dyn CallbackExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Applies every setting of `config`.
    pub fn config(self, config: LoaderConfig) -> Self {
        let mut builder = self
            .memory_cache(byte_count(config.memory.max_size.as_u64()))
            .network_threads(config.network.threads)
            .connect_timeout(config.network.connect_timeout)
            .read_timeout(config.network.read_timeout)
            .default_max_age(config.network.default_max_age)
            .forced_max_age(config.network.forced_max_age);
        if let Some(disk) = config.disk {
            builder = builder.disk_cache(disk.path, disk.max_size.as_u64());
        }
        builder
    }

    /// Starts the worker pools and builds the loader.
    ///
    /// A disk cache that cannot be opened is logged and skipped: the loader
    /// then runs without one.
    pub fn build(self) -> Result<ImageLoader, BuildError> {
        if self.network_threads == 0 {
            return Err(BuildError::InvalidConfig(
                "network_threads must be at least 1".to_owned(),
            ));
        }
        let codec = match self.codec {
            Some(codec) => codec,
            None => default_codec()?,
        };
        let fetcher = Arc::new(self.fetcher.build()?);
        let pools = Pools::new(self.network_threads)
            .map_err(|(name, source)| BuildError::Thread { name, source })?;
        let executor = match self.executor {
            Some(executor) => executor,
            None => Arc::new(ThreadExecutor::new().map_err(|source| BuildError::Thread {
                name: "callback thread",
                source,
            })?),
        };

        let memory = Arc::new(MemoryCache::builder(self.memory_size).label("images").build());
        let disk = self.disk.and_then(|(path, max_size)| {
            match DiskCache::builder().path(&path).max_size(max_size).open() {
                Ok(disk) => {
                    debug!(path = %path.display(), entries = disk.len(), "opened disk cache");
                    Some(disk)
                }
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        %error,
                        "disk cache unavailable, continuing without it"
                    );
                    None
                }
            }
        });

        let dispatcher = Dispatcher::new(executor);
        let pending = Arc::new(PendingRequests::new(
            memory.clone(),
            codec.clone(),
            dispatcher.clone(),
        ));
        let chains = LoaderManager::new(
            disk.clone().map(|disk| {
                DiskLoader::new(disk, pools.disk().clone(), codec.clone(), memory.clone())
            }),
            (self.memory_size > 0).then(|| MemoryLoader::new(memory.clone())),
            TransformingLoader::new(codec),
            NetworkLoader::new(fetcher, pools.network().clone(), pools.revalidation().clone()),
        );

        Ok(ImageLoader::from_shared(Shared {
            pending,
            chains,
            dispatcher,
            memory,
            disk,
            next_tag: AtomicU64::new(1),
            pools,
        }))
    }
}

fn byte_count(bytes: u64) -> usize {
    usize::try_from(bytes).unwrap_or(usize::MAX)
}

#[cfg(feature = "image")]
fn default_codec() -> Result<Arc<dyn ImageCodec>, BuildError> {
    Ok(Arc::new(pixload_core::RasterCodec))
}

#[cfg(not(feature = "image"))]
fn default_codec() -> Result<Arc<dyn ImageCodec>, BuildError> {
    Err(BuildError::InvalidConfig(
        "no image codec configured: call `codec` or enable the `image` feature".to_owned(),
    ))
}
