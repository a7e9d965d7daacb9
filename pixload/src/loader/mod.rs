//! Chain-of-responsibility loader pipeline.
//!
//! A request travels down an immutable, ordered list of [`Loader`] stages.
//! Each stage either answers it through its [`Manager`] or forwards it to the
//! next stage, optionally with a rewritten request and a wrapping
//! [`Listener`] that observes the answer on its way back up.
//!
//! Two chain shapes exist:
//!
//! - plain requests: `[disk?, network]`
//! - transformed requests: `[disk?, transform, memory?, disk?, network]`
//!
//! In the transformed chain the first disk stage stores the transformed
//! output under the transformed key, while the stages after the transform
//! see the untransformed request and share entries with plain loads.

mod disk;
mod memory;
mod network;
mod transform;
mod work;

use std::fmt::Debug;
use std::sync::Arc;

use pixload_core::{ByteSource, Image, Metadata, Request};

use crate::LoadError;

pub use disk::DiskLoader;
pub use memory::MemoryLoader;
pub use network::NetworkLoader;
pub use transform::TransformingLoader;
pub use work::{LoaderWork, Manager};

/// An ordered list of stages.
pub type Chain = Arc<[Arc<dyn Loader>]>;

/// Result or progress travelling up the chain.
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    /// Encoded bytes, still to be decoded.
    Stream {
        /// The encoded data.
        source: ByteSource,
        /// Its metadata.
        metadata: Metadata,
    },
    /// An already decoded image.
    Image {
        /// The decoded image.
        image: Image,
        /// Its metadata.
        metadata: Metadata,
    },
    /// A conditional request confirmed the cached copy. Carries the
    /// refreshed metadata.
    NotModified(Metadata),
    /// The chain failed. No further events follow.
    Error(LoadError),
    /// Fraction of the transfer completed, from 0.0 to 1.0.
    Progress(f32),
}

/// Receives events from the stage below.
pub trait Listener: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: LoaderEvent);
}

/// One stage of a chain.
///
/// `load` must not block: stages that perform I/O spawn it on a
/// [`WorkerPool`](crate::WorkerPool) through [`Manager::spawn`].
pub trait Loader: Send + Sync + Debug {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Starts handling `request`.
    fn load(&self, manager: Manager, request: Request);
}
