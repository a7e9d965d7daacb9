//! Chain composition.

use std::sync::Arc;

use pixload_core::Request;

use crate::loader::{
    Chain, DiskLoader, Listener, Loader, LoaderWork, Manager, MemoryLoader, NetworkLoader,
    TransformingLoader,
};

/// Holds the two chain shapes and picks one per request.
#[derive(Debug)]
pub(crate) struct LoaderManager {
    plain: Chain,
    transformed: Chain,
}

impl LoaderManager {
    pub(crate) fn new(
        disk: Option<DiskLoader>,
        memory: Option<MemoryLoader>,
        transform: TransformingLoader,
        network: NetworkLoader,
    ) -> Self {
        let disk: Option<Arc<dyn Loader>> = disk.map(|disk| Arc::new(disk) as Arc<dyn Loader>);
        let memory: Option<Arc<dyn Loader>> =
            memory.map(|memory| Arc::new(memory) as Arc<dyn Loader>);
        let network: Arc<dyn Loader> = Arc::new(network);

        let mut plain = Vec::with_capacity(2);
        plain.extend(disk.clone());
        plain.push(network.clone());

        let mut transformed = Vec::with_capacity(5);
        transformed.extend(disk.clone());
        transformed.push(Arc::new(transform) as Arc<dyn Loader>);
        transformed.extend(memory);
        transformed.extend(disk);
        transformed.push(network);

        Self {
            plain: plain.into(),
            transformed: transformed.into(),
        }
    }

    pub(crate) fn chain_for(&self, request: &Request) -> &Chain {
        if request.transformation().is_some() {
            &self.transformed
        } else {
            &self.plain
        }
    }

    /// Runs `request` through its chain, delivering to `listener`.
    pub(crate) fn start(
        &self,
        work: Arc<LoaderWork>,
        request: Request,
        listener: Arc<dyn Listener>,
    ) {
        Manager::new(work, self.chain_for(&request).clone(), listener).start(request);
    }

    #[cfg(test)]
    pub(crate) fn stage_names(&self, request: &Request) -> Vec<&'static str> {
        self.chain_for(request).iter().map(|stage| stage.name()).collect()
    }
}
