use std::sync::Arc;

use pixload_core::{ImageCodec, Metadata, Request, SmolStr, Transformation};
use tracing::debug;

use super::{Listener, Loader, LoaderEvent, Manager};
use crate::LoadError;

/// Applies the request's transformation to whatever the rest of the chain
/// produces.
///
/// The transformation is stripped before forwarding, so the stages below
/// fetch and cache the untransformed resource and every transformation of
/// one source shares those entries.
#[derive(Clone)]
pub struct TransformingLoader {
    codec: Arc<dyn ImageCodec>,
}

impl std::fmt::Debug for TransformingLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformingLoader").finish_non_exhaustive()
    }
}

impl TransformingLoader {
    /// Creates the stage. `codec` decodes byte streams that the
    /// transformation does not handle itself.
    pub fn new(codec: Arc<dyn ImageCodec>) -> Self {
        Self { codec }
    }
}

impl Loader for TransformingLoader {
    fn name(&self) -> &'static str {
        "transform"
    }

    fn load(&self, manager: Manager, request: Request) {
        let Some(transformation) = request.transformation().cloned() else {
            manager.next(request);
            return;
        };
        let listener = Arc::new(Transformer {
            transformation,
            codec: self.codec.clone(),
            manager: manager.clone(),
        });
        manager.next_with(request.without_transformation(), listener);
    }
}

struct Transformer {
    transformation: Arc<dyn Transformation>,
    codec: Arc<dyn ImageCodec>,
    manager: Manager,
}

impl Transformer {
    fn adjust(&self, metadata: Metadata) -> Metadata {
        match self.transformation.output_format() {
            Some(format) => metadata.with_content_type(format.content_type()),
            None => metadata,
        }
    }

    fn empty(&self) -> LoadError {
        LoadError::EmptyTransform(SmolStr::new(self.transformation.identifier()))
    }
}

impl Listener for Transformer {
    fn on_event(&self, event: LoaderEvent) {
        let identifier = self.transformation.identifier();
        match event {
            LoaderEvent::Stream { source, metadata } => {
                match self.transformation.transform_source(&source, self.codec.as_ref()) {
                    Ok(Some(image)) => {
                        debug!(transformation = identifier, "transformed stream");
                        self.manager.deliver_image(image, self.adjust(metadata));
                    }
                    Ok(None) => self.manager.deliver_error(self.empty()),
                    Err(error) => self.manager.deliver_error(error.into()),
                }
            }
            LoaderEvent::Image { image, metadata } => {
                match self.transformation.transform_image(&image) {
                    Some(image) => {
                        debug!(transformation = identifier, "transformed image");
                        self.manager.deliver_image(image, self.adjust(metadata));
                    }
                    None => self.manager.deliver_error(self.empty()),
                }
            }
            LoaderEvent::NotModified(metadata) => {
                self.manager.deliver_not_modified(self.adjust(metadata))
            }
            other => self.manager.deliver(other),
        }
    }
}
