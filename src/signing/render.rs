//! Turning a document reference into the bytes that get signed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::commons::api::{DocumentId, DocumentType};


//------------ DocumentRenderer ----------------------------------------------

/// Produces the content of a document, e.g. its printable form.
///
/// Rendering may block on I/O, it is called from a blocking thread.
pub trait DocumentRenderer: Send + Sync {
    fn render(
        &self,
        document_id: &DocumentId,
        document_type: &DocumentType,
    ) -> Result<Bytes, RenderError>;
}

impl<F> DocumentRenderer for F
where
    F: Fn(&DocumentId, &DocumentType) -> Result<Bytes, RenderError> + Send + Sync,
{
    fn render(
        &self,
        document_id: &DocumentId,
        document_type: &DocumentType,
    ) -> Result<Bytes, RenderError> {
        self(document_id, document_type)
    }
}


//------------ RendererRegistry ----------------------------------------------

/// Picks the renderer for a document type.
///
/// Types without a registered renderer use the fallback, if one is set.
#[derive(Clone, Default)]
pub struct RendererRegistry {
    renderers: HashMap<DocumentType, Arc<dyn DocumentRenderer>>,
    fallback: Option<Arc<dyn DocumentRenderer>>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_renderer(
        mut self,
        document_type: DocumentType,
        renderer: impl DocumentRenderer + 'static,
    ) -> Self {
        self.renderers.insert(document_type, Arc::new(renderer));
        self
    }

    pub fn with_fallback(mut self, renderer: impl DocumentRenderer + 'static) -> Self {
        self.fallback = Some(Arc::new(renderer));
        self
    }

    pub fn render(
        &self,
        document_id: &DocumentId,
        document_type: &DocumentType,
    ) -> Result<Bytes, RenderError> {
        let renderer = self
            .renderers
            .get(document_type)
            .or(self.fallback.as_ref())
            .ok_or_else(|| RenderError::NoRenderer(document_type.clone()))?;
        renderer.render(document_id, document_type)
    }
}

impl fmt::Debug for RendererRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RendererRegistry")
            .field("types", &self.renderers.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}


//------------ RenderError ---------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RenderError {
    /// The document does not exist.
    NotFound(DocumentId),
    NoRenderer(DocumentType),
    Failed(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RenderError::NotFound(id) => write!(f, "document '{}' not found", id),
            RenderError::NoRenderer(ty) => {
                write!(f, "no renderer for document type '{}'", ty)
            }
            RenderError::Failed(msg) => msg.fmt(f),
        }
    }
}

impl std::error::Error for RenderError {}


//============ Tests =========================================================
