//! 检索层：协作方契约与预检索触发器

pub mod traits;
pub mod trigger;

pub use traits::{
    GraphResult, GraphSearch, NoopRetrieval, PdfReader, RetrievalHit, SchemaSource, VaultSchema,
    VectorSearch, WebSearch,
};
pub use trigger::RetrievalTrigger;
