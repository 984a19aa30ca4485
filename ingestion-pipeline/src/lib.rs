pub mod chunker;
pub mod indexer;
pub mod loader;

pub use chunker::Chunker;
pub use indexer::Indexer;
pub use loader::{LoadedUnit, SUPPORTED_EXTENSIONS};
