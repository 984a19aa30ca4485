pub mod citations;
pub mod cost;
pub mod enhancement;
pub mod generation;
pub mod pipeline;
pub mod retriever;
pub mod scoring;

pub use generation::{AnswerGenerator, GenerationRequest, OpenAiGenerator};
pub use pipeline::{QueryOrchestrator, StageKind, StageTimings};
pub use retriever::Retriever;
pub use scoring::ConfidenceCalculator;
