use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

fn default_top_k() -> usize {
    5
}

fn default_temperature() -> f32 {
    0.7
}

fn default_include_sources() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub filter: Option<HashMap<String, String>>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_include_sources")]
    pub include_sources: bool,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            conversation_id: None,
            top_k: default_top_k(),
            filter: None,
            temperature: default_temperature(),
            stream: false,
            include_sources: default_include_sources(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.question.trim().is_empty() {
            return Err(AppError::Validation(
                "question must not be empty".to_string(),
            ));
        }
        if self.top_k == 0 || self.top_k > 20 {
            return Err(AppError::Validation(
                "top_k must be between 1 and 20".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(AppError::Validation(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub number: usize,
    pub document_id: String,
    pub document_name: String,
    pub chunk_id: String,
    #[serde(default)]
    pub page: Option<u32>,
    pub content: String,
    #[serde(default)]
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub related_questions: Vec<String>,
    pub confidence: f32,
    pub chunks_retrieved: usize,
    pub chunks_used: usize,
    pub elapsed_ms: u64,
    pub estimated_cost_usd: f64,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}
