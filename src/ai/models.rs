// src/ai/models.rs

use serde::{Deserialize, Serialize};

/// POST /ai/chat body
#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
}
