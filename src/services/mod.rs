// src/services/mod.rs
//
// Shared services module containing collaborator clients and the rate governor
// used across different domain modules

pub mod gemini;
pub mod google;
pub mod monitoring;
pub mod rate_limit;

// Re-export commonly used types for convenience
pub use gemini::GeminiService;
pub use google::GoogleService;
pub use rate_limit::RateGovernor;
