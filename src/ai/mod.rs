// src/ai/mod.rs

pub mod handlers;
pub mod models;
pub mod routes;


pub use routes::ai_routes;
