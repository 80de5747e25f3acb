pub mod catalog;
pub mod db;
pub mod error;
pub mod export;
pub mod gemini;
pub mod grocery;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod service;
pub mod session;
