#![deny(missing_docs)]

//! Core library for the multimodal retrieval engine.

/// Answer composition, prompts, and generation clients.
pub mod answer;
/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Fragment extraction from text, images, and PDFs.
pub mod extraction;
/// Partitioned in-memory vector index and snapshots.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion and query metrics helpers.
pub mod metrics;
/// Documents, fragments, records, and answers.
pub mod model;
/// Ingestion jobs and the query path.
pub mod pipeline;
/// Intent classification and partition routing.
pub mod router;
