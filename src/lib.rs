//! Companion Store - offline-first data layer for a senior companion app
//!
//! Persists contacts, health records, community activities, privacy settings and crash
//! reports as JSON blobs in an embedded key-value store, and pushes changed blobs to a
//! remote backend whenever connectivity allows.
//!
//! # Features
//!
//! - Typed repositories over whole-blob storage with corrupt-data recovery
//! - Duplicate medication cleanup
//! - Offline change journal and retrying sync coordinator
//! - PII scrubbing and retention pruning for logs and crash reports
//! - Migration of legacy activity records

/// Record encoding and timestamp formats
pub mod codec;
/// Configuration management
pub mod config;
/// Duplicate medication cleanup
pub mod dedup;
/// Error types
pub mod error;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Legacy record migration
pub mod migration;
/// Data models and structures
pub mod models;
/// Repository pattern for data access
pub mod repository;
/// PII scrubbing and retention
pub mod sanitizer;
/// PIN and auth token storage
pub mod security;
/// Service wiring
pub mod service;
/// Key-value storage backends
pub mod storage;
/// Synchronization with the remote backend
pub mod sync;
/// Shared helpers
pub mod utils;
/// Input validation and sanitization
pub mod validation;

// Re-export key components for easier access
pub use config::AppConfig;
pub use error::{Result, StoreError, SyncError};
pub use service::CompanionServices;
pub use storage::{KeyValueStore, MemoryStore, Namespace, SledStore};
