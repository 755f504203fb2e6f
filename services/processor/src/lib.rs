//! Event Processor
//!
//! Ingestion and query service for dashcam capture bundles. A bundle pairs
//! video files, optional thumbnails and JSON telemetry by position; each item
//! becomes one source record with its accelerometer, location and risk
//! samples. Operators then tag intervals of a source's video as events.
//!
//! ## Features
//!
//! - **Timestamp Normalization**: telemetry timestamps in any of a fixed list
//!   of layouts are rewritten to one canonical RFC 3339 form before decoding
//! - **Fail-fast Uploads**: group counts are checked before any write; items
//!   are then stored one at a time and the first failure stops the bundle
//! - **Composable Event Search**: tag, risk and speed criteria, with each
//!   joined table appearing once
//! - **Path-safe Media Serving**: stored keys are resolved and confined to
//!   their storage root before a file is opened
//!
//! ## Architecture
//!
//! ```text
//!  multipart upload          Local disk               PostgreSQL
//! ┌──────────────┐         ┌──────────────┐         ┌──────────────┐
//! │ videos       │────────▶│ video root   │         │ sources      │
//! │ images       │────────▶│ image root   │         │ samples      │
//! │ json         │──┐      └──────────────┘         │ events       │
//! └──────────────┘  │             ▲                 └──────────────┘
//!                   ▼             │                        ▲
//!            ┌──────────────┐     │                        │
//!            │ Normalizer   │     │                        │
//!            └──────────────┘     │                        │
//!                   │             │                        │
//!                   ▼             │                        │
//!            ┌──────────────┐─────┘                        │
//!            │ Upload       │──────────────────────────────┘
//!            │ Coordinator  │
//!            └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod media;
pub mod metadata_store;
pub mod models;
pub mod normalize;
pub mod query;

pub use error::{Error, Result};
