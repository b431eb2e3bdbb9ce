//! saneitizer-core: Core library for saneitizer
//!
//! Finds and repairs drift between an authoritative page store and the
//! search indexes built from it, across one or more search clusters.
//!
//! # Architecture
//!
//! ```text
//! PageStore ─┐
//!            ├─► Checker (per cluster) ─► RecordingRemediator (per cluster)
//! IndexReader┘                                   │
//!                                                ▼
//!                                  ClusterCoordinator::send_batch
//!                                   │                      │
//!                      all clusters agree          clusters diverge
//!                                   ▼                      ▼
//!                      broadcast remediator      per-cluster remediators
//!                                   └──────► JobQueue ◄────┘
//! ```
//!
//! # Modules
//!
//! - `model`: pages, titles, index records, drift kinds
//! - `index_layout`: index suffixes and document ids
//! - `assignment`: which clusters exist and which are writable per update group
//! - `remediator`: the remediation capability and its decorators
//! - `coordinator`: cross-cluster batching of recorded fixes
//! - `checker`: drift classification against one cluster
//! - `scan`: batch run driver with pressure and time limits
//! - `snapshot`: JSON file backend for the store and indexes
//! - `metrics`: labeled counters
//! - `config`: Configuration management
//! - `logging`: tracing subscriber setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod assignment;
pub mod checker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod index_layout;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod remediator;
pub mod scan;
pub mod snapshot;

pub use error::{Error, Result};
