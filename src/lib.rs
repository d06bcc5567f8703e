//! # kbsync
//!
//! Keeps per-user knowledge bases on a managed GenAI platform in step with
//! the documents each user keeps in object storage, and drives the
//! platform's indexing jobs to completion.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  CLI / HTTP  │──▶│  Reconciler  │──▶│  StateCache  │
//! │ kbsync serve │   │ find/create, │   │ (per call)   │
//! └──────┬───────┘   │ data source, │   └──────┬───────┘
//!        │           │ start/resume │          ▼
//!        │           └──────┬───────┘   ┌──────────────┐
//!        │                  └──────────▶│   Resource   │──▶ platform
//!        └──────▶ JobMonitor ──────────▶│   Gateway    │    REST API
//!                                       └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GENAI_API_TOKEN=...
//! kbsync init                                   # create the state database
//! kbsync reconcile --user u1 --kb-name kb-u1 \
//!     --path users/u1/ --bucket user-docs --wait
//! kbsync status <job-id>
//! kbsync serve                                  # start the HTTP layer
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Canonical resource and state types |
//! | [`error`] | Gateway, monitor, and engine error taxonomy |
//! | [`envelope`] | Response-envelope normalization |
//! | [`gateway`] | Resource gateway trait and HTTP implementation |
//! | [`cache`] | Request-scoped KB lookup cache |
//! | [`reconcile`] | Reconciliation engine |
//! | [`monitor`] | Indexing job polling |
//! | [`progress`] | Progress reporters |
//! | [`state_store`] | SQLite persistence of user snapshots |
//! | [`server`] | HTTP endpoint layer |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod config;
pub mod db;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod migrate;
pub mod models;
pub mod monitor;
pub mod progress;
pub mod reconcile;
pub mod server;
pub mod state_store;
