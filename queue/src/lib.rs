//! # Purchase Queue
//!
//! Admission control for ticket checkout. When demand for an event exceeds
//! its configured concurrency limit, buyers wait in a FIFO line and are
//! admitted into a time-boxed checkout slot as capacity frees up.
//!
//! # Architecture
//!
//! ```text
//!   HTTP (axum)                        background
//! ┌──────────────┐                  ┌──────────────┐
//! │ api::queue   │                  │ QueueSweeper │
//! │ api::stream ─┼──► StatsPublisher│ (interval)   │
//! │ api::worker ─┼──────────────────┤              │
//! │ api::config  │                  └──────┬───────┘
//! └──────┬───────┘                         │
//!        ▼                                 ▼
//! ┌─────────────────────────────────────────────┐
//! │ QueueManager: decisions + audit recording   │
//! └──────┬──────────────────────────────┬───────┘
//!        ▼                              ▼
//! ┌──────────────────────┐     ┌─────────────────┐
//! │ AdmissionController  │     │ AuditStore      │
//! │   AdmissionStore     │     │ (PostgreSQL)    │
//! │   ConfigRepository   │     └─────────────────┘
//! │   (Redis)            │
//! └──────────────────────┘
//! ```
//!
//! The fast store decides; the audit store only reports. An outage of the
//! fast store fails requests closed (HTTP 503), an outage of the audit store
//! is logged and otherwise ignored.
//!
//! # Example
//!
//! ```ignore
//! let controller = AdmissionController::new(store, configs.clone(), Arc::new(SystemClock));
//! let manager = Arc::new(QueueManager::new(controller, configs, audit));
//! let app = build_router(AppState::new(manager));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod controller;
pub mod manager;
pub mod metrics;
pub mod server;
pub mod stats;
pub mod sweeper;

pub use config::Config;
pub use controller::{AdmissionController, Decision};
pub use manager::{Audited, QueueManager};
pub use server::{AppState, build_router};
pub use stats::{StatsPublisher, Subscription};
pub use sweeper::{QueueSweeper, SweepReport, SweepResult};
