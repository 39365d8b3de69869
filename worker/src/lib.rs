//! # Snake Worker Library
//!
//! A worker runs a pool of consumers against the coordinator's task channel.
//! Each consumer pulls advance tasks, runs the game step from
//! `shared::engine`, submits the next state and settles the delivery. The
//! pool grows and shrinks with the coordinator's backlog.
//!
//! ## Module Organization
//!
//! ### Connection Module (`connection`)
//! Framed request/response link to the coordinator. Deliveries belong to the
//! link that fetched them; dropping the link returns them to the queue.
//!
//! ### Consumer Module (`consumer`)
//! The receive/process/acknowledge loop:
//! - malformed payloads are rejected without requeue and end up dead-lettered
//! - results for unknown sessions are acknowledged and dropped
//! - a result that is not answered within the task timeout drops the link
//! - lost links are re-established with exponential backoff
//!
//! ### Load Module (`load`)
//! Samples queue backlog and core count, and sends status reports. Sampling
//! failures fall back to a fixed size; reporting failures are only logged.
//!
//! ### Sizing Module (`sizing`)
//! The pure sizing policy mapping `(pending tasks, cores)` to a consumer
//! count and prefetch.
//!
//! ### Pool Module (`pool`)
//! Applies the policy periodically, spawning and retiring consumers.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use tokio::sync::watch;
//! use worker::config::WorkerConfig;
//! use worker::pool::WorkerPool;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = WorkerPool::new(WorkerConfig {
//!         coordinator: "127.0.0.1:8000".to_string(),
//!         ..WorkerConfig::default()
//!     })?;
//!
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     pool.run(shutdown_rx).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod load;
pub mod pool;
pub mod sizing;
