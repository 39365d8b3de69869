//! # Snake Coordinator Library
//!
//! The coordinator owns the authoritative state of every snake session. It
//! never computes a game step itself: it queues tasks on a durable task
//! channel and merges the next states that workers send back.
//!
//! ## Core Responsibilities
//!
//! ### Session Authority
//! Sessions live in the [`store`]. Every merged result bumps the session
//! version, and a result is merged only when it was computed from the
//! current version. Moves only change the heading, which results never
//! overwrite, so steering does not invalidate work in flight. Late or duplicated results come
//! back as `Stale` and leave the session untouched.
//!
//! ### Task Queueing
//! The [`channel`] is an at-least-once queue. Deliveries stay in flight
//! until the consumer acks them; a nack or a dropped connection puts them
//! back. A task that keeps failing is dead-lettered after a bounded number
//! of attempts. With a journal configured, queued tasks survive a restart.
//!
//! ### Player Input
//! [`ingress`] applies a direction change immediately and queues an
//! out-of-band advance task, throttled per session.
//!
//! ### Ticking
//! [`scheduler`] queues one advance task per active session each period.
//!
//! ## Module Organization
//!
//! - `config`: runtime settings and their validation
//! - `error`: the coordinator error type and its wire mapping
//! - `journal`: append-only task log used by the channel
//! - `registry`: last status reported by each worker
//! - `service`: dispatches requests to the components above
//! - `network`: TCP listener and per-connection request loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use coordinator::config::CoordinatorConfig;
//! use coordinator::network::Server;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(&CoordinatorConfig::default()).await?;
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//!     // Serves players and workers and runs the tick scheduler until
//!     // shutdown is signalled.
//!     server.run(shutdown_rx).await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod ingress;
pub mod journal;
pub mod network;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod sink;
pub mod store;
