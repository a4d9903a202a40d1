//! # Distress Bridge
//!
//! The asynchronous I/O bridge of a scripted network load and stress engine.
//!
//! A scenario script runs sequentially on one logical thread, its
//! [`ExecutionContext`](core::ExecutionContext). Every network operation the
//! script performs (`read`, `write`, `close` on a [`Connection`](core::Connection))
//! runs as a job on a bounded, shared [`AsyncPool`](core::AsyncPool) and hands
//! back a [`DeferredResult`](core::DeferredResult). Results flow back to the
//! context as resumptions that its run-loop applies one at a time, so script
//! state is never touched concurrently.
//!
//! ## Key Features
//!
//! - **Bounded worker pool**: fixed OS threads, bounded job queue, panics isolated per job
//! - **Fair admission**: [`ResourceGuard`](core::ResourceGuard) is a FIFO counting
//!   semaphore that caps live connections per class
//! - **Ordered reads**: one network read may decode several frames; every data
//!   frame is delivered in arrival order
//! - **Guaranteed release**: guard slots are returned on close, on error, and
//!   when a context terminates with connections still open
//! - **Fire-and-forget telemetry**: one sample per read and write, dropped
//!   rather than ever blocking an operation
//!
//! ## Example
//!
//! ```rust,ignore
//! use distress_bridge::builders::RuntimeBuilder;
//! use distress_bridge::config::BridgeConfig;
//! use distress_bridge::core::Connection;
//! use distress_bridge::infra::ScriptedTransport;
//!
//! let runtime = RuntimeBuilder::new(BridgeConfig::default())
//!     .with_guard("websocket", 100)
//!     .build()?;
//! let guard = runtime.require_guard("websocket")?.clone();
//! let ctx = runtime.new_context();
//!
//! let (transport, server) = ScriptedTransport::pair();
//! server.push_message("hello");
//! let conn = ctx.wait(Connection::dial(&ctx, &guard, "ws://target", move |_| Ok(transport)))?;
//! assert_eq!(ctx.wait(conn.read(&ctx))?, b"hello");
//! ctx.wait(conn.close(&ctx))?;
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core bridge abstractions: pool, guards, deferred results, contexts, connections.
pub mod core;
/// Configuration models for the pool, guards, and telemetry.
pub mod config;
/// Builders that turn configuration into a running scenario runtime.
pub mod builders;
/// Infrastructure adapters: telemetry sinks and in-memory transports.
pub mod infra;
/// Scenario runtime shared by all scripts.
pub mod runtime;
/// Shared utilities.
pub mod util;
