//! # Chain-Reorganization Monitor
//!
//! Long-running observer that polls a blockchain node's JSON-RPC endpoint,
//! maintains a bounded cache of recent canonical blocks, and emits structured
//! events the moment the observed chain diverges from its cached view.
//!
//! This library provides a modular, testable architecture for:
//! - Detecting same-height block replacement, parent-hash discontinuity,
//!   and tip rewinds at arbitrary depth inside the cache window
//! - Probing chain identity (chain id + genesis hash) on a coarse interval
//! - Emitting one JSON event record per observation on stdout
//! - Pushing critical findings to an optional webhook sink
//!
//! ## Architecture
//!
//! The crate is organized into six layers:
//! - `config`: Chain presets and environment-driven settings
//! - `rpc`: The `ChainRpc` capability over an alloy HTTP provider
//! - `monitor`: Block cache, detection state machine, hourly counters
//! - `events`: Event records and the stdout emitter
//! - `alert`: Fire-and-forget webhook dispatch
//! - `cli`: Command-line orchestration
//!
//! The detector consumes injected capabilities (RPC, event sink, clock), so
//! the full state machine is drivable from tests with a scripted chain and a
//! manual clock.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod alert;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod monitor;
pub mod observability;
pub mod rpc;
