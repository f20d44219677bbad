//! recplay - record-replay test double for HTTP and WebSocket-RPC upstreams
//!
//! Every inbound call is normalized into a canonical request and fingerprinted.
//! A stored snapshot for that fingerprint is replayed as-is; otherwise the real
//! upstream is called once and its response is recorded for next time.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod canonical;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod network;
pub mod normalize;
pub mod proxy;
pub mod replay;
pub mod rpc;
pub mod storage;
pub mod upstream;

pub use error::{RecplayError, Result};
