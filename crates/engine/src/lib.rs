#![forbid(unsafe_code)]

//! The inbound request-processing engine: the critical-section algorithm
//! that ingests root submissions and completed analysis results, reconciles
//! tracked, cached and queued state under the root lock, and enqueues new
//! work. Built entirely on the [`sift_core::system`] contracts.

mod config;
mod error;
mod processor;

pub use config::EngineConfig;
pub use error::EngineError;
pub use processor::InboundProcessor;
