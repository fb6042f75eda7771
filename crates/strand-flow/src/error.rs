// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Flow setup and runtime errors.

use strand_rt::RtError;
use thiserror::Error;

/// Errors from flow configuration and execution. Config errors are
/// caught at setup and never retried.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("producer count must be at least 1")]
    NoProducers,

    #[error("batch size must be at least 1")]
    ZeroBatch,

    #[error("termination threshold must be at least 1")]
    ZeroThreshold,

    /// A scheduler-level failure surfaced while the flow was running.
    #[error(transparent)]
    Runtime(#[from] RtError),
}
