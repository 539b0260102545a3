//! Prometheus implementation of [`rmeter_core::MetricsBackend`].
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use rmeter_prometheus::{Encoder, PrometheusMetrics, TextEncoder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = PrometheusMetrics::new()?;
//! let handle: rmeter_core::MetricsHandle = Arc::new(metrics.clone());
//! // pass `handle` to RpcRunnerBuilder::metrics, then at exit:
//! let mut out = Vec::new();
//! TextEncoder::new().encode(&metrics.gather(), &mut out)?;
//! # let _ = handle;
//! # Ok(())
//! # }
//! ```
//!
//! No HTTP endpoint is provided; expose [`PrometheusMetrics::gather`] through whatever server
//! the application already runs, or dump it at exit.

mod backend;
pub use backend::PrometheusMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
