//! This crate provides a read-only HTTP API over the metric values produced by climate model
//! diagnostics. Diagnostics are run by providers and produce scalar values (a single number)
//! and series values (an array with an optional index), each tagged with categorical dimensions
//! such as model (`source_id`), experiment, variable, metric and statistic.
//!
//! Values may be filtered by dimension and id, and are returned as JSON or as a streamed CSV
//! attachment. Scalar values are annotated by an outlier detector that computes interquartile
//! range (IQR) bounds per group of comparable values, weighting every model equally regardless
//! of its number of ensemble members.
//!
//! The server is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team, on top of the [hyper] HTTP library.
//! * [Serde](serde) performs (de)serialisation of JSON data.
//! * [ndarray] and [ndarray_stats] compute the quartiles used for outlier bounds.
//! * [csv] encodes CSV records.
//! * [Rayon](rayon) optionally runs CPU-bound work off the async runtime.

pub mod app;
pub mod app_state;
pub mod cli;
pub mod collection;
pub mod csv_export;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod models;
pub mod outliers;
pub mod sanitize;
pub mod server;
pub mod store;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod validated_query;
