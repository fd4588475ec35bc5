//! # VIVY Ingest Core
//!
//! Runtime-free logic shared by the `vivy` pipeline: the record shapes
//! persisted in the index, the work-document normalizer and its selection
//! policies, identity assignment, and the staging store abstraction.
//!
//! This crate contains no tokio, sqlx, network, or filesystem I/O. Anything
//! that touches disk or the network lives in the `vivy-ingest` crate.

pub mod identity;
pub mod models;
pub mod normalize;
pub mod store;
