//! # VIVY Ingest
//!
//! Ingestion and indexing pipeline for a choral-music score collection.
//!
//! Work documents (one per musical piece, with irregular translations and
//! download-link maps) are normalized into candidate texts, their score
//! files are downloaded into per-record directories, and the result is
//! committed to a crash-safe JSON index that can be rebuilt at any time
//! from the staging store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌────────────┐   ┌───────────┐
//! │ Work source  │──▶│ Normalizer │──▶│  Acquirer  │──▶│  Staging  │
//! │ SQLite/JSON  │   │  (core)    │   │ HTTP + fs  │   │  SQLite   │
//! └──────────────┘   └────────────┘   └─────┬──────┘   └─────┬─────┘
//!                                           │ failures       │ checkpoint
//!                                           ▼                ▼
//!                                     ┌───────────┐    ┌────────────┐
//!                                     │ error.json│◀───│ index.json │
//!                                     └───────────┘    │   data/    │
//!                                                      └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vivy init                      # create database
//! vivy import works.json         # load crawled work documents
//! vivy ingest                    # normalize, download, checkpoint
//! vivy stats                     # what landed
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`source`] | Work document sources (SQLite table, JSON dump) |
//! | [`fetch`] | HTTP download contract |
//! | [`acquire`] | Insert, update, and copy of record files |
//! | [`index`] | Durable index files and checkpoints |
//! | [`staging`] | SQLite-backed staging store |
//! | [`ingest`] | Orchestrator and worker pool |
//! | [`sort`] | Raw to ready sort/filter pass |
//! | [`stats`] | Index statistics |
//! | [`progress`] | Progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod acquire;
pub mod config;
pub mod db;
pub mod fetch;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod progress;
pub mod sort;
pub mod source;
pub mod staging;
pub mod stats;

pub use vivy_ingest_core::{identity, models, normalize, store};
