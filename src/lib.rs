//! # Trifuse
//!
//! A hybrid indexing and search orchestration layer over a relational
//! engine with native full-text and vector search.
//!
//! Trifuse sits between callers and the storage engine: it diffs and
//! embeds content on the way in, and normalizes search requests on the
//! way out, while ranking itself (literal + keyword + semantic fusion)
//! stays inside the engine's ranking procedure.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────┐   ┌─────────────┐
//! │  Callers   │──▶│  Orchestration │──▶│  Postgres    │
//! │ docs/ents  │   │ diff+embed+map │   │ FTS + pgvec │
//! └────────────┘   └───────┬───────┘   └──────┬──────┘
//!                          │                  │
//!                    ┌─────▼─────┐      ┌─────▼──────┐
//!                    │ Embedding │      │  Ranking   │
//!                    │  gateway  │      │ procedure  │
//!                    └───────────┘      └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`vector`] | Vector text-literal codec |
//! | [`projection`] | Deterministic JSON-to-text projection |
//! | [`embedding`] | Embedding gateway and backends |
//! | [`documents`] | Content-addressed document upserts and search |
//! | [`entities`] | Structured-record writes and search |
//! | [`search`] | Request normalization and result mapping |
//! | [`store`] | Storage-engine contract and implementations |
//! | [`db`] | Database connection |
//! | [`error`] | Error taxonomy |

pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod entities;
pub mod error;
pub mod models;
pub mod projection;
pub mod search;
pub mod store;
pub mod vector;
