//! # Daily Digest
//!
//! A daily news digest pipeline: fetch many feeds, cut them down to a small
//! curated set with an LLM classifier, embed what survives, and serve it
//! back through keyword search, semantic search and per-user
//! recommendations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │  Fetchers   │──▶│ Aggregate → Sample → │──▶│  SQLite   │
//! │ Feed/Social │   │ Curate → Embed       │   │ items+vec │
//! └─────────────┘   └──────────────────────┘   └────┬─────┘
//!                                                   │
//!                              ┌────────────────────┤
//!                              ▼                    ▼
//!                         ┌──────────┐        ┌──────────┐
//!                         │   CLI    │        │   HTTP   │
//!                         │ (digest) │        │  (axum)  │
//!                         └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! digest init                                   # create database
//! digest sources add https://blog.rust-lang.org/feed.xml "Rust Blog" dev_tools
//! digest run                                    # one ingestion run
//! digest show                                   # today's digest
//! digest search "compiler" --semantic
//! digest serve                                  # start HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`fetch`] | Feed, social and official-source fetchers |
//! | [`aggregate`] | Concurrent per-source fan-out |
//! | [`sampler`] | Category-balanced sampling |
//! | [`curate`] | LLM curation contract and fallbacks |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`pipeline`] | One ingestion run with its audit record |
//! | [`weekly`] | Weekly engagement digest |
//! | [`search`] | Keyword and semantic retrieval |
//! | [`personalize`] | Preference vectors and re-ranking |
//! | [`server`] | HTTP API |
//! | [`store`] | Storage trait and backends |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod aggregate;
pub mod auth;
pub mod config;
pub mod curate;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod fetch;
pub mod migrate;
pub mod models;
pub mod notify;
pub mod personalize;
pub mod pipeline;
pub mod sampler;
pub mod search;
pub mod server;
pub mod show;
pub mod sources;
pub mod store;
pub mod text;
pub mod weekly;
