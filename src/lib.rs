//! # Chat Ingest
//!
//! Document ingestion backend for a chat application: accepts uploaded
//! files, extracts their text paragraphs, splits the text into overlapping
//! chunks for embedding, and keeps a soft-deletable record of the documents
//! attached to each chat thread.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐   ┌──────────┐
//! │ Index check  │──▶│ Upload gate  │──▶│ Extractor │──▶│ Chunker  │
//! └──────────────┘   └──────────────┘   └───────────┘   └────┬─────┘
//!                                                            │
//!                      ┌─────────────────────────────────────┤
//!                      ▼                                     ▼
//!                 ┌──────────┐                         ┌──────────┐
//!                 │  Store   │◀── CLI (chatdoc) ──────▶│   HTTP   │
//!                 │  SQLite  │                         │  server  │
//!                 └──────────┘                         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chatdoc init                               # create database
//! chatdoc crack ./report.pdf --print         # extract and chunk a file
//! chatdoc upload ./report.pdf --thread t1 --user alice@example.com
//! chatdoc documents list --thread t1
//! chatdoc serve                              # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Uploads, records, chunks, and the tagged result shape |
//! | [`error`] | Pipeline error taxonomy |
//! | [`upload`] | Upload presence and size checks |
//! | [`extract`] | Extractor trait and in-process extraction |
//! | [`document_intelligence`] | Remote paragraph extraction |
//! | [`chunk`] | Overlapping fixed-window chunker |
//! | [`index`] | Search index readiness checks |
//! | [`ingest`] | Ingestion orchestration |
//! | [`store`] | Document record storage |
//! | [`cache`] | Listing cache and revalidation |
//! | [`credential`] | API keys and bearer tokens for cloud services |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod credential;
pub mod db;
pub mod document_intelligence;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod server;
pub mod store;
pub mod upload;
