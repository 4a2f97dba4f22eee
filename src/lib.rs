//! # docdex
//!
//! A local-first document question-answering backend. PDFs go in, grounded
//! answers with source attribution come out.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────┐   ┌───────────┐
//! │  Upload  │──▶│ Ingestion Pipeline       │──▶│  SQLite   │
//! │  (PDF)   │   │ extract→chunk→embed→store│   │ docs+vecs │
//! └──────────┘   └──────────────────────────┘   └─────┬─────┘
//!                                                     │
//! ┌──────────┐   ┌──────────────────────────┐         │
//! │ Question │──▶│ Query Engine             │◀────────┘
//! │          │   │ embed→search→LLM         │
//! └──────────┘   └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docdex init                       # create database
//! docdex ingest report.pdf          # ingest one PDF
//! docdex query "What does the report conclude?"
//! docdex serve                      # start HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF text extraction |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding providers and vector utilities |
//! | [`llm`] | LLM providers and prompt templates |
//! | [`index`] | Vector index with deterministic search ordering |
//! | [`store`] | Document store (files + metadata) |
//! | [`ingest`] | Staged ingestion pipeline |
//! | [`query`] | Retrieval-augmented query engine |
//! | [`upload_state`] | In-flight upload tracking |
//! | [`chat`] | Chat session persistence |
//! | [`maintenance`] | Consistency checking and orphan cleanup |
//! | [`server`] | HTTP/JSON API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod locks;
pub mod maintenance;
pub mod migrate;
pub mod models;
pub mod query;
pub mod server;
pub mod store;
pub mod upload_state;
