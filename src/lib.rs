//! # skillpack
//!
//! Incremental updates for skill packages built from documentation trees.
//!
//! Each configured package is a directory of documents. An update hashes
//! every document, compares the result with the manifest stored by the
//! previous update, decides a semantic version bump and writes either a
//! full package or a delta containing only what changed. Large documents
//! are split into overlapping chunks as they are written.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────┐   ┌──────────────┐
//! │ connector_fs │──▶│ update (pipeline)  │──▶│ export       │
//! │ walk + globs │   │ hash/detect/bump   │   │ package.json │
//! └──────────────┘   └─────────┬──────────┘   │ entries.jsonl│
//!                              │              └──────────────┘
//!                              ▼
//!                     ┌──────────────────┐
//!                     │ manifest_store   │
//!                     │ manifest + lock  │
//!                     └──────────────────┘
//! ```
//!
//! The algorithms live in the `skillpack-core` crate; this crate adds
//! configuration, filesystem access and the CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! skillpack packages                 # list configured packages
//! skillpack status react             # what would change
//! skillpack update react             # write the next package version
//! skillpack update react --full      # rebuild everything
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`connector_fs`] | Filesystem document source |
//! | [`manifest_store`] | Atomic manifest storage and update lock |
//! | [`update`] | Update pipeline |
//! | [`export`] | JSONL package writer |
//! | [`status`] | Package listing and status |
//! | [`progress`] | Progress reporting on stderr |

pub mod config;
pub mod connector_fs;
pub mod export;
pub mod manifest_store;
pub mod progress;
pub mod status;
pub mod update;
