//! # kb-bridge
//!
//! A proxy server, typed client, and picker workflow for authoring
//! "knowledge bases" — indexed document collections — against a third-party
//! document-indexing REST API backed by a cloud-storage connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────────┐
//! │  Picker  │──▶│ KbClient │──▶│   Proxy   │──▶│  Indexing    │
//! │ workflow │   │ (typed)  │   │ /api/...  │   │  service     │
//! └──────────┘   └──────────┘   └───────────┘   └──────────────┘
//!                                     │
//!                                     └──▶ Auth provider (login only)
//! ```
//!
//! The proxy attaches the fixed upstream base URL and the anonymous api key
//! for the credential exchange; everything else is relayed with the
//! caller's bearer token. The client resolves a [`session::Session`] at
//! login (token → organization → storage connection) and fails fast with a
//! typed [`error::ClientError`] when a precondition is missing. The picker
//! is an explicit state machine over any [`picker::PickerBackend`].
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Upstream wire types |
//! | [`error`] | Client error taxonomy |
//! | [`session`] | Per-client session state |
//! | [`client`] | Typed API client |
//! | [`server`] | Proxy HTTP server |
//! | [`picker`] | Knowledge-base picker workflow |
//! | [`browse`] | Interactive terminal driver |

pub mod browse;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod picker;
pub mod server;
pub mod session;
