//! # swapi-odoo-sync
//!
//! One-shot sync of a paginated Star Wars API into an Odoo-style CMS.
//!
//! Each run pages through the configured resources, fetches a portrait for
//! every character from an image API, maps items into CMS records, and
//! upserts them by a deterministic external key. Rerunning against the same
//! data updates the records in place and never duplicates them.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌──────────┐   ┌──────────────┐
//! │ PageSource │──▶│  Pipeline  │──▶│ mapping  │──▶│TargetGateway │
//! │  (SWAPI)   │   │ buffered N │   │          │   │   (CmsRpc)   │
//! └────────────┘   └─────┬──────┘   └──────────┘   └──────────────┘
//!                        │
//!                 ┌──────▼──────┐
//!                 │ AssetSource │
//!                 │  (images)   │
//!                 └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! swsync --config ./config/swsync.toml check       # verify CMS credentials
//! swsync --config ./config/swsync.toml run --dry-run
//! swsync --config ./config/swsync.toml run --json > report.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types and the run report |
//! | [`error`] | Error taxonomy |
//! | [`source`] | Paginated source API client |
//! | [`assets`] | Image API client |
//! | [`mapping`] | Item → CMS record mapping |
//! | [`rpc`] | CMS RPC trait, JSON-RPC client, in-memory CMS |
//! | [`gateway`] | Idempotent upsert by external key |
//! | [`pipeline`] | Run orchestration |
//! | [`progress`] | Progress reporting on stderr |
//! | [`logging`] | Tracing subscriber setup |

pub mod assets;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod logging;
pub mod mapping;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod rpc;
pub mod source;
