#![forbid(unsafe_code)]
#![warn(
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Herald application wiring.
//!
//! Layout: `bootstrap.rs` (settings, logging, bus construction), `payloads.rs`
//! (document events), `consumers.rs` (embedding generator and vector index).

/// Application bootstrap and bus construction.
pub mod bootstrap;
/// Sample consumers of document events.
pub mod consumers;
/// Application error types.
pub mod error;
/// Concrete events of the document pipeline.
pub mod payloads;

pub use bootstrap::{build_bus, run_app};
pub use error::{AppError, AppResult};
