#![forbid(unsafe_code)]
#![warn(
    unused,
    unused_imports,
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs
)]

//! Binary entrypoint that loads settings, wires the bus, and runs the sample
//! document pipeline.

use herald_app::{AppResult, run_app};

/// Bootstraps the application and returns once the sample run completes.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}
