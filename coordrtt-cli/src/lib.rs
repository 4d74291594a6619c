//! Query server and tooling around coordrtt snapshots.

pub mod api;
pub mod config;
pub mod matrix;
pub mod range;
pub mod server;
pub mod status;
