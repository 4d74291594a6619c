//! Network-coordinate RTT estimation for cluster members.
//!
//! The crate turns per-node network coordinates (or direct measurements) into
//! an immutable [`ClusterStatus`] snapshot and publishes it through a
//! single-writer, multi-reader [`cache`]. A background [`scheduler`] rebuilds
//! the snapshot on a fixed period.

#![warn(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo
)]
#![deny(clippy::unwrap_in_result, clippy::panic_in_result_fn)]

/// External collaborators: membership, coordinates, identity.
pub mod agent;
/// Snapshot builder combining membership, coordinates and probers.
pub mod builder;
/// Publisher/reader pair holding the latest snapshot.
pub mod cache;
/// Declarative configuration schema shared by the CLI and runtime.
pub mod config;
/// Network coordinates and the distance model.
pub mod coordinate;
/// Error types surfaced by builder and agent subsystems.
pub mod error;
/// Estimated and measured RTT probers.
pub mod prober;
/// Precision policy for published RTT values.
pub mod rounding;
/// Background refresh loop.
pub mod scheduler;
/// Published snapshot data model.
pub mod snapshot;

pub use agent::{CoordinateSource, IdentitySource, Member, MemberStatus, MembershipSource};
pub use builder::{BuiltSnapshot, SnapshotBuilder};
pub use cache::{NotReady, PublishedSnapshot, SnapshotPublisher, SnapshotReader, snapshot_cache};
pub use config::{RttMode, RttScope, RttServiceConfig, ScheduleMode};
pub use coordinate::{Coordinate, EstimateError, estimate_rtt};
pub use error::{AgentError, BuildError, CacheError, RefreshError};
pub use prober::{CommandProber, CoordinateProber, ProbeError, RttProber, build_prober};
pub use rounding::{MAX_DECIMALS, RoundingMode, UNKNOWN_RTT};
pub use scheduler::{RefreshHandle, RefreshPhase, RefreshScheduler};
pub use snapshot::{ClusterStatus, LocalRttView, NodeInfo};
