//! # Doughnut
//!
//! The facade crate: assembles a `Silo`/consensus stack into the named
//! block operations a caller needs, the way `node-runtime::container`
//! assembles its subsystems from a `NodeConfig` (SPEC_FULL.md §4.10).
//! Library-only — like `qc-02-block-storage`, this crate has no CLI or
//! daemon binary of its own; it is consumed by whatever process wires up
//! a network and mounts it.

mod facade;
mod passport;
mod user;

pub use facade::{ConflictResolver, Doughnut, FetchedBlock};
pub use passport::Passport;
pub use user::{make_user, MakeUserError, User};
