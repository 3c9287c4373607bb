//! # Block Model
//!
//! The five block variants that make up a Doughnut address space, and the
//! validation invariants every Silo write is checked against before it is
//! accepted (SPEC_FULL.md §3).
//!
//! ## Crate structure
//!
//! - `domain/` - pure domain logic: block variants, the `Block` enum, and
//!   the validation/replacement rules. No I/O, no async.
//!
//! Grounded on `qc-02-block-storage::domain::entities` (entity shape,
//! validation-before-store discipline) and `shared-crypto` (signing), with
//! the block kinds themselves replaced end to end: Quantum-Chain blocks are
//! append-only chain entries, Doughnut blocks are five independently
//! addressed mutability classes.

pub mod domain;

pub use domain::{
    AclEntry, Acb, Block, BlockOps, Chb, ConsensusError, FixedModel, Gb, GroupEntry,
    GroupKeyPair, Model, Nb, Okb,
};
pub use domain::block::RemoveSignature;
