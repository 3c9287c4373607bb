//! Pure domain logic for the five block variants (SPEC_FULL.md §3.2).

pub mod acb;
pub mod block;
pub mod chb;
pub mod errors;
pub mod gb;
pub mod nb;
pub mod okb;

pub use acb::{AclEntry, Acb, GroupEntry};
pub use block::{Block, BlockOps};
pub use chb::Chb;
pub use errors::{ConsensusError, FixedModel, Model};
pub use gb::{Gb, GroupKeyPair};
pub use nb::Nb;
pub use okb::Okb;
