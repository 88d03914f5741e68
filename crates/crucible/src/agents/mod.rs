//! Agent roles of the loop: the Actor builds, the Adversary breaks.

pub mod actor;
pub mod adversary;

pub use actor::{Actor, CrucibleActor};
pub use adversary::{Adversary, CrucibleAdversary};
