//! Lead domain module
//!
//! Contains the participant-set model, the lifecycle state machine, the
//! store adapters, lead intake and the action gateway.

mod gateway;
mod intake;
pub mod lifecycle;
mod model;
mod postgres;
mod store;

pub use gateway::{ActionGateway, ActionKind, ActionOutcome};
pub use intake::LeadIntake;
pub use lifecycle::{apply, LeadEvent, LifecycleRules, SideEffect, Transition};
pub use model::*;
pub use postgres::PgLeadStore;
pub use store::{BankDirectory, CandidateCursor, Commit, LeadStore, MemoryLeadStore, Mutation};
