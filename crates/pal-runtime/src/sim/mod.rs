//! A self-contained game world for running agents without a chain.
//!
//! - `SimWorld`: entity map, observation text, transactions, lifecycle events
//! - `ScriptedModel`: rule-based model that reads `SimWorld` observations
//! - `SimIdentityService`: in-process identity registration and reputation

pub mod identity;
pub mod model;
pub mod world;

pub use identity::SimIdentityService;
pub use model::ScriptedModel;
pub use world::{SimEntity, SimWorld};
