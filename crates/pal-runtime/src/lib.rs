//! # pal-runtime
//!
//! Wires the pal agent runtime together.
//!
//! - `AgentSupervisor`: maps entity lifecycle events to agent loops and owns
//!   the per-agent credential and storage-manager registries
//! - `DeterministicCredentials`: seed-derived per-agent credentials
//! - `pal_profile`: the pal system prompt and timestamped observations
//! - `OpenAiCompatibleModel`: `LanguageModel` over a chat-completions API
//! - `sim`: an in-process world, scripted model and identity service for
//!   running the whole system without a chain

pub mod credentials;
pub mod openai;
pub mod profile;
pub mod sim;
pub mod supervisor;

pub use credentials::{CredentialProvider, DeterministicCredentials};
pub use openai::OpenAiCompatibleModel;
pub use profile::{pal_profile, pal_system_prompt};
pub use supervisor::{AgentSupervisor, Collaborators, EntityEvent, SupervisorConfig};
