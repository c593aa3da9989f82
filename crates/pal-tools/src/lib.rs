//! # pal-tools
//!
//! Tools a pal agent can call, with parameters validated against a JSON
//! Schema before any side effect runs.
//!
//! - `ToolSet`: an ordered, schema-validated `ToolExecutor`
//! - `game_tools`: the `move`, `talk` and `attack` actions, signed with the
//!   agent's credential and submitted through a `TransactionLayer`

pub mod game;
pub mod toolset;

pub use game::{game_tools, TransactionLayer};
pub use toolset::{ToolHandler, ToolSet};
