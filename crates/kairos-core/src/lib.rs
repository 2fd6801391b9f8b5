//! `kairos-core`: configuration, identity, errors and the `Rez` record
//! shared by the scheduler, dispatcher and gateway crates.

pub mod config;
pub mod error;
pub mod io;
pub mod rez;
pub mod types;

pub use config::KairosConfig;
pub use error::{KairosError, Result};
pub use rez::Rez;
pub use types::{binding_tag, NodeIdentity};
