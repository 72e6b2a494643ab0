//! Replays recorded UI command scripts against club-management desktop
//! clients, verifying each step on screen and exporting what was read.
//!
//! The entry point is [`EngineRegistry`]: one [`Engine`] per application,
//! each fed [`Comando`]s and driving its app through the platform traits in
//! [`platforms`].

pub mod arbiter;
pub mod cancellation;
pub mod catalog;
pub mod command;
pub mod config;
pub mod engine;
pub mod errors;
pub mod export;
pub mod geometry;
pub mod overlay;
pub mod platforms;
pub mod question;
pub mod registry;
pub mod scroll;
pub mod verify;

pub use catalog::{FeatureCatalog, InputSchema};
pub use command::{Command, CommandStore};
pub use config::EngineConfig;
pub use engine::{Engine, EngineServices, EngineState};
pub use errors::EngineError;
pub use question::{AttrValue, Comando, Question, Scalar};
pub use registry::EngineRegistry;
