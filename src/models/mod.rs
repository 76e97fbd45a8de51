//! Data models for the skin pipeline.
//!
//! Stored skins, the render context built from collaborator records, and the
//! generation request/response shapes.

mod context;
pub mod defaults;
mod generation;
mod skin;

pub use context::*;
pub use generation::*;
pub use skin::*;
