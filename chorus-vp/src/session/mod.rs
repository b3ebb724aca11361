//! Session management
//!
//! The session manager is the only component the command-dispatch layer
//! talks to. Voice targets reach the engines through [`StaticTargets`] (or
//! any other [`crate::transport::TargetProvider`]).

pub mod manager;
pub mod targets;

pub use manager::SessionManager;
pub use targets::StaticTargets;
