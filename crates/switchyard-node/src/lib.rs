//! Node runtime for a peer-to-peer virtual networking engine.
//!
//! This crate hosts an engine instance: it owns the node's persistent state
//! and local configuration, joined virtual networks and their taps, the
//! periodic interface maintenance pass, and the callback bridge through
//! which the engine reaches back into the node.

pub mod bridge;
pub mod engine;
pub mod error;
pub mod handle;
pub mod local_config;
pub mod logging;
mod maintenance;
pub mod maintenance_ops;
pub mod network;
pub mod node;
pub mod store;
pub mod testing;

pub use engine::{Engine, EngineLauncher};
pub use error::NodeError;
pub use handle::NodeHandle;
pub use local_config::LocalConfig;
pub use network::Network;
pub use node::{ApiServer, Node, NodeState};
pub use store::{StateObjectKind, StateStore};
