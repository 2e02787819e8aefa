//! Configuration plugin boundary
//!
//! Build configuration is owned by an external user-authored program, not
//! by a module import. The host spawns it, handshakes a protocol version
//! and sources `BuildGroups` over a small RPC surface.

pub mod host;
pub mod proto;

pub use host::{PluginClient, PluginHost};
pub use proto::{BuildArgs, BuildArgsGroup, Handshake};
