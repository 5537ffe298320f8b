//! The `client` module is the SDK side of the RPC transport.
//!
//! - [`correlation`]: outstanding calls keyed by sequence id, with timeouts.
//! - [`rpc_client`]: per-call topics, automatic bind, presence and push events.
//! - [`multiplexer`]: several roles sharing one broker connection.

pub mod correlation;
pub mod multiplexer;
pub mod rpc_client;

pub use correlation::{CorrelationTable, PendingHandle};
pub use multiplexer::{Multiplexer, RoleClient, RoleEvent, RoleTransport};
pub use rpc_client::{ClientOptions, PushEvent, RpcClient};
