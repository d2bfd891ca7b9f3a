//! shrd-services — the daemon's working parts: persistence, discovery,
//! liveness, connection management, transfers, and the protocol server.
//!
//! Every component takes its collaborators (store handle, event bus,
//! shutdown channel) at construction. There is no process-wide state.

pub mod client;
pub mod connect;
pub mod discovery;
pub mod events;
pub mod liveness;
pub mod server;
pub mod store;

pub use client::TransferClient;
pub use connect::{Connector, Session};
pub use discovery::Discovery;
pub use events::{AcceptPolicy, Event, EventBus};
pub use liveness::{LivenessTuning, Monitor};
pub use server::Server;
pub use store::Store;
