//! Remote-invocation core for hubcall.
//!
//! Every process runs one [`UnifiedMessenger`] on top of a
//! [`NodeMessenger`](hubcall_transport::NodeMessenger). The messenger owns
//! the node's local [`Endpoint`]s and either runs a call against a local
//! endpoint or ships it to the [`Hub`], which lives on the server node and
//! knows which node implements what.
//!
//! # Key types
//!
//! - [`Implementor`]: the trait capability implementations satisfy
//! - [`Endpoint`]: a named local call target with ordered dispatch
//! - [`UnifiedMessenger`]: routing, announcements, pending calls
//! - [`Hub`]: server-side directory and router
//! - [`MessengerConfig`]: pool size and polling settings

mod config;
mod endpoint;
mod error;
mod hub;
mod implementor;
mod messenger;
mod pool;

pub use config::MessengerConfig;
pub use endpoint::Endpoint;
pub use error::MessengerError;
pub use hub::Hub;
pub use implementor::{CallArgs, CallContext, Implementor, reply};
pub use messenger::UnifiedMessenger;
