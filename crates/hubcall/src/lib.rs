//! # Hubcall
//!
//! Transparent method calls between the nodes of a star network.
//!
//! Objects register as implementors of a named, typed endpoint on any
//! node. Other nodes reach them through proxies, and the hub on the
//! server node routes calls to whichever node owns the endpoint. Two
//! call styles sit on top of the same machinery:
//!
//! - [`RemoteMessenger`]: exactly one implementor, request/response.
//! - [`ChannelMessenger`]: any number of subscribers, fire-and-forget.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hubcall::prelude::*;
//!
//! # async fn demo(implementor: Arc<dyn Implementor>, name: RemoteName) -> Result<(), HubcallError> {
//! let (network, server) = MemoryNetwork::new();
//! let server = RemoteMessenger::new(UnifiedMessenger::new(server)?);
//! let client = RemoteMessenger::new(UnifiedMessenger::new(network.join())?);
//!
//! server.register_remote(implementor, &name).await?;
//! let answer: i32 = client
//!     .get_remote(&name)?
//!     .call("increment", Args::new().with(&5)?)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod error;
pub mod remote;

pub use channel::{ChannelBroadcaster, ChannelMessenger};
pub use error::HubcallError;
pub use remote::{RemoteMessenger, RemoteProxy};

pub use hubcall_messenger as messenger;
pub use hubcall_protocol as protocol;
pub use hubcall_transport as transport;

use hubcall_messenger::MessengerError;
use hubcall_protocol::{Args, MethodSpec, RemoteName};

/// Picks the overload of `method` that best fits `args`.
pub(crate) fn resolve_method(
    name: &RemoteName,
    method: &str,
    args: &Args,
) -> Result<&'static MethodSpec, MessengerError> {
    let interface = name.interface();
    interface
        .resolve(method, args.types())
        .ok_or_else(|| MessengerError::NoSuchMethod {
            interface: interface.name,
            method: method.to_owned(),
        })
}

pub mod prelude {
    pub use crate::{
        ChannelBroadcaster, ChannelMessenger, HubcallError, RemoteMessenger,
        RemoteProxy,
    };
    pub use hubcall_messenger::{
        CallArgs, CallContext, Implementor, MessengerConfig, UnifiedMessenger,
        reply,
    };
    pub use hubcall_protocol::{
        Args, ArgType, Interface, MethodSpec, ParamType, RemoteFailure,
        RemoteName, Returns, ThrownError, WireType,
    };
    pub use hubcall_transport::{MemoryMessenger, MemoryNetwork, NodeId, NodeMessenger};
    #[cfg(feature = "websocket")]
    pub use hubcall_transport::{WebSocketClient, WebSocketServer};
}
