//! Multicast, fire-and-forget calls.
//!
//! A channel is a named endpoint that any number of subscribers on any
//! number of nodes can join. Broadcasting on it runs the method once on
//! every subscriber in the cluster, the caller's own node included, and
//! never produces a result.
//!
//! ```text
//!   broadcast("notify")
//!          │
//!          ├──► local subscribers (run before broadcast returns)
//!          │
//!          └──► hub ──► every other node with a subscriber
//! ```

use std::sync::Arc;

use hubcall_messenger::{Implementor, MessengerError, UnifiedMessenger};
use hubcall_protocol::{Args, Codec, Interface, JsonCodec, MethodCall, RemoteName};
use hubcall_transport::NodeMessenger;

use crate::HubcallError;

/// Subscribes to channels and hands out broadcasters.
///
/// Cheap to clone; clones share the underlying messenger.
pub struct ChannelMessenger<M, C = JsonCodec> {
    messenger: UnifiedMessenger<M, C>,
}

impl<M, C> Clone for ChannelMessenger<M, C> {
    fn clone(&self) -> Self {
        Self {
            messenger: self.messenger.clone(),
        }
    }
}

impl<M: NodeMessenger, C: Codec> ChannelMessenger<M, C> {
    pub fn new(messenger: UnifiedMessenger<M, C>) -> Self {
        Self { messenger }
    }

    pub fn messenger(&self) -> &UnifiedMessenger<M, C> {
        &self.messenger
    }

    /// Adds `subscriber` to the channel `name`.
    ///
    /// Channel endpoints are single-threaded: each subscriber sees calls
    /// in the order they were broadcast.
    ///
    /// # Errors
    /// `ChannelMethodNotVoid` if the interface has a method with a
    /// return value, plus everything
    /// [`UnifiedMessenger::add_implementor`] can return.
    pub async fn register_channel_subscriber(
        &self,
        subscriber: Arc<dyn Implementor>,
        name: &RemoteName,
    ) -> Result<(), HubcallError> {
        ensure_all_void(name.interface())?;
        self.messenger.add_implementor(name, subscriber, true).await?;
        tracing::debug!(channel = %name, "channel subscriber registered");
        Ok(())
    }

    /// Removes `subscriber` from the channel `name`.
    pub async fn unregister_channel_subscriber(
        &self,
        subscriber: &Arc<dyn Implementor>,
        name: &RemoteName,
    ) -> Result<(), HubcallError> {
        self.messenger
            .remove_implementor(name.name(), subscriber)
            .await?;
        tracing::debug!(channel = %name, "channel subscriber unregistered");
        Ok(())
    }

    /// Returns a handle that broadcasts on the channel `name`.
    ///
    /// # Errors
    /// `Protocol(InvalidInterface)` if the interface descriptor is
    /// inconsistent, `ChannelMethodNotVoid` if any method returns a value.
    pub fn get_channel_broadcaster(
        &self,
        name: &RemoteName,
    ) -> Result<ChannelBroadcaster<M, C>, HubcallError> {
        name.interface().validate()?;
        ensure_all_void(name.interface())?;
        Ok(ChannelBroadcaster {
            name: name.clone(),
            messenger: self.messenger.clone(),
        })
    }
}

fn ensure_all_void(interface: &'static Interface) -> Result<(), MessengerError> {
    if interface.is_all_void() {
        return Ok(());
    }
    let method = interface
        .methods
        .iter()
        .find(|method| !method.is_void())
        .map_or("", |method| method.name);
    Err(MessengerError::ChannelMethodNotVoid {
        interface: interface.name,
        method,
    })
}

/// Sends calls to every subscriber of one channel.
pub struct ChannelBroadcaster<M, C = JsonCodec> {
    name: RemoteName,
    messenger: UnifiedMessenger<M, C>,
}

impl<M, C> Clone for ChannelBroadcaster<M, C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            messenger: self.messenger.clone(),
        }
    }
}

impl<M: NodeMessenger, C: Codec> ChannelBroadcaster<M, C> {
    pub fn remote_name(&self) -> &RemoteName {
        &self.name
    }

    /// Runs `method` on every subscriber of the channel.
    ///
    /// Subscribers on this node have run by the time this returns; remote
    /// ones run asynchronously. Subscriber errors are logged where they
    /// happen and never reach the broadcaster.
    ///
    /// # Errors
    /// `NoSuchMethod` if no overload accepts `args`; `Protocol` or
    /// `Transport` if the call can't be sent.
    pub async fn broadcast(&self, method: &str, args: Args) -> Result<(), HubcallError> {
        let spec = crate::resolve_method(&self.name, method, &args)?;
        tracing::debug!(channel = %self.name, method = %spec, "broadcasting");
        self.messenger
            .invoke(MethodCall::new(&self.name, spec, args))
            .await?;
        Ok(())
    }
}
