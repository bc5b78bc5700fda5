//! Unicast request/response calls.
//!
//! A remote is a named endpoint with exactly one implementor somewhere in
//! the cluster. [`RemoteProxy::call`] runs a method on it and returns the
//! result as if the implementor were a local object: values are decoded
//! into the caller's type, errors raised by the implementor come back as
//! [`HubcallError::Remote`] and can be recovered with
//! [`HubcallError::thrown`].
//!
//! Typed clients are plain structs around a proxy:
//!
//! ```rust
//! use hubcall::prelude::*;
//!
//! const CALCULATOR: Interface = Interface {
//!     name: "Calculator",
//!     methods: &[MethodSpec {
//!         name: "increment",
//!         action: 1,
//!         params: &[ParamType::Primitive("i32")],
//!         returns: Returns::Value(ParamType::Primitive("i32")),
//!     }],
//! };
//!
//! struct CalculatorClient<M: NodeMessenger>(RemoteProxy<M>);
//!
//! impl<M: NodeMessenger> CalculatorClient<M> {
//!     async fn increment(&self, n: i32) -> Result<i32, HubcallError> {
//!         self.0.call("increment", Args::new().with(&n)?).await
//!     }
//! }
//! ```

use std::sync::Arc;

use hubcall_messenger::{Implementor, UnifiedMessenger};
use hubcall_protocol::{Args, Codec, JsonCodec, MethodCall, ProtocolError, RemoteName};
use hubcall_transport::NodeMessenger;
use serde::de::DeserializeOwned;

use crate::HubcallError;

/// Registers remotes and hands out proxies to them.
///
/// Cheap to clone; clones share the underlying messenger.
pub struct RemoteMessenger<M, C = JsonCodec> {
    messenger: UnifiedMessenger<M, C>,
}

impl<M, C> Clone for RemoteMessenger<M, C> {
    fn clone(&self) -> Self {
        Self {
            messenger: self.messenger.clone(),
        }
    }
}

impl<M: NodeMessenger, C: Codec> RemoteMessenger<M, C> {
    pub fn new(messenger: UnifiedMessenger<M, C>) -> Self {
        Self { messenger }
    }

    pub fn messenger(&self) -> &UnifiedMessenger<M, C> {
        &self.messenger
    }

    /// Makes `implementor` the remote called `name`.
    ///
    /// A second registration anywhere else in the cluster is caught by
    /// the hub when a call arrives; callers then get `IllegalState`.
    ///
    /// # Errors
    /// `DuplicateRemote` if this node already has an implementor for
    /// `name`, plus everything [`UnifiedMessenger::add_implementor`] can
    /// return.
    pub async fn register_remote(
        &self,
        implementor: Arc<dyn Implementor>,
        name: &RemoteName,
    ) -> Result<(), HubcallError> {
        self.messenger
            .add_exclusive_implementor(name, implementor, false)
            .await?;
        tracing::debug!(remote = %name, "remote registered");
        Ok(())
    }

    pub async fn unregister_remote(
        &self,
        implementor: &Arc<dyn Implementor>,
        name: &RemoteName,
    ) -> Result<(), HubcallError> {
        self.messenger
            .remove_implementor(name.name(), implementor)
            .await?;
        tracing::debug!(remote = %name, "remote unregistered");
        Ok(())
    }

    /// Returns a proxy for the remote `name`. Whether anything implements
    /// it is only checked when a call is made, so the remote may be
    /// registered later.
    ///
    /// # Errors
    /// `Protocol(InvalidInterface)` if the interface descriptor is
    /// inconsistent.
    pub fn get_remote(&self, name: &RemoteName) -> Result<RemoteProxy<M, C>, HubcallError> {
        name.interface().validate()?;
        Ok(RemoteProxy {
            name: name.clone(),
            messenger: self.messenger.clone(),
        })
    }

    /// Returns `true` if calls to `name` would run on this node.
    pub fn has_local_implementor(&self, name: &RemoteName) -> bool {
        self.messenger.has_local_implementor(name.name())
    }
}

/// Calls methods on one remote.
pub struct RemoteProxy<M, C = JsonCodec> {
    name: RemoteName,
    messenger: UnifiedMessenger<M, C>,
}

impl<M, C> Clone for RemoteProxy<M, C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            messenger: self.messenger.clone(),
        }
    }
}

impl<M: NodeMessenger, C: Codec> RemoteProxy<M, C> {
    pub fn remote_name(&self) -> &RemoteName {
        &self.name
    }

    /// Runs `method` on the remote and waits for its result.
    ///
    /// Void methods return `null`, which decodes into `()`.
    ///
    /// # Errors
    /// - `Messenger(NoSuchMethod)` if no overload accepts `args`.
    /// - `Remote(..)` if the remote can't be found, the connection drops,
    ///   or the implementor returns an error.
    /// - `Protocol(Decode)` if the value doesn't fit `R`.
    pub async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        args: Args,
    ) -> Result<R, HubcallError> {
        let spec = crate::resolve_method(&self.name, method, &args)?;
        let value = self
            .messenger
            .invoke_and_wait(MethodCall::new(&self.name, spec, args))
            .await?
            .into_result()?;
        serde_json::from_value(value).map_err(|e| ProtocolError::Decode(e).into())
    }

    /// Sends `method` to the remote without waiting for it to run.
    ///
    /// If the remote lives on this node it has run by the time this
    /// returns. Errors it raises are logged, not returned.
    pub async fn notify(&self, method: &str, args: Args) -> Result<(), HubcallError> {
        let spec = crate::resolve_method(&self.name, method, &args)?;
        self.messenger
            .invoke(MethodCall::new(&self.name, spec, args))
            .await?;
        Ok(())
    }
}
