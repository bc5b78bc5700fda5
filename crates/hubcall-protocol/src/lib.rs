//! Wire protocol for hubcall.
//!
//! This crate defines what a remote call *is*, independent of how it gets
//! routed:
//!
//! - **Interfaces** ([`Interface`], [`MethodSpec`], [`ParamType`]):
//!   static descriptors of capability interfaces, with overload
//!   resolution.
//! - **Calls** ([`RemoteName`], [`Args`], [`MethodCall`], [`CallId`]):
//!   the invocation record and its correlation token.
//! - **Results** ([`InvocationResult`], [`RemoteFailure`],
//!   [`ThrownError`]): values and failures coming back.
//! - **Wire messages** ([`WireMessage`]) and the [`Codec`] that turns
//!   them into bytes.
//!
//! ```text
//! Transport (bytes) → Protocol (WireMessage) → Messenger (endpoints, hub)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod call;
mod codec;
mod error;
mod interface;
mod result;
mod wire;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use call::{Args, CallId, MethodCall, RemoteName};
pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use interface::{ArgType, Interface, MethodSpec, ParamType, Returns, WireType};
pub use result::{InvocationResult, RemoteFailure, ThrownError};
pub use wire::WireMessage;
