//! Call targets and invocation records.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ArgType, Interface, MethodSpec, ProtocolError, WireType};

// ---------------------------------------------------------------------------
// RemoteName
// ---------------------------------------------------------------------------

/// A call target: a cluster-unique name plus the capability interface
/// registered under it.
///
/// Created once and cloned to every caller. Two names are equal when both
/// the name and the interface match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteName {
    name: String,
    interface: &'static Interface,
}

impl RemoteName {
    pub fn new(name: impl Into<String>, interface: &'static Interface) -> Self {
        Self {
            name: name.into(),
            interface,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interface(&self) -> &'static Interface {
        self.interface
    }
}

impl fmt::Display for RemoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.name, self.interface.name)
    }
}

// ---------------------------------------------------------------------------
// Args
// ---------------------------------------------------------------------------

/// Builder for call arguments. Serializes each value and records its
/// runtime [`ArgType`] for overload resolution.
///
/// ```rust
/// use hubcall_protocol::Args;
///
/// let args = Args::new().with(&5i32)?.with(&"five")?;
/// assert_eq!(args.len(), 2);
/// # Ok::<(), hubcall_protocol::ProtocolError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    types: Vec<ArgType>,
    values: Vec<Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one argument.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value can't be serialized.
    pub fn with<T: Serialize + WireType>(
        mut self,
        value: &T,
    ) -> Result<Self, ProtocolError> {
        let json = serde_json::to_value(value).map_err(ProtocolError::Encode)?;
        self.types.push(value.arg_type());
        self.values.push(json);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn types(&self) -> &[ArgType] {
        &self.types
    }
}

// ---------------------------------------------------------------------------
// MethodCall
// ---------------------------------------------------------------------------

/// One method invocation on its way to an endpoint.
///
/// Carries no invoker: the receiving side attaches the node it actually
/// came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    /// Name of the target endpoint.
    pub endpoint: String,
    /// Interface the caller believes the endpoint implements.
    pub interface: String,
    pub method: String,
    pub action: u16,
    pub arg_types: Vec<ArgType>,
    pub args: Vec<Value>,
}

impl MethodCall {
    /// Builds the record for calling `method` on `target`.
    pub fn new(target: &RemoteName, method: &MethodSpec, args: Args) -> Self {
        Self {
            endpoint: target.name().to_owned(),
            interface: target.interface().name.to_owned(),
            method: method.name.to_owned(),
            action: method.action,
            arg_types: args.types,
            args: args.values,
        }
    }

    /// Finds the declared method this call targets on `interface`.
    ///
    /// The overload is chosen from the method name and argument types;
    /// the action code must then name that same overload, otherwise the
    /// two sides are running different versions of the interface.
    pub fn resolve(&self, interface: &Interface) -> Option<&'static MethodSpec> {
        if self.interface != interface.name {
            return None;
        }
        let by_action = interface.method_by_action(self.action)?;
        interface
            .resolve(&self.method, &self.arg_types)
            .filter(|spec| std::ptr::eq(*spec, by_action))
    }
}

// ---------------------------------------------------------------------------
// CallId
// ---------------------------------------------------------------------------

/// Correlation token pairing an outstanding call with its result.
///
/// 128 random bits rendered as 32 lowercase hex characters, generated by
/// the calling node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn random() -> Self {
        let bytes: [u8; 16] = rand::rng().random();
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
