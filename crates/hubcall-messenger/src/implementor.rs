//! The trait capability implementations satisfy.

use futures_util::future::BoxFuture;
use hubcall_protocol::{Interface, MethodSpec, ThrownError};
use hubcall_transport::NodeId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Who is calling, attached by the receiving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Name of the endpoint the call arrived on.
    pub endpoint: String,
    /// The node that issued the call.
    pub invoker: NodeId,
}

/// Argument values of one call, decoded on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct CallArgs {
    values: Vec<Value>,
}

impl CallArgs {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Decodes argument `index` as a `T`.
    ///
    /// # Errors
    /// A missing or mistyped argument becomes a [`ThrownError`], so
    /// implementors can use `?` and the caller sees the failure.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, ThrownError> {
        let value = self.values.get(index).ok_or_else(|| {
            ThrownError::msg(format!(
                "argument {index} missing, call has {}",
                self.values.len()
            ))
        })?;
        serde_json::from_value(value.clone())
            .map_err(|e| ThrownError::msg(format!("argument {index}: {e}")))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Serializes a return value.
pub fn reply<T: Serialize>(value: &T) -> Result<Value, ThrownError> {
    serde_json::to_value(value)
        .map_err(|e| ThrownError::msg(format!("return value not serializable: {e}")))
}

/// An object registered on an endpoint.
///
/// Object-safe so endpoints can hold `Arc<dyn Implementor>`. `invoke`
/// receives the already-resolved method:
///
/// ```rust
/// use futures_util::future::BoxFuture;
/// use hubcall_messenger::{CallArgs, CallContext, Implementor, reply};
/// use hubcall_protocol::{Interface, MethodSpec, ParamType, Returns, ThrownError};
/// use serde_json::Value;
///
/// const I32: ParamType = ParamType::Primitive("i32");
/// const CALCULATOR: Interface = Interface {
///     name: "Calculator",
///     methods: &[MethodSpec {
///         name: "increment",
///         action: 1,
///         params: &[I32],
///         returns: Returns::Value(I32),
///     }],
/// };
///
/// struct Calculator;
///
/// impl Implementor for Calculator {
///     fn interfaces(&self) -> &'static [&'static Interface] {
///         &[&CALCULATOR]
///     }
///
///     fn invoke<'a>(
///         &'a self,
///         _ctx: CallContext,
///         method: &'static MethodSpec,
///         args: CallArgs,
///     ) -> BoxFuture<'a, Result<Value, ThrownError>> {
///         Box::pin(async move {
///             match method.name {
///                 "increment" => reply(&(args.get::<i32>(0)? + 1)),
///                 other => Err(ThrownError::msg(format!("unexpected {other}"))),
///             }
///         })
///     }
/// }
/// ```
pub trait Implementor: Send + Sync + 'static {
    /// Every interface this object satisfies.
    fn interfaces(&self) -> &'static [&'static Interface];

    /// Runs one call.
    fn invoke<'a>(
        &'a self,
        ctx: CallContext,
        method: &'static MethodSpec,
        args: CallArgs,
    ) -> BoxFuture<'a, Result<Value, ThrownError>>;

    /// Returns `true` if this object satisfies `interface`.
    fn implements(&self, interface: &Interface) -> bool {
        self.interfaces().iter().any(|i| *i == interface)
    }
}

/// Identity comparison for registered implementors.
pub(crate) fn same_implementor(
    a: &std::sync::Arc<dyn Implementor>,
    b: &std::sync::Arc<dyn Implementor>,
) -> bool {
    std::ptr::addr_eq(std::sync::Arc::as_ptr(a), std::sync::Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_call_args_get_decodes_value() {
        let args = CallArgs::new(vec![json!(5), json!("x")]);
        assert_eq!(args.get::<i32>(0).unwrap(), 5);
        assert_eq!(args.get::<String>(1).unwrap(), "x");
    }

    #[test]
    fn test_call_args_get_missing_index_returns_thrown_error() {
        let args = CallArgs::new(vec![]);
        let err = args.get::<i32>(0).unwrap_err();
        assert!(err.message.contains("argument 0 missing"));
    }

    #[test]
    fn test_call_args_get_wrong_type_returns_thrown_error() {
        let args = CallArgs::new(vec![json!("not a number")]);
        assert!(args.get::<i32>(0).is_err());
    }

    #[test]
    fn test_reply_serializes() {
        assert_eq!(reply(&6).unwrap(), json!(6));
    }
}
