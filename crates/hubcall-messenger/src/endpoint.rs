//! Named local call targets with ordered dispatch.
//!
//! An [`Endpoint`] holds every local implementor registered under one
//! name. Calls are numbered with tickets when they are *issued* and run
//! when their number comes up, so a single sender's calls reach the
//! implementors in the order they were made, however the tasks carrying
//! them get scheduled.
//!
//! ```text
//!   take_ticket() ──► 0   1   2   3
//!   now serving   ──► 0 ─► 1 ─► 2 ─► 3
//!                     run  run  run  run
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::join_all;
use hubcall_protocol::{
    Interface, InvocationResult, MethodCall, RemoteFailure, ThrownError,
};
use hubcall_transport::NodeId;
use tokio::sync::watch;

use crate::implementor::same_implementor;
use crate::{CallArgs, CallContext, Implementor, MessengerError};

/// A named, locally registered multi-implementor call target.
pub struct Endpoint {
    name: String,
    interface: &'static Interface,
    single_threaded: bool,
    implementors: Mutex<Vec<Arc<dyn Implementor>>>,
    next_ticket: AtomicU64,
    /// The ticket allowed to run next.
    now_serving: watch::Sender<u64>,
}

impl Endpoint {
    /// Creates an endpoint with no implementors.
    ///
    /// In single-threaded mode calls run strictly one after another in
    /// ticket order, and each call visits implementors sequentially. In
    /// parallel mode calls don't wait for their turn and implementors run
    /// concurrently.
    pub fn new(
        name: impl Into<String>,
        interface: &'static Interface,
        single_threaded: bool,
    ) -> Self {
        let (now_serving, _) = watch::channel(0);
        Self {
            name: name.into(),
            interface,
            single_threaded,
            implementors: Mutex::new(Vec::new()),
            next_ticket: AtomicU64::new(0),
            now_serving,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interface(&self) -> &'static Interface {
        self.interface
    }

    pub fn is_single_threaded(&self) -> bool {
        self.single_threaded
    }

    /// Returns `true` if an endpoint created with these arguments would
    /// behave the same as this one.
    pub fn is_equivalent(
        &self,
        interface: &Interface,
        single_threaded: bool,
    ) -> bool {
        self.interface == interface && self.single_threaded == single_threaded
    }

    /// Hands out the next ticket. Strictly increasing.
    ///
    /// Take it at the moment the call is issued, before handing the call
    /// to another task.
    pub fn take_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers an implementor.
    ///
    /// # Errors
    /// `NotImplementing` if it doesn't satisfy the endpoint's interface.
    pub fn add_implementor(
        &self,
        implementor: Arc<dyn Implementor>,
    ) -> Result<(), MessengerError> {
        if !implementor.implements(self.interface) {
            return Err(MessengerError::NotImplementing {
                endpoint: self.name.clone(),
                interface: self.interface.name,
            });
        }
        self.lock().push(implementor);
        Ok(())
    }

    /// Unregisters an implementor. Returns `true` if none are left.
    ///
    /// # Errors
    /// `NotRegistered` if it was never added.
    pub fn remove_implementor(
        &self,
        implementor: &Arc<dyn Implementor>,
    ) -> Result<bool, MessengerError> {
        let mut implementors = self.lock();
        let index = implementors
            .iter()
            .position(|i| same_implementor(i, implementor))
            .ok_or_else(|| MessengerError::NotRegistered {
                endpoint: self.name.clone(),
            })?;
        implementors.remove(index);
        Ok(implementors.is_empty())
    }

    /// Snapshot of the registered implementors.
    pub fn implementors(&self) -> Vec<Arc<dyn Implementor>> {
        self.lock().clone()
    }

    pub fn implementor_count(&self) -> usize {
        self.lock().len()
    }

    pub fn has_implementors(&self) -> bool {
        !self.lock().is_empty()
    }

    /// Runs `call` against every registered implementor and returns one
    /// result per implementor (empty if there are none).
    ///
    /// Waits until `ticket` is being served first, unless the endpoint is
    /// parallel. A failing or panicking implementor yields a failure
    /// result and doesn't stop the others.
    ///
    /// The future must be driven to completion: a ticket that is waited
    /// on and then dropped is never released. The messenger always runs
    /// this inside a spawned task.
    pub async fn invoke_local(
        &self,
        call: &MethodCall,
        ticket: u64,
        invoker: NodeId,
    ) -> Vec<InvocationResult> {
        if self.single_threaded {
            let mut serving = self.now_serving.subscribe();
            // The sender lives in `self`, so this only fails if we're gone.
            let _ = serving.wait_for(|now| *now >= ticket).await;
        }
        let _turn = Turn {
            now_serving: &self.now_serving,
            ticket,
        };

        let implementors = self.implementors();
        let ctx = CallContext {
            endpoint: self.name.clone(),
            invoker,
        };

        if self.single_threaded {
            let mut results = Vec::with_capacity(implementors.len());
            for implementor in &implementors {
                results.push(self.run_one(implementor, ctx.clone(), call).await);
            }
            results
        } else {
            join_all(
                implementors
                    .iter()
                    .map(|implementor| self.run_one(implementor, ctx.clone(), call)),
            )
            .await
        }
    }

    async fn run_one(
        &self,
        implementor: &Arc<dyn Implementor>,
        ctx: CallContext,
        call: &MethodCall,
    ) -> InvocationResult {
        let Some(method) = call.resolve(self.interface) else {
            tracing::warn!(
                endpoint = %self.name,
                method = %call.method,
                "no method matches call"
            );
            return InvocationResult::Failure(RemoteFailure::NoSuchMethod {
                interface: call.interface.clone(),
                method: call.method.clone(),
            });
        };

        let args = CallArgs::new(call.args.clone());
        let invocation = async { implementor.invoke(ctx, method, args).await };
        match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(outcome) => {
                if let Err(thrown) = &outcome {
                    tracing::warn!(
                        endpoint = %self.name,
                        %method,
                        error = %thrown,
                        "implementor returned an error"
                    );
                }
                InvocationResult::from(outcome)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    endpoint = %self.name,
                    %method,
                    panic = %message,
                    "implementor panicked"
                );
                InvocationResult::Failure(RemoteFailure::Thrown(
                    ThrownError::panic(message),
                ))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn Implementor>>> {
        self.implementors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("interface", &self.interface.name)
            .field("single_threaded", &self.single_threaded)
            .field("implementors", &self.implementor_count())
            .finish()
    }
}

/// Releases the next ticket when the current call finishes, including
/// by unwinding.
struct Turn<'a> {
    now_serving: &'a watch::Sender<u64>,
    ticket: u64,
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        let next = self.ticket + 1;
        self.now_serving.send_modify(|now| *now = (*now).max(next));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "implementor panicked".to_owned()
    }
}
