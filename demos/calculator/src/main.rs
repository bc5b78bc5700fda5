use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use hubcall::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

const I64: ParamType = ParamType::Primitive("i64");

const CALCULATOR: Interface = Interface {
    name: "Calculator",
    methods: &[
        MethodSpec {
            name: "add",
            action: 1,
            params: &[I64, I64],
            returns: Returns::Value(I64),
        },
        MethodSpec {
            name: "add",
            action: 2,
            params: &[ParamType::Array(&I64)],
            returns: Returns::Value(I64),
        },
        MethodSpec {
            name: "divide",
            action: 3,
            params: &[I64, I64],
            returns: Returns::Value(I64),
        },
    ],
};

const AUDIT: Interface = Interface {
    name: "Audit",
    methods: &[MethodSpec {
        name: "computed",
        action: 1,
        params: &[ParamType::Reference("String"), I64],
        returns: Returns::Void,
    }],
};

fn calculator() -> RemoteName {
    RemoteName::new("calculator", &CALCULATOR)
}

fn audit() -> RemoteName {
    RemoteName::new("audit", &AUDIT)
}

#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
#[error("cannot divide {dividend} by zero")]
struct DivideByZero {
    dividend: i64,
}

// ---------------------------------------------------------------------------
// Implementors
// ---------------------------------------------------------------------------

/// Lives on the hub node. Announces every result on the audit channel.
struct Calculator {
    audit: ChannelBroadcaster<WebSocketServer>,
}

impl Calculator {
    fn compute(method: &MethodSpec, args: &CallArgs) -> Result<i64, ThrownError> {
        match method.action {
            1 => Ok(args.get::<i64>(0)? + args.get::<i64>(1)?),
            2 => Ok(args.get::<Vec<i64>>(0)?.iter().sum()),
            _ => {
                let (dividend, divisor) = (args.get::<i64>(0)?, args.get::<i64>(1)?);
                if divisor == 0 {
                    return Err(ThrownError::new(&DivideByZero { dividend }));
                }
                Ok(dividend / divisor)
            }
        }
    }
}

impl Implementor for Calculator {
    fn interfaces(&self) -> &'static [&'static Interface] {
        &[&CALCULATOR]
    }

    fn invoke<'a>(
        &'a self,
        ctx: CallContext,
        method: &'static MethodSpec,
        args: CallArgs,
    ) -> BoxFuture<'a, Result<Value, ThrownError>> {
        Box::pin(async move {
            let result = Self::compute(method, &args)?;
            tracing::info!(invoker = %ctx.invoker, %method, result, "computed");
            let entry = Args::new()
                .with(&method.name)
                .and_then(|args| args.with(&result))
                .map_err(|e| ThrownError::msg(e.to_string()))?;
            if let Err(e) = self.audit.broadcast("computed", entry).await {
                tracing::warn!(error = %e, "audit broadcast failed");
            }
            reply(&result)
        })
    }
}

/// Keeps the audit trail it hears about.
#[derive(Default)]
struct AuditLog {
    entries: Mutex<Vec<(String, i64)>>,
}

impl AuditLog {
    fn entries(&self) -> Vec<(String, i64)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Implementor for AuditLog {
    fn interfaces(&self) -> &'static [&'static Interface] {
        &[&AUDIT]
    }

    fn invoke<'a>(
        &'a self,
        _ctx: CallContext,
        _method: &'static MethodSpec,
        args: CallArgs,
    ) -> BoxFuture<'a, Result<Value, ThrownError>> {
        Box::pin(async move {
            let entry = (args.get::<String>(0)?, args.get::<i64>(1)?);
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(entry);
            Ok(Value::Null)
        })
    }
}

// ---------------------------------------------------------------------------
// Typed client
// ---------------------------------------------------------------------------

struct CalculatorClient<M: NodeMessenger> {
    proxy: RemoteProxy<M>,
}

impl<M: NodeMessenger> CalculatorClient<M> {
    fn new(remotes: &RemoteMessenger<M>) -> Result<Self, HubcallError> {
        Ok(Self {
            proxy: remotes.get_remote(&calculator())?,
        })
    }

    async fn add(&self, a: i64, b: i64) -> Result<i64, HubcallError> {
        self.proxy.call("add", Args::new().with(&a)?.with(&b)?).await
    }

    async fn sum(&self, values: &[i64]) -> Result<i64, HubcallError> {
        self.proxy
            .call("add", Args::new().with(&values.to_vec())?)
            .await
    }

    async fn divide(&self, a: i64, b: i64) -> Result<i64, HubcallError> {
        self.proxy
            .call("divide", Args::new().with(&a)?.with(&b)?)
            .await
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Starts the hub node and registers the calculator on it.
async fn start_hub(
    transport: WebSocketServer,
) -> Result<UnifiedMessenger<WebSocketServer>, HubcallError> {
    let hub = UnifiedMessenger::new(transport)?;
    let audit = ChannelMessenger::new(hub.clone()).get_channel_broadcaster(&audit())?;
    RemoteMessenger::new(hub.clone())
        .register_remote(Arc::new(Calculator { audit }), &calculator())
        .await?;
    Ok(hub)
}

/// Connects a client node that listens on the audit channel.
async fn start_client(
    addr: &str,
) -> Result<(UnifiedMessenger<WebSocketClient>, Arc<AuditLog>), HubcallError> {
    let client = UnifiedMessenger::new(WebSocketClient::connect(addr).await?)?;
    let log = Arc::new(AuditLog::default());
    ChannelMessenger::new(client.clone())
        .register_channel_subscriber(Arc::clone(&log) as Arc<dyn Implementor>, &audit())
        .await?;
    Ok((client, log))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8080".to_owned());
    eprintln!("starting calculator hub on {addr}");

    let transport = WebSocketServer::bind(&addr).await?;
    let addr = transport.local_addr().to_string();
    let hub = start_hub(transport).await?;
    let (client, log) = start_client(&addr).await?;
    if let Some(directory) = hub.hub() {
        directory
            .wait_for_nodes_to_implement("audit", Duration::from_secs(5))
            .await;
    }

    let calc = CalculatorClient::new(&RemoteMessenger::new(client))?;
    eprintln!("2 + 3 = {}", calc.add(2, 3).await?);
    eprintln!("sum [1, 2, 3, 4] = {}", calc.sum(&[1, 2, 3, 4]).await?);
    match calc.divide(7, 0).await {
        Ok(value) => eprintln!("7 / 0 = {value}"),
        Err(e) => match e.thrown::<DivideByZero>() {
            Some(refused) => eprintln!("remote refused: {refused}"),
            None => return Err(e.into()),
        },
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    for (method, result) in log.entries() {
        eprintln!("audit: {method} = {result}");
    }
    Ok(())
}
