//! Integration tests for routing calls between messengers.
//!
//! Every test builds a small star network in memory: one server
//! messenger (which owns the hub) and one or more client messengers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use hubcall_messenger::{
    CallArgs, CallContext, Implementor, MessengerConfig, UnifiedMessenger, reply,
};
use hubcall_protocol::{
    Args, Interface, InvocationResult, JsonCodec, MethodCall, MethodSpec,
    ParamType, RemoteFailure, RemoteName, Returns, ThrownError,
};
use hubcall_transport::{MemoryMessenger, MemoryNetwork, NodeId};
use serde_json::{Value, json};

type Messenger = UnifiedMessenger<MemoryMessenger>;

const STEP: Duration = Duration::from_secs(5);

const I32: ParamType = ParamType::Primitive("i32");

const CALCULATOR: Interface = Interface {
    name: "Calculator",
    methods: &[
        MethodSpec {
            name: "increment",
            action: 1,
            params: &[I32],
            returns: Returns::Value(I32),
        },
        MethodSpec {
            name: "record",
            action: 2,
            params: &[I32],
            returns: Returns::Void,
        },
    ],
};

/// Adds one and remembers who asked.
#[derive(Default)]
struct Calculator {
    calls: Mutex<Vec<(String, i32, NodeId)>>,
    delay: Duration,
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
            let n: i32 = args.get(0)?;
            tokio::time::sleep(self.delay).await;
            self.calls
                .lock()
                .unwrap()
                .push((method.name.to_owned(), n, ctx.invoker));
            match method.name {
                "increment" => reply(&(n + 1)),
                _ => Ok(Value::Null),
            }
        })
    }
}

fn calc() -> RemoteName {
    RemoteName::new("calc", &CALCULATOR)
}

fn call(method: usize, n: i32) -> MethodCall {
    MethodCall::new(
        &calc(),
        &CALCULATOR.methods[method],
        Args::new().with(&n).unwrap(),
    )
}

fn fast_config() -> MessengerConfig {
    MessengerConfig {
        poll_interval: Duration::from_millis(5),
        ..MessengerConfig::default()
    }
}

fn cluster(clients: usize) -> (MemoryNetwork, Messenger, Vec<Messenger>) {
    let (network, server) = MemoryNetwork::new();
    let server =
        UnifiedMessenger::with_config(server, JsonCodec, fast_config()).unwrap();
    let clients = (0..clients)
        .map(|_| {
            UnifiedMessenger::with_config(network.join(), JsonCodec, fast_config())
                .unwrap()
        })
        .collect();
    (network, server, clients)
}

async fn wait_registered(server: &Messenger, endpoint: &str) {
    assert!(
        server
            .hub()
            .unwrap()
            .wait_for_nodes_to_implement(endpoint, STEP)
            .await
    );
}

#[tokio::test]
async fn test_invoke_and_wait_client_to_client_through_hub() {
    let (_network, server, clients) = cluster(2);
    let calculator = Arc::new(Calculator::default());
    clients[0]
        .add_implementor(&calc(), Arc::clone(&calculator) as Arc<dyn Implementor>, false)
        .await
        .unwrap();
    wait_registered(&server, "calc").await;

    let result = tokio::time::timeout(STEP, clients[1].invoke_and_wait(call(0, 5)))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result, InvocationResult::Value(json!(6)));
    let calls = calculator.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![("increment".to_owned(), 5, clients[1].local_node())]
    );
    assert_eq!(server.hub().unwrap().in_flight_count(), 0);
}

#[tokio::test]
async fn test_invoke_and_wait_server_calls_client_implementor() {
    let (_network, server, clients) = cluster(1);
    clients[0]
        .add_implementor(&calc(), Arc::new(Calculator::default()), false)
        .await
        .unwrap();
    wait_registered(&server, "calc").await;

    let result = tokio::time::timeout(STEP, server.invoke_and_wait(call(0, 41)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, InvocationResult::Value(json!(42)));
}

#[tokio::test]
async fn test_invoke_and_wait_client_calls_server_implementor() {
    let (_network, server, clients) = cluster(1);
    let calculator = Arc::new(Calculator::default());
    server
        .add_implementor(&calc(), Arc::clone(&calculator) as Arc<dyn Implementor>, false)
        .await
        .unwrap();

    let result = tokio::time::timeout(STEP, clients[0].invoke_and_wait(call(0, 1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, InvocationResult::Value(json!(2)));
    assert_eq!(calculator.calls.lock().unwrap()[0].2, clients[0].local_node());
}

#[tokio::test]
async fn test_invoke_and_wait_no_implementor_returns_remote_not_found() {
    let (_network, _server, clients) = cluster(1);

    let result = tokio::time::timeout(STEP, clients[0].invoke_and_wait(call(0, 1)))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        result,
        InvocationResult::Failure(RemoteFailure::RemoteNotFound { endpoint }) if endpoint == "calc"
    ));
}

#[tokio::test]
async fn test_invoke_reaches_every_node_once() {
    let (_network, server, clients) = cluster(2);
    let on_server = Arc::new(Calculator::default());
    let on_a = Arc::new(Calculator::default());
    let on_b = Arc::new(Calculator::default());
    server
        .add_implementor(&calc(), Arc::clone(&on_server) as Arc<dyn Implementor>, true)
        .await
        .unwrap();
    clients[0]
        .add_implementor(&calc(), Arc::clone(&on_a) as Arc<dyn Implementor>, true)
        .await
        .unwrap();
    clients[1]
        .add_implementor(&calc(), Arc::clone(&on_b) as Arc<dyn Implementor>, true)
        .await
        .unwrap();
    tokio::time::timeout(STEP, async {
        while server.hub().unwrap().implementors_of("calc").len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    clients[0].invoke(call(1, 9)).await.unwrap();

    // The caller's own implementor ran before invoke returned.
    assert_eq!(on_a.calls.lock().unwrap().len(), 1);
    tokio::time::timeout(STEP, async {
        while on_server.calls.lock().unwrap().is_empty()
            || on_b.calls.lock().unwrap().is_empty()
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    for calculator in [&on_server, &on_a, &on_b] {
        let calls = calculator.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("record".to_owned(), 9, clients[0].local_node())]);
    }
}

#[tokio::test]
async fn test_implementor_disconnect_releases_waiting_caller() {
    let (network, server, clients) = cluster(2);
    let slow = Calculator {
        delay: Duration::from_secs(5),
        ..Calculator::default()
    };
    clients[0]
        .add_implementor(&calc(), Arc::new(slow), false)
        .await
        .unwrap();
    wait_registered(&server, "calc").await;

    let caller = clients[1].clone();
    let waiting = tokio::spawn(async move { caller.invoke_and_wait(call(0, 1)).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    network.disconnect(clients[0].local_node());

    let result = tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .expect("caller should be released well before the implementor finishes")
        .unwrap()
        .unwrap();
    assert!(matches!(
        result,
        InvocationResult::Failure(RemoteFailure::ConnectionLost { .. })
    ));
    assert!(!server.hub().unwrap().has_implementors("calc"));
}

#[tokio::test]
async fn test_remove_implementor_on_client_withdraws_from_hub() {
    let (_network, server, clients) = cluster(1);
    let calculator: Arc<dyn Implementor> = Arc::new(Calculator::default());
    clients[0]
        .add_implementor(&calc(), Arc::clone(&calculator), false)
        .await
        .unwrap();
    wait_registered(&server, "calc").await;

    clients[0].remove_implementor("calc", &calculator).await.unwrap();

    tokio::time::timeout(STEP, async {
        while server.hub().unwrap().has_implementors("calc") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

async fn wait_hub_agrees(server: &Messenger, endpoint: &str, listed: bool) {
    let hub = server.hub().unwrap();
    tokio::time::timeout(STEP, async {
        while hub.has_implementors(endpoint) != listed {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("hub never showed {endpoint} listed={listed}"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replacing_implementor_concurrently_keeps_hub_listing() {
    let (_network, server, clients) = cluster(1);
    let client = &clients[0];

    for _ in 0..20 {
        let outgoing: Arc<dyn Implementor> = Arc::new(Calculator::default());
        let incoming: Arc<dyn Implementor> = Arc::new(Calculator::default());
        client
            .add_implementor(&calc(), Arc::clone(&outgoing), false)
            .await
            .unwrap();
        wait_hub_agrees(&server, "calc", true).await;

        let removing = {
            let client = client.clone();
            tokio::spawn(async move { client.remove_implementor("calc", &outgoing).await })
        };
        let adding = {
            let client = client.clone();
            let incoming = Arc::clone(&incoming);
            tokio::spawn(async move { client.add_implementor(&calc(), incoming, false).await })
        };
        removing.await.unwrap().unwrap();
        adding.await.unwrap().unwrap();

        assert_eq!(client.local_implementor_count("calc"), 1);
        wait_hub_agrees(&server, "calc", true).await;

        client.remove_implementor("calc", &incoming).await.unwrap();
        wait_hub_agrees(&server, "calc", false).await;
    }
}

#[tokio::test]
async fn test_slow_implementor_does_not_stall_other_endpoints() {
    let (_network, server, clients) = cluster(2);
    let slow = Arc::new(Calculator {
        delay: Duration::from_secs(3),
        ..Calculator::default()
    });
    let quick = RemoteName::new("quick", &CALCULATOR);
    clients[0]
        .add_implementor(&calc(), slow as Arc<dyn Implementor>, false)
        .await
        .unwrap();
    clients[0]
        .add_implementor(&quick, Arc::new(Calculator::default()), false)
        .await
        .unwrap();
    wait_registered(&server, "calc").await;
    wait_registered(&server, "quick").await;

    let caller = clients[1].clone();
    let stuck = tokio::spawn(async move { caller.invoke_and_wait(call(0, 1)).await });
    // Let the slow call reach its implementor first.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let quick_call = MethodCall::new(
        &quick,
        &CALCULATOR.methods[0],
        Args::new().with(&41).unwrap(),
    );
    let result = tokio::time::timeout(
        Duration::from_secs(1),
        clients[1].invoke_and_wait(quick_call),
    )
    .await
    .expect("quick call waited behind the slow one")
    .unwrap();
    assert_eq!(result, InvocationResult::Value(json!(42)));
    assert!(!stuck.is_finished());
    stuck.abort();
}
