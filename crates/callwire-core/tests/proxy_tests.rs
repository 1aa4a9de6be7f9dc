//! Tests for the client-side proxy: typed adapters, generic calls,
//! blocking calls, and retries.

use callwire_core::{
    remote_proxy, CallwireError, ClientConfig, ClientSession, Dispatcher, EventHub,
    MemoryConnector, MemoryListener, ProxyConfig, RemoteProxy, RemoteType, RetryPolicy, RpcServer,
    ServerConfig, ServerHandle, ServiceBuilder, StatusCode, SyncCallMode, TypeMode, TypePattern,
    TypeTag,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Point {
    x: i64,
    y: i64,
}

impl RemoteType for Point {}

remote_proxy! {
    struct ShapesProxy {
        fn translate(point: Point, dx: i64) -> Point = "Translate";
        fn count() -> u32 = "Count";
        event "Moved"(Point) => on_moved, off_moved;
    }
}

struct Fixture {
    _server: ServerHandle,
    hub: EventHub,
    flaky_calls: Arc<AtomicU32>,
    connector: MemoryConnector,
}

fn start() -> Fixture {
    let hub = EventHub::new();
    let flaky_calls = Arc::new(AtomicU32::new(0));
    let calls = flaky_calls.clone();

    let service = ServiceBuilder::new("Shapes")
        .method("Translate", |point: Point, dx: i64| -> anyhow::Result<Point> {
            Ok(Point {
                x: point.x + dx,
                y: point.y,
            })
        })
        .method("Count", || -> anyhow::Result<u32> { Ok(3) })
        .method("Flaky", move || -> anyhow::Result<String> {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("not yet");
            }
            Ok("done".to_string())
        })
        .generic_method("Identity", 1, vec![TypePattern::Generic(0)])
        .instance(vec![TypeTag::of::<i64>()], |x: i64| -> anyhow::Result<i64> { Ok(x) })
        .instance(vec![TypeTag::of::<String>()], |x: String| -> anyhow::Result<String> {
            Ok(x)
        })
        .finish()
        .generic_method("Describe", 1, vec![TypePattern::Generic(0)])
        .async_instance(vec![TypeTag::of::<i64>()], |x: i64| async move {
            tokio::task::yield_now().await;
            anyhow::Ok(format!("integer {}", x))
        })
        .finish()
        .with_events(hub.clone())
        .build();

    let listener = MemoryListener::new();
    let connector = listener.connector();
    let dispatcher = Arc::new(Dispatcher::new(service));
    let server = RpcServer::start(listener, dispatcher, ServerConfig::new());
    Fixture {
        _server: server,
        hub,
        flaky_calls,
        connector,
    }
}

async fn connected(fixture: &Fixture, config: ProxyConfig) -> RemoteProxy {
    let session = ClientSession::new(fixture.connector.transport(), ClientConfig::new());
    session.connect().await.unwrap();
    RemoteProxy::with_config(session, config)
}

#[tokio::test]
async fn test_generated_proxy_calls_and_events() {
    let fixture = start();
    let shapes = ShapesProxy::new(connected(&fixture, ProxyConfig::new()).await);

    let moved = shapes.translate(Point { x: 1, y: 2 }, 10).await.unwrap();
    assert_eq!(moved, Point { x: 11, y: 2 });
    assert_eq!(shapes.count().await.unwrap(), 3);

    tokio::time::timeout(Duration::from_secs(5), async {
        while fixture.hub.subscriber_count() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = shapes.on_moved(move |(point,): (Point,)| {
        let _ = tx.send(point);
    });
    fixture.hub.raise("Moved", (Point { x: 4, y: 5 },)).unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap();
    assert_eq!(received, Some(Point { x: 4, y: 5 }));

    assert!(shapes.off_moved(id));
    assert!(!shapes.proxy().session().callbacks().has_event("Moved"));
}

#[tokio::test]
async fn test_generic_method_instances() {
    let fixture = start();
    for mode in [TypeMode::Strong, TypeMode::Weak] {
        let proxy = connected(&fixture, ProxyConfig::new().with_type_mode(mode)).await;

        let number: i64 = proxy
            .call_generic("Identity", &[TypeTag::of::<i64>()], (9i64,))
            .await
            .unwrap();
        assert_eq!(number, 9);

        let text: String = proxy
            .call_generic("Identity", &[TypeTag::of::<String>()], ("nine".to_string(),))
            .await
            .unwrap();
        assert_eq!(text, "nine");

        let missing = proxy
            .call_generic::<bool, _>("Identity", &[TypeTag::of::<bool>()], (true,))
            .await;
        match missing {
            Err(CallwireError::Fault { status, .. }) => assert_eq!(status, StatusCode::BadRequest),
            other => panic!("expected BadRequest fault, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_async_generic_instance() {
    let fixture = start();
    for mode in [TypeMode::Strong, TypeMode::Weak] {
        let proxy = connected(&fixture, ProxyConfig::new().with_type_mode(mode)).await;
        let described: String = proxy
            .call_generic("Describe", &[TypeTag::of::<i64>()], (5i64,))
            .await
            .unwrap();
        assert_eq!(described, "integer 5");
    }
}

#[tokio::test]
async fn test_retry_policy_recovers_from_server_errors() {
    let fixture = start();
    let policy = RetryPolicy::new()
        .with_max_retries(3)
        .with_initial_delay(Duration::from_millis(1))
        .with_jitter(false);
    let proxy = connected(&fixture, ProxyConfig::new().with_retry(policy)).await;

    let result: String = proxy.call("Flaky", ()).await.unwrap();
    assert_eq!(result, "done");
    assert_eq!(fixture.flaky_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_without_retry_the_fault_surfaces() {
    let fixture = start();
    let proxy = connected(&fixture, ProxyConfig::new()).await;

    let result = proxy.call::<String, _>("Flaky", ()).await;
    match result {
        Err(CallwireError::Fault {
            status, message, ..
        }) => {
            assert_eq!(status, StatusCode::InternalServerError);
            assert_eq!(message, "not yet");
        }
        other => panic!("expected InternalServerError fault, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_calls_from_sync_code() {
    let fixture = start();
    for mode in [SyncCallMode::DedicatedTask, SyncCallMode::BlockOn] {
        let proxy = connected(&fixture, ProxyConfig::new().with_sync_mode(mode)).await;
        let count = tokio::task::spawn_blocking(move || proxy.call_blocking::<u32, _>("Count", ()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count, 3);
    }
}

#[test]
fn test_blocking_call_from_plain_thread_with_runtime() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let (_fixture, proxy) = runtime.block_on(async {
        let fixture = start();
        let session = ClientSession::new(fixture.connector.transport(), ClientConfig::new());
        session.connect().await.unwrap();
        let proxy = RemoteProxy::with_config(
            session,
            ProxyConfig::new().with_runtime(runtime.handle().clone()),
        );
        (fixture, proxy)
    });

    let moved = std::thread::spawn(move || {
        proxy.call_blocking::<Point, _>("Translate", (Point { x: 0, y: 0 }, 1i64))
    })
    .join()
    .unwrap()
    .unwrap();
    assert_eq!(moved, Point { x: 1, y: 0 });
}
