//! The demo calculator service.

use callwire_core::{EventHub, ServiceBuilder, ServiceDefinition};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

pub fn calculator() -> (ServiceDefinition, EventHub) {
    let hub = EventHub::new();
    let definition = ServiceBuilder::new("Calculator")
        .method("Add", |a: i64, b: i64| -> anyhow::Result<i64> {
            a.checked_add(b)
                .ok_or_else(|| anyhow::anyhow!("{} + {} overflows", a, b))
        })
        .method("Echo", |text: String| -> anyhow::Result<String> { Ok(text) })
        .async_method("Sleep", |millis: u64| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            anyhow::Ok(millis)
        })
        .with_events(hub.clone())
        .build();
    (definition, hub)
}

/// Raise `Ticked(count)` every `period`.
pub fn spawn_ticker(hub: EventHub, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        let mut count: u64 = 0;
        loop {
            interval.tick().await;
            count += 1;
            match hub.raise("Ticked", (count,)) {
                Ok(receivers) => debug!("Tick {} sent to {} sessions", count, receivers),
                Err(e) => debug!("Tick {} not sent: {}", count, e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use callwire_core::format::encode;
    use callwire_core::{
        Dispatcher, JsonFormatter, Request, Signature, StatusCode, TypeMode, TypeTag,
        ValueConverter,
    };
    use std::sync::Arc;

    fn add_request(a: i64, b: i64) -> Request {
        let formatter = JsonFormatter;
        Request::new(
            "Add",
            vec![encode(&formatter, &a).unwrap(), encode(&formatter, &b).unwrap()],
            Signature::for_tags(
                TypeMode::Strong,
                &[TypeTag::of::<i64>(), TypeTag::of::<i64>()],
                &[],
            ),
        )
    }

    #[tokio::test]
    async fn test_add_and_overflow() {
        let (definition, _hub) = calculator();
        let dispatcher = Dispatcher::new(definition);
        let converter = ValueConverter::new(Arc::new(JsonFormatter));

        let response = dispatcher.dispatch(&converter, &add_request(2, 3)).await;
        assert_eq!(response.payload, Some(b"5".to_vec()));

        let response = dispatcher.dispatch(&converter, &add_request(i64::MAX, 1)).await;
        assert_eq!(response.status, StatusCode::InternalServerError);
    }

    #[test]
    fn test_calculator_has_events() {
        let (definition, _hub) = calculator();
        assert!(definition.events().is_some());
        assert_eq!(definition.method_names(), vec!["Add", "Echo", "Sleep"]);
    }
}
