use super::*;
use serde_json::json;

fn before(id: &str) -> AbilityEvent {
    AbilityEvent::BeforeAbility {
        ability_id: id.to_string(),
        args: json!({"x": 1}),
        user_id: Some(UserId(3)),
    }
}

#[test]
fn test_event_names() {
    let generic = AbilityEvent::BeforeExecute {
        ability_id: "acme/run".to_string(),
        args: json!({}),
        user_id: None,
    };
    assert_eq!(generic.name(), "before_execute");
    assert_eq!(before("acme/run").name(), "before_execute/acme/run");

    let after = AbilityEvent::AfterAbility {
        ability_id: "acme/run".to_string(),
        args: json!({}),
        result: Ok(json!(true)),
        user_id: None,
    };
    assert_eq!(after.name(), "after_execute/acme/run");
    assert_eq!(after.result(), Some(&Ok(json!(true))));
    assert!(generic.result().is_none());
}

#[tokio::test]
async fn test_callbacks_run_in_registration_order() {
    let bus = InProcHookBus::new();
    let seen = Arc::new(RwLock::new(Vec::new()));

    for label in ["first", "second"] {
        let seen = seen.clone();
        bus.on(
            "before_execute/acme/run",
            Arc::new(move |event: &AbilityEvent| {
                seen.write().push(format!("{}:{}", label, event.ability_id()));
            }),
        )
        .await;
    }

    bus.fire(before("acme/run")).await;
    bus.fire(before("acme/other")).await;

    assert_eq!(
        *seen.read(),
        vec!["first:acme/run".to_string(), "second:acme/run".to_string()]
    );
}

#[tokio::test]
async fn test_off_removes_callbacks() {
    let bus = InProcHookBus::new();
    bus.on("before_execute", Arc::new(|_: &AbilityEvent| {})).await;
    assert_eq!(bus.listener_count("before_execute"), 1);

    bus.off("before_execute").await;
    assert_eq!(bus.listener_count("before_execute"), 0);
}

#[tokio::test]
async fn test_broadcast_observer_receives_events() {
    let bus = InProcHookBus::new();
    let mut rx = bus.subscribe();

    bus.fire(before("acme/run")).await;

    let event = rx.recv().await.unwrap();
    assert_eq!(event.name(), "before_execute/acme/run");
    assert_eq!(event.user_id(), Some(UserId(3)));
    assert_eq!(event.args(), &json!({"x": 1}));
}

#[tokio::test]
async fn test_fire_without_listeners() {
    let bus = InProcHookBus::new();
    bus.fire(before("acme/run")).await;
    assert_eq!(bus.listener_count("before_execute/acme/run"), 0);
}
