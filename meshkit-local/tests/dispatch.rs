mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedTransport, ok, status, timeout};
use meshkit_local::{CommandDispatcher, Device, DispatchError, DispatchOptions};
use meshkit_proto::local::{HEADER_ROOT_RESPONSE, HEADER_TOKEN, RequestEnvelope};

fn dispatcher(transport: &Arc<ScriptedTransport>) -> CommandDispatcher<ScriptedTransport> {
    CommandDispatcher::new(
        transport.clone(),
        DispatchOptions {
            token: Some("user-token".into()),
            ..DispatchOptions::default()
        },
    )
}

fn macs(list: &[&str]) -> Vec<String> {
    list.iter().map(|m| m.to_string()).collect()
}

#[tokio::test]
async fn whitelist_goes_once_to_the_shared_gateway() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.reply("10.0.0.5", ok(r#"{"status_code":0}"#));
    let devices = [
        Device::local("aaaaaaaaaaaa", "10.0.0.5"),
        Device::local("bbbbbbbbbbbb", "10.0.0.5"),
        Device::local("cccccccccccc", "10.0.0.5"),
    ];

    let added = dispatcher(&transport)
        .add_whitelist(&devices, &macs(&["AA:BB:CC", "DD:EE:FF"]))
        .await
        .unwrap();
    assert!(added);

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.host, "10.0.0.5");
    assert_eq!(request.nodes.len(), 3);
    assert_eq!(
        request.envelope,
        RequestEnvelope::add_whitelist(["AA:BB:CC", "DD:EE:FF"])
    );
    let headers = request.headers();
    assert!(headers.contains(&(HEADER_ROOT_RESPONSE, "true".to_string())));
    assert!(headers.contains(&(HEADER_TOKEN, "user-token".to_string())));
}

#[tokio::test]
async fn whitelist_success_follows_the_http_status_only() {
    let transport = Arc::new(ScriptedTransport::default());
    transport
        .reply("10.0.0.5", status(500, "oops"))
        .reply("10.0.0.5", ok("not even json"));
    let devices = [Device::local("aaaaaaaaaaaa", "10.0.0.5")];
    let d = dispatcher(&transport);

    assert!(!d.add_whitelist(&devices, &macs(&["AA"])).await.unwrap());
    assert!(d.add_whitelist(&devices, &macs(&["AA"])).await.unwrap());
}

#[tokio::test]
async fn whitelist_without_response_is_not_retried() {
    let transport = Arc::new(ScriptedTransport::default());
    let devices = [Device::local("aaaaaaaaaaaa", "10.0.0.5")];

    let added = dispatcher(&transport)
        .add_whitelist(&devices, &macs(&["AA"]))
        .await
        .unwrap();
    assert!(!added);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn whitelist_preconditions_send_nothing() {
    let transport = Arc::new(ScriptedTransport::default());
    let d = dispatcher(&transport);

    let split = [
        Device::local("aaaaaaaaaaaa", "10.0.0.5"),
        Device::local("bbbbbbbbbbbb", "10.0.0.6"),
    ];
    assert!(matches!(
        d.add_whitelist(&split, &macs(&["AA"])).await,
        Err(DispatchError::AddressMismatch { .. })
    ));

    let same = [Device::local("aaaaaaaaaaaa", "10.0.0.5")];
    assert!(matches!(
        d.add_whitelist(&same, &[]).await,
        Err(DispatchError::EmptyWhitelist)
    ));
    assert!(matches!(
        d.add_whitelist(&[], &macs(&["AA"])).await,
        Err(DispatchError::EmptyGroup)
    ));

    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn reset_retries_until_a_response_arrives() {
    let transport = Arc::new(ScriptedTransport::default());
    transport
        .reply("10.0.0.7", Err(timeout()))
        .reply("10.0.0.7", Err(timeout()))
        .reply("10.0.0.7", ok(r#"{"status_code":0}"#));
    let mut device = Device::local("aaaaaaaaaaaa", "10.0.0.7");

    let reset = dispatcher(&transport).reset(&mut device, 0).await.unwrap();
    assert!(reset);
    assert!(device.state.is_empty());
    assert_eq!(transport.requests_to("10.0.0.7"), 3);
    assert_eq!(transport.requests()[0].envelope, RequestEnvelope::reset(0));
}

#[tokio::test]
async fn reset_gives_up_after_try_count() {
    let transport = Arc::new(ScriptedTransport::default());
    let mut device = Device::local("aaaaaaaaaaaa", "10.0.0.7");

    let reset = dispatcher(&transport).reset(&mut device, 0).await.unwrap();
    assert!(!reset);
    assert!(!device.state.is_empty());
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test]
async fn reset_with_failing_status_code_keeps_state() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.reply("10.0.0.7", ok(r#"{"status_code":-1}"#));
    let mut device = Device::local("aaaaaaaaaaaa", "10.0.0.7");
    let before = device.state;

    let reset = dispatcher(&transport).reset(&mut device, 0).await.unwrap();
    assert!(!reset);
    assert_eq!(device.state, before);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn unreadable_reset_response_is_a_failure_not_a_retry() {
    let transport = Arc::new(ScriptedTransport::default());
    transport
        .reply("10.0.0.7", ok("<html>busy</html>"))
        .reply("10.0.0.7", ok(r#"{"status_code":0}"#));
    let mut device = Device::local("aaaaaaaaaaaa", "10.0.0.7");

    let reset = dispatcher(&transport).reset(&mut device, 0).await.unwrap();
    assert!(!reset);
    assert!(!device.state.is_empty());
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn reset_refused_by_http_status() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.reply("10.0.0.7", status(403, r#"{"status_code":0}"#));
    let mut device = Device::local("aaaaaaaaaaaa", "10.0.0.7");

    assert!(!dispatcher(&transport).reset(&mut device, 0).await.unwrap());
    assert!(!device.state.is_empty());
}

#[tokio::test]
async fn reset_without_address_is_a_caller_error() {
    let transport = Arc::new(ScriptedTransport::default());
    let mut device = Device::local("aaaaaaaaaaaa", "10.0.0.7");
    device.host = None;

    assert!(matches!(
        dispatcher(&transport).reset(&mut device, 0).await,
        Err(DispatchError::MissingAddress(mac)) if mac == "aaaaaaaaaaaa"
    ));
    assert!(transport.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reset_all_retries_each_device_on_its_own() {
    let transport = Arc::new(ScriptedTransport::default());
    transport
        .reply("10.0.0.1", Err(timeout()))
        .reply("10.0.0.1", ok(r#"{"status_code":0}"#))
        .reply("10.0.0.2", ok(r#"{"status_code":0}"#))
        .reply("10.0.0.3", ok(r#"{"status_code":1}"#));
    let mut offline = Device::local("dddddddddddd", "10.0.0.4");
    offline.host = None;
    let devices = vec![
        Device::local("aaaaaaaaaaaa", "10.0.0.1"),
        Device::local("bbbbbbbbbbbb", "10.0.0.2"),
        Device::local("cccccccccccc", "10.0.0.3"),
        offline,
    ];

    let started = tokio::time::Instant::now();
    let tasks = dispatcher(&transport).reset_all(devices, 5);
    assert_eq!(tasks.len(), 3);
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(transport.requests_to("10.0.0.1"), 2);
    assert_eq!(transport.requests_to("10.0.0.2"), 1);
    // an unconfirmed reset is tried again until attempts run out
    assert_eq!(transport.requests_to("10.0.0.3"), 3);
    assert_eq!(transport.requests_to("10.0.0.4"), 0);
    assert!(
        transport
            .requests()
            .iter()
            .all(|r| r.envelope == RequestEnvelope::reset(5))
    );

    // two one-second pauses for the device that never confirms
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(3));
}
