// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! End-to-end routing over TCP between router clients

use bytes::Bytes;
use mcrouter::{
    ClientConfig, ClientEvent, ControlSignal, DescriptorCatalog, NotifyCommand, ResultCode,
    RoleAddress, RouterClient, RouterHandle, RouterSettings, ServiceDescriptor, TimerManager,
    spawn_router,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn server() -> RoleAddress {
    RoleAddress::new("Calc", "Server1")
}

fn viewer() -> RoleAddress {
    RoleAddress::new("Calc", "Viewer")
}

async fn start_router() -> (RouterHandle, String) {
    let catalog: DescriptorCatalog = vec![
        ServiceDescriptor::new("Calc")
            .with_request(5, Some(105))
            .with_attribute(10),
    ]
    .into_iter()
    .collect();
    let (router, _task) = spawn_router(
        RouterSettings {
            listen_address: Some("127.0.0.1:0".to_string()),
            ..RouterSettings::default()
        },
        catalog,
        CancellationToken::new(),
    );
    assert!(router.control(ControlSignal::Start).await.unwrap());
    let address = router.listen_address().await.unwrap().unwrap();
    (router, address.to_string())
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("client stopped")
}

async fn wait_for_subscriptions(router: &RouterHandle, count: usize) {
    tokio::time::timeout(WAIT, async {
        loop {
            let status = router.status().await.unwrap();
            let subscriptions: usize = status.providers.iter().map(|p| p.subscriptions).sum();
            if subscriptions == count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscription never reached the router");
}

#[tokio::test]
async fn test_provider_and_consumer_over_tcp() {
    let (router, address) = start_router().await;
    let timers = TimerManager::new();

    let (provider, mut provider_events) = RouterClient::start(ClientConfig::new(&address), &timers);
    let (consumer, mut consumer_events) = RouterClient::start(ClientConfig::new(&address), &timers);
    assert_eq!(next_event(&mut provider_events).await, ClientEvent::Connected);
    assert_eq!(next_event(&mut consumer_events).await, ClientEvent::Connected);

    provider.register_provider(server()).await.unwrap();
    assert_eq!(
        next_event(&mut provider_events).await,
        ClientEvent::Registered {
            provider: server(),
            result: ResultCode::ServiceConnected
        }
    );

    consumer.connect_consumer(viewer(), server()).await.unwrap();
    assert_eq!(
        next_event(&mut consumer_events).await,
        ClientEvent::ServiceStatus {
            provider: server(),
            consumer: viewer(),
            connected: true
        }
    );
    assert_eq!(
        next_event(&mut provider_events).await,
        ClientEvent::ConsumerStatus {
            provider: server(),
            consumer: viewer(),
            connected: true
        }
    );

    // Attribute notification
    consumer
        .notify(viewer(), server(), 10, NotifyCommand::Start)
        .await
        .unwrap();
    wait_for_subscriptions(&router, 1).await;
    provider.push_attribute(server(), 10, vec![42]).await.unwrap();
    match next_event(&mut consumer_events).await {
        ClientEvent::Data(data) => {
            assert_eq!(data.source, server());
            assert_eq!(data.message_id, 10);
            assert_eq!(data.result, ResultCode::DataOk);
            assert_eq!(data.payload, Bytes::from_static(&[42]));
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Request and response
    consumer.request(viewer(), server(), 5, 1, vec![2, 3]).await.unwrap();
    let request = match next_event(&mut provider_events).await {
        ClientEvent::Request(request) => request,
        other => panic!("unexpected event {:?}", other),
    };
    assert_eq!(request.source, viewer());
    let response = mcrouter::Envelope::response_to(&request, ResultCode::DataOk, vec![5]);
    provider.send(response).await.unwrap();
    match next_event(&mut consumer_events).await {
        ClientEvent::Data(data) => {
            assert_eq!(data.message_id, 105);
            assert_eq!(data.sequence_nr, 1);
            assert_eq!(data.payload, Bytes::from_static(&[5]));
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Provider goes away
    provider.shutdown().await.unwrap();
    assert_eq!(
        next_event(&mut consumer_events).await,
        ClientEvent::ServiceStatus {
            provider: server(),
            consumer: viewer(),
            connected: false
        }
    );

    consumer.request(viewer(), server(), 5, 2, Bytes::new()).await.unwrap();
    match next_event(&mut consumer_events).await {
        ClientEvent::Data(data) => {
            assert_eq!(data.result, ResultCode::ServiceUnavailable);
            assert_eq!(data.sequence_nr, 2);
        }
        other => panic!("unexpected event {:?}", other),
    }

    consumer.shutdown().await.unwrap();
    router.control(ControlSignal::Shutdown).await.unwrap();
}

#[tokio::test]
async fn test_consumer_waits_for_late_provider() {
    let (router, address) = start_router().await;
    let timers = TimerManager::new();

    let (consumer, mut consumer_events) = RouterClient::start(ClientConfig::new(&address), &timers);
    assert_eq!(next_event(&mut consumer_events).await, ClientEvent::Connected);
    consumer.connect_consumer(viewer(), server()).await.unwrap();
    assert_eq!(
        next_event(&mut consumer_events).await,
        ClientEvent::ServiceStatus {
            provider: server(),
            consumer: viewer(),
            connected: false
        }
    );

    let (provider, mut provider_events) = RouterClient::start(ClientConfig::new(&address), &timers);
    assert_eq!(next_event(&mut provider_events).await, ClientEvent::Connected);
    provider.register_provider(server()).await.unwrap();

    assert_eq!(
        next_event(&mut consumer_events).await,
        ClientEvent::ServiceStatus {
            provider: server(),
            consumer: viewer(),
            connected: true
        }
    );
    router.control(ControlSignal::Shutdown).await.unwrap();
}
