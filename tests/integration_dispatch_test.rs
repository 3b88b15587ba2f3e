// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Routing behaviour of the dispatch core across several channels

use bytes::Bytes;
use mcrouter::{
    Cookie, Delivery, DescriptorCatalog, Envelope, MessageType, NotifyCommand, ResultCode,
    RoleAddress, RouterCore, ServiceDescriptor,
};

fn server() -> RoleAddress {
    RoleAddress::new("Calc", "Server1")
}

fn consumer(role: &str) -> RoleAddress {
    RoleAddress::new("Calc", role)
}

fn core() -> RouterCore {
    let catalog: DescriptorCatalog = vec![
        ServiceDescriptor::new("Calc")
            .with_request(5, Some(105))
            .with_response(105)
            .with_attribute(10),
    ]
    .into_iter()
    .collect();
    RouterCore::new(catalog)
}

/// Core with provider `server()` registered on its own channel
fn core_with_provider() -> (RouterCore, Cookie) {
    let mut core = core();
    let p = core.attach_channel("10.0.0.1:4000");
    let out = core.dispatch(p, Envelope::provider_connect(server()));
    assert_eq!(out[0].envelope.result, ResultCode::ServiceConnected);
    (core, p)
}

fn to(out: &[Delivery], cookie: Cookie) -> Vec<&Envelope> {
    out.iter()
        .filter(|d| d.cookie == cookie)
        .map(|d| &d.envelope)
        .collect()
}

#[test]
fn test_attribute_push_reaches_subscriber() {
    let (mut core, p) = core_with_provider();
    let a = core.attach_channel("10.0.0.2:4000");

    let out = core.dispatch(
        a,
        Envelope::notify_request(consumer("A"), server(), 10, NotifyCommand::Start),
    );
    assert!(out.is_empty());

    let out = core.dispatch(p, Envelope::attribute_push(server(), 10, vec![42]));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].cookie, a);
    assert_eq!(out[0].envelope.message_id, 10);
    assert_eq!(out[0].envelope.result, ResultCode::DataOk);
    assert_eq!(out[0].envelope.payload, Bytes::from_static(&[42]));
    assert_eq!(out[0].envelope.target, consumer("A"));
}

#[test]
fn test_request_without_provider_is_answered() {
    let mut core = core();
    let c = core.attach_channel("10.0.0.2:4000");

    let request = Envelope::request(consumer("Client"), server(), 5, 3, Bytes::new());
    let out = core.dispatch(c, request);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].cookie, c);
    assert_eq!(out[0].envelope.message_type, MessageType::Response);
    assert_eq!(out[0].envelope.message_id, 5);
    assert_eq!(out[0].envelope.sequence_nr, 3);
    assert_eq!(out[0].envelope.result, ResultCode::ServiceUnavailable);
}

#[test]
fn test_request_to_any_unregistered_service_is_answered_once() {
    let mut core = core();
    let c = core.attach_channel("10.0.0.2:4000");

    for (service, role) in [("Calc", "Server2"), ("Echo", "Main"), ("Echo", "")] {
        let target = RoleAddress::new(service, role);
        let out = core.dispatch(c, Envelope::request(consumer("Client"), target, 5, 1, Bytes::new()));
        assert_eq!(out.len(), 1, "{}@{}", service, role);
        assert_eq!(out[0].cookie, c);
        assert_eq!(out[0].envelope.result, ResultCode::ServiceUnavailable);
    }
}

#[test]
fn test_notify_always_resubscribe_resends_cached_value() {
    let (mut core, p) = core_with_provider();
    let a = core.attach_channel("10.0.0.2:4000");
    let subscribe = Envelope::notify_request(consumer("A"), server(), 10, NotifyCommand::StartAlways);

    core.dispatch(a, subscribe.clone());
    let out = core.dispatch(p, Envelope::attribute_push(server(), 10, vec![42]));
    assert_eq!(to(&out, a).len(), 1);

    let out = core.dispatch(a, subscribe);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].cookie, a);
    assert_eq!(out[0].envelope.payload, Bytes::from_static(&[42]));
    assert_eq!(out[0].envelope.result, ResultCode::DataOk);
}

#[test]
fn test_provider_loss_notifies_subscriber_then_requests_fail() {
    let (mut core, p) = core_with_provider();
    let a = core.attach_channel("10.0.0.2:4000");
    core.dispatch(
        a,
        Envelope::notify_request(consumer("A"), server(), 10, NotifyCommand::Start),
    );

    let out = core.detach_channel(p);
    let notices = to(&out, a);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message_type, MessageType::Disconnect);
    assert_eq!(notices[0].source, server());
    assert_eq!(notices[0].target, consumer("A"));

    let out = core.dispatch(a, Envelope::request(consumer("A"), server(), 5, 1, Bytes::new()));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].envelope.result, ResultCode::ServiceUnavailable);
}

#[test]
fn test_at_most_one_live_provider_per_address() {
    let mut core = core();
    let p = core.attach_channel("10.0.0.1:4000");
    let q = core.attach_channel("10.0.0.3:4000");

    core.dispatch(p, Envelope::provider_connect(server()));
    assert_eq!(core.registry().lookup_provider(&server()), Some(p));

    let out = core.dispatch(q, Envelope::provider_connect(server()));
    assert_eq!(out[0].envelope.result, ResultCode::RequestError);
    assert_eq!(core.registry().lookup_provider(&server()), Some(p));

    // Only the owner can unregister
    core.dispatch(q, Envelope::provider_disconnect(server()));
    assert_eq!(core.registry().lookup_provider(&server()), Some(p));

    core.dispatch(p, Envelope::provider_disconnect(server()));
    assert_eq!(core.registry().lookup_provider(&server()), None);

    core.dispatch(q, Envelope::provider_connect(server()));
    assert_eq!(core.registry().lookup_provider(&server()), Some(q));

    core.detach_channel(q);
    assert_eq!(core.registry().lookup_provider(&server()), None);

    core.dispatch(p, Envelope::provider_connect(server()));
    assert_eq!(core.registry().lookup_provider(&server()), Some(p));
    assert_eq!(core.registry().provider_count(), 1);
}

#[test]
fn test_fan_out_reaches_every_subscriber_exactly_once() {
    let (mut core, p) = core_with_provider();
    let subscribers: Vec<Cookie> = (0..3)
        .map(|i| core.attach_channel(format!("10.0.1.{}:4000", i)))
        .collect();
    let bystander = core.attach_channel("10.0.2.1:4000");

    for (i, cookie) in subscribers.iter().enumerate() {
        core.dispatch(
            *cookie,
            Envelope::notify_request(consumer(&format!("S{}", i)), server(), 10, NotifyCommand::Start),
        );
    }

    let out = core.dispatch(p, Envelope::attribute_push(server(), 10, vec![1]));
    assert_eq!(out.len(), subscribers.len());
    for cookie in &subscribers {
        let got = to(&out, *cookie);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload, Bytes::from_static(&[1]));
    }
    assert!(to(&out, bystander).is_empty());

    // Same value while the cache is valid
    let out = core.dispatch(p, Envelope::attribute_push(server(), 10, vec![1]));
    assert!(out.is_empty());

    // Same value after an invalidation is a real change
    let out = core.dispatch(p, Envelope::attribute_invalidate(server(), 10));
    assert_eq!(out.len(), subscribers.len());
    assert!(out.iter().all(|d| d.envelope.result == ResultCode::DataInvalid));
    let out = core.dispatch(p, Envelope::attribute_push(server(), 10, vec![1]));
    assert_eq!(out.len(), subscribers.len());
}

#[test]
fn test_disconnect_notifies_each_subscribed_channel_once() {
    let (mut core, p) = core_with_provider();
    let a = core.attach_channel("10.0.0.2:4000");
    let b = core.attach_channel("10.0.0.3:4000");

    core.dispatch(a, Envelope::notify_request(consumer("A"), server(), 10, NotifyCommand::Start));
    core.dispatch(a, Envelope::notify_request(consumer("A"), server(), 105, NotifyCommand::Start));
    core.dispatch(b, Envelope::notify_request(consumer("B"), server(), 10, NotifyCommand::Start));

    let out = core.detach_channel(p);
    assert_eq!(core.registry().lookup_provider(&server()), None);
    for cookie in [a, b] {
        let notices: Vec<_> = to(&out, cookie)
            .into_iter()
            .filter(|e| e.message_type == MessageType::Disconnect)
            .collect();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].result, ResultCode::DataInvalid);
    }
}

#[test]
fn test_pending_request_is_canceled_on_provider_loss() {
    let (mut core, p) = core_with_provider();
    let c = core.attach_channel("10.0.0.2:4000");
    core.dispatch(c, Envelope::request(consumer("Client"), server(), 5, 8, Bytes::new()));

    let out = core.detach_channel(p);
    let got = to(&out, c);
    let canceled: Vec<_> = got
        .iter()
        .filter(|e| e.message_type == MessageType::Response)
        .collect();
    assert_eq!(canceled.len(), 1);
    assert_eq!(canceled[0].result, ResultCode::RequestCanceled);
    assert_eq!(canceled[0].sequence_nr, 8);
    assert_eq!(core.registry().pending_count(), 0);
}

#[test]
fn test_resubscribe_does_not_duplicate_delivery() {
    let (mut core, p) = core_with_provider();
    let a = core.attach_channel("10.0.0.2:4000");
    let subscribe = Envelope::notify_request(consumer("A"), server(), 10, NotifyCommand::Start);

    core.dispatch(a, subscribe.clone());
    core.dispatch(a, subscribe);
    let entry = core.registry().provider(&server()).unwrap();
    assert_eq!(entry.subscription_count(), 1);

    let out = core.dispatch(p, Envelope::attribute_push(server(), 10, vec![7]));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].cookie, a);
}

#[test]
fn test_subscribe_to_request_id_is_rejected() {
    let (mut core, _p) = core_with_provider();
    let a = core.attach_channel("10.0.0.2:4000");

    let out = core.dispatch(a, Envelope::notify_request(consumer("A"), server(), 5, NotifyCommand::Start));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].envelope.result, ResultCode::InvalidIdentifier);
    assert_eq!(core.registry().provider(&server()).unwrap().subscription_count(), 0);
}

#[test]
fn test_provider_reply_keeping_request_id_is_answered() {
    let (mut core, p) = core_with_provider();
    let c = core.attach_channel("10.0.0.2:4000");

    let request = Envelope::request(consumer("Client"), server(), 5, 12, vec![3]);
    core.dispatch(c, request.clone());
    assert_eq!(core.registry().pending_count(), 1);

    let out = core.dispatch(p, Envelope::response_to(&request, ResultCode::DataOk, vec![4]));
    let got = to(&out, c);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].message_id, 105);
    assert_eq!(got[0].sequence_nr, 12);
    assert_eq!(got[0].target, consumer("Client"));
    assert_eq!(core.registry().pending_count(), 0);
}

#[test]
fn test_other_channel_cannot_answer_for_provider() {
    let (mut core, p) = core_with_provider();
    let c = core.attach_channel("10.0.0.2:4000");
    let other = core.attach_channel("10.0.0.9:4000");

    let request = Envelope::request(consumer("Client"), server(), 5, 1, Bytes::new());
    core.dispatch(c, request.clone());

    let out = core.dispatch(other, Envelope::response_to(&request, ResultCode::DataOk, Bytes::new()));
    assert!(out.is_empty());
    assert_eq!(core.registry().pending_count(), 1);

    // Provider loss still cancels the request the intruder tried to take
    let out = core.detach_channel(p);
    assert!(to(&out, c).iter().any(|e| e.result == ResultCode::RequestCanceled));
}
