mod common;

use std::sync::Arc;

use common::{AppEvent, Pair, Recorder, RecordingTransport};
use linkmux_frame::{Message, CHANNEL_ID_NOT_SET};
use linkmux_protocol::{
    Application, ChannelState, Connection, ConnectionState, ErrorKind, ProtocolError, Scheduler,
};

#[test]
fn open_and_accept() {
    let pair = Pair::new();
    pair.left.open_channel().expect("open_channel should schedule");
    pair.pump();

    assert_eq!(pair.left_app.events(), vec![AppEvent::Opened(0)]);
    assert_eq!(
        pair.right_app.events(),
        vec![AppEvent::Accept(0), AppEvent::Opened(0)]
    );

    let left = pair.left.channel(0).expect("left channel should exist");
    assert_eq!(left.state, ChannelState::Open);
    assert_eq!(left.remote_id, Some(0));
    let right = pair.right.channel(0).expect("right channel should exist");
    assert_eq!(right.state, ChannelState::Open);
    assert_eq!(right.remote_id, Some(0));

    // Request and response were important and both got released.
    assert_eq!(pair.left_link.sent_important().len(), 1);
    assert_eq!(pair.right_link.sent_important().len(), 1);
    assert_eq!(pair.left_link.outstanding(), 0);
    assert_eq!(pair.right_link.outstanding(), 0);
}

#[test]
fn request_carries_unset_destination() {
    let pair = Pair::new();
    pair.left.open_channel().expect("open_channel should schedule");
    pair.run();

    assert_eq!(
        pair.left_link.sent(),
        vec![Message::ChannelRequest {
            src: 0,
            dest: CHANNEL_ID_NOT_SET
        }]
    );
    let info = pair.left.channel(0).expect("channel should be provisional");
    assert_eq!(info.state, ChannelState::Ready);
    assert!(info.in_flight.is_some());
}

#[test]
fn rejected_request_leaves_no_channel() {
    let pair = Pair::with_apps(Recorder::new(), Recorder::with_policy(false, true));
    pair.left.open_channel().expect("open_channel should schedule");
    pair.pump();

    assert_eq!(pair.left_app.events(), vec![AppEvent::Rejected]);
    assert_eq!(pair.right_app.events(), vec![AppEvent::Accept(0)]);
    assert_eq!(pair.left.channel_count(), 0);
    assert_eq!(pair.right.channel_count(), 0);

    let acks = |msgs: Vec<Message>| {
        msgs.iter()
            .filter(|m| matches!(m, Message::ChannelAck { .. }))
            .count()
    };
    assert_eq!(acks(pair.left_link.sent()), 0);
    assert_eq!(acks(pair.right_link.sent()), 0);
    assert!(pair.right_link.sent_important().is_empty(), "reject is not important");
    assert_eq!(pair.left_link.outstanding(), 0);
}

#[test]
fn missing_application_refuses_requests() {
    let scheduler = Arc::new(Scheduler::default());
    let left_link = RecordingTransport::new();
    let right_link = RecordingTransport::new();
    let left_app = Recorder::new();
    let left = Connection::open(
        Arc::clone(&scheduler),
        left_link.clone(),
        Some(left_app.clone() as Arc<dyn Application>),
    )
    .expect("left should open");
    let right =
        Connection::open(Arc::clone(&scheduler), right_link.clone(), None).expect("right should open");

    left.open_channel().expect("open_channel should schedule");
    scheduler.run_until_idle();
    for message in left_link.take_outbox() {
        right.deliver(message).expect("deliver");
    }
    scheduler.run_until_idle();
    for message in right_link.take_outbox() {
        left.deliver(message).expect("deliver");
    }
    scheduler.run_until_idle();

    assert_eq!(left_app.events(), vec![AppEvent::Rejected]);
    assert_eq!(right.channel_count(), 0);
    assert_eq!(left.channel_count(), 0);
}

#[test]
fn duplicate_request_is_a_protocol_error() {
    let pair = Pair::new();
    pair.open_channel();
    pair.right_app.clear();

    pair.right
        .deliver(Message::ChannelRequest {
            src: 0,
            dest: CHANNEL_ID_NOT_SET,
        })
        .expect("deliver");
    pair.run();

    let errors = pair.right_app.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, ErrorKind::ProtocolState);
    assert_eq!(pair.right.channel_count(), 1);
    assert!(pair.right_link.take_outbox().is_empty());
}

#[test]
fn repeated_response_repeats_channel_ack() {
    let pair = Pair::new();
    pair.open_channel();
    pair.left_app.clear();

    pair.left
        .deliver(Message::ChannelResponse {
            src: 0,
            dest: 0,
            ack: true,
        })
        .expect("deliver");
    pair.run();

    assert_eq!(
        pair.left_link.take_outbox(),
        vec![Message::ChannelAck {
            src: 0,
            dest: 0,
            ack: true
        }]
    );
    assert!(pair.left_app.events().is_empty(), "no second opened notification");
}

#[test]
fn response_for_unknown_channel_is_reported() {
    let pair = Pair::new();
    pair.left
        .deliver(Message::ChannelResponse {
            src: 4,
            dest: 9,
            ack: true,
        })
        .expect("deliver");
    pair.run();

    let errors = pair.left_app.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, ErrorKind::ProtocolState);
}

#[test]
fn close_notifies_both_sides() {
    let pair = Pair::new();
    let (left, right) = pair.open_channel();
    pair.left_app.clear();
    pair.right_app.clear();

    left.close().expect("close should schedule");
    pair.pump();

    assert_eq!(pair.left_app.events(), vec![AppEvent::Closed(left.local_id())]);
    assert_eq!(pair.right_app.events(), vec![AppEvent::Closed(right.local_id())]);
    assert_eq!(pair.left.channel_count(), 0);
    assert_eq!(pair.right.channel_count(), 0);
    assert!(left.state().is_none());
}

#[test]
fn closing_unknown_channel_is_reported() {
    let pair = Pair::new();
    let (left, _right) = pair.open_channel();
    left.close().expect("close should schedule");
    pair.pump();
    pair.left_app.clear();

    left.close().expect("close should schedule");
    pair.run();

    let errors = pair.left_app.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, ErrorKind::ProtocolState);
}

#[test]
fn channel_ids_are_not_reused() {
    let pair = Pair::new();
    let (first, _) = pair.open_channel();
    first.close().expect("close should schedule");
    pair.pump();

    let (second, _) = pair.open_channel();
    let (third, _) = pair.open_channel();
    assert_eq!(first.local_id(), 0);
    assert_eq!(second.local_id(), 1);
    assert_eq!(third.local_id(), 2);
}

#[test]
fn remote_and_local_ids_mirror() {
    let pair = Pair::new();
    // A request that never leaves still consumes a local id, so the two
    // allocators drift apart.
    pair.left_link.fail_writes(true);
    pair.left.open_channel().expect("open_channel should schedule");
    pair.run();
    pair.left_link.fail_writes(false);
    assert_eq!(pair.left_app.errors()[0].0, ErrorKind::TransportSocket);

    let (left, right) = pair.open_channel();
    assert_eq!(left.local_id(), 1);
    assert_eq!(right.local_id(), 0);
    assert_eq!(left.remote_id(), Some(right.local_id()));
    assert_eq!(right.remote_id(), Some(left.local_id()));

    let (left, right) = pair.open_channel();
    assert_eq!(left.local_id(), 2);
    assert_eq!(right.local_id(), 1);
    assert_eq!(left.remote_id(), Some(right.local_id()));
    assert_eq!(right.remote_id(), Some(left.local_id()));
}

#[test]
fn open_channel_on_closed_connection_fails() {
    let pair = Pair::new();
    pair.left.close().expect("close should schedule");
    pair.pump();
    assert_eq!(pair.left.state(), ConnectionState::Closed);

    let err = pair
        .left
        .open_channel()
        .expect_err("closed connection must refuse");
    assert!(matches!(err, ProtocolError::ConnectionState { .. }));
    assert_eq!(err.kind(), ErrorKind::ConnectionState);
}
