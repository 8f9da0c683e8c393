mod common;

use bytes::Bytes;
use common::{AppEvent, Pair};
use linkmux_frame::{Message, CHANNEL_ID_NOT_SET, SEQNO_NONE};
use linkmux_protocol::{ConnectionState, ErrorKind, ProtocolError};

#[test]
fn close_tears_down_every_channel() {
    let pair = Pair::new();
    // More channels than one event can depend on.
    let count = 25;
    for _ in 0..count {
        pair.open_channel();
    }
    assert_eq!(pair.left.channel_count(), count);
    pair.left_app.clear();
    pair.right_app.clear();

    pair.left.close().expect("close should schedule");
    pair.pump();

    assert_eq!(pair.left.state(), ConnectionState::Closed);
    assert_eq!(pair.left.channel_count(), 0);
    assert_eq!(pair.left_link.log().closed, 1);
    assert_eq!(
        pair.left_app.count(|e| matches!(e, AppEvent::Closed(_))),
        count
    );

    assert_eq!(pair.right.state(), ConnectionState::Open);
    assert_eq!(pair.right.channel_count(), 0);
    assert_eq!(
        pair.right_app.count(|e| matches!(e, AppEvent::Closed(_))),
        count
    );
    assert!(pair.right_app.errors().is_empty());
}

#[test]
fn close_is_idempotent() {
    let pair = Pair::new();
    pair.open_channel();
    pair.left.close().expect("close");
    pair.left.close().expect("second close is a no-op");
    pair.pump();
    pair.left.close().expect("close after closed is a no-op");
    pair.pump();

    assert_eq!(pair.left_link.log().closed, 1);
    assert_eq!(pair.left_app.count(|e| matches!(e, AppEvent::Closed(_))), 1);
}

#[test]
fn close_releases_packets_in_flight() {
    let pair = Pair::new();
    let (left, _right) = pair.open_channel();
    left.send("never acked", true).expect("send");
    pair.run();
    assert_eq!(pair.left_link.outstanding(), 1);

    pair.left.close().expect("close");
    pair.run();

    assert_eq!(pair.left_link.outstanding(), 0);
    assert_eq!(pair.left.state(), ConnectionState::Closed);
}

#[test]
fn closed_connection_ignores_traffic() {
    let pair = Pair::new();
    let (left, right) = pair.open_channel();
    pair.left.close().expect("close");
    pair.pump();
    pair.left_app.clear();

    pair.left
        .deliver(Message::DataSample {
            src: right.local_id(),
            dest: left.local_id(),
            seqno: SEQNO_NONE,
            important: false,
            payload: Bytes::from_static(b"late"),
        })
        .expect("delivery to a closed connection is dropped");
    pair.run();
    assert!(pair.left_app.events().is_empty());
    assert!(pair.left_link.take_outbox().is_empty());

    let err = left.send("late", false).expect_err("send must be refused");
    assert!(matches!(
        err,
        ProtocolError::ConnectionState {
            state: ConnectionState::Closed,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::ConnectionState);
}

#[test]
fn request_during_close_is_refused() {
    let pair = Pair::new();
    pair.open_channel();
    pair.right_app.clear();

    pair.right.close().expect("close");
    let event = pair.scheduler.pop().expect("close event should be queued");
    pair.scheduler.execute(event);
    assert_eq!(pair.right.state(), ConnectionState::Closing);

    pair.right
        .deliver(Message::ChannelRequest {
            src: 5,
            dest: CHANNEL_ID_NOT_SET,
        })
        .expect("closing connection still takes traffic");
    pair.run();

    assert_eq!(pair.right.state(), ConnectionState::Closed);
    assert!(pair
        .right_link
        .sent()
        .contains(&Message::ChannelResponse {
            src: CHANNEL_ID_NOT_SET,
            dest: 5,
            ack: false,
        }));
    assert_eq!(
        pair.right_app
            .errors()
            .iter()
            .filter(|(kind, _)| *kind == ErrorKind::ChannelRefused)
            .count(),
        1
    );
    assert_eq!(pair.right_app.count(|e| matches!(e, AppEvent::Accept(_))), 0);
}

#[test]
fn connections_sharing_a_scheduler_stay_isolated() {
    let pair = Pair::new();
    let (left, right) = pair.open_channel();
    assert_ne!(pair.left.id(), pair.right.id());
    assert!(!pair.left.ptr_eq(&pair.right));
    assert!(left.connection().ptr_eq(&pair.left));
    assert!(right.connection().ptr_eq(&pair.right));

    let weak = pair.left.downgrade();
    assert!(weak
        .upgrade()
        .is_some_and(|conn| conn.ptr_eq(&pair.left)));
}
