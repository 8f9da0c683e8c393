#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};
use linkmux_frame::{decode_frame, ChannelId, Message, DEFAULT_MAX_PAYLOAD};
use linkmux_protocol::{
    Application, ChannelHandle, Connection, ErrorKind, RestrictionInfo, Scheduler, Transport,
};
use linkmux_transport::{ImportanceId, ImportanceIds, TransportError};

/// In-memory transport that records every message instead of writing it.
#[derive(Default)]
pub struct RecordingTransport {
    log: Mutex<TransportLog>,
}

#[derive(Default)]
pub struct TransportLog {
    /// Messages not yet picked up by [`Pair::pump`].
    pub outbox: Vec<Message>,
    /// Every message ever written, with its importance flag.
    pub sent: Vec<(Message, bool)>,
    pub outstanding: BTreeSet<ImportanceId>,
    pub acked: Vec<ImportanceId>,
    pub ids: ImportanceIds,
    pub fail_writes: bool,
    pub opened: usize,
    pub closed: usize,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn log(&self) -> MutexGuard<'_, TransportLog> {
        self.log.lock().expect("transport log lock")
    }

    pub fn take_outbox(&self) -> Vec<Message> {
        std::mem::take(&mut self.log().outbox)
    }

    pub fn sent(&self) -> Vec<Message> {
        self.log().sent.iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn sent_important(&self) -> Vec<Message> {
        self.log()
            .sent
            .iter()
            .filter(|(_, important)| *important)
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub fn outstanding(&self) -> usize {
        self.log().outstanding.len()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.log().fail_writes = fail;
    }
}

impl Transport for RecordingTransport {
    fn write(
        &self,
        frame: Bytes,
        important: bool,
        _connection: &Connection,
    ) -> linkmux_transport::Result<Option<ImportanceId>> {
        let mut log = self.log();
        if log.fail_writes {
            return Err(TransportError::Shutdown);
        }

        let mut buf = BytesMut::from(&frame[..]);
        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .expect("engine should write valid frames")
            .expect("engine should write whole frames");
        assert!(buf.is_empty(), "one frame per write");
        let message = Message::decode(&frame).expect("engine should write valid messages");

        log.outbox.push(message.clone());
        log.sent.push((message, important));
        if !important {
            return Ok(None);
        }
        let id = log.ids.next_id();
        assert!(log.outstanding.insert(id), "importance id reused while outstanding");
        Ok(Some(id))
    }

    fn ack(&self, id: ImportanceId, _connection: &Connection) {
        let mut log = self.log();
        log.outstanding.remove(&id);
        log.acked.push(id);
    }

    fn on_connection_open(&self, _connection: &Connection) -> linkmux_transport::Result<()> {
        self.log().opened += 1;
        Ok(())
    }

    fn on_connection_close(&self, _connection: &Connection) {
        self.log().closed += 1;
    }
}

/// What the recording application saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Accept(ChannelId),
    Opened(ChannelId),
    Closed(ChannelId),
    Rejected,
    RestrictRequest(ChannelId),
    Restriction(ChannelId, RestrictionInfo),
    Sample(ChannelId, Bytes),
    Error(ErrorKind, String),
}

pub struct Recorder {
    accept: bool,
    grant_restrict: bool,
    events: Mutex<Vec<AppEvent>>,
    opened: Mutex<Vec<ChannelHandle>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Self::with_policy(true, true)
    }

    pub fn with_policy(accept: bool, grant_restrict: bool) -> Arc<Self> {
        Arc::new(Self {
            accept,
            grant_restrict,
            events: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<AppEvent> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("events lock").clear();
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    pub fn errors(&self) -> Vec<(ErrorKind, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AppEvent::Error(kind, message) => Some((kind, message)),
                _ => None,
            })
            .collect()
    }

    pub fn samples(&self) -> Vec<Bytes> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AppEvent::Sample(_, payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn last_opened(&self) -> Option<ChannelHandle> {
        self.opened.lock().expect("opened lock").last().cloned()
    }

    fn push(&self, event: AppEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}

impl Application for Recorder {
    fn on_channel_accept(&self, channel: &ChannelHandle) -> bool {
        self.push(AppEvent::Accept(channel.local_id()));
        self.accept
    }

    fn on_channel_opened(&self, channel: &ChannelHandle) {
        self.push(AppEvent::Opened(channel.local_id()));
        self.opened.lock().expect("opened lock").push(channel.clone());
    }

    fn on_channel_closed(&self, channel: &ChannelHandle) {
        self.push(AppEvent::Closed(channel.local_id()));
    }

    fn on_channel_rejected(&self, _connection: &Connection) {
        self.push(AppEvent::Rejected);
    }

    fn on_restriction_changed(&self, channel: &ChannelHandle, info: RestrictionInfo) {
        self.push(AppEvent::Restriction(channel.local_id(), info));
    }

    fn on_restrict_request(&self, channel: &ChannelHandle) -> bool {
        self.push(AppEvent::RestrictRequest(channel.local_id()));
        self.grant_restrict
    }

    fn on_sample(&self, channel: &ChannelHandle, payload: Bytes, _important: bool) {
        self.push(AppEvent::Sample(channel.local_id(), payload));
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        self.push(AppEvent::Error(kind, message.to_string()));
    }
}

/// Two connections wired back to back through recording transports and
/// driven by one scheduler on the test thread.
pub struct Pair {
    pub scheduler: Arc<Scheduler>,
    pub left: Connection,
    pub right: Connection,
    pub left_link: Arc<RecordingTransport>,
    pub right_link: Arc<RecordingTransport>,
    pub left_app: Arc<Recorder>,
    pub right_app: Arc<Recorder>,
}

impl Pair {
    pub fn new() -> Self {
        Self::with_apps(Recorder::new(), Recorder::new())
    }

    pub fn with_apps(left_app: Arc<Recorder>, right_app: Arc<Recorder>) -> Self {
        let scheduler = Arc::new(Scheduler::default());
        let left_link = RecordingTransport::new();
        let right_link = RecordingTransport::new();
        let left = Connection::open(
            Arc::clone(&scheduler),
            left_link.clone(),
            Some(left_app.clone() as Arc<dyn Application>),
        )
        .expect("left connection should open");
        let right = Connection::open(
            Arc::clone(&scheduler),
            right_link.clone(),
            Some(right_app.clone() as Arc<dyn Application>),
        )
        .expect("right connection should open");
        Self {
            scheduler,
            left,
            right,
            left_link,
            right_link,
            left_app,
            right_app,
        }
    }

    /// Run events and carry messages across until both sides are quiet.
    /// Returns how many messages were carried.
    pub fn pump(&self) -> usize {
        let mut carried = 0;
        loop {
            self.scheduler.run_until_idle();
            let to_right = self.left_link.take_outbox();
            let to_left = self.right_link.take_outbox();
            if to_right.is_empty() && to_left.is_empty() {
                return carried;
            }
            carried += to_right.len() + to_left.len();
            for message in to_right {
                self.right.deliver(message).expect("right should accept delivery");
            }
            for message in to_left {
                self.left.deliver(message).expect("left should accept delivery");
            }
        }
    }

    /// Run pending events without carrying any messages.
    pub fn run(&self) {
        self.scheduler.run_until_idle();
    }

    /// Open a channel from the left side and return both ends.
    pub fn open_channel(&self) -> (ChannelHandle, ChannelHandle) {
        self.left.open_channel().expect("open_channel should schedule");
        self.pump();
        let left = self.left_app.last_opened().expect("left side should see the channel open");
        let right = self
            .right_app
            .last_opened()
            .expect("right side should see the channel open");
        (left, right)
    }
}
