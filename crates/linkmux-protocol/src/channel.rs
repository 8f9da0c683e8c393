use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use linkmux_frame::{ChannelId, SampleRegistry, Seqno, CHANNEL_ID_NOT_SET, SEQNO_MAX, SEQNO_NONE};
use linkmux_transport::ImportanceId;

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created, handshake not finished.
    Ready,
    /// Both ids known and the application notified.
    Open,
    /// The peer broke the protocol on this channel; sends are refused.
    Error,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Ready => f.write_str("ready"),
            ChannelState::Open => f.write_str("open"),
            ChannelState::Error => f.write_str("error"),
        }
    }
}

/// The sequence number following `seqno`. Wraps from the maximum to 1,
/// skipping the reserved "no importance" value.
pub fn next_seqno(seqno: Seqno) -> Seqno {
    if seqno >= SEQNO_MAX || seqno < SEQNO_NONE {
        1
    } else {
        seqno + 1
    }
}

/// Point-in-time view of a channel, for inspection and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub local_id: ChannelId,
    pub remote_id: Option<ChannelId>,
    pub state: ChannelState,
    pub current_seqno: Seqno,
    pub remote_seqno: Seqno,
    pub restricted_local: bool,
    pub restricted_remote: bool,
    /// Importance id of the packet awaiting acknowledgement, if any.
    pub in_flight: Option<ImportanceId>,
    /// Important sends waiting behind the one in flight.
    pub queued: usize,
    /// Important sends held while the channel is restricted.
    pub held: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InFlightKind {
    /// An important data sample with this sequence number.
    Sample(Seqno),
    /// A handshake or restriction message, released by the peer's reply.
    Control,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct InFlight {
    pub id: ImportanceId,
    pub kind: InFlightKind,
}

/// An important send waiting for the channel's single flight slot.
#[derive(Debug)]
pub(crate) enum Pending {
    Sample(Bytes),
    Restrict(bool),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AckOutcome {
    /// Matches the packet in flight: release it.
    Release(ImportanceId),
    /// Already handled or older than the current packet.
    Stale,
    /// Ahead of anything this side has sent.
    Mismatch,
}

pub(crate) struct Channel {
    pub local_id: ChannelId,
    pub remote_id: ChannelId,
    pub state: ChannelState,
    pub current_seqno: Seqno,
    pub remote_seqno: Seqno,
    pub restricted_local: bool,
    pub restricted_remote: bool,
    pub in_flight: Option<InFlight>,
    pub queue: VecDeque<Pending>,
    pub held: VecDeque<Bytes>,
    pub input: Arc<Mutex<SampleRegistry>>,
}

impl Channel {
    pub fn new(local_id: ChannelId) -> Self {
        Self {
            local_id,
            remote_id: CHANNEL_ID_NOT_SET,
            state: ChannelState::Ready,
            current_seqno: SEQNO_NONE,
            remote_seqno: SEQNO_NONE,
            restricted_local: false,
            restricted_remote: false,
            in_flight: None,
            queue: VecDeque::new(),
            held: VecDeque::new(),
            input: Arc::new(Mutex::new(SampleRegistry::new())),
        }
    }

    pub fn remote(&self) -> Option<ChannelId> {
        (self.remote_id != CHANNEL_ID_NOT_SET).then_some(self.remote_id)
    }

    /// Both sides agreed to hold important traffic.
    pub fn is_restricted(&self) -> bool {
        self.restricted_local && self.restricted_remote
    }

    /// Advance and return the sequence number for the next important sample.
    pub fn assign_seqno(&mut self) -> Seqno {
        self.current_seqno = next_seqno(self.current_seqno);
        self.current_seqno
    }

    pub fn classify_ack(&self, seqno: Seqno) -> AckOutcome {
        match self.in_flight {
            Some(InFlight {
                id,
                kind: InFlightKind::Sample(sent),
            }) if sent == seqno && seqno == self.current_seqno => AckOutcome::Release(id),
            _ if seqno <= self.current_seqno => AckOutcome::Stale,
            _ => AckOutcome::Mismatch,
        }
    }

    /// Accept an inbound important sequence number if it is the next one
    /// expected. Duplicates and gaps are refused.
    pub fn accept_important(&mut self, seqno: Seqno) -> bool {
        if seqno == next_seqno(self.remote_seqno) {
            self.remote_seqno = seqno;
            true
        } else {
            false
        }
    }

    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            local_id: self.local_id,
            remote_id: self.remote(),
            state: self.state,
            current_seqno: self.current_seqno,
            remote_seqno: self.remote_seqno,
            restricted_local: self.restricted_local,
            restricted_remote: self.restricted_remote,
            in_flight: self.in_flight.map(|f| f.id),
            queued: self.queue.len(),
            held: self.held.len(),
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("local_id", &self.local_id)
            .field("remote_id", &self.remote())
            .field("state", &self.state)
            .field("current_seqno", &self.current_seqno)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}
