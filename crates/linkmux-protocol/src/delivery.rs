//! Data samples and important delivery.
//!
//! Each channel has one flight slot. An important sample (or restriction
//! request) occupies it until the peer's reply releases it; later important
//! sends wait in the channel queue. Non-important samples bypass the slot.

use std::sync::{Arc, PoisonError};

use bytes::Bytes;
use linkmux_event::Priority;
use linkmux_frame::{ChannelId, Message, Seqno, SEQNO_NONE};
use tracing::{debug, trace};

use crate::channel::{AckOutcome, Channel, ChannelState, InFlight, InFlightKind, Pending};
use crate::connection::{Connection, ConnectionState};
use crate::error::{ProtocolError, Result};
use crate::event::Op;

impl Connection {
    pub(crate) fn send_now(&self, local_id: ChannelId, payload: Bytes, important: bool) -> Result<()> {
        let mut core = self.lock();
        if core.state != ConnectionState::Open {
            return Err(ProtocolError::ConnectionState {
                state: core.state,
                operation: "send a sample",
            });
        }
        let channel = core
            .channels
            .get_mut(&local_id)
            .ok_or(ProtocolError::UnknownChannel(local_id))?;
        ensure_sendable(channel)?;

        if !important {
            let sample = Message::DataSample {
                src: channel.local_id,
                dest: channel.remote_id,
                seqno: SEQNO_NONE,
                important: false,
                payload,
            };
            self.write(&sample, false)?;
            return Ok(());
        }

        if channel.is_restricted() {
            trace!(connection = self.id(), channel = local_id, "important sample held");
            channel.held.push_back(payload);
            return Ok(());
        }
        if channel.in_flight.is_some() {
            trace!(
                connection = self.id(),
                channel = local_id,
                queued = channel.queue.len() + 1,
                "important sample queued"
            );
            channel.queue.push_back(Pending::Sample(payload));
            return Ok(());
        }
        self.send_important(channel, payload)
    }

    /// Fill a free flight slot from the channel queue.
    pub(crate) fn send_next(&self, local_id: ChannelId) -> Result<()> {
        let mut core = self.lock();
        let Some(channel) = core.channels.get_mut(&local_id) else {
            return Ok(());
        };

        while channel.in_flight.is_none() {
            let Some(pending) = channel.queue.pop_front() else {
                break;
            };
            match pending {
                Pending::Sample(payload) if channel.is_restricted() => {
                    channel.held.push_back(payload);
                }
                Pending::Sample(payload) => self.send_important(channel, payload)?,
                Pending::Restrict(restricted) => self.send_restrict_request(channel, restricted)?,
            }
        }
        Ok(())
    }

    fn send_important(&self, channel: &mut Channel, payload: Bytes) -> Result<()> {
        let previous = channel.current_seqno;
        let seqno = channel.assign_seqno();
        let sample = Message::DataSample {
            src: channel.local_id,
            dest: channel.remote_id,
            seqno,
            important: true,
            payload,
        };

        match self.write(&sample, true) {
            Ok(importance) => {
                channel.in_flight = importance.map(|id| InFlight {
                    id,
                    kind: InFlightKind::Sample(seqno),
                });
                Ok(())
            }
            Err(err) => {
                // The sample never left; do not burn its sequence number.
                channel.current_seqno = previous;
                Err(err)
            }
        }
    }

    pub(crate) fn on_data_sample(
        &self,
        src: ChannelId,
        dest: ChannelId,
        seqno: Seqno,
        important: bool,
        payload: Bytes,
    ) -> Result<()> {
        let (handle, registry, deliver) = {
            let mut core = self.lock();
            let known = core
                .channels
                .get(&dest)
                .is_some_and(|channel| channel.remote_id == src);
            if !known {
                drop(core);
                // Tell the peer to drop whatever it thinks this pair is.
                self.write(&Message::ChannelClose { src: dest, dest: src }, false)?;
                return Err(ProtocolError::protocol_state(format!(
                    "data sample for unknown channel pair {src} -> {dest}"
                )));
            }
            let Some(channel) = core.channels.get_mut(&dest) else {
                return Ok(());
            };
            if channel.state != ChannelState::Open {
                // Left unacknowledged so an important sample is resent.
                return Err(ProtocolError::protocol_state(format!(
                    "data sample for {} channel {dest}",
                    channel.state
                )));
            }

            let deliver = !important || channel.accept_important(seqno);
            (self.handle(channel), Arc::clone(&channel.input), deliver)
        };

        if deliver {
            let lock = || registry.lock().unwrap_or_else(PoisonError::into_inner);
            let typed = {
                let mut registry = lock();
                if registry.is_empty() {
                    None
                } else {
                    Some(registry.checkout(&payload))
                }
            };
            match typed {
                None => {
                    if let Some(app) = self.application() {
                        app.on_sample(&handle, payload, important);
                    }
                }
                // Handlers run with the registry unlocked so they may
                // register or unregister types themselves.
                Some(Ok(mut handler)) => {
                    let result = handler.run(&payload);
                    lock().restore(handler);
                    if let Err(err) = result {
                        self.report(&err.into());
                    }
                }
                Some(Err(err)) => self.report(&err.into()),
            }
        } else {
            debug!(
                connection = self.id(),
                channel = dest,
                seqno,
                "out-of-sequence important sample dropped"
            );
        }

        if important {
            self.write(&Message::Ack { src: dest, dest: src, seqno }, false)?;
        }
        Ok(())
    }

    pub(crate) fn on_ack(&self, src: ChannelId, dest: ChannelId, seqno: Seqno) -> Result<()> {
        let mut core = self.lock();
        let Some(channel) = core.channels.get_mut(&dest) else {
            return Err(ProtocolError::protocol_state(format!(
                "ack for unknown channel {dest}"
            )));
        };
        if channel.remote_id != src {
            return Err(ProtocolError::protocol_state(format!(
                "ack for channel {dest} from remote {src}, expected {}",
                channel.remote_id
            )));
        }

        match channel.classify_ack(seqno) {
            AckOutcome::Release(id) => {
                channel.in_flight = None;
                self.release(id);
                trace!(connection = self.id(), channel = dest, seqno, "important sample acked");
                if !channel.queue.is_empty() {
                    self.schedule(Priority::HIGH, Op::SendNext { channel: dest }, &[])?;
                }
                Ok(())
            }
            AckOutcome::Stale => {
                trace!(connection = self.id(), channel = dest, seqno, "stale ack dropped");
                Ok(())
            }
            AckOutcome::Mismatch => {
                let current = channel.current_seqno;
                channel.state = ChannelState::Error;
                Err(ProtocolError::protocol_state(format!(
                    "ack seqno {seqno} on channel {dest} is ahead of current seqno {current}"
                )))
            }
        }
    }
}

fn ensure_sendable(channel: &Channel) -> Result<()> {
    match channel.state {
        ChannelState::Open => Ok(()),
        state => Err(ProtocolError::protocol_state(format!(
            "cannot send on {state} channel {}",
            channel.local_id
        ))),
    }
}
