//! Channel open and close exchanges.
//!
//! Requester: `channel_request(local, unset)` (important) is answered by
//! `channel_response(remote, local, ack)`, which releases the request. On
//! `ack = true` the requester records the remote id, replies with
//! `channel_ack` and the channel is open.
//!
//! Acceptor: a `channel_request` creates a provisional channel, the
//! application decides, and `channel_response` (important when accepting)
//! goes back. The peer's `channel_ack` releases it and opens the channel.

use linkmux_frame::{ChannelId, Message, CHANNEL_ID_NOT_SET};
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelState, InFlight, InFlightKind};
use crate::connection::{Connection, ConnectionState, Notice};
use crate::error::{ProtocolError, Result};

impl Connection {
    pub(crate) fn open_channel_now(&self) -> Result<()> {
        let mut core = self.lock();
        if core.state != ConnectionState::Open {
            return Err(ProtocolError::ConnectionState {
                state: core.state,
                operation: "open a channel",
            });
        }

        let local_id = core.allocate_channel_id()?;
        let request = Message::ChannelRequest {
            src: local_id,
            dest: CHANNEL_ID_NOT_SET,
        };
        let importance = self.write(&request, true)?;

        let mut channel = Channel::new(local_id);
        channel.in_flight = importance.map(|id| InFlight {
            id,
            kind: InFlightKind::Control,
        });
        core.channels.insert(local_id, channel);
        debug!(connection = self.id(), channel = local_id, "channel requested");
        Ok(())
    }

    pub(crate) fn on_channel_request(&self, src: ChannelId, dest: ChannelId) -> Result<()> {
        let Some(app) = self.application().cloned() else {
            self.write(
                &Message::ChannelResponse {
                    src: CHANNEL_ID_NOT_SET,
                    dest: src,
                    ack: false,
                },
                false,
            )?;
            return Err(ProtocolError::MissingCallback("on_channel_accept"));
        };

        let handle = {
            let mut core = self.lock();
            if core.state != ConnectionState::Open {
                drop(core);
                self.write(
                    &Message::ChannelResponse {
                        src: CHANNEL_ID_NOT_SET,
                        dest: src,
                        ack: false,
                    },
                    false,
                )?;
                return Err(ProtocolError::ChannelRefused {
                    remote: src,
                    reason: "connection is closing",
                });
            }

            let duplicate = (dest != CHANNEL_ID_NOT_SET && core.channels.contains_key(&dest))
                || core.channels.values().any(|c| c.remote_id == src);
            if duplicate {
                return Err(ProtocolError::protocol_state(format!(
                    "duplicate channel request from remote channel {src}"
                )));
            }

            let local_id = core.allocate_channel_id()?;
            let mut channel = Channel::new(local_id);
            channel.remote_id = src;
            let handle = self.handle(&channel);
            core.channels.insert(local_id, channel);
            handle
        };

        // The core is released while the application decides; nothing
        // else mutates it because only the event loop runs protocol code.
        let accepted = app.on_channel_accept(&handle);
        let local_id = handle.local_id();

        let mut core = self.lock();
        if accepted {
            let response = Message::ChannelResponse {
                src: local_id,
                dest: src,
                ack: true,
            };
            match self.write(&response, true) {
                Ok(importance) => {
                    if let Some(channel) = core.channels.get_mut(&local_id) {
                        channel.in_flight = importance.map(|id| InFlight {
                            id,
                            kind: InFlightKind::Control,
                        });
                    }
                    debug!(
                        connection = self.id(),
                        channel = local_id,
                        remote = src,
                        "channel accepted"
                    );
                    Ok(())
                }
                Err(err) => {
                    core.channels.remove(&local_id);
                    Err(err)
                }
            }
        } else {
            core.channels.remove(&local_id);
            drop(core);
            debug!(connection = self.id(), remote = src, "channel request rejected");
            self.write(
                &Message::ChannelResponse {
                    src: local_id,
                    dest: src,
                    ack: false,
                },
                false,
            )?;
            Ok(())
        }
    }

    pub(crate) fn on_channel_response(
        &self,
        src: ChannelId,
        dest: ChannelId,
        ack: bool,
    ) -> Result<()> {
        let mut notices = Vec::new();
        {
            let mut core = self.lock();
            let Some(channel) = core.channels.get_mut(&dest) else {
                return Err(ProtocolError::protocol_state(format!(
                    "channel_response for unknown channel {dest}"
                )));
            };

            if channel.state != ChannelState::Ready {
                if ack && channel.remote_id == src {
                    // Our channel_ack was lost and the peer resent its response.
                    drop(core);
                    debug!(connection = self.id(), channel = dest, "repeating channel_ack");
                    self.write(
                        &Message::ChannelAck {
                            src: dest,
                            dest: src,
                            ack: true,
                        },
                        false,
                    )?;
                    return Ok(());
                }
                return Err(ProtocolError::protocol_state(format!(
                    "unexpected channel_response for {} channel {dest}",
                    channel.state
                )));
            }

            self.release_control(channel)?;

            if ack {
                channel.remote_id = src;
                channel.state = ChannelState::Open;
                let handle = self.handle(channel);
                self.write(
                    &Message::ChannelAck {
                        src: dest,
                        dest: src,
                        ack: true,
                    },
                    false,
                )?;
                debug!(
                    connection = self.id(),
                    channel = dest,
                    remote = src,
                    "channel opened"
                );
                notices.push(Notice::Opened(handle));
            } else {
                core.channels.remove(&dest);
                debug!(connection = self.id(), channel = dest, "channel rejected by peer");
                notices.push(Notice::Rejected);
            }
        }
        self.notify(notices);
        Ok(())
    }

    pub(crate) fn on_channel_ack(&self, src: ChannelId, dest: ChannelId, ack: bool) -> Result<()> {
        let mut notices = Vec::new();
        {
            let mut core = self.lock();
            let Some(channel) = core.channels.get_mut(&dest) else {
                return Err(ProtocolError::protocol_state(format!(
                    "channel_ack for unknown channel {dest}"
                )));
            };
            if channel.remote_id != src {
                return Err(ProtocolError::protocol_state(format!(
                    "channel_ack for channel {dest} from remote {src}, expected {}",
                    channel.remote_id
                )));
            }
            if channel.state != ChannelState::Ready {
                debug!(connection = self.id(), channel = dest, "duplicate channel_ack ignored");
                return Ok(());
            }

            self.release_control(channel)?;

            if ack {
                channel.state = ChannelState::Open;
                debug!(
                    connection = self.id(),
                    channel = dest,
                    remote = src,
                    "channel opened"
                );
                notices.push(Notice::Opened(self.handle(channel)));
            } else {
                if let Some(channel) = core.channels.remove(&dest) {
                    notices.push(Notice::Closed(self.handle(&channel)));
                }
                debug!(connection = self.id(), channel = dest, "peer abandoned channel");
            }
        }
        self.notify(notices);
        Ok(())
    }

    /// Local close: tell the peer, drop the channel, notify the application.
    pub(crate) fn close_channel_now(&self, local_id: ChannelId) -> Result<()> {
        let channel = self
            .lock()
            .channels
            .remove(&local_id)
            .ok_or(ProtocolError::UnknownChannel(local_id))?;
        self.finish_close(channel, true)
    }

    /// Close during connection teardown. The channel may already be gone.
    pub(crate) fn teardown_channel(&self, local_id: ChannelId) -> Result<()> {
        let channel = self.lock().channels.remove(&local_id);
        match channel {
            Some(channel) => self.finish_close(channel, true),
            None => Ok(()),
        }
    }

    pub(crate) fn on_channel_close(&self, src: ChannelId, dest: ChannelId) -> Result<()> {
        let channel = self.lock().channels.remove(&dest).ok_or_else(|| {
            ProtocolError::protocol_state(format!("channel_close for unknown channel {dest}"))
        })?;
        if channel.remote().is_some_and(|remote| remote != src) {
            // A corrective close names the id we used, not the peer's own.
            warn!(
                connection = self.id(),
                channel = dest,
                remote = src,
                "channel_close with mismatched remote id"
            );
        }
        self.finish_close(channel, false)
    }

    fn finish_close(&self, channel: Channel, notify_peer: bool) -> Result<()> {
        if let Some(flight) = channel.in_flight {
            self.release(flight.id);
        }

        let mut result = Ok(());
        if let Some(remote) = channel.remote().filter(|_| notify_peer) {
            result = self
                .write(
                    &Message::ChannelClose {
                        src: channel.local_id,
                        dest: remote,
                    },
                    false,
                )
                .map(|_| ());
        }

        debug!(
            connection = self.id(),
            channel = channel.local_id,
            "channel closed"
        );
        // Channels still in the handshake were never announced.
        if channel.state != ChannelState::Ready {
            self.notify(vec![Notice::Closed(self.handle(&channel))]);
        }
        result
    }

    /// Release a handshake or restriction packet in flight and wake any
    /// queued important sends.
    pub(crate) fn release_control(&self, channel: &mut Channel) -> Result<()> {
        if let Some(InFlight {
            id,
            kind: InFlightKind::Control,
        }) = channel.in_flight
        {
            channel.in_flight = None;
            self.release(id);
            if !channel.queue.is_empty() {
                self.schedule(
                    linkmux_event::Priority::HIGH,
                    crate::event::Op::SendNext {
                        channel: channel.local_id,
                    },
                    &[],
                )?;
            }
        }
        Ok(())
    }
}
