//! Co-operative channel restriction.
//!
//! Each side keeps its own flag (`restricted_local`) and the peer's
//! (`restricted_remote`); important traffic is held only while both are set.
//! A `channel_restrict_ack` always carries the channel's resulting state, so
//! `restricted = false` means "denied" to a side waiting for a restriction
//! and "confirmed" to a side waiting for an unrestriction.

use linkmux_frame::{ChannelId, Message};
use tracing::debug;

use crate::application::RestrictionInfo;
use crate::channel::{Channel, ChannelState, InFlight, InFlightKind, Pending};
use crate::connection::{Connection, Notice};
use crate::error::{ProtocolError, Result};

impl Connection {
    pub(crate) fn restrict_now(&self, local_id: ChannelId, restricted: bool) -> Result<()> {
        let mut notices = Vec::new();
        {
            let mut core = self.lock();
            let channel = core
                .channels
                .get_mut(&local_id)
                .ok_or(ProtocolError::UnknownChannel(local_id))?;
            if channel.state != ChannelState::Open {
                return Err(ProtocolError::protocol_state(format!(
                    "cannot change restriction of {} channel {local_id}",
                    channel.state
                )));
            }

            if restricted == channel.restricted_local {
                debug!(
                    connection = self.id(),
                    channel = local_id,
                    restricted,
                    "restriction request already outstanding"
                );
                return Ok(());
            }

            let was_restricted = channel.is_restricted();
            channel.restricted_local = restricted;
            if was_restricted && !channel.is_restricted() {
                notices.push(Notice::Restriction(
                    self.handle(channel),
                    RestrictionInfo::Unrestricted,
                ));
                self.release_held(channel)?;
            }

            if channel.in_flight.is_some() {
                channel.queue.push_back(Pending::Restrict(restricted));
            } else {
                self.send_restrict_request(channel, restricted)?;
            }
        }
        self.notify(notices);
        Ok(())
    }

    pub(crate) fn send_restrict_request(&self, channel: &mut Channel, restricted: bool) -> Result<()> {
        let request = Message::ChannelRestrictRequest {
            src: channel.local_id,
            dest: channel.remote_id,
            restricted,
        };
        let importance = self.write(&request, true)?;
        channel.in_flight = importance.map(|id| InFlight {
            id,
            kind: InFlightKind::Control,
        });
        Ok(())
    }

    pub(crate) fn on_restrict_request(
        &self,
        src: ChannelId,
        dest: ChannelId,
        restricted: bool,
    ) -> Result<()> {
        let mut notices = Vec::new();

        // Decide first; asking the application must happen unlocked.
        let granted = if restricted {
            let (handle, ask) = {
                let core = self.lock();
                let channel = restrict_target(&core.channels, src, dest)?;
                // Already agreed, or both sides asked at once: no question to ask.
                let ask = !(channel.restricted_remote || channel.restricted_local);
                (self.handle(channel), ask)
            };
            if ask {
                self.application()
                    .map_or(true, |app| app.on_restrict_request(&handle))
            } else {
                true
            }
        } else {
            false
        };

        {
            let mut core = self.lock();
            let channel = restrict_target_mut(&mut core.channels, src, dest)?;
            let was_restricted = channel.is_restricted();

            if restricted && granted {
                channel.restricted_remote = true;
                channel.restricted_local = true;
            } else if !restricted {
                channel.restricted_remote = false;
                channel.restricted_local = false;
            }

            let now_restricted = channel.is_restricted();
            self.write(
                &Message::ChannelRestrictAck {
                    src: dest,
                    dest: src,
                    restricted: now_restricted,
                },
                false,
            )?;
            debug!(
                connection = self.id(),
                channel = dest,
                requested = restricted,
                restricted = now_restricted,
                "restriction request answered"
            );

            if !was_restricted && now_restricted {
                notices.push(Notice::Restriction(
                    self.handle(channel),
                    RestrictionInfo::Restricted,
                ));
            } else if was_restricted && !now_restricted {
                notices.push(Notice::Restriction(
                    self.handle(channel),
                    RestrictionInfo::Unrestricted,
                ));
                self.release_held(channel)?;
            }
        }
        self.notify(notices);
        Ok(())
    }

    pub(crate) fn on_restrict_ack(
        &self,
        src: ChannelId,
        dest: ChannelId,
        restricted: bool,
    ) -> Result<()> {
        let mut notices = Vec::new();
        {
            let mut core = self.lock();
            let channel = restrict_target_mut(&mut core.channels, src, dest)?;
            self.release_control(channel)?;
            let was_restricted = channel.is_restricted();

            if restricted {
                channel.restricted_remote = true;
            } else if channel.restricted_local && !channel.restricted_remote {
                channel.restricted_local = false;
                notices.push(Notice::Restriction(
                    self.handle(channel),
                    RestrictionInfo::Denied,
                ));
            } else {
                channel.restricted_remote = false;
            }

            let now_restricted = channel.is_restricted();
            if !was_restricted && now_restricted {
                notices.push(Notice::Restriction(
                    self.handle(channel),
                    RestrictionInfo::Restricted,
                ));
            } else if was_restricted && !now_restricted {
                notices.push(Notice::Restriction(
                    self.handle(channel),
                    RestrictionInfo::Unrestricted,
                ));
                self.release_held(channel)?;
            }
        }
        self.notify(notices);
        Ok(())
    }

    /// Move samples held during a restriction back into the send queue.
    fn release_held(&self, channel: &mut Channel) -> Result<()> {
        if channel.held.is_empty() {
            return Ok(());
        }
        debug!(
            connection = self.id(),
            channel = channel.local_id,
            held = channel.held.len(),
            "releasing held important samples"
        );
        let held: Vec<_> = channel.held.drain(..).collect();
        for payload in held {
            self.enqueue_pending(channel, Pending::Sample(payload))?;
        }
        Ok(())
    }
}

fn restrict_target<'a>(
    channels: &'a std::collections::BTreeMap<ChannelId, Channel>,
    src: ChannelId,
    dest: ChannelId,
) -> Result<&'a Channel> {
    match channels.get(&dest) {
        Some(channel) if channel.remote_id == src && channel.state == ChannelState::Open => {
            Ok(channel)
        }
        Some(channel) => Err(ProtocolError::protocol_state(format!(
            "restriction message for {} channel {dest} from remote {src}",
            channel.state
        ))),
        None => Err(ProtocolError::protocol_state(format!(
            "restriction message for unknown channel {dest}"
        ))),
    }
}

fn restrict_target_mut<'a>(
    channels: &'a mut std::collections::BTreeMap<ChannelId, Channel>,
    src: ChannelId,
    dest: ChannelId,
) -> Result<&'a mut Channel> {
    restrict_target(channels, src, dest)?;
    channels
        .get_mut(&dest)
        .ok_or_else(|| ProtocolError::protocol_state(format!("unknown channel {dest}")))
}
