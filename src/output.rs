//! Outbound session: binds to one destination and sprays short messages and
//! sysex at it.

use std::sync::Arc;

use crate::{
    codec::{ChannelMessage, SysExMessage},
    error::ConnectError,
    transport::{EndpointId, EndpointMap, Transport, TransportError},
};

const ALL_SOUND_OFF: u8 = 120;
const ALL_NOTES_OFF: u8 = 123;

struct Binding<T: Transport> {
    endpoint: EndpointId,
    destination: T::Destination,
    producer: T::Producer,
}

pub struct OutputSession<T: Transport> {
    transport: Arc<T>,
    client_name: String,
    binding: Option<Binding<T>>,
}

impl<T: Transport> OutputSession<T> {
    pub fn new(transport: Arc<T>, client_name: impl Into<String>) -> Self {
        Self {
            transport,
            client_name: client_name.into(),
            binding: None,
        }
    }

    /// Output endpoints currently known to the transport.
    pub fn devices(&self) -> Result<EndpointMap, TransportError> {
        self.transport.list_outputs()
    }

    pub fn is_connected(&self) -> bool {
        self.binding.is_some()
    }

    /// The endpoint we are bound to, if any.
    pub fn endpoint(&self) -> Option<&EndpointId> {
        self.binding.as_ref().map(|b| &b.endpoint)
    }

    /// Bind to `id`, dropping any previous binding first. On failure the
    /// session is left disconnected and every handle made so far is released.
    pub fn connect(&mut self, id: &EndpointId) -> Result<(), ConnectError> {
        self.disconnect();

        let destination = self
            .transport
            .find_destination(id)
            .ok_or_else(|| ConnectError::EndpointNotFound(id.clone()))?;
        let mut producer = self
            .transport
            .create_producer(&self.client_name)
            .map_err(ConnectError::HandleCreationFailed)?;
        self.transport
            .connect_output(&mut producer, &destination)
            .map_err(ConnectError::TransportConnectFailed)?;

        log::info!("🎹 Output connected to {id}");
        self.binding = Some(Binding {
            endpoint: id.clone(),
            destination,
            producer,
        });
        Ok(())
    }

    pub fn disconnect(&mut self) {
        let Some(mut binding) = self.binding.take() else {
            return;
        };
        self.transport
            .disconnect_output(&mut binding.producer, &binding.destination);
        let Binding {
            endpoint,
            destination,
            producer,
        } = binding;
        drop(destination);
        drop(producer);
        log::info!("🎹 Output disconnected from {endpoint}");
    }

    /// Send a packed short message. Dropped silently while disconnected.
    pub fn send_channel_message(&mut self, msg: ChannelMessage) {
        let (bytes, len) = msg.encode();
        self.spray(&bytes[..len], true);
    }

    /// Send a system-exclusive message verbatim. Dropped silently while
    /// disconnected.
    pub fn send_sysex(&mut self, msg: &SysExMessage) {
        self.spray(msg.as_bytes(), false);
    }

    pub fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        self.send_channel_message(ChannelMessage::note_on(channel, note, velocity));
    }

    pub fn note_off(&mut self, channel: u8, note: u8) {
        self.send_channel_message(ChannelMessage::note_off(channel, note, 0));
    }

    pub fn control_change(&mut self, channel: u8, controller: u8, value: u8) {
        self.send_channel_message(ChannelMessage::control_change(channel, controller, value));
    }

    /// Select the instrument (program) for `channel`.
    pub fn program_change(&mut self, channel: u8, program: u8) {
        self.send_channel_message(ChannelMessage::program_change(channel, program));
    }

    pub fn pitch_wheel(&mut self, channel: u8, value: u16) {
        self.send_channel_message(ChannelMessage::pitch_bend(channel, value));
    }

    /// All Sound Off + All Notes Off on one channel.
    pub fn stop_all_on(&mut self, channel: u8) {
        self.control_change(channel, ALL_SOUND_OFF, 0);
        self.control_change(channel, ALL_NOTES_OFF, 0);
    }

    /// All Sound Off + All Notes Off on all 16 channels.
    pub fn stop_all(&mut self) {
        for channel in 0..16 {
            self.stop_all_on(channel);
        }
    }

    fn spray(&mut self, bytes: &[u8], short: bool) {
        let Some(binding) = self.binding.as_mut() else {
            return;
        };
        if let Err(e) = self.transport.send(&mut binding.producer, bytes, short) {
            log::warn!("MIDI send to {} failed: {e}", binding.endpoint);
        }
    }
}

impl<T: Transport> Drop for OutputSession<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryTransport, Packet, TransportCall};

    fn session() -> (Arc<MemoryTransport>, OutputSession<MemoryTransport>, EndpointId) {
        let bus = Arc::new(MemoryTransport::new());
        let out = bus.add_destination("Synth");
        let session = OutputSession::new(bus.clone(), "test");
        (bus, session, out)
    }

    #[test]
    fn connect_binds_endpoint() {
        let (bus, mut session, out) = session();
        session.connect(&out).unwrap();

        assert!(session.is_connected());
        assert_eq!(session.endpoint(), Some(&out));
        assert_eq!(bus.references(&out), 1);
    }

    #[test]
    fn unknown_endpoint_leaves_session_disconnected() {
        let (bus, mut session, _) = session();
        let err = session.connect(&EndpointId::from(999)).unwrap_err();

        assert!(matches!(err, ConnectError::EndpointNotFound(_)));
        assert!(!session.is_connected());
        assert!(bus.calls().is_empty());
    }

    #[test]
    fn refused_handle_releases_endpoint() {
        let (bus, mut session, out) = session();
        bus.set_refuse_handles(true);

        let err = session.connect(&out).unwrap_err();
        assert!(matches!(err, ConnectError::HandleCreationFailed(_)));
        assert!(!session.is_connected());
        assert_eq!(bus.references(&out), 0);
    }

    #[test]
    fn refused_connection_releases_everything() {
        let (bus, mut session, out) = session();
        bus.set_refuse_connections(true);

        let err = session.connect(&out).unwrap_err();
        assert!(matches!(err, ConnectError::TransportConnectFailed(_)));
        assert!(!session.is_connected());
        assert_eq!(bus.references(&out), 0);
        assert!(bus.calls().contains(&TransportCall::Unregister(1)));
    }

    #[test]
    fn single_data_byte_messages_go_out_truncated() {
        let (bus, mut session, out) = session();
        session.connect(&out).unwrap();

        session.send_channel_message(ChannelMessage::from_packed(0x007F_05C3));
        session.send_channel_message(ChannelMessage::from_packed(0x0011_40D0));
        session.send_channel_message(ChannelMessage::from_packed(0x0064_3C92));

        let sent: Vec<Vec<u8>> = bus.received(&out).into_iter().map(|p| p.bytes).collect();
        assert_eq!(
            sent,
            vec![vec![0xC3, 0x05], vec![0xD0, 0x40], vec![0x92, 0x3C, 0x64]]
        );
    }

    #[test]
    fn sysex_is_sent_verbatim_and_flagged() {
        let (bus, mut session, out) = session();
        session.connect(&out).unwrap();

        session.send_sysex(&SysExMessage::from_raw(vec![0xF0, 0x43, 0x10, 0xF7]));
        assert_eq!(
            bus.received(&out),
            vec![Packet {
                bytes: vec![0xF0, 0x43, 0x10, 0xF7],
                short: false
            }]
        );
    }

    #[test]
    fn sends_while_disconnected_are_dropped() {
        let (bus, mut session, out) = session();

        session.note_on(0, 60, 100);
        session.send_sysex(&SysExMessage::from_payload(&[1, 2, 3]));
        session.stop_all();

        assert!(bus.received(&out).is_empty());
        assert!(bus.calls().is_empty());
    }

    #[test]
    fn disconnect_twice_is_harmless() {
        let (bus, mut session, out) = session();
        session.connect(&out).unwrap();
        session.disconnect();
        let after_first = bus.calls();
        session.disconnect();

        assert!(!session.is_connected());
        assert_eq!(bus.calls(), after_first);
        assert_eq!(bus.references(&out), 0);
    }

    #[test]
    fn disconnect_tears_down_in_order() {
        let (bus, mut session, out) = session();
        session.connect(&out).unwrap();
        bus.clear_calls();
        session.disconnect();

        assert_eq!(
            bus.calls(),
            vec![
                TransportCall::Disconnect {
                    local: 1,
                    endpoint: out.clone()
                },
                TransportCall::Release(out),
                TransportCall::Unregister(1),
            ]
        );
    }

    #[test]
    fn stop_all_covers_every_channel() {
        let (bus, mut session, out) = session();
        session.connect(&out).unwrap();
        session.stop_all();

        let sent = bus.received(&out);
        assert_eq!(sent.len(), 32);
        assert_eq!(sent[0].bytes, vec![0xB0, 120, 0]);
        assert_eq!(sent[31].bytes, vec![0xBF, 123, 0]);
    }

    #[test]
    fn dropping_session_releases_handles() {
        let (bus, mut session, out) = session();
        session.connect(&out).unwrap();
        drop(session);

        assert_eq!(bus.references(&out), 0);
    }
}
