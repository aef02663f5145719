//! Packs short MIDI messages into 32-bit words, unpacks transport callbacks
//! back into the same representation and frames system-exclusive payloads.

use std::fmt;

pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const KEY_PRESSURE: u8 = 0xA0;
pub const CONTROL_CHANGE: u8 = 0xB0;
pub const PROGRAM_CHANGE: u8 = 0xC0;
pub const CHANNEL_PRESSURE: u8 = 0xD0;
pub const PITCH_BEND: u8 = 0xE0;

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;

/// Opaque monotonic time attached to inbound events. The midir backend fills
/// it with microseconds; other transports may use their own clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

/// A short channel message: byte 0 = status, byte 1 = data1, byte 2 = data2.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelMessage(u32);

impl ChannelMessage {
    pub const fn from_packed(word: u32) -> Self {
        Self(word)
    }

    pub const fn from_bytes(status: u8, data1: u8, data2: u8) -> Self {
        Self(status as u32 | (data1 as u32) << 8 | (data2 as u32) << 16)
    }

    fn channel_voice(kind: u8, channel: u8, data1: u8, data2: u8) -> Self {
        Self::from_bytes(kind | (channel & 0x0F), data1, data2)
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::channel_voice(NOTE_OFF, channel, note, velocity)
    }

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::channel_voice(NOTE_ON, channel, note, velocity)
    }

    pub fn key_pressure(channel: u8, note: u8, pressure: u8) -> Self {
        Self::channel_voice(KEY_PRESSURE, channel, note, pressure)
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self::channel_voice(CONTROL_CHANGE, channel, controller, value)
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self::channel_voice(PROGRAM_CHANGE, channel, program, 0)
    }

    pub fn channel_pressure(channel: u8, pressure: u8) -> Self {
        Self::channel_voice(CHANNEL_PRESSURE, channel, pressure, 0)
    }

    /// `value` is the 14-bit bend amount (0x2000 = centre); higher bits are
    /// discarded.
    pub fn pitch_bend(channel: u8, value: u16) -> Self {
        let lsb = (value & 0x7F) as u8;
        let msb = ((value >> 7) & 0x7F) as u8;
        Self::channel_voice(PITCH_BEND, channel, lsb, msb)
    }

    pub const fn packed(self) -> u32 {
        self.0
    }

    pub const fn status(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Status with the channel nibble masked off.
    pub const fn kind(self) -> u8 {
        self.status() & 0xF0
    }

    pub const fn channel(self) -> u8 {
        self.status() & 0x0F
    }

    pub const fn data1(self) -> u8 {
        ((self.0 >> 8) & 0xFF) as u8
    }

    pub const fn data2(self) -> u8 {
        ((self.0 >> 16) & 0xFF) as u8
    }

    /// Number of bytes that go on the wire. Program Change and Channel
    /// Pressure carry a single data byte; some transports choke on a trailing
    /// zero for them, so it is never sent.
    pub const fn wire_len(self) -> usize {
        match self.kind() {
            PROGRAM_CHANGE | CHANNEL_PRESSURE => 2,
            _ => 3,
        }
    }

    /// Serialise into a fixed buffer plus the number of valid bytes.
    pub const fn encode(self) -> ([u8; 3], usize) {
        ([self.status(), self.data1(), self.data2()], self.wire_len())
    }
}

impl From<u32> for ChannelMessage {
    fn from(word: u32) -> Self {
        Self(word)
    }
}

impl From<ChannelMessage> for u32 {
    fn from(msg: ChannelMessage) -> Self {
        msg.0
    }
}

impl fmt::Debug for ChannelMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelMessage({:#010x})", self.0)
    }
}

impl fmt::Display for ChannelMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (bytes, len) = self.encode();
        write!(f, "{:02X?}", &bytes[..len])
    }
}

/// A complete, framed system-exclusive message (`F0 .. F7`).
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct SysExMessage(Vec<u8>);

impl SysExMessage {
    /// Wrap bytes that are already framed, or that the caller wants sent
    /// verbatim.
    pub fn from_raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Frame a payload whose start/end markers were stripped by the
    /// transport.
    pub fn from_payload(payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(payload.len() + 2);
        bytes.push(SYSEX_START);
        bytes.extend_from_slice(payload);
        bytes.push(SYSEX_END);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Bytes between the markers, if the message is properly framed.
    pub fn payload(&self) -> Option<&[u8]> {
        match self.0.as_slice() {
            [SYSEX_START, inner @ .., SYSEX_END] => Some(inner),
            _ => None,
        }
    }
}

impl fmt::Debug for SysExMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SysExMessage({:02X?})", self.0)
    }
}

impl AsRef<[u8]> for SysExMessage {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// One inbound delivery from a transport, one variant per message subtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiCallback {
    NoteOff { channel: u8, note: u8, velocity: u8, time: Timestamp },
    NoteOn { channel: u8, note: u8, velocity: u8, time: Timestamp },
    KeyPressure { channel: u8, note: u8, pressure: u8, time: Timestamp },
    ControlChange { channel: u8, controller: u8, value: u8, time: Timestamp },
    ProgramChange { channel: u8, program: u8, time: Timestamp },
    ChannelPressure { channel: u8, pressure: u8, time: Timestamp },
    PitchBend { channel: u8, lsb: u8, msb: u8, time: Timestamp },
    /// Payload without the F0/F7 markers.
    SystemExclusive { payload: Vec<u8>, time: Timestamp },
}

/// Decoded inbound event, as handed to an [`EventSink`](crate::EventSink).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiEvent {
    Channel { message: ChannelMessage, time: Timestamp },
    SysEx(SysExMessage),
}

impl MidiCallback {
    /// Turn a complete raw message into a callback. Running status, system
    /// common and realtime messages are not handled and yield `None`.
    pub fn from_bytes(bytes: &[u8], time: Timestamp) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        if status < 0x80 {
            return None;
        }
        let channel = status & 0x0F;

        match (status & 0xF0, data) {
            (NOTE_OFF, [note, velocity, ..]) => Some(Self::NoteOff {
                channel,
                note: *note,
                velocity: *velocity,
                time,
            }),
            (NOTE_ON, [note, velocity, ..]) => Some(Self::NoteOn {
                channel,
                note: *note,
                velocity: *velocity,
                time,
            }),
            (KEY_PRESSURE, [note, pressure, ..]) => Some(Self::KeyPressure {
                channel,
                note: *note,
                pressure: *pressure,
                time,
            }),
            (CONTROL_CHANGE, [controller, value, ..]) => Some(Self::ControlChange {
                channel,
                controller: *controller,
                value: *value,
                time,
            }),
            (PROGRAM_CHANGE, [program, ..]) => Some(Self::ProgramChange {
                channel,
                program: *program,
                time,
            }),
            (CHANNEL_PRESSURE, [pressure, ..]) => Some(Self::ChannelPressure {
                channel,
                pressure: *pressure,
                time,
            }),
            (PITCH_BEND, [lsb, msb, ..]) => Some(Self::PitchBend {
                channel,
                lsb: *lsb,
                msb: *msb,
                time,
            }),
            _ if status == SYSEX_START => match data {
                [payload @ .., SYSEX_END] => Some(Self::SystemExclusive {
                    payload: payload.to_vec(),
                    time,
                }),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn time(&self) -> Timestamp {
        match self {
            Self::NoteOff { time, .. }
            | Self::NoteOn { time, .. }
            | Self::KeyPressure { time, .. }
            | Self::ControlChange { time, .. }
            | Self::ProgramChange { time, .. }
            | Self::ChannelPressure { time, .. }
            | Self::PitchBend { time, .. }
            | Self::SystemExclusive { time, .. } => *time,
        }
    }

    pub fn decode(self) -> MidiEvent {
        let time = self.time();
        let message = match self {
            Self::NoteOff { channel, note, velocity, .. } => {
                ChannelMessage::note_off(channel, note, velocity)
            }
            Self::NoteOn { channel, note, velocity, .. } => {
                ChannelMessage::note_on(channel, note, velocity)
            }
            Self::KeyPressure { channel, note, pressure, .. } => {
                ChannelMessage::key_pressure(channel, note, pressure)
            }
            Self::ControlChange { channel, controller, value, .. } => {
                ChannelMessage::control_change(channel, controller, value)
            }
            Self::ProgramChange { channel, program, .. } => {
                ChannelMessage::program_change(channel, program)
            }
            Self::ChannelPressure { channel, pressure, .. } => {
                ChannelMessage::channel_pressure(channel, pressure)
            }
            Self::PitchBend { channel, lsb, msb, .. } => {
                ChannelMessage::channel_voice(PITCH_BEND, channel, lsb, msb)
            }
            Self::SystemExclusive { payload, .. } => {
                return MidiEvent::SysEx(SysExMessage::from_payload(&payload));
            }
        };
        MidiEvent::Channel { message, time }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn note_on_packs_status_then_data() {
        let msg = ChannelMessage::note_on(2, 60, 100);
        assert_eq!(msg.packed(), 0x0064_3C92);
        assert_eq!(msg.encode(), ([0x92, 0x3C, 0x64], 3));
    }

    #[test]
    fn single_data_byte_kinds_drop_third_byte() {
        // data2 is set on purpose: it must still not reach the wire
        for status in [0xC0, 0xC5, 0xD0, 0xDF] {
            let msg = ChannelMessage::from_bytes(status, 0x12, 0x7F);
            let (bytes, len) = msg.encode();
            assert_eq!(len, 2, "status {status:#04x}");
            assert_eq!(&bytes[..len], &[status, 0x12]);
        }
    }

    #[test]
    fn other_kinds_send_three_bytes() {
        for status in [0x80, 0x93, 0xA1, 0xB4, 0xEF] {
            assert_eq!(ChannelMessage::from_bytes(status, 1, 2).wire_len(), 3);
        }
    }

    #[test]
    fn pitch_bend_splits_fourteen_bits() {
        let msg = ChannelMessage::pitch_bend(0, 0x2000);
        assert_eq!((msg.data1(), msg.data2()), (0x00, 0x40));
        let msg = ChannelMessage::pitch_bend(15, 0x3FFF);
        assert_eq!(msg.encode(), ([0xEF, 0x7F, 0x7F], 3));
    }

    #[test]
    fn sysex_payload_gets_framed() {
        let cb = MidiCallback::SystemExclusive {
            payload: vec![0x01, 0x02, 0x03],
            time: Timestamp(7),
        };
        let MidiEvent::SysEx(msg) = cb.decode() else {
            panic!("expected sysex");
        };
        assert_eq!(msg.as_bytes(), &[0xF0, 0x01, 0x02, 0x03, 0xF7]);
        assert_eq!(msg.payload(), Some(&[0x01, 0x02, 0x03][..]));
    }

    #[test]
    fn from_bytes_strips_sysex_markers() {
        let cb = MidiCallback::from_bytes(&[0xF0, 0x7E, 0x01, 0xF7], Timestamp(1));
        assert_eq!(
            cb,
            Some(MidiCallback::SystemExclusive {
                payload: vec![0x7E, 0x01],
                time: Timestamp(1)
            })
        );
        assert_eq!(MidiCallback::from_bytes(&[0xF0, 0x7E], Timestamp(1)), None);
    }

    #[test]
    fn from_bytes_rejects_short_and_system_messages() {
        let t = Timestamp::default();
        assert_eq!(MidiCallback::from_bytes(&[], t), None);
        assert_eq!(MidiCallback::from_bytes(&[0x3C, 0x40], t), None);
        assert_eq!(MidiCallback::from_bytes(&[0x90, 0x3C], t), None);
        assert_eq!(MidiCallback::from_bytes(&[0xF8], t), None);
        assert_eq!(MidiCallback::from_bytes(&[0xC0], t), None);
    }

    #[test]
    fn timestamp_survives_decode() {
        let cb = MidiCallback::ControlChange {
            channel: 1,
            controller: 7,
            value: 99,
            time: Timestamp(123_456),
        };
        assert_eq!(
            cb.decode(),
            MidiEvent::Channel {
                message: ChannelMessage::from_bytes(0xB1, 7, 99),
                time: Timestamp(123_456)
            }
        );
    }

    fn kinds() -> impl Strategy<Value = u8> {
        prop::sample::select(vec![
            NOTE_OFF,
            NOTE_ON,
            KEY_PRESSURE,
            CONTROL_CHANGE,
            PROGRAM_CHANGE,
            CHANNEL_PRESSURE,
            PITCH_BEND,
        ])
    }

    proptest! {
        #[test]
        fn wire_bytes_decode_to_same_message(
            kind in kinds(),
            channel in 0u8..16,
            d1 in 0u8..0x80,
            d2 in 0u8..0x80,
        ) {
            let d2 = if matches!(kind, PROGRAM_CHANGE | CHANNEL_PRESSURE) { 0 } else { d2 };
            let sent = ChannelMessage::from_bytes(kind | channel, d1, d2);
            let (bytes, len) = sent.encode();

            let cb = MidiCallback::from_bytes(&bytes[..len], Timestamp(42)).unwrap();
            let MidiEvent::Channel { message, time } = cb.decode() else {
                panic!("expected channel message");
            };
            prop_assert_eq!(time, Timestamp(42));
            prop_assert_eq!(
                (message.channel(), message.kind(), message.data1(), message.data2()),
                (channel, kind, d1, d2)
            );
        }
    }
}
