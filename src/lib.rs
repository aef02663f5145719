//! Device-agnostic MIDI endpoint sessions on top of an OS transport.
//!
//! An [`OutputSession`] binds to one destination and sends packed channel
//! messages or sysex to it; an [`InputSession`] binds to one source and
//! decodes inbound traffic into the same packed form for an [`EventSink`].
//! Both talk to the OS through a [`Transport`]: [`backend::MidirTransport`]
//! for real hardware, [`backend::MemoryTransport`] for tests.

pub mod backend;
pub mod codec;
mod error;
pub mod input;
pub mod monitor;
pub mod output;
pub mod transport;

pub use codec::{ChannelMessage, MidiCallback, MidiEvent, SysExMessage, Timestamp};
pub use error::ConnectError;
pub use input::{EventSink, InputSession};
pub use monitor::{Direction, DirectoryEvent, DirectoryWatcher};
pub use output::OutputSession;
pub use transport::{EndpointId, EndpointMap, Transport, TransportError};
