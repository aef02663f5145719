//! The OS-side MIDI bus, as seen by a session: endpoint lookup, local handle
//! creation, connect/disconnect and raw delivery.

use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use crate::codec::MidiCallback;

/// Stable (until replug) identifier of one endpoint in the transport's
/// registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EndpointId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<u32> for EndpointId {
    fn from(id: u32) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for EndpointId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// id → display name, freshly enumerated.
pub type EndpointMap = BTreeMap<EndpointId, String>;

/// Receives every inbound delivery for a local consumer. Called from the
/// transport's own thread.
pub type CallbackHandler = Arc<dyn Fn(MidiCallback) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to enumerate endpoints: {0}")]
    Enumeration(String),

    #[error("failed to create local handle: {0}")]
    HandleCreation(String),

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("local handle is not connected")]
    NotConnected,

    #[error("failed to send: {0}")]
    Send(String),
}

/// An OS MIDI transport plus its endpoint directory.
///
/// Remote references (`Destination`, `Source`) and local handles
/// (`Producer`, `Consumer`) release themselves when dropped; local handles
/// are registered with the transport by `create_*` and unregistered on drop.
pub trait Transport: Send + Sync + 'static {
    /// A remote endpoint that consumes MIDI (an output device).
    type Destination;
    /// A remote endpoint that produces MIDI (an input device).
    type Source;
    /// Our side of an outbound connection.
    type Producer;
    /// Our side of an inbound connection.
    type Consumer;

    fn list_outputs(&self) -> Result<EndpointMap, TransportError>;
    fn list_inputs(&self) -> Result<EndpointMap, TransportError>;

    fn find_destination(&self, id: &EndpointId) -> Option<Self::Destination>;
    fn find_source(&self, id: &EndpointId) -> Option<Self::Source>;

    fn create_producer(&self, name: &str) -> Result<Self::Producer, TransportError>;
    fn create_consumer(
        &self,
        name: &str,
        handler: CallbackHandler,
    ) -> Result<Self::Consumer, TransportError>;

    fn connect_output(
        &self,
        producer: &mut Self::Producer,
        destination: &Self::Destination,
    ) -> Result<(), TransportError>;
    fn disconnect_output(&self, producer: &mut Self::Producer, destination: &Self::Destination);

    fn connect_input(
        &self,
        source: &Self::Source,
        consumer: &mut Self::Consumer,
    ) -> Result<(), TransportError>;
    fn disconnect_input(&self, source: &Self::Source, consumer: &mut Self::Consumer);

    /// Push bytes out of a connected producer. `short` distinguishes a
    /// channel message from a system-exclusive blob; what the transport does
    /// with the flag is its own business.
    fn send(
        &self,
        producer: &mut Self::Producer,
        bytes: &[u8],
        short: bool,
    ) -> Result<(), TransportError>;
}
