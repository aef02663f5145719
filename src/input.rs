//! Inbound session: binds to one source, decodes whatever the transport
//! delivers and forwards it to an [`EventSink`].

use std::sync::{
    Arc,
    mpsc::{Sender, SyncSender, TrySendError},
};

use parking_lot::RwLock;

use crate::{
    codec::{ChannelMessage, MidiCallback, MidiEvent, SysExMessage, Timestamp},
    error::ConnectError,
    transport::{CallbackHandler, EndpointId, EndpointMap, Transport, TransportError},
};

/// Where decoded inbound events go. Called on the transport's thread, so
/// implementations should not block for long.
pub trait EventSink: Send + Sync + 'static {
    fn channel_message(&self, message: ChannelMessage, time: Timestamp);
    fn sysex(&self, message: SysExMessage);

    fn event(&self, event: MidiEvent) {
        match event {
            MidiEvent::Channel { message, time } => self.channel_message(message, time),
            MidiEvent::SysEx(message) => self.sysex(message),
        }
    }
}

impl EventSink for Sender<MidiEvent> {
    fn channel_message(&self, message: ChannelMessage, time: Timestamp) {
        self.send(MidiEvent::Channel { message, time }).ok();
    }

    fn sysex(&self, message: SysExMessage) {
        self.send(MidiEvent::SysEx(message)).ok();
    }
}

/// Bounded queue: events are dropped rather than stalling the transport.
impl EventSink for SyncSender<MidiEvent> {
    fn channel_message(&self, message: ChannelMessage, time: Timestamp) {
        self.event(MidiEvent::Channel { message, time });
    }

    fn sysex(&self, message: SysExMessage) {
        self.event(MidiEvent::SysEx(message));
    }

    fn event(&self, event: MidiEvent) {
        if let Err(TrySendError::Full(ev)) = self.try_send(event) {
            log::debug!("MIDI input queue full, dropping {ev:?}");
        }
    }
}

/// Any `Fn(MidiEvent)` works as a sink.
impl<F> EventSink for F
where
    F: Fn(MidiEvent) + Send + Sync + 'static,
{
    fn channel_message(&self, message: ChannelMessage, time: Timestamp) {
        self(MidiEvent::Channel { message, time });
    }

    fn sysex(&self, message: SysExMessage) {
        self(MidiEvent::SysEx(message));
    }

    fn event(&self, event: MidiEvent) {
        self(event);
    }
}

/// The decoder's path to the sink. `None` while not receiving; writers wait
/// for in-flight callbacks to finish.
type Route = Arc<RwLock<Option<Arc<dyn EventSink>>>>;

struct Binding<T: Transport> {
    endpoint: EndpointId,
    source: T::Source,
    consumer: T::Consumer,
    receiving: bool,
}

pub struct InputSession<T: Transport> {
    transport: Arc<T>,
    client_name: String,
    sink: Arc<dyn EventSink>,
    route: Route,
    binding: Option<Binding<T>>,
}

impl<T: Transport> InputSession<T> {
    pub fn new(
        transport: Arc<T>,
        client_name: impl Into<String>,
        sink: impl EventSink,
    ) -> Self {
        Self {
            transport,
            client_name: client_name.into(),
            sink: Arc::new(sink),
            route: Arc::new(RwLock::new(None)),
            binding: None,
        }
    }

    /// Input endpoints currently known to the transport.
    pub fn devices(&self) -> Result<EndpointMap, TransportError> {
        self.transport.list_inputs()
    }

    pub fn is_connected(&self) -> bool {
        self.binding.is_some()
    }

    pub fn is_receiving(&self) -> bool {
        self.binding.as_ref().is_some_and(|b| b.receiving)
    }

    pub fn endpoint(&self) -> Option<&EndpointId> {
        self.binding.as_ref().map(|b| &b.endpoint)
    }

    /// Bind to `id` and register a local consumer. Nothing is received until
    /// [`start`](Self::start).
    pub fn connect(&mut self, id: &EndpointId) -> Result<(), ConnectError> {
        self.disconnect();

        let source = self
            .transport
            .find_source(id)
            .ok_or_else(|| ConnectError::EndpointNotFound(id.clone()))?;
        let consumer = self
            .transport
            .create_consumer(&self.client_name, decoder(self.route.clone()))
            .map_err(ConnectError::HandleCreationFailed)?;

        log::info!("🎹 Input connected to {id}");
        self.binding = Some(Binding {
            endpoint: id.clone(),
            source,
            consumer,
            receiving: false,
        });
        Ok(())
    }

    /// Hook the source up to our consumer. A failure is logged and leaves the
    /// session connected but idle.
    pub fn start(&mut self) -> Result<(), TransportError> {
        let Some(binding) = self.binding.as_mut() else {
            return Ok(());
        };
        if binding.receiving {
            return Ok(());
        }

        *self.route.write() = Some(self.sink.clone());
        if let Err(e) = self
            .transport
            .connect_input(&binding.source, &mut binding.consumer)
        {
            self.route.write().take();
            log::warn!("could not connect {} to our consumer: {e}", binding.endpoint);
            return Err(e);
        }
        binding.receiving = true;
        Ok(())
    }

    /// Unhook the source. The binding stays.
    pub fn stop(&mut self) {
        let Some(binding) = self.binding.as_mut() else {
            return;
        };
        if !binding.receiving {
            return;
        }

        // waits for any callback still holding the read side
        self.route.write().take();
        self.transport
            .disconnect_input(&binding.source, &mut binding.consumer);
        binding.receiving = false;
    }

    pub fn disconnect(&mut self) {
        if self.binding.is_none() {
            return;
        }
        self.stop();

        if let Some(Binding {
            endpoint,
            source,
            consumer,
            ..
        }) = self.binding.take()
        {
            drop(consumer);
            drop(source);
            log::info!("🎹 Input disconnected from {endpoint}");
        }
    }
}

impl<T: Transport> Drop for InputSession<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ─────────────────── helpers ─────────────────────────────────────────────────

fn decoder(route: Route) -> CallbackHandler {
    Arc::new(move |cb: MidiCallback| {
        let route = route.read();
        if let Some(sink) = route.as_ref() {
            sink.event(cb.decode());
        }
    })
}
