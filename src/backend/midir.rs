//! The real thing: ALSA / CoreMIDI / WinMM through `midir`.
//!
//! midir has no separate "local producer" object, so a producer is a
//! `MidiOutput` client that turns into a `MidiOutputConnection` while
//! connected, and back again on disconnect. Same for consumers.

use ::midir::{
    Ignore, MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection,
    MidiOutputPort,
};

use crate::{
    codec::{MidiCallback, Timestamp},
    transport::{CallbackHandler, EndpointId, EndpointMap, Transport, TransportError},
};

pub struct MidirTransport {
    client_name: String,
}

pub struct MidirDestination {
    port: MidiOutputPort,
    name: String,
}

pub struct MidirSource {
    port: MidiInputPort,
    name: String,
}

pub struct MidirProducer {
    name: String,
    client: Option<MidiOutput>,
    conn: Option<MidiOutputConnection>,
}

pub struct MidirConsumer {
    name: String,
    handler: CallbackHandler,
    client: Option<MidiInput>,
    conn: Option<MidiInputConnection<()>>,
}

impl MidirTransport {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn scan_name(&self) -> String {
        format!("{}-scan", self.client_name)
    }

    fn output_client(&self) -> Result<MidiOutput, TransportError> {
        MidiOutput::new(&self.scan_name()).map_err(|e| TransportError::Enumeration(e.to_string()))
    }

    fn input_client(&self) -> Result<MidiInput, TransportError> {
        MidiInput::new(&self.scan_name()).map_err(|e| TransportError::Enumeration(e.to_string()))
    }
}

impl Transport for MidirTransport {
    type Destination = MidirDestination;
    type Source = MidirSource;
    type Producer = MidirProducer;
    type Consumer = MidirConsumer;

    fn list_outputs(&self) -> Result<EndpointMap, TransportError> {
        let out = self.output_client()?;
        Ok(out
            .ports()
            .iter()
            .filter_map(|port| {
                let name = out.port_name(port).ok()?;
                Some((EndpointId::new(port.id()), name))
            })
            .collect())
    }

    fn list_inputs(&self) -> Result<EndpointMap, TransportError> {
        let inp = self.input_client()?;
        Ok(inp
            .ports()
            .iter()
            .filter_map(|port| {
                let name = inp.port_name(port).ok()?;
                Some((EndpointId::new(port.id()), name))
            })
            .collect())
    }

    fn find_destination(&self, id: &EndpointId) -> Option<MidirDestination> {
        let out = self
            .output_client()
            .map_err(|e| log::warn!("MIDI output lookup failed: {e}"))
            .ok()?;
        let port = out.ports().into_iter().find(|p| p.id() == id.as_str())?;
        let name = out.port_name(&port).unwrap_or_else(|_| id.to_string());
        Some(MidirDestination { port, name })
    }

    fn find_source(&self, id: &EndpointId) -> Option<MidirSource> {
        let inp = self
            .input_client()
            .map_err(|e| log::warn!("MIDI input lookup failed: {e}"))
            .ok()?;
        let port = inp.ports().into_iter().find(|p| p.id() == id.as_str())?;
        let name = inp.port_name(&port).unwrap_or_else(|_| id.to_string());
        Some(MidirSource { port, name })
    }

    fn create_producer(&self, name: &str) -> Result<MidirProducer, TransportError> {
        let client = MidiOutput::new(&self.client_name)
            .map_err(|e| TransportError::HandleCreation(e.to_string()))?;
        Ok(MidirProducer {
            name: name.to_owned(),
            client: Some(client),
            conn: None,
        })
    }

    fn create_consumer(
        &self,
        name: &str,
        handler: CallbackHandler,
    ) -> Result<MidirConsumer, TransportError> {
        let mut client = MidiInput::new(&self.client_name)
            .map_err(|e| TransportError::HandleCreation(e.to_string()))?;
        client.ignore(Ignore::None);
        Ok(MidirConsumer {
            name: name.to_owned(),
            handler,
            client: Some(client),
            conn: None,
        })
    }

    fn connect_output(
        &self,
        producer: &mut MidirProducer,
        destination: &MidirDestination,
    ) -> Result<(), TransportError> {
        let client = producer.client.take().ok_or_else(|| {
            TransportError::Connect(format!("{} is already connected", producer.name))
        })?;
        match client.connect(&destination.port, &producer.name) {
            Ok(conn) => {
                log::debug!("MIDI out {} → {}", producer.name, destination.name);
                producer.conn = Some(conn);
                Ok(())
            }
            Err(e) => {
                let msg = format!("{}: {e}", destination.name);
                producer.client = Some(e.into_inner());
                Err(TransportError::Connect(msg))
            }
        }
    }

    fn disconnect_output(&self, producer: &mut MidirProducer, destination: &MidirDestination) {
        if let Some(conn) = producer.conn.take() {
            producer.client = Some(conn.close());
            log::debug!("MIDI out {} ✕ {}", producer.name, destination.name);
        }
    }

    fn connect_input(
        &self,
        source: &MidirSource,
        consumer: &mut MidirConsumer,
    ) -> Result<(), TransportError> {
        let client = consumer.client.take().ok_or_else(|| {
            TransportError::Connect(format!("{} is already connected", consumer.name))
        })?;
        let handler = consumer.handler.clone();
        let result = client.connect(
            &source.port,
            &consumer.name,
            move |stamp, bytes, _| match MidiCallback::from_bytes(bytes, Timestamp(stamp)) {
                Some(cb) => handler(cb),
                None => log::trace!("dropping unhandled MIDI {:02X?}", bytes),
            },
            (),
        );
        match result {
            Ok(conn) => {
                log::debug!("MIDI in {} → {}", source.name, consumer.name);
                consumer.conn = Some(conn);
                Ok(())
            }
            Err(e) => {
                let msg = format!("{}: {e}", source.name);
                consumer.client = Some(e.into_inner());
                Err(TransportError::Connect(msg))
            }
        }
    }

    fn disconnect_input(&self, source: &MidirSource, consumer: &mut MidirConsumer) {
        if let Some(conn) = consumer.conn.take() {
            let (client, ()) = conn.close();
            consumer.client = Some(client);
            log::debug!("MIDI in {} ✕ {}", source.name, consumer.name);
        }
    }

    fn send(
        &self,
        producer: &mut MidirProducer,
        bytes: &[u8],
        short: bool,
    ) -> Result<(), TransportError> {
        let conn = producer.conn.as_mut().ok_or(TransportError::NotConnected)?;
        log::trace!(
            "MIDI out {} {}: {:02X?}",
            producer.name,
            if short { "short" } else { "sysex" },
            bytes
        );
        conn.send(bytes).map_err(|e| TransportError::Send(e.to_string()))
    }
}
