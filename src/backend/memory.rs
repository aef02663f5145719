//! In-process loopback transport. Endpoints are added by hand, every call a
//! session makes is recorded, and inbound traffic is injected with
//! [`MemoryTransport::emit`]. Used as the test double for sessions.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{
    codec::MidiCallback,
    transport::{CallbackHandler, EndpointId, EndpointMap, Transport, TransportError},
};

pub type LocalId = u32;

/// Bytes that reached a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub bytes: Vec<u8>,
    pub short: bool,
}

/// Everything a session asked the bus to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Register(LocalId),
    Unregister(LocalId),
    Connect { local: LocalId, endpoint: EndpointId },
    Disconnect { local: LocalId, endpoint: EndpointId },
    Send { local: LocalId, endpoint: EndpointId, len: usize, short: bool },
    Release(EndpointId),
}

#[derive(Default)]
struct Bus {
    next_endpoint: u32,
    next_local: LocalId,
    destinations: BTreeMap<EndpointId, DestinationState>,
    sources: BTreeMap<EndpointId, SourceState>,
    references: HashMap<EndpointId, usize>,
    calls: Vec<TransportCall>,
    refuse_connections: bool,
    refuse_handles: bool,
}

struct DestinationState {
    name: String,
    received: Vec<Packet>,
}

struct SourceState {
    name: String,
    listeners: Vec<(LocalId, CallbackHandler)>,
}

impl Bus {
    fn endpoint_id(&mut self) -> EndpointId {
        self.next_endpoint += 1;
        EndpointId::from(self.next_endpoint)
    }

    fn local_id(&mut self) -> Result<LocalId, TransportError> {
        if self.refuse_handles {
            return Err(TransportError::HandleCreation("handle rejected by bus".into()));
        }
        self.next_local += 1;
        let local = self.next_local;
        self.calls.push(TransportCall::Register(local));
        Ok(local)
    }

    fn acquire(&mut self, id: &EndpointId) {
        *self.references.entry(id.clone()).or_default() += 1;
    }
}

#[derive(Clone, Default)]
pub struct MemoryTransport {
    bus: Arc<Mutex<Bus>>,
}

/// Reference to an endpoint obtained through a lookup.
pub struct MemoryEndpoint {
    id: EndpointId,
    bus: Arc<Mutex<Bus>>,
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        let mut bus = self.bus.lock();
        if let Some(count) = bus.references.get_mut(&self.id) {
            *count = count.saturating_sub(1);
        }
        bus.calls.push(TransportCall::Release(self.id.clone()));
    }
}

pub struct MemoryProducer {
    local: LocalId,
    target: Option<EndpointId>,
    bus: Arc<Mutex<Bus>>,
}

impl Drop for MemoryProducer {
    fn drop(&mut self) {
        self.bus.lock().calls.push(TransportCall::Unregister(self.local));
    }
}

pub struct MemoryConsumer {
    local: LocalId,
    handler: CallbackHandler,
    bus: Arc<Mutex<Bus>>,
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        let mut bus = self.bus.lock();
        for source in bus.sources.values_mut() {
            source.listeners.retain(|(local, _)| *local != self.local);
        }
        bus.calls.push(TransportCall::Unregister(self.local));
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an endpoint sessions can send to.
    pub fn add_destination(&self, name: &str) -> EndpointId {
        let mut bus = self.bus.lock();
        let id = bus.endpoint_id();
        bus.destinations.insert(
            id.clone(),
            DestinationState {
                name: name.to_owned(),
                received: Vec::new(),
            },
        );
        id
    }

    /// Publish an endpoint sessions can listen to.
    pub fn add_source(&self, name: &str) -> EndpointId {
        let mut bus = self.bus.lock();
        let id = bus.endpoint_id();
        bus.sources.insert(
            id.clone(),
            SourceState {
                name: name.to_owned(),
                listeners: Vec::new(),
            },
        );
        id
    }

    /// Unplug an endpoint. Existing references stay valid but go nowhere.
    pub fn remove_endpoint(&self, id: &EndpointId) {
        let mut bus = self.bus.lock();
        bus.destinations.remove(id);
        bus.sources.remove(id);
    }

    pub fn received(&self, id: &EndpointId) -> Vec<Packet> {
        self.bus
            .lock()
            .destinations
            .get(id)
            .map(|d| d.received.clone())
            .unwrap_or_default()
    }

    /// Deliver a callback to every consumer connected to `source`, outside the
    /// bus lock. Returns how many consumers were reached.
    pub fn emit(&self, source: &EndpointId, callback: MidiCallback) -> usize {
        let listeners: Vec<CallbackHandler> = match self.bus.lock().sources.get(source) {
            Some(s) => s.listeners.iter().map(|(_, h)| h.clone()).collect(),
            None => return 0,
        };
        for handler in &listeners {
            handler(callback.clone());
        }
        listeners.len()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.bus.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.bus.lock().calls.clear();
    }

    /// Outstanding lookups of `id` that have not been released.
    pub fn references(&self, id: &EndpointId) -> usize {
        self.bus.lock().references.get(id).copied().unwrap_or(0)
    }

    pub fn set_refuse_connections(&self, refuse: bool) {
        self.bus.lock().refuse_connections = refuse;
    }

    pub fn set_refuse_handles(&self, refuse: bool) {
        self.bus.lock().refuse_handles = refuse;
    }
}

impl Transport for MemoryTransport {
    type Destination = MemoryEndpoint;
    type Source = MemoryEndpoint;
    type Producer = MemoryProducer;
    type Consumer = MemoryConsumer;

    fn list_outputs(&self) -> Result<EndpointMap, TransportError> {
        let bus = self.bus.lock();
        Ok(bus
            .destinations
            .iter()
            .map(|(id, d)| (id.clone(), d.name.clone()))
            .collect())
    }

    fn list_inputs(&self) -> Result<EndpointMap, TransportError> {
        let bus = self.bus.lock();
        Ok(bus
            .sources
            .iter()
            .map(|(id, s)| (id.clone(), s.name.clone()))
            .collect())
    }

    fn find_destination(&self, id: &EndpointId) -> Option<MemoryEndpoint> {
        let mut bus = self.bus.lock();
        if !bus.destinations.contains_key(id) {
            return None;
        }
        bus.acquire(id);
        Some(MemoryEndpoint {
            id: id.clone(),
            bus: self.bus.clone(),
        })
    }

    fn find_source(&self, id: &EndpointId) -> Option<MemoryEndpoint> {
        let mut bus = self.bus.lock();
        if !bus.sources.contains_key(id) {
            return None;
        }
        bus.acquire(id);
        Some(MemoryEndpoint {
            id: id.clone(),
            bus: self.bus.clone(),
        })
    }

    fn create_producer(&self, _name: &str) -> Result<MemoryProducer, TransportError> {
        let local = self.bus.lock().local_id()?;
        Ok(MemoryProducer {
            local,
            target: None,
            bus: self.bus.clone(),
        })
    }

    fn create_consumer(
        &self,
        _name: &str,
        handler: CallbackHandler,
    ) -> Result<MemoryConsumer, TransportError> {
        let local = self.bus.lock().local_id()?;
        Ok(MemoryConsumer {
            local,
            handler,
            bus: self.bus.clone(),
        })
    }

    fn connect_output(
        &self,
        producer: &mut MemoryProducer,
        destination: &MemoryEndpoint,
    ) -> Result<(), TransportError> {
        let mut bus = self.bus.lock();
        if bus.refuse_connections {
            return Err(TransportError::Connect("connection refused by bus".into()));
        }
        if !bus.destinations.contains_key(&destination.id) {
            return Err(TransportError::Connect(format!(
                "endpoint {} is gone",
                destination.id
            )));
        }
        producer.target = Some(destination.id.clone());
        bus.calls.push(TransportCall::Connect {
            local: producer.local,
            endpoint: destination.id.clone(),
        });
        Ok(())
    }

    fn disconnect_output(&self, producer: &mut MemoryProducer, destination: &MemoryEndpoint) {
        producer.target = None;
        self.bus.lock().calls.push(TransportCall::Disconnect {
            local: producer.local,
            endpoint: destination.id.clone(),
        });
    }

    fn connect_input(
        &self,
        source: &MemoryEndpoint,
        consumer: &mut MemoryConsumer,
    ) -> Result<(), TransportError> {
        let mut bus = self.bus.lock();
        if bus.refuse_connections {
            return Err(TransportError::Connect("connection refused by bus".into()));
        }
        let Some(state) = bus.sources.get_mut(&source.id) else {
            return Err(TransportError::Connect(format!("endpoint {} is gone", source.id)));
        };
        state.listeners.push((consumer.local, consumer.handler.clone()));
        bus.calls.push(TransportCall::Connect {
            local: consumer.local,
            endpoint: source.id.clone(),
        });
        Ok(())
    }

    fn disconnect_input(&self, source: &MemoryEndpoint, consumer: &mut MemoryConsumer) {
        let mut bus = self.bus.lock();
        if let Some(state) = bus.sources.get_mut(&source.id) {
            state.listeners.retain(|(local, _)| *local != consumer.local);
        }
        bus.calls.push(TransportCall::Disconnect {
            local: consumer.local,
            endpoint: source.id.clone(),
        });
    }

    fn send(
        &self,
        producer: &mut MemoryProducer,
        bytes: &[u8],
        short: bool,
    ) -> Result<(), TransportError> {
        let target = producer.target.clone().ok_or(TransportError::NotConnected)?;
        let mut bus = self.bus.lock();
        let Some(state) = bus.destinations.get_mut(&target) else {
            return Err(TransportError::Send(format!("endpoint {target} is gone")));
        };
        state.received.push(Packet {
            bytes: bytes.to_vec(),
            short,
        });
        bus.calls.push(TransportCall::Send {
            local: producer.local,
            endpoint: target,
            len: bytes.len(),
            short,
        });
        Ok(())
    }
}
