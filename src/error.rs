use crate::transport::{EndpointId, TransportError};

/// Why a session could not bind to an endpoint. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("no MIDI endpoint with id {0}")]
    EndpointNotFound(EndpointId),

    #[error("could not create local MIDI handle")]
    HandleCreationFailed(#[source] TransportError),

    #[error("transport refused the connection")]
    TransportConnectFailed(#[source] TransportError),
}
