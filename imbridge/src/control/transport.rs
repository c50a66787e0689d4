//! Request/reply transport seam.

use std::sync::{Arc, Weak};

use thiserror::Error;

use crate::control::server::{ControlHandler, ControlServer};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The receiving side no longer exists.
    #[error("peer is gone")]
    PeerGone,
    #[error("transport failed: {0}")]
    Failed(String),
}

/// Carries one encoded request to the service side and returns its reply.
///
/// Implementations block until the reply arrives. No retries.
pub trait Transport: Send + Sync {
    /// # Errors
    ///
    /// Returns [`TransportError`] if the request could not be delivered or
    /// no reply came back.
    fn send_request(&self, request: &[u8]) -> Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send_request(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).send_request(request)
    }
}

/// In-process transport bound straight to a [`ControlServer`].
///
/// Holds the server weakly, so a dropped server surfaces as
/// [`TransportError::PeerGone`].
pub struct LoopbackTransport<H> {
    server: Weak<ControlServer<H>>,
}

impl<H: ControlHandler> LoopbackTransport<H> {
    #[must_use]
    pub fn new(server: &Arc<ControlServer<H>>) -> Self {
        Self {
            server: Arc::downgrade(server),
        }
    }
}

impl<H: ControlHandler> Transport for LoopbackTransport<H> {
    fn send_request(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        let server = self.server.upgrade().ok_or(TransportError::PeerGone)?;
        Ok(server.on_remote_request(request))
    }
}
