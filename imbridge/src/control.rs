//! Control channel between the service side and worker-side handlers.
//!
//! The caller holds a [`ControlProxy`] which encodes each command and sends
//! it over a [`Transport`]. The service side runs a [`ControlServer`] that
//! checks the interface token, decodes the opcode and calls a
//! [`ControlHandler`]. [`ChannelHandler`] is the handler used in practice: it
//! enqueues every command onto the message dispatch queue and replies at
//! once, so the transport thread never waits for the work itself.
//!
//! | Opcode               | Value | Payload          | Reply             |
//! |----------------------|-------|------------------|-------------------|
//! | `HIDE_KEYBOARD_SELF` | 1     | `i32` flags      | `i32` result      |
//! | `ADVANCE_TO_NEXT`    | 2     | `bool`           | `bool`, always true |
//! | `SET_DISPLAY_MODE`   | 3     | `i32` mode       | none              |
//! | `ON_KEYBOARD_SHOWED` | 4     | none             | none              |

pub mod client;
pub mod codec;
pub mod handler;
pub mod server;
pub mod transport;
pub mod types;

pub use client::ControlProxy;
pub use handler::ChannelHandler;
pub use server::{ControlHandler, ControlServer};
pub use transport::{LoopbackTransport, Transport, TransportError};
pub use types::{ControlCommand, ControlError, INTERFACE_TOKEN, Opcode, ProtocolError, Status};
