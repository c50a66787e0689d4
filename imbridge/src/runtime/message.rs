//! Message dispatch queue.
//!
//! Decouples the threads that receive commands from the thread that executes
//! them. Any number of [`MessageSender`]s enqueue without blocking; exactly one
//! consumer thread hands each [`Message`] to a [`MessageHandler`], once, in
//! enqueue order.
//!
//! Message payloads are serialized with postcard into a fixed-size frame. A
//! payload that does not fit is reported as an [`AllocationError`] when the
//! message is built, before anything is enqueued.

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::trace::{debug, error, info, trace};

/// Payload capacity of a single message.
pub const MESSAGE_PAYLOAD_CAP: usize = 64;

/// Opcode identifying what a message asks the consumer to do.
///
/// The queue does not interpret kinds; producers and the handler agree on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageKind(u32);

impl MessageKind {
    #[must_use]
    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    #[must_use]
    pub const fn code(self) -> u32 {
        self.0
    }
}

impl From<u32> for MessageKind {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message could not be constructed.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Serialization failed or ran out of payload capacity.
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] postcard::Error),
}

/// Payload bytes could not be read back as the requested type.
#[derive(Debug, Error)]
#[error("payload decode failed for kind {kind}: {source}")]
pub struct DecodeError {
    pub kind: MessageKind,
    #[source]
    pub source: postcard::Error,
}

/// One unit of work for the consumer thread.
#[derive(Clone, Copy)]
pub struct Message {
    kind: MessageKind,
    len: u8,
    payload: [u8; MESSAGE_PAYLOAD_CAP],
}

impl Message {
    /// Builds a message whose payload is `value` serialized with postcard.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError`] if `value` does not fit in
    /// [`MESSAGE_PAYLOAD_CAP`] bytes.
    pub fn new<T: Serialize>(kind: MessageKind, value: &T) -> Result<Self, AllocationError> {
        let mut payload = [0u8; MESSAGE_PAYLOAD_CAP];
        let len = postcard::to_slice(value, &mut payload)?.len();
        Ok(Self {
            kind,
            // MESSAGE_PAYLOAD_CAP fits in a u8 and to_slice never exceeds it
            len: len as u8,
            payload,
        })
    }

    /// Builds a message with no payload.
    #[must_use]
    pub const fn empty(kind: MessageKind) -> Self {
        Self {
            kind,
            len: 0,
            payload: [0u8; MESSAGE_PAYLOAD_CAP],
        }
    }

    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The serialized payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload[..usize::from(self.len)]
    }

    /// Deserializes the payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the bytes are not a valid `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        postcard::from_bytes(self.payload()).map_err(|source| DecodeError {
            kind: self.kind,
            source,
        })
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("payload", &self.payload())
            .finish()
    }
}

/// Executes messages on the consumer thread.
pub trait MessageHandler: Send + 'static {
    fn handle(&mut self, msg: Message);
}

impl<F> MessageHandler for F
where
    F: FnMut(Message) + Send + 'static,
{
    fn handle(&mut self, msg: Message) {
        self(msg);
    }
}

/// The consumer thread has exited; the message was not enqueued.
#[derive(Debug, Error)]
#[error("message queue is closed")]
pub struct QueueClosed(pub Message);

/// Producer end of a [`MessageQueue`]. Cheap to clone, never blocks.
///
/// All senders share one channel. Closing the queue closes it for every
/// sender at once, so nothing is accepted that the consumer will not run.
#[derive(Clone)]
pub struct MessageSender {
    tx: Arc<Mutex<Option<Sender<Message>>>>,
}

impl MessageSender {
    /// Enqueues `msg` for the consumer.
    ///
    /// # Errors
    ///
    /// Returns the message back in [`QueueClosed`] once the queue is shutting
    /// down or the consumer is gone.
    pub fn send(&self, msg: Message) -> Result<(), QueueClosed> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => {
                trace!(kind = %msg.kind(), "message enqueued");
                tx.send(msg).map_err(|_| QueueClosed(msg))
            }
            None => Err(QueueClosed(msg)),
        }
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Unbounded FIFO queue drained by one dedicated consumer thread.
///
/// Dropping the queue closes it to new messages and lets the consumer exit
/// after the ones already accepted, without waiting. Use
/// [`MessageQueue::shutdown`] to join it.
pub struct MessageQueue {
    sender: MessageSender,
    consumer: Option<JoinHandle<u64>>,
}

impl MessageQueue {
    /// Starts the consumer thread named `name` running `handler`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn<H: MessageHandler>(name: &str, handler: H) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let consumer = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || consume(&rx, handler))?;

        debug!(thread = name, "message consumer started");

        Ok(Self {
            sender: MessageSender {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            consumer: Some(consumer),
        })
    }

    /// Returns a new producer handle.
    #[must_use]
    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    /// Enqueues `msg` for the consumer.
    ///
    /// # Errors
    ///
    /// See [`MessageSender::send`].
    pub fn send(&self, msg: Message) -> Result<(), QueueClosed> {
        self.sender.send(msg)
    }

    /// Closes the queue to new messages, lets the consumer drain every
    /// message already accepted, then joins it.
    ///
    /// Returns how many messages were handed to the handler.
    pub fn shutdown(mut self) -> u64 {
        self.sender.close();
        let processed = match self.consumer.take().map(JoinHandle::join) {
            Some(Ok(processed)) => processed,
            Some(Err(_)) => {
                error!("message consumer thread panicked");
                0
            }
            None => 0,
        };
        info!(processed, "message consumer stopped");
        processed
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        self.sender.close();
    }
}

fn consume<H: MessageHandler>(rx: &Receiver<Message>, mut handler: H) -> u64 {
    let mut processed = 0u64;
    for msg in rx {
        if panic::catch_unwind(AssertUnwindSafe(|| handler.handle(msg))).is_err() {
            error!(kind = %msg.kind(), "message handler panicked");
        }
        processed += 1;
    }
    debug!(processed, "message queue closed, consumer exiting");
    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;

    const ECHO: MessageKind = MessageKind::new(7);

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Sample {
        a: u32,
        b: bool,
    }

    #[test]
    fn payload_roundtrips_through_postcard() {
        let msg = Message::new(ECHO, &Sample { a: 0xdead, b: true }).unwrap();
        assert_eq!(msg.kind(), ECHO);
        assert_eq!(msg.decode::<Sample>().unwrap(), Sample { a: 0xdead, b: true });
    }

    #[test]
    fn oversized_payload_is_allocation_error() {
        let big = vec![0xAAu8; MESSAGE_PAYLOAD_CAP * 2];
        assert!(matches!(
            Message::new(ECHO, &big),
            Err(AllocationError::Serialize(_))
        ));
    }

    #[test]
    fn empty_message_has_no_payload() {
        let msg = Message::empty(ECHO);
        assert!(msg.payload().is_empty());
    }

    #[test]
    fn executes_in_fifo_order_on_consumer_thread() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let queue = MessageQueue::spawn("msg-test", move |msg: Message| {
            let name = thread::current().name().map(str::to_owned);
            sink.lock()
                .unwrap()
                .push((msg.decode::<u32>().unwrap(), name));
        })
        .unwrap();

        for i in 0..100u32 {
            queue.send(Message::new(ECHO, &i).unwrap()).unwrap();
        }
        assert_eq!(queue.shutdown(), 100);

        let seen = seen.lock().unwrap();
        let values: Vec<u32> = seen.iter().map(|(v, _)| *v).collect();
        assert_eq!(values, (0..100).collect::<Vec<_>>());
        assert!(seen.iter().all(|(_, name)| name.as_deref() == Some("msg-test")));
    }

    #[test]
    fn concurrent_producers_each_message_once() {
        let count = Arc::new(Mutex::new(0u32));
        let sink = Arc::clone(&count);
        let queue = MessageQueue::spawn("msg-test", move |_msg: Message| {
            *sink.lock().unwrap() += 1;
        })
        .unwrap();

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let sender = queue.sender();
                thread::spawn(move || {
                    for i in 0..250u32 {
                        sender.send(Message::new(ECHO, &i).unwrap()).unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        assert_eq!(queue.shutdown(), 1000);
        assert_eq!(*count.lock().unwrap(), 1000);
    }

    #[test]
    fn send_after_shutdown_returns_message() {
        let queue = MessageQueue::spawn("msg-test", |_msg: Message| {}).unwrap();
        let sender = queue.sender();
        queue.shutdown();

        thread::sleep(Duration::from_millis(10));
        let err = sender.send(Message::empty(ECHO)).unwrap_err();
        assert_eq!(err.0.kind(), ECHO);
    }

    #[test]
    fn messages_accepted_while_closing_are_all_executed() {
        let (release, gate) = mpsc::channel::<()>();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let queue = MessageQueue::spawn("msg-test", move |msg: Message| {
            let value = msg.decode::<u32>().unwrap();
            if value == 0 {
                let _ = gate.recv();
            }
            sink.lock().unwrap().push(value);
        })
        .unwrap();

        let sender = queue.sender();
        sender.send(Message::new(ECHO, &0u32).unwrap()).unwrap();
        let closer = thread::spawn(move || queue.shutdown());

        // The consumer is stuck on the first message while the queue closes.
        let mut accepted = vec![0u32];
        for i in 1.. {
            if sender.send(Message::new(ECHO, &i).unwrap()).is_err() {
                break;
            }
            accepted.push(i);
        }
        release.send(()).unwrap();

        let processed = closer.join().unwrap();
        assert_eq!(processed, accepted.len() as u64);
        assert_eq!(*seen.lock().unwrap(), accepted);
    }

    #[test]
    fn panicking_handler_does_not_stop_consumer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let queue = MessageQueue::spawn("msg-test", move |msg: Message| {
            let value = msg.decode::<u32>().unwrap();
            assert_ne!(value, 1, "bad message");
            sink.lock().unwrap().push(value);
        })
        .unwrap();

        for i in 0..3u32 {
            queue.send(Message::new(ECHO, &i).unwrap()).unwrap();
        }
        assert_eq!(queue.shutdown(), 3);
        assert_eq!(*seen.lock().unwrap(), [0, 2]);
    }
}
