//! Process-wide services, passed explicitly.
//!
//! A [`Context`] owns the worker pool, the blocking dispatcher on top of it
//! and the admission ticket queue, and knows how to start the dedicated
//! threads (message consumer, home loop) with the configured names. Create
//! one per process and hand out references; nothing in the crate reaches for
//! a global.

use std::sync::Arc;
use std::time::Duration;

use crate::Error;
use crate::config::BridgeConfig;
use crate::control::{ChannelHandler, ControlServer};
use crate::runtime::dispatcher::BlockingDispatcher;
use crate::runtime::handle::{Handle, HandleError, HomeRuntime};
use crate::runtime::home::HomeLoop;
use crate::runtime::message::{MessageHandler, MessageQueue};
use crate::runtime::pool::WorkerPool;
use crate::sync::Timeout;
use crate::sync::ticket::{Ticket, TicketQueue};
use crate::trace::info;

pub struct Context {
    config: BridgeConfig,
    pool: Arc<WorkerPool>,
    dispatcher: BlockingDispatcher<Arc<WorkerPool>>,
    tickets: Arc<TicketQueue>,
}

impl Context {
    /// Starts the worker pool.
    ///
    /// # Errors
    ///
    /// [`Error::Spawn`] if a worker thread cannot be started.
    pub fn new(config: BridgeConfig) -> Result<Self, Error> {
        let pool = Arc::new(WorkerPool::spawn(
            &config.worker_thread_name,
            config.worker_threads,
        )?);
        let dispatcher = BlockingDispatcher::new(Arc::clone(&pool), config.dispatch_timeout());
        info!(workers = config.worker_threads, "context ready");
        Ok(Self {
            config,
            pool,
            dispatcher,
            tickets: Arc::new(TicketQueue::new()),
        })
    }

    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub const fn dispatcher(&self) -> &BlockingDispatcher<Arc<WorkerPool>> {
        &self.dispatcher
    }

    pub const fn tickets(&self) -> &Arc<TicketQueue> {
        &self.tickets
    }

    /// Pushes a fresh ticket and waits, in configured slices, for its turn.
    ///
    /// The flag is `false` on timeout. Either way the ticket stays queued and
    /// the caller owes exactly one [`TicketQueue::pop`].
    pub fn admit(&self, timeout: Duration) -> (Ticket, bool) {
        let ticket = Ticket::generate();
        self.tickets.push(ticket);
        let ready = self.tickets.wait_turn(
            ticket,
            self.config.ticket_wait_slice(),
            Timeout::Duration(timeout),
        );
        (ticket, ready)
    }

    /// Starts the message consumer thread.
    ///
    /// # Errors
    ///
    /// [`Error::Spawn`] if the thread cannot be started.
    pub fn spawn_message_queue<H: MessageHandler>(&self, handler: H) -> Result<MessageQueue, Error> {
        Ok(MessageQueue::spawn(&self.config.message_thread_name, handler)?)
    }

    /// Starts a home loop thread for handle targets.
    ///
    /// # Errors
    ///
    /// [`Error::Spawn`] if the thread cannot be started.
    pub fn spawn_home_loop(&self) -> Result<Arc<HomeLoop>, Error> {
        Ok(Arc::new(HomeLoop::spawn(&self.config.home_thread_name)?))
    }

    /// A control stub whose handler feeds `queue`.
    #[must_use]
    pub fn control_server(&self, queue: &MessageQueue) -> Arc<ControlServer<ChannelHandler>> {
        Arc::new(ControlServer::new(ChannelHandler::new(queue.sender())))
    }

    /// [`Handle::create`] with the configured release bound.
    ///
    /// # Errors
    ///
    /// See [`Handle::create`].
    pub fn create_handle<Rt: HomeRuntime>(
        &self,
        runtime: Arc<Rt>,
        target: Rt::Target,
    ) -> Result<Handle<Rt>, HandleError> {
        Handle::create(runtime, target, self.config.release_timeout())
    }

    /// Stops the worker pool after queued tasks finish.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::message::{Message, MessageKind};

    fn small() -> BridgeConfig {
        BridgeConfig {
            worker_threads: 2,
            ..BridgeConfig::default()
        }
    }

    #[test]
    fn dispatch_uses_named_workers() {
        let ctx = Context::new(small()).unwrap();
        let name = ctx
            .dispatcher()
            .run_default(|| std::thread::current().name().map(str::to_owned))
            .unwrap()
            .unwrap();
        assert!(name.starts_with("imbridge-worker-"));
        ctx.shutdown();
    }

    #[test]
    fn admit_in_push_order() {
        let ctx = Context::new(small()).unwrap();
        let (first, ready) = ctx.admit(Duration::from_millis(10));
        assert!(ready);

        let (second, ready) = ctx.admit(Duration::from_millis(60));
        assert!(!ready);
        assert_eq!(ctx.tickets().pop(), Some(first));
        assert!(ctx.tickets().is_ready(second));
        ctx.shutdown();
    }

    #[test]
    fn message_queue_thread_is_named() {
        let ctx = Context::new(small()).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let queue = ctx
            .spawn_message_queue(move |_msg: Message| {
                let _ = tx.send(std::thread::current().name().map(str::to_owned));
            })
            .unwrap();
        queue.send(Message::empty(MessageKind::new(1))).unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap().as_deref(),
            Some("imbridge-msg")
        );
        queue.shutdown();
        ctx.shutdown();
    }
}
