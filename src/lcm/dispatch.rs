//! Routing of received messages to subscriptions.
//!
//! The pieces here are shared by every provider. A `SubscriberSet` holds
//! the routes the receiver thread needs to sort messages into queues, and
//! a `Dispatcher` holds the user-side half: the callbacks and the
//! notification pipe the user thread sleeps on. Keeping the callbacks on
//! the user side means they are never run from the receiver thread, and
//! they do not need to be `Send`.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use error::{SubscribeError, SubscriptionError};
use lcm::pattern::ChannelPattern;
use lcm::Subscription;
use utils::queue::BoundedQueue;

/// Queue depth given to new subscriptions.
pub const DEFAULT_QUEUE_CAPACITY: usize = 30;

/// A message delivered to a subscription.
///
/// One of these is handed to the callback for every message; it lives
/// until the callback returns.
pub struct ReceiveBuffer {
    /// The channel the message arrived on.
    pub channel: String,

    /// The raw message payload.
    pub data: Vec<u8>,

    /// Microseconds since the Unix epoch at which the message was
    /// received. Log replay substitutes the logged timestamp.
    pub recv_utime: i64,
}

/// The receiver-facing half of one subscription.
struct Route {
    id: u32,
    pattern: ChannelPattern,
    queue: Arc<BoundedQueue<ReceiveBuffer>>,
}

/// The subscription routes, shared between the user thread and the
/// receiver thread.
///
/// The receiver holds the read lock only while sorting one message into
/// queues; subscribing and unsubscribing take the write lock.
pub struct SubscriberSet {
    routes: RwLock<Vec<Route>>,
}
impl SubscriberSet {
    fn new() -> Self {
        SubscriberSet {
            routes: RwLock::new(Vec::new()),
        }
    }

    /// Sorts a message into the queue of every matching subscription, in
    /// registration order.
    ///
    /// Returns true when at least one queue accepted the message. A full
    /// queue drops the message for that subscription and counts the loss.
    pub fn deliver(&self, channel: &str, data: &[u8], recv_utime: i64) -> bool {
        let routes = self.read_routes();

        let mut enqueued = false;
        for route in routes.iter() {
            if !route.pattern.matches(channel) {
                continue;
            }

            trace!("Channel \"{}\" matched subscription {}", channel, route.id);
            let buffer = ReceiveBuffer {
                channel: channel.into(),
                data: data.to_vec(),
                recv_utime,
            };

            if route.queue.push(buffer) {
                enqueued = true;
            } else {
                debug!(
                    "Queue for subscription {} is full. Dropping message on \"{}\".",
                    route.id, channel
                );
            }
        }

        enqueued
    }

    fn insert(&self, id: u32, pattern: ChannelPattern, queue: Arc<BoundedQueue<ReceiveBuffer>>) {
        self.write_routes().push(Route { id, pattern, queue });
    }

    fn remove(&self, id: u32) {
        self.write_routes().retain(|route| route.id != id);
    }

    fn read_routes(&self) -> RwLockReadGuard<Vec<Route>> {
        match self.routes.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_routes(&self) -> RwLockWriteGuard<Vec<Route>> {
        match self.routes.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Wakes the dispatching thread when messages are queued.
///
/// This is a self-pipe. The write end is nonblocking; once the pipe is
/// full it already says everything it needs to.
pub struct Notifier {
    rx: UnixStream,
    tx: UnixStream,
}
impl Notifier {
    fn new() -> io::Result<Self> {
        let (tx, rx) = UnixStream::pair()?;
        tx.set_nonblocking(true)?;
        Ok(Notifier { rx, tx })
    }

    /// Returns a handle the receiver thread can signal through.
    fn handle(&self) -> io::Result<NotifyHandle> {
        Ok(NotifyHandle(self.tx.try_clone()?))
    }

    fn notify(&self) {
        let _ = (&self.tx).write(&[0]);
    }

    /// Sleeps until signalled. `None` waits forever. Returns false on
    /// timeout.
    fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        self.rx.set_read_timeout(timeout)?;

        let mut sink = [0u8; 16];
        match (&self.rx).read(&mut sink) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn fileno(&self) -> RawFd {
        self.rx.as_raw_fd()
    }
}

/// The receiver thread's end of the notification pipe.
pub struct NotifyHandle(UnixStream);
impl NotifyHandle {
    /// Signals the dispatching thread. Never blocks.
    pub fn notify(&self) {
        let _ = (&self.0).write(&[0]);
    }
}

/// One registered subscription, from the user thread's point of view.
struct Handler<'a> {
    id: u32,
    queue: Arc<BoundedQueue<ReceiveBuffer>>,
    callback: Box<FnMut(&ReceiveBuffer) + 'a>,
}

/// The user-thread half of the dispatch engine.
///
/// Providers embed one of these. It owns the callbacks, drains the
/// subscription queues in registration order, and sleeps on the
/// notification pipe between rounds.
pub struct Dispatcher<'a> {
    set: Arc<SubscriberSet>,
    notifier: Notifier,
    handlers: Vec<Handler<'a>>,
    next_subscription_id: u32,
}
impl<'a> Dispatcher<'a> {
    pub fn new() -> io::Result<Self> {
        Ok(Dispatcher {
            set: Arc::new(SubscriberSet::new()),
            notifier: Notifier::new()?,
            handlers: Vec::new(),
            next_subscription_id: 0,
        })
    }

    /// Returns the route table to hand to a receiver thread.
    pub fn subscriber_set(&self) -> Arc<SubscriberSet> {
        self.set.clone()
    }

    /// Returns a wakeup handle to hand to a receiver thread.
    pub fn notify_handle(&self) -> io::Result<NotifyHandle> {
        self.notifier.handle()
    }

    /// Registers a callback under the given pattern.
    pub fn subscribe<F>(&mut self, pattern: &str, callback: F) -> Result<Subscription, SubscribeError>
    where
        F: FnMut(&ReceiveBuffer) + 'a,
    {
        let pattern = ChannelPattern::new(pattern)?;
        let queue = Arc::new(BoundedQueue::new(DEFAULT_QUEUE_CAPACITY));

        let id = self.next_subscription_id;
        self.next_subscription_id += 1;

        self.set.insert(id, pattern, queue.clone());
        self.handlers.push(Handler {
            id,
            queue,
            callback: Box::new(callback),
        });

        Ok(Subscription(id))
    }

    /// Removes a subscription and its queued messages.
    pub fn unsubscribe(&mut self, subscription: &Subscription) -> Result<(), SubscriptionError> {
        let position = match self.handlers.iter().position(|h| h.id == subscription.0) {
            Some(p) => p,
            None => return Err(SubscriptionError::NotFound),
        };

        // Take it out of the shared set first so the receiver stops
        // feeding the queue we are about to drop.
        self.set.remove(subscription.0);
        self.handlers.remove(position);
        Ok(())
    }

    /// Runs at most one queued message per subscription, in registration
    /// order. Returns the number of callbacks invoked.
    pub fn dispatch_round(&mut self) -> usize {
        let mut count = 0;
        for handler in &mut self.handlers {
            if let Some(buffer) = handler.queue.pop() {
                let callback = &mut handler.callback;
                if panic::catch_unwind(AssertUnwindSafe(|| (*callback)(&buffer))).is_err() {
                    error!(
                        "Handler for subscription {} panicked. Continuing.",
                        handler.id
                    );
                }
                count += 1;
            }
        }

        // Anything left over must keep the pipe readable, or the next
        // handle call would sleep on queued messages.
        if self.pending() {
            self.notifier.notify();
        }

        count
    }

    /// Returns true when any subscription has a queued message.
    pub fn pending(&self) -> bool {
        self.handlers.iter().any(|h| !h.queue.is_empty())
    }

    /// Sorts a message into the matching queues and wakes the dispatch
    /// thread. Used by providers that deliver from the user thread.
    pub fn deliver(&self, channel: &str, data: &[u8], recv_utime: i64) -> bool {
        let enqueued = self.set.deliver(channel, data, recv_utime);
        if enqueued {
            self.notifier.notify();
        }
        enqueued
    }

    /// Sleeps until the notification pipe is signalled. `None` waits
    /// forever. Returns false on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        self.notifier.wait(timeout)
    }

    /// Blocks until at least one callback has run.
    pub fn run_until_dispatch(&mut self) -> io::Result<()> {
        loop {
            if self.dispatch_round() > 0 {
                return Ok(());
            }
            self.wait(None)?;
        }
    }

    /// Dispatches for up to `timeout`. Returns the number of callbacks
    /// run, with zero meaning the timeout expired first.
    ///
    /// A zero timeout never sleeps; it delivers whatever is already
    /// queued.
    pub fn run_with_timeout(&mut self, timeout: Duration) -> io::Result<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            let count = self.dispatch_round();
            if count > 0 {
                return Ok(count);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            self.wait(Some(deadline - now))?;
        }
    }

    /// A file descriptor that reads as ready whenever a handle call would
    /// make progress. Intended for external event loops.
    pub fn fileno(&self) -> RawFd {
        self.notifier.fileno()
    }

    pub fn set_queue_capacity(
        &mut self,
        subscription: &Subscription,
        capacity: usize,
    ) -> Result<(), SubscriptionError> {
        self.handler(subscription)?.queue.set_capacity(capacity);
        Ok(())
    }

    pub fn queue_size(&self, subscription: &Subscription) -> Result<usize, SubscriptionError> {
        Ok(self.handler(subscription)?.queue.len())
    }

    pub fn queue_drops(&self, subscription: &Subscription) -> Result<usize, SubscriptionError> {
        Ok(self.handler(subscription)?.queue.dropped())
    }

    fn handler(&self, subscription: &Subscription) -> Result<&Handler<'a>, SubscriptionError> {
        self.handlers
            .iter()
            .find(|h| h.id == subscription.0)
            .ok_or(SubscriptionError::NotFound)
    }
}
