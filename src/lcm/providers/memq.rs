//! The in-process queue provider.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;

use error::*;
use lcm::dispatch::{Dispatcher, ReceiveBuffer};
use lcm::Subscription;
use utils::time;

/// The provider behind `memq://` URLs.
///
/// Nothing ever touches a socket: `publish` sorts the message straight
/// into the matching subscription queues and `handle` drains them on the
/// caller's thread. A zero timeout therefore delivers everything that has
/// been published so far, which makes this provider convenient for
/// deterministic unit tests.
pub struct MemqProvider<'a> {
    dispatcher: Dispatcher<'a>,
}
impl<'a> MemqProvider<'a> {
    /// Creates a new in-process provider.
    pub fn new(network: &str, options: &HashMap<&str, &str>) -> Result<Self, InitError> {
        if !network.is_empty() {
            warn!("The memq provider ignores the network string \"{}\".", network);
        }
        for key in options.keys() {
            warn!("Ignoring unknown option \"{}\"", key);
        }

        Ok(MemqProvider {
            dispatcher: Dispatcher::new()?,
        })
    }

    /// Subscribes a callback to a pattern of channels.
    pub fn subscribe<F>(&mut self, pattern: &str, callback: F) -> Result<Subscription, SubscribeError>
    where
        F: FnMut(&ReceiveBuffer) + 'a,
    {
        self.dispatcher.subscribe(pattern, callback)
    }

    /// Unsubscribes a message handler.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> Result<(), SubscriptionError> {
        self.dispatcher.unsubscribe(&subscription)
    }

    /// Publishes a message on the specified channel.
    ///
    /// The message lands in the matching subscription queues before this
    /// returns. No serialization happens.
    pub fn publish(&mut self, channel: &str, data: &[u8]) -> Result<(), PublishError> {
        super::validate_channel(channel)?;
        self.dispatcher.deliver(channel, data, time::timestamp_now());
        Ok(())
    }

    /// Waits for and dispatches messages.
    pub fn handle(&mut self) -> Result<(), HandleError> {
        self.dispatcher.run_until_dispatch()?;
        Ok(())
    }

    /// Waits for and dispatches messages, with a timeout.
    ///
    /// Returns the number of callbacks invoked.
    pub fn handle_timeout(&mut self, timeout: Duration) -> Result<usize, HandleError> {
        Ok(self.dispatcher.run_with_timeout(timeout)?)
    }

    pub fn fileno(&mut self) -> RawFd {
        self.dispatcher.fileno()
    }

    pub fn set_queue_capacity(
        &mut self,
        subscription: &Subscription,
        capacity: usize,
    ) -> Result<(), SubscriptionError> {
        self.dispatcher.set_queue_capacity(subscription, capacity)
    }

    pub fn get_queue_size(&mut self, subscription: &Subscription) -> Result<usize, SubscriptionError> {
        self.dispatcher.queue_size(subscription)
    }

    pub fn subscription_drops(
        &mut self,
        subscription: &Subscription,
    ) -> Result<usize, SubscriptionError> {
        self.dispatcher.queue_drops(subscription)
    }
}
