//! The log replay provider.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;

use error::*;
use eventlog::{EventLog, LogMode};
use lcm::dispatch::{Dispatcher, ReceiveBuffer};
use lcm::Subscription;

/// The provider behind `file://` URLs.
///
/// Replays an event log through the normal subscription machinery, using
/// each event's logged timestamp as its receive time. The log is strictly
/// read-only; publishing is rejected.
pub struct FileProvider<'a> {
    log: EventLog,
    dispatcher: Dispatcher<'a>,
}
impl<'a> FileProvider<'a> {
    /// Opens the log named by the network string.
    pub fn new(network: &str, options: &HashMap<&str, &str>) -> Result<Self, InitError> {
        if network.is_empty() {
            return Err(InitError::InvalidLcmUrl);
        }
        for key in options.keys() {
            warn!("Ignoring unknown option \"{}\"", key);
        }

        debug!("Opening event log \"{}\" for replay", network);
        let log = match EventLog::open(network, LogMode::Read) {
            Ok(log) => log,
            Err(LogError::IoError(e)) => return Err(InitError::IoError(e)),
            Err(_) => return Err(InitError::InvalidLcmUrl),
        };

        Ok(FileProvider {
            log,
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

    /// The log is read-only, so this always fails.
    pub fn publish(&mut self, _channel: &str, _data: &[u8]) -> Result<(), PublishError> {
        Err(PublishError::ReadOnly)
    }

    /// Dispatches the next event that matches a subscription.
    ///
    /// Fails with `HandleError::EndOfLog` once the log is exhausted.
    pub fn handle(&mut self) -> Result<(), HandleError> {
        loop {
            if self.dispatcher.dispatch_round() > 0 {
                return Ok(());
            }
            if !self.pump()? {
                return Err(HandleError::EndOfLog);
            }
        }
    }

    /// Dispatches the next matching event, treating the end of the log
    /// like a timeout.
    ///
    /// The timeout itself is never waited on; the log is local, so there
    /// is either a next event or there never will be.
    pub fn handle_timeout(&mut self, _timeout: Duration) -> Result<usize, HandleError> {
        loop {
            let count = self.dispatcher.dispatch_round();
            if count > 0 {
                return Ok(count);
            }
            if !self.pump()? {
                return Ok(0);
            }
        }
    }

    /// The descriptor of the log file itself.
    pub fn fileno(&mut self) -> RawFd {
        self.log.fileno()
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

    /// Reads events until one lands in a subscription queue. Returns
    /// false at the end of the log.
    fn pump(&mut self) -> Result<bool, HandleError> {
        loop {
            let event = match self.log.read_next_event() {
                Ok(Some(event)) => event,
                Ok(None) => return Ok(false),
                Err(LogError::IoError(e)) => return Err(HandleError::IoError(e)),
                Err(e) => {
                    warn!("Stopping replay on a damaged log: {}", e);
                    return Ok(false);
                }
            };

            if self
                .dispatcher
                .deliver(&event.channel, &event.data, event.timestamp)
            {
                return Ok(true);
            }
        }
    }
}
