use std::env;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub mod dispatch;
mod pattern;
mod providers;
pub mod url;

#[cfg(feature = "file")]
use self::providers::file::FileProvider;
#[cfg(feature = "memq")]
use self::providers::memq::MemqProvider;
#[cfg(feature = "udpm")]
use self::providers::udpm::UdpmProvider;

pub use self::dispatch::ReceiveBuffer;
use self::url::Scheme;
use error::*;

/// Convenience macro for dispatching functions among providers.
macro_rules! provider
{
    ($self:ident.$func:ident($($args:expr),*)) => {
        match $self.provider {
            #[cfg(feature = "udpm")]
            Provider::Udpm(ref mut p) => p.$func($($args),*),

            #[cfg(feature = "memq")]
            Provider::Memq(ref mut p) => p.$func($($args),*),

            #[cfg(feature = "file")]
            Provider::File(ref mut p) => p.$func($($args),*),
        }
    }
}

/// Default LCM URL to be used when the `LCM_DEFAULT_URL` environment variable
/// is not available.
const LCM_DEFAULT_URL: &str = "udpm://239.255.76.67:7667?ttl=0";

/// An LCM instance that handles publishing and subscribing.
///
/// Messages are opaque byte buffers; whatever marshalling the application
/// uses happens before `publish` and after the subscription callback.
pub struct Lcm<'a> {
    /// The backing provider.
    ///
    /// This provider basically does all of the work, with the `Lcm` struct
    /// being a unified frontend.
    provider: Provider<'a>,
}
impl<'a> Lcm<'a> {
    /// Creates a new `Lcm` instance.
    ///
    /// This uses the `LCM_DEFAULT_URL` environment variable to construct a
    /// provider. If the variable does not exist or is empty, it will use the
    /// LCM default of "udpm://239.255.76.67:7667?ttl=0".
    pub fn new() -> Result<Self, InitError> {
        let lcm_default_url = env::var("LCM_DEFAULT_URL");
        let lcm_url: &str = match lcm_default_url {
            Ok(ref s) if s.is_empty() => {
                debug!("LCM_DEFAULT_URL available but empty. Using default settings.");
                LCM_DEFAULT_URL
            }
            Ok(ref s) => {
                debug!("LCM_DEFAULT_URL=\"{}\"", s);
                s
            }
            Err(_) => {
                debug!("LCM_DEFAULT_URL not present or unavailable. Using default settings.");
                LCM_DEFAULT_URL
            }
        };

        Lcm::with_lcm_url(lcm_url)
    }

    /// Create a new `Lcm` instance with the provider constructed from the
    /// supplied LCM URL.
    pub fn with_lcm_url(lcm_url: &str) -> Result<Self, InitError> {
        debug!("Creating LCM instance using \"{}\"", lcm_url);
        let (scheme, network, options) = url::split_lcm_url(lcm_url)?;

        let provider = match scheme {
            #[cfg(feature = "udpm")]
            Scheme::Udpm => Provider::Udpm(UdpmProvider::new(network, &options)?),

            #[cfg(feature = "memq")]
            Scheme::Memq => Provider::Memq(MemqProvider::new(network, &options)?),

            #[cfg(feature = "file")]
            Scheme::File => Provider::File(FileProvider::new(network, &options)?),

            Scheme::NotSpecified => return Err(InitError::InvalidLcmUrl),

            // The udp scheme is reserved, and feature flags may have
            // disabled the others.
            #[allow(unreachable_patterns)]
            scheme => return Err(InitError::UnknownProvider(scheme.name().into())),
        };

        Ok(Lcm { provider })
    }

    /// Subscribes a callback to a pattern of channels.
    ///
    /// The pattern may be a literal channel name, a literal prefix followed
    /// by `.*`, or a regular expression. Regular expressions are implicitly
    /// surrounded by '^' and '$', so they always match whole channel names.
    ///
    /// Each subscription buffers up to 30 messages until `handle` drains
    /// them; once the queue is full, new messages for that subscription are
    /// dropped and counted. Use [`set_queue_capacity`] to change the depth.
    ///
    /// [`set_queue_capacity`]: #method.set_queue_capacity
    pub fn subscribe<F>(&mut self, pattern: &str, callback: F) -> Result<Subscription, SubscribeError>
    where
        F: FnMut(&ReceiveBuffer) + 'a,
    {
        provider!(self.subscribe(pattern, callback))
    }

    /// Unsubscribes a message handler.
    ///
    /// Anything still queued for the subscription is discarded.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> Result<(), SubscriptionError> {
        provider!(self.unsubscribe(subscription))
    }

    /// Publishes a message on the specified channel.
    pub fn publish(&mut self, channel: &str, data: &[u8]) -> Result<(), PublishError> {
        provider!(self.publish(channel, data))
    }

    /// Waits for and dispatches messages.
    ///
    /// At most one message per subscription is dispatched, in subscription
    /// order, with the callbacks running on the calling thread. Blocks
    /// until at least one callback has run.
    pub fn handle(&mut self) -> Result<(), HandleError> {
        provider!(self.handle())
    }

    /// Waits for and dispatches messages, with a timeout.
    ///
    /// Returns the number of callbacks that ran, with zero meaning the
    /// timeout expired first. A zero timeout dispatches whatever is
    /// already queued without waiting.
    pub fn handle_timeout(&mut self, timeout: Duration) -> Result<usize, HandleError> {
        provider!(self.handle_timeout(timeout))
    }

    /// Returns a file descriptor that polls as readable whenever a
    /// `handle` call would make progress.
    ///
    /// Intended for hooking an `Lcm` instance into an external event
    /// loop; after the descriptor signals readiness, call
    /// [`handle_timeout`] with a zero timeout.
    ///
    /// [`handle_timeout`]: #method.handle_timeout
    pub fn fileno(&mut self) -> RawFd {
        provider!(self.fileno())
    }

    /// Changes the number of messages a subscription will buffer between
    /// `handle` calls. A capacity of zero removes the bound.
    pub fn set_queue_capacity(
        &mut self,
        subscription: &Subscription,
        capacity: usize,
    ) -> Result<(), SubscriptionError> {
        provider!(self.set_queue_capacity(subscription, capacity))
    }

    /// Returns the number of messages currently queued for the
    /// subscription.
    pub fn get_queue_size(&mut self, subscription: &Subscription) -> Result<usize, SubscriptionError> {
        provider!(self.get_queue_size(subscription))
    }

    /// Returns the number of messages this subscription has lost to queue
    /// overflow.
    pub fn subscription_drops(
        &mut self,
        subscription: &Subscription,
    ) -> Result<usize, SubscriptionError> {
        provider!(self.subscription_drops(subscription))
    }
}

/// A subscription to an LCM topic.
///
/// Used to unsubscribe from a channel.
#[derive(Debug, PartialEq, Eq)]
pub struct Subscription(u32);

/// The backing providers for the `Lcm` type.
pub enum Provider<'a> {
    /// The UDP Multicast provider.
    #[cfg(feature = "udpm")]
    Udpm(UdpmProvider<'a>),

    /// The in-process queue provider.
    #[cfg(feature = "memq")]
    Memq(MemqProvider<'a>),

    /// The log replay provider.
    #[cfg(feature = "file")]
    File(FileProvider<'a>),
}
