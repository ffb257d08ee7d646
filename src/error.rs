//! Error types associated with LCM operations.
//!
//! In general, one will want to return an `Error` from a function as all of
//! the other errors can be converted into the `Error` using either the `?`
//! operator or `From`. The other error types exist in case one wants to
//! attempt to recover from an error.

use std::{io, string};
use regex;

// TODO:
// We should hide the `From<T>` implementations for all of these errors. Most
// of them only exist to make the code more readable in this crate and probably
// shouldn't be used by the end user. Until that is done, I have hidden the
// trait implementations from the docs.

/// A generic LCM error.
///
/// If one does not intend to try and recover from errors, this is the best
/// error type to handle. All of the LCM errors can be converted to this type
/// using the `?` operator.
#[derive(Debug, Fail)]
pub enum Error {
    /// An error happened while initializing the LCM instance.
    #[fail(display = "An error happened during initialization.")]
    Init(#[cause] InitError),

    /// An error happened while trying to subscribe to a channel.
    #[fail(display = "Failed to subscribe to the channel.")]
    Subscribe(#[cause] SubscribeError),

    /// An error happened while trying to publish a message.
    #[fail(display = "Failed to publish message.")]
    Publish(#[cause] PublishError),

    /// An error happened while trying to handle incoming messages.
    #[fail(display = "Unable to handle incoming messages.")]
    Handle(#[cause] HandleError),

    /// An operation referred to a subscription that no longer exists.
    #[fail(display = "Failed to modify the subscription.")]
    Subscription(#[cause] SubscriptionError),

    /// An error happened while reading or writing an event log.
    #[fail(display = "Event log operation failed.")]
    Log(#[cause] LogError),
}
impl From<InitError> for Error {
    fn from(err: InitError) -> Self {
        Error::Init(err)
    }
}
impl From<SubscribeError> for Error {
    fn from(err: SubscribeError) -> Self {
        Error::Subscribe(err)
    }
}
impl From<PublishError> for Error {
    fn from(err: PublishError) -> Self {
        Error::Publish(err)
    }
}
impl From<HandleError> for Error {
    fn from(err: HandleError) -> Self {
        Error::Handle(err)
    }
}
impl From<SubscriptionError> for Error {
    fn from(err: SubscriptionError) -> Self {
        Error::Subscription(err)
    }
}
impl From<LogError> for Error {
    fn from(err: LogError) -> Self {
        Error::Log(err)
    }
}

/// The LCM instance was unable to start.
#[derive(Debug, Fail)]
pub enum InitError {
    /// There was an IO issue that prevented the provider from starting.
    #[fail(display = "The LCM provider failed to start due to an IO error.")]
    IoError(#[cause] io::Error),

    /// The supplied LCM URL requested a provider that isn't known.
    ///
    /// If you get this error, check the feature flags on the crate. It is
    /// possible that the provider you are requesting is disabled.
    #[fail(display = "Unknown provider \"{}\".", _0)]
    UnknownProvider(String),

    /// The provided LCM URL was not valid.
    #[fail(display = "Invalid LCM URL.")]
    InvalidLcmUrl,

    /// An option in the LCM URL had a value that could not be parsed.
    #[fail(display = "Invalid value \"{}\" for option \"{}\".", value, key)]
    InvalidOption {
        /// The option name.
        key: String,
        /// The value that failed to parse.
        value: String,
    },
}

/// The attempt to subscribe to a channel was unsuccessful.
#[derive(Debug, Fail)]
pub enum SubscribeError {
    /// The provided string was an invalid regular expression.
    #[fail(display = "Invalid regular expression used.")]
    InvalidRegex(#[cause] regex::Error),

    /// The provider was unable to subscribe to the topic.
    ///
    /// Check the log for more information.
    #[fail(display = "The provider failed to subscribe to the topic.")]
    ProviderIssue,
}

/// Publishing to a channel failed.
#[derive(Debug, Fail)]
pub enum PublishError {
    /// The channel name was empty.
    #[fail(display = "Channel names must not be empty.")]
    EmptyChannel,

    /// The channel name does not fit in the wire format.
    #[fail(display = "Channel name is {} bytes long. The limit is 255.", _0)]
    ChannelTooLong(usize),

    /// The channel name contains a NUL byte.
    ///
    /// Channel names are NUL terminated on the wire, so an embedded NUL
    /// would truncate the name on every receiver.
    #[fail(display = "Channel name contains a NUL byte.")]
    ChannelContainsNul,

    /// The message is too large to ever be reassembled by a receiver.
    #[fail(display = "Message is {} bytes long. The limit is 300000.", _0)]
    MessageTooLarge(usize),

    /// The provider is backed by a read-only source, such as a log file.
    #[fail(display = "The provider is read-only.")]
    ReadOnly,

    /// There was an IO issue that prevented the provider from sending the
    /// message.
    #[fail(display = "Failed to send the message due to an IO error.")]
    IoError(#[cause] io::Error),

    /// The provider was unable to publish the message.
    ///
    /// Check the log for more information.
    #[fail(display = "The provider was unable to publish the message.")]
    ProviderIssue,
}

/// Error occured while trying to handle incoming messages.
#[derive(Debug, Fail)]
pub enum HandleError {
    /// There was an IO error while trying to handle messages.
    #[fail(display = "Failed to handle messages due to an IO error.")]
    IoError(#[cause] io::Error),

    /// The context was created in transmit-only mode and cannot receive.
    #[fail(display = "The context is transmit-only.")]
    TransmitOnly,

    /// A log replay provider reached the end of its log.
    #[fail(display = "The end of the event log has been reached.")]
    EndOfLog,

    /// The provider was unable to handle the incoming messages.
    ///
    /// Check the log for more information.
    #[fail(display = "The provider was unable to handle the incoming messages.")]
    ProviderIssue,
}

/// An operation on an existing subscription failed.
#[derive(Debug, Fail)]
pub enum SubscriptionError {
    /// The subscription is not registered with this context.
    #[fail(display = "The subscription is not registered with this context.")]
    NotFound,
}

/// An error occurred while trying to encode a value.
#[derive(Debug, Fail)]
pub enum EncodeError {
    /// The output buffer does not have room for the encoded value.
    #[fail(display = "Buffer too small. Needed {} bytes, found {}.", needed, available)]
    BufferTooSmall {
        /// The number of bytes the value needs.
        needed: usize,
        /// The number of bytes left in the buffer.
        available: usize,
    },
}

/// An error occurred while trying to decode a value.
#[derive(Debug, Fail)]
pub enum DecodeError {
    /// The input buffer ended before the value did.
    #[fail(display = "Buffer too small. Needed {} bytes, found {}.", needed, available)]
    BufferTooSmall {
        /// The number of bytes the value needs.
        needed: usize,
        /// The number of bytes left in the buffer.
        available: usize,
    },

    /// The size variable for a string was invalid.
    #[fail(display = "Invalid string size of {}.", _0)]
    InvalidSize(i64),

    /// A string was not valid UTF-8.
    #[fail(display = "Invalid Unicode found.")]
    Utf8Error(#[cause] string::FromUtf8Error),

    /// A string was missing the null terminator.
    #[fail(display = "String is missing the null terminator.")]
    MissingNullTerminator,
}

/// A datagram was rejected by the wire decoder.
///
/// The protocol is lossy by design, so these never reach the user. The
/// receiver logs them and increments a counter.
#[derive(Debug, Fail)]
pub enum DatagramError {
    /// The datagram is too short to contain its header.
    #[fail(display = "Datagram of {} bytes is too short.", _0)]
    TooShort(usize),

    /// The first four bytes are not one of the two known magic numbers.
    #[fail(display = "Unknown magic number 0x{:08X}.", _0)]
    UnknownMagic(u32),

    /// The channel name is not NUL terminated within the datagram.
    #[fail(display = "Channel name is not NUL terminated.")]
    UnterminatedChannel,

    /// The channel name exceeds the 255 byte limit.
    #[fail(display = "Channel name is {} bytes long. The limit is 255.", _0)]
    ChannelTooLong(usize),

    /// The channel name is not valid UTF-8.
    #[fail(display = "Channel name is not valid UTF-8.")]
    InvalidUtf8,

    /// The declared message size exceeds the reassembly limit.
    #[fail(display = "Declared message size of {} bytes is too large.", _0)]
    MessageTooLarge(u32),

    /// The declared fragment count is zero or exceeds the limit.
    #[fail(display = "Invalid fragment count of {}.", _0)]
    BadFragmentCount(u16),

    /// The fragment id is not less than the declared fragment count.
    #[fail(display = "Fragment id {} out of range for {} fragments.", id, count)]
    BadFragmentId {
        /// The fragment's position within the message.
        id: u16,
        /// The number of fragments in the message.
        count: u16,
    },

    /// The fragment extends past the declared message size.
    #[fail(display = "Fragment at offset {} with {} bytes overruns the {} byte message.", offset, len, total)]
    FragmentOverrun {
        /// The fragment's offset within the message.
        offset: u32,
        /// The fragment's payload length.
        len: usize,
        /// The declared size of the full message.
        total: u32,
    },
}

/// An error occurred while reading or writing an event log.
#[derive(Debug, Fail)]
pub enum LogError {
    /// There was an IO error while accessing the log file.
    #[fail(display = "Failed to access the log due to an IO error.")]
    IoError(#[cause] io::Error),

    /// A write was attempted on a log opened for reading.
    #[fail(display = "The log is open for reading.")]
    NotWritable,

    /// A read was attempted on a log opened for writing.
    #[fail(display = "The log is open for writing.")]
    NotReadable,

    /// An event frame declared lengths that cannot be real.
    #[fail(display = "Corrupt event with channel length {} and data length {}.", channel_len, data_len)]
    CorruptEvent {
        /// The declared channel length.
        channel_len: i32,
        /// The declared payload length.
        data_len: i32,
    },

    /// A timestamp seek could not locate any event.
    #[fail(display = "Unable to locate an event while seeking.")]
    SeekFailed,
}

#[doc(hidden)]
pub mod from {
    use super::*;

    #[doc(hidden)]
    impl From<io::Error> for InitError {
        fn from(err: io::Error) -> Self {
            InitError::IoError(err)
        }
    }
    #[doc(hidden)]
    impl From<regex::Error> for SubscribeError {
        fn from(err: regex::Error) -> Self {
            SubscribeError::InvalidRegex(err)
        }
    }
    #[doc(hidden)]
    impl From<io::Error> for PublishError {
        fn from(err: io::Error) -> Self {
            PublishError::IoError(err)
        }
    }
    #[doc(hidden)]
    impl From<io::Error> for HandleError {
        fn from(err: io::Error) -> Self {
            HandleError::IoError(err)
        }
    }
    #[doc(hidden)]
    impl From<io::Error> for LogError {
        fn from(err: io::Error) -> Self {
            LogError::IoError(err)
        }
    }
    #[doc(hidden)]
    impl From<string::FromUtf8Error> for DecodeError {
        fn from(err: string::FromUtf8Error) -> Self {
            DecodeError::Utf8Error(err)
        }
    }
}
