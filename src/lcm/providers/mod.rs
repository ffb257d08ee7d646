//! The transport implementations behind an `Lcm` instance.

#[cfg(feature = "file")]
pub mod file;
#[cfg(feature = "memq")]
pub mod memq;
#[cfg(feature = "udpm")]
pub mod udpm;

use error::PublishError;

/// Longest channel name in bytes, excluding the wire terminator.
pub const MAX_CHANNEL_LENGTH: usize = 255;

/// Checks the routing key constraints shared by every provider.
pub fn validate_channel(channel: &str) -> Result<(), PublishError> {
    if channel.is_empty() {
        return Err(PublishError::EmptyChannel);
    }
    if channel.len() > MAX_CHANNEL_LENGTH {
        return Err(PublishError::ChannelTooLong(channel.len()));
    }
    if channel.bytes().any(|b| b == 0) {
        return Err(PublishError::ChannelContainsNul);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn channel_validation() {
        assert!(validate_channel("POSE").is_ok());
        assert!(validate_channel(&"c".repeat(255)).is_ok());

        assert!(match validate_channel("") {
            Err(PublishError::EmptyChannel) => true,
            _ => false,
        });
        assert!(match validate_channel(&"c".repeat(256)) {
            Err(PublishError::ChannelTooLong(256)) => true,
            _ => false,
        });
        assert!(match validate_channel("bad\0channel") {
            Err(PublishError::ChannelContainsNul) => true,
            _ => false,
        });
    }
}
