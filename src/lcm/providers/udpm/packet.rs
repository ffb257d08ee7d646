//! The two UDPM wire formats.
//!
//! Every datagram starts with a four byte magic number. Messages that fit
//! in a single datagram use the short format; anything larger is split
//! into fragments that the receiver reassembles. All header integers are
//! big-endian.
//!
//! Short datagrams look like this:
//!
//! ```text
//! magic (u32) | msg_seq (u32) | channel (NUL terminated) | payload
//! ```
//!
//! and fragment datagrams like this:
//!
//! ```text
//! magic (u32) | msg_seq (u32) | total_size (u32) | fragment_offset (u32) |
//! fragment_id (u16) | fragments_in_msg (u16) |
//! channel (NUL terminated, fragment zero only) | payload
//! ```

use byteorder::{ByteOrder, NetworkEndian};
use std::str;

use error::DatagramError;
use lcm::providers::MAX_CHANNEL_LENGTH;

/// Magic number opening a short message datagram.
pub const SHORT_MESSAGE_MAGIC: u32 = 0x4C43_3032;

/// Magic number opening a message fragment datagram.
pub const FRAGMENT_MAGIC: u32 = 0x4C43_3033;

/// The header size for short datagrams.
pub const SHORT_HEADER_SIZE: usize = 8;

/// The header size for fragment datagrams.
pub const FRAGMENT_HEADER_SIZE: usize = 20;

/// Size of the publish scratch buffer. No emitted datagram is larger.
pub const PUBLISH_BUFFER_SIZE: usize = 8192;

/// Worst case header: a fragment header plus a full channel name, with
/// room to spare.
pub const MAX_HEADER_LENGTH: usize = 300;

/// Payload bytes carried per fragment. Payloads under this limit go out
/// as a single short datagram instead.
pub const MAX_FRAGMENT_PAYLOAD: usize = PUBLISH_BUFFER_SIZE - MAX_HEADER_LENGTH;

/// Largest message the receive side will reassemble.
pub const MAX_MESSAGE_SIZE: usize = 300_000;

/// Most fragments a single message may span.
pub const MAX_FRAGMENTS: usize = 256;

/// A decoded datagram, borrowing from the receive buffer.
#[derive(Debug)]
pub enum Packet<'a> {
    Short(ShortMessage<'a>),
    Fragment(Fragment<'a>),
}

/// A complete message carried by a single datagram.
#[derive(Debug)]
pub struct ShortMessage<'a> {
    pub msg_seq: u32,
    pub channel: &'a str,
    pub payload: &'a [u8],
}

/// One slice of a fragmented message.
#[derive(Debug)]
pub struct Fragment<'a> {
    /// Shared by all fragments of one message.
    pub msg_seq: u32,
    /// Size of the reassembled message.
    pub total_size: u32,
    /// Where this fragment's payload lands in the message.
    pub fragment_offset: u32,
    pub fragment_id: u16,
    pub fragments_in_msg: u16,
    /// Carried by fragment zero only.
    pub channel: Option<&'a str>,
    pub payload: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Decodes a received datagram.
    ///
    /// Anything that fails to validate is an error; the receiver drops
    /// and counts those without telling anyone, since the protocol is
    /// lossy anyway.
    pub fn parse(datagram: &'a [u8]) -> Result<Packet<'a>, DatagramError> {
        if datagram.len() < 4 {
            return Err(DatagramError::TooShort(datagram.len()));
        }

        match NetworkEndian::read_u32(&datagram[..4]) {
            SHORT_MESSAGE_MAGIC => parse_short(datagram),
            FRAGMENT_MAGIC => parse_fragment(datagram),
            magic => Err(DatagramError::UnknownMagic(magic)),
        }
    }
}

fn parse_short(datagram: &[u8]) -> Result<Packet, DatagramError> {
    if datagram.len() < SHORT_HEADER_SIZE {
        return Err(DatagramError::TooShort(datagram.len()));
    }

    let msg_seq = NetworkEndian::read_u32(&datagram[4..8]);
    let (channel, payload) = parse_channel(&datagram[SHORT_HEADER_SIZE..])?;

    Ok(Packet::Short(ShortMessage {
        msg_seq,
        channel,
        payload,
    }))
}

fn parse_fragment(datagram: &[u8]) -> Result<Packet, DatagramError> {
    if datagram.len() < FRAGMENT_HEADER_SIZE {
        return Err(DatagramError::TooShort(datagram.len()));
    }

    let msg_seq = NetworkEndian::read_u32(&datagram[4..8]);
    let total_size = NetworkEndian::read_u32(&datagram[8..12]);
    let fragment_offset = NetworkEndian::read_u32(&datagram[12..16]);
    let fragment_id = NetworkEndian::read_u16(&datagram[16..18]);
    let fragments_in_msg = NetworkEndian::read_u16(&datagram[18..20]);

    if total_size as usize > MAX_MESSAGE_SIZE {
        return Err(DatagramError::MessageTooLarge(total_size));
    }
    if fragments_in_msg == 0 || fragments_in_msg as usize > MAX_FRAGMENTS {
        return Err(DatagramError::BadFragmentCount(fragments_in_msg));
    }
    if fragment_id >= fragments_in_msg {
        return Err(DatagramError::BadFragmentId {
            id: fragment_id,
            count: fragments_in_msg,
        });
    }

    let (channel, payload) = if fragment_id == 0 {
        let (channel, payload) = parse_channel(&datagram[FRAGMENT_HEADER_SIZE..])?;
        (Some(channel), payload)
    } else {
        (None, &datagram[FRAGMENT_HEADER_SIZE..])
    };

    if fragment_offset as usize + payload.len() > total_size as usize {
        return Err(DatagramError::FragmentOverrun {
            offset: fragment_offset,
            len: payload.len(),
            total: total_size,
        });
    }

    Ok(Packet::Fragment(Fragment {
        msg_seq,
        total_size,
        fragment_offset,
        fragment_id,
        fragments_in_msg,
        channel,
        payload,
    }))
}

/// Splits a NUL terminated channel name off the front of `buf`.
fn parse_channel(buf: &[u8]) -> Result<(&str, &[u8]), DatagramError> {
    let nul = match buf.iter().position(|&b| b == 0) {
        Some(p) => p,
        None => return Err(DatagramError::UnterminatedChannel),
    };

    if nul > MAX_CHANNEL_LENGTH {
        return Err(DatagramError::ChannelTooLong(nul));
    }

    let channel = str::from_utf8(&buf[..nul]).map_err(|_| DatagramError::InvalidUtf8)?;
    Ok((channel, &buf[nul + 1..]))
}

/// Fills `buf` with a short message datagram. Returns the datagram
/// length.
///
/// The caller is responsible for making sure everything fits; the publish
/// path guarantees it by construction.
pub fn encode_short(buf: &mut [u8], msg_seq: u32, channel: &str, payload: &[u8]) -> usize {
    NetworkEndian::write_u32(&mut buf[0..4], SHORT_MESSAGE_MAGIC);
    NetworkEndian::write_u32(&mut buf[4..8], msg_seq);

    let mut pos = SHORT_HEADER_SIZE;
    buf[pos..pos + channel.len()].copy_from_slice(channel.as_bytes());
    pos += channel.len();
    buf[pos] = 0;
    pos += 1;

    buf[pos..pos + payload.len()].copy_from_slice(payload);
    pos + payload.len()
}

/// Fills `buf` with one fragment datagram. Returns the datagram length.
pub fn encode_fragment(
    buf: &mut [u8],
    msg_seq: u32,
    total_size: u32,
    fragment_offset: u32,
    fragment_id: u16,
    fragments_in_msg: u16,
    channel: &str,
    chunk: &[u8],
) -> usize {
    NetworkEndian::write_u32(&mut buf[0..4], FRAGMENT_MAGIC);
    NetworkEndian::write_u32(&mut buf[4..8], msg_seq);
    NetworkEndian::write_u32(&mut buf[8..12], total_size);
    NetworkEndian::write_u32(&mut buf[12..16], fragment_offset);
    NetworkEndian::write_u16(&mut buf[16..18], fragment_id);
    NetworkEndian::write_u16(&mut buf[18..20], fragments_in_msg);

    let mut pos = FRAGMENT_HEADER_SIZE;
    if fragment_id == 0 {
        buf[pos..pos + channel.len()].copy_from_slice(channel.as_bytes());
        pos += channel.len();
        buf[pos] = 0;
        pos += 1;
    }

    buf[pos..pos + chunk.len()].copy_from_slice(chunk);
    pos + chunk.len()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn short_round_trip() {
        let mut buf = [0u8; PUBLISH_BUFFER_SIZE];
        let len = encode_short(&mut buf, 42, "POSE", &[1, 2, 3]);
        assert_eq!(len, SHORT_HEADER_SIZE + 5 + 3);

        match Packet::parse(&buf[..len]).unwrap() {
            Packet::Short(msg) => {
                assert_eq!(msg.msg_seq, 42);
                assert_eq!(msg.channel, "POSE");
                assert_eq!(msg.payload, &[1, 2, 3]);
            }
            _ => panic!("expected a short message"),
        }
    }

    #[test]
    fn short_header_bytes_are_exact() {
        let mut buf = [0u8; 64];
        let len = encode_short(&mut buf, 0x01020304, "A", &[0xAA]);

        // "LC02", the sequence number, "A", NUL, payload.
        assert_eq!(
            &buf[..len],
            &[0x4C, 0x43, 0x30, 0x32, 0x01, 0x02, 0x03, 0x04, b'A', 0x00, 0xAA]
        );
    }

    #[test]
    fn empty_payload_is_fine() {
        let mut buf = [0u8; 64];
        let len = encode_short(&mut buf, 7, "T", &[]);
        match Packet::parse(&buf[..len]).unwrap() {
            Packet::Short(msg) => assert!(msg.payload.is_empty()),
            _ => panic!("expected a short message"),
        }
    }

    #[test]
    fn fragment_round_trip() {
        let mut buf = [0u8; PUBLISH_BUFFER_SIZE];
        let len = encode_fragment(&mut buf, 9, 100, 0, 0, 2, "CHAN", &[5; 60]);
        assert_eq!(len, FRAGMENT_HEADER_SIZE + 5 + 60);

        match Packet::parse(&buf[..len]).unwrap() {
            Packet::Fragment(frag) => {
                assert_eq!(frag.msg_seq, 9);
                assert_eq!(frag.total_size, 100);
                assert_eq!(frag.fragment_offset, 0);
                assert_eq!(frag.fragment_id, 0);
                assert_eq!(frag.fragments_in_msg, 2);
                assert_eq!(frag.channel, Some("CHAN"));
                assert_eq!(frag.payload.len(), 60);
            }
            _ => panic!("expected a fragment"),
        }

        // Later fragments carry no channel.
        let len = encode_fragment(&mut buf, 9, 100, 60, 1, 2, "CHAN", &[6; 40]);
        match Packet::parse(&buf[..len]).unwrap() {
            Packet::Fragment(frag) => {
                assert_eq!(frag.channel, None);
                assert_eq!(frag.fragment_offset, 60);
                assert_eq!(frag.payload.len(), 40);
            }
            _ => panic!("expected a fragment"),
        }
    }

    #[test]
    fn fragment_magic_is_lc03() {
        let mut buf = [0u8; 64];
        encode_fragment(&mut buf, 0, 1, 0, 0, 1, "C", &[0]);
        assert_eq!(&buf[..4], &[0x4C, 0x43, 0x30, 0x33]);
    }

    #[test]
    fn runt_datagrams_are_rejected() {
        assert!(Packet::parse(&[]).is_err());
        assert!(Packet::parse(&[0x4C, 0x43, 0x30]).is_err());
        assert!(Packet::parse(&[0x4C, 0x43, 0x30, 0x32, 0, 0]).is_err());
        assert!(Packet::parse(&[0x4C, 0x43, 0x30, 0x33, 0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let err = Packet::parse(&[0, 0, 0, 0, 1, 2, 3, 4]).unwrap_err();
        assert!(match err {
            DatagramError::UnknownMagic(0) => true,
            _ => false,
        });
    }

    #[test]
    fn unterminated_channel_is_rejected() {
        let mut buf = [0u8; 16];
        NetworkEndian::write_u32(&mut buf[0..4], SHORT_MESSAGE_MAGIC);
        for b in &mut buf[8..] {
            *b = b'x';
        }
        assert!(match Packet::parse(&buf) {
            Err(DatagramError::UnterminatedChannel) => true,
            _ => false,
        });
    }

    #[test]
    fn oversized_channel_is_rejected() {
        let mut datagram = Vec::new();
        datagram.extend_from_slice(&[0x4C, 0x43, 0x30, 0x32, 0, 0, 0, 0]);
        datagram.extend_from_slice(&[b'c'; 300]);
        datagram.push(0);
        assert!(match Packet::parse(&datagram) {
            Err(DatagramError::ChannelTooLong(300)) => true,
            _ => false,
        });
    }

    #[test]
    fn non_utf8_channel_is_rejected() {
        let datagram = [0x4C, 0x43, 0x30, 0x32, 0, 0, 0, 0, 0xFF, 0xFE, 0x00];
        assert!(match Packet::parse(&datagram) {
            Err(DatagramError::InvalidUtf8) => true,
            _ => false,
        });
    }

    #[test]
    fn fragment_validation() {
        let mut buf = [0u8; 64];

        // Declared size past the reassembly limit.
        let len = encode_fragment(&mut buf, 0, 0, 0, 0, 1, "C", &[]);
        NetworkEndian::write_u32(&mut buf[8..12], (MAX_MESSAGE_SIZE + 1) as u32);
        assert!(match Packet::parse(&buf[..len]) {
            Err(DatagramError::MessageTooLarge(_)) => true,
            _ => false,
        });

        // Fragment id out of range.
        let len = encode_fragment(&mut buf, 0, 10, 0, 3, 2, "C", &[]);
        assert!(match Packet::parse(&buf[..len]) {
            Err(DatagramError::BadFragmentId { id: 3, count: 2 }) => true,
            _ => false,
        });

        // Zero fragments.
        let len = encode_fragment(&mut buf, 0, 10, 0, 0, 1, "C", &[]);
        NetworkEndian::write_u16(&mut buf[18..20], 0);
        assert!(match Packet::parse(&buf[..len]) {
            Err(DatagramError::BadFragmentCount(0)) => true,
            _ => false,
        });

        // Too many fragments.
        let len = encode_fragment(&mut buf, 0, 10, 0, 0, 1, "C", &[]);
        NetworkEndian::write_u16(&mut buf[18..20], 257);
        assert!(match Packet::parse(&buf[..len]) {
            Err(DatagramError::BadFragmentCount(257)) => true,
            _ => false,
        });

        // Payload spilling past the declared size.
        let len = encode_fragment(&mut buf, 0, 10, 8, 1, 2, "C", &[1, 2, 3]);
        assert!(match Packet::parse(&buf[..len]) {
            Err(DatagramError::FragmentOverrun { .. }) => true,
            _ => false,
        });
    }

    #[test]
    fn single_fragment_messages_are_legal() {
        let mut buf = [0u8; 64];
        let len = encode_fragment(&mut buf, 1, 3, 0, 0, 1, "C", &[7, 8, 9]);
        match Packet::parse(&buf[..len]).unwrap() {
            Packet::Fragment(frag) => {
                assert_eq!(frag.fragments_in_msg, 1);
                assert_eq!(frag.payload, &[7, 8, 9]);
            }
            _ => panic!("expected a fragment"),
        }
    }
}
