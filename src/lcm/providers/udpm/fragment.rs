//! Reassembly of fragmented messages.
//!
//! Fragments from many senders interleave on the wire, so the receiver
//! keeps a small, fixed table of in-progress messages keyed by sender and
//! sequence number. The table never grows: when every buffer is busy and
//! a fragment of a new message arrives, the buffer that has gone the
//! longest without receiving a fragment is evicted and its message lost
//! whole. Losing a slow message beats unbounded memory on a lossy
//! protocol.

use std::mem;
use std::net::{IpAddr, SocketAddr};

use super::packet::Fragment;

/// Number of messages that can be in reassembly at once.
pub const NUM_REASSEMBLY_BUFFERS: usize = 4;

/// Identifies a remote publisher endpoint: the IPv4 address and source
/// port packed into one word. Only equality matters.
pub type SenderKey = u64;

/// Packs a datagram source address into a `SenderKey`.
pub fn sender_key(addr: &SocketAddr) -> SenderKey {
    let ip = match addr.ip() {
        IpAddr::V4(v4) => u32::from(v4),
        // Fold an IPv6 source down to something stable. Collisions only
        // risk mixing fragments of senders that also share a sequence
        // number, which the offset checks still bound.
        IpAddr::V6(v6) => v6.octets().iter().fold(0u32, |acc, &b| {
            acc.wrapping_mul(33).wrapping_add(u32::from(b))
        }),
    };

    u64::from(ip) << 16 | u64::from(addr.port())
}

struct FragmentBuffer {
    from: SenderKey,
    msg_seq: u32,
    channel: String,
    fragments_remaining: u16,

    /// One flag per fragment; stays fully set after completion so that
    /// late duplicates keep being ignored.
    received: Vec<bool>,

    data: Vec<u8>,
    last_activity: u32,
}
impl FragmentBuffer {
    fn idle() -> Self {
        FragmentBuffer {
            from: 0,
            msg_seq: 0,
            channel: String::new(),
            fragments_remaining: 0,
            received: Vec::new(),
            data: Vec::new(),
            last_activity: 0,
        }
    }
}

/// The fixed table of in-progress fragmented messages.
pub struct ReassemblyTable {
    buffers: Vec<FragmentBuffer>,

    /// Bumped on every accepted fragment; buffers remember the value so
    /// eviction can find the stalest one.
    activity: u32,
}
impl ReassemblyTable {
    pub fn new(capacity: usize) -> Self {
        ReassemblyTable {
            buffers: (0..capacity).map(|_| FragmentBuffer::idle()).collect(),
            activity: 0,
        }
    }

    /// Feeds in one fragment. Returns the channel and payload when this
    /// fragment completed its message.
    ///
    /// Duplicate fragments are ignored, including duplicates that arrive
    /// after their message was already delivered; a message is handed out
    /// exactly once.
    pub fn accept(&mut self, from: SenderKey, fragment: &Fragment) -> Option<(String, Vec<u8>)> {
        let index = match self.lookup(from, fragment.msg_seq) {
            Some(index) => index,
            None => {
                let index = self.allocate();
                self.initialize(index, from, fragment);
                index
            }
        };

        self.buffers[index].last_activity = self.activity;
        self.activity = self.activity.wrapping_add(1);

        let buffer = &mut self.buffers[index];

        if let Some(channel) = fragment.channel {
            if buffer.channel.is_empty() {
                buffer.channel.push_str(channel);
            }
        }

        let id = fragment.fragment_id as usize;
        if id >= buffer.received.len() || buffer.received[id] {
            trace!("Duplicate fragment {}. Ignoring.", fragment.fragment_id);
            return None;
        }

        let offset = fragment.fragment_offset as usize;
        let end = offset + fragment.payload.len();
        if end > buffer.data.len() {
            // The packet validated against its own header, but not
            // against the size this buffer was allocated with.
            debug!("Fragment overruns its reassembly buffer. Dropping.");
            return None;
        }

        buffer.data[offset..end].copy_from_slice(fragment.payload);
        buffer.received[id] = true;
        buffer.fragments_remaining -= 1;

        if buffer.fragments_remaining == 0 {
            let channel = mem::replace(&mut buffer.channel, String::new());
            let data = mem::replace(&mut buffer.data, Vec::new());
            Some((channel, data))
        } else {
            None
        }
    }

    fn lookup(&self, from: SenderKey, msg_seq: u32) -> Option<usize> {
        self.buffers
            .iter()
            .position(|b| b.from == from && b.msg_seq == msg_seq && !b.received.is_empty())
    }

    /// Picks a buffer for a new message: any idle buffer, or failing
    /// that, the one that has gone the longest without a fragment.
    fn allocate(&self) -> usize {
        let mut victim = 0;
        let mut max_age = 0;

        for (index, buffer) in self.buffers.iter().enumerate() {
            if buffer.fragments_remaining == 0 {
                return index;
            }

            let age = self.activity.wrapping_sub(buffer.last_activity);
            if age >= max_age {
                victim = index;
                max_age = age;
            }
        }

        debug!(
            "All reassembly buffers busy. Evicting a message missing {} fragments.",
            self.buffers[victim].fragments_remaining
        );
        victim
    }

    fn initialize(&mut self, index: usize, from: SenderKey, fragment: &Fragment) {
        let buffer = &mut self.buffers[index];

        buffer.from = from;
        buffer.msg_seq = fragment.msg_seq;
        buffer.channel.clear();
        buffer.fragments_remaining = fragment.fragments_in_msg;

        buffer.received.clear();
        buffer
            .received
            .resize(fragment.fragments_in_msg as usize, false);

        buffer.data.clear();
        buffer.data.resize(fragment.total_size as usize, 0);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use lcm::providers::udpm::packet::Fragment;

    /// Splits `payload` into `count` fragments of a message with the
    /// given sequence number.
    fn fragments<'a>(
        msg_seq: u32,
        channel: &'a str,
        payload: &'a [u8],
        count: usize,
    ) -> Vec<Fragment<'a>> {
        let chunk = (payload.len() + count - 1) / count;
        (0..count)
            .map(|id| {
                let offset = id * chunk;
                let end = if offset + chunk > payload.len() {
                    payload.len()
                } else {
                    offset + chunk
                };
                Fragment {
                    msg_seq,
                    total_size: payload.len() as u32,
                    fragment_offset: offset as u32,
                    fragment_id: id as u16,
                    fragments_in_msg: count as u16,
                    channel: if id == 0 { Some(channel) } else { None },
                    payload: &payload[offset..end],
                }
            })
            .collect()
    }

    #[test]
    fn in_order_reassembly() {
        let mut table = ReassemblyTable::new(NUM_REASSEMBLY_BUFFERS);
        let payload: Vec<u8> = (0..100u8).collect();

        let frags = fragments(1, "T", &payload, 4);
        assert!(table.accept(10, &frags[0]).is_none());
        assert!(table.accept(10, &frags[1]).is_none());
        assert!(table.accept(10, &frags[2]).is_none());

        let (channel, data) = table.accept(10, &frags[3]).unwrap();
        assert_eq!(channel, "T");
        assert_eq!(data, payload);
    }

    #[test]
    fn any_order_reassembly() {
        let mut table = ReassemblyTable::new(NUM_REASSEMBLY_BUFFERS);
        let payload: Vec<u8> = (0..250u8).collect();

        let frags = fragments(7, "T", &payload, 5);
        for &id in &[3usize, 0, 4, 2] {
            assert!(table.accept(10, &frags[id]).is_none());
        }

        let (channel, data) = table.accept(10, &frags[1]).unwrap();
        assert_eq!(channel, "T");
        assert_eq!(data, payload);
    }

    #[test]
    fn duplicates_are_ignored_and_delivery_is_exactly_once() {
        let mut table = ReassemblyTable::new(NUM_REASSEMBLY_BUFFERS);
        let payload: Vec<u8> = (0..60u8).collect();

        let frags = fragments(3, "T", &payload, 3);
        assert!(table.accept(10, &frags[0]).is_none());
        assert!(table.accept(10, &frags[0]).is_none());
        assert!(table.accept(10, &frags[1]).is_none());
        assert!(table.accept(10, &frags[1]).is_none());
        assert!(table.accept(10, &frags[2]).is_some());

        // Stragglers after completion change nothing.
        assert!(table.accept(10, &frags[1]).is_none());
        assert!(table.accept(10, &frags[2]).is_none());
    }

    #[test]
    fn concurrent_senders_fill_the_table() {
        let mut table = ReassemblyTable::new(NUM_REASSEMBLY_BUFFERS);
        let payload: Vec<u8> = (0..80u8).collect();

        // Interleave one fragment at a time from as many senders as
        // there are buffers.
        let all: Vec<_> = (0..NUM_REASSEMBLY_BUFFERS)
            .map(|s| fragments(100 + s as u32, "T", &payload, 4))
            .collect();

        let mut delivered = 0;
        for id in 0..4 {
            for (s, frags) in all.iter().enumerate() {
                if table.accept(s as SenderKey, &frags[id]).is_some() {
                    delivered += 1;
                }
            }
        }

        assert_eq!(delivered, NUM_REASSEMBLY_BUFFERS);
    }

    #[test]
    fn one_stream_too_many_evicts_the_stalest() {
        let mut table = ReassemblyTable::new(NUM_REASSEMBLY_BUFFERS);
        let payload: Vec<u8> = (0..80u8).collect();

        let all: Vec<_> = (0..NUM_REASSEMBLY_BUFFERS + 1)
            .map(|s| fragments(200 + s as u32, "T", &payload, 2))
            .collect();

        // First fragment from the first four senders fills the table.
        for s in 0..NUM_REASSEMBLY_BUFFERS {
            assert!(table.accept(s as SenderKey, &all[s][0]).is_none());
        }

        // A fifth sender evicts the stalest partial (sender zero's) and
        // completes its own message.
        assert!(table.accept(4, &all[4][0]).is_none());
        assert!(table.accept(4, &all[4][1]).is_some());

        // Sender zero's last fragment starts a fresh buffer instead of
        // completing anything; its message is lost whole.
        assert!(table.accept(0, &all[0][1]).is_none());

        // The surviving partials still complete.
        assert!(table.accept(1, &all[1][1]).is_some());
        assert!(table.accept(2, &all[2][1]).is_some());
        assert!(table.accept(3, &all[3][1]).is_some());
    }

    #[test]
    fn single_fragment_message_delivers_immediately() {
        let mut table = ReassemblyTable::new(NUM_REASSEMBLY_BUFFERS);
        let payload = [9u8, 8, 7];

        let frags = fragments(5, "SOLO", &payload, 1);
        let (channel, data) = table.accept(44, &frags[0]).unwrap();
        assert_eq!(channel, "SOLO");
        assert_eq!(data, &payload);
    }

    #[test]
    fn mismatched_duplicate_cannot_overrun_the_buffer() {
        let mut table = ReassemblyTable::new(NUM_REASSEMBLY_BUFFERS);

        let small = [1u8; 10];
        let frags = fragments(6, "T", &small, 2);
        assert!(table.accept(10, &frags[0]).is_none());

        // Same sender and sequence number, but claiming a larger message.
        // Offset and length validate against its own header, not against
        // the buffer allocated from the first fragment.
        let rogue = Fragment {
            msg_seq: 6,
            total_size: 1000,
            fragment_offset: 500,
            fragment_id: 1,
            fragments_in_msg: 2,
            channel: None,
            payload: &[0xAA; 100],
        };
        assert!(table.accept(10, &rogue).is_none());

        // The original message still completes.
        assert!(table.accept(10, &frags[1]).is_some());
    }

    #[test]
    fn sender_keys_distinguish_ports() {
        use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

        let a = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1000));
        let b = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1001));
        let c = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 1000));

        assert_ne!(sender_key(&a), sender_key(&b));
        assert_ne!(sender_key(&a), sender_key(&c));
        assert_eq!(sender_key(&a), sender_key(&a));
    }
}
