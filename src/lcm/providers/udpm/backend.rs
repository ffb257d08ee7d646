use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lcm::dispatch::{NotifyHandle, SubscriberSet};
use utils::time;

use super::fragment::{sender_key, ReassemblyTable, NUM_REASSEMBLY_BUFFERS};
use super::packet::Packet;

/// How long one `recv` call may block before the shutdown flag is checked
/// again. Bounds how long `Drop` waits for the read thread.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Consecutive socket errors tolerated before the receiver gives up.
const MAX_RECV_ERRORS: u32 = 10;

/// The LCM backend used for receiving UDPM messages without blocking the
/// main thread.
///
/// It reads datagrams, runs them through the wire decoder and the
/// reassembly table, sorts complete messages into the subscription queues,
/// and pokes the notification pipe. The user thread never sees any of it
/// until it calls `handle`.
pub struct Backend {
    /// The multicast socket used for receiving datagrams.
    socket: UdpSocket,

    /// The subscriptions, shared with the user thread.
    set: Arc<SubscriberSet>,

    /// Wakes the user thread once messages are queued.
    notify: NotifyHandle,

    /// Set by the provider when it is being dropped.
    shutdown: Arc<AtomicBool>,

    /// Set by this thread when the socket is beyond saving. The next
    /// user operation reports it.
    failed: Arc<AtomicBool>,

    /// Partially reassembled fragmented messages. This thread owns the
    /// table outright.
    fragments: ReassemblyTable,

    /// Datagrams rejected by the wire decoder. The protocol is lossy, so
    /// rejections are counted rather than surfaced.
    rejected: u64,
}
impl Backend {
    pub fn new(
        socket: UdpSocket,
        set: Arc<SubscriberSet>,
        notify: NotifyHandle,
        shutdown: Arc<AtomicBool>,
        failed: Arc<AtomicBool>,
    ) -> Self {
        Backend {
            socket,
            set,
            notify,
            shutdown,
            failed,
            fragments: ReassemblyTable::new(NUM_REASSEMBLY_BUFFERS),
            rejected: 0,
        }
    }

    /// Enter the `Backend` execution loop.
    ///
    /// This function waits for datagrams on the UDP socket and forwards
    /// them into the subscription queues. It exits when the provider sets
    /// the shutdown flag, or after too many consecutive socket errors.
    pub fn run(mut self) -> io::Result<()> {
        let mut buf = [0u8; 0xFFFF];
        let mut consecutive_errors = 0;

        self.socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;

        while !self.shutdown.load(Ordering::Acquire) {
            trace!("Waiting on socket");
            let (count, from) = match self.socket.recv_from(&mut buf) {
                Ok(received) => {
                    consecutive_errors = 0;
                    received
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    warn!("Error reading from the UDP socket: {}", e);
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_RECV_ERRORS {
                        self.failed.store(true, Ordering::Release);
                        self.notify.notify();
                        return Err(e);
                    }
                    continue;
                }
            };

            // If the message used the whole buffer then there is a good
            // chance that some bytes were discarded. We should warn the
            // user.
            if count == buf.len() {
                debug!("Read buffer fully utilized. Bytes may have been dropped.");
            }

            // Try to process the message. If at least one of the
            // subscriptions accepts it, notify the user thread.
            if self.process_datagram(&buf[0..count], from) {
                self.notify.notify();
            }
        }

        debug!(
            "Read thread shutting down. {} datagrams were rejected.",
            self.rejected
        );
        Ok(())
    }

    /// Process the given datagram. Returns true when a completed message
    /// landed in at least one subscription queue.
    fn process_datagram(&mut self, datagram: &[u8], sender: SocketAddr) -> bool {
        trace!(
            "Incoming datagram of size {} from {}.",
            datagram.len(),
            sender
        );

        let packet = match Packet::parse(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Rejecting datagram from {}: {}", sender, e);
                self.rejected += 1;
                return false;
            }
        };

        match packet {
            Packet::Short(message) => {
                trace!(
                    "Short message on channel \"{}\" ({} bytes)",
                    message.channel,
                    message.payload.len()
                );
                self.set
                    .deliver(message.channel, message.payload, time::timestamp_now())
            }
            Packet::Fragment(ref fragment) => {
                trace!(
                    "Fragment {} of {} (sequence number {})",
                    fragment.fragment_id,
                    fragment.fragments_in_msg,
                    fragment.msg_seq
                );
                match self.fragments.accept(sender_key(&sender), fragment) {
                    Some((channel, data)) => {
                        self.set.deliver(&channel, &data, time::timestamp_now())
                    }
                    None => false,
                }
            }
        }
    }
}
