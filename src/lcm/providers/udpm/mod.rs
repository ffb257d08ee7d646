//! The UDP multicast provider.

mod backend;
mod fragment;
mod packet;

use std::cmp;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use error::*;
use lcm::dispatch::{Dispatcher, ReceiveBuffer};
use lcm::url::split_host_port;
use lcm::Subscription;

use self::backend::Backend;
use self::packet::{MAX_FRAGMENT_PAYLOAD, MAX_MESSAGE_SIZE, PUBLISH_BUFFER_SIZE};

/// The multicast group joined when the URL does not name one.
const DEFAULT_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 76, 67);

/// The port used when the URL does not name one.
const DEFAULT_MULTICAST_PORT: u16 = 7667;

/// The UDP Multicast provider.
///
/// Publishing happens directly on the calling thread. Receiving is done by
/// a background thread that sorts incoming messages into per-subscription
/// queues; the user only sees a message once `handle` drains it on their
/// own thread. The read thread is not started until the first subscribe or
/// handle call, and never in transmit-only mode.
pub struct UdpmProvider<'a> {
    /// The socket used to send datagrams.
    socket: UdpSocket,

    /// The multicast group datagrams are addressed to.
    addr: SocketAddr,

    /// The user-thread half of the dispatch engine.
    dispatcher: Dispatcher<'a>,

    /// The sequence number for the outgoing messages.
    sequence_number: u32,

    /// Scratch space for encoding outgoing datagrams.
    publish_buffer: Vec<u8>,

    /// A transmit-only provider never joins the group and rejects
    /// `handle` calls.
    transmit_only: bool,

    shutdown: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    read_thread: Option<JoinHandle<()>>,
}
impl<'a> UdpmProvider<'a> {
    /// Creates a new UDPM provider using the given network string and
    /// options.
    pub fn new(network: &str, options: &HashMap<&str, &str>) -> Result<Self, InitError> {
        let (mut addr, mut port) = if network.is_empty() {
            (DEFAULT_MULTICAST_ADDR, DEFAULT_MULTICAST_PORT)
        } else {
            let (host, port) = split_host_port(network)?;
            let addr = host
                .parse::<Ipv4Addr>()
                .map_err(|_| InitError::InvalidLcmUrl)?;
            let port = if port < 0 {
                DEFAULT_MULTICAST_PORT
            } else if port > i32::from(u16::max_value()) {
                return Err(InitError::InvalidLcmUrl);
            } else {
                port as u16
            };
            (addr, port)
        };

        let mut ttl = 0;
        let mut transmit_only = false;
        let mut recv_buf_size = None;
        for (key, value) in options {
            match *key {
                "ttl" => ttl = parse_option(key, value)?,
                "transmit_only" => transmit_only = parse_option(key, value)?,
                "recv_buf_size" => recv_buf_size = Some(parse_option(key, value)?),
                "mc_addr" => addr = parse_option(key, value)?,
                "mc_port" => port = parse_option(key, value)?,
                _ => warn!("Ignoring unknown option \"{}\"", key),
            }
        }

        let addr = SocketAddr::new(IpAddr::V4(addr), port);
        debug!(
            "Starting UDPM provider with multicast (group = {}, ttl = {}, transmit_only = {})",
            addr, ttl, transmit_only
        );
        let socket = setup_udp_socket(addr, ttl, transmit_only, recv_buf_size)?;

        Ok(UdpmProvider {
            socket,
            addr,
            dispatcher: Dispatcher::new()?,
            sequence_number: 0,
            publish_buffer: vec![0; PUBLISH_BUFFER_SIZE],
            transmit_only,
            shutdown: Arc::new(AtomicBool::new(false)),
            failed: Arc::new(AtomicBool::new(false)),
            read_thread: None,
        })
    }

    /// Subscribes a callback to a pattern of channels.
    ///
    /// Starts the read thread if it is not running yet.
    pub fn subscribe<F>(&mut self, pattern: &str, callback: F) -> Result<Subscription, SubscribeError>
    where
        F: FnMut(&ReceiveBuffer) + 'a,
    {
        if self.transmit_only {
            warn!("Subscribing on a transmit-only context. Nothing will ever arrive.");
        } else if let Err(e) = self.start_read_thread() {
            error!("Unable to start the read thread: {}", e);
            return Err(SubscribeError::ProviderIssue);
        }

        self.dispatcher.subscribe(pattern, callback)
    }

    /// Unsubscribes a message handler.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> Result<(), SubscriptionError> {
        self.dispatcher.unsubscribe(&subscription)
    }

    /// Publishes a message on the specified channel.
    ///
    /// The message goes out on the calling thread, as one short datagram
    /// when it fits and as a run of fragments otherwise.
    pub fn publish(&mut self, channel: &str, data: &[u8]) -> Result<(), PublishError> {
        super::validate_channel(channel)?;
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(PublishError::MessageTooLarge(data.len()));
        }

        if data.len() < MAX_FRAGMENT_PAYLOAD {
            self.send_small_datagram(channel, data)?;
        } else {
            self.send_frag_datagrams(channel, data)?;
        }

        self.sequence_number = self.sequence_number.wrapping_add(1);
        Ok(())
    }

    /// Waits for and dispatches messages.
    pub fn handle(&mut self) -> Result<(), HandleError> {
        self.ensure_receiving()?;
        loop {
            if self.dispatcher.dispatch_round() > 0 {
                return Ok(());
            }
            if self.failed.load(Ordering::Acquire) {
                return Err(HandleError::ProviderIssue);
            }
            self.dispatcher.wait(None)?;
        }
    }

    /// Waits for and dispatches messages, with a timeout.
    ///
    /// Returns the number of callbacks invoked, with zero meaning the
    /// timeout expired first.
    pub fn handle_timeout(&mut self, timeout: Duration) -> Result<usize, HandleError> {
        self.ensure_receiving()?;
        let deadline = Instant::now() + timeout;
        loop {
            let count = self.dispatcher.dispatch_round();
            if count > 0 {
                return Ok(count);
            }
            if self.failed.load(Ordering::Acquire) {
                return Err(HandleError::ProviderIssue);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            self.dispatcher.wait(Some(deadline - now))?;
        }
    }

    /// A file descriptor that polls as readable whenever a handle call
    /// would make progress.
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

    fn ensure_receiving(&mut self) -> Result<(), HandleError> {
        if self.transmit_only {
            return Err(HandleError::TransmitOnly);
        }
        if self.failed.load(Ordering::Acquire) {
            return Err(HandleError::ProviderIssue);
        }
        self.start_read_thread()?;
        Ok(())
    }

    /// Starts the read thread, if this provider can receive and has not
    /// started it already.
    fn start_read_thread(&mut self) -> io::Result<()> {
        if self.read_thread.is_some() {
            return Ok(());
        }

        let receiver = Backend::new(
            self.socket.try_clone()?,
            self.dispatcher.subscriber_set(),
            self.dispatcher.notify_handle()?,
            self.shutdown.clone(),
            self.failed.clone(),
        );

        debug!("Starting read thread");
        self.read_thread = Some(thread::spawn(move || {
            if let Err(e) = receiver.run() {
                error!("Read thread failed with message: {}", e);
            }
        }));

        Ok(())
    }

    /// Sends the message using a "small message" datagram.
    fn send_small_datagram(&mut self, channel: &str, data: &[u8]) -> Result<(), PublishError> {
        trace!("Sending small datagram on channel \"{}\"", channel);

        let datagram_size =
            packet::encode_short(&mut self.publish_buffer, self.sequence_number, channel, data);
        let sent = self.socket.send_to(&self.publish_buffer[..datagram_size], self.addr)?;

        if sent != datagram_size {
            warn!(
                "The number of bytes sent ({}) did not equal the size of the datagram ({}).",
                sent, datagram_size
            );
            return Err(PublishError::ProviderIssue);
        }

        Ok(())
    }

    /// Sends the message using the "fragmented message" datagrams.
    fn send_frag_datagrams(&mut self, channel: &str, data: &[u8]) -> Result<(), PublishError> {
        let fragments_in_msg = (data.len() + MAX_FRAGMENT_PAYLOAD - 1) / MAX_FRAGMENT_PAYLOAD;
        trace!(
            "Sending {} fragment datagrams on channel \"{}\"",
            fragments_in_msg,
            channel
        );

        let mut fragment_offset = 0;
        for fragment_id in 0..fragments_in_msg {
            let chunk_size = cmp::min(MAX_FRAGMENT_PAYLOAD, data.len() - fragment_offset);
            let chunk = &data[fragment_offset..fragment_offset + chunk_size];

            let datagram_size = packet::encode_fragment(
                &mut self.publish_buffer,
                self.sequence_number,
                data.len() as u32,
                fragment_offset as u32,
                fragment_id as u16,
                fragments_in_msg as u16,
                channel,
                chunk,
            );

            let sent = self.socket.send_to(&self.publish_buffer[..datagram_size], self.addr)?;
            if sent != datagram_size {
                warn!(
                    "The number of bytes sent ({}) did not equal the size of the datagram ({}).",
                    sent, datagram_size
                );
                return Err(PublishError::ProviderIssue);
            }

            fragment_offset += chunk_size;
        }

        Ok(())
    }
}
impl<'a> Drop for UdpmProvider<'a> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(read_thread) = self.read_thread.take() {
            if read_thread.join().is_err() {
                error!("Read thread panicked during shutdown.");
            }
        }
    }
}

/// Parses one URL option value.
fn parse_option<T>(key: &str, value: &str) -> Result<T, InitError>
where
    T: ::std::str::FromStr,
{
    value.parse().map_err(|_| InitError::InvalidOption {
        key: key.into(),
        value: value.into(),
    })
}

/// Set up the UDP socket.
fn setup_udp_socket(
    addr: SocketAddr,
    ttl: u32,
    transmit_only: bool,
    recv_buf_size: Option<usize>,
) -> io::Result<UdpSocket> {
    use net2::UdpBuilder;

    let builder = UdpBuilder::new_v4()?;

    debug!("Setting SO_REUSEADDR");
    builder.reuse_address(true)?;

    // The UDPM source for the C version of LCM says that the SO_REUSEPORT
    // only needs to be set on MacOS and FreeBSD.
    #[cfg(any(target_os = "macos", target_os = "freebsd"))]
    {
        use net2::unix::UnixUdpBuilderExt;
        debug!("Setting SO_REUSEPORT");
        builder.reuse_port(true)?;
    }

    debug!("Binding UDP socket");
    let socket = {
        let inaddr_any = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0));
        builder.bind(SocketAddr::new(inaddr_any, addr.port()))?
    };

    if let Some(size) = recv_buf_size {
        use net2::UdpSocketExt;
        debug!("Setting receive buffer size to {}", size);
        socket.set_recv_buffer_size(size)?;
    }

    if transmit_only {
        debug!("Transmit-only provider. Not joining the multicast group.");
    } else {
        debug!("Joining multicast group");
        match addr.ip() {
            IpAddr::V4(ref addr) => socket.join_multicast_v4(addr, &Ipv4Addr::new(0, 0, 0, 0))?,
            IpAddr::V6(ref _addr) => unimplemented!("IPv6 is not supported."),
        }
    }

    debug!("Setting multicast packet TTL to {}", ttl);
    socket.set_multicast_ttl_v4(ttl)?;

    Ok(socket)
}
