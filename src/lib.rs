//! From the [LCM Homepage](http://lcm-proj.github.io/):
//! >
//! LCM is a set of libraries and tools for message passing and data marshalling,
//! targeted at real-time systems where high-bandwidth and low latency are critical.
//! It provides a publish/subscribe message passing model
//! and automatic marshalling/unmarshalling code generation
//! with bindings for applications in a variety of programming languages.
//!
//! This crate provides a Rust implementation of the LCM wire protocol:
//! the UDP multicast transport with message fragmentation and reassembly,
//! pattern-based subscriptions with bounded per-subscription queues, the
//! event log file format, and the big-endian primitive codec used by
//! generated message code. Messages are published and received as opaque
//! byte buffers.

#[macro_use]
extern crate log;

extern crate byteorder;
#[macro_use]
extern crate failure;
extern crate net2;
extern crate regex;

mod utils;

pub mod codec;
pub mod error;

mod eventlog;
pub use eventlog::{Event, EventLog, LogMode};

mod lcm;
pub use lcm::{Lcm, ReceiveBuffer, Subscription};
pub use lcm::url::{parse_url, Scheme, UrlParts};
