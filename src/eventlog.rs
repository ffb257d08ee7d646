//! Reading and writing of LCM event logs.
//!
//! A log is a flat file of framed events. Each frame starts with a sync
//! word, so a reader that lands in the middle of a file (or in the middle
//! of a damaged region) can recover by scanning forward for the next sync
//! word. There is no index; seeking by timestamp is a binary search over
//! file offsets that relies on the sync words to find frame boundaries.

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use error::LogError;

/// Marker preceding every event frame.
pub const SYNC_WORD: u32 = 0xEDA1_DA01;

/// Channel lengths at or above this are treated as corruption.
const MAX_CHANNEL_LEN: i32 = 1000;

/// Bracketing stops once the probe position stalls by less than this
/// fraction of the file.
const SEEK_EPSILON: f64 = 1e-12;

/// A single message as stored in an event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Position of the event in the log, counted from zero.
    pub event_number: i64,

    /// Microseconds since the Unix epoch at which the message was received.
    pub timestamp: i64,

    /// The channel the message was published on.
    pub channel: String,

    /// The raw message payload.
    pub data: Vec<u8>,
}

/// The direction a log is opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Read events, with support for seeking.
    Read,
    /// Write events to a fresh file.
    Write,
}

enum Stream {
    Reader(BufReader<File>),
    Writer(BufWriter<File>),
}

/// An LCM event log on disk.
///
/// Logs are opened either for reading or for writing; there is no
/// read-write mode. Event numbers are assigned by the log itself on write.
/// On read the file is authoritative: if the numbering in the file
/// disagrees with the log's own count, the count is reset to match.
pub struct EventLog {
    stream: Stream,
    event_count: i64,
}
impl EventLog {
    /// Opens the log at `path`.
    ///
    /// `LogMode::Write` creates the file, truncating anything already
    /// there.
    pub fn open<P: AsRef<Path>>(path: P, mode: LogMode) -> Result<Self, LogError> {
        let stream = match mode {
            LogMode::Read => Stream::Reader(BufReader::new(File::open(path)?)),
            LogMode::Write => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)?;
                Stream::Writer(BufWriter::new(file))
            }
        };

        Ok(EventLog {
            stream,
            event_count: 0,
        })
    }

    /// Reads the next event from the log.
    ///
    /// Returns `Ok(None)` at the end of the log, including when the last
    /// frame is cut short. Garbage between frames is skipped by scanning
    /// for the next sync word.
    pub fn read_next_event(&mut self) -> Result<Option<Event>, LogError> {
        let (reader, event_count) = match self.stream {
            Stream::Reader(ref mut r) => (r, &mut self.event_count),
            Stream::Writer(_) => return Err(LogError::NotReadable),
        };

        if !scan_to_sync(reader)? {
            return Ok(None);
        }

        let (event_number, timestamp, channel_len, data_len) = match read_frame_header(reader) {
            Ok(header) => header,
            Err(e) => return end_of_stream(e),
        };

        if channel_len < 0 || channel_len >= MAX_CHANNEL_LEN || data_len < 0 {
            return Err(LogError::CorruptEvent {
                channel_len,
                data_len,
            });
        }

        if *event_count != event_number {
            warn!(
                "Event numbering mismatch: expected {}, the file says {}. Using the file's numbering.",
                event_count, event_number
            );
            *event_count = event_number;
        }

        let mut channel = vec![0u8; channel_len as usize];
        if let Err(e) = reader.read_exact(&mut channel) {
            return end_of_stream(e);
        }
        let mut data = vec![0u8; data_len as usize];
        if let Err(e) = reader.read_exact(&mut data) {
            return end_of_stream(e);
        }

        *event_count += 1;

        Ok(Some(Event {
            event_number,
            timestamp,
            channel: String::from_utf8_lossy(&channel).into_owned(),
            data,
        }))
    }

    /// Appends an event to the log.
    ///
    /// The event number is assigned by the log and returned.
    pub fn write_event(
        &mut self,
        timestamp: i64,
        channel: &str,
        data: &[u8],
    ) -> Result<i64, LogError> {
        let (writer, event_count) = match self.stream {
            Stream::Writer(ref mut w) => (w, &mut self.event_count),
            Stream::Reader(_) => return Err(LogError::NotWritable),
        };

        let event_number = *event_count;

        writer.write_u32::<NetworkEndian>(SYNC_WORD)?;
        writer.write_i64::<NetworkEndian>(event_number)?;
        writer.write_i64::<NetworkEndian>(timestamp)?;
        writer.write_i32::<NetworkEndian>(channel.len() as i32)?;
        writer.write_i32::<NetworkEndian>(data.len() as i32)?;
        writer.write_all(channel.as_bytes())?;
        writer.write_all(data)?;

        *event_count += 1;

        Ok(event_number)
    }

    /// Flushes buffered writes to the file.
    pub fn flush(&mut self) -> Result<(), LogError> {
        match self.stream {
            Stream::Writer(ref mut w) => w.flush()?,
            Stream::Reader(_) => {}
        }
        Ok(())
    }

    /// Positions the reader near the first event with the given timestamp.
    ///
    /// This is a binary search over file offsets, bracketing the target as
    /// fractions of the file length and probing the first full event after
    /// each midpoint. When it returns, the reader sits at the sync word of
    /// an event whose timestamp approximates `timestamp`; there is no
    /// exactness guarantee.
    pub fn seek_to_timestamp(&mut self, timestamp: i64) -> Result<(), LogError> {
        let file_len = {
            let reader = match self.stream {
                Stream::Reader(ref mut r) => r,
                Stream::Writer(_) => return Err(LogError::NotReadable),
            };
            reader.seek(SeekFrom::End(0))? as f64
        };

        let mut lo = 0.0f64;
        let mut hi = 1.0f64;
        let mut prev_frac = -1.0f64;

        loop {
            let frac = 0.5 * (lo + hi);
            let offset = (frac * file_len) as u64;
            self.seek_to_offset(offset)?;

            let cur_time = match self.next_event_time()? {
                Some(t) => t,
                None => return Err(LogError::SeekFailed),
            };

            let frac = self.position()? as f64 / file_len;
            if frac > hi || frac < lo || lo >= hi {
                break;
            }
            if (frac - prev_frac).abs() < SEEK_EPSILON {
                break;
            }
            if cur_time == timestamp {
                break;
            }

            if cur_time < timestamp {
                lo = frac;
            } else {
                hi = frac;
            }
            prev_frac = frac;
        }

        Ok(())
    }

    /// Returns the underlying file descriptor.
    pub fn fileno(&self) -> RawFd {
        match self.stream {
            Stream::Reader(ref r) => r.get_ref().as_raw_fd(),
            Stream::Writer(ref w) => w.get_ref().as_raw_fd(),
        }
    }

    /// Reads the timestamp of the next event, then rewinds to that event's
    /// sync word. Adopts the event's numbering, as the file is
    /// authoritative.
    fn next_event_time(&mut self) -> Result<Option<i64>, LogError> {
        let (reader, event_count) = match self.stream {
            Stream::Reader(ref mut r) => (r, &mut self.event_count),
            Stream::Writer(_) => return Err(LogError::NotReadable),
        };

        if !scan_to_sync(reader)? {
            return Ok(None);
        }

        let (event_number, timestamp) = {
            let number = match reader.read_i64::<NetworkEndian>() {
                Ok(v) => v,
                Err(e) => return end_of_stream(e),
            };
            let timestamp = match reader.read_i64::<NetworkEndian>() {
                Ok(v) => v,
                Err(e) => return end_of_stream(e),
            };
            (number, timestamp)
        };

        // Back over the two integers and the sync word.
        reader.seek(SeekFrom::Current(-20))?;
        *event_count = event_number;

        Ok(Some(timestamp))
    }

    fn seek_to_offset(&mut self, offset: u64) -> Result<(), LogError> {
        match self.stream {
            Stream::Reader(ref mut r) => {
                r.seek(SeekFrom::Start(offset))?;
                Ok(())
            }
            Stream::Writer(_) => Err(LogError::NotReadable),
        }
    }

    fn position(&mut self) -> Result<u64, LogError> {
        match self.stream {
            Stream::Reader(ref mut r) => Ok(r.seek(SeekFrom::Current(0))?),
            Stream::Writer(_) => Err(LogError::NotReadable),
        }
    }
}

/// Advances the reader to just past the next sync word. Returns false at
/// end of file.
fn scan_to_sync(reader: &mut BufReader<File>) -> Result<bool, LogError> {
    let mut window = 0u32;
    loop {
        let byte = match reader.read_u8() {
            Ok(b) => b,
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(LogError::IoError(e)),
        };

        window = (window << 8) | u32::from(byte);
        if window == SYNC_WORD {
            return Ok(true);
        }
    }
}

fn read_frame_header(reader: &mut BufReader<File>) -> io::Result<(i64, i64, i32, i32)> {
    let event_number = reader.read_i64::<NetworkEndian>()?;
    let timestamp = reader.read_i64::<NetworkEndian>()?;
    let channel_len = reader.read_i32::<NetworkEndian>()?;
    let data_len = reader.read_i32::<NetworkEndian>()?;
    Ok((event_number, timestamp, channel_len, data_len))
}

/// Maps a truncated frame to end-of-stream and anything else to an error.
fn end_of_stream<T>(err: io::Error) -> Result<Option<T>, LogError> {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Ok(None)
    } else {
        Err(LogError::IoError(err))
    }
}
