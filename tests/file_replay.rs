//! End-to-end tests of log replay through the `file://` provider.

extern crate lcm;
extern crate tempdir;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use lcm::{EventLog, Lcm, LogMode, ReceiveBuffer};
use tempdir::TempDir;

fn write_sample_log(path: &::std::path::Path) {
    let mut log = EventLog::open(path, LogMode::Write).unwrap();
    log.write_event(100, "POSE", &[1, 2]).unwrap();
    log.write_event(200, "STATUS", &[3]).unwrap();
    log.write_event(300, "POSE", &[4, 5, 6]).unwrap();
}

#[test]
fn replay_delivers_matching_events() {
    let dir = TempDir::new("lcm-file").unwrap();
    let path = dir.path().join("flight.log");
    write_sample_log(&path);

    let url = format!("file://{}", path.to_str().unwrap());
    let mut lcm = Lcm::with_lcm_url(&url).unwrap();

    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = received.clone();
    lcm.subscribe("POSE", move |buffer: &ReceiveBuffer| {
        sink.borrow_mut().push((buffer.recv_utime, buffer.data.clone()));
    })
    .unwrap();

    // Replay skips the STATUS event since nothing matches it, then runs
    // dry at the end of the log.
    assert_eq!(lcm.handle_timeout(Duration::from_millis(0)).unwrap(), 1);
    assert_eq!(lcm.handle_timeout(Duration::from_millis(0)).unwrap(), 1);
    assert_eq!(lcm.handle_timeout(Duration::from_millis(0)).unwrap(), 0);

    // The logged timestamps stand in for receive times.
    assert_eq!(
        *received.borrow(),
        vec![(100, vec![1, 2]), (300, vec![4, 5, 6])]
    );
}

#[test]
fn publishing_to_a_replay_is_rejected() {
    let dir = TempDir::new("lcm-file").unwrap();
    let path = dir.path().join("flight.log");
    write_sample_log(&path);

    let url = format!("file://{}", path.to_str().unwrap());
    let mut lcm = Lcm::with_lcm_url(&url).unwrap();

    assert!(lcm.publish("POSE", &[1]).is_err());
}

#[test]
fn blocking_handle_reports_the_end_of_the_log() {
    let dir = TempDir::new("lcm-file").unwrap();
    let path = dir.path().join("flight.log");
    write_sample_log(&path);

    let url = format!("file://{}", path.to_str().unwrap());
    let mut lcm = Lcm::with_lcm_url(&url).unwrap();

    lcm.subscribe(".*", |_: &ReceiveBuffer| {}).unwrap();

    lcm.handle().unwrap();
    lcm.handle().unwrap();
    lcm.handle().unwrap();
    assert!(lcm.handle().is_err());
}

#[test]
fn missing_logs_fail_to_open() {
    assert!(Lcm::with_lcm_url("file:///this/path/does/not/exist.log").is_err());
}
