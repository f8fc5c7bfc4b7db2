use std::io::{self, Read};

use crate::item::ItemStream;
use crate::pump::IterPipe;
use crate::{Error, Item, posix};

#[test]
fn pump_serialises_items_into_the_pipe() {
    let stream = ItemStream::from_values(vec![
        Item::Text("text as-is\n".into()),
        Item::Int(42),
        Item::Text("no newline".into()),
    ]);
    let mut pump = IterPipe::new(stream);
    pump.fd().unwrap();
    let mut read = pump.take_read().unwrap();
    let mut out = String::new();
    read.read_to_string(&mut out).unwrap();
    drop(read);
    pump.close().unwrap();
    assert_eq!(out, "text as-is\n42\nno newline");
}

#[test]
fn fd_is_idempotent() {
    let mut pump = IterPipe::new(ItemStream::from_values(vec![Item::Int(1)]));
    let first = pump.fd().unwrap();
    let second = pump.fd().unwrap();
    assert_eq!(first, second);
    let mut read = pump.take_read().unwrap();
    let mut out = Vec::new();
    read.read_to_end(&mut out).unwrap();
    drop(read);
    pump.close().unwrap();
}

#[test]
fn read_end_is_inheritable_write_end_is_not() {
    // Only the read end can be checked from here; the write end lives
    // in the pump thread.  The read end must stay inheritable so the
    // child can use it as stdin.
    let mut pump = IterPipe::new(ItemStream::empty());
    pump.fd().unwrap();
    let read = pump.take_read().unwrap();
    assert!(!posix::get_cloexec(&read).unwrap());
    drop(read);
    pump.close().unwrap();
}

#[test]
fn source_errors_surface_on_close() {
    let failing = ItemStream::from_results(Box::new(
        vec![
            Ok(Item::Text("ok\n".into())),
            Err(Error::Io(io::Error::other("source broke"))),
        ]
        .into_iter(),
    ));
    let mut pump = IterPipe::new(failing);
    pump.fd().unwrap();
    let mut read = pump.take_read().unwrap();
    let mut out = Vec::new();
    read.read_to_end(&mut out).unwrap();
    drop(read);
    let err = pump.close().unwrap_err();
    assert!(matches!(err, Error::PumpSource(_)));
}

#[test]
fn peer_close_stops_the_pump_quietly() {
    // Enough items to outlast the pipe buffer, so the pump is still
    // writing when the read end goes away.
    let values: Vec<Item> = (0..200_000i64).map(Item::Int).collect();
    let mut pump = IterPipe::new(ItemStream::from_values(values));
    pump.fd().unwrap();
    let read = pump.take_read().unwrap();
    drop(read);
    pump.close().unwrap();
}

#[test]
fn close_without_fd_is_a_no_op() {
    let mut pump = IterPipe::new(ItemStream::from_values(vec![Item::Int(1)]));
    pump.close().unwrap();
}
