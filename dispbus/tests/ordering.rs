mod common;

use std::boxed::Box;
use std::cell::Cell;
use std::rc::Rc;

use common::*;
use dispbus::{Submission, Transfer};
use futures_executor::LocalPool;

fn payload(tag: u8) -> Transfer<'static> { Transfer::write(Box::leak(vec![tag; 32].into_boxed_slice())) }

#[test]
fn test_polling_waits_for_queued_transfers() {
    let wire = Wire::default();
    let gate = gate();
    let bus = leak_bus::<8, 8>(test_config(), FakeTransport::gated(&wire, &gate));

    let mut executor = LocalPool::new();
    spawn_engine(&executor, bus);

    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    spawn(&executor, async move {
        for tag in 1..=3 {
            bus.submit(Submission::Queued(payload(tag))).await.unwrap();
        }
        bus.send_command(0xA0).await.unwrap();
        bus.send_command(0xA1).await.unwrap();
        flag.set(true);
    });
    executor.run_until_stalled();

    // The polling command is parked behind the queued work.
    assert!(!done.get());
    assert!(wire.borrow().records.is_empty());

    open(&gate, 3);
    executor.run_until_stalled();
    assert!(done.get());
    assert_eq!(bus.idle_count(), 8);

    let wire = wire.borrow();
    let records = &wire.records;
    assert_eq!(records.len(), 5);
    let queued_end = records[..3].iter().map(|r| r.end).max().unwrap();
    assert!(records[..3].iter().all(|r| r.path == Path::Async));
    assert_eq!(records[3].tx, [0xA0]);
    assert_eq!(records[3].path, Path::Blocking);
    assert!(records[3].start > queued_end);
    assert_eq!(records[4].tx, [0xA1]);
    assert!(records[4].start > records[3].end);
}

#[test]
fn test_queued_transfers_run_in_submission_order() {
    let wire = Wire::default();
    let bus = leak_bus::<8, 2>(test_config(), FakeTransport::new(&wire));

    let mut executor = LocalPool::new();
    spawn_engine(&executor, bus);
    spawn(&executor, async move {
        for tag in 0..12 {
            bus.submit(Submission::Queued(payload(tag))).await.unwrap();
        }
    });
    executor.run_until_stalled();

    let wire = wire.borrow();
    let tags: Vec<u8> = wire.records.iter().map(|r| r.tx[0]).collect();
    assert_eq!(tags, (0..12).collect::<Vec<u8>>());
    assert!(wire.records.windows(2).all(|w| w[1].start > w[0].end));
}

#[test]
fn test_synchronous_waits_then_uses_async_path() {
    let wire = Wire::default();
    let gate = gate();
    let bus = leak_bus::<8, 8>(test_config(), FakeTransport::gated(&wire, &gate));

    let mut executor = LocalPool::new();
    spawn_engine(&executor, bus);

    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    spawn(&executor, async move {
        bus.submit(Submission::Queued(payload(1))).await.unwrap();
        bus.submit(Submission::Queued(payload(2))).await.unwrap();
        let frame = [0x55u8; 64];
        bus.submit(Submission::Synchronous(Transfer::write(&frame))).await.unwrap();
        flag.set(true);
    });
    executor.run_until_stalled();
    assert!(!done.get());

    open(&gate, 2);
    executor.run_until_stalled();
    // Queued work is done; the synchronous transfer itself is now on the wire.
    assert!(!done.get());
    assert_eq!(wire.borrow().records.len(), 2);
    assert_eq!(bus.idle_count(), 8);

    open(&gate, 1);
    executor.run_until_stalled();
    assert!(done.get());

    let wire = wire.borrow();
    let records = &wire.records;
    assert_eq!(records[2].tx.len(), 64);
    assert_eq!(records[2].path, Path::Async);
    assert!(records[2].start > records[1].end);
    // Synchronous transfers never take a descriptor.
    assert_eq!(bus.stats().snapshot().queued, 2);
    assert_eq!(bus.idle_count(), 8);
}
