mod common;

use std::boxed::Box;
use std::cell::RefCell;
use std::rc::Rc;

use common::*;
use dispbus::{Submission, Transfer};
use embassy_time::{Duration, MockDriver};
use futures_executor::LocalPool;

fn payload(tag: u8) -> Transfer<'static> { Transfer::write(Box::leak(vec![tag; 8].into_boxed_slice())) }

#[test]
fn test_drain_poll_gives_up_and_retries() {
    let driver = MockDriver::get();
    driver.reset();

    let wire = Wire::default();
    let gate = gate();
    let config = test_config().with_drain_poll(Some(Duration::from_millis(1)));
    let bus = leak_bus::<2, 2>(config, FakeTransport::gated(&wire, &gate));

    let mut executor = LocalPool::new();
    spawn_engine(&executor, bus);

    let outcome = Rc::new(RefCell::new(None));
    let slot = outcome.clone();
    spawn(&executor, async move {
        bus.submit(Submission::Queued(payload(1))).await.unwrap();
        *slot.borrow_mut() = Some(bus.drain_one(Some(Duration::from_millis(1))).await);
    });
    executor.run_until_stalled();
    assert!(outcome.borrow().is_none());

    driver.advance(Duration::from_millis(2));
    executor.run_until_stalled();
    assert_eq!(outcome.borrow_mut().take(), Some(None));
    assert_conserved(bus);

    // A waiting polling command keeps polling until the engine finishes.
    let sent = Rc::new(RefCell::new(false));
    let flag = sent.clone();
    spawn(&executor, async move {
        bus.send_command(0x29).await.unwrap();
        *flag.borrow_mut() = true;
    });
    for _ in 0..3 {
        driver.advance(Duration::from_millis(1));
        executor.run_until_stalled();
        assert!(!*sent.borrow());
    }

    open(&gate, 1);
    executor.run_until_stalled();
    driver.advance(Duration::from_millis(1));
    executor.run_until_stalled();
    assert!(*sent.borrow());
    assert_eq!(bus.idle_count(), 2);
}
