mod common;

use std::boxed::Box;
use std::cell::Cell;
use std::rc::Rc;
use std::vec::Vec;

use common::*;
use dispbus::flush::{CASET, RAMWR, RASET};
use dispbus::{Area, DcLevel, DirtyRegion, DmaBuffer, Error, FlushPipeline, FlushState, Renderer, RequestError};
use futures_executor::LocalPool;

/// A 240x80 region: two display bands.
const REGION_BYTES: usize = 38_400;

struct OneShot {
    buffer: &'static DmaBuffer<REGION_BYTES>,
    area: Area,
    pending: bool,
    completed: Rc<Cell<usize>>,
}

impl Renderer for OneShot {
    fn dirty_region(&mut self) -> Option<DirtyRegion> {
        if !self.pending {
            return None;
        }
        self.pending = false;
        Some(DirtyRegion {
            area: self.area,
            pixels: self.buffer.lease_all()?,
        })
    }

    fn on_flush_complete(&mut self) { self.completed.set(self.completed.get() + 1); }
}

fn rendered_buffer() -> &'static DmaBuffer<REGION_BYTES> {
    let buffer: &'static DmaBuffer<REGION_BYTES> = Box::leak(Box::new(DmaBuffer::new()));
    let mut pixels = buffer.try_write().unwrap();
    for (i, byte) in pixels.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    drop(pixels);
    buffer
}

#[test]
fn test_polling_command_leaves_pool_unchanged() {
    let wire = Wire::default();
    let bus = leak_bus::<8, 4>(test_config(), FakeTransport::new(&wire));

    let mut executor = LocalPool::new();
    spawn_engine(&executor, bus);

    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    spawn(&executor, async move {
        bus.send_command(0x36).await.unwrap();
        bus.send_data(&[0x01, 0x02, 0x03, 0x04]).await.unwrap();
        flag.set(true);
    });
    executor.run_until_stalled();

    assert!(done.get());
    assert_eq!(bus.idle_count(), 8);
    assert_eq!(bus.in_flight_count(), 0);

    let wire = wire.borrow();
    let records = &wire.records;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].tx, [0x36]);
    assert_eq!(records[0].dc, DcLevel::Command);
    assert_eq!(records[1].tx, [0x01, 0x02, 0x03, 0x04]);
    assert_eq!(records[1].dc, DcLevel::Data);
    assert!(records.iter().all(|r| r.path == Path::Blocking));
}

#[test]
fn test_region_flush_streams_in_chunks() {
    let wire = Wire::default();
    let bus = leak_bus::<8, 4>(test_config(), FakeTransport::new(&wire));
    let buffer = rendered_buffer();
    let completed = Rc::new(Cell::new(0));

    let mut executor = LocalPool::new();
    spawn_engine(&executor, bus);

    let mut renderer = OneShot {
        buffer,
        area: Area::new(0, 0, 239, 79),
        pending: true,
        completed: completed.clone(),
    };
    let state = Rc::new(Cell::new(FlushState::StreamPixels));
    let final_state = state.clone();
    spawn(&executor, async move {
        let mut pipeline = FlushPipeline::new(bus);
        assert!(pipeline.service(&mut renderer).await.unwrap());
        assert!(!pipeline.service(&mut renderer).await.unwrap());
        final_state.set(pipeline.state());
    });
    executor.run_until_stalled();

    assert_eq!(completed.get(), 1);
    assert_eq!(state.get(), FlushState::Idle);
    assert!(!buffer.is_leased());
    assert_eq!(bus.stats().snapshot().flushes, 1);

    let wire = wire.borrow();
    let records = &wire.records;
    assert_eq!(records[0].tx, [CASET]);
    assert_eq!(records[1].tx, [0x00, 0x00, 0x00, 0xEF]);
    assert_eq!(records[2].tx, [RASET]);
    assert_eq!(records[3].tx, [0x00, 0x00, 0x00, 0x4F]);
    assert_eq!(records[4].tx, [RAMWR]);
    assert!(records[..5].iter().all(|r| r.path == Path::Blocking));

    let chunks = &records[5..];
    let lens: Vec<usize> = chunks.iter().map(|r| r.tx.len()).collect();
    assert_eq!(lens, [10_248, 10_248, 10_248, 7_656]);
    assert!(chunks.iter().all(|r| r.path == Path::Async && r.dc == DcLevel::Data));
    assert_eq!(chunks.iter().filter(|r| r.flush).count(), 1);
    assert!(chunks.last().unwrap().flush);

    let streamed: Vec<u8> = chunks.iter().flat_map(|r| r.tx.iter().copied()).collect();
    assert_eq!(streamed.len(), REGION_BYTES);
    assert!(streamed.iter().enumerate().all(|(i, &b)| b == (i % 251) as u8));
}

#[test]
fn test_flush_completes_after_last_chunk() {
    let wire = Wire::default();
    let gate = gate();
    let bus = leak_bus::<8, 8>(test_config(), FakeTransport::gated(&wire, &gate));
    let buffer = rendered_buffer();
    let completed = Rc::new(Cell::new(0));

    let mut executor = LocalPool::new();
    spawn_engine(&executor, bus);

    let mut renderer = OneShot {
        buffer,
        area: Area::new(0, 0, 239, 79),
        pending: true,
        completed: completed.clone(),
    };
    spawn(&executor, async move {
        let mut pipeline = FlushPipeline::new(bus);
        pipeline.service(&mut renderer).await.unwrap();
    });
    executor.run_until_stalled();

    // Window commands went out; the first pixel chunk is on the wire.
    assert_eq!(wire.borrow().records.len(), 5);
    assert_eq!(completed.get(), 0);
    assert!(buffer.is_leased());
    assert!(buffer.try_write().is_none());
    assert_conserved(bus);

    open(&gate, 3);
    executor.run_until_stalled();
    assert_eq!(wire.borrow().records.len(), 8);
    assert_eq!(completed.get(), 0);
    assert!(buffer.is_leased());
    assert_eq!(bus.queue().flush_count(), 0);

    open(&gate, 1);
    executor.run_until_stalled();
    assert_eq!(completed.get(), 1);
    assert!(!buffer.is_leased());
    assert!(buffer.try_write().is_some());
    assert_conserved(bus);
}

#[test]
fn test_full_range_region_refused() {
    let wire = Wire::default();
    let bus = leak_bus::<8, 8>(test_config(), FakeTransport::new(&wire));
    let buffer = rendered_buffer();

    let mut executor = LocalPool::new();
    spawn_engine(&executor, bus);

    let mut pipeline = FlushPipeline::new(bus);
    let region = DirtyRegion {
        area: Area::new(0, 0, u16::MAX, u16::MAX),
        pixels: buffer.lease_all().unwrap(),
    };
    let result = executor.run_until(pipeline.flush(region));

    assert!(matches!(
        result,
        Err(Error::InvalidRequest(RequestError::RegionExceedsBuffer {
            available: REGION_BYTES,
            ..
        }))
    ));
    assert_eq!(pipeline.state(), FlushState::Idle);
    assert!(!buffer.is_leased());
    assert!(wire.borrow().records.is_empty());
    assert_eq!(bus.idle_count(), 8);
}
