#![allow(dead_code)]

use std::boxed::Box;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;
use std::vec::Vec;

use dispbus::config::PinMap;
use dispbus::{Address, BusConfig, DcLevel, Descriptor, DisplayBus, Fault, Transfer, Transport};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use futures_executor::LocalPool;
use futures_task::LocalSpawn;

pub type TestBus<const C: usize, const Q: usize> = DisplayBus<CriticalSectionRawMutex, FakeTransport, C, Q>;

pub const PINS: PinMap = PinMap {
    sclk: 18,
    mosi: 19,
    miso: Some(4),
    cs: 17,
    dc: Some(16),
    reset: Some(21),
    backlight: Some(20),
};

/// Default test configuration: no timers involved while draining.
pub fn test_config() -> BusConfig { BusConfig::new(10_000_000, PINS).with_drain_poll(None) }

// =============================================================================
// Fake Transport
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Path {
    Blocking,
    Async,
}

/// One transfer as seen on the wire. `start`/`end` come from a logical clock.
#[derive(Clone, Debug)]
pub struct Record {
    pub path: Path,
    pub start: u64,
    pub end: u64,
    pub dc: DcLevel,
    pub address: Option<Address>,
    pub tx: Vec<u8>,
    pub rx_len: usize,
    pub keep_cs: bool,
    pub flush: bool,
    pub ok: bool,
}

#[derive(Default)]
pub struct WireState {
    pub clock: u64,
    pub records: Vec<Record>,
    /// Bytes returned by successive reads; reads past the end get zeros.
    pub replies: VecDeque<Vec<u8>>,
    /// Number of upcoming async transfers to fail.
    pub fail_async: usize,
    pub releases: usize,
}

impl WireState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

pub type Wire = Rc<RefCell<WireState>>;

/// Completion permits for async transfers.
pub type Gate = Rc<Channel<CriticalSectionRawMutex, (), 64>>;

pub fn gate() -> Gate { Rc::new(Channel::new()) }

pub fn open(
    gate: &Gate,
    permits: usize,
) {
    for _ in 0..permits {
        gate.try_send(()).unwrap();
    }
}

pub struct FakeTransport {
    wire: Wire,
    gate: Option<Gate>,
}

impl FakeTransport {
    pub fn new(wire: &Wire) -> Self {
        Self {
            wire: wire.clone(),
            gate: None,
        }
    }

    /// Async transfers block until a permit is available on `gate`.
    pub fn gated(
        wire: &Wire,
        gate: &Gate,
    ) -> Self {
        Self {
            wire: wire.clone(),
            gate: Some(gate.clone()),
        }
    }

    fn finish(
        &mut self,
        path: Path,
        start: u64,
        transfer: &mut Transfer<'_>,
    ) -> Result<(), Fault> {
        let mut wire = self.wire.borrow_mut();
        let fail = path == Path::Async && wire.fail_async > 0;
        if fail {
            wire.fail_async -= 1;
        }

        let mut record = Record {
            path,
            start,
            end: 0,
            dc: transfer.dc(),
            address: transfer.address(),
            tx: transfer.tx().to_vec(),
            rx_len: transfer.rx_len(),
            keep_cs: transfer.keeps_cs_active(),
            flush: transfer.signals_flush(),
            ok: !fail,
        };

        if let Some(rx) = transfer.rx_mut() {
            let reply = wire.replies.pop_front().unwrap_or_default();
            for (i, byte) in rx.iter_mut().enumerate() {
                *byte = reply.get(i).copied().unwrap_or(0);
            }
        }

        record.end = wire.tick();
        wire.records.push(record);
        if fail { Err(Fault::Spi) } else { Ok(()) }
    }
}

impl Transport for FakeTransport {
    fn transfer_blocking(
        &mut self,
        transfer: &mut Transfer<'_>,
    ) -> Result<(), Fault> {
        let start = self.wire.borrow_mut().tick();
        self.finish(Path::Blocking, start, transfer)
    }

    async fn transfer(
        &mut self,
        transfer: &mut Transfer<'_>,
    ) -> Result<(), Fault> {
        let start = self.wire.borrow_mut().tick();
        if let Some(gate) = &self.gate {
            gate.receive().await;
        }
        self.finish(Path::Async, start, transfer)
    }

    fn release_hold(&mut self) -> Result<(), Fault> {
        self.wire.borrow_mut().releases += 1;
        Ok(())
    }
}

// =============================================================================
// Setup Helpers
// =============================================================================

/// Leak a bus and seed its pool.
pub fn leak_bus<const C: usize, const Q: usize>(
    config: BusConfig,
    transport: FakeTransport,
) -> &'static TestBus<C, Q> {
    let bus: &'static TestBus<C, Q> = Box::leak(Box::new(DisplayBus::new(config, transport)));
    let storage = Box::leak(Box::new([const { Descriptor::new() }; C]));
    bus.init(storage).unwrap();
    bus
}

pub fn spawn(
    executor: &LocalPool,
    fut: impl Future<Output = ()> + 'static,
) {
    executor.spawner().spawn_local_obj(Box::new(fut).into()).unwrap();
}

/// Spawn the bus engine on `executor`.
pub fn spawn_engine<const C: usize, const Q: usize>(
    executor: &LocalPool,
    bus: &'static TestBus<C, Q>,
) {
    spawn(executor, async move {
        bus.run_engine().await;
    });
}

pub fn assert_conserved<const C: usize, const Q: usize>(bus: &TestBus<C, Q>) {
    assert_eq!(bus.idle_count() + bus.in_flight_count(), C);
}
