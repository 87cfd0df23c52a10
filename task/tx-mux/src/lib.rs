// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transmit multiplexer.
//!
//! One of these sits between every transmitting client and the NIC driver,
//! funnelling `N` per-client ring pairs into the driver's single pair. On
//! the way down it translates each buffer's virtual address into the
//! physical address the DMA engine needs; on the way back it uses the
//! physical address to find the owning client and return the buffer to the
//! right free ring. Which client gets to go next is delegated to a
//! [`policy::Policy`].
//!
//! The multiplexer trusts nobody below it: a buffer address outside every
//! client window means a protocol violation by a client (or corruption),
//! and there is no one to hand the buffer back to, so the domain aborts.

#![cfg_attr(not(test), no_std)]

use dma_region::DmaMap;
use ipc::{ChannelId, Notify};
use ringbuf::{ringbuf, ringbuf_entry};
use shared_ring::{Ring, RingHandle};

pub mod policy;

use crate::policy::Policy;

/// Buffers carved from each client's DMA window.
pub const NUM_BUFFERS: usize = 512;
pub const BUF_SIZE: usize = 2048;
/// Size of each client's DMA window.
pub const DMA_SIZE: usize = 0x20_0000;

/// Channel assignments when running [`policy::PriorityQuota`], from the
/// system description.
pub mod bandwidth_channels {
    use ipc::ChannelId;

    pub const CLIENT: ChannelId = ChannelId(0);
    pub const ARP: ChannelId = ChannelId(1);
    pub const DRIVER: ChannelId = ChannelId(2);
}

/// Channel assignments when running [`policy::RoundRobin`].
pub mod round_robin_channels {
    use ipc::ChannelId;

    pub const CLIENT_0: ChannelId = ChannelId(0);
    pub const CLIENT_1: ChannelId = ChannelId(1);
    pub const ARP: ChannelId = ChannelId(2);
    pub const DRIVER_SEND: ChannelId = ChannelId(3);
    pub const DRIVER_RECV: ChannelId = ChannelId(4);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Trace {
    None,
    /// Issued the (delayed) kick to the driver.
    DriverKicked,
    /// Woke a client whose free ring had run dry.
    ClientWoken(u8),
    /// A buffer address fell outside every client window.
    AddressFault,
}

ringbuf!(Trace, 16, Trace::None);

/// One client of the multiplexer: its ring pair and the channel to wake it
/// on.
pub struct Client {
    pub ring: RingHandle,
    pub channel: ChannelId,
}

/// The forwarding context a [`Policy`] drives: the client used rings on one
/// side, the driver used ring on the other, and the address map between
/// them.
pub struct TxPath<'a, const C: usize> {
    clients: &'a [Client; C],
    driver_used: &'a Ring,
    map: &'a DmaMap<C>,
}

impl<const C: usize> TxPath<'_, C> {
    pub fn driver_full(&self) -> bool {
        self.driver_used.is_full()
    }

    /// Moves one buffer from `client`'s used ring to the driver, address
    /// translated. Returns the byte count moved, or `None` if the client
    /// has nothing queued or the driver ring is full.
    pub fn forward_one(&self, client: usize) -> Option<u32> {
        if self.driver_used.is_full() {
            return None;
        }
        let desc = self.clients[client].ring.used.dequeue().ok()?;
        let phys = match self.map.phys_of(desc.addr) {
            Some(p) => p,
            None => {
                ringbuf_entry!(Trace::AddressFault);
                panic!("TX MUX: buffer address out of range");
            }
        };
        self.driver_used
            .enqueue(phys, desc.len, desc.cookie)
            .expect("driver used ring filled behind its own check");
        Some(desc.len)
    }
}

/// The multiplexer domain's state.
pub struct TxMux<P, N, const C: usize> {
    driver: RingHandle,
    driver_channel: ChannelId,
    clients: [Client; C],
    map: DmaMap<C>,
    policy: P,
    sys: N,
}

impl<P: Policy<C>, N: Notify, const C: usize> TxMux<P, N, C> {
    pub fn new(
        driver: RingHandle,
        driver_channel: ChannelId,
        clients: [Client; C],
        map: DmaMap<C>,
        policy: P,
        sys: N,
    ) -> Self {
        Self {
            driver,
            driver_channel,
            clients,
            map,
            policy,
            sys,
        }
    }

    /// Boot-time seeding: hands every client the buffers of its own DMA
    /// window via its free ring, and asks to be woken whenever a client
    /// queues work.
    ///
    /// The ring holds one less descriptor than there are slots, so the
    /// last buffer of each window stays unseeded; conservation is per
    /// descriptor in flight, not per byte of window.
    pub fn init(&mut self) {
        for (i, client) in self.clients.iter().enumerate() {
            let base = self.map.region(i).vbase;
            for k in 0..NUM_BUFFERS - 1 {
                client
                    .ring
                    .free
                    .enqueue(base + k * BUF_SIZE, BUF_SIZE as u32, 0)
                    .expect("seeding overran a client free ring");
            }
            client.ring.used.set_notify_reader(true);
        }
    }

    /// Forwards queued client buffers to the driver under the policy, then
    /// settles the notification hints.
    pub fn process_tx_ready(&mut self) {
        let path = TxPath {
            clients: &self.clients,
            driver_used: &self.driver.used,
            map: &self.map,
        };
        let moved = self.policy.forward(&path);

        // Kick the driver only if it asked to be woken and there is
        // actually new work; the kick is batched to the next kernel
        // boundary since nothing here blocks on it.
        if moved > 0 && self.driver.used.notify_reader() {
            ringbuf_entry!(Trace::DriverKicked);
            self.sys.notify_delayed(self.driver_channel);
        }

        // Ask the driver for completion wakeups only while some client is
        // waiting to have buffers returned.
        let waiting = self
            .clients
            .iter()
            .any(|c| c.ring.free.notify_reader());
        self.driver.free.set_notify_reader(waiting);
    }

    /// Drains the driver's free ring, returning each buffer to the client
    /// that owns it. Clients whose free ring was empty get woken, once,
    /// at the end.
    pub fn process_tx_complete(&mut self) {
        let mut woke = [false; C];

        while let Ok(desc) = self.driver.free.dequeue() {
            let virt = match self.map.virt_of(desc.addr) {
                Some(v) => v,
                None => {
                    ringbuf_entry!(Trace::AddressFault);
                    panic!("TX MUX: returned address out of range");
                }
            };
            let client = self
                .map
                .client_of(virt)
                .expect("translated address lost its owner");

            let was_empty = self.clients[client].ring.free.is_empty();
            self.clients[client]
                .ring
                .free
                .enqueue(virt, desc.len, desc.cookie)
                .expect("client free ring overflow implies duplicated buffers");
            if was_empty {
                woke[client] = true;
            }
        }

        for (client, wake) in woke.iter().enumerate() {
            if *wake {
                ringbuf_entry!(Trace::ClientWoken(client as u8));
                self.sys.notify(self.clients[client].channel);
            }
        }
    }

    /// Notification handler: any wakeup means "look at everything".
    ///
    /// The used-ring hints are cleared for the duration of the drain so
    /// clients don't burn notifications on a multiplexer that is already
    /// running, and re-armed before going idle.
    pub fn notified(&mut self, _ch: ChannelId) {
        for client in &self.clients {
            client.ring.used.set_notify_reader(false);
        }
        self.process_tx_complete();
        self.process_tx_ready();
        for client in &self.clients {
            client.ring.used.set_notify_reader(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::{Cell, RefCell};

    use crate::policy::{PriorityQuota, QuotaConfig, RoundRobin};
    use dma_region::DmaRegion;
    use ipc::Clock;
    use shared_ring::RawRing;

    #[derive(Debug, Eq, PartialEq)]
    enum Event {
        Notify(ChannelId),
        NotifyDelayed(ChannelId),
    }

    #[derive(Default)]
    struct TestSys {
        events: RefCell<Vec<Event>>,
    }

    impl Notify for TestSys {
        fn notify(&self, ch: ChannelId) {
            self.events.borrow_mut().push(Event::Notify(ch));
        }

        fn notify_delayed(&self, ch: ChannelId) {
            self.events.borrow_mut().push(Event::NotifyDelayed(ch));
        }

        fn irq_ack_delayed(&self, _ch: ChannelId) {
            unreachable!("the mux holds no interrupt channels");
        }
    }

    impl TestSys {
        fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.borrow_mut())
        }
    }

    struct TestClock(Cell<u64>);

    impl Clock for TestClock {
        fn now(&self) -> u64 {
            self.0.get()
        }
    }

    // The trace ring buffer is one shared static; hold this while running
    // so parallel tests don't contend for its single borrow.
    static TRACE_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn trace_guard() -> std::sync::MutexGuard<'static, ()> {
        TRACE_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle_pair() -> (RingHandle, RingHandle) {
        let free: &'static RawRing = Box::leak(Box::new(RawRing::new()));
        let used: &'static RawRing = Box::leak(Box::new(RawRing::new()));
        (
            RingHandle::new(Ring::new(free), Ring::new(used)),
            RingHandle::new(Ring::new(free), Ring::new(used)),
        )
    }

    const VBASE: [usize; 3] = [0x1000_0000, 0x2000_0000, 0x3000_0000];
    const PBASE: [usize; 3] = [0x8000_0000, 0x8020_0000, 0x8040_0000];

    fn map3() -> DmaMap<3> {
        DmaMap::new([
            DmaRegion::new(VBASE[0], PBASE[0], DMA_SIZE),
            DmaRegion::new(VBASE[1], PBASE[1], DMA_SIZE),
            DmaRegion::new(VBASE[2], PBASE[2], DMA_SIZE),
        ])
    }

    struct Fixture<P> {
        mux: TxMux<P, &'static TestSys, 3>,
        driver_peer: RingHandle,
        client_peers: [RingHandle; 3],
        sys: &'static TestSys,
    }

    fn fixture<P: Policy<3>>(policy: P, driver_ch: ChannelId) -> Fixture<P> {
        let (driver, driver_peer) = handle_pair();
        let (c0, p0) = handle_pair();
        let (c1, p1) = handle_pair();
        let (c2, p2) = handle_pair();
        let sys: &'static TestSys = Box::leak(Box::new(TestSys::default()));
        let mux = TxMux::new(
            driver,
            driver_ch,
            [
                Client {
                    ring: c0,
                    channel: ChannelId(0),
                },
                Client {
                    ring: c1,
                    channel: ChannelId(1),
                },
                Client {
                    ring: c2,
                    channel: ChannelId(2),
                },
            ],
            map3(),
            policy,
            sys,
        );
        Fixture {
            mux,
            driver_peer,
            client_peers: [p0, p1, p2],
            sys,
        }
    }

    fn queue_packets(f: &Fixture<impl Policy<3>>, client: usize, n: usize, len: u32) {
        for k in 0..n {
            f.client_peers[client]
                .used
                .enqueue(VBASE[client] + k * BUF_SIZE, len, client * 100 + k)
                .unwrap();
        }
    }

    /// Scenario: three equally loaded clients are interleaved strictly,
    /// and the driver is kicked exactly once, delayed.
    #[test]
    fn round_robin_fairness() {
        let _trace = trace_guard();
        let mut f = fixture(RoundRobin, round_robin_channels::DRIVER_SEND);
        for client in 0..3 {
            queue_packets(&f, client, 10, 100);
        }
        f.driver_peer.used.set_notify_reader(true);

        f.mux.process_tx_ready();

        let order: Vec<usize> = std::iter::from_fn(|| {
            f.driver_peer.used.dequeue().ok().map(|d| d.cookie / 100)
        })
        .collect();
        assert_eq!(order.len(), 30);
        assert_eq!(&order[..9], &[0, 1, 2, 0, 1, 2, 0, 1, 2]);
        assert_eq!(
            f.sys.take(),
            vec![Event::NotifyDelayed(round_robin_channels::DRIVER_SEND)]
        );
    }

    /// Forwarded descriptors carry translated physical addresses.
    #[test]
    fn forwarding_translates_addresses() {
        let _trace = trace_guard();
        let mut f = fixture(RoundRobin, round_robin_channels::DRIVER_SEND);
        queue_packets(&f, 1, 1, 900);

        f.mux.process_tx_ready();

        let d = f.driver_peer.used.dequeue().unwrap();
        assert_eq!(d.addr, PBASE[1]);
        assert_eq!(d.len, 900);
        assert_eq!(d.cookie, 100);
    }

    /// No kick when the driver didn't ask for one, or when nothing moved.
    #[test]
    fn driver_kick_respects_hint_and_progress() {
        let _trace = trace_guard();
        let mut f = fixture(RoundRobin, round_robin_channels::DRIVER_SEND);

        // Hint clear, work available: no kick.
        queue_packets(&f, 0, 1, 64);
        f.mux.process_tx_ready();
        assert!(f.sys.take().is_empty());

        // Hint set, nothing queued: still no kick.
        f.driver_peer.used.set_notify_reader(true);
        f.mux.process_tx_ready();
        assert!(f.sys.take().is_empty());
    }

    /// Scenario: the high-priority client is served until its byte budget
    /// is crossed, the low-priority client runs to completion, and the
    /// next timeslice readmits the high client.
    #[test]
    fn priority_quota() {
        let _trace = trace_guard();
        let clock: &'static TestClock =
            Box::leak(Box::new(TestClock(Cell::new(0))));
        let policy = PriorityQuota::new(
            clock,
            QuotaConfig {
                order: [0, 1, 2],
                byte_limit: [1000, 1000, 1000],
                timeslice: 1_000_000,
            },
        );
        let mut f = fixture(policy, bandwidth_channels::DRIVER);

        queue_packets(&f, 0, 5, 600);
        queue_packets(&f, 1, 5, 100);

        f.mux.process_tx_ready();

        let order: Vec<usize> = std::iter::from_fn(|| {
            f.driver_peer.used.dequeue().ok().map(|d| d.cookie / 100)
        })
        .collect();
        // 600 + 600 crosses the 1000-byte budget after two packets; the
        // low client's 500 bytes fit entirely.
        assert_eq!(order, vec![0, 0, 1, 1, 1, 1, 1]);

        // Same timeslice: the high client stays over budget.
        f.mux.process_tx_ready();
        assert!(f.driver_peer.used.dequeue().is_err());

        // Next timeslice: budgets reset, the high client gets another two
        // packets before crossing its budget again.
        clock.0.set(2_000_000);
        f.mux.process_tx_ready();
        let order: Vec<usize> = std::iter::from_fn(|| {
            f.driver_peer.used.dequeue().ok().map(|d| d.cookie / 100)
        })
        .collect();
        assert_eq!(order, vec![0, 0]);
    }

    /// Returned buffers go back to their owners, and a client is woken
    /// only on its free ring's empty-to-nonempty edge.
    #[test]
    fn complete_returns_to_owner() {
        let _trace = trace_guard();
        let mut f = fixture(RoundRobin, round_robin_channels::DRIVER_SEND);

        // Client 1 already has a free buffer; client 0 and 2 are dry.
        f.client_peers[1]
            .free
            .enqueue(VBASE[1] + 0x1000, BUF_SIZE as u32, 0)
            .unwrap();

        // The driver returns two buffers for client 0 and one each for
        // the others.
        f.driver_peer.free.enqueue(PBASE[0], 2048, 1).unwrap();
        f.driver_peer.free.enqueue(PBASE[2] + 0x800, 2048, 2).unwrap();
        f.driver_peer.free.enqueue(PBASE[0] + 0x800, 2048, 3).unwrap();
        f.driver_peer.free.enqueue(PBASE[1] + 0x800, 2048, 4).unwrap();

        f.mux.process_tx_complete();

        assert_eq!(
            f.sys.take(),
            vec![Event::Notify(ChannelId(0)), Event::Notify(ChannelId(2))]
        );

        let c0: Vec<(usize, usize)> = std::iter::from_fn(|| {
            f.client_peers[0].free.dequeue().ok().map(|d| (d.addr, d.cookie))
        })
        .collect();
        assert_eq!(c0, vec![(VBASE[0], 1), (VBASE[0] + 0x800, 3)]);

        let c2 = f.client_peers[2].free.dequeue().unwrap();
        assert_eq!(c2.addr, VBASE[2] + 0x800);
        assert!(f.client_peers[2].free.dequeue().is_err());
    }

    /// Every descriptor that leaves a client comes back to the same
    /// client with its cookie intact, exactly once.
    #[test]
    fn conservation_round_trip() {
        let _trace = trace_guard();
        let mut f = fixture(RoundRobin, round_robin_channels::DRIVER_SEND);
        for client in 0..3 {
            queue_packets(&f, client, 7, 200);
        }
        f.mux.process_tx_ready();

        // Play the driver: consume every frame, then hand the buffer
        // back on the free ring.
        while let Ok(d) = f.driver_peer.used.dequeue() {
            f.driver_peer.free.enqueue(d.addr, d.len, d.cookie).unwrap();
        }
        f.mux.process_tx_complete();

        for client in 0..3 {
            let mut got: Vec<(usize, usize)> = std::iter::from_fn(|| {
                f.client_peers[client]
                    .free
                    .dequeue()
                    .ok()
                    .map(|d| (d.addr, d.cookie))
            })
            .collect();
            got.sort();
            let mut want: Vec<(usize, usize)> = (0..7)
                .map(|k| (VBASE[client] + k * BUF_SIZE, client * 100 + k))
                .collect();
            want.sort();
            assert_eq!(got, want);
        }
    }

    /// The driver free ring's wake-me hint mirrors whether any client is
    /// waiting for buffers.
    #[test]
    fn driver_hint_tracks_waiting_clients() {
        let _trace = trace_guard();
        let mut f = fixture(RoundRobin, round_robin_channels::DRIVER_SEND);

        f.mux.process_tx_ready();
        assert!(!f.driver_peer.free.notify_reader());

        f.client_peers[2].free.set_notify_reader(true);
        f.mux.process_tx_ready();
        assert!(f.driver_peer.free.notify_reader());
    }

    /// The notified() drain clears and re-arms the client used hints.
    #[test]
    fn notified_rearms_client_hints() {
        let _trace = trace_guard();
        let mut f = fixture(RoundRobin, round_robin_channels::DRIVER_SEND);
        f.mux.init();

        for peer in &f.client_peers {
            assert!(peer.used.notify_reader());
            // init seeded this client's window, one short of the ring.
            assert_eq!(peer.free.len(), NUM_BUFFERS - 1);
            let first = peer.free.dequeue().unwrap();
            assert_eq!(first.len, BUF_SIZE as u32);
        }
        assert_eq!(
            f.client_peers[0].free.dequeue().unwrap().addr,
            VBASE[0] + BUF_SIZE
        );

        f.mux.notified(round_robin_channels::CLIENT_0);
        for peer in &f.client_peers {
            assert!(peer.used.notify_reader());
        }
    }

    /// A client handing over an address outside its window is fatal.
    #[test]
    #[should_panic(expected = "out of range")]
    fn bogus_address_is_fatal() {
        let _trace = trace_guard();
        let mut f = fixture(RoundRobin, round_robin_channels::DRIVER_SEND);
        f.client_peers[0]
            .used
            .enqueue(0xdead_0000, 64, 0)
            .unwrap();
        f.mux.process_tx_ready();
    }
}
