//! Sweeper — the recurring sweep state machine.
//!
//! One tick executes the whole sweep algorithm to completion: recovery,
//! the zero-device gate, routine creation, the offset walk over devices
//! with one probe and one ping row each, and routine completion. Only
//! after the tick returns — success, gated skip, or store failure — is
//! the idle timer armed for the next one, so at most one sweep is ever
//! in flight.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, error, info};

use netpulse_bus::{EventBus, SweepEvent};
use netpulse_probe::Prober;
use netpulse_state::NewPing;

use crate::config::SweepConfig;
use crate::error::SweepResult;
use crate::store::SweepStore;

/// Drives recurring probe sweeps over the registered devices.
pub struct Sweeper<S, P> {
    store: S,
    prober: P,
    bus: EventBus,
    config: SweepConfig,
    /// Cancellation handle for the pending idle timer. The timer is the
    /// only cancellation point; an in-flight sweep always runs to
    /// completion.
    timer: Mutex<Option<watch::Sender<bool>>>,
}

impl<S, P> Sweeper<S, P>
where
    S: SweepStore + 'static,
    P: Prober + 'static,
{
    pub fn new(store: S, prober: P, bus: EventBus, config: SweepConfig) -> Self {
        Self {
            store,
            prober,
            bus,
            config,
            timer: Mutex::new(None),
        }
    }

    /// The bus this sweeper publishes on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Cancel any pending idle timer, then trigger the first tick
    /// without blocking the caller. Calling again replaces the pending
    /// timer, it never stacks a second one.
    pub fn start(self: &Arc<Self>) {
        let cancel = self.replace_timer();
        let sweeper = Arc::clone(self);
        tokio::spawn(async move { sweeper.run(cancel).await });
        debug!("sweep loop started");
    }

    /// Cancel the pending idle timer. Idempotent. Cannot cancel an
    /// in-flight sweep — there is no cancellation point inside one —
    /// but a clear issued mid-sweep also cancels the re-arm that
    /// follows it, so the sweep completes and no further one runs.
    pub fn clear(&self) {
        if let Some(tx) = self.timer.lock().unwrap().take() {
            let _ = tx.send(true);
            debug!("idle timer cancelled");
        }
    }

    /// Install a fresh timer token, cancelling whichever was pending.
    fn replace_timer(&self) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        if let Some(prev) = self.timer.lock().unwrap().replace(tx) {
            let _ = prev.send(true);
        }
        rx
    }

    /// Tick, idle, repeat — until the idle wait is cancelled.
    async fn run(self: Arc<Self>, mut cancel: watch::Receiver<bool>) {
        loop {
            if let Err(e) = self.tick().await {
                // The sweep is abandoned but the loop must stay alive:
                // the idle timer below is re-armed regardless.
                error!(error = %e, "sweep aborted");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.idle_interval) => {}
                _ = cancel.changed() => return,
            }
        }
    }

    /// Execute one sweep to completion.
    ///
    /// A probe failure becomes a failed ping row and the walk continues;
    /// a routine insert that yields no id retries the whole tick in
    /// place. Only a store failure aborts, leaving the routine row for
    /// the next tick's recovery pass.
    pub async fn tick(&self) -> SweepResult<()> {
        loop {
            // Recovery first, so the routine created below is never
            // touched by its own tick's pass.
            self.store.reset_unfinished_routines().await?;

            let devices = self.store.count_devices().await?;
            if devices == 0 {
                debug!("no devices registered, skipping sweep");
                return Ok(());
            }

            let timestamp = epoch_millis();
            let Some(routine_id) = self.store.insert_routine(timestamp).await? else {
                debug!("routine insert yielded no id, retrying tick");
                continue;
            };

            self.bus.publish(&SweepEvent::NewRoutine {
                id: routine_id,
                timestamp,
            });
            info!(routine_id, devices, "sweep started");

            let mut offset = 0u64;
            while let Some(device) = self.store.device_at_offset(offset).await? {
                let probed_at = epoch_millis();
                let row = match self.prober.probe(device.address).await {
                    Ok(reply) => NewPing {
                        routine_id,
                        device_id: device.id,
                        rtt: Some(reply.rtt_ms),
                        failed: false,
                        timestamp: probed_at,
                    },
                    Err(e) => {
                        debug!(
                            device_id = device.id,
                            address = %device.address,
                            error = %e,
                            "probe failed"
                        );
                        NewPing {
                            routine_id,
                            device_id: device.id,
                            rtt: None,
                            failed: true,
                            timestamp: probed_at,
                        }
                    }
                };

                let ping = self.store.insert_ping(&row).await?;
                self.bus.publish(&SweepEvent::PingDone(ping));
                offset += 1;
            }

            // The routine_end payload carries the creation time.
            self.bus.publish(&SweepEvent::RoutineEnd {
                id: routine_id,
                timestamp,
            });
            self.store.finish_routine(routine_id, epoch_millis()).await?;
            info!(routine_id, pings = offset, "sweep finished");
            return Ok(());
        }
    }
}

/// Current Unix epoch in milliseconds.
fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use netpulse_bus::Topic;
    use netpulse_probe::{ProbeError, ProbeReply};
    use netpulse_state::{Device, Ping, Routine, RoutineId, StateError, StateResult};

    fn addr(last_octet: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last_octet)
    }

    // ── Test doubles ───────────────────────────────────────────────

    /// In-memory store with injectable faults.
    #[derive(Default)]
    struct MockStore {
        devices: Mutex<Vec<Device>>,
        routines: Mutex<Vec<Routine>>,
        pings: Mutex<Vec<Ping>>,
        /// `insert_routine` yields no id this many times.
        raced_inserts: AtomicU64,
        /// `device_at_offset` fails when asked for this offset.
        fail_fetch_at: Mutex<Option<u64>>,
    }

    impl MockStore {
        fn add_device(&self, last_octet: u8) -> Device {
            let mut devices = self.devices.lock().unwrap();
            let device = Device {
                id: devices.len() as u64 + 1,
                name: format!("dev-{last_octet}"),
                address: addr(last_octet),
                descr: None,
                disabled: false,
            };
            devices.push(device.clone());
            device
        }

        fn seed_routine(&self, timestamp: u64, finished_timestamp: Option<u64>) -> RoutineId {
            let mut routines = self.routines.lock().unwrap();
            let id = routines.len() as u64 + 1;
            routines.push(Routine {
                id,
                timestamp,
                finished_timestamp,
            });
            id
        }

        fn routines(&self) -> Vec<Routine> {
            self.routines.lock().unwrap().clone()
        }

        fn pings(&self) -> Vec<Ping> {
            self.pings.lock().unwrap().clone()
        }
    }

    impl SweepStore for MockStore {
        fn reset_unfinished_routines(
            &self,
        ) -> impl std::future::Future<Output = StateResult<u64>> + Send {
            let mut routines = self.routines.lock().unwrap();
            let mut affected = 0;
            for routine in routines.iter_mut() {
                if routine.finished_timestamp.is_none() {
                    routine.finished_timestamp = Some(netpulse_state::ABANDONED_TIMESTAMP);
                    affected += 1;
                }
            }
            std::future::ready(Ok(affected))
        }

        fn count_devices(&self) -> impl std::future::Future<Output = StateResult<u64>> + Send {
            std::future::ready(Ok(self.devices.lock().unwrap().len() as u64))
        }

        fn device_at_offset(
            &self,
            offset: u64,
        ) -> impl std::future::Future<Output = StateResult<Option<Device>>> + Send {
            let result = if *self.fail_fetch_at.lock().unwrap() == Some(offset) {
                Err(StateError::Read("injected fetch failure".into()))
            } else {
                Ok(self.devices.lock().unwrap().get(offset as usize).cloned())
            };
            std::future::ready(result)
        }

        fn insert_routine(
            &self,
            timestamp: u64,
        ) -> impl std::future::Future<Output = StateResult<Option<RoutineId>>> + Send {
            let raced = self
                .raced_inserts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            let result = if raced {
                Ok(None)
            } else {
                Ok(Some(self.seed_routine(timestamp, None)))
            };
            std::future::ready(result)
        }

        fn insert_ping(
            &self,
            ping: &NewPing,
        ) -> impl std::future::Future<Output = StateResult<Ping>> + Send {
            let mut pings = self.pings.lock().unwrap();
            let row = ping.clone().into_ping(pings.len() as u64 + 1);
            pings.push(row.clone());
            std::future::ready(Ok(row))
        }

        fn finish_routine(
            &self,
            id: RoutineId,
            timestamp: u64,
        ) -> impl std::future::Future<Output = StateResult<()>> + Send {
            let mut routines = self.routines.lock().unwrap();
            let result = match routines.iter_mut().find(|r| r.id == id) {
                Some(routine) => {
                    routine.finished_timestamp = Some(timestamp);
                    Ok(())
                }
                None => Err(StateError::NotFound(format!("routine {id}"))),
            };
            std::future::ready(result)
        }
    }

    /// Prober that parks every probe until the test releases a permit.
    struct GatedProber {
        gate: Arc<tokio::sync::Semaphore>,
    }

    impl Prober for GatedProber {
        fn probe(
            &self,
            _address: Ipv4Addr,
        ) -> impl std::future::Future<Output = Result<ProbeReply, ProbeError>> + Send {
            let gate = self.gate.clone();
            async move {
                let _permit = gate.acquire().await.map_err(|_| ProbeError::TimedOut)?;
                Ok(ProbeReply { rtt_ms: 1 })
            }
        }
    }

    /// Prober scripted by address: listed addresses reply with the given
    /// RTT, everything else times out.
    #[derive(Default)]
    struct ScriptedProber {
        rtts: HashMap<Ipv4Addr, u64>,
    }

    impl ScriptedProber {
        fn reachable(addresses: &[(u8, u64)]) -> Self {
            Self {
                rtts: addresses
                    .iter()
                    .map(|&(octet, rtt)| (addr(octet), rtt))
                    .collect(),
            }
        }
    }

    impl Prober for ScriptedProber {
        fn probe(
            &self,
            address: Ipv4Addr,
        ) -> impl std::future::Future<Output = Result<ProbeReply, ProbeError>> + Send {
            let result = match self.rtts.get(&address) {
                Some(&rtt_ms) => Ok(ProbeReply { rtt_ms }),
                None => Err(ProbeError::TimedOut),
            };
            std::future::ready(result)
        }
    }

    /// Subscribe to all three topics, recording events in arrival order.
    fn record_events(bus: &EventBus) -> Arc<Mutex<Vec<SweepEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        for topic in [Topic::NewRoutine, Topic::PingDone, Topic::RoutineEnd] {
            let sink = events.clone();
            bus.subscribe(topic, move |event| {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            });
        }
        events
    }

    fn sweeper(
        store: Arc<MockStore>,
        prober: ScriptedProber,
        config: SweepConfig,
    ) -> Arc<Sweeper<Arc<MockStore>, ScriptedProber>> {
        Arc::new(Sweeper::new(store, prober, EventBus::new(), config))
    }

    /// Let spawned sweep tasks run without advancing the paused clock.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    // ── Single-tick behavior ───────────────────────────────────────

    #[tokio::test]
    async fn sweep_pings_every_device_with_measured_rtts() {
        let store = Arc::new(MockStore::default());
        for octet in [1, 2, 3] {
            store.add_device(octet);
        }
        let prober = ScriptedProber::reachable(&[(1, 10), (2, 20), (3, 30)]);
        let sweeper = sweeper(store.clone(), prober, SweepConfig::default());

        sweeper.tick().await.unwrap();

        let pings = store.pings();
        assert_eq!(pings.len(), 3);
        assert!(pings.iter().all(|p| !p.failed));
        assert_eq!(
            pings.iter().map(|p| p.rtt).collect::<Vec<_>>(),
            [Some(10), Some(20), Some(30)]
        );

        let routines = store.routines();
        assert_eq!(routines.len(), 1);
        let finished = routines[0].finished_timestamp.unwrap();
        assert!(finished >= routines[0].timestamp);
    }

    #[tokio::test]
    async fn probe_failure_becomes_failed_ping_and_sweep_continues() {
        let store = Arc::new(MockStore::default());
        store.add_device(1); // unreachable
        store.add_device(2);
        let prober = ScriptedProber::reachable(&[(2, 7)]);
        let sweeper = sweeper(store.clone(), prober, SweepConfig::default());
        let events = record_events(sweeper.bus());

        sweeper.tick().await.unwrap();

        let pings = store.pings();
        assert_eq!(pings.len(), 2);
        assert!(pings[0].failed);
        assert_eq!(pings[0].rtt, None);
        assert!(!pings[1].failed);
        assert_eq!(pings[1].rtt, Some(7));

        // routine_end still fires.
        let events = events.lock().unwrap();
        assert!(matches!(events.last(), Some(SweepEvent::RoutineEnd { .. })));
    }

    #[tokio::test]
    async fn zero_devices_skips_sweep_entirely() {
        let store = Arc::new(MockStore::default());
        let sweeper = sweeper(store.clone(), ScriptedProber::default(), SweepConfig::default());
        let events = record_events(sweeper.bus());

        sweeper.tick().await.unwrap();

        assert!(store.routines().is_empty());
        assert!(store.pings().is_empty());
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_devices_are_still_probed() {
        let store = Arc::new(MockStore::default());
        let device = store.add_device(1);
        store.devices.lock().unwrap()[0].disabled = true;
        let prober = ScriptedProber::reachable(&[(1, 4)]);
        let sweeper = sweeper(store.clone(), prober, SweepConfig::default());

        sweeper.tick().await.unwrap();

        let pings = store.pings();
        assert_eq!(pings.len(), 1);
        assert_eq!(pings[0].device_id, device.id);
    }

    #[tokio::test]
    async fn recovery_claims_stale_routines_but_not_this_ticks_own() {
        let store = Arc::new(MockStore::default());
        store.add_device(1);
        let abandoned = store.seed_routine(500, None);
        let completed = store.seed_routine(600, Some(650));
        let prober = ScriptedProber::reachable(&[(1, 5)]);
        let sweeper = sweeper(store.clone(), prober, SweepConfig::default());

        sweeper.tick().await.unwrap();

        let routines = store.routines();
        let stale = routines.iter().find(|r| r.id == abandoned).unwrap();
        assert_eq!(
            stale.finished_timestamp,
            Some(netpulse_state::ABANDONED_TIMESTAMP)
        );
        assert!(stale.is_finished());

        // A real completion time is never touched by recovery.
        let done = routines.iter().find(|r| r.id == completed).unwrap();
        assert_eq!(done.finished_timestamp, Some(650));

        // The tick's own routine got a real completion, not the sentinel.
        let own = routines.last().unwrap();
        assert!(own.finished_timestamp.unwrap() >= own.timestamp);
        assert!(own.finished_timestamp.unwrap() > 0);
    }

    #[tokio::test]
    async fn routine_insert_race_retries_in_place() {
        let store = Arc::new(MockStore::default());
        store.add_device(1);
        store.raced_inserts.store(1, Ordering::SeqCst);
        let prober = ScriptedProber::reachable(&[(1, 5)]);
        let sweeper = sweeper(store.clone(), prober, SweepConfig::default());
        let events = record_events(sweeper.bus());

        sweeper.tick().await.unwrap();

        // Exactly one routine, one new_routine event, one ping.
        assert_eq!(store.routines().len(), 1);
        assert_eq!(store.pings().len(), 1);
        let events = events.lock().unwrap();
        let announcements = events
            .iter()
            .filter(|e| matches!(e, SweepEvent::NewRoutine { .. }))
            .count();
        assert_eq!(announcements, 1);
    }

    #[tokio::test]
    async fn events_arrive_in_sweep_order() {
        let store = Arc::new(MockStore::default());
        store.add_device(1);
        store.add_device(2);
        let prober = ScriptedProber::reachable(&[(1, 1), (2, 2)]);
        let sweeper = sweeper(store.clone(), prober, SweepConfig::default());
        let events = record_events(sweeper.bus());

        sweeper.tick().await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], SweepEvent::NewRoutine { .. }));
        assert!(matches!(events[1], SweepEvent::PingDone(_)));
        assert!(matches!(events[2], SweepEvent::PingDone(_)));
        assert!(matches!(events[3], SweepEvent::RoutineEnd { .. }));

        // routine_end repeats the routine's creation timestamp.
        let (SweepEvent::NewRoutine { id, timestamp }, SweepEvent::RoutineEnd { id: end_id, timestamp: end_ts }) =
            (&events[0], &events[3])
        else {
            panic!("unexpected event shapes");
        };
        assert_eq!(id, end_id);
        assert_eq!(timestamp, end_ts);
    }

    #[tokio::test]
    async fn ping_done_carries_the_persisted_row() {
        let store = Arc::new(MockStore::default());
        let device = store.add_device(1);
        let prober = ScriptedProber::reachable(&[(1, 9)]);
        let sweeper = sweeper(store.clone(), prober, SweepConfig::default());
        let events = record_events(sweeper.bus());

        sweeper.tick().await.unwrap();

        let events = events.lock().unwrap();
        let SweepEvent::PingDone(ping) = &events[1] else {
            panic!("expected ping_done");
        };
        assert_eq!(ping.id, 1);
        assert_eq!(ping.device_id, device.id);
        assert_eq!(ping.rtt, Some(9));
    }

    #[tokio::test]
    async fn store_failure_aborts_sweep_and_leaves_routine_for_recovery() {
        let store = Arc::new(MockStore::default());
        store.add_device(1);
        store.add_device(2);
        *store.fail_fetch_at.lock().unwrap() = Some(1);
        let prober = ScriptedProber::reachable(&[(1, 5), (2, 5)]);
        let sweeper = sweeper(store.clone(), prober, SweepConfig::default());

        assert!(sweeper.tick().await.is_err());
        assert_eq!(store.pings().len(), 1);
        let aborted = store.routines()[0].clone();
        assert!(!aborted.is_finished());

        // The next tick's recovery pass claims the aborted routine.
        *store.fail_fetch_at.lock().unwrap() = None;
        sweeper.tick().await.unwrap();
        let recovered = store
            .routines()
            .iter()
            .find(|r| r.id == aborted.id)
            .cloned()
            .unwrap();
        assert_eq!(
            recovered.finished_timestamp,
            Some(netpulse_state::ABANDONED_TIMESTAMP)
        );
    }

    // ── Timer behavior ─────────────────────────────────────────────

    fn short_config() -> SweepConfig {
        SweepConfig {
            idle_interval: Duration::from_secs(60),
            ..SweepConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_triggers_an_immediate_tick() {
        let store = Arc::new(MockStore::default());
        store.add_device(1);
        let prober = ScriptedProber::reachable(&[(1, 5)]);
        let sweeper = sweeper(store.clone(), prober, short_config());

        sweeper.start();
        settle().await;

        assert_eq!(store.routines().len(), 1);
        sweeper.clear();
    }

    #[tokio::test(start_paused = true)]
    async fn next_tick_is_armed_after_the_idle_interval() {
        let store = Arc::new(MockStore::default());
        store.add_device(1);
        let prober = ScriptedProber::reachable(&[(1, 5)]);
        let sweeper = sweeper(store.clone(), prober, short_config());

        sweeper.start();
        settle().await;
        assert_eq!(store.routines().len(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(store.routines().len(), 2);
        sweeper.clear();
    }

    #[tokio::test(start_paused = true)]
    async fn gated_skip_still_rearms_the_timer() {
        let store = Arc::new(MockStore::default());
        let prober = ScriptedProber::reachable(&[(1, 5)]);
        let sweeper = sweeper(store.clone(), prober, short_config());

        sweeper.start();
        settle().await;
        assert!(store.routines().is_empty());

        // A device registered during the idle window is swept next tick.
        store.add_device(1);
        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(store.routines().len(), 1);
        sweeper.clear();
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_does_not_kill_the_loop() {
        let store = Arc::new(MockStore::default());
        store.add_device(1);
        *store.fail_fetch_at.lock().unwrap() = Some(0);
        let prober = ScriptedProber::reachable(&[(1, 5)]);
        let sweeper = sweeper(store.clone(), prober, short_config());

        sweeper.start();
        settle().await;
        assert!(store.pings().is_empty());

        *store.fail_fetch_at.lock().unwrap() = None;
        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(store.pings().len(), 1);
        sweeper.clear();
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cancels_the_pending_timer() {
        let store = Arc::new(MockStore::default());
        store.add_device(1);
        let prober = ScriptedProber::reachable(&[(1, 5)]);
        let sweeper = sweeper(store.clone(), prober, short_config());

        sweeper.start();
        settle().await;
        assert_eq!(store.routines().len(), 1);

        sweeper.clear();
        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(store.routines().len(), 1);

        // Idempotent.
        sweeper.clear();
    }

    #[tokio::test(start_paused = true)]
    async fn clear_during_a_sweep_lets_it_finish_but_cancels_the_rearm() {
        let store = Arc::new(MockStore::default());
        store.add_device(1);
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let prober = GatedProber { gate: gate.clone() };
        let sweeper = Arc::new(Sweeper::new(
            store.clone(),
            prober,
            EventBus::new(),
            short_config(),
        ));

        sweeper.start();
        settle().await;
        // The sweep is parked inside its first probe.
        assert_eq!(store.routines().len(), 1);
        assert!(store.pings().is_empty());

        sweeper.clear();
        gate.add_permits(1);
        settle().await;

        // The in-flight sweep ran to completion.
        assert_eq!(store.pings().len(), 1);
        assert!(store.routines()[0].is_finished());

        // The mid-sweep clear also cancelled its trailing re-arm.
        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(store.routines().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_the_pending_timer() {
        let store = Arc::new(MockStore::default());
        store.add_device(1);
        let prober = ScriptedProber::reachable(&[(1, 5)]);
        let sweeper = sweeper(store.clone(), prober, short_config());

        sweeper.start();
        settle().await;
        assert_eq!(store.routines().len(), 1);

        // Restarting ticks immediately and replaces the old timer.
        sweeper.start();
        settle().await;
        assert_eq!(store.routines().len(), 2);

        // Only one loop remains armed: one routine per interval.
        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(store.routines().len(), 3);
        sweeper.clear();
    }
}
