//! World module
//!
//! Drives replication for every online avatar:
//! - Replication tick loop at a fixed cadence
//! - Avatar login and logout
//! - Parallel per-avatar ticks, each avatar owned by one task at a time
//! - Flushing online avatars on shutdown

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{ReplicationError, Result};
use crate::game::persistence::AvatarRecord;
use crate::game::sync::replicator::{AvatarReplicator, ReplicationContext, TickReport};
use crate::game::Guid;

/// Default replication tick rate in milliseconds
pub const TICK_RATE_MS: u64 = 100;

/// World settings
#[derive(Debug, Clone)]
pub struct WorldSettings {
    /// World name
    pub name: String,
    /// Tick rate in milliseconds
    pub tick_rate_ms: u64,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            name: "Realmsync".to_string(),
            tick_rate_ms: TICK_RATE_MS,
        }
    }
}

impl WorldSettings {
    /// Set the world name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the tick rate
    pub fn with_tick_rate(mut self, tick_rate_ms: u64) -> Self {
        self.tick_rate_ms = tick_rate_ms;
        self
    }
}

/// World state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldState {
    /// World is initializing
    Initializing,
    /// World is running normally
    Running,
    /// World is flushing avatars before stopping
    ShuttingDown,
    /// World has stopped
    Stopped,
}

impl WorldState {
    /// Check if the world is accepting logins
    pub fn accepting_connections(&self) -> bool {
        matches!(self, WorldState::Initializing | WorldState::Running)
    }
}

/// Replication world - owns the tick loop and every online avatar
pub struct ReplicationWorld {
    /// World settings
    pub settings: WorldSettings,
    ctx: Arc<ReplicationContext>,
    avatars: DashMap<Guid, Arc<Mutex<AvatarReplicator>>>,
    /// Held by ticks and by every login or logout so their interest
    /// updates never interleave
    sync_gate: Mutex<()>,
    state: RwLock<WorldState>,
    tick: AtomicU64,
    running: AtomicBool,
    start_time: RwLock<Option<Instant>>,
}

impl ReplicationWorld {
    pub fn new(settings: WorldSettings, ctx: Arc<ReplicationContext>) -> Self {
        info!(
            name = %settings.name,
            tick_rate_ms = settings.tick_rate_ms,
            "Creating replication world"
        );

        Self {
            settings,
            ctx,
            avatars: DashMap::new(),
            sync_gate: Mutex::new(()),
            state: RwLock::new(WorldState::Initializing),
            tick: AtomicU64::new(0),
            running: AtomicBool::new(false),
            start_time: RwLock::new(None),
        }
    }

    pub fn context(&self) -> &Arc<ReplicationContext> {
        &self.ctx
    }

    /// Get the current world state
    pub fn state(&self) -> WorldState {
        *self.state.read()
    }

    /// Set the world state
    pub fn set_state(&self, new_state: WorldState) {
        let mut state = self.state.write();
        let old_state = *state;
        *state = new_state;
        info!(
            old_state = ?old_state,
            new_state = ?new_state,
            "World state changed"
        );
    }

    /// Get the current tick number
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    /// Check if the world is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .read()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn online_count(&self) -> usize {
        self.avatars.len()
    }

    pub fn is_online(&self, guid: Guid) -> bool {
        self.avatars.contains_key(&guid)
    }

    /// Bring an avatar online
    ///
    /// Opens its outbound session and activates replication. Returns the
    /// receiving end of the session for the transport to drain.
    pub fn login(&self, record: AvatarRecord) -> Result<mpsc::Receiver<Bytes>> {
        let guid = record.guid;
        let _gate = self.sync_gate.lock();
        if !self.state().accepting_connections() || self.is_online(guid) {
            return Err(ReplicationError::InvalidState {
                from: if self.is_online(guid) { "Active" } else { "Offline" },
                operation: "login",
            }
            .into());
        }

        let outbound_rx = self.ctx.sessions.open(guid);
        let mut replicator = match AvatarReplicator::new(record, Arc::clone(&self.ctx)) {
            Ok(replicator) => replicator,
            Err(e) => {
                self.ctx.sessions.unregister(guid);
                return Err(e);
            }
        };
        if let Err(e) = replicator.activate() {
            self.ctx.sessions.unregister(guid);
            return Err(e);
        }

        self.avatars.insert(guid, Arc::new(Mutex::new(replicator)));
        info!(guid = guid, online = self.online_count(), "Avatar logged in");
        Ok(outbound_rx)
    }

    /// Take an avatar offline, returning its flushed record
    pub fn logout(&self, guid: Guid) -> Result<Option<AvatarRecord>> {
        let _gate = self.sync_gate.lock();
        let Some((_, avatar)) = self.avatars.remove(&guid) else {
            return Ok(None);
        };
        let record = avatar.lock().deactivate()?;
        info!(guid = guid, online = self.online_count(), "Avatar logged out");
        Ok(Some(record))
    }

    /// Run a closure against one online avatar
    pub fn with_avatar<R>(&self, guid: Guid, f: impl FnOnce(&mut AvatarReplicator) -> R) -> Option<R> {
        let _gate = self.sync_gate.lock();
        let avatar = self.avatars.get(&guid).map(|r| Arc::clone(r.value()))?;
        let mut guard = avatar.lock();
        Some(f(&mut guard))
    }

    /// Run one replication cycle for every avatar
    pub fn process_tick(&self) -> TickReport {
        let _gate = self.sync_gate.lock();
        let tick_num = self.tick.fetch_add(1, Ordering::SeqCst);

        let avatars: Vec<_> = self
            .avatars
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let report = avatars
            .par_iter()
            .map(|avatar| {
                let mut replicator = avatar.lock();
                match replicator.tick() {
                    Ok(report) => report,
                    Err(e) => {
                        error!(guid = replicator.guid(), error = %e, "Error processing replication tick");
                        TickReport::default()
                    }
                }
            })
            .reduce(TickReport::default, |a, b| TickReport {
                partial: a.partial + b.partial,
                full: a.full + b.full,
                destroyed: a.destroyed + b.destroyed,
                failed: a.failed + b.failed,
            });

        if tick_num % 1000 == 0 {
            debug!(
                tick = tick_num,
                avatars = avatars.len(),
                sent = report.sent(),
                "Replication tick milestone"
            );
        }
        if report.failed > 0 {
            warn!(tick = tick_num, failed = report.failed, "Deliveries failed this tick");
        }

        report
    }

    /// Run the replication tick loop until shutdown
    pub async fn run(&self, shutdown_rx: &mut broadcast::Receiver<()>) {
        info!(
            name = %self.settings.name,
            tick_rate_ms = self.settings.tick_rate_ms,
            "Starting replication world"
        );

        self.running.store(true, Ordering::SeqCst);
        *self.start_time.write() = Some(Instant::now());
        self.set_state(WorldState::Running);

        let mut tick_interval = interval(Duration::from_millis(self.settings.tick_rate_ms));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    if !self.is_running() {
                        break;
                    }
                    self.process_tick();
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.set_state(WorldState::ShuttingDown);
        self.logout_all();

        self.running.store(false, Ordering::SeqCst);
        self.set_state(WorldState::Stopped);

        info!(
            total_ticks = self.tick(),
            uptime_secs = self.uptime_secs(),
            "Replication world stopped"
        );
    }

    /// Stop the loop at its next tick
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Flush every online avatar
    pub fn logout_all(&self) -> usize {
        let guids: Vec<Guid> = self.avatars.iter().map(|entry| *entry.key()).collect();
        if guids.is_empty() {
            return 0;
        }

        info!(avatars = guids.len(), "Flushing online avatars");
        let mut saved = 0;
        for guid in guids {
            match self.logout(guid) {
                Ok(Some(_)) => saved += 1,
                Ok(None) => {}
                Err(e) => error!(guid = guid, error = %e, "Failed to flush avatar"),
            }
        }
        saved
    }

    /// Get world info as a string
    pub fn info(&self) -> String {
        format!(
            "World {} - {} avatars - Tick {} - Uptime {}s",
            self.settings.name,
            self.online_count(),
            self.tick(),
            self.uptime_secs()
        )
    }
}

impl std::fmt::Debug for ReplicationWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationWorld")
            .field("settings", &self.settings)
            .field("state", &self.state())
            .field("tick", &self.tick())
            .field("running", &self.is_running())
            .field("online", &self.online_count())
            .field("uptime_secs", &self.uptime_secs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::grid::CellGrid;
    use crate::game::metadata::RaceTable;
    use crate::game::persistence::MemoryAvatarStore;
    use crate::game::sync::baseline::BaselineCache;
    use crate::game::sync::interest::InterestResolver;
    use crate::game::update::compression::Compressor;
    use crate::net::session::SessionRegistry;

    fn world() -> (ReplicationWorld, Arc<MemoryAvatarStore>) {
        let store = Arc::new(MemoryAvatarStore::new());
        let ctx = ReplicationContext {
            resolver: Arc::new(InterestResolver::new(Arc::new(CellGrid::new(50.0)), 1)),
            sessions: Arc::new(SessionRegistry::new(64)),
            baselines: Arc::new(BaselineCache::new()),
            metadata: Arc::new(RaceTable::builtin()),
            store: store.clone(),
            compressor: Compressor::default(),
            continent_maps: vec![0, 1],
        };
        let settings = WorldSettings::default().with_tick_rate(10);
        (ReplicationWorld::new(settings, Arc::new(ctx)), store)
    }

    fn record(guid: Guid) -> AvatarRecord {
        AvatarRecord::new(guid, "Tester", 2, 1, 1)
    }

    #[test]
    fn test_world_settings_builder() {
        let settings = WorldSettings::default()
            .with_name("Test World")
            .with_tick_rate(50);
        assert_eq!(settings.name, "Test World");
        assert_eq!(settings.tick_rate_ms, 50);
    }

    #[test]
    fn test_world_state() {
        let (world, _) = world();
        assert_eq!(world.state(), WorldState::Initializing);
        assert!(world.state().accepting_connections());

        world.set_state(WorldState::ShuttingDown);
        assert!(!world.state().accepting_connections());
        assert!(world.login(record(1)).is_err());
    }

    #[test]
    fn test_login_and_logout() {
        let (world, store) = world();
        let mut rx = world.login(record(1)).unwrap();
        assert!(rx.try_recv().is_ok());
        assert!(world.is_online(1));
        assert!(world.login(record(1)).is_err());

        let flushed = world.logout(1).unwrap().unwrap();
        assert_eq!(flushed.guid, 1);
        assert!(store.get(1).is_some());
        assert!(world.logout(1).unwrap().is_none());
        assert_eq!(world.online_count(), 0);
    }

    #[test]
    fn test_failed_activation_closes_session() {
        let (world, _) = world();
        let mut bad = record(9);
        bad.race = 42;
        assert!(world.login(bad).is_err());
        assert!(!world.context().sessions.contains(9));
        assert!(!world.is_online(9));
    }

    #[test]
    fn test_process_tick_sends_partials() {
        let (world, _) = world();
        let _rx1 = world.login(record(1)).unwrap();
        let _rx2 = world.login(record(2)).unwrap();

        // interest settles on the first tick
        world.process_tick();

        world
            .with_avatar(1, |avatar| avatar.set_health(5))
            .unwrap()
            .unwrap();
        let report = world.process_tick();
        assert_eq!(report.partial, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(world.tick(), 2);
    }

    #[test]
    fn test_login_during_ticks_sees_latest_state() {
        use crate::game::update::compression::decompress;
        use crate::game::update::encoder::{decode, UpdateKind};
        use crate::game::update::fields::unit_fields;
        use crate::protocol::packets::Packet;
        use std::collections::BTreeMap;

        let (world, _) = world();
        let world = Arc::new(world);
        let _rx1 = world.login(record(1)).unwrap();

        let mut rx2 = std::thread::scope(|scope| {
            let ticker = Arc::clone(&world);
            scope.spawn(move || {
                for health in 1..=40u32 {
                    ticker
                        .with_avatar(1, |avatar| avatar.set_health(health))
                        .unwrap()
                        .unwrap();
                    ticker.process_tick();
                }
            });

            std::thread::sleep(Duration::from_millis(1));
            world.login(record(2)).unwrap()
        });
        world.process_tick();

        // rebuild avatar 1 as the second client sees it
        let mut view = BTreeMap::new();
        while let Ok(frame) = rx2.try_recv() {
            let packet = Packet::from_frame(&frame).unwrap();
            let update = decode(&decompress(packet.payload()).unwrap()).unwrap();
            if update.guid != 1 {
                continue;
            }
            if update.kind == UpdateKind::Full {
                view.clear();
            }
            view.extend(update.values);
        }

        let health = world
            .with_avatar(1, |avatar| avatar.fields().get(unit_fields::HEALTH))
            .unwrap();
        assert_eq!(view.get(&unit_fields::HEALTH).copied(), health);
    }

    #[tokio::test]
    async fn test_run_until_shutdown_flushes() {
        let (world, store) = world();
        let world = Arc::new(world);
        let _rx = world.login(record(1)).unwrap();

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let runner = Arc::clone(&world);
        let handle = tokio::spawn(async move { runner.run(&mut shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(world.state(), WorldState::Stopped);
        assert!(world.tick() > 0);
        assert_eq!(world.online_count(), 0);
        assert!(store.get(1).is_some());
    }

    #[test]
    fn test_world_info() {
        let (world, _) = world();
        assert!(world.info().contains("Realmsync"));
    }
}
