use std::sync::Arc;

use tracing::info;

pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod migration;
pub mod profile;
pub mod progress;
pub mod reconcile;
pub mod resume;
pub mod scene_state;
pub mod storage;
pub mod timers;

pub use catalog::{CatalogError, CatalogErrorCode, SceneRef, SourceLocation, Zone, ZoneCatalog};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    resolve_store_dir, EngineConfig, DEFAULT_SAVE_DEBOUNCE, SAVE_DEBOUNCE_ENV_VAR,
    STORE_DIR_ENV_VAR,
};
pub use error::{Anomaly, ConfigError, OpenError, ParseError, StoreError};
pub use keys::SceneAddress;
pub use migration::{MigrationReport, CURRENT_SCHEMA_VERSION};
pub use profile::{Profile, ProfileStore};
pub use progress::{ProgressAggregator, SceneCompletion, SceneProgress, SceneStatus, ZoneProgress};
pub use reconcile::{
    MountKind, RehydrateFn, RehydrationTable, ReloadReconciler, SceneDefinition, SceneSession,
};
pub use resume::{ResumePointer, ResumeTracker};
pub use scene_state::{OneShotFlags, ScenePhase, SceneSessionState, SceneStateStore, SessionMarker};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageHandle};
pub use timers::{SceneTimers, TimerId};

/// Every persistence component, built once over one storage handle. Hosts
/// construct one engine and pass it (or the component they need) by
/// reference; nothing here is process-global.
#[derive(Debug, Clone)]
pub struct ProgressEngine {
    storage: StorageHandle,
    catalog: Arc<ZoneCatalog>,
    config: EngineConfig,
    clock: SharedClock,
    profiles: ProfileStore,
    progress: ProgressAggregator,
    resume: ResumeTracker,
    reconciler: ReloadReconciler,
    migration: MigrationReport,
}

impl ProgressEngine {
    /// Wires the components and runs the schema migration once.
    pub fn open(
        store: impl KeyValueStore + 'static,
        catalog: ZoneCatalog,
        config: EngineConfig,
        clock: SharedClock,
    ) -> Self {
        let storage = StorageHandle::new(store);
        let catalog = Arc::new(catalog);
        let profiles = ProfileStore::new(storage.clone(), clock.clone());
        let migration = migration::migrate(&storage, &profiles);
        let progress = ProgressAggregator::new(
            storage.clone(),
            Arc::clone(&catalog),
            profiles.clone(),
            clock.clone(),
        );
        let resume = ResumeTracker::new(storage.clone(), profiles.clone());
        let reconciler =
            ReloadReconciler::new(storage.clone(), clock.clone(), config.save_debounce);

        info!(
            zones = catalog.zones().len(),
            save_debounce_ms = config.save_debounce.as_millis() as u64,
            schema_version = migration.to_version,
            "progress_engine_opened"
        );

        Self {
            storage,
            catalog,
            config,
            clock,
            profiles,
            progress,
            resume,
            reconciler,
            migration,
        }
    }

    /// Opens a [`FileStore`] in the configured store directory.
    pub fn open_file_backed(
        catalog: ZoneCatalog,
        config: EngineConfig,
        clock: SharedClock,
    ) -> Result<Self, OpenError> {
        let dir = resolve_store_dir(&config)?;
        let store = FileStore::open(&dir).map_err(OpenError::Store)?;
        info!(store_dir = %store.root().display(), "file_store_opened");
        Ok(Self::open(store, catalog, config, clock))
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn progress(&self) -> &ProgressAggregator {
        &self.progress
    }

    pub fn resume(&self) -> &ResumeTracker {
        &self.resume
    }

    pub fn reconciler(&self) -> &ReloadReconciler {
        &self.reconciler
    }

    pub fn catalog(&self) -> &ZoneCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration
    }

    /// A standalone snapshot store sharing the engine's storage, for callers
    /// that only need `has_progress` or `load` outside a mounted scene.
    pub fn scene_state_store(&self) -> SceneStateStore {
        SceneStateStore::new(
            self.storage.clone(),
            self.clock.clone(),
            self.config.save_debounce,
        )
    }

    /// Address of `zone_id/scene_id` for the active profile.
    pub fn active_scene_address(&self, zone_id: &str, scene_id: &str) -> Option<SceneAddress> {
        let profile_id = self.profiles.active_profile_id()?;
        Some(SceneAddress::new(profile_id, zone_id, scene_id))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    use super::*;

    fn ganesha_catalog() -> ZoneCatalog {
        ZoneCatalog::new(vec![
            Zone::new("ganesha", &["modak", "pond", "festival"], 0),
            Zone::new("hanuman", &["leap", "mountain"], 6),
        ])
        .expect("catalog")
    }

    fn open_memory_engine() -> (ProgressEngine, MemoryStore, ManualClock) {
        let backing = MemoryStore::new();
        let clock = ManualClock::starting_at(1_700_000_000_000);
        let engine = ProgressEngine::open(
            backing.clone(),
            ganesha_catalog(),
            EngineConfig::default(),
            clock.shared(),
        );
        (engine, backing, clock)
    }

    #[test]
    fn completing_modak_unlocks_pond_and_replays_only_add() {
        let (engine, _, _) = open_memory_engine();
        let p1 = engine.profiles().create_profile("P1", "mouse");
        assert!(engine.profiles().set_active_profile(&p1));

        engine.progress().update_scene_completion(
            &p1,
            "ganesha",
            "modak",
            &SceneCompletion::completed_with_stars(3).with_symbols(["mooshika"]),
        );
        let zone = engine.progress().calculate_zone_progress(&p1, "ganesha");
        assert_eq!(zone.completed_scenes, 1);
        assert_eq!(zone.total_stars, 3);
        assert!(zone.scene("pond").expect("pond").unlocked);
        assert!(!zone.scene("festival").expect("festival").unlocked);

        engine.progress().update_scene_completion(
            &p1,
            "ganesha",
            "modak",
            &SceneCompletion::completed_with_stars(2).with_symbols(["laddu"]),
        );
        let modak = engine
            .progress()
            .scene_progress(&p1, "ganesha", "modak")
            .expect("modak");
        assert_eq!(modak.stars, 3);
        assert!(modak.symbols.contains("mooshika"));
        assert!(modak.symbols.contains("laddu"));

        let profile = engine.profiles().get_active_profile().expect("active");
        assert_eq!(profile.total_stars, 3);
        assert_eq!(profile.completed_scenes, 1);
    }

    #[test]
    fn resume_pointer_round_trips_through_engine() {
        let (engine, _, _) = open_memory_engine();
        let p1 = engine.profiles().create_profile("P1", "mouse");
        engine.profiles().set_active_profile(&p1);

        engine.resume().set_current_scene("ganesha", "pond");
        assert_eq!(
            engine.resume().should_resume_scene(),
            Some(ResumePointer {
                zone_id: "ganesha".to_string(),
                scene_id: "pond".to_string(),
            })
        );
        engine.resume().clear_current_scene();
        assert_eq!(engine.resume().should_resume_scene(), None);
    }

    #[test]
    fn opening_fresh_store_stamps_schema_version() {
        let (engine, backing, _) = open_memory_engine();
        assert_eq!(engine.migration_report().to_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(backing.raw(keys::SCHEMA_VERSION_KEY).as_deref(), Some("2"));
    }

    #[test]
    fn opening_legacy_store_adopts_progress_into_player_profile() {
        let backing = MemoryStore::new();
        backing.insert_raw(
            "gameProgress",
            r#"{"zones":{"ganesha":{"scenes":{"modak":{"sceneId":"modak","completed":true,"stars":1}}}}}"#,
        );
        let engine = ProgressEngine::open(
            backing.clone(),
            ganesha_catalog(),
            EngineConfig::default(),
            ManualClock::starting_at(0).shared(),
        );

        let active = engine.profiles().get_active_profile().expect("player profile");
        let zone = engine.progress().calculate_zone_progress(&active.id, "ganesha");
        assert_eq!(zone.completed_scenes, 1);
        assert!(zone.scene("pond").expect("pond").unlocked);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "phase", rename_all = "snake_case")]
    enum PondPhase {
        Initial,
        Catching { fish: u32 },
    }

    impl ScenePhase for PondPhase {
        fn tag(&self) -> &'static str {
            match self {
                Self::Initial => "initial",
                Self::Catching { .. } => "catching",
            }
        }
    }

    struct PondScene;

    impl SceneDefinition for PondScene {
        type Phase = PondPhase;
        type Continuation = ();

        fn initial_state(&self) -> SceneSessionState<PondPhase> {
            SceneSessionState::new(PondPhase::Initial)
        }

        fn rehydration_table(&self) -> RehydrationTable<PondPhase, ()> {
            RehydrationTable::new()
        }
    }

    #[test]
    fn file_backed_session_survives_engine_restart() {
        let temp = TempDir::new().expect("temp");
        let config = EngineConfig {
            save_debounce: Duration::from_millis(100),
            store_dir: Some(temp.path().join("saves")),
        };
        let clock = ManualClock::starting_at(0);

        let first =
            ProgressEngine::open_file_backed(ganesha_catalog(), config.clone(), clock.shared())
                .expect("open");
        let p1 = first.profiles().create_profile("P1", "mouse");
        first.profiles().set_active_profile(&p1);
        let address = first.active_scene_address("ganesha", "pond").expect("address");
        first.resume().set_current_scene("ganesha", "pond");
        let mut session = first.reconciler().mount(address.clone(), &PondScene);
        session.update_with(|state| state.phase = PondPhase::Catching { fish: 4 });
        drop(session);
        drop(first);

        let second = ProgressEngine::open_file_backed(ganesha_catalog(), config, clock.shared())
            .expect("reopen");
        assert!(!second.migration_report().migrated());
        assert!(second.resume().is_current_scene("ganesha", "pond"));
        assert!(second.scene_state_store().has_progress(&address));
        let session = second.reconciler().mount(address, &PondScene);
        assert!(session.is_reload());
        assert_eq!(session.state().phase, PondPhase::Catching { fish: 4 });
    }
}
