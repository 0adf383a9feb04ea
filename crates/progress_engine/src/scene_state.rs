use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::error::Anomaly;
use crate::keys::{self, SceneAddress};
use crate::storage::json::{encode_json, parse_json, read_json, ReadState};
use crate::storage::StorageHandle;

/// A scene's phase machine, as a tagged union. Each variant carries exactly
/// the payload that phase needs to be rebuilt after a reload.
pub trait ScenePhase: Serialize + DeserializeOwned + Clone + fmt::Debug {
    /// Stable name of the variant, used to pick a rehydration entry.
    fn tag(&self) -> &'static str;
}

/// One-shot flags consumed exactly once by whoever acts on them. They live in
/// the snapshot so that a reload sees a flag the live path already consumed
/// as cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneShotFlags {
    #[serde(default)]
    pub mission_just_completed: bool,
    #[serde(default)]
    pub phase_just_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneSessionState<P> {
    pub phase: P,
    #[serde(default)]
    pub showing_completion_screen: bool,
    #[serde(default)]
    pub sub_component_states: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub one_shot: OneShotFlags,
}

impl<P> SceneSessionState<P> {
    pub fn new(phase: P) -> Self {
        Self {
            phase,
            showing_completion_screen: false,
            sub_component_states: BTreeMap::new(),
            one_shot: OneShotFlags::default(),
        }
    }
}

/// Lightweight mirror of a snapshot, kept under its own key so "has
/// progress" checks never parse the full payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMarker {
    pub phase: String,
    pub showing_completion_screen: bool,
    pub saved_at_ms: u64,
}

#[derive(Debug, Clone)]
struct PendingSave {
    address: SceneAddress,
    state_json: String,
    marker_json: String,
    last_call_ms: u64,
}

/// Persists one opaque snapshot per scene. Payload fields are never
/// inspected; only round-trip serialization happens here.
///
/// Saves are coalesced: a save arriving within the debounce window of the
/// previous save for the same scene replaces the pending payload and re-arms
/// the window. `poll` writes every entry whose window elapsed, `flush` writes
/// everything, and dropping the store flushes.
#[derive(Debug)]
pub struct SceneStateStore {
    storage: StorageHandle,
    clock: SharedClock,
    debounce_window: Duration,
    pending: BTreeMap<String, PendingSave>,
}

impl SceneStateStore {
    pub fn new(storage: StorageHandle, clock: SharedClock, debounce_window: Duration) -> Self {
        Self {
            storage,
            clock,
            debounce_window,
            pending: BTreeMap::new(),
        }
    }

    pub fn save<P: ScenePhase>(&mut self, address: &SceneAddress, state: &SceneSessionState<P>) {
        let state_key = keys::scene_state(address);
        let now_ms = self.clock.now_ms();

        if self
            .pending
            .get(&state_key)
            .is_some_and(|pending| self.window_elapsed(pending, now_ms))
        {
            self.write_pending(&state_key);
        }

        let Some(state_json) = encode_json(&state_key, state) else {
            return;
        };
        let marker = SessionMarker {
            phase: state.phase.tag().to_string(),
            showing_completion_screen: state.showing_completion_screen,
            saved_at_ms: now_ms,
        };
        let Some(marker_json) = encode_json(&keys::session_marker(address), &marker) else {
            return;
        };

        let coalesced = self
            .pending
            .insert(
                state_key.clone(),
                PendingSave {
                    address: address.clone(),
                    state_json,
                    marker_json,
                    last_call_ms: now_ms,
                },
            )
            .is_some();
        if coalesced {
            debug!(scene = %address, phase = state.phase.tag(), "scene_state_save_coalesced");
        }

        if self.debounce_window.is_zero() {
            self.write_pending(&state_key);
        }
    }

    /// Returns the latest snapshot, pending or durable. Malformed data is
    /// logged and reported as absent.
    pub fn load<P: ScenePhase>(&self, address: &SceneAddress) -> Option<SceneSessionState<P>> {
        let state_key = keys::scene_state(address);
        let read = match self.pending.get(&state_key) {
            Some(pending) => match parse_json(&state_key, &pending.state_json) {
                Ok(state) => ReadState::Present(state),
                Err(error) => ReadState::Unreadable(error),
            },
            None => read_json::<SceneSessionState<P>>(&self.storage, &state_key),
        };
        read.into_present()
    }

    pub fn load_marker(&self, address: &SceneAddress) -> Option<SessionMarker> {
        let state_key = keys::scene_state(address);
        if let Some(pending) = self.pending.get(&state_key) {
            return parse_json(&keys::session_marker(address), &pending.marker_json).ok();
        }
        read_json::<SessionMarker>(&self.storage, &keys::session_marker(address)).into_present()
    }

    /// Cheap check backed only by the marker key or a pending save.
    pub fn has_progress(&self, address: &SceneAddress) -> bool {
        self.pending.contains_key(&keys::scene_state(address))
            || self.storage.contains(&keys::session_marker(address))
    }

    /// Drops any pending save and removes both the durable and marker keys.
    pub fn clear(&mut self, address: &SceneAddress) {
        let state_key = keys::scene_state(address);
        self.pending.remove(&state_key);
        self.storage.remove(&state_key);
        self.storage.remove(&keys::session_marker(address));
        info!(scene = %address, "scene_state_cleared");
    }

    /// Writes every pending save whose debounce window has elapsed. Returns
    /// the number of writes performed.
    pub fn poll(&mut self) -> usize {
        let now_ms = self.clock.now_ms();
        let due = self
            .pending
            .iter()
            .filter(|(_, pending)| self.window_elapsed(pending, now_ms))
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        for key in &due {
            self.write_pending(key);
        }
        due.len()
    }

    /// Writes every pending save immediately.
    pub fn flush(&mut self) -> usize {
        let keys = self.pending.keys().cloned().collect::<Vec<_>>();
        for key in &keys {
            self.write_pending(key);
        }
        keys.len()
    }

    pub fn has_pending(&self, address: &SceneAddress) -> bool {
        self.pending.contains_key(&keys::scene_state(address))
    }

    fn window_elapsed(&self, pending: &PendingSave, now_ms: u64) -> bool {
        let window_ms = self.debounce_window.as_millis() as u64;
        now_ms >= pending.last_call_ms.saturating_add(window_ms)
    }

    fn write_pending(&mut self, state_key: &str) {
        let Some(pending) = self.pending.remove(state_key) else {
            return;
        };
        if !self.storage.set(state_key, &pending.state_json) {
            // The marker must keep describing the last snapshot that landed.
            warn!(
                scene = %pending.address,
                anomaly = %Anomaly::WriteFailed,
                "scene_state_save_dropped"
            );
            return;
        }
        let wrote_marker = self
            .storage
            .set(&keys::session_marker(&pending.address), &pending.marker_json);
        debug!(scene = %pending.address, wrote_marker, "scene_state_flushed");
    }
}

impl Drop for SceneStateStore {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "phase", rename_all = "snake_case")]
    enum TestPhase {
        Initial,
        Active { step: u32 },
    }

    impl ScenePhase for TestPhase {
        fn tag(&self) -> &'static str {
            match self {
                Self::Initial => "initial",
                Self::Active { .. } => "active",
            }
        }
    }

    struct Fixture {
        backing: MemoryStore,
        clock: ManualClock,
        store: SceneStateStore,
        address: SceneAddress,
    }

    fn fixture() -> Fixture {
        let backing = MemoryStore::new();
        let clock = ManualClock::starting_at(10_000);
        let store = SceneStateStore::new(
            StorageHandle::new(backing.clone()),
            clock.shared(),
            Duration::from_millis(100),
        );
        Fixture {
            backing,
            clock,
            store,
            address: SceneAddress::new("P1", "ganesha", "modak"),
        }
    }

    fn active(step: u32) -> SceneSessionState<TestPhase> {
        SceneSessionState::new(TestPhase::Active { step })
    }

    #[test]
    fn two_saves_inside_window_produce_one_write_with_second_payload() {
        let mut fx = fixture();
        let state_key = keys::scene_state(&fx.address);

        fx.store.save(&fx.address, &active(1));
        fx.clock.advance(Duration::from_millis(40));
        fx.store.save(&fx.address, &active(2));

        fx.clock.advance(Duration::from_millis(99));
        assert_eq!(fx.store.poll(), 0);
        assert_eq!(fx.backing.write_count(&state_key), 0);

        fx.clock.advance(Duration::from_millis(1));
        assert_eq!(fx.store.poll(), 1);
        assert_eq!(fx.backing.write_count(&state_key), 1);

        let stored: serde_json::Value =
            serde_json::from_str(&fx.backing.raw(&state_key).expect("stored")).expect("json");
        assert_eq!(stored["phase"], json!({"phase": "active", "step": 2}));
    }

    #[test]
    fn save_after_unpolled_window_writes_stale_payload_first() {
        let mut fx = fixture();
        let state_key = keys::scene_state(&fx.address);

        fx.store.save(&fx.address, &active(1));
        fx.clock.advance(Duration::from_millis(150));
        fx.store.save(&fx.address, &active(2));

        assert_eq!(fx.backing.write_count(&state_key), 1);
        fx.store.flush();
        assert_eq!(fx.backing.write_count(&state_key), 2);
        let loaded = fx.store.load::<TestPhase>(&fx.address).expect("state");
        assert_eq!(loaded.phase, TestPhase::Active { step: 2 });
    }

    #[test]
    fn load_sees_pending_payload_before_it_is_written() {
        let mut fx = fixture();
        fx.store.save(&fx.address, &active(7));

        assert!(fx.store.has_pending(&fx.address));
        assert!(fx.store.has_progress(&fx.address));
        let loaded = fx.store.load::<TestPhase>(&fx.address).expect("pending");
        assert_eq!(loaded.phase, TestPhase::Active { step: 7 });
    }

    #[test]
    fn dropping_store_flushes_pending_save() {
        let fx = fixture();
        let Fixture {
            backing,
            mut store,
            address,
            ..
        } = fx;
        store.save(&address, &active(3));
        drop(store);

        assert!(backing.raw(&keys::scene_state(&address)).is_some());
        let marker: SessionMarker = serde_json::from_str(
            &backing.raw(&keys::session_marker(&address)).expect("marker"),
        )
        .expect("marker json");
        assert_eq!(marker.phase, "active");
        assert_eq!(marker.saved_at_ms, 10_000);
    }

    #[test]
    fn zero_window_writes_immediately() {
        let backing = MemoryStore::new();
        let clock = ManualClock::starting_at(0);
        let mut store =
            SceneStateStore::new(StorageHandle::new(backing.clone()), clock.shared(), Duration::ZERO);
        let address = SceneAddress::new("P1", "z", "s");

        store.save(&address, &active(1));
        store.save(&address, &active(2));

        assert_eq!(backing.write_count(&keys::scene_state(&address)), 2);
        assert!(!store.has_pending(&address));
    }

    #[test]
    fn malformed_snapshot_loads_as_none() {
        let fx = fixture();
        fx.backing
            .insert_raw(&keys::scene_state(&fx.address), r#"{"phase": {"phase": "exploded"}}"#);
        assert!(fx.store.load::<TestPhase>(&fx.address).is_none());

        fx.backing
            .insert_raw(&keys::scene_state(&fx.address), "not json at all");
        assert!(fx.store.load::<TestPhase>(&fx.address).is_none());
    }

    #[test]
    fn clear_removes_durable_marker_and_pending() {
        let mut fx = fixture();
        fx.store.save(&fx.address, &SceneSessionState::new(TestPhase::Initial));
        fx.store.flush();
        fx.store.save(&fx.address, &active(1));

        fx.store.clear(&fx.address);

        assert!(!fx.store.has_progress(&fx.address));
        assert_eq!(fx.backing.raw(&keys::scene_state(&fx.address)), None);
        assert_eq!(fx.backing.raw(&keys::session_marker(&fx.address)), None);
        assert!(fx.store.load::<TestPhase>(&fx.address).is_none());
    }

    #[test]
    fn rejected_snapshot_leaves_marker_on_last_written_state() {
        let backing = MemoryStore::with_quota_bytes(600);
        let clock = ManualClock::starting_at(0);
        let mut store =
            SceneStateStore::new(StorageHandle::new(backing.clone()), clock.shared(), Duration::ZERO);
        let address = SceneAddress::new("P1", "z", "s");
        store.save(&address, &active(1));
        assert!(backing.raw(&keys::session_marker(&address)).is_some());

        let mut oversized = SceneSessionState::new(TestPhase::Initial);
        oversized
            .sub_component_states
            .insert("tray".to_string(), json!("x".repeat(1_000)));
        clock.advance(Duration::from_millis(5));
        store.save(&address, &oversized);

        let marker = store.load_marker(&address).expect("marker");
        assert_eq!(marker.phase, "active");
        assert_eq!(marker.saved_at_ms, 0);
        assert!(store.has_progress(&address));
        let loaded = store.load::<TestPhase>(&address).expect("last written state");
        assert_eq!(loaded.phase, TestPhase::Active { step: 1 });
    }

    #[test]
    fn sub_component_states_round_trip_untouched() {
        let mut fx = fixture();
        let mut state = active(4);
        state
            .sub_component_states
            .insert("tray".to_string(), json!({"slots": [null, "laddoo"]}));
        state.showing_completion_screen = true;
        fx.store.save(&fx.address, &state);
        fx.store.flush();

        let loaded = fx.store.load::<TestPhase>(&fx.address).expect("state");
        assert_eq!(loaded, state);
        let marker = fx.store.load_marker(&fx.address).expect("marker");
        assert!(marker.showing_completion_screen);
    }
}
