use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::keys::{self, SceneAddress};
use crate::scene_state::{ScenePhase, SceneSessionState, SceneStateStore};
use crate::storage::StorageHandle;
use crate::timers::{SceneTimers, TimerId};

const PLAY_AGAIN_VALUE: &str = "true";

pub type RehydrateFn<P, C> = fn(&mut SceneSessionState<P>, &mut SceneTimers<C>);

/// Maps a phase tag to the function that rebuilds in-memory side state
/// (pending timers, mostly) for a snapshot persisted in that phase.
pub struct RehydrationTable<P, C> {
    entries: HashMap<&'static str, RehydrateFn<P, C>>,
}

impl<P, C> RehydrationTable<P, C> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn on(mut self, tag: &'static str, rehydrate: RehydrateFn<P, C>) -> Self {
        self.entries.insert(tag, rehydrate);
        self
    }

    pub fn get(&self, tag: &str) -> Option<RehydrateFn<P, C>> {
        self.entries.get(tag).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P, C> Default for RehydrationTable<P, C> {
    fn default() -> Self {
        Self::new()
    }
}

/// What a consuming scene hands the engine: a pure initial state and the
/// per-phase rehydration table. Phases without an entry are restored as-is.
pub trait SceneDefinition {
    type Phase: ScenePhase;
    type Continuation;

    fn initial_state(&self) -> SceneSessionState<Self::Phase>;

    fn rehydration_table(&self) -> RehydrationTable<Self::Phase, Self::Continuation>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    /// No usable snapshot; the scene starts at its initial phase.
    Fresh,
    /// A snapshot was restored and its phase rehydrated.
    Reload,
    /// A play-again sentinel was consumed; prior state was discarded.
    ForcedReset,
}

#[derive(Debug, Clone)]
pub struct ReloadReconciler {
    storage: StorageHandle,
    clock: SharedClock,
    save_debounce: Duration,
}

impl ReloadReconciler {
    pub fn new(storage: StorageHandle, clock: SharedClock, save_debounce: Duration) -> Self {
        Self {
            storage,
            clock,
            save_debounce,
        }
    }

    pub fn mount<D: SceneDefinition>(
        &self,
        address: SceneAddress,
        scene: &D,
    ) -> SceneSession<D::Phase, D::Continuation> {
        let mut store =
            SceneStateStore::new(self.storage.clone(), self.clock.clone(), self.save_debounce);
        let mut timers = SceneTimers::new(self.clock.clone());

        if self.consume_play_again(&address) {
            store.clear(&address);
            info!(scene = %address, "scene_mounted_after_forced_reset");
            return SceneSession::new(
                address,
                store,
                scene.initial_state(),
                MountKind::ForcedReset,
                timers,
            );
        }

        let Some(mut state) = store.load::<D::Phase>(&address) else {
            debug!(scene = %address, "scene_mounted_fresh");
            return SceneSession::new(
                address,
                store,
                scene.initial_state(),
                MountKind::Fresh,
                timers,
            );
        };

        let tag = state.phase.tag();
        match scene.rehydration_table().get(tag) {
            Some(rehydrate) => {
                rehydrate(&mut state, &mut timers);
                info!(
                    scene = %address,
                    phase = tag,
                    scheduled = timers.len(),
                    "scene_reload_rehydrated"
                );
            }
            None => debug!(
                scene = %address,
                phase = tag,
                "scene_reload_restored_without_rehydration"
            ),
        }
        SceneSession::new(address, store, state, MountKind::Reload, timers)
    }

    /// Arms a hard reset for the next mount of `address`.
    pub fn request_play_again(&self, address: &SceneAddress) -> bool {
        self.storage.set(&keys::play_again(address), PLAY_AGAIN_VALUE)
    }

    fn consume_play_again(&self, address: &SceneAddress) -> bool {
        let Some(value) = self.storage.take(&keys::play_again(address)) else {
            return false;
        };
        let reset = value == PLAY_AGAIN_VALUE;
        info!(scene = %address, reset, "play_again_sentinel_consumed");
        reset
    }
}

/// One mounted scene instance: its live state, its debounced store and its
/// pending timers. Dropping the session cancels every timer and flushes any
/// pending save.
pub struct SceneSession<P: ScenePhase, C> {
    address: SceneAddress,
    store: SceneStateStore,
    state: SceneSessionState<P>,
    kind: MountKind,
    timers: SceneTimers<C>,
}

impl<P: ScenePhase, C> SceneSession<P, C> {
    fn new(
        address: SceneAddress,
        store: SceneStateStore,
        state: SceneSessionState<P>,
        kind: MountKind,
        timers: SceneTimers<C>,
    ) -> Self {
        Self {
            address,
            store,
            state,
            kind,
            timers,
        }
    }

    pub fn state(&self) -> &SceneSessionState<P> {
        &self.state
    }

    pub fn is_reload(&self) -> bool {
        self.kind == MountKind::Reload
    }

    pub fn mount_kind(&self) -> MountKind {
        self.kind
    }

    pub fn address(&self) -> &SceneAddress {
        &self.address
    }

    pub fn update_state(&mut self, state: SceneSessionState<P>) {
        self.state = state;
        self.store.save(&self.address, &self.state);
    }

    pub fn update_with<F>(&mut self, update: F)
    where
        F: FnOnce(&mut SceneSessionState<P>),
    {
        update(&mut self.state);
        self.store.save(&self.address, &self.state);
    }

    pub fn schedule(&mut self, delay: Duration, continuation: C) -> Option<TimerId> {
        self.timers.schedule(delay, continuation)
    }

    pub fn timers(&self) -> &SceneTimers<C> {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut SceneTimers<C> {
        &mut self.timers
    }

    /// Writes debounced saves that are due and returns the continuations
    /// whose timers fired.
    pub fn poll(&mut self) -> Vec<C> {
        self.store.poll();
        self.timers.drain_due()
    }

    /// Returns `true` once per raised flag; the cleared flag is saved.
    pub fn take_mission_just_completed(&mut self) -> bool {
        if !self.state.one_shot.mission_just_completed {
            return false;
        }
        self.update_with(|state| state.one_shot.mission_just_completed = false);
        true
    }

    pub fn take_phase_just_completed(&mut self) -> bool {
        if !self.state.one_shot.phase_just_completed {
            return false;
        }
        self.update_with(|state| state.one_shot.phase_just_completed = false);
        true
    }

    /// The scene went to the background: pending saves are written and every
    /// timer is cancelled. Nothing can be scheduled until `activate`.
    pub fn deactivate(&mut self) -> usize {
        self.store.flush();
        self.timers.deactivate()
    }

    pub fn activate(&mut self) {
        self.timers.activate();
    }

    /// Clean completion: the snapshot and marker are removed so the next
    /// mount starts fresh.
    pub fn complete(mut self) {
        self.timers.cancel_all();
        self.store.clear(&self.address);
    }

    /// Navigation away mid-play; the snapshot is kept for resume.
    pub fn leave(mut self) {
        self.timers.cancel_all();
        self.store.flush();
    }
}

impl<P: ScenePhase, C> fmt::Debug for SceneSession<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneSession")
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("phase", &self.state.phase)
            .field("pending_timers", &self.timers.len())
            .finish()
    }
}

impl<P: ScenePhase, C> Drop for SceneSession<P, C> {
    fn drop(&mut self) {
        self.timers.cancel_all();
        self.store.flush();
    }
}
