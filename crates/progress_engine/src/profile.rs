use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::error::Anomaly;
use crate::keys::{self, ACTIVE_PROFILE_KEY, PROFILES_KEY};
use crate::storage::json::{read_json, write_json};
use crate::storage::StorageHandle;

const PROFILE_ID_HEX_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub created_at: u64,
    #[serde(default)]
    pub total_stars: u32,
    #[serde(default)]
    pub completed_scenes: u32,
    #[serde(default)]
    pub last_played: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProfileRegistry {
    #[serde(default)]
    profiles: BTreeMap<String, Profile>,
}

/// Profile identity, the active-profile pointer and the cached display
/// stats shown on profile pickers.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    storage: StorageHandle,
    clock: SharedClock,
}

impl ProfileStore {
    pub fn new(storage: StorageHandle, clock: SharedClock) -> Self {
        Self { storage, clock }
    }

    pub fn create_profile(&self, name: &str, avatar: &str) -> String {
        let mut registry = self.load_registry();
        let created_at = self.clock.now_ms();
        let mut salt = 0u32;
        let id = loop {
            let candidate = derive_profile_id(name, avatar, created_at, salt);
            if !registry.profiles.contains_key(&candidate) {
                break candidate;
            }
            salt = salt.wrapping_add(1);
        };

        registry.profiles.insert(
            id.clone(),
            Profile {
                id: id.clone(),
                name: name.to_string(),
                avatar: avatar.to_string(),
                created_at,
                total_stars: 0,
                completed_scenes: 0,
                last_played: None,
            },
        );
        self.save_registry(&registry);
        info!(profile_id = %id, name, "profile_created");
        id
    }

    /// Points every profile-scoped operation at `profile_id`. Unknown ids are
    /// refused so the pointer never dangles.
    pub fn set_active_profile(&self, profile_id: &str) -> bool {
        if !self.load_registry().profiles.contains_key(profile_id) {
            warn!(
                profile_id,
                anomaly = %Anomaly::MissingProfile,
                "set_active_profile_unknown_id"
            );
            return false;
        }
        self.storage.set(ACTIVE_PROFILE_KEY, profile_id)
    }

    pub fn active_profile_id(&self) -> Option<String> {
        let profile_id = self.storage.get(ACTIVE_PROFILE_KEY)?;
        if self.load_registry().profiles.contains_key(&profile_id) {
            Some(profile_id)
        } else {
            None
        }
    }

    pub fn get_active_profile(&self) -> Option<Profile> {
        let profile_id = self.storage.get(ACTIVE_PROFILE_KEY)?;
        self.profile(&profile_id)
    }

    pub fn profile(&self, profile_id: &str) -> Option<Profile> {
        self.load_registry().profiles.remove(profile_id)
    }

    pub fn exists(&self, profile_id: &str) -> bool {
        self.load_registry().profiles.contains_key(profile_id)
    }

    /// All profiles, oldest first.
    pub fn list_profiles(&self) -> Vec<Profile> {
        let mut profiles = self
            .load_registry()
            .profiles
            .into_values()
            .collect::<Vec<_>>();
        profiles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        profiles
    }

    /// Merges display stats into the cached profile. Cached values only move
    /// upwards; an older, smaller rollup never hides newer achievement.
    pub fn record_aggregate_stats(
        &self,
        profile_id: &str,
        total_stars: u32,
        completed_scenes: u32,
    ) {
        let mut registry = self.load_registry();
        let Some(profile) = registry.profiles.get_mut(profile_id) else {
            warn!(
                profile_id,
                anomaly = %Anomaly::MissingProfile,
                "record_aggregate_stats_skipped"
            );
            return;
        };
        profile.total_stars = profile.total_stars.max(total_stars);
        profile.completed_scenes = profile.completed_scenes.max(completed_scenes);
        profile.last_played = Some(self.clock.now_ms());
        self.save_registry(&registry);
    }

    /// Wipes every key scoped to the profile and zeroes its cached stats. The
    /// profile identity itself is kept.
    pub fn reset_profile(&self, profile_id: &str) -> bool {
        let mut registry = self.load_registry();
        let Some(profile) = registry.profiles.get_mut(profile_id) else {
            warn!(
                profile_id,
                anomaly = %Anomaly::MissingProfile,
                "reset_profile_skipped"
            );
            return false;
        };
        profile.total_stars = 0;
        profile.completed_scenes = 0;
        profile.last_played = None;
        self.save_registry(&registry);

        let owned = self
            .storage
            .keys()
            .into_iter()
            .filter(|key| keys::is_owned_by_profile(key, profile_id))
            .collect::<Vec<_>>();
        for key in &owned {
            self.storage.remove(key);
        }
        info!(profile_id, removed_keys = owned.len(), "profile_reset");
        true
    }

    fn load_registry(&self) -> ProfileRegistry {
        read_json::<ProfileRegistry>(&self.storage, PROFILES_KEY)
            .into_present()
            .unwrap_or_default()
    }

    fn save_registry(&self, registry: &ProfileRegistry) {
        write_json(&self.storage, PROFILES_KEY, registry);
    }
}

fn derive_profile_id(name: &str, avatar: &str, created_at: u64, salt: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(avatar.as_bytes());
    hasher.update([0u8]);
    hasher.update(created_at.to_le_bytes());
    hasher.update(salt.to_le_bytes());
    let digest = hasher.finalize();

    let mut id = String::with_capacity(2 + PROFILE_ID_HEX_LEN);
    id.push_str("p_");
    for byte in digest.iter().take(PROFILE_ID_HEX_LEN / 2) {
        let _ = write!(&mut id, "{byte:02x}");
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;

    fn store_with_backing() -> (ProfileStore, MemoryStore, ManualClock) {
        let backing = MemoryStore::new();
        let clock = ManualClock::starting_at(1_700_000_000_000);
        let store = ProfileStore::new(StorageHandle::new(backing.clone()), clock.shared());
        (store, backing, clock)
    }

    #[test]
    fn created_profile_becomes_active_only_when_selected() {
        let (profiles, _, _) = store_with_backing();
        let id = profiles.create_profile("Asha", "elephant");

        assert!(id.starts_with("p_"));
        assert_eq!(id.len(), 2 + PROFILE_ID_HEX_LEN);
        assert!(profiles.get_active_profile().is_none());

        assert!(profiles.set_active_profile(&id));
        let active = profiles.get_active_profile().expect("active");
        assert_eq!(active.name, "Asha");
        assert_eq!(active.avatar, "elephant");
        assert_eq!(active.total_stars, 0);
    }

    #[test]
    fn identical_profiles_created_at_same_instant_get_distinct_ids() {
        let (profiles, _, _) = store_with_backing();
        let first = profiles.create_profile("Twin", "owl");
        let second = profiles.create_profile("Twin", "owl");
        assert_ne!(first, second);
        assert_eq!(profiles.list_profiles().len(), 2);
    }

    #[test]
    fn unknown_profile_cannot_become_active() {
        let (profiles, backing, _) = store_with_backing();
        assert!(!profiles.set_active_profile("p_missing"));
        assert_eq!(backing.raw(ACTIVE_PROFILE_KEY), None);
    }

    #[test]
    fn aggregate_stats_merge_upwards_only() {
        let (profiles, _, clock) = store_with_backing();
        let id = profiles.create_profile("Asha", "elephant");

        profiles.record_aggregate_stats(&id, 5, 2);
        clock.advance(std::time::Duration::from_secs(1));
        profiles.record_aggregate_stats(&id, 3, 1);

        let profile = profiles.profile(&id).expect("profile");
        assert_eq!(profile.total_stars, 5);
        assert_eq!(profile.completed_scenes, 2);
        assert_eq!(profile.last_played, Some(1_700_000_001_000));
    }

    #[test]
    fn corrupt_registry_reads_as_empty_and_is_recreated_on_write() {
        let (profiles, backing, _) = store_with_backing();
        backing.insert_raw(PROFILES_KEY, "{\"profiles\": [oops");

        assert!(profiles.list_profiles().is_empty());
        let id = profiles.create_profile("Ravi", "peacock");
        assert_eq!(profiles.list_profiles().len(), 1);
        assert!(profiles.exists(&id));
    }

    #[test]
    fn reset_removes_scoped_keys_and_zeroes_stats() {
        let (profiles, backing, _) = store_with_backing();
        let id = profiles.create_profile("Asha", "elephant");
        let other = profiles.create_profile("Ravi", "peacock");
        profiles.record_aggregate_stats(&id, 9, 3);
        backing.insert_raw(&keys::game_progress(&id), "{}");
        backing.insert_raw(&format!("temp_session_{id}_z_s"), "{}");
        backing.insert_raw(&keys::resume_pointer(&id), "{}");
        backing.insert_raw(&keys::game_progress(&other), "{}");

        assert!(profiles.reset_profile(&id));

        assert_eq!(backing.raw(&keys::game_progress(&id)), None);
        assert_eq!(backing.raw(&format!("temp_session_{id}_z_s")), None);
        assert_eq!(backing.raw(&keys::resume_pointer(&id)), None);
        assert!(backing.raw(&keys::game_progress(&other)).is_some());
        let profile = profiles.profile(&id).expect("profile kept");
        assert_eq!(profile.total_stars, 0);
        assert_eq!(profile.completed_scenes, 0);
    }
}
