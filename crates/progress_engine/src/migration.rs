//! One-shot schema migration run when the engine opens a store.
//!
//! Version 1 stores predate profiles: progress lived under the unscoped
//! `gameProgress` key and the resume pointer under `currentScene`. Version 2
//! scopes both to a profile and stamps `schemaVersion`.

use tracing::{info, warn};

use crate::error::Anomaly;
use crate::keys::{self, LEGACY_PROGRESS_KEY, LEGACY_RESUME_KEY, SCHEMA_VERSION_KEY};
use crate::profile::ProfileStore;
use crate::progress::ProgressDocument;
use crate::resume::ResumePointer;
use crate::storage::json::{read_json, write_json};
use crate::storage::StorageHandle;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;
const UNVERSIONED_SCHEMA_VERSION: u32 = 1;
const LEGACY_PROFILE_NAME: &str = "Player";
const LEGACY_PROFILE_AVATAR: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    /// Profile the legacy data was folded into, if any existed.
    pub target_profile: Option<String>,
    pub created_profile: bool,
    pub merged_progress: bool,
    pub moved_resume_pointer: bool,
}

impl MigrationReport {
    pub fn migrated(&self) -> bool {
        self.from_version < self.to_version
    }
}

pub fn migrate(storage: &StorageHandle, profiles: &ProfileStore) -> MigrationReport {
    let from_version = stored_schema_version(storage);
    let mut report = MigrationReport {
        from_version,
        to_version: from_version,
        ..MigrationReport::default()
    };
    if from_version >= CURRENT_SCHEMA_VERSION {
        return report;
    }

    let legacy_progress =
        read_json::<ProgressDocument>(storage, LEGACY_PROGRESS_KEY).into_present();
    let legacy_resume = read_json::<ResumePointer>(storage, LEGACY_RESUME_KEY).into_present();

    // A legacy key is dropped only once its data is safe in the scoped key, and
    // the version is stamped only when nothing is left behind to retry.
    let mut progress_settled = true;
    let mut resume_settled = true;
    if legacy_progress.is_some() || legacy_resume.is_some() {
        let profile_id = match profiles.active_profile_id() {
            Some(profile_id) => profile_id,
            None => {
                let profile_id =
                    profiles.create_profile(LEGACY_PROFILE_NAME, LEGACY_PROFILE_AVATAR);
                if !profiles.set_active_profile(&profile_id) {
                    warn!(
                        profile_id = %profile_id,
                        anomaly = %Anomaly::WriteFailed,
                        "schema_migration_deferred_no_profile"
                    );
                    return report;
                }
                report.created_profile = true;
                profile_id
            }
        };

        if let Some(legacy) = legacy_progress {
            let progress_key = keys::game_progress(&profile_id);
            let mut document = read_json::<ProgressDocument>(storage, &progress_key)
                .into_present()
                .unwrap_or_default();
            document.merge_from(&legacy);
            report.merged_progress = write_json(storage, &progress_key, &document);
            if report.merged_progress {
                let (total_stars, completed_scenes) = document.totals();
                profiles.record_aggregate_stats(&profile_id, total_stars, completed_scenes);
            }
            progress_settled = report.merged_progress;
        }

        if let Some(pointer) = legacy_resume {
            let resume_key = keys::resume_pointer(&profile_id);
            if !storage.contains(&resume_key) {
                report.moved_resume_pointer = write_json(storage, &resume_key, &pointer);
            }
            resume_settled = storage.contains(&resume_key);
        }
        report.target_profile = Some(profile_id);
    }

    if progress_settled {
        storage.remove(LEGACY_PROGRESS_KEY);
    }
    if resume_settled {
        storage.remove(LEGACY_RESUME_KEY);
    }
    if !(progress_settled && resume_settled) {
        warn!(
            from_version,
            merged_progress = report.merged_progress,
            moved_resume_pointer = report.moved_resume_pointer,
            anomaly = %Anomaly::WriteFailed,
            "schema_migration_deferred"
        );
        return report;
    }
    if storage.set(SCHEMA_VERSION_KEY, &CURRENT_SCHEMA_VERSION.to_string()) {
        report.to_version = CURRENT_SCHEMA_VERSION;
    }

    info!(
        from_version = report.from_version,
        to_version = report.to_version,
        target_profile = report.target_profile.as_deref().unwrap_or("-"),
        created_profile = report.created_profile,
        merged_progress = report.merged_progress,
        moved_resume_pointer = report.moved_resume_pointer,
        "schema_migrated"
    );
    report
}

fn stored_schema_version(storage: &StorageHandle) -> u32 {
    let Some(raw) = storage.get(SCHEMA_VERSION_KEY) else {
        return UNVERSIONED_SCHEMA_VERSION;
    };
    match raw.trim().parse::<u32>() {
        Ok(version) => version,
        Err(error) => {
            warn!(
                key = SCHEMA_VERSION_KEY,
                value = %raw,
                error = %error,
                anomaly = %Anomaly::Parse,
                "schema_version_unreadable_treated_as_unversioned"
            );
            UNVERSIONED_SCHEMA_VERSION
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;

    fn setup() -> (StorageHandle, ProfileStore, MemoryStore) {
        let backing = MemoryStore::new();
        let storage = StorageHandle::new(backing.clone());
        let profiles = ProfileStore::new(storage.clone(), ManualClock::starting_at(5).shared());
        (storage, profiles, backing)
    }

    const LEGACY_PROGRESS: &str = r#"{
        "zones": {
            "ganesha": {
                "scenes": {
                    "modak": { "sceneId": "modak", "completed": true, "stars": 2, "symbols": ["mooshika"] }
                }
            }
        }
    }"#;

    #[test]
    fn legacy_data_moves_into_a_new_player_profile() {
        let (storage, profiles, backing) = setup();
        backing.insert_raw(LEGACY_PROGRESS_KEY, LEGACY_PROGRESS);
        backing.insert_raw(LEGACY_RESUME_KEY, r#"{"zoneId":"ganesha","sceneId":"pond"}"#);

        let report = migrate(&storage, &profiles);

        assert!(report.migrated());
        assert!(report.created_profile);
        assert!(report.merged_progress);
        assert!(report.moved_resume_pointer);
        let profile_id = report.target_profile.expect("target profile");
        assert_eq!(profiles.active_profile_id().as_deref(), Some(profile_id.as_str()));
        let profile = profiles.profile(&profile_id).expect("profile");
        assert_eq!(profile.name, LEGACY_PROFILE_NAME);
        assert_eq!(profile.total_stars, 2);
        assert_eq!(profile.completed_scenes, 1);

        assert!(backing.raw(&keys::game_progress(&profile_id)).is_some());
        assert!(backing.raw(&keys::resume_pointer(&profile_id)).is_some());
        assert_eq!(backing.raw(LEGACY_PROGRESS_KEY), None);
        assert_eq!(backing.raw(LEGACY_RESUME_KEY), None);
        assert_eq!(backing.raw(SCHEMA_VERSION_KEY).as_deref(), Some("2"));
    }

    #[test]
    fn legacy_progress_merges_into_existing_active_profile() {
        let (storage, profiles, backing) = setup();
        let id = profiles.create_profile("Asha", "elephant");
        profiles.set_active_profile(&id);
        backing.insert_raw(
            &keys::game_progress(&id),
            r#"{"zones":{"ganesha":{"scenes":{"modak":{"sceneId":"modak","stars":3,"symbols":["laddu"]}}}}}"#,
        );
        backing.insert_raw(LEGACY_PROGRESS_KEY, LEGACY_PROGRESS);

        let report = migrate(&storage, &profiles);
        assert!(!report.created_profile);
        assert_eq!(report.target_profile.as_deref(), Some(id.as_str()));

        let document = read_json::<ProgressDocument>(&storage, &keys::game_progress(&id))
            .into_present()
            .expect("document");
        let modak = &document.zones["ganesha"].scenes["modak"];
        assert!(modak.completed);
        assert_eq!(modak.stars, 3);
        assert_eq!(modak.symbols.len(), 2);
    }

    #[test]
    fn existing_resume_pointer_is_not_overwritten() {
        let (storage, profiles, backing) = setup();
        let id = profiles.create_profile("Asha", "elephant");
        profiles.set_active_profile(&id);
        backing.insert_raw(&keys::resume_pointer(&id), r#"{"zoneId":"z","sceneId":"new"}"#);
        backing.insert_raw(LEGACY_RESUME_KEY, r#"{"zoneId":"z","sceneId":"old"}"#);

        let report = migrate(&storage, &profiles);
        assert!(!report.moved_resume_pointer);
        assert_eq!(
            backing.raw(&keys::resume_pointer(&id)).as_deref(),
            Some(r#"{"zoneId":"z","sceneId":"new"}"#)
        );
        assert_eq!(backing.raw(LEGACY_RESUME_KEY), None);
    }

    #[test]
    fn empty_store_is_only_stamped() {
        let (storage, profiles, backing) = setup();
        let report = migrate(&storage, &profiles);

        assert!(report.migrated());
        assert_eq!(report.target_profile, None);
        assert!(profiles.list_profiles().is_empty());
        assert_eq!(backing.len(), 1);
        assert_eq!(backing.raw(SCHEMA_VERSION_KEY).as_deref(), Some("2"));
    }

    #[test]
    fn current_store_is_left_untouched() {
        let (storage, profiles, backing) = setup();
        backing.insert_raw(SCHEMA_VERSION_KEY, "2");
        backing.insert_raw(LEGACY_PROGRESS_KEY, LEGACY_PROGRESS);

        let report = migrate(&storage, &profiles);
        assert!(!report.migrated());
        assert!(backing.raw(LEGACY_PROGRESS_KEY).is_some());
        assert_eq!(backing.write_count(SCHEMA_VERSION_KEY), 0);
    }

    fn bulky_legacy_progress() -> String {
        let symbols = (0..200)
            .map(|index| format!("\"symbol{index:04}\""))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            r#"{{"zones":{{"ganesha":{{"scenes":{{"modak":{{"sceneId":"modak","completed":true,"stars":3,"symbols":[{symbols}]}}}}}}}}}}"#
        )
    }

    #[test]
    fn failed_merge_keeps_legacy_data_and_retries_next_open() {
        let legacy = bulky_legacy_progress();
        let backing = MemoryStore::with_quota_bytes(legacy.len() + 1_000);
        let storage = StorageHandle::new(backing.clone());
        let profiles = ProfileStore::new(storage.clone(), ManualClock::starting_at(5).shared());
        backing.insert_raw(LEGACY_PROGRESS_KEY, &legacy);

        let report = migrate(&storage, &profiles);
        assert!(!report.migrated());
        assert!(report.created_profile);
        assert!(!report.merged_progress);
        let profile_id = report.target_profile.expect("target profile");
        assert_eq!(backing.raw(LEGACY_PROGRESS_KEY).as_deref(), Some(legacy.as_str()));
        assert_eq!(backing.raw(SCHEMA_VERSION_KEY), None);
        let profile = profiles.profile(&profile_id).expect("profile");
        assert_eq!(profile.total_stars, 0);
        assert_eq!(profile.completed_scenes, 0);

        backing.set_quota_bytes(None);
        let retry = migrate(&storage, &profiles);
        assert!(retry.migrated());
        assert!(!retry.created_profile);
        assert!(retry.merged_progress);
        assert_eq!(retry.target_profile.as_deref(), Some(profile_id.as_str()));
        assert_eq!(backing.raw(LEGACY_PROGRESS_KEY), None);
        assert_eq!(backing.raw(SCHEMA_VERSION_KEY).as_deref(), Some("2"));
        assert_eq!(profiles.profile(&profile_id).expect("profile").total_stars, 3);
    }

    #[test]
    fn corrupt_legacy_progress_is_discarded() {
        let (storage, profiles, backing) = setup();
        backing.insert_raw(LEGACY_PROGRESS_KEY, "not json");

        let report = migrate(&storage, &profiles);
        assert_eq!(report.target_profile, None);
        assert_eq!(backing.raw(LEGACY_PROGRESS_KEY), None);
        assert_eq!(report.to_version, CURRENT_SCHEMA_VERSION);
    }
}
