use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::ZoneCatalog;
use crate::clock::SharedClock;
use crate::error::Anomaly;
use crate::keys;
use crate::profile::ProfileStore;
use crate::storage::json::{read_json, write_json};
use crate::storage::StorageHandle;

/// Facts reported by a scene when it finishes a play-through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneCompletion {
    pub completed: bool,
    pub stars: u32,
    pub symbols: BTreeSet<String>,
    pub words: BTreeSet<String>,
}

impl SceneCompletion {
    pub fn completed_with_stars(stars: u32) -> Self {
        Self {
            completed: true,
            stars,
            ..Self::default()
        }
    }

    pub fn with_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols.extend(symbols.into_iter().map(Into::into));
        self
    }

    pub fn with_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.words.extend(words.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneProgress {
    pub scene_id: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub stars: u32,
    #[serde(default)]
    pub symbols: BTreeSet<String>,
    #[serde(default)]
    pub words: BTreeSet<String>,
    #[serde(default)]
    pub last_played: Option<u64>,
}

impl SceneProgress {
    fn empty(scene_id: &str) -> Self {
        Self {
            scene_id: scene_id.to_string(),
            completed: false,
            stars: 0,
            symbols: BTreeSet::new(),
            words: BTreeSet::new(),
            last_played: None,
        }
    }

    /// Completion is sticky, stars keep their maximum and collections only
    /// grow. Applying the same completion twice is a no-op on the result.
    pub fn merge(&mut self, completion: &SceneCompletion) {
        self.completed |= completion.completed;
        self.stars = self.stars.max(completion.stars);
        self.symbols.extend(completion.symbols.iter().cloned());
        self.words.extend(completion.words.iter().cloned());
    }

    fn merge_record(&mut self, other: &SceneProgress) {
        self.completed |= other.completed;
        self.stars = self.stars.max(other.stars);
        self.symbols.extend(other.symbols.iter().cloned());
        self.words.extend(other.words.iter().cloned());
        self.last_played = self.last_played.max(other.last_played);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ZoneProgressRecord {
    #[serde(default)]
    pub scenes: BTreeMap<String, SceneProgress>,
    /// Scenes explicitly unlocked, independent of derived unlock state.
    #[serde(default)]
    pub unlocked_scenes: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ProgressDocument {
    #[serde(default)]
    pub zones: BTreeMap<String, ZoneProgressRecord>,
}

impl ProgressDocument {
    /// Folds `other` into `self` with the per-scene merge rules.
    pub(crate) fn merge_from(&mut self, other: &ProgressDocument) {
        for (zone_id, incoming) in &other.zones {
            let zone = self.zones.entry(zone_id.clone()).or_default();
            zone.unlocked_scenes
                .extend(incoming.unlocked_scenes.iter().cloned());
            for (scene_id, scene) in &incoming.scenes {
                zone.scenes
                    .entry(scene_id.clone())
                    .or_insert_with(|| SceneProgress::empty(scene_id))
                    .merge_record(scene);
            }
        }
    }

    pub(crate) fn totals(&self) -> (u32, u32) {
        self.zones
            .values()
            .flat_map(|zone| zone.scenes.values())
            .fold((0u32, 0u32), |(stars, completed), scene| {
                (
                    stars.saturating_add(scene.stars),
                    completed.saturating_add(u32::from(scene.completed)),
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneStatus {
    pub scene_id: String,
    pub completed: bool,
    pub stars: u32,
    pub unlocked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneProgress {
    pub zone_id: String,
    pub completed_scenes: u32,
    pub total_scenes: u32,
    pub total_stars: u32,
    pub per_scene: Vec<SceneStatus>,
}

impl ZoneProgress {
    pub fn scene(&self, scene_id: &str) -> Option<&SceneStatus> {
        self.per_scene.iter().find(|scene| scene.scene_id == scene_id)
    }
}

/// Merges per-scene completion facts into the profile's progress document
/// and derives zone rollups and unlock state from it.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    storage: StorageHandle,
    catalog: Arc<ZoneCatalog>,
    profiles: ProfileStore,
    clock: SharedClock,
}

impl ProgressAggregator {
    pub fn new(
        storage: StorageHandle,
        catalog: Arc<ZoneCatalog>,
        profiles: ProfileStore,
        clock: SharedClock,
    ) -> Self {
        Self {
            storage,
            catalog,
            profiles,
            clock,
        }
    }

    pub fn update_scene_completion(
        &self,
        profile_id: &str,
        zone_id: &str,
        scene_id: &str,
        completion: &SceneCompletion,
    ) -> ZoneProgress {
        if !self.profiles.exists(profile_id) {
            warn!(
                profile_id,
                zone_id,
                scene_id,
                anomaly = %Anomaly::MissingProfile,
                "scene_completion_ignored"
            );
            return self.empty_zone_progress(zone_id);
        }

        let mut document = self.load_document(profile_id);
        let zone = document.zones.entry(zone_id.to_string()).or_default();
        let scene = zone
            .scenes
            .entry(scene_id.to_string())
            .or_insert_with(|| SceneProgress::empty(scene_id));

        if scene.completed && completion.completed {
            debug!(
                profile_id,
                zone_id,
                scene_id,
                anomaly = %Anomaly::DoubleCompletion,
                previous_stars = scene.stars,
                replay_stars = completion.stars,
                "scene_completion_merged_into_existing"
            );
        }
        scene.merge(completion);
        scene.last_played = Some(self.clock.now_ms());
        let merged_stars = scene.stars;

        let next_scene = if completion.completed {
            self.unlock_following(zone, zone_id, scene_id)
        } else {
            None
        };

        if !write_json(&self.storage, &keys::game_progress(profile_id), &document) {
            warn!(
                profile_id,
                zone_id,
                scene_id,
                anomaly = %Anomaly::WriteFailed,
                "scene_completion_not_persisted"
            );
            return self.calculate_zone_progress(profile_id, zone_id);
        }
        info!(
            profile_id,
            zone_id,
            scene_id,
            stars = merged_stars,
            unlocked_next = next_scene.as_deref().unwrap_or("-"),
            "scene_completion_recorded"
        );

        let (total_stars, completed_scenes) = document.totals();
        self.profiles
            .record_aggregate_stats(profile_id, total_stars, completed_scenes);

        self.zone_progress_from(&document, zone_id)
    }

    pub fn calculate_zone_progress(&self, profile_id: &str, zone_id: &str) -> ZoneProgress {
        let document = self.load_document(profile_id);
        self.zone_progress_from(&document, zone_id)
    }

    /// Explicitly unlocks the scene after `completed_scene_id` for the active
    /// profile. Never crosses into another zone.
    pub fn unlock_next_scene(&self, zone_id: &str, completed_scene_id: &str) -> Option<String> {
        let Some(profile_id) = self.profiles.active_profile_id() else {
            warn!(
                zone_id,
                scene_id = completed_scene_id,
                anomaly = %Anomaly::MissingProfile,
                "unlock_next_scene_skipped"
            );
            return None;
        };

        let mut document = self.load_document(&profile_id);
        let zone = document.zones.entry(zone_id.to_string()).or_default();
        let next = self.unlock_following(zone, zone_id, completed_scene_id)?;
        write_json(&self.storage, &keys::game_progress(&profile_id), &document).then_some(next)
    }

    pub fn scene_progress(
        &self,
        profile_id: &str,
        zone_id: &str,
        scene_id: &str,
    ) -> Option<SceneProgress> {
        self.load_document(profile_id)
            .zones
            .remove(zone_id)?
            .scenes
            .remove(scene_id)
    }

    /// Profile-wide `(total_stars, completed_scenes)` across every zone.
    pub fn profile_totals(&self, profile_id: &str) -> (u32, u32) {
        self.load_document(profile_id).totals()
    }

    /// The first zone is always open; later zones open once the profile's
    /// total stars reach the zone's requirement.
    pub fn is_zone_unlocked(&self, profile_id: &str, zone_id: &str) -> bool {
        let Some(zone) = self.catalog.zone(zone_id) else {
            return false;
        };
        if self.catalog.is_first_zone(zone_id) {
            return true;
        }
        let (total_stars, _) = self.profile_totals(profile_id);
        total_stars >= zone.required_stars_to_unlock
    }

    fn unlock_following(
        &self,
        zone: &mut ZoneProgressRecord,
        zone_id: &str,
        completed_scene_id: &str,
    ) -> Option<String> {
        let catalog_zone = self.catalog.zone(zone_id)?;
        let next = catalog_zone.scene_after(completed_scene_id)?;
        zone.unlocked_scenes.insert(next.id.clone());
        Some(next.id.clone())
    }

    fn zone_progress_from(&self, document: &ProgressDocument, zone_id: &str) -> ZoneProgress {
        let Some(catalog_zone) = self.catalog.zone(zone_id) else {
            return self.empty_zone_progress(zone_id);
        };
        let record = document.zones.get(zone_id);

        let mut per_scene = Vec::with_capacity(catalog_zone.ordered_scenes.len());
        for (idx, scene_ref) in catalog_zone.ordered_scenes.iter().enumerate() {
            let progress = record.and_then(|zone| zone.scenes.get(&scene_ref.id));
            let explicit = record.is_some_and(|zone| zone.unlocked_scenes.contains(&scene_ref.id));
            let previous_completed = idx > 0
                && per_scene
                    .last()
                    .is_some_and(|previous: &SceneStatus| previous.completed);
            if explicit && idx > 0 && !previous_completed {
                debug!(
                    zone_id,
                    scene_id = %scene_ref.id,
                    anomaly = %Anomaly::UnlockConflict,
                    "explicit_unlock_overrides_derived_lock"
                );
            }
            per_scene.push(SceneStatus {
                scene_id: scene_ref.id.clone(),
                completed: progress.is_some_and(|scene| scene.completed),
                stars: progress.map_or(0, |scene| scene.stars),
                unlocked: idx == 0 || explicit || previous_completed,
            });
        }

        ZoneProgress {
            zone_id: zone_id.to_string(),
            completed_scenes: per_scene.iter().filter(|scene| scene.completed).count() as u32,
            total_scenes: per_scene.len() as u32,
            total_stars: per_scene.iter().map(|scene| scene.stars).sum(),
            per_scene,
        }
    }

    fn empty_zone_progress(&self, zone_id: &str) -> ZoneProgress {
        let per_scene = self
            .catalog
            .zone(zone_id)
            .map(|zone| {
                zone.ordered_scenes
                    .iter()
                    .enumerate()
                    .map(|(idx, scene_ref)| SceneStatus {
                        scene_id: scene_ref.id.clone(),
                        completed: false,
                        stars: 0,
                        unlocked: idx == 0,
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        ZoneProgress {
            zone_id: zone_id.to_string(),
            completed_scenes: 0,
            total_scenes: per_scene.len() as u32,
            total_stars: 0,
            per_scene,
        }
    }

    fn load_document(&self, profile_id: &str) -> ProgressDocument {
        read_json::<ProgressDocument>(&self.storage, &keys::game_progress(profile_id))
            .into_present()
            .unwrap_or_default()
    }
}
