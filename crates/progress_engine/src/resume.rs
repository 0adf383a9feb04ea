use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Anomaly;
use crate::keys;
use crate::profile::ProfileStore;
use crate::storage::json::{read_json, write_json};
use crate::storage::StorageHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumePointer {
    pub zone_id: String,
    pub scene_id: String,
}

/// The single "last scene in progress" pointer of the active profile.
#[derive(Debug, Clone)]
pub struct ResumeTracker {
    storage: StorageHandle,
    profiles: ProfileStore,
}

impl ResumeTracker {
    pub fn new(storage: StorageHandle, profiles: ProfileStore) -> Self {
        Self { storage, profiles }
    }

    pub fn set_current_scene(&self, zone_id: &str, scene_id: &str) {
        let Some(profile_id) = self.profiles.active_profile_id() else {
            warn!(
                zone_id,
                scene_id,
                anomaly = %Anomaly::MissingProfile,
                "resume_pointer_not_set"
            );
            return;
        };
        let pointer = ResumePointer {
            zone_id: zone_id.to_string(),
            scene_id: scene_id.to_string(),
        };
        if write_json(&self.storage, &keys::resume_pointer(&profile_id), &pointer) {
            debug!(profile_id = %profile_id, zone_id, scene_id, "resume_pointer_set");
        }
    }

    /// The scene the active profile left mid-play, if any.
    pub fn should_resume_scene(&self) -> Option<ResumePointer> {
        let profile_id = self.profiles.active_profile_id()?;
        read_json::<ResumePointer>(&self.storage, &keys::resume_pointer(&profile_id))
            .into_present()
    }

    pub fn is_current_scene(&self, zone_id: &str, scene_id: &str) -> bool {
        self.should_resume_scene()
            .is_some_and(|pointer| pointer.zone_id == zone_id && pointer.scene_id == scene_id)
    }

    pub fn clear_current_scene(&self) {
        if let Some(profile_id) = self.profiles.active_profile_id() {
            self.storage.remove(&keys::resume_pointer(&profile_id));
        }
    }
}
