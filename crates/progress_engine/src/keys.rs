//! Flat key layout of the persisted store.
//!
//! | key                                        | value                     |
//! |--------------------------------------------|---------------------------|
//! | `activeProfileId`                          | profile id string         |
//! | `gameProfiles`                             | profile registry          |
//! | `schemaVersion`                            | schema version number     |
//! | `<profile>_gameProgress`                   | progress document         |
//! | `<profile>_<zone>_<scene>_state`           | scene session snapshot    |
//! | `temp_session_<profile>_<zone>_<scene>`    | in-progress marker        |
//! | `play_again_<profile>_<zone>_<scene>`      | one-shot reset sentinel   |
//! | `resume_pointer_<profile>`                 | `{ zoneId, sceneId }`     |

use std::fmt;

pub const ACTIVE_PROFILE_KEY: &str = "activeProfileId";
pub const PROFILES_KEY: &str = "gameProfiles";
pub const SCHEMA_VERSION_KEY: &str = "schemaVersion";

pub(crate) const LEGACY_PROGRESS_KEY: &str = "gameProgress";
pub(crate) const LEGACY_RESUME_KEY: &str = "currentScene";

/// Joins the parts of a [`SceneAddress`]; zone and scene ids may not contain it.
pub const KEY_SEPARATOR: char = '_';

const SESSION_MARKER_PREFIX: &str = "temp_session_";
const PLAY_AGAIN_PREFIX: &str = "play_again_";
const RESUME_POINTER_PREFIX: &str = "resume_pointer_";

/// Identifies one scene as played by one profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneAddress {
    pub profile_id: String,
    pub zone_id: String,
    pub scene_id: String,
}

impl SceneAddress {
    pub fn new(
        profile_id: impl Into<String>,
        zone_id: impl Into<String>,
        scene_id: impl Into<String>,
    ) -> Self {
        Self {
            profile_id: profile_id.into(),
            zone_id: zone_id.into(),
            scene_id: scene_id.into(),
        }
    }
}

impl fmt::Display for SceneAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
            self.profile_id, self.zone_id, self.scene_id
        )
    }
}

pub fn game_progress(profile_id: &str) -> String {
    format!("{profile_id}_gameProgress")
}

pub fn scene_state(address: &SceneAddress) -> String {
    format!("{address}_state")
}

pub fn session_marker(address: &SceneAddress) -> String {
    format!("{SESSION_MARKER_PREFIX}{address}")
}

pub fn play_again(address: &SceneAddress) -> String {
    format!("{PLAY_AGAIN_PREFIX}{address}")
}

pub fn resume_pointer(profile_id: &str) -> String {
    format!("{RESUME_POINTER_PREFIX}{profile_id}")
}

/// Whether `key` is scoped to `profile_id`.
pub(crate) fn is_owned_by_profile(key: &str, profile_id: &str) -> bool {
    let scoped = format!("{profile_id}_");
    let unprefixed = key
        .strip_prefix(SESSION_MARKER_PREFIX)
        .or_else(|| key.strip_prefix(PLAY_AGAIN_PREFIX))
        .unwrap_or(key);
    unprefixed.starts_with(&scoped) || key == resume_pointer(profile_id)
}
