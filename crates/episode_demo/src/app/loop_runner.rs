use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use progress_engine::{
    ManualClock, MountKind, ProgressEngine, SceneAddress, SceneCompletion, ZoneProgress,
};
use tracing::{error, info, warn};

use super::bootstrap::{build_app, EPISODE_SCENE, EPISODE_ZONE, PLAYER_AVATAR, PLAYER_NAME};
use super::modak::{
    apply_step, miss_placement, mistakes, place_modak, start, ModakPhase, ModakScene,
    ModakSession,
};

const TICK: Duration = Duration::from_millis(50);
const CELEBRATION_BUDGET: Duration = Duration::from_secs(5);
const MISSED_PLACEMENT_ROUND: u32 = 2;
const EPISODE_SYMBOLS: [&str; 1] = ["mooshika"];
const EPISODE_WORDS: [&str; 2] = ["modak", "sweet"];

/// How the runner lets time pass: wall-clock sleeps in the binary, clock
/// advances under test.
pub(crate) trait Pacer {
    fn wait(&self, by: Duration);
}

struct Sleeper;

impl Pacer for Sleeper {
    fn wait(&self, by: Duration) {
        thread::sleep(by);
    }
}

impl Pacer for ManualClock {
    fn wait(&self, by: Duration) {
        self.advance(by);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EpisodeReport {
    pub(crate) profile_id: String,
    pub(crate) interrupted: bool,
    pub(crate) recorded_stars: Option<u32>,
    pub(crate) zone: ZoneProgress,
}

pub(crate) fn run() -> ExitCode {
    let app = match build_app() {
        Ok(app) => app,
        Err(err) => {
            error!(error = %err, "startup_failed");
            return ExitCode::FAILURE;
        }
    };

    let report = run_episode(&app.engine, &Sleeper);
    info!(
        profile_id = %report.profile_id,
        interrupted = report.interrupted,
        recorded_stars = report.recorded_stars.unwrap_or(0),
        completed_scenes = report.zone.completed_scenes,
        total_scenes = report.zone.total_scenes,
        zone_stars = report.zone.total_stars,
        "episode_finished"
    );
    ExitCode::SUCCESS
}

/// Plays the modak scene to completion, simulating a reload once in the
/// middle of the first celebration.
pub(crate) fn run_episode(engine: &ProgressEngine, pacer: &dyn Pacer) -> EpisodeReport {
    let profile_id = select_player(engine);
    let address = SceneAddress::new(profile_id.clone(), EPISODE_ZONE, EPISODE_SCENE);

    if let Some(pointer) = engine.resume().should_resume_scene() {
        info!(
            zone_id = %pointer.zone_id,
            scene_id = %pointer.scene_id,
            "resume_offered"
        );
    }
    let already_completed = engine
        .progress()
        .scene_progress(&profile_id, EPISODE_ZONE, EPISODE_SCENE)
        .is_some_and(|scene| scene.completed);
    if already_completed && engine.scene_state_store().has_progress(&address) {
        engine.reconciler().request_play_again(&address);
    }

    engine.resume().set_current_scene(EPISODE_ZONE, EPISODE_SCENE);
    let mut session = engine.reconciler().mount(address.clone(), &ModakScene);
    info!(scene = %address, kind = ?session.mount_kind(), "scene_mounted");

    let mut interrupted = false;
    loop {
        match session.state().phase.clone() {
            ModakPhase::Intro => start(&mut session),
            ModakPhase::Placing { round, placed } => {
                if round == MISSED_PLACEMENT_ROUND
                    && placed == 0
                    && mistakes(session.state()) == 0
                {
                    miss_placement(&mut session);
                }
                place_modak(&mut session);
            }
            ModakPhase::Celebration { step, .. } => {
                if session.take_phase_just_completed() {
                    info!(scene = %address, "round_celebration_started");
                }
                if !interrupted && step >= 1 {
                    drop(session);
                    warn!(scene = %address, "scene_interrupted_mid_celebration");
                    session = engine.reconciler().mount(address.clone(), &ModakScene);
                    interrupted = true;
                    if session.mount_kind() != MountKind::Reload {
                        warn!(
                            scene = %address,
                            kind = ?session.mount_kind(),
                            "snapshot_lost_on_reload"
                        );
                    }
                    continue;
                }
                if !pump(&mut session, pacer) {
                    warn!(scene = %address, "celebration_stalled");
                    break;
                }
            }
            ModakPhase::Complete { .. } => break,
        }
    }

    let recorded_stars = finish(engine, &profile_id, session);
    engine.resume().clear_current_scene();
    EpisodeReport {
        zone: engine
            .progress()
            .calculate_zone_progress(&profile_id, EPISODE_ZONE),
        profile_id,
        interrupted,
        recorded_stars,
    }
}

fn select_player(engine: &ProgressEngine) -> String {
    if let Some(profile_id) = engine.profiles().active_profile_id() {
        return profile_id;
    }
    let profile_id = engine
        .profiles()
        .list_profiles()
        .into_iter()
        .find(|profile| profile.name == PLAYER_NAME)
        .map(|profile| profile.id)
        .unwrap_or_else(|| engine.profiles().create_profile(PLAYER_NAME, PLAYER_AVATAR));
    engine.profiles().set_active_profile(&profile_id);
    profile_id
}

/// Waits for the next continuation batch and applies it. Returns `false`
/// when nothing fired within the budget.
fn pump(session: &mut ModakSession, pacer: &dyn Pacer) -> bool {
    let mut waited = Duration::ZERO;
    while waited < CELEBRATION_BUDGET {
        let fired = session.poll();
        if !fired.is_empty() {
            for step in fired {
                apply_step(session, step);
            }
            return true;
        }
        pacer.wait(TICK);
        waited += TICK;
    }
    false
}

fn finish(engine: &ProgressEngine, profile_id: &str, mut session: ModakSession) -> Option<u32> {
    let phase = session.state().phase.clone();
    let ModakPhase::Complete { stars } = phase else {
        session.leave();
        return None;
    };
    if !session.take_mission_just_completed() {
        session.complete();
        return None;
    }

    let completion = SceneCompletion::completed_with_stars(stars)
        .with_symbols(EPISODE_SYMBOLS)
        .with_words(EPISODE_WORDS);
    let zone = engine.progress().update_scene_completion(
        profile_id,
        EPISODE_ZONE,
        EPISODE_SCENE,
        &completion,
    );
    info!(
        profile_id,
        stars,
        completed_scenes = zone.completed_scenes,
        "scene_completion_reported"
    );
    session.complete();
    Some(stars)
}
