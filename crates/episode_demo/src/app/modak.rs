use std::time::Duration;

use progress_engine::{
    RehydrationTable, SceneDefinition, ScenePhase, SceneSession, SceneSessionState, SceneTimers,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub(crate) const ROUNDS: u32 = 3;
pub(crate) const MODAKS_PER_ROUND: u32 = 3;
pub(crate) const CELEBRATION_STEPS: u32 = 3;
pub(crate) const CELEBRATION_STEP_INTERVAL: Duration = Duration::from_millis(400);
pub(crate) const ROUND_ADVANCE_PAUSE: Duration = Duration::from_millis(600);
const MAX_STARS: u32 = 3;
const TRAY_COMPONENT: &str = "tray";

/// Phases of the modak-offering scene. Each variant carries what that phase
/// needs to be rebuilt after a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub(crate) enum ModakPhase {
    Intro,
    Placing { round: u32, placed: u32 },
    /// `step` counts celebration steps already shown.
    Celebration { round: u32, step: u32 },
    Complete { stars: u32 },
}

impl ScenePhase for ModakPhase {
    fn tag(&self) -> &'static str {
        match self {
            Self::Intro => "intro",
            Self::Placing { .. } => "placing",
            Self::Celebration { .. } => "celebration",
            Self::Complete { .. } => "complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ModakStep {
    CelebrationStep { round: u32, step: u32 },
    AdvanceRound { next_round: u32 },
    ShowCompletion,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TrayState {
    mistakes: u32,
}

pub(crate) struct ModakScene;

impl SceneDefinition for ModakScene {
    type Phase = ModakPhase;
    type Continuation = ModakStep;

    fn initial_state(&self) -> SceneSessionState<ModakPhase> {
        SceneSessionState::new(ModakPhase::Intro)
    }

    fn rehydration_table(&self) -> RehydrationTable<ModakPhase, ModakStep> {
        RehydrationTable::new()
            .on("celebration", rehydrate_celebration)
            .on("complete", rehydrate_complete)
    }
}

pub(crate) type ModakSession = SceneSession<ModakPhase, ModakStep>;

/// Schedules the celebration steps not yet shown, then the round advance (or
/// the completion screen after the last round). Shared by the live path and
/// by reload rehydration so both arm identical continuations.
pub(crate) fn schedule_celebration(timers: &mut SceneTimers<ModakStep>, round: u32, shown: u32) {
    let mut delay = Duration::ZERO;
    for step in shown..CELEBRATION_STEPS {
        delay += CELEBRATION_STEP_INTERVAL;
        timers.schedule(delay, ModakStep::CelebrationStep { round, step });
    }
    delay += ROUND_ADVANCE_PAUSE;
    let after = if round >= ROUNDS {
        ModakStep::ShowCompletion
    } else {
        ModakStep::AdvanceRound {
            next_round: round + 1,
        }
    };
    timers.schedule(delay, after);
}

fn rehydrate_celebration(
    state: &mut SceneSessionState<ModakPhase>,
    timers: &mut SceneTimers<ModakStep>,
) {
    if let ModakPhase::Celebration { round, step } = state.phase {
        schedule_celebration(timers, round, step);
    }
}

// The completion screen comes back without its celebration; the mission
// flag was already consumed by the live path.
fn rehydrate_complete(
    state: &mut SceneSessionState<ModakPhase>,
    _timers: &mut SceneTimers<ModakStep>,
) {
    state.showing_completion_screen = true;
}

pub(crate) fn start(session: &mut ModakSession) {
    if session.state().phase != ModakPhase::Intro {
        return;
    }
    session.update_with(|state| state.phase = ModakPhase::Placing { round: 1, placed: 0 });
    info!(scene = %session.address(), "modak_scene_started");
}

pub(crate) fn place_modak(session: &mut ModakSession) {
    let ModakPhase::Placing { round, placed } = session.state().phase else {
        return;
    };
    let placed = placed + 1;
    if placed < MODAKS_PER_ROUND {
        session.update_with(|state| state.phase = ModakPhase::Placing { round, placed });
        return;
    }

    session.update_with(|state| {
        state.phase = ModakPhase::Celebration { round, step: 0 };
        state.one_shot.phase_just_completed = true;
    });
    schedule_celebration(session.timers_mut(), round, 0);
    info!(scene = %session.address(), round, "modak_round_completed");
}

pub(crate) fn miss_placement(session: &mut ModakSession) {
    if !matches!(session.state().phase, ModakPhase::Placing { .. }) {
        return;
    }
    session.update_with(|state| {
        let mut tray = tray_state(state);
        tray.mistakes += 1;
        if let Ok(value) = serde_json::to_value(tray) {
            state
                .sub_component_states
                .insert(TRAY_COMPONENT.to_string(), value);
        }
    });
}

pub(crate) fn apply_step(session: &mut ModakSession, step: ModakStep) {
    debug!(scene = %session.address(), ?step, "modak_step_fired");
    match step {
        ModakStep::CelebrationStep { round, step } => {
            session.update_with(|state| {
                state.phase = ModakPhase::Celebration {
                    round,
                    step: step + 1,
                }
            });
        }
        ModakStep::AdvanceRound { next_round } => {
            session.update_with(|state| {
                state.phase = ModakPhase::Placing {
                    round: next_round,
                    placed: 0,
                }
            });
        }
        ModakStep::ShowCompletion => {
            let stars = stars_for(session.state());
            session.update_with(|state| {
                state.phase = ModakPhase::Complete { stars };
                state.showing_completion_screen = true;
                state.one_shot.mission_just_completed = true;
            });
            info!(scene = %session.address(), stars, "modak_scene_completed");
        }
    }
}

pub(crate) fn stars_for(state: &SceneSessionState<ModakPhase>) -> u32 {
    MAX_STARS.saturating_sub(mistakes(state)).max(1)
}

pub(crate) fn mistakes(state: &SceneSessionState<ModakPhase>) -> u32 {
    tray_state(state).mistakes
}

fn tray_state(state: &SceneSessionState<ModakPhase>) -> TrayState {
    state
        .sub_component_states
        .get(TRAY_COMPONENT)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}
