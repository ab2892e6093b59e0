use crate::catalog::ExerciseCatalog;
use crate::oled::OledSelection;
use crate::util::accuracy_percent;
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WorkoutStatus {
    #[default]
    Waiting,
    Ready,
    Active,
    Paused,
    Completed,
}

/// Workout parameters gathered before a start is confirmed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PendingConfig {
    pub exercise: Option<String>,
    pub reps: Option<u32>,
    pub sets: Option<u32>,
}

impl PendingConfig {
    /// Fills every missing field from `other`.
    pub fn or(self, other: PendingConfig) -> PendingConfig {
        PendingConfig {
            exercise: self.exercise.or(other.exercise),
            reps: self.reps.or(other.reps),
            sets: self.sets.or(other.sets),
        }
    }

    /// All three fields, if present and non-zero.
    fn complete(&self) -> Option<(&str, u32, u32)> {
        match (self.exercise.as_deref(), self.reps, self.sets) {
            (Some(exercise), Some(reps), Some(sets)) if !exercise.is_empty() && reps > 0 && sets > 0 => {
                Some((exercise, reps, sets))
            }
            _ => None,
        }
    }
}

impl From<&OledSelection> for PendingConfig {
    fn from(oled: &OledSelection) -> Self {
        Self {
            exercise: oled.exercise_id.map(|id| id.to_string()),
            reps: oled.reps,
            sets: oled.sets,
        }
    }
}

/// The live workout. Only the dispatch loop mutates it; the web side reads
/// clones of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkoutState {
    pub active: bool,
    pub status: WorkoutStatus,
    pub exercise_id: Option<String>,
    pub exercise_name: String,
    pub icon: String,
    pub calories_per_rep: f64,
    pub target_reps: u32,
    pub total_sets: u32,
    pub current_set: u32,
    pub current_reps: u32,
    /// Reps of the sets already finished.
    pub completed_reps: u32,
    pub total_calories: f64,
    pub valid_reps: u32,
    pub start_time: Option<DateTime<Local>>,
    pub pending: PendingConfig,
}

impl Default for WorkoutState {
    fn default() -> Self {
        Self {
            active: false,
            status: WorkoutStatus::Waiting,
            exercise_id: None,
            exercise_name: String::new(),
            icon: String::new(),
            calories_per_rep: 0.0,
            target_reps: 0,
            total_sets: 0,
            current_set: 1,
            current_reps: 0,
            completed_reps: 0,
            total_calories: 0.0,
            valid_reps: 0,
            start_time: None,
            pending: PendingConfig::default(),
        }
    }
}

impl WorkoutState {
    /// Starts a fresh workout, discarding everything about the previous one.
    /// Allowed from any state.
    pub fn start(
        &mut self,
        catalog: &ExerciseCatalog,
        exercise_id: &str,
        target_reps: u32,
        total_sets: u32,
        status: WorkoutStatus,
    ) {
        let exercise = catalog.resolve_or_placeholder(exercise_id);
        info!(
            exercise = %exercise.name,
            target_reps,
            total_sets,
            %status,
            "workout started"
        );

        *self = Self {
            active: true,
            status,
            exercise_id: Some(exercise.id),
            exercise_name: exercise.name,
            icon: exercise.icon,
            calories_per_rep: exercise.calories_per_rep,
            target_reps,
            total_sets,
            start_time: Some(Local::now()),
            ..Self::default()
        };
    }

    /// Remembers parameters for a later [`WorkoutState::confirm_start`].
    pub fn stage(&mut self, config: PendingConfig) {
        self.pending = config.or(std::mem::take(&mut self.pending));
    }

    /// Starts the workout from `incoming`, then the device selection, then
    /// whatever was staged. Returns `false` and changes nothing when the merged
    /// configuration is still incomplete.
    pub fn confirm_start(
        &mut self,
        catalog: &ExerciseCatalog,
        incoming: PendingConfig,
        oled: &OledSelection,
        status: WorkoutStatus,
    ) -> bool {
        let merged = incoming
            .or(PendingConfig::from(oled))
            .or(self.pending.clone());

        match merged.complete() {
            Some((exercise, reps, sets)) => {
                let exercise = exercise.to_string();
                self.start(catalog, &exercise, reps, sets, status);
                true
            }
            None => {
                info!(?merged, "start ignored, workout configuration incomplete");
                false
            }
        }
    }

    /// Overwrites the status of a running workout. A workout that is not
    /// running, completed ones included, only accepts `Completed`; anything
    /// else waits for the next start.
    pub fn set_status(&mut self, status: WorkoutStatus) {
        if status == WorkoutStatus::Completed {
            self.status = status;
            self.active = false;
            return;
        }
        if !self.active {
            debug!(current = %self.status, ignored = %status, "no workout running, status unchanged");
            return;
        }
        debug!(from = %self.status, to = %status, "workout status");
        self.status = status;
    }

    /// `count` is the rep number within the current set as reported by the MCU.
    pub fn record_rep(&mut self, count: u32, current_set: Option<u32>) {
        self.current_reps = count;
        if let Some(set) = current_set {
            self.current_set = set.max(1);
        }
        self.total_calories = f64::from(count) * self.calories_per_rep;
        if self.active && matches!(self.status, WorkoutStatus::Waiting | WorkoutStatus::Ready) {
            self.status = WorkoutStatus::Active;
        }
    }

    /// Overrides the rep-derived calories until the next rep arrives.
    pub fn record_calories(&mut self, kcal: f64) {
        self.total_calories = kcal.max(0.0);
    }

    pub fn complete_set(&mut self, set_number: u32, total_reps_in_set: u32) {
        info!(set = set_number, reps = total_reps_in_set, "set complete");
        self.current_set = set_number.saturating_add(1);
        self.current_reps = 0;
        self.completed_reps = self.completed_reps.saturating_add(total_reps_in_set);
    }

    pub fn complete(&mut self, valid_reps: Option<u32>) {
        if let Some(valid) = valid_reps {
            self.valid_reps = valid;
        }
        self.status = WorkoutStatus::Completed;
        self.active = false;
        info!(exercise = %self.exercise_name, valid_reps = self.valid_reps, "workout complete");
    }

    /// Aborts without marking the workout completed.
    pub fn cancel(&mut self) {
        if self.active {
            info!(exercise = %self.exercise_name, "workout cancelled");
        }
        self.active = false;
    }

    pub fn total_reps(&self) -> u32 {
        self.completed_reps.saturating_add(self.current_reps)
    }

    pub fn accuracy(&self) -> f64 {
        accuracy_percent(self.valid_reps, self.total_reps())
    }

    pub fn elapsed_secs(&self, now: DateTime<Local>) -> Option<i64> {
        self.start_time.map(|start| (now - start).num_seconds().max(0))
    }
}
