use crate::catalog::ExerciseCatalog;
use crate::oled::OledSelection;
use crate::protocol::WorkoutSummary;
use crate::rfid::{RfidSession, UserDirectory};
use crate::stats::{CompletedWorkout, WorkoutStore};
use crate::workout::{PendingConfig, WorkoutState, WorkoutStatus};
use tracing::{error, warn};

/// Everything the host knows about the person at the dumbbell: who is logged
/// in, the live workout, and the pending device-side selection. Owned by the
/// dispatch loop; the web side only gets snapshots.
#[derive(Debug)]
pub struct SessionContext<S: WorkoutStore> {
    catalog: ExerciseCatalog,
    rfid: RfidSession,
    workout: WorkoutState,
    oled: OledSelection,
    store: S,
}

impl<S: WorkoutStore> SessionContext<S> {
    pub fn new(catalog: ExerciseCatalog, directory: UserDirectory, store: S) -> Self {
        Self {
            catalog,
            rfid: RfidSession::new(directory),
            workout: WorkoutState::default(),
            oled: OledSelection::default(),
            store,
        }
    }

    pub fn catalog(&self) -> &ExerciseCatalog {
        &self.catalog
    }

    pub fn workout(&self) -> &WorkoutState {
        &self.workout
    }

    pub fn oled(&self) -> &OledSelection {
        &self.oled
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn current_user(&self) -> Option<&str> {
        self.rfid.current_user()
    }

    pub fn workout_snapshot(&self) -> WorkoutState {
        self.workout.clone()
    }

    pub fn oled_snapshot(&self) -> OledSelection {
        self.oled.clone()
    }

    pub fn login(&mut self, raw_uid: &str) -> Option<String> {
        self.rfid.login(raw_uid)
    }

    pub fn logout(&mut self) {
        self.rfid.logout();
        self.oled.clear();
    }

    pub fn oled_mut(&mut self) -> &mut OledSelection {
        &mut self.oled
    }

    pub fn workout_mut(&mut self) -> &mut WorkoutState {
        &mut self.workout
    }

    pub fn start(&mut self, exercise: &str, reps: u32, sets: u32, status: WorkoutStatus) {
        self.workout.start(&self.catalog, exercise, reps, sets, status);
        self.oled.clear();
    }

    /// Keeps a partial configuration from the web side for the next
    /// [`SessionContext::confirm_start`].
    pub fn stage(&mut self, config: PendingConfig) {
        self.workout.stage(config);
    }

    /// Starts from whatever configuration has been gathered so far.
    pub fn confirm_start(&mut self, incoming: PendingConfig, status: WorkoutStatus) -> bool {
        let started = self
            .workout
            .confirm_start(&self.catalog, incoming, &self.oled, status);
        if started {
            self.oled.clear();
        }
        started
    }

    /// Finishes the workout. A summary is written to the current user's log
    /// before the call returns.
    pub fn complete(&mut self, summary: Option<&WorkoutSummary>) {
        self.workout.complete(summary.map(|s| s.valid_reps));

        let Some(summary) = summary else {
            return;
        };
        let Some(username) = self.rfid.current_user() else {
            warn!(exercise = %summary.exercise, "workout finished with nobody logged in, not saved");
            return;
        };

        let exercise = self
            .catalog
            .resolve(&summary.exercise)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| summary.exercise.clone());
        let record = CompletedWorkout {
            exercise,
            reps: summary.reps,
            sets: summary.sets,
            duration_min: summary.duration_min,
            valid_reps: summary.valid_reps,
        };
        if let Err(e) = self.store.record_workout(username, &record) {
            error!(%username, error = %e, "failed to save workout");
        }
    }

    pub fn cancel(&mut self) {
        self.workout.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Records = Vec<(String, CompletedWorkout)>;

    fn session() -> SessionContext<Records> {
        SessionContext::new(
            ExerciseCatalog::builtin(),
            UserDirectory::new([("7D133721", "John")]),
            Vec::new(),
        )
    }

    fn summary(exercise: &str) -> WorkoutSummary {
        WorkoutSummary {
            exercise: exercise.into(),
            reps: 10,
            sets: 3,
            duration_min: 4.5,
            valid_reps: 27,
        }
    }

    #[test]
    fn complete_with_summary_saves_catalog_name() {
        let mut s = session();
        s.login("7D 13 37 21");
        s.start("1", 10, 3, WorkoutStatus::Active);
        s.complete(Some(&summary("shoulder_press")));

        assert_eq!(s.workout().status, WorkoutStatus::Completed);
        assert!(!s.workout().active);
        assert_eq!(s.store().len(), 1);
        let (user, record) = &s.store()[0];
        assert_eq!(user, "John");
        assert_eq!(record.exercise, "Seated Shoulder Press");
        assert_eq!((record.reps, record.sets, record.valid_reps), (10, 3, 27));
    }

    #[test]
    fn complete_without_user_or_summary_saves_nothing() {
        let mut s = session();
        s.start("0", 10, 3, WorkoutStatus::Active);
        s.complete(Some(&summary("bicep_curl")));
        assert!(s.store().is_empty());

        s.login("7D133721");
        s.start("0", 10, 3, WorkoutStatus::Active);
        s.complete(None);
        assert!(s.store().is_empty());
        assert_eq!(s.workout().status, WorkoutStatus::Completed);
    }

    #[test]
    fn unknown_summary_exercise_is_saved_verbatim() {
        let mut s = session();
        s.login("7D133721");
        s.complete(Some(&summary("kettlebell_swing")));
        assert_eq!(s.store()[0].1.exercise, "kettlebell_swing");
    }

    #[test]
    fn logout_clears_pending_selection() {
        let mut s = session();
        s.login("7D133721");
        s.oled_mut().select_reps(10);
        s.logout();
        assert_eq!(s.current_user(), None);
        assert!(s.oled().is_empty());
    }

    #[test]
    fn confirmed_start_consumes_selection() {
        let mut s = session();
        s.oled_mut().select_exercise(0, Some("Bicep Curl".into()));
        s.oled_mut().select_reps(10);
        assert!(!s.confirm_start(PendingConfig::default(), WorkoutStatus::Active));
        assert_eq!(s.oled().reps, Some(10));

        s.oled_mut().select_sets(3);
        assert!(s.confirm_start(PendingConfig::default(), WorkoutStatus::Active));
        assert!(s.oled().is_empty());
        assert_eq!(s.workout().exercise_name, "Bicep Curl");
    }

    #[test]
    fn snapshots_are_detached_copies() {
        let mut s = session();
        s.start("2", 8, 2, WorkoutStatus::Active);
        let before = s.workout_snapshot();
        s.workout_mut().record_rep(3, Some(1));
        assert_eq!(before.current_reps, 0);
        assert_eq!(s.workout_snapshot().current_reps, 3);
    }
}
