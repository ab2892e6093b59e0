use crate::error::{DecodeError, TransportError};
use crate::protocol::{HostMessage, McuMessage};
use crate::session::SessionContext;
use crate::stats::WorkoutStore;
use crate::transport::SerialTransport;
use crate::workout::{PendingConfig, WorkoutStatus};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Outgoing side of the link as the dispatcher sees it.
pub trait Outbox {
    /// Queue for paced delivery. Never blocks.
    fn enqueue(&self, message: &HostMessage);
    /// Write right away and wait `wait_after` before returning.
    fn send_now(&self, message: &HostMessage, wait_after: Duration) -> Result<(), TransportError>;
}

impl Outbox for SerialTransport {
    fn enqueue(&self, message: &HostMessage) {
        self.enqueue_send(&message.to_string());
    }

    fn send_now(&self, message: &HostMessage, wait_after: Duration) -> Result<(), TransportError> {
        self.send_blocking(&message.to_string(), wait_after)
    }
}

impl<T: Outbox + ?Sized> Outbox for &T {
    fn enqueue(&self, message: &HostMessage) {
        (**self).enqueue(message);
    }

    fn send_now(&self, message: &HostMessage, wait_after: Duration) -> Result<(), TransportError> {
        (**self).send_now(message, wait_after)
    }
}

pub const DEFAULT_PONG_SETTLE: Duration = Duration::from_millis(300);

/// Decodes MCU lines and applies them to the session. Also the entry point
/// for requests coming from the web side.
#[derive(Debug)]
pub struct Dispatcher<S: WorkoutStore, O: Outbox> {
    session: SessionContext<S>,
    outbox: O,
    pong_settle: Duration,
}

impl<S: WorkoutStore, O: Outbox> Dispatcher<S, O> {
    pub fn new(session: SessionContext<S>, outbox: O) -> Self {
        Self {
            session,
            outbox,
            pong_settle: DEFAULT_PONG_SETTLE,
        }
    }

    pub fn with_pong_settle(mut self, pong_settle: Duration) -> Self {
        self.pong_settle = pong_settle;
        self
    }

    pub fn session(&self) -> &SessionContext<S> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionContext<S> {
        &mut self.session
    }

    pub fn outbox(&self) -> &O {
        &self.outbox
    }

    /// Handles one received line. A line that fails to decode is logged and
    /// dropped; the error is returned only for the caller's information.
    pub fn handle_line(&mut self, line: &str) -> Result<(), DecodeError> {
        debug!(%line, "mcu message");
        match McuMessage::parse(line) {
            Ok(message) => {
                self.apply(message);
                Ok(())
            }
            Err(DecodeError::Empty) => Err(DecodeError::Empty),
            Err(e) => {
                warn!(%line, error = %e, "dropping malformed mcu message");
                Err(e)
            }
        }
    }

    pub fn apply(&mut self, message: McuMessage) {
        match message {
            McuMessage::UidRequest { uid } => {
                let reply = match self.session.login(&uid) {
                    Some(username) => HostMessage::UserOk { username },
                    None => {
                        info!(%uid, "invalid card");
                        HostMessage::UserFail
                    }
                };
                self.outbox.enqueue(&reply);
            }
            McuMessage::ConfigExercise { id, name } => {
                let name = name.or_else(|| {
                    self.session
                        .catalog()
                        .resolve(&id.to_string())
                        .map(|e| e.name.clone())
                });
                self.session.oled_mut().select_exercise(id, name);
            }
            McuMessage::ConfigReps(reps) => self.session.oled_mut().select_reps(reps),
            McuMessage::ConfigSets(sets) => self.session.oled_mut().select_sets(sets),
            McuMessage::WorkoutStart {
                exercise: Some(exercise),
                reps: Some(reps),
                sets: Some(sets),
                ..
            } => self.session.start(&exercise, reps, sets, WorkoutStatus::Active),
            McuMessage::WorkoutStart {
                exercise,
                reps,
                sets,
                ..
            } => {
                self.session
                    .confirm_start(PendingConfig { exercise, reps, sets }, WorkoutStatus::Active);
            }
            McuMessage::WorkoutReady { .. } => {
                self.session.workout_mut().set_status(WorkoutStatus::Ready);
            }
            McuMessage::WorkoutPause { .. } => {
                self.session.workout_mut().set_status(WorkoutStatus::Paused);
            }
            McuMessage::WorkoutResume { .. } => {
                self.session.workout_mut().set_status(WorkoutStatus::Active);
            }
            McuMessage::WorkoutStop { .. } => self.session.cancel(),
            McuMessage::WorkoutEnd { .. } => self.session.complete(None),
            McuMessage::RepDetect { rep, set, .. } => {
                self.session.workout_mut().record_rep(rep, set);
            }
            McuMessage::SetComplete {
                set, total_reps, ..
            } => self.session.workout_mut().complete_set(set, total_reps),
            McuMessage::WorkoutComplete(summary) => self.session.complete(Some(&summary)),
            McuMessage::Calories(kcal) => self.session.workout_mut().record_calories(kcal),
            McuMessage::Heartbeat { mcu_timestamp } => trace!(?mcu_timestamp, "heartbeat"),
            McuMessage::Ping => {
                let pong = HostMessage::Pong {
                    epoch_ms: Utc::now().timestamp_millis(),
                };
                if let Err(e) = self.outbox.send_now(&pong, self.pong_settle) {
                    warn!(error = %e, "failed to answer ping");
                }
            }
            McuMessage::Error { code, message } => warn!(%code, %message, "mcu reported error"),
        }
    }

    /// Web-side start. Behaves like an MCU `WORKOUT_START` and tells the MCU
    /// about it; the workout waits for the device to begin counting.
    pub fn start_workout(&mut self, exercise: &str, reps: u32, sets: u32) {
        self.session.start(exercise, reps, sets, WorkoutStatus::Waiting);

        let catalog = self.session.catalog();
        let exercise = catalog
            .resolve(exercise)
            .and_then(|e| catalog.index_of(&e.id))
            .map(|index| index.to_string())
            .unwrap_or_else(|| exercise.trim().to_string());
        self.outbox
            .enqueue(&HostMessage::WorkoutStart { exercise, reps, sets });
    }

    /// Web-side partial selection. Nothing is sent; the values fill in
    /// whatever the device selection lacks when the MCU confirms a start.
    pub fn stage_workout(&mut self, config: PendingConfig) {
        info!(?config, "workout staged");
        self.session.stage(config);
    }

    /// Web-side abort.
    pub fn cancel_workout(&mut self) {
        self.session.cancel();
        self.outbox.enqueue(&HostMessage::WorkoutCancel);
    }

    pub fn logout(&mut self) {
        self.session.logout();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ExerciseCatalog;
    use crate::rfid::UserDirectory;
    use crate::stats::CompletedWorkout;
    use assert_matches::assert_matches;
    use std::cell::RefCell;

    #[derive(Debug, Default)]
    struct RecordingOutbox {
        queued: RefCell<Vec<String>>,
        immediate: RefCell<Vec<(String, Duration)>>,
    }

    impl Outbox for RecordingOutbox {
        fn enqueue(&self, message: &HostMessage) {
            self.queued.borrow_mut().push(message.to_string());
        }

        fn send_now(&self, message: &HostMessage, wait_after: Duration) -> Result<(), TransportError> {
            self.immediate
                .borrow_mut()
                .push((message.to_string(), wait_after));
            Ok(())
        }
    }

    type Records = Vec<(String, CompletedWorkout)>;

    fn dispatcher() -> Dispatcher<Records, RecordingOutbox> {
        let session = SessionContext::new(
            ExerciseCatalog::builtin(),
            UserDirectory::new([("7D133721", "John"), ("00000000", "Sarah")]),
            Vec::new(),
        );
        Dispatcher::new(session, RecordingOutbox::default())
    }

    #[test]
    fn uid_request_replies_with_login_result() {
        let mut d = dispatcher();
        d.handle_line("UID_REQ|7D 13 37 21").unwrap();
        d.handle_line("UID_REQ|11 22 33 44").unwrap();
        assert_eq!(
            *d.outbox().queued.borrow(),
            vec!["USER_OK|John".to_string(), "USER_FAIL".to_string()]
        );
        assert_eq!(d.session().current_user(), Some("John"));
    }

    #[test]
    fn config_messages_touch_only_the_oled_mirror() {
        let mut d = dispatcher();
        let before = d.session().workout_snapshot();
        d.handle_line("CFG_EXERCISE|2").unwrap();
        d.handle_line("CFG_REPS|12").unwrap();
        d.handle_line("CFG_SETS|4").unwrap();

        let oled = d.session().oled();
        assert_eq!(oled.exercise_id, Some(2));
        assert_eq!(oled.exercise_name.as_deref(), Some("Lateral Raise"));
        assert_eq!((oled.reps, oled.sets), (Some(12), Some(4)));
        assert_eq!(d.session().workout_snapshot(), before);
    }

    #[test]
    fn bare_start_confirms_oled_selection() {
        let mut d = dispatcher();
        d.handle_line("WORKOUT_START").unwrap();
        assert!(!d.session().workout().active);

        d.handle_line("CFG_EXERCISE|0|Bicep Curl").unwrap();
        d.handle_line("CFG_REPS|10").unwrap();
        d.handle_line("CFG_SETS|3").unwrap();
        d.handle_line("WORKOUT_START").unwrap();

        let w = d.session().workout();
        assert!(w.active);
        assert_eq!(w.status, WorkoutStatus::Active);
        assert_eq!(w.exercise_name, "Bicep Curl");
        assert!(d.session().oled().is_empty());
    }

    #[test]
    fn lifecycle_tags_drive_status() {
        let mut d = dispatcher();
        d.handle_line("WORKOUT_START|0|10|3|1000").unwrap();
        d.handle_line("WORKOUT_PAUSE|1100").unwrap();
        assert_eq!(d.session().workout().status, WorkoutStatus::Paused);
        d.handle_line("WORKOUT_RESUME|1200").unwrap();
        assert_eq!(d.session().workout().status, WorkoutStatus::Active);
        d.handle_line("WORKOUT_STOP|1300").unwrap();
        assert!(!d.session().workout().active);
        assert_ne!(d.session().workout().status, WorkoutStatus::Completed);

        d.handle_line("WORKOUT_START|0|10|3").unwrap();
        d.handle_line("WORKOUT_READY").unwrap();
        assert_eq!(d.session().workout().status, WorkoutStatus::Ready);
        d.handle_line("WORKOUT_END|1400").unwrap();
        assert_eq!(d.session().workout().status, WorkoutStatus::Completed);
        assert!(d.session().store().is_empty());
    }

    #[test]
    fn late_lifecycle_tags_do_not_reopen_a_finished_workout() {
        let mut d = dispatcher();
        d.handle_line("WORKOUT_START|1|10|3").unwrap();
        d.handle_line("WORKOUT_END|1").unwrap();
        for line in ["WORKOUT_RESUME|2", "WORKOUT_PAUSE|3", "WORKOUT_READY|4"] {
            d.handle_line(line).unwrap();
            let w = d.session().workout();
            assert_eq!(w.status, WorkoutStatus::Completed, "after {line}");
            assert!(!w.active);
        }

        d.handle_line("WORKOUT_START|1|10|3").unwrap();
        d.handle_line("WORKOUT_PAUSE|5").unwrap();
        assert_eq!(d.session().workout().status, WorkoutStatus::Paused);
    }

    #[test]
    fn web_staged_values_complete_the_device_selection() {
        let mut d = dispatcher();
        d.stage_workout(PendingConfig {
            exercise: Some("bicep_curl".into()),
            reps: Some(15),
            sets: None,
        });
        assert!(d.outbox().queued.borrow().is_empty());

        d.handle_line("CFG_EXERCISE|2").unwrap();
        d.handle_line("CFG_SETS|2").unwrap();
        d.handle_line("WORKOUT_START").unwrap();

        let w = d.session().workout();
        assert!(w.active);
        assert_eq!(w.exercise_name, "Lateral Raise");
        assert_eq!((w.target_reps, w.total_sets), (15, 2));
        assert_eq!(w.pending, PendingConfig::default());
        assert!(d.session().oled().is_empty());
    }

    #[test]
    fn progress_messages_update_counters() {
        let mut d = dispatcher();
        d.handle_line("WORKOUT_START|2|10|3").unwrap();
        for rep in 1..=4 {
            d.handle_line(&format!("REP_DETECT|{rep}|1")).unwrap();
        }
        let w = d.session().workout();
        assert_eq!(w.current_reps, 4);
        assert!((w.total_calories - 2.4).abs() < 1e-9);

        d.handle_line("SET_COMPLETE|1|10").unwrap();
        let w = d.session().workout();
        assert_eq!((w.current_set, w.current_reps), (2, 0));

        d.handle_line("CALORIES|7.5").unwrap();
        assert_eq!(d.session().workout().total_calories, 7.5);
    }

    #[test]
    fn malformed_lines_are_dropped_without_side_effects() {
        let mut d = dispatcher();
        d.handle_line("WORKOUT_START|0|10|3").unwrap();
        d.handle_line("REP_DETECT|2|1").unwrap();
        let before = d.session().workout_snapshot();

        assert_matches!(d.handle_line("REP_DETECT|abc"), Err(DecodeError::InvalidNumber { .. }));
        assert_matches!(d.handle_line("SET_COMPLETE|1"), Err(DecodeError::MissingField { .. }));
        assert_matches!(d.handle_line("BOGUS|1|2"), Err(DecodeError::UnknownTag(_)));
        assert_matches!(d.handle_line(""), Err(DecodeError::Empty));
        assert_eq!(d.session().workout_snapshot(), before);

        d.handle_line("REP_DETECT|3|1").unwrap();
        assert_eq!(d.session().workout().current_reps, 3);
    }

    #[test]
    fn ping_is_answered_immediately() {
        let mut d = dispatcher().with_pong_settle(Duration::from_millis(5));
        d.handle_line("PING").unwrap();
        let immediate = d.outbox().immediate.borrow();
        assert_eq!(immediate.len(), 1);
        assert!(immediate[0].0.starts_with("PONG|"));
        assert!(immediate[0].0["PONG|".len()..].parse::<i64>().is_ok());
        assert_eq!(immediate[0].1, Duration::from_millis(5));
        assert!(d.outbox().queued.borrow().is_empty());
    }

    #[test]
    fn heartbeat_and_error_change_nothing() {
        let mut d = dispatcher();
        let before = d.session().workout_snapshot();
        d.handle_line("HEARTBEAT|123").unwrap();
        d.handle_line("ERROR|E1|accelerometer missing").unwrap();
        assert_eq!(d.session().workout_snapshot(), before);
        assert!(d.outbox().queued.borrow().is_empty());
    }

    #[test]
    fn web_start_notifies_mcu_with_catalog_position() {
        let mut d = dispatcher();
        d.start_workout("shoulder_press", 10, 3);
        let w = d.session().workout();
        assert!(w.active);
        assert_eq!(w.status, WorkoutStatus::Waiting);
        assert_eq!(
            *d.outbox().queued.borrow(),
            vec!["WORKOUT_START|1|10|3".to_string()]
        );

        d.cancel_workout();
        assert!(!d.session().workout().active);
        assert_eq!(d.outbox().queued.borrow().last().unwrap(), "WORKOUT_CANCEL");
    }

    #[test]
    fn web_start_matches_mcu_start() {
        let mut web = dispatcher();
        web.start_workout("1", 10, 3);
        let mut mcu = dispatcher();
        mcu.handle_line("WORKOUT_START|1|10|3").unwrap();

        let mut a = web.session().workout_snapshot();
        let b = mcu.session().workout_snapshot();
        a.status = b.status;
        a.start_time = b.start_time;
        assert_eq!(a, b);
    }
}
