//! Line protocol spoken with the dumbbell MCU.
//!
//! Every message is a single UTF-8 line of `|`-separated fields whose first
//! field is the tag. Inbound lines are decoded once into [`McuMessage`];
//! outbound lines are built from [`HostMessage`].

use crate::error::DecodeError;
use itertools::Itertools;
use std::fmt;
use std::str::{FromStr, Split};

pub const UID_REQ: &str = "UID_REQ";
pub const CFG_EXERCISE: &str = "CFG_EXERCISE";
pub const CFG_REPS: &str = "CFG_REPS";
pub const CFG_SETS: &str = "CFG_SETS";
pub const WORKOUT_START: &str = "WORKOUT_START";
pub const WORKOUT_READY: &str = "WORKOUT_READY";
pub const WORKOUT_PAUSE: &str = "WORKOUT_PAUSE";
pub const WORKOUT_RESUME: &str = "WORKOUT_RESUME";
pub const WORKOUT_STOP: &str = "WORKOUT_STOP";
pub const WORKOUT_END: &str = "WORKOUT_END";
pub const REP_DETECT: &str = "REP_DETECT";
pub const SET_COMPLETE: &str = "SET_COMPLETE";
pub const WORKOUT_COMPLETE: &str = "WORKOUT_COMPLETE";
pub const RESULT: &str = "RESULT";
pub const CALORIES: &str = "CALORIES";
pub const HEARTBEAT: &str = "HEARTBEAT";
pub const PING: &str = "PING";
pub const ERROR: &str = "ERROR";

pub const USER_OK: &str = "USER_OK";
pub const USER_FAIL: &str = "USER_FAIL";
pub const WORKOUT_CANCEL: &str = "WORKOUT_CANCEL";
pub const PONG: &str = "PONG";

/// Final numbers the MCU reports once a workout is finished.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkoutSummary {
    pub exercise: String,
    pub reps: u32,
    pub sets: u32,
    pub duration_min: f64,
    pub valid_reps: u32,
}

/// A decoded MCU → host line.
#[derive(Debug, Clone, PartialEq)]
pub enum McuMessage {
    UidRequest {
        uid: String,
    },
    ConfigExercise {
        id: u32,
        name: Option<String>,
    },
    ConfigReps(u32),
    ConfigSets(u32),
    /// Any of the fields may be absent, in which case this is a confirmation
    /// of a configuration staged earlier.
    WorkoutStart {
        exercise: Option<String>,
        reps: Option<u32>,
        sets: Option<u32>,
        mcu_timestamp: Option<u64>,
    },
    WorkoutReady {
        mcu_timestamp: Option<u64>,
    },
    WorkoutPause {
        mcu_timestamp: Option<u64>,
    },
    WorkoutResume {
        mcu_timestamp: Option<u64>,
    },
    WorkoutStop {
        mcu_timestamp: Option<u64>,
    },
    WorkoutEnd {
        mcu_timestamp: Option<u64>,
    },
    RepDetect {
        rep: u32,
        set: Option<u32>,
        mcu_timestamp: Option<u64>,
    },
    SetComplete {
        set: u32,
        total_reps: u32,
        mcu_timestamp: Option<u64>,
    },
    WorkoutComplete(WorkoutSummary),
    Calories(f64),
    Heartbeat {
        mcu_timestamp: Option<u64>,
    },
    Ping,
    Error {
        code: String,
        message: String,
    },
}

impl McuMessage {
    pub fn parse(line: &str) -> Result<Self, DecodeError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(DecodeError::Empty);
        }

        let mut parts = line.split('|');
        let raw_tag = parts.next().unwrap_or_default().trim();

        let message = match raw_tag {
            UID_REQ => {
                let mut f = Fields::new(UID_REQ, parts);
                McuMessage::UidRequest {
                    uid: f.required_str("uid")?.to_string(),
                }
            }
            CFG_EXERCISE => {
                let mut f = Fields::new(CFG_EXERCISE, parts);
                McuMessage::ConfigExercise {
                    id: f.required("id")?,
                    name: f.optional_str().map(str::to_string),
                }
            }
            CFG_REPS => McuMessage::ConfigReps(Fields::new(CFG_REPS, parts).required("reps")?),
            CFG_SETS => McuMessage::ConfigSets(Fields::new(CFG_SETS, parts).required("sets")?),
            WORKOUT_START => {
                let mut f = Fields::new(WORKOUT_START, parts);
                McuMessage::WorkoutStart {
                    exercise: f.optional_str().map(str::to_string),
                    reps: f.optional("reps")?,
                    sets: f.optional("sets")?,
                    mcu_timestamp: f.optional("mcuTimestamp")?,
                }
            }
            WORKOUT_READY => McuMessage::WorkoutReady {
                mcu_timestamp: Fields::new(WORKOUT_READY, parts).optional("mcuTimestamp")?,
            },
            WORKOUT_PAUSE => McuMessage::WorkoutPause {
                mcu_timestamp: Fields::new(WORKOUT_PAUSE, parts).optional("mcuTimestamp")?,
            },
            WORKOUT_RESUME => McuMessage::WorkoutResume {
                mcu_timestamp: Fields::new(WORKOUT_RESUME, parts).optional("mcuTimestamp")?,
            },
            WORKOUT_STOP => McuMessage::WorkoutStop {
                mcu_timestamp: Fields::new(WORKOUT_STOP, parts).optional("mcuTimestamp")?,
            },
            WORKOUT_END => McuMessage::WorkoutEnd {
                mcu_timestamp: Fields::new(WORKOUT_END, parts).optional("mcuTimestamp")?,
            },
            REP_DETECT => {
                let mut f = Fields::new(REP_DETECT, parts);
                McuMessage::RepDetect {
                    rep: f.required("repNum")?,
                    set: f.optional("setNum")?,
                    mcu_timestamp: f.optional("mcuTimestamp")?,
                }
            }
            SET_COMPLETE => {
                let mut f = Fields::new(SET_COMPLETE, parts);
                McuMessage::SetComplete {
                    set: f.required("setNum")?,
                    total_reps: f.required("totalReps")?,
                    mcu_timestamp: f.optional("mcuTimestamp")?,
                }
            }
            WORKOUT_COMPLETE => {
                McuMessage::WorkoutComplete(Fields::new(WORKOUT_COMPLETE, parts).summary()?)
            }
            RESULT => McuMessage::WorkoutComplete(Fields::new(RESULT, parts).summary()?),
            CALORIES => McuMessage::Calories(Fields::new(CALORIES, parts).required("kcal")?),
            HEARTBEAT => McuMessage::Heartbeat {
                mcu_timestamp: Fields::new(HEARTBEAT, parts).optional("mcuTimestamp")?,
            },
            PING => McuMessage::Ping,
            ERROR => {
                let mut f = Fields::new(ERROR, parts);
                McuMessage::Error {
                    code: f.required_str("code")?.to_string(),
                    message: f.rest(),
                }
            }
            other => return Err(DecodeError::UnknownTag(other.to_string())),
        };

        Ok(message)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            McuMessage::UidRequest { .. } => UID_REQ,
            McuMessage::ConfigExercise { .. } => CFG_EXERCISE,
            McuMessage::ConfigReps(_) => CFG_REPS,
            McuMessage::ConfigSets(_) => CFG_SETS,
            McuMessage::WorkoutStart { .. } => WORKOUT_START,
            McuMessage::WorkoutReady { .. } => WORKOUT_READY,
            McuMessage::WorkoutPause { .. } => WORKOUT_PAUSE,
            McuMessage::WorkoutResume { .. } => WORKOUT_RESUME,
            McuMessage::WorkoutStop { .. } => WORKOUT_STOP,
            McuMessage::WorkoutEnd { .. } => WORKOUT_END,
            McuMessage::RepDetect { .. } => REP_DETECT,
            McuMessage::SetComplete { .. } => SET_COMPLETE,
            McuMessage::WorkoutComplete(_) => WORKOUT_COMPLETE,
            McuMessage::Calories(_) => CALORIES,
            McuMessage::Heartbeat { .. } => HEARTBEAT,
            McuMessage::Ping => PING,
            McuMessage::Error { .. } => ERROR,
        }
    }
}

impl FromStr for McuMessage {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        McuMessage::parse(s)
    }
}

/// Cursor over the payload fields of one message. Blank fields count as absent.
struct Fields<'a> {
    tag: &'static str,
    parts: Split<'a, char>,
}

impl<'a> Fields<'a> {
    fn new(tag: &'static str, parts: Split<'a, char>) -> Self {
        Self { tag, parts }
    }

    fn optional_str(&mut self) -> Option<&'a str> {
        self.parts.next().map(str::trim).filter(|s| !s.is_empty())
    }

    fn required_str(&mut self, field: &'static str) -> Result<&'a str, DecodeError> {
        self.optional_str().ok_or(DecodeError::MissingField {
            tag: self.tag,
            field,
        })
    }

    fn optional<T: FromStr>(&mut self, field: &'static str) -> Result<Option<T>, DecodeError> {
        match self.optional_str() {
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|_| DecodeError::InvalidNumber {
                    tag: self.tag,
                    field,
                    value: raw.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn required<T: FromStr>(&mut self, field: &'static str) -> Result<T, DecodeError> {
        self.optional(field)?.ok_or(DecodeError::MissingField {
            tag: self.tag,
            field,
        })
    }

    fn rest(&mut self) -> String {
        self.parts.by_ref().join("|").trim().to_string()
    }

    fn summary(&mut self) -> Result<WorkoutSummary, DecodeError> {
        Ok(WorkoutSummary {
            exercise: self.required_str("exercise")?.to_string(),
            reps: self.required("reps")?,
            sets: self.required("sets")?,
            duration_min: self.required("durationMinutes")?,
            valid_reps: self.required("validReps")?,
        })
    }
}

/// A host → MCU line.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    UserOk { username: String },
    UserFail,
    WorkoutStart { exercise: String, reps: u32, sets: u32 },
    WorkoutCancel,
    Pong { epoch_ms: i64 },
}

impl fmt::Display for HostMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostMessage::UserOk { username } => write!(f, "{USER_OK}|{username}"),
            HostMessage::UserFail => f.write_str(USER_FAIL),
            HostMessage::WorkoutStart {
                exercise,
                reps,
                sets,
            } => write!(f, "{WORKOUT_START}|{exercise}|{reps}|{sets}"),
            HostMessage::WorkoutCancel => f.write_str(WORKOUT_CANCEL),
            HostMessage::Pong { epoch_ms } => write!(f, "{PONG}|{epoch_ms}"),
        }
    }
}
