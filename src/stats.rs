use crate::error::StoreError;
use crate::util::{accuracy_percent, average_accuracy};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const LOG_HEADER: [&str; 6] = [
    "timestamp",
    "exercise",
    "reps",
    "sets",
    "duration_min",
    "valid_reps",
];

/// A finished workout ready to be appended to a user's log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedWorkout {
    pub exercise: String,
    pub reps: u32,
    pub sets: u32,
    pub duration_min: f64,
    pub valid_reps: u32,
}

/// Where completed workouts go. Append-only.
pub trait WorkoutStore {
    fn record_workout(&mut self, username: &str, workout: &CompletedWorkout) -> Result<(), StoreError>;
}

/// In-memory store, handy for tests and dry runs.
impl WorkoutStore for Vec<(String, CompletedWorkout)> {
    fn record_workout(&mut self, username: &str, workout: &CompletedWorkout) -> Result<(), StoreError> {
        self.push((username.to_string(), workout.clone()));
        Ok(())
    }
}

/// One row of a user's log, kept as text so that a damaged row can be skipped
/// without losing the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub timestamp: String,
    pub exercise: String,
    pub reps: Option<String>,
    pub sets: Option<String>,
    pub duration_min: Option<String>,
    pub valid_reps: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TotalStats {
    pub total_workouts: usize,
    pub total_reps: u64,
    pub avg_accuracy: f64,
}

/// Per-user CSV files under a data directory.
#[derive(Debug, Clone)]
pub struct WorkoutLog {
    data_dir: PathBuf,
}

impl WorkoutLog {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn user_file(&self, username: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}_workouts.csv", username.to_lowercase()))
    }

    fn ensure_user_file(&self, username: &str) -> Result<PathBuf, StoreError> {
        let path = self.user_file(username);
        if !path.exists() {
            fs::create_dir_all(&self.data_dir)?;
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(LOG_HEADER)?;
            writer.flush()?;
        }
        Ok(path)
    }

    pub fn history(&self, username: &str) -> Result<Vec<HistoryRow>, StoreError> {
        let path = self.user_file(username);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(&path)?;
        let mut rows = Vec::new();
        for (line, row) in reader.deserialize::<HistoryRow>().enumerate() {
            match row {
                Ok(row) => rows.push(row),
                Err(e) => warn!(file = %path.display(), line = line + 2, error = %e, "skipping unreadable workout row"),
            }
        }
        Ok(rows)
    }

    /// Totals over a user's log. Rows with unparseable numbers are skipped and
    /// do not count as workouts.
    pub fn total_stats(&self, username: &str) -> Result<TotalStats, StoreError> {
        let history = self.history(username)?;

        let mut total_reps = 0u64;
        let mut accuracies = Vec::with_capacity(history.len());
        for row in &history {
            match row_totals(row) {
                Some((reps, valid)) => {
                    total_reps += u64::from(reps);
                    accuracies.push(accuracy_percent(valid, reps));
                }
                None => warn!(timestamp = %row.timestamp, "skipping invalid workout row"),
            }
        }

        Ok(TotalStats {
            total_workouts: accuracies.len(),
            total_reps,
            avg_accuracy: average_accuracy(&accuracies),
        })
    }
}

/// `(reps × sets, valid reps)` for one row, `None` if a number is malformed.
fn row_totals(row: &HistoryRow) -> Option<(u32, u32)> {
    fn field(value: &Option<String>, default: u32) -> Option<u32> {
        match value.as_deref().map(str::trim) {
            None => Some(default),
            Some(raw) => raw.parse().ok(),
        }
    }

    let reps = field(&row.reps, 0)?;
    let sets = field(&row.sets, 1)?;
    let total = reps.checked_mul(sets)?;
    let valid = field(&row.valid_reps, total)?;
    Some((total, valid))
}

impl WorkoutStore for WorkoutLog {
    fn record_workout(&mut self, username: &str, workout: &CompletedWorkout) -> Result<(), StoreError> {
        let path = self.ensure_user_file(username)?;
        let file = OpenOptions::new().append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record([
            Local::now().to_rfc3339(),
            workout.exercise.clone(),
            workout.reps.to_string(),
            workout.sets.to_string(),
            format!("{:.1}", workout.duration_min),
            workout.valid_reps.to_string(),
        ])?;
        writer.flush()?;

        info!(%username, exercise = %workout.exercise, file = %path.display(), "workout saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn workout(exercise: &str, reps: u32, sets: u32, valid_reps: u32) -> CompletedWorkout {
        CompletedWorkout {
            exercise: exercise.to_string(),
            reps,
            sets,
            duration_min: 4.5,
            valid_reps,
        }
    }

    #[test]
    fn record_creates_file_with_header() {
        let dir = tempdir().unwrap();
        let mut log = WorkoutLog::new(dir.path().join("user_data"));
        log.record_workout("John", &workout("Bicep Curl", 10, 3, 27))
            .unwrap();

        let path = log.user_file("John");
        assert!(path.ends_with("john_workouts.csv"));
        let contents = std::fs::read_to_string(path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("timestamp,exercise,reps,sets,duration_min,valid_reps"));
        assert!(lines.next().unwrap().ends_with(",Bicep Curl,10,3,4.5,27"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn history_is_empty_for_unknown_user() {
        let dir = tempdir().unwrap();
        let log = WorkoutLog::new(dir.path());
        assert!(log.history("nobody").unwrap().is_empty());
        assert_eq!(log.total_stats("nobody").unwrap(), TotalStats::default());
    }

    #[test]
    fn history_appends_in_order() {
        let dir = tempdir().unwrap();
        let mut log = WorkoutLog::new(dir.path());
        log.record_workout("Sarah", &workout("Bicep Curl", 10, 3, 30)).unwrap();
        log.record_workout("sarah", &workout("Lateral Raise", 8, 2, 12)).unwrap();

        let history = log.history("SARAH").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].exercise, "Bicep Curl");
        assert_eq!(history[1].exercise, "Lateral Raise");
        assert_eq!(history[1].duration_min.as_deref(), Some("4.5"));
    }

    #[test]
    fn total_stats_average_accuracy() {
        let dir = tempdir().unwrap();
        let mut log = WorkoutLog::new(dir.path());
        log.record_workout("john", &workout("Bicep Curl", 10, 3, 30)).unwrap();
        log.record_workout("john", &workout("Bicep Curl", 10, 2, 10)).unwrap();

        let stats = log.total_stats("john").unwrap();
        assert_eq!(stats.total_workouts, 2);
        assert_eq!(stats.total_reps, 50);
        assert_eq!(stats.avg_accuracy, 75.0);
    }

    #[test]
    fn total_stats_skips_invalid_rows_and_zero_rep_rows_count_as_full() {
        let dir = tempdir().unwrap();
        let log = WorkoutLog::new(dir.path());
        std::fs::write(
            log.user_file("ana"),
            "timestamp,exercise,reps,sets,duration_min,valid_reps\n\
             t1,Bicep Curl,10,3,4.0,15\n\
             t2,Bicep Curl,ten,3,4.0,15\n\
             t3,Lateral Raise,0,3,1.0,0\n\
             t4,Lateral Raise,5\n",
        )
        .unwrap();

        let stats = log.total_stats("ana").unwrap();
        // t2 is skipped; t4 defaults to one set with every rep valid
        assert_eq!(stats.total_workouts, 3);
        assert_eq!(stats.total_reps, 35);
        assert_eq!(stats.avg_accuracy, 83.3);
    }

    #[test]
    fn vec_store_collects_records() {
        let mut store: Vec<(String, CompletedWorkout)> = Vec::new();
        store.record_workout("John", &workout("Bicep Curl", 1, 1, 1)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store[0].0, "John");
    }
}
