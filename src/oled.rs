use serde::Serialize;

/// Choices made on the dumbbell's own display that have not been confirmed yet.
/// Lets the web page show the same pending configuration as the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OledSelection {
    pub exercise_id: Option<u32>,
    pub exercise_name: Option<String>,
    pub reps: Option<u32>,
    pub sets: Option<u32>,
}

impl OledSelection {
    pub fn select_exercise(&mut self, id: u32, name: Option<String>) {
        self.exercise_id = Some(id);
        self.exercise_name = name;
    }

    pub fn select_reps(&mut self, reps: u32) {
        self.reps = Some(reps);
    }

    pub fn select_sets(&mut self, sets: u32) {
        self.sets = Some(sets);
    }

    pub fn is_empty(&self) -> bool {
        self.exercise_id.is_none() && self.reps.is_none() && self.sets.is_none()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
