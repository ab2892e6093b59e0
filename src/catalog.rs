use include_dir::{include_dir, Dir};
use serde::{Deserialize, Serialize};

static ASSETS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/assets");

/// A single exercise the dumbbell knows how to count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub calories_per_rep: f64,
}

impl Exercise {
    /// Stand-in for ids the catalog does not know, so a transition never aborts on a miss.
    pub fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: "Unknown Exercise".to_string(),
            icon: "❓".to_string(),
            calories_per_rep: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogFile {
    exercises: Vec<Exercise>,
}

/// Ordered, read-only set of exercises.
///
/// The MCU refers to exercises by their position in this list (`0`, `1`, ...)
/// while the web side and the workout log use the string id (`bicep_curl`).
/// Both forms resolve through [`ExerciseCatalog::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseCatalog {
    exercises: Vec<Exercise>,
}

impl ExerciseCatalog {
    pub fn new(exercises: Vec<Exercise>) -> Self {
        Self { exercises }
    }

    /// Catalog compiled into the binary from `assets/exercises.json`.
    pub fn builtin() -> Self {
        let file = ASSETS_DIR
            .get_file("exercises.json")
            .expect("Exercise catalog not found");
        let contents = file
            .contents_utf8()
            .expect("Unable to interpret exercise catalog as a string");
        Self::from_json(contents).expect("Unable to deserialize exercise catalog json")
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Ok(Self::new(file.exercises))
    }

    pub fn exercises(&self) -> &[Exercise] {
        &self.exercises
    }

    pub fn len(&self) -> usize {
        self.exercises.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exercises.is_empty()
    }

    /// Looks up an exercise by its catalog position or by its string id.
    pub fn resolve(&self, id: &str) -> Option<&Exercise> {
        let id = id.trim();
        if let Ok(index) = id.parse::<usize>() {
            return self.exercises.get(index);
        }
        self.exercises
            .iter()
            .find(|e| e.id.eq_ignore_ascii_case(id))
    }

    pub fn resolve_or_placeholder(&self, id: &str) -> Exercise {
        self.resolve(id)
            .cloned()
            .unwrap_or_else(|| Exercise::placeholder(id.trim()))
    }

    /// Position of the exercise with the given string id, as the MCU numbers them.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.exercises
            .iter()
            .position(|e| e.id.eq_ignore_ascii_case(id))
    }
}

impl Default for ExerciseCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
