/// Share of `valid` reps out of `total`, as a percentage. No reps counts as 100%.
pub fn accuracy_percent(valid: u32, total: u32) -> f64 {
    if total == 0 {
        100.0
    } else {
        f64::from(valid) / f64::from(total) * 100.0
    }
}

/// Mean of per-workout accuracies rounded to one decimal, 0 with no workouts.
pub fn average_accuracy(accuracies: &[f64]) -> f64 {
    if accuracies.is_empty() {
        return 0.0;
    }
    let mean = accuracies.iter().sum::<f64>() / accuracies.len() as f64;
    (mean * 10.0).round() / 10.0
}
