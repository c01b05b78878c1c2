//! Synthetic forecast datasets with values that encode their origin, so
//! merged hypercubes can be checked cell by cell.

use chrono::{DateTime, Timelike, Utc};
use grib_batch::{Attrs, GridDataset, LevelCoord, Task};

/// Value the mock stores at `point` for a run hour and lead.
///
/// `hour * 10000 + lead * 100 + point`, exact in `f32` for any hour of day,
/// lead below 100 and point below 100.
pub fn cell_value(date: DateTime<Utc>, lead: u32, point: usize) -> f32 {
    (date.hour() * 10_000 + lead * 100) as f32 + point as f32
}

/// A single-run, single-lead dataset with one variable on `level`.
///
/// Values follow [`cell_value`] so a merged result can be verified.
pub fn create_task_dataset(
    task: &Task,
    variable: &str,
    level: &LevelCoord,
    points: usize,
    attrs: Attrs,
) -> GridDataset {
    let per_level: Vec<f32> = (0..points)
        .map(|p| cell_value(task.date, task.lead, p))
        .collect();
    let values = per_level.repeat(level.values.len());

    GridDataset::new(vec![task.date], vec![task.lead], level.clone(), points)
        .with_variable(variable, values, attrs)
        .expect("generated values match the dataset shape")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::run_time;

    #[test]
    fn test_cell_value_is_distinct() {
        let a = cell_value(run_time(6), 3, 1);
        let b = cell_value(run_time(6), 1, 3);
        assert_eq!(a, 60_301.0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_task_dataset_shape() {
        let task = Task::new(run_time(12), 6);
        let level = LevelCoord::new("isobaricInhPa", vec![500.0, 850.0]);
        let ds = create_task_dataset(&task, "t", &level, 3, Attrs::new());

        assert_eq!(ds.time(), &[run_time(12)]);
        assert_eq!(ds.step(), &[6]);
        assert_eq!(ds.cell_count(), 6);
        assert_eq!(ds.value("t", 0, 0, 1, 2), Some(120_602.0));
        assert_eq!(ds.type_of_level(), Some("isobaricInhPa"));
    }
}
