//! Groups opened datasets by vertical level and merges each group into a
//! single (time x step) hypercube.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::dataset::{Axis, CombineAttrs, GridDataset, TYPE_OF_LEVEL_ATTR};
use crate::error::{BatchError, MergeError, Result};
use crate::handle::OpenResult;

/// Level type plus level values; datasets with equal keys are merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HypercubeKey {
    pub type_of_level: String,
    pub level_values: String,
}

impl HypercubeKey {
    pub fn of(ds: &GridDataset) -> Result<Self> {
        let type_of_level = ds.type_of_level().ok_or_else(|| {
            BatchError::UnsupportedResult(format!(
                "dataset has no '{TYPE_OF_LEVEL_ATTR}' attribute on its first variable"
            ))
        })?;

        let level_values = match ds.level().values.as_slice() {
            [value] => format!("{value}"),
            values => format!("{values:?}"),
        };

        Ok(Self {
            type_of_level: type_of_level.to_string(),
            level_values,
        })
    }
}

impl fmt::Display for HypercubeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.type_of_level, self.level_values)
    }
}

/// Flatten open results into one list of datasets.
pub fn flatten_open_results(results: Vec<OpenResult>) -> Result<Vec<GridDataset>> {
    let mut datasets = Vec::new();
    for result in results {
        match result {
            OpenResult::Single(ds) => {
                debug!("Single hypercube found");
                datasets.push(ds);
            }
            OpenResult::Multiple(list) if list.is_empty() => {
                return Err(BatchError::UnsupportedResult(
                    "open returned an empty dataset list".to_string(),
                ));
            }
            OpenResult::Multiple(list) => {
                debug!(count = list.len(), "Multiple hypercubes found");
                datasets.extend(list);
            }
        }
    }
    Ok(datasets)
}

/// Group datasets by [`HypercubeKey`], keeping groups in first-seen order.
pub fn group_hypercubes(datasets: Vec<GridDataset>) -> Result<Vec<(HypercubeKey, Vec<GridDataset>)>> {
    let mut groups: Vec<(HypercubeKey, Vec<GridDataset>)> = Vec::new();
    let mut index: HashMap<HypercubeKey, usize> = HashMap::new();

    for ds in datasets {
        let key = HypercubeKey::of(&ds)?;
        match index.get(&key) {
            Some(&i) => groups[i].1.push(ds),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![ds]));
            }
        }
    }
    Ok(groups)
}

/// Merge one hypercube group.
///
/// Members are placed on a (run time x lead) grid built from the union of
/// their coordinates, so a file that is absent or failed to open leaves a
/// NaN-filled cell instead of a ragged row. The grid is then combined along
/// `[time, step]`. A combine that fails while dropping conflicting
/// attributes is retried once with the first member's attributes.
pub fn merge_hypercube(key: &HypercubeKey, members: Vec<GridDataset>) -> Result<GridDataset> {
    let merge_error = |source: MergeError| BatchError::Merge {
        key: key.to_string(),
        source,
    };

    let mut times: Vec<DateTime<Utc>> = members
        .iter()
        .flat_map(|ds| ds.time().iter().copied())
        .collect();
    times.sort();
    times.dedup();
    let mut steps: Vec<u32> = members
        .iter()
        .flat_map(|ds| ds.step().iter().copied())
        .collect();
    steps.sort_unstable();
    steps.dedup();

    let mut cells: Vec<Vec<Option<GridDataset>>> = vec![vec![None; steps.len()]; times.len()];
    for ds in members {
        let (time, step) = match (ds.time(), ds.step()) {
            ([time], [step]) => (*time, *step),
            (time, step) => {
                return Err(merge_error(MergeError::Incompatible {
                    axis: Axis::Time,
                    reason: format!(
                        "expected one run time and lead per dataset, got {} x {}",
                        time.len(),
                        step.len()
                    ),
                }))
            }
        };
        let row = times.binary_search(&time).unwrap_or_default();
        let column = steps.binary_search(&step).unwrap_or_default();

        let slot = &mut cells[row][column];
        if slot.is_none() {
            *slot = Some(ds);
        } else if slot.as_ref() == Some(&ds) {
            debug!(hypercube = %key, %time, step, "Skipping duplicate dataset");
        } else {
            return Err(merge_error(MergeError::Incompatible {
                axis: Axis::Step,
                reason: format!("two different datasets for run {time} lead {step}"),
            }));
        }
    }

    let Some(template) = cells.iter().flatten().flatten().next().cloned() else {
        return Err(merge_error(MergeError::Empty));
    };
    let mut filled = 0usize;
    let grid: Vec<Vec<GridDataset>> = cells
        .into_iter()
        .zip(&times)
        .map(|(row, time)| {
            row.into_iter()
                .zip(&steps)
                .map(|(cell, step)| {
                    cell.unwrap_or_else(|| {
                        filled += 1;
                        template.missing_like(*time, *step)
                    })
                })
                .collect()
        })
        .collect();

    if filled > 0 {
        warn!(hypercube = %key, cells = filled, "Filling absent cells with NaN");
    }
    debug!(
        hypercube = %key,
        rows = times.len(),
        columns = steps.len(),
        "Combining hypercube"
    );

    let merged = match GridDataset::combine_nested(&grid, CombineAttrs::DropConflicts) {
        Ok(ds) => ds,
        Err(e) => {
            warn!(
                hypercube = %key,
                error = %e,
                "Combine with conflict dropping failed, retrying without it"
            );
            GridDataset::combine_nested(&grid, CombineAttrs::Override).map_err(merge_error)?
        }
    };

    Ok(merged.squeeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Attrs, LevelCoord};
    use chrono::TimeZone;
    use serde_json::json;

    fn run(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap()
    }

    fn member(hour: u32, step: u32, level: LevelCoord, var: &str) -> GridDataset {
        let cells = level.values.len() * 2;
        GridDataset::new(vec![run(hour)], vec![step], level, 2)
            .with_variable(var, vec![(hour + step) as f32; cells], Attrs::new())
            .unwrap()
    }

    #[test]
    fn test_key_display() {
        let ds = member(0, 0, LevelCoord::single("heightAboveGround", 2.0), "t2m");
        assert_eq!(HypercubeKey::of(&ds).unwrap().to_string(), "heightAboveGround_2");

        let ds = member(0, 0, LevelCoord::new("isobaricInhPa", vec![500.0, 850.0]), "t");
        assert_eq!(
            HypercubeKey::of(&ds).unwrap().to_string(),
            "isobaricInhPa_[500.0, 850.0]"
        );
    }

    #[test]
    fn test_flatten_rejects_empty_multiple() {
        let err = flatten_open_results(vec![OpenResult::Multiple(Vec::new())]).unwrap_err();
        assert!(matches!(err, BatchError::UnsupportedResult(_)));
    }

    #[test]
    fn test_group_keeps_first_seen_order() {
        let surface = LevelCoord::single("surface", 0.0);
        let agl = LevelCoord::single("heightAboveGround", 2.0);
        let groups = group_hypercubes(vec![
            member(0, 0, agl.clone(), "t2m"),
            member(0, 0, surface.clone(), "gust"),
            member(0, 6, agl, "t2m"),
        ])
        .unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.type_of_level, "heightAboveGround");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].1.len(), 1);
    }

    #[test]
    fn test_merge_sorts_completion_order() {
        let level = LevelCoord::single("surface", 0.0);
        let key = HypercubeKey::of(&member(0, 0, level.clone(), "gust")).unwrap();
        let shuffled = vec![
            member(6, 3, level.clone(), "gust"),
            member(0, 3, level.clone(), "gust"),
            member(6, 0, level.clone(), "gust"),
            member(0, 0, level, "gust"),
        ];

        let merged = merge_hypercube(&key, shuffled).unwrap();
        assert_eq!(merged.time(), &[run(0), run(6)]);
        assert_eq!(merged.step(), &[0, 3]);
        assert_eq!(merged.value("gust", 1, 1, 0, 0), Some(9.0));
        assert!(merged.is_scalar(Axis::Level));
    }

    #[test]
    fn test_merge_retries_without_conflict_dropping() {
        let level = LevelCoord::single("surface", 0.0);
        let a = member(0, 0, level.clone(), "gust").with_attr("bounds", json!([0, 1]));
        let b = member(0, 6, level, "gust").with_attr("bounds", json!([0, 1, 2]));
        let key = HypercubeKey::of(&a).unwrap();

        let merged = merge_hypercube(&key, vec![b, a]).unwrap();
        assert_eq!(merged.step(), &[0, 6]);
        assert_eq!(merged.attrs().get("bounds"), Some(&json!([0, 1])));
    }

    #[test]
    fn test_merge_reports_structural_failure() {
        let level = LevelCoord::single("surface", 0.0);
        let key = HypercubeKey::of(&member(0, 0, level.clone(), "gust")).unwrap();
        let err = merge_hypercube(
            &key,
            vec![member(0, 0, level.clone(), "gust"), member(0, 6, level, "cape")],
        )
        .unwrap_err();
        assert!(matches!(err, BatchError::Merge { .. }));
    }

    #[test]
    fn test_merge_fills_absent_cell_with_nan() {
        let level = LevelCoord::new("isobaricInhPa", vec![500.0, 850.0]);
        let key = HypercubeKey::of(&member(0, 0, level.clone(), "t")).unwrap();
        let merged = merge_hypercube(
            &key,
            vec![
                member(6, 0, level.clone(), "t"),
                member(0, 6, level.clone(), "t"),
                member(0, 0, level, "t"),
            ],
        )
        .unwrap();

        assert_eq!(merged.time(), &[run(0), run(6)]);
        assert_eq!(merged.step(), &[0, 6]);
        assert_eq!(merged.value("t", 1, 0, 1, 1), Some(6.0));
        assert!(merged.value("t", 1, 1, 0, 0).unwrap().is_nan());
        assert!(merged.value("t", 1, 1, 1, 1).unwrap().is_nan());
        assert_eq!(merged.type_of_level(), Some("isobaricInhPa"));
    }

    #[test]
    fn test_merge_rejects_multi_time_members() {
        let level = LevelCoord::single("surface", 0.0);
        let wide = GridDataset::new(vec![run(0), run(6)], vec![0], level.clone(), 1)
            .with_variable("gust", vec![1.0, 2.0], Attrs::new())
            .unwrap();
        let key = HypercubeKey::of(&wide).unwrap();
        let err = merge_hypercube(&key, vec![wide, member(12, 0, level, "gust")]).unwrap_err();
        assert!(matches!(err, BatchError::Merge { .. }));
    }
}
