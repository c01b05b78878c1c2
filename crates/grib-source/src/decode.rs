//! GRIB2 decoding and assembly into per-level-type datasets.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use grib_batch::{Attrs, GridDataset, HandleError, InventoryRow, LevelCoord, OpenResult, Task};
use serde_json::json;
use tracing::debug;

use crate::levels::parse_level;

/// Decode every submessage of a GRIB2 file into its values, in file order.
pub fn decode_messages(path: &Path) -> Result<Vec<Vec<f32>>, HandleError> {
    let reader = BufReader::new(File::open(path)?);
    let grib2 = grib::from_reader(reader)
        .map_err(|e| HandleError::Decode(format!("{}: {}", path.display(), e)))?;

    let mut messages = Vec::new();
    for ((message, submessage), submsg) in grib2.iter() {
        let decoder = grib::Grib2SubmessageDecoder::from(submsg).map_err(|e| {
            HandleError::Decode(format!("message {message}.{submessage}: {e}"))
        })?;
        let values: Vec<f32> = decoder
            .dispatch()
            .map_err(|e| HandleError::Decode(format!("message {message}.{submessage}: {e}")))?
            .collect();
        messages.push(values);
    }

    debug!(path = %path.display(), messages = messages.len(), "Decoded GRIB2 file");
    Ok(messages)
}

/// Values decoded for one level type, before they become a dataset.
struct LevelGroup {
    type_of_level: String,
    level_values: Vec<f64>,
    /// (variable, level value, values)
    fields: Vec<(String, f64, Vec<f32>)>,
    points: usize,
}

/// Pair decoded messages with their inventory rows and build one dataset
/// per level type, in first-seen order.
///
/// Each variable is laid out over every level of its group; levels a
/// variable was not published on are NaN.
pub fn assemble_datasets(
    task: &Task,
    rows: &[InventoryRow],
    messages: Vec<Vec<f32>>,
    attrs: &Attrs,
) -> Result<OpenResult, HandleError> {
    if rows.len() != messages.len() {
        return Err(HandleError::Decode(format!(
            "{} inventory rows but {} decoded messages",
            rows.len(),
            messages.len()
        )));
    }

    let mut groups: Vec<LevelGroup> = Vec::new();
    for (row, values) in rows.iter().zip(messages) {
        let level = parse_level(&row.level);
        let index = match groups
            .iter()
            .position(|g| g.type_of_level == level.type_of_level)
        {
            Some(index) => index,
            None => {
                groups.push(LevelGroup {
                    type_of_level: level.type_of_level.clone(),
                    level_values: Vec::new(),
                    fields: Vec::new(),
                    points: values.len(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[index];

        if values.len() != group.points {
            return Err(HandleError::Decode(format!(
                "{} on '{}' has {} points, expected {}",
                row.variable,
                row.level,
                values.len(),
                group.points
            )));
        }
        if !group.level_values.contains(&level.value) {
            group.level_values.push(level.value);
        }
        if group
            .fields
            .iter()
            .any(|(name, value, _)| *name == row.variable && *value == level.value)
        {
            debug!(variable = %row.variable, level = %row.level, "Skipping duplicate message");
            continue;
        }
        group.fields.push((row.variable.clone(), level.value, values));
    }

    let mut datasets = groups
        .into_iter()
        .map(|group| group_to_dataset(task, group, attrs))
        .collect::<Result<Vec<_>, _>>()?;

    match datasets.len() {
        0 => Err(HandleError::Decode("file contains no messages".to_string())),
        1 => Ok(OpenResult::Single(datasets.remove(0))),
        _ => Ok(OpenResult::Multiple(datasets)),
    }
}

fn group_to_dataset(
    task: &Task,
    group: LevelGroup,
    attrs: &Attrs,
) -> Result<GridDataset, HandleError> {
    let levels = group.level_values.len();
    let points = group.points;

    let mut variables: Vec<(String, Vec<f32>)> = Vec::new();
    for (name, level_value, values) in group.fields {
        let level_index = group
            .level_values
            .iter()
            .position(|v| *v == level_value)
            .unwrap_or(0);
        let slot = match variables.iter().position(|(n, _)| *n == name) {
            Some(slot) => slot,
            None => {
                variables.push((name, vec![f32::NAN; levels * points]));
                variables.len() - 1
            }
        };
        let start = level_index * points;
        variables[slot].1[start..start + points].copy_from_slice(&values);
    }

    let level = LevelCoord::new(group.type_of_level, group.level_values);
    let mut ds = GridDataset::new(vec![task.date], vec![task.lead], level, points);
    for (name, values) in variables {
        let mut var_attrs = Attrs::new();
        var_attrs.insert("GRIB_shortName".to_string(), json!(name));
        ds = ds
            .with_variable(name, values, var_attrs)
            .map_err(|e| HandleError::Decode(e.to_string()))?;
    }
    for (key, value) in attrs {
        ds = ds.with_attr(key.clone(), value.clone());
    }
    Ok(ds)
}
