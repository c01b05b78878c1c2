//! In-memory gridded dataset and its structural combine.
//!
//! A [`GridDataset`] holds one or more variables on shared `time`, `step`
//! and `level` axes over a flattened horizontal grid of `points`. Values are
//! stored row-major as `[time][step][level][point]`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MergeError;

/// Free-form metadata attached to datasets and variables.
pub type Attrs = BTreeMap<String, Value>;

/// Variable attribute naming the vertical level type.
pub const TYPE_OF_LEVEL_ATTR: &str = "GRIB_typeOfLevel";

/// The combinable axes of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Time,
    Step,
    Level,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::Time => "time",
            Axis::Step => "step",
            Axis::Level => "level",
        })
    }
}

/// Vertical coordinate: its type (e.g. "isobaricInhPa") and values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelCoord {
    pub type_of_level: String,
    pub values: Vec<f64>,
}

impl LevelCoord {
    pub fn new(type_of_level: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            type_of_level: type_of_level.into(),
            values,
        }
    }

    pub fn single(type_of_level: impl Into<String>, value: f64) -> Self {
        Self::new(type_of_level, vec![value])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataVariable {
    pub attrs: Attrs,
    pub values: Vec<f32>,
}

/// How attributes are reconciled when datasets are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CombineAttrs {
    /// Keep attributes that agree everywhere, drop the ones that differ.
    #[default]
    DropConflicts,
    /// Take the first dataset's attributes as-is.
    Override,
}

/// Gridded values for one vertical level type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDataset {
    time: Vec<DateTime<Utc>>,
    step: Vec<u32>,
    level: LevelCoord,
    points: usize,
    variables: BTreeMap<String, DataVariable>,
    attrs: Attrs,
    /// Singleton axes collapsed to scalar coordinates by `squeeze`
    scalar: BTreeSet<Axis>,
}

impl GridDataset {
    pub fn new(time: Vec<DateTime<Utc>>, step: Vec<u32>, level: LevelCoord, points: usize) -> Self {
        Self {
            time,
            step,
            level,
            points,
            variables: BTreeMap::new(),
            attrs: Attrs::new(),
            scalar: BTreeSet::new(),
        }
    }

    /// Add a variable; `values` must cover every cell of the dataset.
    ///
    /// The level type attribute is filled in from the level coordinate when
    /// the caller did not set one.
    pub fn with_variable(
        mut self,
        name: impl Into<String>,
        values: Vec<f32>,
        mut attrs: Attrs,
    ) -> Result<Self, MergeError> {
        let name = name.into();
        let expected = self.cell_count();
        if values.len() != expected {
            return Err(MergeError::Shape {
                name,
                expected,
                actual: values.len(),
            });
        }

        attrs
            .entry(TYPE_OF_LEVEL_ATTR.to_string())
            .or_insert_with(|| Value::String(self.level.type_of_level.clone()));
        self.variables.insert(name, DataVariable { attrs, values });
        Ok(self)
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn time(&self) -> &[DateTime<Utc>] {
        &self.time
    }

    pub fn step(&self) -> &[u32] {
        &self.step
    }

    pub fn level(&self) -> &LevelCoord {
        &self.level
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn variables(&self) -> &BTreeMap<String, DataVariable> {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&DataVariable> {
        self.variables.get(name)
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn axis_len(&self, axis: Axis) -> usize {
        match axis {
            Axis::Time => self.time.len(),
            Axis::Step => self.step.len(),
            Axis::Level => self.level.values.len(),
        }
    }

    pub fn is_scalar(&self, axis: Axis) -> bool {
        self.scalar.contains(&axis)
    }

    /// Named dimension sizes, scalar axes omitted.
    pub fn dims(&self) -> Vec<(String, usize)> {
        let mut dims: Vec<(String, usize)> = [Axis::Time, Axis::Step, Axis::Level]
            .into_iter()
            .filter(|axis| !self.is_scalar(*axis))
            .map(|axis| (axis.to_string(), self.axis_len(axis)))
            .collect();
        dims.push(("points".to_string(), self.points));
        dims
    }

    pub fn cell_count(&self) -> usize {
        self.time.len() * self.step.len() * self.level.values.len() * self.points
    }

    pub fn max_time(&self) -> Option<DateTime<Utc>> {
        self.time.iter().max().copied()
    }

    pub fn max_step(&self) -> Option<u32> {
        self.step.iter().max().copied()
    }

    /// Level type declared by the first variable.
    pub fn type_of_level(&self) -> Option<&str> {
        self.variables
            .values()
            .next()
            .and_then(|var| var.attrs.get(TYPE_OF_LEVEL_ATTR))
            .and_then(Value::as_str)
    }

    pub fn value(
        &self,
        variable: &str,
        time: usize,
        step: usize,
        level: usize,
        point: usize,
    ) -> Option<f32> {
        let (nt, ns, nl, np) = self.shape();
        if time >= nt || step >= ns || level >= nl || point >= np {
            return None;
        }
        let index = ((time * ns + step) * nl + level) * np + point;
        self.variables.get(variable)?.values.get(index).copied()
    }

    /// Collapse singleton axes into scalar coordinates.
    pub fn squeeze(mut self) -> Self {
        for axis in [Axis::Time, Axis::Step, Axis::Level] {
            if self.axis_len(axis) == 1 {
                self.scalar.insert(axis);
            }
        }
        self
    }

    /// A dataset shaped like this one at a single run time and lead, with
    /// every value missing.
    ///
    /// Attributes are copied so the filler never conflicts with the dataset
    /// it was modelled on.
    pub fn missing_like(&self, time: DateTime<Utc>, step: u32) -> GridDataset {
        let cells = self.level.values.len() * self.points;
        let variables = self
            .variables
            .iter()
            .map(|(name, var)| {
                let filler = DataVariable {
                    attrs: var.attrs.clone(),
                    values: vec![f32::NAN; cells],
                };
                (name.clone(), filler)
            })
            .collect();

        GridDataset {
            time: vec![time],
            step: vec![step],
            level: self.level.clone(),
            points: self.points,
            variables,
            attrs: self.attrs.clone(),
            scalar: BTreeSet::new(),
        }
    }

    /// Combine a 2D grid of datasets: each row along `step`, then the rows
    /// along `time`.
    pub fn combine_nested(
        grid: &[Vec<GridDataset>],
        attrs: CombineAttrs,
    ) -> Result<GridDataset, MergeError> {
        let rows = grid
            .iter()
            .map(|row| Self::concat(row, Axis::Step, attrs))
            .collect::<Result<Vec<_>, _>>()?;
        Self::concat(&rows, Axis::Time, attrs)
    }

    /// Concatenate datasets along one axis.
    pub fn concat(
        parts: &[GridDataset],
        axis: Axis,
        attrs: CombineAttrs,
    ) -> Result<GridDataset, MergeError> {
        let (first, rest) = parts.split_first().ok_or(MergeError::Empty)?;
        if rest.is_empty() {
            return Ok(first.clone());
        }
        for other in rest {
            first.check_compatible(other, axis)?;
        }

        let mut merged = first.clone();
        match axis {
            Axis::Time => merged.time = parts.iter().flat_map(|p| p.time.iter().copied()).collect(),
            Axis::Step => merged.step = parts.iter().flat_map(|p| p.step.iter().copied()).collect(),
            Axis::Level => {
                merged.level.values = parts
                    .iter()
                    .flat_map(|p| p.level.values.iter().copied())
                    .collect()
            }
        }
        merged.scalar.remove(&axis);

        for (name, var) in merged.variables.iter_mut() {
            let sources: Vec<(&GridDataset, &DataVariable)> = parts
                .iter()
                .filter_map(|p| p.variables.get(name).map(|v| (p, v)))
                .collect();

            let outer = first.outer_and_block(axis).0;
            let mut values = Vec::with_capacity(sources.iter().map(|(_, v)| v.values.len()).sum());
            for o in 0..outer {
                for (part, source) in &sources {
                    let block = part.outer_and_block(axis).1;
                    values.extend_from_slice(&source.values[o * block..(o + 1) * block]);
                }
            }
            var.values = values;
            var.attrs = merge_attrs(sources.iter().map(|(_, v)| &v.attrs), attrs)?;
        }

        merged.attrs = merge_attrs(parts.iter().map(|p| &p.attrs), attrs)?;
        Ok(merged)
    }

    fn shape(&self) -> (usize, usize, usize, usize) {
        (
            self.time.len(),
            self.step.len(),
            self.level.values.len(),
            self.points,
        )
    }

    /// Number of leading blocks before `axis`, and the size of each block.
    fn outer_and_block(&self, axis: Axis) -> (usize, usize) {
        let (nt, ns, nl, np) = self.shape();
        match axis {
            Axis::Time => (1, nt * ns * nl * np),
            Axis::Step => (nt, ns * nl * np),
            Axis::Level => (nt * ns, nl * np),
        }
    }

    fn check_compatible(&self, other: &GridDataset, axis: Axis) -> Result<(), MergeError> {
        let incompatible = |reason: String| MergeError::Incompatible { axis, reason };

        if !self.variables.keys().eq(other.variables.keys()) {
            return Err(incompatible(format!(
                "variables {:?} vs {:?}",
                self.variables.keys().collect::<Vec<_>>(),
                other.variables.keys().collect::<Vec<_>>()
            )));
        }
        if self.points != other.points {
            return Err(incompatible(format!(
                "grid sizes {} vs {}",
                self.points, other.points
            )));
        }
        if self.level.type_of_level != other.level.type_of_level {
            return Err(incompatible(format!(
                "level types '{}' vs '{}'",
                self.level.type_of_level, other.level.type_of_level
            )));
        }
        if axis != Axis::Time && self.time != other.time {
            return Err(incompatible("time coordinates differ".to_string()));
        }
        if axis != Axis::Step && self.step != other.step {
            return Err(incompatible(format!(
                "step coordinates {:?} vs {:?}",
                self.step, other.step
            )));
        }
        if axis != Axis::Level && self.level.values != other.level.values {
            return Err(incompatible(format!(
                "level values {:?} vs {:?}",
                self.level.values, other.level.values
            )));
        }
        Ok(())
    }
}

fn merge_attrs<'a>(
    sources: impl IntoIterator<Item = &'a Attrs>,
    mode: CombineAttrs,
) -> Result<Attrs, MergeError> {
    let mut sources = sources.into_iter();
    let Some(first) = sources.next() else {
        return Ok(Attrs::new());
    };

    match mode {
        CombineAttrs::Override => Ok(first.clone()),
        CombineAttrs::DropConflicts => {
            let mut merged = first.clone();
            let mut dropped = BTreeSet::new();
            for attrs in sources {
                for (key, value) in attrs {
                    if dropped.contains(key) {
                        continue;
                    }
                    let conflict = match merged.get(key) {
                        Some(existing) => Some(!attrs_equivalent(key, existing, value)?),
                        None => None,
                    };
                    match conflict {
                        Some(true) => {
                            merged.remove(key);
                            dropped.insert(key.clone());
                        }
                        Some(false) => {}
                        None => {
                            merged.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            Ok(merged)
        }
    }
}

/// Equality for attribute values; arrays of different length cannot be
/// compared element-wise.
fn attrs_equivalent(name: &str, a: &Value, b: &Value) -> Result<bool, MergeError> {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) if x.len() != y.len() => Err(MergeError::AttrCompare {
            name: name.to_string(),
            reason: format!(
                "shapes ({},) and ({},) cannot be broadcast",
                x.len(),
                y.len()
            ),
        }),
        _ => Ok(a == b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn run(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap()
    }

    /// One time, one step, surface level, values tagged by time and step.
    fn cell(hour: u32, step: u32, points: usize) -> GridDataset {
        let values = (0..points)
            .map(|p| (hour * 100 + step) as f32 + p as f32 / 10.0)
            .collect();
        GridDataset::new(vec![run(hour)], vec![step], LevelCoord::single("surface", 0.0), points)
            .with_variable("t2m", values, Attrs::new())
            .unwrap()
            .with_attr("GRIB_centre", "kwbc")
    }

    #[test]
    fn test_with_variable_checks_shape() {
        let err = GridDataset::new(vec![run(0)], vec![0], LevelCoord::single("surface", 0.0), 4)
            .with_variable("t2m", vec![1.0; 3], Attrs::new())
            .unwrap_err();
        assert_eq!(
            err,
            MergeError::Shape {
                name: "t2m".to_string(),
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn test_type_of_level_from_first_variable() {
        let ds = cell(0, 0, 2);
        assert_eq!(ds.type_of_level(), Some("surface"));

        let empty = GridDataset::new(vec![run(0)], vec![0], LevelCoord::single("surface", 0.0), 2);
        assert_eq!(empty.type_of_level(), None);
    }

    #[test]
    fn test_combine_nested_2x2() {
        let grid = vec![
            vec![cell(0, 0, 3), cell(0, 6, 3)],
            vec![cell(6, 0, 3), cell(6, 6, 3)],
        ];
        let merged = GridDataset::combine_nested(&grid, CombineAttrs::DropConflicts).unwrap();

        assert_eq!(merged.time(), &[run(0), run(6)]);
        assert_eq!(merged.step(), &[0, 6]);
        assert_eq!(merged.variable("t2m").unwrap().values.len(), 12);
        assert_eq!(merged.value("t2m", 0, 1, 0, 0), Some(6.0));
        assert_eq!(merged.value("t2m", 1, 0, 0, 2), Some(600.2));
        assert_eq!(merged.value("t2m", 1, 1, 0, 1), Some(606.1));
        assert_eq!(merged.value("t2m", 2, 0, 0, 0), None);
        assert_eq!(merged.attrs().get("GRIB_centre"), Some(&json!("kwbc")));
    }

    #[test]
    fn test_drop_conflicts_removes_differing_attrs() {
        let a = cell(0, 0, 1).with_attr("history", "a");
        let b = cell(0, 6, 1).with_attr("history", "b").with_attr("extra", 1);
        let merged = GridDataset::concat(&[a, b], Axis::Step, CombineAttrs::DropConflicts).unwrap();

        assert!(merged.attrs().get("history").is_none());
        assert_eq!(merged.attrs().get("extra"), Some(&json!(1)));
        assert_eq!(merged.attrs().get("GRIB_centre"), Some(&json!("kwbc")));
    }

    #[test]
    fn test_drop_conflicts_fails_on_uncomparable_arrays() {
        let a = cell(0, 0, 1).with_attr("bounds", json!([1, 2]));
        let b = cell(0, 6, 1).with_attr("bounds", json!([1, 2, 3]));
        let parts = [a, b];

        let err = GridDataset::concat(&parts, Axis::Step, CombineAttrs::DropConflicts).unwrap_err();
        assert!(matches!(err, MergeError::AttrCompare { .. }));

        let merged = GridDataset::concat(&parts, Axis::Step, CombineAttrs::Override).unwrap();
        assert_eq!(merged.attrs().get("bounds"), Some(&json!([1, 2])));
    }

    #[test]
    fn test_incompatible_variables() {
        let a = cell(0, 0, 2);
        let b = GridDataset::new(vec![run(0)], vec![6], LevelCoord::single("surface", 0.0), 2)
            .with_variable("gust", vec![0.0; 2], Attrs::new())
            .unwrap();
        let err = GridDataset::concat(&[a, b], Axis::Step, CombineAttrs::Override).unwrap_err();
        assert!(matches!(err, MergeError::Incompatible { axis: Axis::Step, .. }));
    }

    #[test]
    fn test_squeeze_and_dims() {
        let merged = GridDataset::combine_nested(
            &[vec![cell(0, 0, 4), cell(0, 3, 4)]],
            CombineAttrs::DropConflicts,
        )
        .unwrap()
        .squeeze();

        assert!(merged.is_scalar(Axis::Time));
        assert!(merged.is_scalar(Axis::Level));
        assert!(!merged.is_scalar(Axis::Step));
        assert_eq!(
            merged.dims(),
            vec![("step".to_string(), 2), ("points".to_string(), 4)]
        );
    }

    #[test]
    fn test_missing_like_matches_shape() {
        let ds = cell(0, 0, 3);
        let filler = ds.missing_like(run(6), 12);

        assert_eq!(filler.time(), &[run(6)]);
        assert_eq!(filler.step(), &[12]);
        assert_eq!(filler.cell_count(), ds.cell_count());
        assert!(filler.variable("t2m").unwrap().values.iter().all(|v| v.is_nan()));
        assert_eq!(filler.attrs(), ds.attrs());

        let merged =
            GridDataset::concat(&[ds, filler], Axis::Step, CombineAttrs::DropConflicts).unwrap();
        assert_eq!(merged.step(), &[0, 12]);
        assert_eq!(merged.attrs().get("GRIB_centre"), Some(&json!("kwbc")));
    }

    #[test]
    fn test_concat_empty() {
        assert_eq!(
            GridDataset::combine_nested(&[], CombineAttrs::DropConflicts).unwrap_err(),
            MergeError::Empty
        );
    }
}
