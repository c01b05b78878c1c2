//! The unit of concurrent work: one (run date, forecast lead) pair.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One (date, lead) unit of resolution work.
///
/// `date_index` and `lead_index` record where the task sits on the caller's
/// date and lead axes, so tabular reshapes can place it exactly even when the
/// axes are unsorted or contain duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    /// Model run/reference time
    pub date: DateTime<Utc>,
    /// Forecast lead in hours
    pub lead: u32,
    pub date_index: usize,
    pub lead_index: usize,
}

impl Task {
    pub fn new(date: DateTime<Utc>, lead: u32) -> Self {
        Self {
            date,
            lead,
            date_index: 0,
            lead_index: 0,
        }
    }

    /// Full cross product, dates outer and leads inner.
    pub fn cross_product(dates: &[DateTime<Utc>], leads: &[u32]) -> Vec<Task> {
        let mut tasks = Vec::with_capacity(dates.len() * leads.len());
        for (date_index, date) in dates.iter().enumerate() {
            for (lead_index, lead) in leads.iter().enumerate() {
                tasks.push(Task {
                    date: *date,
                    lead: *lead,
                    date_index,
                    lead_index,
                });
            }
        }
        tasks
    }

    /// Reference time plus the forecast lead.
    pub fn valid_time(&self) -> DateTime<Utc> {
        self.date + Duration::hours(self.lead as i64)
    }

    /// Canonical ordering key: date, then lead, then axis position.
    pub(crate) fn sort_key(&self) -> (DateTime<Utc>, u32, usize, usize) {
        (self.date, self.lead, self.date_index, self.lead_index)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} F{:02}", self.date.format("%Y-%m-%d %H:%M"), self.lead)
    }
}
