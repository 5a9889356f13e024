//! `allowed-times`: promote only inside UTC day/hour windows
//!
//! Attributes look like
//! `{"windows": [{"days": "Monday-Friday", "hours": "9-17"}]}`. Days accept
//! full or short names, hours are 0-23, both take comma separated values and
//! inclusive ranges that may wrap (`Friday-Monday`, `22-2`). A missing field
//! matches everything.

use super::ConstraintEvaluator;
use crate::clock::{Clock, SystemClock};
use crate::error::ConstraintError;
use async_trait::async_trait;
use chrono::{Datelike, Timelike, Weekday};
use reconcile_types::{DeliveryArtifact, DeliveryConfig};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct AllowedTimesAttributes {
    windows: Vec<WindowAttributes>,
}

#[derive(Debug, Deserialize)]
struct WindowAttributes {
    #[serde(default)]
    days: Option<String>,
    #[serde(default)]
    hours: Option<String>,
}

/// A parsed deployment window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    days: BTreeSet<u32>,
    hours: BTreeSet<u32>,
}

impl TimeWindow {
    pub fn parse(days: Option<&str>, hours: Option<&str>) -> Result<Self, String> {
        Ok(Self {
            days: days.map(parse_days).transpose()?.unwrap_or_default(),
            hours: hours.map(parse_hours).transpose()?.unwrap_or_default(),
        })
    }

    pub fn contains(&self, weekday: Weekday, hour: u32) -> bool {
        (self.days.is_empty() || self.days.contains(&weekday.num_days_from_monday()))
            && (self.hours.is_empty() || self.hours.contains(&hour))
    }
}

fn parse_days(spec: &str) -> Result<BTreeSet<u32>, String> {
    let day = |s: &str| {
        s.trim()
            .parse::<Weekday>()
            .map(|d| d.num_days_from_monday())
            .map_err(|_| format!("unknown day '{}'", s.trim()))
    };
    parse_ranges(spec, 7, day)
}

fn parse_hours(spec: &str) -> Result<BTreeSet<u32>, String> {
    let hour = |s: &str| match s.trim().parse::<u32>() {
        Ok(h) if h < 24 => Ok(h),
        _ => Err(format!("invalid hour '{}'", s.trim())),
    };
    parse_ranges(spec, 24, hour)
}

/// Expand comma separated values and inclusive, possibly wrapping, ranges
/// over a cycle of `modulus` values
fn parse_ranges(
    spec: &str,
    modulus: u32,
    parse: impl Fn(&str) -> Result<u32, String>,
) -> Result<BTreeSet<u32>, String> {
    let mut values = BTreeSet::new();
    for part in spec.split(',').filter(|p| !p.trim().is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse(start)?, parse(end)?);
                let mut value = start;
                loop {
                    values.insert(value);
                    if value == end {
                        break;
                    }
                    value = (value + 1) % modulus;
                }
            }
            None => {
                values.insert(parse(part)?);
            }
        }
    }
    Ok(values)
}

/// Allows promotion only while the clock is inside one of the windows
pub struct AllowedTimesConstraintEvaluator {
    clock: Arc<dyn Clock>,
}

impl Default for AllowedTimesConstraintEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl AllowedTimesConstraintEvaluator {
    pub const CONSTRAINT_TYPE: &'static str = "allowed-times";

    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn invalid(reason: String) -> ConstraintError {
        ConstraintError::Invalid {
            constraint_type: Self::CONSTRAINT_TYPE.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl ConstraintEvaluator for AllowedTimesConstraintEvaluator {
    fn supported_type(&self) -> &str {
        Self::CONSTRAINT_TYPE
    }

    async fn can_promote(
        &self,
        _artifact: &DeliveryArtifact,
        _version: &str,
        delivery_config: &DeliveryConfig,
        environment_name: &str,
    ) -> Result<bool, ConstraintError> {
        let Some(environment) = delivery_config.environment(environment_name) else {
            return Ok(false);
        };

        let now = self.clock.now();
        for constraint in environment.constraints_of_type(Self::CONSTRAINT_TYPE) {
            let attributes: AllowedTimesAttributes =
                constraint
                    .attributes_as()
                    .map_err(|source| ConstraintError::InvalidAttributes {
                        constraint_type: Self::CONSTRAINT_TYPE.to_string(),
                        source,
                    })?;

            let mut inside = false;
            for window in &attributes.windows {
                let window = TimeWindow::parse(window.days.as_deref(), window.hours.as_deref())
                    .map_err(Self::invalid)?;
                if window.contains(now.weekday(), now.hour()) {
                    inside = true;
                    break;
                }
            }
            if !inside {
                return Ok(false);
            }
        }

        Ok(true)
    }
}
