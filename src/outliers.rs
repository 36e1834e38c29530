//! Outlier detection on scalar metric values.
//!
//! Values are grouped by a configurable set of facets. Within each group, bounds are computed
//! with the interquartile range (IQR) method on the per-model (`source_id`) means, so that every
//! model carries equal weight regardless of its ensemble size. Groups without enough models fall
//! back to the IQR of the raw values. Non-finite values are always outliers.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use ndarray::Array1;
use ndarray_stats::{interpolate::Linear, Quantile1dExt};
use noisy_float::types::{n64, N64};
use tracing::{event, Level};
use validator::{Validate, ValidationError};

use crate::models::{AnnotatedScalarValue, DetectOutliers, DetectionSummary, ScalarValue};

/// Outlier detection parameters.
#[derive(Clone, Debug, PartialEq, Validate)]
#[validate(schema(function = "validate_outlier_config"))]
pub struct OutlierConfig {
    /// Multiplier applied to the IQR to obtain the bounds
    pub factor: f64,
    /// Minimum number of models, or of raw values in the fallback, needed to compute bounds
    #[validate(range(min = 1, message = "min_group_size must be at least 1"))]
    pub min_group_size: usize,
    /// Dimensions that values are grouped by
    #[validate(length(min = 1, message = "group_by must name at least one dimension"))]
    pub group_by: Vec<String>,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        OutlierConfig {
            factor: 3.0,
            min_group_size: 4,
            group_by: vec!["statistic".to_string(), "metric".to_string()],
        }
    }
}

fn validate_outlier_config(config: &OutlierConfig) -> Result<(), ValidationError> {
    if !config.factor.is_finite() || config.factor < 0.0 {
        return Err(ValidationError::new(
            "factor must be a finite, non-negative number",
        ));
    }
    Ok(())
}

/// Inclusive outlier bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    /// Compute `[Q1 - factor * IQR, Q3 + factor * IQR]` for a sample.
    ///
    /// Returns `None` for an empty sample.
    pub fn from_sample(sample: &[f64], factor: f64) -> Option<Self> {
        let (q1, q3) = quartiles(sample)?;
        let iqr = q3 - q1;
        Some(Bounds {
            lower: q1 - factor * iqr,
            upper: q3 + factor * iqr,
        })
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// First and third quartiles of a sample using the inclusive method.
///
/// Quantile `q` is linearly interpolated at position `q * (n - 1)` of the sorted sample.
/// Returns `None` if the sample is empty or contains a non-finite value.
pub fn quartiles(sample: &[f64]) -> Option<(f64, f64)> {
    let mut array = sample
        .iter()
        .map(|value| N64::try_new(*value))
        .collect::<Option<Array1<N64>>>()?;
    let q1 = array.quantile_mut(n64(0.25), &Linear).ok()?;
    let q3 = array.quantile_mut(n64(0.75), &Linear).ok()?;
    Some((q1.raw(), q3.raw()))
}

/// Bounds from the means of each non-Reference model in a group.
///
/// Returns `None` when the group has fewer than `min_group_size` models. Every model counts
/// towards that threshold, but only finite values contribute to the means.
fn source_bounds(group: &[&ScalarValue], config: &OutlierConfig) -> Option<Bounds> {
    let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for value in group {
        let Some(source_id) = value.source_id() else {
            continue;
        };
        if value.is_reference() {
            continue;
        }
        let (sum, count) = sums.entry(source_id).or_insert((0.0, 0));
        if value.value.is_finite() {
            *sum += value.value;
            *count += 1;
        }
    }
    if sums.len() < config.min_group_size {
        return None;
    }
    let means: Vec<f64> = sums
        .values()
        .filter(|(_, count)| *count > 0)
        .map(|(sum, count)| sum / *count as f64)
        .collect();
    Bounds::from_sample(&means, config.factor)
}

/// Bounds from the raw values of a group.
///
/// Returns `None` when fewer than `min_group_size` values are given. Non-finite values count
/// towards that threshold but are left out of the quartiles.
fn raw_bounds<'a, I>(values: I, config: &OutlierConfig) -> Option<Bounds>
where
    I: Iterator<Item = &'a ScalarValue>,
{
    let mut size = 0;
    let sample: Vec<f64> = values
        .inspect(|_| size += 1)
        .map(|value| value.value)
        .filter(|value| value.is_finite())
        .collect();
    if size < config.min_group_size {
        return None;
    }
    Bounds::from_sample(&sample, config.factor)
}

/// Flag the outliers of one group, in group order.
fn flag_group(group: &[&ScalarValue], config: &OutlierConfig) -> Vec<bool> {
    let has_source_id = group.iter().any(|value| value.source_id().is_some());
    let bounds = if has_source_id {
        source_bounds(group, config).or_else(|| {
            raw_bounds(
                group.iter().copied().filter(|value| !value.is_reference()),
                config,
            )
        })
    } else {
        raw_bounds(group.iter().copied(), config)
    };
    event!(Level::DEBUG, "group of {} values, bounds {:?}", group.len(), bounds);
    group
        .iter()
        .map(|value| {
            if !value.value.is_finite() {
                return true;
            }
            match bounds {
                Some(bounds) => !value.is_reference() && !bounds.contains(value.value),
                None => false,
            }
        })
        .collect()
}

/// Detect outliers in scalar values.
///
/// Every input value yields exactly one annotated value, in input order. Returns the annotated
/// values and the number flagged as outliers.
///
/// Values are grouped by those `group_by` facets that occur in at least one value. A value
/// lacking one of these facets is grouped with the other values lacking it.
#[tracing::instrument(level = "DEBUG", skip_all, fields(values = values.len()))]
pub fn detect(
    values: Vec<ScalarValue>,
    config: &OutlierConfig,
) -> (Vec<AnnotatedScalarValue>, usize) {
    let facets: Vec<&str> = config
        .group_by
        .iter()
        .map(String::as_str)
        .filter(|facet| values.iter().any(|v| v.dimensions.contains_key(*facet)))
        .collect();

    let mut flags = vec![false; values.len()];
    let group_count = {
        // Group member positions, in order of first appearance of each key.
        let mut keys: HashMap<Vec<Option<&str>>, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (position, value) in values.iter().enumerate() {
            let key: Vec<Option<&str>> = facets
                .iter()
                .map(|facet| value.dimensions.get(*facet).map(String::as_str))
                .collect();
            let group = *keys.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(position);
        }

        for positions in &groups {
            let members: Vec<&ScalarValue> = positions.iter().map(|p| &values[*p]).collect();
            for (position, flag) in positions.iter().zip(flag_group(&members, config)) {
                flags[*position] = flag;
            }
        }
        groups.len()
    };

    let outlier_count = flags.iter().filter(|flag| **flag).count();
    event!(
        Level::DEBUG,
        "{} groups, {} outliers",
        group_count,
        outlier_count
    );
    let annotated = values
        .into_iter()
        .zip(flags)
        .map(|(value, is_outlier)| AnnotatedScalarValue::annotated(value, is_outlier))
        .collect();
    (annotated, outlier_count)
}

/// Annotate scalar values using the requested detection method.
///
/// Detection runs only for [DetectOutliers::Iqr] and non-empty input. The summary is `None`
/// when it did not run, in which case the values carry no annotation.
pub fn annotate(
    values: Vec<ScalarValue>,
    method: DetectOutliers,
    config: &OutlierConfig,
) -> (Vec<AnnotatedScalarValue>, Option<DetectionSummary>) {
    match method {
        DetectOutliers::Iqr if !values.is_empty() => {
            let (annotated, outlier_count) = detect(values, config);
            (annotated, Some(DetectionSummary::new(outlier_count)))
        }
        _ => (
            values.into_iter().map(AnnotatedScalarValue::plain).collect(),
            None,
        ),
    }
}

/// Drop outliers unless `include_unverified` is set.
pub fn retain_verified(
    values: Vec<AnnotatedScalarValue>,
    include_unverified: bool,
) -> Vec<AnnotatedScalarValue> {
    if include_unverified {
        values
    } else {
        values.into_iter().filter(|v| !v.is_outlier()).collect()
    }
}

/// Annotate scalar values, then drop outliers unless `include_unverified` is set.
///
/// The summary counts every flagged value, including those dropped.
pub fn process_scalar_values(
    values: Vec<ScalarValue>,
    method: DetectOutliers,
    include_unverified: bool,
    config: &OutlierConfig,
) -> (Vec<AnnotatedScalarValue>, Option<DetectionSummary>) {
    let (annotated, summary) = annotate(values, method, config);
    (retain_verified(annotated, include_unverified), summary)
}
