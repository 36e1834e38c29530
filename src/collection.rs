//! Aggregation of annotated scalar values and series values into API responses.

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;

use crate::filter::{matches_all, DimensionPredicate, DimensionRegistry};
use crate::models::{
    AnnotatedScalarValue, DetectionSummary, Dimensions, Facet, MetricValue, MetricValueCollection,
    MetricValueComparison, MetricValueFacetSummary, ScalarItem, ScalarValue, SeriesItem,
    SeriesValue,
};
use crate::outliers::retain_verified;
use crate::sanitize::{sanitize_attributes, sanitize_float, sanitize_floats};

impl From<AnnotatedScalarValue> for ScalarItem {
    fn from(annotated: AnnotatedScalarValue) -> Self {
        let value = annotated.value;
        ScalarItem {
            id: value.id,
            value: sanitize_float(value.value),
            attributes: sanitize_attributes(&value.attributes),
            dimensions: value.dimensions,
            execution_group_id: value.execution_group_id,
            execution_id: value.execution_id,
            is_outlier: annotated.is_outlier,
            verification_status: annotated.verification_status,
        }
    }
}

impl From<SeriesValue> for SeriesItem {
    fn from(value: SeriesValue) -> Self {
        SeriesItem {
            id: value.id,
            values: sanitize_floats(&value.values),
            attributes: sanitize_attributes(&value.attributes),
            dimensions: value.dimensions,
            index: value.index,
            index_name: value.index_name,
            execution_group_id: value.execution_group_id,
            execution_id: value.execution_id,
        }
    }
}

/// Accumulates the distinct values of each dimension key, keys in order of first encounter.
#[derive(Default)]
struct FacetBuilder {
    positions: HashMap<String, usize>,
    facets: Vec<(String, BTreeSet<String>)>,
}

impl FacetBuilder {
    fn add(&mut self, item: &MetricValue) {
        for (key, value) in item.dimensions() {
            let position = match self.positions.get(key) {
                Some(position) => *position,
                None => {
                    self.facets.push((key.clone(), BTreeSet::new()));
                    self.positions.insert(key.clone(), self.facets.len() - 1);
                    self.facets.len() - 1
                }
            };
            self.facets[position].1.insert(value.clone());
        }
    }

    fn build(self) -> Vec<Facet> {
        self.facets
            .into_iter()
            .map(|(key, values)| Facet {
                key,
                values: values.into_iter().collect(),
            })
            .collect()
    }
}

impl MetricValueCollection {
    /// Build a collection from annotated scalar values and series values.
    ///
    /// `summary` is the result of outlier detection, `None` if it did not run.
    pub fn build(
        scalars: Vec<AnnotatedScalarValue>,
        series: Vec<SeriesValue>,
        summary: Option<DetectionSummary>,
    ) -> Self {
        let mut types = Vec::new();
        if !scalars.is_empty() {
            types.push("scalar".to_string());
        }
        if !series.is_empty() {
            types.push("series".to_string());
        }

        let data: Vec<MetricValue> = scalars
            .into_iter()
            .map(|value| MetricValue::Scalar(value.into()))
            .chain(
                series
                    .into_iter()
                    .map(|value| MetricValue::Series(value.into())),
            )
            .collect();

        let mut facets = FacetBuilder::default();
        data.iter().for_each(|item| facets.add(item));

        MetricValueCollection {
            count: data.len(),
            data,
            facets: facets.build(),
            types,
            had_outliers: summary.map(|summary| summary.had_outliers),
            outlier_count: summary.map(|summary| summary.outlier_count),
        }
    }
}

/// Split values into those matching every predicate and the rest.
fn partition<T, F>(values: Vec<T>, predicates: &[DimensionPredicate], dims: F) -> (Vec<T>, Vec<T>)
where
    F: Fn(&T) -> &Dimensions,
{
    values
        .into_iter()
        .partition(|value| matches_all(predicates, dims(value)))
}

/// Build one side of a comparison.
fn comparison_side(
    scalars: Vec<AnnotatedScalarValue>,
    series: Vec<SeriesValue>,
    detection_ran: bool,
    include_unverified: bool,
) -> MetricValueCollection {
    let summary = detection_ran
        .then(|| DetectionSummary::new(scalars.iter().filter(|v| v.is_outlier()).count()));
    MetricValueCollection::build(
        retain_verified(scalars, include_unverified),
        series,
        summary,
    )
}

impl MetricValueComparison {
    /// Partition values into the source subset matching `source_filters` and the ensemble.
    ///
    /// `scalars` must already be annotated over the whole set; `detection_ran` states whether
    /// they were. Each side counts the outliers that landed on it, and drops them afterwards
    /// unless `include_unverified` is set.
    pub fn build(
        scalars: Vec<AnnotatedScalarValue>,
        series: Vec<SeriesValue>,
        detection_ran: bool,
        source_filters: &[DimensionPredicate],
        include_unverified: bool,
    ) -> Self {
        let (source_scalars, ensemble_scalars) =
            partition(scalars, source_filters, |v| &v.value.dimensions);
        let (source_series, ensemble_series) =
            partition(series, source_filters, |v| &v.dimensions);
        MetricValueComparison {
            source: comparison_side(
                source_scalars,
                source_series,
                detection_ran,
                include_unverified,
            ),
            ensemble: comparison_side(
                ensemble_scalars,
                ensemble_series,
                detection_ran,
                include_unverified,
            ),
        }
    }
}

impl MetricValueFacetSummary {
    /// Distinct values of each registered dimension over scalar and series values.
    ///
    /// Dimensions without any observed value are omitted.
    pub fn build(
        registry: &DimensionRegistry,
        scalars: &[ScalarValue],
        series: &[SeriesValue],
    ) -> Self {
        let mut observed: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let dimensions = scalars
            .iter()
            .map(|v| &v.dimensions)
            .chain(series.iter().map(|v| &v.dimensions));
        for dims in dimensions {
            for dimension in registry.iter() {
                if let Some(value) = dimension.get(dims) {
                    observed
                        .entry(dimension.name().to_string())
                        .or_default()
                        .insert(value.to_string());
                }
            }
        }
        MetricValueFacetSummary {
            dimensions: observed
                .into_iter()
                .map(|(key, values)| (key, values.into_iter().collect()))
                .collect(),
            count: scalars.len() + series.len(),
        }
    }
}
