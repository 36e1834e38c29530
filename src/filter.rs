//! Query-string filters over metric value dimensions.
//!
//! Query values may be single values, comma-separated lists or JSON lists. Each recognised
//! dimension key becomes one [DimensionPredicate]; the predicates of a query are combined by
//! conjunction.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::ParseIntError;

use hashbrown::HashSet;
use serde_json::Value;
use tracing::{event, Level};

use crate::error::RefError;
use crate::models::Dimensions;

/// Query parameter names that are never treated as dimension filters.
pub const RESERVED_PARAMETERS: &[&str] = &[
    "value_type",
    "type",
    "format",
    "detect_outliers",
    "include_unverified",
    "isolate_ids",
    "exclude_ids",
    "source_filters",
];

/// Dimension vocabulary used when none is configured.
pub const DEFAULT_DIMENSIONS: &[&str] = &[
    "activity_id",
    "experiment_id",
    "grid_label",
    "institution_id",
    "member_id",
    "metric",
    "mode",
    "model",
    "reference_source_id",
    "region",
    "season",
    "source_id",
    "statistic",
    "table_id",
    "variable_id",
    "variant_label",
];

/// Accessor for one registered dimension of a metric value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dimension {
    name: String,
}

impl Dimension {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value of this dimension in `dimensions`, if set.
    pub fn get<'a>(&self, dimensions: &'a Dimensions) -> Option<&'a str> {
        dimensions.get(&self.name).map(String::as_str)
    }
}

/// Allow-list of dimensions that may be filtered on.
#[derive(Clone, Debug)]
pub struct DimensionRegistry {
    dimensions: BTreeMap<String, Dimension>,
}

impl DimensionRegistry {
    /// Build a registry, validating every name.
    ///
    /// Names must be non-empty `[a-z0-9_]` identifiers, must be unique and must not be reserved
    /// query parameter names.
    pub fn new<I, S>(names: I) -> Result<Self, RefError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dimensions = BTreeMap::new();
        for name in names {
            let name: String = name.into();
            let reason = if name.is_empty() {
                Some("must not be empty")
            } else if !name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
            {
                Some("must match [a-z0-9_]+")
            } else if RESERVED_PARAMETERS.contains(&name.as_str()) {
                Some("is a reserved query parameter")
            } else if dimensions.contains_key(&name) {
                Some("is listed more than once")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(RefError::InvalidDimension { name, reason });
            }
            dimensions.insert(name.clone(), Dimension { name });
        }
        if dimensions.is_empty() {
            return Err(RefError::InvalidDimension {
                name: String::new(),
                reason: "at least one dimension must be configured",
            });
        }
        Ok(DimensionRegistry { dimensions })
    }

    /// Returns the registry of [DEFAULT_DIMENSIONS].
    pub fn default_vocabulary() -> Self {
        DimensionRegistry {
            dimensions: DEFAULT_DIMENSIONS
                .iter()
                .map(|name| (name.to_string(), Dimension { name: name.to_string() }))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.get(name)
    }

    /// Iterate over registered dimensions in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.values()
    }

    /// Build one predicate per registered dimension found in `params`.
    ///
    /// Reserved and unknown keys are skipped.
    pub fn predicates(&self, params: &HashMap<String, String>) -> Vec<DimensionPredicate> {
        let mut predicates: Vec<DimensionPredicate> = params
            .iter()
            .filter(|(key, _)| !RESERVED_PARAMETERS.contains(&key.as_str()))
            .filter_map(|(key, raw)| match self.get(key) {
                Some(dimension) => Some(build_filter_clause(dimension, &parse_raw_value(raw))),
                None => {
                    event!(Level::DEBUG, "ignoring unknown filter key {}", key);
                    None
                }
            })
            .collect();
        predicates.sort_by(|a, b| a.dimension.cmp(&b.dimension));
        predicates
    }
}

/// Comparison applied to a dimension value.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterClause {
    /// Equality against the given value
    Eq(Value),
    /// Membership in the given set
    In(BTreeSet<String>),
}

/// A filter on a single dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct DimensionPredicate {
    pub dimension: Dimension,
    pub clause: FilterClause,
}

impl DimensionPredicate {
    /// Whether `dimensions` satisfies this predicate.
    pub fn matches(&self, dimensions: &Dimensions) -> bool {
        let actual = self.dimension.get(dimensions);
        match &self.clause {
            FilterClause::In(values) => actual.map_or(false, |actual| values.contains(actual)),
            FilterClause::Eq(Value::Null) => actual.is_none(),
            FilterClause::Eq(Value::String(expected)) => actual == Some(expected.as_str()),
            FilterClause::Eq(Value::Number(expected)) => {
                actual == Some(expected.to_string().as_str())
            }
            FilterClause::Eq(Value::Bool(expected)) => actual == Some(expected.to_string().as_str()),
            // A dimension value is a string and never equals a list or an object.
            FilterClause::Eq(Value::Array(_)) | FilterClause::Eq(Value::Object(_)) => false,
        }
    }
}

/// Interpret a raw query-string value.
///
/// Values that parse as a JSON list are used as lists, anything else is kept as a string.
pub fn parse_raw_value(raw: &str) -> Value {
    if raw.trim_start().starts_with('[') {
        if let Ok(list @ Value::Array(_)) = serde_json::from_str::<Value>(raw) {
            return list;
        }
    }
    Value::String(raw.to_string())
}

/// Convert a list or comma-separated string into a cleaned list of strings.
///
/// Returns `None` if the value should be treated as a single value.
fn normalize_list(value: &Value) -> Option<Vec<String>> {
    let values: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Null => None,
                Value::String(item) => Some(item.trim().to_string()),
                item => Some(item.to_string().trim().to_string()),
            })
            .filter(|item| !item.is_empty())
            .collect(),
        Value::String(text) if text.contains(',') => text
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        _ => return None,
    };
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// Build the predicate for `dimension` given a raw filter value.
///
/// * A list, or a comma-separated string, with several non-empty items yields a membership
///   clause.
/// * Exactly one non-empty item yields equality against that item.
/// * Anything else, including an empty list, yields equality against the raw value.
pub fn build_filter_clause(dimension: &Dimension, value: &Value) -> DimensionPredicate {
    let clause = match normalize_list(value) {
        Some(mut values) if values.len() == 1 => FilterClause::Eq(Value::String(values.remove(0))),
        Some(values) => FilterClause::In(values.into_iter().collect()),
        None => FilterClause::Eq(value.clone()),
    };
    DimensionPredicate {
        dimension: dimension.clone(),
        clause,
    }
}

/// Parse a comma-separated list of ids, ignoring empty items.
pub fn parse_id_list(ids: &str) -> Result<Vec<i64>, ParseIntError> {
    ids.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::parse::<i64>)
        .collect()
}

/// Restriction on metric value ids.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum IdFilter {
    /// No restriction
    #[default]
    All,
    /// Only these ids
    Isolate(HashSet<i64>),
    /// Any id except these
    Exclude(HashSet<i64>),
}

impl IdFilter {
    /// Build an id filter from the `isolate_ids` and `exclude_ids` query parameters.
    ///
    /// `isolate_ids` takes precedence over `exclude_ids`.
    pub fn from_params(
        isolate_ids: Option<&str>,
        exclude_ids: Option<&str>,
    ) -> Result<Self, RefError> {
        let filter = match (isolate_ids, exclude_ids) {
            (Some(ids), _) if !ids.is_empty() => {
                IdFilter::Isolate(parse_id_list(ids)?.into_iter().collect())
            }
            (_, Some(ids)) if !ids.is_empty() => {
                IdFilter::Exclude(parse_id_list(ids)?.into_iter().collect())
            }
            _ => IdFilter::All,
        };
        Ok(filter)
    }

    pub fn matches(&self, id: i64) -> bool {
        match self {
            IdFilter::All => true,
            IdFilter::Isolate(ids) => ids.contains(&id),
            IdFilter::Exclude(ids) => !ids.contains(&id),
        }
    }
}

/// A store query: dimension predicates and an id restriction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricValueQuery {
    pub predicates: Vec<DimensionPredicate>,
    pub ids: IdFilter,
}

impl MetricValueQuery {
    pub fn new(predicates: Vec<DimensionPredicate>, ids: IdFilter) -> Self {
        MetricValueQuery { predicates, ids }
    }

    /// Whether a value with this id and these dimensions is selected.
    pub fn matches(&self, id: i64, dimensions: &Dimensions) -> bool {
        self.ids.matches(id) && matches_all(&self.predicates, dimensions)
    }
}

/// Whether `dimensions` satisfies every predicate.
pub fn matches_all(predicates: &[DimensionPredicate], dimensions: &Dimensions) -> bool {
    predicates
        .iter()
        .all(|predicate| predicate.matches(dimensions))
}

/// Parse the `source_filters` JSON object of a comparison into predicates.
pub fn parse_source_filters(
    registry: &DimensionRegistry,
    source_filters: &str,
) -> Result<Vec<DimensionPredicate>, RefError> {
    let invalid = |reason: String| RefError::InvalidSourceFilters { reason };
    let value: Value = serde_json::from_str(source_filters)
        .map_err(|err| invalid(format!("not valid JSON ({err})")))?;
    let Value::Object(filters) = value else {
        return Err(invalid("must be a JSON object".to_string()));
    };
    if filters.is_empty() {
        return Err(invalid("must not be empty".to_string()));
    }
    filters
        .iter()
        .map(|(key, value)| {
            registry
                .get(key)
                .map(|dimension| build_filter_clause(dimension, value))
                .ok_or_else(|| invalid(format!("unknown dimension {key:?}")))
        })
        .collect()
}
