//! Data types and associated functions and methods

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::Display;
use validator::{Validate, ValidationError};

use crate::filter;

/// Dimension name to value mapping of a metric value, e.g. `source_id` -> `ACCESS-ESM1-5`.
pub type Dimensions = BTreeMap<String, String>;

/// Free-form attributes attached to a metric value.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Dimension holding the model (source) identifier.
pub const SOURCE_ID: &str = "source_id";

/// `source_id` of reference (observational) data.
pub const REFERENCE_SOURCE_ID: &str = "Reference";

/// An attribute value
///
/// Attributes are loosely typed in the store. Floats may be non-finite until sanitised.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<AttributeValue>),
    Map(BTreeMap<String, AttributeValue>),
}

/// Wire representation of a float in a store snapshot.
///
/// JSON cannot express NaN or infinity, so these are accepted as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum FloatRepr {
    Number(f64),
    Text(String),
}

impl FloatRepr {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            FloatRepr::Number(value) => Ok(value),
            FloatRepr::Text(text) => match text.as_str() {
                "NaN" | "nan" => Ok(f64::NAN),
                "Infinity" | "inf" => Ok(f64::INFINITY),
                "-Infinity" | "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(E::custom(format!("invalid float {other:?}"))),
            },
        }
    }
}

fn deserialize_float<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    FloatRepr::deserialize(deserializer)?.into_f64()
}

fn deserialize_optional_floats<'de, D>(deserializer: D) -> Result<Vec<Option<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<Option<FloatRepr>>::deserialize(deserializer)?
        .into_iter()
        .map(|value| value.map(|value| value.into_f64::<D::Error>()).transpose())
        .collect()
}

/// A single numeric diagnostic result tagged with categorical dimensions.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ScalarValue {
    /// Metric value identifier
    pub id: i64,
    /// Categorical dimensions
    pub dimensions: Dimensions,
    /// The value. May be NaN or infinite.
    #[serde(deserialize_with = "deserialize_float")]
    pub value: f64,
    #[serde(default)]
    pub attributes: Attributes,
    pub execution_id: i64,
    pub execution_group_id: i64,
}

impl ScalarValue {
    /// Returns the `source_id` dimension, if present.
    pub fn source_id(&self) -> Option<&str> {
        self.dimensions.get(SOURCE_ID).map(String::as_str)
    }

    /// Whether this value was produced from reference data.
    pub fn is_reference(&self) -> bool {
        self.source_id() == Some(REFERENCE_SOURCE_ID)
    }
}

/// An element of a series index axis.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IndexValue {
    Int(i64),
    Float(f64),
    Str(String),
}

/// An array-valued diagnostic result, e.g. a time series.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SeriesValue {
    /// Metric value identifier
    pub id: i64,
    /// Categorical dimensions
    pub dimensions: Dimensions,
    /// Series values. Missing elements are `None`, others may be non-finite.
    #[serde(deserialize_with = "deserialize_optional_floats")]
    pub values: Vec<Option<f64>>,
    /// Optional index axis of the same length as `values`
    #[serde(default)]
    pub index: Option<Vec<IndexValue>>,
    /// Name of the index axis
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    pub execution_id: i64,
    pub execution_group_id: i64,
}

/// Outcome of outlier detection for a single value.
#[derive(Clone, Copy, Debug, Display, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VerificationStatus {
    Verified,
    Unverified,
}

/// A scalar value and, when detection ran, its outlier annotation.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotatedScalarValue {
    pub value: ScalarValue,
    pub is_outlier: Option<bool>,
    pub verification_status: Option<VerificationStatus>,
}

impl AnnotatedScalarValue {
    /// Wrap a value without annotation (detection did not run).
    pub fn plain(value: ScalarValue) -> Self {
        AnnotatedScalarValue {
            value,
            is_outlier: None,
            verification_status: None,
        }
    }

    /// Wrap a value with the result of outlier detection.
    pub fn annotated(value: ScalarValue, is_outlier: bool) -> Self {
        let verification_status = if is_outlier {
            VerificationStatus::Unverified
        } else {
            VerificationStatus::Verified
        };
        AnnotatedScalarValue {
            value,
            is_outlier: Some(is_outlier),
            verification_status: Some(verification_status),
        }
    }

    /// Whether the value was flagged as an outlier.
    pub fn is_outlier(&self) -> bool {
        self.is_outlier.unwrap_or(false)
    }
}

/// Result of a detection run over a set of scalar values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionSummary {
    pub had_outliers: bool,
    pub outlier_count: usize,
}

impl DetectionSummary {
    pub fn new(outlier_count: usize) -> Self {
        DetectionSummary {
            had_outliers: outlier_count > 0,
            outlier_count,
        }
    }
}

/// Which families of metric values to query
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, PartialEq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    Scalar,
    Series,
    #[default]
    All,
}

impl ValueType {
    pub fn includes_scalar(self) -> bool {
        matches!(self, ValueType::Scalar | ValueType::All)
    }

    pub fn includes_series(self) -> bool {
        matches!(self, ValueType::Series | ValueType::All)
    }
}

/// Response format
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Csv,
}

/// Outlier detection method
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, PartialEq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DetectOutliers {
    Off,
    #[default]
    Iqr,
}

/// Validate a comma-separated list of metric value ids
fn validate_id_list(ids: &str) -> Result<(), ValidationError> {
    filter::parse_id_list(ids).map(|_| ()).map_err(|err| {
        let mut error = ValidationError::new("ids must be a comma-separated list of integers");
        error.add_param("error".into(), &err.to_string());
        error
    })
}

/// Query parameters of the metric value listing endpoints.
///
/// Dimension filters are passed alongside these and are parsed separately.
#[derive(Debug, Default, Deserialize, PartialEq, Validate)]
pub struct ValuesParams {
    #[serde(default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub format: Format,
    #[serde(default)]
    pub detect_outliers: DetectOutliers,
    #[serde(default)]
    pub include_unverified: bool,
    #[validate(custom = "validate_id_list")]
    pub isolate_ids: Option<String>,
    #[validate(custom = "validate_id_list")]
    pub exclude_ids: Option<String>,
}

/// Query parameters of the comparison endpoint.
#[derive(Debug, Deserialize, PartialEq, Validate)]
pub struct ComparisonParams {
    /// JSON object of dimension to value(s) selecting the source subset
    #[validate(length(min = 1, message = "source_filters must not be empty"))]
    pub source_filters: String,
    #[serde(default, rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub detect_outliers: DetectOutliers,
    #[serde(default)]
    pub include_unverified: bool,
    #[validate(custom = "validate_id_list")]
    pub isolate_ids: Option<String>,
    #[validate(custom = "validate_id_list")]
    pub exclude_ids: Option<String>,
}

/// Query parameters of the facets endpoint.
#[derive(Debug, Default, Deserialize, PartialEq, Validate)]
pub struct FacetParams {
    #[validate(custom = "validate_id_list")]
    pub isolate_ids: Option<String>,
    #[validate(custom = "validate_id_list")]
    pub exclude_ids: Option<String>,
}

/// A diagnostic provider
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Provider {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// A diagnostic, as stored
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Diagnostic {
    pub id: i64,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Slug of the provider that runs this diagnostic
    pub provider: String,
}

/// One concrete run of a diagnostic
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Execution {
    pub id: i64,
    pub execution_group_id: i64,
    pub diagnostic_id: i64,
}

/// Diagnostic summary returned by the API
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiagnosticSummary {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub provider: Provider,
}

/// A scalar metric value as returned by the API
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScalarItem {
    pub id: i64,
    pub dimensions: Dimensions,
    /// Sanitised value, `None` if it was not finite
    pub value: Option<f64>,
    pub attributes: Attributes,
    pub execution_group_id: i64,
    pub execution_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_outlier: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_status: Option<VerificationStatus>,
}

/// A series metric value as returned by the API
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SeriesItem {
    pub id: i64,
    pub dimensions: Dimensions,
    /// Sanitised values, non-finite elements are `None`
    pub values: Vec<Option<f64>>,
    pub index: Option<Vec<IndexValue>>,
    pub index_name: Option<String>,
    pub attributes: Attributes,
    pub execution_group_id: i64,
    pub execution_id: i64,
}

/// A metric value of either shape
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(ScalarItem),
    Series(SeriesItem),
}

impl MetricValue {
    pub fn dimensions(&self) -> &Dimensions {
        match self {
            MetricValue::Scalar(item) => &item.dimensions,
            MetricValue::Series(item) => &item.dimensions,
        }
    }
}

/// A dimension and its observed values
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Facet {
    pub key: String,
    pub values: Vec<String>,
}

/// Filtered, faceted and annotated metric values
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricValueCollection {
    pub data: Vec<MetricValue>,
    pub count: usize,
    pub facets: Vec<Facet>,
    /// Value families present, sorted: `scalar`, `series` or both
    pub types: Vec<String>,
    /// `None` when outlier detection did not run
    pub had_outliers: Option<bool>,
    /// `None` when outlier detection did not run
    pub outlier_count: Option<usize>,
}

/// Metric values of a source subset and of the remaining ensemble
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricValueComparison {
    pub source: MetricValueCollection,
    pub ensemble: MetricValueCollection,
}

/// Distinct values per dimension for the current filter
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricValueFacetSummary {
    pub dimensions: BTreeMap<String, Vec<String>>,
    /// Number of scalar and series values matching the filter
    pub count: usize,
}
