use crate::cli::CommandLineArgs;
use crate::models::*;

use clap::Parser;

/// Create a Dimensions map from key/value pairs.
pub(crate) fn dimensions(pairs: &[(&str, &str)]) -> Dimensions {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Create a ScalarValue with only required fields set.
pub(crate) fn scalar(id: i64, pairs: &[(&str, &str)], value: f64) -> ScalarValue {
    ScalarValue {
        id,
        dimensions: dimensions(pairs),
        value,
        attributes: Attributes::new(),
        execution_id: 1,
        execution_group_id: 1,
    }
}

/// Create scalar values with consecutive ids and the same dimensions.
pub(crate) fn scalars(pairs: &[(&str, &str)], values: &[f64]) -> Vec<ScalarValue> {
    values
        .iter()
        .enumerate()
        .map(|(id, value)| scalar(id as i64, pairs, *value))
        .collect()
}

/// Create a SeriesValue without an index.
pub(crate) fn series(id: i64, pairs: &[(&str, &str)], values: &[Option<f64>]) -> SeriesValue {
    SeriesValue {
        id,
        dimensions: dimensions(pairs),
        values: values.to_vec(),
        index: None,
        index_name: None,
        attributes: Attributes::new(),
        execution_id: 1,
        execution_group_id: 1,
    }
}

/// Return command line arguments with all defaults.
pub(crate) fn get_test_args() -> CommandLineArgs {
    CommandLineArgs::try_parse_from(["ref-backend"]).unwrap()
}

/// A store snapshot with one provider, two diagnostics and a mix of values.
///
/// Diagnostic `pmp/enso` (id 1) owns execution 10 with eleven scalar values: three MIROC6
/// members, seven other models and one NaN reference value, plus one series. Diagnostic
/// `esmvaltool/ecs` (id 2) belongs to a provider outside the default allow-list in the app
/// tests.
pub(crate) const TEST_SNAPSHOT: &str = r#"{
    "providers": [
        {"slug": "pmp", "name": "PMP", "version": "3.9"},
        {"slug": "esmvaltool", "name": "ESMValTool"}
    ],
    "diagnostics": [
        {"id": 1, "slug": "enso", "name": "ENSO", "description": "El Nino", "provider": "pmp"},
        {"id": 2, "slug": "ecs", "name": "ECS", "provider": "esmvaltool"}
    ],
    "executions": [
        {"id": 10, "execution_group_id": 100, "diagnostic_id": 1},
        {"id": 20, "execution_group_id": 200, "diagnostic_id": 2}
    ],
    "scalar_values": [
        {"id": 1, "dimensions": {"source_id": "MIROC6", "metric": "rmse", "statistic": "mean"}, "value": 1.0, "execution_id": 10, "execution_group_id": 100},
        {"id": 2, "dimensions": {"source_id": "MIROC6", "metric": "rmse", "statistic": "mean"}, "value": 1.2, "execution_id": 10, "execution_group_id": 100},
        {"id": 3, "dimensions": {"source_id": "MIROC6", "metric": "rmse", "statistic": "mean"}, "value": 0.8, "execution_id": 10, "execution_group_id": 100},
        {"id": 4, "dimensions": {"source_id": "CESM2", "metric": "rmse", "statistic": "mean"}, "value": 1.1, "execution_id": 10, "execution_group_id": 100},
        {"id": 5, "dimensions": {"source_id": "UKESM1", "metric": "rmse", "statistic": "mean"}, "value": 0.9, "execution_id": 10, "execution_group_id": 100},
        {"id": 6, "dimensions": {"source_id": "ACCESS", "metric": "rmse", "statistic": "mean"}, "value": 1.05, "execution_id": 10, "execution_group_id": 100},
        {"id": 7, "dimensions": {"source_id": "GFDL", "metric": "rmse", "statistic": "mean"}, "value": 0.95, "execution_id": 10, "execution_group_id": 100},
        {"id": 8, "dimensions": {"source_id": "IPSL", "metric": "rmse", "statistic": "mean"}, "value": 1.0, "execution_id": 10, "execution_group_id": 100},
        {"id": 9, "dimensions": {"source_id": "NorESM", "metric": "rmse", "statistic": "mean"}, "value": 50.0, "execution_id": 10, "execution_group_id": 100},
        {"id": 10, "dimensions": {"source_id": "CanESM", "metric": "rmse", "statistic": "mean"}, "value": 1.02, "execution_id": 10, "execution_group_id": 100},
        {"id": 11, "dimensions": {"source_id": "Reference", "metric": "rmse", "statistic": "mean"}, "value": "NaN", "attributes": {"units": "K"}, "execution_id": 10, "execution_group_id": 100},
        {"id": 12, "dimensions": {"source_id": "CESM2", "metric": "bias", "statistic": "mean"}, "value": 0.3, "execution_id": 20, "execution_group_id": 200}
    ],
    "series_values": [
        {"id": 101, "dimensions": {"source_id": "MIROC6", "metric": "nino34"}, "values": [0.5, "Infinity"], "index": [1990, 1991], "index_name": "year", "execution_id": 10, "execution_group_id": 100}
    ]
}"#;
