//! Metric value store.
//!
//! The [MetricValueStore] trait is the read-only interface that request handlers use to look up
//! diagnostics, executions and metric values. [InMemoryStore] implements it over a JSON snapshot.

use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use serde::Deserialize;
use tracing::{event, Level};

use crate::error::RefError;
use crate::filter::MetricValueQuery;
use crate::models::{
    Diagnostic, DiagnosticSummary, Execution, Provider, ScalarValue, SeriesValue,
};

/// Set of values a query is evaluated against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueScope {
    /// Values of all executions of a diagnostic, by diagnostic id
    Diagnostic(i64),
    /// Values of a single execution, by execution id
    Execution(i64),
}

/// Metric value store trait.
///
/// Defines the interface for read-only access to diagnostics and their metric values.
#[async_trait]
pub trait MetricValueStore: Send + Sync {
    /// Summaries of all diagnostics.
    async fn diagnostics(&self) -> Result<Vec<DiagnosticSummary>, RefError>;

    /// Look up a diagnostic by provider and diagnostic slug.
    async fn diagnostic(
        &self,
        provider_slug: &str,
        diagnostic_slug: &str,
    ) -> Result<Option<DiagnosticSummary>, RefError>;

    /// Look up an execution by id.
    async fn execution(&self, execution_id: i64) -> Result<Option<Execution>, RefError>;

    /// Scalar values in `scope` selected by `query`.
    async fn scalar_values(
        &self,
        scope: ValueScope,
        query: &MetricValueQuery,
    ) -> Result<Vec<ScalarValue>, RefError>;

    /// Series values in `scope` selected by `query`.
    async fn series_values(
        &self,
        scope: ValueScope,
        query: &MetricValueQuery,
    ) -> Result<Vec<SeriesValue>, RefError>;
}

/// Snapshot file contents.
#[derive(Debug, Default, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default)]
    pub executions: Vec<Execution>,
    #[serde(default)]
    pub scalar_values: Vec<ScalarValue>,
    #[serde(default)]
    pub series_values: Vec<SeriesValue>,
}

/// A [MetricValueStore] holding a snapshot in memory.
#[derive(Debug)]
pub struct InMemoryStore {
    providers: HashMap<String, Provider>,
    diagnostics: Vec<Diagnostic>,
    executions: HashMap<i64, Execution>,
    scalar_values: Vec<ScalarValue>,
    series_values: Vec<SeriesValue>,
}

fn integrity_error(reason: String) -> RefError {
    RefError::StoreIntegrity { reason }
}

impl InMemoryStore {
    /// Load a store from a JSON snapshot file.
    pub fn from_path(path: &Path) -> Result<Self, RefError> {
        let file = std::fs::File::open(path)?;
        let store = Self::from_reader(std::io::BufReader::new(file))?;
        event!(
            Level::INFO,
            "loaded {} scalar and {} series values from {}",
            store.scalar_values.len(),
            store.series_values.len(),
            path.display()
        );
        Ok(store)
    }

    /// Load a store from a reader of a JSON snapshot.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, RefError> {
        let snapshot: Snapshot = serde_json::from_reader(reader).map_err(RefError::StoreFormat)?;
        Self::from_snapshot(snapshot)
    }

    /// Build a store from a snapshot, checking that all references resolve.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, RefError> {
        let mut providers = HashMap::new();
        for provider in snapshot.providers {
            if let Some(duplicate) = providers.insert(provider.slug.clone(), provider) {
                return Err(integrity_error(format!(
                    "duplicate provider {}",
                    duplicate.slug
                )));
            }
        }

        let mut diagnostic_ids = HashSet::new();
        let mut diagnostic_slugs = HashSet::new();
        for diagnostic in &snapshot.diagnostics {
            if !providers.contains_key(&diagnostic.provider) {
                return Err(integrity_error(format!(
                    "diagnostic {} refers to unknown provider {}",
                    diagnostic.id, diagnostic.provider
                )));
            }
            let slugs = (diagnostic.provider.clone(), diagnostic.slug.clone());
            if !diagnostic_ids.insert(diagnostic.id) || !diagnostic_slugs.insert(slugs) {
                return Err(integrity_error(format!(
                    "duplicate diagnostic {}",
                    diagnostic.id
                )));
            }
        }

        let mut executions = HashMap::new();
        for execution in snapshot.executions {
            if !diagnostic_ids.contains(&execution.diagnostic_id) {
                return Err(integrity_error(format!(
                    "execution {} refers to unknown diagnostic {}",
                    execution.id, execution.diagnostic_id
                )));
            }
            if let Some(duplicate) = executions.insert(execution.id, execution) {
                return Err(integrity_error(format!(
                    "duplicate execution {}",
                    duplicate.id
                )));
            }
        }

        let check_execution = |id: i64, execution_id: i64| match executions.get(&execution_id) {
            Some(_) => Ok(()),
            None => Err(integrity_error(format!(
                "metric value {id} refers to unknown execution {execution_id}"
            ))),
        };
        for value in &snapshot.scalar_values {
            check_execution(value.id, value.execution_id)?;
        }
        for value in &snapshot.series_values {
            check_execution(value.id, value.execution_id)?;
            if let Some(index) = &value.index {
                if index.len() != value.values.len() {
                    return Err(integrity_error(format!(
                        "series {} has {} values but an index of length {}",
                        value.id,
                        value.values.len(),
                        index.len()
                    )));
                }
            }
        }

        Ok(InMemoryStore {
            providers,
            diagnostics: snapshot.diagnostics,
            executions,
            scalar_values: snapshot.scalar_values,
            series_values: snapshot.series_values,
        })
    }

    fn summary(&self, diagnostic: &Diagnostic) -> Result<DiagnosticSummary, RefError> {
        let provider = self.providers.get(&diagnostic.provider).ok_or_else(|| {
            integrity_error(format!("unknown provider {}", diagnostic.provider))
        })?;
        Ok(DiagnosticSummary {
            id: diagnostic.id,
            slug: diagnostic.slug.clone(),
            name: diagnostic.name.clone(),
            description: diagnostic.description.clone(),
            provider: provider.clone(),
        })
    }

    /// Whether a value produced by `execution_id` lies in `scope`.
    fn in_scope(&self, scope: ValueScope, execution_id: i64) -> bool {
        match scope {
            ValueScope::Execution(id) => execution_id == id,
            ValueScope::Diagnostic(id) => self
                .executions
                .get(&execution_id)
                .map_or(false, |execution| execution.diagnostic_id == id),
        }
    }
}

#[async_trait]
impl MetricValueStore for InMemoryStore {
    async fn diagnostics(&self) -> Result<Vec<DiagnosticSummary>, RefError> {
        self.diagnostics.iter().map(|d| self.summary(d)).collect()
    }

    async fn diagnostic(
        &self,
        provider_slug: &str,
        diagnostic_slug: &str,
    ) -> Result<Option<DiagnosticSummary>, RefError> {
        self.diagnostics
            .iter()
            .find(|d| d.provider == provider_slug && d.slug == diagnostic_slug)
            .map(|d| self.summary(d))
            .transpose()
    }

    async fn execution(&self, execution_id: i64) -> Result<Option<Execution>, RefError> {
        Ok(self.executions.get(&execution_id).cloned())
    }

    #[tracing::instrument(level = "DEBUG", skip(self, query))]
    async fn scalar_values(
        &self,
        scope: ValueScope,
        query: &MetricValueQuery,
    ) -> Result<Vec<ScalarValue>, RefError> {
        Ok(self
            .scalar_values
            .iter()
            .filter(|v| self.in_scope(scope, v.execution_id))
            .filter(|v| query.matches(v.id, &v.dimensions))
            .cloned()
            .collect())
    }

    #[tracing::instrument(level = "DEBUG", skip(self, query))]
    async fn series_values(
        &self,
        scope: ValueScope,
        query: &MetricValueQuery,
    ) -> Result<Vec<SeriesValue>, RefError> {
        Ok(self
            .series_values
            .iter()
            .filter(|v| self.in_scope(scope, v.execution_id))
            .filter(|v| query.matches(v.id, &v.dimensions))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{DimensionRegistry, IdFilter};
    use crate::test_utils::TEST_SNAPSHOT;

    fn store() -> InMemoryStore {
        InMemoryStore::from_reader(TEST_SNAPSHOT.as_bytes()).unwrap()
    }

    fn query(pairs: &[(&str, &str)], ids: IdFilter) -> MetricValueQuery {
        let registry = DimensionRegistry::new(["source_id", "metric"]).unwrap();
        let params = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MetricValueQuery::new(registry.predicates(&params), ids)
    }

    fn ids<T>(values: &[T], id: impl Fn(&T) -> i64) -> Vec<i64> {
        values.iter().map(id).collect()
    }

    #[tokio::test]
    async fn diagnostics() {
        let store = store();
        let diagnostics = store.diagnostics().await.unwrap();
        assert_eq!(2, diagnostics.len());
        let enso = store.diagnostic("pmp", "enso").await.unwrap().unwrap();
        assert_eq!(1, enso.id);
        assert_eq!("PMP", enso.provider.name);
        assert_eq!(Some("3.9".to_string()), enso.provider.version);
        assert_eq!(None, store.diagnostic("pmp", "ecs").await.unwrap());
    }

    #[tokio::test]
    async fn execution() {
        let store = store();
        assert_eq!(1, store.execution(10).await.unwrap().unwrap().diagnostic_id);
        assert_eq!(None, store.execution(99).await.unwrap());
    }

    #[tokio::test]
    async fn scoped_values() {
        let store = store();
        let all = MetricValueQuery::default();
        let scalars = store
            .scalar_values(ValueScope::Diagnostic(1), &all)
            .await
            .unwrap();
        assert_eq!((1..=11).collect::<Vec<i64>>(), ids(&scalars, |v| v.id));
        assert!(scalars[10].value.is_nan());
        let scalars = store
            .scalar_values(ValueScope::Execution(20), &all)
            .await
            .unwrap();
        assert_eq!(vec![12], ids(&scalars, |v| v.id));
        let series = store
            .series_values(ValueScope::Diagnostic(1), &all)
            .await
            .unwrap();
        assert_eq!(vec![101], ids(&series, |v| v.id));
        assert_eq!(Some(f64::INFINITY), series[0].values[1]);
        let series = store
            .series_values(ValueScope::Diagnostic(2), &all)
            .await
            .unwrap();
        assert!(series.is_empty());
    }

    #[tokio::test]
    async fn filtered_values() {
        let store = store();
        let scope = ValueScope::Diagnostic(1);
        let scalars = store
            .scalar_values(scope, &query(&[("source_id", "CESM2,GFDL")], IdFilter::All))
            .await
            .unwrap();
        assert_eq!(vec![4, 7], ids(&scalars, |v| v.id));

        let isolate = IdFilter::from_params(Some("5,7"), None).unwrap();
        let scalars = store
            .scalar_values(scope, &query(&[], isolate))
            .await
            .unwrap();
        assert_eq!(vec![5, 7], ids(&scalars, |v| v.id));

        let exclude = IdFilter::from_params(None, Some("1,2,3")).unwrap();
        let scalars = store
            .scalar_values(scope, &query(&[("source_id", "MIROC6")], exclude))
            .await
            .unwrap();
        assert!(scalars.is_empty());
    }

    #[test]
    fn invalid_json() {
        let error = InMemoryStore::from_reader("{".as_bytes()).unwrap_err();
        assert!(matches!(error, RefError::StoreFormat(_)));
    }

    #[test]
    fn missing_file() {
        let error = InMemoryStore::from_path(Path::new("/nonexistent/values.json")).unwrap_err();
        assert!(matches!(error, RefError::StoreIo(_)));
    }

    #[tokio::test]
    async fn bundled_data_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/metric_values.json");
        let store = InMemoryStore::from_path(&path).unwrap();
        assert_eq!(3, store.diagnostics().await.unwrap().len());
        let scalars = store
            .scalar_values(ValueScope::Diagnostic(1), &MetricValueQuery::default())
            .await
            .unwrap();
        assert_eq!(21, scalars.len());
    }

    fn integrity_reason(json: &str) -> String {
        match InMemoryStore::from_reader(json.as_bytes()) {
            Err(RefError::StoreIntegrity { reason }) => reason,
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn unknown_provider() {
        let json = r#"{"diagnostics": [{"id": 1, "slug": "a", "name": "A", "provider": "x"}]}"#;
        assert_eq!(
            "diagnostic 1 refers to unknown provider x",
            integrity_reason(json)
        );
    }

    #[test]
    fn unknown_diagnostic() {
        let json = r#"{"executions": [{"id": 1, "execution_group_id": 1, "diagnostic_id": 3}]}"#;
        assert_eq!(
            "execution 1 refers to unknown diagnostic 3",
            integrity_reason(json)
        );
    }

    #[test]
    fn unknown_execution() {
        let json = r#"{"scalar_values": [{"id": 4, "dimensions": {}, "value": 1.0, "execution_id": 5, "execution_group_id": 1}]}"#;
        assert_eq!(
            "metric value 4 refers to unknown execution 5",
            integrity_reason(json)
        );
    }

    #[test]
    fn series_index_length() {
        let json = r#"{
            "providers": [{"slug": "p", "name": "P"}],
            "diagnostics": [{"id": 1, "slug": "d", "name": "D", "provider": "p"}],
            "executions": [{"id": 1, "execution_group_id": 1, "diagnostic_id": 1}],
            "series_values": [{"id": 2, "dimensions": {}, "values": [1.0, 2.0], "index": [0], "execution_id": 1, "execution_group_id": 1}]
        }"#;
        assert_eq!(
            "series 2 has 2 values but an index of length 1",
            integrity_reason(json)
        );
    }

    #[test]
    fn duplicate_execution() {
        let json = r#"{
            "providers": [{"slug": "p", "name": "P"}],
            "diagnostics": [{"id": 1, "slug": "d", "name": "D", "provider": "p"}],
            "executions": [
                {"id": 1, "execution_group_id": 1, "diagnostic_id": 1},
                {"id": 1, "execution_group_id": 2, "diagnostic_id": 1}
            ]
        }"#;
        assert_eq!("duplicate execution 1", integrity_reason(json));
    }

    #[tokio::test]
    async fn duplicate_diagnostic_slug() {
        let json = r#"{
            "providers": [{"slug": "p", "name": "P"}],
            "diagnostics": [
                {"id": 1, "slug": "d", "name": "D", "provider": "p"},
                {"id": 2, "slug": "d", "name": "D again", "provider": "p"}
            ]
        }"#;
        assert_eq!("duplicate diagnostic 2", integrity_reason(json));

        let json = r#"{
            "providers": [{"slug": "p", "name": "P"}, {"slug": "q", "name": "Q"}],
            "diagnostics": [
                {"id": 1, "slug": "d", "name": "D", "provider": "p"},
                {"id": 2, "slug": "d", "name": "D", "provider": "q"}
            ]
        }"#;
        let store = InMemoryStore::from_reader(json.as_bytes()).unwrap();
        let diagnostic = store.diagnostic("q", "d").await.unwrap().unwrap();
        assert_eq!(2, diagnostic.id);
    }
}
