use crate::cli::CommandLineArgs;
use crate::error::RefError;
use crate::filter::DimensionRegistry;
use crate::outliers::OutlierConfig;
use crate::store::{InMemoryStore, MetricValueStore};

use std::path::Path;
use std::sync::Arc;

use expanduser::expanduser;
use hashbrown::HashSet;
use validator::Validate;

/// Shared application state passed to each request handler.
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Metric value store.
    pub store: Arc<dyn MetricValueStore>,

    /// Dimensions that may be used as filters.
    pub dimensions: DimensionRegistry,

    /// Outlier detection parameters.
    pub outlier_config: OutlierConfig,

    /// Provider slugs whose diagnostics are served. `None` allows every provider.
    pub allowed_providers: Option<HashSet<String>>,
}

impl AppState {
    /// Create and return an [AppState], loading the store from the configured data file.
    pub fn new(args: &CommandLineArgs) -> Result<Self, RefError> {
        let path = expanduser(&args.data_file)?;
        let store = InMemoryStore::from_path(Path::new(&path))?;
        Self::with_store(args, Arc::new(store))
    }

    /// Create and return an [AppState] using the given store.
    ///
    /// Validates the dimension vocabulary and the outlier detection parameters.
    pub fn with_store(
        args: &CommandLineArgs,
        store: Arc<dyn MetricValueStore>,
    ) -> Result<Self, RefError> {
        let dimensions = match &args.dimensions {
            Some(names) => DimensionRegistry::new(names.iter().map(|name| name.trim()))?,
            None => DimensionRegistry::default_vocabulary(),
        };

        let outlier_config = OutlierConfig {
            factor: args.outlier_factor,
            min_group_size: args.outlier_min_group_size,
            group_by: args
                .outlier_group_by
                .iter()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
        };
        outlier_config
            .validate()
            .map_err(RefError::InvalidOutlierConfig)?;

        let allowed_providers: HashSet<String> = args
            .diagnostic_providers
            .iter()
            .map(|slug| slug.trim().to_string())
            .filter(|slug| !slug.is_empty())
            .collect();

        Ok(Self {
            args: args.clone(),
            store,
            dimensions,
            outlier_config,
            allowed_providers: (!allowed_providers.is_empty()).then_some(allowed_providers),
        })
    }

    /// Whether diagnostics of this provider are served.
    pub fn is_provider_allowed(&self, provider_slug: &str) -> bool {
        self.allowed_providers
            .as_ref()
            .map_or(true, |allowed| allowed.contains(provider_slug))
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;
