//! Command Line Interface (CLI) arguments.

use clap::Parser;

/// REF metric value API command line interface
#[derive(Clone, Debug, Parser)]
#[command(name = "ref-backend", version, about)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "REF_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 8000, env = "REF_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "REF_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/ref-backend/certs/cert.pem",
        env = "REF_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/ref-backend/certs/key.pem",
        env = "REF_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for requests to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "REF_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
    /// Whether to use Rayon for execution of CPU-bound tasks.
    #[arg(long, default_value_t = false, env = "REF_USE_RAYON")]
    pub use_rayon: bool,
    /// Number of threads in the Rayon pool. Defaults to one per CPU.
    #[arg(long, env = "REF_RAYON_THREADS")]
    pub rayon_threads: Option<usize>,
    /// Path to the JSON snapshot of metric values to serve
    #[arg(long, default_value = "data/metric_values.json", env = "REF_DATA_FILE")]
    pub data_file: String,
    /// Path prefix of the API routes
    #[arg(long, default_value = "/api/v1", env = "REF_API_PREFIX")]
    pub api_prefix: String,
    /// Comma-separated allow-list of diagnostic provider slugs. All providers if unset.
    #[arg(long, value_delimiter = ',', env = "REF_DIAGNOSTIC_PROVIDERS")]
    pub diagnostic_providers: Vec<String>,
    /// Comma-separated dimension names that may be used as filters. A CMIP vocabulary if unset.
    #[arg(long, value_delimiter = ',', env = "REF_DIMENSIONS")]
    pub dimensions: Option<Vec<String>>,
    /// Multiplier of the interquartile range used for outlier bounds
    #[arg(long, default_value_t = 3.0, env = "REF_OUTLIER_FACTOR")]
    pub outlier_factor: f64,
    /// Minimum number of models (or values) in a group for outlier detection
    #[arg(long, default_value_t = 4, env = "REF_OUTLIER_MIN_GROUP_SIZE")]
    pub outlier_min_group_size: usize,
    /// Comma-separated dimensions that scalar values are grouped by for outlier detection
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = vec!["statistic".to_string(), "metric".to_string()],
        env = "REF_OUTLIER_GROUP_BY"
    )]
    pub outlier_group_by: Vec<String>,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = CommandLineArgs::try_parse_from(["ref-backend"]).unwrap();
        assert_eq!("0.0.0.0", args.host);
        assert_eq!(8000, args.port);
        assert!(!args.https);
        assert!(!args.use_rayon);
        assert_eq!(None, args.rayon_threads);
        assert_eq!("/api/v1", args.api_prefix);
        assert!(args.diagnostic_providers.is_empty());
        assert_eq!(None, args.dimensions);
        assert_eq!(3.0, args.outlier_factor);
        assert_eq!(4, args.outlier_min_group_size);
        assert_eq!(vec!["statistic", "metric"], args.outlier_group_by);
    }

    #[test]
    fn lists() {
        let args = CommandLineArgs::try_parse_from([
            "ref-backend",
            "--diagnostic-providers",
            "pmp,esmvaltool",
            "--dimensions",
            "source_id,metric",
            "--outlier-group-by",
            "metric",
            "--outlier-factor",
            "1.5",
        ])
        .unwrap();
        assert_eq!(vec!["pmp", "esmvaltool"], args.diagnostic_providers);
        assert_eq!(
            Some(vec!["source_id".to_string(), "metric".to_string()]),
            args.dimensions
        );
        assert_eq!(vec!["metric"], args.outlier_group_by);
        assert_eq!(1.5, args.outlier_factor);
    }

    #[test]
    fn invalid_port() {
        assert!(CommandLineArgs::try_parse_from(["ref-backend", "--port", "http"]).is_err());
    }
}
