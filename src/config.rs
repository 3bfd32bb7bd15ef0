//! CLI configuration and argument parsing.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use secrecy::SecretString;

use crate::error::{KeteError, Result};
use crate::orchestrator::{OrchestratorConfig, UpgradeTarget};
use crate::provider::ProviderSettings;
use crate::provisioner::ProvisionConfig;
use crate::readiness::ReadinessConfig;
use crate::retry::RetryConfig;
use crate::upgrade::UpgradeConfig;
use crate::workload::{Repo, RunnerConfig, WorkloadSpec};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Cluster lifecycle and end-to-end test orchestrator.
///
/// Provisions or reuses a cluster, waits for it to become healthy, runs test
/// workloads before and after an optional upgrade, and tears the cluster down.
#[derive(Parser, Debug, Clone)]
#[command(name = "kete")]
#[command(about = "Cluster lifecycle and end-to-end test orchestrator")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// Cluster provider
    #[arg(long, default_value = "kubeconfig", env = "KETE_PROVIDER")]
    pub provider: String,

    /// Provider environment
    #[arg(long, default_value = "prod", env = "KETE_ENVIRONMENT")]
    pub environment: String,

    /// Provider API token
    #[arg(long, env = "KETE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Kubeconfig file for the kubeconfig provider
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Reuse an existing cluster instead of launching one
    #[arg(long, env = "CLUSTER_ID")]
    pub cluster_id: Option<String>,

    /// Name for a new cluster (generated when unset)
    #[arg(long, env = "CLUSTER_NAME")]
    pub cluster_name: Option<String>,

    /// Install version for a new cluster
    #[arg(long, env = "CLUSTER_VERSION")]
    pub cluster_version: Option<String>,

    /// Release version to upgrade to after the install phase
    #[arg(long, env = "UPGRADE_RELEASE_VERSION")]
    pub upgrade_version: Option<String>,

    /// Release image to upgrade to (requires --upgrade-version)
    #[arg(long, env = "UPGRADE_IMAGE")]
    pub upgrade_image: Option<String>,

    /// Update channel prefix used for version upgrades
    #[arg(long, default_value = "stable", env = "UPGRADE_CHANNEL_PREFIX")]
    pub channel_prefix: String,

    /// Comma-separated add-on IDs to install before testing
    #[arg(long, env = "ADDON_IDS", value_delimiter = ',')]
    pub addons: Vec<String>,

    /// Consecutive clean health checks required before a cluster is ready
    #[arg(long, default_value = "5", env = "CLEAN_CHECK_RUNS")]
    pub clean_check_runs: u32,

    /// Seconds between readiness health checks
    #[arg(long, default_value = "30", env = "READINESS_INTERVAL_SECONDS")]
    pub readiness_interval_seconds: u64,

    /// Minutes to wait for a cluster to become ready
    #[arg(long, default_value = "135", env = "INSTALL_TIMEOUT_MINUTES")]
    pub install_timeout_minutes: u64,

    /// Minutes to wait for an upgrade to complete
    #[arg(long, default_value = "90", env = "UPGRADE_TIMEOUT_MINUTES")]
    pub upgrade_timeout_minutes: u64,

    /// Keep the cluster after the run
    #[arg(long, default_value = "false", env = "RETAIN_CLUSTER")]
    pub retain_cluster: bool,

    /// Namespace for test workloads
    #[arg(long, default_value = "kete", env = "KETE_NAMESPACE")]
    pub namespace: String,

    /// Test image for a single workload
    #[arg(long, env = "TEST_IMAGE")]
    pub test_image: Option<String>,

    /// Command run by the test image
    #[arg(long, default_value = "", env = "TEST_COMMAND")]
    pub test_command: String,

    /// Name of the single workload
    #[arg(long, default_value = "e2e")]
    pub test_name: String,

    /// Repository to clone into the workload (format: NAME=URL[#BRANCH])
    #[arg(long = "repo", value_name = "NAME=URL")]
    pub repos: Vec<String>,

    /// Environment variable for the workload (format: KEY=VALUE)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub envs: Vec<String>,

    /// Service account for the workload pod
    #[arg(long, env = "TEST_SERVICE_ACCOUNT")]
    pub service_account: Option<String>,

    /// YAML file with a list of workloads (replaces --test-image)
    #[arg(long, env = "KETE_WORKLOADS")]
    pub workloads: Option<PathBuf>,

    /// Directory receiving result artifacts
    #[arg(long, default_value = "report", env = "REPORT_DIR")]
    pub report_dir: PathBuf,

    /// Attempts for transient provider and API failures
    #[arg(long, default_value = "5", env = "KETE_RETRY_ATTEMPTS")]
    pub retry_attempts: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "KETE_LOG_LEVEL")]
    pub log_level: String,

    /// Log format: json or text
    #[arg(long, default_value = "json", env = "KETE_LOG_FORMAT")]
    pub log_format: String,
}

/// Application configuration derived from CLI args.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderSettings,
    pub orchestrator: OrchestratorConfig,
    pub report_dir: PathBuf,
    pub log_level: String,
    pub log_format: String,
}

impl Config {
    /// Create config from CLI arguments.
    pub fn from_args(args: Args) -> Result<Self> {
        if args.provider == "mock" {
            return Err(KeteError::Config(
                "the mock provider launches no real clusters and is only available to library callers".into(),
            ));
        }
        if args.clean_check_runs == 0 {
            return Err(KeteError::Config(
                "--clean-check-runs must be at least 1".into(),
            ));
        }
        if args.upgrade_image.is_some() && args.upgrade_version.is_none() {
            return Err(KeteError::Config(
                "--upgrade-image requires --upgrade-version".into(),
            ));
        }

        let retry = RetryConfig::with_max_attempts(args.retry_attempts);
        let workloads = load_workloads(&args)?;

        let upgrade = args.upgrade_version.as_ref().map(|version| UpgradeTarget {
            version: version.clone(),
            image: args.upgrade_image.clone(),
            channel_prefix: args.channel_prefix.clone(),
        });

        let orchestrator = OrchestratorConfig {
            existing_cluster_id: args.cluster_id,
            provision: ProvisionConfig {
                cluster_name: args.cluster_name,
                version: args.cluster_version,
                upgrade_target: args.upgrade_version,
                addons: args.addons,
                retry: retry.clone(),
            },
            readiness: ReadinessConfig {
                interval: Duration::from_secs(args.readiness_interval_seconds),
                timeout: minutes(args.install_timeout_minutes),
                clean_check_runs: args.clean_check_runs,
            },
            upgrade,
            upgrade_timing: UpgradeConfig {
                timeout: minutes(args.upgrade_timeout_minutes),
                ..UpgradeConfig::default()
            },
            runner: RunnerConfig {
                namespace: args.namespace,
                retry,
                ..RunnerConfig::default()
            },
            workloads,
            retain_cluster: args.retain_cluster,
        };

        Ok(Self {
            provider: ProviderSettings {
                kind: args.provider,
                environment: args.environment,
                credential: args.token.map(SecretString::from),
                kubeconfig: args.kubeconfig,
            },
            orchestrator,
            report_dir: args.report_dir,
            log_level: args.log_level,
            log_format: args.log_format,
        })
    }
}

const fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

fn load_workloads(args: &Args) -> Result<Vec<WorkloadSpec>> {
    if let Some(path) = &args.workloads {
        if args.test_image.is_some() {
            return Err(KeteError::Config(
                "--workloads and --test-image are mutually exclusive".into(),
            ));
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            KeteError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let workloads: Vec<WorkloadSpec> = serde_yaml::from_str(&raw).map_err(|e| {
            KeteError::Config(format!("invalid workloads file {}: {}", path.display(), e))
        })?;
        if let Some(w) = workloads.iter().find(|w| w.image.is_empty()) {
            return Err(KeteError::Config(format!("workload {} has no image", w.name)));
        }
        return Ok(workloads);
    }

    let Some(image) = &args.test_image else {
        return Ok(vec![]);
    };

    let repos = args
        .repos
        .iter()
        .map(|s| parse_repo(s))
        .collect::<Result<Vec<_>>>()?;
    let env = args
        .envs
        .iter()
        .map(|s| {
            parse_pair(s)
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| KeteError::Config(format!("invalid --env {s}, expected KEY=VALUE")))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(vec![WorkloadSpec {
        name: args.test_name.clone(),
        image: image.clone(),
        command: args.test_command.clone(),
        repos,
        env,
        service_account: args.service_account.clone(),
        ..WorkloadSpec::default()
    }])
}

fn parse_pair(s: &str) -> Option<(&str, &str)> {
    s.split_once('=')
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
}

fn parse_repo(s: &str) -> Result<Repo> {
    let (name, target) = parse_pair(s)
        .ok_or_else(|| KeteError::Config(format!("invalid --repo {s}, expected NAME=URL")))?;
    let (url, branch) = match target.rsplit_once('#') {
        Some((url, branch)) if !branch.is_empty() => (url, Some(branch.to_string())),
        _ => (target, None),
    };
    Ok(Repo {
        name: name.to_string(),
        url: url.to_string(),
        branch,
        mount_path: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn create_test_args(test_image: Option<&str>, upgrade_version: Option<&str>) -> Args {
        Args {
            provider: "kubeconfig".to_string(),
            environment: "prod".to_string(),
            token: None,
            kubeconfig: None,
            cluster_id: None,
            cluster_name: None,
            cluster_version: None,
            upgrade_version: upgrade_version.map(String::from),
            upgrade_image: None,
            channel_prefix: "stable".to_string(),
            addons: vec![],
            clean_check_runs: 5,
            readiness_interval_seconds: 30,
            install_timeout_minutes: 135,
            upgrade_timeout_minutes: 90,
            retain_cluster: false,
            namespace: "kete".to_string(),
            test_image: test_image.map(String::from),
            test_command: "make e2e".to_string(),
            test_name: "e2e".to_string(),
            repos: vec![],
            envs: vec![],
            service_account: None,
            workloads: None,
            report_dir: PathBuf::from("report"),
            retry_attempts: 5,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_args(create_test_args(None, None)).unwrap();
        let o = &config.orchestrator;
        assert!(o.upgrade.is_none());
        assert!(o.workloads.is_empty());
        assert_eq!(o.readiness.clean_check_runs, 5);
        assert_eq!(o.readiness.interval, Duration::from_secs(30));
        assert_eq!(o.readiness.timeout, Duration::from_secs(135 * 60));
        assert_eq!(o.upgrade_timing.timeout, Duration::from_secs(90 * 60));
        assert_eq!(o.runner.namespace, "kete");
        assert!(config.provider.credential.is_none());
    }

    #[test]
    fn test_mock_provider_rejected_from_command_line() {
        let args = Args::try_parse_from(["kete", "--provider", "mock"]).unwrap();
        let err = Config::from_args(args).unwrap_err();
        assert!(matches!(err, KeteError::Config(_)));
        assert!(err.to_string().contains("mock provider"));
    }

    #[test]
    fn test_parse_args_from_command_line() {
        let args = Args::try_parse_from([
            "kete",
            "--test-image",
            "quay.io/kete/e2e:latest",
            "--addons",
            "logging,monitoring",
            "--repo",
            "tests=https://example.com/tests.git#release-4.5",
            "--env",
            "FOCUS=conformance",
        ])
        .unwrap();
        let config = Config::from_args(args).unwrap();

        assert_eq!(config.provider.kind, "kubeconfig");
        assert_eq!(
            config.orchestrator.provision.addons,
            vec!["logging", "monitoring"]
        );
        let workload = &config.orchestrator.workloads[0];
        assert_eq!(workload.image, "quay.io/kete/e2e:latest");
        assert_eq!(workload.repos[0].name, "tests");
        assert_eq!(workload.repos[0].url, "https://example.com/tests.git");
        assert_eq!(workload.repos[0].branch.as_deref(), Some("release-4.5"));
        assert_eq!(workload.env.get("FOCUS").map(String::as_str), Some("conformance"));
    }

    #[test]
    fn test_upgrade_target_feeds_install_version() {
        let config = Config::from_args(create_test_args(None, Some("4.5.0"))).unwrap();
        let upgrade = config.orchestrator.upgrade.unwrap();
        assert_eq!(upgrade.version, "4.5.0");
        assert_eq!(upgrade.channel_prefix, "stable");
        assert_eq!(
            config.orchestrator.provision.upgrade_target.as_deref(),
            Some("4.5.0")
        );
    }

    #[test]
    fn test_upgrade_image_requires_version() {
        let mut args = create_test_args(None, None);
        args.upgrade_image = Some("quay.io/release@sha256:abc".to_string());
        let err = Config::from_args(args).unwrap_err();
        assert!(err.to_string().contains("--upgrade-version"));
    }

    #[test]
    fn test_zero_clean_runs_rejected() {
        let mut args = create_test_args(None, None);
        args.clean_check_runs = 0;
        assert!(Config::from_args(args).is_err());
    }

    #[test]
    fn test_invalid_repo_rejected() {
        let mut args = create_test_args(Some("quay.io/kete/e2e:latest"), None);
        args.repos = vec!["no-url".to_string()];
        assert!(Config::from_args(args).is_err());
    }

    #[test]
    fn test_token_is_secret() {
        let mut args = create_test_args(None, None);
        args.token = Some("s3cr3t".to_string());
        let config = Config::from_args(args).unwrap();
        assert!(!format!("{:?}", config.provider).contains("s3cr3t"));
    }

    #[test]
    fn test_workloads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "- name: conformance\n  image: quay.io/kete/e2e:latest\n  command: make conformance\n- name: smoke\n  image: quay.io/kete/smoke:latest\n  resultsPort: 9000"
        )
        .unwrap();
        let mut args = create_test_args(None, None);
        args.workloads = Some(file.path().to_path_buf());

        let config = Config::from_args(args).unwrap();
        let workloads = &config.orchestrator.workloads;
        assert_eq!(workloads.len(), 2);
        assert_eq!(workloads[0].command, "make conformance");
        assert_eq!(workloads[1].results_port, 9000);
        assert_eq!(workloads[1].output_dir, "/test-run-results");
    }

    #[test]
    fn test_workloads_file_conflicts_with_test_image() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut args = create_test_args(Some("quay.io/kete/e2e:latest"), None);
        args.workloads = Some(file.path().to_path_buf());
        assert!(Config::from_args(args).is_err());
    }
}
