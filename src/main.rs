//! Shibboleth Simulator Agent
//!
//! Sits in front of an application and behaves like a Shibboleth SP talking
//! to a fake IdP: test users log in through a chooser page and the
//! application receives the usual SP headers, no federation required.

mod attributes;
mod config;
mod directory;
mod error;
mod headers;
mod pages;
mod router;
mod server;
mod session;
mod upstream;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use attributes::{filter_by_name, AttributePipeline};
use config::{SimulatorConfig, SimulatorConfigJson};
use directory::{ComputedIdHasher, DirectoryLoader, RecordDefaults};
use router::SimulatorAgent;
use server::{build_router, AppState};
use session::{spawn_cleanup_task, SessionStore};
use upstream::HttpUpstream;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "shibsim-agent")]
#[command(about = "Shibboleth SSO simulator in front of a web application")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080", env = "SHIBSIM_LISTEN")]
    listen: String,

    /// Base URL of the wrapped application
    #[arg(long, env = "SHIBSIM_UPSTREAM")]
    upstream: Option<String>,

    /// YAML file with the test users
    #[arg(long, env = "SHIBSIM_USERS_FILE")]
    users_file: Option<PathBuf>,

    /// Entity ID of the simulated SP
    #[arg(long, env = "SHIBSIM_SP_ENTITY_ID")]
    sp_entity_id: Option<String>,

    /// JSON configuration file (applied over the command line settings)
    #[arg(long, env = "SHIBSIM_CONFIG")]
    config: Option<PathBuf>,

    /// Path of the session database
    #[arg(long, env = "SHIBSIM_SESSION_STORE_PATH")]
    session_store_path: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, env = "SHIBSIM_VERBOSE")]
    verbose: bool,

    /// Always show the chooser, even with an existing IdP session
    #[arg(long, env = "SHIBSIM_NO_SSO")]
    no_sso: bool,
}

/// Build the simulator configuration from arguments and the optional JSON file.
fn build_config(args: &Args) -> Result<SimulatorConfig> {
    let mut config = SimulatorConfig::default();

    if let Some(ref url) = args.upstream {
        config.upstream_url = url.clone();
    }
    if let Some(ref path) = args.users_file {
        config.users_file = path.clone();
    }
    if let Some(ref id) = args.sp_entity_id {
        config.sp_entity_id = id.clone();
    }
    if let Some(ref path) = args.session_store_path {
        config.session_store_path = path.clone();
    }
    if args.no_sso {
        config.sso_enabled = false;
    }
    if args.verbose {
        config.debug = true;
    }

    if let Some(ref path) = args.config {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let json: SimulatorConfigJson = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        json.apply_to(&mut config);
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let config = build_config(&args)?;

    // Initialize tracing
    let log_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("{}={}", env!("CARGO_CRATE_NAME"), log_level))
        .json()
        .init();

    info!("Starting Shibboleth Simulator Agent");

    info!(
        sp_entity_id = %config.sp_entity_id,
        users_file = ?config.users_file,
        record_filter = %config.record_filter,
        sso_enabled = config.sso_enabled,
        upstream = %config.upstream_url,
        "Configuration loaded"
    );

    let filter = filter_by_name(&config.record_filter)?;

    // Fail fast when there is nobody to log in as
    let loader = DirectoryLoader::new(
        config.users_file.clone(),
        RecordDefaults {
            idp_id: config.default_idp_id.clone(),
            idp_scope: config.default_idp_scope.clone(),
        },
    );
    let directory = loader.get().context("Failed to load user directory")?;

    let session_store = Arc::new(
        SessionStore::open(config.session_store_path.clone(), config.session_ttl_secs)
            .context("Failed to initialize session store")?,
    );
    info!(path = ?config.session_store_path, "Session store initialized");

    info!("Starting session cleanup task");
    let _cleanup_handle = spawn_cleanup_task(Arc::clone(&session_store), config.cleanup_interval_secs);

    let upstream = HttpUpstream::new(
        &config.upstream_url,
        Duration::from_secs(config.upstream_timeout_secs),
    )?;

    let pipeline = AttributePipeline::new(
        config.sp_entity_id.clone(),
        filter,
        Arc::new(ComputedIdHasher),
    );
    let agent = SimulatorAgent::new(config, directory, pipeline);

    let app = build_router(Arc::new(AppState {
        agent,
        sessions: session_store,
        upstream: Arc::new(upstream),
    }));

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;

    info!(listen = %args.listen, "Starting agent server");
    axum::serve(listener, app).await.context("Agent server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["shibsim-agent"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_from_empty_args() {
        let config = build_config(&args(&[])).unwrap();
        assert!(config.sso_enabled);
        assert!(!config.debug);
        assert_eq!(config.upstream_url, "http://127.0.0.1:3000");
    }

    #[test]
    fn test_args_override_defaults() {
        let config = build_config(&args(&[
            "--upstream",
            "http://app:9000",
            "--sp-entity-id",
            "https://sp.test/shibboleth",
            "--users-file",
            "/tmp/users.yml",
            "--no-sso",
            "--verbose",
        ]))
        .unwrap();

        assert_eq!(config.upstream_url, "http://app:9000");
        assert_eq!(config.sp_entity_id, "https://sp.test/shibboleth");
        assert_eq!(config.users_file, PathBuf::from("/tmp/users.yml"));
        assert!(!config.sso_enabled);
        assert!(config.debug);
    }

    #[test]
    fn test_json_config_applied_over_args() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"sp-entity-id": "https://json.test/sp", "record-filter": "strip-internal", "protected-paths": ["/secure"]}}"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = build_config(&args(&[
            "--sp-entity-id",
            "https://cli.test/sp",
            "--config",
            &path,
        ]))
        .unwrap();

        assert_eq!(config.sp_entity_id, "https://json.test/sp");
        assert_eq!(config.record_filter, "strip-internal");
        assert_eq!(config.protected_paths, vec!["/secure".to_string()]);
    }

    #[test]
    fn test_invalid_json_config_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let path = file.path().to_str().unwrap().to_string();
        assert!(build_config(&args(&["--config", &path])).is_err());
    }
}
