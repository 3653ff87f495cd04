//! CLI command handlers.
//!
//! Handlers wire the library crates together; the helpers they share are
//! public so the integration tests can drive them without a terminal.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::json;
use steward_automation::{
    ExternalSystemClient, InMemoryAutomationServer, JenkinsClient, JenkinsConfig, render_config,
};
use steward_core::{AutomationSettings, StewardConfig};
use steward_reconciler::{
    AUTO_SYNC_ANNOTATION, Controller, SPEC_HASH_ANNOTATION, SYNC_STATUS_ANNOTATION,
    ShutdownCoordinator, ShutdownSignal, TracingEventRecorder, install_signal_handlers, spec_hash,
    status,
};
use steward_store::{InMemoryObjectStore, ManagedResource, ObjectKey, ObjectStore, parse_manifests};
use tracing::{info, warn};

use crate::cli::Commands;

/// How long `demo` waits for each step to converge.
const DEMO_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Command-line values that take precedence over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub workers: Option<usize>,
    pub namespace: Option<String>,
    pub automation_url: Option<String>,
    pub automation_user: Option<String>,
    pub automation_token: Option<String>,
}

/// Execute a CLI command.
///
/// This is the main command dispatcher that routes to the appropriate handler.
pub async fn execute_command(config_path: Option<PathBuf>, command: Commands) -> Result<()> {
    let config = load_config(config_path.as_deref())?;

    match command {
        Commands::Run {
            manifests,
            workers,
            namespace,
            automation_url,
            automation_user,
            automation_token,
            in_memory,
        } => {
            let overrides = Overrides {
                workers,
                namespace,
                automation_url,
                automation_user,
                automation_token,
            };
            cmd_run(apply_overrides(config, overrides)?, &manifests, in_memory).await
        }

        Commands::Demo { namespace, name } => cmd_demo(config, ObjectKey::new(namespace, name)).await,

        Commands::Hash { file } => {
            println!("{}", spec_hash(&read_spec(file.as_deref())?));
            Ok(())
        }

        Commands::Render { file } => {
            println!("{}", render_config(&read_spec(file.as_deref())?));
            Ok(())
        }

        Commands::CheckConfig => {
            println!("{}", effective_config(&config)?);
            Ok(())
        }
    }
}

/// Load configuration from `path`, or defaults when no file is given.
///
/// # Errors
///
/// Returns an error when the file is unreadable, malformed, or out of range.
pub fn load_config(path: Option<&Path>) -> Result<StewardConfig> {
    StewardConfig::load_or_default(path).with_context(|| match path {
        Some(p) => format!("Failed to load configuration from {}", p.display()),
        None => "Default configuration is invalid".to_string(),
    })
}

/// Layer command-line overrides on top of `config` and re-validate.
///
/// # Errors
///
/// Returns an error when the merged configuration does not validate.
pub fn apply_overrides(mut config: StewardConfig, overrides: Overrides) -> Result<StewardConfig> {
    if let Some(workers) = overrides.workers {
        config.controller.workers = workers;
    }
    if overrides.namespace.is_some() {
        config.controller.namespace = overrides.namespace;
    }
    let automation = &mut config.automation;
    if overrides.automation_url.is_some() {
        automation.url = overrides.automation_url;
    }
    if overrides.automation_user.is_some() {
        automation.username = overrides.automation_user;
    }
    if overrides.automation_token.is_some() {
        automation.token = overrides.automation_token;
    }
    config
        .validate()
        .context("Command-line overrides produce an invalid configuration")?;
    Ok(config)
}

/// Parse every manifest file and create its resources in `store`.
///
/// Returns how many resources were created.
///
/// # Errors
///
/// Returns an error naming the file that could not be read, parsed, or stored.
pub async fn load_manifests(store: &dyn ObjectStore, paths: &[PathBuf]) -> Result<usize> {
    let mut created = 0usize;
    for path in paths {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let resources = parse_manifests(&raw)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))?;
        for resource in resources {
            let key = resource.key();
            store
                .create(resource)
                .await
                .with_context(|| format!("Failed to create {key} from {}", path.display()))?;
            created = created.saturating_add(1);
        }
    }
    Ok(created)
}

/// Read a spec document (JSON or YAML) from `file`, or stdin when `None`.
///
/// # Errors
///
/// Returns an error when the input cannot be read or parsed.
pub fn read_spec(file: Option<&Path>) -> Result<serde_json::Value> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read spec from stdin")?;
            buf
        }
    };
    serde_yaml::from_str(&raw).context("Spec is neither valid JSON nor YAML")
}

/// Pick the automation backend: Jenkins when a URL is configured, otherwise
/// the in-memory server.
///
/// # Errors
///
/// Returns an error when the configured URL is unusable.
pub fn build_client(
    settings: &AutomationSettings,
    in_memory: bool,
) -> Result<Arc<dyn ExternalSystemClient>> {
    match settings.url.as_deref() {
        Some(url) if !in_memory => {
            let mut jenkins =
                JenkinsConfig::new(url).with_timeout(settings.request_timeout());
            match (&settings.username, &settings.token) {
                (Some(user), Some(token)) => jenkins = jenkins.with_credentials(user, token),
                (Some(_), None) | (None, Some(_)) => {
                    warn!("Automation credentials need both username and token, connecting anonymously");
                }
                (None, None) => {}
            }
            let client = JenkinsClient::new(jenkins).context("Invalid automation server URL")?;
            info!(url, "Using Jenkins automation server");
            Ok(Arc::new(client))
        }
        _ => {
            info!("Using in-memory automation server");
            Ok(Arc::new(InMemoryAutomationServer::new()))
        }
    }
}

/// Effective configuration as TOML, with secrets masked.
///
/// # Errors
///
/// Returns an error if the configuration cannot be serialized.
pub fn effective_config(config: &StewardConfig) -> Result<String> {
    let mut shown = config.clone();
    if shown.automation.token.is_some() {
        shown.automation.token = Some("<redacted>".to_string());
    }
    toml::to_string_pretty(&shown).context("Failed to serialize configuration")
}

/// Run the controller until a shutdown signal arrives.
async fn cmd_run(config: StewardConfig, manifests: &[PathBuf], in_memory: bool) -> Result<()> {
    let store = InMemoryObjectStore::new_arc();
    let loaded = load_manifests(store.as_ref(), manifests).await?;
    info!(resources = loaded, "Loaded manifests");

    let client = build_client(&config.automation, in_memory)?;
    let workers = config.controller.workers;
    let controller = Controller::new(store, client, Arc::new(TracingEventRecorder), config)
        .context("Failed to build controller")?;

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let signals = install_signal_handlers(Arc::clone(&shutdown));

    info!("Steward is running. Press Ctrl+C to stop.");
    let stop = {
        let shutdown = Arc::clone(&shutdown);
        async move {
            let signal = shutdown.wait().await;
            info!(signal = %signal, "Shutting down");
        }
    };
    controller
        .run(workers, stop)
        .await
        .context("Controller failed")?;

    signals.abort();
    info!("Steward stopped gracefully");
    Ok(())
}

/// Create, edit and delete one resource against in-memory backends,
/// printing each converged state.
async fn cmd_demo(config: StewardConfig, key: ObjectKey) -> Result<()> {
    let store = InMemoryObjectStore::new_arc();
    let server = Arc::new(InMemoryAutomationServer::new());
    let workers = config.controller.workers;
    let controller = Arc::new(
        Controller::new(
            store.clone(),
            server.clone(),
            Arc::new(TracingEventRecorder),
            config,
        )
        .context("Failed to build controller")?,
    );

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let running = {
        let controller = Arc::clone(&controller);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            controller
                .run(workers, async move {
                    shutdown.wait().await;
                })
                .await
        })
    };

    let mut ready = controller.readiness();
    tokio::time::timeout(DEMO_STEP_TIMEOUT, ready.wait_for(|synced| *synced))
        .await
        .context("Caches did not sync in time")?
        .context("Controller stopped before caches synced")?;

    let first = json!({"jenkinsfile": "pipeline { agent any; stages { stage('build') { steps { echo 'v1' } } } }"});
    let second = json!({"jenkinsfile": "pipeline { agent any; stages { stage('build') { steps { echo 'v2' } } } }"});

    store
        .create(
            ManagedResource::new(key.namespace(), key.name(), first.clone())
                .with_annotation(AUTO_SYNC_ANNOTATION, "true"),
        )
        .await
        .with_context(|| format!("Failed to create {key}"))?;
    let synced = wait_for_hash(store.as_ref(), &key, &spec_hash(&first)).await?;
    println!("created  {key}: {}", describe(&synced));

    edit_spec(store.as_ref(), &key, &second).await?;
    let synced = wait_for_hash(store.as_ref(), &key, &spec_hash(&second)).await?;
    println!("updated  {key}: {}", describe(&synced));

    store
        .delete(&key)
        .await
        .with_context(|| format!("Failed to delete {key}"))?;
    wait_for_removal(store.as_ref(), &key).await?;
    println!("deleted  {key}: external jobs remaining = {}", server.len().await);

    shutdown.initiate_shutdown(ShutdownSignal::Programmatic);
    running
        .await
        .context("Controller task failed")?
        .context("Controller failed")?;
    Ok(())
}

fn describe(object: &ManagedResource) -> String {
    format!(
        "status={} hash={}",
        object.annotation(SYNC_STATUS_ANNOTATION).unwrap_or("-"),
        object.annotation(SPEC_HASH_ANNOTATION).unwrap_or("-"),
    )
}

async fn wait_for_hash(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    hash: &str,
) -> Result<ManagedResource> {
    let deadline = tokio::time::Instant::now() + DEMO_STEP_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if let Some(object) = store.get(key).await? {
            if object.annotation(SYNC_STATUS_ANNOTATION) == Some(status::SUCCESSFUL)
                && object.annotation(SPEC_HASH_ANNOTATION) == Some(hash)
            {
                return Ok(object);
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("{key} did not sync to {hash} within {DEMO_STEP_TIMEOUT:?}")
}

async fn wait_for_removal(store: &dyn ObjectStore, key: &ObjectKey) -> Result<()> {
    let deadline = tokio::time::Instant::now() + DEMO_STEP_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if store.get(key).await?.is_none() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("{key} was not removed within {DEMO_STEP_TIMEOUT:?}")
}

async fn edit_spec(store: &dyn ObjectStore, key: &ObjectKey, spec: &serde_json::Value) -> Result<()> {
    for _ in 0..10 {
        let current = store
            .get(key)
            .await?
            .with_context(|| format!("{key} disappeared"))?;
        match store.update(current.with_spec(spec.clone())).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_conflict() => continue,
            Err(e) => return Err(e).with_context(|| format!("Failed to update {key}")),
        }
    }
    bail!("{key} kept changing underneath the edit")
}
