use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use rolemap::{
    AttributeSet, Options,
    config::{ConfigError, RolemapConfig, STARTER_CONFIG},
    hooks::{Activation, HostEnvironment, Integration, NoticeLevel},
    observability, pipeline,
    pipeline::LoginError,
    reconcile::Account,
    store::MemoryAccountStore,
};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "rolemap.toml";

/// CLI arguments for rolemap
#[derive(Parser, Debug)]
#[command(version, about = "SSO attribute to role/user mapper", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults to ./rolemap.toml if it exists,
    /// otherwise built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run one login against an in-memory account store and print the result
    Evaluate {
        /// JSON object of IdP attributes (name → string or list of strings)
        #[arg(short, long)]
        attributes: PathBuf,
        /// JSON account to seed the store with, as if it already existed
        #[arg(long)]
        account: Option<PathBuf>,
    },
    /// Validate the configuration and print the compiled mapping table
    Check,
    /// Write a starter configuration file
    Init {
        /// Path to create the config file (defaults to ./rolemap.toml)
        #[arg(short, long)]
        output: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Export the JSON schema for the configuration file
    Schema {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Show enabled compile-time features
    Features,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Command::Evaluate {
            attributes,
            account,
        } => {
            let config = load_config(args.config.as_deref());
            init_observability(&config);
            run_evaluate(config, &attributes, account.as_deref()).await;
        }
        Command::Check => {
            let config = load_config(args.config.as_deref());
            init_observability(&config);
            run_check(config);
        }
        Command::Init { output, force } => {
            run_init(output, force);
        }
        Command::Schema { output } => {
            #[cfg(feature = "json-schema")]
            run_schema_export(output);
            #[cfg(not(feature = "json-schema"))]
            {
                let _ = output;
                eprintln!("Error: JSON schema export requires the 'json-schema' feature");
                std::process::exit(1);
            }
        }
        Command::Features => {
            run_features();
        }
    }
}

/// Load the explicit config, else `./rolemap.toml`, else defaults.
fn load_config(explicit_path: Option<&str>) -> RolemapConfig {
    let path = match explicit_path {
        Some(path) => Some(PathBuf::from(path)),
        None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
    };

    let Some(path) = path else {
        return RolemapConfig::default();
    };

    match RolemapConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn init_observability(config: &RolemapConfig) {
    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }
}

/// Build the integration the way a host would at startup.
fn activate(config: RolemapConfig, store: MemoryAccountStore) -> Activation {
    let options = Options::new().with_override(config);
    let activation =
        Integration::activate(&options, Arc::new(store), &HostEnvironment::default());
    for notice in &activation.notices {
        let label = match notice.level {
            NoticeLevel::Error => "error",
            NoticeLevel::Warning => "warning",
        };
        eprintln!("{}: {}", label, notice.message);
    }
    activation
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e, path.to_path_buf()))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Run one login and print the report as JSON.
async fn run_evaluate(config: RolemapConfig, attributes: &Path, account: Option<&Path>) {
    let attrs: AttributeSet = match read_json(attributes) {
        Ok(attrs) => attrs,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read attributes");
            std::process::exit(1);
        }
    };
    let store = match account.map(read_json::<Account>).transpose() {
        Ok(seed) => MemoryAccountStore::with_accounts(seed),
        Err(e) => {
            tracing::error!(error = %e, "Failed to read account");
            std::process::exit(1);
        }
    };

    let Some(integration) = activate(config, store).integration else {
        tracing::error!("Single sign-on is disabled by the activation checks");
        std::process::exit(1);
    };

    let output = match pipeline::login(&integration, attrs).await {
        Ok(report) => serde_json::to_value(&report),
        Err(LoginError::Denied(denied)) => Ok(serde_json::json!({
            "denied": { "code": denied.code(), "message": denied.to_string() }
        })),
        Err(e) => {
            tracing::error!(error = %e, "Login failed");
            std::process::exit(1);
        }
    };

    match output.and_then(|value| serde_json::to_string_pretty(&value)) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize result");
            std::process::exit(1);
        }
    }
}

/// Validate configuration, key material and settings; print the rule table.
fn run_check(config: RolemapConfig) {
    if let Err(e) = config.sso.check_key_material() {
        tracing::error!(error = %e, "Key material check failed");
        std::process::exit(1);
    }

    let Some(integration) = activate(config, MemoryAccountStore::new()).integration else {
        tracing::error!("Configuration check failed");
        std::process::exit(1);
    };
    let settings = integration.settings();

    println!("Configuration OK\n");
    println!(
        "Deny unmapped users: {}",
        if settings.deny_unmapped_users { "yes" } else { "no" }
    );
    println!(
        "Default user:        {}",
        settings.policy.default_user.as_deref().unwrap_or("(none)")
    );
    println!("User precedence:     {:?}", settings.policy.user_precedence);
    println!("Login attribute:     {}", settings.names.login);
    println!();

    if settings.mapping.is_empty() {
        println!("Mapping rules: (none)");
        return;
    }
    println!("Mapping rules ({}):", settings.mapping.rule_count());
    for entry in settings.mapping.attributes() {
        println!("  {}:", entry.attribute);
        for (value, directive) in &entry.rules {
            println!("    {:<32} => {}", value, directive);
        }
    }
}

/// Create a starter configuration file.
fn run_init(output: Option<String>, force: bool) {
    let output_path = output
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output_path, STARTER_CONFIG) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("To validate it, run:");
    println!("  rolemap --config {} check", output_path.display());
}

/// Export JSON schema for the configuration file to file or stdout
#[cfg(feature = "json-schema")]
fn run_schema_export(output: Option<String>) {
    let content = match RolemapConfig::json_schema_string() {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &content) {
                eprintln!("Failed to write to {}: {}", path, e);
                std::process::exit(1);
            }
            eprintln!("Config JSON schema written to {}", path);
        }
        None => {
            println!("{}", content);
        }
    }
}

fn run_features() {
    let version = env!("CARGO_PKG_VERSION");

    let features: &[(&str, &str, bool)] = &[
        ("cli", "Execution", cfg!(feature = "cli")),
        ("server", "Execution", cfg!(feature = "server")),
        ("prometheus", "Observability", cfg!(feature = "prometheus")),
        ("json-schema", "Export", cfg!(feature = "json-schema")),
    ];

    let profile = if cfg!(feature = "full") {
        "full"
    } else if cfg!(feature = "minimal") {
        "minimal"
    } else {
        "custom"
    };

    println!("rolemap v{version}\n");
    println!("Build profile: {profile}");
    match profile {
        "full" => println!("  (full = minimal + prometheus, json-schema)\n"),
        "minimal" => println!("  (minimal = CLI with logging, no optional exporters)\n"),
        _ => println!(),
    }

    println!("Compile-time features:");

    let mut current_group = "";
    for &(name, group, enabled) in features {
        if group != current_group {
            if !current_group.is_empty() {
                println!();
            }
            println!("  {group}:");
            current_group = group;
        }
        let status = if enabled { "enabled" } else { "disabled" };
        println!("    {name:<32} {status}");
    }
}
