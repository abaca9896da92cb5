//! propsync command-line management tool.
//!
//! Provides subcommands for generating and validating configuration,
//! inspecting the resolved directory schema, reading and writing a user's
//! properties, managing the stored attribute mapping table, and viewing the
//! audit log.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use propsync_core::config::AppConfig;
use propsync_core::convert::ConverterRegistry;
use propsync_core::db::Database;
use propsync_core::directory::LdapSession;
use propsync_core::mapping::AttributeMappingTable;
use propsync_core::models::{AuditEntry, PropertyMapping, PropertyValue};
use propsync_core::property_sheet::PropertySynchronizer;
use propsync_core::schema::SchemaResolver;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// propsync command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "propsync",
    version,
    about = "Synchronize LDAP user attributes with application properties"
)]
struct Cli {
    /// Path to the TOML configuration file
    /// (default: <config dir>/propsync/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `propsync_core=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a configuration file template.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./propsync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Resolve the directory schema and show how each attribute converts.
    Schema {
        /// Also list every attribute type the schema resolved.
        #[arg(long)]
        all: bool,
    },

    /// Show the mapped properties of a user.
    Show {
        /// User id as stored in the directory.
        user: String,

        /// Print the properties as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Write properties of a user. Unchanged values are not sent.
    Set {
        /// User id as stored in the directory.
        user: String,

        /// Assignments `name=value`. Values are parsed as JSON when they
        /// can be (`null`, `42`, `true`, `["a","b"]`), otherwise taken as text.
        #[arg(required = true)]
        assignments: Vec<String>,
    },

    /// Manage the stored attribute mapping table.
    Mapping {
        #[command(subcommand)]
        action: MappingAction,
    },

    /// Show recent audit log entries.
    Audit {
        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

#[derive(Subcommand, Debug)]
enum MappingAction {
    /// List the mapping table in effect.
    List,
    /// Copy the `[[attributes]]` table from the config file into the store.
    Import,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => match default_config_path() {
            Ok(path) => path,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                return ExitCode::FAILURE;
            }
        },
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.log_level.as_deref(), &config_path))
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command, &config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// `--log-level`, then `RUST_LOG`, then `[logging].level`, then `warn`.
fn log_filter(cli_level: Option<&str>, config_path: &Path) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level);
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    match AppConfig::load_from_file(config_path) {
        Ok(config) => EnvFilter::new(config.logging.level),
        Err(_) => EnvFilter::new("warn"),
    }
}

fn run(command: Commands, config_path: &Path) -> Result<()> {
    debug!(path = %config_path.display(), "using configuration file");

    match command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(config_path),
        Commands::Schema { all } => cmd_schema(&load_config(config_path)?, all),
        Commands::Show { user, json } => cmd_show(&load_config(config_path)?, &user, json),
        Commands::Set { user, assignments } => {
            cmd_set(&load_config(config_path)?, &user, &assignments)
        }
        Commands::Mapping { action } => cmd_mapping(&load_config(config_path)?, action),
        Commands::Audit { limit } => cmd_audit(&load_config(config_path)?, limit),
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("cannot determine the user configuration directory")?;
    Ok(dir.join("propsync").join("config.toml"))
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path).context("failed to load configuration file")
}

fn open_store(config: &AppConfig) -> Result<Option<Arc<Database>>> {
    let Some(ref path) = config.store.path else {
        return Ok(None);
    };
    let db = Database::new(path).context("failed to open store")?;
    db.initialize().context("failed to initialize store")?;
    Ok(Some(Arc::new(db)))
}

fn require_store(config: &AppConfig) -> Result<Arc<Database>> {
    open_store(config)?.context("no store configured: set [store] path in the config file")
}

/// The stored mapping table when one exists, otherwise the configured one.
fn effective_table(
    config: &AppConfig,
    store: Option<&Database>,
) -> Result<(AttributeMappingTable, &'static str)> {
    if let Some(db) = store {
        let stored = db
            .load_attribute_mappings()
            .context("failed to load stored mapping table")?;
        if !stored.is_empty() {
            return Ok((stored, "store"));
        }
    }
    Ok((AttributeMappingTable::from_config(&config.attributes), "config"))
}

fn build_registry(config: &AppConfig) -> ConverterRegistry {
    let mut registry = ConverterRegistry::with_defaults();
    registry.apply_config(&config.converters);
    registry
}

fn build_synchronizer(config: &AppConfig) -> Result<PropertySynchronizer> {
    let store = open_store(config)?;
    let (table, source) = effective_table(config, store.as_deref())?;
    debug!(source, attributes = table.len(), "mapping table selected");

    let session = Arc::new(LdapSession::new(&config.directory));
    let mut sync = PropertySynchronizer::new(
        session,
        Arc::new(build_registry(config)),
        table,
        SchemaResolver::from_config(config),
    );
    if let Some(db) = store {
        sync = sync.with_audit(db);
    }
    sync.refresh_schema();
    Ok(sync)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let template = r#"# propsync configuration
# See documentation for all available options.

[logging]
level = "info"

[directory]
url = "ldap://ldap.example.com:389"
bind_dn = "cn=propsync,ou=services,dc=example,dc=com"
bind_password_env = "PROPSYNC_BIND_PASSWORD"
users_base = "ou=people,dc=example,dc=com"
users_scope = "sub"
uid_attribute = "uid"
user_object_classes = ["top", "person", "organizationalPerson", "inetOrgPerson"]
timeout_secs = 10
user_cache_ttl_secs = 30

[schema]
# default_syntax = "1.3.6.1.4.1.1466.115.121.1.15"

[store]
# path = "/var/lib/propsync/propsync.db"

[[attributes]]
ldap_name = "cn"
public_name = "fullname"

[[attributes]]
ldap_name = "mail"
public_name = "email"

[[attributes]]
ldap_name = "telephoneNumber"
public_name = "phones"
multivalued = true

# Converter kinds: string, null, integer, numeric, boolean, datetime.
# [[converters]]
# syntax = "1.3.6.1.4.1.1466.115.121.1.15"
# kind = "integer"
# attribute = "employeeNumber"
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("failed to create config directory")?;
    }
    std::fs::write(output, template).context("failed to write config file")?;

    println!("Configuration template written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the directory URL, bind DN and search base");
    println!("  2. Set the bind password variable (PROPSYNC_BIND_PASSWORD)");
    println!("  3. Validate with: propsync validate --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.resolve_env_vars() {
        Ok(()) => println!("  [OK] Environment variable references resolved"),
        Err(e) => println!("  [WARN] {}", e),
    }

    if let Err(e) = config.validate() {
        println!("  [FAIL] Validation error: {}", e);
        anyhow::bail!("configuration validation failed");
    }
    println!("  [OK] All required fields are valid");

    let table = AttributeMappingTable::from_config(&config.attributes);

    println!();
    println!("Configuration summary:");
    println!("  Directory URL : {}", config.directory.url);
    println!(
        "  Bind DN       : {}",
        config.directory.bind_dn.as_deref().unwrap_or("(anonymous)")
    );
    println!(
        "  Bind password : {}",
        if config.directory.bind_password.is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    println!("  Users base    : {}", config.directory.users_base);
    println!("  Object classes: {}", config.directory.user_object_classes.join(", "));
    println!("  Attributes    : {}", table.len());
    println!("  Converters    : {}", config.converters.len());
    println!(
        "  Store         : {}",
        config
            .store
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_schema(config: &AppConfig, all: bool) -> Result<()> {
    let sync = build_synchronizer(config)?;
    let schema = sync.schema();
    let registry = build_registry(config);

    println!("Schema status: {}", schema.status());
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Property", "Attribute", "Values", "Syntax", "Converter"]);

    for bound in sync.table().bind(schema) {
        let d = &bound.descriptor;
        let converter = registry.resolve(bound.syntax.as_ref(), Some(d.directory_name.as_str()));
        let syntax_cell = match bound.syntax.as_ref().and_then(|s| s.syntax.as_deref()) {
            Some(oid) => Cell::new(oid),
            None => Cell::new("unknown").fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(&d.application_name),
            Cell::new(&d.directory_name),
            Cell::new(d.multiplicity),
            syntax_cell,
            Cell::new(converter.name()),
        ]);
    }
    println!("{}", table);
    println!();

    let mut registrations = Table::new();
    registrations.load_preset(UTF8_FULL);
    registrations.set_content_arrangement(ContentArrangement::Dynamic);
    registrations.set_header(vec!["Syntax", "Attribute", "Converter"]);
    for (syntax, name, converter) in registry.registrations() {
        registrations.add_row(vec![
            Cell::new(syntax),
            Cell::new(name.unwrap_or_else(|| "*".to_string())),
            Cell::new(converter),
        ]);
    }
    println!("Converter registrations:");
    println!("{}", registrations);

    if all {
        let mut types = Table::new();
        types.load_preset(UTF8_FULL);
        types.set_content_arrangement(ContentArrangement::Dynamic);
        types.set_header(vec!["Name", "OID", "Syntax", "Superior", "Single"]);
        for (name, info) in schema.entries() {
            types.add_row(vec![
                Cell::new(name),
                Cell::new(&info.oid),
                Cell::new(info.syntax.as_deref().unwrap_or("-")),
                Cell::new(info.superior.as_deref().unwrap_or("-")),
                Cell::new(if info.single_value { "yes" } else { "no" }),
            ]);
        }
        println!();
        println!("Resolved attribute types ({} names):", schema.len());
        println!("{}", types);
    }

    Ok(())
}

fn cmd_show(config: &AppConfig, user: &str, json: bool) -> Result<()> {
    let sync = build_synchronizer(config)?;
    let sheet = sync
        .properties_for_user(user)
        .with_context(|| format!("failed to read properties of '{}'", user))?
        .with_context(|| format!("user '{}' not found in the directory", user))?;

    if json {
        let out = serde_json::to_string_pretty(&sheet.into_properties())
            .context("failed to serialize properties")?;
        println!("{}", out);
        return Ok(());
    }

    println!("User: {} ({})", sheet.user_id(), sheet.dn());
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Property", "Value"]);
    for (name, value) in sheet.properties() {
        let cell = if value.is_null() {
            Cell::new("(none)").fg(Color::DarkGrey)
        } else {
            Cell::new(truncate(&value.to_string(), 80))
        };
        table.add_row(vec![Cell::new(name), cell]);
    }
    println!("{}", table);

    Ok(())
}

fn cmd_set(config: &AppConfig, user: &str, assignments: &[String]) -> Result<()> {
    let desired = parse_assignments(assignments)?;

    let sync = build_synchronizer(config)?;
    let mut sheet = sync
        .read_properties(user)
        .with_context(|| format!("failed to read properties of '{}'", user))?;

    for name in desired.keys() {
        if sync.table().by_application_name(name).is_none() {
            println!("  [SKIP] '{}' is not a mapped property", name);
        }
    }

    let outcome = sync
        .write_properties(&mut sheet, &desired)
        .with_context(|| format!("failed to write properties of '{}'", user))?;

    if outcome.is_noop() {
        println!("No changes for {}.", user);
    } else {
        println!(
            "Updated {} on {}",
            outcome.changed_properties.join(", "),
            outcome.dn
        );
    }
    Ok(())
}

fn cmd_mapping(config: &AppConfig, action: MappingAction) -> Result<()> {
    match action {
        MappingAction::List => {
            let store = open_store(config)?;
            let (mapping, source) = effective_table(config, store.as_deref())?;

            if mapping.is_empty() {
                println!("No attribute mappings configured.");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["#", "Property", "Attribute", "Values"]);
            for (i, d) in mapping.iter().enumerate() {
                table.add_row(vec![
                    Cell::new(i + 1),
                    Cell::new(&d.application_name),
                    Cell::new(&d.directory_name),
                    Cell::new(d.multiplicity),
                ]);
            }
            println!("{}", table);
            println!();
            println!("{} mapping(s) from {}", mapping.len(), source);
            Ok(())
        }
        MappingAction::Import => {
            let db = require_store(config)?;
            let mapping = AttributeMappingTable::from_config(&config.attributes);
            let count = db
                .replace_attribute_mappings(&mapping)
                .context("failed to store mapping table")?;
            db.insert_audit_entry(&AuditEntry::success(
                "mapping_import",
                None,
                &format!("{} attributes", count),
            ))
            .context("failed to record audit entry")?;
            println!("Imported {} attribute mapping(s) into the store.", count);
            Ok(())
        }
    }
}

fn cmd_audit(config: &AppConfig, limit: u32) -> Result<()> {
    let db = require_store(config)?;
    let entries = db
        .list_audit_log(limit)
        .context("failed to list audit entries")?;

    if entries.is_empty() {
        println!("No audit log entries found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Timestamp", "Action", "User", "Result", "Details"]);
    for entry in &entries {
        let result = if entry.success {
            Cell::new("ok").fg(Color::Green)
        } else {
            Cell::new("failed").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(entry.timestamp.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&entry.action),
            Cell::new(entry.user_id.as_deref().unwrap_or("-")),
            result,
            Cell::new(truncate(&entry.details, 50)),
        ]);
    }
    println!("{}", table);
    println!();
    println!("{} entries shown", entries.len());

    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn parse_assignments(assignments: &[String]) -> Result<PropertyMapping> {
    let mut desired = PropertyMapping::new();
    for assignment in assignments {
        let (name, raw) = assignment
            .split_once('=')
            .with_context(|| format!("invalid assignment '{}': expected name=value", assignment))?;
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("invalid assignment '{}': empty property name", assignment);
        }
        desired.insert(name.to_string(), parse_value(raw));
    }
    Ok(desired)
}

fn parse_value(raw: &str) -> PropertyValue {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => PropertyValue::from_json(&value),
        Err(_) => PropertyValue::text(raw),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
