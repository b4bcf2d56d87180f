use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use comfy_table::{presets::ASCII_FULL_CONDENSED, Attribute, Cell, Color, Table};
use console::style;
use libtrackify::{
    targets::normalize_key, CancellationToken, IpLookup, ProbeConfig, RunReport, TargetRegistry,
    Tracker, WhoisRecord,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Deserialize, Serialize)]
struct Config {
    #[serde(default)]
    probe: ProbeSection,
    #[serde(default)]
    targets: TargetSection,
}

#[derive(Debug, Deserialize, Serialize)]
struct ProbeSection {
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default)]
    max_workers: Option<usize>,
    #[serde(default)]
    user_agent: Option<String>,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_workers: None,
            user_agent: None,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct TargetSection {
    #[serde(default)]
    always: Vec<String>,
    #[serde(default)]
    never: Vec<String>,
}

impl Config {
    fn probe_config(&self) -> ProbeConfig {
        let defaults = ProbeConfig::default();
        ProbeConfig {
            timeout: Duration::from_secs(self.probe.timeout_secs.max(1)),
            max_workers: self.probe.max_workers.filter(|&n| n > 0),
            user_agent: self.probe.user_agent.clone().unwrap_or(defaults.user_agent),
        }
    }
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("trackify").join("config.toml"))
}

fn load_config(explicit: Option<&Path>) -> Config {
    let Some(path) = explicit.map(Path::to_path_buf).or_else(config_path) else {
        return Config::default();
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            if explicit.is_some() {
                warn!(path = %path.display(), error = %e, "Could not read config, using defaults");
            }
            return Config::default();
        }
    };

    match toml::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
            Config::default()
        }
    }
}

fn get_default_config_toml() -> String {
    r#"# trackify configuration

[probe]
# Per-request timeout in seconds
timeout_secs = 10
# Maximum concurrent probes per username (defaults to the number of CPUs)
# max_workers = 8
# user_agent = "trackify"

[targets]
# Platforms to check when no --target is given (empty means all)
# always = ["github", "twitter", "product_hunt"]
always = []

# Platforms to leave out when no --target is given
# never = ["periscope", "stumbleupon"]
never = []
"#
    .to_string()
}

/// Works out which targets to probe. Explicit `--target` flags win over the
/// config file. Returns `None` when the config excludes every target.
fn apply_config_to_targets(
    requested: Vec<String>,
    config: &Config,
    registry: &TargetRegistry,
) -> Option<Vec<String>> {
    if !requested.is_empty() {
        return Some(requested);
    }

    let always = &config.targets.always;
    let never: HashSet<String> = config.targets.never.iter().map(|k| normalize_key(k)).collect();

    if never.is_empty() {
        return Some(always.clone());
    }

    let mut selection: Vec<String> = if always.is_empty() {
        registry.all_targets().map(|t| t.key().to_string()).collect()
    } else {
        always.clone()
    };
    selection.retain(|key| !never.contains(&normalize_key(key)));
    selection.sort();

    if selection.is_empty() {
        None
    } else {
        Some(selection)
    }
}

#[derive(Parser, Debug)]
#[command(name = "trackify")]
#[command(
    about = "Track online accounts for usernames and look up IP addresses",
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Output results as NDJSON stream (one JSON object per line)
    #[arg(long, short = 'j', global = true)]
    ndjson: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the default config to stdout and exit
    #[arg(long)]
    print_default_config: bool,

    /// Write the default config to the config path and exit
    #[arg(long)]
    write_default_config: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Track online accounts for the given usernames
    Username {
        /// Usernames to track
        #[arg(required = true)]
        usernames: Vec<String>,

        /// Platform to check, may be repeated (defaults to all known platforms)
        #[arg(long = "target", short = 't')]
        targets: Vec<String>,
    },
    /// Look up geolocation details for the given IP addresses
    Ip {
        /// IP addresses to look up
        #[arg(required = true)]
        ips: Vec<String>,
    },
    /// List the known platforms
    Targets,
}

#[derive(Debug, Serialize)]
struct TargetCheckResult<'a> {
    identity: &'a str,
    target: &'a str,
    found: bool,
}

#[derive(Debug, Serialize)]
struct IpLookupResult<'a> {
    query: &'a str,
    #[serde(flatten)]
    record: &'a WhoisRecord,
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.print_default_config {
        println!("{}", get_default_config_toml());
        return Ok(());
    }

    if args.write_default_config {
        let path = args
            .config
            .clone()
            .or_else(config_path)
            .ok_or("Could not determine config path")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, get_default_config_toml())?;
        println!("Default config written to: {}", path.display());
        return Ok(());
    }

    let Some(command) = args.command else {
        Args::command().print_help()?;
        std::process::exit(2);
    };

    let config = load_config(args.config.as_deref());
    let registry = Arc::new(TargetRegistry::builtin()?);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(dispatch(command, config, registry, args.ndjson))
}

async fn dispatch(
    command: Command,
    config: Config,
    registry: Arc<TargetRegistry>,
    ndjson: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding requests");
            signal.cancel();
        }
    });

    match command {
        Command::Username { usernames, targets } => {
            let selection = apply_config_to_targets(targets, &config, &registry)
                .ok_or("Every target is excluded by the config's never list")?;
            run_usernames(&cancel, registry, &config, &usernames, &selection, ndjson).await
        }
        Command::Ip { ips } => run_ips(&cancel, &config, &ips, ndjson).await,
        Command::Targets => {
            write_targets(&mut io::stdout().lock(), &registry, ndjson)?;
            Ok(())
        }
    }
}

async fn run_usernames(
    cancel: &CancellationToken,
    registry: Arc<TargetRegistry>,
    config: &Config,
    usernames: &[String],
    selection: &[String],
    ndjson: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let tracker = Tracker::with_config(registry, config.probe_config())?;

    let mut output = Ok(());
    tracker
        .track_identities(cancel, usernames, selection, |report| {
            info!(
                identity = %report.identity,
                found = report.found().count(),
                elapsed_ms = report.duration.as_millis() as u64,
                "Tracking finished"
            );
            if output.is_ok() {
                output = write_report(&mut io::stdout().lock(), &report, ndjson);
            }
        })
        .await?;

    Ok(output?)
}

async fn run_ips(
    cancel: &CancellationToken,
    config: &Config,
    ips: &[String],
    ndjson: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let lookup = IpLookup::from_config(&config.probe_config())?;

    let mut output = Ok(());
    let result = lookup
        .lookup_all(cancel, ips, |ip, record| {
            if output.is_ok() {
                output = write_whois(&mut io::stdout().lock(), ip, &record, ndjson);
            }
        })
        .await;

    output?;
    Ok(result?)
}

fn write_report<W: Write>(out: &mut W, report: &RunReport, ndjson: bool) -> io::Result<()> {
    if ndjson {
        for entry in &report.entries {
            let line = TargetCheckResult {
                identity: &report.identity,
                target: &entry.target,
                found: entry.found,
            };
            writeln!(out, "{}", serde_json::to_string(&line)?)?;
        }
    } else {
        write!(out, "{}", render_report(report))?;
    }
    out.flush()
}

fn write_whois<W: Write>(
    out: &mut W,
    ip: &str,
    record: &WhoisRecord,
    ndjson: bool,
) -> io::Result<()> {
    if ndjson {
        let line = IpLookupResult { query: ip, record };
        writeln!(out, "{}", serde_json::to_string(&line)?)?;
    } else {
        write!(out, "{}", render_whois(ip, record))?;
    }
    out.flush()
}

fn write_targets<W: Write>(
    out: &mut W,
    registry: &TargetRegistry,
    ndjson: bool,
) -> io::Result<()> {
    let mut rows: Vec<(String, String)> = registry
        .all_targets()
        .map(|t| (t.key().to_string(), t.display_name().to_string()))
        .collect();
    rows.sort();

    if ndjson {
        for (key, name) in &rows {
            writeln!(out, "{}", serde_json::json!({ "key": key, "name": name }))?;
        }
    } else {
        let mut table = new_table(["Key", "Platform"]);
        for (key, name) in rows {
            table.add_row(vec![key, name]);
        }
        write!(out, "{}", titled("Known platforms", &table))?;
    }
    out.flush()
}

fn new_table(headers: [&str; 2]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(ASCII_FULL_CONDENSED)
        .set_header(headers.to_vec());
    table
}

fn titled(title: &str, table: &Table) -> String {
    format!("{}\n{}\n", style(title).bold(), table)
}

fn render_report(report: &RunReport) -> String {
    let mut table = new_table(["Platform", "Found"]);
    for entry in &report.entries {
        let found = if entry.found {
            Cell::new("Yes").fg(Color::Green).add_attribute(Attribute::Bold)
        } else {
            Cell::new("No").fg(Color::Red)
        };
        table.add_row(vec![Cell::new(&entry.target), found]);
    }

    titled(
        &format!("Tracking results for username: {}", report.identity),
        &table,
    )
}

fn render_whois(ip: &str, record: &WhoisRecord) -> String {
    let mut rows = record.fields();
    rows.sort_by(|a, b| a.0.cmp(b.0));

    let mut table = new_table(["Field", "Value"]);
    for (field, value) in rows {
        table.add_row(vec![field.to_string(), value]);
    }

    titled(&format!("Tracking results for IP address: {}", ip), &table)
}
