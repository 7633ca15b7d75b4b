use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

use tagwarden_aws::{CloudProvider, CredentialSource, ProviderConfig, ServiceRegistry, DEFAULT_REGION};
use tagwarden_core::{CancellationToken, Orchestrator, ScanOptions};
use tagwarden_policy::Policy;

#[derive(Parser, Debug)]
#[command(author, version, about = "tagwarden: AWS tag compliance scanner")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Scan every enabled service and write a JSON report
    Scan {
        /// Policy file (YAML)
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// List resources and apply exclusions without fetching tags
        #[arg(long)]
        dry_run: bool,
        /// Report path; stdout when omitted
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
        /// Record services that cannot be listed and scan the rest
        #[arg(long)]
        continue_on_error: bool,
        #[command(flatten)]
        aws: AwsArgs,
    },
    /// Load and validate a policy file
    Validate {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Print the normalised policy as YAML
        #[arg(long)]
        print: bool,
    },
}

#[derive(Args, Debug)]
struct AwsArgs {
    #[arg(long, default_value = DEFAULT_REGION)]
    region: String,
    #[arg(long)]
    access_key_id: Option<String>,
    #[arg(long)]
    secret_access_key: Option<String>,
    #[arg(long)]
    session_token: Option<String>,
    #[arg(long)]
    profile: Option<String>,
    /// S3-compatible or local endpoint
    #[arg(long)]
    endpoint_url: Option<String>,
    /// Retries per request on top of the first attempt
    #[arg(long)]
    max_retries: Option<u32>,
    #[arg(long)]
    force_path_style: bool,
}

impl AwsArgs {
    fn into_config(self) -> Result<ProviderConfig> {
        let credentials =
            CredentialSource::resolve(self.access_key_id, self.secret_access_key, self.session_token, self.profile)?;
        Ok(ProviderConfig {
            region: self.region,
            credentials,
            endpoint: self.endpoint_url,
            max_retries: self.max_retries,
            force_path_style: self.force_path_style,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    // stdout carries the report
    tracing_subscriber::fmt()
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Cmd::Scan { file, dry_run, out, continue_on_error, aws } => {
            let options = ScanOptions { dry_run, continue_on_service_failure: continue_on_error };
            scan(&file, options, out.as_deref(), aws).await
        }
        Cmd::Validate { file, print } => validate(&file, print),
    }
}

fn load_policy(file: &Path) -> Result<Policy> {
    Policy::load(file).with_context(|| format!("loading policy {}", file.display()))
}

fn validate(file: &Path, print: bool) -> Result<()> {
    let policy = load_policy(file)?;
    if print {
        print!("{}", policy.to_yaml()?);
        return Ok(());
    }
    println!("{}", summarize(file, &policy));
    Ok(())
}

fn summarize(file: &Path, policy: &Policy) -> String {
    let services: Vec<&str> = policy.enabled_services().map(|(key, _)| key).collect();
    let services = if services.is_empty() { "none".to_string() } else { services.join(", ") };
    format!("{}: policy version {} is valid; enabled services: {}", file.display(), policy.version, services)
}

async fn scan(file: &Path, options: ScanOptions, out: Option<&Path>, aws: AwsArgs) -> Result<()> {
    let policy = Arc::new(load_policy(file)?);
    let provider =
        CloudProvider::new(aws.into_config()?, ServiceRegistry::with_defaults()).context("invalid AWS settings")?;
    let orchestrator = Orchestrator::new(policy, Arc::new(provider));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling scan");
            on_interrupt.cancel();
        }
    });

    let report = orchestrator.scan(options, cancel).await.context("scan failed")?;
    let json = report.to_json_pretty().context("serializing report")?;
    match out {
        Some(path) => {
            std::fs::write(path, json + "\n").with_context(|| format!("writing report {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{json}"),
    }

    if report.has_failures() {
        bail!("{} service(s) could not be scanned", report.failures.len());
    }
    if report.cancelled {
        bail!("scan cancelled; report is partial");
    }
    Ok(())
}
