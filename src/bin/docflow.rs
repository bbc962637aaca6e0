//! CLI binary for edgequake-docflow.
//!
//! A thin shim over the library: assembles an orchestrator from flags,
//! starts one task, polls it to completion and prints the result.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_docflow::processors::{PlainTextProcessor, RemoteTaskProcessor};
use edgequake_docflow::{
    ConfigResolver, FeatureTag, FileDescriptor, JsonFileOverrideStore, KeyRotator,
    MemoryOverrideStore, Orchestrator, OrchestratorConfig, Override, OverrideStore,
    ProcessorRegistry, TaskError, TaskEventCallback, TaskResponse, TaskStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI event callback using indicatif ───────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Renders one task's lifecycle as a spinner that turns into a percentage
/// bar once a provider reports progress.
struct CliEventCallback {
    bar: ProgressBar,
}

impl CliEventCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Queued");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl TaskEventCallback for CliEventCallback {
    fn on_task_created(&self, request_id: &str, processor_id: &str) {
        self.bar
            .set_message(format!("{} via {}", dim(request_id), bold(processor_id)));
    }

    fn on_task_processing(&self, _request_id: &str) {
        self.bar.set_prefix("Processing");
    }

    fn on_task_deferred(&self, _request_id: &str, provider_task_id: &str) {
        self.bar.set_prefix("Submitted");
        self.bar
            .set_message(format!("provider task {}", dim(provider_task_id)));
    }

    fn on_task_progress(&self, _request_id: &str, _status: TaskStatus, progress: u8) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_prefix("Processing");
        self.bar.set_position(u64::from(progress));
    }

    fn on_task_completed(&self, _request_id: &str) {
        self.bar.finish_and_clear();
    }

    fn on_task_failed(&self, _request_id: &str, _error: &TaskError) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Plain text to Markdown (stdout)
  docflow notes.txt

  # Extract text to a file
  docflow --feature text-extraction notes.txt -o notes.clean.txt

  # Use a remote engine, rotating two API keys
  docflow --remote cloud=https://md.example.com --processor cloud \
          --api-key k1 --api-key k2 report.pdf

  # Persist overrides and list what is available
  docflow --overrides ~/.config/docflow/overrides.json --list

  # JSON status response instead of the raw result
  docflow --json notes.txt > result.json

ENVIRONMENT VARIABLES:
  DOCFLOW_FEATURE         Feature to run (text-extraction, markdown-conversion)
  DOCFLOW_PROCESSOR       Processor id
  DOCFLOW_REMOTE          Remote engines, comma separated id=url pairs
  DOCFLOW_API_KEYS        API keys for the chosen processor, comma separated
  DOCFLOW_OVERRIDES       Path of the JSON override store
  DOCFLOW_POLL_INTERVAL   Poll interval in milliseconds
  DOCFLOW_TIMEOUT         Give up (and cancel) after this many seconds
  RUST_LOG                Log filter, overrides --verbose/--quiet
"#;

/// Run OCR and document-to-Markdown engines through one task lifecycle.
#[derive(Parser, Debug)]
#[command(
    name = "docflow",
    version,
    about = "Run OCR and document-to-Markdown engines through one task lifecycle",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// File to process.
    #[arg(required_unless_present = "list")]
    input: Option<PathBuf>,

    /// Feature to run.
    #[arg(short, long, env = "DOCFLOW_FEATURE", default_value = "markdown-conversion")]
    feature: FeatureTag,

    /// Processor id. Falls back to the default for the feature.
    #[arg(short, long, env = "DOCFLOW_PROCESSOR")]
    processor: Option<String>,

    /// Default processor for a feature, as FEATURE=ID. Repeatable.
    #[arg(long = "default", value_name = "FEATURE=ID", value_parser = parse_default)]
    defaults: Vec<(FeatureTag, String)>,

    /// Register a remote engine, as ID=URL. Repeatable.
    #[arg(
        long,
        value_name = "ID=URL",
        env = "DOCFLOW_REMOTE",
        value_delimiter = ',',
        value_parser = parse_remote
    )]
    remote: Vec<(String, String)>,

    /// API key for the chosen processor. Repeatable; keys rotate round-robin.
    #[arg(
        long = "api-key",
        env = "DOCFLOW_API_KEYS",
        value_delimiter = ',',
        hide_env_values = true
    )]
    api_keys: Vec<String>,

    /// Persist configuration overrides in this JSON file.
    #[arg(long, env = "DOCFLOW_OVERRIDES")]
    overrides: Option<PathBuf>,

    /// List available processors and exit.
    #[arg(long)]
    list: bool,

    /// Write the result to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Poll interval in milliseconds.
    #[arg(long, env = "DOCFLOW_POLL_INTERVAL", default_value_t = 500)]
    poll_interval: u64,

    /// Give up (and cancel the task) after this many seconds.
    #[arg(long, env = "DOCFLOW_TIMEOUT", default_value_t = 600)]
    timeout: u64,

    /// Print the final status response as JSON.
    #[arg(long, env = "DOCFLOW_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "DOCFLOW_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCFLOW_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCFLOW_QUIET")]
    quiet: bool,
}

fn parse_default(s: &str) -> Result<(FeatureTag, String), String> {
    let (feature, id) = s
        .split_once('=')
        .ok_or_else(|| format!("expected FEATURE=ID, got '{s}'"))?;
    let feature: FeatureTag = feature.trim().parse().map_err(|e| format!("{e}"))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(format!("missing processor id in '{s}'"));
    }
    Ok((feature, id.to_string()))
}

fn parse_remote(s: &str) -> Result<(String, String), String> {
    let (id, url) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ID=URL, got '{s}'"))?;
    let (id, url) = (id.trim(), url.trim());
    if id.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(format!("expected ID=http(s)://..., got '{s}'"));
    }
    Ok((id.to_string(), url.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives all the feedback that matters; keep library INFO
    // logs out of its way unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.list;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Assemble ─────────────────────────────────────────────────────────
    let callback = show_progress.then(CliEventCallback::new);
    let orchestrator = build_orchestrator(&cli, callback.clone())?;

    if !cli.api_keys.is_empty() {
        let target = cli
            .processor
            .clone()
            .or_else(|| orchestrator.config().default_for(cli.feature).map(str::to_string));
        if let Some(id) = target {
            orchestrator
                .update_configuration(&id, Override::api_keys(cli.api_keys.iter().cloned()))
                .await
                .with_context(|| format!("Failed to store API keys for '{id}'"))?;
        }
    }

    let outcome = if cli.list {
        list_processors(&cli, &orchestrator).await
    } else {
        run(&cli, &orchestrator).await
    };

    if let Some(cb) = &callback {
        cb.bar.finish_and_clear();
    }
    orchestrator.shutdown().await;
    outcome
}

fn build_orchestrator(
    cli: &Cli,
    callback: Option<Arc<CliEventCallback>>,
) -> Result<Orchestrator> {
    let store: Arc<dyn OverrideStore> = match &cli.overrides {
        Some(path) => Arc::new(JsonFileOverrideStore::new(path)),
        None => Arc::new(MemoryOverrideStore::new()),
    };

    let mut builder = OrchestratorConfig::builder();
    for feature in FeatureTag::ALL {
        builder = builder.default_processor(feature, PlainTextProcessor::ID);
    }
    for (feature, id) in &cli.defaults {
        builder = builder.default_processor(*feature, id.clone());
    }
    if let Some(cb) = callback {
        builder = builder.event_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let orchestrator = Orchestrator::new(
        Arc::new(ProcessorRegistry::new()),
        Arc::new(ConfigResolver::new(store)),
        config,
    );
    orchestrator
        .install(Arc::new(PlainTextProcessor::new()))
        .context("Failed to register the local text processor")?;

    let rotator = Arc::new(KeyRotator::new());
    for (id, url) in &cli.remote {
        let processor = RemoteTaskProcessor::new(RemoteTaskProcessor::template_for(id, url))
            .with_context(|| format!("Failed to create remote processor '{id}'"))?
            .with_rotator(Arc::clone(&rotator))
            .with_resolver(Arc::clone(orchestrator.resolver()));
        orchestrator
            .install(Arc::new(processor))
            .with_context(|| format!("Failed to register remote processor '{id}'"))?;
    }
    Ok(orchestrator)
}

async fn list_processors(cli: &Cli, orchestrator: &Orchestrator) -> Result<()> {
    let configs = orchestrator.list_processors(None).await;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&configs).context("Failed to serialise processors")?
        );
        return Ok(());
    }
    if configs.is_empty() {
        eprintln!("No processors available");
        return Ok(());
    }
    for config in configs {
        let features: Vec<String> = config
            .capabilities
            .iter()
            .map(|c| c.feature.to_string())
            .collect();
        println!(
            "{:<16} {:<10} {}",
            bold(&config.id),
            dim(&format!("{:?}", config.origin)),
            features.join(", ")
        );
    }
    Ok(())
}

async fn run(cli: &Cli, orchestrator: &Orchestrator) -> Result<()> {
    let Some(input) = &cli.input else {
        bail!("No input file given");
    };
    let file = FileDescriptor::from_path(input)
        .await
        .with_context(|| format!("Cannot use '{}'", input.display()))?;

    let started_at = Instant::now();
    let started = orchestrator
        .start(file, cli.feature, cli.processor.as_deref())
        .await
        .context("Failed to start task")?;

    let response = poll_until_done(cli, orchestrator, &started.request_id).await?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&response).context("Failed to serialise response")?
        );
        return exit_status(&response);
    }

    if let Some(error) = &response.error {
        bail!("Task {} failed: {}", response.request_id, error);
    }
    let content = response
        .result
        .as_ref()
        .and_then(|r| match cli.feature {
            FeatureTag::MarkdownConversion => r.markdown.as_ref().or(r.text.as_ref()),
            FeatureTag::TextExtraction => r.text.as_ref().or(r.markdown.as_ref()),
        })
        .cloned()
        .unwrap_or_default();

    match &cli.output {
        Some(path) => {
            tokio::fs::write(path, content.as_bytes())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{}  {} chars  {}ms  →  {}",
                    green("✔"),
                    content.len(),
                    started_at.elapsed().as_millis(),
                    bold(&path.display().to_string())
                );
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(content.as_bytes())
                .context("Failed to write to stdout")?;
            if !content.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }
    }
    Ok(())
}

/// Poll `get_result` until the task is terminal, cancelling it on Ctrl-C or
/// when the timeout elapses.
async fn poll_until_done(
    cli: &Cli,
    orchestrator: &Orchestrator,
    request_id: &str,
) -> Result<TaskResponse> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(cli.timeout);
    let mut ticker = tokio::time::interval(Duration::from_millis(cli.poll_interval.max(10)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c => {
                orchestrator.cancel(request_id);
                eprintln!("{} cancelled", red("✘"));
                return Ok(orchestrator.get_result(request_id).await);
            }
            _ = tokio::time::sleep_until(deadline) => {
                orchestrator.cancel(request_id);
                bail!("Task {} timed out after {}s", request_id, cli.timeout);
            }
        }
        let response = orchestrator.get_result(request_id).await;
        if response.is_terminal() {
            return Ok(response);
        }
    }
}

fn exit_status(response: &TaskResponse) -> Result<()> {
    match (&response.status, &response.error) {
        (TaskStatus::Completed, _) => Ok(()),
        (_, Some(error)) => bail!("Task {} failed: {}", response.request_id, error),
        (status, None) => bail!("Task {} ended {}", response.request_id, status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_pairs() {
        let (feature, id) = parse_default("markdown=cloud").unwrap();
        assert_eq!(feature, FeatureTag::MarkdownConversion);
        assert_eq!(id, "cloud");
        assert!(parse_default("markdown=").is_err());
        assert!(parse_default("cloud").is_err());
    }

    #[test]
    fn parses_remote_pairs() {
        let (id, url) = parse_remote("cloud=https://md.example.com").unwrap();
        assert_eq!(id, "cloud");
        assert_eq!(url, "https://md.example.com");
        assert!(parse_remote("cloud=ftp://x").is_err());
    }

    #[test]
    fn cli_requires_input_unless_listing() {
        assert!(Cli::try_parse_from(["docflow"]).is_err());
        assert!(Cli::try_parse_from(["docflow", "--list"]).is_ok());
        let cli = Cli::try_parse_from(["docflow", "-f", "ocr", "a.png"]).unwrap();
        assert_eq!(cli.feature, FeatureTag::TextExtraction);
    }
}
