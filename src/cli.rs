// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Seitti - Template-driven Vulnerability Scanner
 * Command line surface and scan assembly
 *
 * (c) 2026 Bountyy Oy
 */

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

use crate::catalog::{self, TagFilter};
use crate::core::{InputProvider, MetaInput, ResumeConfig, ScanEngine, SimpleInputProvider};
use crate::interactions::{Correlator, InteractshClient};
use crate::output::{make_result_events, OutputWriter, StandardWriter};
use crate::projectfile::ProjectFile;
use crate::templates::{Template, TemplateLoader, TemplateSigner, TrustStore};
use crate::types::{ScanOptions, ScanStrategy, Severity};

/// Seitti - template-driven vulnerability and exposure scanner
#[derive(Parser, Debug)]
#[command(name = "seitti")]
#[command(author = "Bountyy Oy <info@bountyy.fi>")]
#[command(version)]
#[command(about = "Template-driven vulnerability scanner. Declarative probes, Rust speed.", long_about = None)]
pub struct Cli {
    /// Template file, directory or glob (repeatable)
    #[arg(short = 't', long = "templates")]
    pub templates: Vec<String>,

    /// File with targets, one per line
    #[arg(short = 'l', long = "list")]
    pub target_list: Option<PathBuf>,

    /// Single target URL/host
    #[arg(long = "target")]
    pub target: Option<String>,

    /// Output file for findings
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Emit findings as JSON
    #[arg(long)]
    pub json: bool,

    /// Emit findings as line-delimited JSON
    #[arg(long)]
    pub jsonl: bool,

    /// Only findings on stdout
    #[arg(long)]
    pub silent: bool,

    /// Disable colored output
    #[arg(long = "nc", alias = "no-color")]
    pub no_color: bool,

    /// Targets processed in parallel per template
    #[arg(short = 'c', long = "bulk-size", default_value_t = 25)]
    pub bulk_size: usize,

    /// Templates processed in parallel
    #[arg(long = "threads", default_value_t = 25)]
    pub threads: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// Retries for retryable network failures
    #[arg(long, default_value_t = 1)]
    pub retries: u32,

    /// Global rate limit in requests per second
    #[arg(long = "rl", default_value_t = 150)]
    pub rate_limit: u32,

    /// Proxy URL (http/socks5)
    #[arg(long)]
    pub proxy: Option<String>,

    /// Custom header `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Severities to run, comma separated
    #[arg(long)]
    pub severity: Option<String>,

    /// Tags to include, comma separated
    #[arg(long)]
    pub tags: Option<String>,

    /// Tags to exclude, comma separated
    #[arg(long = "exclude-tags")]
    pub exclude_tags: Option<String>,

    /// Authors to include, comma separated
    #[arg(long = "author")]
    pub authors: Option<String>,

    /// Skip a host after this many errors
    #[arg(long = "max-host-errors", default_value_t = 30)]
    pub max_host_errors: u32,

    /// Follow HTTP redirects
    #[arg(long = "follow-redirects")]
    pub follow_redirects: bool,

    /// Attach request/response dumps to findings
    #[arg(long = "include-rr")]
    pub include_rr: bool,

    /// Update the template catalog
    #[arg(long = "update-templates")]
    pub update_templates: bool,

    /// Use a request/response cache across runs
    #[arg(long)]
    pub project: bool,

    /// Project cache directory
    #[arg(long = "project-path")]
    pub project_path: Option<PathBuf>,

    /// Resume an interrupted scan from this file
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Sign templates under this path with the environment key, then exit
    #[arg(long)]
    pub sign: Option<PathBuf>,

    /// Enable the code protocol
    #[arg(long)]
    pub code: bool,

    /// Enable the headless protocol
    #[arg(long)]
    pub headless: bool,

    /// Execute unsigned code templates anyway (marked unsigned)
    #[arg(long = "allow-unsigned-code")]
    pub allow_unsigned_code: bool,

    /// Accept unknown template fields
    #[arg(long = "no-strict-syntax")]
    pub no_strict_syntax: bool,

    /// template-spray, host-spray or auto
    #[arg(long = "scan-strategy", default_value = "auto")]
    pub scan_strategy: String,

    /// Custom DNS resolvers, comma separated `ip[:port]`
    #[arg(long)]
    pub resolvers: Option<String>,

    /// Interaction (OOB) server URL
    #[arg(long = "interactsh-url")]
    pub interactsh_url: Option<String>,

    /// Template variable `name=value` (repeatable)
    #[arg(short = 'V', long = "var")]
    pub vars: Vec<String>,

    /// Verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long)]
    pub debug: bool,
}

fn csv(value: &Option<String>) -> Vec<String> {
    value
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn init_logging(cli: &Cli) {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else if cli.silent {
        Level::ERROR
    } else {
        Level::WARN
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(!cli.no_color)
        .compact()
        .try_init();
}

fn build_options(cli: &Cli) -> Result<ScanOptions> {
    let mut custom_headers = Vec::new();
    for header in &cli.headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("header '{}' is not 'Name: value'", header))?;
        custom_headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let mut vars = HashMap::new();
    for var in &cli.vars {
        let (name, value) = var
            .split_once('=')
            .with_context(|| format!("variable '{}' is not 'name=value'", var))?;
        vars.insert(name.trim().to_string(), value.trim().to_string());
    }

    let scan_strategy = ScanStrategy::from_str(&cli.scan_strategy)
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid -scan-strategy")?;

    Ok(ScanOptions {
        bulk_size: cli.bulk_size,
        template_threads: cli.threads,
        timeout: cli.timeout,
        retries: cli.retries,
        rate_limit: cli.rate_limit,
        max_host_errors: cli.max_host_errors,
        proxy: cli.proxy.clone(),
        custom_headers,
        follow_redirects: cli.follow_redirects,
        scan_strategy,
        relaxed_parsing: cli.no_strict_syntax,
        enable_code: cli.code,
        enable_headless: cli.headless,
        allow_unsigned_code: cli.allow_unsigned_code,
        vars,
        resume_path: cli.resume.clone(),
        project: cli.project,
        project_path: cli.project_path.clone(),
        store_responses: cli.include_rr,
        resolvers: csv(&cli.resolvers),
        interactsh_url: cli.interactsh_url.clone(),
        ..Default::default()
    })
}

fn gather_targets(cli: &Cli) -> Result<SimpleInputProvider> {
    let mut provider = SimpleInputProvider::default();
    if let Some(target) = &cli.target {
        provider.push(MetaInput::new(target.clone()));
    }
    if let Some(list) = &cli.target_list {
        let content = std::fs::read_to_string(list)
            .with_context(|| format!("cannot read target list {}", list.display()))?;
        for input in SimpleInputProvider::from_lines(&content).into_inputs() {
            provider.push(input);
        }
    }
    // piped stdin is a target source
    if cli.target.is_none() && cli.target_list.is_none() && !std::io::stdin().is_terminal() {
        let mut content = String::new();
        std::io::stdin().read_to_string(&mut content)?;
        for input in SimpleInputProvider::from_lines(&content).into_inputs() {
            provider.push(input);
        }
    }
    Ok(provider)
}

fn sign_templates(path: &PathBuf) -> Result<()> {
    let signer = TemplateSigner::from_env().context("signing key not available")?;
    let files = catalog::enumerate(&[path.display().to_string()]);
    if files.is_empty() {
        bail!("no templates found under {}", path.display());
    }
    for file in files {
        let content = std::fs::read_to_string(&file)?;
        let signed = signer
            .sign(&content)
            .with_context(|| format!("could not sign {}", file.display()))?;
        std::fs::write(&file, signed)?;
        info!(template = %file.display(), "signed");
    }
    Ok(())
}

/// Entry point invoked by the binary. Exit code is zero on normal
/// completion regardless of findings; errors here are configuration
/// errors.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Some(path) = &cli.sign {
        return sign_templates(path);
    }
    if cli.update_templates {
        warn!("template catalog updates are handled by the companion tooling in this build");
        return Ok(());
    }

    if cli.templates.is_empty() {
        bail!("no templates given, use -t");
    }

    let options = Arc::new(build_options(&cli)?);
    let trust = Arc::new(TrustStore::from_defaults());
    let loader = TemplateLoader::new(Arc::clone(&options), Arc::clone(&trust));

    // enumerate + parse + filter
    let severities = csv(&cli.severity)
        .iter()
        .map(|s| Severity::from_str(s).map_err(|e| anyhow::anyhow!(e)))
        .collect::<Result<Vec<_>>>()?;
    let tag_filter = TagFilter::new(
        &csv(&cli.tags),
        &csv(&cli.exclude_tags),
        &severities,
        &csv(&cli.authors),
    );

    let paths = catalog::enumerate(&cli.templates);
    if paths.is_empty() {
        bail!("no template files found under the given paths");
    }
    let mut templates: Vec<Arc<Template>> = Vec::new();
    for path in &paths {
        match loader.load(path) {
            Ok(template) => {
                if tag_filter.matches(&template) {
                    templates.push(template);
                }
            }
            Err(e) => warn!(template = %path.display(), "skipping template: {}", e),
        }
    }
    if templates.is_empty() {
        bail!("no templates survived parsing and filtering");
    }

    let provider = gather_targets(&cli)?;
    if provider.count() == 0 {
        bail!("no targets given, use -target, -l or pipe stdin");
    }

    let writer: Arc<dyn OutputWriter> = Arc::new(StandardWriter::new(
        cli.json || cli.jsonl,
        cli.no_color,
        cli.output.as_deref(),
    )?);

    let resume = match &cli.resume {
        Some(path) if path.exists() => Arc::new(
            ResumeConfig::load(path)
                .with_context(|| format!("cannot load resume file {}", path.display()))?,
        ),
        _ => Arc::new(ResumeConfig::new()),
    };

    let project = if options.project {
        let dir = options
            .project_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("seitti-project"));
        Some(Arc::new(ProjectFile::open(&dir)?))
    } else {
        None
    };

    // out-of-band correlation
    let correlator = match &options.interactsh_url {
        Some(url) => {
            let client = InteractshClient::register(url)
                .await
                .context("interaction server registration failed")?;
            let oob_templates: HashMap<String, Arc<Template>> = templates
                .iter()
                .map(|t| (t.id.clone(), Arc::clone(t)))
                .collect();
            let oob_writer = Arc::clone(&writer);
            let store_dumps = options.store_responses;
            let correlator = Arc::new(Correlator::new(
                Arc::new(client),
                Duration::from_secs(options.interactions_eviction),
                Duration::from_secs(options.interactions_cooldown),
                Box::new(move |wrapped| {
                    if let Some(template) = oob_templates.get(&wrapped.template_id) {
                        for event in make_result_events(template, &wrapped, store_dumps) {
                            oob_writer.write(&event);
                        }
                    }
                }),
            ));
            tokio::spawn(Arc::clone(&correlator).run());
            Some(correlator)
        }
        None => None,
    };

    let engine = ScanEngine::new(
        Arc::clone(&options),
        Arc::clone(&writer),
        Arc::clone(&resume),
        project,
        correlator.clone(),
    );

    // cooperative cancellation: first ctrl-c aborts workers and flushes
    // the resume context
    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping workers");
            cancel.cancel();
        }
    });

    let matched = engine.execute(templates, &provider).await;

    if engine.cancel_token().is_canceled() {
        let resume_out = cli
            .resume
            .clone()
            .unwrap_or_else(|| PathBuf::from("seitti.resume"));
        match resume.save(&resume_out) {
            Ok(()) => info!(file = %resume_out.display(), "resume context saved"),
            Err(e) => warn!("could not save resume context: {}", e),
        }
    }

    if let Some(correlator) = &correlator {
        correlator.close().await;
    }
    writer.close();
    engine.progress().log_summary();

    if !matched && !cli.silent {
        info!("no findings");
    }
    Ok(())
}
