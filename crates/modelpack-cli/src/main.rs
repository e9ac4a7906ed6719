//! Modelpack - model image build matrix CLI
//!
//! ## Commands
//!
//! - `resolve`: turn a model list into a CI build matrix
//! - `harvest`: write the license bundle for one model
//! - `summary`: render a markdown summary of a matrix file

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hub_metadata::{CachedSource, HubClient, HubConfig, MetadataSource, OfflineSource};
use modelpack_core::{
    classify, harvest, read_matrix_json, write_summary_md, Defaults, HarvestRequest, ImageContext,
    LicenseQuery, MatrixDocument, Override, Pipeline, PipelineConfig,
};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "modelpack")]
#[command(author = "Stevedores Org")]
#[command(version = modelpack_core::VERSION)]
#[command(about = "Build matrix and license bundles for model inference images", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long = "json-logs", global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// How the hub is reached.
#[derive(clap::Args)]
struct HubArgs {
    /// Hub endpoint
    #[arg(long, env = "HF_ENDPOINT", default_value = hub_metadata::DEFAULT_ENDPOINT)]
    hub_endpoint: String,

    /// Access token for gated or private repositories
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    hub_token: Option<String>,

    /// Make no remote calls; every automatic decision takes its safe default
    #[arg(long)]
    offline: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum MatrixFormat {
    /// Full matrix document
    Matrix,
    /// `{"include": [...]}` for a CI matrix strategy
    Github,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the model list into a build matrix
    Resolve {
        /// Model list (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "matrix")]
        format: MatrixFormat,

        /// Write the matrix here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write a markdown job summary
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Harvest license bundles for fat builds into <dir>/<short>
        #[arg(long)]
        harvest_dir: Option<PathBuf>,

        #[command(flatten)]
        hub: HubArgs,
    },

    /// Write the license bundle for one model
    Harvest {
        /// Model repository id
        #[arg(short, long)]
        model: String,

        /// Commit to fetch files from (default branch if omitted)
        #[arg(long)]
        revision: Option<String>,

        /// SPDX identifier, skips the remote license lookup
        #[arg(long)]
        license: Option<String>,

        /// Model list to take the whitelist and lookup budget from
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory
        #[arg(long)]
        out: PathBuf,

        #[command(flatten)]
        hub: HubArgs,
    },

    /// Render a markdown summary of a matrix file
    Summary {
        /// Matrix document written by `resolve`
        #[arg(long)]
        matrix: PathBuf,

        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    modelpack_core::init_tracing(cli.json, level);

    let work = async move {
        match cli.command {
            Commands::Resolve {
                config,
                format,
                output,
                summary,
                harvest_dir,
                hub,
            } => {
                cmd_resolve(
                    &config,
                    format,
                    output.as_deref(),
                    summary.as_deref(),
                    harvest_dir.as_deref(),
                    &hub,
                )
                .await
            }
            Commands::Harvest {
                model,
                revision,
                license,
                config,
                out,
                hub,
            } => {
                cmd_harvest(
                    &model,
                    revision.as_deref(),
                    license.as_deref(),
                    config.as_deref(),
                    &out,
                    &hub,
                )
                .await
            }
            Commands::Summary { matrix, output } => cmd_summary(&matrix, output.as_deref()),
        }
    };

    // Dropping `work` cancels every in-flight lookup.
    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => bail!("interrupted"),
    }
}

fn hub_client(hub: &HubArgs) -> Result<HubClient> {
    let mut config = HubConfig::new(&hub.hub_endpoint);
    if let Some(token) = hub.hub_token.as_deref().filter(|t| !t.is_empty()) {
        config = config.with_token(token);
    }
    HubClient::new(config).context("Failed to build hub client")
}

fn write_output(path: Option<&Path>, content: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, content).with_context(|| format!("write {:?}", path)),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(content.as_bytes())
                .and_then(|_| stdout.flush())
                .context("write to stdout")
        }
    }
}

async fn cmd_resolve(
    config_path: &Path,
    format: MatrixFormat,
    output: Option<&Path>,
    summary: Option<&Path>,
    harvest_dir: Option<&Path>,
    hub: &HubArgs,
) -> Result<()> {
    let loaded = PipelineConfig::load(config_path)
        .with_context(|| format!("Invalid configuration {:?}", config_path))?;

    let matrix = if hub.offline {
        run_pipeline(Pipeline::new(OfflineSource, loaded), harvest_dir).await?
    } else {
        run_pipeline(Pipeline::new(hub_client(hub)?, loaded), harvest_dir).await?
    };

    let rendered = match format {
        MatrixFormat::Matrix => matrix.to_json(),
        MatrixFormat::Github => matrix.to_github_json(),
    }
    .context("serialize matrix document")?;
    write_output(output, &rendered)?;

    if let Some(path) = summary {
        write_summary_md(path, &matrix, Some(chrono::Utc::now()))?;
    }

    if matrix.warning_count > 0 {
        info!(
            warnings = matrix.warning_count,
            "Resolution finished with degraded lookups"
        );
    }
    Ok(())
}

async fn run_pipeline<S: MetadataSource>(
    pipeline: Pipeline<S>,
    harvest_dir: Option<&Path>,
) -> Result<MatrixDocument> {
    let pipeline = match harvest_dir {
        Some(dir) => pipeline.with_harvest_root(dir),
        None => pipeline,
    };
    let result = pipeline.run().await?;
    info!(
        run_id = %result.run_id,
        jobs = result.matrix.jobs.len(),
        harvested = result.harvests.len(),
        "Resolved build matrix"
    );
    Ok(result.matrix)
}

async fn cmd_harvest(
    model: &str,
    revision: Option<&str>,
    license: Option<&str>,
    config_path: Option<&Path>,
    out: &Path,
    hub: &HubArgs,
) -> Result<()> {
    let defaults = match config_path {
        Some(path) => {
            PipelineConfig::load(path)
                .with_context(|| format!("Invalid configuration {:?}", path))?
                .config
                .defaults
        }
        None => Defaults::default(),
    };

    let policy = defaults.lookup.retry_policy();
    if hub.offline {
        let source = CachedSource::new(OfflineSource, policy);
        harvest_with(&source, model, revision, license, &defaults, out).await
    } else {
        let source = CachedSource::new(hub_client(hub)?, policy);
        harvest_with(&source, model, revision, license, &defaults, out).await
    }
}

async fn harvest_with(
    source: &dyn MetadataSource,
    model: &str,
    revision: Option<&str>,
    license: Option<&str>,
    defaults: &Defaults,
    out: &Path,
) -> Result<()> {
    let whitelist = &defaults.permissive_whitelist;
    let decision = classify(
        source,
        LicenseQuery {
            model_id: model,
            revision,
            override_spdx: license,
            explicit_permissive: Override::Auto,
        },
        whitelist,
    )
    .await;
    if let Some(warning) = &decision.warning {
        modelpack_core::emit_lookup_degraded(model, "license", warning);
    }

    let image = ImageContext::new(model, defaults);
    let request = HarvestRequest {
        model_id: model,
        revision,
        license_id: &decision.license_id,
        whitelist,
        image: &image,
    };
    let report = harvest(source, &request, out)
        .await
        .with_context(|| format!("Failed to write license bundle to {:?}", out))?;

    println!(
        "Harvested {} file(s) for {} (license: {}, model license: {:?})",
        report.entries.len(),
        report.model_id,
        report.license_id,
        report.model_license
    );
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    Ok(())
}

fn cmd_summary(matrix_path: &Path, output: Option<&Path>) -> Result<()> {
    let matrix = read_matrix_json(matrix_path)?;
    match output {
        Some(path) => write_summary_md(path, &matrix, None),
        None => write_output(None, &modelpack_core::render_summary_md(&matrix, None)),
    }
}
