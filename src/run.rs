//! One GeneValidator run per submitted request.
//!
//! A run owns a fresh directory `<public_dir>/GeneValidator/<unique id>/`
//! named after the submission time. The directory is claimed with a
//! non-recursive `create_dir`, so two requests arriving in the same instant
//! can never end up sharing it. Nothing is cleaned up afterwards: the plots
//! GeneValidator writes there are served to the browser.

use crate::config::Config;
use crate::database::{Catalog, Database};
use crate::error::{ArgumentError, Result, RuntimeError};
use crate::fasta::{guess_seq_type, normalize};
use crate::pipeline::{Invocation, Pipeline, PipelineMode};
use crate::rewrite::{artifact_url, json_url, rewrite_table_html};
use crate::utils::copy_dir_contents;
use chrono::{DateTime, Local};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const RUNS_DIR_NAME: &str = "GeneValidator";
pub const INPUT_FILE_NAME: &str = "input_file.fa";
pub const LOG_FILE_NAME: &str = "log_file.txt";
/// Where plot JSON is collected for the result page, relative to the public dir.
/// Each run gets its own subfolder named after its unique id.
pub const WEB_JSON_DIR: &str = "web_files/json";

/// Timestamp ids tried before falling back to a random suffix.
const MAX_ID_ATTEMPTS: usize = 100;

static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Read-only state shared by all runs: built at startup, never mutated.
#[derive(Debug)]
pub struct AppContext {
    pub config: Config,
    pub catalog: Catalog,
    pub public_dir: PathBuf,
}

impl AppContext {
    pub fn new(config: Config, catalog: Catalog, public_dir: PathBuf) -> Self {
        Self {
            config,
            catalog,
            public_dir,
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.public_dir.join(RUNS_DIR_NAME)
    }
}

/// Creates `<web_dir>/GeneValidator_<YYYYMMDD-HHMMSS>` and the folders served from it.
pub fn init_public_dir(web_dir: &Path, now: &DateTime<Local>) -> io::Result<PathBuf> {
    let public_dir = web_dir.join(format!("GeneValidator_{}", now.format("%Y%m%d-%H%M%S")));
    std::fs::create_dir_all(public_dir.join(RUNS_DIR_NAME))?;
    std::fs::create_dir_all(public_dir.join(WEB_JSON_DIR))?;
    Ok(public_dir)
}

/// `2026-10-18_14-05-00_123-123456789`: date, time, milliseconds, nanoseconds.
pub fn create_unique_id(now: &DateTime<Local>) -> String {
    now.format("%Y-%m-%d_%H-%M-%S_%3f-%9f").to_string()
}

fn random_token(seed: &str) -> String {
    let count = TOKEN_COUNTER.fetch_add(1, Ordering::SeqCst);
    let nanos = Local::now().timestamp_nanos_opt().unwrap_or_default();
    let digest = md5::compute(format!("{}-{}-{}-{}", seed, std::process::id(), count, nanos));
    format!("{:x}", digest)[..8].to_string()
}

/// Creates `runs_dir/<id>` unless it exists. `Ok(None)` means the name is taken.
async fn claim_dir(runs_dir: &Path, id: &str) -> Result<Option<PathBuf>, RuntimeError> {
    let dir = runs_dir.join(id);
    match tokio::fs::create_dir(&dir).await {
        Ok(()) => Ok(Some(dir)),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(source) => Err(RuntimeError::RunDir { path: dir, source }),
    }
}

/// Picks an unused id from `next_id` and creates its directory.
///
/// After `MAX_ID_ATTEMPTS` collisions a random token is appended to the id.
pub async fn allocate_run_dir_with<F>(
    runs_dir: &Path,
    mut next_id: F,
) -> Result<(String, PathBuf), RuntimeError>
where
    F: FnMut() -> String,
{
    tokio::fs::create_dir_all(runs_dir)
        .await
        .map_err(|source| RuntimeError::RunDir {
            path: runs_dir.to_path_buf(),
            source,
        })?;

    let mut last = String::new();
    for _ in 0..MAX_ID_ATTEMPTS {
        let id = next_id();
        if let Some(dir) = claim_dir(runs_dir, &id).await? {
            return Ok((id, dir));
        }
        log::debug!("Unique ID {} already exists - creating a new one", id);
        last = id;
    }

    loop {
        let id = format!("{}_{}", last, random_token(&last));
        if let Some(dir) = claim_dir(runs_dir, &id).await? {
            return Ok((id, dir));
        }
    }
}

pub async fn allocate_run_dir(runs_dir: &Path) -> Result<(String, PathBuf), RuntimeError> {
    allocate_run_dir_with(runs_dir, || create_unique_id(&Local::now())).await
}

/// Form parameters of a submission, as received.
#[derive(Debug, Clone, Default)]
pub struct RunParams {
    pub seq: Option<String>,
    pub validations: Vec<String>,
    pub database: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidParams {
    pub seq: String,
    pub validations: Vec<String>,
    pub database: String,
}

/// Checks, in order: sequence, sequence length, validations, database.
pub fn validate_params(
    params: RunParams,
    max_characters: Option<usize>,
) -> Result<ValidParams, ArgumentError> {
    let seq = params
        .seq
        .filter(|s| !s.trim().is_empty())
        .ok_or(ArgumentError::MissingSequence)?;
    if let Some(max) = max_characters {
        let length = seq.chars().count();
        if length >= max {
            return Err(ArgumentError::SequenceTooLong { length, max });
        }
    }
    let validations: Vec<String> = params
        .validations
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if validations.is_empty() {
        return Err(ArgumentError::MissingValidations);
    }
    let database = params
        .database
        .filter(|d| !d.trim().is_empty())
        .ok_or(ArgumentError::MissingDatabase)?;
    Ok(ValidParams {
        seq,
        validations,
        database,
    })
}

/// What GeneValidator produced.
#[derive(Debug, Clone)]
pub enum Output {
    /// Parsed `input_file.fa.json` (direct pipeline).
    Json(serde_json::Value),
    /// Results table with links rewritten (blast pipeline).
    Html(String),
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub output: Output,
    pub results_url: String,
    pub json_url: String,
}

pub struct Run {
    ctx: Arc<AppContext>,
    unique_id: String,
    run_dir: PathBuf,
    params: ValidParams,
    database: Database,
    submitted: DateTime<Local>,
    results_url: String,
    json_url: String,
}

impl Run {
    /// Allocates the run directory, then validates `params`.
    ///
    /// The directory is created first, so a rejected request still leaves an
    /// empty directory behind.
    pub async fn init(ctx: Arc<AppContext>, request_url: &str, params: RunParams) -> Result<Self> {
        let submitted = Local::now();
        let (unique_id, run_dir) = allocate_run_dir(&ctx.runs_dir()).await?;
        log::debug!("Unique ID = {}", unique_id);
        log::debug!("GV Tempdir = {:?}", run_dir);
        log::debug!("Input parameters: {:?}", params);

        let params = validate_params(params, ctx.config.max_characters)?;
        let database = ctx.catalog.resolve(&params.database)?.clone();
        log::debug!("Database: {}", database);

        let mode = ctx.config.pipeline;
        let results_url = artifact_url(
            request_url,
            &unique_id,
            &mode.results_page(INPUT_FILE_NAME),
        );
        let json_url = json_url(request_url, &unique_id);

        Ok(Self {
            ctx,
            unique_id,
            run_dir,
            params,
            database,
            submitted,
            results_url,
            json_url,
        })
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn results_url(&self) -> &str {
        &self.results_url
    }

    pub fn json_url(&self) -> &str {
        &self.json_url
    }

    fn input_file(&self) -> PathBuf {
        self.run_dir.join(INPUT_FILE_NAME)
    }

    /// Normalizes the submitted text and writes it to `input_file.fa`.
    async fn write_seq_to_file(&self) -> Result<String, RuntimeError> {
        let input_file = self.input_file();
        log::debug!("Writing input seqs to: {:?}", input_file);
        let fasta = normalize(&self.params.seq, &self.submitted);
        tokio::fs::write(&input_file, fasta.as_bytes()).await?;

        match tokio::fs::metadata(&input_file).await {
            Ok(meta) if meta.len() > 0 => Ok(fasta),
            _ => Err(RuntimeError::InputFile(input_file)),
        }
    }

    fn pipeline(&self, fasta: &str) -> Pipeline {
        let config = &self.ctx.config;
        let input_file = self.input_file();
        let invocation = Invocation {
            genevalidator: &config.genevalidator,
            validations: &self.params.validations,
            database: &self.database.name,
            num_threads: config.num_threads,
            input_file: &input_file,
            seq_type: guess_seq_type(fasta),
            blast_bin: config.blast_bin.as_deref(),
            mafft_bin: config.mafft_bin.as_deref(),
        };
        let log_file = if config.verbose {
            None
        } else {
            Some(self.run_dir.join(LOG_FILE_NAME))
        };
        log::debug!("Log file: {:?}", log_file);

        Pipeline::new(config.pipeline.stages(&invocation))
            .log_file(log_file)
            .timeout(config.stage_timeout)
            .search_path(config.search_path())
    }

    /// Runs the pipeline and collects its output.
    pub async fn run(self) -> Result<RunOutput> {
        let fasta = self.write_seq_to_file().await?;
        self.pipeline(&fasta).run().await?;

        let mode = self.ctx.config.pipeline;
        let artifact = mode.artifact(&self.input_file());
        if !artifact.exists() {
            return Err(RuntimeError::MissingArtifact {
                stage: "GeneValidator".to_string(),
                path: artifact,
            }
            .into());
        }

        let output = match mode {
            PipelineMode::Direct => {
                let parsed = parse_output_json(&artifact).await?;
                self.copy_json_folder().await?;
                Output::Json(parsed)
            }
            PipelineMode::Blast => {
                let html = tokio::fs::read_to_string(&artifact).await?;
                Output::Html(rewrite_table_html(&html, &self.unique_id, &self.results_url))
            }
        };

        Ok(RunOutput {
            output,
            results_url: self.results_url,
            json_url: self.json_url,
        })
    }

    /// Copies the plot data of this run into `web_files/json/<unique id>/`.
    async fn copy_json_folder(&self) -> Result<(), RuntimeError> {
        let json_dir = self
            .run_dir
            .join(format!("{}.html", INPUT_FILE_NAME))
            .join("files")
            .join("json");
        if !json_dir.is_dir() {
            log::warn!("No plot data found at {:?}", json_dir);
            return Ok(());
        }
        let web_json = self.ctx.public_dir.join(WEB_JSON_DIR).join(&self.unique_id);
        log::debug!("Moving JSON files from {:?} to {:?}", json_dir, web_json);
        let copied = tokio::task::spawn_blocking(move || copy_dir_contents(json_dir, web_json))
            .await
            .map_err(|e| io::Error::new(ErrorKind::Other, e))??;
        log::debug!("Copied {} plot files", copied);
        Ok(())
    }
}

async fn parse_output_json(path: &Path) -> Result<serde_json::Value, RuntimeError> {
    let contents = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&contents).map_err(|source| RuntimeError::OutputJson {
        path: path.to_path_buf(),
        source,
    })
}
