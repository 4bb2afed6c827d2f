use crate::pipeline::PipelineMode;
use clap::Parser;
use std::path::PathBuf;

/// Command line options. Anything left unset falls back to the config file,
/// then to the built-in defaults.
#[derive(Parser, Debug, Clone, Default)]
#[clap(
    version,
    about = "GeneValidatorApp: a web interface to GeneValidator",
    long_about = "Serves a form that accepts gene predictions, runs GeneValidator on them \
against a BLAST database and returns the results as JSON or HTML."
)]
pub struct Args {
    /// Path to a JSON configuration file (default: ~/.genevalidatorapp.json)
    #[arg(short, long)]
    pub config_file: Option<PathBuf>,

    /// Directory containing the BLAST databases, searched recursively
    #[arg(short, long)]
    pub database_dir: Option<PathBuf>,

    /// Path of the database selected by default in the web form
    #[arg(short = 'f', long)]
    pub default_db: Option<String>,

    /// Number of threads given to BLAST and GeneValidator
    #[arg(short, long)]
    pub num_threads: Option<usize>,

    /// Maximum number of characters accepted in a submission
    #[arg(long)]
    pub max_characters: Option<usize>,

    /// Directory holding the BLAST+ binaries (default: $PATH)
    #[arg(short, long)]
    pub blast_bin: Option<PathBuf>,

    /// Directory holding the mafft binary (default: $PATH)
    #[arg(short, long)]
    pub mafft_bin: Option<PathBuf>,

    /// GeneValidator executable
    #[arg(short, long)]
    pub genevalidator: Option<PathBuf>,

    /// Directory in which the public (served) directory is created
    #[arg(short, long)]
    pub web_dir: Option<PathBuf>,

    /// Host to listen on
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Run GeneValidator directly, or BLAST and get_raw_sequences first
    #[arg(long, value_enum)]
    pub pipeline: Option<PipelineMode>,

    /// Kill an external tool after this many seconds (default: wait forever)
    #[arg(long)]
    pub stage_timeout: Option<u64>,

    /// Debug logging; tool output goes to the terminal instead of the run's log file
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}
