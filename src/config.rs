use crate::args::Args;
use crate::pipeline::PipelineMode;
use crate::utils::{find_in_path, prepend_to_path};
use serde::Deserialize;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use thiserror::Error;

/// Oldest BLAST+ release whose `blastdbcmd -list_outfmt` we can parse.
pub const MINIMUM_BLAST_VERSION: &str = "2.2.30+";
const DEFAULT_CONFIG_FILE: &str = ".genevalidatorapp.json";
const HIGH_THREAD_COUNT: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading configuration file {path:?}: {source}")]
    ConfigFile {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("could not read configuration file {path:?}: {source}")]
    ConfigFileIo { path: PathBuf, source: io::Error },

    #[error("database directory not set, use --database-dir")]
    DatabaseDirNotSet,

    #[error("database directory {0:?} does not exist")]
    DatabaseDirNotFound(PathBuf),

    #[error("{tool} directory {path:?} does not exist")]
    BinDirNotFound { tool: &'static str, path: PathBuf },

    #[error("number of threads must be a positive integer")]
    NumThreadsIncorrect,

    #[error("max characters must be a positive integer")]
    MaxCharactersIncorrect,

    #[error("could not find {0}, please check it is installed and on $PATH")]
    NotInstalled(&'static str),

    #[error("BLAST+ {found} found, version {} or later is required", MINIMUM_BLAST_VERSION)]
    BlastNotCompatible { found: String },
}

/// Settings read from the JSON configuration file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub database_dir: Option<PathBuf>,
    pub default_db: Option<String>,
    pub num_threads: Option<usize>,
    pub max_characters: Option<usize>,
    pub blast_bin: Option<PathBuf>,
    pub mafft_bin: Option<PathBuf>,
    pub genevalidator: Option<PathBuf>,
    pub web_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub pipeline: Option<PipelineMode>,
    pub stage_timeout: Option<u64>,
}

impl FileConfig {
    /// Reads `path`; a missing file is an empty configuration.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            log::debug!("Configuration file not found: {:?}", path);
            return Ok(Self::default());
        }
        log::debug!("Reading configuration file: {:?}", path);
        let text = fs::read_to_string(path).map_err(|source| ConfigError::ConfigFileIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_dir: PathBuf,
    pub default_db: Option<String>,
    pub num_threads: usize,
    pub max_characters: Option<usize>,
    pub blast_bin: Option<PathBuf>,
    pub mafft_bin: Option<PathBuf>,
    pub genevalidator: PathBuf,
    pub web_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub pipeline: PipelineMode,
    pub stage_timeout: Option<Duration>,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_dir: PathBuf::new(),
            default_db: None,
            num_threads: 1,
            max_characters: None,
            blast_bin: None,
            mafft_bin: None,
            genevalidator: PathBuf::from("genevalidator"),
            web_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            host: "0.0.0.0".to_string(),
            port: 4567,
            pipeline: PipelineMode::Direct,
            stage_timeout: None,
            verbose: false,
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}

/// Expands a leading `~` to `$HOME`.
pub fn expand_path(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

impl Config {
    /// Reads the config file named in `args` (or the default one) and merges
    /// it under the command line options.
    pub fn load(args: Args) -> Result<Self, ConfigError> {
        let config_file = args
            .config_file
            .clone()
            .map(|p| expand_path(&p))
            .or_else(|| home_dir().map(|home| home.join(DEFAULT_CONFIG_FILE)));
        let file = match config_file {
            Some(path) => FileConfig::read(&path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }

    /// Command line beats file, file beats defaults. The result is validated.
    pub fn merge(args: Args, file: FileConfig) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let config = Config {
            database_dir: args
                .database_dir
                .or(file.database_dir)
                .map(|p| expand_path(&p))
                .ok_or(ConfigError::DatabaseDirNotSet)?,
            default_db: args.default_db.or(file.default_db),
            num_threads: args
                .num_threads
                .or(file.num_threads)
                .unwrap_or(defaults.num_threads),
            max_characters: args.max_characters.or(file.max_characters),
            blast_bin: args.blast_bin.or(file.blast_bin).map(|p| expand_path(&p)),
            mafft_bin: args.mafft_bin.or(file.mafft_bin).map(|p| expand_path(&p)),
            genevalidator: args
                .genevalidator
                .or(file.genevalidator)
                .map(|p| expand_path(&p))
                .unwrap_or(defaults.genevalidator),
            web_dir: args
                .web_dir
                .or(file.web_dir)
                .map(|p| expand_path(&p))
                .unwrap_or(defaults.web_dir),
            host: args.host.or(file.host).unwrap_or(defaults.host),
            port: args.port.or(file.port).unwrap_or(defaults.port),
            pipeline: args.pipeline.or(file.pipeline).unwrap_or(defaults.pipeline),
            stage_timeout: args
                .stage_timeout
                .or(file.stage_timeout)
                .map(Duration::from_secs),
            verbose: args.verbose,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.database_dir.is_dir() {
            return Err(ConfigError::DatabaseDirNotFound(self.database_dir.clone()));
        }
        log::debug!("Will use BLAST+ databases at: {:?}", self.database_dir);

        for (tool, dir) in [("NCBI BLAST+", &self.blast_bin), ("Mafft", &self.mafft_bin)] {
            match dir {
                Some(path) if !path.is_dir() => {
                    return Err(ConfigError::BinDirNotFound {
                        tool,
                        path: path.clone(),
                    })
                }
                Some(path) => log::debug!("Will use {} at: {:?}", tool, path),
                None => log::debug!("Will use {} at: $PATH", tool),
            }
        }

        if self.num_threads == 0 {
            return Err(ConfigError::NumThreadsIncorrect);
        }
        log::debug!("Will use {} threads to run BLAST.", self.num_threads);
        if self.num_threads > HIGH_THREAD_COUNT {
            log::warn!(
                "Number of threads set at {} is unusually high.",
                self.num_threads
            );
        }

        if self.max_characters == Some(0) {
            return Err(ConfigError::MaxCharactersIncorrect);
        }
        Ok(())
    }

    /// `PATH` handed to every external tool: the configured bin directories
    /// in front of the server's own `PATH`.
    pub fn search_path(&self) -> OsString {
        let dirs: Vec<PathBuf> = [&self.blast_bin, &self.mafft_bin]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        prepend_to_path(&dirs, env::var_os("PATH"))
    }

    /// Makes sure BLAST+ (recent enough), mafft and GeneValidator can be run.
    pub fn check_tools(&self) -> Result<(), ConfigError> {
        let path = self.search_path();
        if find_in_path("blastdbcmd", &path).is_none() {
            return Err(ConfigError::NotInstalled("NCBI BLAST+ (blastdbcmd)"));
        }
        let output = Command::new("blastdbcmd")
            .arg("-version")
            .env("PATH", &path)
            .output()
            .map_err(|_| ConfigError::NotInstalled("NCBI BLAST+ (blastdbcmd)"))?;
        let version = parse_blast_version(&String::from_utf8_lossy(&output.stdout))
            .unwrap_or_default();
        if !is_compatible_blast(&version) {
            return Err(ConfigError::BlastNotCompatible { found: version });
        }
        log::debug!("Found BLAST+ {}", version);

        if find_in_path("mafft", &path).is_none() {
            return Err(ConfigError::NotInstalled("Mafft"));
        }
        match self.genevalidator.to_str() {
            Some(gv) if find_in_path(gv, &path).is_some() => Ok(()),
            _ => Err(ConfigError::NotInstalled("GeneValidator")),
        }
    }

    pub fn listens_on_all_interfaces(&self) -> bool {
        self.host == "0.0.0.0"
    }

    pub fn server_url(&self) -> String {
        let host = match self.host.as_str() {
            "127.0.0.1" | "0.0.0.0" => "localhost",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }
}

/// Second word of `blastdbcmd -version`: `blastdbcmd: 2.2.31+` -> `2.2.31+`.
pub fn parse_blast_version(output: &str) -> Option<String> {
    output.split_whitespace().nth(1).map(|s| s.to_string())
}

fn version_numbers(version: &str) -> Vec<u32> {
    version
        .trim_end_matches('+')
        .split('.')
        .map(|part| part.parse::<u32>().unwrap_or(0))
        .collect()
}

pub fn is_compatible_blast(version: &str) -> bool {
    if version.is_empty() {
        return false;
    }
    version_numbers(version) >= version_numbers(MINIMUM_BLAST_VERSION)
}
