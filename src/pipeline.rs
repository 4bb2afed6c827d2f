use crate::error::RuntimeError;
use crate::fasta::SeqType;
use clap::ValueEnum;
use serde::Deserialize;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs::OpenOptions;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

/// Which external tools a run goes through.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// genevalidator only; it runs BLAST itself and writes JSON
    Direct,
    /// blastp/blastx, then get_raw_sequences, then genevalidator (HTML table)
    Blast,
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                PipelineMode::Direct => "direct",
                PipelineMode::Blast => "blast",
            }
        )
    }
}

/// Everything the stages of one run need to know.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub genevalidator: &'a Path,
    pub validations: &'a [String],
    pub database: &'a str,
    pub num_threads: usize,
    pub input_file: &'a Path,
    pub seq_type: SeqType,
    pub blast_bin: Option<&'a Path>,
    pub mafft_bin: Option<&'a Path>,
}

impl<'a> Invocation<'a> {
    fn blast_xml(&self) -> PathBuf {
        self.input_file.with_file_name("output.xml")
    }

    fn raw_seq(&self) -> PathBuf {
        self.input_file.with_file_name("output.xml.raw_seq")
    }
}

impl PipelineMode {
    /// The file whose presence means the run produced a result.
    pub fn artifact(&self, input_file: &Path) -> PathBuf {
        let mut name = input_file
            .file_name()
            .map(OsStr::to_os_string)
            .unwrap_or_default();
        match self {
            PipelineMode::Direct => {
                name.push(".json");
                input_file.with_file_name(name)
            }
            PipelineMode::Blast => {
                name.push(".html");
                input_file.with_file_name(name).join("files").join("table.html")
            }
        }
    }

    /// Report page linked as the results URL, relative to the run directory.
    pub fn results_page(&self, input_name: &str) -> String {
        match self {
            PipelineMode::Direct => format!("{}.html/results1.html", input_name),
            PipelineMode::Blast => format!("{}.html/results.html", input_name),
        }
    }

    pub fn stages(&self, inv: &Invocation) -> Vec<Stage> {
        let threads = inv.num_threads.to_string();
        let validations = inv.validations.join(",");
        match self {
            PipelineMode::Direct => vec![Stage::new("GeneValidator", inv.genevalidator)
                .arg("-v")
                .arg(&validations)
                .arg("-d")
                .arg(inv.database)
                .arg("-n")
                .arg(&threads)
                .arg(inv.input_file)
                .output(self.artifact(inv.input_file))],
            PipelineMode::Blast => {
                let xml = inv.blast_xml();
                let raw_seq = inv.raw_seq();
                let blast = Stage::new("BLAST", inv.seq_type.blast_program())
                    .arg("-db")
                    .arg(inv.database)
                    .args(["-evalue", "1e-5", "-outfmt", "5", "-max_target_seqs", "200"])
                    .args(["-gapopen", "11", "-gapextend", "1"])
                    .arg("-query")
                    .arg(inv.input_file)
                    .arg("-out")
                    .arg(&xml)
                    .arg("-num_threads")
                    .arg(&threads)
                    .output(xml.clone());
                let raw = Stage::new("get_raw_sequences", "get_raw_sequences")
                    .arg("-d")
                    .arg(inv.database)
                    .arg("-o")
                    .arg(&raw_seq)
                    .arg(&xml)
                    .output(raw_seq.clone());
                let mut gv = Stage::new("GeneValidator", inv.genevalidator)
                    .arg("-x")
                    .arg(&xml)
                    .arg("-r")
                    .arg(&raw_seq)
                    .arg("-n")
                    .arg(&threads);
                if let Some(mafft) = inv.mafft_bin {
                    gv = gv.arg("-m").arg(mafft);
                }
                if let Some(blast_bin) = inv.blast_bin {
                    gv = gv.arg("-b").arg(blast_bin);
                }
                let gv = gv
                    .arg("-v")
                    .arg(&validations)
                    .arg(inv.input_file)
                    .output(self.artifact(inv.input_file));
                vec![blast, raw, gv]
            }
        }
    }
}

/// One external program call.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// File the stage must leave behind.
    pub output: Option<PathBuf>,
}

impl Stage {
    pub fn new<P: AsRef<Path>>(name: &str, program: P) -> Self {
        Self {
            name: name.to_string(),
            program: program.as_ref().to_path_buf(),
            args: vec![],
            output: None,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn output<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.to_string_lossy().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Stages run strictly one after the other; a stage only starts when the
/// previous one exited with status 0 and left its output behind.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
    log_file: Option<PathBuf>,
    timeout: Option<Duration>,
    search_path: Option<OsString>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            ..Default::default()
        }
    }

    /// Append stdout and stderr of every stage to this file.
    /// Without one, the output goes to the server's own streams.
    pub fn log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    /// Kill a stage that runs longer than this.
    pub fn timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    /// `PATH` for the spawned programs.
    pub fn search_path(mut self, path: OsString) -> Self {
        self.search_path = Some(path);
        self
    }

    pub async fn run(&self) -> Result<(), RuntimeError> {
        for stage in &self.stages {
            self.run_stage(stage).await?;
        }
        Ok(())
    }

    async fn run_stage(&self, stage: &Stage) -> Result<(), RuntimeError> {
        log::debug!("{} command: $ {}", stage.name, stage.command_line());

        let mut cmd = Command::new(&stage.program);
        cmd.args(&stage.args).kill_on_drop(true);
        if let Some(path) = &self.search_path {
            cmd.env("PATH", path);
        }
        match &self.log_file {
            Some(log_file) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(log_file)
                    .await?
                    .into_std()
                    .await;
                cmd.stdout(Stdio::from(file.try_clone()?));
                cmd.stderr(Stdio::from(file));
            }
            None => {
                cmd.stdout(Stdio::inherit());
                cmd.stderr(Stdio::inherit());
            }
        }

        let mut child = cmd.spawn().map_err(|source| RuntimeError::Spawn {
            stage: stage.name.clone(),
            source,
        })?;

        let status = match self.timeout {
            Some(limit) => {
                let waited = timeout(limit, child.wait()).await;
                match waited {
                    Ok(status) => status?,
                    Err(_) => {
                        log::error!("{} timed out after {:?}, killing it", stage.name, limit);
                        let _ = child.kill().await;
                        return Err(RuntimeError::Timeout {
                            stage: stage.name.clone(),
                            timeout: limit,
                        });
                    }
                }
            }
            None => child.wait().await?,
        };
        log::debug!("{} exit status: {}", stage.name, status);

        if !status.success() {
            return Err(RuntimeError::StageFailed {
                stage: stage.name.clone(),
                code: status.code(),
            });
        }
        if let Some(output) = &stage.output {
            if !output.exists() {
                return Err(RuntimeError::MissingArtifact {
                    stage: stage.name.clone(),
                    path: output.clone(),
                });
            }
        }
        Ok(())
    }
}
