use crate::error::ArgumentError;
use lazy_static::lazy_static;
use regex::Regex;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

lazy_static! {
    /// `/db/nr.00`, `/db/img3.5.finished.faa.01` are volumes of a multi-part database.
    static ref MULTIPART_VOLUME: Regex = Regex::new(r".+/\S+\d{2}$").unwrap();
}

const LIST_OUTFMT: &str = "%p::%f::%t";
const DATABASE_ERROR_PATTERN: &str = "BLAST Database error";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("could not run blastdbcmd: {0}")]
    Spawn(#[source] io::Error),

    #[error("no formatted BLAST databases found in {0:?}")]
    NoDatabases(PathBuf),

    #[error("error listing BLAST databases.\n  Tried: {command}\n  Output: {output}")]
    DatabaseError { command: String, output: String },
}

/// One BLAST database found under the database directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    /// MD5 of `name`.
    pub id: String,
    /// Database path, as passed to `-db`.
    pub name: String,
    pub title: String,
    /// Lower-cased molecule type, `protein` or `nucleotide`.
    pub kind: String,
}

impl Database {
    pub fn new(name: &str, title: &str, kind: &str) -> Self {
        let name = name.trim().to_string();
        Self {
            id: database_id(&name),
            name,
            title: title.trim_end_matches(['\r', '\n']).to_string(),
            kind: kind.trim().to_lowercase(),
        }
    }

    pub fn is_protein(&self) -> bool {
        self.kind == "protein"
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", self.kind, self.title, self.name)
    }
}

fn database_id(name: &str) -> String {
    format!("{:x}", md5::compute(name.as_bytes()))
}

pub fn is_multipart_volume(name: &str) -> bool {
    MULTIPART_VOLUME.is_match(name)
}

/// The protein databases GeneValidator can be run against.
///
/// Built once at startup and shared read-only between requests.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<Database>,
}

impl Catalog {
    /// Parses `blastdbcmd -list_outfmt "%p::%f::%t"` output.
    pub fn from_listing(listing: &str) -> Self {
        let mut entries: Vec<Database> = Vec::new();
        for line in listing.lines() {
            let mut parts = line.splitn(3, "::");
            let kind = parts.next().unwrap_or_default();
            let (name, title) = match (parts.next(), parts.next()) {
                (Some(name), title) => (name, title.unwrap_or_default()),
                _ => continue,
            };
            if is_multipart_volume(name) {
                log::debug!("Found a multi-part database volume at {} - ignoring it.", name);
                continue;
            }
            if !kind.trim().eq_ignore_ascii_case("protein") {
                continue;
            }
            let db = Database::new(name, title, kind);
            if entries.iter().any(|e| e.id == db.id) {
                continue;
            }
            entries.push(db);
        }
        Self { entries }
    }

    /// Recursively scans `database_dir` for BLAST databases using `blastdbcmd`.
    pub fn scan(database_dir: &Path, search_path: &OsString) -> Result<Self, CatalogError> {
        let mut cmd = Command::new("blastdbcmd");
        cmd.arg("-recursive")
            .arg("-list")
            .arg(database_dir)
            .arg("-list_outfmt")
            .arg(LIST_OUTFMT)
            .env("PATH", search_path);
        let command = format!(
            "blastdbcmd -recursive -list {} -list_outfmt \"{}\"",
            database_dir.display(),
            LIST_OUTFMT
        );
        log::debug!("Scanning databases: $ {}", command);

        let output = cmd.output().map_err(CatalogError::Spawn)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}{}", stdout, stderr);

        if combined.trim().is_empty() {
            return Err(CatalogError::NoDatabases(database_dir.to_path_buf()));
        }
        if combined.contains(DATABASE_ERROR_PATTERN) || !output.status.success() {
            return Err(CatalogError::DatabaseError {
                command,
                output: combined.trim().to_string(),
            });
        }

        let catalog = Self::from_listing(&stdout);
        for db in catalog.iter() {
            log::debug!("Found {} database '{}' at '{}'", db.kind, db.title, db.name);
        }
        Ok(catalog)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Database> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&Database> {
        self.entries.first()
    }

    /// Whether a database with this path is known.
    pub fn contains(&self, name: &str) -> bool {
        let id = database_id(name);
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn find_by_title(&self, title: &str) -> Vec<&Database> {
        self.entries.iter().filter(|e| e.title == title).collect()
    }

    /// The single database carrying `title`.
    pub fn resolve(&self, title: &str) -> Result<&Database, ArgumentError> {
        let found = self.find_by_title(title);
        match found.as_slice() {
            [db] => Ok(*db),
            [] => Err(ArgumentError::UnknownDatabase(title.to_string())),
            many => Err(ArgumentError::AmbiguousDatabase {
                title: title.to_string(),
                count: many.len(),
            }),
        }
    }

    /// The configured default database if it is in the catalog, else the first one.
    pub fn default_db(&self, preferred: Option<&str>) -> Option<&Database> {
        preferred
            .filter(|name| self.contains(name))
            .and_then(|name| self.entries.iter().find(|e| e.name == name))
            .or_else(|| self.first())
    }

    pub fn non_default_dbs(&self, preferred: Option<&str>) -> Vec<&Database> {
        let default = self.default_db(preferred);
        self.entries
            .iter()
            .filter(|e| Some(*e) != default)
            .collect()
    }
}
