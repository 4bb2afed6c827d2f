use chrono::{DateTime, Local};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::HashMap;

lazy_static! {
    static ref LINE_ENDING: Regex = Regex::new(r"\r\n?").unwrap();
    static ref HEADER_ID: Regex = Regex::new(r"(?m)^>(\S+)").unwrap();
}

/// Residue threshold above which a sequence counts as nucleotide.
const NUCLEOTIDE_THRESHOLD: f64 = 0.9;

/// Converts `\r\n` and lone `\r` to `\n`.
pub fn normalize_line_endings(seq: &str) -> String {
    LINE_ENDING.replace_all(seq, "\n").into_owned()
}

/// Header given to input pasted without one, e.g. `>Submitted:14:05-October_18_2026`.
pub fn submission_header(submitted: &DateTime<Local>) -> String {
    format!(">Submitted:{}", submitted.format("%H:%M-%B_%d_%Y"))
}

/// Turns raw user input into FASTA that GeneValidator accepts.
///
/// Leading whitespace is dropped, a header is added if the text doesn't start
/// with `>`, and repeated sequence ids get a `_1`, `_2`, ... suffix so every id
/// is unique within the submission. Nothing else is changed.
pub fn to_fasta(seq: &str, submitted: &DateTime<Local>) -> String {
    let mut sequence = seq.trim_start().to_string();
    if !sequence.starts_with('>') {
        sequence.insert_str(0, &format!("{}\n", submission_header(submitted)));
    }
    disambiguate_ids(&sequence)
}

/// Appends `_n` to the n-th repeat of a header id.
pub fn disambiguate_ids(fasta: &str) -> String {
    let mut seen: HashMap<String, usize> = HashMap::new();
    HEADER_ID
        .replace_all(fasta, |caps: &Captures| {
            let header = caps[0].to_string();
            let count = seen.entry(header.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                header
            } else {
                format!("{}_{}", header, *count - 1)
            }
        })
        .into_owned()
}

/// Full normalization applied before the input is written to disk.
pub fn normalize(seq: &str, submitted: &DateTime<Local>) -> String {
    to_fasta(&normalize_line_endings(seq), submitted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqType {
    Nucleotide,
    Protein,
}

impl SeqType {
    /// The BLAST program that searches this kind of query against a protein database.
    pub fn blast_program(&self) -> &'static str {
        match self {
            SeqType::Nucleotide => "blastx",
            SeqType::Protein => "blastp",
        }
    }
}

/// Guesses the type of the first record of `fasta`.
///
/// The record is nucleotide when at least 90% of its residues (ignoring `N`)
/// are one of `ACGTU`.
pub fn guess_seq_type(fasta: &str) -> SeqType {
    let mut lines = fasta.lines().skip_while(|l| l.trim().is_empty());
    let mut residues = String::new();
    if let Some(first) = lines.next() {
        if !first.starts_with('>') {
            residues.push_str(first);
        }
    }
    for line in lines {
        if line.starts_with('>') {
            break;
        }
        residues.push_str(line);
    }

    let mut bases = 0usize;
    let mut total = 0usize;
    for c in residues.chars().filter(|c| c.is_ascii_alphabetic()) {
        match c.to_ascii_uppercase() {
            'N' => continue,
            'A' | 'C' | 'G' | 'T' | 'U' => bases += 1,
            _ => {}
        }
        total += 1;
    }

    if total > 0 && bases as f64 / total as f64 >= NUCLEOTIDE_THRESHOLD {
        SeqType::Nucleotide
    } else {
        SeqType::Protein
    }
}
