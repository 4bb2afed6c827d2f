//! String-level rewriting of what GeneValidator writes, so it resolves under
//! the public directory.
//!
//! GeneValidator references its plot data relative to its own output folder,
//! e.g. `files/json/input_file.fa_1_len.json`. The browser only sees the table
//! fragment, so those links have to point at
//! `GeneValidator/<unique id>/input_file.fa.html/files/json/...` instead. This
//! depends on the exact text the tool emits and is pinned by a fixture test.

use crate::run::{INPUT_FILE_NAME, RUNS_DIR_NAME};

/// Relative prefix of plot JSON files inside the tool's HTML output.
pub const PLOTS_PREFIX: &str = "files/json/input_file.fa_";
/// Placeholder the tool leaves for the link to the full report.
pub const RESULTS_LINK_PLACEHOLDER: &str = "#Place_external_results_link_here";

/// Path of a run artifact relative to the public directory.
pub fn public_path(unique_id: &str, artifact: &str) -> String {
    format!("{}/{}/{}", RUNS_DIR_NAME, unique_id, artifact)
}

/// The request URL with its `input` path segments, query and trailing
/// slashes removed: `http://host/gv/input?x=1` -> `http://host/gv`.
pub fn base_url(request_url: &str) -> String {
    let url = request_url.split(['?', '#']).next().unwrap_or_default();
    let (origin, path) = match url.find("://") {
        Some(i) => match url[i + 3..].find('/') {
            Some(j) => url.split_at(i + 3 + j),
            None => (url, ""),
        },
        None => ("", url),
    };
    let path: Vec<&str> = path.split('/').filter(|s| *s != "input").collect();
    format!("{}{}", origin, path.join("/"))
        .trim_end_matches('/')
        .to_string()
}

/// Public URL of `artifact` inside the run directory.
pub fn artifact_url(request_url: &str, unique_id: &str, artifact: &str) -> String {
    format!(
        "{}/{}",
        base_url(request_url),
        public_path(unique_id, artifact)
    )
}

/// URL of the JSON output GeneValidator writes next to the input file.
pub fn json_url(request_url: &str, unique_id: &str) -> String {
    artifact_url(request_url, unique_id, &format!("{}.json", INPUT_FILE_NAME))
}

/// Points plot links of the results table at the run's public folder and
/// fills in the link to the full report.
pub fn rewrite_table_html(html: &str, unique_id: &str, results_url: &str) -> String {
    let local_plots = public_path(
        unique_id,
        &format!("{}.html/{}", INPUT_FILE_NAME, PLOTS_PREFIX),
    );
    html.replace(PLOTS_PREFIX, &local_plots)
        .replace(RESULTS_LINK_PLACEHOLDER, results_url)
}
