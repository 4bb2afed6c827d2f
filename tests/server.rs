#![cfg(unix)]

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use genevalidator_app::config::Config;
use genevalidator_app::database::Catalog;
use genevalidator_app::pipeline::PipelineMode;
use genevalidator_app::run::{init_public_dir, AppContext, INPUT_FILE_NAME, RUNS_DIR_NAME};
use genevalidator_app::server::router;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const LISTING: &str = "Protein::/db/swissprot::SwissProt\nNucleotide::/db/nt::nt\n";

/// Writes `<input>.json` with the first record of the input, plus one plot
/// file holding the header.
const FAKE_GENEVALIDATOR: &str = r#"#!/bin/sh
for last; do :; done
header=$(head -n 1 "$last" | cut -c 2-)
seq=$(sed -n 2p "$last")
printf '[{"idx":1,"header":"%s","seq":"%s","args":"%s"}]' "$header" "$seq" "$*" > "$last.json"
mkdir -p "$last.html/files/json"
printf '"%s"' "$header" > "$last.html/files/json/input_file.fa_1_len.json"
"#;

struct App {
    _tmp: TempDir,
    public_dir: PathBuf,
    router: Router,
}

fn write_script(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn app_with(script: &str) -> App {
    build_app(script, |_, config| config)
}

fn build_app<F>(script: &str, customize: F) -> App
where
    F: FnOnce(&Path, Config) -> Config,
{
    let tmp = tempfile::tempdir().unwrap();
    let genevalidator = write_script(tmp.path(), "genevalidator", script);
    let config = customize(
        tmp.path(),
        Config {
            genevalidator,
            web_dir: tmp.path().to_path_buf(),
            max_characters: Some(1000),
            ..Config::default()
        },
    );
    let public_dir = init_public_dir(&config.web_dir, &chrono::Local::now()).unwrap();
    let ctx = AppContext::new(config, Catalog::from_listing(LISTING), public_dir.clone());
    App {
        _tmp: tmp,
        public_dir,
        router: router(Arc::new(ctx)),
    }
}

fn app() -> App {
    app_with(FAKE_GENEVALIDATOR)
}

fn submission(form: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/input")
        .header(header::HOST, "localhost:4567")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, String) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

const VALID_FORM: &str = "seq=MKVLAAGIVALLLAAGCSS&validations%5B%5D=lenc&validations%5B%5D=dup&database=SwissProt";

#[tokio::test]
async fn test_submission_returns_json() {
    let app = app();
    let (status, body) = send(&app.router, submission(VALID_FORM)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let header = json[0]["header"].as_str().unwrap();
    assert!(header.starts_with("Submitted:"), "{}", header);
    let args = json[0]["args"].as_str().unwrap();
    assert!(args.starts_with("-v lenc,dup -d /db/swissprot -n 1 "), "{}", args);

    // plot data was collected for the web page, in a folder of its own
    let collected: Vec<PathBuf> = std::fs::read_dir(app.public_dir.join("web_files/json"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(collected.len(), 1);
    assert!(collected[0].join("input_file.fa_1_len.json").is_file());
}

fn plot_file(public_dir: &Path, json_url: &str) -> PathBuf {
    let unique_id = json_url.rsplit('/').nth(1).unwrap();
    public_dir
        .join("web_files/json")
        .join(unique_id)
        .join("input_file.fa_1_len.json")
}

#[tokio::test]
async fn test_plot_data_kept_per_run() {
    let app = app();
    let form_a = "seq=%3ErunA%0AMKVLAAG&validations=lenc&database=SwissProt&json_url=1";
    let form_b = "seq=%3ErunB%0AMKVLAAG&validations=lenc&database=SwissProt&json_url=1";
    let (status, url_a) = send(&app.router, submission(form_a)).await;
    assert_eq!(status, StatusCode::OK, "{}", url_a);
    let (status, url_b) = send(&app.router, submission(form_b)).await;
    assert_eq!(status, StatusCode::OK, "{}", url_b);

    let plots_a = std::fs::read_to_string(plot_file(&app.public_dir, &url_a)).unwrap();
    let plots_b = std::fs::read_to_string(plot_file(&app.public_dir, &url_b)).unwrap();
    assert_eq!(plots_a, "\"runA\"");
    assert_eq!(plots_b, "\"runB\"");
}

#[tokio::test]
async fn test_nucleotide_submission() {
    let app = app();
    let (status, body) = send(
        &app.router,
        submission("seq=AGCTAGCTAGCT&validations=lenc%2Clenr&database=SwissProt"),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json[0]["seq"], "AGCTAGCTAGCT");
    assert!(json[0]["header"].as_str().unwrap().starts_with("Submitted:"));
    let args = json[0]["args"].as_str().unwrap();
    assert!(args.starts_with("-v lenc,lenr -d /db/swissprot "), "{}", args);
}

#[tokio::test]
async fn test_form_without_content_type() {
    let app = app();
    for body in ["validations=lenc", ""] {
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header(header::HOST, "localhost:4567")
            .body(Body::from(body))
            .unwrap();
        let (status, message) = send(&app.router, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{:?}: {}", body, message);
        assert_eq!(message, "No input sequence provided.");
    }
}

#[tokio::test]
async fn test_missing_parameters() {
    let app = app();
    let forms = [
        "validations=lenc&database=SwissProt",
        "seq=&validations=lenc&database=SwissProt",
        "seq=MKV&database=SwissProt",
        "seq=MKV&validations=%5B%5D&database=SwissProt",
        "seq=MKV&validations=lenc",
    ];
    for form in forms {
        let (status, body) = send(&app.router, submission(form)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}: {}", form, body);
    }
}

#[tokio::test]
async fn test_unknown_database() {
    let app = app();
    let (status, body) = send(
        &app.router,
        submission("seq=MKV&validations=lenc&database=nt"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("nt"), "{}", body);
}

#[tokio::test]
async fn test_sequence_too_long() {
    let app = app();
    let form = format!(
        "seq={}&validations=lenc&database=SwissProt",
        "A".repeat(1000)
    );
    let (status, _) = send(&app.router, submission(&form)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tool_failure_is_server_error() {
    let app = app_with("#!/bin/sh\necho oops >&2\nexit 3\n");
    let (status, body) = send(&app.router, submission(VALID_FORM)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("exit code: 3"), "{}", body);
}

#[tokio::test]
async fn test_results_url_and_static_files() {
    let app = app();
    let form = format!("{}&json_url=1", VALID_FORM);
    let (status, url) = send(&app.router, submission(&form)).await;
    assert_eq!(status, StatusCode::OK);
    let prefix = format!("http://localhost:4567/{}/", RUNS_DIR_NAME);
    assert!(url.starts_with(&prefix), "{}", url);
    assert!(url.ends_with(&format!("/{}.json", INPUT_FILE_NAME)), "{}", url);

    // the JSON url is served from the public dir
    let path = &url["http://localhost:4567".len()..];
    let req = Request::builder().uri(path).body(Body::empty()).unwrap();
    let (status, body) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Submitted:"));

    let form = format!("{}&result_link=yes", VALID_FORM);
    let (status, url) = send(&app.router, submission(&form)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(url.ends_with("/input_file.fa.html/results1.html"), "{}", url);
}

#[tokio::test]
async fn test_concurrent_submissions() {
    let app = app();
    let form = format!("{}&json_url=1", VALID_FORM);
    let (a, b, c) = tokio::join!(
        send(&app.router, submission(&form)),
        send(&app.router, submission(&form)),
        send(&app.router, submission(&form))
    );
    for (status, _) in [&a, &b, &c] {
        assert_eq!(*status, StatusCode::OK);
    }
    assert_ne!(a.1, b.1);
    assert_ne!(b.1, c.1);
    assert_ne!(a.1, c.1);

    let runs = std::fs::read_dir(app.public_dir.join(RUNS_DIR_NAME))
        .unwrap()
        .count();
    assert_eq!(runs, 3);
}

#[tokio::test]
async fn test_index_and_unknown_route() {
    let app = app();
    let req = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("SwissProt"));
    assert!(!body.contains("nt<"));

    let req = Request::builder()
        .uri("/no/such/page")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Stands in for blastp/blastx and get_raw_sequences: creates the `-out`/`-o` file.
const FAKE_BLAST: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -out|-o) echo "$0" > "$2" ;;
  esac
  shift
done
"#;

const FAKE_GENEVALIDATOR_TABLE: &str = r##"#!/bin/sh
for last; do :; done
test -s "$(dirname "$last")/output.xml" || exit 4
mkdir -p "$last.html/files"
cat > "$last.html/files/table.html" <<'HTML'
<a href="#Place_external_results_link_here">Full results</a>
<tr data-plots="files/json/input_file.fa_1.json"></tr>
HTML
"##;

#[tokio::test]
async fn test_blast_pipeline_returns_table() {
    let app = build_app(FAKE_GENEVALIDATOR_TABLE, |dir, config| {
        let bin = dir.join("bin");
        std::fs::create_dir(&bin).unwrap();
        for tool in ["blastp", "blastx", "get_raw_sequences"] {
            write_script(&bin, tool, FAKE_BLAST);
        }
        Config {
            blast_bin: Some(bin),
            pipeline: PipelineMode::Blast,
            ..config
        }
    });

    let (status, html) = send(&app.router, submission(VALID_FORM)).await;
    assert_eq!(status, StatusCode::OK, "{}", html);
    assert!(!html.contains("#Place_external_results_link_here"));
    assert!(html.contains("http://localhost:4567/GeneValidator/"));
    assert!(html.contains("/input_file.fa.html/results.html"));
    assert!(html.contains(&format!("\"{}/", RUNS_DIR_NAME)));
    assert!(html.contains("/input_file.fa.html/files/json/input_file.fa_1.json"));

    // a protein query goes through blastp
    let runs = app.public_dir.join(RUNS_DIR_NAME);
    let run_dir = std::fs::read_dir(&runs).unwrap().next().unwrap().unwrap().path();
    let xml = std::fs::read_to_string(run_dir.join("output.xml")).unwrap();
    assert!(xml.trim().ends_with("/blastp"), "{}", xml);
}
