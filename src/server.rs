use crate::error::RunError;
use crate::run::{AppContext, Output, Run, RunParams};
use crate::utils::parse_comma_separated_list;
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::fmt::Write;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

/// What the client asked to get back from a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Output,
    ResultsUrl,
    JsonUrl,
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .route("/", get(index).post(submit))
        .route("/input", post(submit))
        .nest_service("/GeneValidator", ServeDir::new(ctx.runs_dir()))
        .nest_service("/web_files", ServeDir::new(ctx.public_dir.join("web_files")))
        .fallback(not_found)
        .layer(cors)
        .with_state(ctx)
}

/// Accepts `lenc`, `lenc,lenr` and `["lenc", "lenr"]`.
pub fn parse_validations(value: &str) -> Vec<String> {
    let inner = value.trim().trim_start_matches('[').trim_end_matches(']');
    parse_comma_separated_list(inner)
        .into_iter()
        .map(|v| v.trim_matches(|c| c == '"' || c == '\'').trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

pub fn parse_form(fields: Vec<(String, String)>) -> (RunParams, Reply) {
    let mut params = RunParams::default();
    let mut reply = Reply::Output;
    for (key, value) in fields {
        match key.as_str() {
            "seq" => params.seq = Some(value),
            "validations" | "validations[]" => {
                params.validations.extend(parse_validations(&value))
            }
            "database" => params.database = Some(value),
            "results_url" | "result_link" => reply = Reply::ResultsUrl,
            "json_url" if reply == Reply::Output => reply = Reply::JsonUrl,
            _ => log::debug!("Ignoring form field {:?}", key),
        }
    }
    (params, reply)
}

/// Escapes text placed inside HTML.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// `scheme://host/path` as seen by the client.
pub fn request_url(headers: &HeaderMap, uri: &Uri) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost");
    format!("{}://{}{}", scheme, host, uri.path())
}

async fn index(State(ctx): State<Arc<AppContext>>) -> Html<String> {
    let config = &ctx.config;
    let mut page = String::from("<!DOCTYPE html>\n<html><head><title>GeneValidator</title></head><body>\n");
    let _ = writeln!(
        page,
        "<p>GeneValidatorApp v{}</p>",
        env!("CARGO_PKG_VERSION")
    );
    if let Some(db) = ctx.catalog.default_db(config.default_db.as_deref()) {
        let _ = writeln!(page, "<p>Default database: {}</p>", escape_html(&db.title));
    }
    let others = ctx.catalog.non_default_dbs(config.default_db.as_deref());
    if !others.is_empty() {
        page.push_str("<ul>\n");
        for db in others {
            let _ = writeln!(page, "<li>{}</li>", escape_html(&db.title));
        }
        page.push_str("</ul>\n");
    }
    if let Some(max) = config.max_characters {
        let _ = writeln!(page, "<p>Maximum characters: {}</p>", max);
    }
    page.push_str("</body></html>\n");
    Html(page)
}

async fn submit(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    uri: Uri,
    form: Result<Form<Vec<(String, String)>>, FormRejection>,
) -> Result<Response, RunError> {
    // unreadable body: treated as an empty form
    let fields = match form {
        Ok(Form(fields)) => fields,
        Err(rejection) => {
            log::debug!("Unreadable form: {}", rejection);
            Vec::new()
        }
    };
    let (params, reply) = parse_form(fields);
    let url = request_url(&headers, &uri);
    let output = Run::init(ctx, &url, params).await?.run().await?;

    Ok(match reply {
        Reply::ResultsUrl => output.results_url.into_response(),
        Reply::JsonUrl => output.json_url.into_response(),
        Reply::Output => match output.output {
            Output::Json(value) => Json(value).into_response(),
            Output::Html(html) => Html(html).into_response(),
        },
    })
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}

impl IntoResponse for RunError {
    fn into_response(self) -> Response {
        let status = if self.is_argument() {
            log::warn!("Rejected submission: {}", self);
            StatusCode::BAD_REQUEST
        } else {
            log::error!("Run failed: {}", self);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, self.to_string()).into_response()
    }
}
