use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use genevalidator_app::args::Args;
use genevalidator_app::config::Config;
use genevalidator_app::database::Catalog;
use genevalidator_app::run::{init_public_dir, AppContext};
use genevalidator_app::server::router;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::runtime::Builder;

async fn serve(ctx: Arc<AppContext>) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.host, ctx.config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Port {} is already in use. Use --port to pick another one.",
                ctx.config.port
            )
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            anyhow::bail!(
                "Permission denied binding to {}. Ports below 1024 need root privileges.",
                addr
            )
        }
        Err(e) => return Err(e).with_context(|| format!("failed to bind {}", addr)),
    };

    println!(
        "** GeneValidatorApp is ready at {}\n   Press CTRL+C to quit.",
        ctx.config.server_url()
    );
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    println!("\n** Thank you for using GeneValidatorApp :-)");
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    let config = Config::load(args).context("invalid configuration")?;
    config.check_tools()?;
    let catalog = Catalog::scan(&config.database_dir, &config.search_path())?;
    log::info!("Found {} BLAST databases", catalog.len());
    log::info!("Pipeline mode: {}", config.pipeline);

    let public_dir = init_public_dir(&config.web_dir, &Local::now())
        .with_context(|| format!("unable to create public dir in {:?}", config.web_dir))?;
    log::info!("Serving files from {:?}", public_dir);

    if config.listens_on_all_interfaces() {
        log::warn!(
            "Listening on all interfaces (0.0.0.0). Use --host 127.0.0.1 to accept local connections only."
        );
    }

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name("gvapp")
        .worker_threads(num_cpus::get())
        .build()
        .context("failed to create runtime")?;

    let ctx = Arc::new(AppContext::new(config, catalog, public_dir));
    runtime.block_on(serve(ctx))
}
