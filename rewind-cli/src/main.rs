mod cli;
mod error;
mod progress;
mod utils;

use std::sync::Arc;

use clap::Parser;
use rewind_engine::{
    CredentialSource, DownloaderConfig, Mission, MissionConfig, MissionRunner, MissionSpec,
    NoCredentials, ProxyAuth, ProxyConfig, StaticCredentials,
};
use rewind_engine::logging::MissionLogWriter;
use tracing::{Level, error, info, warn};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Args;
use crate::error::AppError;
use crate::progress::spawn_reporter;
use crate::utils::{parse_headers, unique_titles};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Error: {e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };
    let file_level = if verbose { Level::DEBUG } else { Level::INFO };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(verbose)
                .with_level(true)
                .with_filter(filter),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(MissionLogWriter)
                .with_filter(filter_fn(move |meta| {
                    *meta.level() <= file_level && MissionLogWriter::is_active()
                })),
        )
        .init();
}

async fn run(args: Args) -> Result<(), AppError> {
    let downloader = downloader_config(&args)?;
    let config = MissionConfig {
        concurrency: args.concurrency.max(1),
        decrypt: args.decrypt,
        full_download: args.full_download,
        merge: !args.no_merge,
        output_dir: args.output.clone(),
        tool: args.tool.clone(),
        ..MissionConfig::default()
    };

    let credentials: Arc<dyn CredentialSource> = match &args.cookies {
        Some(source) => {
            let loaded = StaticCredentials::load(source).await?;
            if loaded.is_empty() {
                warn!("No cookies found in --cookies");
            }
            Arc::new(loaded)
        }
        None => Arc::new(NoCredentials),
    };

    let total = args.urls.len();
    let titles = unique_titles(&args.urls, args.title.as_deref());
    let mut reporters = Vec::with_capacity(total);
    let missions: Vec<Mission> = args
        .urls
        .iter()
        .zip(titles)
        .map(|(url, title)| {
            let (events, reporter) = spawn_reporter(title.clone());
            reporters.push(reporter);
            let mut spec = MissionSpec::new(url.clone(), title)
                .rendition(args.quality)
                .credentials(credentials.clone());
            if let Some(referer) = &args.referer {
                spec = spec.referer(referer.clone());
            }
            Mission::new(spec, config.clone())
                .with_downloader_config(downloader.clone())
                .with_events(events)
        })
        .collect();

    let runner = MissionRunner::new(args.threads);
    let stop = runner.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, finishing in-flight segments");
            stop.cancel();
        }
    });

    info!(missions = total, threads = args.threads.max(1), "Starting");
    let results = tokio::task::spawn_blocking(move || runner.run(missions))
        .await
        .map_err(std::io::Error::other)?;
    for reporter in reporters {
        let _ = reporter.await;
    }

    let mut failed = 0;
    for (url, result) in args.urls.iter().zip(results) {
        match result {
            Ok(report) if report.is_complete() => match &report.merged {
                Some(path) => info!(title = %report.title, output = %path.display(), "Mission complete"),
                None => info!(title = %report.title, "Mission complete"),
            },
            Ok(report) => {
                failed += 1;
                warn!(
                    title = %report.title,
                    successful = report.successful,
                    failed = report.failed,
                    "Mission finished with missing segments"
                );
            }
            Err(e) => {
                failed += 1;
                error!(url = %url, error = %e, "Mission failed");
            }
        }
    }

    if failed > 0 {
        return Err(AppError::Incomplete { failed, total });
    }
    Ok(())
}

fn downloader_config(args: &Args) -> Result<DownloaderConfig, AppError> {
    let mut builder = DownloaderConfig::builder();
    if let Some(user_agent) = &args.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }
    for (name, value) in parse_headers(&args.headers)? {
        builder = builder.header(&name, &value)?;
    }
    if let Some(url) = &args.proxy {
        let mut proxy = ProxyConfig::from_url(url.clone());
        if let Some(proxy_type) = args.proxy_type {
            proxy.proxy_type = proxy_type;
        }
        if let (Some(username), Some(password)) = (&args.proxy_username, &args.proxy_password) {
            proxy.auth = Some(ProxyAuth {
                username: username.clone(),
                password: password.clone(),
            });
        }
        builder = builder.proxy(proxy);
    }
    Ok(builder.build())
}
