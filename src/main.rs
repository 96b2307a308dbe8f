use anyhow::{bail, Context};
use blobmover::prelude::*;
use blobmover::{Cli, Commands};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbosity);

    let store = Arc::new(
        FsStore::open(&cli.root)
            .await
            .with_context(|| format!("could not open container {}", cli.root.display()))?,
    );

    let sink: Arc<dyn DiagnosticSink> = if cli.no_error_reports {
        Arc::new(TracingSink)
    } else {
        Arc::new(StoreSink::new(Arc::clone(&store)))
    };

    match cli.command {
        Commands::Import { key, file } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("could not read {}", file.display()))?;
            store.put(&key, Bytes::from(data)).await?;
            info!(%key, "Imported");
        }
        Commands::Snapshot { key } => {
            let path = store.snapshot(&key).await?;
            println!("{}", path.display());
        }
        Commands::List => {
            for key in store.list().await? {
                println!("{key}");
            }
        }
        Commands::Copy {
            source,
            destination,
            lease_secs,
            margin_secs,
            poll_ms,
        } => {
            let config = MonitorConfig::new(
                Duration::from_secs(lease_secs),
                Duration::from_secs(margin_secs),
                Duration::from_millis(poll_ms),
            )?;
            let monitor = LeasedCopyMonitor::new(Arc::clone(&store), config)?;
            match monitor.copy_with_lease(&source, &destination).await {
                Ok(report) => println!(
                    "{} -> {} ({} renewals)",
                    report.source, report.destination, report.renewals
                ),
                Err(e) => {
                    record(sink.as_ref(), &format!("copy {source}"), &e).await;
                    return Err(e.into());
                }
            }
        }
        Commands::Split { source, chunks } => {
            let monitor = LeasedCopyMonitor::new(Arc::clone(&store), MonitorConfig::default())?;
            let report = match monitor.split(&source, chunks).await {
                Ok(report) => report,
                Err(e) => {
                    record(sink.as_ref(), &format!("split {source}"), &e).await;
                    return Err(e.into());
                }
            };
            for copy in &report.copies {
                println!("{}\t{}", copy.destination, if copy.created { "created" } else { "failed" });
            }
            if !report.all_created() {
                bail!("not every chunk of {source} was created");
            }
        }
        Commands::Run {
            source,
            settings_env,
        } => {
            let mut settings = match settings_env {
                Some(key) => Settings::from_env(&key)?,
                None => Settings::default(),
            };
            if cli.no_error_reports {
                settings.report_errors = false;
            }

            // The runner reports its own errors
            let runner = JobRunner::from_settings(Arc::clone(&store), &settings)?;
            let report = runner.run(&source).await?;
            for moved in &report.moved {
                println!("{}\t{}", moved.source, moved.destination);
            }
            if !report.is_success() {
                bail!(
                    "job {} finished with {} failed chunk moves",
                    report.job_id,
                    report.failures.len()
                );
            }
        }
    }

    Ok(())
}

async fn record(sink: &dyn DiagnosticSink, context: &str, error: &Error) {
    if let Err(e) = sink.report(&ErrorReport::from_error(context, error)).await {
        tracing::warn!(error = %e, "Could not record error report");
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("blobmover={level}")));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
