mod attacker;
mod chain;
mod config;
mod error;
mod gate;
mod metrics;
mod readiness;
mod report;
mod results;
mod runner;
mod target;
mod tracker;

#[cfg(test)]
mod testing;

use clap::Parser;
use eyre::WrapErr;
use tracing::{ error, info };
use tracing_subscriber::EnvFilter;

use config::{ Args, CampaignConfig };
use report::{ write_report, TextReport };
use runner::{ build_runtime, Runner };

fn main() -> eyre::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = CampaignConfig::from_args(args).wrap_err("invalid campaign")?;
    let output = config.output.clone();
    let format = config.format;

    let runtime = build_runtime(config.threads).wrap_err("failed to create tokio runtime")?;
    let runner = Runner::new_http(config)?;

    // first Ctrl+C stops pacing and abandons pending confirmations, the report is still written
    let shutdown = runner.shutdown_token();
    ctrlc
        ::set_handler(move || {
            if !shutdown.is_cancelled() {
                eprintln!("\ninterrupted, finishing up");
                shutdown.cancel();
            }
        })
        .wrap_err("failed to set Ctrl+C handler")?;

    let metrics = runtime.block_on(async {
        runner.preflight().await?;
        runner.run().await
    });
    let metrics = match metrics {
        Ok(metrics) => metrics,
        Err(err) => {
            error!(error = %err, "campaign aborted");
            return Err(err.into());
        }
    };

    write_report(&output, &metrics, format).wrap_err_with(||
        format!("failed to write report to {}", output.display())
    )?;
    info!(path = %output.display(), "report written");

    println!("{}", TextReport(&metrics));
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}
