use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use pipeline::orchestrator::{Orchestrator, RunConfig, RunStatus};
use pipeline::sink::{ResultSink, StdoutSink};
use pipeline::source::FileSource;
use workload::wc::WcConfig;

mod args;

use args::Args;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let Some(workload) = workload::try_named(&args.workload) else {
        error!("the workload `{}` is not a known workload", args.workload);
        return ExitCode::from(2);
    };

    let aux = match (WcConfig {
        token_policy: args.token_policy,
    })
    .to_aux()
    {
        Ok(aux) => aux,
        Err(err) => {
            error!("failed to encode workload config: {err}");
            return ExitCode::from(2);
        }
    };

    let defaults = RunConfig::default();
    let workers = args.workers.unwrap_or(defaults.workers);
    let config = RunConfig {
        workers,
        max_retries: args.max_retries,
        n_reduce: args.n_reduce.unwrap_or(workers),
        skip_bad_records: args.skip_bad_records,
        drain_timeout: Duration::from_secs(args.drain_timeout_secs),
        aux,
    };

    let orchestrator = Orchestrator::new(workload, config);

    // First ctrl-c requests cancellation; the orchestrator drains in-flight
    // tasks and reports whatever completed.
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("cancellation requested, draining in-flight tasks");
            cancel.cancel();
        }
    });

    let source = FileSource::new(args.source.clone());
    let mut sink = StdoutSink;

    match orchestrator.run(&source).await {
        Ok(report) => {
            // Partial results are always emitted, never silently dropped.
            if let Err(err) = sink.publish(&report.counts) {
                error!("failed to publish results: {err}");
                return ExitCode::from(2);
            }
            match report.status {
                RunStatus::Success => ExitCode::SUCCESS,
                RunStatus::Partial | RunStatus::Cancelled => ExitCode::from(1),
            }
        }
        Err(err) => {
            error!("pipeline run failed: {err}");
            ExitCode::from(2)
        }
    }
}
