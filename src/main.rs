use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use queryflow::cli::{Cli, Command};
use queryflow::config::{FlowConfig, parse_encryption};
use queryflow::service::{HttpQueryService, QueryService, ScriptedService};
use queryflow::ui::RunProgress;
use queryflow::workflow::{
    Engine, JobHandle, JobRequest, JobStatus, OutputDestination, ResultSet, RunReport, WaitPolicy,
};
use queryflow::{logging, shutdown};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs);

    match dispatch(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// One entry of a `run --file` request list. `output` falls back to the
/// configured destination.
#[derive(Debug, Deserialize)]
struct RequestSpec {
    query: String,
    context: String,
    #[serde(default)]
    output: Option<OutputDestination>,
}

fn load_requests(path: &Path, default_output: &OutputDestination) -> Result<Vec<JobRequest>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let specs: Vec<RequestSpec> = serde_json::from_str(&contents)
        .with_context(|| format!("parsing {}", path.display()))?;
    if specs.is_empty() {
        bail!("{} contains no requests", path.display());
    }
    Ok(specs
        .into_iter()
        .map(|spec| {
            let output = spec.output.unwrap_or_else(|| default_output.clone());
            JobRequest::new(spec.query, spec.context, output)
        })
        .collect())
}

fn http_service(config: &FlowConfig) -> Result<HttpQueryService> {
    let api_key = (!config.api_key.is_empty()).then(|| config.api_key.clone());
    HttpQueryService::new(
        &config.endpoint,
        api_key,
        Duration::from_secs(config.connect_timeout_secs),
        Duration::from_secs(config.request_timeout_secs),
    )
    .context("building HTTP client")
}

/// Run every request and print the outcome. Returns whether all succeeded.
async fn execute<S: QueryService + 'static>(engine: Engine<S>, requests: Vec<JobRequest>) -> Result<bool> {
    let label = match requests.as_slice() {
        [single] => format!("{} on {}", single.query, single.context),
        many => format!("{} queries", many.len()),
    };
    let progress = Arc::new(RunProgress::start(&label));
    let engine = engine.with_observer(progress.clone());

    let reports: Vec<RunReport> = if requests.len() == 1 {
        let mut requests = requests;
        match requests.pop() {
            Some(request) => vec![engine.run(request).await],
            None => Vec::new(),
        }
    } else {
        engine.run_many(requests).await?
    };

    for report in &reports {
        progress.complete(report);
    }
    for report in &reports {
        progress.print_report(report);
    }
    Ok(reports.iter().all(RunReport::is_success))
}

/// Only commands that drive runs trap SIGINT/SIGTERM. One-shot lookups keep
/// the default handler so Ctrl-C exits at once.
fn traps_signals(command: &Command) -> bool {
    matches!(command, Command::Run { .. } | Command::Demo { .. })
}

async fn dispatch(cli: Cli) -> Result<bool> {
    let Cli {
        command,
        timeout_secs,
        interval_secs,
        ..
    } = cli;

    let mut config = FlowConfig::load()?;
    if let Some(secs) = timeout_secs {
        config.global_timeout_secs = secs;
    }
    if let Some(secs) = interval_secs {
        config.wait_interval_secs = secs;
    }
    config.validate()?;

    let cancel = if traps_signals(&command) {
        shutdown::install_shutdown_handler().context("installing signal handlers")?
    } else {
        CancellationToken::new()
    };

    match command {
        Command::Run {
            query,
            context,
            file,
            bucket,
            key,
            encryption,
            kms_key,
        } => {
            let mut output = config.output.clone();
            if let Some(bucket) = bucket {
                output.bucket = bucket;
            }
            if let Some(key) = key {
                output.key = key;
            }
            if let Some(kms_key) = kms_key {
                output.kms_key = Some(kms_key);
            }
            let destination = match encryption {
                Some(mode) => OutputDestination::new(&output.bucket, &output.key)
                    .with_encryption(parse_encryption(mode.as_str(), output.kms_key.clone())?),
                None => output.destination()?,
            };

            let requests = match (file, query) {
                (Some(path), _) => load_requests(Path::new(&path), &destination)?,
                (None, Some(query)) => {
                    let context = context.context("--context is required with a query")?;
                    vec![JobRequest::new(query, context, destination)]
                }
                (None, None) => bail!("provide a query or --file"),
            };

            let service = Arc::new(http_service(&config)?);
            let engine = Engine::new(service, config.engine_config()).with_cancellation(cancel);
            execute(engine, requests).await
        }

        Command::Status { job_id } => {
            let service = http_service(&config)?;
            let status = service.get_status(&JobHandle::new(job_id)).await?;
            println!("{status}");
            Ok(true)
        }

        Command::Results { job_id } => {
            let service = http_service(&config)?;
            let rows = service.get_results(&JobHandle::new(job_id)).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(true)
        }

        Command::Demo { fail, hang } => run_demo(&config, fail, hang, timeout_secs, interval_secs, cancel).await,
    }
}

/// Runs the built-in walkthrough against an in-memory service. Intervals are
/// shortened unless set explicitly on the command line.
async fn run_demo(
    config: &FlowConfig,
    fail: bool,
    hang: bool,
    timeout_secs: Option<u64>,
    interval_secs: Option<u64>,
    cancel: CancellationToken,
) -> Result<bool> {
    let statuses = if hang {
        vec![JobStatus::Queued, JobStatus::Running]
    } else if fail {
        vec![JobStatus::Queued, JobStatus::Running, JobStatus::Failed]
    } else {
        vec![JobStatus::Queued, JobStatus::Running, JobStatus::Running, JobStatus::Succeeded]
    };
    let rows: ResultSet = serde_json::from_value(json!([
        {"finding_type": "Recon:EC2/PortProbeUnprotectedPort", "severity": 2, "count": 14},
        {"finding_type": "UnauthorizedAccess:IAMUser/ConsoleLogin", "severity": 5, "count": 3}
    ]))?;
    let service = Arc::new(ScriptedService::new(statuses).returning(rows));

    let mut engine_config = config.engine_config();
    engine_config.wait = WaitPolicy::Fixed {
        interval: Duration::from_secs(interval_secs.unwrap_or(1)),
    };
    engine_config.global_timeout = Duration::from_secs(timeout_secs.unwrap_or(if hang { 5 } else { 60 }));

    let request = JobRequest::new(
        "SELECT type AS finding_type, severity, count(*) AS count FROM guardduty_findings GROUP BY 1, 2",
        "security_lake",
        config.output.destination()?,
    );
    let engine = Engine::new(service, engine_config).with_cancellation(cancel);
    execute(engine, vec![request]).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_requests_applies_default_output() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"query": "SELECT 1", "context": "db1"}},
                {{"query": "SELECT 2", "context": "db2",
                  "output": {{"bucket": "other", "key": "k", "encryption": {{"mode": "SSE_KMS", "key_id": null}}}}}}
            ]"#
        )
        .unwrap();

        let default = OutputDestination::new("results", "guardduty");
        let requests = load_requests(file.path(), &default).unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].output, default);
        assert_eq!(requests[1].context, "db2");
        assert_eq!(requests[1].output.location(), "s3://other/k");
        assert_eq!(requests[1].output.encryption.as_str(), "SSE_KMS");
    }

    #[test]
    fn load_requests_rejects_empty_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[]").unwrap();
        let default = OutputDestination::new("results", "guardduty");
        assert!(load_requests(file.path(), &default).is_err());
    }

    #[test]
    fn only_run_and_demo_trap_signals() {
        let parse = |args: &[&str]| Cli::parse_from(args).command;
        assert!(traps_signals(&parse(&["queryflow", "run", "SELECT 1", "-c", "db1"])));
        assert!(traps_signals(&parse(&["queryflow", "demo"])));
        assert!(!traps_signals(&parse(&["queryflow", "status", "q-1"])));
        assert!(!traps_signals(&parse(&["queryflow", "results", "q-1"])));
    }

    #[test]
    fn http_service_omits_empty_api_key() {
        let config = FlowConfig::default();
        assert!(http_service(&config).is_ok());
    }
}
