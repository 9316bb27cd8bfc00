#![forbid(unsafe_code)]

//! sift-worker: run an external command as the analyzer for one module
//! type. Each claimed observable is written to the command's stdin as JSON;
//! the command prints its analysis details (and optional discovered
//! observables) as JSON on stdout.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use sift_core::ids::WorkerId;
use sift_core::model::{AnalysisModuleType, ObservableHandle};
use sift_engine::InboundProcessor;
use sift_storage::SqliteStore;
use sift_worker::{Analyzer, AnalyzerError, AnalyzerOutput, WorkOutcome, Worker};

fn usage() -> &'static str {
    "sift-worker — analyze queued observables with an external command\n\n\
USAGE:\n\
  sift-worker --storage-dir DIR --module NAME --module-version VER\n\
              --observable-types T1,T2 --command CMD [ARGS...]\n\
              [--cache-ttl-ms MS] [--claim-ttl-ms MS]\n\
              [--worker-id ID] [--poll-ms MS] [--once]\n\n\
NOTES:\n\
  - The command receives one JSON object on stdin per observable:\n\
    {\"observable_type\": ..., \"value\": ..., \"module\": ..., \"version\": ...}\n\
  - stdout must be JSON: either the analysis details directly, or an\n\
    object {\"details\": ..., \"observables\": [{\"observable_type\", \"value\"}]}\n\
    to also report discovered observables.\n\
  - Everything after --command is passed to the command verbatim.\n"
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug)]
struct WorkerConfig {
    storage_dir: PathBuf,
    module: String,
    module_version: String,
    observable_types: Vec<String>,
    cache_ttl_ms: Option<i64>,
    claim_ttl_ms: Option<i64>,
    worker_id: Option<String>,
    poll_ms: u64,
    once: bool,
    command: Vec<String>,
}

fn parse_args() -> Result<WorkerConfig, String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print!("{}", usage());
        std::process::exit(0);
    }

    let mut storage_dir: Option<PathBuf> = env_var("SIFT_STORAGE_DIR").map(PathBuf::from);
    let mut module: Option<String> = None;
    let mut module_version: Option<String> = None;
    let mut observable_types: Vec<String> = Vec::new();
    let mut cache_ttl_ms: Option<i64> = None;
    let mut claim_ttl_ms: Option<i64> = None;
    let mut worker_id: Option<String> = env_var("SIFT_WORKER_ID");
    let mut poll_ms: u64 = env_var("SIFT_POLL_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1_000);
    let mut once = false;
    let mut command: Vec<String> = Vec::new();

    let mut i = 0usize;
    while i < args.len() {
        let a = args[i].as_str();
        match a {
            "--storage-dir" => {
                i += 1;
                let v = args.get(i).ok_or("--storage-dir requires DIR")?;
                storage_dir = Some(PathBuf::from(v));
            }
            "--module" => {
                i += 1;
                let v = args.get(i).ok_or("--module requires NAME")?;
                module = Some(v.to_string());
            }
            "--module-version" => {
                i += 1;
                let v = args.get(i).ok_or("--module-version requires VER")?;
                module_version = Some(v.to_string());
            }
            "--observable-types" => {
                i += 1;
                let v = args.get(i).ok_or("--observable-types requires T1,T2")?;
                observable_types = v
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
            }
            "--cache-ttl-ms" => {
                i += 1;
                let v = args.get(i).ok_or("--cache-ttl-ms requires MS")?;
                cache_ttl_ms = Some(
                    v.parse::<i64>()
                        .map_err(|_| "--cache-ttl-ms must be an integer (milliseconds)")?,
                );
            }
            "--claim-ttl-ms" => {
                i += 1;
                let v = args.get(i).ok_or("--claim-ttl-ms requires MS")?;
                claim_ttl_ms = Some(
                    v.parse::<i64>()
                        .map_err(|_| "--claim-ttl-ms must be an integer (milliseconds)")?,
                );
            }
            "--worker-id" => {
                i += 1;
                let v = args.get(i).ok_or("--worker-id requires ID")?;
                worker_id = Some(v.to_string());
            }
            "--poll-ms" => {
                i += 1;
                let v = args.get(i).ok_or("--poll-ms requires MS")?;
                poll_ms = v
                    .parse::<u64>()
                    .map_err(|_| "--poll-ms must be an integer (milliseconds)")?;
            }
            "--once" => once = true,
            "--command" => {
                command = args[i + 1..].to_vec();
                i = args.len();
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    Ok(WorkerConfig {
        storage_dir: storage_dir.ok_or("--storage-dir is required")?,
        module: module.ok_or("--module is required")?,
        module_version: module_version.ok_or("--module-version is required")?,
        observable_types,
        cache_ttl_ms,
        claim_ttl_ms,
        worker_id,
        poll_ms,
        once,
        command,
    })
}

/// Runs an external command per observable, speaking JSON on both ends.
struct CommandAnalyzer {
    command: Vec<String>,
}

impl Analyzer for CommandAnalyzer {
    fn analyze(
        &mut self,
        observable: &ObservableHandle,
        module: &AnalysisModuleType,
    ) -> Result<AnalyzerOutput, AnalyzerError> {
        let input = serde_json::json!({
            "observable_type": observable.observable_type,
            "value": observable.value,
            "module": module.name,
            "version": module.version,
        });

        let mut child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.to_string().as_bytes())?;
        }
        let out = child.wait_with_output()?;
        if !out.status.success() {
            return Err(format!("analyzer command exited with {}", out.status).into());
        }

        let value: serde_json::Value = serde_json::from_slice(&out.stdout)?;
        Ok(decode_output(value))
    }
}

/// An object shaped {"details", "observables"} reports discovered
/// observables; any other JSON is taken verbatim as the details.
fn decode_output(value: serde_json::Value) -> AnalyzerOutput {
    if let serde_json::Value::Object(map) = &value {
        if let Some(details) = map.get("details") {
            let mut output = AnalyzerOutput::new(details.clone());
            if let Some(serde_json::Value::Array(items)) = map.get("observables") {
                for item in items {
                    let observable_type = item.get("observable_type").and_then(|v| v.as_str());
                    let observable_value = item.get("value").and_then(|v| v.as_str());
                    if let (Some(t), Some(v)) = (observable_type, observable_value) {
                        output = output.with_observable(ObservableHandle::new(t, v));
                    }
                }
            }
            return output;
        }
    }
    AnalyzerOutput::new(value)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = match parse_args() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("sift-worker: {e}\n\n{}", usage());
            std::process::exit(2);
        }
    };
    if cfg.command.is_empty() {
        eprintln!("sift-worker: --command is required");
        std::process::exit(2);
    }
    if cfg.observable_types.is_empty() {
        eprintln!("sift-worker: --observable-types is required");
        std::process::exit(2);
    }

    let mut module = AnalysisModuleType::new(
        cfg.module.clone(),
        cfg.module_version.clone(),
        cfg.observable_types.clone(),
    );
    if let Some(ttl) = cfg.cache_ttl_ms {
        module = module.with_cache_ttl_ms(ttl);
    }
    if let Some(ttl) = cfg.claim_ttl_ms {
        module = module.with_claim_ttl_ms(ttl);
    }

    let store = SqliteStore::open(&cfg.storage_dir)?;
    let processor = InboundProcessor::new(store);
    let analyzer = CommandAnalyzer {
        command: cfg.command.clone(),
    };
    let mut worker = Worker::new(processor, module, analyzer);
    if let Some(id) = &cfg.worker_id {
        worker = worker.with_owner(WorkerId::try_new(id.clone())?);
    }
    worker.register()?;

    eprintln!(
        "sift-worker: {}@{} as {} (storage: {})",
        cfg.module,
        cfg.module_version,
        worker.owner(),
        cfg.storage_dir.display()
    );

    loop {
        match worker.run_once(cfg.poll_ms) {
            Ok(WorkOutcome::Idle) => {
                if cfg.once {
                    return Ok(());
                }
            }
            Ok(WorkOutcome::Completed(id)) => {
                eprintln!("sift-worker: completed {id}");
                if cfg.once {
                    return Ok(());
                }
            }
            Ok(WorkOutcome::Dropped(id)) => {
                eprintln!("sift-worker: dropped stale result for {id}");
            }
            Err(err) => {
                eprintln!("sift-worker: {err}");
                std::thread::sleep(Duration::from_millis(cfg.poll_ms));
            }
        }
    }
}
