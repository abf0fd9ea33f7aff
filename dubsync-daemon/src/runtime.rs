use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

use dubsync_core::{config, TableRef, TableStore};
use dubsync_sync::pipeline;
use dubsync_sync::{DriverSummary, FileTableStore, RunMode, RunOutcome};

use crate::error::{io_err, DaemonError};
use crate::paths::{queue_path, run_dir, socket_path, DEBOUNCE_WINDOW, TICK_INTERVAL};
use crate::protocol::{DaemonRequest, DaemonResponse};

#[derive(Debug, Clone)]
enum JobKind {
    Drain(RunMode),
    Scan(String),
    /// Scheduled drain (skipped unless due) followed by due continuations.
    Tick,
}

struct Job {
    kind: JobKind,
    source: &'static str,
    respond_to: oneshot::Sender<Result<Value, String>>,
}

/// What the daemon has done since it started.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Activity {
    pub runs: u64,
    pub scans: u64,
    pub continuations_fired: u64,
    pub last_run_at_unix: u64,
    pub last_run: Option<DriverSummary>,
}

pub type SharedActivity = Arc<RwLock<Activity>>;

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let queue = config::load_at(&home)?.queue;

    let activity: SharedActivity = Arc::new(RwLock::new(Activity::default()));
    let started_at_unix = unix_seconds_now();

    let (job_tx, job_rx) = mpsc::channel::<Job>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(home, queue, job_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let activity = activity.clone();
        tokio::spawn(async move {
            let result = processor_task(home, activity, job_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let tick_handle = {
        let shutdown = shutdown_tx.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = tick_task(job_tx, TICK_INTERVAL, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let activity = activity.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                activity,
                job_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };
    drop(job_tx);

    let (watcher_result, processor_result, tick_result, socket_result, signal_result) = tokio::join!(
        watcher_handle,
        processor_handle,
        tick_handle,
        socket_handle,
        signal_handle
    );

    handle_join("watcher", watcher_result)?;
    handle_join("processor", processor_result)?;
    handle_join("tick", tick_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Trigger an immediate drain whenever the queue table gains rows.
async fn watcher_task(
    home: PathBuf,
    queue: TableRef,
    job_tx: mpsc::Sender<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let queue_file = queue_path(&home, &queue);
    let Some(dir) = queue_file.parent().map(Path::to_path_buf) else {
        return Err(DaemonError::Protocol(format!(
            "queue table has no parent directory: {}",
            queue_file.display()
        )));
    };
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    // Events arrive with canonical paths on some platforms.
    let dir = fs::canonicalize(&dir).unwrap_or(dir);
    let watched_file = match queue_file.file_name() {
        Some(name) => dir.join(name),
        None => queue_file.clone(),
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %dir.display(), "watching queue directory");

    let mut debounce = HashMap::<PathBuf, Instant>::new();
    let mut known_rows = queue_row_count(home.clone(), queue.clone()).await.unwrap_or(0);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                if !event.paths.iter().any(|p| p == &watched_file) {
                    continue;
                }
                if !should_process_event(&mut debounce, &watched_file, Instant::now()) {
                    continue;
                }

                // The driver rewrites queue rows in place; only appends are new work.
                let rows = match queue_row_count(home.clone(), queue.clone()).await {
                    Ok(rows) => rows,
                    Err(err) => {
                        tracing::warn!(error = %err, "could not read queue table");
                        continue;
                    }
                };
                let grew = rows > known_rows;
                known_rows = rows;
                if !grew {
                    continue;
                }

                match enqueue_job(&job_tx, JobKind::Drain(RunMode::Immediate), "watcher").await {
                    Ok(summary) => tracing::info!(summary = %summary, "watcher-triggered run completed"),
                    Err(err) => tracing::error!(error = %err, "watcher-triggered run failed"),
                }
            }
        }
    }

    Ok(())
}

/// Runs jobs one at a time on the blocking pool.
async fn processor_task(
    home: PathBuf,
    activity: SharedActivity,
    mut job_rx: mpsc::Receiver<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = job_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();
                let kind = job.kind.clone();
                let home_for_job = home.clone();
                let result = tokio::task::spawn_blocking(move || execute(&home_for_job, kind))
                    .await
                    .map_err(|err| DaemonError::Protocol(format!("job join error: {err}")))?;

                let outcome = match result {
                    Ok(done) => {
                        record_activity(&activity, &done).await;
                        tracing::debug!(
                            source = job.source,
                            duration_ms = started.elapsed().as_millis() as u64,
                            "job finished",
                        );
                        Ok(done.into_value())
                    }
                    Err(err) => Err(err.to_string()),
                };
                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

async fn tick_task(
    job_tx: mpsc::Sender<Job>,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match enqueue_job(&job_tx, JobKind::Tick, "tick").await {
                    Ok(_) => {}
                    Err(DaemonError::ChannelClosed(_)) => break,
                    Err(err) => tracing::error!(error = %err, "scheduled tick failed"),
                }
            }
        }
    }
    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    activity: SharedActivity,
    job_tx: mpsc::Sender<Job>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let run = run_dir(&home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let activity = activity.clone();
                let job_tx = job_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        activity,
                        job_tx,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    activity: SharedActivity,
    job_tx: mpsc::Sender<Job>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => {
                DaemonResponse::ok(build_status_payload(&home, &activity, started_at_unix).await)
            }
            "run" => job_response(
                enqueue_job(&job_tx, JobKind::Drain(RunMode::Immediate), "socket").await,
            ),
            "scan" => match request.scan.clone() {
                Some(name) => {
                    job_response(enqueue_job(&job_tx, JobKind::Scan(name), "socket").await)
                }
                None => DaemonResponse::error("scan requires a job name"),
            },
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

enum Done {
    Drain(DriverSummary),
    Scan(dubsync_sync::ScanSummary),
    Tick(pipeline::TickReport),
}

impl Done {
    fn into_value(self) -> Value {
        match self {
            Done::Drain(summary) => json!(summary),
            Done::Scan(summary) => json!(summary),
            Done::Tick(report) => json!(report),
        }
    }
}

fn execute(home: &Path, kind: JobKind) -> Result<Done, DaemonError> {
    match kind {
        JobKind::Drain(mode) => Ok(Done::Drain(pipeline::drain_at(home, None, mode)?)),
        JobKind::Scan(name) => Ok(Done::Scan(pipeline::scan_at(home, &name)?)),
        JobKind::Tick => Ok(Done::Tick(pipeline::tick_at(home)?)),
    }
}

async fn record_activity(activity: &SharedActivity, done: &Done) {
    let mut activity = activity.write().await;
    let run = match done {
        Done::Drain(run) => Some(run),
        Done::Scan(_) => {
            activity.scans += 1;
            None
        }
        Done::Tick(report) => {
            activity.continuations_fired += report.fired.len() as u64;
            report.run.as_ref()
        }
    };
    if let Some(run) = run {
        if !matches!(run.outcome, RunOutcome::Skipped(_) | RunOutcome::Busy) {
            activity.runs += 1;
            activity.last_run_at_unix = unix_seconds_now();
            activity.last_run = Some(run.clone());
        }
    }
}

fn job_response(result: Result<Value, DaemonError>) -> DaemonResponse {
    match result {
        Ok(value) => DaemonResponse::ok(value),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

async fn enqueue_job(
    job_tx: &mpsc::Sender<Job>,
    kind: JobKind,
    source: &'static str,
) -> Result<Value, DaemonError> {
    let (tx, rx) = oneshot::channel();
    job_tx
        .send(Job {
            kind,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("job queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("job response"))?;
    outcome.map_err(DaemonError::Protocol)
}

async fn queue_row_count(home: PathBuf, queue: TableRef) -> Result<usize, DaemonError> {
    tokio::task::spawn_blocking(move || -> Result<usize, DaemonError> {
        let store = FileTableStore::open_at(&home)?;
        Ok(store.row_count(&queue)?)
    })
    .await
    .map_err(|err| DaemonError::Protocol(format!("queue read join error: {err}")))?
}

async fn build_status_payload(
    home: &Path,
    activity: &SharedActivity,
    started_at_unix: u64,
) -> Value {
    let snapshot = activity.read().await.clone();

    let home_for_status = home.to_path_buf();
    let report = tokio::task::spawn_blocking(move || pipeline::status_at(&home_for_status)).await;
    let (workspace, open_tasks, workspace_error) = match report {
        Ok(Ok(report)) => (json!(report), report.open_tasks(), None),
        Ok(Err(err)) => (Value::Null, 0, Some(err.to_string())),
        Err(err) => (Value::Null, 0, Some(format!("status join error: {err}"))),
    };

    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at_unix": started_at_unix,
        "last_run_at_unix": snapshot.last_run_at_unix,
        "activity": snapshot,
        "open_tasks": open_tasks,
        "workspace": workspace,
        "workspace_error": workspace_error,
        "socket": socket_path(home).display().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let run = run_dir(home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use dubsync_core::TaskAction;
    use tempfile::TempDir;
    use tokio::time::advance;

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_coalesces_rapid_events() {
        let threshold = Duration::from_millis(100);
        let mut debounce = HashMap::<PathBuf, Instant>::new();
        let path = PathBuf::from("/tmp/ops/Queue.json");
        let mut triggers = 0usize;

        for _ in 0..5 {
            if should_process_event_with_threshold(&mut debounce, &path, Instant::now(), threshold)
            {
                triggers += 1;
            }
            advance(Duration::from_millis(10)).await;
        }
        assert_eq!(triggers, 1, "rapid writes should collapse to one trigger");

        advance(Duration::from_millis(150)).await;
        assert!(should_process_event_with_threshold(
            &mut debounce,
            &path,
            Instant::now(),
            threshold
        ));
    }

    #[tokio::test]
    async fn processor_runs_jobs_and_records_activity() {
        let home = TempDir::new().expect("home");
        pipeline::init_at(home.path()).expect("init");
        let activity: SharedActivity = Arc::new(RwLock::new(Activity::default()));
        let (job_tx, job_rx) = mpsc::channel::<Job>(4);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let processor = tokio::spawn(processor_task(
            home.path().to_path_buf(),
            activity.clone(),
            job_rx,
            shutdown_tx.subscribe(),
        ));

        let value = enqueue_job(&job_tx, JobKind::Drain(RunMode::Immediate), "test")
            .await
            .expect("drain");
        assert_eq!(value["outcome"], json!("completed"));

        let err = enqueue_job(&job_tx, JobKind::Scan("nope".into()), "test")
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(_)));

        drop(job_tx);
        processor.await.expect("join").expect("processor");

        let activity = activity.read().await;
        assert_eq!(activity.runs, 1);
        assert_eq!(activity.scans, 0);
        assert!(activity.last_run.is_some());
    }

    #[test]
    fn failing_queue_run_does_not_starve_continuations() {
        let home = TempDir::new().expect("home");
        pipeline::init_at(home.path()).expect("init");
        pipeline::enqueue_at(
            home.path(),
            "Nope",
            "N1",
            "prod",
            "ana",
            dubsync_core::TaskAction::Edit,
        )
        .expect("enqueue");
        let ws = dubsync_sync::Workspace::open_at(home.path()).expect("workspace");
        ws.continuations
            .schedule_once("scan:health", Duration::ZERO)
            .expect("schedule");

        let mut fired = 0;
        for tick in 0..3 {
            match execute(home.path(), JobKind::Tick).expect("tick") {
                Done::Tick(report) => {
                    if tick == 0 {
                        assert!(report.run_error.is_some());
                    }
                    fired += report.fired.len();
                }
                _ => panic!("expected a tick report"),
            }
        }
        assert_eq!(fired, 1);
        assert!(ws.continuations.pending().expect("pending").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn tick_sends_scheduled_jobs_until_shutdown() {
        let (job_tx, mut job_rx) = mpsc::channel::<Job>(4);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let ticker = tokio::spawn(tick_task(
            job_tx,
            Duration::from_secs(15),
            shutdown_tx.subscribe(),
        ));

        for _ in 0..2 {
            let job = job_rx.recv().await.expect("tick job");
            assert!(matches!(job.kind, JobKind::Tick));
            assert_eq!(job.source, "tick");
            let _ = job.respond_to.send(Ok(Value::Null));
        }

        drop(job_rx);
        let _ = shutdown_tx.send(());
        ticker.await.expect("join").expect("tick task");
    }

    #[tokio::test]
    async fn socket_protocol_status_and_stop_over_in_memory_channels() {
        let (request_tx, mut request_rx) = mpsc::channel::<Vec<u8>>(8);
        let (response_tx, mut response_rx) = mpsc::channel::<Vec<u8>>(8);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        tokio::spawn(async move {
            while let Some(bytes) = request_rx.recv().await {
                let line = String::from_utf8(bytes).expect("utf8");
                let request: DaemonRequest = serde_json::from_str(line.trim()).expect("request");
                let response = match request.cmd.as_str() {
                    "status" => DaemonResponse::ok(json!({"running": true})),
                    "scan" if request.scan.is_none() => {
                        DaemonResponse::error("scan requires a job name")
                    }
                    "stop" => {
                        let _ = shutdown_tx.send(());
                        DaemonResponse::ok(json!({"stopping": true}))
                    }
                    other => DaemonResponse::error(format!("unknown command '{other}'")),
                };
                let encoded = serde_json::to_vec(&response).expect("encode response");
                if response_tx.send(encoded).await.is_err() {
                    break;
                }
            }
        });

        request_tx
            .send(br#"{"cmd":"status"}"#.to_vec())
            .await
            .expect("send status request");
        let status: Value =
            serde_json::from_slice(&response_rx.recv().await.expect("status")).expect("decode");
        assert_eq!(status["ok"], Value::Bool(true));

        request_tx
            .send(br#"{"cmd":"scan"}"#.to_vec())
            .await
            .expect("send scan request");
        let scan: Value =
            serde_json::from_slice(&response_rx.recv().await.expect("scan")).expect("decode");
        assert_eq!(scan["ok"], Value::Bool(false));

        request_tx
            .send(br#"{"cmd":"stop"}"#.to_vec())
            .await
            .expect("send stop request");
        let stop: Value =
            serde_json::from_slice(&response_rx.recv().await.expect("stop")).expect("decode");
        assert_eq!(stop["ok"], Value::Bool(true));

        shutdown_rx.recv().await.expect("shutdown signal");
    }

    #[tokio::test]
    async fn status_payload_before_init_reports_workspace_error() {
        let home = TempDir::new().expect("home");
        let activity: SharedActivity = Arc::new(RwLock::new(Activity::default()));

        let payload = build_status_payload(home.path(), &activity, 1_000_000).await;

        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["started_at_unix"], json!(1_000_000u64));
        assert_eq!(payload["last_run_at_unix"], json!(0u64));
        assert!(payload["workspace"].is_null());
        assert!(payload["workspace_error"].is_string());
    }

    #[tokio::test]
    async fn status_payload_counts_open_tasks() {
        let home = TempDir::new().expect("home");
        pipeline::init_at(home.path()).expect("init");
        pipeline::enqueue_at(home.path(), "DWO", "D1", "prod", "ana", TaskAction::Edit)
            .expect("enqueue");
        let activity: SharedActivity = Arc::new(RwLock::new(Activity {
            runs: 3,
            last_run_at_unix: 1_000_200,
            ..Activity::default()
        }));

        let payload = build_status_payload(home.path(), &activity, 1_000_000).await;

        assert_eq!(payload["open_tasks"], json!(1));
        assert_eq!(payload["last_run_at_unix"], json!(1_000_200u64));
        assert_eq!(payload["activity"]["runs"], json!(3));
        assert!(payload["workspace_error"].is_null());
        assert_eq!(payload["workspace"]["queue"]["Pending"], json!(1));
    }
}
