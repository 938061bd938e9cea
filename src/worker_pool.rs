// THEORY:
// The `WorkerPool` runs optimization requests on a bounded set of workers, with a
// hard outer time ceiling per request and a typed event stream per request.
//
// Key architectural principles:
// 1.  **One owner of all state**: a single control task owns the worker table, the
//     pending-request table and the FIFO queue. Workers, timers, health probes and
//     the public handle never touch that state; they only send `ControlMessage`s.
//     No locks, and every state transition happens in one place.
// 2.  **Workers stay responsive**: a worker runs the CPU-bound search on the
//     blocking pool and keeps listening on its command channel while it waits, so
//     it can still answer a liveness probe in the middle of a long search.
// 3.  **Attempt tags**: every job, timer and worker event carries the request id
//     and its attempt number. After a retry or a recycle, anything still in flight
//     from the earlier attempt no longer matches and is dropped on arrival.
// 4.  **Exactly one terminal event**: a request leaves the pending table the moment
//     it resolves; its terminal event is sent then, and dropping the entry closes
//     the event channel.

use crate::config::PoolConfig;
use crate::core_modules::cancellation::CancellationToken;
use crate::core_modules::optimizer::{OptimizationRequest, OptimizationResult, SearchExecutor, SearchProgress};
use crate::error::{SchedulerError, SearchError};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type JobResult = Result<OptimizationResult, SchedulerError>;

/// Lifecycle events of a single request, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// No worker was free; `position` is 1-based.
    Queued { position: usize },
    Started { worker_id: u64 },
    Progress(SearchProgress),
    /// The previous attempt hit a worker fault; the request was resubmitted.
    Retrying { attempt: u32 },
    Completed { delta_e: f64, early_termination: bool },
    /// Cancelled by the caller. Running requests report their best-so-far ΔE.
    Stopped { best_delta_e: Option<f64> },
    Errored { message: String },
    TimedOut { ceiling_ms: u64 },
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Completed { .. } | JobEvent::Stopped { .. } | JobEvent::Errored { .. } | JobEvent::TimedOut { .. }
        )
    }
}

/// The caller's side of a submitted request. Dropping it before the request
/// resolves cancels the request.
pub struct JobHandle {
    pub request_id: u64,
    events: Option<mpsc::UnboundedReceiver<JobEvent>>,
    result: oneshot::Receiver<JobResult>,
    control: mpsc::UnboundedSender<ControlMessage>,
    resolved: bool,
}

impl JobHandle {
    /// Takes the event stream. Returns `None` once it has been taken.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<JobEvent>> {
        self.events.take()
    }

    /// Waits for the request to resolve.
    pub async fn wait(mut self) -> JobResult {
        let outcome = (&mut self.result).await;
        self.resolved = true;
        outcome.map_err(|_| SchedulerError::Disconnected)?
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        log::debug!("handle for request {} dropped before it resolved; cancelling", self.request_id);
        let (reply, _) = oneshot::channel();
        let _ = self.control.send(ControlMessage::Cancel {
            request_id: self.request_id,
            reply,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthReport {
    pub total: usize,
    pub responsive: usize,
    pub fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub busy_workers: usize,
    pub queued: usize,
    pub pending: usize,
}

/// Bounded pool of optimization workers driven by a single control task.
pub struct WorkerPool {
    control: mpsc::UnboundedSender<ControlMessage>,
    next_request_id: AtomicU64,
}

impl WorkerPool {
    /// Starts the control task and the initial workers. Must be called from within
    /// a tokio runtime.
    pub fn new(config: PoolConfig, executor: Arc<dyn SearchExecutor>) -> Self {
        let (control, inbox) = mpsc::unbounded_channel();
        log::info!(
            "worker pool starting: {} initial worker(s), up to {}",
            config.initial_workers,
            config.max_workers
        );

        let scheduler = Scheduler::new(config, executor, control.clone());
        tokio::spawn(scheduler.run(inbox));

        Self {
            control,
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Accepts a request. Structural problems are rejected here, before any worker
    /// or timer is involved.
    pub fn submit(&self, request: OptimizationRequest) -> Result<JobHandle, SchedulerError> {
        request.check_structure()?;

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();

        self.control
            .send(ControlMessage::Submit {
                request_id,
                request: Arc::new(request),
                reply: reply_tx,
                events: events_tx,
            })
            .map_err(|_| SchedulerError::ShuttingDown)?;

        Ok(JobHandle {
            request_id,
            events: Some(events_rx),
            result: reply_rx,
            control: self.control.clone(),
            resolved: false,
        })
    }

    /// Cancels a queued or running request. Returns false if it is unknown or
    /// already resolved.
    pub async fn cancel(&self, request_id: u64) -> bool {
        let (reply, answer) = oneshot::channel();
        if self.control.send(ControlMessage::Cancel { request_id, reply }).is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }

    /// Probes every worker; unresponsive workers are recycled.
    pub async fn health_check(&self) -> Result<HealthReport, SchedulerError> {
        let (reply, answer) = oneshot::channel();
        self.control
            .send(ControlMessage::HealthCheck { reply })
            .map_err(|_| SchedulerError::ShuttingDown)?;
        answer.await.map_err(|_| SchedulerError::Disconnected)
    }

    pub async fn stats(&self) -> Result<PoolStats, SchedulerError> {
        let (reply, answer) = oneshot::channel();
        self.control
            .send(ControlMessage::Stats { reply })
            .map_err(|_| SchedulerError::ShuttingDown)?;
        answer.await.map_err(|_| SchedulerError::Disconnected)
    }

    /// Rejects everything pending with `ShuttingDown` and stops the workers.
    pub async fn shutdown(&self) {
        let (reply, answer) = oneshot::channel();
        if self.control.send(ControlMessage::Shutdown { reply: Some(reply) }).is_ok() {
            let _ = answer.await;
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let _ = self.control.send(ControlMessage::Shutdown { reply: None });
    }
}

enum ControlMessage {
    Submit {
        request_id: u64,
        request: Arc<OptimizationRequest>,
        reply: oneshot::Sender<JobResult>,
        events: mpsc::UnboundedSender<JobEvent>,
    },
    Cancel {
        request_id: u64,
        reply: oneshot::Sender<bool>,
    },
    HealthCheck {
        reply: oneshot::Sender<HealthReport>,
    },
    ProbeFinished {
        results: Vec<(u64, bool)>,
        reply: oneshot::Sender<HealthReport>,
    },
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
    TimerFired {
        request_id: u64,
        attempt: u32,
    },
    Worker(WorkerEvent),
    Shutdown {
        reply: Option<oneshot::Sender<()>>,
    },
}

/// Identifies which worker ran which attempt of which request.
#[derive(Debug, Clone, Copy)]
struct Tag {
    worker_id: u64,
    request_id: u64,
    attempt: u32,
}

enum WorkerEvent {
    Started(Tag),
    Progress(Tag, SearchProgress),
    Completed(Tag, OptimizationResult),
    Failed(Tag, SearchError),
    /// The execution context panicked.
    Fault(Tag, String),
}

struct Job {
    request_id: u64,
    attempt: u32,
    request: Arc<OptimizationRequest>,
    cancel: CancellationToken,
}

enum WorkerCommand {
    Run(Job),
    Ping(oneshot::Sender<()>),
    Shutdown,
}

struct WorkerSlot {
    id: u64,
    busy: bool,
    current_request: Option<u64>,
    last_used_at: Instant,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    task: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Queued,
    Running { worker_id: u64 },
}

struct PendingRequest {
    request: Arc<OptimizationRequest>,
    reply: oneshot::Sender<JobResult>,
    events: mpsc::UnboundedSender<JobEvent>,
    timeout: Option<JoinHandle<()>>,
    retry_count: u32,
    state: RequestState,
    cancel: CancellationToken,
    stop_requested: bool,
}

impl PendingRequest {
    fn emit(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }

    fn ceiling(&self, grace: Duration) -> Duration {
        Duration::from_millis(self.request.time_limit_ms) + grace
    }
}

struct Scheduler {
    config: PoolConfig,
    executor: Arc<dyn SearchExecutor>,
    control: mpsc::UnboundedSender<ControlMessage>,
    workers: BTreeMap<u64, WorkerSlot>,
    pending: HashMap<u64, PendingRequest>,
    queue: VecDeque<u64>,
    next_worker_id: u64,
}

impl Scheduler {
    fn new(config: PoolConfig, executor: Arc<dyn SearchExecutor>, control: mpsc::UnboundedSender<ControlMessage>) -> Self {
        let mut scheduler = Scheduler {
            config,
            executor,
            control,
            workers: BTreeMap::new(),
            pending: HashMap::new(),
            queue: VecDeque::new(),
            next_worker_id: 1,
        };
        for _ in 0..scheduler.config.initial_workers.min(scheduler.config.max_workers) {
            scheduler.spawn_worker();
        }
        scheduler
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<ControlMessage>) {
        while let Some(message) = inbox.recv().await {
            match message {
                ControlMessage::Submit { request_id, request, reply, events } => {
                    self.accept(request_id, request, reply, events)
                }
                ControlMessage::Cancel { request_id, reply } => {
                    let _ = reply.send(self.cancel(request_id));
                }
                ControlMessage::HealthCheck { reply } => self.start_probe(reply),
                ControlMessage::ProbeFinished { results, reply } => self.finish_probe(results, reply),
                ControlMessage::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                ControlMessage::TimerFired { request_id, attempt } => self.on_timeout(request_id, attempt),
                ControlMessage::Worker(event) => self.on_worker_event(event),
                ControlMessage::Shutdown { reply } => {
                    inbox.close();
                    self.shut_down();
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                    break;
                }
            }
        }
        log::info!("worker pool stopped");
    }

    fn accept(
        &mut self,
        request_id: u64,
        request: Arc<OptimizationRequest>,
        reply: oneshot::Sender<JobResult>,
        events: mpsc::UnboundedSender<JobEvent>,
    ) {
        log::debug!("request {request_id} accepted");
        self.pending.insert(
            request_id,
            PendingRequest {
                request,
                reply,
                events,
                timeout: None,
                retry_count: 0,
                state: RequestState::Queued,
                cancel: CancellationToken::new(),
                stop_requested: false,
            },
        );
        self.queue.push_back(request_id);
        self.dispatch();

        if let Some(position) = self.queue.iter().position(|&id| id == request_id) {
            if let Some(pending) = self.pending.get(&request_id) {
                pending.emit(JobEvent::Queued { position: position + 1 });
            }
        }
    }

    /// Hands queued requests to idle workers, growing the pool while allowed.
    fn dispatch(&mut self) {
        while let Some(&request_id) = self.queue.front() {
            let Some(worker_id) = self.idle_worker().or_else(|| self.grow()) else {
                break;
            };
            self.queue.pop_front();
            self.assign(request_id, worker_id);
        }
    }

    fn idle_worker(&self) -> Option<u64> {
        self.workers.values().find(|slot| !slot.busy).map(|slot| slot.id)
    }

    fn grow(&mut self) -> Option<u64> {
        (self.workers.len() < self.config.max_workers).then(|| self.spawn_worker())
    }

    fn assign(&mut self, request_id: u64, worker_id: u64) {
        let Some(pending) = self.pending.get_mut(&request_id) else {
            return;
        };
        let Some(slot) = self.workers.get_mut(&worker_id) else {
            self.queue.push_front(request_id);
            return;
        };

        pending.cancel = CancellationToken::new();
        let job = Job {
            request_id,
            attempt: pending.retry_count,
            request: Arc::clone(&pending.request),
            cancel: pending.cancel.clone(),
        };
        if slot.commands.send(WorkerCommand::Run(job)).is_err() {
            log::warn!("worker {worker_id} is gone; retiring it");
            self.queue.push_front(request_id);
            self.retire_worker(worker_id);
            return;
        }

        slot.busy = true;
        slot.current_request = Some(request_id);
        slot.last_used_at = Instant::now();
        pending.state = RequestState::Running { worker_id };

        let ceiling = pending.ceiling(self.config.timeout_grace);
        let attempt = pending.retry_count;
        let control = self.control.clone();
        pending.timeout = Some(tokio::spawn(async move {
            tokio::time::sleep(ceiling).await;
            let _ = control.send(ControlMessage::TimerFired { request_id, attempt });
        }));
        log::debug!("request {request_id} (attempt {attempt}) assigned to worker {worker_id}");
    }

    fn cancel(&mut self, request_id: u64) -> bool {
        let Some(pending) = self.pending.get_mut(&request_id) else {
            return false;
        };
        let state = pending.state;
        match state {
            RequestState::Queued => {
                self.queue.retain(|&id| id != request_id);
                log::debug!("request {request_id} cancelled while queued");
                self.resolve(request_id, Err(SchedulerError::Cancelled), JobEvent::Stopped { best_delta_e: None });
            }
            RequestState::Running { worker_id } => {
                log::debug!("request {request_id} cancelled on worker {worker_id}");
                pending.stop_requested = true;
                pending.cancel.cancel();
            }
        }
        true
    }

    fn on_worker_event(&mut self, event: WorkerEvent) {
        let tag = match &event {
            WorkerEvent::Started(tag)
            | WorkerEvent::Progress(tag, _)
            | WorkerEvent::Completed(tag, _)
            | WorkerEvent::Failed(tag, _)
            | WorkerEvent::Fault(tag, _) => *tag,
        };
        if !self.is_current(tag) {
            log::debug!(
                "dropping stale event from worker {} for request {} (attempt {})",
                tag.worker_id,
                tag.request_id,
                tag.attempt
            );
            return;
        }

        match event {
            WorkerEvent::Started(tag) => {
                self.emit(tag.request_id, JobEvent::Started { worker_id: tag.worker_id });
            }
            WorkerEvent::Progress(tag, progress) => self.emit(tag.request_id, JobEvent::Progress(progress)),
            WorkerEvent::Completed(tag, result) => {
                self.release_worker(tag.worker_id);
                let stopped = self.pending.get(&tag.request_id).is_some_and(|p| p.stop_requested);
                let terminal = if stopped {
                    JobEvent::Stopped { best_delta_e: Some(result.delta_e) }
                } else {
                    JobEvent::Completed {
                        delta_e: result.delta_e,
                        early_termination: result.metrics.early_termination,
                    }
                };
                self.resolve(tag.request_id, Ok(result), terminal);
            }
            WorkerEvent::Failed(tag, error) => {
                self.release_worker(tag.worker_id);
                let message = error.to_string();
                self.resolve(tag.request_id, Err(error.into()), JobEvent::Errored { message });
            }
            WorkerEvent::Fault(tag, message) => {
                log::warn!("worker {} faulted on request {}: {message}", tag.worker_id, tag.request_id);
                self.recycle_worker(tag.worker_id);
                self.retry_or_fail(tag.request_id, message);
            }
        }
        self.dispatch();
    }

    fn is_current(&self, tag: Tag) -> bool {
        let running_here = self.pending.get(&tag.request_id).is_some_and(|pending| {
            pending.retry_count == tag.attempt && pending.state == RequestState::Running { worker_id: tag.worker_id }
        });
        running_here
            && self
                .workers
                .get(&tag.worker_id)
                .is_some_and(|slot| slot.current_request == Some(tag.request_id))
    }

    /// Resubmits the identical request at the front of the queue, or fails it once
    /// the retry budget is spent.
    fn retry_or_fail(&mut self, request_id: u64, message: String) {
        let Some(pending) = self.pending.get_mut(&request_id) else {
            return;
        };
        if let Some(timer) = pending.timeout.take() {
            timer.abort();
        }
        // The recycled worker's search may still be running on the blocking pool.
        pending.cancel.cancel();
        if pending.retry_count < self.config.max_retries && !pending.stop_requested {
            pending.retry_count += 1;
            pending.state = RequestState::Queued;
            pending.emit(JobEvent::Retrying { attempt: pending.retry_count });
            log::info!("retrying request {request_id} (attempt {})", pending.retry_count);
            self.queue.push_front(request_id);
        } else {
            let attempts = pending.retry_count + 1;
            self.resolve(
                request_id,
                Err(SchedulerError::WorkerFault { attempts, message: message.clone() }),
                JobEvent::Errored { message },
            );
        }
    }

    fn on_timeout(&mut self, request_id: u64, attempt: u32) {
        let Some(pending) = self.pending.get(&request_id) else {
            return;
        };
        let RequestState::Running { worker_id } = pending.state else {
            return;
        };
        if pending.retry_count != attempt {
            return;
        }

        let ceiling_ms = pending.ceiling(self.config.timeout_grace).as_millis() as u64;
        log::warn!("request {request_id} exceeded its {ceiling_ms} ms ceiling on worker {worker_id}");
        pending.cancel.cancel();
        self.recycle_worker(worker_id);
        self.resolve(
            request_id,
            Err(SchedulerError::Timeout { request_id, ceiling_ms }),
            JobEvent::TimedOut { ceiling_ms },
        );
        self.dispatch();
    }

    fn start_probe(&mut self, reply: oneshot::Sender<HealthReport>) {
        let probes: Vec<(u64, mpsc::UnboundedSender<WorkerCommand>)> = self
            .workers
            .values()
            .map(|slot| (slot.id, slot.commands.clone()))
            .collect();
        let probe_timeout = self.config.health_probe_timeout;
        let control = self.control.clone();

        tokio::spawn(async move {
            let results = futures::future::join_all(probes.into_iter().map(|(worker_id, commands)| async move {
                let (pong, answer) = oneshot::channel();
                let responsive = commands.send(WorkerCommand::Ping(pong)).is_ok()
                    && matches!(tokio::time::timeout(probe_timeout, answer).await, Ok(Ok(())));
                (worker_id, responsive)
            }))
            .await;
            let _ = control.send(ControlMessage::ProbeFinished { results, reply });
        });
    }

    fn finish_probe(&mut self, results: Vec<(u64, bool)>, reply: oneshot::Sender<HealthReport>) {
        let total = results.len();
        let responsive = results.iter().filter(|(_, ok)| *ok).count();

        for (worker_id, _) in results.into_iter().filter(|(_, ok)| !*ok) {
            let Some(request_id) = self.workers.get(&worker_id).map(|slot| slot.current_request) else {
                continue;
            };
            log::warn!("worker {worker_id} missed its health probe");
            self.recycle_worker(worker_id);
            if let Some(request_id) = request_id {
                self.retry_or_fail(request_id, format!("worker {worker_id} stopped responding"));
            }
        }
        self.dispatch();

        let fraction = if total == 0 { 1.0 } else { responsive as f64 / total as f64 };
        let _ = reply.send(HealthReport { total, responsive, fraction });
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers.len(),
            busy_workers: self.workers.values().filter(|slot| slot.busy).count(),
            queued: self.queue.len(),
            pending: self.pending.len(),
        }
    }

    fn emit(&self, request_id: u64, event: JobEvent) {
        if let Some(pending) = self.pending.get(&request_id) {
            pending.emit(event);
        }
    }

    /// Removes the request, sends its terminal event and its reply.
    fn resolve(&mut self, request_id: u64, outcome: JobResult, terminal: JobEvent) {
        let Some(pending) = self.pending.remove(&request_id) else {
            return;
        };
        if let Some(timer) = pending.timeout {
            timer.abort();
        }
        let _ = pending.events.send(terminal);
        let _ = pending.reply.send(outcome);
    }

    fn spawn_worker(&mut self) -> u64 {
        let id = self.next_worker_id;
        self.next_worker_id += 1;
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_worker(id, Arc::clone(&self.executor), receiver, self.control.clone()));
        self.workers.insert(
            id,
            WorkerSlot {
                id,
                busy: false,
                current_request: None,
                last_used_at: Instant::now(),
                commands,
                task,
            },
        );
        log::debug!("worker {id} started");
        id
    }

    fn release_worker(&mut self, worker_id: u64) {
        if let Some(slot) = self.workers.get_mut(&worker_id) {
            slot.busy = false;
            slot.current_request = None;
            slot.last_used_at = Instant::now();
        }
    }

    fn retire_worker(&mut self, worker_id: u64) -> Option<WorkerSlot> {
        let slot = self.workers.remove(&worker_id)?;
        let _ = slot.commands.send(WorkerCommand::Shutdown);
        slot.task.abort();
        log::debug!("worker {worker_id} retired ({:?} since last use)", slot.last_used_at.elapsed());
        Some(slot)
    }

    /// Destroys a worker and starts a fresh one in its place.
    fn recycle_worker(&mut self, worker_id: u64) {
        if self.retire_worker(worker_id).is_some() {
            let replacement = self.spawn_worker();
            log::info!("worker {worker_id} recycled; worker {replacement} replaces it");
        }
    }

    fn shut_down(&mut self) {
        log::info!("worker pool shutting down with {} pending request(s)", self.pending.len());
        self.queue.clear();
        let ids: Vec<u64> = self.pending.keys().copied().collect();
        for request_id in ids {
            if let Some(pending) = self.pending.get(&request_id) {
                pending.cancel.cancel();
            }
            self.resolve(
                request_id,
                Err(SchedulerError::ShuttingDown),
                JobEvent::Errored { message: SchedulerError::ShuttingDown.to_string() },
            );
        }
        let ids: Vec<u64> = self.workers.keys().copied().collect();
        for worker_id in ids {
            self.retire_worker(worker_id);
        }
    }
}

/// A worker's main loop: one job at a time, pings answered even mid-job.
async fn run_worker(
    worker_id: u64,
    executor: Arc<dyn SearchExecutor>,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    control: mpsc::UnboundedSender<ControlMessage>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            WorkerCommand::Ping(pong) => {
                let _ = pong.send(());
            }
            WorkerCommand::Shutdown => break,
            WorkerCommand::Run(job) => {
                if !run_job(worker_id, &executor, job, &mut commands, &control).await {
                    break;
                }
            }
        }
    }
    log::debug!("worker {worker_id} exiting");
}

/// Runs one job to completion. Returns false if the worker was told to stop.
async fn run_job(
    worker_id: u64,
    executor: &Arc<dyn SearchExecutor>,
    job: Job,
    commands: &mut mpsc::UnboundedReceiver<WorkerCommand>,
    control: &mpsc::UnboundedSender<ControlMessage>,
) -> bool {
    let tag = Tag {
        worker_id,
        request_id: job.request_id,
        attempt: job.attempt,
    };
    let _ = control.send(ControlMessage::Worker(WorkerEvent::Started(tag)));

    let executor = Arc::clone(executor);
    let progress = control.clone();
    let cancel = job.cancel.clone();
    let mut search = tokio::task::spawn_blocking(move || {
        let mut on_progress = |snapshot: SearchProgress| {
            let _ = progress.send(ControlMessage::Worker(WorkerEvent::Progress(tag, snapshot)));
        };
        executor.execute(&job.request, &mut on_progress, &job.cancel)
    });

    loop {
        tokio::select! {
            joined = &mut search => {
                let event = match joined {
                    Ok(Ok(result)) => WorkerEvent::Completed(tag, result),
                    Ok(Err(error)) => WorkerEvent::Failed(tag, error),
                    Err(join_error) => WorkerEvent::Fault(tag, panic_message(join_error)),
                };
                let _ = control.send(ControlMessage::Worker(event));
                return true;
            }
            command = commands.recv() => match command {
                Some(WorkerCommand::Ping(pong)) => {
                    let _ = pong.send(());
                }
                Some(WorkerCommand::Run(other)) => {
                    log::warn!("worker {worker_id} is busy; dropping job for request {}", other.request_id);
                }
                Some(WorkerCommand::Shutdown) | None => {
                    cancel.cancel();
                    return false;
                }
            }
        }
    }
}

fn panic_message(error: tokio::task::JoinError) -> String {
    if error.is_cancelled() {
        return "optimization task was cancelled".to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "optimization panicked".to_string()
    }
}
