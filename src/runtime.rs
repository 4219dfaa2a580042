use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use agent_provider::{CancelSignal, RunEvent, RunProvider, RunRequest};

use crate::app::{ChatApp, HostOps, RunId, RunStart};

struct ActiveRun {
    session_id: String,
    cancel: CancelSignal,
    join_handle: Option<JoinHandle<()>>,
}

/// Runs provider requests on worker threads and feeds their events back into
/// `ChatApp`.
///
/// Workers only enqueue events. The owner applies them by calling
/// [`RuntimeController::flush_pending_run_events`] or
/// [`RuntimeController::wait_and_flush`] while not holding the app lock.
/// Lock order is app, then the active-run table.
pub struct RuntimeController {
    app: Arc<Mutex<ChatApp>>,
    pending_events: Mutex<VecDeque<RunEvent>>,
    events_ready: Condvar,
    next_run_id: AtomicU64,
    active_runs: Mutex<HashMap<RunId, ActiveRun>>,
    provider: Arc<dyn RunProvider>,
    render_requested: AtomicBool,
}

impl RuntimeController {
    pub fn new(app: Arc<Mutex<ChatApp>>, provider: Arc<dyn RunProvider>) -> Arc<Self> {
        Arc::new(Self {
            app,
            pending_events: Mutex::new(VecDeque::new()),
            events_ready: Condvar::new(),
            next_run_id: AtomicU64::new(1),
            active_runs: Mutex::new(HashMap::new()),
            provider,
            render_requested: AtomicBool::new(false),
        })
    }

    pub fn app(&self) -> &Arc<Mutex<ChatApp>> {
        &self.app
    }

    fn start_run_internal(self: &Arc<Self>, start: RunStart) -> Result<RunId, String> {
        // Held until the run is registered so its first events cannot be
        // drained before the table knows about it.
        let mut active_runs = self.lock_active_runs();
        if active_runs
            .values()
            .any(|active| active.session_id == start.session_id)
        {
            return Err(format!(
                "Run already active for session {}",
                start.session_id
            ));
        }

        let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancelSignal::default();
        let session_id = start.session_id.clone();
        let request = RunRequest {
            run_id,
            agent_id: start.agent_id,
            session_id: Some(start.session_id),
            model_id: start.model_id,
            instructions: start.instructions,
            messages: start.messages,
            knowledge: start.knowledge,
        };
        let join_handle = self.spawn_worker(request, Arc::clone(&cancel))?;

        active_runs.insert(
            run_id,
            ActiveRun {
                session_id,
                cancel,
                join_handle: Some(join_handle),
            },
        );
        tracing::debug!(run_id, "run started");

        Ok(run_id)
    }

    fn spawn_worker(
        self: &Arc<Self>,
        request: RunRequest,
        cancel: CancelSignal,
    ) -> Result<JoinHandle<()>, String> {
        let run_id = request.run_id;
        let controller = Arc::clone(self);
        thread::Builder::new()
            .name(format!("agno-chat-run-{run_id}"))
            .spawn(move || controller.run_worker(request, cancel))
            .map_err(|error| format!("Failed to spawn run worker: {error}"))
    }

    fn run_worker(self: Arc<Self>, request: RunRequest, cancel: CancelSignal) {
        let run_id = request.run_id;
        let terminal_emitted = Arc::new(AtomicBool::new(false));
        let terminal_emitted_for_emit = Arc::clone(&terminal_emitted);
        let controller = Arc::clone(&self);
        let cancel_for_emit = Arc::clone(&cancel);

        let mut emit = move |event: RunEvent| {
            if event.is_terminal() {
                terminal_emitted_for_emit.store(true, Ordering::SeqCst);
            }
            if cancel_for_emit.load(Ordering::SeqCst) {
                return;
            }

            controller.enqueue_run_event(event);
        };
        let provider = Arc::clone(&self.provider);
        let run_outcome = catch_unwind(AssertUnwindSafe(|| {
            provider.run(request, Arc::clone(&cancel), &mut emit)
        }));

        match run_outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => emit(RunEvent::Failed { run_id, error }),
            Err(_) => emit(RunEvent::Failed {
                run_id,
                error: "Provider panicked".to_string(),
            }),
        }

        if !terminal_emitted.load(Ordering::SeqCst) && self.is_active_run_id(run_id) {
            emit(RunEvent::Failed {
                run_id,
                error: "Provider exited without terminal event".to_string(),
            });
        }
    }

    fn enqueue_run_event(&self, event: RunEvent) {
        lock_unpoisoned(&self.pending_events).push_back(event);
        self.events_ready.notify_all();
    }

    /// Applies every queued run event in arrival order. Returns the number
    /// of events taken off the queue.
    pub fn flush_pending_run_events(&self) -> usize {
        let mut drained = 0usize;

        loop {
            let event = lock_unpoisoned(&self.pending_events).pop_front();
            match event {
                Some(event) => {
                    self.apply_run_event(event);
                    drained += 1;
                }
                None => break,
            }
        }

        drained
    }

    /// Blocks up to `timeout` for at least one event, then flushes.
    pub fn wait_and_flush(&self, timeout: Duration) -> usize {
        {
            let queue = lock_unpoisoned(&self.pending_events);
            let _ready = match self
                .events_ready
                .wait_timeout_while(queue, timeout, |queue| queue.is_empty())
            {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        self.flush_pending_run_events()
    }

    /// Flushes until no run is active or `timeout` elapses. Returns true when
    /// every run finished.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.flush_pending_run_events();
            if !self.has_active_runs() {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.wait_and_flush((deadline - now).min(Duration::from_millis(25)));
        }
    }

    fn apply_run_event(&self, event: RunEvent) {
        let run_id = event.run_id();
        let terminal = event.is_terminal();

        {
            let mut app = lock_unpoisoned(&self.app);
            if !self.is_active_run_id(run_id) {
                tracing::debug!(run_id, "dropping event of inactive run");
                return;
            }

            match event {
                RunEvent::Started { run_id } => app.on_run_started(run_id),
                RunEvent::Content { run_id, text } => app.on_run_content(run_id, &text),
                RunEvent::Trace { run_id, trace } => app.on_run_trace(run_id, trace),
                RunEvent::Completed {
                    run_id,
                    text,
                    metrics,
                } => app.on_run_completed(run_id, text, metrics),
                RunEvent::Failed { run_id, error } => app.on_run_failed(run_id, &error),
                RunEvent::Cancelled { run_id } => app.on_run_cancelled(run_id),
            }
        }

        self.render_requested.store(true, Ordering::SeqCst);
        if terminal {
            self.clear_active_run_if_matching(run_id);
        }
    }

    fn clear_active_run_if_matching(&self, run_id: RunId) {
        let completed = self.lock_active_runs().remove(&run_id);
        let Some(mut completed) = completed else {
            return;
        };

        if let Some(join_handle) = completed.join_handle.take() {
            let is_current_thread = join_handle.thread().id() == thread::current().id();
            if !is_current_thread && join_handle.is_finished() {
                let _ = join_handle.join();
            }
        }
    }

    fn is_active_run_id(&self, run_id: RunId) -> bool {
        self.lock_active_runs().contains_key(&run_id)
    }

    pub fn has_active_runs(&self) -> bool {
        !self.lock_active_runs().is_empty()
    }

    pub fn active_run_count(&self) -> usize {
        self.lock_active_runs().len()
    }

    /// Flags the run cancelled and forgets it; the worker winds down on its
    /// own and nothing it emits afterwards is delivered.
    fn cancel_run_internal(&self, run_id: RunId) {
        if let Some(active) = self.lock_active_runs().remove(&run_id) {
            active.cancel.store(true, Ordering::SeqCst);
            tracing::debug!(run_id, session_id = %active.session_id, "run cancelled");
        }
    }

    /// Cancels every active run.
    pub fn cancel_all(&self) {
        let mut active_runs = self.lock_active_runs();
        for (_, active) in active_runs.drain() {
            active.cancel.store(true, Ordering::SeqCst);
        }
    }

    /// Returns and clears the pending render request.
    pub fn take_render_request(&self) -> bool {
        self.render_requested.swap(false, Ordering::SeqCst)
    }

    fn lock_active_runs(&self) -> MutexGuard<'_, HashMap<RunId, ActiveRun>> {
        lock_unpoisoned(&self.active_runs)
    }
}

impl HostOps for Arc<RuntimeController> {
    fn start_run(&mut self, start: RunStart) -> Result<RunId, String> {
        self.start_run_internal(start)
    }

    fn cancel_run(&mut self, run_id: RunId) {
        self.cancel_run_internal(run_id);
    }

    fn request_render(&mut self) {
        self.render_requested.store(true, Ordering::SeqCst);
    }
}

/// Locks `mutex`, recovering the guard when a panicking holder poisoned it.
pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
