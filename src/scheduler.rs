//! Cooperative event loop.
//!
//! The scheduler owns an ordered queue of [`Task`]s keyed by `(due, seq)` and
//! a channel on which collaborator threads report finished operations. Only
//! [`Completion`] messages cross threads; callbacks and conversion closures
//! stay on the interpreter thread, keyed by operation id.

use std::{
    cmp::{Ordering, Reverse},
    collections::{BinaryHeap, HashMap},
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    time::{Duration, Instant},
};

use tracing::{debug, trace};

use crate::{
    diagnostics::{Diagnostic, RuntimeErrorKind, SourceSpan},
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockMode {
    /// Timers wait on the wall clock.
    #[default]
    Real,
    /// Timers fire immediately, advancing a virtual clock to their due time.
    Virtual,
}

pub enum TaskAction {
    Call { callable: Value, args: Vec<Value> },
    /// A collaborator failed; draining the task reports the error.
    Fail(Diagnostic),
}

pub struct Task {
    pub due: Duration,
    pub seq: u64,
    pub action: TaskAction,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Result data produced off-thread by a collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Unit,
    Text(String),
    Response {
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
    },
}

pub type OperationId = u64;

#[derive(Debug)]
pub struct Completion {
    pub id: OperationId,
    pub outcome: Result<Payload, String>,
}

/// Thread-safe handle a collaborator uses to report its single outcome.
/// Dropping it unused reports the operation as abandoned.
pub struct Completer {
    id: OperationId,
    sender: Option<Sender<Completion>>,
}

impl Completer {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn complete(mut self, outcome: Result<Payload, String>) {
        self.send(outcome);
    }

    fn send(&mut self, outcome: Result<Payload, String>) {
        if let Some(sender) = self.sender.take() {
            // The receiver only disappears with the scheduler itself.
            let _ = sender.send(Completion {
                id: self.id,
                outcome,
            });
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        self.send(Err("operation abandoned before completing".into()));
    }
}

type Convert = Box<dyn FnOnce(Payload) -> Vec<Value>>;

struct PendingOperation {
    label: &'static str,
    span: SourceSpan,
    callback: Option<Value>,
    convert: Convert,
}

pub struct Scheduler {
    queue: BinaryHeap<Reverse<Task>>,
    next_seq: u64,
    next_operation: OperationId,
    pending: HashMap<OperationId, PendingOperation>,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    clock: ClockMode,
    started: Instant,
    virtual_now: Duration,
}

impl Scheduler {
    pub fn new(clock: ClockMode) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            queue: BinaryHeap::new(),
            next_seq: 0,
            next_operation: 0,
            pending: HashMap::new(),
            sender,
            receiver,
            clock,
            started: Instant::now(),
            virtual_now: Duration::ZERO,
        }
    }

    pub fn clock(&self) -> ClockMode {
        self.clock
    }

    /// Time elapsed since the scheduler was created, real or virtual.
    pub fn now(&self) -> Duration {
        match self.clock {
            ClockMode::Real => self.started.elapsed(),
            ClockMode::Virtual => self.virtual_now,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pending_operations(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.pending.is_empty()
    }

    /// Queues `callable(args)` to run once `delay` has elapsed.
    pub fn schedule(&mut self, delay: Duration, callable: Value, args: Vec<Value>) {
        let due = self.now().saturating_add(delay);
        self.push(due, TaskAction::Call { callable, args });
    }

    pub fn schedule_failure(&mut self, diagnostic: Diagnostic) {
        let due = self.now();
        self.push(due, TaskAction::Fail(diagnostic));
    }

    fn push(&mut self, due: Duration, action: TaskAction) {
        let seq = self.next_seq;
        self.next_seq += 1;
        trace!(?due, seq, queued = self.queue.len() + 1, "task scheduled");
        self.queue.push(Reverse(Task { due, seq, action }));
    }

    /// Registers an operation carried out by a collaborator. When it succeeds,
    /// `convert` turns its payload into the callback's arguments; when it
    /// fails, a failure task reports the error under `label`.
    pub fn begin_operation(
        &mut self,
        label: &'static str,
        span: SourceSpan,
        callback: Option<Value>,
        convert: impl FnOnce(Payload) -> Vec<Value> + 'static,
    ) -> Completer {
        let id = self.next_operation;
        self.next_operation += 1;
        self.pending.insert(
            id,
            PendingOperation {
                label,
                span,
                callback,
                convert: Box::new(convert),
            },
        );
        debug!(id, label, "operation started");
        Completer {
            id,
            sender: Some(self.sender.clone()),
        }
    }

    fn accept(&mut self, completion: Completion) {
        let Some(operation) = self.pending.remove(&completion.id) else {
            return;
        };
        debug!(
            id = completion.id,
            label = operation.label,
            ok = completion.outcome.is_ok(),
            "operation finished"
        );
        match completion.outcome {
            Ok(payload) => {
                if let Some(callback) = operation.callback {
                    let args = (operation.convert)(payload);
                    let due = self.now();
                    self.push(due, TaskAction::Call { callable: callback, args });
                }
            }
            Err(message) => {
                let diagnostic = Diagnostic::runtime(
                    RuntimeErrorKind::Native,
                    format!("{} failed: {message}", operation.label),
                )
                .with_span(operation.span);
                self.schedule_failure(diagnostic);
            }
        }
    }

    fn drain_completions(&mut self) {
        while let Ok(completion) = self.receiver.try_recv() {
            self.accept(completion);
        }
    }

    fn wait_for_completion(&mut self, timeout: Option<Duration>) {
        let received = match timeout {
            Some(timeout) => match self.receiver.recv_timeout(timeout) {
                Ok(completion) => Some(completion),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            },
            None => self.receiver.recv().ok(),
        };
        if let Some(completion) = received {
            self.accept(completion);
        }
    }

    /// Returns the next ready task, waiting for timers or collaborators as
    /// needed. `None` means the loop is idle.
    pub fn next_task(&mut self) -> Option<Task> {
        loop {
            self.drain_completions();
            let Some(Reverse(head)) = self.queue.peek() else {
                if self.pending.is_empty() {
                    return None;
                }
                self.wait_for_completion(None);
                continue;
            };
            let due = head.due;
            let now = self.now();
            if due <= now {
                return self.pop();
            }
            match self.clock {
                ClockMode::Virtual => {
                    // Collaborators finish in zero virtual time, before any
                    // timer that is still in the future.
                    if self.pending.is_empty() {
                        self.virtual_now = due;
                        return self.pop();
                    }
                    self.wait_for_completion(None);
                }
                ClockMode::Real => {
                    if self.pending.is_empty() {
                        std::thread::sleep(due - now);
                    } else {
                        self.wait_for_completion(Some(due - now));
                    }
                }
            }
        }
    }

    fn pop(&mut self) -> Option<Task> {
        let Reverse(task) = self.queue.pop()?;
        trace!(due = ?task.due, seq = task.seq, "task ready");
        Some(task)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(ClockMode::default())
    }
}
