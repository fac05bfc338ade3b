//! Event-driven reconcile loop.
//!
//! Cluster events are mapped to [`ReconcileRequest`]s and handed to a work
//! queue that runs at most one reconcile per key at a time. A request that
//! arrives while its key is in flight marks the key dirty and the reconcile
//! runs again once the current one returns.

use crate::cluster::{ClusterClient, ClusterEvent};
use crate::error::{ReconcileError, Result};
use crate::orchestrator::{Action, JobOrchestrator, ReconcileRequest};
use crate::template::DESIRED_STATE_NAME;
use prune_core::{DesiredState, WorkItem};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

/// Stand-in deadline for requeues too far out for the timer
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    /// Delay before retrying a reconcile that hit a stale write
    pub conflict_backoff: Duration,
    /// Delay before retrying any other failed reconcile
    pub error_backoff: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            conflict_backoff: Duration::from_millis(100),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Requests triggered by one cluster event
pub fn requests_for(event: &ClusterEvent) -> Vec<ReconcileRequest> {
    match event {
        ClusterEvent::DesiredStateChanged { name } => {
            vec![ReconcileRequest::DesiredState(name.clone())]
        }
        ClusterEvent::WorkItemChanged { item } => {
            let mut requests = vec![ReconcileRequest::WorkItem(item.name.clone())];
            if item.status.phase.is_terminal() {
                if let Some(owner) = item.owner.as_ref().filter(|o| o.kind == DesiredState::KIND) {
                    requests.push(ReconcileRequest::DesiredState(owner.name.clone()));
                }
            }
            requests
        }
        ClusterEvent::WorkItemDeleted { .. } => Vec::new(),
        ClusterEvent::PodChanged { pod } => {
            if pod.phase.is_terminal() && pod.owner.kind == WorkItem::KIND {
                vec![ReconcileRequest::WorkItem(pod.owner.name.clone())]
            } else {
                Vec::new()
            }
        }
    }
}

#[derive(Default)]
struct QueueState {
    active: HashSet<ReconcileRequest>,
    dirty: HashSet<ReconcileRequest>,
    timers: RequeueTimers,
}

/// At most one pending requeue per key, always the earliest asked for
#[derive(Default)]
struct RequeueTimers {
    pending: HashMap<ReconcileRequest, (Instant, u64)>,
    next_token: u64,
}

impl RequeueTimers {
    /// Record a requeue at `deadline`. Returns the token of a new timer, or
    /// None when an earlier or equal one is already pending.
    fn schedule(&mut self, request: &ReconcileRequest, deadline: Instant) -> Option<u64> {
        if let Some((pending, _)) = self.pending.get(request) {
            if *pending <= deadline {
                return None;
            }
        }
        self.next_token += 1;
        self.pending
            .insert(request.clone(), (deadline, self.next_token));
        Some(self.next_token)
    }

    /// True if the timer `token` is still the one pending for `request`
    fn fire(&mut self, request: &ReconcileRequest, token: u64) -> bool {
        match self.pending.get(request) {
            Some((_, current)) if *current == token => {
                self.pending.remove(request);
                true
            }
            _ => false,
        }
    }
}

struct WorkQueue {
    orchestrator: Arc<JobOrchestrator>,
    settings: ControllerSettings,
    state: Mutex<QueueState>,
    stopped: AtomicBool,
}

impl WorkQueue {
    fn new(orchestrator: Arc<JobOrchestrator>, settings: ControllerSettings) -> Self {
        Self {
            orchestrator,
            settings,
            state: Mutex::new(QueueState::default()),
            stopped: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Mark `request` in flight. False if it already was.
    fn claim(&self, request: &ReconcileRequest) -> bool {
        let mut state = self.state();
        if state.active.contains(request) {
            state.dirty.insert(request.clone());
            return false;
        }
        state.active.insert(request.clone());
        true
    }

    fn enqueue(self: &Arc<Self>, request: ReconcileRequest) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        if self.claim(&request) {
            self.spawn_worker(request);
        }
    }

    fn enqueue_after(self: &Arc<Self>, request: ReconcileRequest, delay: Duration) {
        let now = Instant::now();
        let deadline = now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE);
        let Some(token) = self.state().timers.schedule(&request, deadline) else {
            tracing::trace!("[Controller] {} already has an earlier requeue", request);
            return;
        };

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let current = queue.state().timers.fire(&request, token);
            if current {
                queue.enqueue(request);
            }
        });
    }

    fn spawn_worker(self: &Arc<Self>, request: ReconcileRequest) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let result = queue.orchestrator.reconcile(&request).await;
                if !queue.complete(&request, result) {
                    break;
                }
            }
        });
    }

    /// Handle a finished reconcile. True if the key went dirty meanwhile and
    /// must run again.
    fn complete(self: &Arc<Self>, request: &ReconcileRequest, result: Result<Action>) -> bool {
        match result {
            Ok(Action {
                requeue_after: Some(delay),
            }) => self.enqueue_after(request.clone(), delay),
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                tracing::debug!("[Controller] {} hit a stale write, retrying: {}", request, e);
                self.enqueue_after(request.clone(), self.settings.conflict_backoff);
            }
            Err(ReconcileError::Consistency(msg)) => {
                tracing::error!("[Controller] {} left as is: {}", request, msg);
            }
            Err(e) => {
                tracing::warn!(
                    "[Controller] Reconcile of {} failed, retrying in {:?}: {}",
                    request,
                    self.settings.error_backoff,
                    e
                );
                self.enqueue_after(request.clone(), self.settings.error_backoff);
            }
        }

        let mut state = self.state();
        if !self.stopped.load(Ordering::SeqCst) && state.dirty.remove(request) {
            return true;
        }
        state.dirty.remove(request);
        state.active.remove(request);
        false
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

pub struct Controller {
    cluster: Arc<dyn ClusterClient>,
    orchestrator: Arc<JobOrchestrator>,
    settings: ControllerSettings,
}

impl Controller {
    pub fn new(cluster: Arc<dyn ClusterClient>, orchestrator: Arc<JobOrchestrator>) -> Self {
        Self {
            cluster,
            orchestrator,
            settings: ControllerSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Run until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.cluster.subscribe();
        let queue = Arc::new(WorkQueue::new(
            Arc::clone(&self.orchestrator),
            self.settings,
        ));

        tracing::info!("[Controller] Started");

        let initial = ReconcileRequest::DesiredState(DESIRED_STATE_NAME.to_string());
        if queue.claim(&initial) {
            let result = self.orchestrator.bootstrap().await;
            if queue.complete(&initial, result) {
                queue.spawn_worker(initial);
            }
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            for request in requests_for(&event) {
                                queue.enqueue(request);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!("[Controller] Missed {} events, resyncing", missed);
                            self.resync(&queue).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        queue.stop();
        tracing::info!("[Controller] Stopped");
    }

    async fn resync(&self, queue: &Arc<WorkQueue>) {
        queue.enqueue(ReconcileRequest::DesiredState(
            DESIRED_STATE_NAME.to_string(),
        ));
        match self.cluster.list_work_items().await {
            Ok(items) => {
                for item in items {
                    queue.enqueue(ReconcileRequest::WorkItem(item.name));
                }
            }
            Err(e) => tracing::warn!("[Controller] Resync failed to list WorkItems: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prune_core::{OwnerReference, Phase, Pod, PodPhase, PodTemplate, WorkItemStatus};

    fn item(phase: Phase) -> WorkItem {
        WorkItem {
            name: "imagejob-abcde".to_string(),
            owner: Some(OwnerReference::controller(DesiredState::KIND, "imagelist", "u1")),
            status: WorkItemStatus {
                phase,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_running_item_only_requests_itself() {
        let requests = requests_for(&ClusterEvent::WorkItemChanged {
            item: item(Phase::Running),
        });
        assert_eq!(
            requests,
            vec![ReconcileRequest::WorkItem("imagejob-abcde".to_string())]
        );
    }

    #[test]
    fn test_terminal_item_wakes_owner() {
        let requests = requests_for(&ClusterEvent::WorkItemChanged {
            item: item(Phase::Failed),
        });
        assert!(requests.contains(&ReconcileRequest::DesiredState("imagelist".to_string())));
    }

    #[test]
    fn test_requeue_keeps_earliest_deadline() {
        let mut timers = RequeueTimers::default();
        let request = ReconcileRequest::DesiredState("imagelist".to_string());
        let now = Instant::now();

        let first = timers.schedule(&request, now + Duration::from_secs(60));
        assert!(first.is_some());
        // later or equal deadlines are folded into the pending one
        assert_eq!(timers.schedule(&request, now + Duration::from_secs(120)), None);
        assert_eq!(timers.schedule(&request, now + Duration::from_secs(60)), None);

        let earlier = timers.schedule(&request, now + Duration::from_secs(5));
        assert!(earlier.is_some());
        assert_eq!(timers.pending.len(), 1);

        // the superseded timer wakes up to nothing
        assert!(!timers.fire(&request, first.unwrap()));
        assert!(timers.fire(&request, earlier.unwrap()));
        assert!(timers.pending.is_empty());

        // once fired, a new requeue can be scheduled again
        assert!(timers.schedule(&request, now + Duration::from_secs(60)).is_some());
    }

    #[test]
    fn test_timers_are_per_key() {
        let mut timers = RequeueTimers::default();
        let now = Instant::now();
        let desired = ReconcileRequest::DesiredState("imagelist".to_string());
        let item = ReconcileRequest::WorkItem("imagejob-abcde".to_string());

        assert!(timers.schedule(&desired, now + Duration::from_secs(60)).is_some());
        assert!(timers.schedule(&item, now + Duration::from_secs(60)).is_some());
        assert_eq!(timers.pending.len(), 2);
    }

    #[test]
    fn test_pod_events() {
        let mut pod = Pod {
            name: "imagejob-abcde-node-1".to_string(),
            node_name: "node-1".to_string(),
            owner: OwnerReference::controller(WorkItem::KIND, "imagejob-abcde", "u2"),
            template: PodTemplate::default(),
            phase: PodPhase::Running,
            resource_version: 1,
        };
        assert!(requests_for(&ClusterEvent::PodChanged { pod: pod.clone() }).is_empty());

        pod.phase = PodPhase::Succeeded;
        assert_eq!(
            requests_for(&ClusterEvent::PodChanged { pod }),
            vec![ReconcileRequest::WorkItem("imagejob-abcde".to_string())]
        );
    }
}
