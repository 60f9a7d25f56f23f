//! Optimistic synchronization of the signed-in user's task list.
//!
//! [`TaskSynchronizer`] is the only writer of the list. Every operation
//! applies its local change synchronously, publishes it to subscribers, and
//! only then talks to the backend. No lock is held across that network call.
//! When the backend rejects a change, only that change is undone: operations
//! that landed while it was in flight keep their effect. Field updates under
//! [`RecoveryPolicy::Resync`] reload the list wholesale instead.

use crate::error::AppError;
use crate::identity::Session;
use crate::model::{NewTask, PLACEHOLDER_PREFIX, Priority, Tag, Task, TaskStatus, validate_title};
use crate::remote::{Query, RemoteStore, TASKS};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// How a rejected field update (status, priority, title) is undone.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPolicy {
    /// Put back the record as it was before the optimistic change.
    #[default]
    Rollback,
    /// Reload the whole list from the backend.
    Resync,
}

impl RecoveryPolicy {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rollback" => Ok(Self::Rollback),
            "resync" => Ok(Self::Resync),
            other => Err(AppError::invalid_input(format!(
                "unknown recovery policy '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskState {
    pub tasks: Vec<Task>,
    pub loading: bool,
    /// Most recent backend failure, cleared by the next successful operation.
    pub last_error: Option<AppError>,
    in_flight_loads: usize,
    /// Bumped whenever the list is replaced wholesale; changes rejected after
    /// that are not undone against the new list.
    epoch: u64,
    /// Bumped on reset; loads started under an older session are dropped.
    session: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOptions {
    pub due_date: Option<OffsetDateTime>,
    pub tag: Option<Tag>,
    pub priority: Option<Priority>,
}

pub struct TaskSynchronizer {
    store: Arc<dyn RemoteStore>,
    state: watch::Sender<TaskState>,
    recovery: RecoveryPolicy,
    placeholder_seq: AtomicU64,
}

/// A record taken out of the list by a delete that is still in flight.
struct Removal {
    task: Task,
    index: usize,
    epoch: u64,
}

impl TaskSynchronizer {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        let (state, _) = watch::channel(TaskState::default());
        Self {
            store,
            state,
            recovery: RecoveryPolicy::default(),
            placeholder_seq: AtomicU64::new(0),
        }
    }

    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> TaskState {
        self.state.borrow().clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.borrow().tasks.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn find(&self, id: &str) -> Option<Task> {
        self.state
            .borrow()
            .tasks
            .iter()
            .find(|task| task.id == id)
            .cloned()
    }

    /// Replaces the list with the backend's rows, newest first. On failure the
    /// previous list stays in place.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<(), AppError> {
        let mut session = 0;
        self.state.send_modify(|state| {
            state.in_flight_loads += 1;
            state.loading = true;
            session = state.session;
        });

        let result = self.fetch_all().await;

        let mut superseded = false;
        self.state.send_modify(|state| {
            state.in_flight_loads = state.in_flight_loads.saturating_sub(1);
            state.loading = state.in_flight_loads > 0;
            if state.session != session {
                superseded = true;
                return;
            }
            match &result {
                Ok(tasks) => {
                    state.tasks = tasks.clone();
                    state.epoch += 1;
                    state.last_error = None;
                }
                Err(err) => state.last_error = Some(err.clone()),
            }
        });

        match result {
            Ok(tasks) if superseded => {
                debug!(count = tasks.len(), "dropping load from a previous session");
                Ok(())
            }
            Ok(tasks) => {
                info!(count = tasks.len(), "loaded tasks");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "loading tasks failed");
                Err(err)
            }
        }
    }

    async fn fetch_all(&self) -> Result<Vec<Task>, AppError> {
        let query = Query::new().order_by("created_at", true);
        self.store
            .select(TASKS, &query)
            .await?
            .into_iter()
            .map(decode_task)
            .collect()
    }

    /// Inserts a placeholder at the head of the list, then swaps it for the
    /// backend's record once confirmed.
    #[instrument(skip(self, options))]
    pub async fn add(&self, title: &str, options: AddOptions) -> Result<Task, AppError> {
        let title = validate_title(title)?.to_string();
        let draft = NewTask {
            title: title.clone(),
            status: TaskStatus::Todo,
            priority: options.priority.unwrap_or_default(),
            tag: options.tag,
            due_date: options.due_date,
        };
        let record =
            serde_json::to_value(&draft).map_err(|err| AppError::invalid_data(err.to_string()))?;

        let placeholder = Task {
            id: self.next_placeholder_id(),
            title,
            status: draft.status,
            priority: draft.priority,
            tag: draft.tag,
            due_date: draft.due_date,
            created_at: OffsetDateTime::now_utc(),
        };
        let placeholder_id = placeholder.id.clone();

        self.state
            .send_modify(|state| state.tasks.insert(0, placeholder));

        let confirmed = self
            .store
            .insert(TASKS, record)
            .await
            .and_then(decode_task);

        match confirmed {
            Ok(task) => {
                let mut replaced = false;
                self.state.send_if_modified(|state| {
                    if let Some(slot) = state.tasks.iter_mut().find(|t| t.id == placeholder_id) {
                        *slot = task.clone();
                        state.last_error = None;
                        replaced = true;
                    }
                    replaced
                });
                if !replaced {
                    debug!(id = %task.id, "placeholder superseded before confirmation");
                }
                Ok(task)
            }
            Err(err) => {
                self.discard_placeholder(&placeholder_id, &err);
                Err(err)
            }
        }
    }

    /// Flips `todo` and `done`.
    pub async fn toggle_status(&self, id: &str) -> Result<Task, AppError> {
        self.update_task(id, |task| {
            let status = match task.status {
                TaskStatus::Todo => TaskStatus::Done,
                TaskStatus::Done => TaskStatus::Todo,
                TaskStatus::InProgress => {
                    return Err(AppError::invalid_input(
                        "in-progress tasks cannot be toggled",
                    ));
                }
            };
            let updated = Task {
                status,
                ..task.clone()
            };
            Ok((updated, json!({ "status": status })))
        })
        .await
    }

    /// Marks a task important, or back to medium when it already is.
    pub async fn toggle_priority(&self, id: &str) -> Result<Task, AppError> {
        self.update_task(id, |task| {
            let priority = if task.priority == Priority::High {
                Priority::Medium
            } else {
                Priority::High
            };
            let updated = Task {
                priority,
                ..task.clone()
            };
            Ok((updated, json!({ "priority": priority })))
        })
        .await
    }

    /// A blank title is ignored: `Ok(None)`, nothing changes.
    pub async fn rename_task(&self, id: &str, new_title: &str) -> Result<Option<Task>, AppError> {
        let Ok(title) = validate_title(new_title) else {
            return Ok(None);
        };
        let title = title.to_string();

        self.update_task(id, move |task| {
            let updated = Task {
                title: title.clone(),
                ..task.clone()
            };
            Ok((updated, json!({ "title": title })))
        })
        .await
        .map(Some)
    }

    #[instrument(skip(self))]
    pub async fn delete_task(&self, id: &str) -> Result<Task, AppError> {
        let mut outcome = Err(AppError::invalid_input("task not found"));
        self.state.send_if_modified(|state| {
            let Some(index) = state.tasks.iter().position(|task| task.id == id) else {
                return false;
            };
            if state.tasks[index].is_placeholder() {
                outcome = Err(unconfirmed());
                return false;
            }
            outcome = Ok(Removal {
                task: state.tasks.remove(index),
                index,
                epoch: state.epoch,
            });
            true
        });
        let removal = outcome?;

        match self.store.delete(TASKS, id).await {
            Ok(()) => {
                self.clear_error();
                Ok(removal.task)
            }
            Err(err) => {
                self.reinsert(removal, &err);
                Err(err)
            }
        }
    }

    /// Moves `active_id` to the position of `over_id`, shifting the tasks in
    /// between. Local only: the next [`load`](Self::load) restores backend
    /// order. Unknown ids are ignored. Returns whether the order changed.
    pub fn move_task(&self, active_id: &str, over_id: &str) -> bool {
        self.state.send_if_modified(|state| {
            let from = state.tasks.iter().position(|task| task.id == active_id);
            let to = state.tasks.iter().position(|task| task.id == over_id);
            let (Some(from), Some(to)) = (from, to) else {
                return false;
            };
            if from == to {
                return false;
            }
            let task = state.tasks.remove(from);
            state.tasks.insert(to, task);
            true
        })
    }

    /// Empties the list, e.g. on sign-out. Loads still in flight are dropped
    /// when they land.
    pub fn reset(&self) {
        self.state.send_modify(|state| {
            state.tasks.clear();
            state.last_error = None;
            state.epoch += 1;
            state.session += 1;
        });
    }

    /// Replaces one record in place, sends `fields` to the backend, and
    /// recovers per the configured policy when the backend rejects it.
    async fn update_task<F>(&self, id: &str, change: F) -> Result<Task, AppError>
    where
        F: FnOnce(&Task) -> Result<(Task, Value), AppError>,
    {
        let mut outcome = Err(AppError::invalid_input("task not found"));
        self.state.send_if_modified(|state| {
            let epoch = state.epoch;
            let Some(slot) = state.tasks.iter_mut().find(|task| task.id == id) else {
                return false;
            };
            if slot.is_placeholder() {
                outcome = Err(unconfirmed());
                return false;
            }
            match change(slot) {
                Ok((updated, fields)) => {
                    let prior = std::mem::replace(slot, updated.clone());
                    outcome = Ok((prior, updated, fields, epoch));
                    true
                }
                Err(err) => {
                    outcome = Err(err);
                    false
                }
            }
        });
        let (prior, updated, fields, epoch) = outcome?;

        debug!(id, %fields, "updating task");
        match self.store.update(TASKS, id, fields).await {
            Ok(()) => {
                self.clear_error();
                Ok(updated)
            }
            Err(err) => {
                match self.recovery {
                    RecoveryPolicy::Rollback => self.revert(&prior, &updated, epoch, &err),
                    RecoveryPolicy::Resync => {
                        warn!(id, error = %err, "update rejected; reloading");
                        if let Err(reload) = self.load().await {
                            debug!(error = %reload, "resync after rejected update failed");
                        }
                        self.record_error(&err);
                    }
                }
                Err(err)
            }
        }
    }

    fn discard_placeholder(&self, placeholder_id: &str, err: &AppError) {
        warn!(error = %err, "add rejected; dropping placeholder");
        self.state.send_modify(|state| {
            state.tasks.retain(|task| task.id != placeholder_id);
            state.last_error = Some(err.clone());
        });
    }

    /// Puts a rejected delete's record back where it was, or as close as the
    /// list now allows.
    fn reinsert(&self, removal: Removal, err: &AppError) {
        warn!(id = %removal.task.id, error = %err, "delete rejected; restoring record");
        self.state.send_modify(|state| {
            let present = state.tasks.iter().any(|task| task.id == removal.task.id);
            if state.epoch == removal.epoch && !present {
                let index = removal.index.min(state.tasks.len());
                state.tasks.insert(index, removal.task);
            }
            state.last_error = Some(err.clone());
        });
    }

    fn revert(&self, prior: &Task, updated: &Task, epoch: u64, err: &AppError) {
        warn!(id = %prior.id, error = %err, "update rejected; restoring record");
        self.state.send_modify(|state| {
            if state.epoch == epoch
                && let Some(slot) = state.tasks.iter_mut().find(|task| task.id == prior.id)
            {
                revert_fields(slot, prior, updated);
            }
            state.last_error = Some(err.clone());
        });
    }

    fn record_error(&self, err: &AppError) {
        self.state.send_modify(|state| state.last_error = Some(err.clone()));
    }

    fn clear_error(&self) {
        self.state
            .send_if_modified(|state| state.last_error.take().is_some());
    }

    fn next_placeholder_id(&self) -> String {
        let seq = self.placeholder_seq.fetch_add(1, Ordering::Relaxed);
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        format!("{PLACEHOLDER_PREFIX}{nanos}-{seq}")
    }
}

fn decode_task(row: Value) -> Result<Task, AppError> {
    serde_json::from_value(row).map_err(|err| AppError::invalid_data(err.to_string()))
}

/// Undoes the fields `updated` changed relative to `prior`, skipping any that
/// another operation has rewritten since.
fn revert_fields(slot: &mut Task, prior: &Task, updated: &Task) {
    if prior.title != updated.title && slot.title == updated.title {
        slot.title = prior.title.clone();
    }
    if prior.status != updated.status && slot.status == updated.status {
        slot.status = prior.status;
    }
    if prior.priority != updated.priority && slot.priority == updated.priority {
        slot.priority = prior.priority;
    }
    if prior.tag != updated.tag && slot.tag == updated.tag {
        slot.tag = prior.tag;
    }
    if prior.due_date != updated.due_date && slot.due_date == updated.due_date {
        slot.due_date = prior.due_date;
    }
}

fn unconfirmed() -> AppError {
    AppError::invalid_input("task is still being created")
}

/// Drives `synchronizer` from identity transitions until the identity goes
/// away: a session loads that user's tasks, no session empties the list.
pub async fn follow_sessions(
    synchronizer: &TaskSynchronizer,
    mut sessions: watch::Receiver<Option<Session>>,
) {
    let mut current_user: Option<String> = None;
    loop {
        let user = sessions
            .borrow_and_update()
            .as_ref()
            .map(|session| session.user_id.clone());

        match user {
            Some(user) => {
                if current_user.as_deref() != Some(user.as_str()) {
                    synchronizer.reset();
                }
                info!(user_id = %user, "session active");
                current_user = Some(user);
                if let Err(err) = synchronizer.load().await {
                    debug!(error = %err, "initial load for session failed");
                }
            }
            None => {
                if current_user.take().is_some() {
                    info!("session ended");
                }
                synchronizer.reset();
            }
        }

        if sessions.changed().await.is_err() {
            break;
        }
    }
}
