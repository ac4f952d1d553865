// Installation coordinator - backend selection with fallback to the script backend

use crate::backend::{BackendAdapter, BackendKind, InstallReport};
use crate::error::{AppError, AppResult};
use crate::routes::RouteTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Idle,
    Attempting(BackendKind),
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub report: InstallReport,
    /// Why the preferred backend was skipped, when it was
    pub fallback_cause: Option<String>,
}

impl InstallOutcome {
    pub fn degraded(&self) -> bool {
        self.fallback_cause.is_some()
    }
}

#[derive(Debug)]
struct StateTracker {
    current: InstallState,
    history: Vec<InstallState>,
}

impl StateTracker {
    fn new() -> Self {
        StateTracker {
            current: InstallState::Idle,
            history: vec![InstallState::Idle],
        }
    }

    fn enter(&mut self, next: InstallState) {
        tracing::debug!("Install state {:?} -> {:?}", self.current, next);
        self.current = next;
        self.history.push(next);
    }
}

/// Runs one installation: the preferred backend first, then the script
/// backend if the RPC backend is unavailable or cannot connect.
///
/// `rpc` is `None` when the startup capability check ruled the RPC backend out.
pub struct InstallationCoordinator<R, S> {
    preferred: BackendKind,
    rpc: Option<R>,
    script: S,
    tracker: StateTracker,
}

impl<R, S> InstallationCoordinator<R, S>
where
    R: BackendAdapter,
    S: BackendAdapter,
{
    pub fn new(preferred: BackendKind, rpc: Option<R>, script: S) -> Self {
        InstallationCoordinator {
            preferred,
            rpc,
            script,
            tracker: StateTracker::new(),
        }
    }

    pub fn state(&self) -> InstallState {
        self.tracker.current
    }

    pub fn history(&self) -> &[InstallState] {
        &self.tracker.history
    }

    pub async fn run(&mut self, table: &RouteTable) -> AppResult<InstallOutcome> {
        self.tracker = StateTracker::new();
        let mut fallback_cause = None;

        if self.preferred == BackendKind::Rpc {
            match self.rpc.as_mut() {
                Some(rpc) => {
                    self.tracker.enter(InstallState::Attempting(rpc.kind()));
                    match rpc.install(table).await {
                        Ok(report) => {
                            self.tracker.enter(InstallState::Done);
                            return Ok(InstallOutcome {
                                report,
                                fallback_cause: None,
                            });
                        }
                        Err(e) if e.triggers_fallback() => {
                            tracing::warn!("Error installing routes with RPC backend: {}", e);
                            tracing::warn!("Falling back to script backend");
                            fallback_cause = Some(e.to_string());
                        }
                        Err(e) => return Err(e),
                    }
                }
                None => {
                    tracing::warn!("RPC backend not available, using script backend");
                    fallback_cause = Some("rpc backend unavailable".to_string());
                }
            }
        }

        self.tracker.enter(InstallState::Attempting(self.script.kind()));
        match self.script.install(table).await {
            Ok(report) => {
                self.tracker.enter(InstallState::Done);
                Ok(InstallOutcome {
                    report,
                    fallback_cause,
                })
            }
            Err(e) => match fallback_cause {
                Some(rpc) => Err(AppError::BackendsExhausted {
                    rpc,
                    script: e.to_string(),
                }),
                None => Err(e),
            },
        }
    }
}
