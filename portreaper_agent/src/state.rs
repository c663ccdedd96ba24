//! Shared agent state: OS collaborator, classifier, kill policy and audit log.
//!
//! Nothing here is mutated by snapshot requests; the action log is the only
//! shared mutable resource and serializes itself.

use std::sync::Arc;
use std::time::Duration;

use crate::action_log::ActionLog;
use crate::classify::Classifier;
use crate::config::AgentConfig;
use crate::host::HostOs;
use crate::terminate::{TerminationPolicy, Terminator};

#[derive(Clone)]
pub struct AppState {
    pub host: Arc<dyn HostOs>,
    pub classifier: Arc<Classifier>,
    pub terminator: Arc<Terminator>,
    pub log: Arc<ActionLog>,
    pub refresh_interval: Duration,
    pub auth_token: Option<String>,
}

impl AppState {
    pub fn new(
        host: Arc<dyn HostOs>,
        classifier: Classifier,
        log: Arc<ActionLog>,
        policy: TerminationPolicy,
    ) -> Self {
        let terminator = Terminator::new(host.clone(), classifier.clone(), log.clone(), policy);
        Self {
            host,
            classifier: Arc::new(classifier),
            terminator: Arc::new(terminator),
            log,
            refresh_interval: Duration::from_secs(5),
            auth_token: None,
        }
    }

    pub fn from_config(cfg: &AgentConfig, host: Arc<dyn HostOs>) -> Self {
        let log = match &cfg.log_file {
            Some(path) => ActionLog::with_file(cfg.log_capacity, path, cfg.rotation()),
            None => ActionLog::in_memory(cfg.log_capacity),
        };
        let mut state = Self::new(
            host,
            Classifier::default(),
            Arc::new(log),
            cfg.termination_policy(),
        );
        state.refresh_interval = cfg.refresh_interval;
        state.auth_token = cfg.token.clone();
        state
    }
}
