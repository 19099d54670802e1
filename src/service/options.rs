use super::hooks::Hooks;
use crate::common::Admission;
use crate::observability::{Metrics, NoopMetrics};
use crate::recorder::RecorderBinding;
use std::fmt;
use std::sync::Arc;

/// Optional collaborators of a [`Service`](super::Service)
#[derive(Clone)]
pub struct ServiceOptions {
    pub admission: Option<Arc<dyn Admission>>,
    pub recorders: Vec<RecorderBinding>,
    pub hooks: Hooks,
    pub metrics: Arc<dyn Metrics>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            admission: None,
            recorders: Vec::new(),
            hooks: Hooks::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }
}

impl ServiceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_admission(mut self, admission: Arc<dyn Admission>) -> Self {
        self.admission = Some(admission);
        self
    }

    pub fn with_recorders(mut self, recorders: Vec<RecorderBinding>) -> Self {
        self.recorders = recorders;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_pre_up(mut self, cmds: Vec<String>) -> Self {
        self.hooks.pre_up = cmds;
        self
    }

    pub fn with_post_up(mut self, cmds: Vec<String>) -> Self {
        self.hooks.post_up = cmds;
        self
    }

    pub fn with_pre_down(mut self, cmds: Vec<String>) -> Self {
        self.hooks.pre_down = cmds;
        self
    }

    pub fn with_post_down(mut self, cmds: Vec<String>) -> Self {
        self.hooks.post_down = cmds;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl fmt::Debug for ServiceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceOptions")
            .field("admission", &self.admission.is_some())
            .field("recorders", &self.recorders)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
