use crate::error::PluginError;
use crossbeam_channel::Sender;
use serde::Serialize;
use std::fmt;

/// Hook run across every plugin when an article is rendered
pub const RENDER_HOOK: &str = "onArticleRender";

/// Hook run on a single plugin for a targeted action
pub const ACTION_HOOK: &str = "onAction";

/// A non-fatal failure of one plugin during a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginFault {
    pub plugin_id: String,
    pub hook: String,
    pub error: String,
}

impl fmt::Display for PluginFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.plugin_id, self.hook, self.error)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum JobKind {
    Pipeline {
        hook: String,
        input: String,
    },
    Action {
        plugin_id: String,
        action: String,
        payload: String,
    },
}

/// Successful worker output. For actions `content` holds the JSON response.
#[derive(Debug, Default)]
pub(crate) struct JobOutput {
    pub content: String,
    pub faults: Vec<PluginFault>,
}

pub(crate) type JobResult = Result<JobOutput, PluginError>;

/// One unit of work with its private, single-use reply slot
pub(crate) struct Job {
    pub kind: JobKind,
    pub context_json: Option<String>,
    pub reply: Sender<JobResult>,
}

impl Job {
    pub fn label(&self) -> String {
        match &self.kind {
            JobKind::Pipeline { hook, .. } => format!("pipeline:{hook}"),
            JobKind::Action {
                plugin_id, action, ..
            } => format!("action:{plugin_id}/{action}"),
        }
    }
}
