//! Event ledger types.

use crate::ids::{AgentId, AuditId, EventId, ProjectId, RunId, TaskId, TenantId};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Kind of trajectory event. Unknown names are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EventType {
    RunStarted,
    RunFinished,
    ToolCall,
    ToolResult,
    AgentMessage,
    Thinking,
    Error,
    StallDetected,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::RunStarted => "run_started",
            EventType::RunFinished => "run_finished",
            EventType::ToolCall => "tool_call",
            EventType::ToolResult => "tool_result",
            EventType::AgentMessage => "agent_message",
            EventType::Thinking => "thinking",
            EventType::Error => "error",
            EventType::StallDetected => "stall_detected",
            EventType::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "run_started" => EventType::RunStarted,
            "run_finished" => EventType::RunFinished,
            "tool_call" => EventType::ToolCall,
            "tool_result" => EventType::ToolResult,
            "agent_message" => EventType::AgentMessage,
            "thinking" => EventType::Thinking,
            "error" => EventType::Error,
            "stall_detected" => EventType::StallDetected,
            other => EventType::Custom(other.to_string()),
        })
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl From<EventType> for String {
    fn from(kind: EventType) -> Self {
        kind.as_str().to_string()
    }
}

impl ToSql for EventType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EventType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(EventType::from(value.as_str()?.to_string()))
    }
}

/// Ordering key of an event stream: the run when known, else the task, else the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScope {
    Run(RunId),
    Task(TaskId),
    Agent(AgentId),
}

impl fmt::Display for EventScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventScope::Run(id) => write!(f, "run:{id}"),
            EventScope::Task(id) => write!(f, "task:{id}"),
            EventScope::Agent(id) => write!(f, "agent:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub agent_id: AgentId,
    pub task_id: Option<TaskId>,
    pub project_id: ProjectId,
    pub run_id: Option<RunId>,
    pub event_type: EventType,
    pub payload: Value,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tokens_in: Option<i64>,
    #[serde(default)]
    pub tokens_out: Option<i64>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
}

impl NewEvent {
    pub fn new(project_id: ProjectId, agent_id: AgentId, event_type: EventType, payload: Value) -> Self {
        Self {
            agent_id,
            task_id: None,
            project_id,
            run_id: None,
            event_type,
            payload,
            request_id: String::new(),
            tool_name: None,
            model: None,
            tokens_in: None,
            tokens_out: None,
            cost_usd: None,
        }
    }

    pub fn for_run(mut self, task_id: TaskId, run_id: RunId) -> Self {
        self.task_id = Some(task_id);
        self.run_id = Some(run_id);
        self
    }

    pub fn scope(&self) -> EventScope {
        match (self.run_id, self.task_id) {
            (Some(run), _) => EventScope::Run(run),
            (None, Some(task)) => EventScope::Task(task),
            (None, None) => EventScope::Agent(self.agent_id),
        }
    }
}

/// A stored, immutable trajectory event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: EventId,
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub task_id: Option<TaskId>,
    pub project_id: ProjectId,
    pub run_id: Option<RunId>,
    pub event_type: EventType,
    pub payload: Value,
    pub request_id: String,
    /// Position within the event's scope, starting at 1 with no gaps.
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub tool_name: Option<String>,
    pub model: Option<String>,
    pub tokens_in: Option<i64>,
    pub tokens_out: Option<i64>,
    pub cost_usd: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryFilter {
    /// Empty means every type.
    #[serde(default)]
    pub types: Vec<EventType>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub after: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub before: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPage {
    pub events: Vec<AgentEvent>,
    /// Pass back to fetch the next page. `None` when the page is empty.
    pub cursor: Option<String>,
    pub has_more: bool,
    /// Events matching the filter across all pages.
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStats {
    pub total_events: u64,
    pub by_type: BTreeMap<String, u64>,
    pub duration_ms: i64,
    pub tool_calls: u64,
    pub errors: u64,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub project_id: ProjectId,
    #[serde(default)]
    pub run_id: Option<RunId>,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    pub action: String,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub tenant_id: TenantId,
    pub project_id: ProjectId,
    pub run_id: Option<RunId>,
    pub agent_id: Option<AgentId>,
    pub action: String,
    pub details: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub run_id: Option<RunId>,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub after: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub before: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub cursor: Option<String>,
    pub has_more: bool,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_event_types_survive() {
        let kind: EventType = "deploy_preview".parse().unwrap();
        assert_eq!(kind, EventType::Custom("deploy_preview".into()));
        assert_eq!(kind.to_string(), "deploy_preview");
        assert_eq!("tool_result".parse::<EventType>().unwrap(), EventType::ToolResult);
        assert_eq!(
            serde_json::to_string(&EventType::StallDetected).unwrap(),
            "\"stall_detected\""
        );
    }

    #[test]
    fn scope_prefers_run_then_task() {
        let project = ProjectId::new();
        let agent = AgentId::new();
        let event = NewEvent::new(project, agent, EventType::Thinking, Value::Null);
        assert_eq!(event.scope(), EventScope::Agent(agent));

        let task = TaskId::new();
        let mut with_task = event.clone();
        with_task.task_id = Some(task);
        assert_eq!(with_task.scope().to_string(), format!("task:{task}"));

        let run = RunId::new();
        assert_eq!(event.for_run(task, run).scope(), EventScope::Run(run));
    }
}
