//! Run execution -- record store, suite materialization, process launch,
//! output capture and the lifecycle controller.
//!
//! The types here are shared by the persistence layer and the HTTP API;
//! [`RunStatus`] in particular is defined once and used on both sides.

pub mod capture;
pub mod executor;
pub mod launcher;
pub mod store;
pub mod suite;
pub mod vars;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use self::executor::{RunExecutor, RunTarget};
pub use self::store::RunStore;

/// Variable map supplied by callers and scenarios: string keys to scalar
/// JSON values.
pub type Variables = BTreeMap<String, serde_json::Value>;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Canceled,
    Error,
}

impl RunStatus {
    pub const TERMINAL: [RunStatus; 4] = [
        RunStatus::Passed,
        RunStatus::Failed,
        RunStatus::Canceled,
        RunStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Passed => "PASSED",
            RunStatus::Failed => "FAILED",
            RunStatus::Canceled => "CANCELED",
            RunStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PENDING" => RunStatus::Pending,
            "RUNNING" => RunStatus::Running,
            "PASSED" => RunStatus::Passed,
            "FAILED" => RunStatus::Failed,
            "CANCELED" => RunStatus::Canceled,
            "ERROR" => RunStatus::Error,
            other => anyhow::bail!("unknown run status '{other}'"),
        })
    }
}

/// What a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Testcase,
    Scenario,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Testcase => "testcase",
            TargetType::Scenario => "scenario",
        }
    }
}

impl FromStr for TargetType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "testcase" => Ok(TargetType::Testcase),
            "scenario" => Ok(TargetType::Scenario),
            other => {
                anyhow::bail!("invalid target_type '{other}', expected 'testcase' or 'scenario'")
            }
        }
    }
}

/// Source of a captured log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
    System,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
            StreamKind::System => "system",
        }
    }
}

impl FromStr for StreamKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(StreamKind::Stdout),
            "stderr" => Ok(StreamKind::Stderr),
            "system" => Ok(StreamKind::System),
            other => anyhow::bail!("unknown stream '{other}'"),
        }
    }
}

/// One execution attempt of a testcase or scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub status: RunStatus,
    pub target_type: TargetType,
    pub testcase_id: Option<i64>,
    pub scenario_id: Option<i64>,
    pub variables: Variables,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub workdir: Option<String>,
    pub robot_output_path: Option<String>,
    pub robot_log_path: Option<String>,
    pub message: Option<String>,
}

/// One captured output line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStep {
    pub id: i64,
    pub run_id: i64,
    pub ts: String,
    pub stream: StreamKind,
    pub message: String,
}

/// An artifact file produced by a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub run_id: i64,
    pub name: String,
    pub path: String,
    pub content_type: Option<String>,
    pub created_at: String,
}
