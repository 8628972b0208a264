use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    CompletedWithErrors,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "completed_with_errors" => Ok(Self::CompletedWithErrors),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRun {
    pub id: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub resources_count: i64,
    pub events_collected: i64,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: i64,
    pub resources_found: usize,
    pub resources_collected: usize,
    pub resources_failed: usize,
    pub events_collected: usize,
    pub duration: Duration,
    pub errors: Vec<String>,
}

impl RunSummary {
    pub fn new(run_id: i64) -> Self {
        Self {
            run_id,
            ..Self::default()
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.errors.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithErrors
        }
    }
}
