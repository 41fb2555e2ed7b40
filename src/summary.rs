use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::orchestrator::{MonthOutcome, Outcome};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub outcomes: Vec<MonthOutcome>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn new(outcomes: Vec<MonthOutcome>, cancelled: bool) -> Self {
        Self {
            outcomes,
            cancelled,
        }
    }

    pub fn downloaded(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Downloaded { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|m| pred(&m.outcome)).count()
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let summary: Self = serde_json::from_str(&content)?;
        Ok(summary)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for month in &self.outcomes {
            match &month.outcome {
                Outcome::Downloaded { directory } => {
                    writeln!(f, "{}  downloaded  {}", month.month, directory.display())?
                }
                Outcome::Skipped => writeln!(f, "{}  skipped     no matching scenes", month.month)?,
                Outcome::Failed { detail, .. } => {
                    writeln!(f, "{}  failed      {}", month.month, detail)?
                }
            }
        }
        write!(
            f,
            "{} downloaded, {} skipped, {} failed",
            self.downloaded(),
            self.skipped(),
            self.failed()
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}
