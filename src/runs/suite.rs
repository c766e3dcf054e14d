//! Suite materialization -- turning stored testcase source into files the
//! runner can execute, inside an isolated per-run scratch directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;
use uuid::Uuid;

use crate::catalog::TestCase;

/// File name of the generated scenario suite.
pub const SCENARIO_SUITE_FILE: &str = "suite.robot";

/// Artifact file names the runner is told to write.
pub const OUTPUT_FILE: &str = "output.xml";
pub const LOG_FILE: &str = "log.html";
pub const REPORT_FILE: &str = "report.html";

/// A run's scratch directory and the files inside it.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub dir: PathBuf,
}

impl Workspace {
    /// Create a fresh, uniquely named directory for `run_id` under `root`.
    pub async fn create(root: &Path, run_id: i64) -> Result<Self> {
        let suffix = Uuid::new_v4().simple().to_string();
        let dir = root.join(format!("run-{run_id}-{}", &suffix[..8]));
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create run directory {}", dir.display()))?;
        debug!(run_id, dir = %dir.display(), "created run workspace");
        Ok(Self { dir })
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.join(OUTPUT_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join(REPORT_FILE)
    }

    /// Write a single testcase's content verbatim to `<slug>.robot`.
    /// Returns the file name, relative to the workspace.
    pub async fn write_testcase(&self, testcase: &TestCase) -> Result<String> {
        let file_name = format!("{}.robot", file_slug(&testcase.name));
        self.write(&file_name, &testcase.content).await?;
        Ok(file_name)
    }

    /// Write the concatenated suite for a scenario's testcases.
    pub async fn write_scenario_suite(&self, testcases: &[TestCase]) -> Result<String> {
        self.write(SCENARIO_SUITE_FILE, &render_scenario_suite(testcases))
            .await?;
        Ok(SCENARIO_SUITE_FILE.to_string())
    }

    async fn write(&self, file_name: &str, content: &str) -> Result<()> {
        let path = self.dir.join(file_name);
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("failed to write suite file {}", path.display()))
    }
}

/// Build the scenario suite document: a settings header, then a test-cases
/// section with every testcase's content preceded by a marker comment
/// naming it. Plain concatenation; the result is not validated.
pub fn render_scenario_suite(testcases: &[TestCase]) -> String {
    let mut suite = String::from("*** Settings ***\n\n*** Test Cases ***\n");
    for tc in testcases {
        suite.push('\n');
        suite.push_str(&format!("# ---- Testcase: {} ----\n", tc.name));
        suite.push_str(&tc.content);
        suite.push('\n');
    }
    suite
}

/// File-name-safe form of a testcase name.
pub fn file_slug(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if slug.is_empty() {
        "testcase".to_string()
    } else {
        slug
    }
}
