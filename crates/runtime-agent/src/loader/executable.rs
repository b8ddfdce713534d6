use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use action_sdk::{ActionParameters, ProcessInvoker, ProcessRequest};
use agent_common::constants::variables;

use super::{EntryPoint, ModuleKind};

/// Entry point run as a child process.
///
/// Parameters arrive as a JSON object on stdin and as `INPUT_<NAME>`
/// environment variables. The result is read back from stdout.
#[derive(Debug, Clone)]
pub struct ExecutableEntryPoint {
    path: PathBuf,
    working_directory: PathBuf,
    invoker: ProcessInvoker,
}

impl ExecutableEntryPoint {
    pub fn new(path: impl Into<PathBuf>, working_directory: impl AsRef<Path>) -> Self {
        Self {
            path: path.into(),
            working_directory: working_directory.as_ref().to_path_buf(),
            invoker: ProcessInvoker::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn request(&self, parameters: &ActionParameters) -> Result<ProcessRequest> {
        let (environment, collisions) = input_variables(parameters);
        for env_name in &collisions {
            tracing::warn!(
                "Several parameters map to '{env_name}'; the entry point sees only the last"
            );
        }

        Ok(ProcessRequest {
            file_name: self.path.clone(),
            working_directory: Some(self.working_directory.clone()),
            environment,
            stdin: Some(serde_json::to_vec(parameters).context("Failed to encode parameters")?),
        })
    }
}

#[async_trait]
impl EntryPoint for ExecutableEntryPoint {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Executable
    }

    async fn invoke(&self, parameters: &ActionParameters) -> Result<Value> {
        let request = self.request(parameters)?;
        let output = self.invoker.execute(&request, true).await?;
        Ok(parse_output(&output.stdout))
    }
}

/// Map parameters to `INPUT_<NAME>` variables.
///
/// Also returns the variable names that more than one parameter mapped to.
fn input_variables(parameters: &ActionParameters) -> (BTreeMap<String, String>, Vec<String>) {
    let mut environment = BTreeMap::new();
    let mut collisions = Vec::new();
    for (name, value) in parameters {
        let env_name = format!(
            "{}{}",
            variables::INPUT_PREFIX,
            name.to_uppercase().replace(' ', "_")
        );
        if environment.insert(env_name.clone(), value.clone()).is_some()
            && !collisions.contains(&env_name)
        {
            collisions.push(env_name);
        }
    }
    (environment, collisions)
}

/// Interpret an entry process's stdout as its result value.
///
/// The whole output is tried as JSON first. Failing that, the last line is
/// taken as the result and the lines before it are treated as logs. Output
/// that holds no JSON becomes a string; no output at all is `null`.
pub fn parse_output(lines: &[String]) -> Value {
    let text = lines.join("\n");
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return value;
    }

    let mut content = lines.iter().filter(|l| !l.trim().is_empty());
    if let Some(last) = content.next_back() {
        if let Ok(value) = serde_json::from_str(last.trim()) {
            for line in content {
                tracing::info!(target: "action", "{line}");
            }
            return value;
        }
    }

    Value::String(trimmed.to_string())
}
