//! Run options, suite discovery and initial variables.

use crate::model::TestSuite;
use crate::vars::Vars;
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Prefix of environment variables read as initial variables.
pub const VAR_ENV_PREFIX: &str = "TAUON_VAR_";

/// Options affecting a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Stop a suite after the first case whose results carry errors.
    pub stop_on_failure: bool,
    /// Log each interpolated step at `info` instead of `debug`.
    pub verbose: bool,
}

/// Locates and loads suite files.
#[derive(Debug)]
pub struct TestConfigManager {
    pub test_paths: Vec<PathBuf>,
}

impl TestConfigManager {
    pub fn new() -> Self {
        Self {
            test_paths: vec![PathBuf::from("tests/suites")],
        }
    }

    pub fn add_path<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.test_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Load a single `.yml` / `.yaml` suite file.
    pub fn load_suite<P: AsRef<Path>>(&self, path: P) -> Result<TestSuite> {
        let path = path.as_ref();
        info!("Loading testsuite from {}", path.display());

        let content = fs::read_to_string(path).with_context(|| {
            format!("Failed to read test file: {}", path.display())
        })?;

        let mut suite = TestSuite::from_yaml(&content).with_context(|| {
            format!("Failed to parse YAML from {}", path.display())
        })?;
        suite.filename = path.display().to_string();

        debug!("Successfully loaded testsuite: {}", suite.name);
        Ok(suite)
    }

    /// Load every suite file directly inside `dir`, sorted by file name.
    ///
    /// Files that fail to parse are logged and skipped.
    pub fn load_suites_from_dir<P: AsRef<Path>>(
        &self,
        dir: P,
    ) -> Result<Vec<TestSuite>> {
        let dir = dir.as_ref();
        info!("Loading testsuites from directory: {}", dir.display());

        let mut paths = Vec::new();
        let entries = fs::read_dir(dir).with_context(|| {
            format!("Failed to read directory: {}", dir.display())
        })?;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_suite_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut suites = Vec::new();
        for path in paths {
            match self.load_suite(&path) {
                Ok(suite) => suites.push(suite),
                Err(err) => debug!(
                    "Failed to load testsuite from {}: {:#}",
                    path.display(),
                    err
                ),
            }
        }

        info!("Loaded {} testsuites from {}", suites.len(), dir.display());
        Ok(suites)
    }

    pub fn load_all_suites(&self) -> Result<Vec<TestSuite>> {
        let mut all_suites = Vec::new();

        for path in &self.test_paths {
            if path.is_dir() {
                match self.load_suites_from_dir(path) {
                    Ok(mut suites) => all_suites.append(&mut suites),
                    Err(err) => debug!(
                        "Failed to load testsuites from {}: {:#}",
                        path.display(),
                        err
                    ),
                }
            }
        }

        info!("Loaded {} testsuites in total", all_suites.len());
        Ok(all_suites)
    }
}

impl Default for TestConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn is_suite_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

/// Merge initial variables from the environment, variable files and
/// `name=value` arguments, later sources overriding earlier ones.
///
/// Environment entries are only read when prefixed with
/// [`VAR_ENV_PREFIX`]. Values are parsed as YAML so numbers, booleans and
/// lists keep their type; anything else stays a string.
pub fn read_initial_variables<I>(
    args: &[String],
    files: &[PathBuf],
    env: I,
) -> Result<Vars>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut vars = Vars::new();

    for (key, value) in env {
        if let Some(name) = key.strip_prefix(VAR_ENV_PREFIX) {
            if !name.is_empty() {
                vars.add(name, parse_value(&value));
            }
        }
    }

    for file in files {
        let content = fs::read_to_string(file).with_context(|| {
            format!("Failed to read variables file: {}", file.display())
        })?;
        let map: Option<serde_yaml::Mapping> = serde_yaml::from_str(&content)
            .with_context(|| {
                format!("Failed to parse variables file: {}", file.display())
            })?;
        for (key, value) in map.unwrap_or_default() {
            let key = key.as_str().ok_or_else(|| {
                anyhow!("non-string variable name in {}", file.display())
            })?;
            vars.add(key, serde_json::to_value(value)?);
        }
    }

    for arg in args {
        let (name, value) = arg.split_once('=').ok_or_else(|| {
            anyhow!("invalid variable {arg:?}, expected name=value")
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("invalid variable {arg:?}, empty name"));
        }
        vars.add(name, parse_value(value));
    }

    Ok(vars)
}

fn parse_value(raw: &str) -> Value {
    match serde_yaml::from_str::<serde_yaml::Value>(raw) {
        Ok(serde_yaml::Value::Null) | Err(_) => Value::String(raw.to_string()),
        Ok(parsed) => serde_json::to_value(parsed)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_suite_file() {
        assert!(is_suite_file(Path::new("test.yaml")));
        assert!(is_suite_file(Path::new("dir/nested/foo.yml")));
        assert!(!is_suite_file(Path::new("readme.md")));
        assert!(!is_suite_file(Path::new("test.json")));
        assert!(!is_suite_file(Path::new("no_ext")));
    }

    #[test]
    fn test_load_from_dir_sets_filename() {
        let dir = tempdir_with_files(&[
            ("b.yml", "name: second\ntestcases: []\n"),
            (
                "a.yaml",
                "name: first\ntestcases:\n  - name: Case One\n    steps: []\n",
            ),
            ("broken.yml", "name: [unclosed\n"),
            ("c.json", "{\"ignored\": true}"),
        ]);

        let suites = TestConfigManager::new()
            .load_suites_from_dir(dir.path())
            .unwrap();

        let names: Vec<&str> = suites.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(suites[0].filename.ends_with("a.yaml"));
        assert_eq!(suites[0].testcases[0].name, "case_one");
    }

    #[test]
    fn test_initial_variables_precedence() {
        let dir = tempdir_with_files(&[(
            "vars.yml",
            "host: file-host\nport: 8080\nlist: [1, 2]\n",
        )]);
        let env = vec![
            ("TAUON_VAR_host".to_string(), "env-host".to_string()),
            ("TAUON_VAR_user".to_string(), "env-user".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ];
        let args = vec!["host=arg-host".to_string(), "debug=true".to_string()];

        let files = [dir.path().join("vars.yml")];
        let vars = read_initial_variables(&args, &files, env).unwrap();

        assert_eq!(vars.get("host"), Some(&json!("arg-host")));
        assert_eq!(vars.get("user"), Some(&json!("env-user")));
        assert_eq!(vars.get("port"), Some(&json!(8080)));
        assert_eq!(vars.get("list"), Some(&json!([1, 2])));
        assert_eq!(vars.get("debug"), Some(&json!(true)));
        assert!(!vars.contains_key("HOME"));
    }

    #[test]
    fn test_initial_variables_rejects_malformed_arg() {
        let args = ["novalue".to_string()];
        let err = read_initial_variables(&args, &[], Vec::new()).unwrap_err();
        assert!(err.to_string().contains("name=value"));
    }

    #[test]
    fn test_parse_value_keeps_plain_strings() {
        assert_eq!(parse_value("hello world"), json!("hello world"));
        assert_eq!(parse_value(""), json!(""));
        assert_eq!(parse_value("42"), json!(42));
    }

    fn tempdir_with_files(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }
}
