//! Template environment for resolving output paths.
//!
//! Every path template sees the same base environment: the current date
//! and time, the working and home directories (forward slashes, so
//! templates behave the same on every platform), and the resolved base
//! directory.

use std::path::Path;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::template::Template;

/// Builds the base template environment. `base_dir` may itself be a
/// template over the other environment values; it defaults to the
/// working directory.
pub fn create_env(base_dir: Option<&Template>) -> Map<String, Value> {
    let now = Utc::now();
    let cwd = std::env::current_dir()
        .map(|p| to_posix(&p))
        .unwrap_or_else(|_| ".".to_owned());
    let home = dirs::home_dir()
        .map(|p| to_posix(&p))
        .unwrap_or_else(|| ".".to_owned());

    let mut env = Map::new();
    env.insert(
        "currentDate".to_owned(),
        Value::String(now.format("%Y-%m-%d").to_string()),
    );
    env.insert(
        "currentTime".to_owned(),
        Value::String(now.format("%H:%M:%S").to_string()),
    );
    env.insert("cwd".to_owned(), Value::String(cwd.clone()));
    env.insert("homeDir".to_owned(), Value::String(home));

    let resolved_base = match base_dir {
        Some(template) => template.evaluate(&Value::Object(env.clone())),
        None => cwd,
    };
    env.insert("baseDir".to_owned(), Value::String(resolved_base));
    env
}

/// Overlays `extra` on top of `env` for template resolution; entries in
/// `extra` win.
pub fn overlay(env: &Map<String, Value>, extra: &Map<String, Value>) -> Value {
    let mut merged = env.clone();
    for (key, value) in extra {
        merged.insert(key.clone(), value.clone());
    }
    Value::Object(merged)
}

/// Like [`overlay`] for an arbitrary record value; a non-object record
/// leaves the environment as is.
pub fn overlay_record(env: &Map<String, Value>, record: &Value) -> Value {
    match record.as_object() {
        Some(map) => overlay(env, map),
        None => Value::Object(env.clone()),
    }
}

fn to_posix(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_env_has_expected_keys() {
        let env = create_env(None);
        for key in ["currentDate", "currentTime", "cwd", "homeDir", "baseDir"] {
            assert!(env.contains_key(key), "missing {key}");
        }
        // without a base dir template, baseDir is the working directory
        assert_eq!(env["baseDir"], env["cwd"]);
    }

    #[test]
    fn test_date_and_time_shape() {
        let env = create_env(None);
        let date = env["currentDate"].as_str().unwrap();
        let time = env["currentTime"].as_str().unwrap();
        assert_eq!(date.len(), 10);
        assert_eq!(&date[4..5], "-");
        assert_eq!(time.len(), 8);
        assert_eq!(&time[2..3], ":");
    }

    #[test]
    fn test_base_dir_template_resolves_against_env() {
        let template = Template::compile("{cwd}/data").unwrap();
        let env = create_env(Some(&template));
        let cwd = env["cwd"].as_str().unwrap();
        assert_eq!(env["baseDir"].as_str().unwrap(), format!("{cwd}/data"));
    }

    #[test]
    fn test_overlay_prefers_extra() {
        let mut env = Map::new();
        env.insert("a".to_owned(), json!(1));
        env.insert("b".to_owned(), json!(2));
        let merged = overlay_record(&env, &json!({"b": 3, "c": 4}));
        assert_eq!(merged, json!({"a": 1, "b": 3, "c": 4}));
    }
}
