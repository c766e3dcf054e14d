//! Variable merging and `-v key:value` argument rendering.
//!
//! Arguments are handed to the child's argv directly, never through a
//! shell, so values may contain spaces, quotes or colons (the runner splits
//! on the first colon). Keys are the only ambiguous part and are validated
//! before a run is created.

use serde_json::Value;

use super::Variables;

/// Effective variables for a run: `base` (scenario inputs) overlaid by the
/// run's own variables, which win on key collision.
pub fn merge(base: Option<&Variables>, overrides: &Variables) -> Variables {
    let mut merged = base.cloned().unwrap_or_default();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Reject keys the runner cannot parse back and non-scalar values.
pub fn validate(vars: &Variables) -> Result<(), String> {
    for (key, value) in vars {
        if key.is_empty() {
            return Err("variable names must not be empty".to_string());
        }
        if key.starts_with('-') {
            return Err(format!("variable name '{key}' must not start with '-'"));
        }
        if key.contains(':') || key.chars().any(char::is_whitespace) {
            return Err(format!(
                "variable name '{key}' must not contain ':' or whitespace"
            ));
        }
        if !matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
            return Err(format!(
                "variable '{key}' must be a string, number or boolean"
            ));
        }
    }
    Ok(())
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render `vars` as runner arguments: `-v`, `key:value` for each pair, in
/// key order.
pub fn to_cli_args(vars: &Variables) -> Vec<String> {
    vars.iter()
        .flat_map(|(k, v)| ["-v".to_string(), format!("{k}:{}", render_value(v))])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_run_variables_override_scenario_inputs() {
        let inputs = vars(&[("A", json!("1")), ("B", json!("2"))]);
        let run = vars(&[("B", json!("3")), ("C", json!("4"))]);

        let merged = merge(Some(&inputs), &run);
        assert_eq!(
            merged,
            vars(&[("A", json!("1")), ("B", json!("3")), ("C", json!("4"))])
        );
    }

    #[test]
    fn test_testcase_runs_use_run_variables_only() {
        let run = vars(&[("X", json!(true))]);
        assert_eq!(merge(None, &run), run);
    }

    #[test]
    fn test_cli_args_render_scalars() {
        let v = vars(&[
            ("BROWSER", json!("headless firefox")),
            ("RETRIES", json!(3)),
            ("URL", json!("http://host:8080/x")),
            ("VERBOSE", json!(false)),
        ]);
        assert_eq!(
            to_cli_args(&v),
            vec![
                "-v",
                "BROWSER:headless firefox",
                "-v",
                "RETRIES:3",
                "-v",
                "URL:http://host:8080/x",
                "-v",
                "VERBOSE:false",
            ]
        );
    }

    #[test]
    fn test_validate_rejects_ambiguous_keys() {
        assert!(validate(&vars(&[("OK_KEY", json!("v"))])).is_ok());
        assert!(validate(&vars(&[("", json!("v"))])).is_err());
        assert!(validate(&vars(&[("A:B", json!("v"))])).is_err());
        assert!(validate(&vars(&[("A B", json!("v"))])).is_err());
        assert!(validate(&vars(&[("--output", json!("v"))])).is_err());
    }

    #[test]
    fn test_validate_rejects_non_scalars() {
        assert!(validate(&vars(&[("A", json!(null))])).is_err());
        assert!(validate(&vars(&[("A", json!([1, 2]))])).is_err());
        assert!(validate(&vars(&[("A", json!({"k": 1}))])).is_err());
    }
}
