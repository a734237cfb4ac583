//! Pipeline YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::PipelineConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let substituted = ENV_VAR_RE.replace_all(input, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        std::env::var(name).unwrap_or_else(|_| {
            if !missing.iter().any(|m| m == name) {
                missing.push(name.to_string());
            }
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(substituted.into_owned())
}

/// Parse a pipeline YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_pipeline_str(yaml_str: &str) -> Result<PipelineConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: PipelineConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse pipeline YAML")?;
    Ok(config)
}

/// Parse a pipeline YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_pipeline(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
    parse_pipeline_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("ESSYNC_TEST_HOST", "es1.example.com");
        let input = "host: ${ESSYNC_TEST_HOST}\nport: 9200";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "host: es1.example.com\nport: 9200");
        std::env::remove_var("ESSYNC_TEST_HOST");
    }

    #[test]
    fn test_no_env_vars_passthrough() {
        let input = "host: localhost\nport: 9200";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_missing_env_vars_all_reported_once() {
        let input = "${ESSYNC_MISSING_X} ${ESSYNC_MISSING_Y} ${ESSYNC_MISSING_X}";
        let err = substitute_env_vars(input).unwrap_err().to_string();
        assert!(err.contains("ESSYNC_MISSING_X"));
        assert!(err.contains("ESSYNC_MISSING_Y"));
        assert_eq!(err.matches("ESSYNC_MISSING_X").count(), 1);
    }

    #[test]
    fn test_parse_pipeline_from_string() {
        std::env::set_var("ESSYNC_TEST_SRC_PASS", "s3cret");
        let yaml = r#"
version: "1.0"
pipeline: test
source:
  host: localhost
  port: 9200
  user: elastic
  password: ${ESSYNC_TEST_SRC_PASS}
destination:
  host: localhost
  port: 9201
indices: orders,customers
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        assert_eq!(config.source.password, "s3cret");
        assert_eq!(config.indices.names(), vec!["orders", "customers"]);
        std::env::remove_var("ESSYNC_TEST_SRC_PASS");
    }

    #[test]
    fn test_parse_invalid_yaml_errors() {
        let yaml = "this is not: [valid: yaml: {{{}}}";
        assert!(parse_pipeline_str(yaml).is_err());
    }

    #[test]
    fn test_parse_pipeline_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "version: \"1.0\"\npipeline: f\nsource: {{ host: a, port: 9200 }}\n\
             destination: {{ host: b, port: 9200 }}\nindices: [x]\n"
        )
        .unwrap();
        let config = parse_pipeline(file.path()).unwrap();
        assert_eq!(config.pipeline, "f");
    }

    #[test]
    fn test_parse_missing_file_names_path() {
        let err = parse_pipeline(Path::new("/nonexistent/essync.yaml"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("/nonexistent/essync.yaml"));
    }
}
