//! Scenario configuration.
//!
//! A [`ScenarioConfig`] is the declarative, serializable description of one
//! test (YAML or JSON). [`ScenarioConfig::compile`] validates it into an
//! engine-native [`TestPlan`]; every invalid field is a `ConfigError` raised
//! before any load is generated.
//!
//! Header values, the URL and the body support `${ENV:NAME}` references so
//! credentials live in the environment, never as literals in versioned
//! scenario files.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::runner::{CheckPredicate, CheckSpec};
use crate::error::ConfigError;
use crate::target::TargetDescriptor;
use crate::threshold::ThresholdSpec;
use crate::utils::parse_duration_str;

/// One step of the ramp schedule: hold or move toward `target` VUs over
/// `duration`.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct ScheduleStep {
    pub duration: String,
    pub target: usize,
}

/// A named assertion on each outcome. Exactly one predicate must be set.
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
pub struct CheckConfig {
    pub name: String,
    /// Passes when the response status equals this code.
    #[serde(default)]
    pub status_is: Option<u16>,
    /// Passes when the request completed under this duration.
    #[serde(default)]
    pub max_duration: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct ScenarioConfig {
    /// The request every virtual user issues.
    pub target: TargetDescriptor,
    /// Constant VU count (shorthand for a single-step schedule).
    pub workers: Option<usize>,
    /// Test duration for the `workers` shorthand (e.g., "30s").
    pub duration: Option<String>,
    /// Ramping schedule; takes precedence over `workers`/`duration`.
    pub schedule: Option<Vec<ScheduleStep>>,
    /// Fixed iterations per VU.
    pub iterations: Option<u64>,
    /// Sleep between iterations (e.g., "1s").
    pub pacing: Option<String>,
    /// Per-request timeout (default: "30s").
    pub timeout: Option<String>,
    /// Threshold expressions, e.g. "p95_latency_ms < 500".
    pub thresholds: Option<Vec<String>>,
    /// Minimum sample count before thresholds are judged (default: 10).
    pub min_samples: Option<u64>,
    /// Abort the run as soon as a threshold is breached.
    pub abort_on_fail: Option<bool>,
    /// Graceful stop window for in-flight work (default: "30s").
    pub stop: Option<String>,
    /// Named per-outcome assertions.
    pub checks: Option<Vec<CheckConfig>>,
}

/// Validated, immutable inputs to the scheduler.
#[derive(Clone)]
pub struct TestPlan {
    pub descriptor: Arc<TargetDescriptor>,
    pub stages: Vec<RampStage>,
    pub checks: Arc<Vec<CheckSpec>>,
    pub thresholds: Vec<ThresholdSpec>,
    pub pacing: Option<Duration>,
    pub timeout: Duration,
    pub iterations: Option<u64>,
    pub min_samples: u64,
    pub abort_on_fail: bool,
    pub grace: Duration,
}

/// A time-bounded target for the number of active VUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampStage {
    pub target_vus: usize,
    pub duration: Duration,
}

fn parse_duration_field(value: &str) -> Result<Duration, ConfigError> {
    parse_duration_str(value).ok_or_else(|| ConfigError::InvalidDuration(value.to_string()))
}

/// Expand `${ENV:NAME}` references. A reference to an unset variable is a
/// hard error; silently sending an empty credential would only show up as a
/// confusing wall of 401s.
pub fn expand_env(template: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${ENV:") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 6..];
        let end = tail
            .find('}')
            .ok_or_else(|| ConfigError::InvalidTarget(format!("unclosed ${{ENV:..}} in '{template}'")))?;
        let name = &tail[..end];
        let value =
            std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))?;
        out.push_str(&value);
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

impl ScenarioConfig {
    /// Validate and resolve into a [`TestPlan`]. Fails fast on the first
    /// invalid field.
    pub fn compile(&self) -> Result<TestPlan, ConfigError> {
        let stages = self.compile_stages()?;
        if stages.is_empty() {
            return Err(ConfigError::EmptyRamp);
        }
        let total: Duration = stages.iter().map(|s| s.duration).sum();
        if total.is_zero() {
            return Err(ConfigError::ZeroRampDuration);
        }

        let descriptor = self.resolve_target()?;
        descriptor.validate()?;

        let thresholds = self
            .thresholds
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|expr| ThresholdSpec::parse(expr))
            .collect::<Result<Vec<_>, _>>()?;

        let checks = self
            .checks
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|c| c.compile())
            .collect::<Result<Vec<_>, _>>()?;

        let pacing = self
            .pacing
            .as_deref()
            .map(parse_duration_field)
            .transpose()?;
        let timeout = self
            .timeout
            .as_deref()
            .map(parse_duration_field)
            .transpose()?
            .unwrap_or(Duration::from_secs(30));
        let grace = self
            .stop
            .as_deref()
            .map(parse_duration_field)
            .transpose()?
            .unwrap_or(Duration::from_secs(30));

        Ok(TestPlan {
            descriptor: Arc::new(descriptor),
            stages,
            checks: Arc::new(checks),
            thresholds,
            pacing,
            timeout,
            iterations: self.iterations,
            min_samples: self.min_samples.unwrap_or(10),
            abort_on_fail: self.abort_on_fail.unwrap_or(false),
            grace,
        })
    }

    fn compile_stages(&self) -> Result<Vec<RampStage>, ConfigError> {
        if let Some(schedule) = &self.schedule {
            return schedule
                .iter()
                .map(|step| {
                    Ok(RampStage {
                        target_vus: step.target,
                        duration: parse_duration_field(&step.duration)?,
                    })
                })
                .collect();
        }

        // Constant-VU shorthand: pin the target immediately, then hold it.
        let workers = self.workers.ok_or(ConfigError::EmptyRamp)?;
        let duration = self
            .duration
            .as_deref()
            .ok_or(ConfigError::ZeroRampDuration)
            .and_then(parse_duration_field)?;
        Ok(vec![
            RampStage {
                target_vus: workers,
                duration: Duration::ZERO,
            },
            RampStage {
                target_vus: workers,
                duration,
            },
        ])
    }

    fn resolve_target(&self) -> Result<TargetDescriptor, ConfigError> {
        let mut target = self.target.clone();
        target.url = expand_env(&target.url)?;
        for value in target.headers.values_mut() {
            *value = expand_env(value)?;
        }
        if let Some(body) = &target.body {
            target.body = Some(expand_env(body)?);
        }
        Ok(target)
    }
}

impl CheckConfig {
    fn compile(&self) -> Result<CheckSpec, ConfigError> {
        let predicate = match (self.status_is, self.max_duration.as_deref()) {
            (Some(status), None) => CheckPredicate::StatusIs(status),
            (None, Some(limit)) => CheckPredicate::DurationUnder(
                parse_duration_str(limit)
                    .ok_or_else(|| ConfigError::InvalidDuration(limit.to_string()))?,
            ),
            _ => {
                return Err(ConfigError::InvalidCheck {
                    name: self.name.clone(),
                    reason: "exactly one of status_is / max_duration must be set".to_string(),
                })
            }
        };
        Ok(CheckSpec {
            name: self.name.clone(),
            predicate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
target:
  url: "https://api.example.com/v1/users"
  headers:
    authorization: "Bearer dummy"
workers: 10
duration: "5s"
"#
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: ScenarioConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert_eq!(config.workers, Some(10));
        assert_eq!(config.duration, Some("5s".to_string()));
        assert_eq!(config.target.method, "GET");
    }

    #[test]
    fn test_compile_constant_vus_shorthand() {
        let config: ScenarioConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        let plan = config.compile().unwrap();
        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.stages[0].target_vus, 10);
        assert_eq!(plan.stages[0].duration, Duration::ZERO);
        assert_eq!(plan.stages[1].duration, Duration::from_secs(5));
        assert_eq!(plan.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_compile_schedule() {
        let yaml = r#"
target:
  url: "https://api.example.com/v1/users"
schedule:
  - { duration: "10s", target: 5 }
  - { duration: "20s", target: 50 }
  - { duration: "10s", target: 0 }
"#;
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        let plan = config.compile().unwrap();
        assert_eq!(plan.stages.len(), 3);
        assert_eq!(plan.stages[1].target_vus, 50);
    }

    #[test]
    fn test_compile_rejects_missing_ramp() {
        let yaml = r#"
target:
  url: "https://api.example.com/"
"#;
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.compile(), Err(ConfigError::EmptyRamp)));
    }

    #[test]
    fn test_compile_rejects_empty_schedule() {
        let yaml = r#"
target:
  url: "https://api.example.com/"
schedule: []
"#;
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.compile(), Err(ConfigError::EmptyRamp)));
    }

    #[test]
    fn test_compile_rejects_zero_total_duration() {
        let yaml = r#"
target:
  url: "https://api.example.com/"
schedule:
  - { duration: "0s", target: 10 }
"#;
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.compile(),
            Err(ConfigError::ZeroRampDuration)
        ));
    }

    #[test]
    fn test_compile_rejects_bad_duration() {
        let yaml = r#"
target:
  url: "https://api.example.com/"
workers: 5
duration: "soon"
"#;
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.compile(),
            Err(ConfigError::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_compile_rejects_negative_duration() {
        let yaml = r#"
target:
  url: "https://api.example.com/"
workers: 5
duration: "-5s"
"#;
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.compile(),
            Err(ConfigError::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_compile_thresholds_and_checks() {
        let yaml = r#"
target:
  url: "https://api.example.com/v1/users"
workers: 10
duration: "5s"
pacing: "1s"
thresholds:
  - "p95_latency_ms < 2000"
  - "error_rate < 0.01"
checks:
  - { name: "status is 200", status_is: 200 }
  - { name: "fast enough", max_duration: "2s" }
"#;
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        let plan = config.compile().unwrap();
        assert_eq!(plan.thresholds.len(), 2);
        assert_eq!(plan.checks.len(), 2);
        assert_eq!(plan.pacing, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_compile_rejects_unknown_threshold_metric() {
        let yaml = r#"
target:
  url: "https://api.example.com/"
workers: 1
duration: "1s"
thresholds:
  - "throughput < 100"
"#;
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.compile(),
            Err(ConfigError::UnknownMetric(_))
        ));
    }

    #[test]
    fn test_check_requires_exactly_one_predicate() {
        let check = CheckConfig {
            name: "ambiguous".to_string(),
            status_is: Some(200),
            max_duration: Some("1s".to_string()),
        };
        assert!(matches!(
            check.compile(),
            Err(ConfigError::InvalidCheck { .. })
        ));

        let check = CheckConfig {
            name: "empty".to_string(),
            status_is: None,
            max_duration: None,
        };
        assert!(check.compile().is_err());
    }

    #[test]
    fn test_expand_env() {
        std::env::set_var("VOLLEY_TEST_TOKEN", "s3cret");
        assert_eq!(
            expand_env("Bearer ${ENV:VOLLEY_TEST_TOKEN}").unwrap(),
            "Bearer s3cret"
        );
        assert_eq!(expand_env("no refs").unwrap(), "no refs");
    }

    #[test]
    fn test_expand_env_missing_var() {
        assert!(matches!(
            expand_env("${ENV:VOLLEY_DEFINITELY_UNSET_VAR}"),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn test_expand_env_unclosed_ref() {
        assert!(expand_env("${ENV:OOPS").is_err());
    }

    #[test]
    fn test_env_resolved_in_headers() {
        std::env::set_var("VOLLEY_TEST_AUTH", "tok123");
        let yaml = r#"
target:
  url: "https://api.example.com/v1/users"
  headers:
    authorization: "Bearer ${ENV:VOLLEY_TEST_AUTH}"
workers: 1
duration: "1s"
"#;
        let config: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        let plan = config.compile().unwrap();
        assert_eq!(
            plan.descriptor.headers["authorization"],
            "Bearer tok123"
        );
    }

    #[test]
    fn test_json_schema_generation() {
        let schema = schemars::schema_for!(ScenarioConfig);
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("schedule"));
        assert!(json.contains("thresholds"));
        assert!(json.contains("target"));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config: ScenarioConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: ScenarioConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.workers, config.workers);
        assert_eq!(parsed.target.url, config.target.url);
    }
}
