//! Configuration management for svcwatch.
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
    time::Duration,
};
use tracing::{debug, warn};

use crate::error::MonitorError;

/// Polling interval used when the configuration omits one or provides an unusable value.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// A single monitored service and the services it requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Unit name as known to the service manager.
    pub name: String,
    /// Services that must be running before this one is evaluated, checked in order.
    #[serde(default, alias = "depends_on")]
    pub dependencies: Vec<String>,
}

impl ServiceConfig {
    /// Builds a service entry with dependencies in the given order.
    pub fn new(name: impl Into<String>, dependencies: &[&str]) -> Self {
        Self {
            name: name.into(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// Everything loaded from the configuration source for one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringConfig {
    /// Services in the order they are evaluated.
    pub services: Vec<ServiceConfig>,
    /// How long the loop sleeps after this tick.
    pub interval: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// On-disk document shape.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    services: Vec<ServiceConfig>,
    #[serde(default)]
    monitoring_interval_seconds: Option<serde_yaml::Value>,
}

fn resolve_interval(raw: Option<&serde_yaml::Value>) -> Duration {
    match raw {
        None | Some(serde_yaml::Value::Null) => DEFAULT_INTERVAL,
        Some(value) => match value.as_u64() {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                warn!(
                    "Ignoring invalid monitoring_interval_seconds {:?}; using {}s",
                    value,
                    DEFAULT_INTERVAL.as_secs()
                );
                DEFAULT_INTERVAL
            }
        },
    }
}

/// Rejects configurations whose dependency lists reference each other in a loop.
///
/// Only edges between services declared in the same document are considered; unknown
/// dependency names are left for the probe to report.
fn detect_cycles(services: &[ServiceConfig]) -> Result<(), MonitorError> {
    let graph: HashMap<&str, &[String]> = services
        .iter()
        .map(|s| (s.name.as_str(), s.dependencies.as_slice()))
        .collect();

    fn visit<'a>(
        node: &'a str,
        graph: &HashMap<&'a str, &'a [String]>,
        done: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), MonitorError> {
        if done.contains(node) {
            return Ok(());
        }
        if let Some(pos) = path.iter().position(|n| *n == node) {
            let mut cycle: Vec<&str> = path[pos..].to_vec();
            cycle.push(node);
            return Err(MonitorError::DependencyCycle {
                cycle: cycle.join(" -> "),
            });
        }

        path.push(node);
        if let Some(deps) = graph.get(node).copied() {
            for dep in deps {
                if graph.contains_key(dep.as_str()) {
                    visit(dep.as_str(), graph, done, path)?;
                }
            }
        }
        path.pop();
        done.insert(node);
        Ok(())
    }

    let mut done = HashSet::new();
    for service in services {
        visit(service.name.as_str(), &graph, &mut done, &mut Vec::new())?;
    }
    Ok(())
}

/// Names are not checked here; a name the service manager cannot use fails only the
/// service that mentions it.
fn validate(services: &[ServiceConfig]) -> Result<(), MonitorError> {
    let mut seen = HashSet::new();
    for service in services {
        if !seen.insert(service.name.as_str()) {
            return Err(MonitorError::DuplicateService(service.name.clone()));
        }
    }
    detect_cycles(services)
}

/// Parses a configuration document. JSON input is accepted since it is valid YAML.
pub fn parse_config(content: &str) -> Result<MonitoringConfig, MonitorError> {
    let raw: RawConfig = serde_yaml::from_str(content)?;
    validate(&raw.services)?;

    Ok(MonitoringConfig {
        interval: resolve_interval(raw.monitoring_interval_seconds.as_ref()),
        services: raw.services,
    })
}

/// Reads and validates the configuration file at `path`. Nothing is cached.
pub fn load_config(path: &Path) -> Result<MonitoringConfig, MonitorError> {
    let content = fs::read_to_string(path).map_err(|e| {
        MonitorError::ConfigRead(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, path.display()),
        ))
    })?;

    let config = parse_config(&content)?;
    debug!(
        "Loaded {} service(s) from {:?} with interval {}s",
        config.services.len(),
        path,
        config.interval.as_secs()
    );
    Ok(config)
}

/// Loads the configuration, falling back to an empty service list on any failure.
///
/// The returned error, when present, is always of kind `ConfigUnavailable`.
pub fn load_or_degrade(path: &Path) -> (MonitoringConfig, Option<MonitorError>) {
    match load_config(path) {
        Ok(config) => (config, None),
        Err(err) => {
            warn!("Configuration unavailable, monitoring nothing this tick: {err}");
            (MonitoringConfig::default(), Some(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_yaml_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("services.yaml");
        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            r#"
monitoring_interval_seconds: 5
services:
  - name: web
    dependencies: [db, cache]
  - name: db
"#
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(
            config.services,
            vec![
                ServiceConfig::new("web", &["db", "cache"]),
                ServiceConfig::new("db", &[]),
            ]
        );
    }

    #[test]
    fn test_load_json_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"services": [{"name": "A", "dependencies": ["B"]}], "monitoring_interval_seconds": 5}"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.services, vec![ServiceConfig::new("A", &["B"])]);
        assert_eq!(config.interval, Duration::from_secs(5));
    }

    #[test]
    fn interval_defaults_when_absent_or_invalid() {
        let absent = parse_config("services: []").unwrap();
        assert_eq!(absent.interval, DEFAULT_INTERVAL);

        for raw in ["0", "-3", "\"soon\"", "2.5"] {
            let config =
                parse_config(&format!("monitoring_interval_seconds: {raw}")).unwrap();
            assert_eq!(config.interval, DEFAULT_INTERVAL, "value {raw}");
        }
    }

    #[test]
    fn depends_on_is_accepted_as_alias() {
        let config = parse_config(
            r#"
services:
  - name: api
    depends_on: [postgresql]
"#,
        )
        .unwrap();
        assert_eq!(config.services[0].dependencies, vec!["postgresql".to_string()]);
    }

    #[test]
    fn missing_file_degrades_to_empty_config() {
        let dir = tempdir().unwrap();
        let (config, err) = load_or_degrade(&dir.path().join("absent.yaml"));
        assert_eq!(config, MonitoringConfig::default());
        assert_eq!(err.unwrap().kind(), ErrorKind::ConfigUnavailable);
    }

    #[test]
    fn malformed_file_degrades_to_empty_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "services: [name: {").unwrap();
        let (config, err) = load_or_degrade(&path);
        assert!(config.services.is_empty());
        assert!(matches!(err, Some(MonitorError::ConfigParse(_))));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = parse_config(
            r#"
services:
  - name: web
  - name: web
"#,
        )
        .unwrap_err();
        assert!(matches!(err, MonitorError::DuplicateService(name) if name == "web"));
    }

    #[test]
    fn unusual_names_still_load() {
        let config = parse_config(
            r#"
services:
  - name: web
    dependencies: ["MSSQL$SQLEXPRESS", "--now"]
  - name: db
"#,
        )
        .unwrap();
        assert_eq!(config.services.len(), 2);
        assert_eq!(
            config.services[0].dependencies,
            vec!["MSSQL$SQLEXPRESS".to_string(), "--now".to_string()]
        );
    }

    #[test]
    fn dependency_cycles_are_rejected() {
        let err = parse_config(
            r#"
services:
  - name: a
    dependencies: [b]
  - name: b
    dependencies: [c]
  - name: c
    dependencies: [a]
"#,
        )
        .unwrap_err();
        match err {
            MonitorError::DependencyCycle { cycle } => assert_eq!(cycle, "a -> b -> c -> a"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_dependencies_are_not_cycles() {
        let config = parse_config(
            r#"
services:
  - name: a
    dependencies: [external]
  - name: b
    dependencies: [a, external]
"#,
        )
        .unwrap();
        assert_eq!(config.services.len(), 2);
    }
}
