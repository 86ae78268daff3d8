//! Dependency checks performed before a service itself is probed.
use tracing::{debug, warn};

use crate::{
    config::ServiceConfig,
    error::ErrorKind,
    probe::{ServiceControl, ServiceState},
};

/// Result of checking a service's declared dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyCheck {
    /// Every dependency is running (or none are declared).
    Satisfied,
    /// The first dependency, in declared order, that is not running.
    Unsatisfied {
        dependency: String,
        /// `None` when the service manager does not know the dependency.
        state: Option<ServiceState>,
    },
}

impl DependencyCheck {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, DependencyCheck::Satisfied)
    }

    /// Name of the failing dependency, if any.
    pub fn failing_dependency(&self) -> Option<&str> {
        match self {
            DependencyCheck::Satisfied => None,
            DependencyCheck::Unsatisfied { dependency, .. } => Some(dependency),
        }
    }
}

/// Walks a service's flat dependency list through a `ServiceControl`.
pub struct DependencyEvaluator<'a> {
    probe: &'a dyn ServiceControl,
}

impl<'a> DependencyEvaluator<'a> {
    pub fn new(probe: &'a dyn ServiceControl) -> Self {
        Self { probe }
    }

    /// Checks dependencies in declared order, stopping at the first one that is not running.
    ///
    /// A dependency the service manager cannot find or cannot query counts as not running.
    pub fn all_satisfied(&self, service: &ServiceConfig) -> DependencyCheck {
        for dependency in &service.dependencies {
            let state = match self.probe.status(dependency) {
                Ok(state) => Some(state),
                Err(err) => {
                    if err.kind() != ErrorKind::ServiceNotFound {
                        warn!("Failed to check dependency '{dependency}': {err}");
                    }
                    None
                }
            };

            if state != Some(ServiceState::Running) {
                warn!(
                    "Dependency {dependency} of {} is not running.",
                    service.name
                );
                return DependencyCheck::Unsatisfied {
                    dependency: dependency.clone(),
                    state,
                };
            }
            debug!("Dependency {dependency} of {} is running.", service.name);
        }

        DependencyCheck::Satisfied
    }
}
