//! In-process registry of environment adapters.

use crate::model::environment::Environment;
use crate::sync::environment_spi::EnvironmentClient;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Adapter registration/lookup errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentRegistryError {
    DuplicateEnvironment(Environment),
    EnvironmentNotFound(Environment),
}

impl Display for EnvironmentRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateEnvironment(env) => {
                write!(f, "environment already registered: {env}")
            }
            Self::EnvironmentNotFound(env) => write!(f, "no client registered for environment: {env}"),
        }
    }
}

impl Error for EnvironmentRegistryError {}

/// One adapter per environment, ordered by environment id.
#[derive(Default)]
pub struct EnvironmentRegistry {
    clients: BTreeMap<Environment, Arc<dyn EnvironmentClient>>,
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one adapter under the environment it reports.
    pub fn register(
        &mut self,
        client: Arc<dyn EnvironmentClient>,
    ) -> Result<(), EnvironmentRegistryError> {
        let env = client.environment().clone();
        if self.clients.contains_key(&env) {
            return Err(EnvironmentRegistryError::DuplicateEnvironment(env));
        }
        self.clients.insert(env, client);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Returns sorted environment ids.
    pub fn environments(&self) -> Vec<Environment> {
        self.clients.keys().cloned().collect()
    }

    pub fn get(&self, env: &Environment) -> Option<Arc<dyn EnvironmentClient>> {
        self.clients.get(env).cloned()
    }

    pub fn require(
        &self,
        env: &Environment,
    ) -> Result<Arc<dyn EnvironmentClient>, EnvironmentRegistryError> {
        self.get(env)
            .ok_or_else(|| EnvironmentRegistryError::EnvironmentNotFound(env.clone()))
    }
}
