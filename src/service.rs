// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Service registration.
//!
//! The node runs its core services out of one master compose document. Each
//! optional service ships its own __service definition__ document at
//! `services/<name>.yml`, which gets merged into the `services` section of the
//! master compose document on install, and taken out of it again on uninstall.
//!
//! # Merge Semantics
//!
//! Only whole-service replacement is defined. Installing a service replaces
//! any previous definition of that service in place, and appends it to the
//! end of the `services` section otherwise. No other part of the compose
//! document is touched, and key order is preserved across the rewrite.
//!
//! # Service Definition Layout
//!
//! A service definition document is keyed by service name:
//!
//! ```yaml
//! electrs:
//!   image: getumbrel/electrs:v0.9.4
//!   restart: on-failure
//! ```
//!
//! A document without a top-level key matching the service name is taken as
//! the bare definition of that service.

use crate::store::{ComposeStore, StoreError};

use serde_yaml::{Mapping, Value};
use tracing::{info, instrument};

/// Merge service definitions into the master compose document.
#[derive(Debug)]
pub struct ServiceRegistrar<S>
where
    S: ComposeStore,
{
    store: S,
}

impl<S> ServiceRegistrar<S>
where
    S: ComposeStore,
{
    /// Construct new service registrar.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Merge service definition into master compose document.
    ///
    /// # Errors
    ///
    /// - Return [`ServiceError::Store`] if either document is missing or
    ///   malformed.
    /// - Return [`ServiceError::NoServices`] if compose document lacks a
    ///   `services` section.
    #[instrument(skip(self), level = "debug")]
    pub fn install_service(&self, name: &str) -> Result<()> {
        let mut document = self.store.load_service(name)?;
        let definition = match document.shift_remove(name) {
            Some(definition) => definition,
            None => Value::Mapping(document),
        };

        let mut compose = self.store.load_compose()?;
        services_mut(&mut compose)?.insert(Value::from(name), definition);

        info!("install service {name}");
        self.store.save_compose(&compose)?;

        Ok(())
    }

    /// Take service definition out of master compose document.
    ///
    /// # Errors
    ///
    /// - Return [`ServiceError::Store`] if compose document is missing or
    ///   malformed.
    /// - Return [`ServiceError::NoServices`] if compose document lacks a
    ///   `services` section.
    /// - Return [`ServiceError::KeyNotFound`] if service is not registered.
    #[instrument(skip(self), level = "debug")]
    pub fn uninstall_service(&self, name: &str) -> Result<()> {
        let mut compose = self.store.load_compose()?;
        if services_mut(&mut compose)?.shift_remove(name).is_none() {
            return Err(ServiceError::KeyNotFound(name.into()));
        }

        info!("uninstall service {name}");
        self.store.save_compose(&compose)?;

        Ok(())
    }
}

fn services_mut(compose: &mut Mapping) -> Result<&mut Mapping> {
    compose
        .get_mut("services")
        .and_then(Value::as_mapping_mut)
        .ok_or(ServiceError::NoServices)
}

/// All possible error types for service registration.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Service or compose document cannot be loaded or saved.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Compose document has no `services` section to merge into.
    #[error("compose document has no services section")]
    NoServices,

    /// Service is not registered in compose document.
    #[error("service {0:?} is not in compose document")]
    KeyNotFound(String),
}

/// Friendly result alias :3
pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Result as StoreResult;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::{cell::RefCell, collections::HashMap, path::PathBuf};

    #[derive(Debug, Default)]
    struct MemoryComposeStore {
        services: HashMap<String, String>,
        compose: RefCell<String>,
        saves: RefCell<usize>,
    }

    impl MemoryComposeStore {
        fn new(compose: &str) -> Self {
            Self {
                compose: RefCell::new(compose.into()),
                ..Default::default()
            }
        }

        fn with_service(mut self, name: &str, document: &str) -> Self {
            self.services.insert(name.into(), document.into());
            self
        }

        fn compose(&self) -> Mapping {
            serde_yaml::from_str(&self.compose.borrow()).unwrap()
        }
    }

    fn parse(name: &str, data: &str) -> StoreResult<Mapping> {
        serde_yaml::from_str(data).map_err(|error| StoreError::Yaml(PathBuf::from(name), error))
    }

    impl ComposeStore for MemoryComposeStore {
        fn load_service(&self, name: &str) -> StoreResult<Mapping> {
            let data = self
                .services
                .get(name)
                .ok_or_else(|| StoreError::NotFound(format!("services/{name}.yml").into()))?;
            parse(name, data)
        }

        fn load_compose(&self) -> StoreResult<Mapping> {
            parse("docker-compose.yml", &self.compose.borrow())
        }

        fn save_compose(&self, compose: &Mapping) -> StoreResult<()> {
            *self.compose.borrow_mut() = serde_yaml::to_string(compose).unwrap();
            *self.saves.borrow_mut() += 1;
            Ok(())
        }
    }

    const COMPOSE: &str = indoc! {r#"
        services:
          a:
            image: a
            restart: always
        networks:
          default:
            name: node
    "#};

    #[test]
    fn install_service_appends_definition() -> anyhow::Result<()> {
        let store = MemoryComposeStore::new(COMPOSE).with_service("b", "b:\n  image: x\n");
        let registrar = ServiceRegistrar::new(store);
        registrar.install_service("b")?;

        let result = registrar.store.compose.borrow().clone();
        let expect = indoc! {r#"
            services:
              a:
                image: a
                restart: always
              b:
                image: x
            networks:
              default:
                name: node
        "#};
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn install_service_replaces_definition_in_place() -> anyhow::Result<()> {
        let compose = indoc! {r#"
            services:
              a:
                image: old
              c:
                image: c
        "#};
        let store = MemoryComposeStore::new(compose).with_service("a", "a:\n  image: new\n");
        let registrar = ServiceRegistrar::new(store);
        registrar.install_service("a")?;

        let expect = indoc! {r#"
            services:
              a:
                image: new
              c:
                image: c
        "#};
        assert_eq!(*registrar.store.compose.borrow(), expect);

        Ok(())
    }

    #[test]
    fn install_service_accepts_bare_definition() -> anyhow::Result<()> {
        let store = MemoryComposeStore::new(COMPOSE).with_service("b", "image: x\nrestart: always\n");
        let registrar = ServiceRegistrar::new(store);
        registrar.install_service("b")?;

        let expect: Value = serde_yaml::from_str("image: x\nrestart: always\n")?;
        assert_eq!(registrar.store.compose()["services"]["b"], expect);

        Ok(())
    }

    #[test]
    fn install_then_uninstall_restores_services() -> anyhow::Result<()> {
        let store = MemoryComposeStore::new(COMPOSE).with_service("b", "b:\n  image: x\n");
        let registrar = ServiceRegistrar::new(store);
        let before = registrar.store.compose();

        registrar.install_service("b")?;
        registrar.uninstall_service("b")?;

        assert_eq!(registrar.store.compose(), before);
        assert_eq!(*registrar.store.compose.borrow(), COMPOSE);

        Ok(())
    }

    #[test]
    fn uninstall_missing_service_leaves_document_alone() {
        let registrar = ServiceRegistrar::new(MemoryComposeStore::new(COMPOSE));
        let result = registrar.uninstall_service("b");

        assert!(matches!(result, Err(ServiceError::KeyNotFound(name)) if name == "b"));
        assert_eq!(*registrar.store.saves.borrow(), 0);
        assert_eq!(*registrar.store.compose.borrow(), COMPOSE);
    }

    #[test]
    fn install_missing_service_document() {
        let registrar = ServiceRegistrar::new(MemoryComposeStore::new(COMPOSE));
        let result = registrar.install_service("b");

        assert!(matches!(result, Err(ServiceError::Store(StoreError::NotFound(_)))));
        assert_eq!(*registrar.store.saves.borrow(), 0);
    }

    #[test]
    fn corrupt_compose_document_is_never_written() {
        let store = MemoryComposeStore::new("services: [a, b").with_service("b", "b:\n  image: x\n");
        let registrar = ServiceRegistrar::new(store);

        assert!(matches!(
            registrar.install_service("b"),
            Err(ServiceError::Store(StoreError::Yaml(..)))
        ));
        assert!(matches!(
            registrar.uninstall_service("a"),
            Err(ServiceError::Store(StoreError::Yaml(..)))
        ));
        assert_eq!(*registrar.store.saves.borrow(), 0);
    }

    #[test]
    fn compose_document_without_services() {
        let store = MemoryComposeStore::new("version: '3'\n").with_service("b", "b:\n  image: x\n");
        let registrar = ServiceRegistrar::new(store);

        assert!(matches!(registrar.install_service("b"), Err(ServiceError::NoServices)));
        assert_eq!(*registrar.store.saves.borrow(), 0);
    }
}
