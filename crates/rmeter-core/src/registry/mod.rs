//! Name-to-implementation resolution for the lifecycle roles.
//!
//! A [`LifecycleRegistry`] is owned by whoever executes tasks: the local pool shares the
//! orchestrator's registry, a worker process builds its own in `main`. Overrides travel to the
//! worker as [`FunctionRef`]s and are resolved there, never captured from the submitting side.
mod error;
pub use error::ResolveError;

use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    lifecycle::{AllocArgument, Cleanup, CreateSession, Lifecycle, Role, RunEvaluator, UploadModule},
    remote::Connector,
};

/// How a task refers to the implementation of one role.
pub enum FunctionRef<T: ?Sized> {
    /// Use the registry's default implementation.
    Default,
    /// Look the implementation up by name in the executing worker's registry.
    Named(String),
    /// Use this implementation directly. Only valid for in-process workers.
    Direct(Arc<T>),
}

impl<T: ?Sized> FunctionRef<T> {
    pub fn named(name: impl Into<String>) -> Self {
        FunctionRef::Named(name.into())
    }

    /// Serializable form: `None` for the default, the name otherwise.
    fn to_name(&self, role: Role) -> Result<Option<String>, ResolveError> {
        match self {
            FunctionRef::Default => Ok(None),
            FunctionRef::Named(name) => Ok(Some(name.clone())),
            FunctionRef::Direct(_) => Err(ResolveError::NotTransferable { role }),
        }
    }
}

impl<T: ?Sized> Default for FunctionRef<T> {
    fn default() -> Self {
        FunctionRef::Default
    }
}

impl<T: ?Sized> Clone for FunctionRef<T> {
    fn clone(&self) -> Self {
        match self {
            FunctionRef::Default => FunctionRef::Default,
            FunctionRef::Named(name) => FunctionRef::Named(name.clone()),
            FunctionRef::Direct(f) => FunctionRef::Direct(Arc::clone(f)),
        }
    }
}

impl<T: ?Sized> fmt::Debug for FunctionRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionRef::Default => f.write_str("Default"),
            FunctionRef::Named(name) => f.debug_tuple("Named").field(name).finish(),
            FunctionRef::Direct(_) => f.write_str("Direct(<fn>)"),
        }
    }
}

impl<T: ?Sized> From<Option<String>> for FunctionRef<T> {
    fn from(name: Option<String>) -> Self {
        name.map_or(FunctionRef::Default, FunctionRef::Named)
    }
}

/// References for all five roles of one task.
#[derive(Clone, Debug, Default)]
pub struct LifecycleRefs {
    pub create_session: FunctionRef<dyn CreateSession>,
    pub upload_module: FunctionRef<dyn UploadModule>,
    pub alloc_argument: FunctionRef<dyn AllocArgument>,
    pub run_evaluator: FunctionRef<dyn RunEvaluator>,
    pub cleanup: FunctionRef<dyn Cleanup>,
}

impl LifecycleRefs {
    /// Wire form for worker processes. Fails for direct implementations.
    pub fn to_names(&self) -> Result<LifecycleNames, ResolveError> {
        Ok(LifecycleNames {
            create_session: self.create_session.to_name(Role::CreateSession)?,
            upload_module: self.upload_module.to_name(Role::UploadModule)?,
            alloc_argument: self.alloc_argument.to_name(Role::AllocArgument)?,
            run_evaluator: self.run_evaluator.to_name(Role::RunEvaluator)?,
            cleanup: self.cleanup.to_name(Role::Cleanup)?,
        })
    }
}

/// Serializable lifecycle references; `None` selects the default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LifecycleNames {
    pub create_session: Option<String>,
    pub upload_module: Option<String>,
    pub alloc_argument: Option<String>,
    pub run_evaluator: Option<String>,
    pub cleanup: Option<String>,
}

impl From<LifecycleNames> for LifecycleRefs {
    fn from(names: LifecycleNames) -> Self {
        Self {
            create_session: names.create_session.into(),
            upload_module: names.upload_module.into(),
            alloc_argument: names.alloc_argument.into(),
            run_evaluator: names.run_evaluator.into(),
            cleanup: names.cleanup.into(),
        }
    }
}

/// Registered implementations of one role.
struct Table<T: ?Sized> {
    role: Role,
    default: Arc<T>,
    named: HashMap<String, Arc<T>>,
}

impl<T: ?Sized> Table<T> {
    fn new(role: Role, default: Arc<T>) -> Self {
        Self {
            role,
            default,
            named: HashMap::new(),
        }
    }

    fn insert(&mut self, name: String, f: Arc<T>) -> Result<(), ResolveError> {
        if self.named.contains_key(&name) {
            return Err(ResolveError::Duplicate { role: self.role, name });
        }
        trace!(role = %self.role, name = %name, "registered lifecycle function");
        self.named.insert(name, f);
        Ok(())
    }

    fn resolve(&self, r: &FunctionRef<T>) -> Result<Arc<T>, ResolveError> {
        match r {
            FunctionRef::Default => Ok(Arc::clone(&self.default)),
            FunctionRef::Direct(f) => Ok(Arc::clone(f)),
            FunctionRef::Named(name) => self.named.get(name).cloned().ok_or_else(|| ResolveError::Unknown {
                role: self.role,
                name: name.clone(),
            }),
        }
    }

    fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.named.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Default and named implementations of every lifecycle role.
pub struct LifecycleRegistry {
    create_session: Table<dyn CreateSession>,
    upload_module: Table<dyn UploadModule>,
    alloc_argument: Table<dyn AllocArgument>,
    run_evaluator: Table<dyn RunEvaluator>,
    cleanup: Table<dyn Cleanup>,
}

impl LifecycleRegistry {
    /// Registry whose defaults open sessions through `connector`.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_defaults(Lifecycle::defaults(connector))
    }

    /// Registry with explicit default implementations.
    pub fn with_defaults(defaults: Lifecycle) -> Self {
        Self {
            create_session: Table::new(Role::CreateSession, defaults.create_session),
            upload_module: Table::new(Role::UploadModule, defaults.upload_module),
            alloc_argument: Table::new(Role::AllocArgument, defaults.alloc_argument),
            run_evaluator: Table::new(Role::RunEvaluator, defaults.run_evaluator),
            cleanup: Table::new(Role::Cleanup, defaults.cleanup),
        }
    }

    pub fn register_create_session(
        &mut self,
        name: impl Into<String>,
        f: Arc<dyn CreateSession>,
    ) -> Result<(), ResolveError> {
        self.create_session.insert(name.into(), f)
    }

    pub fn register_upload_module(
        &mut self,
        name: impl Into<String>,
        f: Arc<dyn UploadModule>,
    ) -> Result<(), ResolveError> {
        self.upload_module.insert(name.into(), f)
    }

    pub fn register_alloc_argument(
        &mut self,
        name: impl Into<String>,
        f: Arc<dyn AllocArgument>,
    ) -> Result<(), ResolveError> {
        self.alloc_argument.insert(name.into(), f)
    }

    pub fn register_run_evaluator(
        &mut self,
        name: impl Into<String>,
        f: Arc<dyn RunEvaluator>,
    ) -> Result<(), ResolveError> {
        self.run_evaluator.insert(name.into(), f)
    }

    pub fn register_cleanup(&mut self, name: impl Into<String>, f: Arc<dyn Cleanup>) -> Result<(), ResolveError> {
        self.cleanup.insert(name.into(), f)
    }

    /// Resolve every role, falling back to the defaults for unset references.
    pub fn resolve(&self, refs: &LifecycleRefs) -> Result<Lifecycle, ResolveError> {
        Ok(Lifecycle {
            create_session: self.create_session.resolve(&refs.create_session)?,
            upload_module: self.upload_module.resolve(&refs.upload_module)?,
            alloc_argument: self.alloc_argument.resolve(&refs.alloc_argument)?,
            run_evaluator: self.run_evaluator.resolve(&refs.run_evaluator)?,
            cleanup: self.cleanup.resolve(&refs.cleanup)?,
        })
    }

    /// Names registered for `role`, sorted.
    pub fn names(&self, role: Role) -> Vec<&str> {
        match role {
            Role::CreateSession => self.create_session.names(),
            Role::UploadModule => self.upload_module.names(),
            Role::AllocArgument => self.alloc_argument.names(),
            Role::RunEvaluator => self.run_evaluator.names(),
            Role::Cleanup => self.cleanup.names(),
        }
    }
}

impl fmt::Debug for LifecycleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("LifecycleRegistry");
        for role in Role::ALL {
            s.field(role.as_str(), &self.names(role));
        }
        s.finish()
    }
}
