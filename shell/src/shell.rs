//! Name resolution.
//!
//! A [`Shell`] owns an ordered list of [`Namespace`]s. Resolving a name asks
//! each namespace in turn and falls back to running an external program of
//! that name, so resolution itself never fails; a missing program shows up
//! as a spawn error once the call is invoked.

use crate::builtin::{Cat, Echo, Factory, Grep};
use crate::call::CommandCall;
use crate::command::CommandFactory;
use crate::config::{ExecutionMode, ShellConfig};
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::process::ProcessCommand;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// A source of named command factories.
pub trait Namespace: Send + Sync {
    /// Factory registered under `name`, if any.
    fn lookup(&self, name: &str) -> Option<Arc<dyn CommandFactory>>;

    /// Every name this namespace answers to, sorted.
    fn names(&self) -> Vec<String>;

    /// Heading used in command listings.
    fn title(&self) -> &str;
}

/// A namespace backed by an in-memory table.
#[derive(Clone, Default)]
pub struct Scope {
    title: String,
    commands: BTreeMap<String, Arc<dyn CommandFactory>>,
}

impl Scope {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            commands: BTreeMap::new(),
        }
    }

    /// The builtin commands: `echo`, `grep` and `cat`.
    pub fn standard() -> Self {
        Self::new("Standard Commands")
            .with("echo", Factory::<Echo>::default())
            .with("grep", Factory::<Grep>::default())
            .with("cat", Factory::<Cat>::default())
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn insert(&mut self, name: impl Into<String>, factory: impl CommandFactory + 'static) {
        self.commands.insert(name.into(), Arc::new(factory));
    }

    pub fn with(mut self, name: impl Into<String>, factory: impl CommandFactory + 'static) -> Self {
        self.insert(name, factory);
        self
    }
}

impl Namespace for Scope {
    fn lookup(&self, name: &str) -> Option<Arc<dyn CommandFactory>> {
        self.commands.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    fn title(&self) -> &str {
        &self.title
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("title", &self.title)
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Scopes a search path can name.
#[derive(Clone, Default)]
pub struct Registry {
    scopes: HashMap<String, Arc<dyn Namespace>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `local`, `user` and `global` start out empty; `standard` holds the builtins.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("local", Scope::new("Local Commands"));
        registry.register("user", Scope::new("User Commands"));
        registry.register("global", Scope::new("Global Commands"));
        registry.register("standard", Scope::standard());
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, namespace: impl Namespace + 'static) {
        self.scopes.insert(name.into(), Arc::new(namespace));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Namespace>> {
        self.scopes.get(name).cloned()
    }
}

/// One block of [`Shell::commands`]: a namespace and what it provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub title: String,
    /// `(name, description)` pairs, sorted by name.
    pub commands: Vec<(String, String)>,
}

/// Resolves bare names into calls.
#[derive(Clone)]
pub struct Shell {
    namespaces: Vec<Arc<dyn Namespace>>,
    env: Environment,
}

impl Shell {
    /// Search `namespaces` in order, starting from the current directory.
    pub fn new(namespaces: Vec<Arc<dyn Namespace>>) -> Self {
        Self {
            namespaces,
            env: Environment::new(),
        }
    }

    /// Build the search list named by `config.search_path` out of `registry`.
    pub fn from_config(config: &ShellConfig, registry: &Registry) -> Result<Self> {
        if config.execution_mode != ExecutionMode::OnRead {
            return Err(Error::UnsupportedMode(config.execution_mode));
        }
        let namespaces = config
            .search_path
            .iter()
            .map(|name| {
                registry
                    .get(name)
                    .ok_or_else(|| Error::UnknownScope(name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut env = Environment::in_dir(&config.working_dir);
        env.report_faults = config.report_faults;
        log::debug!("shell searching {:?} from {}", config.search_path, env.current_dir.display());
        Ok(Self { namespaces, env })
    }

    /// Bind `name` to the first namespace that knows it, or to an external program.
    pub fn resolve(&self, name: &str) -> PartialCall {
        let found = self
            .namespaces
            .iter()
            .find_map(|ns| ns.lookup(name).map(|factory| (ns.title().to_string(), factory)));
        let factory: Arc<dyn CommandFactory> = match found {
            Some((title, factory)) => {
                log::debug!("'{}' resolved in {}", name, title);
                factory
            }
            None => {
                log::debug!("'{}' not registered, falling back to an external program", name);
                Arc::new(ProcessCommand::from_proc_name(name))
            }
        };
        PartialCall {
            name: name.to_string(),
            factory,
            env: self.env.clone(),
        }
    }

    /// Change the directory future calls run in. Relative paths are taken
    /// from the current one.
    pub fn cd(&mut self, dir: impl AsRef<Path>) {
        self.env.current_dir = self.env.resolve(dir.as_ref());
    }

    /// Pass `key=value` to every command resolved from now on.
    pub fn export(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.set_var(key, value);
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Commands per namespace in search order, skipping empty namespaces.
    pub fn commands(&self) -> Vec<Listing> {
        self.namespaces
            .iter()
            .filter_map(|ns| {
                let commands: Vec<(String, String)> = ns
                    .names()
                    .into_iter()
                    .filter_map(|name| {
                        let description = ns.lookup(&name)?.description().to_string();
                        Some((name, description))
                    })
                    .collect();
                (!commands.is_empty()).then(|| Listing {
                    title: ns.title().to_string(),
                    commands,
                })
            })
            .collect()
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new(vec![Arc::new(Scope::standard())])
    }
}

/// A resolved name waiting for its arguments.
#[derive(Clone)]
pub struct PartialCall {
    name: String,
    factory: Arc<dyn CommandFactory>,
    env: Environment,
}

impl PartialCall {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        self.factory.description()
    }

    /// Create the command for `args`, bound to the directory captured at resolution.
    pub fn call<I, S>(&self, args: I) -> Result<CommandCall>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let command = self.factory.create(&self.env, &args)?;
        Ok(CommandCall::new(command))
    }
}

impl std::fmt::Debug for PartialCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialCall")
            .field("name", &self.name)
            .field("dir", &self.env.current_dir)
            .finish()
    }
}
