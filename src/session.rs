//! `BuildSession` is the single value threaded through the build-description
//! API, carrying what would otherwise be process-global mutable state
//! (target graph, context arena, module registry, cwd stack, included-file
//! set) as explicit fields instead.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::commandpool::CommandPool;
use crate::config::GlobalConfig;
use crate::debugch::DebugChannel;
use crate::env::BuildEnv;
use crate::module::ModuleRegistry;
use crate::target::TargetGraph;
use crate::varctx::{ContextArena, ContextId};

pub struct BuildSession {
    pub targets: TargetGraph,
    pub contexts: ContextArena,
    pub modules: ModuleRegistry,
    pub root_context: ContextId,

    pub debug_channels: HashSet<DebugChannel>,
    pub quiet: bool,
    pub fail_fast: bool,
    pub force_rebuild: bool,

    /// Names currently exported into the shell env built for actions.
    pub exported: HashSet<String>,
    /// The `globalize`/`global_export` binding table: names the loader asked
    /// to have re-injected into its own scope, with their resolved values.
    pub globals: HashMap<String, String>,

    /// Base directory the project was discovered in; `subdir`/`include`
    /// push/pop against this via `cwd_stack`.
    pub base_dir: PathBuf,
    cwd_stack: Vec<PathBuf>,
    /// Absolute paths of description files already loaded, so `include`
    /// only compiles each one once.
    pub included: HashSet<PathBuf>,

    pool: CommandPool,
}

impl BuildSession {
    pub fn new(base_dir: PathBuf, config: &GlobalConfig, jobs: usize) -> Self {
        let mut contexts = ContextArena::new();
        let root_context = contexts.create("root");
        {
            let root = contexts.get_mut(root_context);
            root.set_value("CC", "cc");
            root.set_value("CXX", "c++");
            root.set_value("AS", "as");
            root.set_value("AR", "ar");
            root.set_value("LINK", "cc");
            root.set_value("CFLAGS", config.build.cflags.clone());
            root.set_value("CXXFLAGS", config.build.cxxflags.clone());
            root.set_value("ASFLAGS", config.build.asflags.clone());
            root.set_value("LINKFLAGS", config.build.linkflags.clone());
            root.set_value("CCACHE", if config.build.ccache { "ccache" } else { "" });
        }

        let mut targets = TargetGraph::new();
        let all = targets.make_phony("all");
        let first = targets.make_phony("first");
        targets.depends(&[first], &[all], false);

        Self {
            targets,
            contexts,
            modules: ModuleRegistry::new(),
            root_context,
            debug_channels: HashSet::new(),
            quiet: false,
            fail_fast: false,
            force_rebuild: false,
            exported: HashSet::new(),
            globals: HashMap::new(),
            cwd_stack: vec![base_dir.clone()],
            base_dir,
            included: HashSet::new(),
            pool: CommandPool::new(jobs),
        }
    }

    pub fn debug_enabled_for(&self, channel: DebugChannel) -> bool {
        self.debug_channels.contains(&channel)
    }

    pub fn push_cwd(&mut self, dir: PathBuf) {
        self.cwd_stack.push(dir);
    }

    pub fn pop_cwd(&mut self) {
        if self.cwd_stack.len() > 1 {
            self.cwd_stack.pop();
        }
    }

    pub fn current_dir(&self) -> &Path {
        self.cwd_stack.last().expect("cwd stack is never empty")
    }
}

impl BuildEnv for BuildSession {
    fn targets(&self) -> &TargetGraph {
        &self.targets
    }

    fn contexts(&self) -> &ContextArena {
        &self.contexts
    }

    fn command_pool(&self) -> &CommandPool {
        &self.pool
    }

    fn cwd(&self) -> &Path {
        self.current_dir()
    }

    fn debug_enabled(&self, channel: &str) -> bool {
        channel
            .parse::<DebugChannel>()
            .map(|c| self.debug_channels.contains(&c))
            .unwrap_or(false)
    }

    fn exported(&self) -> &HashSet<String> {
        &self.exported
    }
}
