//! Rule library: command templates consuming a target's Context. A Rule
//! binds a target to a Context and appends itself to the target's actions;
//! `build()` substitutes placeholders, assembles env from the context, and
//! dispatches through the command pool.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::depfile;
use crate::env::BuildEnv;
use crate::target::{Action, TargetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    CompileC,
    CompileCpp,
    CompileAsm,
    Link,
    LinkModule,
    Archive,
    Touch,
    Clean,
    NoOp,
    NoOpShell,
    Toolcheck,
}

impl RuleKind {
    fn template(self) -> &'static str {
        match self {
            RuleKind::CompileC => "${CCACHE} ${CC} ${CFLAGS} %args -c %sources -o %target",
            RuleKind::CompileCpp => "${CCACHE} ${CXX} ${CXXFLAGS} %args -c %sources -o %target",
            RuleKind::CompileAsm => "${AS} ${ASFLAGS} %args -c %sources -o %target",
            RuleKind::Link => "${LINK} ${LINKFLAGS} -Wl,--start-group %sources %args -Wl,--end-group -o %target",
            RuleKind::LinkModule => "${LINK} -Wl,--start-group %sources -Wl,--end-group %args ${LINKFLAGS} -o %target",
            RuleKind::Archive => "${AR} rcs %target %sources",
            RuleKind::Touch => "touch -- %target",
            // Single behavior for clean (recursive remove of the target
            // path), not two divergent variants — see DESIGN.md.
            RuleKind::Clean => "rm -rf %target",
            RuleKind::NoOp => "",
            RuleKind::NoOpShell => "true",
            RuleKind::Toolcheck => "%args",
        }
    }

    fn is_compile(self) -> bool {
        matches!(self, RuleKind::CompileC | RuleKind::CompileCpp | RuleKind::CompileAsm)
    }

    fn adds_defines(self) -> bool {
        matches!(self, RuleKind::CompileC | RuleKind::CompileCpp)
    }
}

/// A command recipe: one `RuleKind` plus the sources/args/name it was
/// instantiated with. Implements `Action` so it can be attached directly to
/// a `Target`'s action list.
#[derive(Debug)]
pub struct Rule {
    pub kind: RuleKind,
    pub sources: Vec<String>,
    pub args: Vec<String>,
    pub name: String,
}

impl Rule {
    pub fn compile_c(source: impl Into<String>) -> Self {
        Self { kind: RuleKind::CompileC, sources: vec![source.into()], args: Vec::new(), name: String::new() }
    }

    pub fn compile_cpp(source: impl Into<String>) -> Self {
        Self { kind: RuleKind::CompileCpp, sources: vec![source.into()], args: Vec::new(), name: String::new() }
    }

    pub fn compile_asm(source: impl Into<String>) -> Self {
        Self { kind: RuleKind::CompileAsm, sources: vec![source.into()], args: Vec::new(), name: String::new() }
    }

    pub fn link(sources: Vec<String>, objects_reversed: Vec<String>) -> Self {
        Self { kind: RuleKind::Link, sources, args: objects_reversed, name: String::new() }
    }

    pub fn link_module(sources: Vec<String>, extra_args: Vec<String>) -> Self {
        Self { kind: RuleKind::LinkModule, sources, args: extra_args, name: String::new() }
    }

    pub fn archive(sources: Vec<String>) -> Self {
        Self { kind: RuleKind::Archive, sources, args: Vec::new(), name: String::new() }
    }

    pub fn touch() -> Self {
        Self { kind: RuleKind::Touch, sources: Vec::new(), args: Vec::new(), name: String::new() }
    }

    pub fn clean() -> Self {
        Self { kind: RuleKind::Clean, sources: Vec::new(), args: Vec::new(), name: String::new() }
    }

    pub fn noop() -> Self {
        Self { kind: RuleKind::NoOp, sources: Vec::new(), args: Vec::new(), name: String::new() }
    }

    pub fn noop_shell() -> Self {
        Self { kind: RuleKind::NoOpShell, sources: Vec::new(), args: Vec::new(), name: String::new() }
    }

    pub fn toolcheck(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self { kind: RuleKind::Toolcheck, sources: Vec::new(), args: vec![command.into()], name: name.into() }
    }

    fn extra_args(&self, env: &dyn BuildEnv, target: TargetId) -> Vec<String> {
        let mut out = Vec::new();
        if !self.kind.is_compile() {
            return out;
        }
        // Emit a `.d` file alongside the object so a successful compile can
        // be followed by header-dependency injection (see
        // `inject_depfile_deps`); every compile kind parses one the same
        // way, so every compile kind requests one the same way.
        out.push("-MMD".to_string());
        let Some(ctx_id) = env.targets().get(target).context else {
            return out;
        };
        out.extend(env.contexts().lookup(ctx_id, "includes").prefix("-I"));
        if self.kind.adds_defines() {
            out.extend(env.contexts().lookup(ctx_id, "defines").prefix("-D"));
        }
        out
    }

    /// Builds the env an action runs with: `os.environ` filtered down to the
    /// names the description file has `export`ed, plus every context
    /// variable (which always participates regardless of export status —
    /// `CFLAGS`/`includes`/etc. are how the engine talks to the compiler,
    /// not something a description file would need to export explicitly).
    /// Built fresh per action so concurrent actions never see each other's
    /// in-flight env mutations.
    fn context_env(&self, env: &dyn BuildEnv, target: TargetId) -> HashMap<String, String> {
        let exported = env.exported();
        let mut vars: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| exported.contains(k))
            .collect();
        if let Some(ctx_id) = env.targets().get(target).context {
            for name in env.contexts().field_names(ctx_id) {
                let view = env.contexts().lookup(ctx_id, &name);
                let joined = view.join(Some(" ")).trim().to_string();
                if !joined.is_empty() || !view.combined().is_empty() {
                    vars.insert(name, joined);
                }
            }
        }
        vars.entry("CCACHE".to_string()).or_insert_with(String::new);
        vars
    }

    fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("${{{key}}}"), value);
        }
        result
    }
}

impl Action for Rule {
    fn run(&self, target: TargetId, env: &dyn BuildEnv) -> bool {
        if self.kind == RuleKind::NoOp {
            return true;
        }

        let target_path = {
            let t = env.targets().get(target);
            t.file_path().map(|p| p.display().to_string()).unwrap_or_else(|| t.name.clone())
        };

        let extra_args = self.extra_args(env, target);
        let mut args = extra_args;
        args.extend(self.args.iter().cloned());

        let vars = self.context_env(env, target);

        let command = Self::substitute(self.kind.template(), &vars)
            .replace("%target", &target_path)
            .replace("%sources", &self.sources.join(" "))
            .replace("%args", &args.join(" "))
            .replace("%name", &self.name);

        if command.trim().is_empty() {
            return true;
        }

        debug!(target: "mill", %command, "running action");
        let trace_shell = env.debug_enabled("commands");
        if trace_shell {
            info!(target: "commands", %command, "running action");
        }

        // The `commands` channel also adds `-x` to the shell's own options,
        // so the subprocess itself echoes each expanded line it runs, not
        // just the top-level command string logged above.
        let mut argv = vec!["/bin/sh".to_string()];
        if trace_shell {
            argv.push("-x".to_string());
        }
        argv.push("-c".to_string());
        argv.push(command);

        let handle = env.command_pool().run(argv, vars, env.cwd().to_path_buf());
        let result = handle.wait();
        let success = result.exit_code == 0;

        if success && self.kind.is_compile() {
            inject_depfile_deps(&target_path, target, env.targets(), env.cwd());
        }

        success
    }

    fn describe(&self) -> String {
        format!("{:?} {:?}", self.kind, self.sources)
    }

    /// Re-reads the `.d` file a *previous* invocation's compile left on
    /// disk, so a target whose output already looks fresh against its
    /// direct deps still picks up a header-only change recorded there —
    /// `run`'s own depfile injection only helps targets that are rebuilt
    /// during *this* invocation.
    fn preload_deps(&self, target: TargetId, graph: &crate::target::TargetGraph, cwd: &std::path::Path) {
        if !self.kind.is_compile() {
            return;
        }
        let target_path = {
            let t = graph.get(target);
            t.file_path().map(|p| p.display().to_string()).unwrap_or_else(|| t.name.clone())
        };
        inject_depfile_deps(&target_path, target, graph, cwd);
    }
}

/// Reads the GCC `-MMD` `.d` file next to the object (same stem, `.d`
/// extension), if one exists, and links each listed header as an extra
/// dependency of the object target. Dependency entries are relative to
/// `cwd` (the directory the compiler ran from), matching how `%sources`
/// paths are written in build descriptions.
fn inject_depfile_deps(target_path: &str, target: TargetId, graph: &crate::target::TargetGraph, cwd: &std::path::Path) {
    let dep_path = std::path::Path::new(target_path).with_extension("d");
    let Ok(content) = std::fs::read_to_string(&dep_path) else {
        return;
    };
    for dep in depfile::parse(&content) {
        let dep_path = std::path::Path::new(&dep);
        let resolved = if dep_path.is_absolute() { dep_path.to_path_buf() } else { cwd.join(dep_path) };
        graph.link_extra_dep(target, &resolved.display().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_replaces_all_occurrences() {
        let mut vars = HashMap::new();
        vars.insert("CC".to_string(), "gcc".to_string());
        vars.insert("CFLAGS".to_string(), "-O2".to_string());
        let out = Rule::substitute("${CC} ${CFLAGS} -c", &vars);
        assert_eq!(out, "gcc -O2 -c");
    }

    #[test]
    fn templates_contain_expected_placeholders() {
        assert!(RuleKind::CompileC.template().contains("%sources"));
        assert!(RuleKind::Link.template().contains("-Wl,--start-group"));
        assert!(RuleKind::Archive.template().contains("%target"));
        assert_eq!(RuleKind::NoOp.template(), "");
        assert_eq!(RuleKind::NoOpShell.template(), "true");
    }

    #[test]
    fn only_compile_kinds_add_include_define_flags() {
        assert!(RuleKind::CompileC.is_compile());
        assert!(RuleKind::CompileC.adds_defines());
        assert!(RuleKind::CompileAsm.is_compile());
        assert!(!RuleKind::CompileAsm.adds_defines());
        assert!(!RuleKind::Link.is_compile());
    }
}
