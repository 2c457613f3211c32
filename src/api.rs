//! The surface a build-description file drives. Every function here takes
//! `&mut BuildSession` explicitly — there is no process-global state for a
//! description file to reach into.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::boolexpr::BoolExpr;
use crate::error::{MillError, Result};
use crate::module::ModuleId;
use crate::rules::Rule;
use crate::session::BuildSession;
use crate::target::TargetId;
use crate::varctx::ContextId;

/// `Context(name, parents=?)`.
pub fn context(session: &mut BuildSession, name: &str, parents: Vec<ContextId>) -> ContextId {
    session.contexts.create_with_parents(name, parents)
}

/// `globalize(names)` — re-inject the named context values into the
/// session's binding table so the loader can read them back after the call
/// returns, standing in for the loader-scope mutation the original module
/// state performed implicitly.
pub fn globalize(session: &mut BuildSession, ctx: ContextId, names: &[String]) {
    for name in names {
        let value = session.contexts.lookup(ctx, name).join(Some(" ")).trim().to_string();
        session.globals.insert(name.clone(), value);
    }
}

/// `global_export(names)` — globalize and export in one step.
pub fn global_export(session: &mut BuildSession, ctx: ContextId, names: &[String]) {
    globalize(session, ctx, names);
    export(session, names);
}

/// `export(names)` — names added here are present in every action's shell
/// environment from this point on.
pub fn export(session: &mut BuildSession, names: &[String]) {
    for name in names {
        session.exported.insert(name.clone());
    }
}

/// `unexport(names)`.
pub fn unexport(session: &mut BuildSession, names: &[String]) {
    for name in names {
        session.exported.remove(name);
    }
}

/// `depends(targets, deps, bind=false)`.
pub fn depends(session: &mut BuildSession, targets: &[TargetId], deps: &[TargetId], bind: bool) {
    session.targets.depends(targets, deps, bind);
}

/// `want_targets(names)` — marks named targets wanted directly, bypassing
/// the command-line selection phase (used by description files that want a
/// target built as a side effect of another one).
pub fn want_targets(session: &mut BuildSession, names: &[String]) -> Result<()> {
    for name in names {
        let id = session
            .targets
            .find(name)
            .ok_or_else(|| MillError::UnknownTarget(name.clone()))?;
        session.targets.get(id).set_wanted(true);
    }
    Ok(())
}

/// `PhonyTarget(name)`.
pub fn phony_target(session: &mut BuildSession, name: &str) -> TargetId {
    session.targets.make_phony(name)
}

/// `set_always(t)`.
pub fn set_always(session: &mut BuildSession, t: TargetId) {
    session.targets.get(t).set_always(true);
}

/// Resolves `path` against the session's current directory into a bin-dir
/// path, the way `locate`/`locate_bin` map source paths onto build outputs.
pub fn locate(session: &BuildSession, path: &str) -> PathBuf {
    session.current_dir().join(path)
}

/// `locate_bin(tgts)` — same mapping, pluralized.
pub fn locate_bin(session: &BuildSession, paths: &[String]) -> Vec<PathBuf> {
    paths.iter().map(|p| locate(session, p)).collect()
}

/// `relpath(p)` — path of `p` relative to the session base directory.
pub fn relpath(session: &BuildSession, path: &Path) -> PathBuf {
    path.strip_prefix(&session.base_dir).map(PathBuf::from).unwrap_or_else(|_| path.to_path_buf())
}

/// `relbase(p)` — path of `p` relative to the current directory.
pub fn relbase(session: &BuildSession, path: &Path) -> PathBuf {
    path.strip_prefix(session.current_dir()).map(PathBuf::from).unwrap_or_else(|_| path.to_path_buf())
}

/// `Rule(name, sources, action, targets, context)` — the generic entry point
/// underlying the specific `Compile`/`Link`/... helpers below. Attaches
/// `recipe` to each target's action list; `context` is accepted for
/// signature parity with the description-file API but binding already
/// happened when the target was created (`get_unbound_target`/`bind_target`).
pub fn rule(session: &mut BuildSession, targets: &[TargetId], _context: ContextId, recipe: Rule) {
    let action = std::sync::Arc::new(recipe);
    for &t in targets {
        session.targets.add_action(t, action.clone());
    }
}

/// `Main(name, sources, deps=?)` — the top-level link target of a program:
/// activates `module`, links its (unique) object closure into an executable
/// target named `name`, and makes `all` depend on it.
pub struct MainSpec {
    pub name: String,
}

pub fn main_target(session: &mut BuildSession, spec: MainSpec, module: ModuleId) -> TargetId {
    session.modules.activate(module);
    let objects = session.modules.get_objects(module, true);
    let object_paths: Vec<String> = objects.iter().map(|id| session.targets.get(*id).name.clone()).collect();
    let context = session.modules.get(module).context;

    let target = session.targets.get_unbound_target(&spec.name, Some(context));
    session.targets.bind_target(target, locate(session, &spec.name));
    session.targets.depends(&[target], &objects, true);

    let mut reversed = object_paths.clone();
    reversed.reverse();
    rule(session, &[target], context, Rule::link(object_paths, reversed));

    let all = session.targets.find("all").unwrap_or_else(|| session.targets.make_phony("all"));
    session.targets.depends(&[all], &[target], false);
    target
}

/// `Module(name, sources, context=?)` — registers a module, a Compile rule
/// per source (producing `.o` targets added to the module's object list),
/// and a `MODULE_<UPPER_NAME>` define on its context.
pub fn module(session: &mut BuildSession, name: &str, sources: &[String], context: Option<ContextId>) -> ModuleId {
    let ctx = context.unwrap_or_else(|| session.contexts.create(name));
    session.contexts.get_mut(ctx).append_value(
        "defines",
        format!("MODULE_{}", name.to_uppercase().replace(['-', '.'], "_")),
    );
    let id = session.modules.register(name, ctx);

    for source in sources {
        let obj_name = object_name_for(session, name, source);
        let obj = session.targets.get_unbound_target(&obj_name, Some(ctx));
        session.targets.bind_target(obj, locate(session, &obj_name));
        session.modules.add_object(id, obj);

        let recipe = compile_rule_for(source);
        rule(session, &[obj], ctx, recipe);
    }

    id
}

fn object_name_for(session: &BuildSession, module_name: &str, source: &str) -> String {
    let stem = Path::new(source).file_stem().and_then(|s| s.to_str()).unwrap_or(source);
    let _ = session;
    format!("{module_name}/{stem}.o")
}

fn compile_rule_for(source: &str) -> Rule {
    let ext = Path::new(source).extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "c" => Rule::compile_c(source),
        "cc" | "cpp" | "cxx" => Rule::compile_cpp(source),
        "s" | "S" | "asm" => Rule::compile_asm(source),
        _ => Rule::compile_c(source),
    }
}

/// `ModuleDir(dir)` — registers a module named after `dir`, sourcing every
/// `.c`/`.cc`/`.s` file directly inside it (non-recursive).
pub fn module_dir(session: &mut BuildSession, dir: &str) -> Result<ModuleId> {
    let full = locate(session, dir);
    let mut sources = Vec::new();
    let entries = std::fs::read_dir(&full).map_err(MillError::IoError)?;
    for entry in entries {
        let entry = entry.map_err(MillError::IoError)?;
        let path = entry.path();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if matches!(ext, "c" | "cc" | "cpp" | "cxx" | "s" | "S") {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    sources.push(format!("{dir}/{name}"));
                }
            }
        }
    }
    sources.sort();
    let name = Path::new(dir).file_name().and_then(|n| n.to_str()).unwrap_or(dir).to_string();
    Ok(module(session, &name, &sources, None))
}

/// `PseudoModule(name, uses)` — a module with no sources of its own, purely
/// a grouping node for `needs`.
pub fn pseudo_module(session: &mut BuildSession, name: &str) -> ModuleId {
    module(session, name, &[], None)
}

/// `ModuleList(names)` — bulk `needs(hard=true)` helper wiring every module
/// named into a single umbrella pseudo-module.
pub fn module_list(session: &mut BuildSession, name: &str, members: &[String]) -> Result<ModuleId> {
    let umbrella = pseudo_module(session, name);
    for member in members {
        let other = session
            .modules
            .find(member)
            .ok_or_else(|| MillError::ModuleError(format!("unknown module `{member}`")))?;
        session.modules.needs(umbrella, other, true);
    }
    Ok(umbrella)
}

/// `needs(module, other, hard=true)`.
pub fn needs(session: &mut BuildSession, module: ModuleId, other: ModuleId, hard: bool) {
    session.modules.needs(module, other, hard);
}

/// `use_if(module, expr)`.
pub fn use_if(session: &mut BuildSession, module: ModuleId, expr: &str) -> Result<()> {
    let parsed = BoolExpr::parse(expr).map_err(MillError::BoolExprError)?;
    session.modules.use_if(module, parsed);
    Ok(())
}

/// `Compile(source, target, context)` — a standalone compile rule outside a
/// module (used for e.g. one-off object files a `Main` links directly).
pub fn compile(session: &mut BuildSession, source: &str, target_name: &str, context: ContextId) -> TargetId {
    let target = session.targets.get_unbound_target(target_name, Some(context));
    session.targets.bind_target(target, locate(session, target_name));
    rule(session, &[target], context, compile_rule_for(source));
    target
}

/// `Link(name, sources, objects, context)`.
pub fn link(session: &mut BuildSession, name: &str, sources: Vec<String>, objects: Vec<String>, context: ContextId) -> TargetId {
    let target = session.targets.get_unbound_target(name, Some(context));
    session.targets.bind_target(target, locate(session, name));
    let mut reversed = objects.clone();
    reversed.reverse();
    rule(session, &[target], context, Rule::link(sources, reversed));
    target
}

/// `LinkModule(name, module, context)` — links a module's object closure,
/// resolved at link time (the objects list is only complete after the
/// post-parse/bind phases have run). Every constituent module's context is
/// folded into the link target's own context first, the same way `post_bind`
/// folds a used module's direct deps into its context — this is what makes
/// `libs` (and `CFLAGS`/`defines`/`includes`) declared on a constituent
/// module's context visible when resolving the link line below.
pub fn link_module(session: &mut BuildSession, name: &str, module: ModuleId, context: ContextId) -> TargetId {
    session.modules.activate(module);
    let objects = session.modules.get_objects(module, true);
    let object_paths: Vec<String> = objects.iter().map(|id| session.targets.get(*id).name.clone()).collect();

    for m in session.modules.used_closure(module) {
        let m_ctx = session.modules.get(m).context;
        session.contexts.add_parent(context, m_ctx);
    }
    let mut libs = session.contexts.lookup(context, "libs").prefix("-l");
    libs.reverse();

    let target = session.targets.get_unbound_target(name, Some(context));
    session.targets.bind_target(target, locate(session, name));
    session.targets.depends(&[target], &objects, true);
    rule(session, &[target], context, Rule::link_module(object_paths.clone(), libs));
    target
}

/// `Archive(name, sources, context)`.
pub fn archive(session: &mut BuildSession, name: &str, sources: Vec<String>, context: ContextId) -> TargetId {
    let target = session.targets.get_unbound_target(name, Some(context));
    session.targets.bind_target(target, locate(session, name));
    rule(session, &[target], context, Rule::archive(sources));
    target
}

/// `Touch(name, context)`.
pub fn touch(session: &mut BuildSession, name: &str, context: ContextId) -> TargetId {
    let target = session.targets.get_unbound_target(name, Some(context));
    session.targets.bind_target(target, locate(session, name));
    rule(session, &[target], context, Rule::touch());
    target
}

/// `Clean(name, context)` — phony, always rebuilds (see `graph::check_update`).
pub fn clean(session: &mut BuildSession, context: ContextId) -> TargetId {
    let target = session.targets.find("clean").unwrap_or_else(|| session.targets.make_phony("clean"));
    rule(session, &[target], context, Rule::clean());
    target
}

/// `Tool(name, command)` / `Toolcheck(name, command)` — a phony target
/// probing whether `command` runs successfully, used to gate `use_if` on
/// host tool availability.
pub fn toolcheck(session: &mut BuildSession, name: &str, command: &str, context: ContextId) -> TargetId {
    let target = session.targets.make_phony(name);
    rule(session, &[target], context, Rule::toolcheck(name, command));
    target
}

/// `Print(msg)` — a debug-channel-gated diagnostic; always goes to the
/// `debug` channel's log output, never raw stdout, so it composes with `-Q`.
pub fn print(session: &BuildSession, msg: &str) {
    if session.debug_enabled_for(crate::debugch::DebugChannel::Debug) {
        tracing::info!(target: "debug", "{msg}");
    }
}

/// `NoOp()` — a rule doing nothing, useful as a synchronization point.
pub fn no_op() -> Rule {
    Rule::noop()
}

/// `DebugEnv(names)` — prints the resolved value of each named context var
/// on the `env` debug channel.
pub fn debug_env(session: &BuildSession, ctx: ContextId, names: &[String]) {
    if !session.debug_enabled_for(crate::debugch::DebugChannel::Env) {
        return;
    }
    for name in names {
        let value = session.contexts.lookup(ctx, name).join(Some(" "));
        tracing::info!(target: "env", name, value, "context variable");
    }
}

/// `Fail(msg)` — aborts description loading outright; the loader is expected
/// to propagate this as a configuration error.
pub fn fail(msg: &str) -> MillError {
    MillError::ConfigError(msg.to_string())
}

/// `shell(cmd, env?)` — synchronous shell execution through the command
/// pool. Unlike the run-time action dispatch in `rules.rs`, description-time
/// `shell()` calls surface captured stdout to the caller rather than
/// discarding it — a description file invoking e.g. `pkg-config` needs the
/// output, not just the exit code.
pub fn shell(session: &BuildSession, cmd: &str, extra_env: Option<std::collections::HashMap<String, String>>) -> Result<String> {
    use crate::env::BuildEnv;
    let mut env: std::collections::HashMap<String, String> = std::env::vars().collect();
    if let Some(extra) = extra_env {
        env.extend(extra);
    }
    let handle = session.command_pool().run(
        vec!["/bin/sh".to_string(), "-c".to_string(), cmd.to_string()],
        env,
        session.cwd().to_path_buf(),
    );
    let result = handle.wait();
    if result.exit_code != 0 {
        return Err(MillError::CommandError(format!("`{cmd}` exited {}", result.exit_code)));
    }
    Ok(result.stdout)
}

/// `include(path)` — loads another description file, pushing/popping the
/// cwd stack and caching by absolute path so a second `include` of the same
/// file is a no-op. The actual parsing is the loader's job; this only
/// manages the bookkeeping the loader calls through before/after compiling
/// the target file's body.
pub fn include_guard(session: &mut BuildSession, path: &Path) -> bool {
    let abs = session.current_dir().join(path);
    let canon = abs.canonicalize().unwrap_or(abs);
    if session.included.contains(&canon) {
        return false;
    }
    session.included.insert(canon);
    true
}

/// `subinclude(dir)` — `include` every description file directly inside
/// `dir` (non-recursive), in sorted order. Returns the file list for the
/// loader to actually parse; this call itself only resolves and filters.
pub fn subinclude_candidates(session: &BuildSession, dir: &str, file_name: &str) -> Result<Vec<PathBuf>> {
    let full = locate(session, dir);
    let mut out = Vec::new();
    let entries = std::fs::read_dir(&full).map_err(MillError::IoError)?;
    for entry in entries {
        let entry = entry.map_err(MillError::IoError)?;
        let path = entry.path();
        if path.is_dir() && path.join(file_name).is_file() {
            out.push(path.join(file_name));
        }
    }
    out.sort();
    Ok(out)
}

/// `subdir()` — pushes the description file's own directory onto the cwd
/// stack for the duration of its body; the loader calls `push`/`pop` around
/// compiling each included file.
pub fn push_subdir(session: &mut BuildSession, dir: PathBuf) {
    session.push_cwd(dir);
}

pub fn pop_subdir(session: &mut BuildSession) {
    session.pop_cwd();
}

/// Returns the exported-name env overlay (`os.environ` plus exported names
/// minus unexported ones) an action should run with — the construction the
/// concurrency model requires to avoid one action observing another's
/// in-flight env mutations.
pub fn exported_env(session: &BuildSession) -> std::collections::HashMap<String, String> {
    let exported: HashSet<&String> = session.exported.iter().collect();
    std::env::vars().filter(|(k, _)| exported.contains(k)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfig;

    fn new_session() -> BuildSession {
        BuildSession::new(PathBuf::from("."), &GlobalConfig::default(), 1)
    }

    #[test]
    fn phony_target_is_idempotent_by_name() {
        let mut session = new_session();
        let a = phony_target(&mut session, "a");
        let a2 = phony_target(&mut session, "a");
        assert_eq!(a, a2);
    }

    #[test]
    fn export_then_unexport_round_trips() {
        let mut session = new_session();
        export(&mut session, &["PATH".to_string()]);
        assert!(session.exported.contains("PATH"));
        unexport(&mut session, &["PATH".to_string()]);
        assert!(!session.exported.contains("PATH"));
    }

    #[test]
    fn module_adds_upper_name_define_and_one_object_per_source() {
        let mut session = new_session();
        let m = module(&mut session, "foo", &["foo/a.c".to_string(), "foo/b.c".to_string()], None);
        assert_eq!(session.modules.get(m).objects.len(), 2);
        let ctx = session.modules.get(m).context;
        let defines = session.contexts.lookup(ctx, "defines").combined();
        assert!(defines.contains(&"MODULE_FOO".to_string()));
    }

    #[test]
    fn link_module_folds_constituent_context_and_resolves_libs_to_dash_l_args() {
        let mut session = new_session();
        let m = module(&mut session, "foo", &["foo/a.c".to_string()], None);
        let m_ctx = session.modules.get(m).context;
        session.contexts.get_mut(m_ctx).append_value("libs", "m");
        session.contexts.get_mut(m_ctx).append_value("libs", "pthread");

        let link_ctx = session.contexts.create("link");
        let target = link_module(&mut session, "bin/demo", m, link_ctx);

        // The module's context is now a parent of the link target's context,
        // so `libs` declared on the module is visible from the link context.
        assert_eq!(
            session.contexts.lookup(link_ctx, "libs").combined(),
            vec!["m".to_string(), "pthread".to_string()]
        );

        // `%args` is reversed(libs.prefix("-l")), the same flags `link_module`
        // itself resolves before constructing the attached `Rule`.
        let mut libs = session.contexts.lookup(link_ctx, "libs").prefix("-l");
        libs.reverse();
        assert_eq!(libs, vec!["-lpthread".to_string(), "-lm".to_string()]);

        assert_eq!(session.targets.get(target).actions.len(), 1);
    }

    #[test]
    fn want_targets_rejects_unknown_name() {
        let mut session = new_session();
        let err = want_targets(&mut session, &["nope".to_string()]).unwrap_err();
        assert!(matches!(err, MillError::UnknownTarget(_)));
    }

    #[test]
    fn include_guard_only_admits_a_path_once() {
        let mut session = new_session();
        let path = Path::new("build.toml");
        assert!(include_guard(&mut session, path));
        assert!(!include_guard(&mut session, path));
    }
}
