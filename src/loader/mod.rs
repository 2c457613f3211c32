//! Reference build-description loader: a `project.toml` at the base
//! directory plus a `build.toml` per directory, parsed with serde and
//! turned into calls against the `api` module. Real description-file
//! interpreters are out of scope for the engine proper; this loader exists
//! so the engine is exercisable end to end without a scripting runtime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::api;
use crate::error::{MillError, Result};
use crate::module::ModuleId;
use crate::session::BuildSession;
use crate::varctx::ContextId;

pub const PROJECT_FILE: &str = "project.toml";
pub const BUILD_FILE: &str = "build.toml";

#[derive(Debug, Deserialize)]
pub struct ProjectManifest {
    pub project: ProjectSection,
}

#[derive(Debug, Deserialize)]
pub struct ProjectSection {
    pub name: String,
    #[serde(default)]
    pub export: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct BuildFile {
    #[serde(default)]
    pub context: Vec<ContextDecl>,
    #[serde(default)]
    pub module: Vec<ModuleDecl>,
    #[serde(default)]
    pub main: Vec<MainDecl>,
    #[serde(default)]
    pub link: Vec<LinkDecl>,
    #[serde(default)]
    pub archive: Vec<ArchiveDecl>,
    #[serde(default)]
    pub toolcheck: Vec<ToolcheckDecl>,
    #[serde(default)]
    pub subdir: Vec<String>,
    #[serde(default)]
    pub include: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContextDecl {
    pub name: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub defines: Vec<String>,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub cflags: Vec<String>,
    #[serde(default)]
    pub libs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModuleDecl {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub needs_soft: Vec<String>,
    #[serde(default)]
    pub use_if: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MainDecl {
    pub name: String,
    pub module: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkDecl {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub objects: Vec<String>,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ArchiveDecl {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToolcheckDecl {
    pub name: String,
    pub command: String,
}

/// Walks upward from `start` looking for `project.toml`; returns the
/// directory it was found in. Matches the upward project-discovery walk:
/// reaching `/` without a hit is a configuration error.
pub fn discover_project_root(start: &Path) -> Result<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(PROJECT_FILE).is_file() {
            return Ok(dir);
        }
        if !dir.pop() {
            return Err(MillError::ConfigError(format!(
                "no {PROJECT_FILE} found in {} or any parent directory",
                start.display()
            )));
        }
    }
}

pub fn load_manifest(root: &Path) -> Result<ProjectManifest> {
    let content = std::fs::read_to_string(root.join(PROJECT_FILE)).map_err(MillError::IoError)?;
    Ok(toml::from_str(&content)?)
}

/// Loads the whole project: the root `build.toml` (if present) plus every
/// `include`/`subdir` entry it names, recursively. Each directory's modules
/// and targets are registered against `session` as they're encountered.
pub fn load_project(session: &mut BuildSession, root: &Path) -> Result<()> {
    let manifest = load_manifest(root)?;
    api::export(session, &manifest.project.export);
    load_dir(session, root)
}

fn load_dir(session: &mut BuildSession, dir: &Path) -> Result<()> {
    let build_path = dir.join(BUILD_FILE);
    if !build_path.is_file() {
        return Ok(());
    }
    if !api::include_guard(session, &build_path) {
        return Ok(());
    }

    let content = std::fs::read_to_string(&build_path).map_err(MillError::IoError)?;
    let file: BuildFile = toml::from_str(&content)
        .map_err(|e| MillError::ParseError(format!("{}: {e}", build_path.display())))?;

    api::push_subdir(session, dir.to_path_buf());
    let result = load_build_file(session, dir, file);
    api::pop_subdir(session);
    result
}

fn load_build_file(session: &mut BuildSession, dir: &Path, file: BuildFile) -> Result<()> {
    let mut contexts: HashMap<String, ContextId> = HashMap::new();
    let mut modules: HashMap<String, ModuleId> = HashMap::new();

    for decl in &file.context {
        let parent_ids: Vec<ContextId> = decl
            .parents
            .iter()
            .map(|p| {
                contexts.get(p).copied().ok_or_else(|| {
                    MillError::ConfigError(format!("context `{p}` referenced before declaration"))
                })
            })
            .collect::<Result<_>>()?;
        let id = api::context(session, &decl.name, parent_ids);
        let ctx = session.contexts.get_mut(id);
        for d in &decl.defines {
            ctx.append_value("defines", d.clone());
        }
        for i in &decl.includes {
            ctx.append_value("includes", i.clone());
        }
        for c in &decl.cflags {
            ctx.append_value("CFLAGS", c.clone());
        }
        for l in &decl.libs {
            ctx.append_value("libs", l.clone());
        }
        contexts.insert(decl.name.clone(), id);
    }

    for decl in &file.module {
        let ctx = match &decl.context {
            Some(name) => Some(
                contexts
                    .get(name)
                    .copied()
                    .ok_or_else(|| MillError::ConfigError(format!("context `{name}` not found for module `{}`", decl.name)))?,
            ),
            None => None,
        };
        let id = api::module(session, &decl.name, &decl.sources, ctx);
        modules.insert(decl.name.clone(), id);
    }

    // needs/use_if reference other modules by name, possibly declared later
    // in the same file, so resolve them in a second pass over the same list.
    for decl in &file.module {
        let id = modules[&decl.name];
        for other_name in &decl.needs {
            let other = session
                .modules
                .find(other_name)
                .ok_or_else(|| MillError::ModuleError(format!("unknown module `{other_name}` in needs of `{}`", decl.name)))?;
            api::needs(session, id, other, true);
        }
        for other_name in &decl.needs_soft {
            let other = session
                .modules
                .find(other_name)
                .ok_or_else(|| MillError::ModuleError(format!("unknown module `{other_name}` in needs_soft of `{}`", decl.name)))?;
            api::needs(session, id, other, false);
        }
        if let Some(expr) = &decl.use_if {
            api::use_if(session, id, expr)?;
        }
    }

    for decl in &file.main {
        let module = session
            .modules
            .find(&decl.module)
            .ok_or_else(|| MillError::ModuleError(format!("unknown module `{}` for main `{}`", decl.module, decl.name)))?;
        api::main_target(session, api::MainSpec { name: decl.name.clone() }, module);
    }

    for decl in &file.link {
        let ctx = resolve_context(session, &contexts, decl.context.as_deref())?;
        api::link(session, &decl.name, decl.sources.clone(), decl.objects.clone(), ctx);
    }

    for decl in &file.archive {
        let ctx = resolve_context(session, &contexts, decl.context.as_deref())?;
        api::archive(session, &decl.name, decl.sources.clone(), ctx);
    }

    for decl in &file.toolcheck {
        api::toolcheck(session, &decl.name, &decl.command, session.root_context);
    }

    for sub in &file.subdir {
        load_dir(session, &dir.join(sub))?;
    }

    for inc in &file.include {
        let inc_path = dir.join(inc);
        let inc_dir = inc_path.parent().unwrap_or(dir).to_path_buf();
        load_dir(session, &inc_dir)?;
    }

    Ok(())
}

fn resolve_context(session: &BuildSession, contexts: &HashMap<String, ContextId>, name: Option<&str>) -> Result<ContextId> {
    match name {
        Some(n) => contexts
            .get(n)
            .copied()
            .ok_or_else(|| MillError::ConfigError(format!("context `{n}` not found"))),
        None => Ok(session.root_context),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfig;
    use std::io::Write;

    fn write_file(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn discover_project_root_walks_upward() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_file(&root.join(PROJECT_FILE), "[project]\nname = \"demo\"\n");
        let nested = root.join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();

        let found = discover_project_root(&nested).unwrap();
        assert_eq!(found, root);
    }

    #[test]
    fn discover_project_root_errors_when_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let err = discover_project_root(tmp.path());
        assert!(err.is_err());
    }

    #[test]
    fn load_project_registers_modules_and_main_target() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_file(&root.join(PROJECT_FILE), "[project]\nname = \"demo\"\n");
        write_file(
            &root.join(BUILD_FILE),
            r#"
[[module]]
name = "core"
sources = ["core/a.c"]

[[main]]
name = "bin/demo"
module = "core"
"#,
        );

        let config = GlobalConfig::default();
        let mut session = BuildSession::new(root.to_path_buf(), &config, 1);
        load_project(&mut session, root).unwrap();

        assert!(session.modules.find("core").is_some());
        assert!(session.targets.find("bin/demo").is_some());
    }
}
