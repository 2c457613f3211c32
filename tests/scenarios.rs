//! End-to-end scenarios exercising the loader, module system, and scheduler
//! together against real files in a temp directory.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use millwright::config::GlobalConfig;
use millwright::env::BuildEnv;
use millwright::loader;
use millwright::phases;
use millwright::rules::Rule;
use millwright::session::BuildSession;
use millwright::target::{Action, TargetGraph, TargetId};

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut f = std::fs::File::create(path).unwrap();
    f.write_all(content.as_bytes()).unwrap();
}

fn new_project(root: &Path) {
    write(&root.join("project.toml"), "[project]\nname = \"demo\"\n");
}

#[test]
fn s1_phony_cascade_runs_each_action_once() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    new_project(root);

    let config = GlobalConfig::default();
    let mut session = BuildSession::new(root.to_path_buf(), &config, 1);
    let a = session.targets.make_phony("a");
    let b = session.targets.make_phony("b");
    session.targets.depends(&[a], &[b], false);
    session.targets.add_action(b, std::sync::Arc::new(Rule::noop_shell()));
    session.targets.add_action(a, std::sync::Arc::new(Rule::noop_shell()));

    let report = phases::run_all(&mut session, &["a".to_string()], 1).unwrap();
    assert_eq!(report.built, 2);
    assert_eq!(report.skipped, 0);
}

#[test]
fn s2_mtime_skip_runs_zero_compiles_on_second_invocation() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    new_project(root);
    write(&root.join("core/a.c"), "int main(void) { return 0; }\n");

    write(
        &root.join("build.toml"),
        r#"
[[module]]
name = "core"
sources = ["core/a.c"]

[[main]]
name = "demo"
module = "core"
"#,
    );

    // Pre-create the object and binary newer than their sources, and an
    // empty `.d` file so the compile/link rules have nothing stale to see.
    let obj = root.join("core/a.o");
    write(&obj, "");
    write(&root.join("core/a.d"), "core/a.o: core/a.c\n");
    write(&root.join("demo"), "");

    let config = GlobalConfig::default();
    let mut session = BuildSession::new(root.to_path_buf(), &config, 1);
    loader::load_project(&mut session, root).unwrap();
    let report = phases::run_all(&mut session, &["demo".to_string()], 1).unwrap();

    assert_eq!(report.skipped, 0);
    assert_eq!(report.built, 0);
}

/// A test-only action standing in for a real `CompileC`/`Link` rule: it
/// counts its own invocations and touches its target's output file, so the
/// test can assert on exactly which targets rebuilt without needing a real
/// C toolchain. `preload_deps` reports a fixed header path as an extra
/// dependency, the way `Rule::preload_deps` re-reads a `.d` file left by an
/// earlier invocation.
#[derive(Debug)]
struct CountingBuild {
    tracked_header: Option<PathBuf>,
    calls: Arc<Mutex<u32>>,
}

impl Action for CountingBuild {
    fn run(&self, target: TargetId, env: &dyn BuildEnv) -> bool {
        *self.calls.lock().unwrap() += 1;
        if let Some(path) = env.targets().get(target).file_path() {
            std::fs::write(path, "").unwrap();
        }
        true
    }

    fn preload_deps(&self, target: TargetId, graph: &TargetGraph, _cwd: &Path) {
        if let Some(header) = &self.tracked_header {
            graph.link_extra_dep(target, header.to_str().unwrap());
        }
    }
}

#[test]
fn s3_editing_a_tracked_header_recompiles_only_the_affected_object_and_relinks() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    new_project(root);

    let header = root.join("core/a.h");
    let obj_a = root.join("core/a.o");
    let obj_b = root.join("other/b.o");
    let bin = root.join("demo");
    write(&header, "");
    std::thread::sleep(std::time::Duration::from_millis(10));
    write(&obj_a, "");
    write(&obj_b, "");
    write(&bin, "");

    let run_once = |calls_a: Arc<Mutex<u32>>, calls_b: Arc<Mutex<u32>>, calls_link: Arc<Mutex<u32>>| {
        let config = GlobalConfig::default();
        let mut session = BuildSession::new(root.to_path_buf(), &config, 1);

        let a = session.targets.get_unbound_target("core/a.o", None);
        session.targets.bind_target(a, obj_a.clone());
        session.targets.add_action(
            a,
            Arc::new(CountingBuild { tracked_header: Some(header.clone()), calls: calls_a }),
        );

        let b = session.targets.get_unbound_target("other/b.o", None);
        session.targets.bind_target(b, obj_b.clone());
        session.targets.add_action(
            b,
            Arc::new(CountingBuild { tracked_header: None, calls: calls_b }),
        );

        let demo = session.targets.get_unbound_target("demo", None);
        session.targets.bind_target(demo, bin.clone());
        session.targets.depends(&[demo], &[a, b], true);
        session.targets.add_action(
            demo,
            Arc::new(CountingBuild { tracked_header: None, calls: calls_link }),
        );

        phases::run_all(&mut session, &["demo".to_string()], 1).unwrap()
    };

    let (a1, b1, l1) = (Arc::new(Mutex::new(0)), Arc::new(Mutex::new(0)), Arc::new(Mutex::new(0)));
    let first = run_once(a1.clone(), b1.clone(), l1.clone());
    assert_eq!(first.built, 0, "nothing is stale on the first pass");

    std::thread::sleep(std::time::Duration::from_millis(10));
    write(&header, "changed");

    let (a2, b2, l2) = (Arc::new(Mutex::new(0)), Arc::new(Mutex::new(0)), Arc::new(Mutex::new(0)));
    let second = run_once(a2.clone(), b2.clone(), l2.clone());

    assert_eq!(*a2.lock().unwrap(), 1, "the object tracking the edited header recompiles");
    assert_eq!(*b2.lock().unwrap(), 0, "an unrelated object is left alone");
    assert_eq!(*l2.lock().unwrap(), 1, "the link target rebuilds because its dep rebuilt");
    assert_eq!(second.built, 2);
}

#[test]
fn s4_conditional_module_activates_only_when_used() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    new_project(root);
    write(&root.join("a/a.c"), "int a(void) { return 0; }\n");
    write(&root.join("b/b.c"), "int b(void) { return 0; }\n");

    write(
        &root.join("build.toml"),
        r#"
[[module]]
name = "a"
sources = ["a/a.c"]

[[module]]
name = "b"
sources = ["b/b.c"]
use_if = "a"

[[main]]
name = "demo"
module = "a"
"#,
    );

    let config = GlobalConfig::default();
    let mut session = BuildSession::new(root.to_path_buf(), &config, 1);
    loader::load_project(&mut session, root).unwrap();
    session.targets.find("demo").unwrap();
    session.targets.get(session.targets.find("demo").unwrap()).set_wanted(true);

    phases::post_parse(&mut session).unwrap();

    let a = session.modules.find("a").unwrap();
    let b = session.modules.find("b").unwrap();
    session.modules.activate(a);
    phases::post_parse(&mut session).unwrap();

    assert!(session.modules.is_used(b));
}

#[test]
fn s4_conditional_module_stays_unused_without_its_predicate() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    new_project(root);
    write(&root.join("a/a.c"), "int a(void) { return 0; }\n");
    write(&root.join("b/b.c"), "int b(void) { return 0; }\n");

    write(
        &root.join("build.toml"),
        r#"
[[module]]
name = "a"
sources = ["a/a.c"]

[[module]]
name = "b"
sources = ["b/b.c"]
use_if = "a"
"#,
    );

    let config = GlobalConfig::default();
    let mut session = BuildSession::new(root.to_path_buf(), &config, 1);
    loader::load_project(&mut session, root).unwrap();
    phases::post_parse(&mut session).unwrap();

    let b = session.modules.find("b").unwrap();
    assert!(!session.modules.is_used(b));
}

#[test]
fn s5_cycle_is_reported_before_any_action_runs() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    new_project(root);

    let config = GlobalConfig::default();
    let mut session = BuildSession::new(root.to_path_buf(), &config, 1);
    let x = session.targets.make_phony("x");
    let y = session.targets.make_phony("y");
    session.targets.depends(&[x], &[y], false);
    session.targets.depends(&[y], &[x], false);

    let err = phases::run_all(&mut session, &["x".to_string()], 1).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("x") && msg.contains("y"));
}

#[test]
fn s6_fail_fast_drains_queue_without_running_further_actions() {
    use millwright::env::BuildEnv;
    use millwright::target::{Action, TargetId};

    #[derive(Debug)]
    struct Fails;
    impl Action for Fails {
        fn run(&self, _t: TargetId, _env: &dyn BuildEnv) -> bool {
            false
        }
    }

    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    new_project(root);

    let config = GlobalConfig::default();
    let mut session = BuildSession::new(root.to_path_buf(), &config, 1);
    session.fail_fast = true;

    let all = session.targets.make_phony("all");
    let bad = session.targets.make_phony("bad_branch");
    let good = session.targets.make_phony("good_branch");
    session.targets.depends(&[all], &[bad, good], false);
    session.targets.add_action(bad, std::sync::Arc::new(Fails));
    session.targets.add_action(good, std::sync::Arc::new(Rule::noop_shell()));

    let report = phases::run_all(&mut session, &[], 1).unwrap();
    assert!(report.fail_fast_triggered);
}
