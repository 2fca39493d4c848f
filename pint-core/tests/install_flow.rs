// pint-core/tests/install_flow.rs
// End-to-end installs against a throwaway prefix with real shell scripts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;
use pint_common::config::Config;
use pint_common::dependency::{Dependency, DependencyTag, Requirement};
use pint_common::error::PintError;
use pint_common::formulary::Formulary;
use pint_common::model::formula::{Formula, CELLAR_ANY};
use pint_common::model::tab::Tab;
use pint_core::build::{IsolatedExecutor, IsolatedJob, JobOutcome, ProcessExecutor, Stage};
use pint_core::check::RequirementChecker;
use pint_core::install::LockCoordinator;
use pint_core::install::orchestrator::POUR_FALLBACK_WARNING;
use pint_core::{InstallOptions, Installer, InterruptState};
use tempfile::TempDir;

const TAG: &str = "test_tag";

struct TestChecker {
    build_tools: bool,
}

impl RequirementChecker for TestChecker {
    fn check_requirement(&self, _requirement: &Requirement) -> bool {
        true
    }

    fn has_build_tools(&self) -> bool {
        self.build_tools
    }
}

struct Prefix {
    dir: TempDir,
    config: Config,
}

impl Prefix {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_prefix(dir.path().join("prefix"));
        config.bottle_tag = TAG.to_string();
        fs::create_dir_all(&config.cache_dir).unwrap();
        Self { dir, config }
    }

    fn scripts_dir(&self) -> PathBuf {
        let dir = self.dir.path().join("scripts");
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn script(&self, file: &str, body: &str) -> PathBuf {
        let path = self.scripts_dir().join(file);
        fs::write(&path, body).unwrap();
        path
    }

    /// A script installing `bin/<name>` into the keg.
    fn good_build(&self, name: &str) -> PathBuf {
        self.script(
            &format!("{name}-install.sh"),
            &format!(
                "set -e\nmkdir -p \"$PINT_KEG/bin\"\necho 'echo {name}' > \"$PINT_KEG/bin/{name}\"\n"
            ),
        )
    }

    fn failing_build(&self, name: &str) -> PathBuf {
        self.script(
            &format!("{name}-broken.sh"),
            "mkdir -p \"$PINT_KEG/bin\"\necho compiling\nexit 1\n",
        )
    }

    fn source_archive(&self, name: &str, version: &str) {
        fs::write(
            self.config.cache_dir.join(format!("{name}--{version}.tar.gz")),
            b"source",
        )
        .unwrap();
    }

    fn bottle(&self, name: &str, version: &str, files: &[&str]) {
        let path = self
            .config
            .cache_dir
            .join(format!("{name}--{version}.{TAG}.bottle.tar.gz"));
        let gz = GzEncoder::new(fs::File::create(path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        for file in files {
            let body = format!("echo {name}\n");
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{name}/{version}/{file}"), body.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn corrupt_bottle(&self, name: &str, version: &str) {
        fs::write(
            self.config
                .cache_dir
                .join(format!("{name}--{version}.{TAG}.bottle.tar.gz")),
            b"definitely not gzip",
        )
        .unwrap();
    }

    fn installer(&self, formulae: Vec<Formula>) -> Installer {
        self.installer_with(self.config.clone(), formulae, true)
    }

    fn installer_with(&self, config: Config, formulae: Vec<Formula>, build_tools: bool) -> Installer {
        Installer::new(config)
            .with_formulary(Formulary::from_formulae(formulae))
            .with_checker(Arc::new(TestChecker { build_tools }))
    }

    fn keg(&self, name: &str, version: &str) -> PathBuf {
        self.config.formula_keg_path(name, version)
    }
}

/// Runs jobs through the real executor, noting which names are locked while
/// each build runs.
struct LockWatcher {
    inner: ProcessExecutor,
    locks: Arc<LockCoordinator>,
    seen: Mutex<Vec<(String, Vec<String>)>>,
}

impl IsolatedExecutor for LockWatcher {
    fn run_isolated(&self, job: &IsolatedJob) -> pint_common::error::Result<JobOutcome> {
        if job.stage == Stage::Build {
            self.seen.lock().unwrap().push((job.formula.clone(), self.locks.held()));
        }
        self.inner.run_isolated(job)
    }
}

fn source_formula(name: &str, version: &str, script: PathBuf) -> Formula {
    Formula {
        install: Some(script),
        ..Formula::new(name, version)
    }
}

fn read_tab(keg: &Path) -> Tab {
    Tab::read(keg).unwrap().expect("keg has a receipt")
}

#[test]
fn source_build_installs_links_and_records_receipt() {
    let prefix = Prefix::new();
    prefix.source_archive("hello", "1.0");
    let installer = prefix.installer(vec![source_formula("hello", "1.0", prefix.good_build("hello"))]);

    let outcome = installer.install("hello", InstallOptions::on_request()).unwrap();

    assert!(!outcome.poured);
    assert!(outcome.linked);
    assert!(!outcome.joined);
    let keg = prefix.keg("hello", "1.0");
    assert_eq!(outcome.keg, keg);
    assert_eq!(
        fs::read_link(prefix.config.bin_dir().join("hello")).unwrap(),
        keg.join("bin/hello")
    );
    let tab = read_tab(&keg);
    assert!(tab.installed_on_request);
    assert!(!tab.installed_as_dependency);
    assert!(!tab.poured_from_bottle);
    assert!(!installer.locks().is_locked("hello"));
}

#[test]
fn failed_build_leaves_no_keg_behind() {
    let prefix = Prefix::new();
    prefix.source_archive("broken", "1.0");
    let installer = prefix.installer(vec![source_formula("broken", "1.0", prefix.failing_build("broken"))]);

    let err = installer.install("broken", InstallOptions::on_request()).unwrap_err();

    assert_eq!(err.kind(), "BuildError");
    assert!(!prefix.keg("broken", "1.0").exists());
    assert!(!prefix.config.formula_rack_path("broken").exists());
    assert!(fs::symlink_metadata(prefix.config.formula_opt_path("broken")).is_err());
    assert!(!installer.locks().is_locked("broken"));
    let log = prefix.config.logs_dir().join("broken/build.log");
    assert!(fs::read_to_string(log).unwrap().contains("compiling"));
}

#[test]
fn failed_post_install_keeps_the_keg() {
    let prefix = Prefix::new();
    prefix.source_archive("svc", "2.1");
    let formula = Formula {
        post_install: Some(prefix.script("svc-post.sh", "exit 2\n")),
        ..source_formula("svc", "2.1", prefix.good_build("svc"))
    };
    let installer = prefix.installer(vec![formula]);

    let outcome = installer.install("svc", InstallOptions::on_request()).unwrap();

    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.starts_with("post-install step of svc failed")));
    assert!(outcome.linked);
    let keg = installer.kegs().get_installed_keg("svc").unwrap().unwrap();
    assert_eq!(keg.version_str, "2.1");
    assert!(Tab::path_in(&keg.path).is_file());
}

#[test]
fn repeated_request_in_one_run_joins_the_first() {
    let prefix = Prefix::new();
    prefix.source_archive("hello", "1.0");
    let installer = prefix.installer(vec![source_formula("hello", "1.0", prefix.good_build("hello"))]);
    let mut run = installer.run();

    let first = run.install("hello", InstallOptions::on_request()).unwrap();
    let second = run.install("hello", InstallOptions::on_request()).unwrap();

    assert!(!first.joined);
    assert!(second.joined);
    assert_eq!(second.keg, first.keg);
    assert!(run.is_attempted("hello"));
}

#[test]
fn dependencies_are_installed_first_and_marked() {
    let prefix = Prefix::new();
    prefix.source_archive("lib", "1.0");
    prefix.source_archive("app", "3.0");
    let app = source_formula("app", "3.0", prefix.good_build("app"))
        .depends_on(Dependency::new_runtime("lib"));
    let installer = prefix.installer(vec![app, source_formula("lib", "1.0", prefix.good_build("lib"))]);

    let mut run = installer.run();
    let outcome = run.install("app", InstallOptions::on_request()).unwrap();

    let lib_tab = read_tab(&prefix.keg("lib", "1.0"));
    assert!(lib_tab.installed_as_dependency);
    assert!(!lib_tab.installed_on_request);
    let app_tab = outcome.tab.unwrap();
    assert_eq!(app_tab.runtime_dependencies.len(), 1);
    assert_eq!(app_tab.runtime_dependencies[0].full_name, "lib");
    assert!(app_tab.runtime_dependencies[0].declared_directly);
    assert!(run.completed("lib").is_some());
}

#[test]
fn build_only_dependency_is_skipped_when_pouring() {
    let prefix = Prefix::new();
    prefix.bottle("tool", "1.0", &["bin/tool"]);
    let tool = Formula::new("tool", "1.0")
        .with_bottle(TAG, CELLAR_ANY)
        .depends_on(Dependency::new_with_tags("cmake", DependencyTag::BUILD));
    let installer = prefix.installer(vec![tool, Formula::new("cmake", "3.29")]);

    let outcome = installer.install("tool", InstallOptions::on_request()).unwrap();

    assert!(outcome.poured);
    assert!(!prefix.config.formula_rack_path("cmake").exists());
    assert_eq!(
        fs::read_to_string(prefix.keg("tool", "1.0").join("bin/tool")).unwrap(),
        "echo tool\n"
    );
    assert!(read_tab(&prefix.keg("tool", "1.0")).poured_from_bottle);
}

#[test]
fn broken_bottle_falls_back_to_source_build() {
    let prefix = Prefix::new();
    prefix.corrupt_bottle("jq", "1.7");
    prefix.source_archive("jq", "1.7");
    let jq = source_formula("jq", "1.7", prefix.good_build("jq")).with_bottle(TAG, CELLAR_ANY);
    let installer = prefix.installer(vec![jq]);

    let outcome = installer.install("jq", InstallOptions::on_request()).unwrap();

    assert!(!outcome.poured);
    assert!(outcome.warnings.iter().any(|w| w == POUR_FALLBACK_WARNING));
    assert!(prefix.keg("jq", "1.7").join("bin/jq").is_file());
}

#[test]
fn developer_mode_makes_pour_failures_fatal() {
    let prefix = Prefix::new();
    prefix.corrupt_bottle("jq", "1.7");
    prefix.source_archive("jq", "1.7");
    let mut config = prefix.config.clone();
    config.developer = true;
    let jq = source_formula("jq", "1.7", prefix.good_build("jq")).with_bottle(TAG, CELLAR_ANY);
    let installer = prefix.installer_with(config, vec![jq], true);

    assert!(installer.install("jq", InstallOptions::on_request()).is_err());
    assert!(!prefix.keg("jq", "1.7").exists());
}

#[test]
fn circular_dependencies_are_reported_before_anything_runs() {
    let prefix = Prefix::new();
    let a = source_formula("a", "1", prefix.good_build("a")).depends_on(Dependency::new_runtime("b"));
    let b = source_formula("b", "1", prefix.good_build("b")).depends_on(Dependency::new_runtime("a"));
    let installer = prefix.installer(vec![a, b]);

    match installer.install("a", InstallOptions::on_request()) {
        Err(PintError::CircularDependency { cycle }) => {
            assert_eq!(cycle.first(), cycle.last());
            assert!(cycle.contains(&"b".to_string()));
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
    assert!(!prefix.config.cellar_dir().exists());
}

#[test]
fn missing_toolchain_lists_every_source_build() {
    let prefix = Prefix::new();
    let app = source_formula("app", "1", prefix.good_build("app")).depends_on(Dependency::new_runtime("lib"));
    let lib = source_formula("lib", "1", prefix.good_build("lib"));
    let installer = prefix.installer_with(prefix.config.clone(), vec![app, lib], false);

    match installer.install("app", InstallOptions::on_request()) {
        Err(PintError::BuildToolsError(names)) => assert_eq!(names, vec!["app", "lib"]),
        other => panic!("expected BuildToolsError, got {other:?}"),
    }
}

#[test]
fn pending_interrupt_stops_before_work_starts() {
    let prefix = Prefix::new();
    prefix.source_archive("hello", "1.0");
    let interrupt = InterruptState::new();
    interrupt.raise();
    let installer = prefix
        .installer(vec![source_formula("hello", "1.0", prefix.good_build("hello"))])
        .with_interrupt(Arc::clone(&interrupt));

    let err = installer.install("hello", InstallOptions::on_request()).unwrap_err();
    assert!(matches!(err, PintError::Interrupted));
    assert!(!prefix.keg("hello", "1.0").exists());
}

#[test]
fn failed_reinstall_restores_the_previous_keg() {
    let prefix = Prefix::new();
    prefix.source_archive("hello", "1.0");
    let good = prefix.installer(vec![source_formula("hello", "1.0", prefix.good_build("hello"))]);
    good.install("hello", InstallOptions::on_request()).unwrap();
    let before = read_tab(&prefix.keg("hello", "1.0"));

    let broken = prefix.installer(vec![source_formula("hello", "1.0", prefix.failing_build("hello"))]);
    let options = InstallOptions {
        reinstall: true,
        ..InstallOptions::on_request()
    };
    assert!(broken.install("hello", options).is_err());

    let keg = prefix.keg("hello", "1.0");
    assert_eq!(read_tab(&keg), before);
    assert!(keg.join("bin/hello").is_file());
    assert!(prefix.config.bin_dir().join("hello").exists());
    assert!(!keg.with_file_name("1.0.reinstall").exists());
}

#[test]
fn failed_dependency_upgrade_relinks_the_old_version() {
    let prefix = Prefix::new();
    prefix.source_archive("lib", "1.0");
    let old = prefix.installer(vec![source_formula("lib", "1.0", prefix.good_build("lib"))]);
    old.install("lib", InstallOptions::on_request()).unwrap();

    prefix.source_archive("lib", "2.0");
    prefix.source_archive("app", "1.0");
    let app = source_formula("app", "1.0", prefix.good_build("app")).depends_on(Dependency::new_runtime("lib"));
    let lib = source_formula("lib", "2.0", prefix.failing_build("lib"));
    let installer = prefix.installer(vec![app, lib]);

    let err = installer.install("app", InstallOptions::on_request()).unwrap_err();
    assert_eq!(err.kind(), "BuildError");

    let linked = installer.kegs().get_linked_keg("lib").unwrap().unwrap();
    assert_eq!(linked.version_str, "1.0");
    assert!(prefix.config.bin_dir().join("lib").exists());
    assert!(!prefix.keg("lib", "2.0").exists());
    assert!(!prefix.keg("app", "1.0").exists());
}

#[test]
fn conflicting_linked_formula_blocks_install() {
    let prefix = Prefix::new();
    prefix.source_archive("gawk", "5.3");
    let gawk = source_formula("gawk", "5.3", prefix.good_build("gawk"));
    prefix.installer(vec![gawk.clone()])
        .install("gawk", InstallOptions::on_request())
        .unwrap();

    let mawk = Formula {
        conflicts_with: vec!["gawk".into()],
        ..source_formula("mawk", "1.3", prefix.good_build("mawk"))
    };
    let installer = prefix.installer(vec![gawk, mawk]);
    let err = installer.install("mawk", InstallOptions::on_request()).unwrap_err();
    assert_eq!(err.kind(), "FormulaConflictError");
    assert_eq!(err.remediation().as_deref(), Some("pint unlink gawk"));
}

#[test]
fn failed_dependency_fails_later_dependents() {
    let prefix = Prefix::new();
    for name in ["a", "b", "d"] {
        prefix.source_archive(name, "1.0");
    }
    let a = source_formula("a", "1.0", prefix.good_build("a")).depends_on(Dependency::new_runtime("d"));
    let b = source_formula("b", "1.0", prefix.good_build("b")).depends_on(Dependency::new_runtime("d"));
    let d = source_formula("d", "1.0", prefix.failing_build("d"));
    let installer = prefix.installer(vec![a, b, d]);
    let mut run = installer.run();

    let first = run.install("a", InstallOptions::on_request()).unwrap_err();
    let second = run.install("b", InstallOptions::on_request()).unwrap_err();

    assert_eq!(first.kind(), "BuildError");
    assert_eq!(second.kind(), "BuildError");
    assert!(run.completed("b").is_none());
    assert!(!prefix.keg("b", "1.0").exists());
    assert!(!prefix.keg("d", "1.0").exists());
    assert!(run.failure("d").is_some());
}

#[test]
fn root_build_holds_locks_for_root_and_plan() {
    let prefix = Prefix::new();
    for (name, version) in [("app", "3.0"), ("lib", "1.0"), ("zlib", "1.3")] {
        prefix.source_archive(name, version);
    }
    let app = source_formula("app", "3.0", prefix.good_build("app"))
        .depends_on(Dependency::new_runtime("zlib"))
        .depends_on(Dependency::new_runtime("lib"));
    let lib = source_formula("lib", "1.0", prefix.good_build("lib")).depends_on(Dependency::new_runtime("zlib"));
    let zlib = source_formula("zlib", "1.3", prefix.good_build("zlib"));
    let installer = prefix.installer(vec![app, lib, zlib]);
    let locks = Arc::clone(installer.locks());
    let watcher = Arc::new(LockWatcher {
        inner: ProcessExecutor::new(prefix.config.logs_dir()),
        locks: Arc::clone(&locks),
        seen: Mutex::new(Vec::new()),
    });
    let installer = installer.with_executor(watcher.clone());

    installer.install("app", InstallOptions::on_request()).unwrap();

    let seen = watcher.seen.lock().unwrap();
    let (_, held) = seen.iter().find(|(formula, _)| formula == "app").unwrap();
    assert_eq!(held, &vec!["app".to_string(), "lib".to_string(), "zlib".to_string()]);
    assert!(seen.iter().all(|(_, held)| held == &vec!["app".to_string(), "lib".to_string(), "zlib".to_string()]));
    assert!(locks.held().is_empty());
}

#[test]
fn dependency_receipt_records_its_runtime_closure() {
    let prefix = Prefix::new();
    for (name, version) in [("app", "3.0"), ("lib", "1.0"), ("zlib", "1.3")] {
        prefix.source_archive(name, version);
    }
    let app = source_formula("app", "3.0", prefix.good_build("app")).depends_on(Dependency::new_runtime("lib"));
    let lib = source_formula("lib", "1.0", prefix.good_build("lib"))
        .depends_on(Dependency::new_runtime("zlib"))
        .depends_on(Dependency::new_with_tags("cmake", DependencyTag::BUILD));
    let installer = prefix.installer(vec![
        app,
        lib,
        source_formula("zlib", "1.3", prefix.good_build("zlib")),
        source_formula("cmake", "3.29", prefix.good_build("cmake")),
    ]);
    prefix.source_archive("cmake", "3.29");

    let outcome = installer.install("app", InstallOptions::on_request()).unwrap();

    let lib_deps = read_tab(&prefix.keg("lib", "1.0")).runtime_dependencies;
    assert_eq!(lib_deps.len(), 1);
    assert_eq!(lib_deps[0].full_name, "zlib");
    assert!(lib_deps[0].declared_directly);

    let app_deps = outcome.tab.unwrap().runtime_dependencies;
    let names: Vec<_> = app_deps.iter().map(|d| (d.full_name.as_str(), d.declared_directly)).collect();
    assert_eq!(names, vec![("lib", true), ("zlib", false)]);
}
