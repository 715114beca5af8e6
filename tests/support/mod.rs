//! Shared fixtures for the integration suite: a local bare "origin" plus a
//! clone to stand in for the live repository, and the handful of file
//! layouts (config, patch input) every scenario needs.

use std::path::{Path, PathBuf};
use std::process::Command;

use am_patch::cli::{self, Invocation};
use am_patch::engine::{self, FinalSummary};
use am_patch::logging::{Level, Logger};

fn git(repo: &Path, args: &[&str]) {
    let out = Command::new("git").args(args).current_dir(repo).output().unwrap();
    assert!(
        out.status.success(),
        "git {:?} failed in {}: {}",
        args,
        repo.display(),
        String::from_utf8_lossy(&out.stderr)
    );
}

/// A bare "origin" plus a working clone that plays the part of the live
/// repository the runner operates on. Both temp dirs are held so they're
/// only cleaned up once the fixture drops.
pub struct LiveRepo {
    _origin: tempfile::TempDir,
    live: tempfile::TempDir,
}

impl LiveRepo {
    pub fn path(&self) -> &Path {
        self.live.path()
    }

    pub fn head_sha(&self) -> String {
        let out = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(self.path())
            .output()
            .unwrap();
        String::from_utf8(out.stdout).unwrap().trim().to_string()
    }

    pub fn status_porcelain(&self) -> String {
        let out = Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(self.path())
            .output()
            .unwrap();
        String::from_utf8(out.stdout).unwrap()
    }

    /// Commit `path -> contents` directly to the live repo, as a stand-in
    /// for an unrelated change that landed while a workspace was open.
    pub fn commit_file(&self, path: &str, contents: &str) -> String {
        std::fs::write(self.path().join(path), contents).unwrap();
        git(self.path(), &["add", "-A"]);
        git(self.path(), &["commit", "-q", "-m", &format!("live edit: {path}")]);
        self.head_sha()
    }

    pub fn log_subjects(&self) -> Vec<String> {
        let out = Command::new("git")
            .args(["log", "--format=%s"])
            .current_dir(self.path())
            .output()
            .unwrap();
        String::from_utf8(out.stdout)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// Set up `origin` (bare) and `live` (its clone, with an initial commit on
/// `main` already pushed), with `patches/` gitignored the way a real
/// deployment would configure it - the runner's own log/workspace/lock
/// files live there and must never show up in the live-repo guard's status.
pub fn init_live_repo() -> LiveRepo {
    let origin = tempfile::tempdir().unwrap();
    git(origin.path(), &["init", "-q", "--bare", "-b", "main"]);

    let live = tempfile::tempdir().unwrap();
    let origin_str = origin.path().to_str().unwrap();
    let live_str = live.path().to_str().unwrap();
    Command::new("git")
        .args(["clone", "-q", origin_str, live_str])
        .output()
        .unwrap();

    git(live.path(), &["config", "user.email", "runner@example.com"]);
    git(live.path(), &["config", "user.name", "runner"]);
    std::fs::write(live.path().join("README.md"), "hello\n").unwrap();
    std::fs::write(live.path().join(".gitignore"), "patches/\n").unwrap();
    git(live.path(), &["add", "-A"]);
    git(live.path(), &["commit", "-q", "-m", "init"]);
    git(live.path(), &["push", "-q", "origin", "main"]);

    LiveRepo { _origin: origin, live }
}

/// Write `<repo>/patches/config.toml` with `repo_root` pinned to `repo` and
/// every extra `key = value` TOML line appended verbatim.
pub fn write_config(repo: &Path, extra_lines: &[&str]) -> PathBuf {
    let patch_dir = repo.join("patches");
    std::fs::create_dir_all(&patch_dir).unwrap();
    let config_path = patch_dir.join("config.toml");
    let mut text = format!(
        "repo_root = {:?}\npatch_dir = \"patches\"\ndefault_branch = \"main\"\ngates_order = []\npatch_jail = false\n",
        repo.display()
    );
    for line in extra_lines {
        text.push_str(line);
        text.push('\n');
    }
    std::fs::write(&config_path, text).unwrap();
    config_path
}

/// A minimal unified diff that adds one file with one line of content.
pub fn unified_patch_adding(path: &str, content: &str) -> String {
    format!(
        "diff --git a/{path} b/{path}\nnew file mode 100644\nindex 0000000..1111111\n--- /dev/null\n+++ b/{path}\n@@ -0,0 +1 @@\n+{content}\n"
    )
}

/// A quiet logger writing into a scratch directory, for driving
/// `workspace::ensure_workspace` directly when a test needs to seed a
/// workspace's state ahead of the full `run()` path.
pub fn scratch_logger(dir: &Path) -> Logger {
    std::fs::create_dir_all(dir).unwrap();
    Logger::new(&dir.join("log.txt"), &dir.join("current_log"), Level::Quiet, Level::Quiet).unwrap()
}

pub fn write_patch_input(repo: &Path, issue_id: &str, text: &str) -> PathBuf {
    let patch_dir = repo.join("patches");
    std::fs::create_dir_all(&patch_dir).unwrap();
    let path = patch_dir.join(format!("issue_{issue_id}.patch"));
    std::fs::write(&path, text).unwrap();
    path
}

/// A script-mode patch input: declares `FILES` (the scope it's allowed to
/// touch) and a Python body run with the workspace as its cwd. Tests use
/// this when they need `FILES` to diverge from what the script actually
/// writes, which a unified diff can never do (its declared set is derived
/// from the diff itself).
pub fn write_patch_script(repo: &Path, issue_id: &str, files: &[&str], body: &str) -> PathBuf {
    let patch_dir = repo.join("patches");
    std::fs::create_dir_all(&patch_dir).unwrap();
    let path = patch_dir.join(format!("issue_{issue_id}.py"));
    let files_list = files.iter().map(|f| format!("{f:?}")).collect::<Vec<_>>().join(", ");
    std::fs::write(&path, format!("FILES = [{files_list}]\n{body}\n")).unwrap();
    path
}

/// Run `am-patch <argv...>` against `config_path` end to end and return the
/// final summary, the way the binary's `main` would drive it.
pub fn run(config_path: &Path, argv: &[&str]) -> FinalSummary {
    let mut full = vec!["am-patch", "--config", config_path.to_str().unwrap()];
    full.extend_from_slice(argv);
    let parsed = match cli::parse(full).expect("argv parses") {
        Invocation::Run(parsed) => parsed,
        _ => panic!("expected a run invocation"),
    };
    let resolved = engine::resolve_policy(&parsed).expect("policy resolves");
    engine::execute(&parsed, &resolved)
}
