//! patch::script
//!
//! Script-mode patch execution (§4.9): syntax/ASCII precheck, copy into the
//! workspace at `.am_patch/patch_exec.py`, then run under an optional
//! filesystem jail (`bwrap`) with the workspace bound writable at `/repo`
//! and everything else read-only.

use std::path::Path;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::core::{Category, RunnerError, Stage};
use crate::logging::Logger;

/// Ascii check (if requested) + a best-effort "defines `FILES = [...]` at
/// top level" check. Full syntax validation of the patch script's source
/// language is out of scope for this facade - it runs as an opaque
/// subprocess - so this only confirms the one structural contract the
/// pipeline actually depends on.
pub fn precheck_patch_script(path: &Path, ascii_only: bool) -> Result<(), RunnerError> {
    let bytes = std::fs::read(path).map_err(|e| {
        RunnerError::new(
            Stage::Preflight,
            Category::Manifest,
            format!("failed to read patch script: {e}"),
        )
    })?;

    if ascii_only && !bytes.is_ascii() {
        return Err(RunnerError::new(
            Stage::Preflight,
            Category::PatchAscii,
            format!("patch script contains non-ascii characters: {}", path.display()),
        ));
    }

    let text = String::from_utf8_lossy(&bytes);
    let re = Regex::new(r"(?m)^FILES\s*=\s*\[").expect("valid regex");
    if !re.is_match(&text) {
        return Err(RunnerError::new(
            Stage::Preflight,
            Category::PatchFiles,
            "patch script must define FILES=[...] at top-level",
        ));
    }
    Ok(())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = crate::core::fsutil::tmp_path_for_atomic_write(path);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

fn find_bwrap() -> Option<String> {
    if let Ok(env) = std::env::var("AM_PATCH_BWRAP") {
        if !env.is_empty() {
            return Some(env);
        }
    }
    which_bwrap()
}

fn which_bwrap() -> Option<String> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join("bwrap"))
            .find(|p| p.is_file())
            .map(|p| p.to_string_lossy().into_owned())
    })
}

fn build_bwrap_cmd(workspace_repo: &Path, python_argv: &[String], unshare_net: bool) -> Result<Vec<String>, RunnerError> {
    let bwrap = find_bwrap().ok_or_else(|| {
        RunnerError::new(
            Stage::Preflight,
            Category::Other("BWRAP".to_string()),
            "bwrap not found (install bubblewrap or disable patch_jail)",
        )
    })?;

    let mut cmd = vec![bwrap, "--die-with-parent".to_string(), "--new-session".to_string()];
    if unshare_net {
        cmd.push("--unshare-net".to_string());
    }
    cmd.extend(
        ["--proc", "/proc", "--dev", "/dev", "--tmpfs", "/tmp"]
            .map(String::from),
    );
    for p in ["/usr", "/bin", "/sbin", "/lib", "/lib64", "/etc"] {
        if Path::new(p).exists() {
            cmd.push("--ro-bind".to_string());
            cmd.push(p.to_string());
            cmd.push(p.to_string());
        }
    }
    cmd.push("--bind".to_string());
    cmd.push(workspace_repo.to_string_lossy().into_owned());
    cmd.push("/repo".to_string());
    cmd.push("--chdir".to_string());
    cmd.push("/repo".to_string());
    cmd.push("--".to_string());
    cmd.extend(python_argv.iter().cloned());
    Ok(cmd)
}

/// Copy `patch_script` into the workspace and execute it, recording its
/// SHA-256, with `cwd` set to the workspace root.
pub fn run_patch(
    logger: &mut Logger,
    patch_script: &Path,
    workspace_repo: &Path,
    patch_jail: bool,
    patch_jail_unshare_net: bool,
) -> Result<(), RunnerError> {
    let src = patch_script
        .canonicalize()
        .unwrap_or_else(|_| patch_script.to_path_buf());
    let data = std::fs::read(&src).map_err(|e| {
        RunnerError::new(Stage::Patch, Category::Internal, format!("failed to read patch script: {e}"))
    })?;
    let digest = sha256_hex(&data);

    let exec_path = workspace_repo.join(".am_patch").join("patch_exec.py");
    write_atomic(&exec_path, &data).map_err(|e| {
        RunnerError::new(Stage::Patch, Category::Internal, format!("failed to stage patch script: {e}"))
    })?;

    logger.section("PATCH SOURCE");
    logger.line(&format!("patch_source_path={}", src.display()));
    logger.line(&format!("patch_source_sha256={digest}"));

    logger.section("PATCH EXEC (PREP)");
    logger.line(&format!("patch_exec_path={}", exec_path.display()));
    logger.line(&format!("patch_jail={patch_jail}"));

    let rel_exec = exec_path
        .strip_prefix(workspace_repo)
        .unwrap_or(&exec_path)
        .to_string_lossy()
        .into_owned();

    let output = if patch_jail {
        let python_argv = vec!["python3".to_string(), format!("/repo/{rel_exec}")];
        let cmd = build_bwrap_cmd(workspace_repo, &python_argv, patch_jail_unshare_net)?;
        logger.section("PATCH EXEC (JAILED)");
        logger.line(&format!("cmd={}", cmd.join(" ")));
        logger.run_logged(&cmd, Some(workspace_repo), &[])
    } else {
        logger.section("PATCH EXEC");
        logger.run_logged(
            &["python3".to_string(), exec_path.to_string_lossy().into_owned()],
            Some(workspace_repo),
            &[],
        )
    };

    if !output.ok() {
        return Err(RunnerError::new(
            Stage::Patch,
            Category::Internal,
            format!("patch script failed (rc={})", output.returncode),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precheck_requires_files_assignment() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("issue_1.py");
        std::fs::write(&script, "def run():\n    pass\n").unwrap();
        let err = precheck_patch_script(&script, false).unwrap_err();
        assert_eq!(err.category, Category::PatchFiles);
    }

    #[test]
    fn precheck_rejects_non_ascii_when_required() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("issue_1.py");
        std::fs::write(&script, "FILES = [\"a\"]\n# café\n").unwrap();
        let err = precheck_patch_script(&script, true).unwrap_err();
        assert_eq!(err.category, Category::PatchAscii);
    }

    #[test]
    fn precheck_passes_valid_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("issue_1.py");
        std::fs::write(&script, "FILES = [\"a.txt\"]\n").unwrap();
        assert!(precheck_patch_script(&script, true).is_ok());
    }
}
