// pint-core/src/check/devtools.rs
// Probing the host for compilers and platform versions.

use std::env;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use pint_common::error::{PintError, Result};
use tracing::debug;

/// Locates a C/C++ compiler, honouring `CC`/`CXX` first.
pub fn find_compiler(name: &str) -> Result<PathBuf> {
    let env_var_name = match name {
        "cc" => "CC",
        "c++" | "cxx" => "CXX",
        _ => "",
    };
    if !env_var_name.is_empty() {
        if let Ok(compiler_path) = env::var(env_var_name) {
            let path = PathBuf::from(compiler_path);
            if path.is_file() {
                debug!("Using compiler from env var {}: {}", env_var_name, path.display());
                return Ok(path);
            }
            debug!(
                "Env var {} points to non-existent file: {}",
                env_var_name,
                path.display()
            );
        }
    }

    if cfg!(target_os = "macos") {
        if let Some(path) = run_for_line("xcrun", &["--find", name]).map(PathBuf::from) {
            if path.is_file() {
                debug!("Found compiler via xcrun: {}", path.display());
                return Ok(path);
            }
        }
    }

    debug!("Falling back to searching PATH for '{name}'");
    which::which(name)
        .map_err(|e| PintError::NotFound(format!("compiler '{name}' on PATH: {e}")))
}

/// True when a C compiler can be found.
pub fn has_build_toolchain() -> bool {
    find_compiler("cc").is_ok()
}

/// `major.minor` of the running macOS, `None` elsewhere.
pub fn macos_version() -> Option<String> {
    if !cfg!(target_os = "macos") {
        return None;
    }
    let full = run_for_line("sw_vers", &["-productVersion"])?;
    let parts: Vec<&str> = full.split('.').collect();
    let short = if parts.len() >= 2 {
        format!("{}.{}", parts[0], parts[1])
    } else {
        full.clone()
    };
    debug!("Found macOS version: {full} (short: {short})");
    Some(short)
}

/// Installed Xcode version, parsed from `xcodebuild -version`.
pub fn xcode_version() -> Option<String> {
    if !cfg!(target_os = "macos") {
        return None;
    }
    let first = run_for_line("xcodebuild", &["-version"])?;
    first.strip_prefix("Xcode ").map(|v| v.trim().to_string())
}

/// First line of a successful command's stdout.
fn run_for_line(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .output();
    match output {
        Ok(out) if out.status.success() => {
            let stdout = String::from_utf8_lossy(&out.stdout);
            let line = stdout.lines().next().unwrap_or("").trim().to_string();
            (!line.is_empty()).then_some(line)
        }
        Ok(out) => {
            debug!(
                "{} {:?} failed: {}",
                program,
                args,
                String::from_utf8_lossy(&out.stderr).trim()
            );
            None
        }
        Err(e) => {
            debug!("Failed to execute {}: {}", program, e);
            None
        }
    }
}
