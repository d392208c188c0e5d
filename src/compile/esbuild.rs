//! esbuild invoked as an external program.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use super::cache::{CompileError, Compiler};

pub struct ExternalCompiler {
    program: PathBuf,
    scripts_dir: PathBuf,
}

impl ExternalCompiler {
    /// Resolve `name` from `scripts/node_modules/.bin`, then PATH.
    pub fn new(name: &str, scripts_dir: impl Into<PathBuf>) -> Self {
        let scripts_dir = scripts_dir.into();
        let local = scripts_dir.join("node_modules").join(".bin").join(name);
        let program = if local.exists() {
            local
        } else {
            which::which(name).unwrap_or_else(|_| PathBuf::from(name))
        };
        debug!(program = %program.display(), "Using compiler");
        Self {
            program,
            scripts_dir,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn args(&self, source: &Path, artifact: &Path) -> Vec<String> {
        let mut args = vec![
            "--loader=ts".to_string(),
            "--format=cjs".to_string(),
            "--platform=node".to_string(),
            format!("--sourcefile={}", source.display()),
            format!("--outfile={}", artifact.display()),
            "--log-level=error".to_string(),
        ];
        let tsconfig = self.scripts_dir.join("tsconfig.json");
        if tsconfig.exists() {
            args.push(format!("--tsconfig={}", tsconfig.display()));
        }
        args
    }
}

impl Compiler for ExternalCompiler {
    fn compile(&self, source: &Path, contents: &str, artifact: &Path) -> Result<(), CompileError> {
        let mut child = Command::new(&self.program)
            .args(self.args(source, artifact))
            .current_dir(&self.scripts_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                CompileError::new(format!("Failed to spawn '{}': {}", self.program.display(), e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(contents.as_bytes()) {
                drop(stdin);
                let _ = child.kill();
                let _ = child.wait();
                return Err(CompileError::new(format!("Failed to write to compiler: {}", e)));
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| CompileError::new(format!("Compiler did not finish: {}", e)))?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(CompileError::new(if stderr.is_empty() {
            format!("Compiler exited with status {}", output.status)
        } else {
            stderr
        }))
    }
}
