//! External codec tools
//!
//! Every transformation is delegated to a command line tool. `Toolbox` turns
//! a step into a concrete `ToolInvocation`; a `ToolRunner` executes it. The
//! production runner spawns real processes, tests substitute their own.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::ToolsConfig;
use crate::constants::{JP2_RATE, JPEG_QUALITY, JXR_QUALITY, PNG_QUALITY_RANGE, WEBP_QUALITY};

/// Longest stderr excerpt kept in an error
const MAX_STDERR_LEN: usize = 2048;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}: {stderr}", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {}ms", .timeout.as_millis())]
    TimedOut { program: String, timeout: Duration },

    #[error("output {} unavailable: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One transformation step of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolStep {
    ResizePng,
    ResizeJpg,
    QuantizePng,
    RecompressJpg,
    EncodeWebp,
    EncodeJp2,
    FlattenBmp,
    EncodeJxr,
}

/// A fully resolved tool command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub step: ToolStep,
    pub program: String,
    pub args: Vec<String>,
    /// File the step produces
    pub output: PathBuf,
    /// The tool writes its result to stdout instead of to `output` directly
    pub stdout_to_output: bool,
}

fn arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Builds invocations from the configured tool programs.
#[derive(Debug, Clone, Default)]
pub struct Toolbox {
    tools: ToolsConfig,
}

impl Toolbox {
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }

    fn invocation(
        &self,
        step: ToolStep,
        program: &str,
        args: Vec<String>,
        output: &Path,
    ) -> ToolInvocation {
        ToolInvocation {
            step,
            program: program.to_string(),
            args,
            output: output.to_path_buf(),
            stdout_to_output: false,
        }
    }

    /// Full quality PNG rendition at `width`
    pub fn resize_png(&self, src: &Path, width: u32, out: &Path) -> ToolInvocation {
        let args = vec![arg(src), "-resize".into(), width.to_string(), arg(out)];
        self.invocation(ToolStep::ResizePng, &self.tools.convert, args, out)
    }

    /// Quality 100 JPEG rendition at `width`
    pub fn resize_jpg(&self, src: &Path, width: u32, out: &Path) -> ToolInvocation {
        let args = vec![
            arg(src),
            "-quality".into(),
            "100".into(),
            "-resize".into(),
            width.to_string(),
            arg(out),
        ];
        self.invocation(ToolStep::ResizeJpg, &self.tools.convert, args, out)
    }

    pub fn quantize_png(&self, src: &Path, out: &Path) -> ToolInvocation {
        let args = vec![
            "--force".into(),
            format!("--quality={}", PNG_QUALITY_RANGE),
            arg(src),
            "--output".into(),
            arg(out),
        ];
        self.invocation(ToolStep::QuantizePng, &self.tools.pngquant, args, out)
    }

    pub fn recompress_jpg(&self, src: &Path, out: &Path) -> ToolInvocation {
        let args = vec![
            format!("-m{}", JPEG_QUALITY),
            "--strip-all".into(),
            "--stdout".into(),
            "--quiet".into(),
            arg(src),
        ];
        let mut invocation =
            self.invocation(ToolStep::RecompressJpg, &self.tools.jpegoptim, args, out);
        invocation.stdout_to_output = true;
        invocation
    }

    pub fn encode_webp(&self, src: &Path, out: &Path) -> ToolInvocation {
        let args = vec![
            "-quiet".into(),
            "-q".into(),
            WEBP_QUALITY.to_string(),
            arg(src),
            "-o".into(),
            arg(out),
        ];
        self.invocation(ToolStep::EncodeWebp, &self.tools.cwebp, args, out)
    }

    pub fn encode_jp2(&self, src: &Path, out: &Path) -> ToolInvocation {
        let args = vec![
            arg(src),
            "-format".into(),
            "jp2".into(),
            "-define".into(),
            format!("jp2:rate={}", JP2_RATE),
            arg(out),
        ];
        self.invocation(ToolStep::EncodeJp2, &self.tools.convert, args, out)
    }

    /// Alpha-free RGB bitmap, the only input the JPEG-XR encoder accepts
    pub fn flatten_bmp(&self, src: &Path, out: &Path) -> ToolInvocation {
        let args = vec![
            arg(src),
            "-alpha".into(),
            "off".into(),
            "-colorspace".into(),
            "RGB".into(),
            arg(out),
        ];
        self.invocation(ToolStep::FlattenBmp, &self.tools.convert, args, out)
    }

    pub fn encode_jxr(&self, bmp: &Path, out: &Path) -> ToolInvocation {
        let args = vec![
            "-i".into(),
            arg(bmp),
            "-o".into(),
            arg(out),
            "-q".into(),
            JXR_QUALITY.into(),
        ];
        self.invocation(ToolStep::EncodeJxr, &self.tools.jxrenc, args, out)
    }
}

/// Executes tool invocations
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation) -> Result<(), ToolError>;
}

/// Runs invocations as child processes.
///
/// Children are killed when the run future is dropped, so cancelling a
/// request (or a sibling step failing) also stops its tools.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

fn excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= MAX_STDERR_LEN {
        return text.to_string();
    }
    let mut start = text.len() - MAX_STDERR_LEN;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<(), ToolError> {
        let program = &invocation.program;

        let mut cmd = Command::new(program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if invocation.stdout_to_output {
            let output_err = |source| ToolError::Output {
                path: invocation.output.clone(),
                source,
            };
            let file = tokio::fs::File::create(&invocation.output)
                .await
                .map_err(output_err)?;
            cmd.stdout(Stdio::from(file.into_std().await));
        } else {
            cmd.stdout(Stdio::null());
        }

        tracing::debug!(program = %program, args = ?invocation.args, "Running codec tool");

        let child = cmd.spawn().map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

        let output = match self.timeout {
            Some(limit) => timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ToolError::TimedOut {
                    program: program.clone(),
                    timeout: limit,
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(ToolError::Exit {
                program: program.clone(),
                code: output.status.code(),
                stderr: excerpt(&output.stderr),
            });
        }

        Ok(())
    }
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Resolve a program the way the shell would: paths are checked directly,
/// bare names are searched on `PATH`.
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|full| is_executable(full))
}

/// Check every configured tool. Returns the programs that could not be found.
pub fn check_tools(tools: &ToolsConfig) -> Result<(), Vec<String>> {
    let missing: Vec<String> = tools
        .programs()
        .iter()
        .filter(|program| find_program(program).is_none())
        .map(|program| program.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing)
    }
}
