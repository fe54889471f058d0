//! 旧格式转码：HEIC→JPEG 与 MOV→MP4，均通过外部命令完成。
//!
//! 成功时删除源文件并返回新文件名；任何失败都保留源文件，记录日志，返回原文件名。

use std::fmt;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::Args;
use crate::storage::{Storage, extension_of};

const STDERR_TAIL_BYTES: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LegacyFormat {
    Heic,
    Mov,
}

impl LegacyFormat {
    pub fn detect(filename: &str) -> Option<Self> {
        match extension_of(filename)?.as_str() {
            "heic" => Some(LegacyFormat::Heic),
            "mov" => Some(LegacyFormat::Mov),
            _ => None,
        }
    }

    pub fn target_extension(self) -> &'static str {
        match self {
            LegacyFormat::Heic => "jpg",
            LegacyFormat::Mov => "mp4",
        }
    }

    /// 只替换最后一个扩展名。
    pub fn target_name(self, filename: &str) -> String {
        let stem = match filename.rfind('.') {
            Some(index) => &filename[..index],
            None => filename,
        };
        format!("{stem}.{}", self.target_extension())
    }
}

impl fmt::Display for LegacyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegacyFormat::Heic => write!(f, "heic"),
            LegacyFormat::Mov => write!(f, "mov"),
        }
    }
}

/// 外部命令模板，参数中的 `{input}` 与 `{output}` 会被替换为实际文件路径。
#[derive(Clone, Debug)]
pub struct ConvertCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ConvertCommand {
    pub fn parse(program: &str, args: &str) -> Self {
        Self {
            program: program.to_string(),
            args: args.split_whitespace().map(str::to_string).collect(),
        }
    }

    fn build(&self, input: &Path, output: &Path) -> Command {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        let mut command = Command::new(&self.program);
        for arg in &self.args {
            command.arg(arg.replace("{input}", &input).replace("{output}", &output));
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[derive(Debug)]
pub enum ConversionError {
    InvalidName(String),
    DestinationExists(String),
    Spawn(io::Error),
    Exit { status: ExitStatus, stderr: String },
    TimedOut(Duration),
    MissingOutput,
    RemoveSource(io::Error),
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionError::InvalidName(name) => write!(f, "invalid filename `{name}`"),
            ConversionError::DestinationExists(name) => write!(f, "`{name}` already exists"),
            ConversionError::Spawn(err) => write!(f, "failed to start converter: {err}"),
            ConversionError::Exit { status, stderr } => {
                write!(f, "converter exited with {status}")?;
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            ConversionError::TimedOut(limit) => {
                write!(f, "converter killed after {}s", limit.as_secs())
            }
            ConversionError::MissingOutput => write!(f, "converter produced no output"),
            ConversionError::RemoveSource(err) => write!(f, "failed to remove source: {err}"),
        }
    }
}

#[derive(Debug)]
pub enum ConversionOutcome {
    /// 非旧格式，无需处理。
    Unchanged(String),
    Converted { from: String, to: String },
    Failed { filename: String, error: ConversionError },
}

impl ConversionOutcome {
    /// 记录应使用的文件名。
    pub fn filename(&self) -> &str {
        match self {
            ConversionOutcome::Unchanged(name) => name,
            ConversionOutcome::Converted { to, .. } => to,
            ConversionOutcome::Failed { filename, .. } => filename,
        }
    }
}

#[derive(Debug)]
pub struct Converter {
    pub heic: ConvertCommand,
    pub mov: ConvertCommand,
    /// `None` 表示不限时，子进程挂起会阻塞整个请求或迁移。
    pub timeout: Option<Duration>,
}

impl Converter {
    pub fn from_args(args: &Args) -> Self {
        Self {
            heic: ConvertCommand::parse(&args.heic_program, &args.heic_args),
            mov: ConvertCommand::parse(&args.ffmpeg_program, &args.ffmpeg_args),
            timeout: (args.convert_timeout_secs > 0)
                .then(|| Duration::from_secs(args.convert_timeout_secs)),
        }
    }

    fn command_for(&self, format: LegacyFormat) -> &ConvertCommand {
        match format {
            LegacyFormat::Heic => &self.heic,
            LegacyFormat::Mov => &self.mov,
        }
    }

    /// 仅当文件扩展名匹配 `format` 时转码。
    pub async fn convert(
        &self,
        storage: &Storage,
        filename: &str,
        format: LegacyFormat,
    ) -> ConversionOutcome {
        if LegacyFormat::detect(filename) != Some(format) {
            return ConversionOutcome::Unchanged(filename.to_string());
        }
        let target = format.target_name(filename);
        match self.run(storage, filename, &target, format).await {
            Ok(()) => {
                info!(from = filename, to = target, "converted");
                ConversionOutcome::Converted {
                    from: filename.to_string(),
                    to: target,
                }
            }
            Err(error) => {
                warn!(filename, format = %format, error = %error, "conversion failed, keeping original");
                ConversionOutcome::Failed {
                    filename: filename.to_string(),
                    error,
                }
            }
        }
    }

    async fn run(
        &self,
        storage: &Storage,
        filename: &str,
        target: &str,
        format: LegacyFormat,
    ) -> Result<(), ConversionError> {
        let resolve = |name: &str| {
            storage
                .resolve(name)
                .map_err(|_| ConversionError::InvalidName(name.to_string()))
        };
        let input = resolve(filename)?;
        let output = resolve(target)?;
        if fs::symlink_metadata(&output).await.is_ok() {
            return Err(ConversionError::DestinationExists(target.to_string()));
        }

        let result = self.spawn_and_wait(format, &input, &output).await;
        if let Err(err) = result {
            let _ = fs::remove_file(&output).await;
            return Err(err);
        }
        if let Err(err) = fs::remove_file(&input).await {
            let _ = fs::remove_file(&output).await;
            return Err(ConversionError::RemoveSource(err));
        }
        Ok(())
    }

    async fn spawn_and_wait(
        &self,
        format: LegacyFormat,
        input: &Path,
        output: &Path,
    ) -> Result<(), ConversionError> {
        let child = self
            .command_for(format)
            .build(input, output)
            .spawn()
            .map_err(ConversionError::Spawn)?;
        let wait = child.wait_with_output();
        let finished = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| ConversionError::TimedOut(limit))?,
            None => wait.await,
        };
        let finished = finished.map_err(ConversionError::Spawn)?;
        if !finished.status.success() {
            return Err(ConversionError::Exit {
                status: finished.status,
                stderr: stderr_tail(&finished.stderr),
            });
        }
        match fs::metadata(output).await {
            Ok(metadata) if metadata.is_file() => Ok(()),
            _ => Err(ConversionError::MissingOutput),
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let mut start = text.len().saturating_sub(STDERR_TAIL_BYTES);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
