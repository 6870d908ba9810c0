//! RAR extraction through the external `unrar` tool.
//!
//! # Design
//! - The archive is unpacked into `<archive dir>/extracted`; an existing
//!   destination is reused without running the tool again.
//! - Tool output is streamed into the log line by line.
//! - The playable file is the only produced file, or the first video by name.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

const EXTRACTED_DIR: &str = "extracted";
const PLAYABLE_EXTENSIONS: &[&str] = &[".mkv", ".mp4", ".mov", ".avi"];

/// Errors produced while extracting an archive.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The configured command line is blank.
    #[error("extraction command is empty")]
    InvalidCommand,
    /// Filesystem failure around the destination directory.
    #[error("extraction io failure")]
    Io {
        /// Operation that failed.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The tool could not be started or awaited.
    #[error("failed to run extraction tool")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The tool exited unsuccessfully.
    #[error("extraction tool exited unsuccessfully")]
    Exit {
        /// Program name.
        program: String,
        /// Exit code, when the process was not killed by a signal.
        code: Option<i32>,
    },
    /// Nothing playable was produced.
    #[error("no playable file in extraction output")]
    NoPlayableFile {
        /// Destination directory.
        path: PathBuf,
    },
}

impl ExtractError {
    const fn io(operation: &'static str, path: PathBuf, source: io::Error) -> Self {
        Self::Io {
            operation,
            path,
            source,
        }
    }
}

/// Successful extraction result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// The tool ran and produced `path`.
    Extracted {
        /// Playable file.
        path: PathBuf,
    },
    /// The destination already existed; `path` was found in it.
    AlreadyExtracted {
        /// Playable file.
        path: PathBuf,
    },
}

impl ExtractOutcome {
    /// Playable file.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Extracted { path } | Self::AlreadyExtracted { path } => path,
        }
    }

    /// Metrics label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Extracted { .. } => "extracted",
            Self::AlreadyExtracted { .. } => "already_extracted",
        }
    }
}

/// Runs `<program> [args..] e <archive> <dest>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveExtractor {
    program: String,
    args: Vec<String>,
}

impl ArchiveExtractor {
    /// Parse a whitespace-separated command line such as `unrar` or
    /// `/usr/bin/unrar -y`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidCommand`] when `command_line` is blank.
    pub fn from_command_line(command_line: &str) -> Result<Self, ExtractError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(ExtractError::InvalidCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Destination directory for `archive`.
    #[must_use]
    pub fn destination_for(archive: &Path) -> PathBuf {
        archive
            .parent()
            .map_or_else(|| PathBuf::from(EXTRACTED_DIR), |dir| dir.join(EXTRACTED_DIR))
    }

    /// Extract `archive` into its destination directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination cannot be prepared, the tool fails,
    /// or no playable file is found afterwards.
    pub async fn extract(&self, archive: &Path) -> Result<ExtractOutcome, ExtractError> {
        let dest = Self::destination_for(archive);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            info!(dest = %dest.display(), "extraction destination exists, reusing it");
            let path = find_extracted(&dest).await?;
            return Ok(ExtractOutcome::AlreadyExtracted { path });
        }
        tokio::fs::create_dir_all(&dest)
            .await
            .map_err(|source| ExtractError::io("extract.create_dir", dest.clone(), source))?;

        info!(
            program = %self.program,
            archive = %archive.display(),
            dest = %dest.display(),
            "starting extraction"
        );
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("e")
            .arg(archive)
            .arg(&dest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExtractError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => info!(line = %line, "unrar"),
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "failed to read extraction output");
                        break;
                    }
                }
            }
        }

        let status = child.wait().await.map_err(|source| ExtractError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        if !status.success() {
            return Err(ExtractError::Exit {
                program: self.program.clone(),
                code: status.code(),
            });
        }
        let path = find_extracted(&dest).await?;
        Ok(ExtractOutcome::Extracted { path })
    }
}

/// The only entry of `dest`, else the first video entry by name.
///
/// # Errors
///
/// Returns an error if `dest` cannot be listed or holds nothing playable.
pub async fn find_extracted(dest: &Path) -> Result<PathBuf, ExtractError> {
    let mut entries = tokio::fs::read_dir(dest)
        .await
        .map_err(|source| ExtractError::io("extract.read_dir", dest.to_path_buf(), source))?;
    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|source| ExtractError::io("extract.read_dir", dest.to_path_buf(), source))?
    {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    let chosen = if names.len() == 1 {
        names.pop()
    } else {
        names.into_iter().find(|name| {
            let lower = name.to_ascii_lowercase();
            PLAYABLE_EXTENSIONS.iter().any(|ext| lower.contains(ext))
        })
    };
    chosen
        .map(|name| dest.join(name))
        .ok_or_else(|| ExtractError::NoPlayableFile {
            path: dest.to_path_buf(),
        })
}
