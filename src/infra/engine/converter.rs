use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Instant,
};

use metrics::histogram;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::application::engine::EngineError;

pub const METRIC_CONVERT_MS: &str = "docflow_convert_ms";
pub const LICENSE_ENV_VAR: &str = "DOCFLOW_LICENSE_FILE";

const INPUT_STEM: &str = "input";

/// Headless office converter driven through its command line.
#[derive(Debug, Clone)]
pub struct PdfConverter {
    cli_path: PathBuf,
    work_dir: Option<PathBuf>,
}

impl PdfConverter {
    pub fn new(cli_path: PathBuf, work_dir: Option<PathBuf>) -> Self {
        Self { cli_path, work_dir }
    }

    /// Convert `bytes` (in the format named by `ext`) to PDF.
    ///
    /// Blocks on the child process. Every file it writes lives in a scoped
    /// temporary directory that is removed before returning.
    pub fn convert(
        &self,
        bytes: &[u8],
        ext: &str,
        license: Option<&Path>,
    ) -> Result<Vec<u8>, EngineError> {
        let started_at = Instant::now();
        let scratch = self.scratch_dir()?;
        let input_path = scratch.path().join(format!("{INPUT_STEM}.{ext}"));
        let out_dir = scratch.path().join("out");
        fs::create_dir_all(&out_dir)?;
        fs::write(&input_path, bytes)?;

        let mut command = Command::new(&self.cli_path);
        command
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(&out_dir)
            .arg(&input_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(license) = license {
            command.env(LICENSE_ENV_VAR, license);
        }

        let output = command.output().map_err(|err| {
            warn!(
                target = "infra::engine::converter",
                op = "converter::convert",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error_code = "spawn_cli",
                error = %err,
                "failed to spawn document converter"
            );
            if err.kind() == ErrorKind::NotFound {
                EngineError::ConverterUnavailable(err)
            } else {
                EngineError::Io(err)
            }
        })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(
                target = "infra::engine::converter",
                op = "converter::convert",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "converter_cli",
                stderr = %stderr,
                "document converter failed"
            );
            return Err(EngineError::Conversion { exit_code, stderr });
        }

        let pdf_path = out_dir.join(format!("{INPUT_STEM}.pdf"));
        let pdf = match fs::read(&pdf_path) {
            Ok(pdf) if !pdf.is_empty() => pdf,
            Ok(_) => return Err(EngineError::MissingOutput),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(EngineError::MissingOutput);
            }
            Err(err) => return Err(EngineError::Io(err)),
        };

        let elapsed = started_at.elapsed();
        histogram!(METRIC_CONVERT_MS, "ext" => ext.to_string())
            .record(elapsed.as_secs_f64() * 1000.0);
        info!(
            target = "infra::engine::converter",
            op = "converter::convert",
            result = "ok",
            elapsed_ms = elapsed.as_millis() as u64,
            ext,
            input_bytes = bytes.len(),
            pdf_bytes = pdf.len(),
            "document converted to pdf"
        );

        Ok(pdf)
    }

    fn scratch_dir(&self) -> Result<TempDir, EngineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("docflow-");
        let dir = match self.work_dir.as_ref() {
            Some(base) => {
                fs::create_dir_all(base)?;
                builder.tempdir_in(base)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}
