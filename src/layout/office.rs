//! Office-to-PDF conversion through a headless LibreOffice.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::IngestError;
use crate::external::run_bounded;

/// Convert `source` to PDF in `out_dir` with `program --headless
/// --convert-to pdf`. Returns the path of the produced PDF.
pub async fn convert_to_pdf(
    program: &str,
    source: &Path,
    out_dir: &Path,
    timeout: Duration,
) -> Result<PathBuf, IngestError> {
    let failed = |detail: String| IngestError::OfficeConversionFailed {
        path: source.to_path_buf(),
        detail,
    };
    let stem = source
        .file_stem()
        .ok_or_else(|| failed("source has no file name".into()))?;

    let args: [&OsStr; 6] = [
        OsStr::new("--headless"),
        OsStr::new("--convert-to"),
        OsStr::new("pdf"),
        OsStr::new("--outdir"),
        out_dir.as_os_str(),
        source.as_os_str(),
    ];
    run_bounded(program, args, timeout).await.map_err(&failed)?;

    let pdf = out_dir.join(format!("{}.pdf", stem.to_string_lossy()));
    if !pdf.exists() {
        warn!(path = %pdf.display(), "Converter exited cleanly but wrote no PDF");
        return Err(failed(format!("no output at {}", pdf.display())));
    }
    info!(source = %source.display(), pdf = %pdf.display(), "Office document converted");
    Ok(pdf)
}
