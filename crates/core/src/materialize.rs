use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::{Error, Result};

/// Copies `reader` into a fresh uniquely-named file under `dir` and returns
/// its path. Used when the upload source is a stream rather than a file
/// already on disk.
pub async fn materialize_temp_file<R>(reader: &mut R, dir: &Path, suffix: &str) -> Result<PathBuf>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let temp = tempfile::Builder::new()
        .prefix("docdrop_")
        .suffix(suffix)
        .tempfile_in(dir)?;
    let (file, path) = temp.keep().map_err(|e| Error::Io(e.error))?;

    let mut out = tokio::fs::File::from_std(file);
    tokio::io::copy(reader, &mut out).await?;
    out.flush().await?;
    Ok(path)
}
