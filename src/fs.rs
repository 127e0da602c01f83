use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Contents written to a sibling temp file, waiting to be renamed over the
/// target. Dropping it without [`StagedWrite::commit`] removes the temp file.
#[derive(Debug)]
pub struct StagedWrite {
    tmp: Option<PathBuf>,
    target: PathBuf,
}

impl StagedWrite {
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn commit(mut self) -> io::Result<()> {
        match self.tmp.take() {
            Some(tmp) => fs::rename(&tmp, &self.target),
            None => Ok(()),
        }
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if let Some(tmp) = self.tmp.take() {
            let _ = fs::remove_file(tmp);
        }
    }
}

/// Write `contents` next to `path` without touching `path` itself. Creates the
/// parent directory if needed; fails when `path` is a directory.
pub fn stage(path: &Path, contents: &[u8]) -> io::Result<StagedWrite> {
    if path.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{} is a directory", path.display()),
        ));
    }
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let tmp = dir.join(format!(".{name}.tmp"));
    let staged = StagedWrite { tmp: Some(tmp.clone()), target: path.to_path_buf() };
    let mut f = fs::File::create(&tmp)?;
    f.write_all(contents)?;
    f.sync_all()?;
    Ok(staged)
}

/// Replace `path` with `contents` in one step.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    stage(path, contents)?.commit()
}
