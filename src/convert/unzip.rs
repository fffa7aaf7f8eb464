use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;

use super::{Converter, Target, io_error};
use crate::error::GdcError;

pub(super) fn run(
    inner: &Converter,
    input: &Path,
    targets: &[Target],
) -> Result<Vec<PathBuf>, GdcError> {
    let parent = input
        .parent()
        .ok_or_else(|| GdcError::Conversion(format!("{} has no parent", input.display())))?;
    let file = File::open(input).map_err(|_| GdcError::MissingMirrorFile(input.to_path_buf()))?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(file));

    let mut unzipped = tempfile::Builder::new()
        .prefix(".gdc-unzip")
        .tempfile_in(parent)
        .map_err(|err| io_error(parent, err))?;
    io::copy(&mut decoder, unzipped.as_file_mut())
        .map_err(|err| GdcError::Conversion(format!("{}: {err}", input.display())))?;

    let outputs = inner.run(unzipped.path(), targets)?;
    unzipped
        .close()
        .map_err(|err| io_error(parent, err))?;
    Ok(outputs)
}
