use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use burn::config::Config;
use burn::tensor::{backend::Backend, Tensor};

use crate::binarize::{binarize, check_scale};
use crate::error::Error;

/// How the export file is opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum ExportMode {
    /// Create the file if needed and append to it. Existing content is kept.
    #[default]
    Append,
    /// Create the file if needed and discard its previous content.
    Truncate,
}

/// Where and how the binarized weights are written.
#[derive(Config, Debug)]
pub struct ExportConfig {
    /// Destination text file.
    #[config(default = "String::from(\"dk1.txt\")")]
    pub path: String,
    /// File opening mode.
    #[config(default = "ExportMode::Append")]
    pub mode: ExportMode,
}

/// Binarizes `weights` with scale `h` and writes one line per top-level slice to `path`.
///
/// Returns the number of lines written.
pub fn export_binarized<B: Backend, const D: usize>(
    weights: Tensor<B, D>,
    h: f64,
    path: impl AsRef<Path>,
    mode: ExportMode,
) -> crate::Result<usize> {
    let h = check_scale(h)?;
    write_slices(binarize(weights, h), path, mode)
}

/// Writes `tensor` to `path`, one line per top-level slice.
pub fn write_slices<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    path: impl AsRef<Path>,
    mode: ExportMode,
) -> crate::Result<usize> {
    let path = path.as_ref();
    let data = tensor.into_data();
    let shape = data.shape.clone();
    let values = data
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| Error::TensorData(format!("{err:?}")))?;

    let lines = render_slices(&values, &shape);

    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        ExportMode::Append => options.append(true),
        ExportMode::Truncate => options.write(true).truncate(true),
    };
    let file = options.open(path).map_err(|err| Error::io(path, err))?;

    let mut writer = BufWriter::new(file);
    for line in lines.iter() {
        writeln!(writer, "{line}").map_err(|err| Error::io(path, err))?;
    }
    writer.flush().map_err(|err| Error::io(path, err))?;

    log::info!(
        "Wrote {} lines of binarized weights to '{}'",
        lines.len(),
        path.display()
    );

    Ok(lines.len())
}

/// Renders a row-major buffer of the given shape as one string per top-level slice.
///
/// A `[2, 2]` buffer `[1, -1, -1, 1]` gives `["[1.0, -1.0]", "[-1.0, 1.0]"]`,
/// a `[1]` buffer `[2]` gives `["2.0"]`.
pub fn render_slices(values: &[f32], shape: &[usize]) -> Vec<String> {
    let Some((&rows, inner)) = shape.split_first() else {
        return values.iter().map(|value| format!("{value:?}")).collect();
    };
    let stride: usize = inner.iter().product();

    (0..rows)
        .map(|row| render_nested(&values[row * stride..(row + 1) * stride], inner))
        .collect()
}

fn render_nested(values: &[f32], shape: &[usize]) -> String {
    let Some((&len, inner)) = shape.split_first() else {
        return format!("{:?}", values[0]);
    };
    let stride: usize = inner.iter().product();
    let items = (0..len)
        .map(|i| render_nested(&values[i * stride..(i + 1) * stride], inner))
        .collect::<Vec<_>>();

    format!("[{}]", items.join(", "))
}
