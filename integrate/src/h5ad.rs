use crate::validate::check_adata;
use ann_types::{AnnMatrix, Column, Frame};
use anyhow::{bail, format_err, Context, Error};
use hdf5::types::{TypeDescriptor, VarLenUnicode};
use hdf5::{Dataset, Group};
use log::{info, warn};
use ndarray::Array2;
use sprs::CsMat;
use std::path::Path;

fn read_strings(ds: &Dataset) -> Result<Vec<String>, Error> {
    Ok(ds
        .read_1d::<VarLenUnicode>()?
        .iter()
        .map(|s| s.as_str().to_string())
        .collect())
}

fn string_attr(group: &Group, name: &str) -> Result<String, Error> {
    Ok(group.attr(name)?.read_scalar::<VarLenUnicode>()?.as_str().to_string())
}

fn read_usize(ds: &Dataset) -> Result<Vec<usize>, Error> {
    ds.read_raw::<i64>()?
        .into_iter()
        .map(|v| usize::try_from(v).map_err(|_| format_err!("negative index {} in {}", v, ds.name())))
        .collect()
}

/// Dense view of `X`, stored either as a 2-d dataset or as a csr/csc group.
fn read_x(file: &hdf5::File) -> Result<Array2<f64>, Error> {
    if let Ok(ds) = file.dataset("X") {
        return Ok(ds.read_2d::<f64>()?);
    }
    let group = file.group("X").context("no X in file")?;
    let encoding = string_attr(&group, "encoding-type")?;
    let shape = group.attr("shape")?.read_raw::<i64>()?;
    let &[nrows, ncols] = shape.as_slice() else {
        bail!("X has shape attribute {:?}", shape)
    };
    let shape = (nrows as usize, ncols as usize);
    let data = group.dataset("data")?.read_raw::<f64>()?;
    let indices = read_usize(&group.dataset("indices")?)?;
    let indptr = read_usize(&group.dataset("indptr")?)?;

    let matrix: CsMat<f64> = match encoding.as_str() {
        "csr_matrix" => CsMat::try_new(shape, indptr, indices, data),
        "csc_matrix" => CsMat::try_new_csc(shape, indptr, indices, data),
        other => bail!("unsupported X encoding '{}'", other),
    }
    .map_err(|(_, _, _, e)| format_err!("malformed sparse X: {}", e))?;
    Ok(matrix.to_dense())
}

fn read_column(ds: &Dataset) -> Result<Column, Error> {
    let column = match ds.dtype()?.to_descriptor()? {
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => Column::Int(ds.read_raw::<i64>()?),
        TypeDescriptor::Float(_) => Column::Float(ds.read_raw::<f64>()?),
        TypeDescriptor::Boolean => Column::Str(
            ds.read_raw::<bool>()?
                .into_iter()
                .map(|b| if b { "True" } else { "False" }.to_string())
                .collect(),
        ),
        TypeDescriptor::VarLenUnicode | TypeDescriptor::VarLenAscii => Column::Str(read_strings(ds)?),
        other => bail!("unsupported column type {:?} in {}", other, ds.name()),
    };
    Ok(column)
}

/// Categorical columns store integer codes into a `categories` array. Code -1 is missing,
/// which becomes NaN for numeric categories and an empty string otherwise.
fn read_categorical(group: &Group, name: &str) -> Result<Column, Error> {
    let codes = group.dataset("codes")?.read_raw::<i64>()?;
    let categories = read_column(&group.dataset("categories")?)?;
    let n_missing = codes.iter().filter(|&&c| c < 0).count();
    if n_missing > 0 {
        warn!("categorical column '{}' has {} missing values", name, n_missing);
    }
    let rows: Vec<Option<usize>> = codes
        .iter()
        .map(|&c| match usize::try_from(c) {
            Ok(c) if c < categories.len() => Ok(Some(c)),
            Ok(c) => Err(format_err!("code {} out of range in column '{}'", c, name)),
            Err(_) => Ok(None),
        })
        .collect::<Result<_, Error>>()?;

    let column = match categories {
        Column::Float(v) => Column::Float(rows.iter().map(|r| r.map_or(f64::NAN, |c| v[c])).collect()),
        Column::Int(v) if n_missing > 0 => {
            Column::Float(rows.iter().map(|r| r.map_or(f64::NAN, |c| v[c] as f64)).collect())
        }
        Column::Int(v) => Column::Int(rows.iter().flatten().map(|&c| v[c]).collect()),
        Column::Str(v) => Column::Str(
            rows.iter()
                .map(|r| r.map_or_else(String::new, |c| v[c].clone()))
                .collect(),
        ),
    };
    Ok(column)
}

/// Read an anndata dataframe group: the `_index` attribute names the row-name dataset and
/// `column-order` gives the columns.
fn read_frame(group: &Group) -> Result<Frame, Error> {
    let index_key = string_attr(group, "_index")?;
    let mut frame = Frame::new(read_strings(&group.dataset(&index_key)?)?);
    let order = match group.attr("column-order") {
        Ok(attr) => attr
            .read_raw::<VarLenUnicode>()
            .map(|v| v.iter().map(|s| s.as_str().to_string()).collect())
            .unwrap_or_default(),
        Err(_) => Vec::new(),
    };

    for name in order {
        let column = match group.dataset(&name) {
            Ok(ds) => read_column(&ds),
            Err(_) => read_categorical(&group.group(&name)?, &name),
        }
        .with_context(|| format!("reading column '{}' of {}", name, group.name()))?;
        frame.insert(name, column)?;
    }
    Ok(frame)
}

/// Load an `.h5ad` file written by anndata 0.7 or later. Dense and csr/csc `X` are supported,
/// both read into a dense matrix.
pub fn load_h5ad(path: impl AsRef<Path>) -> Result<AnnMatrix, Error> {
    let path = path.as_ref();
    let file = hdf5::File::open(path).with_context(|| path.display().to_string())?;
    let x = read_x(&file).with_context(|| path.display().to_string())?;
    let obs = read_frame(&file.group("obs")?)?;
    let var = read_frame(&file.group("var")?)?;

    let adata = AnnMatrix { x, obs, var };
    check_adata(&adata)?;
    info!("loaded {} from {}", adata, path.display());
    Ok(adata)
}
