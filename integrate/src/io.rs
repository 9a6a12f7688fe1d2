use crate::validate::check_adata;
use ann_types::{AnnMatrix, Column, Frame};
use anyhow::{bail, format_err, Context, Error};
use flate2::bufread::MultiGzDecoder;
use log::info;
use ndarray::Array2;
use sprs::{CsMat, TriMat};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Matrix file inside a dataset directory
pub const MATRIX_FILE: &str = "matrix.mtx.gz";
/// Observation table inside a dataset directory
pub const OBS_FILE: &str = "obs.csv";
/// Optional feature table inside a dataset directory
pub const VAR_FILE: &str = "var.csv";

/// Load a dense matrix from gzipped MTX format. Rows are observations, columns features.
pub fn load_mtx(path: impl AsRef<Path>) -> Result<Array2<f64>, Error> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    let mut gz = BufReader::new(MultiGzDecoder::new(file));
    let mut line = String::new();
    let mut mat: Option<TriMat<f64>> = None;

    while gz.read_line(&mut line)? > 0 {
        if line.starts_with('%') || line.trim().is_empty() {
            line.clear();
            continue;
        }
        let mut data = line.split_whitespace();
        match mat.as_mut() {
            None => {
                let nrow = data.next().ok_or_else(|| format_err!("no NROW"))?.parse::<usize>()?;
                let ncol = data.next().ok_or_else(|| format_err!("no NCOL"))?.parse::<usize>()?;
                let nnz = data.next().ok_or_else(|| format_err!("no NNZ"))?.parse::<usize>()?;
                mat = Some(TriMat::with_capacity((nrow, ncol), nnz));
            }
            Some(m) => {
                let row = data.next().ok_or_else(|| format_err!("missing ROW"))?.parse::<usize>()?;
                let col = data.next().ok_or_else(|| format_err!("missing COL"))?.parse::<usize>()?;
                let val = data.next().ok_or_else(|| format_err!("missing VAL"))?.parse::<f64>()?;
                if row == 0 || col == 0 || row > m.rows() || col > m.cols() {
                    bail!("entry ({}, {}) outside a {}x{} matrix", row, col, m.rows(), m.cols());
                }
                m.add_triplet(row - 1, col - 1, val);
            }
        }
        line.clear();
    }

    let Some(matrix) = mat else { bail!("no matrix found") };
    let csr: CsMat<f64> = matrix.to_csr();
    Ok(csr.to_dense())
}

/// Cell values read as a missing number
const NA_VALUES: [&str; 4] = ["", "NA", "nan", "NaN"];

fn parse_float(v: &str) -> Option<f64> {
    if NA_VALUES.contains(&v) {
        return Some(f64::NAN);
    }
    v.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn infer_column(values: Vec<String>) -> Column {
    if let Ok(ints) = values.iter().map(|v| v.parse::<i64>()).collect::<Result<Vec<_>, _>>() {
        return Column::Int(ints);
    }
    if let Some(floats) = values.iter().map(|v| parse_float(v)).collect::<Option<Vec<_>>>() {
        if floats.iter().any(|f| f.is_finite()) {
            return Column::Float(floats);
        }
    }
    Column::Str(values)
}

/// Load a metadata table from CSV. The first column holds the row names, every other column
/// becomes an integer, float or string column, whichever parses for all of its values.
/// A float column needs at least one finite value, and its empty or `NA` cells become NaN.
pub fn load_frame(path: impl AsRef<Path>) -> Result<Frame, Error> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).with_context(|| path.display().to_string())?;
    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    if headers.is_empty() {
        bail!("{} has no header", path.display());
    }

    let mut index = Vec::new();
    let mut values: Vec<Vec<String>> = vec![Vec::new(); headers.len() - 1];
    for record in reader.records() {
        let record = record.with_context(|| path.display().to_string())?;
        let mut fields = record.iter();
        index.push(fields.next().unwrap_or_default().to_string());
        for (col, field) in values.iter_mut().zip(fields) {
            col.push(field.to_string());
        }
    }

    let mut frame = Frame::new(index);
    for (name, col) in headers.into_iter().skip(1).zip(values) {
        frame.insert(name, infer_column(col))?;
    }
    Ok(frame)
}

/// Load `matrix.mtx.gz`, `obs.csv` and, when present, `var.csv` from `dir`.
pub fn load_dataset(dir: impl AsRef<Path>) -> Result<AnnMatrix, Error> {
    let dir = dir.as_ref();
    let x = load_mtx(dir.join(MATRIX_FILE))?;
    let obs = load_frame(dir.join(OBS_FILE))?;
    let var_path = dir.join(VAR_FILE);
    let var = if var_path.exists() {
        load_frame(&var_path)?
    } else {
        Frame::new((0..x.ncols()).map(|j| format!("gene-{j}")).collect())
    };

    let adata = AnnMatrix { x, obs, var };
    check_adata(&adata)?;
    info!("loaded {} from {}", adata, dir.display());
    Ok(adata)
}

/// Load `path`: an `.h5ad` file when built with the `h5ad` feature, otherwise a dataset
/// directory as read by [`load_dataset`].
pub fn load(path: impl AsRef<Path>) -> Result<AnnMatrix, Error> {
    let path = path.as_ref();
    if path.extension().is_some_and(|ext| ext == "h5ad") {
        #[cfg(feature = "h5ad")]
        return crate::h5ad::load_h5ad(path);
        #[cfg(not(feature = "h5ad"))]
        bail!("reading {} needs the `h5ad` feature", path.display());
    }
    load_dataset(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn write_gz(path: &Path, text: &str) {
        let mut enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap();
    }

    fn write_dataset(dir: &Path) {
        write_gz(
            &dir.join(MATRIX_FILE),
            "%%MatrixMarket matrix coordinate real general\n% comment\n3 2 3\n1 1 1.5\n2 2 2\n3 1 4\n",
        );
        std::fs::write(dir.join(OBS_FILE), "cell,method,depth,score\nc0,a,10,0.5\nc1,b,12,1\nc2,a,9,2.5\n").unwrap();
    }

    #[test]
    fn test_load_dataset() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path());
        let adata = load_dataset(tmp.path()).unwrap();

        assert_eq!(adata.x, ndarray::array![[1.5, 0.0], [0.0, 2.0], [4.0, 0.0]]);
        assert_eq!(adata.obs_names(), &["c0", "c1", "c2"].map(String::from));
        assert_eq!(
            adata.obs.get("method"),
            Some(&Column::Str(["a", "b", "a"].map(String::from).to_vec()))
        );
        assert_eq!(adata.obs.get("depth"), Some(&Column::Int(vec![10, 12, 9])));
        assert_eq!(adata.obs.get("score"), Some(&Column::Float(vec![0.5, 1.0, 2.5])));
        assert_eq!(adata.var_names(), &["gene-0", "gene-1"].map(String::from));
    }

    #[test]
    fn test_var_table_and_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path());
        std::fs::write(tmp.path().join(VAR_FILE), "gene,kind\nCD3E,protein\nMS4A1,protein\n").unwrap();
        let adata = load_dataset(tmp.path()).unwrap();
        assert_eq!(adata.var_names(), &["CD3E", "MS4A1"].map(String::from));

        std::fs::write(tmp.path().join(OBS_FILE), "cell,method\nc0,a\n").unwrap();
        let err = load_dataset(tmp.path()).unwrap_err();
        assert!(err.downcast_ref::<crate::IntegrationError>().is_some());
    }

    #[test]
    fn test_infer_missing_and_words() {
        let strs = |v: &[&str]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>();

        let depth = infer_column(strs(&["1.5", "", "NA", "2"]));
        assert!(matches!(depth, Column::Float(_)));
        assert_eq!(depth.n_missing(), 2);
        assert_eq!(depth.levels(), strs(&["1.5", "2"]));

        // no finite value, so these are labels
        assert_eq!(infer_column(strs(&["nan", "nan"])), Column::Str(strs(&["nan", "nan"])));
        assert_eq!(infer_column(strs(&["inf", "NaN"])), Column::Str(strs(&["inf", "NaN"])));
    }

    #[test]
    fn test_load_dispatch() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path());
        assert_eq!(load(tmp.path()).unwrap().shape(), (3, 2));

        let missing = tmp.path().join("testing.h5ad");
        assert!(load(&missing).is_err());
    }

    #[test]
    fn test_bad_mtx() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.mtx.gz");
        write_gz(&path, "2 2 1\n3 1 1.0\n");
        assert!(load_mtx(&path).is_err());
        write_gz(&path, "% only comments\n");
        assert!(load_mtx(&path).is_err());
    }
}
