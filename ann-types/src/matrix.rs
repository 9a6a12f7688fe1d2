use crate::frame::Frame;
use anyhow::{bail, Error};
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use std::fmt;

/// Dense observation-by-feature matrix with its observation (`obs`) and feature (`var`) tables.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnMatrix {
    pub x: Array2<f64>,
    pub obs: Frame,
    pub var: Frame,
}

impl AnnMatrix {
    /// Assemble an `AnnMatrix`, checking that the tables line up with `x`.
    pub fn new(x: Array2<f64>, obs: Frame, var: Frame) -> Result<AnnMatrix, Error> {
        let m = AnnMatrix { x, obs, var };
        m.validate()?;
        Ok(m)
    }

    /// Wrap a bare matrix, naming observations `cell-<i>` and features `gene-<j>`.
    pub fn from_array(x: Array2<f64>) -> AnnMatrix {
        let (rows, cols) = x.dim();
        AnnMatrix {
            obs: Frame::new((0..rows).map(|i| format!("cell-{i}")).collect()),
            var: Frame::new((0..cols).map(|j| format!("gene-{j}")).collect()),
            x,
        }
    }

    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_vars(&self) -> usize {
        self.x.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.x.dim()
    }

    pub fn obs_names(&self) -> &[String] {
        &self.obs.index
    }

    pub fn var_names(&self) -> &[String] {
        &self.var.index
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.obs.nrows() != self.n_obs() {
            bail!(
                "obs table has {} rows but the matrix has {} observations",
                self.obs.nrows(),
                self.n_obs()
            );
        }
        if self.var.nrows() != self.n_vars() {
            bail!(
                "var table has {} rows but the matrix has {} features",
                self.var.nrows(),
                self.n_vars()
            );
        }
        self.obs.validate()?;
        self.var.validate()?;
        Ok(())
    }

    /// Copy of the observations in `rows`, in the given order. Features and `var` are kept.
    pub fn select_obs(&self, rows: &[usize]) -> AnnMatrix {
        AnnMatrix {
            x: self.x.select(Axis(0), rows),
            obs: self.obs.select_rows(rows),
            var: self.var.clone(),
        }
    }

    /// Same observations and features, new values.
    pub fn with_x(&self, x: Array2<f64>) -> Result<AnnMatrix, Error> {
        if x.dim() != self.shape() {
            bail!("replacement matrix is {:?}, expected {:?}", x.dim(), self.shape());
        }
        Ok(AnnMatrix {
            x,
            obs: self.obs.clone(),
            var: self.var.clone(),
        })
    }

    /// Append the observations of `others` after those of `self`. All inputs must share the
    /// same features in the same order.
    pub fn concatenate(&self, others: &[AnnMatrix]) -> Result<AnnMatrix, Error> {
        for other in others {
            if other.var.index != self.var.index {
                bail!("cannot concatenate matrices with different features");
            }
        }
        let views: Vec<_> = std::iter::once(self).chain(others).map(|m| m.x.view()).collect();
        let frames: Vec<_> = std::iter::once(self).chain(others).map(|m| &m.obs).collect();
        AnnMatrix::new(concatenate(Axis(0), &views)?, Frame::concat(&frames)?, self.var.clone())
    }
}

impl fmt::Display for AnnMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnnMatrix with n_obs × n_vars = {} × {}", self.n_obs(), self.n_vars())?;
        for (label, frame) in [("obs", &self.obs), ("var", &self.var)] {
            if !frame.columns.is_empty() {
                let names: Vec<String> = frame.column_names().map(|n| format!("'{n}'")).collect();
                write!(f, "\n    {label}: {}", names.join(", "))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::Column;
    use ndarray::array;

    fn small() -> AnnMatrix {
        let mut m = AnnMatrix::from_array(array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        m.obs
            .insert("batch", Column::Str(vec!["a".into(), "b".into(), "a".into()]))
            .unwrap();
        m
    }

    #[test]
    fn test_validate_shapes() {
        let m = small();
        assert!(m.validate().is_ok());
        assert!(AnnMatrix::new(m.x.clone(), Frame::new(vec!["x".into()]), m.var.clone()).is_err());
        assert!(AnnMatrix::new(m.x.clone(), m.obs.clone(), Frame::default()).is_err());
    }

    #[test]
    fn test_select_obs() {
        let m = small();
        let s = m.select_obs(&[2, 0]);
        assert_eq!(s.x, array![[5.0, 6.0], [1.0, 2.0]]);
        assert_eq!(s.obs_names(), &["cell-2".to_string(), "cell-0".to_string()]);
        assert_eq!(s.var, m.var);
    }

    #[test]
    fn test_concatenate() {
        let m = small();
        let a = m.select_obs(&[0, 2]);
        let b = m.select_obs(&[1]);
        let joined = a.concatenate(&[b]).unwrap();
        assert_eq!(joined.x, array![[1.0, 2.0], [5.0, 6.0], [3.0, 4.0]]);
        assert_eq!(
            joined.obs.get("batch"),
            Some(&Column::Str(vec!["a".into(), "a".into(), "b".into()]))
        );

        let other = AnnMatrix::from_array(array![[1.0, 2.0, 3.0]]);
        assert!(a.concatenate(&[other]).is_err());
    }

    #[test]
    fn test_with_x_and_display() {
        let m = small();
        assert!(m.with_x(Array2::zeros((2, 2))).is_err());
        let z = m.with_x(Array2::zeros((3, 2))).unwrap();
        approx::assert_abs_diff_eq!(z.x.sum(), 0.0);
        assert_eq!(format!("{m}"), "AnnMatrix with n_obs × n_vars = 3 × 2\n    obs: 'batch'");
    }
}
