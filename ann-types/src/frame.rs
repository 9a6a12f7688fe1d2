use anyhow::{bail, format_err, Error};
use indexmap::IndexMap;
use itertools::Itertools;

/// A typed metadata column.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    Str(Vec<String>),
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Str(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// String rendering of the value in `row`. Labels are compared through this rendering.
    pub fn value_string(&self, row: usize) -> String {
        match self {
            Column::Str(v) => v[row].clone(),
            Column::Int(v) => v[row].to_string(),
            Column::Float(v) => v[row].to_string(),
        }
    }

    /// NaN in a float column stands for a missing value
    pub fn is_missing(&self, row: usize) -> bool {
        matches!(self, Column::Float(v) if v[row].is_nan())
    }

    pub fn n_missing(&self) -> usize {
        (0..self.len()).filter(|&row| self.is_missing(row)).count()
    }

    /// Distinct non-missing values in first-appearance order
    pub fn levels(&self) -> Vec<String> {
        (0..self.len())
            .filter(|&row| !self.is_missing(row))
            .map(|row| self.value_string(row))
            .unique()
            .collect()
    }

    pub fn select(&self, rows: &[usize]) -> Column {
        match self {
            Column::Str(v) => Column::Str(rows.iter().map(|&r| v[r].clone()).collect()),
            Column::Int(v) => Column::Int(rows.iter().map(|&r| v[r]).collect()),
            Column::Float(v) => Column::Float(rows.iter().map(|&r| v[r]).collect()),
        }
    }

    /// Append `other` to a copy of `self`. Integer and float columns are merged as floats,
    /// any other mismatch falls back to strings.
    pub fn concat(&self, other: &Column) -> Column {
        match (self, other) {
            (Column::Str(a), Column::Str(b)) => Column::Str(a.iter().chain(b).cloned().collect()),
            (Column::Int(a), Column::Int(b)) => Column::Int(a.iter().chain(b).copied().collect()),
            (Column::Float(a), Column::Float(b)) => Column::Float(a.iter().chain(b).copied().collect()),
            (Column::Int(a), Column::Float(b)) => {
                Column::Float(a.iter().map(|&v| v as f64).chain(b.iter().copied()).collect())
            }
            (Column::Float(a), Column::Int(b)) => {
                Column::Float(a.iter().copied().chain(b.iter().map(|&v| v as f64)).collect())
            }
            (a, b) => Column::Str(
                (0..a.len())
                    .map(|r| a.value_string(r))
                    .chain((0..b.len()).map(|r| b.value_string(r)))
                    .collect(),
            ),
        }
    }
}

/// Row names plus ordered, named columns. Used for both the observation and the feature table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    pub index: Vec<String>,
    pub columns: IndexMap<String, Column>,
}

impl Frame {
    pub fn new(index: Vec<String>) -> Frame {
        Frame {
            index,
            columns: IndexMap::new(),
        }
    }

    pub fn nrows(&self) -> usize {
        self.index.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Insert or replace a column. Returns the previous column of that name, if any.
    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> Result<Option<Column>, Error> {
        let name = name.into();
        if column.len() != self.nrows() {
            bail!(
                "column '{}' has {} values but the table has {} rows",
                name,
                column.len(),
                self.nrows()
            );
        }
        Ok(self.columns.insert(name, column))
    }

    /// Number of distinct values in column `name`
    pub fn nunique(&self, name: &str) -> Option<usize> {
        self.get(name).map(|c| c.levels().len())
    }

    pub fn validate(&self) -> Result<(), Error> {
        for (name, column) in &self.columns {
            if column.len() != self.nrows() {
                bail!(
                    "column '{}' has {} values but the table has {} rows",
                    name,
                    column.len(),
                    self.nrows()
                );
            }
        }
        Ok(())
    }

    pub fn select_rows(&self, rows: &[usize]) -> Frame {
        Frame {
            index: rows.iter().map(|&r| self.index[r].clone()).collect(),
            columns: self
                .columns
                .iter()
                .map(|(name, col)| (name.clone(), col.select(rows)))
                .collect(),
        }
    }

    /// Stack frames row-wise. Only columns present in every frame are kept, in the order of
    /// the first frame.
    pub fn concat(frames: &[&Frame]) -> Result<Frame, Error> {
        let (first, rest) = frames
            .split_first()
            .ok_or_else(|| format_err!("no frames to concatenate"))?;

        let mut out = Frame::new(
            frames
                .iter()
                .flat_map(|f| f.index.iter().cloned())
                .collect(),
        );
        for (name, column) in &first.columns {
            let mut merged = column.clone();
            let mut shared = true;
            for frame in rest {
                match frame.get(name) {
                    Some(next) => merged = merged.concat(next),
                    None => {
                        shared = false;
                        break;
                    }
                }
            }
            if shared {
                out.insert(name.clone(), merged)?;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn strs(v: &[&str]) -> Vec<String> {
        v.iter().map(std::string::ToString::to_string).collect()
    }

    #[test]
    fn test_insert_checks_length() {
        let mut f = Frame::new(strs(&["c0", "c1"]));
        assert!(f.insert("a", Column::Int(vec![1, 2])).unwrap().is_none());
        assert!(f.insert("b", Column::Int(vec![1])).is_err());
        let old = f.insert("a", Column::Int(vec![3, 4])).unwrap();
        assert_eq!(old, Some(Column::Int(vec![1, 2])));
    }

    #[test]
    fn test_levels_and_nunique() {
        let mut f = Frame::new(strs(&["c0", "c1", "c2", "c3"]));
        f.insert("batch", Column::Str(strs(&["y", "x", "y", "z"]))).unwrap();
        assert_eq!(f.get("batch").unwrap().levels(), strs(&["y", "x", "z"]));
        assert_eq!(f.nunique("batch"), Some(3));
        assert_eq!(f.nunique("missing"), None);
    }

    #[test]
    fn test_nan_is_not_a_level() {
        let col = Column::Float(vec![f64::NAN, 1.0, f64::NAN, 2.5]);
        assert_eq!(col.levels(), strs(&["1", "2.5"]));
        assert_eq!(col.n_missing(), 2);
        assert!(col.is_missing(0) && !col.is_missing(1));
        assert_eq!(Column::Str(strs(&["nan"])).n_missing(), 0);
    }

    #[test]
    fn test_select_and_concat() {
        let mut f = Frame::new(strs(&["c0", "c1", "c2"]));
        f.insert("n", Column::Int(vec![10, 11, 12])).unwrap();
        f.insert("s", Column::Str(strs(&["a", "b", "c"]))).unwrap();

        let a = f.select_rows(&[2, 0]);
        assert_eq!(a.index, strs(&["c2", "c0"]));
        assert_eq!(a.get("n"), Some(&Column::Int(vec![12, 10])));

        let mut b = f.select_rows(&[1]);
        b.columns.shift_remove("s");
        b.insert("n", Column::Float(vec![0.5])).unwrap();

        let joined = Frame::concat(&[&a, &b]).unwrap();
        assert_eq!(joined.index, strs(&["c2", "c0", "c1"]));
        assert_eq!(joined.get("n"), Some(&Column::Float(vec![12.0, 10.0, 0.5])));
        assert!(!joined.contains("s"));
        assert!(Frame::concat(&[]).is_err());
    }

    #[test]
    fn test_validate() {
        let mut f = Frame::new(strs(&["c0", "c1"]));
        f.columns.insert("bad".to_string(), Column::Float(vec![1.0]));
        assert!(f.validate().is_err());
    }
}
