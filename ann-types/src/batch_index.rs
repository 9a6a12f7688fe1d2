use crate::frame::Column;
use indexmap::IndexMap;

/// Row indices grouped by label. `labels` are kept in first-appearance order, `offsets[i]` is
/// where the rows of `labels[i]` start inside `indices`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchIndex {
    pub labels: Vec<String>,
    pub offsets: Vec<usize>,
    pub indices: Vec<usize>,
}

impl BatchIndex {
    /// Group the rows of `column` by value. Groups appear in the order their value is first
    /// seen, rows inside a group keep their original relative order. Rows with a missing
    /// value belong to no group.
    pub fn from_column(column: &Column) -> BatchIndex {
        let mut groups: IndexMap<String, Vec<usize>> = IndexMap::new();
        for row in (0..column.len()).filter(|&r| !column.is_missing(r)) {
            groups.entry(column.value_string(row)).or_default().push(row);
        }

        let mut labels = Vec::with_capacity(groups.len());
        let mut offsets = Vec::with_capacity(groups.len());
        let mut indices = Vec::with_capacity(column.len());
        for (label, rows) in groups {
            labels.push(label);
            offsets.push(indices.len());
            indices.extend(rows);
        }
        BatchIndex {
            labels,
            offsets,
            indices,
        }
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Rows of the `idx`-th group.
    pub fn group(&self, idx: usize) -> &[usize] {
        let offset = self.offsets[idx];
        if idx == self.offsets.len() - 1 {
            &self.indices[offset..]
        } else {
            &self.indices[offset..self.offsets[idx + 1]]
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> + '_ {
        (0..self.len()).map(move |idx| (self.labels[idx].as_str(), self.group(idx)))
    }
}
