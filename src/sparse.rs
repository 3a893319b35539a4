//! Compressed sparse row matrices.
//!
//! Matrices are built once from `(row, col, value)` triplets and are
//! immutable afterwards; transforms produce new matrices.
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// A sparse matrix in compressed sparse row form.
///
/// Column indices within a row are strictly increasing. Entries that are
/// not stored are zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CsrMatrix {
    num_rows: usize,
    num_cols: usize,
    row_pointers: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Build a matrix from triplets. Duplicate coordinates are summed in
    /// the order they appear in `triplets`.
    ///
    /// # Panics
    ///
    /// Panics if a triplet lies outside of `num_rows` x `num_cols`.
    pub fn from_triplets(
        num_rows: usize,
        num_cols: usize,
        mut triplets: Vec<(usize, usize, f64)>,
    ) -> Self {
        assert!(
            triplets
                .iter()
                .all(|&(row, col, _)| row < num_rows && col < num_cols),
            "Triplet out of bounds for a {}x{} matrix",
            num_rows,
            num_cols
        );

        // Stable, so duplicates keep their relative order.
        triplets.sort_by_key(|&(row, col, _)| (row, col));

        let mut row_pointers = vec![0; num_rows + 1];
        let mut col_indices = Vec::with_capacity(triplets.len());
        let mut values: Vec<f64> = Vec::with_capacity(triplets.len());
        let mut previous = None;

        for (row, col, value) in triplets {
            if previous == Some((row, col)) {
                if let Some(last) = values.last_mut() {
                    *last += value;
                }
            } else {
                col_indices.push(col);
                values.push(value);
                row_pointers[row + 1] += 1;
                previous = Some((row, col));
            }
        }

        for idx in 1..row_pointers.len() {
            row_pointers[idx] += row_pointers[idx - 1];
        }

        CsrMatrix {
            num_rows,
            num_cols,
            row_pointers,
            col_indices,
            values,
        }
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Number of columns.
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_rows, self.num_cols)
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Column indices and values of the stored entries in `row`.
    pub fn row(&self, row: usize) -> (&[usize], &[f64]) {
        if row >= self.num_rows {
            return (&self.col_indices[0..0], &self.values[0..0]);
        }

        let start = self.row_pointers[row];
        let stop = self.row_pointers[row + 1];

        (&self.col_indices[start..stop], &self.values[start..stop])
    }

    /// Value at `(row, col)`; zero when the entry is not stored.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let (cols, values) = self.row(row);

        match cols.binary_search(&col) {
            Ok(idx) => values[idx],
            Err(_) => 0.0,
        }
    }

    /// Iterate over stored entries as `(row, col, value)`, row by row.
    pub fn iter<'a>(&'a self) -> impl Iterator<Item = (usize, usize, f64)> + 'a {
        (0..self.num_rows).flat_map(move |row| {
            let (cols, values) = self.row(row);
            cols.iter()
                .zip(values.iter())
                .map(move |(&col, &value)| (row, col, value))
        })
    }

    /// The main diagonal, densely.
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.num_rows.min(self.num_cols))
            .map(|idx| self.get(idx, idx))
            .collect()
    }

    /// The transposed matrix. Rows of the result list their columns in
    /// ascending order.
    pub fn transpose(&self) -> CsrMatrix {
        let triplets = self.iter().map(|(row, col, value)| (col, row, value)).collect();

        CsrMatrix::from_triplets(self.num_cols, self.num_rows, triplets)
    }

    /// Build a matrix with the same sparsity pattern and transformed values.
    pub fn map_entries<F: Fn(usize, usize, f64) -> f64>(&self, func: F) -> CsrMatrix {
        let values = self.iter().map(|(row, col, value)| func(row, col, value)).collect();

        CsrMatrix {
            num_rows: self.num_rows,
            num_cols: self.num_cols,
            row_pointers: self.row_pointers.clone(),
            col_indices: self.col_indices.clone(),
            values,
        }
    }

    /// Dense weighted sum of rows: `sum_k weights[k] * self[rows[k], :]`.
    pub fn weighted_row_sum(&self, rows: &[usize], weights: &[f64]) -> Array1<f64> {
        let mut result = Array1::zeros(self.num_cols);

        for (&row, &weight) in rows.iter().zip(weights.iter()) {
            let (cols, values) = self.row(row);
            for (&col, &value) in cols.iter().zip(values.iter()) {
                result[col] += weight * value;
            }
        }

        result
    }

    /// Dense copy of the matrix.
    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.num_rows, self.num_cols));

        for (row, col, value) in self.iter() {
            dense[(row, col)] = value;
        }

        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_summed() {
        let matrix = CsrMatrix::from_triplets(
            3,
            3,
            vec![(2, 1, 1.0), (0, 2, 2.0), (2, 1, 0.5), (0, 0, 1.0)],
        );

        assert_eq!(matrix.nnz(), 3);
        assert_eq!(matrix.get(2, 1), 1.5);
        assert_eq!(matrix.get(1, 1), 0.0);
        assert_eq!(matrix.row(0), (&[0, 2][..], &[1.0, 2.0][..]));
        assert_eq!(matrix.row(1).0.len(), 0);
        assert_eq!(matrix.diagonal(), vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn transpose_swaps_coordinates() {
        let matrix = CsrMatrix::from_triplets(2, 3, vec![(0, 2, 1.0), (1, 0, 2.0), (0, 0, 3.0)]);
        let transposed = matrix.transpose();

        assert_eq!(transposed.shape(), (3, 2));
        assert_eq!(transposed.row(0), (&[0, 1][..], &[3.0, 2.0][..]));
        assert_eq!(transposed.get(2, 0), 1.0);
        assert_eq!(transposed.row(1).0.len(), 0);
    }

    #[test]
    fn map_keeps_pattern() {
        let matrix = CsrMatrix::from_triplets(2, 2, vec![(0, 1, 4.0), (1, 0, 2.0)]);
        let halved = matrix.map_entries(|_, _, value| value / 2.0);

        assert_eq!(halved.nnz(), 2);
        assert_eq!(halved.get(0, 1), 2.0);
        assert_eq!(halved.get(1, 0), 1.0);
    }

    #[test]
    fn weighted_row_sum_matches_dense_product() {
        let matrix = CsrMatrix::from_triplets(
            3,
            3,
            vec![(0, 0, 1.0), (0, 2, 2.0), (1, 1, 3.0), (2, 0, 4.0)],
        );

        let scores = matrix.weighted_row_sum(&[0, 2], &[2.0, 0.5]);
        let dense = matrix.to_dense();
        let expected = dense.row(0).to_owned() * 2.0 + dense.row(2).to_owned() * 0.5;

        assert_eq!(scores, expected);
        assert_eq!(scores.to_vec(), vec![4.0, 0.0, 4.0]);
    }
}
