//! Sparse MNA matrix with stable element handles.
//!
//! Devices ask for an element at `(row, col)` once during setup and keep the
//! returned [`ElementHandle`]; every later load adds into that slot directly.
//! Row and column indices are node numbers, so index 0 is ground. Any stamp
//! touching ground lands in a single trash slot that is never assembled.
//!
//! Factorization goes through faer's sparse LU. The symbolic analysis
//! (fill-reducing ordering) is computed by [`SparseMatrix::reorder`] and
//! cached until the structure changes, so repeated numeric factorizations
//! of the same topology only redo the numeric phase.

use std::fmt;

use faer::prelude::*;
use faer::sparse::linalg::solvers::{Lu, SymbolicLu};
use faer::sparse::{SparseColMat, Triplet};
use indexmap::IndexMap;
use nalgebra::DMatrix;
use num_complex::Complex64;
use num_traits::Zero;

use crate::error::{Error, Result};

/// Stable reference to one matrix entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ElementHandle(usize);

impl ElementHandle {
    /// The sentinel slot that absorbs ground-row and ground-column stamps.
    pub const TRASH: ElementHandle = ElementHandle(0);

    pub fn is_trash(self) -> bool {
        self.0 == 0
    }
}

enum Factored {
    /// Zero-sized system; nothing to solve.
    Empty,
    Real(Lu<usize, f64>),
    Complex(Lu<usize, c64>),
}

/// Sparse real/complex coefficient matrix.
pub struct SparseMatrix {
    size: usize,
    lookup: IndexMap<(usize, usize), ElementHandle>,
    /// Coordinates per handle; slot 0 is the trash entry.
    coords: Vec<(usize, usize)>,
    real: Vec<f64>,
    imag: Vec<f64>,
    symbolic: Option<SymbolicLu<usize>>,
    factored: Option<Factored>,
    condition_limit: f64,
}

impl fmt::Debug for SparseMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseMatrix")
            .field("size", &self.size)
            .field("elements", &self.element_count())
            .field("reordered", &self.symbolic.is_some())
            .field("factored", &self.factored.is_some())
            .finish()
    }
}

fn oom(requested: usize) -> Error {
    Error::OutOfMemory { requested }
}

impl SparseMatrix {
    /// Allocate a matrix for `size` unknowns (ground excluded).
    pub fn new(size: usize) -> Result<Self> {
        let mut coords = Vec::new();
        let mut real = Vec::new();
        let mut imag = Vec::new();
        let mut lookup = IndexMap::new();
        let hint = 4 * size + 1;
        coords.try_reserve(hint).map_err(|_| oom(hint))?;
        real.try_reserve(hint).map_err(|_| oom(hint))?;
        imag.try_reserve(hint).map_err(|_| oom(hint))?;
        lookup.try_reserve(hint).map_err(|_| oom(hint))?;

        coords.push((0, 0));
        real.push(0.0);
        imag.push(0.0);

        Ok(Self {
            size,
            lookup,
            coords,
            real,
            imag,
            symbolic: None,
            factored: None,
            condition_limit: 1.0 / f64::EPSILON,
        })
    }

    /// Set the condition-number estimate above which factorization reports
    /// [`Error::IllConditioned`].
    pub fn with_condition_limit(mut self, limit: f64) -> Self {
        self.condition_limit = limit;
        self
    }

    /// A matrix with the same elements and handles, all values zero.
    ///
    /// The cached ordering is shared; no factorization is carried over.
    pub fn structural_clone(&self) -> Result<Self> {
        let n = self.coords.len();
        let mut real = Vec::new();
        let mut imag = Vec::new();
        real.try_reserve(n).map_err(|_| oom(n))?;
        imag.try_reserve(n).map_err(|_| oom(n))?;
        real.resize(n, 0.0);
        imag.resize(n, 0.0);
        Ok(Self {
            size: self.size,
            lookup: self.lookup.clone(),
            coords: self.coords.clone(),
            real,
            imag,
            symbolic: self.symbolic.clone(),
            factored: None,
            condition_limit: self.condition_limit,
        })
    }

    /// Number of unknowns (ground excluded).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of structural elements (trash slot excluded).
    pub fn element_count(&self) -> usize {
        self.coords.len() - 1
    }

    pub fn is_reordered(&self) -> bool {
        self.symbolic.is_some()
    }

    pub fn is_factored(&self) -> bool {
        self.factored.is_some()
    }

    /// Get or create the element at `(row, col)`.
    ///
    /// Repeated calls with the same coordinates return the same handle.
    /// Ground coordinates return [`ElementHandle::TRASH`]. Indices past the
    /// current size grow the matrix.
    pub fn make_element(&mut self, row: usize, col: usize) -> Result<ElementHandle> {
        if row == 0 || col == 0 {
            return Ok(ElementHandle::TRASH);
        }
        if let Some(&handle) = self.lookup.get(&(row, col)) {
            return Ok(handle);
        }

        let next = self.coords.len();
        self.coords.try_reserve(1).map_err(|_| oom(next + 1))?;
        self.real.try_reserve(1).map_err(|_| oom(next + 1))?;
        self.imag.try_reserve(1).map_err(|_| oom(next + 1))?;
        self.lookup.try_reserve(1).map_err(|_| oom(next + 1))?;

        let handle = ElementHandle(next);
        self.coords.push((row, col));
        self.real.push(0.0);
        self.imag.push(0.0);
        self.lookup.insert((row, col), handle);
        self.size = self.size.max(row).max(col);

        // New structure invalidates the ordering.
        self.symbolic = None;
        self.factored = None;
        Ok(handle)
    }

    /// Grow the matrix to at least `size` unknowns.
    ///
    /// Unknowns without any element make the matrix structurally singular.
    pub fn ensure_size(&mut self, size: usize) {
        if size > self.size {
            self.size = size;
            self.symbolic = None;
            self.factored = None;
        }
    }

    /// Handle of an existing element, if any.
    pub fn find_element(&self, row: usize, col: usize) -> Option<ElementHandle> {
        if row == 0 || col == 0 {
            return Some(ElementHandle::TRASH);
        }
        self.lookup.get(&(row, col)).copied()
    }

    #[inline]
    pub fn add(&mut self, handle: ElementHandle, value: f64) {
        self.real[handle.0] += value;
    }

    #[inline]
    pub fn add_imag(&mut self, handle: ElementHandle, value: f64) {
        self.imag[handle.0] += value;
    }

    #[inline]
    pub fn add_complex(&mut self, handle: ElementHandle, value: Complex64) {
        self.real[handle.0] += value.re;
        self.imag[handle.0] += value.im;
    }

    pub fn get(&self, handle: ElementHandle) -> f64 {
        self.real[handle.0]
    }

    pub fn get_complex(&self, handle: ElementHandle) -> Complex64 {
        Complex64::new(self.real[handle.0], self.imag[handle.0])
    }

    /// Value at `(row, col)`; zero for absent elements and ground.
    pub fn value_at(&self, row: usize, col: usize) -> Complex64 {
        match self.lookup.get(&(row, col)) {
            Some(&h) => self.get_complex(h),
            None => Complex64::zero(),
        }
    }

    /// Zero every entry. Structure and ordering are kept.
    pub fn clear(&mut self) {
        self.real.fill(0.0);
        self.imag.fill(0.0);
        self.factored = None;
    }

    /// Multiply every entry by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for v in self.real.iter_mut() {
            *v *= factor;
        }
        for v in self.imag.iter_mut() {
            *v *= factor;
        }
        self.factored = None;
    }

    fn triplets<T, F>(&self, value: F) -> Vec<Triplet<usize, usize, T>>
    where
        F: Fn(usize) -> T,
    {
        self.coords
            .iter()
            .enumerate()
            .skip(1)
            .map(|(h, &(r, c))| Triplet::new(r - 1, c - 1, value(h)))
            .collect()
    }

    /// Compute the symbolic factorization for the current structure.
    pub fn reorder(&mut self) -> Result<()> {
        let n = self.size;
        if n == 0 {
            self.symbolic = None;
            return Ok(());
        }
        let pattern = self.triplets(|_| 1.0f64);
        let mat = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &pattern)
            .map_err(|e| Error::ReorderFailure(format!("{:?}", e)))?;
        let symbolic = SymbolicLu::try_new(mat.symbolic())
            .map_err(|e| Error::ReorderFailure(format!("{:?}", e)))?;
        self.symbolic = Some(symbolic);
        Ok(())
    }

    fn ensure_symbolic(&mut self) -> Result<SymbolicLu<usize>> {
        if self.symbolic.is_none() {
            self.reorder()?;
        }
        self.symbolic
            .clone()
            .ok_or_else(|| Error::ReorderFailure("no symbolic factorization".to_string()))
    }

    /// Infinity norm of the real or complex matrix.
    fn norm_inf(&self, complex: bool) -> f64 {
        let mut rows = vec![0.0; self.size + 1];
        for (h, &(r, _)) in self.coords.iter().enumerate().skip(1) {
            rows[r] += if complex {
                Complex64::new(self.real[h], self.imag[h]).norm()
            } else {
                self.real[h].abs()
            };
        }
        rows.into_iter().fold(0.0, f64::max)
    }

    /// Reject singular and ill-conditioned factorizations from a solve
    /// against a vector of ones.
    ///
    /// `ones_solution` holds the magnitudes of `A^-1 * 1`; the estimate
    /// `||A||_inf * ||A^-1 1||_inf` bounds the condition number from below.
    fn check_conditioning(
        &self,
        ones_solution: impl Iterator<Item = f64>,
        complex: bool,
    ) -> Result<()> {
        let mut max = 0.0f64;
        for (i, v) in ones_solution.enumerate() {
            if !v.is_finite() {
                return Err(Error::SingularMatrix { row: i + 1 });
            }
            max = max.max(v);
        }
        let estimate = self.norm_inf(complex) * max;
        if estimate > self.condition_limit {
            return Err(Error::IllConditioned { estimate });
        }
        Ok(())
    }

    /// Real numeric LU factorization.
    pub fn factor(&mut self) -> Result<()> {
        self.factored = None;
        let n = self.size;
        if n == 0 {
            self.factored = Some(Factored::Empty);
            return Ok(());
        }
        let symbolic = self.ensure_symbolic()?;
        let triplets = self.triplets(|h| self.real[h]);
        let mat = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets)
            .map_err(|e| Error::ReorderFailure(format!("{:?}", e)))?;
        let lu = Lu::try_new_with_symbolic(symbolic, mat.as_ref())
            .map_err(|_| Error::SingularMatrix { row: 0 })?;

        let ones = Col::<f64>::from_fn(n, |_| 1.0);
        let ones_solution = lu.solve(&ones);
        self.check_conditioning((0..n).map(|i| ones_solution[i].abs()), false)?;

        self.factored = Some(Factored::Real(lu));
        Ok(())
    }

    /// Complex numeric LU factorization of the real and imaginary parts.
    pub fn factor_complex(&mut self) -> Result<()> {
        self.factored = None;
        let n = self.size;
        if n == 0 {
            self.factored = Some(Factored::Empty);
            return Ok(());
        }
        let symbolic = self.ensure_symbolic()?;
        let triplets = self.triplets(|h| c64::new(self.real[h], self.imag[h]));
        let mat = SparseColMat::<usize, c64>::try_new_from_triplets(n, n, &triplets)
            .map_err(|e| Error::ReorderFailure(format!("{:?}", e)))?;
        let lu = Lu::try_new_with_symbolic(symbolic, mat.as_ref())
            .map_err(|_| Error::SingularMatrix { row: 0 })?;

        let ones = Col::<c64>::from_fn(n, |_| c64::new(1.0, 0.0));
        let ones_solution = lu.solve(&ones);
        self.check_conditioning(
            (0..n).map(|i| {
                let v = ones_solution[i];
                if v.re.is_finite() && v.im.is_finite() {
                    (v.re * v.re + v.im * v.im).sqrt()
                } else {
                    f64::NAN
                }
            }),
            true,
        )?;

        self.factored = Some(Factored::Complex(lu));
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len < self.size + 1 {
            return Err(Error::DimensionMismatch {
                expected: self.size + 1,
                actual: len,
            });
        }
        Ok(())
    }

    /// Solve `A x = rhs` in place with the last real factorization.
    ///
    /// `rhs` is indexed by node number; slot 0 is ignored and left at zero.
    pub fn solve(&self, rhs: &mut [f64]) -> Result<()> {
        self.check_len(rhs.len())?;
        let n = self.size;
        match &self.factored {
            Some(Factored::Empty) => {}
            Some(Factored::Real(lu)) => {
                let b = Col::<f64>::from_fn(n, |i| rhs[i + 1]);
                let x = lu.solve(&b);
                for i in 0..n {
                    rhs[i + 1] = x[i];
                }
            }
            Some(Factored::Complex(_)) | None => return Err(Error::NotFactored),
        }
        rhs[0] = 0.0;
        Ok(())
    }

    /// Solve the complex system `A (x + jy) = rhs + j irhs` in place.
    ///
    /// With a real factorization both parts are solved independently.
    pub fn solve_complex(&self, rhs: &mut [f64], irhs: &mut [f64]) -> Result<()> {
        self.check_len(rhs.len())?;
        self.check_len(irhs.len())?;
        let n = self.size;
        match &self.factored {
            Some(Factored::Empty) => {}
            Some(Factored::Real(lu)) => {
                let re = lu.solve(&Col::<f64>::from_fn(n, |i| rhs[i + 1]));
                let im = lu.solve(&Col::<f64>::from_fn(n, |i| irhs[i + 1]));
                for i in 0..n {
                    rhs[i + 1] = re[i];
                    irhs[i + 1] = im[i];
                }
            }
            Some(Factored::Complex(lu)) => {
                let b = Col::<c64>::from_fn(n, |i| c64::new(rhs[i + 1], irhs[i + 1]));
                let x = lu.solve(&b);
                for i in 0..n {
                    rhs[i + 1] = x[i].re;
                    irhs[i + 1] = x[i].im;
                }
            }
            None => return Err(Error::NotFactored),
        }
        rhs[0] = 0.0;
        irhs[0] = 0.0;
        Ok(())
    }

    /// `out = A * input` using the real part only.
    pub fn multiply(&self, input: &[f64], out: &mut [f64]) -> Result<()> {
        self.check_len(input.len())?;
        self.check_len(out.len())?;
        out.fill(0.0);
        for (h, &(r, c)) in self.coords.iter().enumerate().skip(1) {
            out[r] += self.real[h] * input[c];
        }
        out[0] = 0.0;
        Ok(())
    }

    /// Complex matrix-vector product `out = A * input`.
    pub fn multiply_complex(
        &self,
        input: &[f64],
        input_imag: &[f64],
        out: &mut [f64],
        out_imag: &mut [f64],
    ) -> Result<()> {
        for len in [input.len(), input_imag.len(), out.len(), out_imag.len()] {
            self.check_len(len)?;
        }
        out.fill(0.0);
        out_imag.fill(0.0);
        for (h, &(r, c)) in self.coords.iter().enumerate().skip(1) {
            let (a, b) = (self.real[h], self.imag[h]);
            let (x, y) = (input[c], input_imag[c]);
            out[r] += a * x - b * y;
            out_imag[r] += a * y + b * x;
        }
        out[0] = 0.0;
        out_imag[0] = 0.0;
        Ok(())
    }

    /// Dense complex copy of the matrix, ground excluded.
    pub fn to_dense_complex(&self) -> DMatrix<Complex64> {
        let n = self.size;
        let mut dense = DMatrix::<Complex64>::zeros(n, n);
        for (h, &(r, c)) in self.coords.iter().enumerate().skip(1) {
            dense[(r - 1, c - 1)] += Complex64::new(self.real[h], self.imag[h]);
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_two() -> (SparseMatrix, [ElementHandle; 4]) {
        let mut m = SparseMatrix::new(2).unwrap();
        let h = [
            m.make_element(1, 1).unwrap(),
            m.make_element(1, 2).unwrap(),
            m.make_element(2, 1).unwrap(),
            m.make_element(2, 2).unwrap(),
        ];
        (m, h)
    }

    #[test]
    fn test_make_element_idempotent() {
        let mut m = SparseMatrix::new(3).unwrap();
        let a = m.make_element(2, 3).unwrap();
        let b = m.make_element(2, 3).unwrap();
        assert_eq!(a, b);
        assert_eq!(m.element_count(), 1);
    }

    #[test]
    fn test_ground_maps_to_trash() {
        let mut m = SparseMatrix::new(2).unwrap();
        assert!(m.make_element(0, 1).unwrap().is_trash());
        assert!(m.make_element(2, 0).unwrap().is_trash());
        assert_eq!(m.element_count(), 0);
    }

    #[test]
    fn test_make_element_grows_size() {
        let mut m = SparseMatrix::new(1).unwrap();
        m.make_element(4, 2).unwrap();
        assert_eq!(m.size(), 4);
    }

    #[test]
    fn test_stamps_accumulate_until_clear() {
        let mut m = SparseMatrix::new(1).unwrap();
        let h = m.make_element(1, 1).unwrap();
        m.add(h, 1.5);
        m.add(h, 1.5);
        assert_eq!(m.get(h), 3.0);
        m.clear();
        assert_eq!(m.get(h), 0.0);
    }

    #[test]
    fn test_factor_and_solve() {
        // 2x + y = 5
        // x + 3y = 6
        // Solution: x = 1.8, y = 1.4
        let (mut m, h) = two_by_two();
        for (handle, v) in h.iter().zip([2.0, 1.0, 1.0, 3.0]) {
            m.add(*handle, v);
        }
        m.factor().unwrap();

        let mut rhs = vec![0.0, 5.0, 6.0];
        m.solve(&mut rhs).unwrap();
        assert!((rhs[1] - 1.8).abs() < 1e-10, "x = {} (expected 1.8)", rhs[1]);
        assert!((rhs[2] - 1.4).abs() < 1e-10, "y = {} (expected 1.4)", rhs[2]);
        assert_eq!(rhs[0], 0.0);
    }

    #[test]
    fn test_refactor_reuses_ordering() {
        let (mut m, h) = two_by_two();
        for (handle, v) in h.iter().zip([2.0, 1.0, 1.0, 3.0]) {
            m.add(*handle, v);
        }
        m.reorder().unwrap();
        m.factor().unwrap();
        assert!(m.is_reordered());

        m.clear();
        for (handle, v) in h.iter().zip([4.0, 0.0, 0.0, 2.0]) {
            m.add(*handle, v);
        }
        m.factor().unwrap();
        assert!(m.is_reordered());
        let mut rhs = vec![0.0, 8.0, 2.0];
        m.solve(&mut rhs).unwrap();
        assert!((rhs[1] - 2.0).abs() < 1e-12);
        assert!((rhs[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_new_element_drops_ordering() {
        let (mut m, _) = two_by_two();
        m.reorder().unwrap();
        m.make_element(3, 3).unwrap();
        assert!(!m.is_reordered());
    }

    #[test]
    fn test_singular_matrix_reported() {
        let (mut m, h) = two_by_two();
        // Row 2 = 2 * row 1
        for (handle, v) in h.iter().zip([1.0, 2.0, 2.0, 4.0]) {
            m.add(*handle, v);
        }
        let err = m.factor().unwrap_err();
        assert!(err.is_matrix_failure(), "unexpected error: {err}");
        assert!(!m.is_factored());
    }

    #[test]
    fn test_zero_row_is_singular() {
        let (mut m, h) = two_by_two();
        m.add(h[0], 1.0);
        assert!(m.factor().unwrap_err().is_matrix_failure());
    }

    #[test]
    fn test_solve_before_factor() {
        let (m, _) = two_by_two();
        let mut rhs = vec![0.0; 3];
        assert!(matches!(m.solve(&mut rhs), Err(Error::NotFactored)));
    }

    #[test]
    fn test_factor_complex_and_solve() {
        // (2+i)x + y = 5+i
        // x + (3-i)y = 6
        let (mut m, h) = two_by_two();
        m.add_complex(h[0], Complex64::new(2.0, 1.0));
        m.add(h[1], 1.0);
        m.add(h[2], 1.0);
        m.add_complex(h[3], Complex64::new(3.0, -1.0));
        m.factor_complex().unwrap();

        let mut re = vec![0.0, 5.0, 6.0];
        let mut im = vec![0.0, 1.0, 0.0];
        m.solve_complex(&mut re, &mut im).unwrap();

        let x = Complex64::new(re[1], im[1]);
        let y = Complex64::new(re[2], im[2]);
        let ax0 = Complex64::new(2.0, 1.0) * x + y;
        let ax1 = x + Complex64::new(3.0, -1.0) * y;
        assert!((ax0 - Complex64::new(5.0, 1.0)).norm() < 1e-10, "Ax[0] mismatch");
        assert!((ax1 - Complex64::new(6.0, 0.0)).norm() < 1e-10, "Ax[1] mismatch");
    }

    #[test]
    fn test_multiply_and_scale() {
        let (mut m, h) = two_by_two();
        for (handle, v) in h.iter().zip([2.0, 1.0, 1.0, 3.0]) {
            m.add(*handle, v);
        }
        m.scale(-1.0);
        let x = vec![0.0, 1.0, 2.0];
        let mut out = vec![0.0; 3];
        m.multiply(&x, &mut out).unwrap();
        assert_eq!(out, vec![0.0, -4.0, -7.0]);
    }

    #[test]
    fn test_multiply_complex() {
        let mut m = SparseMatrix::new(1).unwrap();
        let h = m.make_element(1, 1).unwrap();
        m.add_complex(h, Complex64::new(0.0, 2.0));
        let mut re = vec![0.0; 2];
        let mut im = vec![0.0; 2];
        m.multiply_complex(&[0.0, 1.0], &[0.0, 1.0], &mut re, &mut im)
            .unwrap();
        // 2j * (1 + j) = -2 + 2j
        assert_eq!(re[1], -2.0);
        assert_eq!(im[1], 2.0);
    }

    #[test]
    fn test_structural_clone_shares_handles() {
        let (mut m, h) = two_by_two();
        m.add(h[0], 7.0);
        let mut copy = m.structural_clone().unwrap();
        assert_eq!(copy.get(h[0]), 0.0);
        assert_eq!(copy.make_element(1, 2).unwrap(), h[1]);
        assert_eq!(copy.element_count(), m.element_count());
    }

    #[test]
    fn test_dense_copy() {
        let (mut m, h) = two_by_two();
        m.add(h[1], 1.0);
        m.add_imag(h[2], -1.0);
        let d = m.to_dense_complex();
        assert_eq!(d[(0, 1)], Complex64::new(1.0, 0.0));
        assert_eq!(d[(1, 0)], Complex64::new(0.0, -1.0));
    }
}
