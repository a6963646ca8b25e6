//! Dense vector primitives shared by the solver kernels.
//!
//! All functions assume equal-length operands and accumulate strictly in
//! index order: two calls over identical inputs produce bitwise-identical
//! results on the same platform. Reductions must not be reordered.

use ndarray::{Array1, Zip};

pub fn dot(x: &Array1<f64>, y: &Array1<f64>) -> f64 {
    let mut acc = 0.0;
    Zip::from(x).and(y).for_each(|a, b| acc += a * b);
    acc
}

/// y <- alpha * x + y
pub fn axpy(alpha: f64, x: &Array1<f64>, y: &mut Array1<f64>) {
    Zip::from(y).and(x).for_each(|yv, xv| *yv += alpha * xv);
}

/// x <- alpha * x
pub fn scale(alpha: f64, x: &mut Array1<f64>) {
    x.mapv_inplace(|v| alpha * v);
}

pub fn norm2(x: &Array1<f64>) -> f64 {
    dot(x, x).sqrt()
}

pub fn norm_inf(x: &Array1<f64>) -> f64 {
    let mut max = 0.0f64;
    for &v in x {
        max = max.max(v.abs());
    }
    max
}

pub fn copy(src: &Array1<f64>, dst: &mut Array1<f64>) {
    dst.assign(src);
}
