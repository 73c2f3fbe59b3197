//! # Distance Functions
//!
//! Similarity and distance over equal-length `f64` vectors.
//!
//! The public functions check lengths and return `DimensionMismatch` instead
//! of a silent 0 or infinity. The `*_unchecked` variants are for inner loops
//! of index builds where every vector was validated up front.

use cvfs_core::error::{Error, Result};

#[inline]
fn check_lengths(a: &[f64], b: &[f64]) -> Result<()> {
    if a.len() != b.len() {
        return Err(Error::dimension_mismatch(a.len(), b.len()));
    }
    Ok(())
}

/// Cosine similarity in `[-1, 1]`; 0 when either norm is exactly zero
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64> {
    check_lengths(a, b)?;
    Ok(cosine_similarity_unchecked(a, b))
}

/// Squared Euclidean distance
pub fn squared_l2(a: &[f64], b: &[f64]) -> Result<f64> {
    check_lengths(a, b)?;
    Ok(squared_l2_unchecked(a, b))
}

/// Euclidean distance (with sqrt)
pub fn l2_distance(a: &[f64], b: &[f64]) -> Result<f64> {
    squared_l2(a, b).map(f64::sqrt)
}

pub fn dot_product(a: &[f64], b: &[f64]) -> Result<f64> {
    check_lengths(a, b)?;
    Ok(dot_product_unchecked(a, b))
}

/// Vector norm (magnitude)
#[inline]
pub fn norm(v: &[f64]) -> f64 {
    dot_product_unchecked(v, v).sqrt()
}

#[inline]
pub fn dot_product_unchecked(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn squared_l2_unchecked(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
pub fn cosine_similarity_unchecked(a: &[f64], b: &[f64]) -> f64 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    // Rounding can push |dot| a hair past the product of norms.
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
