//! SIMD distance kernels using the `wide` crate.

use wide::f32x8;

/// Inner product of two equal-length slices.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let chunks = len / 8;
    let mut acc = f32x8::splat(0.0);

    for i in 0..chunks {
        let offset = i * 8;
        let va = load(&a[offset..offset + 8]);
        let vb = load(&b[offset..offset + 8]);
        acc = acc + va * vb;
    }

    let mut sum = acc.reduce_add();
    for i in chunks * 8..len {
        sum += a[i] * b[i];
    }
    sum
}

/// Squared L2 distance of two equal-length slices.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let chunks = len / 8;
    let mut acc = f32x8::splat(0.0);

    for i in 0..chunks {
        let offset = i * 8;
        let diff = load(&a[offset..offset + 8]) - load(&b[offset..offset + 8]);
        acc = acc + diff * diff;
    }

    let mut sum = acc.reduce_add();
    for i in chunks * 8..len {
        let diff = a[i] - b[i];
        sum += diff * diff;
    }
    sum
}

/// L2 norm of a slice.
pub fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

#[inline]
fn load(values: &[f32]) -> f32x8 {
    let mut lanes = [0.0f32; 8];
    lanes.copy_from_slice(values);
    f32x8::from(lanes)
}
