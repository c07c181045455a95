//! Vector math for similarity search.

/// Squared Euclidean distance between two vectors.
///
/// Vectors of different length are treated as maximally distant.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }

    let mut sum = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let d = *x as f64 - *y as f64;
        sum += d * d;
    }
    sum as f32
}

/// Scale a vector to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm < 1e-10 {
        return;
    }
    for x in v.iter_mut() {
        *x = (*x as f64 / norm) as f32;
    }
}

/// Indices of the `k` nearest candidates, ascending by distance.
///
/// Ties keep candidate order.
pub fn nearest<'a, I>(query: &[f32], candidates: I, k: usize) -> Vec<(usize, f32)>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut scored: Vec<(usize, f32)> = candidates
        .into_iter()
        .enumerate()
        .map(|(i, v)| (i, squared_l2(query, v)))
        .filter(|(_, d)| !d.is_nan())
        .collect();

    // sort_by is stable
    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    scored.truncate(k);
    scored
}
