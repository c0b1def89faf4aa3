//! Small helpers for embedding vectors.

/// L2-normalize in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product. For normalized vectors this is the cosine similarity.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Round to four decimals, the precision the similarity endpoints report.
pub fn round4(x: f32) -> f64 {
    (f64::from(x) * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn normalized_vector_has_unit_norm() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert_relative_eq!(dot(&v, &v), 1.0, epsilon = 1e-6);
        assert_relative_eq!(v[0], 0.6, epsilon = 1e-6);
    }

    #[test]
    fn zero_vector_survives_normalization() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn identical_normalized_vectors_have_similarity_one() {
        let mut a = vec![0.2, -0.4, 0.7];
        let mut b = a.clone();
        l2_normalize(&mut a);
        l2_normalize(&mut b);
        assert_relative_eq!(dot(&a, &b), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn round4_truncates_noise() {
        assert_eq!(round4(0.123_456), 0.1235);
        assert_eq!(round4(1.0), 1.0);
    }
}
