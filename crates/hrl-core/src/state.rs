//! State vector helpers shared by the agent and the environments

/// Dot product over the common prefix of two vectors
#[must_use]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean length
#[must_use]
pub fn norm(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

/// Unit-length copy of `v`; the zero vector maps to itself
#[must_use]
pub fn normalize(v: &[f64]) -> Vec<f64> {
    let length = norm(v);
    if length == 0.0 {
        return vec![0.0; v.len()];
    }
    v.iter().map(|x| x / length).collect()
}

/// Similarity of two vectors (plain dot product, callers normalize first)
#[must_use]
pub fn similarity(a: &[f64], b: &[f64]) -> f64 {
    dot(a, b)
}

/// Index of the largest value, first index on ties. Empty input gives 0.
#[must_use]
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// One-hot vector of length `len` with a 1.0 at `index`
#[must_use]
pub fn one_hot(len: usize, index: usize) -> Vec<f64> {
    let mut v = vec![0.0; len];
    if index < len {
        v[index] = 1.0;
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_argmax_breaks_ties_on_first_index() {
        assert_eq!(argmax(&[0.2, 0.5, 0.5, 0.1]), 1);
        assert_eq!(argmax(&[0.3, 0.3]), 0);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn test_normalize() {
        let v = normalize(&[3.0, 4.0]);
        assert_relative_eq!(v[0], 0.6);
        assert_relative_eq!(v[1], 0.8);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
        assert_relative_eq!(similarity(&v, &v), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_one_hot() {
        assert_eq!(one_hot(3, 1), vec![0.0, 1.0, 0.0]);
        assert_eq!(one_hot(2, 5), vec![0.0, 0.0]);
    }
}
