use anyhow::Result;

/// Dot product of two vectors of equal length.
///
/// For unit-normalized embeddings this is the cosine similarity.
#[inline]
pub fn dot(vec1: &[f32], vec2: &[f32]) -> f32 {
    vec1.iter().zip(vec2.iter()).map(|(a, b)| a * b).sum()
}

/// Euclidean norm
#[inline]
pub fn magnitude(vec: &[f32]) -> f32 {
    vec.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Calculate cosine similarity directly between two vectors
///
/// Works on vectors of any magnitude; use [`dot`] when both are known to be unit-normalized.
///
/// # Arguments
/// * `vec1` - First vector
/// * `vec2` - Second vector
///
/// # Returns
/// * `Result<f32>` - The cosine similarity or an error
pub fn cosine_similarity(vec1: &[f32], vec2: &[f32]) -> Result<f32> {
    if vec1.len() != vec2.len() {
        return Err(anyhow::anyhow!(
            "Vector dimensions don't match: {} vs {}",
            vec1.len(),
            vec2.len()
        ));
    }

    let mag1 = magnitude(vec1);
    let mag2 = magnitude(vec2);

    if mag1 < 0.001 || mag2 < 0.001 {
        return Err(anyhow::anyhow!("Zero magnitude vector detected"));
    }

    Ok(dot(vec1, vec2) / (mag1 * mag2))
}

/// Returns a unit-length copy of the vector. A zero vector is returned unchanged.
pub fn normalize(vec: &[f32]) -> Vec<f32> {
    let mag = magnitude(vec);
    if mag == 0.0 {
        return vec.to_vec();
    }
    vec.iter().map(|x| x / mag).collect()
}

/// Mean of the given vectors, normalized once to unit length.
///
/// Returns `None` for an empty input or mismatched dimensions.
pub fn centroid<V: AsRef<[f32]>>(vectors: &[V]) -> Option<Vec<f32>> {
    let first = vectors.first()?.as_ref();
    let dim = first.len();
    let mut sum = vec![0.0f32; dim];

    for vector in vectors {
        let vector = vector.as_ref();
        if vector.len() != dim {
            return None;
        }
        for (acc, value) in sum.iter_mut().zip(vector.iter()) {
            *acc += value;
        }
    }

    let count = vectors.len() as f32;
    let mean: Vec<f32> = sum.into_iter().map(|v| v / count).collect();
    Some(normalize(&mean))
}

/// Full pairwise similarity matrix over unit-normalized vectors (row-major, n x n)
pub fn similarity_matrix<V: AsRef<[f32]>>(vectors: &[V]) -> Vec<Vec<f32>> {
    let n = vectors.len();
    let mut matrix = vec![vec![0.0f32; n]; n];

    for i in 0..n {
        matrix[i][i] = dot(vectors[i].as_ref(), vectors[i].as_ref());
        for j in (i + 1)..n {
            let sim = dot(vectors[i].as_ref(), vectors[j].as_ref());
            matrix[i][j] = sim;
            matrix[j][i] = sim;
        }
    }

    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_unit(rng: &mut StdRng, dim: usize) -> Vec<f32> {
        let raw: Vec<f32> = (0..dim).map(|_| rng.random_range(-1.0f32..1.0)).collect();
        normalize(&raw)
    }

    #[test]
    fn test_dot_matches_reference_cosine() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let a = random_unit(&mut rng, 64);
            let b = random_unit(&mut rng, 64);

            let fast = dot(&a, &b);
            let reference = cosine_similarity(&a, &b).unwrap();
            assert!((fast - reference).abs() < 1e-6, "{} vs {}", fast, reference);
            assert!((dot(&a, &b) - dot(&b, &a)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_cosine_similarity_errors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).is_err());
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_err());
        let sim = cosine_similarity(&[3.0, 0.0], &[1.0, 1.0]).unwrap();
        assert!((sim - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_is_normalized_mean() {
        let members = vec![vec![1.0f32, 0.0], vec![0.0, 1.0]];
        let center = centroid(&members).unwrap();
        let expected = std::f32::consts::FRAC_1_SQRT_2;
        assert!((center[0] - expected).abs() < 1e-6);
        assert!((center[1] - expected).abs() < 1e-6);
        assert!((magnitude(&center) - 1.0).abs() < 1e-6);

        let empty: Vec<Vec<f32>> = Vec::new();
        assert!(centroid(&empty).is_none());
        assert!(centroid(&[vec![1.0f32], vec![1.0, 0.0]]).is_none());
    }

    #[test]
    fn test_similarity_matrix_is_symmetric() {
        let mut rng = StdRng::seed_from_u64(7);
        let vectors: Vec<Vec<f32>> = (0..6).map(|_| random_unit(&mut rng, 16)).collect();
        let matrix = similarity_matrix(&vectors);

        for i in 0..6 {
            assert!((matrix[i][i] - 1.0).abs() < 1e-5);
            for j in 0..6 {
                assert_eq!(matrix[i][j], matrix[j][i]);
            }
        }
    }
}
