//! Shared dense-vector math for the Memory Store's and Knowledge Retriever's
//! cosine-similarity search (§4.4, §4.5). No vector index is maintained —
//! scoring happens in-process over the candidate set a SQL filter already
//! narrowed down; fine at the scale this system targets (I3's "scaling
//! boundary" call-out), wrong at a much larger corpus size.

/// Cosine similarity of two equal-length vectors, in `[-1.0, 1.0]`.
/// Returns `0.0` for a zero-magnitude vector rather than dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "embedding dimension mismatch");
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Encode an embedding as a JSON array string for storage in a TEXT column
/// (§ ambient persistence: no native vector column in SQLite).
pub fn encode_embedding(v: &[f32]) -> String {
    serde_json::to_string(v).expect("Vec<f32> always serializes")
}

pub fn decode_embedding(s: &str) -> Result<Vec<f32>, serde_json::Error> {
    serde_json::from_str(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![0.1, 0.2, 0.3];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_is_handled_without_panic() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn embedding_round_trips_through_json_encoding() {
        let v = vec![0.5_f32, -0.25, 1.0];
        let encoded = encode_embedding(&v);
        let decoded = decode_embedding(&encoded).unwrap();
        assert_eq!(v, decoded);
    }
}
