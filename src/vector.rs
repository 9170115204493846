//! Vector literal codec.
//!
//! The storage engine accepts embeddings as text literals of the form
//! `[n1,n2,...,nk]` (the pgvector input syntax). [`encode`] rounds each
//! component to six decimal places to strip floating-point noise from the
//! embedding model, and renders non-finite components as `0`. [`decode`]
//! is the inverse and tolerates an empty literal.
//!
//! Both functions are pure and deterministic: the same vector always
//! produces the same literal, independent of platform.

use crate::error::{Error, Result};

/// Decimal places kept when encoding a component.
const PRECISION: f64 = 1e6;

/// Encode a vector as a storage-engine literal.
pub fn encode(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 10 + 2);
    out.push('[');
    for (i, &component) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if component.is_finite() {
            let rounded = (f64::from(component) * PRECISION).round() / PRECISION;
            // f64 Display prints the shortest round-tripping form, which
            // is stable across platforms.
            out.push_str(&rounded.to_string());
        } else {
            out.push('0');
        }
    }
    out.push(']');
    out
}

/// Decode a storage-engine literal back into a vector.
///
/// An empty literal (`""` or `"[]"`) decodes to a zero-length vector.
pub fn decode(literal: &str) -> Result<Vec<f32>> {
    let trimmed = literal.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| Error::InputRejected(format!("bad vector literal: {:?}", literal)))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|_| Error::InputRejected(format!("bad vector component: {:?}", part)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_basic() {
        assert_eq!(encode(&[1.0, -2.5, 0.0]), "[1,-2.5,0]");
    }

    #[test]
    fn test_encode_rounds_to_six_places() {
        let literal = encode(&[0.123_456_789, 1.000_000_4]);
        assert_eq!(literal, "[0.123457,1]");
    }

    #[test]
    fn test_encode_non_finite_as_zero() {
        let literal = encode(&[f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 2.0]);
        assert_eq!(literal, "[0,0,0,2]");
    }

    #[test]
    fn test_encode_empty() {
        assert_eq!(encode(&[]), "[]");
    }

    #[test]
    fn test_decode_empty_literal() {
        assert!(decode("").unwrap().is_empty());
        assert!(decode("[]").unwrap().is_empty());
        assert!(decode("[ ]").unwrap().is_empty());
    }

    #[test]
    fn test_roundtrip_six_decimal_precision() {
        let original = vec![0.318_309_89_f32, -0.000_001_2, 42.5, 1.0 / 3.0];
        let restored = decode(&encode(&original)).unwrap();
        assert_eq!(restored.len(), original.len());
        for (a, b) in original.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_encode_deterministic() {
        let v = vec![0.1, 0.2, 0.300_000_04_f32];
        assert_eq!(encode(&v), encode(&v.clone()));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("[1.0,abc]").is_err());
    }

    #[test]
    fn test_decode_rejects_malformed_brackets() {
        assert!(decode("[1,2").is_err());
        assert!(decode("1,2]").is_err());
        assert!(decode("1,2").is_err());
        assert!(decode("[[1,2]]").is_err());
    }
}
