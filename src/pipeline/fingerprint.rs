/// Cache key generation for resolved invocations
///
/// The key is a SHA256 over a canonical encoding of:
/// - Target identifier
/// - Call mode
/// - Positional argument values (in order)
/// - Keyword arguments (sorted by name)
///
/// Every value is type-tagged and length-prefixed, and maps are encoded in key
/// order, so the key depends only on value equality, never on insertion order.
/// Opaque values have no stable representation and fail the computation.
use sha2::{Digest, Sha256};
use std::fmt;

use super::node::CallMode;
use super::registry::Arguments;
use super::value::Value;

/// Bumped whenever the encoding changes, so old snapshots stop matching
const ENCODING_VERSION: &[u8] = b"confgraph-fingerprint-v1\0";

/// Hex-encoded SHA256 cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts exactly 64 lowercase hex characters
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(s.to_string()))
    }

    /// First 12 characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An argument that could not be encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhashableArgument {
    /// Argument path, e.g. `model.layers[2]` or `_args_[0]`
    pub argument: String,
    pub reason: String,
}

/// Compute the cache key for a target called with already-resolved arguments
pub fn fingerprint(
    target_id: &str,
    call: CallMode,
    args: &Arguments,
) -> Result<Fingerprint, UnhashableArgument> {
    let mut hasher = Sha256::new();
    hasher.update(ENCODING_VERSION);

    write_str(&mut hasher, target_id);
    write_str(&mut hasher, call.as_str());

    write_len(&mut hasher, args.positional().len());
    for (i, value) in args.positional().iter().enumerate() {
        encode(&mut hasher, value, &|| format!("_args_[{}]", i))?;
    }

    // BTreeMap iteration is already sorted by name
    write_len(&mut hasher, args.keyword().len());
    for (name, value) in args.keyword() {
        write_str(&mut hasher, name);
        encode(&mut hasher, value, &|| name.clone())?;
    }

    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

fn write_len(hasher: &mut Sha256, len: usize) {
    hasher.update((len as u64).to_le_bytes());
}

fn write_str(hasher: &mut Sha256, s: &str) {
    write_len(hasher, s.len());
    hasher.update(s.as_bytes());
}

fn encode(
    hasher: &mut Sha256,
    value: &Value,
    path: &dyn Fn() -> String,
) -> Result<(), UnhashableArgument> {
    match value {
        Value::Null => hasher.update(b"N"),
        Value::Bool(b) => hasher.update([b'B', u8::from(*b)]),
        Value::Int(i) => {
            hasher.update(b"I");
            hasher.update(i.to_le_bytes());
        }
        Value::Float(f) => {
            hasher.update(b"F");
            hasher.update(canonical_float_bits(*f).to_le_bytes());
        }
        Value::Str(s) => {
            hasher.update(b"S");
            write_str(hasher, s);
        }
        Value::List(items) => {
            hasher.update(b"L");
            write_len(hasher, items.len());
            for (i, item) in items.iter().enumerate() {
                encode(hasher, item, &|| format!("{}[{}]", path(), i))?;
            }
        }
        Value::Map(map) => {
            hasher.update(b"M");
            write_len(hasher, map.len());
            for (k, v) in map {
                write_str(hasher, k);
                encode(hasher, v, &|| format!("{}.{}", path(), k))?;
            }
        }
        Value::Opaque(o) => {
            return Err(UnhashableArgument {
                argument: path(),
                reason: format!(
                    "opaque value of type {} has no stable representation; \
                     set _cache_result_: false on this node",
                    o.type_name()
                ),
            });
        }
    }
    Ok(())
}

/// `-0.0 == 0.0` and all NaNs share one bit pattern
fn canonical_float_bits(f: f64) -> u64 {
    if f == 0.0 {
        0.0f64.to_bits()
    } else if f.is_nan() {
        f64::NAN.to_bits()
    } else {
        f.to_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn kw(pairs: &[(&str, Value)]) -> Arguments {
        Arguments::new(
            Vec::new(),
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let args = kw(&[("a", Value::Int(1)), ("b", Value::from("x"))]);
        let key1 = fingerprint("pkg::f", CallMode::Keyword, &args).unwrap();
        let key2 = fingerprint("pkg::f", CallMode::Keyword, &args).unwrap();

        assert_eq!(key1, key2);
        assert_eq!(key1.as_str().len(), 64);
        assert_eq!(Fingerprint::parse(key1.as_str()), Some(key1));
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let ab = kw(&[("a", Value::Int(1)), ("b", Value::Int(2))]);
        let ba = kw(&[("b", Value::Int(2)), ("a", Value::Int(1))]);
        assert_eq!(
            fingerprint("t", CallMode::Keyword, &ab).unwrap(),
            fingerprint("t", CallMode::Keyword, &ba).unwrap()
        );
    }

    #[test]
    fn test_fingerprint_changes_with_target_and_args() {
        let args = kw(&[("a", Value::Int(1))]);
        let base = fingerprint("t", CallMode::Keyword, &args).unwrap();

        assert_ne!(base, fingerprint("u", CallMode::Keyword, &args).unwrap());
        assert_ne!(
            base,
            fingerprint("t", CallMode::Keyword, &kw(&[("a", Value::Int(2))])).unwrap()
        );
        // Same number, different type
        assert_ne!(
            base,
            fingerprint("t", CallMode::Keyword, &kw(&[("a", Value::Float(1.0))])).unwrap()
        );
        // Same value, different name
        assert_ne!(
            base,
            fingerprint("t", CallMode::Keyword, &kw(&[("b", Value::Int(1))])).unwrap()
        );
    }

    #[test]
    fn test_positional_order_matters() {
        let ab = Arguments::new(vec![Value::Int(1), Value::Int(2)], BTreeMap::new());
        let ba = Arguments::new(vec![Value::Int(2), Value::Int(1)], BTreeMap::new());
        assert_ne!(
            fingerprint("t", CallMode::Positional, &ab).unwrap(),
            fingerprint("t", CallMode::Positional, &ba).unwrap()
        );
    }

    #[test]
    fn test_nested_strings_are_length_prefixed() {
        let joined = kw(&[("a", Value::List(vec![Value::from("ab"), Value::from("c")]))]);
        let split = kw(&[("a", Value::List(vec![Value::from("a"), Value::from("bc")]))]);
        assert_ne!(
            fingerprint("t", CallMode::Keyword, &joined).unwrap(),
            fingerprint("t", CallMode::Keyword, &split).unwrap()
        );
    }

    #[test]
    fn test_signed_zero_and_nan_are_canonical() {
        let pos = kw(&[("x", Value::Float(0.0))]);
        let neg = kw(&[("x", Value::Float(-0.0))]);
        assert_eq!(
            fingerprint("t", CallMode::Keyword, &pos).unwrap(),
            fingerprint("t", CallMode::Keyword, &neg).unwrap()
        );

        let nan1 = kw(&[("x", Value::Float(f64::NAN))]);
        let nan2 = kw(&[("x", Value::Float(-f64::NAN))]);
        assert_eq!(
            fingerprint("t", CallMode::Keyword, &nan1).unwrap(),
            fingerprint("t", CallMode::Keyword, &nan2).unwrap()
        );
    }

    #[test]
    fn test_opaque_argument_fails_with_path() {
        let mut inner = BTreeMap::new();
        inner.insert("weights".to_string(), Value::opaque(vec![0.5f32]));
        let args = kw(&[("model", Value::List(vec![Value::Null, Value::Map(inner)]))]);

        let err = fingerprint("t", CallMode::Keyword, &args).unwrap_err();
        assert_eq!(err.argument, "model[1].weights");
        assert!(err.reason.contains("_cache_result_"));
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        assert!(Fingerprint::parse("abc").is_none());
        assert!(Fingerprint::parse(&"G".repeat(64)).is_none());
        assert!(Fingerprint::parse(&"A".repeat(64)).is_none());
        assert!(Fingerprint::parse(&"a".repeat(64)).is_some());
    }
}
