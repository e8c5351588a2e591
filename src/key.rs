// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Query keys and their canonical hashes
//!
//! A [`QueryKey`] names one unit of cached data: a [`Namespace`] tag for the
//! logical query type plus an optional JSON parameter. Every key maps to a
//! [`CanonicalHash`], the string the cache store and hydration payloads are
//! keyed by.
//!
//! # Canonical form
//!
//! The hash is an exact structural serialization, never a digest:
//!
//! - no parameter: `["<namespace>"]`
//! - with parameter: `["<namespace>",<canonical JSON of the parameter>]`
//!
//! Canonical JSON uses this total order over shapes:
//!
//! - objects: members sorted by the UTF-8 bytes of their keys
//! - arrays: elements in sequence order
//! - strings: JSON-escaped
//! - numbers: `serde_json`'s shortest round-trip form, so the integer `1` and
//!   the float `1.0` are different parameters
//! - `true`, `false`, `null` literally
//!
//! Object keys are sorted by the encoder itself, so the output does not depend
//! on how `serde_json::Map` was compiled.
//!
//! A bare value and a one-element array holding it are different keys
//! (`["ns","a"]` vs `["ns",["a"]]`). Only `None` means "no parameter": `0`,
//! `""` and `false` are real parameters.
//!
//! # Examples
//!
//! ```rust
//! use explorer_query::{canonicalize, QueryKey};
//! use serde_json::json;
//!
//! let a = QueryKey::new("ns", &json!({"a": 1, "b": 2})).unwrap();
//! let b = QueryKey::new("ns", &json!({"b": 2, "a": 1})).unwrap();
//! assert_eq!(a.hash(), b.hash());
//! assert_eq!(a.hash().as_str(), r#"["ns",{"a":1,"b":2}]"#);
//!
//! assert_ne!(
//!     canonicalize("ns", Some(&json!("a"))),
//!     canonicalize("ns", Some(&json!(["a"]))),
//! );
//! ```

use std::borrow::{Borrow, Cow};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::KeyError;

/// Tag identifying a logical query type, e.g. `transactions/SINGLE`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace(Cow<'static, str>);

impl Namespace {
    /// Creates a namespace from a string constant
    pub const fn from_static(tag: &'static str) -> Self {
        Self(Cow::Borrowed(tag))
    }

    /// Returns the namespace tag
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Namespace {
    fn from(tag: &'static str) -> Self {
        Self::from_static(tag)
    }
}

impl From<String> for Namespace {
    fn from(tag: String) -> Self {
        Self(Cow::Owned(tag))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic string form of a [`QueryKey`]
///
/// Used as the lookup key of the cache store and of hydration payloads.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalHash(String);

impl CanonicalHash {
    /// Returns the hash as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CanonicalHash {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Logical identifier for a unit of cached data
///
/// Two keys are equal iff their namespaces match and their parameters are
/// structurally equal. The canonical hash is computed once, at construction.
#[derive(Debug, Clone)]
pub struct QueryKey {
    namespace: Namespace,
    param: Option<Value>,
    hash: CanonicalHash,
}

impl QueryKey {
    /// Creates a key with a parameter
    ///
    /// The parameter is converted to JSON with `serde_json::to_value`.
    pub fn new<P>(namespace: impl Into<Namespace>, param: &P) -> Result<Self, KeyError>
    where
        P: Serialize + ?Sized,
    {
        let namespace = namespace.into();
        let param = serde_json::to_value(param)
            .map_err(|e| KeyError::invalid_param(namespace.as_str(), e))?;
        Self::from_parts(namespace, Some(param))
    }

    /// Creates a key without a parameter
    pub fn bare(namespace: impl Into<Namespace>) -> Result<Self, KeyError> {
        Self::from_parts(namespace.into(), None)
    }

    /// Creates a key from an already-encoded parameter
    pub fn from_parts(namespace: Namespace, param: Option<Value>) -> Result<Self, KeyError> {
        if namespace.as_str().is_empty() {
            return Err(KeyError::EmptyNamespace);
        }
        let hash = canonicalize(namespace.as_str(), param.as_ref());
        Ok(Self {
            namespace,
            param,
            hash,
        })
    }

    /// The namespace tag
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The parameter, if any
    pub fn param(&self) -> Option<&Value> {
        self.param.as_ref()
    }

    /// The canonical hash of this key
    pub fn hash(&self) -> &CanonicalHash {
        &self.hash
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.hash.fmt(f)
    }
}

/// Computes the canonical hash for a namespace and optional parameter
///
/// Pure and deterministic: structurally equal inputs always produce the same
/// string, and because the encoding is exact, structurally different inputs
/// never do.
pub fn canonicalize(namespace: &str, param: Option<&Value>) -> CanonicalHash {
    let mut out = String::with_capacity(namespace.len() + 8);
    out.push('[');
    write_string(namespace, &mut out);
    if let Some(param) = param {
        out.push(',');
        write_canonical(param, &mut out);
    }
    out.push(']');
    CanonicalHash(out)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> = map.iter().collect();
            members.sort_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));
            out.push('{');
            for (i, (name, member)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(name, out);
                out.push(':');
                write_canonical(member, out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // Display for a JSON string value is its escaped, quoted form
    out.push_str(&Value::String(s.to_owned()).to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_key_hash() {
        let key = QueryKey::bare("blocks/LIST").unwrap();
        assert_eq!(key.hash().as_str(), r#"["blocks/LIST"]"#);
        assert!(key.param().is_none());
    }

    #[test]
    fn test_string_param_is_quoted() {
        let key = QueryKey::new("transactions/SINGLE", "abc123").unwrap();
        assert_eq!(key.hash().as_str(), r#"["transactions/SINGLE","abc123"]"#);
    }

    #[test]
    fn test_object_param_order_independent() {
        let a = canonicalize("ns", Some(&json!({"a": 1, "b": 2})));
        let b = canonicalize("ns", Some(&json!({"b": 2, "a": 1})));
        let c = canonicalize("ns", Some(&json!({"a": 1})));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_nested_objects_sorted() {
        let hash = canonicalize("ns", Some(&json!({"z": {"y": 1, "x": [2, {"b": 0, "a": 0}]}})));
        assert_eq!(
            hash.as_str(),
            r#"["ns",{"z":{"x":[2,{"a":0,"b":0}],"y":1}}]"#
        );
    }

    #[test]
    fn test_bare_value_differs_from_single_element_array() {
        let bare = canonicalize("ns", Some(&json!("a")));
        let wrapped = canonicalize("ns", Some(&json!(["a"])));
        assert_ne!(bare, wrapped);
    }

    #[test]
    fn test_falsy_params_are_kept() {
        let none = canonicalize("ns", None);
        for falsy in [json!(0), json!(""), json!(false), json!(null)] {
            assert_ne!(canonicalize("ns", Some(&falsy)), none, "{falsy} was dropped");
        }
    }

    #[test]
    fn test_integer_and_float_are_distinct() {
        assert_ne!(
            canonicalize("ns", Some(&json!(1))),
            canonicalize("ns", Some(&json!(1.0)))
        );
    }

    #[test]
    fn test_namespace_and_param_do_not_run_together() {
        // "a" with param ["b"] must not look like some other namespace
        let a = canonicalize("a", Some(&json!("b")));
        let b = canonicalize(r#"a","b"#, None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_string_escaping() {
        let hash = canonicalize("ns", Some(&json!("quote\"and\\slash\n")));
        assert_eq!(hash.as_str(), r#"["ns","quote\"and\\slash\n"]"#);
    }

    #[test]
    fn test_empty_namespace_rejected() {
        let err = QueryKey::bare(String::new()).unwrap_err();
        assert!(matches!(err, KeyError::EmptyNamespace));
    }

    #[test]
    fn test_key_equality_follows_structure() {
        let a = QueryKey::new("accounts/ACCOUNT_TRANSACTIONS", &("SP123", 10)).unwrap();
        let b = QueryKey::new("accounts/ACCOUNT_TRANSACTIONS", &json!(["SP123", 10])).unwrap();
        let c = QueryKey::new("accounts/ACCOUNT_TRANSACTIONS", &("SP123", 20)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_invalid_param_reports_namespace() {
        use std::collections::HashMap;
        let mut bad = HashMap::new();
        bad.insert((1, 2), "tuple keys are not JSON object keys");
        let err = QueryKey::new("ns", &bad).unwrap_err();
        assert!(matches!(err, KeyError::InvalidParam { ref namespace, .. } if namespace == "ns"));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn json_strategy() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(|n| json!(n)),
                "[a-z0-9\"\\\\]{0,6}".prop_map(Value::String),
            ];
            leaf.prop_recursive(3, 32, 4, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                    prop::collection::vec(("[a-d]{1,2}", inner), 0..4).prop_map(|members| {
                        Value::Object(members.into_iter().collect())
                    }),
                ]
            })
        }

        proptest! {
            /// Property: the hash does not depend on the order object members were inserted
            #[test]
            fn test_member_order_irrelevant(
                members in prop::collection::vec(("[a-f]{1,3}", any::<i32>()), 0..8)
            ) {
                let mut dedup = std::collections::BTreeMap::new();
                for (name, n) in &members {
                    dedup.insert(name.clone(), *n);
                }
                let forward: serde_json::Map<String, Value> =
                    dedup.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
                let reverse: serde_json::Map<String, Value> =
                    dedup.iter().rev().map(|(k, v)| (k.clone(), json!(v))).collect();

                prop_assert_eq!(
                    canonicalize("ns", Some(&Value::Object(forward))),
                    canonicalize("ns", Some(&Value::Object(reverse)))
                );
            }

            /// Property: hashes are equal exactly when the parameters are equal
            #[test]
            fn test_hash_equality_matches_structural_equality(
                a in json_strategy(),
                b in json_strategy()
            ) {
                let same_hash = canonicalize("ns", Some(&a)) == canonicalize("ns", Some(&b));
                prop_assert_eq!(same_hash, a == b);
            }

            /// Property: the canonical form is itself valid JSON that decodes back to the key
            #[test]
            fn test_canonical_form_is_json(param in json_strategy()) {
                let hash = canonicalize("ns", Some(&param));
                let decoded: Value = serde_json::from_str(hash.as_str()).unwrap();
                prop_assert_eq!(decoded, json!(["ns", param]));
            }
        }
    }
}
