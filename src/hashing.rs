//! Hashing - SHA-256 Digests of Render Jobs and Output
//!
//! Identical (source, params) must render identical text; these digests are
//! how the CLI and the tests check that.

use serde::Serialize;
use serde_json::Value as Json;
use sha2::{Digest, Sha256};

use crate::value::ValuesMap;
use crate::width::CharWidth;

/// SHA-256 of `data` as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Digest of rendered text. Wide output is hashed via its UTF-8 form, so
/// both widths agree on equal text.
pub fn output_digest<W: CharWidth>(output: &W::Str) -> String {
    sha256_hex(W::to_narrow(output).as_bytes())
}

/// Compact JSON with object keys in sorted order at every depth.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_value(value)?;
    serde_json::to_string(&sorted(json))
}

fn sorted(json: Json) -> Json {
    match json {
        Json::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Json::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        Json::Array(items) => Json::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

/// Identifies a render job:
/// `sha256(template_name:sha256(source):canonical_params:engine_version)`.
pub fn render_job_hash(
    template_name: &str,
    source: &str,
    params: &ValuesMap,
    engine_version: &str,
) -> Result<String, serde_json::Error> {
    let canonical_params = canonical_json(params)?;
    let combined = format!(
        "{}:{}:{}:{}",
        template_name,
        sha256_hex(source.as_bytes()),
        canonical_params,
        engine_version
    );
    Ok(sha256_hex(combined.as_bytes()))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use crate::width::{Narrow, WString, Wide};
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": {"y": 2, "b": 3}});
        assert_eq!(canonical_json(&obj).unwrap(), r#"{"a":{"b":3,"y":2},"z":1}"#);
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_is_width_independent() {
        let narrow = output_digest::<Narrow>(&"grüße".to_string());
        let wide = output_digest::<Wide>(&WString::from("grüße"));
        assert_eq!(narrow, wide);
    }

    #[test]
    fn test_job_hash_ignores_param_order() {
        let mut a = ValuesMap::new();
        a.insert("x".into(), Value::from(1));
        a.insert("y".into(), Value::from("two"));
        let b: ValuesMap = a.clone().into_iter().collect::<Vec<_>>().into_iter().rev().collect();

        let h1 = render_job_hash("t.j2", "{{ x }}", &a, "1.0.0").unwrap();
        let h2 = render_job_hash("t.j2", "{{ x }}", &b, "1.0.0").unwrap();
        assert_eq!(h1, h2);
        assert_ne!(h1, render_job_hash("t.j2", "{{ y }}", &a, "1.0.0").unwrap());
    }
}
