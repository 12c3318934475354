//! Bidirectional mapping between GitLab names (groups/projects/users full
//! paths) and the two Kubernetes-legal alphabets we need to project them
//! into: namespace names (lossy) and label values (lossless).

use crate::errors::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NAMESPACE_NAME_RE: Regex =
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex");
    static ref LABEL_VALUE_RE: Regex =
        Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$").expect("valid regex");
    static ref GITLAB_NAME_RE: Regex =
        Regex::new(r"^(?:[A-Za-z0-9_.][A-Za-z0-9_.]*[A-Za-z0-9_-]|[a-zA-Z0-9_])$")
            .expect("valid regex");
}

/// Encode a GitLab full path into a Kubernetes namespace name.
///
/// This encoding is lossy (distinct GitLab paths can collide on the same
/// namespace name) and is only ever used to pick a name for a brand-new
/// namespace; namespaces are always looked up again by origin label, never
/// by re-deriving this name.
pub fn encode_namespace_name(name: &str) -> Result<String> {
    let mut out = name.to_lowercase();
    for (from, to) in [
        (" ", ""),
        ("ü", "ue"),
        ("ö", "oe"),
        ("ä", "ae"),
        ("ß", "ss"),
        ("_", "-"),
        (".", "-"),
        ("/", "-"),
    ] {
        out = out.replace(from, to);
    }

    if !NAMESPACE_NAME_RE.is_match(&out) {
        return Err(Error::InvalidNamespaceName(name.to_string()));
    }
    Ok(out)
}

/// Encode a GitLab full path into the value of the `gitlab-origin` label.
///
/// Unlike [`encode_namespace_name`], this encoding is lossless: `decode_label_value`
/// is its exact inverse.
pub fn encode_label_value(name: &str) -> Result<String> {
    let encoded = name.replace('_', "__").replace('/', "_");
    if !LABEL_VALUE_RE.is_match(&encoded) {
        return Err(Error::InvalidLabelValue(name.to_string()));
    }
    Ok(encoded)
}

/// Decode a `gitlab-origin` label value back into the original GitLab full
/// path. This is the inverse of [`encode_label_value`].
pub fn decode_label_value(label: &str) -> Result<String> {
    let mut decoded = String::with_capacity(label.len());
    let chars: Vec<char> = label.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '_' {
            if i + 1 < chars.len() && chars[i + 1] == '_' {
                decoded.push('_');
                i += 2;
            } else {
                decoded.push('/');
                i += 1;
            }
        } else {
            decoded.push(chars[i]);
            i += 1;
        }
    }

    if !decoded.is_empty() && !GITLAB_NAME_RE.is_match(&decoded) {
        return Err(Error::InvalidLabelValue(label.to_string()));
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case("uP/uP-Chief", "uP_uP-Chief")]
    #[case("u_P/uP-Chief", "u__P_uP-Chief")]
    #[case("u__.P/uP-Chief", "u____.P_uP-Chief")]
    #[case("uP-uP-Chief", "uP-uP-Chief")]
    fn label_encoding_matches_literal_scenarios(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(encode_label_value(input).unwrap(), expected);
    }

    #[rstest]
    #[case("uP/uP-Chief")]
    #[case("u_P/uP-Chief")]
    #[case("u__.P/uP-Chief")]
    #[case("uP-uP-Chief")]
    #[case("team-x/app")]
    #[case("alice")]
    fn label_round_trip(#[case] input: &str) {
        let encoded = encode_label_value(input).expect("encode should succeed");
        let decoded = decode_label_value(&encoded).expect("decode should succeed");
        assert_eq!(decoded, input);
    }

    #[test]
    fn namespace_encoding_matches_literal_scenario() {
        let encoded = encode_namespace_name("Group/Sub_Project.v1").unwrap();
        assert_eq!(encoded, "group-sub-project-v1");
        assert!(NAMESPACE_NAME_RE.is_match(&encoded));
    }

    #[test]
    fn namespace_encoding_handles_umlauts() {
        assert_eq!(encode_namespace_name("Büro").unwrap(), "buero");
        assert_eq!(encode_namespace_name("Maß").unwrap(), "mass");
    }

    #[test]
    fn namespace_encoding_rejects_names_that_never_become_legal() {
        // an all-symbol path collapses to the empty string, which the
        // namespace regex (anchored, requiring at least one alphanumeric)
        // never matches
        assert!(encode_namespace_name("___").is_err());
    }
}
