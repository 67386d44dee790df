//! Binary name codec.
//!
//! A repository key is a flat run of `(type: u8, length: u8, value)` triples
//! with no outer framing. [`decode`] walks the blob front to back and fails
//! on truncation instead of returning a partial name. The single length byte
//! caps each value at 255 bytes; [`encode`] enforces the same limit.
//!
//! [`render`] turns a decoded name into the `/`-joined string used for prefix
//! queries: generic components contribute their text, versions `v=<n>`,
//! timestamps `t=<n>`. Components of any other type are left out.

use std::fmt;

use crate::config::NameTypes;
use crate::error::NameError;

/// Width of the `(type, length)` header in front of every value.
const HEADER_LEN: usize = 2;

/// One `(type, length, value)` unit of a name. The length is implied by `value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameComponent {
    pub typ: u8,
    pub value: Vec<u8>,
}

impl NameComponent {
    pub fn new(typ: u8, value: impl Into<Vec<u8>>) -> Self {
        Self {
            typ,
            value: value.into(),
        }
    }

    /// Component carrying `n` as a minimal big-endian integer (zero is one byte).
    pub fn number(typ: u8, n: u64) -> Self {
        let bytes = n.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        Self::new(typ, &bytes[first..])
    }

    /// Declared length as it appears on the wire.
    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// How a component contributes to the rendered name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Generic,
    Version,
    Timestamp,
    Other,
}

impl NameTypes {
    pub fn classify(&self, component: &NameComponent) -> ComponentKind {
        match component.typ {
            t if t == self.generic => ComponentKind::Generic,
            t if t == self.version => ComponentKind::Version,
            t if t == self.timestamp => ComponentKind::Timestamp,
            _ => ComponentKind::Other,
        }
    }
}

/// Decode a raw key into its components.
pub fn decode(blob: &[u8]) -> Result<Vec<NameComponent>, NameError> {
    let mut components = Vec::new();
    let mut offset = 0;

    while offset < blob.len() {
        let remaining = blob.len() - offset;
        if remaining < HEADER_LEN {
            return Err(NameError::TruncatedHeader { offset });
        }
        let typ = blob[offset];
        let declared = blob[offset + 1] as usize;
        if remaining - HEADER_LEN < declared {
            return Err(NameError::Truncated {
                offset,
                declared,
                remaining: remaining - HEADER_LEN,
            });
        }
        let start = offset + HEADER_LEN;
        components.push(NameComponent::new(typ, &blob[start..start + declared]));
        offset = start + declared;
    }

    Ok(components)
}

/// Concatenate components back into a raw key.
pub fn encode(components: &[NameComponent]) -> Result<Vec<u8>, NameError> {
    let mut out = Vec::with_capacity(
        components
            .iter()
            .map(|c| HEADER_LEN + c.len())
            .sum::<usize>(),
    );
    for component in components {
        let len = u8::try_from(component.len())
            .map_err(|_| NameError::ValueTooLong { len: component.len() })?;
        out.push(component.typ);
        out.push(len);
        out.extend_from_slice(&component.value);
    }
    Ok(out)
}

/// A decoded name rendered to its path-like form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedName {
    pub uri: String,
    /// Value of the last timestamp component, if any.
    pub timestamp: Option<u64>,
}

impl RenderedName {
    pub fn into_versioned(self) -> Option<VersionedName> {
        let timestamp = self.timestamp?;
        Some(VersionedName {
            uri: self.uri,
            timestamp,
        })
    }
}

/// A rendered name that carries a timestamp component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedName {
    pub uri: String,
    pub timestamp: u64,
}

impl VersionedName {
    /// `<name>/t=<timestamp>`, the form announced to peers.
    pub fn compose(name: &str, timestamp: u64) -> Self {
        Self {
            uri: format!("{}/t={timestamp}", name.trim_end_matches('/')),
            timestamp,
        }
    }

    /// Whether the rendered name ends in the `t=<timestamp>` marker.
    pub fn has_timestamp(&self, timestamp: u64) -> bool {
        self.uri.ends_with(&format!("/t={timestamp}"))
    }
}

impl fmt::Display for VersionedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.uri.fmt(f)
    }
}

/// Render decoded components to a `/`-joined string.
pub fn render(components: &[NameComponent], types: &NameTypes) -> Result<RenderedName, NameError> {
    let mut parts = Vec::with_capacity(components.len());
    let mut timestamp = None;
    let mut offset = 0;

    for component in components {
        match types.classify(component) {
            ComponentKind::Generic => parts.push(lossy_text(&component.value)),
            ComponentKind::Version => {
                let n = big_endian(&component.value, offset)?;
                parts.push(format!("v={n}"));
            }
            ComponentKind::Timestamp => {
                let n = big_endian(&component.value, offset)?;
                parts.push(format!("t={n}"));
                timestamp = Some(n);
            }
            ComponentKind::Other => {}
        }
        offset += HEADER_LEN + component.len();
    }

    Ok(RenderedName {
        uri: format!("/{}", parts.join("/")),
        timestamp,
    })
}

/// Decode and render in one step.
pub fn decode_rendered(blob: &[u8], types: &NameTypes) -> Result<RenderedName, NameError> {
    render(&decode(blob)?, types)
}

fn big_endian(value: &[u8], offset: usize) -> Result<u64, NameError> {
    if value.len() > 8 {
        return Err(NameError::NumberTooWide {
            offset,
            width: value.len(),
        });
    }
    Ok(value.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

// Invalid UTF-8 sequences are dropped, not replaced.
fn lossy_text(value: &[u8]) -> String {
    value.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn types() -> NameTypes {
        NameTypes::default()
    }

    fn generic(s: &str) -> NameComponent {
        NameComponent::new(types().generic, s.as_bytes())
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::single(vec![generic("bmw")])]
    #[case::mixed(vec![
        generic("a"),
        NameComponent::number(types().version, 3),
        NameComponent::number(types().timestamp, 1_700_000_000),
    ])]
    #[case::empty_value(vec![NameComponent::new(0x21, Vec::new()), generic("x")])]
    #[case::max_value(vec![NameComponent::new(8, vec![b'z'; 255])])]
    fn decode_returns_encoded_components(#[case] components: Vec<NameComponent>) {
        let blob = encode(&components).unwrap();
        assert_eq!(decode(&blob).unwrap(), components);
    }

    #[test]
    fn decode_reconstructs_original_bytes() {
        let blob = [8, 1, b'a', 0x38, 2, 0x01, 0x00, 8, 3, b'x', b'y', b'z'];
        let components = decode(&blob).unwrap();
        assert_eq!(components.len(), 3);
        assert_eq!(encode(&components).unwrap(), blob);
    }

    #[rstest]
    #[case::value_short(&[8, 5, b'a', b'b'], 0, 5, 2)]
    #[case::last_component(&[8, 1, b'a', 8, 3, b'x'], 3, 3, 1)]
    #[case::no_value_bytes(&[8, 1], 0, 1, 0)]
    fn decode_rejects_truncated_value(
        #[case] blob: &[u8],
        #[case] offset: usize,
        #[case] declared: usize,
        #[case] remaining: usize,
    ) {
        assert_eq!(
            decode(blob),
            Err(NameError::Truncated {
                offset,
                declared,
                remaining
            })
        );
    }

    #[test]
    fn decode_rejects_dangling_type_byte() {
        assert_eq!(
            decode(&[8, 1, b'a', 8]),
            Err(NameError::TruncatedHeader { offset: 3 })
        );
    }

    #[test]
    fn encode_rejects_values_over_255_bytes() {
        let err = encode(&[NameComponent::new(8, vec![0u8; 256])]).unwrap_err();
        assert_eq!(err, NameError::ValueTooLong { len: 256 });
    }

    #[test]
    fn number_uses_minimal_big_endian() {
        assert_eq!(NameComponent::number(0x38, 0).value, vec![0]);
        assert_eq!(NameComponent::number(0x38, 0x0102).value, vec![1, 2]);
    }

    #[test]
    fn render_joins_generic_version_and_timestamp() {
        let t = types();
        let rendered = render(
            &[
                generic("a"),
                generic("b.txt"),
                NameComponent::number(t.version, 2),
                NameComponent::number(t.timestamp, 42),
            ],
            &t,
        )
        .unwrap();
        assert_eq!(rendered.uri, "/a/b.txt/v=2/t=42");
        assert_eq!(rendered.timestamp, Some(42));
    }

    #[test]
    fn render_skips_unknown_types_and_keeps_last_timestamp() {
        let t = types();
        let rendered = render(
            &[
                generic("a"),
                NameComponent::number(t.timestamp, 1),
                NameComponent::new(0x32, vec![7]),
                NameComponent::number(t.timestamp, 9),
            ],
            &t,
        )
        .unwrap();
        assert_eq!(rendered.uri, "/a/t=1/t=9");
        assert_eq!(rendered.timestamp, Some(9));
    }

    #[test]
    fn render_drops_invalid_utf8() {
        let rendered = render(&[NameComponent::new(8, vec![b'o', 0xff, b'k'])], &types()).unwrap();
        assert_eq!(rendered.uri, "/ok");
        assert_eq!(rendered.timestamp, None);
    }

    #[test]
    fn render_rejects_wide_numbers() {
        let t = types();
        let err = render(
            &[generic("a"), NameComponent::new(t.timestamp, vec![1; 9])],
            &t,
        )
        .unwrap_err();
        assert_eq!(err, NameError::NumberTooWide { offset: 3, width: 9 });
    }

    #[test]
    fn render_honours_configured_tags() {
        let custom = NameTypes {
            generic: 1,
            version: 2,
            timestamp: 3,
        };
        let rendered = render(
            &[
                NameComponent::new(1, "x"),
                NameComponent::new(8, "ignored"),
                NameComponent::number(3, 5),
            ],
            &custom,
        )
        .unwrap();
        assert_eq!(rendered.uri, "/x/t=5");
    }

    #[test]
    fn versioned_name_matches_exact_timestamp_suffix() {
        let name = VersionedName::compose("/a/b.txt", 15);
        assert_eq!(name.uri, "/a/b.txt/t=15");
        assert!(name.has_timestamp(15));
        assert!(!name.has_timestamp(5));
    }
}
