//! Envelope signature schemes and the sign-in-place pass.
//!
//! A scheme signs an already-serialized envelope without re-serializing it:
//!
//! 1. the envelope is serialized with `Sign` set to the scheme's fixed-length
//!    placeholder,
//! 2. [`locate_sign`] finds the byte range of the `Sign` string content,
//! 3. the digest of `key ++ buffer` (with that range holding the placeholder)
//!    is spliced back into the same range.
//!
//! Decoding runs the same pass over a copy of the received bytes, so the
//! signature always covers the exact bytes on the wire.

use crate::error::{HuskyError, HuskyResult};
use md5::{Digest, Md5};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::ops::Range;

/// Compression threshold of the default scheme, in bytes of serialized body.
pub const DEFAULT_COMPRESS_THRESHOLD: usize = 1024;

const DEFAULT_KEY: &str = "helloworld!";
const DEFAULT_PLACEHOLDER: &str = "12345678";
const DEFAULT_PERMUTATION: [usize; 8] = [0, 3, 4, 8, 10, 11, 13, 14];

const AUTH_KEY: &str = "420e57b017066b44e05ea1577f6e2e12";
const AUTH_PLACEHOLDER: &str = "a9542bb104fe3f4d562e1d275e03f5ba";

/// A signing key, placeholder, optional output permutation and compression
/// threshold.
///
/// Three presets exist: [`Scheme::raw`] for trusted server traffic,
/// [`Scheme::default`] for public client traffic and [`Scheme::auth`] for
/// administrative traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheme {
    name: &'static str,
    key: String,
    placeholder: String,
    permutation: Vec<usize>,
    compress_threshold: usize,
}

impl Default for Scheme {
    /// Obfuscation scheme for client traffic: keyed, permuted, compressing.
    fn default() -> Self {
        Self {
            name: "default",
            key: DEFAULT_KEY.to_string(),
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            permutation: DEFAULT_PERMUTATION.to_vec(),
            compress_threshold: DEFAULT_COMPRESS_THRESHOLD,
        }
    }
}

impl Scheme {
    /// No key, no signature, no compression.
    pub fn raw() -> Self {
        Self {
            name: "raw",
            key: String::new(),
            placeholder: String::new(),
            permutation: Vec::new(),
            compress_threshold: 0,
        }
    }

    /// Keyed scheme emitting the full, unpermuted hex digest.
    pub fn auth() -> Self {
        Self {
            name: "auth",
            key: AUTH_KEY.to_string(),
            placeholder: AUTH_PLACEHOLDER.to_string(),
            permutation: Vec::new(),
            compress_threshold: 0,
        }
    }

    /// Replace the signing key. An empty key disables signing.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Replace the compression threshold. Zero disables compression.
    pub fn with_compress_threshold(mut self, threshold: usize) -> Self {
        self.compress_threshold = threshold;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Value written into `Sign` before the envelope is serialized.
    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    pub fn compress_threshold(&self) -> usize {
        self.compress_threshold
    }

    /// Whether a body of `len` serialized bytes is compressed on encode.
    pub fn should_compress(&self, zip: bool, len: usize) -> bool {
        zip && self.compress_threshold > 0 && len > self.compress_threshold
    }

    /// Sign `buf` in place.
    ///
    /// Returns `Ok(None)` without touching the buffer when the scheme has no
    /// key. Otherwise the `Sign` content must be exactly as long as the
    /// placeholder; it is overwritten with the computed signature, which is
    /// also returned.
    pub fn sign_in_place(&self, buf: &mut [u8]) -> HuskyResult<Option<String>> {
        if self.key.is_empty() {
            return Ok(None);
        }

        let range = locate_sign(buf)?;
        if range.len() != self.placeholder.len() {
            return Err(HuskyError::InvalidSign);
        }

        let offset = self.key.len();
        let mut input = Vec::with_capacity(offset + buf.len());
        input.extend_from_slice(self.key.as_bytes());
        input.extend_from_slice(buf);
        input[offset + range.start..offset + range.end].copy_from_slice(self.placeholder.as_bytes());

        let sign = self.digest(&input);
        if sign.len() != range.len() {
            return Err(HuskyError::InvalidSign);
        }
        buf[range].copy_from_slice(sign.as_bytes());
        Ok(Some(sign))
    }

    fn digest(&self, input: &[u8]) -> String {
        let sum = hex::encode(Md5::digest(input));
        if self.permutation.len() != self.placeholder.len() {
            return sum;
        }
        let chars = sum.as_bytes();
        self.permutation
            .iter()
            .filter_map(|&i| chars.get(i).map(|&c| c as char))
            .collect()
    }
}

#[derive(Deserialize)]
struct SignField<'a> {
    #[serde(rename = "Sign", borrow, default)]
    sign: Option<&'a RawValue>,
}

/// Locate the byte range of the top-level `Sign` string content in a
/// serialized envelope (quotes excluded).
///
/// Fails with [`HuskyError::InvalidSign`] when the field is missing or not a
/// string.
pub fn locate_sign(buf: &[u8]) -> HuskyResult<Range<usize>> {
    let field: SignField<'_> = serde_json::from_slice(buf)?;
    let raw = field.sign.ok_or(HuskyError::InvalidSign)?.get();
    if raw.len() < 2 || !raw.starts_with('"') || !raw.ends_with('"') {
        return Err(HuskyError::InvalidSign);
    }

    // `raw` borrows from `buf`, so its address gives the offset.
    let start = (raw.as_ptr() as usize)
        .checked_sub(buf.as_ptr() as usize)
        .filter(|start| start + raw.len() <= buf.len())
        .ok_or(HuskyError::InvalidSign)?;
    Ok(start + 1..start + raw.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_sign_finds_string_content() {
        let buf = br#"{"Id":"a.b","Data":{"Sign":"nested"},"Sign":"12345678","Ver":1}"#;
        let range = locate_sign(buf).unwrap();
        assert_eq!(&buf[range], b"12345678");
    }

    #[test]
    fn locate_sign_after_escaped_strings() {
        let buf = br#"{"Id":"say \"Sign\"","Sign":"abcd"}"#;
        let range = locate_sign(buf).unwrap();
        assert_eq!(&buf[range], b"abcd");
    }

    #[test]
    fn locate_sign_missing_field() {
        let err = locate_sign(br#"{"Id":"x"}"#).unwrap_err();
        assert!(matches!(err, HuskyError::InvalidSign));
    }

    #[test]
    fn locate_sign_non_string() {
        let err = locate_sign(br#"{"Sign":12345678}"#).unwrap_err();
        assert!(matches!(err, HuskyError::InvalidSign));
    }

    #[test]
    fn raw_scheme_leaves_buffer_untouched() {
        let mut buf = br#"{"Id":"x","Data":null}"#.to_vec();
        let before = buf.clone();
        assert_eq!(Scheme::raw().sign_in_place(&mut buf).unwrap(), None);
        assert_eq!(buf, before);
    }

    #[test]
    fn default_scheme_permutes_digest() {
        let scheme = Scheme::default();
        let mut buf = br#"{"Id":"x","Data":null,"Sign":"12345678"}"#.to_vec();
        let original = buf.clone();

        let sign = scheme.sign_in_place(&mut buf).unwrap().unwrap();
        assert_eq!(sign.len(), 8);

        let mut input = DEFAULT_KEY.as_bytes().to_vec();
        input.extend_from_slice(&original);
        let full = hex::encode(Md5::digest(&input));
        let expected: String = DEFAULT_PERMUTATION
            .iter()
            .map(|&i| full.as_bytes()[i] as char)
            .collect();
        assert_eq!(sign, expected);

        let range = locate_sign(&buf).unwrap();
        assert_eq!(&buf[range], expected.as_bytes());
    }

    #[test]
    fn auth_scheme_emits_full_digest() {
        let scheme = Scheme::auth();
        let mut buf = format!(r#"{{"Id":"x","Data":null,"Sign":"{AUTH_PLACEHOLDER}"}}"#).into_bytes();
        let sign = scheme.sign_in_place(&mut buf).unwrap().unwrap();
        assert_eq!(sign.len(), 32);
        assert!(sign.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signing_is_independent_of_current_sign_value() {
        let scheme = Scheme::default();
        let mut a = br#"{"Id":"x","Sign":"12345678"}"#.to_vec();
        let mut b = br#"{"Id":"x","Sign":"ffffffff"}"#.to_vec();
        assert_eq!(
            scheme.sign_in_place(&mut a).unwrap(),
            scheme.sign_in_place(&mut b).unwrap()
        );
        assert_eq!(a, b);
    }

    #[test]
    fn wrong_sign_length_rejected() {
        let mut buf = br#"{"Id":"x","Sign":"1234"}"#.to_vec();
        let err = Scheme::default().sign_in_place(&mut buf).unwrap_err();
        assert!(matches!(err, HuskyError::InvalidSign));
    }

    #[test]
    fn key_changes_signature() {
        let mut a = br#"{"Id":"x","Sign":"12345678"}"#.to_vec();
        let mut b = a.clone();
        let s1 = Scheme::default().sign_in_place(&mut a).unwrap();
        let s2 = Scheme::default()
            .with_key("another key")
            .sign_in_place(&mut b)
            .unwrap();
        assert_ne!(s1, s2);
    }

    #[test]
    fn compression_threshold() {
        let scheme = Scheme::default();
        assert!(!scheme.should_compress(false, 10_000));
        assert!(!scheme.should_compress(true, DEFAULT_COMPRESS_THRESHOLD));
        assert!(scheme.should_compress(true, DEFAULT_COMPRESS_THRESHOLD + 1));
        assert!(!Scheme::auth().should_compress(true, 10_000));
    }
}
