use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

use crate::error::VCardError;

pub const PHOTO_BINVAL: &str = "PHOTO/BINVAL";

/// vCard fields keyed by path, e.g. `NICKNAME` or `PHOTO/BINVAL`.
///
/// Encoding is the protocol engine's concern; Parley only passes the
/// field map through and derives the avatar hash from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VCard {
    fields: BTreeMap<String, String>,
}

impl VCard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.fields.get(path).map(String::as_str)
    }

    pub fn set(&mut self, path: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(path.into(), value.into());
    }

    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.fields.remove(path)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Hex SHA-1 of the decoded photo, or `None` when the card has no photo.
    pub fn avatar_hash(&self) -> Result<Option<String>, VCardError> {
        let Some(encoded) = self.get(PHOTO_BINVAL) else {
            return Ok(None);
        };

        // Line-wrapped base64 is the norm in vCards.
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let data = STANDARD.decode(compact)?;

        let mut hasher = Sha1::new();
        hasher.update(&data);
        Ok(Some(hex::encode(hasher.finalize())))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VCard {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avatar_hash_is_sha1_of_decoded_photo() {
        // "hello" base64-encoded
        let vcard: VCard = [(PHOTO_BINVAL, "aGVsbG8=")].into_iter().collect();
        assert_eq!(
            vcard.avatar_hash().unwrap().as_deref(),
            Some("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d")
        );
    }

    #[test]
    fn avatar_hash_ignores_line_wrapping() {
        let vcard: VCard = [(PHOTO_BINVAL, "aGVs\n  bG8=\n")].into_iter().collect();
        assert_eq!(
            vcard.avatar_hash().unwrap().as_deref(),
            Some("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d")
        );
    }

    #[test]
    fn no_photo_means_no_hash() {
        let mut vcard = VCard::new();
        vcard.set("NICKNAME", "alice");
        assert_eq!(vcard.avatar_hash().unwrap(), None);
    }

    #[test]
    fn invalid_photo_is_an_error() {
        let vcard: VCard = [(PHOTO_BINVAL, "!!not base64!!")].into_iter().collect();
        assert!(matches!(
            vcard.avatar_hash(),
            Err(VCardError::InvalidPhoto(_))
        ));
    }
}
