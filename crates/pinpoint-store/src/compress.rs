//! Bijective compression of high-cardinality string keys.
//!
//! Reading maps are keyed by MAC addresses, which are long and repeat across
//! millions of rows. The compressor assigns each newly-seen key the next
//! short token from a fixed alphabet and encodes maps as `token=value`
//! pairs. The dictionary only ever grows, so rows written under an older
//! dictionary remain decodable forever.

use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use pinpoint_core::SensorValues;

/// Token alphabet, in lexicographic assignment order.
const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Separator between encoded `token=value` pairs. Never present in tokens
/// (alphabet above) or values (decimal float representations).
const PAIR_SEPARATOR: char = '~';

/// Serialized dictionary state.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedState {
    keys: Vec<String>,
}

/// A persistent key dictionary with bijective map encoding.
///
/// Tokens are drawn from [`ALPHABET`] in lexicographic order; once all
/// tokens of the current length are spent, length grows by one. Each newly
/// seen key is appended to the dictionary; previously seen keys reuse their
/// token. `expand(shrink(m)) == m` holds for every map `m`.
#[derive(Debug, Default)]
pub struct KeyCompressor {
    keys: Vec<String>,
    index: HashMap<String, usize>,
    dirty: bool,
}

impl KeyCompressor {
    /// An empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a dictionary from its serialized form.
    ///
    /// An empty string yields an empty dictionary.
    ///
    /// # Errors
    ///
    /// Returns an error if the serialized form is not valid JSON.
    pub fn from_saved(saved: &str) -> Result<Self> {
        if saved.is_empty() {
            return Ok(Self::new());
        }
        let state: SavedState = serde_json::from_str(saved)
            .map_err(|e| StoreError::Compressor(format!("bad dictionary: {e}")))?;
        let index = state
            .keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();
        Ok(Self {
            keys: state.keys,
            index,
            dirty: false,
        })
    }

    /// Serialize the dictionary for keystore persistence.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn save(&self) -> Result<String> {
        serde_json::to_string(&SavedState {
            keys: self.keys.clone(),
        })
        .map_err(|e| StoreError::Compressor(format!("cannot save dictionary: {e}")))
    }

    /// Number of keys the dictionary has assigned tokens to.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the dictionary is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether the dictionary grew since construction.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Encode a reading map into its compact string form, extending the
    /// dictionary with any unseen keys.
    pub fn shrink_map_to_string(&mut self, map: &SensorValues) -> String {
        let mut pairs = Vec::with_capacity(map.len());
        for (key, value) in map {
            let token = token_for(self.token_index(key));
            pairs.push(format!("{token}={value}"));
        }
        pairs.join(&PAIR_SEPARATOR.to_string())
    }

    /// Decode a compact string back into the reading map it was encoded
    /// from.
    ///
    /// # Errors
    ///
    /// Returns an error if a token is unknown to the dictionary or a value
    /// is not a valid number.
    pub fn expand_map_from_string(&self, encoded: &str) -> Result<SensorValues> {
        let mut map = BTreeMap::new();
        if encoded.is_empty() {
            return Ok(map);
        }
        for pair in encoded.split(PAIR_SEPARATOR) {
            let (token, value) = pair
                .split_once('=')
                .ok_or_else(|| StoreError::Compressor(format!("malformed pair: {pair:?}")))?;
            let idx = index_for_token(token)?;
            let key = self
                .keys
                .get(idx)
                .ok_or_else(|| StoreError::Compressor(format!("unknown token: {token:?}")))?;
            let value: f64 = value
                .parse()
                .map_err(|_| StoreError::Compressor(format!("bad value: {value:?}")))?;
            map.insert(key.clone(), value);
        }
        Ok(map)
    }

    fn token_index(&mut self, key: &str) -> usize {
        if let Some(&idx) = self.index.get(key) {
            return idx;
        }
        let idx = self.keys.len();
        self.keys.push(key.to_string());
        self.index.insert(key.to_string(), idx);
        self.dirty = true;
        idx
    }
}

/// The `i`-th token: all length-1 tokens first, then length-2, and so on.
fn token_for(mut i: usize) -> String {
    let n = ALPHABET.len();
    let mut len = 1;
    let mut block = n;
    while i >= block {
        i -= block;
        block *= n;
        len += 1;
    }
    let mut buf = vec![0u8; len];
    for slot in buf.iter_mut().rev() {
        *slot = ALPHABET[i % n];
        i /= n;
    }
    buf.iter().map(|&b| char::from(b)).collect()
}

/// Inverse of [`token_for`].
fn index_for_token(token: &str) -> Result<usize> {
    let n = ALPHABET.len();
    if token.is_empty() {
        return Err(StoreError::Compressor("empty token".to_string()));
    }
    let mut offset = 0;
    let mut block = n;
    for _ in 1..token.len() {
        offset += block;
        block *= n;
    }
    let mut value = 0;
    for byte in token.bytes() {
        let digit = ALPHABET
            .iter()
            .position(|&c| c == byte)
            .ok_or_else(|| StoreError::Compressor(format!("bad token byte in {token:?}")))?;
        value = value * n + digit;
    }
    Ok(offset + value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map(entries: &[(&str, f64)]) -> SensorValues {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), *v))
            .collect()
    }

    #[test]
    fn token_sequence_grows_in_length() {
        let n = ALPHABET.len();
        assert_eq!(token_for(0), "0");
        assert_eq!(token_for(1), "1");
        assert_eq!(token_for(n - 1), "Z");
        assert_eq!(token_for(n), "00");
        assert_eq!(token_for(n + 1), "01");
        assert_eq!(token_for(n + n * n - 1), "ZZ");
        assert_eq!(token_for(n + n * n), "000");
    }

    #[test]
    fn token_roundtrip_over_length_boundaries() {
        for i in [0, 1, 61, 62, 63, 1000, 62 + 62 * 62 - 1, 62 + 62 * 62, 50_000] {
            assert_eq!(index_for_token(&token_for(i)).unwrap(), i, "index {i}");
        }
    }

    #[test]
    fn shrink_expand_roundtrip() {
        let mut compressor = KeyCompressor::new();
        let map = sample_map(&[("aa:bb:cc:dd", -40.0), ("ee:ff:00:11", -72.5)]);
        let encoded = compressor.shrink_map_to_string(&map);
        assert!(encoded.len() < serde_json::to_string(&map).unwrap().len());
        assert_eq!(compressor.expand_map_from_string(&encoded).unwrap(), map);
    }

    #[test]
    fn empty_map_roundtrip() {
        let mut compressor = KeyCompressor::new();
        let encoded = compressor.shrink_map_to_string(&SensorValues::new());
        assert!(encoded.is_empty());
        assert!(compressor
            .expand_map_from_string(&encoded)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn repeated_keys_reuse_tokens() {
        let mut compressor = KeyCompressor::new();
        let map = sample_map(&[("aa:bb", -40.0)]);
        let first = compressor.shrink_map_to_string(&map);
        let second = compressor.shrink_map_to_string(&map);
        assert_eq!(first, second);
        assert_eq!(compressor.len(), 1);
    }

    #[test]
    fn dictionary_is_prefix_extended() {
        let mut compressor = KeyCompressor::new();
        compressor.shrink_map_to_string(&sample_map(&[("aa:bb", -40.0)]));
        let before = compressor.keys.clone();

        compressor.shrink_map_to_string(&sample_map(&[("cc:dd", -55.0), ("aa:bb", -41.0)]));
        assert!(compressor.keys.len() > before.len());
        assert_eq!(&compressor.keys[..before.len()], &before[..]);
    }

    #[test]
    fn save_restore_preserves_tokens() {
        let mut compressor = KeyCompressor::new();
        let map = sample_map(&[("aa:bb", -40.0), ("cc:dd", -50.0)]);
        let encoded = compressor.shrink_map_to_string(&map);

        let restored = KeyCompressor::from_saved(&compressor.save().unwrap()).unwrap();
        assert_eq!(restored.expand_map_from_string(&encoded).unwrap(), map);
        assert!(!restored.is_dirty());
    }

    #[test]
    fn dirty_tracks_growth_only() {
        let mut compressor = KeyCompressor::new();
        assert!(!compressor.is_dirty());
        compressor.shrink_map_to_string(&sample_map(&[("aa:bb", -40.0)]));
        assert!(compressor.is_dirty());

        let mut reloaded = KeyCompressor::from_saved(&compressor.save().unwrap()).unwrap();
        reloaded.shrink_map_to_string(&sample_map(&[("aa:bb", -48.0)]));
        assert!(!reloaded.is_dirty());
    }

    #[test]
    fn many_keys_roundtrip_past_one_token_length() {
        let mut compressor = KeyCompressor::new();
        let map: SensorValues = (0..400)
            .map(|i| (format!("device-{i:03}"), f64::from(-30 - (i % 60))))
            .collect();
        let encoded = compressor.shrink_map_to_string(&map);
        assert_eq!(compressor.expand_map_from_string(&encoded).unwrap(), map);
        assert_eq!(compressor.len(), 400);
    }

    #[test]
    fn expand_rejects_unknown_token() {
        let compressor = KeyCompressor::new();
        assert!(compressor.expand_map_from_string("0=-40").is_err());
    }
}
