//! Hash state (component J, hash half): running MD5/SHA-1 over the
//! reconstructed raw stream, plus the explicit digests read from or
//! written to `digest`/`hash` sections.

use md5::{Digest as _, Md5};
use sha1::Sha1;

use crate::error::{EwfError, EwfResult};
use crate::values::HashValues;

#[derive(Default)]
pub struct HashState {
    md5: Md5,
    sha1: Sha1,
    /// Digest carried over from a read chain (or set explicitly before a
    /// write starts, e.g. for delta reconciliation); distinct from the
    /// running hash, which only reflects bytes seen by this handle.
    stored_md5: Option<[u8; 16]>,
    stored_sha1: Option<[u8; 20]>,
    hash_values: HashValues,
}

impl HashState {
    pub fn new() -> Self {
        HashState::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
    }

    /// Finalizes the running hashes, consuming the accumulators (spec §4.H
    /// "on close: ... finalize hashes"). Safe to call once; a second call
    /// would hash zero further bytes, which is never the intent here.
    pub fn finalize(self) -> ([u8; 16], [u8; 20]) {
        let md5: [u8; 16] = self.md5.finalize().into();
        let sha1: [u8; 20] = self.sha1.finalize().into();
        (md5, sha1)
    }

    pub fn set_stored(&mut self, md5: [u8; 16], sha1: [u8; 20]) {
        self.stored_md5 = Some(md5);
        self.stored_sha1 = Some(sha1);
    }

    pub fn stored_md5(&self) -> EwfResult<[u8; 16]> {
        self.stored_md5
            .ok_or_else(|| EwfError::ValueMissing("no MD5 digest present on this image".into()))
    }

    pub fn stored_sha1(&self) -> EwfResult<[u8; 20]> {
        self.stored_sha1
            .ok_or_else(|| EwfError::ValueMissing("no SHA-1 digest present on this image".into()))
    }

    pub fn hash_values(&self) -> &HashValues {
        &self.hash_values
    }

    pub fn hash_values_mut(&mut self) -> &mut HashValues {
        &mut self.hash_values
    }
}

pub fn format_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_known_fixture_matches() {
        let mut hash = HashState::new();
        hash.update(&[0x41u8; 512]);
        let (md5, _sha1) = hash.finalize();
        assert_eq!(format_hex(&md5), "dc5086b847289ba8b8bde149b8388175");
    }

    #[test]
    fn stored_digest_missing_by_default() {
        let hash = HashState::new();
        assert!(hash.stored_md5().is_err());
    }
}
