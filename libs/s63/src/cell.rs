//! Encrypted cell payload pipeline
//!
//! A distributed cell file is a single-member Zip archive encrypted
//! with Blowfish ECB under one of the two cell keys of its permit.
//! Which of the two was used is not recorded anywhere; it is discovered
//! by trial-decrypting the first block and looking for the Zip local
//! header signature.
use crate::blowfish::Blowfish;
use crate::permit::CellKeys;
use crate::S63Error;
use tracing::debug;

const ZIP_SIGNATURE: u32 = 0x04034b50;

/// Decrypts a cell file in place, trying cell key 1 then cell key 2
///
/// The buffer must be a positive multiple of 8 bytes. No padding is
/// stripped: whatever block padding the supplier appended sits behind
/// the Zip structures and is inert.
pub fn decrypt_cell(buf: &mut [u8], keys: &CellKeys) -> Result<(), S63Error> {
    if buf.len() < 8 || buf.len() % 8 != 0 {
        return Err(S63Error::BadLength(buf.len()));
    }
    let bf = Blowfish::new(&keys.ck1)?;
    let bf = if probe_is_zip(&bf, buf) {
        bf
    } else {
        debug!("cell key 1 rejected, retrying with cell key 2");
        let bf = Blowfish::new(&keys.ck2)?;
        if !probe_is_zip(&bf, buf) {
            return Err(S63Error::KeyInvalid);
        }
        bf
    };
    bf.decrypt_buffer(buf)
}

/// Trial-decrypts the first block and checks for the Zip signature
fn probe_is_zip(bf: &Blowfish, buf: &[u8]) -> bool {
    let mut probe = [0u8; 8];
    probe.copy_from_slice(&buf[..8]);
    bf.decrypt_block(&mut probe);
    u32::from_le_bytes([probe[0], probe[1], probe[2], probe[3]]) == ZIP_SIGNATURE
}

/// Encrypts a cell payload under the given key (the data server side)
///
/// The payload is PKCS#5-padded to a whole number of blocks, so the
/// result is always decryptable with [`decrypt_cell`]
pub fn encrypt_cell(data: &[u8], key: &[u8]) -> Result<Vec<u8>, S63Error> {
    let bf = Blowfish::new(key)?;
    Ok(bf.encrypt_with_padding(data))
}
