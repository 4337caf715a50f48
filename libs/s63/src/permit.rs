//! User Permit and Cell Permit algebra
//!
//! A User Permit binds a data client's hardware identifier to its
//! manufacturer; a Cell Permit binds the two encrypted cell keys of one
//! cell to a specific hardware identifier and an expiry date.
//!
//! Layouts (all 7-bit ASCII):
//! ```text
//! userpermit (28):  73871727080876A0 7E450C04 3031
//!                   encrypted HW_ID  CRC      M_ID
//! cellpermit (64):  NO4D0613 20000830 ECK1(16 hex) ECK2(16 hex) checksum(16 hex)
//! ```
//!
//! The userpermit checksum hashes the 16 hex characters of the
//! encrypted HW_ID; the cellpermit checksum hashes the first 48 ASCII
//! characters, is rendered big-endian and travels Blowfish-encrypted
//! under HW_ID6. Short key material (5-byte identifiers and cell keys,
//! the 4-byte checksum) is carried as a single PKCS#5-padded block.
use crate::blowfish::Blowfish;
use crate::utils::{self, bytes_to_upper_hex, crc32, hex_to_bytes, parse_yyyymmdd};
use crate::S63Error;
use time::Date;
#[allow(unused_imports)]
use tracing::{debug, trace, warn};

/// Userpermit length in characters
pub const USERPERMIT_LEN: usize = 28;
/// Cellpermit length in characters
pub const CELLPERMIT_LEN: usize = 64;
/// Cell name length (the 8-character file stem of an ENC file)
pub const CELLNAME_LEN: usize = 8;
/// Hardware identifier length
pub const HW_ID_LEN: usize = 5;
/// Manufacturer key length
pub const M_KEY_LEN: usize = 5;
/// Manufacturer identifier length
pub const M_ID_LEN: usize = 2;
/// Raw cell key length
pub const CELL_KEY_LEN: usize = 5;

const NEAR_EXPIRY_DAYS: i64 = 30;

/// The pair of interchangeable keys a cell may be encrypted with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellKeys {
    /// Cell key 1
    pub ck1: [u8; CELL_KEY_LEN],
    /// Cell key 2
    pub ck2: [u8; CELL_KEY_LEN],
}

/// Outcome of a successful cell permit validation
///
/// Expiry findings are advisories: the permit stays usable and its keys
/// remain extractable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitStatus {
    /// The permit is valid and not close to expiry
    Valid,
    /// The subscription expires within 30 days
    NearExpiry {
        /// Full days until the expiry date
        days_left: i64,
    },
    /// The subscription has expired
    Expired,
}

impl PermitStatus {
    /// The stable S-63 "SSE" advisory code, if any
    pub fn sse(&self) -> Option<u8> {
        match self {
            PermitStatus::Valid => None,
            PermitStatus::NearExpiry { .. } => Some(20),
            PermitStatus::Expired => Some(15),
        }
    }
}

/// Derives the 6-byte Blowfish key from a hardware identifier
///
/// HW_ID6 is the identifier with its first byte appended
pub fn hw_id6(hw_id: &str) -> Result<[u8; 6], S63Error> {
    let id = hw_id.as_bytes();
    if id.len() != HW_ID_LEN {
        return Err(S63Error::InvalidFormat("HW_ID must be 5 characters"));
    }
    let mut key = [0u8; 6];
    key[..HW_ID_LEN].copy_from_slice(id);
    key[HW_ID_LEN] = id[0];
    Ok(key)
}

/// Builds the 28-character userpermit for a hardware identifier
pub fn create_user_permit(m_key: &str, hw_id: &str, m_id: &str) -> Result<String, S63Error> {
    if m_key.len() != M_KEY_LEN {
        return Err(S63Error::InvalidFormat("M_KEY must be 5 characters"));
    }
    if hw_id.len() != HW_ID_LEN {
        return Err(S63Error::InvalidFormat("HW_ID must be 5 characters"));
    }
    if m_id.len() != M_ID_LEN {
        return Err(S63Error::InvalidFormat("M_ID must be 2 characters"));
    }
    let bf = Blowfish::new(m_key.as_bytes())?;
    let mut permit = bytes_to_upper_hex(&bf.encrypt_with_padding(hw_id.as_bytes()));
    // the checksum hashes the hex rendering, not the raw ciphertext
    let crc = crc32(permit.as_bytes());
    permit.push_str(&bytes_to_upper_hex(&crc.to_be_bytes()));
    permit.push_str(&bytes_to_upper_hex(m_id.as_bytes()));
    Ok(permit)
}

/// Recovers the hardware identifier from a userpermit
///
/// Any structural defect, checksum mismatch or undecryptable content
/// yields [`S63Error::InvalidUserpermit`] (SSE 17)
pub fn extract_hw_id(userpermit: &str, m_key: &str) -> Result<String, S63Error> {
    if m_key.len() != M_KEY_LEN {
        return Err(S63Error::InvalidFormat("M_KEY must be 5 characters"));
    }
    if userpermit.len() != USERPERMIT_LEN
        || !userpermit
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
    {
        return Err(S63Error::InvalidUserpermit);
    }
    let declared =
        u32::from_str_radix(&userpermit[16..24], 16).map_err(|_| S63Error::InvalidUserpermit)?;
    if declared != crc32(userpermit[..16].as_bytes()) {
        return Err(S63Error::InvalidUserpermit);
    }
    let encrypted = hex_to_bytes(&userpermit[..16])?;
    let bf = Blowfish::new(m_key.as_bytes())?;
    let hw_id = bf
        .decrypt_with_padding(&encrypted)
        .map_err(|_| S63Error::InvalidUserpermit)?;
    if hw_id.len() != HW_ID_LEN {
        return Err(S63Error::InvalidUserpermit);
    }
    String::from_utf8(hw_id).map_err(|_| S63Error::InvalidUserpermit)
}

/// Builds the 64-character cellpermit binding two cell keys to a
/// hardware identifier
pub fn create_cell_permit(
    hw_id: &str,
    ck1: &[u8; CELL_KEY_LEN],
    ck2: &[u8; CELL_KEY_LEN],
    cell_name: &str,
    expiry_date: &str,
) -> Result<String, S63Error> {
    if cell_name.len() != CELLNAME_LEN {
        return Err(S63Error::InvalidFormat("cell name must be 8 characters"));
    }
    parse_yyyymmdd(expiry_date)?;
    let bf = Blowfish::new(&hw_id6(hw_id)?)?;
    let mut permit = String::with_capacity(CELLPERMIT_LEN);
    permit.push_str(cell_name);
    permit.push_str(expiry_date);
    permit.push_str(&bytes_to_upper_hex(&bf.encrypt_with_padding(ck1)));
    permit.push_str(&bytes_to_upper_hex(&bf.encrypt_with_padding(ck2)));
    // unlike the userpermit, the checksum covers ASCII characters; it
    // is stored big-endian and encrypted
    let crc = crc32(permit.as_bytes());
    permit.push_str(&bytes_to_upper_hex(
        &bf.encrypt_with_padding(&crc.to_be_bytes()),
    ));
    Ok(permit)
}

/// Validates a cellpermit against a hardware identifier
///
/// Expiry is judged against the local calendar date; see
/// [`validate_cell_permit_on`] for a fixed reference date
pub fn validate_cell_permit(cellpermit: &str, hw_id: &str) -> Result<PermitStatus, S63Error> {
    validate_cell_permit_on(cellpermit, hw_id, utils::local_today())
}

/// Validates a cellpermit as of the given reference date
pub fn validate_cell_permit_on(
    cellpermit: &str,
    hw_id: &str,
    today: Date,
) -> Result<PermitStatus, S63Error> {
    validate_with_key(cellpermit, &hw_id6(hw_id)?, today)
}

pub(crate) fn validate_with_key(
    cellpermit: &str,
    key: &[u8; 6],
    today: Date,
) -> Result<PermitStatus, S63Error> {
    if cellpermit.len() != CELLPERMIT_LEN || !cellpermit.is_ascii() {
        return Err(S63Error::BadFormat("cell permit must be 64 ASCII characters"));
    }
    let mut checksum = hex_to_bytes(&cellpermit[CELLPERMIT_LEN - 16..])
        .map_err(|_| S63Error::BadFormat("checksum is not hexadecimal"))?;
    let bf = Blowfish::new(key)?;
    bf.decrypt_buffer(&mut checksum)?;
    let declared = u32::from_be_bytes([checksum[0], checksum[1], checksum[2], checksum[3]]);
    if declared != crc32(cellpermit[..CELLPERMIT_LEN - 16].as_bytes()) {
        return Err(S63Error::CrcInvalid);
    }
    if !cellpermit.as_bytes()[CELLNAME_LEN..]
        .iter()
        .all(u8::is_ascii_hexdigit)
    {
        return Err(S63Error::BadFormat("permit body is not hexadecimal"));
    }
    let expiry = parse_yyyymmdd(&cellpermit[CELLNAME_LEN..CELLNAME_LEN + 8])?;
    Ok(expiry_status(expiry, today))
}

fn expiry_status(expiry: Date, today: Date) -> PermitStatus {
    // local midnight of the expiry date has passed on the date itself
    if expiry <= today {
        return PermitStatus::Expired;
    }
    let days_left = (expiry - today).whole_days();
    if days_left <= NEAR_EXPIRY_DAYS {
        PermitStatus::NearExpiry { days_left }
    } else {
        PermitStatus::Valid
    }
}

/// Recovers the two cell keys from a cellpermit
///
/// The permit is validated first; expiry advisories do not prevent
/// extraction
pub fn extract_cell_keys(cellpermit: &str, hw_id: &str) -> Result<CellKeys, S63Error> {
    extract_keys_with_key(cellpermit, &hw_id6(hw_id)?, utils::local_today())
}

pub(crate) fn extract_keys_with_key(
    cellpermit: &str,
    key: &[u8; 6],
    today: Date,
) -> Result<CellKeys, S63Error> {
    validate_with_key(cellpermit, key, today)?;
    let bf = Blowfish::new(key)?;
    Ok(CellKeys {
        ck1: decrypt_cell_key(&bf, &cellpermit[16..32])?,
        ck2: decrypt_cell_key(&bf, &cellpermit[32..48])?,
    })
}

fn decrypt_cell_key(bf: &Blowfish, eck_hex: &str) -> Result<[u8; CELL_KEY_LEN], S63Error> {
    bf.decrypt_with_padding(&hex_to_bytes(eck_hex)?)?
        .try_into()
        .map_err(|_| S63Error::BadFormat("cell key is not 5 bytes"))
}
