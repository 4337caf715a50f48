//! Single-entry Zip codec
//!
//! Every decrypted cell is a Zip archive wrapping exactly one S-57
//! dataset, so only the minimal Zip32 subset is handled: one member,
//! Store or Deflate, no encryption, no Zip64.
//!
//! Some suppliers ship archives with the "sizes unknown" general
//! purpose bit set and zeroed sizes in the local header; those are
//! resolved through the central directory, located via the end of
//! central directory record.
use crate::utils::{crc32, rdu16le, rdu32le};
use crate::S63Error;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

const LOCAL_HEADER_SIGNATURE: u32 = 0x04034b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x02014b50;
const EOCD_SIGNATURE: &[u8] = b"PK\x05\x06";

const LOCAL_HEADER_SIZE: usize = 30;
const EOCD_SIZE: usize = 22;
/// How far from the end the EOCD can be: its fixed part plus a comment
const EOCD_SCAN_WINDOW: usize = EOCD_SIZE + u16::MAX as usize;

const GP_SIZES_UNKNOWN: u16 = 1 << 3;
const METHOD_STORE: u16 = 0;
const METHOD_DEFLATE: u16 = 8;
const VERSION_TO_EXTRACT: u16 = 20;

/// Default bound for the output allocation
pub const DEFAULT_MAX_OUTPUT_SIZE: u64 = 256 * 1024 * 1024;

/// The single member of an unpacked archive
#[derive(Debug)]
pub struct ZipEntry {
    /// Byte-representation of the member file name
    pub file_name: Vec<u8>,
    /// Decompressed member content
    pub payload: Vec<u8>,
    /// CRC-32 checksum as declared (and verified)
    pub crc32: u32,
}

impl ZipEntry {
    /// A lossy UTF-8 representation of the member file name
    pub fn name(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.file_name)
    }
}

/// Unpacks a single-member archive held in memory
///
/// `max_output_size` bounds the output allocation; archives declaring
/// more fail with [`S63Error::ZipTooLarge`]
pub fn unpack(data: &[u8], max_output_size: u64) -> Result<ZipEntry, S63Error> {
    if data.len() < LOCAL_HEADER_SIZE {
        return Err(S63Error::ZipSignature);
    }
    let mut r: &[u8] = data;
    if rdu32le(&mut r)? != LOCAL_HEADER_SIGNATURE {
        return Err(S63Error::ZipSignature);
    }
    let _ver_to_extract = rdu16le(&mut r)?;
    let gp_flag = rdu16le(&mut r)?;
    let method = rdu16le(&mut r)?;
    if method != METHOD_STORE && method != METHOD_DEFLATE {
        return Err(S63Error::ZipUnsupported(method));
    }
    let _dostime = rdu32le(&mut r)?;
    let mut expected_crc = rdu32le(&mut r)?;
    let mut compressed_size = rdu32le(&mut r)?;
    let mut uncompressed_size = rdu32le(&mut r)?;
    let fname_len = rdu16le(&mut r)?;
    let extra_len = rdu16le(&mut r)?;
    let mut file_name = vec![0u8; fname_len.into()];
    r.read_exact(&mut file_name)?;

    if gp_flag & GP_SIZES_UNKNOWN != 0 || compressed_size == 0 {
        // The local header lies; the central directory knows
        debug!("local sizes unknown, falling back to the central directory");
        (expected_crc, compressed_size, uncompressed_size) = central_sizes(data)?;
    }

    if u64::from(uncompressed_size) > max_output_size {
        return Err(S63Error::ZipTooLarge {
            size: uncompressed_size.into(),
            limit: max_output_size,
        });
    }

    let data_start = LOCAL_HEADER_SIZE + usize::from(fname_len) + usize::from(extra_len);
    let compressed = data
        .get(data_start..data_start + compressed_size as usize)
        .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))?;

    let uncompressed_size = uncompressed_size as usize;
    let payload = match method {
        METHOD_STORE => compressed.to_vec(),
        _ => {
            let mut payload = Vec::with_capacity(uncompressed_size);
            let mut decoder = DeflateDecoder::new(compressed).take(uncompressed_size as u64 + 1);
            decoder.read_to_end(&mut payload)?;
            if payload.len() != uncompressed_size {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "decompressed size does not match the declared size",
                )
                .into());
            }
            payload
        }
    };

    let computed = crc32(&payload);
    if computed != expected_crc {
        return Err(S63Error::CrcMismatch {
            expected: expected_crc,
            computed,
        });
    }

    Ok(ZipEntry {
        file_name,
        payload,
        crc32: expected_crc,
    })
}

/// Recovers crc and sizes from the central directory record
fn central_sizes(data: &[u8]) -> Result<(u32, u32, u32), S63Error> {
    let scan_start = data.len().saturating_sub(EOCD_SCAN_WINDOW);
    let eocd_at = memchr::memmem::rfind(&data[scan_start..], EOCD_SIGNATURE)
        .map(|off| scan_start + off)
        .ok_or(S63Error::ZipSignature)?;
    trace!("end of central directory found @{eocd_at:x}");
    let mut r = &data[eocd_at + 4..];
    let _disk_number = rdu16le(&mut r)?;
    let _cd_first_disk = rdu16le(&mut r)?;
    let _entries_this_disk = rdu16le(&mut r)?;
    let _entries_total = rdu16le(&mut r)?;
    let _cd_size = rdu32le(&mut r)?;
    let cd_offset = rdu32le(&mut r)?;

    let mut r = data
        .get(cd_offset as usize..)
        .ok_or(S63Error::ZipSignature)?;
    if rdu32le(&mut r)? != CENTRAL_HEADER_SIGNATURE {
        return Err(S63Error::ZipSignature);
    }
    let _ver_made_by = rdu16le(&mut r)?;
    let _ver_to_extract = rdu16le(&mut r)?;
    let _gp_flag = rdu16le(&mut r)?;
    let _method = rdu16le(&mut r)?;
    let _dostime = rdu32le(&mut r)?;
    let crc = rdu32le(&mut r)?;
    let compressed_size = rdu32le(&mut r)?;
    let uncompressed_size = rdu32le(&mut r)?;
    Ok((crc, compressed_size, uncompressed_size))
}

/// Packs `data` into a minimal one-member Deflate archive
pub fn pack(file_name: &str, data: &[u8]) -> Result<Vec<u8>, S63Error> {
    if file_name.is_empty() {
        return Err(S63Error::InvalidFormat("zip member name cannot be empty"));
    }
    if data.is_empty() {
        return Err(S63Error::InvalidFormat("zip member data cannot be empty"));
    }
    let fname_len = u16::try_from(file_name.len())
        .map_err(|_| S63Error::InvalidFormat("zip member name too long"))?;
    if u32::try_from(data.len()).is_err() {
        return Err(S63Error::ZipTooLarge {
            size: data.len() as u64,
            limit: u32::MAX.into(),
        });
    }

    let crc = crc32(data);
    let mut compressed = Vec::new();
    let mut encoder = DeflateEncoder::new(&mut compressed, Compression::best());
    encoder.write_all(data)?;
    encoder.finish()?;
    let (dosdate, dostime) = dos_now();

    let mut out = Vec::with_capacity(LOCAL_HEADER_SIZE + file_name.len() + compressed.len() + 98);
    // local file header
    wr32(&mut out, LOCAL_HEADER_SIGNATURE);
    wr16(&mut out, VERSION_TO_EXTRACT);
    wr16(&mut out, 0); // general purpose flags
    wr16(&mut out, METHOD_DEFLATE);
    wr16(&mut out, dostime);
    wr16(&mut out, dosdate);
    wr32(&mut out, crc);
    wr32(&mut out, compressed.len() as u32);
    wr32(&mut out, data.len() as u32);
    wr16(&mut out, fname_len);
    wr16(&mut out, 0); // extra field length
    out.extend_from_slice(file_name.as_bytes());
    out.extend_from_slice(&compressed);

    // central directory, mirroring the local header
    let cd_offset = out.len();
    wr32(&mut out, CENTRAL_HEADER_SIGNATURE);
    wr16(&mut out, VERSION_TO_EXTRACT); // version made by
    wr16(&mut out, VERSION_TO_EXTRACT);
    wr16(&mut out, 0);
    wr16(&mut out, METHOD_DEFLATE);
    wr16(&mut out, dostime);
    wr16(&mut out, dosdate);
    wr32(&mut out, crc);
    wr32(&mut out, compressed.len() as u32);
    wr32(&mut out, data.len() as u32);
    wr16(&mut out, fname_len);
    wr16(&mut out, 0); // extra field length
    wr16(&mut out, 0); // comment length
    wr16(&mut out, 0); // disk number start
    wr16(&mut out, 0); // internal attributes
    wr32(&mut out, 0); // external attributes
    wr32(&mut out, 0); // local header offset
    out.extend_from_slice(file_name.as_bytes());
    let cd_size = out.len() - cd_offset;

    // end of central directory
    out.extend_from_slice(EOCD_SIGNATURE);
    wr16(&mut out, 0); // this disk
    wr16(&mut out, 0); // central directory disk
    wr16(&mut out, 1); // entries on this disk
    wr16(&mut out, 1); // entries total
    wr32(&mut out, cd_size as u32);
    wr32(&mut out, cd_offset as u32);
    wr16(&mut out, 0); // comment length

    Ok(out)
}

fn wr16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn wr32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// The current local date and time in DOS format
fn dos_now() -> (u16, u16) {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    let date = ((now.year().clamp(1980, 2107) - 1980) as u16) << 9
        | (now.month() as u16) << 5
        | u16::from(now.day());
    let time = u16::from(now.hour()) << 11
        | u16::from(now.minute()) << 5
        | u16::from(now.second() / 2);
    (date, time)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELF_TEST_DATA: &[u8] = b"This is a test unzipped data!!!!! 50 bytes length";

    #[test]
    fn pack_unpack_roundtrip() {
        let packed = pack("test.txt", SELF_TEST_DATA).unwrap();
        assert_eq!(&packed[..4], b"PK\x03\x04");
        let entry = unpack(&packed, DEFAULT_MAX_OUTPUT_SIZE).unwrap();
        assert_eq!(entry.name(), "test.txt");
        assert_eq!(entry.payload, SELF_TEST_DATA);
        assert_eq!(entry.crc32, crc32(SELF_TEST_DATA));
    }

    #[test]
    fn unknown_local_sizes_resolved_via_central_directory() {
        let mut packed = pack("NO4D0613.000", SELF_TEST_DATA).unwrap();
        // set the "sizes unknown" flag and zero crc and sizes in the
        // local header only
        packed[6] |= (GP_SIZES_UNKNOWN & 0xff) as u8;
        packed[14..26].fill(0);
        let entry = unpack(&packed, DEFAULT_MAX_OUTPUT_SIZE).unwrap();
        assert_eq!(entry.payload, SELF_TEST_DATA);
    }

    #[test]
    fn payload_corruption_is_detected() {
        let mut packed = pack("test.txt", SELF_TEST_DATA).unwrap();
        let off = LOCAL_HEADER_SIZE + "test.txt".len() + 2;
        packed[off] ^= 0xff;
        match unpack(&packed, DEFAULT_MAX_OUTPUT_SIZE) {
            Err(S63Error::CrcMismatch { .. }) | Err(S63Error::Io(_)) => {}
            other => panic!("expected corruption to be detected, got {other:?}"),
        }
    }

    #[test]
    fn oversized_declaration_is_rejected() {
        let packed = pack("test.txt", SELF_TEST_DATA).unwrap();
        assert!(matches!(
            unpack(&packed, 10),
            Err(S63Error::ZipTooLarge { size: 49, limit: 10 })
        ));
    }

    #[test]
    fn unsupported_method_is_rejected() {
        let mut packed = pack("test.txt", SELF_TEST_DATA).unwrap();
        packed[8] = 12; // bzip2
        assert!(matches!(unpack(&packed, DEFAULT_MAX_OUTPUT_SIZE), Err(S63Error::ZipUnsupported(12))));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(unpack(b"PK", DEFAULT_MAX_OUTPUT_SIZE), Err(S63Error::ZipSignature)));
        assert!(matches!(
            unpack(&[0u8; 64], DEFAULT_MAX_OUTPUT_SIZE),
            Err(S63Error::ZipSignature)
        ));
    }

    #[test]
    fn trailing_bytes_are_tolerated() {
        // cell decryption leaves block padding behind the archive
        let mut packed = pack("test.txt", SELF_TEST_DATA).unwrap();
        packed.extend_from_slice(&[4u8; 4]);
        let entry = unpack(&packed, DEFAULT_MAX_OUTPUT_SIZE).unwrap();
        assert_eq!(entry.payload, SELF_TEST_DATA);
    }
}
