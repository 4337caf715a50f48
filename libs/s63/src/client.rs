//! Data client façade
//!
//! Owns the issued hardware identity and the installed cell permits,
//! and drives the whole pipeline from an encrypted cell file to the
//! clear S-57 dataset.
use crate::permit::{self, PermitStatus, CELLNAME_LEN, CELLPERMIT_LEN, M_ID_LEN, M_KEY_LEN};
use crate::{cell, utils, zip, S63Error};
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
#[allow(unused_imports)]
use tracing::{debug, info, trace, warn};

/// A data client: hardware identity plus the permit store
///
/// Not thread safe; callers needing concurrency wrap it in a lock
pub struct S63Client {
    hw_id: String,
    hw_id6: [u8; 6],
    m_key: String,
    m_id: String,
    permits: HashMap<String, String>,
    max_unzip_size: u64,
}

/// Outcome of a permit file import
#[derive(Debug, Default)]
pub struct PermitImport {
    /// Number of cell permits installed
    pub installed: usize,
    /// Line numbers and reasons of skipped permits
    pub skipped: Vec<(usize, S63Error)>,
}

impl S63Client {
    /// Creates a client for the given hardware identity
    pub fn new(hw_id: &str, m_key: &str, m_id: &str) -> Result<Self, S63Error> {
        if m_key.len() != M_KEY_LEN {
            return Err(S63Error::InvalidFormat("M_KEY must be 5 characters"));
        }
        if m_id.len() != M_ID_LEN {
            return Err(S63Error::InvalidFormat("M_ID must be 2 characters"));
        }
        Ok(Self {
            hw_id6: permit::hw_id6(hw_id)?,
            hw_id: hw_id.to_string(),
            m_key: m_key.to_string(),
            m_id: m_id.to_string(),
            permits: HashMap::new(),
            max_unzip_size: zip::DEFAULT_MAX_OUTPUT_SIZE,
        })
    }

    /// The hardware identifier
    pub fn hw_id(&self) -> &str {
        &self.hw_id
    }

    /// Replaces the hardware identifier and re-derives HW_ID6
    pub fn set_hw_id(&mut self, hw_id: &str) -> Result<(), S63Error> {
        self.hw_id6 = permit::hw_id6(hw_id)?;
        self.hw_id = hw_id.to_string();
        Ok(())
    }

    /// Bounds the allocation for unpacked cell content
    pub fn set_max_unzip_size(&mut self, limit: u64) {
        self.max_unzip_size = limit;
    }

    /// The userpermit identifying this client to data servers
    pub fn user_permit(&self) -> Result<String, S63Error> {
        permit::create_user_permit(&self.m_key, &self.hw_id, &self.m_id)
    }

    /// Validates a cell permit and installs it under its cell name
    ///
    /// Expiry advisories are reported (and logged with their SSE code)
    /// but do not prevent installation
    pub fn install_cell_permit(&mut self, cellpermit: &str) -> Result<PermitStatus, S63Error> {
        let status = permit::validate_with_key(cellpermit, &self.hw_id6, utils::local_today())?;
        let cell_name = &cellpermit[..CELLNAME_LEN];
        match status {
            PermitStatus::Expired => {
                warn!("SSE 15: subscription for {cell_name} has expired");
            }
            PermitStatus::NearExpiry { days_left } => {
                warn!("SSE 20: subscription for {cell_name} expires in {days_left} days");
            }
            PermitStatus::Valid => {}
        }
        debug!("cell permit for {cell_name} installed");
        self.permits.insert(cell_name.to_string(), cellpermit.to_string());
        Ok(status)
    }

    /// The installed permit for a cell, if any
    pub fn permit_for(&self, cell_name: &str) -> Option<&str> {
        self.permits.get(cell_name).map(String::as_str)
    }

    /// Installs every cell permit listed in a permit file
    ///
    /// The cell permit section opens after a line starting with `:ENC`;
    /// a line shorter than a permit closes it. A malformed first permit
    /// aborts the import; later malformed permits are skipped and
    /// reported.
    pub fn import_permit_file(&mut self, path: impl AsRef<Path>) -> Result<PermitImport, S63Error> {
        let reader = BufReader::new(fs::File::open(path.as_ref())?);
        let mut report = PermitImport::default();
        let mut in_enc_section = false;
        let mut first_permit = true;
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if !in_enc_section {
                if line.starts_with(":ENC") {
                    in_enc_section = true;
                }
                continue;
            }
            if line.len() < CELLPERMIT_LEN {
                break;
            }
            let result = match line.get(..CELLPERMIT_LEN) {
                Some(candidate) => self.install_cell_permit(candidate),
                None => Err(S63Error::BadFormat("cell permit is not 7-bit ASCII")),
            };
            match result {
                Ok(_) => report.installed += 1,
                Err(e) if first_permit => return Err(e),
                Err(e) => {
                    warn!("line {}: skipping cell permit: {e}", idx + 1);
                    report.skipped.push((idx + 1, e));
                }
            }
            first_permit = false;
        }
        info!(
            "permit import: {} installed, {} skipped",
            report.installed,
            report.skipped.len()
        );
        Ok(report)
    }

    /// Decrypts and unzips a cell file fully in memory
    pub fn open(&self, cell_path: impl AsRef<Path>) -> Result<Vec<u8>, S63Error> {
        let cell_path = cell_path.as_ref();
        let cell_name = cell_name_of(cell_path)?;
        let cellpermit = self
            .permits
            .get(cell_name)
            .ok_or_else(|| S63Error::NoPermit(cell_name.to_string()))?;
        let keys = permit::extract_keys_with_key(cellpermit, &self.hw_id6, utils::local_today())?;
        let mut data = fs::read(cell_path)?;
        cell::decrypt_cell(&mut data, &keys)?;
        let entry = zip::unpack(&data, self.max_unzip_size)?;
        debug!("cell {cell_name}: {} clear bytes", entry.payload.len());
        Ok(entry.payload)
    }

    /// Decrypts and unzips a cell file onto disk
    ///
    /// A partially written output is removed on failure
    pub fn decrypt_and_unzip(
        &self,
        in_path: impl AsRef<Path>,
        out_path: impl AsRef<Path>,
    ) -> Result<(), S63Error> {
        let out_path = out_path.as_ref();
        let payload = self.open(in_path)?;
        if let Err(e) = fs::write(out_path, payload) {
            let _ = fs::remove_file(out_path);
            return Err(e.into());
        }
        Ok(())
    }
}

/// The cell name: 8 characters of the file name, ending 4 before its
/// end (`NO4D0613.000` names the cell `NO4D0613`)
fn cell_name_of(path: &Path) -> Result<&str, S63Error> {
    path.file_name()
        .and_then(|n| n.to_str())
        .filter(|n| n.len() >= CELLNAME_LEN + 4)
        .and_then(|n| n.get(n.len() - CELLNAME_LEN - 4..n.len() - 4))
        .ok_or(S63Error::InvalidFormat("cell file name is not NNNNNNNN.EEE"))
}
