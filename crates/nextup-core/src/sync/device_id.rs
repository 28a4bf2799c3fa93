//! Device identity for peer sync.
//!
//! Each installation gets a stable id in the form `nextup-<uuid>`,
//! stored next to the settings file. The paired-device shared secret
//! lives in its own file and is generated on first use; pairing copies
//! it to the peer out of band.

use std::fs;
use std::io::Write;
use std::path::Path;

use rand::RngCore;
use uuid::Uuid;

use crate::error::{Result, SettingsError};
use crate::settings::data_dir;

const DEVICE_ID_FILE: &str = "device_id.txt";
const DEVICE_ID_PREFIX: &str = "nextup-";
const SECRET_FILE: &str = "sync_secret.txt";
const SECRET_BYTES: usize = 32;

/// Read or create the device id under `path`.
pub fn get_or_create_device_id_at(path: &Path) -> Result<String> {
    let id_path = path.join(DEVICE_ID_FILE);
    if id_path.exists() {
        let content = fs::read_to_string(&id_path)?;
        let device_id = content.trim().to_string();
        if device_id.starts_with(DEVICE_ID_PREFIX) {
            return Ok(device_id);
        }
        return Err(SettingsError::InvalidValue {
            key: "device_id".into(),
            message: format!("malformed id '{device_id}'"),
        }
        .into());
    }

    let device_id = format!("{}{}", DEVICE_ID_PREFIX, Uuid::new_v4());
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    let mut file = fs::File::create(&id_path)?;
    writeln!(file, "{device_id}")?;
    Ok(device_id)
}

/// Device id from the default data directory.
pub fn get_or_create_device_id() -> Result<String> {
    get_or_create_device_id_at(&data_dir()?)
}

/// Read or create the shared pairing secret under `path`, hex-encoded.
pub fn get_or_create_sync_secret_at(path: &Path) -> Result<Vec<u8>> {
    let secret_path = path.join(SECRET_FILE);
    if secret_path.exists() {
        let content = fs::read_to_string(&secret_path)?;
        return hex::decode(content.trim()).map_err(|e| {
            SettingsError::InvalidValue { key: "sync_secret".into(), message: e.to_string() }
                .into()
        });
    }

    let mut secret = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut secret);
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    let mut file = fs::File::create(&secret_path)?;
    writeln!(file, "{}", hex::encode(secret))?;
    Ok(secret.to_vec())
}

/// Pairing secret from the default data directory.
pub fn get_or_create_sync_secret() -> Result<Vec<u8>> {
    get_or_create_sync_secret_at(&data_dir()?)
}
