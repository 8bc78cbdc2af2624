use std::{
    fs,
    io::ErrorKind,
    path::PathBuf,
};

use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::application::engine::EngineError;
use crate::domain::types::EngineKind;

/// A license file that was read and accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveLicense {
    pub path: PathBuf,
    pub fingerprint: String,
}

/// Process-local activation state, one slot per engine kind.
#[derive(Debug)]
pub struct LicenseRegistry {
    dir: PathBuf,
    words: OnceCell<ActiveLicense>,
    cells: OnceCell<ActiveLicense>,
}

impl LicenseRegistry {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            words: OnceCell::new(),
            cells: OnceCell::new(),
        }
    }

    /// Activate `kind`, returning the accepted license. The first activation
    /// reads the license file; callers on an async runtime run it off the
    /// reactor.
    ///
    /// `Ok(None)` means no license file exists and the engine runs in
    /// evaluation mode; that outcome is not memoized, so a file dropped in
    /// later is picked up on the next call.
    pub fn ensure(&self, kind: EngineKind) -> Result<Option<&ActiveLicense>, EngineError> {
        let cell = self.cell(kind);
        if let Some(active) = cell.get() {
            return Ok(Some(active));
        }

        let path = self.dir.join(kind.license_file_name());
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(
                    target = "infra::engine::license",
                    kind = kind.as_str(),
                    path = %path.display(),
                    "license file missing; running in evaluation mode"
                );
                return Ok(None);
            }
            Err(err) => {
                return Err(EngineError::License {
                    kind,
                    message: format!("failed to read `{}`: {err}", path.display()),
                });
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(EngineError::License {
                kind,
                message: format!("license file `{}` is empty", path.display()),
            });
        }

        let active = cell.get_or_init(|| {
            let fingerprint = hex::encode(Sha256::digest(&bytes));
            info!(
                target = "infra::engine::license",
                kind = kind.as_str(),
                path = %path.display(),
                fingerprint = %fingerprint,
                "license activated"
            );
            ActiveLicense { path, fingerprint }
        });

        Ok(Some(active))
    }

    /// The memoized license for `kind`, without touching the filesystem.
    pub fn active(&self, kind: EngineKind) -> Option<&ActiveLicense> {
        self.cell(kind).get()
    }

    pub fn is_active(&self, kind: EngineKind) -> bool {
        self.active(kind).is_some()
    }

    fn cell(&self, kind: EngineKind) -> &OnceCell<ActiveLicense> {
        match kind {
            EngineKind::Words => &self.words,
            EngineKind::Cells => &self.cells,
        }
    }
}
