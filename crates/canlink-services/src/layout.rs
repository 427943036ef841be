//! On-disk layout under the storage root.
//!
//! ```text
//! <root>/dbs/<n>/snaps.db          databases held by the device
//! <root>/transfer/<n>/snaps.db     databases fetched from a peer
//! <root>/transfer/flash_out.zip    package staged for upload
//! <root>/transfer/flash_in.zip     package received for reflash
//! <root>/transfer/backup.zip       app directory before the last reflash
//! <root>/transfer/recv.csv         status records pulled by the client
//! ```

use std::path::{Path, PathBuf};

use canlink_core::opcode::REFLASH;

const DB_FILE: &str = "snaps.db";

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    app_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>, app_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            app_dir: app_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    pub fn dbs_dir(&self) -> PathBuf {
        self.root.join("dbs")
    }

    pub fn transfer_dir(&self) -> PathBuf {
        self.root.join("transfer")
    }

    pub fn flash_out(&self) -> PathBuf {
        self.transfer_dir().join("flash_out.zip")
    }

    pub fn flash_in(&self) -> PathBuf {
        self.transfer_dir().join("flash_in.zip")
    }

    pub fn backup(&self) -> PathBuf {
        self.transfer_dir().join("backup.zip")
    }

    pub fn recv_csv(&self) -> PathBuf {
        self.transfer_dir().join("recv.csv")
    }

    /// File served when a peer asks for `file_id`.
    pub fn source_path(&self, file_id: u8) -> PathBuf {
        if file_id == REFLASH {
            self.flash_out()
        } else {
            self.dbs_dir().join(file_id.to_string()).join(DB_FILE)
        }
    }

    /// Where a file fetched from a peer is written.
    pub fn destination_path(&self, file_id: u8) -> PathBuf {
        if file_id == REFLASH {
            self.flash_in()
        } else {
            self.transfer_dir().join(file_id.to_string()).join(DB_FILE)
        }
    }

    /// Databases are numbered from zero; counting stops at the first missing
    /// or empty directory. Capped at 255 to fit the reply argument.
    pub fn count_dbs(&self) -> u8 {
        let dbs = self.dbs_dir();
        let mut n: u8 = 0;
        while n < u8::MAX && dir_has_entries(&dbs.join(n.to_string())) {
            n += 1;
        }
        n
    }

    /// Remove database `id`. A database that does not exist counts as
    /// cleared.
    pub fn clear_db(&self, id: u8) -> std::io::Result<()> {
        let dir = self.dbs_dir().join(id.to_string());
        match std::fs::remove_dir_all(&dir) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

fn dir_has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
