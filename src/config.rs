use std::env;
use std::path::PathBuf;

const GIB: i64 = 1_073_741_824;

/// Boot-time configuration, immutable once loaded.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address, also stamped into new vaults as their host.
    pub host: String,
    /// If non-empty, signup requires this key.
    pub signup_key: String,
    /// Directory holding the database and the token secret.
    pub data_dir: PathBuf,
    /// Per-vault storage quota in bytes.
    pub max_storage_bytes: i64,
    /// Publish site limit per user.
    pub max_sites_per_user: usize,
    /// Whether a session INIT compacts the vault's file history.
    pub snapshot_on_connect: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let max_storage_gb = env::var("MAX_STORAGE_GB")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(10);
        let max_sites_per_user = env::var("MAX_SITES_PER_USER")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(5);
        let snapshot_on_connect = env::var("SNAPSHOT_ON_CONNECT")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(true);

        Config {
            host: env::var("HOST").unwrap_or_else(|_| "localhost:3000".to_string()),
            signup_key: env::var("SIGNUP_KEY").unwrap_or_default(),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            max_storage_bytes: max_storage_gb * GIB,
            max_sites_per_user,
            snapshot_on_connect,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("vaults.db")
    }

    pub fn secret_path(&self) -> PathBuf {
        self.data_dir.join("secret.bin")
    }

    #[cfg(test)]
    pub fn for_tests(data_dir: &std::path::Path) -> Self {
        Config {
            host: "localhost:3000".to_string(),
            signup_key: String::new(),
            data_dir: data_dir.to_path_buf(),
            max_storage_bytes: 10 * GIB,
            max_sites_per_user: 5,
            snapshot_on_connect: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn paths_join_data_dir() {
        let config = Config::for_tests(Path::new("/tmp/vaultd"));
        assert_eq!(config.db_path(), Path::new("/tmp/vaultd/vaults.db"));
        assert_eq!(config.secret_path(), Path::new("/tmp/vaultd/secret.bin"));
    }
}
