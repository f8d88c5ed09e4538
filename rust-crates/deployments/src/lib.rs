use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Mainnet,
    Dev,
    Local,
}

impl DeploymentEnv {
    pub const ALL: [DeploymentEnv; 3] =
        [DeploymentEnv::Mainnet, DeploymentEnv::Dev, DeploymentEnv::Local];

    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Mainnet => "mainnet",
            DeploymentEnv::Dev => "dev",
            DeploymentEnv::Local => "local",
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Mainnet => "Mainnet",
            DeploymentEnv::Dev => "Devnet",
            DeploymentEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

/// Where the flip program and its token live on one network. Addresses are
/// kept as base58 strings.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub recorded_at: String,
    pub program_id: String,
    pub token_mint: String,
    pub vault_wallet: String,
    #[serde(default)]
    pub decimals: Option<u8>,
    #[serde(default)]
    pub network_url: Option<String>,
    #[serde(default)]
    pub token_ticker: Option<String>,
}

impl DeploymentRecord {
    pub fn new(
        program_id: impl Into<String>,
        token_mint: impl Into<String>,
        vault_wallet: impl Into<String>,
    ) -> Self {
        Self {
            recorded_at: Utc::now().to_rfc3339(),
            program_id: program_id.into(),
            token_mint: token_mint.into(),
            vault_wallet: vault_wallet.into(),
            decimals: None,
            network_url: None,
            token_ticker: None,
        }
    }
}

#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        Self::in_root(DEPLOYMENTS_ROOT, env)
    }

    pub fn in_root(root: impl AsRef<Path>, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root.as_ref(), env)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<DeploymentRecord>> {
        read_record(&self.path)
    }

    pub fn save(&self, record: &DeploymentRecord) -> Result<()> {
        write_record(&self.path, record)
    }
}

pub fn ensure_structure() -> Result<()> {
    ensure_structure_in(DEPLOYMENTS_ROOT)
}

pub fn ensure_structure_in(root: impl AsRef<Path>) -> Result<()> {
    for env in DeploymentEnv::ALL {
        let _ = ensure_store(root.as_ref(), env)?;
    }
    Ok(())
}

pub fn record_deployment(env: DeploymentEnv, record: &DeploymentRecord) -> Result<()> {
    DeploymentStore::new(env)?.save(record)
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).with_context(|| {
            format!("Failed to create deployment directory {}", env_dir.display())
        })?;
    }

    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        fs::File::create(&file_path).with_context(|| {
            format!(
                "Failed to create deployment record file for {} at {:?}",
                env, file_path
            )
        })?;
    }

    Ok(file_path)
}

fn read_record(path: impl AsRef<Path>) -> Result<Option<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).context("Failed to read deployment records")?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    if let Ok(record) = serde_json::from_slice::<DeploymentRecord>(&data) {
        return Ok(Some(record));
    }
    if let Ok(mut records) = serde_json::from_slice::<Vec<DeploymentRecord>>(&data) {
        return Ok(records.pop());
    }
    Err(anyhow!(
        "Failed to parse deployment record JSON; expected a single deployment object"
    ))
}

fn write_record(path: impl AsRef<Path>, record: &DeploymentRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record)
        .context("Failed to serialize deployment record")?;
    fs::write(path.as_ref(), json).context("Failed to write deployment record")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn ensure_structure_in__creates_empty_file_per_network() {
        // given
        let root = TempDir::new("deployments").unwrap();

        // when
        ensure_structure_in(root.path()).unwrap();

        // then
        for env in DeploymentEnv::ALL {
            let store = DeploymentStore::in_root(root.path(), env).unwrap();
            assert!(store.path().exists());
            assert_eq!(store.load().unwrap(), None);
        }
    }

    #[test]
    fn save__round_trips_latest_record() {
        // given
        let root = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(root.path(), DeploymentEnv::Dev).unwrap();
        let mut record = DeploymentRecord::new("program", "mint", "vault");
        record.decimals = Some(6);

        // when
        store.save(&record).unwrap();

        // then
        assert_eq!(store.load().unwrap(), Some(record));
    }

    #[test]
    fn load__takes_last_entry_of_a_record_list() {
        let root = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(root.path(), DeploymentEnv::Local).unwrap();
        let first = DeploymentRecord::new("p1", "m1", "v1");
        let second = DeploymentRecord::new("p2", "m2", "v2");
        fs::write(
            store.path(),
            serde_json::to_vec(&vec![first, second.clone()]).unwrap(),
        )
        .unwrap();

        assert_eq!(store.load().unwrap(), Some(second));
    }

    #[test]
    fn load__rejects_garbage() {
        let root = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(root.path(), DeploymentEnv::Mainnet).unwrap();
        fs::write(store.path(), b"not json").unwrap();
        assert!(store.load().is_err());
    }
}
