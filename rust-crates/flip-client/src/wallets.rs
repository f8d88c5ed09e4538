use crate::error::{
    FlipError,
    Result,
};
use eth_keystore::decrypt_key;
use rpassword::prompt_password;
use solana_sdk::{
    signature::Keypair,
    signer::{
        Signer,
        keypair::{
            keypair_from_seed,
            read_keypair_file,
        },
    },
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEFAULT_WALLET_NAME: &str = "id";

const KEYPAIR_EXTENSION: &str = "json";
const KEYSTORE_EXTENSION: &str = "wallet";
const SEED_LEN: usize = 32;

/// Accepts a bare 32-byte seed or the 64-byte `seed ‖ public key` layout
/// used by keypair files. The public half must match the seed.
pub fn keypair_from_secret(bytes: &[u8]) -> Result<Keypair> {
    let seed = bytes.get(..SEED_LEN).ok_or_else(|| {
        FlipError::Wallet(format!("key material too short ({} bytes)", bytes.len()))
    })?;
    let keypair = keypair_from_seed(seed)
        .map_err(|e| FlipError::Wallet(format!("invalid key seed: {e}")))?;
    match bytes.len() {
        SEED_LEN => Ok(keypair),
        64 if bytes[SEED_LEN..] == keypair.pubkey().to_bytes() => Ok(keypair),
        64 => Err(FlipError::Wallet("public key does not match secret key".into())),
        other => Err(FlipError::Wallet(format!("unsupported key length {other}"))),
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WalletKind {
    /// Plain JSON array of the 64 keypair bytes.
    KeypairFile,
    /// Password-encrypted keystore holding the seed.
    Keystore,
}

#[derive(Clone, Debug)]
pub struct WalletDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub kind: WalletKind,
}

impl WalletDescriptor {
    pub fn new(name: impl Into<String>, path: PathBuf, kind: WalletKind) -> Self {
        Self {
            name: name.into(),
            path,
            kind,
        }
    }
}

pub fn default_wallet_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| FlipError::Wallet("HOME environment variable not set".into()))?;
    Ok(PathBuf::from(home).join(".config").join("solana"))
}

pub fn resolve_wallet_dir(dir: Option<&str>) -> Result<PathBuf> {
    match dir {
        Some(raw) => Ok(PathBuf::from(shellexpand::tilde(raw).into_owned())),
        None => default_wallet_dir(),
    }
}

pub fn list_wallets(dir: &Path) -> Result<Vec<WalletDescriptor>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let read_err = |e: std::io::Error| {
        FlipError::Wallet(format!("failed to read wallet directory {}: {e}", dir.display()))
    };
    let mut wallets = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if !path.is_file() {
            continue;
        }
        let kind = match path.extension().and_then(|ext| ext.to_str()) {
            Some(KEYPAIR_EXTENSION) => WalletKind::KeypairFile,
            Some(KEYSTORE_EXTENSION) => WalletKind::Keystore,
            _ => continue,
        };
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        wallets.push(WalletDescriptor::new(name, path.clone(), kind));
    }
    wallets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wallets)
}

pub fn find_wallet(dir: &Path, name: &str) -> Result<WalletDescriptor> {
    list_wallets(dir)?
        .into_iter()
        .find(|w| w.name == name)
        .ok_or_else(|| {
            FlipError::Wallet(format!("wallet '{name}' not found in {}", dir.display()))
        })
}

/// Loads the keypair behind `descriptor`, prompting for a password when the
/// wallet is an encrypted keystore.
pub fn unlock_wallet(descriptor: &WalletDescriptor) -> Result<Keypair> {
    match descriptor.kind {
        WalletKind::KeypairFile => read_keypair_file(&descriptor.path).map_err(|e| {
            FlipError::Wallet(format!("failed to read {}: {e}", descriptor.path.display()))
        }),
        WalletKind::Keystore => {
            let prompt = format!("Enter password for wallet '{}': ", descriptor.name);
            let password = prompt_password(prompt)
                .map_err(|e| FlipError::Wallet(format!("failed to read password: {e}")))?;
            unlock_keystore(descriptor, &password)
        }
    }
}

pub fn unlock_keystore(descriptor: &WalletDescriptor, password: &str) -> Result<Keypair> {
    let secret = decrypt_key(&descriptor.path, password.as_bytes()).map_err(|_| {
        FlipError::Wallet(format!("invalid password for wallet '{}'", descriptor.name))
    })?;
    keypair_from_secret(&secret).map_err(|_| {
        FlipError::Wallet(format!(
            "wallet '{}' contained unsupported key material",
            descriptor.name
        ))
    })
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use solana_sdk::signer::keypair::write_keypair_file;
    use tempdir::TempDir;

    #[test]
    fn keypair_from_secret__accepts_keypair_layout_and_rejects_mismatch() {
        // given
        let keypair = keypair_from_seed(&[3u8; 32]).unwrap();
        let mut bytes = keypair.to_bytes();

        // when
        let restored = keypair_from_secret(&bytes).unwrap();
        let from_seed = keypair_from_secret(&bytes[..SEED_LEN]).unwrap();
        bytes[63] ^= 1;
        let mismatched = keypair_from_secret(&bytes);

        // then
        assert_eq!(restored.pubkey(), keypair.pubkey());
        assert_eq!(from_seed.pubkey(), keypair.pubkey());
        assert!(matches!(mismatched, Err(FlipError::Wallet(_))));
        assert!(matches!(keypair_from_secret(&[1u8; 16]), Err(FlipError::Wallet(_))));
    }

    #[test]
    fn list_wallets__finds_keypair_files_and_keystores_sorted() {
        // given
        let dir = TempDir::new("flip-wallets").unwrap();
        let keypair = keypair_from_seed(&[5u8; 32]).unwrap();
        write_keypair_file(&keypair, dir.path().join("zeta.json")).unwrap();
        fs::write(dir.path().join("alpha.wallet"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        // when
        let wallets = list_wallets(dir.path()).unwrap();

        // then
        let names: Vec<(&str, WalletKind)> =
            wallets.iter().map(|w| (w.name.as_str(), w.kind)).collect();
        assert_eq!(
            names,
            vec![("alpha", WalletKind::Keystore), ("zeta", WalletKind::KeypairFile)]
        );
        let found = find_wallet(dir.path(), "zeta").unwrap();
        assert_eq!(unlock_wallet(&found).unwrap().pubkey(), keypair.pubkey());
    }

    #[test]
    fn unlock_wallet__reports_unreadable_keypair_file() {
        let dir = TempDir::new("flip-wallets").unwrap();
        fs::write(dir.path().join("broken.json"), "[1, 2, 3]").unwrap();
        let found = find_wallet(dir.path(), "broken").unwrap();
        let err = unlock_wallet(&found).unwrap_err();
        assert!(matches!(err, FlipError::Wallet(_)));
    }

    #[test]
    fn find_wallet__reports_missing_name() {
        let dir = TempDir::new("flip-wallets").unwrap();
        let err = find_wallet(dir.path(), "ghost").unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
