//! On-disk node configuration (`config.toml` under the home directory).

use camino::{Utf8Path, Utf8PathBuf};
use eyre::WrapErr;
use libp2p::identity;
use meshsync_crypto::SharedKey;
use meshsync_network::config::{DiscoveryConfig, SwarmConfig};
use meshsync_network::NetworkConfig;
use serde::{Deserialize, Serialize};

use crate::NodeConfig;

pub const CONFIG_FILE: &str = "config.toml";

pub const DEFAULT_PORT: u16 = 2530;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(
        with = "serde_identity",
        default = "identity::Keypair::generate_ed25519"
    )]
    pub identity: identity::Keypair,
    pub swarm: SwarmConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Source tree for outbound transfers.
    pub shared_root: Utf8PathBuf,
    /// Staging root for inbound transfers.
    pub staging_root: Utf8PathBuf,
    /// Metadata journal file.
    pub journal: Utf8PathBuf,
    /// Hex-encoded 256-bit key for sealed transfers. Every node in the
    /// group needs the same value.
    pub encryption_key: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            shared_root: "shared".into(),
            staging_root: "TransferredFiles".into(),
            journal: "sync-metadata.json".into(),
            encryption_key: None,
        }
    }
}

impl ConfigFile {
    pub fn exists(dir: &Utf8Path) -> bool {
        dir.join(CONFIG_FILE).is_file()
    }

    pub fn load(dir: &Utf8Path) -> eyre::Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let content = std::fs::read_to_string(&path)
            .wrap_err_with(|| format!("failed to read configuration from {path:?}"))?;

        toml::from_str(&content).map_err(Into::into)
    }

    pub fn save(&self, dir: &Utf8Path) -> eyre::Result<()> {
        let path = dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self)?;

        std::fs::write(&path, content)
            .wrap_err_with(|| format!("failed to write configuration to {path:?}"))
    }

    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            identity: self.identity.clone(),
            swarm: SwarmConfig {
                listen: self.swarm.listen.clone(),
            },
            discovery: DiscoveryConfig {
                mdns: self.discovery.mdns,
            },
        }
    }

    /// Resolves relative paths against `home` and decodes the transfer key.
    pub fn node_config(&self, home: &Utf8Path, encrypt: bool) -> eyre::Result<NodeConfig> {
        let transfer_key = self
            .sync
            .encryption_key
            .as_deref()
            .map(|encoded| -> eyre::Result<SharedKey> {
                let raw = hex::decode(encoded).wrap_err("encryption_key is not valid hex")?;

                SharedKey::from_slice(&raw).map_err(Into::into)
            })
            .transpose()?;

        if encrypt && transfer_key.is_none() {
            eyre::bail!("encryption requested but no encryption_key is configured");
        }

        Ok(NodeConfig {
            shared_root: resolve(home, &self.sync.shared_root),
            staging_root: resolve(home, &self.sync.staging_root),
            journal: resolve(home, &self.sync.journal),
            encrypt,
            transfer_key,
        })
    }
}

fn resolve(home: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        path.to_owned()
    } else {
        home.join(path)
    }
}

mod serde_identity {
    use libp2p::identity::Keypair;
    use serde::de::{self, MapAccess};
    use serde::ser::{self, SerializeMap};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(key: &Keypair, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut keypair = serializer.serialize_map(Some(2))?;
        keypair.serialize_entry("PeerID", &key.public().to_peer_id().to_base58())?;
        keypair.serialize_entry(
            "PrivKey",
            &bs58::encode(&key.to_protobuf_encoding().map_err(ser::Error::custom)?).into_string(),
        )?;
        keypair.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Keypair, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IdentityVisitor;

        impl<'de> de::Visitor<'de> for IdentityVisitor {
            type Value = Keypair;

            fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                formatter.write_str("an identity")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut peer_id = None::<String>;
                let mut priv_key = None::<String>;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "PeerID" => peer_id = Some(map.next_value()?),
                        "PrivKey" => priv_key = Some(map.next_value()?),
                        _ => {
                            let _ = map.next_value::<de::IgnoredAny>()?;
                        }
                    }
                }

                let peer_id = peer_id.ok_or_else(|| de::Error::missing_field("PeerID"))?;
                let priv_key = priv_key.ok_or_else(|| de::Error::missing_field("PrivKey"))?;

                let priv_key = bs58::decode(priv_key)
                    .into_vec()
                    .map_err(|_| de::Error::custom("invalid base58"))?;

                let keypair = Keypair::from_protobuf_encoding(&priv_key)
                    .map_err(|_| de::Error::custom("invalid protobuf"))?;

                if peer_id != keypair.public().to_peer_id().to_base58() {
                    return Err(de::Error::custom("PeerID does not match public key"));
                }

                Ok(keypair)
            }
        }

        deserializer.deserialize_struct("Keypair", &["PeerID", "PrivKey"], IdentityVisitor)
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    use super::*;

    fn home(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    fn sample() -> ConfigFile {
        ConfigFile {
            identity: identity::Keypair::generate_ed25519(),
            swarm: SwarmConfig {
                listen: vec!["/ip4/0.0.0.0/tcp/2530".parse().unwrap()],
            },
            discovery: DiscoveryConfig::default(),
            sync: SyncConfig {
                encryption_key: Some(hex::encode([3; 32])),
                ..SyncConfig::default()
            },
        }
    }

    #[test]
    fn test_config_round_trip_preserves_identity() {
        let dir = TempDir::new().unwrap();
        let home = home(&dir);

        let config = sample();
        config.save(&home).unwrap();

        assert!(ConfigFile::exists(&home));

        let loaded = ConfigFile::load(&home).unwrap();

        assert_eq!(
            loaded.identity.public().to_peer_id(),
            config.identity.public().to_peer_id()
        );
        assert_eq!(loaded.swarm.listen, config.swarm.listen);
    }

    #[test]
    fn test_node_config_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let home = home(&dir);

        let node_config = sample().node_config(&home, true).unwrap();

        assert_eq!(node_config.shared_root, home.join("shared"));
        assert_eq!(node_config.staging_root, home.join("TransferredFiles"));
        assert_eq!(node_config.journal, home.join("sync-metadata.json"));
        assert!(node_config.transfer_key.is_some());
    }

    #[test]
    fn test_encrypt_without_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let home = home(&dir);

        let mut config = sample();
        config.sync.encryption_key = None;

        assert!(config.node_config(&home, true).is_err());
        assert!(config.node_config(&home, false).is_ok());
    }
}
