// Cluster membership configuration.
//
// One struct enumerating every tunable, `Default`-constructible, and
// loadable from a JSON document via `serde_json`.

use crate::address::Address;
use crate::error::{Result, SwimError};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    /// The address self identifies as to peers.
    pub advertised_address: SocketAddr,

    /// Local listen address (transport only).
    pub bind_address: SocketAddr,

    /// Initial peer addresses to populate the alive table at startup.
    pub bootstrap_members: Vec<SocketAddr>,

    /// Wall-clock duration of one protocol period.
    #[serde(with = "duration_millis")]
    pub protocol_period: Duration,

    /// Default / lower bound for the dynamic direct-ping timeout.
    #[serde(with = "duration_millis")]
    pub direct_ping_timeout: Duration,

    /// Upper bound for the dynamic direct-ping timeout.
    #[serde(with = "duration_millis")]
    pub direct_ping_timeout_max: Duration,

    /// k, the number of relays used for indirect probing.
    pub indirect_ping_member_count: usize,

    /// Multiplier on ceil(log2(N)) governing gossip max transmission count
    /// and suspicion-to-faulty promotion.
    pub safety_factor: u32,

    /// UDP packet cap, outgoing.
    pub max_datagram_length_send: usize,

    /// UDP packet cap, incoming.
    pub max_datagram_length_receive: usize,

    /// Period between full-list syncs.
    #[serde(with = "duration_millis")]
    pub list_request_interval: Duration,

    /// Ordered encryption keys; first encrypts, all are tried on decrypt
    /// (newest-first) to support rollover.
    #[serde(default)]
    pub encryption_keys: Vec<EncryptionKeyConfig>,

    /// Initial gossip-queue ring capacity.
    pub gossip_pre_allocation_count: usize,

    /// Faulty-list max list-request-observation buckets.
    pub faulty_max_list_request_count: usize,

    /// Faulty-list initial ring capacity.
    pub faulty_pre_allocation_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionKeyConfig {
    pub key_id: String,
    #[serde(with = "hex_bytes")]
    pub key_material: Vec<u8>,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            advertised_address: "127.0.0.1:7946".parse().unwrap(),
            bind_address: "0.0.0.0:7946".parse().unwrap(),
            bootstrap_members: Vec::new(),
            protocol_period: Duration::from_millis(1000),
            direct_ping_timeout: Duration::from_millis(500),
            direct_ping_timeout_max: Duration::from_millis(2000),
            indirect_ping_member_count: 3,
            safety_factor: 3,
            max_datagram_length_send: 1400,
            max_datagram_length_receive: 65536,
            list_request_interval: Duration::from_secs(30),
            encryption_keys: Vec::new(),
            gossip_pre_allocation_count: 64,
            faulty_max_list_request_count: 8,
            faulty_pre_allocation_count: 32,
        }
    }
}

impl MembershipConfig {
    pub fn advertised(&self) -> Result<Address> {
        Address::new(self.advertised_address)
    }

    pub fn bootstrap_addresses(&self) -> Result<Vec<Address>> {
        self.bootstrap_members
            .iter()
            .map(|a| Address::new(*a))
            .collect()
    }

    /// Build the encryption keyring from the configured key material,
    /// newest-first (as listed).
    pub fn key_ring(&self) -> Result<crate::crypto::KeyRing> {
        let keys = self
            .encryption_keys
            .iter()
            .map(|k| {
                if k.key_material.len() != crate::crypto::KEY_LEN {
                    return Err(SwimError::Configuration(format!(
                        "encryption key {} must be {} bytes, got {}",
                        k.key_id,
                        crate::crypto::KEY_LEN,
                        k.key_material.len()
                    )));
                }
                let mut material = [0u8; crate::crypto::KEY_LEN];
                material.copy_from_slice(&k.key_material);
                Ok(crate::crypto::EncryptionKey::new(k.key_id.clone(), material))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(crate::crypto::KeyRing::new(keys))
    }

    /// Load configuration from a JSON document via `serde_json`. Any field
    /// absent from the document falls back to `MembershipConfig::default()`.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut contents = String::new();
        reader
            .read_to_string(&mut contents)
            .map_err(|e| SwimError::Configuration(e.to_string()))?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).map_err(|e| SwimError::Configuration(e.to_string()))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SwimError::Configuration(e.to_string()))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        s.serialize_str(&hex)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<u8>, D::Error> {
        let hex = String::deserialize(d)?;
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = MembershipConfig::default();
        let json = config.to_json_string().unwrap();
        let parsed = MembershipConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed.advertised_address, config.advertised_address);
        assert_eq!(parsed.safety_factor, config.safety_factor);
    }

    #[test]
    fn bad_json_is_a_configuration_error() {
        let err = MembershipConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, SwimError::Configuration(_)));
    }
}
