//! Configuration surface (§6.4), loaded the way `gamecore::config::GameConfig` is: a
//! `serde`-derived struct with a `Default` carrying production values, `load_from_file` via
//! `serdeconv::from_toml_file`, and a separate `apply_env_overrides` step — environment overrides
//! are explicit code, not serde magic.
use netnext_crypto::encoding::base64;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

fn default_backend_hostname() -> String {
    "prod.spnext.io".to_string()
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_backend_hostname")]
    pub server_backend_hostname: String,

    #[serde(serialize_with = "base64::serialize", deserialize_with = "deserialize_key32")]
    pub relay_backend_public_key: [u8; 32],

    #[serde(serialize_with = "base64::serialize", deserialize_with = "deserialize_key32")]
    pub server_backend_public_key: [u8; 32],

    #[serde(serialize_with = "base64::serialize", deserialize_with = "deserialize_key32")]
    pub buyer_public_key: [u8; 32],

    #[serde(serialize_with = "base64::serialize", deserialize_with = "deserialize_key64")]
    pub buyer_private_key: [u8; 64],

    pub disable_network_next: bool,
    pub disable_autodetect: bool,

    pub socket_send_buffer_size: usize,
    pub socket_receive_buffer_size: usize,
}

fn deserialize_key32<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
where
    D: serde::Deserializer<'de>,
{
    let mut out = [0u8; 32];
    base64::deserialize_into(deserializer, &mut out)?;
    Ok(out)
}

fn deserialize_key64<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
where
    D: serde::Deserializer<'de>,
{
    let mut out = [0u8; 64];
    base64::deserialize_into(deserializer, &mut out)?;
    Ok(out)
}

impl Default for Config {
    fn default() -> Config {
        Config {
            server_backend_hostname: default_backend_hostname(),
            relay_backend_public_key: [0u8; 32],
            server_backend_public_key: [0u8; 32],
            buyer_public_key: [0u8; 32],
            buyer_private_key: [0u8; 64],
            disable_network_next: false,
            disable_autodetect: false,
            socket_send_buffer_size: 1024 * 1024,
            socket_receive_buffer_size: 1024 * 1024,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Config {
        serdeconv::from_toml_file(path).expect("error loading network-next configuration file")
    }

    /// Applies the `NEXT_*` environment overrides named in §6.4. Visible, debuggable: each
    /// variable is checked explicitly rather than folded into serde's deserialization.
    pub fn apply_env_overrides(&mut self, datacenter: &mut Option<String>, server_address: &mut Option<String>, bind_address: &mut Option<String>, server_backend_port: &mut Option<u16>) {
        if let Ok(value) = std::env::var("NEXT_DATACENTER") {
            *datacenter = Some(value);
        }
        if let Ok(value) = std::env::var("NEXT_SERVER_ADDRESS") {
            *server_address = Some(value);
        }
        if let Ok(value) = std::env::var("NEXT_BIND_ADDRESS") {
            *bind_address = Some(value);
        }
        if let Ok(value) = std::env::var("NEXT_SERVER_BACKEND_PORT") {
            if let Ok(port) = value.parse() {
                *server_backend_port = Some(port);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_disables_nothing_by_default() {
        let config = Config::default();
        assert!(!config.disable_network_next);
        assert!(!config.disable_autodetect);
        assert_eq!(config.server_backend_hostname, "prod.spnext.io");
    }

    #[test]
    fn env_overrides_patch_only_set_variables() {
        std::env::remove_var("NEXT_DATACENTER");
        std::env::set_var("NEXT_SERVER_ADDRESS", "127.0.0.1:40000");

        let config = Config::default();
        let mut datacenter = None;
        let mut server_address = None;
        let mut bind_address = None;
        let mut server_backend_port = None;
        config.apply_env_overrides(&mut datacenter, &mut server_address, &mut bind_address, &mut server_backend_port);

        assert_eq!(datacenter, None);
        assert_eq!(server_address, Some("127.0.0.1:40000".to_string()));

        std::env::remove_var("NEXT_SERVER_ADDRESS");
    }
}
