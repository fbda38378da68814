//! Serde helpers for fixed-size key/token byte arrays, so config structs and session keys can
//! round-trip through TOML/JSON as base64 strings instead of byte-array literals.
pub mod base64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&::base64::encode(bytes))
    }

    pub fn deserialize_into<'de, D>(deserializer: D, out: &mut [u8]) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = <&str>::deserialize(deserializer)?;
        let decoded = ::base64::decode(encoded).map_err(de::Error::custom)?;

        if decoded.len() != out.len() {
            return Err(de::Error::custom(format!(
                "expected {} decoded bytes, got {}",
                out.len(),
                decoded.len()
            )));
        }

        out.copy_from_slice(&decoded);
        Ok(())
    }
}
