//! Reversible string encoding for structured values kept in annotations.
//!
//! A value is first turned into its canonical serialized bytes and then into
//! standard base64 text. Consumers must treat the resulting string as opaque.

use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::core::v1::{Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The input is not valid base64 text.
    #[error("bad encoding: {0}")]
    BadEncoding(#[from] base64::DecodeError),
    /// The text decoded fine but the bytes are not a valid value of the target type.
    #[error("bad content for {kind}: {source}")]
    BadContent {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("serializing {kind}: {source}")]
    Serialize {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Types with a canonical byte form suitable for annotation storage.
///
/// The byte form must be a pure function of the value's content: struct fields
/// are emitted in declaration order and maps are ordered, so equal values always
/// produce equal bytes.
pub trait Canonical: Sized {
    const KIND: &'static str;

    fn to_canonical(&self) -> Result<Vec<u8>, CodecError>;
    fn from_canonical(bytes: &[u8]) -> Result<Self, CodecError>;
}

fn bad_content(kind: &'static str, source: serde_json::Error) -> CodecError {
    CodecError::BadContent { kind, source }
}

/// Deserialize `bytes` as `T`, rejecting payloads that only parse because
/// absent fields fall back to defaults or unknown fields are skipped.
///
/// The payload must equal the serialized form of the value it decodes to,
/// compared as JSON documents so whitespace and key order do not matter.
fn strict_from_slice<T>(kind: &'static str, bytes: &[u8]) -> Result<T, CodecError>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let raw: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| bad_content(kind, e))?;
    let value: T = serde_json::from_value(raw.clone()).map_err(|e| bad_content(kind, e))?;
    let normalized = serde_json::to_value(&value).map_err(|source| CodecError::Serialize { kind, source })?;
    if normalized != raw {
        let msg = format!("payload is not a complete {kind}: missing or unrecognized fields");
        return Err(bad_content(kind, <serde_json::Error as serde::de::Error>::custom(msg)));
    }
    Ok(value)
}

macro_rules! canonical_via_serde {
    ($($ty:ty => $kind:literal),* $(,)?) => {
        $(
            impl Canonical for $ty {
                const KIND: &'static str = $kind;

                fn to_canonical(&self) -> Result<Vec<u8>, CodecError> {
                    serde_json::to_vec(self).map_err(|source| CodecError::Serialize { kind: Self::KIND, source })
                }

                fn from_canonical(bytes: &[u8]) -> Result<Self, CodecError> {
                    strict_from_slice(Self::KIND, bytes)
                }
            }
        )*
    };
}

canonical_via_serde! {
    Volume => "Volume",
    VolumeMount => "VolumeMount",
    OwnerReference => "OwnerReference",
}

/// Encode a value into printable annotation text.
pub fn encode<T: Canonical>(value: &T) -> Result<String, CodecError> {
    let bytes = value.to_canonical()?;
    Ok(STANDARD.encode(bytes))
}

/// Decode annotation text produced by [`encode`].
pub fn decode<T: Canonical>(text: &str) -> Result<T, CodecError> {
    let bytes = STANDARD.decode(text)?;
    T::from_canonical(&bytes)
}
