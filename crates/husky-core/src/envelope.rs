//! The signed envelope: wire unit between gateway, clients and backends.
//!
//! Wire format is a JSON object with fields in this order:
//! `Id`, `Data`, `Sign`, `SessionId`, `Ver`, `ExpireTs`, `ServerName`,
//! `ClientAddr`. Everything after `Data` is omitted when empty or zero.
//!
//! Whether `Data` is compressed and which [`Scheme`] signs the envelope are
//! not carried on the wire; both are properties of the channel.

use crate::error::{HuskyError, HuskyResult};
use crate::scheme::Scheme;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::{to_raw_value, RawValue};
use std::io::{Read, Write};
use thiserror::Error;
use tracing::debug;

/// A message envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    /// Routing key, `<server>.<message>` or a bare message name.
    #[serde(default)]
    pub id: String,
    /// Serialized body; after decode always the raw (uncompressed) JSON.
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sign: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    /// Protocol version, reserved.
    #[serde(rename = "Ver", default, skip_serializing_if = "is_zero")]
    pub version: i32,
    /// Unix seconds after which the envelope is rejected. Zero disables.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub expire_ts: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_name: String,
    /// Originating client address; trusted only on server-facing channels.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_addr: String,
}

fn is_zero<T: Default + PartialEq>(v: &T) -> bool {
    *v == T::default()
}

/// A decode failure, carrying whatever could be parsed for diagnostics.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Rejected {
    #[source]
    pub error: HuskyError,
    pub envelope: Option<Box<Envelope>>,
}

impl Rejected {
    fn new(error: HuskyError, envelope: Option<Envelope>) -> Self {
        Self {
            error,
            envelope: envelope.map(Box::new),
        }
    }
}

impl From<Rejected> for HuskyError {
    fn from(r: Rejected) -> Self {
        r.error
    }
}

impl Envelope {
    /// An envelope with no body.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// An envelope whose body is `body` serialized as JSON.
    pub fn with_body<T: Serialize + ?Sized>(id: impl Into<String>, body: &T) -> HuskyResult<Self> {
        Ok(Self {
            id: id.into(),
            data: Some(to_raw_value(body)?),
            ..Default::default()
        })
    }

    /// An envelope whose body is already-serialized JSON, passed through as is.
    pub fn with_raw(id: impl Into<String>, raw: &[u8]) -> HuskyResult<Self> {
        Ok(Self {
            id: id.into(),
            data: Some(serde_json::from_slice::<Box<RawValue>>(raw)?),
            ..Default::default()
        })
    }

    pub fn session_id(mut self, ssid: impl Into<String>) -> Self {
        self.session_id = ssid.into();
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn client_addr(mut self, addr: impl Into<String>) -> Self {
        self.client_addr = addr.into();
        self
    }

    pub fn expire_ts(mut self, ts: i64) -> Self {
        self.expire_ts = ts;
        self
    }

    /// Raw JSON text of the body (`null` when absent).
    pub fn data_str(&self) -> &str {
        self.data.as_deref().map(RawValue::get).unwrap_or("null")
    }

    /// Deserialize the body into `T`.
    pub fn body<T: DeserializeOwned>(&self) -> HuskyResult<T> {
        Ok(serde_json::from_str(self.data_str())?)
    }

    /// Serialize and sign.
    ///
    /// With `zip` set and a body larger than the scheme's threshold, the body
    /// is zlib-compressed and embedded as a base64 string.
    pub fn encode(mut self, scheme: &Scheme, zip: bool) -> HuskyResult<Vec<u8>> {
        self.sign = scheme.placeholder().to_string();
        if let Some(data) = &self.data {
            if scheme.should_compress(zip, data.get().len()) {
                self.data = Some(compress(data.get().as_bytes())?);
            }
        }

        let mut buf = serde_json::to_vec(&self)?;
        scheme.sign_in_place(&mut buf)?;
        Ok(buf)
    }

    /// Parse, check expiry, decompress and verify.
    ///
    /// With `zip` set, a string body that is not base64 zlib data is left
    /// untouched.
    ///
    /// Expiry is checked before the signature, so an expired envelope is
    /// reported as [`HuskyError::Expired`] even when correctly signed.
    pub fn decode(buf: &[u8], scheme: &Scheme, zip: bool) -> Result<Self, Rejected> {
        let mut pkg: Envelope =
            serde_json::from_slice(buf).map_err(|e| Rejected::new(e.into(), None))?;

        if pkg.expire_ts > 0 && pkg.expire_ts < unix_now() {
            return Err(Rejected::new(HuskyError::Expired, Some(pkg)));
        }

        let mut work = buf.to_vec();
        let signed = scheme.sign_in_place(&mut work);

        if zip {
            if let Some(text) = pkg.data.as_deref().and_then(json_string) {
                // Bodies under the threshold travel as-is, strings included.
                match decompress(&text) {
                    Ok(raw) => pkg.data = Some(raw),
                    Err(e) => debug!(msg_id = %pkg.id, error = %e, "string body kept uncompressed"),
                }
            }
        }

        match signed {
            Ok(Some(sign)) if sign != pkg.sign => {
                Err(Rejected::new(HuskyError::InvalidSign, Some(pkg)))
            }
            Ok(_) => Ok(pkg),
            Err(_) => Err(Rejected::new(HuskyError::InvalidSign, Some(pkg))),
        }
    }

    /// [`Envelope::decode`] followed by [`Envelope::body`].
    pub fn decode_into<T: DeserializeOwned>(
        buf: &[u8],
        scheme: &Scheme,
        zip: bool,
    ) -> Result<(Self, T), Rejected> {
        let pkg = Self::decode(buf, scheme, zip)?;
        match pkg.body() {
            Ok(body) => Ok((pkg, body)),
            Err(e) => Err(Rejected::new(e, Some(pkg))),
        }
    }
}

fn json_string(raw: &RawValue) -> Option<String> {
    if raw.get().starts_with('"') {
        serde_json::from_str(raw.get()).ok()
    } else {
        None
    }
}

fn compress(data: &[u8]) -> HuskyResult<Box<RawValue>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    let zipped = encoder.finish()?;
    Ok(to_raw_value(&STANDARD.encode(zipped))?)
}

fn decompress(text: &str) -> HuskyResult<Box<RawValue>> {
    let zipped = STANDARD.decode(text)?;
    let mut raw = Vec::new();
    ZlibDecoder::new(zipped.as_slice())
        .read_to_end(&mut raw)
        .map_err(|e| HuskyError::Compression(e.to_string()))?;
    Ok(serde_json::from_slice(&raw)?)
}

pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
