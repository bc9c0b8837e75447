//! Wire codec for callback deliveries.
//!
//! In-world scripts decode these with little more than string splitting, so the
//! format is a flat record:
//!
//! ```text
//! V=1|TYPE=PKG|RID=...|USER=...|NPC=...|OK=1|CHAT=...|ACT=...|Q=...|CB=...|ERR=
//! ```
//!
//! Values are percent-encoded for control characters, non-ASCII, `%`, `|` and `=`
//! so a decoder can split on `|`, then on the first `=`, then unescape. Field order
//! is fixed per package type.
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

pub const WIRE_VERSION: &str = "1";

const VALUE: &AsciiSet = &CONTROLS.add(b'%').add(b'|').add(b'=');

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("segment {0} has no '='")]
    MissingSeparator(usize),

    #[error("empty key in segment {0}")]
    EmptyKey(usize),

    #[error("value for {key} is not valid UTF-8 after unescaping")]
    InvalidUtf8 { key: String },

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("unsupported package type {0}")]
    UnknownType(String),
}

pub fn escape_value(value: &str) -> String {
    utf8_percent_encode(value, VALUE).to_string()
}

fn unescape_value(key: &str, value: &str) -> Result<String, CodecError> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|v| v.into_owned())
        .map_err(|_| CodecError::InvalidUtf8 {
            key: key.to_string(),
        })
}

/// Join ordered key/value pairs into one record.
pub fn encode_fields(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", k, escape_value(v)))
        .collect::<Vec<_>>()
        .join("|")
}

/// Split a record into ordered key/value pairs. Unknown keys are kept.
pub fn decode_fields(body: &str) -> Result<Vec<(String, String)>, CodecError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    body.split('|')
        .enumerate()
        .map(|(i, segment)| {
            let (k, v) = segment
                .split_once('=')
                .ok_or(CodecError::MissingSeparator(i))?;
            if k.is_empty() {
                return Err(CodecError::EmptyKey(i));
            }
            Ok((k.to_string(), unescape_value(k, v)?))
        })
        .collect()
}

/// Direct delivery of a finished turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultPackage {
    pub request_id: String,
    pub user: String,
    pub npc: String,
    pub ok: bool,
    pub chat: String,
    pub actions: String,
    pub quest: String,
    pub callback_token: String,
    pub error: String,
}

/// Pointer to an oversized [`ResultPackage`] parked in the package cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchPackage {
    pub request_id: String,
    pub user: String,
    pub npc: String,
    pub ok: bool,
    pub fetch_token: String,
    pub callback_token: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Package {
    Result(ResultPackage),
    Fetch(FetchPackage),
}

fn flag(ok: bool) -> &'static str {
    if ok {
        "1"
    } else {
        "0"
    }
}

impl ResultPackage {
    pub fn encode(&self) -> String {
        encode_fields(&[
            ("V", WIRE_VERSION),
            ("TYPE", "PKG"),
            ("RID", &self.request_id),
            ("USER", &self.user),
            ("NPC", &self.npc),
            ("OK", flag(self.ok)),
            ("CHAT", &self.chat),
            ("ACT", &self.actions),
            ("Q", &self.quest),
            ("CB", &self.callback_token),
            ("ERR", &self.error),
        ])
    }

    /// Fetch pointer carrying this package's routing fields.
    pub fn to_fetch(&self, fetch_token: &str) -> FetchPackage {
        FetchPackage {
            request_id: self.request_id.clone(),
            user: self.user.clone(),
            npc: self.npc.clone(),
            ok: self.ok,
            fetch_token: fetch_token.to_string(),
            callback_token: self.callback_token.clone(),
            error: self.error.clone(),
        }
    }
}

impl FetchPackage {
    pub fn encode(&self) -> String {
        encode_fields(&[
            ("V", WIRE_VERSION),
            ("TYPE", "FETCH"),
            ("RID", &self.request_id),
            ("USER", &self.user),
            ("NPC", &self.npc),
            ("OK", flag(self.ok)),
            ("TOKEN", &self.fetch_token),
            ("CB", &self.callback_token),
            ("ERR", &self.error),
        ])
    }
}

/// Decoded record with ordered access; the format a client-side decoder sees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireRecord {
    pub fields: Vec<(String, String)>,
}

impl WireRecord {
    pub fn parse(body: &str) -> Result<Self, CodecError> {
        Ok(Self {
            fields: decode_fields(body)?,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, key: &'static str) -> Result<String, CodecError> {
        self.get(key)
            .map(str::to_string)
            .ok_or(CodecError::MissingField(key))
    }

    fn opt(&self, key: &str) -> String {
        self.get(key).unwrap_or_default().to_string()
    }

    pub fn into_package(self) -> Result<Package, CodecError> {
        let ok = self.get("OK") == Some("1");
        match self.get("TYPE") {
            Some("PKG") => Ok(Package::Result(ResultPackage {
                request_id: self.require("RID")?,
                user: self.opt("USER"),
                npc: self.opt("NPC"),
                ok,
                chat: self.opt("CHAT"),
                actions: self.opt("ACT"),
                quest: self.opt("Q"),
                callback_token: self.opt("CB"),
                error: self.opt("ERR"),
            })),
            Some("FETCH") => Ok(Package::Fetch(FetchPackage {
                request_id: self.require("RID")?,
                user: self.opt("USER"),
                npc: self.opt("NPC"),
                ok,
                fetch_token: self.require("TOKEN")?,
                callback_token: self.opt("CB"),
                error: self.opt("ERR"),
            })),
            Some(other) => Err(CodecError::UnknownType(other.to_string())),
            None => Err(CodecError::MissingField("TYPE")),
        }
    }
}

pub fn decode_package(body: &str) -> Result<Package, CodecError> {
    WireRecord::parse(body)?.into_package()
}
