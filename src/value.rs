use std::borrow::Cow;
use std::fmt;

/// One element of a key/value log call.
///
/// A call is a flat `&[KeyVal]` alternating `level, message, key, value,
/// key, value, ...`. Level and keys must be [`KeyVal::Str`]; every other
/// position may hold anything and is rendered with [`KeyVal::stringify`].
#[derive(Debug, Clone, PartialEq)]
pub enum KeyVal {
    Str(String),
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Nil,
    Json(serde_json::Value),
}

impl KeyVal {
    /// Borrow the string if this value is string-typed.
    ///
    /// Only [`KeyVal::Str`] qualifies. A JSON string wrapped in
    /// [`KeyVal::Json`] is a value, not a key.
    pub fn as_key(&self) -> Option<&str> {
        match self {
            KeyVal::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Canonical to-string conversion applied to messages and label values.
    ///
    /// - strings render as-is, JSON strings included (no quotes)
    /// - numbers and bools use their `Display` form
    /// - [`KeyVal::Nil`] renders as `<nil>`
    /// - other JSON renders as compact JSON text
    pub fn stringify(&self) -> Cow<'_, str> {
        match self {
            KeyVal::Str(s) => Cow::Borrowed(s),
            KeyVal::Int(i) => Cow::Owned(i.to_string()),
            KeyVal::Uint(u) => Cow::Owned(u.to_string()),
            KeyVal::Float(f) => Cow::Owned(f.to_string()),
            KeyVal::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
            KeyVal::Nil => Cow::Borrowed("<nil>"),
            KeyVal::Json(serde_json::Value::String(s)) => Cow::Borrowed(s),
            KeyVal::Json(serde_json::Value::Null) => Cow::Borrowed("<nil>"),
            KeyVal::Json(v) => Cow::Owned(v.to_string()),
        }
    }
}

impl fmt::Display for KeyVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stringify())
    }
}

impl From<&str> for KeyVal {
    fn from(v: &str) -> Self {
        KeyVal::Str(v.to_string())
    }
}

impl From<String> for KeyVal {
    fn from(v: String) -> Self {
        KeyVal::Str(v)
    }
}

impl From<&String> for KeyVal {
    fn from(v: &String) -> Self {
        KeyVal::Str(v.clone())
    }
}

impl From<Cow<'_, str>> for KeyVal {
    fn from(v: Cow<'_, str>) -> Self {
        KeyVal::Str(v.into_owned())
    }
}

macro_rules! from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for KeyVal {
            fn from(v: $t) -> Self {
                KeyVal::Int(v as i64)
            }
        })*
    };
}

macro_rules! from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for KeyVal {
            fn from(v: $t) -> Self {
                KeyVal::Uint(v as u64)
            }
        })*
    };
}

from_signed!(i8, i16, i32, i64, isize);
from_unsigned!(u8, u16, u32, u64, usize);

impl From<f32> for KeyVal {
    fn from(v: f32) -> Self {
        KeyVal::Float(v as f64)
    }
}

impl From<f64> for KeyVal {
    fn from(v: f64) -> Self {
        KeyVal::Float(v)
    }
}

impl From<bool> for KeyVal {
    fn from(v: bool) -> Self {
        KeyVal::Bool(v)
    }
}

impl From<()> for KeyVal {
    fn from(_: ()) -> Self {
        KeyVal::Nil
    }
}

impl From<serde_json::Value> for KeyVal {
    fn from(v: serde_json::Value) -> Self {
        KeyVal::Json(v)
    }
}

impl<T: Into<KeyVal>> From<Option<T>> for KeyVal {
    fn from(v: Option<T>) -> Self {
        v.map_or(KeyVal::Nil, Into::into)
    }
}
