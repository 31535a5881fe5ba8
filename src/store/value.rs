//! Tagged values held by the config store

use super::StoreError;
use std::fmt;
use std::str::FromStr;

/// Runtime type discriminator of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ConfigType {
    Void = 0,
    Int = 1,
    UInt = 2,
    Long = 3,
    ULong = 4,
    Double = 5,
    Pointer = 6,
    Blob = 7,
    Str = 8,
}

impl ConfigType {
    pub const ALL: [ConfigType; 9] = [
        ConfigType::Void,
        ConfigType::Int,
        ConfigType::UInt,
        ConfigType::Long,
        ConfigType::ULong,
        ConfigType::Double,
        ConfigType::Pointer,
        ConfigType::Blob,
        ConfigType::Str,
    ];

    #[inline(always)]
    pub const fn tag(self) -> u32 {
        self as u32
    }

    pub const fn name(self) -> &'static str {
        match self {
            ConfigType::Void => "void",
            ConfigType::Int => "int",
            ConfigType::UInt => "uint",
            ConfigType::Long => "long",
            ConfigType::ULong => "ulong",
            ConfigType::Double => "double",
            ConfigType::Pointer => "pointer",
            ConfigType::Blob => "blob",
            ConfigType::Str => "string",
        }
    }
}

impl TryFrom<u32> for ConfigType {
    type Error = StoreError;

    fn try_from(tag: u32) -> Result<Self, StoreError> {
        ConfigType::ALL
            .get(tag as usize)
            .copied()
            .ok_or(StoreError::InvalidType(tag))
    }
}

impl FromStr for ConfigType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, StoreError> {
        ConfigType::ALL
            .iter()
            .copied()
            .find(|ty| ty.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| StoreError::UnknownTypeName(s.to_string()))
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value handed to `ConfigStore::set`
///
/// Blob and string variants borrow; the store copies them into a buffer it
/// owns, reusing the entry's previous buffer when it is large enough.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetValue<'a> {
    Void,
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Double(f64),
    Pointer(usize),
    Blob(&'a [u8]),
    Str(&'a str),
}

impl<'a> SetValue<'a> {
    pub fn ty(&self) -> ConfigType {
        match self {
            SetValue::Void => ConfigType::Void,
            SetValue::Int(_) => ConfigType::Int,
            SetValue::UInt(_) => ConfigType::UInt,
            SetValue::Long(_) => ConfigType::Long,
            SetValue::ULong(_) => ConfigType::ULong,
            SetValue::Double(_) => ConfigType::Double,
            SetValue::Pointer(_) => ConfigType::Pointer,
            SetValue::Blob(_) => ConfigType::Blob,
            SetValue::Str(_) => ConfigType::Str,
        }
    }

    /// Build a value of type `ty` from its text form
    ///
    /// Pointers accept decimal or `0x`-prefixed hex. Blobs take the raw
    /// bytes of `text`.
    pub fn parse(ty: ConfigType, text: &'a str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidValue {
            ty,
            text: text.to_string(),
        };
        let trimmed = text.trim();
        let value = match ty {
            ConfigType::Void => SetValue::Void,
            ConfigType::Int => SetValue::Int(trimmed.parse().map_err(|_| invalid())?),
            ConfigType::UInt => SetValue::UInt(trimmed.parse().map_err(|_| invalid())?),
            ConfigType::Long => SetValue::Long(trimmed.parse().map_err(|_| invalid())?),
            ConfigType::ULong => SetValue::ULong(trimmed.parse().map_err(|_| invalid())?),
            ConfigType::Double => SetValue::Double(trimmed.parse().map_err(|_| invalid())?),
            ConfigType::Pointer => {
                let addr = match trimmed
                    .strip_prefix("0x")
                    .or_else(|| trimmed.strip_prefix("0X"))
                {
                    Some(hex) => usize::from_str_radix(hex, 16),
                    None => trimmed.parse(),
                };
                SetValue::Pointer(addr.map_err(|_| invalid())?)
            }
            ConfigType::Blob => SetValue::Blob(text.as_bytes()),
            ConfigType::Str => SetValue::Str(text),
        };
        Ok(value)
    }
}

/// Value owned by a config entry
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ConfigValue {
    #[default]
    Void,
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Double(f64),
    /// Opaque address or token, never dereferenced by the store
    Pointer(usize),
    Blob(Vec<u8>),
    Str(String),
}

impl ConfigValue {
    pub fn ty(&self) -> ConfigType {
        match self {
            ConfigValue::Void => ConfigType::Void,
            ConfigValue::Int(_) => ConfigType::Int,
            ConfigValue::UInt(_) => ConfigType::UInt,
            ConfigValue::Long(_) => ConfigType::Long,
            ConfigValue::ULong(_) => ConfigType::ULong,
            ConfigValue::Double(_) => ConfigType::Double,
            ConfigValue::Pointer(_) => ConfigType::Pointer,
            ConfigValue::Blob(_) => ConfigType::Blob,
            ConfigValue::Str(_) => ConfigType::Str,
        }
    }

    #[inline]
    fn mismatch(&self, expected: ConfigType) -> StoreError {
        StoreError::TypeMismatch {
            expected,
            found: self.ty(),
        }
    }

    pub fn as_int(&self) -> Result<i32, StoreError> {
        match self {
            ConfigValue::Int(v) => Ok(*v),
            _ => Err(self.mismatch(ConfigType::Int)),
        }
    }

    pub fn as_uint(&self) -> Result<u32, StoreError> {
        match self {
            ConfigValue::UInt(v) => Ok(*v),
            _ => Err(self.mismatch(ConfigType::UInt)),
        }
    }

    pub fn as_long(&self) -> Result<i64, StoreError> {
        match self {
            ConfigValue::Long(v) => Ok(*v),
            _ => Err(self.mismatch(ConfigType::Long)),
        }
    }

    pub fn as_ulong(&self) -> Result<u64, StoreError> {
        match self {
            ConfigValue::ULong(v) => Ok(*v),
            _ => Err(self.mismatch(ConfigType::ULong)),
        }
    }

    pub fn as_double(&self) -> Result<f64, StoreError> {
        match self {
            ConfigValue::Double(v) => Ok(*v),
            _ => Err(self.mismatch(ConfigType::Double)),
        }
    }

    pub fn as_pointer(&self) -> Result<usize, StoreError> {
        match self {
            ConfigValue::Pointer(v) => Ok(*v),
            _ => Err(self.mismatch(ConfigType::Pointer)),
        }
    }

    pub fn as_blob(&self) -> Result<&[u8], StoreError> {
        match self {
            ConfigValue::Blob(v) => Ok(v),
            _ => Err(self.mismatch(ConfigType::Blob)),
        }
    }

    pub fn as_str(&self) -> Result<&str, StoreError> {
        match self {
            ConfigValue::Str(v) => Ok(v),
            _ => Err(self.mismatch(ConfigType::Str)),
        }
    }

    /// Capacity of the heap buffer behind a blob or string, zero otherwise
    pub fn buffer_capacity(&self) -> usize {
        match self {
            ConfigValue::Blob(v) => v.capacity(),
            ConfigValue::Str(v) => v.capacity(),
            _ => 0,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Void => f.write_str("(void)"),
            ConfigValue::Int(v) => write!(f, "{}", v),
            ConfigValue::UInt(v) => write!(f, "{}", v),
            ConfigValue::Long(v) => write!(f, "{}", v),
            ConfigValue::ULong(v) => write!(f, "{}", v),
            ConfigValue::Double(v) => write!(f, "{}", v),
            ConfigValue::Pointer(v) => write!(f, "{:#x}", v),
            ConfigValue::Blob(v) => write!(f, "<{} bytes>", v.len()),
            ConfigValue::Str(v) => f.write_str(v),
        }
    }
}
