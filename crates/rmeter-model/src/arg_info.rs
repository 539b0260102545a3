use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
use serde_json::Value;

use crate::{ModelError, ModelResult};

/// Kind tag of a tensor argument on the wire.
pub const TENSOR_KIND: &str = "TENSOR";

/// Descriptor of one runtime argument of a measured artifact.
///
/// On the wire an argument is a JSON array whose first element is the kind tag:
/// `["TENSOR", "float32", [128, 128]]`.
///
/// Tags other than [`TENSOR_KIND`] decode into [`ArgInfo::Unsupported`] instead of failing,
/// so that the worker rejects them at allocation time with a named error.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgInfo {
    /// Dense tensor to be allocated on the device and filled with random data.
    Tensor { dtype: String, shape: Vec<u64> },
    /// Any other kind. The remaining array elements are kept verbatim.
    Unsupported { kind: String, fields: Vec<Value> },
}

impl ArgInfo {
    /// Convenience constructor for a tensor descriptor.
    pub fn tensor(dtype: impl Into<String>, shape: impl Into<Vec<u64>>) -> Self {
        ArgInfo::Tensor {
            dtype: dtype.into(),
            shape: shape.into(),
        }
    }

    /// Kind tag as it appears on the wire.
    pub fn kind(&self) -> &str {
        match self {
            ArgInfo::Tensor { .. } => TENSOR_KIND,
            ArgInfo::Unsupported { kind, .. } => kind,
        }
    }

    /// Encode into the JSON array form.
    pub fn as_json(&self) -> Value {
        match self {
            ArgInfo::Tensor { dtype, shape } => Value::Array(vec![
                Value::from(TENSOR_KIND),
                Value::from(dtype.as_str()),
                Value::from(shape.clone()),
            ]),
            ArgInfo::Unsupported { kind, fields } => {
                let mut out = Vec::with_capacity(fields.len() + 1);
                out.push(Value::from(kind.as_str()));
                out.extend(fields.iter().cloned());
                Value::Array(out)
            }
        }
    }

    /// Decode from the JSON array form.
    pub fn from_json(value: &Value) -> ModelResult<Self> {
        let items = value
            .as_array()
            .ok_or_else(|| ModelError::InvalidArgInfo(format!("expected array, got {value}")))?;
        let (tag, rest) = items
            .split_first()
            .ok_or_else(|| ModelError::InvalidArgInfo("empty descriptor".into()))?;
        let kind = tag
            .as_str()
            .ok_or_else(|| ModelError::InvalidArgInfo(format!("kind tag is not a string: {tag}")))?;

        if kind != TENSOR_KIND {
            return Ok(ArgInfo::Unsupported {
                kind: kind.to_string(),
                fields: rest.to_vec(),
            });
        }

        let [dtype, shape] = rest else {
            return Err(ModelError::InvalidArgInfo(format!(
                "tensor descriptor needs dtype and shape, got {} field(s)",
                rest.len()
            )));
        };
        let dtype = dtype
            .as_str()
            .ok_or_else(|| ModelError::InvalidArgInfo(format!("tensor dtype is not a string: {dtype}")))?;
        let shape = shape
            .as_array()
            .ok_or_else(|| ModelError::InvalidArgInfo(format!("tensor shape is not an array: {shape}")))?
            .iter()
            .map(|dim| {
                dim.as_u64().ok_or_else(|| {
                    ModelError::InvalidArgInfo(format!("tensor dimension is not a non-negative integer: {dim}"))
                })
            })
            .collect::<ModelResult<Vec<_>>>()?;

        Ok(ArgInfo::tensor(dtype, shape))
    }
}

impl fmt::Display for ArgInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_json())
    }
}

impl Serialize for ArgInfo {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.as_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ArgInfo {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        ArgInfo::from_json(&value).map_err(D::Error::custom)
    }
}
