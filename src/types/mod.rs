//! The SECoP datatype algebra (spec §3, §4.1, §8).
//!
//! `DataType` is a closed enum — the set of SECoP datatypes is fixed by the
//! protocol, so (unlike frappy's open class hierarchy, `frappy/datatypes.py`)
//! there is no trait object here, just a match. Each variant carries the
//! properties spec §3 lists for it.

pub mod status;
pub mod value;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::errors::{Result, SecopError};
pub use value::Value;
use value::{range_error, wrong_type};

/// `f64::MAX`-ish ceiling used to clamp `Float`/`Scaled` overshoot (spec §4.1
/// "Float clamps ±∞ to ±MAX_DOUBLE on import").
const MAX_DOUBLE: f64 = f64::MAX;
const DEFAULT_RELATIVE_RESOLUTION: f64 = 1.2e-7;

#[derive(Debug, Clone, PartialEq)]
pub struct FloatInfo {
    pub min: f64,
    pub max: f64,
    pub unit: String,
    pub fmtstr: String,
    pub absolute_resolution: f64,
    pub relative_resolution: f64,
}

impl Default for FloatInfo {
    fn default() -> Self {
        FloatInfo {
            min: -MAX_DOUBLE,
            max: MAX_DOUBLE,
            unit: String::new(),
            fmtstr: "%g".to_string(),
            absolute_resolution: 0.0,
            relative_resolution: DEFAULT_RELATIVE_RESOLUTION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntInfo {
    pub min: i64,
    pub max: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScaledInfo {
    pub scale: f64,
    pub min: f64,
    pub max: f64,
    pub unit: String,
    pub fmtstr: String,
    pub absolute_resolution: f64,
    pub relative_resolution: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringInfo {
    pub minchars: usize,
    pub maxchars: usize,
    pub is_utf8: bool,
}

impl Default for StringInfo {
    /// An unbounded UTF-8 string — the derived all-zero `Default` would make
    /// `maxchars` 0, rejecting every non-empty string.
    fn default() -> Self {
        StringInfo { minchars: 0, maxchars: usize::MAX, is_utf8: true }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlobInfo {
    pub minbytes: usize,
    pub maxbytes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumInfo {
    /// name -> code, insertion order preserved (spec §3: "ordered mapping").
    pub members: IndexMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayInfo {
    pub member: Box<DataType>,
    pub minlen: usize,
    pub maxlen: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructInfo {
    pub members: IndexMap<String, DataType>,
    pub optional: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandInfo {
    pub argument: Option<Box<DataType>>,
    pub result: Option<Box<DataType>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    Float(FloatInfo),
    Int(IntInfo),
    Scaled(ScaledInfo),
    Bool,
    Enum(EnumInfo),
    String(StringInfo),
    Blob(BlobInfo),
    Array(ArrayInfo),
    Tuple(Vec<DataType>),
    Struct(StructInfo),
    Command(CommandInfo),
    /// Internal-only: wraps `t`, additionally accepting/producing `None`.
    NoneOr(Box<DataType>),
    /// Internal-only: accepts any value valid for one of the listed types.
    OrType(Vec<DataType>),
    /// Internal-only "any type" used for property defaults before the real
    /// type is known (spec §3).
    ValueType,
}

impl DataType {
    pub fn float(min: f64, max: f64) -> Self {
        DataType::Float(FloatInfo { min, max, ..Default::default() })
    }

    pub fn int(min: i64, max: i64) -> Self {
        DataType::Int(IntInfo { min, max })
    }

    pub fn status_type() -> Self {
        DataType::Tuple(vec![
            DataType::Enum(EnumInfo {
                members: [
                    ("IDLE".to_string(), status::IDLE),
                    ("WARN".to_string(), status::WARN),
                    ("BUSY".to_string(), status::BUSY),
                    ("ERROR".to_string(), status::ERROR),
                ]
                .into_iter()
                .collect(),
            }),
            DataType::String(StringInfo { minchars: 0, maxchars: usize::MAX, is_utf8: true }),
        ])
    }

    /// The canonical zero-value within this type's range (spec §3).
    pub fn default_value(&self) -> Value {
        match self {
            DataType::Float(f) => {
                Value::Float(if f.min <= 0.0 && 0.0 <= f.max { 0.0 } else { f.min })
            },
            DataType::Int(i) => Value::Int(if i.min <= 0 && 0 <= i.max { 0 } else { i.min }),
            DataType::Scaled(s) => {
                Value::Float(if s.min <= 0.0 && 0.0 <= s.max { 0.0 } else { s.min })
            },
            DataType::Bool => Value::Bool(false),
            DataType::Enum(e) => {
                Value::Enum(e.members.values().copied().min().unwrap_or(0))
            },
            DataType::String(_) => Value::String(String::new()),
            DataType::Blob(_) => Value::Blob(Vec::new()),
            DataType::Array(_) => Value::Array(Vec::new()),
            DataType::Tuple(members) => {
                Value::Tuple(members.iter().map(DataType::default_value).collect())
            },
            DataType::Struct(s) => Value::Struct(
                s.members
                    .iter()
                    .map(|(k, t)| (k.clone(), t.default_value()))
                    .collect(),
            ),
            DataType::Command(_) => Value::None,
            DataType::NoneOr(_) => Value::None,
            DataType::OrType(members) => {
                members.first().map(DataType::default_value).unwrap_or(Value::None)
            },
            DataType::ValueType => Value::None,
        }
    }

    /// Validate a loose JSON value, producing the internal representation.
    /// Fails with `WrongType` if `v` cannot be converted by shape, with
    /// `RangeError` if it is out of the declared range (spec §4.1).
    pub fn validate(&self, v: &Json) -> Result<Value> {
        match self {
            DataType::Float(info) => validate_float(info, v),
            DataType::Int(info) => validate_int(info, v),
            DataType::Scaled(info) => validate_scaled(info, v),
            DataType::Bool => validate_bool(v),
            DataType::Enum(info) => validate_enum(info, v),
            DataType::String(info) => validate_string(info, v),
            DataType::Blob(info) => validate_blob(info, v),
            DataType::Array(info) => validate_array(info, v),
            DataType::Tuple(members) => validate_tuple(members, v),
            DataType::Struct(info) => validate_struct(info, v),
            DataType::Command(_) => Err(wrong_type("Command is not a value type")),
            DataType::NoneOr(inner) => {
                if v.is_null() {
                    Ok(Value::None)
                } else {
                    inner.validate(v)
                }
            },
            DataType::OrType(members) => {
                let mut last_err = None;
                for m in members {
                    match m.validate(v) {
                        Ok(val) => return Ok(val),
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(last_err.unwrap_or_else(|| wrong_type("no matching OrType member")))
            },
            DataType::ValueType => Ok(json_to_loose_value(v)),
        }
    }

    /// Validate an already-internal `Value` (re-validation, e.g. after a
    /// module's `read_P`/`write_P` returns a value of the right shape).
    pub fn validate_value(&self, v: &Value) -> Result<Value> {
        self.validate(&v.to_json())
    }

    /// `export_value`: internal -> transport JSON. Total for values accepted
    /// by `validate` (spec §4.1 round-trip law).
    pub fn export_value(&self, v: &Value) -> Json {
        match self {
            DataType::Scaled(info) => {
                let f = v.as_f64().unwrap_or(0.0);
                Json::from((f / info.scale).round() as i64)
            },
            DataType::Bool => Json::Bool(v.as_i64().map(|i| i != 0).unwrap_or(false)),
            _ => v.to_json(),
        }
    }

    /// `import_value`: transport JSON -> internal. Opposite of
    /// `export_value`, total on values produced by it.
    pub fn import_value(&self, v: &Json) -> Result<Value> {
        match self {
            DataType::Scaled(info) => {
                let count = v
                    .as_i64()
                    .or_else(|| v.as_f64().map(|f| f.round() as i64))
                    .ok_or_else(|| wrong_type("Scaled wire value must be an integer count"))?;
                Ok(Value::Float(count as f64 * info.scale))
            },
            DataType::Bool => validate_bool(v),
            DataType::Struct(info) => {
                let obj = v.as_object().ok_or_else(|| wrong_type("expected object"))?;
                let mut out = IndexMap::new();
                for (name, member_type) in &info.members {
                    if let Some(jv) = obj.get(name) {
                        out.insert(name.clone(), member_type.import_value(jv)?);
                    }
                }
                Ok(Value::Struct(out))
            },
            DataType::Array(info) => {
                let arr = v.as_array().ok_or_else(|| wrong_type("expected array"))?;
                let mut out = Vec::with_capacity(arr.len());
                for item in arr {
                    out.push(info.member.import_value(item)?);
                }
                Ok(Value::Array(out))
            },
            DataType::Tuple(members) => {
                let arr = v.as_array().ok_or_else(|| wrong_type("expected array"))?;
                if arr.len() != members.len() {
                    return Err(wrong_type("tuple arity mismatch"));
                }
                let mut out = Vec::with_capacity(arr.len());
                for (t, item) in members.iter().zip(arr) {
                    out.push(t.import_value(item)?);
                }
                Ok(Value::Tuple(out))
            },
            DataType::NoneOr(inner) => {
                if v.is_null() { Ok(Value::None) } else { inner.import_value(v) }
            },
            _ => self.validate(v),
        }
    }

    /// Human-readable rendering, never the inverse of `from_string`.
    pub fn format_value(&self, v: &Value, unit: Option<&str>) -> String {
        match self {
            DataType::Float(info) => format_numeric(v.as_f64().unwrap_or(0.0), &info.fmtstr, unit.unwrap_or(&info.unit)),
            DataType::Scaled(info) => format_numeric(v.as_f64().unwrap_or(0.0), &info.fmtstr, unit.unwrap_or(&info.unit)),
            DataType::Int(_) => format!("{}", v.as_i64().unwrap_or(0)),
            DataType::Bool => (if v.as_i64().unwrap_or(0) != 0 { "True" } else { "False" }).to_string(),
            DataType::Enum(info) => {
                let code = v.as_i64().unwrap_or(0);
                let name = info.members.iter().find(|(_, c)| **c == code).map(|(n, _)| n.as_str());
                match name {
                    Some(n) => format!("{n}<{code}>"),
                    None => format!("unknown<{code}>"),
                }
            },
            DataType::String(_) => v.as_str().unwrap_or("").to_string(),
            DataType::Blob(_) => match v {
                Value::Blob(b) => value::base64_lite::encode(b),
                _ => String::new(),
            },
            DataType::Array(info) => match v {
                Value::Array(items) => format!(
                    "[{}]",
                    items.iter().map(|i| info.member.format_value(i, None)).collect::<Vec<_>>().join(", ")
                ),
                _ => "[]".to_string(),
            },
            DataType::Tuple(members) => match v {
                Value::Tuple(items) => format!(
                    "({})",
                    members.iter().zip(items).map(|(t, i)| t.format_value(i, None)).collect::<Vec<_>>().join(", ")
                ),
                _ => "()".to_string(),
            },
            DataType::Struct(info) => match v {
                Value::Struct(members) => {
                    let parts: Vec<String> = members
                        .iter()
                        .map(|(k, val)| {
                            let t = info.members.get(k);
                            let rendered = t.map(|t| t.format_value(val, None)).unwrap_or_default();
                            format!("{k}={rendered}")
                        })
                        .collect();
                    format!("{{{}}}", parts.join(", "))
                },
                _ => "{}".to_string(),
            },
            DataType::NoneOr(inner) => match v {
                Value::None => "None".to_string(),
                other => inner.format_value(other, unit),
            },
            DataType::OrType(members) => {
                members.first().map(|t| t.format_value(v, unit)).unwrap_or_default()
            },
            DataType::Command(_) | DataType::ValueType => format!("{v:?}"),
        }
    }

    /// Parse the textual representation used in configuration files (spec §6).
    pub fn from_string(&self, s: &str) -> Result<Value> {
        let s = s.trim();
        match self {
            DataType::Float(_) | DataType::Scaled(_) => {
                let f: f64 = s.parse().map_err(|_| wrong_type(format!("not a float: {s}")))?;
                self.validate(&Json::from(f))
            },
            DataType::Int(_) => {
                let i: i64 = s.parse().map_err(|_| wrong_type(format!("not an int: {s}")))?;
                self.validate(&Json::from(i))
            },
            DataType::Bool => {
                self.validate(&Json::String(s.to_string()))
            },
            DataType::Enum(_) => self.validate(&Json::String(s.to_string())),
            DataType::String(_) => self.validate(&Json::String(s.to_string())),
            DataType::Blob(_) => self.validate(&Json::String(s.to_string())),
            DataType::Array(info) => {
                let inner = bracketed(s, '[', ']')?;
                let items = split_top_level(inner, ',');
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if item.trim().is_empty() {
                        continue;
                    }
                    out.push(info.member.from_string(item.trim())?.to_json());
                }
                self.validate(&Json::Array(out))
            },
            DataType::Tuple(members) => {
                let inner = bracketed(s, '(', ')')?;
                let items = split_top_level(inner, ',');
                if items.len() != members.len() {
                    return Err(wrong_type("tuple arity mismatch in from_string"));
                }
                let mut out = Vec::with_capacity(items.len());
                for (t, item) in members.iter().zip(items) {
                    out.push(t.from_string(item.trim())?.to_json());
                }
                self.validate(&Json::Array(out))
            },
            DataType::Struct(info) => {
                let inner = bracketed(s, '{', '}')?;
                let mut obj = serde_json::Map::new();
                for kv in split_top_level(inner, ',') {
                    let kv = kv.trim();
                    if kv.is_empty() {
                        continue;
                    }
                    let (k, v) = kv
                        .split_once('=')
                        .ok_or_else(|| wrong_type("expected key=value in struct literal"))?;
                    let k = k.trim();
                    let member_type = info
                        .members
                        .get(k)
                        .ok_or_else(|| wrong_type(format!("unknown struct member {k}")))?;
                    obj.insert(k.to_string(), member_type.from_string(v.trim())?.to_json());
                }
                self.validate(&Json::Object(obj))
            },
            DataType::NoneOr(inner) => {
                if s.eq_ignore_ascii_case("none") || s.eq_ignore_ascii_case("null") {
                    Ok(Value::None)
                } else {
                    inner.from_string(s)
                }
            },
            DataType::OrType(members) => {
                let mut last_err = None;
                for m in members {
                    match m.from_string(s) {
                        Ok(v) => return Ok(v),
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(last_err.unwrap_or_else(|| wrong_type("no matching OrType member")))
            },
            DataType::Command(_) | DataType::ValueType => Err(wrong_type("datatype has no textual form")),
        }
    }

    /// Succeeds iff every value `self` accepts is accepted by `other` (spec §4.1).
    pub fn compatible(&self, other: &DataType) -> Result<()> {
        match (self, other) {
            (DataType::Int(a), DataType::Int(_) | DataType::Float(_) | DataType::Scaled(_)) => {
                other.validate(&Json::from(a.min))?;
                other.validate(&Json::from(a.max))?;
                Ok(())
            },
            (DataType::Int(a), DataType::Enum(_) | DataType::Bool) => {
                for i in a.min..=a.max {
                    other.validate(&Json::from(i))?;
                }
                Ok(())
            },
            (DataType::Float(a), DataType::Float(_) | DataType::Scaled(_)) => {
                other.validate(&Json::from(a.min))?;
                other.validate(&Json::from(a.max))?;
                Ok(())
            },
            (DataType::Scaled(a), DataType::Float(_) | DataType::Scaled(_)) => {
                other.validate(&Json::from(a.min))?;
                other.validate(&Json::from(a.max))?;
                Ok(())
            },
            (DataType::Bool, DataType::Bool) => Ok(()),
            (DataType::Bool, DataType::Int(_) | DataType::Enum(_)) => {
                other.validate(&Json::from(0))?;
                other.validate(&Json::from(1))?;
                Ok(())
            },
            (DataType::String(a), DataType::String(b)) => {
                if b.minchars <= a.minchars && b.maxchars >= a.maxchars && (b.is_utf8 || !a.is_utf8) {
                    Ok(())
                } else {
                    Err(SecopError::BadValue("incompatible String bounds".into()))
                }
            },
            (DataType::Blob(a), DataType::Blob(b)) => {
                if b.minbytes <= a.minbytes && b.maxbytes >= a.maxbytes {
                    Ok(())
                } else {
                    Err(SecopError::BadValue("incompatible Blob bounds".into()))
                }
            },
            (DataType::Enum(a), DataType::Enum(_)) => {
                for (name, code) in &a.members {
                    other
                        .validate(&Json::from(*code))
                        .or_else(|_| other.validate(&Json::String(name.clone())))?;
                }
                Ok(())
            },
            (DataType::Array(a), DataType::Array(b)) => {
                if b.minlen <= a.minlen && b.maxlen >= a.maxlen {
                    a.member.compatible(&b.member)
                } else {
                    Err(SecopError::BadValue("incompatible Array length bounds".into()))
                }
            },
            (DataType::Tuple(a), DataType::Tuple(b)) => {
                if a.len() != b.len() {
                    return Err(SecopError::BadValue("incompatible Tuple arity".into()));
                }
                for (x, y) in a.iter().zip(b) {
                    x.compatible(y)?;
                }
                Ok(())
            },
            (DataType::Struct(a), DataType::Struct(b)) => {
                for (name, bt) in &b.members {
                    if !b.optional.iter().any(|o| o == name) && !a.members.contains_key(name) {
                        return Err(SecopError::BadValue(format!(
                            "mandatory member {name} missing"
                        )));
                    }
                    if let Some(at) = a.members.get(name) {
                        at.compatible(bt)?;
                    }
                }
                Ok(())
            },
            (a, b) if a == b => Ok(()),
            _ => Err(SecopError::BadValue(format!("{self:?} not compatible with {other:?}"))),
        }
    }

    /// Substitutes `$` in unit-bearing properties with the node's main unit
    /// (spec §4.1, applied once before `startModule`).
    pub fn set_main_unit(&mut self, unit: &str) {
        match self {
            DataType::Float(info) => info.unit = info.unit.replace('$', unit),
            DataType::Scaled(info) => info.unit = info.unit.replace('$', unit),
            DataType::Array(info) => info.member.set_main_unit(unit),
            DataType::Tuple(members) => members.iter_mut().for_each(|m| m.set_main_unit(unit)),
            DataType::Struct(info) => info.members.values_mut().for_each(|m| m.set_main_unit(unit)),
            DataType::NoneOr(inner) => inner.set_main_unit(unit),
            DataType::OrType(members) => members.iter_mut().for_each(|m| m.set_main_unit(unit)),
            _ => {},
        }
    }

    /// The `datainfo` wire encoding used in descriptive data (spec §6).
    pub fn export_datatype(&self) -> Json {
        match self {
            DataType::Float(info) => {
                serde_json::json!({
                    "type": "double", "min": info.min, "max": info.max,
                    "unit": info.unit, "fmtstr": info.fmtstr,
                    "absolute_resolution": info.absolute_resolution,
                    "relative_resolution": info.relative_resolution,
                })
            },
            DataType::Int(info) => serde_json::json!({"type": "int", "min": info.min, "max": info.max}),
            DataType::Scaled(info) => serde_json::json!({
                "type": "scaled", "scale": info.scale,
                "min": (info.min / info.scale).round() as i64,
                "max": (info.max / info.scale).round() as i64,
                "unit": info.unit, "fmtstr": info.fmtstr,
            }),
            DataType::Bool => serde_json::json!({"type": "bool"}),
            DataType::Enum(info) => {
                let mut members = serde_json::Map::new();
                for (name, code) in &info.members {
                    members.insert(name.clone(), Json::from(*code));
                }
                serde_json::json!({"type": "enum", "members": members})
            },
            DataType::String(info) => serde_json::json!({
                "type": "string", "minchars": info.minchars, "maxchars": info.maxchars,
                "isUTF8": info.is_utf8,
            }),
            DataType::Blob(info) => {
                serde_json::json!({"type": "blob", "minbytes": info.minbytes, "maxbytes": info.maxbytes})
            },
            DataType::Array(info) => serde_json::json!({
                "type": "array", "minlen": info.minlen, "maxlen": info.maxlen,
                "members": info.member.export_datatype(),
            }),
            DataType::Tuple(members) => serde_json::json!({
                "type": "tuple",
                "members": members.iter().map(DataType::export_datatype).collect::<Vec<_>>(),
            }),
            DataType::Struct(info) => {
                let mut members = serde_json::Map::new();
                for (name, t) in &info.members {
                    members.insert(name.clone(), t.export_datatype());
                }
                serde_json::json!({"type": "struct", "members": members, "optional": info.optional})
            },
            DataType::Command(info) => serde_json::json!({
                "type": "command",
                "argument": info.argument.as_ref().map(|t| t.export_datatype()),
                "result": info.result.as_ref().map(|t| t.export_datatype()),
            }),
            DataType::NoneOr(inner) => inner.export_datatype(),
            DataType::OrType(members) => members.first().map(DataType::export_datatype).unwrap_or(Json::Null),
            DataType::ValueType => Json::Null,
        }
    }
}

fn json_to_loose_value(v: &Json) -> Value {
    match v {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        },
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::Array(items.iter().map(json_to_loose_value).collect()),
        Json::Object(obj) => Value::Struct(
            obj.iter().map(|(k, v)| (k.clone(), json_to_loose_value(v))).collect(),
        ),
    }
}

fn clamp(min: f64, value: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

fn coerce_number(v: &Json) -> Result<f64> {
    v.as_f64().ok_or_else(|| wrong_type(format!("can not convert {v} to a number")))
}

fn validate_float(info: &FloatInfo, v: &Json) -> Result<Value> {
    let mut value = coerce_number(v)?;
    value = clamp(-MAX_DOUBLE, value, MAX_DOUBLE);
    let prec = (value.abs() * info.relative_resolution).max(info.absolute_resolution);
    if info.min - prec <= value && value <= info.max + prec {
        Ok(Value::Float(clamp(info.min, value, info.max)))
    } else {
        Err(range_error(format!(
            "{value:.14} must be between {} and {}",
            info.min, info.max
        )))
    }
}

fn validate_int(info: &IntInfo, v: &Json) -> Result<Value> {
    let (as_int, as_float) = match v {
        Json::Number(n) => (n.as_i64(), n.as_f64()),
        Json::Bool(b) => (Some(*b as i64), Some(*b as i64 as f64)),
        _ => return Err(wrong_type(format!("can not convert {v} to an int"))),
    };
    let i = match (as_int, as_float) {
        (Some(i), _) => i,
        (None, Some(f)) if f.fract() == 0.0 => f as i64,
        _ => return Err(wrong_type(format!("{v} should be an int"))),
    };
    if info.min <= i && i <= info.max {
        Ok(Value::Int(i))
    } else {
        Err(range_error(format!("{i} must be between {} and {}", info.min, info.max)))
    }
}

fn validate_scaled(info: &ScaledInfo, v: &Json) -> Result<Value> {
    let value = coerce_number(v)?;
    let prec = (value.abs() * info.relative_resolution).max(info.absolute_resolution);
    if info.min - prec <= value && value <= info.max + prec {
        let rounded = (clamp(info.min, value, info.max) / info.scale).round() * info.scale;
        Ok(Value::Float(rounded))
    } else {
        Err(range_error(format!("{value} must be between {} and {}", info.min, info.max)))
    }
}

fn validate_bool(v: &Json) -> Result<Value> {
    match v {
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => match n.as_i64() {
            Some(0) => Ok(Value::Bool(false)),
            Some(1) => Ok(Value::Bool(true)),
            _ => Err(wrong_type(format!("{v} is not a valid bool"))),
        },
        Json::String(s) => match s.to_ascii_lowercase().as_str() {
            "0" | "false" | "off" | "no" => Ok(Value::Bool(false)),
            "1" | "true" | "on" | "yes" => Ok(Value::Bool(true)),
            _ => Err(wrong_type(format!("{s} is not a valid bool"))),
        },
        _ => Err(wrong_type(format!("{v} is not a valid bool"))),
    }
}

fn validate_enum(info: &EnumInfo, v: &Json) -> Result<Value> {
    match v {
        Json::String(s) => info
            .members
            .get(s.as_str())
            .map(|c| Value::Enum(*c))
            .ok_or_else(|| range_error(format!("{s} is not a member of this enum"))),
        Json::Number(n) => {
            let code = n.as_i64().ok_or_else(|| wrong_type("enum code must be an integer"))?;
            if info.members.values().any(|c| *c == code) {
                Ok(Value::Enum(code))
            } else {
                Err(range_error(format!("{code} is not a member of this enum")))
            }
        },
        _ => Err(wrong_type(format!("{v} is not a valid enum value"))),
    }
}

fn validate_string(info: &StringInfo, v: &Json) -> Result<Value> {
    let s = v.as_str().ok_or_else(|| wrong_type(format!("{v} is not a string")))?;
    if s.contains('\0') {
        return Err(wrong_type("string must not contain NUL"));
    }
    if info.is_utf8 && s.chars().any(|c| (c as u32) > 0x10FFFF) {
        return Err(wrong_type("string is not valid UTF-8 text"));
    }
    let len = s.chars().count();
    if len < info.minchars || len > info.maxchars {
        return Err(range_error(format!(
            "string length {len} must be between {} and {}",
            info.minchars, info.maxchars
        )));
    }
    Ok(Value::String(s.to_string()))
}

fn validate_blob(info: &BlobInfo, v: &Json) -> Result<Value> {
    let bytes = match v {
        Json::String(s) => value::base64_lite::decode(s)?,
        Json::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let n = item.as_u64().ok_or_else(|| wrong_type("blob array must be bytes"))?;
                out.push(n as u8);
            }
            out
        },
        _ => return Err(wrong_type(format!("{v} is not a blob"))),
    };
    if bytes.len() < info.minbytes || bytes.len() > info.maxbytes {
        return Err(range_error(format!(
            "blob length {} must be between {} and {}",
            bytes.len(),
            info.minbytes,
            info.maxbytes
        )));
    }
    Ok(Value::Blob(bytes))
}

fn validate_array(info: &ArrayInfo, v: &Json) -> Result<Value> {
    let arr = v.as_array().ok_or_else(|| wrong_type(format!("{v} is not an array")))?;
    if arr.len() < info.minlen || arr.len() > info.maxlen {
        return Err(range_error(format!(
            "array length {} must be between {} and {}",
            arr.len(),
            info.minlen,
            info.maxlen
        )));
    }
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        out.push(info.member.validate(item)?);
    }
    Ok(Value::Array(out))
}

fn validate_tuple(members: &[DataType], v: &Json) -> Result<Value> {
    let arr = v.as_array().ok_or_else(|| wrong_type(format!("{v} is not a tuple")))?;
    if arr.len() != members.len() {
        return Err(wrong_type(format!(
            "tuple needs exactly {} members, got {}",
            members.len(),
            arr.len()
        )));
    }
    let mut out = Vec::with_capacity(arr.len());
    for (t, item) in members.iter().zip(arr) {
        out.push(t.validate(item)?);
    }
    Ok(Value::Tuple(out))
}

fn validate_struct(info: &StructInfo, v: &Json) -> Result<Value> {
    let obj = v.as_object().ok_or_else(|| wrong_type(format!("{v} is not a struct")))?;
    for key in obj.keys() {
        if !info.members.contains_key(key) {
            return Err(wrong_type(format!("superfluous struct member {key}")));
        }
    }
    let mut out = IndexMap::new();
    for (name, member_type) in &info.members {
        match obj.get(name) {
            Some(jv) => {
                out.insert(name.clone(), member_type.validate(jv)?);
            },
            None => {
                if !info.optional.iter().any(|o| o == name) {
                    return Err(wrong_type(format!("missing mandatory struct member {name}")));
                }
            },
        }
    }
    Ok(Value::Struct(out))
}

fn format_numeric(value: f64, fmtstr: &str, unit: &str) -> String {
    let rendered = printf_style_float(fmtstr, value);
    if unit.is_empty() { rendered } else { format!("{rendered} {unit}") }
}

/// A minimal `%g`/`%f`/`%e`-style formatter — frappy's `fmtstr` property is a
/// printf format string; we only need to support the numeric conversions
/// SECoP datatypes actually carry.
fn printf_style_float(fmtstr: &str, value: f64) -> String {
    if let Some(prec) = fmtstr.strip_prefix("%.").and_then(|s| s.strip_suffix('f')) {
        if let Ok(p) = prec.parse::<usize>() {
            return format!("{value:.p$}");
        }
    }
    match fmtstr {
        "%g" => format!("{value}"),
        "%f" => format!("{value:.6}"),
        "%e" => format!("{value:e}"),
        _ => format!("{value}"),
    }
}

fn bracketed(s: &str, open: char, close: char) -> Result<&str> {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix(open) {
        rest.strip_suffix(close)
            .ok_or_else(|| wrong_type(format!("expected matching {close}")))
    } else {
        Ok(s)
    }
}

fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            },
            _ => {},
        }
    }
    let tail = &s[start..];
    if !tail.trim().is_empty() || !parts.is_empty() {
        parts.push(tail);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_range_scenario() {
        let t = DataType::int(-3, 3);
        assert_eq!(t.validate(&Json::from(0)).unwrap(), Value::Int(0));
        assert_eq!(t.validate(&Json::from(3)).unwrap(), Value::Int(3));
        assert!(matches!(t.validate(&Json::from(4)), Err(SecopError::RangeError(_))));
        assert!(matches!(t.validate(&Json::String("2".into())), Err(SecopError::WrongType(_))));
        assert!(matches!(t.validate(&Json::from(1.5)), Err(SecopError::WrongType(_))));
    }

    #[test]
    fn scaled_round_trip_scenario() {
        let t = DataType::Scaled(ScaledInfo {
            scale: 0.1,
            min: 0.0,
            max: 10.0,
            unit: String::new(),
            fmtstr: "%g".into(),
            absolute_resolution: 0.1,
            relative_resolution: DEFAULT_RELATIVE_RESOLUTION,
        });
        let v = t.validate(&Json::from(0.7)).unwrap();
        assert!((v.as_f64().unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(t.export_value(&v), Json::from(7));
        let back = t.import_value(&Json::from(7)).unwrap();
        assert!((back.as_f64().unwrap() - 0.7).abs() < 1e-9);
        let clamped = t.validate(&Json::from(10.001)).unwrap();
        assert!((clamped.as_f64().unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn enum_scenario() {
        let t = DataType::Enum(EnumInfo {
            members: [("IDLE".to_string(), 100), ("BUSY".to_string(), 300)].into_iter().collect(),
        });
        assert_eq!(t.validate(&Json::String("IDLE".into())).unwrap(), Value::Enum(100));
        assert_eq!(t.validate(&Json::from(300)).unwrap(), Value::Enum(300));
        assert_eq!(t.format_value(&Value::Enum(300), None), "BUSY<300>");
        assert!(matches!(t.validate(&Json::String("x".into())), Err(SecopError::RangeError(_))));
    }

    #[test]
    fn struct_with_optional_scenario() {
        let t = DataType::Struct(StructInfo {
            members: [
                ("a".to_string(), DataType::int(0, 10)),
                ("b".to_string(), DataType::Bool),
            ]
            .into_iter()
            .collect(),
            optional: vec!["b".to_string()],
        });
        let ok1 = t.validate(&serde_json::json!({"a": 3})).unwrap();
        assert_eq!(ok1, Value::Struct([("a".to_string(), Value::Int(3))].into_iter().collect()));
        let ok2 = t.validate(&serde_json::json!({"a": 3, "b": true})).unwrap();
        assert_eq!(
            ok2,
            Value::Struct(
                [("a".to_string(), Value::Int(3)), ("b".to_string(), Value::Bool(true))]
                    .into_iter()
                    .collect()
            )
        );
        assert!(matches!(
            t.validate(&serde_json::json!({"a": 3, "c": 1})),
            Err(SecopError::WrongType(_))
        ));
    }

    #[test]
    fn round_trip_law_holds_for_float() {
        let t = DataType::float(-10.0, 10.0);
        for raw in [0.0, -10.0, 10.0, 3.25] {
            let v = t.validate(&Json::from(raw)).unwrap();
            let wire = t.export_value(&v);
            let back = t.import_value(&wire).unwrap();
            let revalidated = t.validate_value(&back).unwrap();
            assert_eq!(revalidated, v);
        }
    }

    #[test]
    fn compatibility_reflexivity() {
        let types = vec![
            DataType::int(-3, 3),
            DataType::float(-1.0, 1.0),
            DataType::Bool,
            DataType::String(StringInfo { minchars: 0, maxchars: 10, is_utf8: true }),
        ];
        for t in types {
            t.compatible(&t).expect("reflexive compatibility must hold");
        }
    }

    #[test]
    fn compatibility_direction() {
        let narrow = DataType::int(-2, 2);
        let wide = DataType::int(-10, 10);
        narrow.compatible(&wide).expect("narrow should be compatible with wide");
        assert!(wide.compatible(&narrow).is_err());
    }

    #[test]
    fn bool_accepts_secop_literal_set() {
        for (lit, expected) in [
            (Json::from(0), false),
            (Json::from(1), true),
            (Json::Bool(true), true),
            (Json::String("on".into()), true),
            (Json::String("OFF".into()), false),
            (Json::String("yes".into()), true),
            (Json::String("No".into()), false),
        ] {
            let v = DataType::Bool.validate(&lit).unwrap();
            assert_eq!(v, Value::Bool(expected));
        }
        assert_eq!(DataType::Bool.export_value(&Value::Bool(true)), Json::from(1));
    }

    #[test]
    fn array_from_string_roundtrip() {
        let t = DataType::Array(ArrayInfo {
            member: Box::new(DataType::int(0, 100)),
            minlen: 0,
            maxlen: 10,
        });
        let v = t.from_string("[1, 2, 3]").unwrap();
        assert_eq!(v, Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
    }
}
