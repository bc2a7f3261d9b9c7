//! Pipeline configuration document and task descriptors.
//!
//! The document lists the tasks to build. Each task carries a typed
//! parameter bag whose entries are `name: [value, declaredType]` pairs:
//!
//! ```json
//! {
//!   "configIds": ["FD", "FFDefault"],
//!   "tasks": [
//!     {
//!       "id": "FD",
//!       "kind": "FaceDetection",
//!       "precedence": 0,
//!       "version": 1,
//!       "modelReference": "models/face_detector.onnx",
//!       "parameters": {
//!         "NNConfidenceThreshold": [0.6, "float"],
//!         "NNImageMean": ["[104.0, 177.0, 123.0]", "vector<float>"]
//!       }
//!     }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed pipeline document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task {task}: parameter {name} has unknown declared type {declared:?}")]
    UnknownParamType {
        task: String,
        name: String,
        declared: String,
    },

    #[error("task {task}: parameter {name} is not a valid {declared}")]
    ParamValue {
        task: String,
        name: String,
        declared: ParamType,
    },

    #[error("invalid vector literal {literal:?}")]
    VectorLiteral { literal: String },

    #[error("parameter {name}: expected {expected}, found {found}")]
    ParamType {
        name: String,
        expected: &'static str,
        found: ParamType,
    },

    #[error("duplicate task id {0:?}")]
    DuplicateTaskId(String),
}

/// Declared type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    Int,
    Float,
    Double,
    String,
    FloatVec,
    DoubleVec,
}

impl ParamType {
    /// Parse a declared type name. A `std::` prefix and whitespace are
    /// ignored.
    pub fn parse(declared: &str) -> Option<Self> {
        let compact: String = declared.chars().filter(|c| !c.is_whitespace()).collect();
        let name = compact.strip_prefix("std::").unwrap_or(&compact);
        match name {
            "int" => Some(ParamType::Int),
            "float" => Some(ParamType::Float),
            "double" => Some(ParamType::Double),
            "string" => Some(ParamType::String),
            "vector<float>" => Some(ParamType::FloatVec),
            "vector<double>" => Some(ParamType::DoubleVec),
            _ => None,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Double => "double",
            ParamType::String => "string",
            ParamType::FloatVec => "vector<float>",
            ParamType::DoubleVec => "vector<double>",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Int(i64),
    Float(f32),
    Double(f64),
    String(String),
    FloatVec(Vec<f32>),
    DoubleVec(Vec<f64>),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Int(_) => ParamType::Int,
            ParamValue::Float(_) => ParamType::Float,
            ParamValue::Double(_) => ParamType::Double,
            ParamValue::String(_) => ParamType::String,
            ParamValue::FloatVec(_) => ParamType::FloatVec,
            ParamValue::DoubleVec(_) => ParamType::DoubleVec,
        }
    }

    /// Convert a raw JSON value according to its declared type
    fn from_json(value: &serde_json::Value, declared: ParamType) -> Option<Self> {
        match declared {
            ParamType::Int => value.as_i64().map(ParamValue::Int),
            ParamType::Float => value.as_f64().map(|v| ParamValue::Float(v as f32)),
            ParamType::Double => value.as_f64().map(ParamValue::Double),
            ParamType::String => value.as_str().map(|s| ParamValue::String(s.to_string())),
            ParamType::FloatVec => json_vector(value)
                .map(|v| ParamValue::FloatVec(v.into_iter().map(|x| x as f32).collect())),
            ParamType::DoubleVec => json_vector(value).map(ParamValue::DoubleVec),
        }
    }
}

fn json_vector(value: &serde_json::Value) -> Option<Vec<f64>> {
    match value {
        serde_json::Value::String(literal) => parse_vector(literal).ok(),
        serde_json::Value::Array(items) => items.iter().map(|v| v.as_f64()).collect(),
        _ => None,
    }
}

/// Parse a bracketed, comma-separated numeric literal such as
/// `"[104.0, 177.0, 123.0]"`.
pub fn parse_vector(literal: &str) -> Result<Vec<f64>, ConfigError> {
    let invalid = || ConfigError::VectorLiteral {
        literal: literal.to_string(),
    };
    let inner = literal
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(invalid)?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|token| token.trim().parse::<f64>().map_err(|_| invalid()))
        .collect()
}

/// Typed parameter lookup with "absent means keep the default" semantics.
///
/// Absent keys return `Ok(None)`. Present keys of a compatible type are
/// converted (ints widen to floats, float and double interchange, vector
/// precisions interchange). Anything else is a [`ConfigError::ParamType`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamBag {
    values: BTreeMap<String, ParamValue>,
}

impl ParamBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    fn mismatch(name: &str, expected: &'static str, found: &ParamValue) -> ConfigError {
        ConfigError::ParamType {
            name: name.to_string(),
            expected,
            found: found.param_type(),
        }
    }

    pub fn get_i64(&self, name: &str) -> Result<Option<i64>, ConfigError> {
        match self.get(name) {
            None => Ok(None),
            Some(ParamValue::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(Self::mismatch(name, "int", other)),
        }
    }

    /// Non-negative integer that fits in `u32`
    pub fn get_u32(&self, name: &str) -> Result<Option<u32>, ConfigError> {
        match self.get(name) {
            None => Ok(None),
            Some(value @ ParamValue::Int(v)) => u32::try_from(*v)
                .map(Some)
                .map_err(|_| Self::mismatch(name, "non-negative int", value)),
            Some(other) => Err(Self::mismatch(name, "int", other)),
        }
    }

    pub fn get_usize(&self, name: &str) -> Result<Option<usize>, ConfigError> {
        Ok(self.get_u32(name)?.map(|v| v as usize))
    }

    pub fn get_f64(&self, name: &str) -> Result<Option<f64>, ConfigError> {
        match self.get(name) {
            None => Ok(None),
            Some(ParamValue::Int(v)) => Ok(Some(*v as f64)),
            Some(ParamValue::Float(v)) => Ok(Some(*v as f64)),
            Some(ParamValue::Double(v)) => Ok(Some(*v)),
            Some(other) => Err(Self::mismatch(name, "number", other)),
        }
    }

    pub fn get_f32(&self, name: &str) -> Result<Option<f32>, ConfigError> {
        Ok(self.get_f64(name)?.map(|v| v as f32))
    }

    /// Ints are true when non-zero; strings accept "true"/"false"
    pub fn get_bool(&self, name: &str) -> Result<Option<bool>, ConfigError> {
        match self.get(name) {
            None => Ok(None),
            Some(ParamValue::Int(v)) => Ok(Some(*v != 0)),
            Some(value @ ParamValue::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(Self::mismatch(name, "bool", value)),
            },
            Some(other) => Err(Self::mismatch(name, "bool", other)),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<Option<String>, ConfigError> {
        match self.get(name) {
            None => Ok(None),
            Some(ParamValue::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(Self::mismatch(name, "string", other)),
        }
    }

    pub fn get_f32_vec(&self, name: &str) -> Result<Option<Vec<f32>>, ConfigError> {
        match self.get(name) {
            None => Ok(None),
            Some(ParamValue::FloatVec(v)) => Ok(Some(v.clone())),
            Some(ParamValue::DoubleVec(v)) => Ok(Some(v.iter().map(|&x| x as f32).collect())),
            Some(other) => Err(Self::mismatch(name, "vector", other)),
        }
    }

    /// Overwrite `target` only when the parameter is present
    pub fn apply_f32(&self, name: &str, target: &mut f32) -> Result<(), ConfigError> {
        if let Some(v) = self.get_f32(name)? {
            *target = v;
        }
        Ok(())
    }

    pub fn apply_u32(&self, name: &str, target: &mut u32) -> Result<(), ConfigError> {
        if let Some(v) = self.get_u32(name)? {
            *target = v;
        }
        Ok(())
    }

    pub fn apply_usize(&self, name: &str, target: &mut usize) -> Result<(), ConfigError> {
        if let Some(v) = self.get_usize(name)? {
            *target = v;
        }
        Ok(())
    }

    pub fn apply_bool(&self, name: &str, target: &mut bool) -> Result<(), ConfigError> {
        if let Some(v) = self.get_bool(name)? {
            *target = v;
        }
        Ok(())
    }

    pub fn apply_string(&self, name: &str, target: &mut String) -> Result<(), ConfigError> {
        if let Some(v) = self.get_string(name)? {
            *target = v;
        }
        Ok(())
    }
}

/// One task entry, immutable after loading
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDescriptor {
    /// Unique task identifier
    pub id: String,

    /// Task kind tag (e.g. "FaceDetection", "Smile")
    pub kind: String,

    /// Lower runs first; ties keep declaration order
    pub precedence: i32,

    /// Informational only
    pub version: i32,

    /// Model artifact path
    pub model_reference: String,

    /// Auxiliary data path (e.g. normalisation CSV); `None` when blank
    pub config_reference: Option<String>,

    pub parameters: ParamBag,
}

impl TaskDescriptor {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, precedence: i32) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            precedence,
            version: 1,
            model_reference: String::new(),
            config_reference: None,
            parameters: ParamBag::new(),
        }
    }

    pub fn with_model(mut self, model_reference: impl Into<String>) -> Self {
        self.model_reference = model_reference.into();
        self
    }

    pub fn with_config(mut self, config_reference: impl Into<String>) -> Self {
        self.config_reference = Some(config_reference.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.parameters.insert(name, value);
        self
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(rename = "configIds", alias = "vMLConfigIDs", default)]
    config_ids: Vec<String>,
    #[serde(alias = "vMLModules", default)]
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    id: String,
    #[serde(alias = "task")]
    kind: String,
    precedence: i32,
    #[serde(default)]
    version: i32,
    #[serde(alias = "modelName", default)]
    model_reference: String,
    #[serde(alias = "cfg", default)]
    config_reference: Option<String>,
    #[serde(alias = "vParams", default)]
    parameters: BTreeMap<String, (serde_json::Value, String)>,
}

impl RawTask {
    fn resolve(self) -> Result<TaskDescriptor, ConfigError> {
        let mut parameters = ParamBag::new();
        for (name, (raw, declared)) in self.parameters {
            let ty = ParamType::parse(&declared).ok_or_else(|| ConfigError::UnknownParamType {
                task: self.id.clone(),
                name: name.clone(),
                declared: declared.clone(),
            })?;
            let value = ParamValue::from_json(&raw, ty).ok_or_else(|| ConfigError::ParamValue {
                task: self.id.clone(),
                name: name.clone(),
                declared: ty,
            })?;
            parameters.insert(name, value);
        }

        Ok(TaskDescriptor {
            id: self.id,
            kind: self.kind,
            precedence: self.precedence,
            version: self.version,
            model_reference: self.model_reference,
            config_reference: self.config_reference.filter(|c| !c.trim().is_empty()),
            parameters,
        })
    }
}

/// Parsed pipeline document
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDocument {
    pub config_ids: Vec<String>,
    pub tasks: Vec<TaskDescriptor>,
}

impl PipelineDocument {
    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        let raw: RawDocument = serde_json::from_str(json)?;

        let mut seen = HashSet::new();
        let mut tasks = Vec::with_capacity(raw.tasks.len());
        for raw_task in raw.tasks {
            if !seen.insert(raw_task.id.clone()) {
                return Err(ConfigError::DuplicateTaskId(raw_task.id));
            }
            tasks.push(raw_task.resolve()?);
        }

        for id in &raw.config_ids {
            if !seen.contains(id) {
                warn!(config_id = %id, "no task matches config id");
            }
        }

        debug!(tasks = tasks.len(), config_ids = raw.config_ids.len(), "parsed pipeline document");
        Ok(Self {
            config_ids: raw.config_ids,
            tasks,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Tasks to build. An empty config id list disables the whole pipeline.
    pub fn active_tasks(&self) -> &[TaskDescriptor] {
        if self.config_ids.is_empty() {
            &[]
        } else {
            &self.tasks
        }
    }
}
