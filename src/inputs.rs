//! Declarative input descriptors.
//!
//! A task declares its upstream inputs as [`InputSpec`]s. Any field can be a
//! literal or a resolver computed from the task value; resolvers run once,
//! when the task is built, and produce plain [`InputDescriptor`]s.

use std::{
    collections::BTreeMap,
    fmt,
    str::FromStr,
};

use serde::{
    Serialize, Deserialize
};

use crate::remote::backend::PropertyValue;

/// Kind of remote asset an input points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteType {
    Image,

    ImageCollection,

    FeatureCollection,

    #[serde(alias = "Folder")]
    Directory,
}

impl fmt::Display for RemoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemoteType::Image => "Image",
            RemoteType::ImageCollection => "ImageCollection",
            RemoteType::FeatureCollection => "FeatureCollection",
            RemoteType::Directory => "Directory",
        };
        f.write_str(s)
    }
}

impl FromStr for RemoteType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Image" => Ok(RemoteType::Image),
            "ImageCollection" => Ok(RemoteType::ImageCollection),
            "FeatureCollection" => Ok(RemoteType::FeatureCollection),
            "Directory" | "Folder" => Ok(RemoteType::Directory),
            other => Err(format!("unknown remote type `{other}`")),
        }
    }
}

/// A resolved input: every field is a plain value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputDescriptor {
    pub remote_path: Option<String>,

    // None when missing or not a known type
    pub remote_type: Option<RemoteType>,

    // in whole years
    pub maxage: Option<u32>,

    pub is_static: bool,
}

impl InputDescriptor {
    /// Field name/value pairs, in a stable order, as stamped onto exports.
    pub fn fields(&self) -> Vec<(&'static str, PropertyValue)> {
        let mut fields = vec![];
        if let Some(path) = &self.remote_path {
            fields.push(("remote_path", PropertyValue::Text(path.clone())));
        }
        if let Some(kind) = self.remote_type {
            fields.push(("remote_type", PropertyValue::Text(kind.to_string())));
        }
        if let Some(maxage) = self.maxage {
            fields.push(("maxage", PropertyValue::Number(maxage as i64)));
        }
        if true == self.is_static {
            fields.push(("static", PropertyValue::Text("True".to_string())));
        }
        fields
    }
}

pub type Inputs = BTreeMap<String, InputDescriptor>;

/// A field value known up front or computed from the task.
pub enum Provided<C, T> {
    Literal(T),

    Resolver(Box<dyn Fn(&C) -> T + Send + Sync>),
}

impl<C, T> Provided<C, T> {
    pub fn resolve(self, ctx: &C) -> T {
        match self {
            Provided::Literal(v) => v,
            Provided::Resolver(f) => f(ctx),
        }
    }
}

impl<C, T: fmt::Debug> fmt::Debug for Provided<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provided::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Provided::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

/// An unresolved input declaration.
#[derive(Debug)]
pub struct InputSpec<C> {
    remote_path: Option<Provided<C, String>>,
    remote_type: Option<RemoteType>,
    maxage: Option<Provided<C, u32>>,
    is_static: bool,
}

impl<C> InputSpec<C> {
    pub fn new(remote_type: Option<RemoteType>) -> Self {
        InputSpec {
            remote_path: None,
            remote_type: remote_type,
            maxage: None,
            is_static: false,
        }
    }

    pub fn image() -> Self {
        Self::new(Some(RemoteType::Image))
    }

    pub fn image_collection() -> Self {
        Self::new(Some(RemoteType::ImageCollection))
    }

    pub fn feature_collection() -> Self {
        Self::new(Some(RemoteType::FeatureCollection))
    }

    pub fn directory() -> Self {
        Self::new(Some(RemoteType::Directory))
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.remote_path = Some(Provided::Literal(path.into()));
        self
    }

    pub fn path_from<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&C) -> String + Send + Sync + 'static,
    {
        self.remote_path = Some(Provided::Resolver(Box::new(resolver)));
        self
    }

    pub fn maxage(mut self, years: u32) -> Self {
        self.maxage = Some(Provided::Literal(years));
        self
    }

    pub fn maxage_from<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&C) -> u32 + Send + Sync + 'static,
    {
        self.maxage = Some(Provided::Resolver(Box::new(resolver)));
        self
    }

    pub fn fixed(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn resolve(self, ctx: &C) -> InputDescriptor {
        InputDescriptor {
            remote_path: self.remote_path.map(|p| p.resolve(ctx)),
            remote_type: self.remote_type,
            maxage: self.maxage.map(|m| m.resolve(ctx)),
            is_static: self.is_static,
        }
    }
}

/// A task's input declarations, keyed by input name.
#[derive(Debug)]
pub struct InputSpecs<C> {
    specs: Vec<(String, InputSpec<C>)>,
}

impl<C> Default for InputSpecs<C> {
    fn default() -> Self {
        InputSpecs { specs: vec![] }
    }
}

impl<C> InputSpecs<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, spec: InputSpec<C>) -> Self {
        self.specs.push((name.into(), spec));
        self
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn resolve(self, ctx: &C) -> Inputs {
        self.specs
            .into_iter()
            .map(|(name, spec)| (name, spec.resolve(ctx)))
            .collect()
    }
}

// input descriptor as written in an inputs file
#[derive(Debug, Deserialize)]
pub struct RawInput {
    pub remote_path: Option<String>,

    pub remote_type: Option<String>,

    pub maxage: Option<u32>,

    #[serde(default, rename = "static")]
    pub is_static: bool,
}

#[derive(Debug, Deserialize)]
pub struct InputsFile {
    #[serde(default)]
    pub inputs: BTreeMap<String, RawInput>,
}

impl From<RawInput> for InputDescriptor {
    fn from(raw: RawInput) -> Self {
        InputDescriptor {
            remote_path: raw.remote_path,
            remote_type: raw.remote_type.and_then(|t| t.parse().ok()),
            maxage: raw.maxage,
            is_static: raw.is_static,
        }
    }
}

/// Parse an inputs file (TOML, one `[inputs.<name>]` table per input).
pub fn parse_inputs(text: &str) -> Result<Inputs, toml::de::Error> {
    let file: InputsFile = toml::from_str(text)?;
    Ok(file.inputs
        .into_iter()
        .map(|(name, raw)| (name, raw.into()))
        .collect())
}
