//! Archived object model as seen by the engine.
//!
//! Only the fields the engine and the built-in plugins need are modelled;
//! everything else rides along in `properties`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of archived object a plugin operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Aip,
    Representation,
    File,
    TransferredResource,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Aip => "aip",
            ObjectType::Representation => "representation",
            ObjectType::File => "file",
            ObjectType::TransferredResource => "transferred_resource",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aip" => Ok(ObjectType::Aip),
            "representation" => Ok(ObjectType::Representation),
            "file" => Ok(ObjectType::File),
            "transferred_resource" | "transferred-resource" => {
                Ok(ObjectType::TransferredResource)
            }
            other => Err(format!("unknown object type '{}'", other)),
        }
    }
}

/// A recorded checksum for a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aip {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Representation {
    pub id: String,
    pub aip_id: String,
    #[serde(default = "default_original")]
    pub original: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

fn default_original() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedFile {
    pub id: String,
    pub aip_id: String,
    pub representation_id: String,
    /// Original file name, including extension.
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub checksum: Option<Checksum>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// A resource sitting in the transfer area, not yet ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferredResource {
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Tagged object representation returned by the retrieval collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArchivedObject {
    Aip(Aip),
    Representation(Representation),
    File(ArchivedFile),
    TransferredResource(TransferredResource),
}

impl ArchivedObject {
    pub fn id(&self) -> &str {
        match self {
            ArchivedObject::Aip(o) => &o.id,
            ArchivedObject::Representation(o) => &o.id,
            ArchivedObject::File(o) => &o.id,
            ArchivedObject::TransferredResource(o) => &o.id,
        }
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            ArchivedObject::Aip(_) => ObjectType::Aip,
            ArchivedObject::Representation(_) => ObjectType::Representation,
            ArchivedObject::File(_) => ObjectType::File,
            ArchivedObject::TransferredResource(_) => ObjectType::TransferredResource,
        }
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        match self {
            ArchivedObject::Aip(o) => &o.properties,
            ArchivedObject::Representation(o) => &o.properties,
            ArchivedObject::File(o) => &o.properties,
            ArchivedObject::TransferredResource(o) => &o.properties,
        }
    }

    /// Looks up a searchable field: well-known structural fields first,
    /// then free-form properties.
    pub fn field(&self, name: &str) -> Option<String> {
        let structural = match (self, name) {
            (_, "id") => Some(self.id().to_string()),
            (_, "type") => Some(self.object_type().as_str().to_string()),
            (ArchivedObject::Aip(o), "parent_id") => o.parent_id.clone(),
            (ArchivedObject::Aip(o), "title") => o.title.clone(),
            (ArchivedObject::Representation(o), "aip_id") => Some(o.aip_id.clone()),
            (ArchivedObject::Representation(o), "original") => Some(o.original.to_string()),
            (ArchivedObject::File(o), "aip_id") => Some(o.aip_id.clone()),
            (ArchivedObject::File(o), "representation_id") => Some(o.representation_id.clone()),
            (ArchivedObject::File(o), "name") => Some(o.name.clone()),
            (ArchivedObject::File(o), "size") => Some(o.size.to_string()),
            (ArchivedObject::TransferredResource(o), "path") => Some(o.path.clone()),
            (ArchivedObject::TransferredResource(o), "size") => Some(o.size.to_string()),
            _ => None,
        };
        structural.or_else(|| self.properties().get(name).cloned())
    }
}
