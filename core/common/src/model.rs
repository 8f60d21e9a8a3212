//! Entity model: moodboard projects, characters and comic-script editions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::EntityKind;
use crate::Result;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Top-level container for everything a user works on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.into(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A character sheet inside a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Character {
    pub fn new(project_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            project_id: project_id.into(),
            name: name.into(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A moodboard section of a character sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub character_id: String,
    pub title: String,
    pub position: u32,
    pub updated_at: DateTime<Utc>,
}

impl Section {
    pub fn new(character_id: impl Into<String>, title: impl Into<String>, position: u32) -> Self {
        Self {
            id: new_id(),
            character_id: character_id.into(),
            title: title.into(),
            position,
            updated_at: Utc::now(),
        }
    }
}

/// A positioned item on a section canvas: a note, or a placed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasItem {
    pub id: String,
    pub section_id: String,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub z_index: i32,
    pub updated_at: DateTime<Utc>,
}

impl CanvasItem {
    pub fn new(section_id: impl Into<String>, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            id: new_id(),
            section_id: section_id.into(),
            image_id: None,
            text: None,
            x,
            y,
            width,
            height,
            z_index: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Image metadata. The bytes live in file storage under the two paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub section_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    /// Storage path of the full-size asset. Filled in on creation.
    #[serde(default)]
    pub original_path: String,
    /// Storage path of the thumbnail asset. Filled in on creation.
    #[serde(default)]
    pub thumbnail_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Image {
    pub fn new(
        section_id: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            section_id: section_id.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            width,
            height,
            original_path: String::new(),
            thumbnail_path: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// File extension derived from the mime type.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "bin",
        }
    }

    /// Both asset paths, skipping unset ones.
    pub fn asset_paths(&self) -> Vec<&str> {
        [self.original_path.as_str(), self.thumbnail_path.as_str()]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect()
    }
}

/// A comic-script edition of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edition {
    pub id: String,
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub issue_number: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Edition {
    pub fn new(project_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            project_id: project_id.into(),
            title: title.into(),
            issue_number: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A script page of an edition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub edition_id: String,
    pub number: u32,
    pub updated_at: DateTime<Utc>,
}

impl Page {
    pub fn new(edition_id: impl Into<String>, number: u32) -> Self {
        Self {
            id: new_id(),
            edition_id: edition_id.into(),
            number,
            updated_at: Utc::now(),
        }
    }
}

/// A panel of a script page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub id: String,
    pub page_id: String,
    pub number: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dialogue: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Panel {
    pub fn new(page_id: impl Into<String>, number: u32, description: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            page_id: page_id.into(),
            number,
            description: description.into(),
            dialogue: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Any stored record, tagged by kind.
///
/// Serialized as `{"kind":"project","id":"...",...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Project(Project),
    Character(Character),
    Section(Section),
    Image(Image),
    CanvasItem(CanvasItem),
    Edition(Edition),
    Page(Page),
    Panel(Panel),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Project(_) => EntityKind::Project,
            Self::Character(_) => EntityKind::Character,
            Self::Section(_) => EntityKind::Section,
            Self::Image(_) => EntityKind::Image,
            Self::CanvasItem(_) => EntityKind::CanvasItem,
            Self::Edition(_) => EntityKind::Edition,
            Self::Page(_) => EntityKind::Page,
            Self::Panel(_) => EntityKind::Panel,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Project(r) => &r.id,
            Self::Character(r) => &r.id,
            Self::Section(r) => &r.id,
            Self::Image(r) => &r.id,
            Self::CanvasItem(r) => &r.id,
            Self::Edition(r) => &r.id,
            Self::Page(r) => &r.id,
            Self::Panel(r) => &r.id,
        }
    }

    /// Id of the owning parent record, `None` for projects.
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Self::Project(_) => None,
            Self::Character(r) => Some(&r.project_id),
            Self::Section(r) => Some(&r.character_id),
            Self::Image(r) => Some(&r.section_id),
            Self::CanvasItem(r) => Some(&r.section_id),
            Self::Edition(r) => Some(&r.project_id),
            Self::Page(r) => Some(&r.edition_id),
            Self::Panel(r) => Some(&r.page_id),
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Self::Project(r) => r.updated_at,
            Self::Character(r) => r.updated_at,
            Self::Section(r) => r.updated_at,
            Self::Image(r) => r.updated_at,
            Self::CanvasItem(r) => r.updated_at,
            Self::Edition(r) => r.updated_at,
            Self::Page(r) => r.updated_at,
            Self::Panel(r) => r.updated_at,
        }
    }

    pub fn set_updated_at(&mut self, at: DateTime<Utc>) {
        match self {
            Self::Project(r) => r.updated_at = at,
            Self::Character(r) => r.updated_at = at,
            Self::Section(r) => r.updated_at = at,
            Self::Image(r) => r.updated_at = at,
            Self::CanvasItem(r) => r.updated_at = at,
            Self::Edition(r) => r.updated_at = at,
            Self::Page(r) => r.updated_at = at,
            Self::Panel(r) => r.updated_at = at,
        }
    }

    pub fn as_image(&self) -> Option<&Image> {
        match self {
            Self::Image(image) => Some(image),
            _ => None,
        }
    }

    /// Hash of the content with `updated_at` left out.
    pub fn content_hash(&self) -> Result<String> {
        crate::hash::record_hash(self)
    }
}
