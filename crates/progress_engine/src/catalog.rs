use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use roxmltree::{Document, Node};

use crate::keys;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogErrorCode {
    ReadFile,
    XmlMalformed,
    InvalidRoot,
    UnknownElement,
    MissingAttribute,
    InvalidValue,
    EmptyZone,
    DuplicateZone,
    DuplicateScene,
    NonContiguousOrder,
}

#[derive(Debug, Clone)]
pub struct CatalogError {
    pub code: CatalogErrorCode,
    pub message: String,
    pub source_name: String,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{:?}: {} (source={}, line={}, column={})",
                self.code, self.message, self.source_name, loc.line, loc.column
            ),
            None => write!(
                f,
                "{:?}: {} (source={})",
                self.code, self.message, self.source_name
            ),
        }
    }
}

impl std::error::Error for CatalogError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneRef {
    pub id: String,
    /// 1-based position within the zone.
    pub order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub id: String,
    pub ordered_scenes: Vec<SceneRef>,
    pub required_stars_to_unlock: u32,
}

impl Zone {
    /// Builds a zone whose scene orders follow the slice order.
    pub fn new(id: impl Into<String>, scene_ids: &[&str], required_stars_to_unlock: u32) -> Self {
        Self {
            id: id.into(),
            ordered_scenes: scene_ids
                .iter()
                .enumerate()
                .map(|(idx, scene_id)| SceneRef {
                    id: (*scene_id).to_string(),
                    order: idx as u32 + 1,
                })
                .collect(),
            required_stars_to_unlock,
        }
    }

    pub fn scene_index(&self, scene_id: &str) -> Option<usize> {
        self.ordered_scenes
            .iter()
            .position(|scene| scene.id == scene_id)
    }

    pub fn scene_after(&self, scene_id: &str) -> Option<&SceneRef> {
        let idx = self.scene_index(scene_id)?;
        self.ordered_scenes.get(idx + 1)
    }
}

/// Static zone configuration. Validated once on construction and never
/// mutated by the engine.
#[derive(Debug, Clone, Default)]
pub struct ZoneCatalog {
    zones: Vec<Zone>,
    index_by_id: HashMap<String, usize>,
}

impl ZoneCatalog {
    pub fn new(zones: Vec<Zone>) -> Result<Self, CatalogError> {
        Self::validated(zones, "<inline>")
    }

    pub fn load_xml(path: &Path) -> Result<Self, CatalogError> {
        let source_name = path.display().to_string();
        let raw = fs::read_to_string(path).map_err(|error| CatalogError {
            code: CatalogErrorCode::ReadFile,
            message: format!("failed to read catalog file: {error}"),
            source_name: source_name.clone(),
            location: None,
        })?;
        Self::from_xml_str(&source_name, &raw)
    }

    pub fn from_xml_str(source_name: &str, raw: &str) -> Result<Self, CatalogError> {
        let zones = parse_zones_document(source_name, raw)?;
        Self::validated(zones, source_name)
    }

    pub fn zone(&self, zone_id: &str) -> Option<&Zone> {
        self.index_by_id
            .get(zone_id)
            .and_then(|idx| self.zones.get(*idx))
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn is_first_zone(&self, zone_id: &str) -> bool {
        self.zones.first().is_some_and(|zone| zone.id == zone_id)
    }

    fn validated(mut zones: Vec<Zone>, source_name: &str) -> Result<Self, CatalogError> {
        let mut index_by_id = HashMap::with_capacity(zones.len());
        for (idx, zone) in zones.iter_mut().enumerate() {
            validate_id("zone", &zone.id, source_name)?;
            if index_by_id.insert(zone.id.clone(), idx).is_some() {
                return Err(plain_error(
                    CatalogErrorCode::DuplicateZone,
                    format!("duplicate zone id '{}'", zone.id),
                    source_name,
                ));
            }
            validate_zone_scenes(zone, source_name)?;
        }
        Ok(Self { zones, index_by_id })
    }
}

fn validate_zone_scenes(zone: &mut Zone, source_name: &str) -> Result<(), CatalogError> {
    if zone.ordered_scenes.is_empty() {
        return Err(plain_error(
            CatalogErrorCode::EmptyZone,
            format!("zone '{}' has no scenes", zone.id),
            source_name,
        ));
    }

    zone.ordered_scenes.sort_by_key(|scene| scene.order);
    let mut seen = HashSet::<&str>::new();
    for (idx, scene) in zone.ordered_scenes.iter().enumerate() {
        validate_id("scene", &scene.id, source_name)?;
        if !seen.insert(scene.id.as_str()) {
            return Err(plain_error(
                CatalogErrorCode::DuplicateScene,
                format!("duplicate scene id '{}' in zone '{}'", scene.id, zone.id),
                source_name,
            ));
        }
        let expected = idx as u32 + 1;
        if scene.order != expected {
            return Err(plain_error(
                CatalogErrorCode::NonContiguousOrder,
                format!(
                    "scene '{}' in zone '{}' has order {}; orders must start at 1 and be contiguous (expected {})",
                    scene.id, zone.id, scene.order, expected
                ),
                source_name,
            ));
        }
    }
    Ok(())
}

// Storage keys join ids with '_', so an id containing it could alias another
// scene's keys.
fn validate_id(kind: &str, id: &str, source_name: &str) -> Result<(), CatalogError> {
    if id.is_empty() || id.contains(keys::KEY_SEPARATOR) {
        return Err(plain_error(
            CatalogErrorCode::InvalidValue,
            format!(
                "{kind} id '{id}' must be non-empty and must not contain '{}'",
                keys::KEY_SEPARATOR
            ),
            source_name,
        ));
    }
    Ok(())
}

fn parse_zones_document(source_name: &str, raw: &str) -> Result<Vec<Zone>, CatalogError> {
    let doc = Document::parse(raw).map_err(|error| CatalogError {
        code: CatalogErrorCode::XmlMalformed,
        message: format!("malformed XML: {error}"),
        source_name: source_name.to_string(),
        location: Some(SourceLocation {
            line: error.pos().row as usize,
            column: error.pos().col as usize,
        }),
    })?;

    let root = doc.root_element();
    if root.tag_name().name() != "Zones" {
        return Err(error_at_node(
            CatalogErrorCode::InvalidRoot,
            "root element must be <Zones>".to_string(),
            source_name,
            &doc,
            root,
        ));
    }

    let mut zones = Vec::<Zone>::new();
    for child in root.children().filter(|node| node.is_element()) {
        if child.tag_name().name() != "Zone" {
            return Err(error_at_node(
                CatalogErrorCode::UnknownElement,
                format!("unsupported element <{}> in <Zones>", child.tag_name().name()),
                source_name,
                &doc,
                child,
            ));
        }
        zones.push(parse_zone(source_name, &doc, child)?);
    }
    Ok(zones)
}

fn parse_zone(
    source_name: &str,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<Zone, CatalogError> {
    let id = required_attribute(source_name, doc, node, "id")?;
    let required_stars_to_unlock = match node.attribute("requiredStars") {
        Some(raw) => parse_u32(source_name, doc, node, "requiredStars", raw)?,
        None => 0,
    };

    let mut ordered_scenes = Vec::new();
    for scene in node.children().filter(|child| child.is_element()) {
        if scene.tag_name().name() != "Scene" {
            return Err(error_at_node(
                CatalogErrorCode::UnknownElement,
                format!("unsupported element <{}> in <Zone>", scene.tag_name().name()),
                source_name,
                doc,
                scene,
            ));
        }
        let scene_id = required_attribute(source_name, doc, scene, "id")?;
        let raw_order = required_attribute(source_name, doc, scene, "order")?;
        let order = parse_u32(source_name, doc, scene, "order", &raw_order)?;
        ordered_scenes.push(SceneRef {
            id: scene_id,
            order,
        });
    }

    Ok(Zone {
        id,
        ordered_scenes,
        required_stars_to_unlock,
    })
}

fn required_attribute(
    source_name: &str,
    doc: &Document<'_>,
    node: Node<'_, '_>,
    name: &str,
) -> Result<String, CatalogError> {
    let value = node.attribute(name).map(str::trim).unwrap_or_default();
    if value.is_empty() {
        return Err(error_at_node(
            CatalogErrorCode::MissingAttribute,
            format!(
                "<{}> requires a non-empty '{}' attribute",
                node.tag_name().name(),
                name
            ),
            source_name,
            doc,
            node,
        ));
    }
    Ok(value.to_string())
}

fn parse_u32(
    source_name: &str,
    doc: &Document<'_>,
    node: Node<'_, '_>,
    name: &str,
    raw: &str,
) -> Result<u32, CatalogError> {
    raw.trim().parse::<u32>().map_err(|_| {
        error_at_node(
            CatalogErrorCode::InvalidValue,
            format!("{name} '{raw}' is not a non-negative integer"),
            source_name,
            doc,
            node,
        )
    })
}

fn error_at_node(
    code: CatalogErrorCode,
    message: String,
    source_name: &str,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> CatalogError {
    let pos = doc.text_pos_at(node.range().start);
    CatalogError {
        code,
        message,
        source_name: source_name.to_string(),
        location: Some(SourceLocation {
            line: pos.row as usize,
            column: pos.col as usize,
        }),
    }
}

fn plain_error(code: CatalogErrorCode, message: String, source_name: &str) -> CatalogError {
    CatalogError {
        code,
        message,
        source_name: source_name.to_string(),
        location: None,
    }
}
