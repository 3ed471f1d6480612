//! Raw item → CMS record mapping.
//!
//! Pure and deterministic: the same item, image, and link table always give
//! the same record. Every consumed source field has a target field and a
//! default; mapping never fails.
//!
//! # Planets → `res.planet`
//!
//! | Source | Target | Missing, null, `"unknown"`, unparseable |
//! |--------|--------|------|
//! | `name` | `name` | `""` |
//! | `diameter` | `diameter` | `0` |
//! | `population` | `population` | `0` |
//! | `rotation_period` | `rotation_period` | `0` |
//! | `orbital_period` | `orbital_period` | `0` |
//!
//! # People → `res.partner`
//!
//! | Source | Target | Missing |
//! |--------|--------|---------|
//! | `name` | `name` | `""` |
//! | `homeworld` (URL) | `planet` (target id of that planet) | omitted |
//! | image | `image_1920` (base64) | omitted |
//!
//! The external key field is not set here; the gateway writes it.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};
use tracing::debug;

use crate::models::{external_key, id_from_url, ImageAsset, RawItem, Resource, TargetRecord};

pub const IMAGE_FIELD: &str = "image_1920";
pub const PLANET_LINK_FIELD: &str = "planet";

const PLANET_COUNTS: [&str; 4] = ["diameter", "population", "rotation_period", "orbital_period"];

/// Source ids of already-upserted records, for resolving cross-links.
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    planets: HashMap<String, i64>,
}

impl LinkTable {
    pub fn insert_planet(&mut self, source_id: impl Into<String>, target_id: i64) {
        self.planets.insert(source_id.into(), target_id);
    }

    pub fn planet(&self, source_id: &str) -> Option<i64> {
        self.planets.get(source_id).copied()
    }

    pub fn len(&self) -> usize {
        self.planets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planets.is_empty()
    }
}

/// Map one item (and its image, if any) into a record for `resource`'s model.
pub fn map_item(
    resource: Resource,
    item: &RawItem,
    image: Option<&ImageAsset>,
    links: &LinkTable,
) -> TargetRecord {
    let values = match resource {
        Resource::Planets => map_planet(item),
        Resource::People => map_person(item, image, links),
    };
    TargetRecord {
        model: resource.model().to_string(),
        external_key: external_key(resource, &item.source_id),
        values,
    }
}

fn map_planet(item: &RawItem) -> Map<String, Value> {
    let mut values = Map::new();
    values.insert("name".into(), Value::String(text_field(item, "name")));
    for field in PLANET_COUNTS {
        values.insert(field.into(), Value::from(count_field(item, field)));
    }
    values
}

fn map_person(item: &RawItem, image: Option<&ImageAsset>, links: &LinkTable) -> Map<String, Value> {
    let mut values = Map::new();
    values.insert("name".into(), Value::String(text_field(item, "name")));

    let homeworld = item
        .fields
        .get("homeworld")
        .and_then(Value::as_str)
        .and_then(id_from_url);
    match homeworld.as_deref().and_then(|id| links.planet(id)) {
        Some(planet_id) => {
            values.insert(PLANET_LINK_FIELD.into(), Value::from(planet_id));
        }
        None => debug!(
            source_id = %item.source_id,
            homeworld = ?homeworld,
            "homeworld not linked"
        ),
    }

    if let Some(image) = image {
        values.insert(IMAGE_FIELD.into(), Value::String(STANDARD.encode(&image.bytes)));
    }
    values
}

/// String field, or `""` when missing or not a string.
fn text_field(item: &RawItem, field: &str) -> String {
    match item.fields.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => {
            debug!(source_id = %item.source_id, field, "defaulting missing text field");
            String::new()
        }
        Some(other) => other.to_string(),
    }
}

/// Integer count, or `0` for missing, `"unknown"`, `"n/a"` and other non-numbers.
fn count_field(item: &RawItem, field: &str) -> i64 {
    let parsed = match item.fields.get(field) {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => parse_count(s),
        _ => None,
    };
    parsed.unwrap_or_else(|| {
        debug!(source_id = %item.source_id, field, "defaulting count field to 0");
        0
    })
}

fn parse_count(s: &str) -> Option<i64> {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
    cleaned
        .parse::<i64>()
        .ok()
        .or_else(|| cleaned.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(v: Value) -> RawItem {
        RawItem::from_json(v.as_object().unwrap().clone()).unwrap()
    }

    #[test]
    fn maps_planet_fields() {
        let planet = item(json!({
            "name": "Tatooine",
            "diameter": "10465",
            "population": "200000",
            "rotation_period": "23",
            "orbital_period": "304",
            "climate": "arid",
            "url": "https://swapi.dev/api/planets/1/"
        }));
        let record = map_item(Resource::Planets, &planet, None, &LinkTable::default());
        assert_eq!(record.model, "res.planet");
        assert_eq!(record.external_key, "swapi:planets:1");
        assert_eq!(
            Value::Object(record.values),
            json!({
                "name": "Tatooine",
                "diameter": 10465,
                "population": 200000,
                "rotation_period": 23,
                "orbital_period": 304
            })
        );
    }

    #[test]
    fn unknown_and_missing_counts_default_to_zero() {
        let planet = item(json!({
            "diameter": "unknown",
            "population": null,
            "rotation_period": "n/a",
            "url": "https://swapi.dev/api/planets/28/"
        }));
        let record = map_item(Resource::Planets, &planet, None, &LinkTable::default());
        assert_eq!(record.values["name"], json!(""));
        for field in PLANET_COUNTS {
            assert_eq!(record.values[field], json!(0), "{}", field);
        }
    }

    #[test]
    fn counts_accept_separators_and_numbers() {
        assert_eq!(parse_count("1,000,000,000,000"), Some(1_000_000_000_000));
        assert_eq!(parse_count(" 12.5 "), Some(12));
        assert_eq!(parse_count("unknown"), None);
        let planet = item(json!({"diameter": 7200, "url": "https://swapi.dev/api/planets/2/"}));
        let record = map_item(Resource::Planets, &planet, None, &LinkTable::default());
        assert_eq!(record.values["diameter"], json!(7200));
    }

    #[test]
    fn person_links_homeworld_and_encodes_image() {
        let mut links = LinkTable::default();
        links.insert_planet("1", 77);
        let luke = item(json!({
            "name": "Luke Skywalker",
            "homeworld": "https://swapi.dev/api/planets/1/",
            "url": "https://swapi.dev/api/people/1/"
        }));
        let image = ImageAsset {
            bytes: vec![0xFF, 0xD8, 0xFF],
            content_type: "image/jpeg".into(),
        };
        let record = map_item(Resource::People, &luke, Some(&image), &links);
        assert_eq!(record.model, "res.partner");
        assert_eq!(record.external_key, "swapi:people:1");
        assert_eq!(record.values["name"], json!("Luke Skywalker"));
        assert_eq!(record.values[PLANET_LINK_FIELD], json!(77));
        assert_eq!(record.values[IMAGE_FIELD], json!("/9j/"));
    }

    #[test]
    fn absent_image_and_unknown_homeworld_are_omitted() {
        let stranger = item(json!({
            "name": "Stranger",
            "homeworld": "https://swapi.dev/api/planets/999/",
            "url": "https://swapi.dev/api/people/5/"
        }));
        let record = map_item(Resource::People, &stranger, None, &LinkTable::default());
        assert!(!record.values.contains_key(IMAGE_FIELD));
        assert!(!record.values.contains_key(PLANET_LINK_FIELD));
        assert_eq!(record.values.len(), 1);
    }

    #[test]
    fn mapping_is_deterministic() {
        let luke = item(json!({
            "name": "Luke",
            "homeworld": "https://swapi.dev/api/planets/1/",
            "url": "https://swapi.dev/api/people/1/"
        }));
        let mut links = LinkTable::default();
        links.insert_planet("1", 3);
        let a = map_item(Resource::People, &luke, None, &links);
        let b = map_item(Resource::People, &luke, None, &links);
        assert_eq!(a, b);
    }
}
