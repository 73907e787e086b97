use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OsmNode {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone)]
pub struct OsmWay {
    pub id: i64,
    pub node_refs: Vec<i64>,
    pub tags: HashMap<String, String>,
}

/// Relations are decoded and delivered to handlers but nothing downstream resolves them.
#[derive(Debug, Clone)]
pub struct OsmRelation {
    pub id: i64,
    pub tags: HashMap<String, String>,
}

impl OsmWay {
    pub fn name(&self) -> &str {
        self.tags.get("name").map(String::as_str).unwrap_or("")
    }
}

const ROAD_CLASSES: &[&str] = &[
    "motorway",
    "trunk",
    "primary",
    "secondary",
    "tertiary",
    "unclassified",
    "residential",
    "service",
    "motorway_link",
    "trunk_link",
    "primary_link",
    "secondary_link",
    "tertiary_link",
    "living_street",
    "road",
];

const PATH_CLASSES: &[&str] = &[
    "pedestrian",
    "footway",
    "path",
    "cycleway",
    "bridleway",
    "steps",
    "track",
];

/// Tag predicate in OR-of-AND form: `[[a, b], [c]]` means (a AND b) OR c.
#[derive(Debug, Clone, PartialEq)]
pub struct TagFilter {
    groups: Vec<Vec<String>>,
}

impl TagFilter {
    pub fn new(groups: Vec<Vec<String>>) -> Self {
        TagFilter { groups }
    }

    /// Parse "tag1+tag2,tag3" into (tag1 AND tag2) OR tag3
    pub fn parse(filter: &str) -> Self {
        let groups = filter
            .split(',') // Split by comma for OR groups
            .map(|group| {
                group
                    .split('+') // Split by plus for AND within each group
                    .map(|tag| tag.trim().to_string())
                    .filter(|tag| !tag.is_empty())
                    .collect::<Vec<String>>()
            })
            .filter(|group| !group.is_empty())
            .collect();
        TagFilter { groups }
    }

    /// Highway classes that carry a street name worth tracking.
    pub fn roads(include_paths: bool) -> Self {
        let mut classes: Vec<&str> = ROAD_CLASSES.to_vec();
        if include_paths {
            classes.extend_from_slice(PATH_CLASSES);
        }
        let groups = classes
            .into_iter()
            .map(|class| vec![format!("highway~{}", class)])
            .collect();
        TagFilter { groups }
    }

    pub fn matches(&self, tags: &HashMap<String, String>) -> bool {
        if self.groups.is_empty() {
            return true;
        }

        // OR logic between groups: any group that matches makes the element match
        self.groups.iter().any(|and_group| {
            // AND logic within group: all tags in the group must match
            and_group
                .iter()
                .all(|pattern| matches_tag_pattern(tags, pattern))
        })
    }
}

/// Check a single pattern against a tag set.
///
/// `key~value` requires an exact value. A bare key tests presence and may carry a
/// leading or trailing `*` wildcard (`addr*`, `*:en`). A lone `*` matches any tagged element.
pub fn matches_tag_pattern(tags: &HashMap<String, String>, pattern: &str) -> bool {
    if let Some((key, value)) = pattern.split_once('~') {
        return tags.get(key).is_some_and(|v| v == value);
    }

    if pattern == "*" {
        return !tags.is_empty();
    }

    if let Some(prefix) = pattern.strip_suffix('*') {
        return tags.keys().any(|key| key.starts_with(prefix));
    }

    if let Some(suffix) = pattern.strip_prefix('*') {
        return tags.keys().any(|key| key.ends_with(suffix));
    }

    tags.contains_key(pattern)
}
