//! Design documents.
//!
//! A design document names one or more views, each with a map function and
//! an optional reduce function:
//!
//! ```json
//! {"views": {"by_id": {"map": "function(doc){emit(doc._id, null)}", "reduce": "_count"}}}
//! ```
//!
//! Parsing is tolerant: a document that is not valid JSON, or that has no
//! `"views"` object, yields no views instead of an error.

use crate::core::ViewDefinition;
use serde_json::Value;
use std::collections::BTreeMap;

/// Where a view's reduce source is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReduceSourcePolicy {
    /// Read the `"reduce"` member.
    #[default]
    Reduce,
    /// Historical behavior: when a `"reduce"` member is present, report the
    /// map source in its place.
    MirrorMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesignDoc {
    views: BTreeMap<String, ViewDefinition>,
}

impl DesignDoc {
    pub fn parse(source: &str) -> Self {
        Self::parse_with(source, ReduceSourcePolicy::Reduce)
    }

    pub fn parse_with(source: &str, policy: ReduceSourcePolicy) -> Self {
        let Ok(doc) = serde_json::from_str::<Value>(source) else {
            return Self::default();
        };
        let Some(Value::Object(views)) = doc.get("views") else {
            return Self::default();
        };

        let views = views
            .iter()
            .map(|(name, view)| {
                let map_source = string_member(view, "map");
                let reduce_source = match policy {
                    ReduceSourcePolicy::Reduce => string_member(view, "reduce"),
                    ReduceSourcePolicy::MirrorMap if view.get("reduce").is_some() => map_source.clone(),
                    ReduceSourcePolicy::MirrorMap => String::new(),
                };
                (name.clone(), ViewDefinition::new(name.clone(), map_source, reduce_source))
            })
            .collect();

        Self { views }
    }

    pub fn views(&self) -> impl Iterator<Item = &ViewDefinition> {
        self.views.values()
    }

    pub fn view(&self, name: &str) -> Option<&ViewDefinition> {
        self.views.get(name)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// `(view name, wrapped source)` for every view with a map function,
    /// in view-name order. Sources are parenthesized so each one evaluates
    /// as a standalone function expression.
    pub fn map_sources(&self) -> Vec<(String, String)> {
        self.views()
            .filter(|view| view.has_map())
            .map(|view| (view.name.clone(), format!("({})", view.map_source)))
            .collect()
    }
}

fn string_member(view: &Value, name: &str) -> String {
    view.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default()
}
