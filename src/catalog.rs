//! Furniture catalog and style-matched recommendations
//!
//! The catalog is loaded once at startup and never mutated. Recommendations are a
//! single text generation over the room photo plus an inventory listing; anything
//! that goes wrong on the generative side degrades to an empty list.

use crate::{
    error::{Result, ShowroomError},
    inference::{GenerationRequest, GenerativeModel},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{path::Path, sync::Arc};
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_CONSULT_MODEL: &str = "gemini-2.5-flash-lite";
pub const DEFAULT_CONSULT_PROMPT: &str = "Recommend furniture that best matches this room's style.";

/// One catalog record; unknown fields are carried through to the response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FurnitureItem {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub style_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glb_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FurnitureItem {
    #[must_use]
    pub fn has_model(&self) -> bool {
        self.glb_url.as_deref().is_some_and(|url| !url.is_empty())
    }

    /// Copy with a relative `glb_url` resolved against `base_url`
    #[must_use]
    pub fn with_absolute_url(&self, base_url: &str) -> Self {
        let mut item = self.clone();
        if let Some(url) = item.glb_url.as_mut() {
            if !url.is_empty() && !url.starts_with("http") {
                let base = base_url.trim_end_matches('/');
                *url = if url.starts_with('/') {
                    format!("{base}{url}")
                } else {
                    format!("{base}/{url}")
                };
            }
        }
        item
    }
}

/// Read-only furniture inventory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FurnitureCatalog {
    items: Vec<FurnitureItem>,
}

impl FurnitureCatalog {
    #[must_use]
    pub fn new(items: Vec<FurnitureItem>) -> Self {
        Self { items }
    }

    /// Parse a JSON array of records
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when the document is not an array of catalog records
    pub fn from_json_str(json: &str) -> Result<Self> {
        let items: Vec<FurnitureItem> = serde_json::from_str(json)
            .map_err(|e| ShowroomError::invalid_config(format!("furniture catalog is malformed: {e}")))?;
        Ok(Self::new(items))
    }

    /// Load the catalog file; a missing file yields an empty catalog
    ///
    /// # Errors
    ///
    /// - File read failures other than "not found"
    /// - Malformed JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Furniture catalog not found, recommendations will be empty");
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .map_err(|e| ShowroomError::file_io_error("read furniture catalog", path, &e))?;
        let catalog = Self::from_json_str(&json)?;
        info!(path = %path.display(), items = catalog.len(), "Loaded furniture catalog");
        Ok(catalog)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn items(&self) -> &[FurnitureItem] {
        &self.items
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&FurnitureItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// One line per item, in the form the curator prompt expects
    #[must_use]
    pub fn inventory_text(&self) -> String {
        self.items
            .iter()
            .map(|item| {
                format!(
                    "- ID: {}, Name: {}, Style: {:?}, Has3D: {}",
                    item.id,
                    item.name,
                    item.style_tags,
                    if item.has_model() { "Yes" } else { "No" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A catalog item chosen for the room
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub selected_id: String,
    pub reason: String,
    pub position_suggestion: String,
    pub item_details: FurnitureItem,
}

/// Raw selection as emitted by the model
#[derive(Debug, Deserialize)]
struct Selection {
    #[serde(default)]
    selected_id: Option<Value>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    position_suggestion: Option<String>,
}

/// Recommendations, or the reason none could be produced
#[derive(Debug, Clone, PartialEq)]
pub enum ConsultOutcome {
    Recommendations(Vec<Recommendation>),
    Degraded(String),
}

impl ConsultOutcome {
    /// Degraded outcomes render as an empty list
    #[must_use]
    pub fn into_recommendations(self) -> Vec<Recommendation> {
        match self {
            Self::Recommendations(items) => items,
            Self::Degraded(_) => Vec::new(),
        }
    }
}

/// Curator system instruction listing the inventory
#[must_use]
pub fn curator_instruction(user_prompt: &str, inventory: &str) -> String {
    format!(
        "You are an expert interior design curator.\n\
         Analyze the user's room image and their request (\"{user_prompt}\").\n\
         Then, SELECT THE TOP 5 BEST ITEMS from the [Inventory List] below.\n\
         \n\
         [Inventory List]\n\
         {inventory}\n\
         \n\
         [Output Format]\n\
         Return ONLY a JSON Array of objects. No markdown.\n\
         [\n  {{\n    \"selected_id\": \"Item ID\",\n    \"reason\": \"Reason\",\n    \"position_suggestion\": \"Placement suggestion\"\n  }}\n]"
    )
}

/// Strip markdown fences and parse the model's JSON; a lone object counts as one selection
fn parse_selections(text: &str) -> std::result::Result<Vec<Selection>, String> {
    let cleaned = text.replace("```json", "").replace("```", "");
    let value: Value = serde_json::from_str(cleaned.trim()).map_err(|e| format!("invalid JSON: {e}"))?;
    let values = match value {
        Value::Array(values) => values,
        object @ Value::Object(_) => vec![object],
        other => return Err(format!("expected a JSON array, got {other}")),
    };
    Ok(values
        .into_iter()
        .filter_map(|value| serde_json::from_value::<Selection>(value).ok())
        .collect())
}

fn selection_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Recommends catalog items for a room photo
pub struct Curator {
    model: Arc<dyn GenerativeModel>,
    model_name: String,
    catalog: Arc<FurnitureCatalog>,
}

impl Curator {
    pub fn new(model: Arc<dyn GenerativeModel>, catalog: Arc<FurnitureCatalog>) -> Self {
        Self {
            model,
            model_name: DEFAULT_CONSULT_MODEL.to_string(),
            catalog,
        }
    }

    #[must_use]
    pub fn with_model_name<S: Into<String>>(mut self, model_name: S) -> Self {
        self.model_name = model_name.into();
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &FurnitureCatalog {
        &self.catalog
    }

    /// Ask the model for selections and resolve them against the catalog
    ///
    /// `base_url` is used to make relative asset paths absolute.
    #[instrument(skip(self, image), fields(model = %self.model_name, catalog = self.catalog.len()))]
    pub async fn consult(&self, image: Vec<u8>, user_prompt: Option<&str>, base_url: &str) -> ConsultOutcome {
        let prompt = user_prompt
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_CONSULT_PROMPT);
        if self.catalog.is_empty() {
            warn!("Furniture catalog is empty");
        }

        let instruction = curator_instruction(prompt, &self.catalog.inventory_text());
        let request = GenerationRequest::describe_image(&self.model_name, image, instruction, prompt);
        let text = match self.model.generate(&request).await {
            Ok(response) => response.text(),
            Err(e) => {
                warn!(kind = %e.kind, error = %e.message, "Recommendation request failed");
                return ConsultOutcome::Degraded(e.to_string());
            }
        };

        let selections = match parse_selections(&text) {
            Ok(selections) => selections,
            Err(reason) => {
                warn!(%reason, "Could not parse recommendations");
                return ConsultOutcome::Degraded(reason);
            }
        };
        debug!(selections = selections.len(), "Model returned selections");

        let recommendations = selections
            .into_iter()
            .filter_map(|selection| {
                let id = selection.selected_id.as_ref().and_then(selection_id)?;
                let item = self.catalog.find(&id)?;
                Some(Recommendation {
                    item_details: item.with_absolute_url(base_url),
                    selected_id: id,
                    reason: selection.reason.unwrap_or_default(),
                    position_suggestion: selection.position_suggestion.unwrap_or_default(),
                })
            })
            .collect::<Vec<_>>();
        info!(recommendations = recommendations.len(), "Consultation finished");
        ConsultOutcome::Recommendations(recommendations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backends::test_utils::{text_response, MockGenerativeModel},
        error::ServiceError,
        inference::RequestPart,
    };

    const CATALOG: &str = r#"[
        {"id": "B01", "name": "Oak chair", "style_tags": ["nordic", "wood"], "glb_url": "3d_models/B01.glb", "price": 120},
        {"id": "B02", "name": "Grey sofa", "glb_url": "https://cdn.example.com/B02.glb"},
        {"id": "B03", "name": "Lamp"}
    ]"#;

    fn catalog() -> Arc<FurnitureCatalog> {
        Arc::new(FurnitureCatalog::from_json_str(CATALOG).unwrap())
    }

    #[test]
    fn test_inventory_text() {
        let text = catalog().inventory_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], r#"- ID: B01, Name: Oak chair, Style: ["nordic", "wood"], Has3D: Yes"#);
        assert_eq!(lines[2], "- ID: B03, Name: Lamp, Style: [], Has3D: No");
    }

    #[test]
    fn test_absolute_urls() {
        let catalog = catalog();
        let chair = catalog.find("B01").unwrap().with_absolute_url("http://host:8000/");
        assert_eq!(chair.glb_url.as_deref(), Some("http://host:8000/3d_models/B01.glb"));
        assert_eq!(chair.extra.get("price"), Some(&Value::from(120)));
        let sofa = catalog.find("B02").unwrap().with_absolute_url("http://host:8000");
        assert_eq!(sofa.glb_url.as_deref(), Some("https://cdn.example.com/B02.glb"));
    }

    #[test]
    fn test_parse_selections_accepts_fenced_object() {
        let parsed = parse_selections("```json\n{\"selected_id\": \"B01\", \"reason\": \"warm\"}\n```").unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parse_selections("not json").is_err());
    }

    #[tokio::test]
    async fn test_consult_resolves_catalog_items() {
        let model = Arc::new(MockGenerativeModel::always_returning(text_response(
            r#"[{"selected_id": "B01", "reason": "matches the oak floor", "position_suggestion": "by the window"},
                {"selected_id": "ZZZ", "reason": "unknown"}]"#,
        )));
        let curator = Curator::new(model.clone(), catalog());
        let outcome = curator.consult(vec![1, 2, 3], None, "http://localhost:8000").await;

        let items = outcome.into_recommendations();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].selected_id, "B01");
        assert_eq!(items[0].position_suggestion, "by the window");
        assert_eq!(
            items[0].item_details.glb_url.as_deref(),
            Some("http://localhost:8000/3d_models/B01.glb")
        );

        let request = &model.requests()[0];
        assert_eq!(request.model, DEFAULT_CONSULT_MODEL);
        assert!(request
            .system_instruction
            .as_deref()
            .is_some_and(|s| s.contains("- ID: B03, Name: Lamp")));
        assert!(matches!(&request.parts[1], RequestPart::Text(p) if p == DEFAULT_CONSULT_PROMPT));
    }

    #[tokio::test]
    async fn test_consult_degrades_on_failures() {
        let failing = Curator::new(
            Arc::new(MockGenerativeModel::always_failing(ServiceError::transient("down"))),
            catalog(),
        );
        assert!(matches!(
            failing.consult(vec![], Some("cozy"), "http://h").await,
            ConsultOutcome::Degraded(_)
        ));

        let garbled = Curator::new(
            Arc::new(MockGenerativeModel::always_returning(text_response("I like the room!"))),
            catalog(),
        );
        let outcome = garbled.consult(vec![], None, "http://h").await;
        assert!(matches!(outcome, ConsultOutcome::Degraded(_)));
        assert!(outcome.into_recommendations().is_empty());
    }
}
