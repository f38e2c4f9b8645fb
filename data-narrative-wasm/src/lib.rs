//! WASM bindings for data-narrative, powering the interactive web demo.

use wasm_bindgen::prelude::*;

use data_narrative::core::pipeline::NarrativeEngine;
use data_narrative::core::table::parse_table;
use data_narrative::schema::codebook::CodebookRegistry;
use data_narrative::story_data;

// ---------------------------------------------------------------------------
// JSON helper types for communication across the WASM boundary
// ---------------------------------------------------------------------------
#[derive(serde::Serialize)]
struct DomainInfo {
    entity: String,
    channels: Vec<String>,
    regimes: Vec<String>,
}

fn sample_for(domain: &str) -> Option<&'static str> {
    match domain {
        "geology" => Some(story_data::GEOLOGY_SAMPLE),
        "botany" => Some(story_data::BOTANY_SAMPLE),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// NarrativeDemo: the main exported struct
// ---------------------------------------------------------------------------
#[wasm_bindgen]
pub struct NarrativeDemo {
    engine: NarrativeEngine,
    domain: String,
}

#[wasm_bindgen]
impl NarrativeDemo {
    /// Create a demo instance for one of the built-in domains.
    #[wasm_bindgen(constructor)]
    pub fn new(domain: &str) -> Result<NarrativeDemo, JsError> {
        let engine = NarrativeEngine::builder()
            .domain(domain)
            .build()
            .map_err(|e| JsError::new(&format!("Engine build error: {e}")))?;

        Ok(NarrativeDemo {
            engine,
            domain: domain.to_string(),
        })
    }

    /// Narrate a delimited table. Returns a JSON array of lines.
    pub fn narrate(&self, table: &str) -> Result<String, JsError> {
        let lines = self
            .engine
            .narrate(table)
            .map_err(|e| JsError::new(&format!("Narration error: {e}")))?;
        serde_json::to_string(&lines)
            .map_err(|e| JsError::new(&format!("Serialization error: {e}")))
    }

    /// Narrate a table and return the lines together with per-step
    /// decisions (regimes, bridges, beats) as JSON.
    pub fn trace(&self, table: &str) -> Result<String, JsError> {
        let narrative = self
            .engine
            .generate(&parse_table(table))
            .map_err(|e| JsError::new(&format!("Narration error: {e}")))?;
        serde_json::to_string(&narrative)
            .map_err(|e| JsError::new(&format!("Serialization error: {e}")))
    }

    /// The bundled sample table for this domain, if any.
    pub fn sample(&self) -> String {
        sample_for(&self.domain).unwrap_or_default().to_string()
    }

    /// Return a JSON description of the current domain.
    pub fn get_domain(&self) -> Result<String, JsError> {
        let info = DomainInfo {
            entity: self.engine.codebook().entity.clone(),
            channels: self.engine.codebook().channels.clone(),
            regimes: self.engine.story().regimes.clone(),
        };
        serde_json::to_string(&info)
            .map_err(|e| JsError::new(&format!("Serialization error: {e}")))
    }

    /// Return JSON array of built-in domain names.
    pub fn available_domains() -> String {
        let names: Vec<String> = CodebookRegistry::reference()
            .map(|r| r.entities().into_iter().map(str::to_string).collect())
            .unwrap_or_default();
        serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string())
    }
}
