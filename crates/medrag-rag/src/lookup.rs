//! Structured lookups: a domain key turned into query text and the
//! collections worth searching. Metadata filtering is left to the caller.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// An anatomical structure, e.g. "left ventricle".
    Structure(String),
    Symptom(String),
    Lab { name: String, value: Option<String> },
    FreeText(String),
}

impl Lookup {
    pub fn query_text(&self) -> String {
        match self {
            Lookup::Structure(name) => format!("anatomy, structure and function of {}", name.trim()),
            Lookup::Symptom(symptom) => format!("causes, mechanisms and evaluation of {}", symptom.trim()),
            Lookup::Lab { name, value: Some(value) } => {
                format!("what the {} lab test measures and what {} means", name.trim(), value.trim())
            }
            Lookup::Lab { name, value: None } => {
                format!("what the {} lab test measures and what abnormal results mean", name.trim())
            }
            Lookup::FreeText(text) => text.trim().to_string(),
        }
    }

    /// Preferred collections in search order; empty means "all configured".
    pub fn preferred_collections(&self) -> &'static [&'static str] {
        match self {
            Lookup::Structure(_) => &["anatomy", "physiology"],
            Lookup::Symptom(_) => &["pathology", "physiology"],
            Lookup::Lab { .. } => &["physiology", "pathology"],
            Lookup::FreeText(_) => &[],
        }
    }
}
