//! Static agent identity

use serde::{Deserialize, Serialize};

/// Capability flags an agent advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default = "default_true")]
    pub streaming: bool,
    #[serde(default)]
    pub multimodal: bool,
    #[serde(default)]
    pub tools: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            streaming: true,
            multimodal: false,
            tools: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A skill listed on the agent card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// One agent of the fleet. Built from configuration at startup and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique name, also used in delegation directives
    pub name: String,
    /// Port the agent listens on
    pub port: u16,
    /// Model identifier passed to the backend
    pub model: String,
    /// Role description injected into the system prompt
    pub role: String,
    /// Display color used by operator tooling
    #[serde(default = "default_color")]
    pub color: String,
    /// Human-readable name (defaults to the capitalized name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Explicit base URL, overriding `http://<sibling_host>:<port>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub skills: Vec<Skill>,
}

fn default_color() -> String {
    "white".to_string()
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        port: u16,
        model: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            port,
            model: model.into(),
            role: role.into(),
            color: default_color(),
            display_name: None,
            url: None,
            capabilities: Capabilities::default(),
            skills: Vec::new(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn multimodal(mut self) -> Self {
        self.capabilities.multimodal = true;
        self
    }

    pub fn display_name(&self) -> String {
        if let Some(name) = &self.display_name {
            return name.clone();
        }
        let mut chars = self.name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// Parameter size encoded in the model tag, e.g. `235b` for
    /// `qwen3-vl:235b-cloud`. Tags without a leading digit carry none.
    pub fn model_parameters(&self) -> Option<String> {
        let (_, tag) = self.model.split_once(':')?;
        let size = tag.split('-').next()?;
        if size.starts_with(|c: char| c.is_ascii_digit()) {
            Some(size.to_string())
        } else {
            None
        }
    }

    /// Skills to advertise; an agent without configured skills advertises its role
    pub fn advertised_skills(&self) -> Vec<Skill> {
        if !self.skills.is_empty() {
            return self.skills.clone();
        }
        vec![Skill {
            id: self.name.clone(),
            name: self.display_name(),
            description: self.role.clone(),
            tags: Vec::new(),
        }]
    }
}
