use serde::{Deserialize, Serialize};

/// Shape of a declared parameter node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// A leaf (no children) or a nested object (several children).
    #[default]
    Value,
    /// A repeated element; exactly one child definition describes the element.
    Array,
}

/// One node of a tool's recursive parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDefinition {
    pub name: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub kind: ParamKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ParamDefinition>,
    /// Human-readable hint for the prompt. Not used by the engine.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ParamDefinition {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
            kind: ParamKind::Value,
            children: vec![],
            description: String::new(),
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            optional: true,
            ..Self::required(name)
        }
    }

    /// Turn this node into a list of `element`.
    pub fn array_of(mut self, element: ParamDefinition) -> Self {
        self.kind = ParamKind::Array;
        self.children = vec![element];
        self
    }

    /// Turn this node into an object with the given fields.
    pub fn object(mut self, fields: Vec<ParamDefinition>) -> Self {
        self.kind = ParamKind::Value;
        self.children = fields;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_array(&self) -> bool {
        self.kind == ParamKind::Array
    }

    /// Visit this node and every descendant, depth first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a ParamDefinition)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// Description of a tool callable through `<name>...</name>` markup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    /// One-line summary for humans and the prompt.
    pub description: String,
    /// Example markup shown to the model.
    #[serde(default)]
    pub usage: String,
    #[serde(default)]
    pub params: Vec<ParamDefinition>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            usage: String::new(),
            params: vec![],
        }
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    pub fn with_params(mut self, params: Vec<ParamDefinition>) -> Self {
        self.params = params;
        self
    }

    /// The literal opening tag the stream parser watches for.
    pub fn start_label(&self) -> String {
        format!("<{}>", self.name)
    }

    /// Every parameter name declared anywhere in the schema tree.
    pub fn param_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for param in &self.params {
            param.walk(&mut |p| names.push(p.name.as_str()));
        }
        names
    }
}
