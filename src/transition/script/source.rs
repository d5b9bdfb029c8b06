//! Animation script source
//!
//! A script is a TOML table whose entries are, in order, the script's
//! variables. Order matters: variables are compiled in source order, and
//! error messages refer to the source line of the offending entry.
//!
//! ```toml
//! opacity = { duration = 0.2, start = 0, end = "window-raw-opacity" }
//! blur-opacity = "opacity"
//! ```

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use toml::Spanned;

use super::ScriptError;

/// One variable definition: a number, an expression string, or a table
/// describing a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: toml::Value,
    /// 1-based source line, 0 when unknown.
    pub line: usize,
    span: Option<Range<usize>>,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            line: 0,
            span: None,
        }
    }
}

/// Ordered set of variables making up one animation script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptSource {
    pub variables: Vec<Variable>,
    /// 1-based line the script is defined at, 0 for a whole document.
    pub line: usize,
}

impl ScriptSource {
    pub fn new(variables: Vec<Variable>) -> Self {
        Self { variables, line: 0 }
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Fills in line numbers from the text this source was deserialized
    /// from. Only meaningful when `text` is the exact document handed to
    /// the TOML deserializer.
    pub fn locate(&mut self, text: &str) {
        let mut first = None;
        for var in &mut self.variables {
            if let Some(span) = &var.span {
                var.line = line_of(text, span.start);
                first = Some(first.map_or(var.line, |l: usize| l.min(var.line)));
            }
        }
        if self.line == 0 {
            if let Some(first) = first {
                // Variables of an inline or nested table start on the
                // line that defines the script.
                self.line = first;
            }
        }
    }
}

impl FromStr for ScriptSource {
    type Err = ScriptError;

    /// Parses a standalone script document.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut source: ScriptSource = toml::from_str(text)?;
        source.locate(text);
        source.line = 0;
        Ok(source)
    }
}

/// Converts a byte offset into a 1-based line number.
pub(crate) fn line_of(text: &str, offset: usize) -> usize {
    let end = offset.min(text.len());
    text.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}

impl<'de> Deserialize<'de> for ScriptSource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SourceVisitor;

        impl<'de> Visitor<'de> for SourceVisitor {
            type Value = ScriptSource;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a table of animation script variables")
            }

            fn visit_map<A>(self, mut map: A) -> Result<ScriptSource, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut variables = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, value)) = map.next_entry::<String, Spanned<toml::Value>>()? {
                    let span = value.span();
                    variables.push(Variable {
                        name,
                        value: value.into_inner(),
                        line: 0,
                        span: Some(span),
                    });
                }
                Ok(ScriptSource { variables, line: 0 })
            }
        }

        deserializer.deserialize_map(SourceVisitor)
    }
}

impl Serialize for ScriptSource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.variables.len()))?;
        for var in &self.variables {
            map.serialize_entry(&var.name, &var.value)?;
        }
        map.end()
    }
}
