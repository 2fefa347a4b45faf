use std::fmt;

use mlua::Value;

/// A value that crossed out of the interpreter.
///
/// Tables and functions are kept opaque; only their kind survives.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    Table,
    Function,
    Other(&'static str),
}

impl ScriptValue {
    #[must_use]
    pub fn from_lua(value: &Value) -> Self {
        match value {
            Value::Nil => Self::Nil,
            Value::Boolean(flag) => Self::Boolean(*flag),
            Value::Integer(int) => Self::Integer(*int),
            Value::Number(num) => Self::Number(*num),
            Value::String(text) => Self::Text(String::from(text.to_string_lossy())),
            Value::Table(_) => Self::Table,
            Value::Function(_) => Self::Function,
            other => Self::Other(other.type_name()),
        }
    }

    /// Numeric view; integers widen to `f64`. Text never counts as a number.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Integer(int) => Some(*int as f64),
            Self::Number(num) => Some(*num),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_number(&self) -> bool {
        self.as_number().is_some()
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) | Self::Number(_) => "number",
            Self::Text(_) => "string",
            Self::Table => "table",
            Self::Function => "function",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Boolean(flag) => write!(f, "{flag}"),
            Self::Integer(int) => write!(f, "{int}"),
            Self::Number(num) if num.is_finite() && num.fract() == 0.0 => write!(f, "{num:.1}"),
            Self::Number(num) => write!(f, "{num}"),
            Self::Text(text) => write!(f, "{text:?}"),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_keep_lua_flavour_in_display() {
        assert_eq!(ScriptValue::Integer(5).to_string(), "5");
        assert_eq!(ScriptValue::Number(5.0).to_string(), "5.0");
        assert_eq!(ScriptValue::Number(2.5).to_string(), "2.5");
        assert_eq!(ScriptValue::Text("5".into()).to_string(), "\"5\"");
        assert_eq!(ScriptValue::Table.to_string(), "<table>");
    }

    #[test]
    fn text_is_not_numeric() {
        assert_eq!(ScriptValue::Integer(3).as_number(), Some(3.0));
        assert!(!ScriptValue::Text("3".into()).is_number());
        assert!(!ScriptValue::Nil.is_number());
    }
}
