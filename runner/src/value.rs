use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::Serialize;
use serde::Serializer;

const BYTE_ORDER_MARK: char = '\u{feff}';

/// A single value threaded between hooks.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Binary(Bytes),
    Json(serde_json::Value),
}

/// Values passed between hooks. `None` marks a slot the hook left undefined.
pub type Args = Vec<Option<Value>>;

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(value))
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Text(text) => serializer.serialize_str(text),
            Self::Binary(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            Self::Json(value) => value.serialize(serializer),
        }
    }
}

/// Decodes bytes as UTF-8, dropping a leading byte order mark.
pub fn utf8_to_string(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    match text.strip_prefix(BYTE_ORDER_MARK) {
        Some(stripped) => stripped.to_string(),
        None => text.into_owned(),
    }
}

/// Brings the first argument in line with what the next hook expects: text
/// hooks see decoded strings, raw hooks see bytes.
pub fn convert_args(args: &mut [Option<Value>], raw: bool) {
    let Some(first) = args.first_mut() else {
        return;
    };
    let converted = match first.as_ref() {
        Some(Value::Binary(bytes)) if !raw => Value::Text(utf8_to_string(bytes)),
        Some(Value::Text(text)) if raw => Value::Binary(Bytes::copy_from_slice(text.as_bytes())),
        _ => return,
    };
    *first = Some(converted);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn text_mode_decodes_and_strips_bom() {
        let mut args = vec![Some(Value::Binary(Bytes::from_static(b"\xef\xbb\xbfhi")))];
        convert_args(&mut args, false);
        assert_eq!(args, vec![Some(Value::Text("hi".to_string()))]);
    }

    #[test]
    fn raw_mode_encodes_text() {
        let mut args = vec![Some(Value::from("hé")), Some(Value::Null)];
        convert_args(&mut args, true);
        assert_eq!(
            args,
            vec![
                Some(Value::Binary(Bytes::from("hé".as_bytes().to_vec()))),
                Some(Value::Null)
            ]
        );
    }

    #[test]
    fn conversion_is_a_no_op_when_already_matching() {
        let mut text = vec![Some(Value::from("\u{feff}kept"))];
        convert_args(&mut text, false);
        assert_eq!(text, vec![Some(Value::from("\u{feff}kept"))]);

        let mut binary = vec![Some(Value::Binary(Bytes::from_static(b"\x00\x01")))];
        convert_args(&mut binary, true);
        assert_eq!(binary, vec![Some(Value::Binary(Bytes::from_static(b"\x00\x01")))]);

        let mut other = vec![None, Some(Value::from("x"))];
        convert_args(&mut other, true);
        assert_eq!(other, vec![None, Some(Value::from("x"))]);
    }

    #[test]
    fn serializes_binary_as_base64() {
        let value = Value::Binary(Bytes::from_static(b"hi"));
        assert_eq!(serde_json::to_string(&value).unwrap(), "\"aGk=\"");
        assert_eq!(serde_json::to_string(&Value::Null).unwrap(), "null");
    }
}
