//! Workflow data types shared by WDL and CWL
//!
//! A [`TypeSpec`] is a recursive descriptor: atomic kinds such as `Int`,
//! `File` and `String`, plus the parametric kinds `Array[T]` and `Map[K,V]`.
//! Optionality is a flag on every node rather than a wrapper, so `Array[File?]?`
//! is an optional array whose items are optional files.
//!
//! Mapping rules between the two languages:
//! 1. CWL `long` reads as `Int` and `double` as `Float`; the reverse direction
//!    always writes `int`/`float`
//! 2. CWL `["null", T]` is `T?`; null is written first
//! 3. CWL has no map type, so `Map[K,V]` and `Object` both write as `Any`
//! 4. Tokens neither language table knows fall back to `String` and are
//!    reported as a [`TypeFallback`]

use crate::error::{ConvertError, Result, SourcePosition};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, multispace0},
    combinator::{all_consuming, opt, recognize},
    multi::{many0, separated_list1},
    sequence::{delimited, pair},
    IResult,
};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value as YamlValue};
use std::fmt;
use tracing::warn;

/// The kind of a workflow value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    String,
    Int,
    Float,
    Boolean,
    /// Filesystem path
    File,
    /// Directory path
    Directory,
    /// Array type, parameterized by item type
    Array(Box<TypeSpec>),
    /// Map type, parameterized by key and value types
    Map {
        key: Box<TypeSpec>,
        value: Box<TypeSpec>,
    },
    /// Untyped object / CWL `Any`
    Object,
}

/// A type descriptor with its optional flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSpec {
    pub kind: DataType,
    #[serde(default)]
    pub optional: bool,
}

/// The language a type token was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    Wdl,
    Cwl,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Wdl => write!(f, "WDL"),
            Language::Cwl => write!(f, "CWL"),
        }
    }
}

/// A type token that had no mapping and was read as `String`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeFallback {
    pub language: Language,
    pub token: String,
}

impl fmt::Display for TypeFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} type `{}` mapped to String", self.language, self.token)
    }
}

/// A converted value together with the type fallbacks taken while building it.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapped<T> {
    pub value: T,
    pub fallbacks: Vec<TypeFallback>,
}

impl<T> Mapped<T> {
    pub fn exact(value: T) -> Self {
        Self {
            value,
            fallbacks: Vec::new(),
        }
    }

    /// Move the fallbacks into `sink` and return the value.
    pub fn collect_into(self, sink: &mut Vec<TypeFallback>) -> T {
        sink.extend(self.fallbacks);
        self.value
    }

    pub fn is_exact(&self) -> bool {
        self.fallbacks.is_empty()
    }
}

impl TypeSpec {
    pub fn new(kind: DataType, optional: bool) -> Self {
        Self { kind, optional }
    }

    pub fn string() -> Self {
        Self::new(DataType::String, false)
    }

    pub fn int() -> Self {
        Self::new(DataType::Int, false)
    }

    pub fn float() -> Self {
        Self::new(DataType::Float, false)
    }

    pub fn boolean() -> Self {
        Self::new(DataType::Boolean, false)
    }

    pub fn file() -> Self {
        Self::new(DataType::File, false)
    }

    pub fn directory() -> Self {
        Self::new(DataType::Directory, false)
    }

    pub fn object() -> Self {
        Self::new(DataType::Object, false)
    }

    pub fn array(item: TypeSpec) -> Self {
        Self::new(DataType::Array(Box::new(item)), false)
    }

    pub fn map(key: TypeSpec, value: TypeSpec) -> Self {
        Self::new(
            DataType::Map {
                key: Box::new(key),
                value: Box::new(value),
            },
            false,
        )
    }

    /// Create a copy of this type with a different optional setting.
    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn item_type(&self) -> Option<&TypeSpec> {
        match &self.kind {
            DataType::Array(item) => Some(item),
            _ => None,
        }
    }

    pub fn key_type(&self) -> Option<&TypeSpec> {
        match &self.kind {
            DataType::Map { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn value_type(&self) -> Option<&TypeSpec> {
        match &self.kind {
            DataType::Map { value, .. } => Some(value),
            _ => None,
        }
    }

    // ----- WDL -----

    /// Parse WDL type syntax such as `Array[File]?` or `Map[String,Int]`.
    pub fn parse_wdl(text: &str) -> Result<Mapped<TypeSpec>> {
        match all_consuming(delimited(multispace0, raw_type, multispace0))(text) {
            Ok((_, raw)) => {
                let mut fallbacks = Vec::new();
                let value = raw.into_type_spec(&mut fallbacks);
                Ok(Mapped { value, fallbacks })
            }
            Err(e) => {
                let rest = match &e {
                    nom::Err::Error(inner) | nom::Err::Failure(inner) => inner.input,
                    nom::Err::Incomplete(_) => "",
                };
                let offset = text.len().saturating_sub(rest.len());
                Err(ConvertError::syntax_error(
                    SourcePosition::from_offset("", text, offset),
                    format!("Invalid WDL type: {}", text.trim()),
                ))
            }
        }
    }

    /// Render as WDL type syntax.
    pub fn to_wdl(&self) -> String {
        self.to_string()
    }

    // ----- CWL -----

    /// Read a CWL type, which may be a name, a union list or an array schema.
    pub fn from_cwl(value: &YamlValue) -> Mapped<TypeSpec> {
        let mut fallbacks = Vec::new();
        let value = cwl_type(value, &mut fallbacks);
        Mapped { value, fallbacks }
    }

    /// Render as a CWL type: a name, `["null", T]` or `{type: array, items: T}`.
    pub fn to_cwl(&self) -> YamlValue {
        let base = match &self.kind {
            DataType::String => YamlValue::from("string"),
            DataType::Int => YamlValue::from("int"),
            DataType::Float => YamlValue::from("float"),
            DataType::Boolean => YamlValue::from("boolean"),
            DataType::File => YamlValue::from("File"),
            DataType::Directory => YamlValue::from("Directory"),
            DataType::Array(item) => {
                let mut schema = Mapping::new();
                schema.insert("type".into(), "array".into());
                schema.insert("items".into(), item.to_cwl());
                YamlValue::Mapping(schema)
            }
            DataType::Map { .. } | DataType::Object => YamlValue::from("Any"),
        };
        if self.optional {
            YamlValue::Sequence(vec![YamlValue::from("null"), base])
        } else {
            base
        }
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DataType::String => write!(f, "String")?,
            DataType::Int => write!(f, "Int")?,
            DataType::Float => write!(f, "Float")?,
            DataType::Boolean => write!(f, "Boolean")?,
            DataType::File => write!(f, "File")?,
            DataType::Directory => write!(f, "Directory")?,
            DataType::Object => write!(f, "Object")?,
            DataType::Array(item) => write!(f, "Array[{}]", item)?,
            DataType::Map { key, value } => write!(f, "Map[{},{}]", key, value)?,
        }
        if self.optional {
            write!(f, "?")?;
        }
        Ok(())
    }
}

/// Unresolved WDL type as written in source.
#[derive(Debug)]
struct RawType<'a> {
    name: &'a str,
    params: Vec<RawType<'a>>,
    optional: bool,
}

impl<'a> RawType<'a> {
    fn into_type_spec(self, fallbacks: &mut Vec<TypeFallback>) -> TypeSpec {
        let token = self.to_string();
        let optional = self.optional;
        let mut params = self.params.into_iter();
        let kind = match (self.name, params.len()) {
            ("String", 0) => DataType::String,
            ("Int", 0) => DataType::Int,
            ("Float", 0) => DataType::Float,
            ("Boolean", 0) => DataType::Boolean,
            ("File", 0) => DataType::File,
            ("Directory", 0) => DataType::Directory,
            ("Object", 0) => DataType::Object,
            ("Array", 1) => match params.next() {
                Some(item) => DataType::Array(Box::new(item.into_type_spec(fallbacks))),
                None => DataType::String,
            },
            ("Map", 2) => match (params.next(), params.next()) {
                (Some(key), Some(value)) => DataType::Map {
                    key: Box::new(key.into_type_spec(fallbacks)),
                    value: Box::new(value.into_type_spec(fallbacks)),
                },
                _ => DataType::String,
            },
            _ => {
                warn!(token = %token, "unrecognized WDL type, using String");
                fallbacks.push(TypeFallback {
                    language: Language::Wdl,
                    token,
                });
                DataType::String
            }
        };
        TypeSpec::new(kind, optional)
    }
}

impl fmt::Display for RawType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
            write!(f, "[{}]", params.join(","))?;
        }
        if self.optional {
            write!(f, "?")?;
        }
        Ok(())
    }
}

pub(crate) fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn raw_type(input: &str) -> IResult<&str, RawType<'_>> {
    let (input, name) = identifier(input)?;
    let (input, params) = opt(delimited(
        pair(multispace0, char('[')),
        separated_list1(char(','), delimited(multispace0, raw_type, multispace0)),
        char(']'),
    ))(input)?;
    // Array[T]+ (non-empty) has no IR counterpart
    let (input, _nonempty) = opt(char('+'))(input)?;
    let (input, optional) = opt(char('?'))(input)?;
    Ok((
        input,
        RawType {
            name,
            params: params.unwrap_or_default(),
            optional: optional.is_some(),
        },
    ))
}

fn cwl_fallback(token: String, optional: bool, fallbacks: &mut Vec<TypeFallback>) -> TypeSpec {
    warn!(token = %token, "unrecognized CWL type, using String");
    fallbacks.push(TypeFallback {
        language: Language::Cwl,
        token,
    });
    TypeSpec::string().with_optional(optional)
}

fn cwl_type_name(name: &str, fallbacks: &mut Vec<TypeFallback>) -> TypeSpec {
    if let Some(inner) = name.strip_suffix('?') {
        let spec = cwl_type_name(inner, fallbacks);
        return spec.with_optional(true);
    }
    if let Some(inner) = name.strip_suffix("[]") {
        return TypeSpec::array(cwl_type_name(inner, fallbacks));
    }
    match name {
        "string" => TypeSpec::string(),
        "int" | "long" => TypeSpec::int(),
        "float" | "double" => TypeSpec::float(),
        "boolean" => TypeSpec::boolean(),
        "File" => TypeSpec::file(),
        "Directory" => TypeSpec::directory(),
        "Any" => TypeSpec::object(),
        other => cwl_fallback(other.to_string(), false, fallbacks),
    }
}

fn cwl_type(value: &YamlValue, fallbacks: &mut Vec<TypeFallback>) -> TypeSpec {
    match value {
        YamlValue::String(name) => cwl_type_name(name, fallbacks),
        YamlValue::Sequence(members) => {
            let is_null = |m: &YamlValue| m.as_str() == Some("null") || m.is_null();
            let nullable = members.iter().any(is_null);
            let rest: Vec<&YamlValue> = members.iter().filter(|m| !is_null(m)).collect();
            if rest.len() == 1 {
                let spec = cwl_type(rest[0], fallbacks);
                let optional = nullable || spec.optional;
                spec.with_optional(optional)
            } else {
                let token = serde_yaml::to_string(value)
                    .map(|s| s.trim().replace('\n', " "))
                    .unwrap_or_else(|_| "union".to_string());
                cwl_fallback(token, nullable, fallbacks)
            }
        }
        YamlValue::Mapping(schema) => match schema.get("type").and_then(YamlValue::as_str) {
            Some("array") => match schema.get("items") {
                Some(items) => TypeSpec::array(cwl_type(items, fallbacks)),
                None => TypeSpec::array(cwl_fallback(
                    "array without items".to_string(),
                    false,
                    fallbacks,
                )),
            },
            Some(other) => cwl_fallback(other.to_string(), false, fallbacks),
            None => cwl_fallback("schema without type".to_string(), false, fallbacks),
        },
        other => cwl_fallback(format!("{:?}", other), false, fallbacks),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> YamlValue {
        serde_yaml::from_str(text).unwrap()
    }

    fn simple_types() -> Vec<TypeSpec> {
        let atoms = vec![
            TypeSpec::string(),
            TypeSpec::int(),
            TypeSpec::float(),
            TypeSpec::boolean(),
            TypeSpec::file(),
            TypeSpec::directory(),
        ];
        let mut all = Vec::new();
        for atom in atoms {
            for optional in [false, true] {
                all.push(atom.clone().with_optional(optional));
                all.push(TypeSpec::array(atom.clone()).with_optional(optional));
            }
        }
        all
    }

    #[test]
    fn test_type_display() {
        assert_eq!(TypeSpec::int().to_string(), "Int");
        assert_eq!(TypeSpec::string().with_optional(true).to_string(), "String?");
        assert_eq!(TypeSpec::array(TypeSpec::file()).to_string(), "Array[File]");
        assert_eq!(
            TypeSpec::map(TypeSpec::string(), TypeSpec::float())
                .with_optional(true)
                .to_string(),
            "Map[String,Float]?"
        );
    }

    #[test]
    fn test_wdl_round_trip() {
        for spec in simple_types() {
            let parsed = TypeSpec::parse_wdl(&spec.to_wdl()).unwrap();
            assert!(parsed.is_exact());
            assert_eq!(parsed.value, spec, "round trip of {}", spec);
        }
    }

    #[test]
    fn test_cwl_round_trip() {
        for spec in simple_types() {
            let parsed = TypeSpec::from_cwl(&spec.to_cwl());
            assert!(parsed.is_exact());
            assert_eq!(parsed.value, spec, "round trip of {}", spec);
        }
    }

    #[test]
    fn test_parse_wdl_nested() {
        let parsed = TypeSpec::parse_wdl("Map[String, Array[File?]]?").unwrap().value;
        assert!(parsed.is_optional());
        assert_eq!(parsed.key_type(), Some(&TypeSpec::string()));
        let items = parsed.value_type().and_then(|v| v.item_type()).unwrap();
        assert_eq!(items, &TypeSpec::file().with_optional(true));
    }

    #[test]
    fn test_parse_wdl_nonempty_marker() {
        let parsed = TypeSpec::parse_wdl("Array[Int]+").unwrap().value;
        assert_eq!(parsed, TypeSpec::array(TypeSpec::int()));
    }

    #[test]
    fn test_parse_wdl_unknown_falls_back() {
        let parsed = TypeSpec::parse_wdl("Pair[Int,String]").unwrap();
        assert_eq!(parsed.value, TypeSpec::string());
        assert_eq!(parsed.fallbacks.len(), 1);
        assert_eq!(parsed.fallbacks[0].language, Language::Wdl);
        assert_eq!(parsed.fallbacks[0].token, "Pair[Int,String]");

        let parsed = TypeSpec::parse_wdl("Array[SampleInfo]?").unwrap();
        assert_eq!(
            parsed.value,
            TypeSpec::array(TypeSpec::string()).with_optional(true)
        );
        assert_eq!(parsed.fallbacks[0].token, "SampleInfo");
    }

    #[test]
    fn test_parse_wdl_syntax_error() {
        assert!(TypeSpec::parse_wdl("Array[File").is_err());
        assert!(TypeSpec::parse_wdl("").is_err());
        assert!(TypeSpec::parse_wdl("File name").is_err());
    }

    #[test]
    fn test_cwl_array_rendering() {
        let rendered = TypeSpec::array(TypeSpec::file()).to_cwl();
        assert_eq!(rendered, yaml("{type: array, items: File}"));
    }

    #[test]
    fn test_cwl_optional_rendering() {
        let rendered = TypeSpec::string().with_optional(true).to_cwl();
        let members = rendered.as_sequence().unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0], YamlValue::from("null"));
        assert_eq!(members[1], YamlValue::from("string"));
    }

    #[test]
    fn test_cwl_numeric_collapse() {
        assert_eq!(TypeSpec::from_cwl(&yaml("long")).value, TypeSpec::int());
        assert_eq!(TypeSpec::from_cwl(&yaml("double")).value, TypeSpec::float());
        assert_eq!(TypeSpec::int().to_cwl(), YamlValue::from("int"));
        assert_eq!(TypeSpec::float().to_cwl(), YamlValue::from("float"));
    }

    #[test]
    fn test_cwl_shorthand() {
        assert_eq!(
            TypeSpec::from_cwl(&yaml("File[]")).value,
            TypeSpec::array(TypeSpec::file())
        );
        assert_eq!(
            TypeSpec::from_cwl(&yaml("string?")).value,
            TypeSpec::string().with_optional(true)
        );
        assert_eq!(
            TypeSpec::from_cwl(&yaml("[File, 'null']")).value,
            TypeSpec::file().with_optional(true)
        );
    }

    #[test]
    fn test_cwl_unknown_falls_back() {
        let parsed = TypeSpec::from_cwl(&yaml("stdout"));
        assert_eq!(parsed.value, TypeSpec::string());
        assert_eq!(parsed.fallbacks.len(), 1);
        assert_eq!(parsed.fallbacks[0].token, "stdout");
        assert_eq!(parsed.fallbacks[0].language, Language::Cwl);

        let parsed = TypeSpec::from_cwl(&yaml("{type: record, fields: []}"));
        assert_eq!(parsed.value, TypeSpec::string());
        assert_eq!(parsed.fallbacks[0].token, "record");

        let parsed = TypeSpec::from_cwl(&yaml("['null', int, string]"));
        assert_eq!(parsed.value, TypeSpec::string().with_optional(true));
        assert_eq!(parsed.fallbacks.len(), 1);
    }

    #[test]
    fn test_map_and_object_write_any() {
        let map = TypeSpec::map(TypeSpec::string(), TypeSpec::int());
        assert_eq!(map.to_cwl(), YamlValue::from("Any"));
        assert_eq!(TypeSpec::from_cwl(&map.to_cwl()).value, TypeSpec::object());
    }

    #[test]
    fn test_collect_into() {
        let mut sink = Vec::new();
        let spec = TypeSpec::from_cwl(&yaml("enum_thing")).collect_into(&mut sink);
        assert_eq!(spec, TypeSpec::string());
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].to_string(), "CWL type `enum_thing` mapped to String");
    }
}
