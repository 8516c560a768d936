//! # Field Schema
//!
//! Per-action field declarations, compiled once when the action is registered.
//!
//! A field is declared either with a pipe-delimited rule string such as
//! `"float|required"` or with the structured [`FieldDecl`] builder when it needs a
//! custom serializer, deserializer or converter.
//!
//! ## Rule Grammar
//! The first token naming a type sets the field type:
//! `int|integer|float|number|numeric|string|bool|boolean|null|array|object`.
//! All other tokens are validators, applied in declaration order:
//! - `required`: reject null
//! - `trim`, `strtolower`, `strtoupper`: normalise strings in place
//! - `nullable`: always passes
//!
//! A token may carry an argument (`rule:arg`); only its head is matched. Unknown
//! tokens fail compilation with [`ProtocolError::UnknownRule`].
//!
//! ## Coercion
//! After validation the value is coerced to the field type. Null passes through
//! every type unchanged, so an unset nullable field serializes to null. Composite
//! values are never probed for scalar fields: they need an explicit
//! [`Converter::ToPrimitive`], otherwise coercion fails. Coercion is idempotent.

use crate::core::packet::PacketInstance;
use crate::core::value::FieldValue;
use crate::error::{ProtocolError, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Async deserializer run on the raw inbound value instead of [`FieldSpec::transform`]
pub type Deserializer =
    Arc<dyn for<'a> Fn(Value, &'a PacketInstance) -> BoxFuture<'a, Result<Value>> + Send + Sync>;

/// Async serializer run on the stored value when the packet is transformed
pub type Serializer = Arc<
    dyn for<'a> Fn(&'a FieldValue, &'a PacketInstance) -> BoxFuture<'a, Result<Value>>
        + Send
        + Sync,
>;

type ConvertFn = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Declared field type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    Float,
    Number,
    String,
    Bool,
    Null,
    Array,
    Object,
}

impl FieldType {
    /// Match a type token, including its aliases
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "int" | "integer" => Some(FieldType::Int),
            "float" => Some(FieldType::Float),
            "number" | "numeric" => Some(FieldType::Number),
            "string" => Some(FieldType::String),
            "bool" | "boolean" => Some(FieldType::Bool),
            "null" => Some(FieldType::Null),
            "array" => Some(FieldType::Array),
            "object" => Some(FieldType::Object),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Number => "number",
            FieldType::String => "string",
            FieldType::Bool => "bool",
            FieldType::Null => "null",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }

    fn is_scalar(self) -> bool {
        matches!(
            self,
            FieldType::Int | FieldType::Float | FieldType::Number | FieldType::String | FieldType::Bool
        )
    }

    fn is_map(self) -> bool {
        matches!(self, FieldType::Array | FieldType::Object)
    }
}

/// Validator applied before coercion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Required,
    Trim,
    Lowercase,
    Uppercase,
    Nullable,
}

impl Rule {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "required" => Some(Rule::Required),
            "trim" => Some(Rule::Trim),
            "strtolower" => Some(Rule::Lowercase),
            "strtoupper" => Some(Rule::Uppercase),
            "nullable" => Some(Rule::Nullable),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Rule::Required => "required",
            Rule::Trim => "trim",
            Rule::Lowercase => "strtolower",
            Rule::Uppercase => "strtoupper",
            Rule::Nullable => "nullable",
        }
    }

    /// Returns false when the value is rejected
    fn apply(self, value: &mut Value) -> bool {
        match self {
            Rule::Required => !value.is_null(),
            Rule::Trim => {
                if let Value::String(s) = value {
                    let trimmed = s.trim();
                    if trimmed.len() != s.len() {
                        *s = trimmed.to_string();
                    }
                }
                true
            }
            Rule::Lowercase => {
                if let Value::String(s) = value {
                    *s = s.to_lowercase();
                }
                true
            }
            Rule::Uppercase => {
                if let Value::String(s) = value {
                    *s = s.to_uppercase();
                }
                true
            }
            Rule::Nullable => true,
        }
    }
}

/// Explicit conversion for values that do not already fit the field type.
#[derive(Clone)]
pub enum Converter {
    /// Turns a composite value into a scalar; only valid on scalar-typed fields
    ToPrimitive(ConvertFn),
    /// Turns a scalar into an array or object; only valid on array/object fields
    ToMap(ConvertFn),
}

impl Converter {
    pub fn to_primitive<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        Converter::ToPrimitive(Arc::new(f))
    }

    pub fn to_map<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        Converter::ToMap(Arc::new(f))
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Converter::ToPrimitive(_) => f.write_str("ToPrimitive(..)"),
            Converter::ToMap(_) => f.write_str("ToMap(..)"),
        }
    }
}

/// Uncompiled field declaration
pub struct FieldDecl {
    name: String,
    ty: Option<FieldType>,
    tokens: Vec<String>,
    converter: Option<Converter>,
    serializer: Option<Serializer>,
    deserializer: Option<Deserializer>,
}

impl FieldDecl {
    /// Declare a field from a pipe-delimited rule string
    pub fn new(name: impl Into<String>, rules: &str) -> Self {
        Self {
            name: name.into(),
            ty: None,
            tokens: rules.split('|').map(str::to_string).collect(),
            converter: None,
            serializer: None,
            deserializer: None,
        }
    }

    /// Declare a field with an explicit type
    pub fn typed(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty: Some(ty),
            tokens: Vec::new(),
            converter: None,
            serializer: None,
            deserializer: None,
        }
    }

    pub fn rule(mut self, token: impl Into<String>) -> Self {
        self.tokens.push(token.into());
        self
    }

    pub fn convert(mut self, converter: Converter) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn serialize_with<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a FieldValue, &'a PacketInstance) -> BoxFuture<'a, Result<Value>>
            + Send
            + Sync
            + 'static,
    {
        self.serializer = Some(Arc::new(f));
        self
    }

    pub fn deserialize_with<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(Value, &'a PacketInstance) -> BoxFuture<'a, Result<Value>>
            + Send
            + Sync
            + 'static,
    {
        self.deserializer = Some(Arc::new(f));
        self
    }

    fn compile(self) -> Result<FieldSpec> {
        let mut ty = self.ty;
        let mut rules = Vec::new();

        for token in &self.tokens {
            let head = token.split(':').next().unwrap_or_default().trim().to_lowercase();
            if head.is_empty() {
                continue;
            }
            if ty.is_none() {
                if let Some(found) = FieldType::from_token(&head) {
                    ty = Some(found);
                    continue;
                }
            }
            match Rule::from_token(&head) {
                Some(rule) => rules.push(rule),
                None => {
                    return Err(ProtocolError::UnknownRule {
                        field: self.name.clone(),
                        rule: head,
                    })
                }
            }
        }

        match (&self.converter, ty) {
            (None, _) => {}
            (Some(Converter::ToPrimitive(_)), Some(t)) if t.is_scalar() => {}
            (Some(Converter::ToMap(_)), Some(t)) if t.is_map() => {}
            (Some(converter), t) => {
                return Err(ProtocolError::InvalidSchema {
                    field: self.name,
                    reason: format!(
                        "{converter:?} converter is not valid for type {}",
                        t.map(FieldType::name).unwrap_or("untyped")
                    ),
                })
            }
        }

        Ok(FieldSpec {
            name: self.name,
            ty,
            rules,
            converter: self.converter,
            serializer: self.serializer,
            deserializer: self.deserializer,
        })
    }
}

impl From<(&str, &str)> for FieldDecl {
    fn from((name, rules): (&str, &str)) -> Self {
        FieldDecl::new(name, rules)
    }
}

/// Compiled, immutable field declaration
pub struct FieldSpec {
    name: String,
    ty: Option<FieldType>,
    rules: Vec<Rule>,
    converter: Option<Converter>,
    serializer: Option<Serializer>,
    deserializer: Option<Deserializer>,
}

impl FieldSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> Option<FieldType> {
        self.ty
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn serializer(&self) -> Option<&Serializer> {
        self.serializer.as_ref()
    }

    pub fn deserializer(&self) -> Option<&Deserializer> {
        self.deserializer.as_ref()
    }

    /// Run validators in declaration order, then coerce to the field type.
    pub fn transform(&self, mut value: Value) -> Result<Value> {
        for rule in &self.rules {
            if !rule.apply(&mut value) {
                return Err(self.invalid(rule.name()));
            }
        }
        self.coerce(value)
    }

    fn invalid(&self, rule: &str) -> ProtocolError {
        ProtocolError::Validation {
            field: self.name.clone(),
            rule: rule.to_string(),
        }
    }

    fn coerce(&self, value: Value) -> Result<Value> {
        let Some(ty) = self.ty else {
            return Ok(value);
        };
        if ty == FieldType::Null || value.is_null() {
            return Ok(Value::Null);
        }

        let value = match &self.converter {
            Some(Converter::ToPrimitive(f)) if is_composite(&value) => {
                f(&value).ok_or_else(|| self.invalid(ty.name()))?
            }
            Some(Converter::ToMap(f)) if !is_composite(&value) => {
                f(&value).ok_or_else(|| self.invalid(ty.name()))?
            }
            _ => value,
        };

        let coerced = match ty {
            FieldType::Int => to_int(&value),
            FieldType::Float => to_float(&value).map(Value::from),
            FieldType::Number => match &value {
                Value::Number(_) => Some(value.clone()),
                _ => to_float(&value).map(Value::from),
            },
            FieldType::String => match &value {
                Value::String(_) => Some(value.clone()),
                Value::Number(n) => Some(Value::String(n.to_string())),
                Value::Bool(b) => Some(Value::String(b.to_string())),
                _ => None,
            },
            FieldType::Bool => match &value {
                Value::Bool(_) => Some(value.clone()),
                Value::String(s) => parse_truthy(s).map(Value::Bool),
                Value::Number(n) => n.as_f64().map(|f| Value::Bool(f != 0.0)),
                _ => None,
            },
            FieldType::Array | FieldType::Object => {
                is_composite(&value).then(|| value.clone())
            }
            FieldType::Null => Some(Value::Null),
        };

        coerced.ok_or_else(|| self.invalid(ty.name()))
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("rules", &self.rules)
            .field("converter", &self.converter)
            .field("serializer", &self.serializer.is_some())
            .field("deserializer", &self.deserializer.is_some())
            .finish()
    }
}

fn is_composite(value: &Value) -> bool {
    matches!(value, Value::Array(_) | Value::Object(_))
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Truncates toward zero
fn to_int(value: &Value) -> Option<Value> {
    if let Value::Number(n) = value {
        if n.is_i64() || n.is_u64() {
            return Some(value.clone());
        }
    }
    let f = to_float(value)?.trunc();
    if f < i64::MIN as f64 || f > i64::MAX as f64 {
        return None;
    }
    Some(Value::from(f as i64))
}

/// Permissive boolean parser; unrecognised strings yield `None`.
pub fn parse_truthy(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}

/// Ordered, compiled field map of one action type.
#[derive(Debug, Default)]
pub struct FieldSchema {
    fields: Vec<FieldSpec>,
    index: HashMap<String, usize>,
}

impl FieldSchema {
    /// Compile declarations; any unknown token or duplicate name is fatal.
    pub fn compile<I, D>(decls: I) -> Result<Self>
    where
        I: IntoIterator<Item = D>,
        D: Into<FieldDecl>,
    {
        let mut schema = FieldSchema::default();
        for decl in decls {
            let spec = decl.into().compile()?;
            if schema.index.contains_key(spec.name()) {
                return Err(ProtocolError::InvalidSchema {
                    field: spec.name,
                    reason: "declared twice".to_string(),
                });
            }
            schema.index.insert(spec.name.clone(), schema.fields.len());
            schema.fields.push(spec);
        }
        Ok(schema)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    /// Fields in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate and coerce `value` for the named field.
    pub fn transform_field(&self, name: &str, value: Value) -> Result<Value> {
        self.get(name)
            .ok_or_else(|| ProtocolError::UnknownField(name.to_string()))?
            .transform(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(decls: &[(&str, &str)]) -> FieldSchema {
        FieldSchema::compile(decls.iter().copied()).unwrap()
    }

    #[test]
    fn test_type_token_is_first_recognised() {
        let s = schema(&[("time", "float|required")]);
        let spec = s.get("time").unwrap();
        assert_eq!(spec.field_type(), Some(FieldType::Float));
        assert_eq!(spec.rules(), &[Rule::Required]);
    }

    #[test]
    fn test_rule_order_is_preserved() {
        let s = schema(&[("name", "required|trim|string|strtoupper")]);
        let spec = s.get("name").unwrap();
        assert_eq!(spec.rules(), &[Rule::Required, Rule::Trim, Rule::Uppercase]);
        assert_eq!(s.transform_field("name", json!("  abc ")).unwrap(), json!("ABC"));
    }

    #[test]
    fn test_unknown_token_fails_compile() {
        let err = FieldSchema::compile([("x", "string|bogus")]).unwrap_err();
        match err {
            ProtocolError::UnknownRule { field, rule } => {
                assert_eq!(field, "x");
                assert_eq!(rule, "bogus");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_second_type_token_is_a_rule_error() {
        assert!(FieldSchema::compile([("x", "float|string")]).is_err());
    }

    #[test]
    fn test_tokens_are_case_insensitive_with_args() {
        let s = schema(&[("x", " Integer | Required:strict ")]);
        assert_eq!(s.get("x").unwrap().field_type(), Some(FieldType::Int));
    }

    #[test]
    fn test_number_from_numeric_string_is_float() {
        let s = schema(&[("n", "number")]);
        let out = s.transform_field("n", json!("42")).unwrap();
        assert!(out.is_f64());
        assert_eq!(out.as_f64(), Some(42.0));
    }

    #[test]
    fn test_number_keeps_integers() {
        let s = schema(&[("n", "numeric")]);
        assert_eq!(s.transform_field("n", json!(7)).unwrap(), json!(7));
    }

    #[test]
    fn test_int_truncates_toward_zero() {
        let s = schema(&[("i", "int")]);
        assert_eq!(s.transform_field("i", json!("42.9")).unwrap(), json!(42));
        assert_eq!(s.transform_field("i", json!(-3.7)).unwrap(), json!(-3));
        assert!(s.transform_field("i", json!("abc")).is_err());
    }

    #[test]
    fn test_required_rejects_null() {
        let s = schema(&[("time", "float|required")]);
        let err = s.transform_field("time", Value::Null).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Validation { ref field, ref rule } if field == "time" && rule == "required"
        ));
    }

    #[test]
    fn test_nullable_unset_is_null() {
        let s = schema(&[("git_commit_hash", "string|nullable")]);
        assert_eq!(
            s.transform_field("git_commit_hash", Value::Null).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_bool_parser() {
        let s = schema(&[("b", "boolean")]);
        assert_eq!(s.transform_field("b", json!("yes")).unwrap(), json!(true));
        assert_eq!(s.transform_field("b", json!("off")).unwrap(), json!(false));
        assert_eq!(s.transform_field("b", json!(0)).unwrap(), json!(false));
        assert!(s.transform_field("b", json!("maybe")).is_err());
    }

    #[test]
    fn test_null_type_always_null() {
        let s = schema(&[("z", "null")]);
        assert_eq!(s.transform_field("z", json!("anything")).unwrap(), Value::Null);
    }

    #[test]
    fn test_scalar_field_rejects_composite_without_converter() {
        let s = schema(&[("s", "string")]);
        assert!(s.transform_field("s", json!({"a": 1})).is_err());
    }

    #[test]
    fn test_to_primitive_converter() {
        let s = FieldSchema::compile([FieldDecl::typed("s", FieldType::String).convert(
            Converter::to_primitive(|v| v.get("name").cloned()),
        )])
        .unwrap();
        assert_eq!(
            s.transform_field("s", json!({"name": "report.pdf"})).unwrap(),
            json!("report.pdf")
        );
    }

    #[test]
    fn test_to_map_converter_on_scalar_type_is_invalid() {
        let err = FieldSchema::compile([
            FieldDecl::typed("s", FieldType::String).convert(Converter::to_map(|_| None))
        ])
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSchema { .. }));
    }

    #[test]
    fn test_object_accepts_arrays_and_maps() {
        let s = schema(&[("data", "nullable|array")]);
        assert_eq!(s.transform_field("data", json!([])).unwrap(), json!([]));
        assert_eq!(
            s.transform_field("data", json!({"chunk_id": 1})).unwrap(),
            json!({"chunk_id": 1})
        );
        assert!(s.transform_field("data", json!(5)).is_err());
    }

    #[test]
    fn test_untyped_passes_through() {
        let s = schema(&[("raw", "nullable")]);
        assert_eq!(s.transform_field("raw", json!({"k": [1]})).unwrap(), json!({"k": [1]}));
    }

    #[test]
    fn test_unknown_field() {
        let s = schema(&[("a", "string")]);
        assert!(matches!(
            s.transform_field("b", json!(1)),
            Err(ProtocolError::UnknownField(_))
        ));
    }

    #[test]
    fn test_duplicate_field_name_is_invalid() {
        assert!(FieldSchema::compile([("a", "string"), ("a", "int")]).is_err());
    }
}
