//! Mapping validation.
//!
//! # Responsibilities
//! - Default the mapping `cwd` to the configuration `cwd`
//! - Resolve the handler owning the mapping (first registered handler whose
//!   name is a property of the mapping)
//! - Intersect the mapping methods with the handler restriction
//! - Validate handler schema properties, applying defaults
//! - Run the handler's own validation, which may enrich the mapping
//! - Compile the matcher last
//!
//! # Design Decisions
//! - Handler resolution precedes schema validation (schemas are per handler)
//! - Checking an already checked mapping returns it unchanged

use std::sync::Arc;

use axum::http::Method;
use serde_json::Value;

use super::{CheckedMapping, Mapping, MappingSource, Matcher, Property};
use crate::config::Configuration;
use crate::error::ValidationError;
use crate::handlers::{HandlerBinding, PropertySchema, PropertyType};

/// Check a mapping unless it already is.
pub async fn check(
    configuration: &Configuration,
    source: MappingSource,
) -> Result<Arc<CheckedMapping>, ValidationError> {
    match source {
        MappingSource::Checked(checked) => Ok(checked),
        MappingSource::Raw(mapping) => Ok(Arc::new(check_mapping(configuration, mapping).await?)),
    }
}

pub async fn check_mapping(
    configuration: &Configuration,
    mut mapping: Mapping,
) -> Result<CheckedMapping, ValidationError> {
    if mapping.cwd.is_none() {
        mapping.cwd = Some(configuration.settings().cwd.clone());
    }

    let entry = configuration
        .handlers()
        .iter()
        .find(|entry| mapping.properties.contains_key(entry.name()))
        .ok_or(ValidationError::UnknownHandler)?;
    let handler_type = entry.name().to_string();
    let handler = entry.handler().clone();

    let methods = resolve_methods(&handler_type, mapping.method.as_deref(), handler.methods())?;

    for schema in handler.schema() {
        apply_schema(&mut mapping, schema)?;
    }

    handler.validate(&mut mapping, configuration).await?;

    let payload = mapping
        .properties
        .get(&handler_type)
        .cloned()
        .ok_or_else(|| ValidationError::MissingProperty(handler_type.clone()))?;

    let matcher = Matcher::compile(
        mapping.match_spec.as_ref(),
        methods.clone(),
        mapping.invert_match,
        mapping.if_match.clone(),
    )?;

    tracing::trace!(handler = %handler_type, matcher = ?matcher, "Mapping checked");

    Ok(CheckedMapping::new(
        mapping,
        matcher,
        HandlerBinding {
            handler_type,
            handler,
            payload,
        },
        methods,
    ))
}

fn parse_method(handler: &str, name: &str) -> Result<Method, ValidationError> {
    Method::from_bytes(name.as_bytes()).map_err(|_| ValidationError::InvalidMethod(format!("{handler}: {name}")))
}

fn resolve_methods(
    handler_type: &str,
    requested: Option<&[String]>,
    allowed: Option<&[Method]>,
) -> Result<Option<Vec<Method>>, ValidationError> {
    let Some(requested) = requested else {
        return Ok(allowed.map(<[Method]>::to_vec));
    };
    if requested.is_empty() {
        return Err(ValidationError::InvalidMethod("empty method list".into()));
    }

    let mut methods = Vec::with_capacity(requested.len());
    for name in requested {
        let method = parse_method(handler_type, &name.to_uppercase())?;
        if !methods.contains(&method) {
            methods.push(method);
        }
    }

    if let Some(allowed) = allowed {
        methods.retain(|method| allowed.contains(method));
        if methods.is_empty() {
            return Err(ValidationError::NoAllowedMethod {
                handler: handler_type.to_string(),
                requested: requested.join(","),
            });
        }
    }
    Ok(Some(methods))
}

fn apply_schema(mapping: &mut Mapping, schema: &PropertySchema) -> Result<(), ValidationError> {
    match mapping.properties.get(&schema.name) {
        None => {
            if let Some(default) = &schema.default {
                mapping
                    .properties
                    .insert(schema.name.clone(), Property::Value(default.clone()));
            } else if schema.required {
                return Err(ValidationError::MissingProperty(schema.name.clone()));
            }
            Ok(())
        }
        Some(value) if schema.types.iter().any(|t| type_matches(*t, value)) => Ok(()),
        Some(_) => Err(ValidationError::InvalidType {
            property: schema.name.clone(),
            expected: schema
                .types
                .iter()
                .map(PropertyType::as_str)
                .collect::<Vec<_>>()
                .join(" or "),
        }),
    }
}

fn type_matches(expected: PropertyType, property: &Property) -> bool {
    match (expected, property) {
        (PropertyType::Function, Property::Function(_)) => true,
        (PropertyType::String, Property::Value(Value::String(_))) => true,
        (PropertyType::Number, Property::Value(Value::Number(_))) => true,
        (PropertyType::Boolean, Property::Value(Value::Bool(_))) => true,
        (PropertyType::Object, Property::Value(Value::Object(_))) => true,
        (PropertyType::Array, Property::Value(Value::Array(_))) => true,
        _ => false,
    }
}
