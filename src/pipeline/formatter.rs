use async_trait::async_trait;

use crate::{
    error::Result,
    hierarchy::{ConcatenatedValue, ConcatenatedValuePart, TypedPrimitiveValue},
};

/// Turns typed values into display strings.  Locale and unit awareness are
/// up to the implementation.
#[async_trait]
pub trait ValueFormatter: Send + Sync {
    async fn format(&self, value: &TypedPrimitiveValue) -> Result<String>;
}

/// Locale-agnostic formatting, used when no formatter has been set.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultValueFormatter;

#[async_trait]
impl ValueFormatter for DefaultValueFormatter {
    async fn format(&self, value: &TypedPrimitiveValue) -> Result<String> {
        Ok(value.to_plain_string())
    }
}

pub async fn format_label(label: &ConcatenatedValue, formatter: &dyn ValueFormatter) -> Result<String> {
    let mut formatted = String::new();
    for part in &label.0 {
        match part {
            ConcatenatedValuePart::String(s) => formatted.push_str(s),
            ConcatenatedValuePart::Typed(value) => formatted.push_str(&formatter.format(value).await?),
        }
    }
    Ok(formatted)
}
