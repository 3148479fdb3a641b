use serde_json::json;

use super::{SeriesQuery, StoreError};
use crate::escape::{is_safe_identifier, quote_identifier};

/// Query text plus the values bound to its `$service` / `$metric` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Statements {
    pub text: String,
    pub params: serde_json::Value,
}

/// Builds the bucketed series statement followed by the full-range stats
/// statement for one selector.
pub fn series_statements(query: &SeriesQuery, database: &str) -> Result<Statements, StoreError> {
    for identifier in [database, query.retention_policy.as_str(), query.host.as_str()] {
        if !is_safe_identifier(identifier) {
            return Err(StoreError::UnsafeIdentifier(identifier.to_string()));
        }
    }

    let source = format!(
        "{}.{}.{}",
        quote_identifier(database),
        quote_identifier(&query.retention_policy),
        quote_identifier(&query.host),
    );
    let condition = format!(
        "\"service\" = $service AND \"metric\" = $metric AND time >= {}s AND time <= {}s",
        query.start_epoch, query.end_epoch,
    );

    let text = format!(
        "SELECT MEAN(\"value\") FROM {source} WHERE {condition} GROUP BY time({interval}) fill({fill}); \
         SELECT MIN(\"value\"), MAX(\"value\"), MEAN(\"value\"), STDDEV(\"value\"), PERCENTILE(\"value\", 95) \
         FROM {source} WHERE {condition}",
        interval = query.interval,
        fill = query.fill_option,
    );

    Ok(Statements {
        text,
        params: json!({
            "service": query.service,
            "metric": query.metric,
        }),
    })
}
