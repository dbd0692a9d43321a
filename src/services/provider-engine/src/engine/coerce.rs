//! Record to canonical model coercion

use numgate_shared::{Country, LifecycleStatus, PriceData, Service, StatusResult};
use serde_json::Value;

use crate::mapping::{render_template, CompiledMapping, Record};
use crate::utils::JsonUtils;

/// First present, non-empty field among `names`, as plain text
pub fn text(record: &Record, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| record.get(*name))
        .filter(|value| !JsonUtils::is_empty(value))
        .find_map(JsonUtils::to_plain_string)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First field among `names` that reads as a number
pub fn number(record: &Record, names: &[&str]) -> Option<f64> {
    names
        .iter()
        .filter_map(|name| record.get(*name))
        .find_map(JsonUtils::as_f64)
}

pub fn country(record: &Record) -> Option<Country> {
    let id = text(record, &["id", "code", "countryId", "country"])?;
    let code = text(record, &["code", "countryCode", "iso"]).unwrap_or_else(|| id.clone());
    let name = text(record, &["name", "title", "countryName"]).unwrap_or_else(|| code.clone());
    Some(Country {
        id,
        code,
        name,
        flag_url: text(record, &["flagUrl", "flag_url", "flag"]),
    })
}

pub fn service(record: &Record, mapping: Option<&CompiledMapping>) -> Option<Service> {
    let id = text(record, &["id", "code", "serviceId", "service"])?;
    let code = text(record, &["code", "serviceCode", "shortName"]).unwrap_or_else(|| id.clone());
    let name = text(record, &["name", "title", "serviceName"]).unwrap_or_else(|| code.clone());

    let icon_url = text(record, &["iconUrl", "icon_url", "icon"]).or_else(|| {
        let template = mapping?.config.icon_url_template.as_deref()?;
        let mut scope = record.clone();
        scope
            .entry("code".to_string())
            .or_insert_with(|| Value::String(code.clone()));
        Some(render_template(template, Some(&Value::String(code.clone())), &scope))
    });

    Some(Service {
        id,
        code,
        name,
        icon_url,
    })
}

/// Price entry; the cost is still in the provider's currency
pub fn price(record: &Record) -> Option<PriceData> {
    let country = text(record, &["country", "countryCode", "country_id"])?;
    let service = text(record, &["service", "serviceCode", "service_id"])?;
    let cost = number(record, &["cost", "price", "rate", "amount", "sum"])?;
    let count = number(record, &["count", "stock", "quantity", "qty"])
        .filter(|n| *n > 0.0)
        .map(|n| n as u64)
        .unwrap_or(0);
    Some(PriceData {
        country,
        service,
        operator: text(record, &["operator", "provider_id"]),
        cost,
        count,
    })
}

/// Lifecycle status from a record, through the mapping's `statusMapping`
pub fn status(record: &Record, mapping: Option<&CompiledMapping>) -> StatusResult {
    let raw = text(record, &["status", "state"]);
    let status = raw
        .as_deref()
        .and_then(|raw| {
            mapping
                .and_then(|m| m.map_status(raw))
                .or_else(|| raw.parse::<LifecycleStatus>().ok())
        })
        .unwrap_or_default();

    let mut messages: Vec<String> = match record.get("messages").or_else(|| record.get("sms")) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(map) => ["text", "code", "message"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(JsonUtils::to_plain_string)),
                other => JsonUtils::to_plain_string(other),
            })
            .collect(),
        Some(other) => JsonUtils::to_plain_string(other).into_iter().collect(),
        None => Vec::new(),
    };
    if messages.is_empty() {
        if let Some(code) = text(record, &["code", "text", "smsCode"]) {
            messages.push(code);
        }
    }
    messages.retain(|m| !m.trim().is_empty());

    let status = if status == LifecycleStatus::Pending && !messages.is_empty() {
        LifecycleStatus::Received
    } else {
        status
    };
    StatusResult { status, messages }
}

#[cfg(test)]
mod tests {
    use super::*;
    use numgate_shared::{MappingConfig, ResponseShape};
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => Record::new(),
        }
    }

    #[test]
    fn test_country_defaults_code_and_name_to_id() {
        let c = country(&record(json!({"id": 7}))).unwrap();
        assert_eq!(c.id, "7");
        assert_eq!(c.code, "7");
        assert_eq!(c.name, "7");
        assert!(country(&record(json!({"name": "Nowhere"}))).is_none());
    }

    #[test]
    fn test_service_icon_template() {
        let mut config = MappingConfig::new(ResponseShape::JsonArray);
        config.icon_url_template = Some("https://cdn.example/{code}.png".to_string());
        let mapping = CompiledMapping::compile(&config).unwrap();
        let s = service(&record(json!({"code": "tg", "name": "Telegram"})), Some(&mapping)).unwrap();
        assert_eq!(s.icon_url.as_deref(), Some("https://cdn.example/tg.png"));
    }

    #[test]
    fn test_price_requires_country_service_and_cost() {
        let p = price(&record(json!({"country": "us", "service": "wa", "cost": "10.5", "count": 5}))).unwrap();
        assert_eq!(p.cost, 10.5);
        assert_eq!(p.count, 5);
        assert!(p.operator.is_none());
        assert!(price(&record(json!({"country": "us", "service": "wa"}))).is_none());
    }

    #[test]
    fn test_status_mapping_and_messages() {
        let mut config = MappingConfig::new(ResponseShape::JsonObject);
        config
            .status_mapping
            .insert("STATUS_OK".to_string(), LifecycleStatus::Received);
        let mapping = CompiledMapping::compile(&config).unwrap();

        let result = status(&record(json!({"status": "status_ok", "code": "1234"})), Some(&mapping));
        assert_eq!(result.status, LifecycleStatus::Received);
        assert_eq!(result.messages, vec!["1234".to_string()]);

        let unknown = status(&record(json!({"status": "WHATEVER"})), Some(&mapping));
        assert_eq!(unknown, StatusResult::pending());
    }
}
