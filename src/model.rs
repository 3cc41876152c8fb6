use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use serde_json::Value;

const HEADER_KEYS: [&str; 8] = [
    "reporting_entity_name",
    "reporting_entity_type",
    "last_updated_on",
    "version",
    "plan_name",
    "plan_id",
    "plan_id_type",
    "plan_market_type",
];

/// Document-level scalars captured from the prefix of an MRF file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileMetadata {
    pub reporting_entity_name: Option<String>,
    pub reporting_entity_type: Option<String>,
    pub last_updated_on: Option<String>,
    pub version: Option<String>,
    pub plan_name: Option<String>,
    pub plan_id: Option<String>,
    pub plan_id_type: Option<String>,
    pub plan_market_type: Option<String>,
}

impl FileMetadata {
    /// Stores `value` if `key` is a recognized header field. Returns whether
    /// the key was consumed.
    pub fn absorb(&mut self, key: &str, value: &Value) -> bool {
        let slot = match key {
            "reporting_entity_name" => &mut self.reporting_entity_name,
            "reporting_entity_type" => &mut self.reporting_entity_type,
            "last_updated_on" => &mut self.last_updated_on,
            "version" => &mut self.version,
            "plan_name" => &mut self.plan_name,
            "plan_id" => &mut self.plan_id,
            "plan_id_type" => &mut self.plan_id_type,
            "plan_market_type" => &mut self.plan_market_type,
            _ => return false,
        };
        *slot = scalar_text(value);
        true
    }

    pub fn is_header_key(key: &str) -> bool {
        HEADER_KEYS.contains(&key)
    }
}

/// Plan values stamped on rate rows when the document itself names no plan.
/// Each field is a list because one file can serve several plans.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanMetadata {
    pub plan_name: Vec<String>,
    pub plan_id: Vec<String>,
    pub plan_id_type: Vec<String>,
    pub plan_market_type: Vec<String>,
}

impl PlanMetadata {
    /// Source values win field by field; configured stamps fill the gaps.
    pub fn resolve(&self, file: &FileMetadata) -> PlanMetadata {
        fn pick(source: &Option<String>, stamp: &[String]) -> Vec<String> {
            match source {
                Some(value) => vec![value.clone()],
                None => stamp.to_vec(),
            }
        }
        PlanMetadata {
            plan_name: pick(&file.plan_name, &self.plan_name),
            plan_id: pick(&file.plan_id, &self.plan_id),
            plan_id_type: pick(&file.plan_id_type, &self.plan_id_type),
            plan_market_type: pick(&file.plan_market_type, &self.plan_market_type),
        }
    }
}

/// Run-wide values copied onto every emitted row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowStamp {
    pub file: FileMetadata,
    pub plan: PlanMetadata,
    pub network_id: Option<String>,
}

impl RowStamp {
    pub fn new(file: FileMetadata, configured: &PlanMetadata, network_id: Option<String>) -> Self {
        let plan = configured.resolve(&file);
        Self {
            file,
            plan,
            network_id,
        }
    }
}

/// One entry of the top-level `provider_references` array.
#[derive(Debug, Deserialize)]
pub struct ProviderReference {
    #[serde(deserialize_with = "de_group_id")]
    pub provider_group_id: i64,
    #[serde(default)]
    pub provider_groups: Option<Vec<ProviderGroup>>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderGroup {
    #[serde(default, deserialize_with = "de_list")]
    pub npi: Vec<String>,
    pub tin: Tin,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tin {
    #[serde(rename = "type", default, deserialize_with = "de_opt_text")]
    pub kind: Option<String>,
    #[serde(deserialize_with = "de_text")]
    pub value: String,
}

impl Tin {
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or("")
    }
}

/// One entry of the top-level `in_network` array. Rate groups stay as raw
/// values so one bad group does not sink its siblings.
#[derive(Debug, Deserialize)]
pub struct InNetworkItem {
    #[serde(deserialize_with = "de_text")]
    pub billing_code: String,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub billing_code_type: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub billing_code_type_version: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub negotiation_arrangement: Option<String>,
    pub negotiated_rates: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct NegotiatedRateGroup {
    #[serde(default, deserialize_with = "de_group_ids")]
    pub provider_references: Option<Vec<i64>>,
    #[serde(default)]
    pub provider_groups: Option<Vec<ProviderGroup>>,
    pub negotiated_prices: Vec<NegotiatedPrice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NegotiatedPrice {
    #[serde(deserialize_with = "de_amount")]
    pub negotiated_rate: f64,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub negotiated_type: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub billing_class: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub expiration_date: Option<String>,
    #[serde(default, deserialize_with = "de_list")]
    pub service_code: Vec<String>,
    #[serde(default, deserialize_with = "de_list")]
    pub billing_code_modifier: Vec<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub additional_information: Option<String>,
}

/// Provider table row: one (group, NPI) pair plus group and file metadata.
/// A tax-id-only group carries a single row with no NPI.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRow {
    pub provider_group_id: i64,
    pub npi: Option<String>,
    pub tin_type: String,
    pub tin_value: String,
    pub reporting_entity_name: Option<String>,
    pub reporting_entity_type: Option<String>,
    pub last_updated_on: Option<String>,
    pub version: Option<String>,
    pub network_id: Option<String>,
}

/// Rate table row: one negotiated price under one provider group.
#[derive(Debug, Clone, PartialEq)]
pub struct RateRow {
    pub provider_group_id: i64,
    pub billing_code: String,
    pub billing_code_type: Option<String>,
    pub billing_code_type_version: Option<String>,
    pub description: Option<String>,
    pub name: Option<String>,
    pub negotiated_rate: f64,
    pub negotiated_type: Option<String>,
    pub billing_class: Option<String>,
    pub expiration_date: Option<String>,
    pub service_codes: Vec<String>,
    pub billing_code_modifiers: Vec<String>,
    pub negotiation_arrangement: Option<String>,
    pub additional_information: Option<String>,
    pub plan_name: Vec<String>,
    pub plan_id: Vec<String>,
    pub plan_id_type: Vec<String>,
    pub plan_market_type: Vec<String>,
    pub network_id: Option<String>,
    pub reporting_entity_name: Option<String>,
    pub reporting_entity_type: Option<String>,
    pub last_updated_on: Option<String>,
    pub version: Option<String>,
}

/// Text form of a JSON scalar. Publishers mix numbers and strings for the
/// same field (NPIs, TINs, codes), so both are accepted.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn de_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    scalar_text(&value).ok_or_else(|| D::Error::custom(format!("expected a scalar, found {value}")))
}

fn de_opt_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(None),
        other => scalar_text(&other)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("expected a scalar, found {other}"))),
    }
}

/// Scalar or list of scalars, always returned as a list.
fn de_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                scalar_text(item)
                    .ok_or_else(|| D::Error::custom(format!("expected a scalar list item, found {item}")))
            })
            .collect(),
        other => scalar_text(&other)
            .map(|s| vec![s])
            .ok_or_else(|| D::Error::custom(format!("expected a scalar or list, found {other}"))),
    }
}

fn group_id_from(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn de_group_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    group_id_from(&value)
        .ok_or_else(|| D::Error::custom(format!("expected an integer group id, found {value}")))
}

fn de_group_ids<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<i64>>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let items = match value {
        Value::Null => return Ok(None),
        Value::Array(items) => items,
        single => vec![single],
    };
    items
        .iter()
        .map(|item| {
            group_id_from(item)
                .ok_or_else(|| D::Error::custom(format!("expected an integer group id, found {item}")))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn de_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let amount = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    amount.ok_or_else(|| D::Error::custom(format!("expected a numeric amount, found {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn price_normalizes_scalars_to_lists() {
        let price: NegotiatedPrice = serde_json::from_value(json!({
            "negotiated_type": "negotiated",
            "negotiated_rate": 50.0,
            "expiration_date": "9999-12-31",
            "service_code": "11",
            "billing_class": "professional",
            "billing_code_modifier": ["26", "TC"]
        }))
        .unwrap();

        assert_eq!(price.service_code, vec!["11"]);
        assert_eq!(price.billing_code_modifier, vec!["26", "TC"]);
        assert_eq!(price.expiration_date.as_deref(), Some("9999-12-31"));
        assert_eq!(price.negotiated_rate, 50.0);
    }

    #[test]
    fn price_without_rate_is_rejected() {
        let price = serde_json::from_value::<NegotiatedPrice>(json!({
            "negotiated_type": "negotiated",
            "service_code": ["11"]
        }));
        assert!(price.is_err());
    }

    #[test]
    fn string_amounts_and_numeric_identifiers_are_accepted() {
        let group: NegotiatedRateGroup = serde_json::from_value(json!({
            "provider_references": [123, "456"],
            "negotiated_prices": [{"negotiated_rate": "12.50"}]
        }))
        .unwrap();
        assert_eq!(group.provider_references, Some(vec![123, 456]));
        assert_eq!(group.negotiated_prices[0].negotiated_rate, 12.5);

        let provider: ProviderGroup = serde_json::from_value(json!({
            "npi": [1111111111u64, "2222222222"],
            "tin": {"type": "ein", "value": 999999999}
        }))
        .unwrap();
        assert_eq!(provider.npi, vec!["1111111111", "2222222222"]);
        assert_eq!(provider.tin.value, "999999999");
        assert_eq!(provider.tin.kind(), "ein");
    }

    #[test]
    fn item_requires_billing_code() {
        let item = serde_json::from_value::<InNetworkItem>(json!({
            "billing_code_type": "CPT",
            "negotiated_rates": []
        }));
        assert!(item.is_err());
    }

    #[test]
    fn header_absorbs_only_known_keys() {
        let mut meta = FileMetadata::default();
        assert!(meta.absorb("reporting_entity_name", &json!("Acme Health")));
        assert!(meta.absorb("version", &json!("1.3.1")));
        assert!(!meta.absorb("in_network", &json!([])));
        assert_eq!(meta.reporting_entity_name.as_deref(), Some("Acme Health"));
        assert_eq!(meta.version.as_deref(), Some("1.3.1"));
    }

    #[test]
    fn source_plan_overrides_configured_stamp() {
        let stamps = PlanMetadata {
            plan_name: vec!["Stamped A".into(), "Stamped B".into()],
            plan_id: vec!["111".into(), "222".into()],
            ..PlanMetadata::default()
        };
        let file = FileMetadata {
            plan_id: Some("999".into()),
            ..FileMetadata::default()
        };

        let resolved = stamps.resolve(&file);
        assert_eq!(resolved.plan_name, vec!["Stamped A", "Stamped B"]);
        assert_eq!(resolved.plan_id, vec!["999"]);
        assert!(resolved.plan_market_type.is_empty());
    }
}
