use std::{io::Read, mem, ops::ControlFlow};
use tracing::info;

use crate::{
    constants::KEY_IN_NETWORK,
    error::ExtractResult,
    model::{InNetworkItem, NegotiatedPrice, NegotiatedRateGroup, RateRow, RowStamp},
    run::{Session, StopReason},
    strategy::ModeStrategy,
    tokens::TokenStream,
};

pub fn rate_row(group_id: i64, item: &InNetworkItem, price: &NegotiatedPrice, stamp: &RowStamp) -> RateRow {
    RateRow {
        provider_group_id: group_id,
        billing_code: item.billing_code.clone(),
        billing_code_type: item.billing_code_type.clone(),
        billing_code_type_version: item.billing_code_type_version.clone(),
        description: item.description.clone(),
        name: item.name.clone(),
        negotiated_rate: price.negotiated_rate,
        negotiated_type: price.negotiated_type.clone(),
        billing_class: price.billing_class.clone(),
        expiration_date: price.expiration_date.clone(),
        service_codes: price.service_code.clone(),
        billing_code_modifiers: price.billing_code_modifier.clone(),
        negotiation_arrangement: item.negotiation_arrangement.clone(),
        additional_information: price.additional_information.clone(),
        plan_name: stamp.plan.plan_name.clone(),
        plan_id: stamp.plan.plan_id.clone(),
        plan_id_type: stamp.plan.plan_id_type.clone(),
        plan_market_type: stamp.plan.plan_market_type.clone(),
        network_id: stamp.network_id.clone(),
        reporting_entity_name: stamp.file.reporting_entity_name.clone(),
        reporting_entity_type: stamp.file.reporting_entity_type.clone(),
        last_updated_on: stamp.file.last_updated_on.clone(),
        version: stamp.file.version.clone(),
    }
}

/// Walks the `in_network` array once. Each item is built, checked against
/// the code whitelist, and fanned out to one row per (group id, price).
/// Provider-group resolution is delegated to the mode strategy.
pub fn extract_in_network<R: Read, S: ModeStrategy>(
    tokens: &mut TokenStream<R>,
    strategy: &mut S,
    session: &mut Session<'_>,
) -> ExtractResult<ControlFlow<StopReason>> {
    if !tokens.begin_array(KEY_IN_NETWORK)? {
        info!("{KEY_IN_NETWORK} is null; no rates to extract");
        return Ok(ControlFlow::Continue(()));
    }

    while let Some(first) = tokens.next_item()? {
        if let Some(reason) = session.ctx.stop_reason() {
            return Ok(ControlFlow::Break(reason));
        }
        session.ctx.counters.in_network_items_seen += 1;

        let value = tokens.value_from(first)?;
        let mut item: InNetworkItem = match serde_json::from_value(value) {
            Ok(item) => item,
            Err(err) => {
                session.ctx.record_malformed("in_network item", &err.to_string())?;
                continue;
            }
        };

        if !session.filter.code_admitted(&item.billing_code) {
            session.ctx.counters.items_rejected_by_code += 1;
            continue;
        }

        for raw in mem::take(&mut item.negotiated_rates) {
            session.ctx.counters.rate_groups_seen += 1;
            let group: NegotiatedRateGroup = match serde_json::from_value(raw) {
                Ok(group) => group,
                Err(err) => {
                    session.ctx.record_malformed(
                        "negotiated rate group",
                        &format!("billing code {}: {err}", item.billing_code),
                    )?;
                    continue;
                }
            };
            let Some(group_ids) = strategy.resolve_groups(&group, session)? else {
                session.ctx.record_malformed(
                    "negotiated rate group",
                    &format!("billing code {}: no provider_references or provider_groups", item.billing_code),
                )?;
                continue;
            };
            for group_id in group_ids {
                for price in &group.negotiated_prices {
                    session.rates.append(rate_row(group_id, &item, price, &session.stamp))?;
                    session.ctx.counters.rate_rows += 1;
                }
            }
        }
        session.ctx.tick();
    }

    info!(
        "Rate pass: {} items, {} rejected by code, {} rate rows",
        session.ctx.counters.in_network_items_seen,
        session.ctx.counters.items_rejected_by_code,
        session.ctx.counters.rate_rows
    );
    Ok(ControlFlow::Continue(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filter::FilterEngine,
        model::{FileMetadata, PlanMetadata},
        parquet_writer::BatchedTableWriter,
        run::{Limits, RunContext},
        strategy::InlineStrategy,
    };
    use serde_json::json;

    fn session<'a>(dir: &std::path::Path, filter: &'a FilterEngine, limits: Limits) -> Session<'a> {
        Session {
            ctx: RunContext::new(limits, false),
            filter,
            stamp: RowStamp::default(),
            providers: BatchedTableWriter::try_new(&dir.join("providers.parquet"), 2).unwrap(),
            rates: BatchedTableWriter::try_new(&dir.join("rates.parquet"), 2).unwrap(),
        }
    }

    fn walk(text: &str, session: &mut Session<'_>) -> ControlFlow<StopReason> {
        let mut tokens = TokenStream::new(text.as_bytes());
        tokens.begin_root().unwrap();
        tokens.next_key().unwrap();
        extract_in_network(&mut tokens, &mut InlineStrategy::default(), session).unwrap()
    }

    const TWO_CODES: &str = r#"{"in_network": [
        {"billing_code": "99213", "negotiated_rates": [{
            "provider_groups": [{"npi": ["1"], "tin": {"type": "ein", "value": "1"}}],
            "negotiated_prices": [{"negotiated_rate": 50.0}, {"negotiated_rate": 55.0}]}]},
        {"billing_code": "99214", "negotiated_rates": [{
            "provider_groups": [{"npi": ["1"], "tin": {"type": "ein", "value": "1"}}],
            "negotiated_prices": [{"negotiated_rate": 75.0}]}]}
    ]}"#;

    #[test]
    fn row_carries_price_item_and_stamp() {
        let item: InNetworkItem = serde_json::from_value(json!({
            "billing_code": 99213,
            "billing_code_type": "CPT",
            "negotiation_arrangement": "ffs",
            "negotiated_rates": []
        }))
        .unwrap();
        let price: NegotiatedPrice = serde_json::from_value(json!({
            "negotiated_rate": 50.0,
            "expiration_date": "9999-12-31",
            "service_code": "11"
        }))
        .unwrap();
        let stamp = RowStamp::new(
            FileMetadata {
                version: Some("1.0.0".into()),
                ..FileMetadata::default()
            },
            &PlanMetadata {
                plan_name: vec!["Gold".into()],
                ..PlanMetadata::default()
            },
            Some("net-7".into()),
        );

        let row = rate_row(42, &item, &price, &stamp);
        assert_eq!(row.provider_group_id, 42);
        assert_eq!(row.billing_code, "99213");
        assert_eq!(row.expiration_date.as_deref(), Some("9999-12-31"));
        assert_eq!(row.service_codes, vec!["11"]);
        assert_eq!(row.plan_name, vec!["Gold"]);
        assert_eq!(row.network_id.as_deref(), Some("net-7"));
        assert_eq!(row.version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn whole_item_rejected_by_code() {
        let dir = tempfile::tempdir().unwrap();
        let filter = FilterEngine::new(Some(["99213"].into_iter().collect()), None);
        let mut s = session(dir.path(), &filter, Limits::default());

        assert!(walk(TWO_CODES, &mut s).is_continue());
        assert_eq!(s.ctx.counters.in_network_items_seen, 2);
        assert_eq!(s.ctx.counters.items_rejected_by_code, 1);
        assert_eq!(s.ctx.counters.rate_rows, 2);
    }

    #[test]
    fn item_limit_breaks_between_items() {
        let dir = tempfile::tempdir().unwrap();
        let filter = FilterEngine::default();
        let limits = Limits {
            max_items: Some(1),
            ..Limits::default()
        };
        let mut s = session(dir.path(), &filter, limits);

        assert_eq!(walk(TWO_CODES, &mut s), ControlFlow::Break(StopReason::ItemLimit));
        assert_eq!(s.ctx.counters.in_network_items_seen, 1);
        assert_eq!(s.ctx.counters.rate_rows, 2);
    }

    #[test]
    fn malformed_entries_are_local() {
        let dir = tempfile::tempdir().unwrap();
        let filter = FilterEngine::default();
        let mut s = session(dir.path(), &filter, Limits::default());
        let flow = walk(
            r#"{"in_network": [
                {"negotiated_rates": []},
                {"billing_code": "1", "negotiated_rates": [
                    {"negotiated_prices": [{"negotiated_rate": 1.0}]},
                    {"provider_groups": [{"npi": ["1"], "tin": {"type": "ein", "value": "1"}}]},
                    {"provider_groups": [{"npi": ["1"], "tin": {"type": "ein", "value": "1"}}],
                     "negotiated_prices": [{"negotiated_rate": 2.0}]}]}
            ]}"#,
            &mut s,
        );
        assert!(flow.is_continue());
        assert_eq!(s.ctx.counters.malformed_entries, 3);
        assert_eq!(s.ctx.counters.rate_rows, 1);
    }

    #[test]
    fn malformed_threshold_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let filter = FilterEngine::default();
        let limits = Limits {
            max_malformed: Some(0),
            ..Limits::default()
        };
        let mut s = session(dir.path(), &filter, limits);
        let mut tokens = TokenStream::new(r#"{"in_network": [{"negotiated_rates": []}]}"#.as_bytes());
        tokens.begin_root().unwrap();
        tokens.next_key().unwrap();
        let err = extract_in_network(&mut tokens, &mut InlineStrategy::default(), &mut s).unwrap_err();
        assert!(matches!(err, crate::error::ExtractError::TooManyMalformed { .. }));
    }
}
