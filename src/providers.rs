use std::{collections::HashSet, io::Read, ops::ControlFlow};
use tracing::{debug, info};

use crate::{
    constants::KEY_PROVIDER_REFERENCES,
    error::ExtractResult,
    identifier::canonical_npis,
    model::{ProviderGroup, ProviderReference, ProviderRow, RowStamp},
    parquet_writer::BatchedTableWriter,
    run::{RunContext, Session, StopReason},
    tokens::TokenStream,
};

/// Appends one row per distinct NPI of `group`, or a single row with no NPI
/// for a tax-id-only group. Returns the number of rows written.
pub fn write_group(
    group_id: i64,
    group: &ProviderGroup,
    stamp: &RowStamp,
    out: &mut BatchedTableWriter<ProviderRow>,
    ctx: &mut RunContext,
) -> ExtractResult<u64> {
    let npis = canonical_npis(&group.npi);
    let row = |npi: Option<String>| ProviderRow {
        provider_group_id: group_id,
        npi,
        tin_type: group.tin.kind().to_string(),
        tin_value: group.tin.value.trim().to_string(),
        reporting_entity_name: stamp.file.reporting_entity_name.clone(),
        reporting_entity_type: stamp.file.reporting_entity_type.clone(),
        last_updated_on: stamp.file.last_updated_on.clone(),
        version: stamp.file.version.clone(),
        network_id: stamp.network_id.clone(),
    };

    let written = if npis.is_empty() {
        out.append(row(None))?;
        1
    } else {
        let count = npis.len() as u64;
        for npi in npis {
            out.append(row(Some(npi)))?;
        }
        count
    };
    ctx.counters.provider_rows += written;
    Ok(written)
}

/// Walks the `provider_references` array once, writing admitted groups and
/// recording their ids in `admitted` for the rate pass.
pub fn extract_provider_references<R: Read>(
    tokens: &mut TokenStream<R>,
    session: &mut Session<'_>,
    admitted: &mut HashSet<i64>,
) -> ExtractResult<ControlFlow<StopReason>> {
    if !tokens.begin_array(KEY_PROVIDER_REFERENCES)? {
        info!("{KEY_PROVIDER_REFERENCES} is null; no providers to extract");
        return Ok(ControlFlow::Continue(()));
    }

    while let Some(first) = tokens.next_item()? {
        if let Some(reason) = session.ctx.stop_reason() {
            return Ok(ControlFlow::Break(reason));
        }
        if session.ctx.provider_cap_reached() {
            tokens.skip_from(first)?;
            session.ctx.counters.provider_references_skipped += 1;
            continue;
        }
        session.ctx.counters.provider_references_seen += 1;

        let value = tokens.value_from(first)?;
        let reference: ProviderReference = match serde_json::from_value(value) {
            Ok(reference) => reference,
            Err(err) => {
                session.ctx.record_malformed("provider reference", &err.to_string())?;
                continue;
            }
        };
        admit_reference(reference, session, admitted)?;
        session.ctx.tick();
    }

    if session.ctx.counters.provider_references_skipped > 0 {
        info!(
            "Provider reference cap reached; skipped {} references",
            session.ctx.counters.provider_references_skipped
        );
    }
    info!(
        "Provider pass: {} references, {} groups admitted, {} rows",
        session.ctx.counters.provider_references_seen,
        admitted.len(),
        session.ctx.counters.provider_rows
    );
    Ok(ControlFlow::Continue(()))
}

fn admit_reference(
    reference: ProviderReference,
    session: &mut Session<'_>,
    admitted: &mut HashSet<i64>,
) -> ExtractResult<()> {
    let id = reference.provider_group_id;
    if admitted.contains(&id) {
        debug!(id, "duplicate provider reference skipped");
        session.ctx.counters.duplicate_provider_references += 1;
        return Ok(());
    }
    let Some(groups) = reference.provider_groups else {
        match reference.location {
            Some(location) => {
                debug!(id, %location, "remote provider reference skipped");
                session.ctx.counters.remote_provider_references += 1;
            }
            None => session
                .ctx
                .record_malformed("provider reference", &format!("group {id} has no provider_groups"))?,
        }
        return Ok(());
    };

    for group in &groups {
        if !session.filter.provider_admitted(&group.tin.value) {
            session.ctx.counters.provider_groups_rejected += 1;
            continue;
        }
        write_group(id, group, &session.stamp, &mut session.providers, &mut session.ctx)?;
        session.ctx.counters.provider_groups_admitted += 1;
        admitted.insert(id);
    }
    Ok(())
}
