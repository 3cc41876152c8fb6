//! The two publisher layouts as interchangeable strategies. The schema
//! detector picks one per run; nothing downstream re-checks the mode.

use std::{collections::HashSet, io::Read, ops::ControlFlow};
use tracing::{debug, warn};

use crate::{
    constants::{KEY_IN_NETWORK, KEY_PROVIDER_REFERENCES},
    error::ExtractResult,
    identifier::synthesize_group_id,
    model::{NegotiatedRateGroup, ProviderGroup},
    providers::{extract_provider_references, write_group},
    rates::extract_in_network,
    run::{Session, StopReason},
    schema::SchemaMode,
    tokens::TokenStream,
};

pub trait ModeStrategy: Sized {
    const MODE: SchemaMode;

    fn provider_section<R: Read>(
        &mut self,
        tokens: &mut TokenStream<R>,
        session: &mut Session<'_>,
    ) -> ExtractResult<ControlFlow<StopReason>>;

    /// Provider-group ids one negotiated-rate group applies to, after
    /// filtering. `None` when the group names no providers at all.
    fn resolve_groups(
        &mut self,
        group: &NegotiatedRateGroup,
        session: &mut Session<'_>,
    ) -> ExtractResult<Option<Vec<i64>>>;

    /// One forward pass over the whole document.
    fn extract<R: Read>(
        &mut self,
        tokens: &mut TokenStream<R>,
        session: &mut Session<'_>,
    ) -> ExtractResult<ControlFlow<StopReason>> {
        debug!(mode = %Self::MODE, "streaming document");
        tokens.begin_root()?;
        while let Some(key) = tokens.next_key()? {
            let flow = match key.as_str() {
                KEY_PROVIDER_REFERENCES => self.provider_section(tokens, session)?,
                KEY_IN_NETWORK => extract_in_network(tokens, self, session)?,
                _ => {
                    tokens.skip_value()?;
                    ControlFlow::Continue(())
                }
            };
            if flow.is_break() {
                return Ok(flow);
            }
        }
        tokens.end_document()?;
        Ok(ControlFlow::Continue(()))
    }
}

/// Providers listed once under `provider_references`; rates point at them.
#[derive(Debug, Default)]
pub struct ReferencedStrategy {
    admitted: HashSet<i64>,
    synthesized: HashSet<i64>,
}

impl ModeStrategy for ReferencedStrategy {
    const MODE: SchemaMode = SchemaMode::Referenced;

    fn provider_section<R: Read>(
        &mut self,
        tokens: &mut TokenStream<R>,
        session: &mut Session<'_>,
    ) -> ExtractResult<ControlFlow<StopReason>> {
        extract_provider_references(tokens, session, &mut self.admitted)
    }

    fn resolve_groups(
        &mut self,
        group: &NegotiatedRateGroup,
        session: &mut Session<'_>,
    ) -> ExtractResult<Option<Vec<i64>>> {
        match (&group.provider_references, &group.provider_groups) {
            (Some(references), _) => {
                let mut ids = Vec::with_capacity(references.len());
                for id in references {
                    if !self.admitted.contains(id) {
                        // Filtered by tax id, or never listed in this file.
                        session.ctx.counters.references_dropped += 1;
                    } else if !ids.contains(id) {
                        ids.push(*id);
                    }
                }
                Ok(Some(ids))
            }
            // Some referenced files still embed groups in a few rate entries.
            (None, Some(groups)) => synthesize_groups(groups, &mut self.synthesized, session).map(Some),
            (None, None) => Ok(None),
        }
    }
}

/// Providers embedded in each rate group; ids are synthesized.
#[derive(Debug, Default)]
pub struct InlineStrategy {
    seen: HashSet<i64>,
}

impl ModeStrategy for InlineStrategy {
    const MODE: SchemaMode = SchemaMode::Inline;

    fn provider_section<R: Read>(
        &mut self,
        tokens: &mut TokenStream<R>,
        _session: &mut Session<'_>,
    ) -> ExtractResult<ControlFlow<StopReason>> {
        warn!("Ignoring {KEY_PROVIDER_REFERENCES} found after {KEY_IN_NETWORK}");
        tokens.skip_value()?;
        Ok(ControlFlow::Continue(()))
    }

    fn resolve_groups(
        &mut self,
        group: &NegotiatedRateGroup,
        session: &mut Session<'_>,
    ) -> ExtractResult<Option<Vec<i64>>> {
        match &group.provider_groups {
            Some(groups) => synthesize_groups(groups, &mut self.seen, session).map(Some),
            None => Ok(None),
        }
    }
}

/// Synthesizes an id for each admitted embedded group and writes its provider
/// rows the first time the id is seen in this run.
fn synthesize_groups(
    groups: &[ProviderGroup],
    seen: &mut HashSet<i64>,
    session: &mut Session<'_>,
) -> ExtractResult<Vec<i64>> {
    let mut ids = Vec::with_capacity(groups.len());
    for group in groups {
        if !session.filter.provider_admitted(&group.tin.value) {
            session.ctx.counters.provider_groups_rejected += 1;
            continue;
        }
        let id = synthesize_group_id(&group.npi, group.tin.kind(), &group.tin.value);
        if seen.insert(id) {
            write_group(id, group, &session.stamp, &mut session.providers, &mut session.ctx)?;
            session.ctx.counters.provider_groups_admitted += 1;
        }
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filter::FilterEngine,
        model::RowStamp,
        parquet_writer::BatchedTableWriter,
        run::{Limits, RunContext},
    };
    use serde_json::json;

    fn session<'a>(dir: &std::path::Path, filter: &'a FilterEngine) -> Session<'a> {
        Session {
            ctx: RunContext::new(Limits::default(), false),
            filter,
            stamp: RowStamp::default(),
            providers: BatchedTableWriter::try_new(&dir.join("providers.parquet"), 4).unwrap(),
            rates: BatchedTableWriter::try_new(&dir.join("rates.parquet"), 4).unwrap(),
        }
    }

    fn rate_group(value: serde_json::Value) -> NegotiatedRateGroup {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn referenced_drops_unknown_ids_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let filter = FilterEngine::default();
        let mut s = session(dir.path(), &filter);
        let mut strategy = ReferencedStrategy {
            admitted: HashSet::from([123, 456]),
            ..ReferencedStrategy::default()
        };

        let group = rate_group(json!({
            "provider_references": [123, 999, 123, 456],
            "negotiated_prices": []
        }));
        let ids = strategy.resolve_groups(&group, &mut s).unwrap();
        assert_eq!(ids, Some(vec![123, 456]));
        assert_eq!(s.ctx.counters.references_dropped, 1);
    }

    #[test]
    fn inline_ids_are_stable_and_rows_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let filter = FilterEngine::default();
        let mut s = session(dir.path(), &filter);
        let mut strategy = InlineStrategy::default();
        let group = rate_group(json!({
            "provider_groups": [{"npi": ["2222222222"], "tin": {"type": "ein", "value": "888888888"}}],
            "negotiated_prices": []
        }));

        let first = strategy.resolve_groups(&group, &mut s).unwrap().unwrap();
        let second = strategy.resolve_groups(&group, &mut s).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec![synthesize_group_id(&["2222222222"], "ein", "888888888")]);
        assert_eq!(s.ctx.counters.provider_rows, 1);
        assert_eq!(s.ctx.counters.provider_groups_admitted, 1);
    }

    #[test]
    fn inline_tin_filter_and_missing_groups() {
        let dir = tempfile::tempdir().unwrap();
        let filter = FilterEngine::new(None, Some(["888888888"].into_iter().collect()));
        let mut s = session(dir.path(), &filter);
        let mut strategy = InlineStrategy::default();

        let filtered = rate_group(json!({
            "provider_groups": [{"npi": ["1"], "tin": {"type": "ein", "value": "123"}}],
            "negotiated_prices": []
        }));
        assert_eq!(strategy.resolve_groups(&filtered, &mut s).unwrap(), Some(vec![]));
        assert_eq!(s.ctx.counters.provider_groups_rejected, 1);

        let bare = rate_group(json!({"negotiated_prices": []}));
        assert_eq!(strategy.resolve_groups(&bare, &mut s).unwrap(), None);
    }

    #[test]
    fn referenced_falls_back_to_embedded_groups() {
        let dir = tempfile::tempdir().unwrap();
        let filter = FilterEngine::default();
        let mut s = session(dir.path(), &filter);
        let mut strategy = ReferencedStrategy::default();
        let group = rate_group(json!({
            "provider_groups": [{"npi": [], "tin": {"type": "ein", "value": "777777777"}}],
            "negotiated_prices": []
        }));
        let none: [&str; 0] = [];
        let ids = strategy.resolve_groups(&group, &mut s).unwrap();
        assert_eq!(ids, Some(vec![synthesize_group_id(&none, "ein", "777777777")]));
        assert_eq!(s.ctx.counters.provider_rows, 1);
    }

    #[test]
    fn modes_report_their_layout() {
        assert_eq!(ReferencedStrategy::MODE, SchemaMode::Referenced);
        assert_eq!(InlineStrategy::MODE, SchemaMode::Inline);
    }
}
