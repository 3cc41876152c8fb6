use anyhow::Result;
use arrow::{
    array::{ArrayRef, Float64Array, Int64Array, ListBuilder, StringArray, StringBuilder},
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use std::sync::Arc;

use crate::{
    model::{ProviderRow, RateRow},
    parquet_writer::TableRow,
};

pub const PROVIDERS_TABLE: &str = "providers";
pub const RATES_TABLE: &str = "rates";

fn text(name: &str, nullable: bool) -> Field {
    Field::new(name, DataType::Utf8, nullable)
}

fn text_list(name: &str) -> Field {
    Field::new_list(name, Field::new("item", DataType::Utf8, true), false)
}

fn text_column<'a, R: 'a>(rows: &'a [R], get: impl Fn(&'a R) -> Option<&'a str>) -> ArrayRef {
    Arc::new(rows.iter().map(get).collect::<StringArray>())
}

fn list_column<'a, R: 'a>(rows: &'a [R], get: impl Fn(&'a R) -> &'a [String]) -> ArrayRef {
    let mut builder = ListBuilder::new(StringBuilder::new());
    for row in rows {
        for value in get(row) {
            builder.values().append_value(value);
        }
        builder.append(true);
    }
    Arc::new(builder.finish())
}

impl TableRow for ProviderRow {
    const TABLE: &'static str = PROVIDERS_TABLE;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("provider_group_id", DataType::Int64, false),
            text("npi", true),
            text("tin_type", false),
            text("tin_value", false),
            text("reporting_entity_name", true),
            text("reporting_entity_type", true),
            text("last_updated_on", true),
            text("version", true),
            text("network_id", true),
        ]))
    }

    fn to_record_batch(rows: &[Self], schema: SchemaRef) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.provider_group_id))),
            text_column(rows, |r| r.npi.as_deref()),
            text_column(rows, |r| Some(r.tin_type.as_str())),
            text_column(rows, |r| Some(r.tin_value.as_str())),
            text_column(rows, |r| r.reporting_entity_name.as_deref()),
            text_column(rows, |r| r.reporting_entity_type.as_deref()),
            text_column(rows, |r| r.last_updated_on.as_deref()),
            text_column(rows, |r| r.version.as_deref()),
            text_column(rows, |r| r.network_id.as_deref()),
        ];
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

impl TableRow for RateRow {
    const TABLE: &'static str = RATES_TABLE;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("provider_group_id", DataType::Int64, false),
            text("billing_code", false),
            text("billing_code_type", true),
            text("billing_code_type_version", true),
            text("description", true),
            text("name", true),
            Field::new("negotiated_rate", DataType::Float64, false),
            text("negotiated_type", true),
            text("billing_class", true),
            text("expiration_date", true),
            text_list("service_codes"),
            text_list("billing_code_modifiers"),
            text("negotiation_arrangement", true),
            text("additional_information", true),
            text_list("plan_name"),
            text_list("plan_id"),
            text_list("plan_id_type"),
            text_list("plan_market_type"),
            text("network_id", true),
            text("reporting_entity_name", true),
            text("reporting_entity_type", true),
            text("last_updated_on", true),
            text("version", true),
        ]))
    }

    fn to_record_batch(rows: &[Self], schema: SchemaRef) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.provider_group_id))),
            text_column(rows, |r| Some(r.billing_code.as_str())),
            text_column(rows, |r| r.billing_code_type.as_deref()),
            text_column(rows, |r| r.billing_code_type_version.as_deref()),
            text_column(rows, |r| r.description.as_deref()),
            text_column(rows, |r| r.name.as_deref()),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.negotiated_rate))),
            text_column(rows, |r| r.negotiated_type.as_deref()),
            text_column(rows, |r| r.billing_class.as_deref()),
            text_column(rows, |r| r.expiration_date.as_deref()),
            list_column(rows, |r| r.service_codes.as_slice()),
            list_column(rows, |r| r.billing_code_modifiers.as_slice()),
            text_column(rows, |r| r.negotiation_arrangement.as_deref()),
            text_column(rows, |r| r.additional_information.as_deref()),
            list_column(rows, |r| r.plan_name.as_slice()),
            list_column(rows, |r| r.plan_id.as_slice()),
            list_column(rows, |r| r.plan_id_type.as_slice()),
            list_column(rows, |r| r.plan_market_type.as_slice()),
            text_column(rows, |r| r.network_id.as_deref()),
            text_column(rows, |r| r.reporting_entity_name.as_deref()),
            text_column(rows, |r| r.reporting_entity_type.as_deref()),
            text_column(rows, |r| r.last_updated_on.as_deref()),
            text_column(rows, |r| r.version.as_deref()),
        ];
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}
