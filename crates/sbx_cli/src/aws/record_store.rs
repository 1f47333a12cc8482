use std::collections::HashMap;

use aws_sdk_dynamodb::types::{
    AttributeValue, KeyType, PutRequest, ReturnValue, WriteRequest,
};
use sbx_core::record::{AttrValue, Item};
use sbx_pipeline::adapters::{ExperimentSummary, RecordStore};
use tokio::runtime::Handle;

/// Batch writes are limited to 25 put requests per call.
const BATCH_WRITE_CHUNK: usize = 25;

pub struct DynamoRecordStore {
    client: aws_sdk_dynamodb::Client,
    handle: Handle,
}

impl DynamoRecordStore {
    pub fn new(client: aws_sdk_dynamodb::Client, handle: Handle) -> Self {
        Self { client, handle }
    }
}

/// Convert an envelope value into the SDK representation. The mapping is
/// lossless for the tags this system stores.
fn to_sdk(value: &AttrValue) -> AttributeValue {
    match value {
        AttrValue::S(text) => AttributeValue::S(text.clone()),
        AttrValue::N(number) => AttributeValue::N(number.clone()),
        AttrValue::Bool(flag) => AttributeValue::Bool(*flag),
        AttrValue::Null(flag) => AttributeValue::Null(*flag),
        AttrValue::Ss(values) => AttributeValue::Ss(values.clone()),
        AttrValue::L(values) => AttributeValue::L(values.iter().map(to_sdk).collect()),
        AttrValue::M(map) => AttributeValue::M(
            map.iter()
                .map(|(name, value)| (name.clone(), to_sdk(value)))
                .collect(),
        ),
    }
}

fn from_sdk(value: &AttributeValue) -> Result<AttrValue, String> {
    match value {
        AttributeValue::S(text) => Ok(AttrValue::S(text.clone())),
        AttributeValue::N(number) => Ok(AttrValue::N(number.clone())),
        AttributeValue::Bool(flag) => Ok(AttrValue::Bool(*flag)),
        AttributeValue::Null(flag) => Ok(AttrValue::Null(*flag)),
        AttributeValue::Ss(values) => Ok(AttrValue::Ss(values.clone())),
        AttributeValue::L(values) => Ok(AttrValue::L(
            values.iter().map(from_sdk).collect::<Result<_, _>>()?,
        )),
        AttributeValue::M(map) => Ok(AttrValue::M(
            map.iter()
                .map(|(name, value)| Ok((name.clone(), from_sdk(value)?)))
                .collect::<Result<_, String>>()?,
        )),
        other => Err(format!("unsupported attribute value: {other:?}")),
    }
}

fn item_to_sdk(item: &Item) -> HashMap<String, AttributeValue> {
    item.iter()
        .map(|(name, value)| (name.clone(), to_sdk(value)))
        .collect()
}

fn item_from_sdk(item: &HashMap<String, AttributeValue>) -> Result<Item, String> {
    item.iter()
        .map(|(name, value)| Ok((name.clone(), from_sdk(value)?)))
        .collect()
}

impl RecordStore for DynamoRecordStore {
    fn query_by_experiment(&self, table: &str, experiment_id: &str) -> Result<Vec<Item>, String> {
        let client = self.client.clone();
        let table = table.to_string();
        let experiment_id = experiment_id.to_string();

        self.handle.block_on(async move {
            let response = client
                .query()
                .table_name(&table)
                .key_condition_expression("experimentId = :experiment_id")
                .expression_attribute_values(
                    ":experiment_id",
                    AttributeValue::S(experiment_id.clone()),
                )
                .send()
                .await
                .map_err(|error| format!("failed to query {table}/{experiment_id}: {error}"))?;

            response.items().iter().map(item_from_sdk).collect()
        })
    }

    fn get_item(&self, table: &str, key_attr: &str, key: &str) -> Result<Option<Item>, String> {
        let client = self.client.clone();
        let table = table.to_string();
        let key_attr = key_attr.to_string();
        let key = key.to_string();

        self.handle.block_on(async move {
            let response = client
                .get_item()
                .table_name(&table)
                .key(&key_attr, AttributeValue::S(key.clone()))
                .send()
                .await
                .map_err(|error| format!("failed to get {table}/{key}: {error}"))?;

            response.item().map(item_from_sdk).transpose()
        })
    }

    fn put_item(&self, table: &str, item: &Item) -> Result<(), String> {
        let client = self.client.clone();
        let table = table.to_string();
        let item = item_to_sdk(item);

        self.handle.block_on(async move {
            client
                .put_item()
                .table_name(&table)
                .set_item(Some(item))
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to put record into {table}: {error}"))
        })
    }

    fn batch_put(&self, table: &str, items: &[Item]) -> Result<(), String> {
        let client = self.client.clone();
        let table = table.to_string();

        let mut requests = Vec::with_capacity(items.len());
        for item in items {
            let put = PutRequest::builder()
                .set_item(Some(item_to_sdk(item)))
                .build()
                .map_err(|error| format!("failed to build put request: {error}"))?;
            requests.push(WriteRequest::builder().put_request(put).build());
        }

        self.handle.block_on(async move {
            for chunk in requests.chunks(BATCH_WRITE_CHUNK) {
                client
                    .batch_write_item()
                    .request_items(&table, chunk.to_vec())
                    .send()
                    .await
                    .map_err(|error| format!("failed to batch-write into {table}: {error}"))?;
            }
            Ok(())
        })
    }

    fn update_params_hash(
        &self,
        table: &str,
        experiment_id: &str,
        hash: &str,
    ) -> Result<(), String> {
        let client = self.client.clone();
        let table = table.to_string();
        let experiment_id = experiment_id.to_string();
        let hash = hash.to_string();

        self.handle.block_on(async move {
            client
                .update_item()
                .table_name(&table)
                .key("experimentId", AttributeValue::S(experiment_id.clone()))
                .update_expression("SET meta.gem2s.paramsHash = :hash_string")
                .expression_attribute_values(":hash_string", AttributeValue::S(hash))
                .return_values(ReturnValue::None)
                .send()
                .await
                .map(|_| ())
                .map_err(|error| {
                    format!("failed to update parameter hash on {table}/{experiment_id}: {error}")
                })
        })
    }

    fn scan_experiment_summaries(&self, table: &str) -> Result<Vec<ExperimentSummary>, String> {
        let client = self.client.clone();
        let table = table.to_string();

        self.handle.block_on(async move {
            let mut summaries = Vec::new();
            let mut start_key: Option<HashMap<String, AttributeValue>> = None;

            loop {
                let response = client
                    .scan()
                    .table_name(&table)
                    .projection_expression("experimentId, experimentName")
                    .consistent_read(true)
                    .set_exclusive_start_key(start_key.take())
                    .send()
                    .await
                    .map_err(|error| format!("failed to scan {table}: {error}"))?;

                for item in response.items() {
                    let Some(AttributeValue::S(id)) = item.get("experimentId") else {
                        continue;
                    };
                    let name = match item.get("experimentName") {
                        Some(AttributeValue::S(name)) => name.clone(),
                        _ => String::new(),
                    };
                    summaries.push(ExperimentSummary {
                        id: id.clone(),
                        name,
                    });
                }

                match response.last_evaluated_key() {
                    Some(key) => start_key = Some(key.clone()),
                    None => break,
                }
            }

            summaries.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(summaries)
        })
    }

    fn scan_experiment_ids_with_prefix(
        &self,
        table: &str,
        prefix: &str,
    ) -> Result<Vec<String>, String> {
        let client = self.client.clone();
        let table = table.to_string();
        let prefix = prefix.to_string();

        self.handle.block_on(async move {
            let mut ids = Vec::new();
            let mut start_key: Option<HashMap<String, AttributeValue>> = None;

            loop {
                let response = client
                    .scan()
                    .table_name(&table)
                    .projection_expression("experimentId")
                    .filter_expression("begins_with(experimentId, :sandbox_id)")
                    .expression_attribute_values(":sandbox_id", AttributeValue::S(prefix.clone()))
                    .set_exclusive_start_key(start_key.take())
                    .send()
                    .await
                    .map_err(|error| format!("failed to scan {table}: {error}"))?;

                ids.extend(response.items().iter().filter_map(|item| {
                    match item.get("experimentId") {
                        Some(AttributeValue::S(id)) => Some(id.clone()),
                        _ => None,
                    }
                }));

                match response.last_evaluated_key() {
                    Some(key) => start_key = Some(key.clone()),
                    None => break,
                }
            }

            Ok(ids)
        })
    }

    fn list_tables(&self) -> Result<Vec<String>, String> {
        let client = self.client.clone();

        self.handle.block_on(async move {
            let mut tables = Vec::new();
            let mut start_name: Option<String> = None;

            loop {
                let response = client
                    .list_tables()
                    .set_exclusive_start_table_name(start_name.take())
                    .send()
                    .await
                    .map_err(|error| format!("failed to list tables: {error}"))?;

                tables.extend(response.table_names().iter().cloned());

                match response.last_evaluated_table_name() {
                    Some(name) => start_name = Some(name.to_string()),
                    None => break,
                }
            }

            Ok(tables)
        })
    }

    fn sort_key(&self, table: &str) -> Result<Option<String>, String> {
        let client = self.client.clone();
        let table = table.to_string();

        self.handle.block_on(async move {
            let response = client
                .describe_table()
                .table_name(&table)
                .send()
                .await
                .map_err(|error| format!("failed to describe table {table}: {error}"))?;

            let Some(description) = response.table() else {
                return Ok(None);
            };
            Ok(description
                .key_schema()
                .iter()
                .find(|element| element.key_type() == &KeyType::Range)
                .map(|element| element.attribute_name().to_string()))
        })
    }

    fn query_item_sort_keys(
        &self,
        table: &str,
        experiment_id: &str,
        sort_key: &str,
    ) -> Result<Vec<AttrValue>, String> {
        let client = self.client.clone();
        let table = table.to_string();
        let experiment_id = experiment_id.to_string();
        let sort_key = sort_key.to_string();

        self.handle.block_on(async move {
            let response = client
                .query()
                .table_name(&table)
                .projection_expression(format!("experimentId, {sort_key}"))
                .key_condition_expression("experimentId = :experiment_id")
                .expression_attribute_values(
                    ":experiment_id",
                    AttributeValue::S(experiment_id.clone()),
                )
                .send()
                .await
                .map_err(|error| format!("failed to query {table}/{experiment_id}: {error}"))?;

            response
                .items()
                .iter()
                .filter_map(|item| item.get(&sort_key))
                .map(from_sdk)
                .collect()
        })
    }

    fn delete_item(&self, table: &str, key: &Item) -> Result<(), String> {
        let client = self.client.clone();
        let table = table.to_string();
        let key = item_to_sdk(key);

        self.handle.block_on(async move {
            client
                .delete_item()
                .table_name(&table)
                .set_key(Some(key))
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to delete record from {table}: {error}"))
        })
    }
}
