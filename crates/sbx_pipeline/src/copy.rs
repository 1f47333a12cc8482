use sbx_core::cellsets::prefix_sample_keys;
use sbx_core::naming::{map_environment, prefixed, BucketRole, Environment};
use sbx_core::params_hash::pipeline_params_hash;
use sbx_core::record::AttrValue;
use sbx_core::remap::{remap_item, RemapError, TableRole};
use sbx_core::report::CopyReport;
use serde_json::Value;

use crate::adapters::{ObjectStore, RecordStore};
use crate::config::SandboxConfig;
use crate::error::PipelineError;

/// One copy-pipeline invocation: which experiments to copy, under which
/// sandbox namespace, and between which environments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    pub experiments: Vec<String>,
    pub sandbox_id: String,
    pub origin: Environment,
    pub destination: Environment,
    /// Platform username granted write access on copied experiment records.
    pub grantee: Option<String>,
}

/// Progress notifications emitted while the pipeline runs. The caller
/// decides how to render them; the pipeline itself never prints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyEvent {
    BucketStarted {
        source: String,
        target: String,
    },
    ObjectCopied {
        bucket: String,
        key: String,
    },
    ObjectSkipped {
        bucket: String,
        key: String,
    },
    ObjectFailed {
        bucket: String,
        key: String,
        message: String,
    },
    TableStarted {
        source: String,
        target: String,
    },
    RecordsWritten {
        table: String,
        experiment: String,
        count: usize,
    },
    RecordFailed {
        table: String,
        experiment: String,
        message: String,
    },
    HashRecomputed {
        experiment: String,
    },
}

/// Copy the requested experiments from the origin environment into the
/// destination environment under the sandbox namespace.
///
/// The pass is strictly sequential: every source bucket is listed, diffed
/// and copied per experiment, then every source table is remapped and
/// written, then the parameter hash of each copied experiment is
/// recomputed. Per-object and per-record failures are reported and skipped;
/// listing failures and empty source prefixes abort the run.
pub fn copy_experiments(
    objects: &impl ObjectStore,
    records: &impl RecordStore,
    config: &SandboxConfig,
    request: &CopyRequest,
    on_event: &mut dyn FnMut(CopyEvent),
) -> Result<CopyReport, PipelineError> {
    let mut report = CopyReport::default();

    copy_storage_objects(objects, records, config, request, &mut report, on_event)?;
    copy_table_records(records, config, request, &mut report, on_event)?;
    recompute_parameter_hashes(records, config, request, &mut report, on_event)?;

    Ok(report)
}

fn copy_storage_objects(
    objects: &impl ObjectStore,
    records: &impl RecordStore,
    config: &SandboxConfig,
    request: &CopyRequest,
    report: &mut CopyReport,
    on_event: &mut dyn FnMut(CopyEvent),
) -> Result<(), PipelineError> {
    for source_bucket in &config.source_buckets {
        let target_bucket = map_environment(source_bucket, request.origin, request.destination);
        let role = BucketRole::from_name(source_bucket);
        on_event(CopyEvent::BucketStarted {
            source: source_bucket.clone(),
            target: target_bucket.clone(),
        });

        for experiment_id in &request.experiments {
            // originals buckets are keyed by project, not experiment
            let prefix = match role {
                BucketRole::Originals => {
                    experiment_project_id(records, config, request.origin, experiment_id)?
                }
                _ => experiment_id.clone(),
            };

            copy_bucket_prefix(
                objects,
                &request.sandbox_id,
                &prefix,
                source_bucket,
                &target_bucket,
                role,
                report,
                on_event,
            )?;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn copy_bucket_prefix(
    objects: &impl ObjectStore,
    sandbox_id: &str,
    prefix: &str,
    source_bucket: &str,
    target_bucket: &str,
    role: BucketRole,
    report: &mut CopyReport,
    on_event: &mut dyn FnMut(CopyEvent),
) -> Result<(), PipelineError> {
    let location = format!("{source_bucket}/{prefix}");
    let listed = objects
        .list_objects(source_bucket, prefix)
        .map_err(|message| PipelineError::listing(&location, message))?;
    if listed.is_empty() {
        return Err(PipelineError::EmptySource { location });
    }

    for object in listed {
        let target_key = sbx_core::naming::remap_object_key(&object.key, sandbox_id, role);

        if definitely_equal(objects, target_bucket, &target_key, &object.etag) {
            report
                .skipped_objects
                .push(format!("{target_bucket}/{target_key}"));
            on_event(CopyEvent::ObjectSkipped {
                bucket: target_bucket.to_string(),
                key: target_key,
            });
            continue;
        }

        let outcome = if role == BucketRole::CellSets {
            copy_cell_sets_object(
                objects,
                sandbox_id,
                source_bucket,
                &object.key,
                target_bucket,
                &target_key,
            )
        } else {
            objects.copy_object(source_bucket, &object.key, target_bucket, &target_key)
        };

        match outcome {
            Ok(()) => {
                report
                    .copied_objects
                    .push(format!("{target_bucket}/{target_key}"));
                on_event(CopyEvent::ObjectCopied {
                    bucket: target_bucket.to_string(),
                    key: target_key,
                });
            }
            Err(message) => {
                report.record_failure(format!("{source_bucket}/{}", object.key), &message);
                on_event(CopyEvent::ObjectFailed {
                    bucket: source_bucket.to_string(),
                    key: object.key.clone(),
                    message,
                });
            }
        }
    }

    Ok(())
}

/// Only a confirmed entity-tag match counts as equal; any failure reaching
/// the destination (including "not found") means the copy must happen.
/// False negatives cost a redundant copy, false positives would lose data.
fn definitely_equal(objects: &impl ObjectStore, bucket: &str, key: &str, etag: &str) -> bool {
    objects.head_matches(bucket, key, etag).unwrap_or(false)
}

/// Cell-sets documents are not byte-copied: the JSON is deserialized, sample
/// keys are moved under the sandbox namespace, and the result is written to
/// the destination.
fn copy_cell_sets_object(
    objects: &impl ObjectStore,
    sandbox_id: &str,
    source_bucket: &str,
    source_key: &str,
    target_bucket: &str,
    target_key: &str,
) -> Result<(), String> {
    let body = objects.get_object(source_bucket, source_key)?;
    let mut document: Value = serde_json::from_slice(&body)
        .map_err(|error| format!("invalid cell-sets document: {error}"))?;
    prefix_sample_keys(sandbox_id, &mut document).map_err(|error| error.to_string())?;
    let rewritten = serde_json::to_vec(&document)
        .map_err(|error| format!("failed to reserialize cell-sets document: {error}"))?;
    objects.put_object(target_bucket, target_key, &rewritten)
}

fn copy_table_records(
    records: &impl RecordStore,
    config: &SandboxConfig,
    request: &CopyRequest,
    report: &mut CopyReport,
    on_event: &mut dyn FnMut(CopyEvent),
) -> Result<(), PipelineError> {
    for source_table in &config.source_tables {
        let target_table = map_environment(source_table, request.origin, request.destination);
        let role = config
            .table_role(&target_table)
            .ok_or_else(|| RemapError::UnknownTable(target_table.clone()))?;
        on_event(CopyEvent::TableStarted {
            source: source_table.clone(),
            target: target_table.clone(),
        });

        match role {
            TableRole::Projects => copy_project_records(
                records,
                config,
                request,
                source_table,
                &target_table,
                report,
                on_event,
            )?,
            _ => copy_partitioned_records(
                records,
                request,
                role,
                source_table,
                &target_table,
                report,
                on_event,
            )?,
        }
    }

    Ok(())
}

fn copy_partitioned_records(
    records: &impl RecordStore,
    request: &CopyRequest,
    role: TableRole,
    source_table: &str,
    target_table: &str,
    report: &mut CopyReport,
    on_event: &mut dyn FnMut(CopyEvent),
) -> Result<(), PipelineError> {
    // write access is granted on the experiment record only
    let grantee = match role {
        TableRole::Experiments => request.grantee.as_deref(),
        _ => None,
    };

    for experiment_id in &request.experiments {
        let items = records
            .query_by_experiment(source_table, experiment_id)
            .map_err(|message| {
                PipelineError::listing(format!("{source_table}/{experiment_id}"), message)
            })?;

        let mut remapped = Vec::with_capacity(items.len());
        for item in &items {
            remapped.push(remap_item(role, item, &request.sandbox_id, grantee)?);
        }
        if remapped.is_empty() {
            continue;
        }

        match records.batch_put(target_table, &remapped) {
            Ok(()) => {
                report.copied_records += remapped.len();
                on_event(CopyEvent::RecordsWritten {
                    table: target_table.to_string(),
                    experiment: experiment_id.clone(),
                    count: remapped.len(),
                });
            }
            Err(message) => {
                report.record_failure(format!("{target_table}/{experiment_id}"), &message);
                on_event(CopyEvent::RecordFailed {
                    table: target_table.to_string(),
                    experiment: experiment_id.clone(),
                    message,
                });
            }
        }
    }

    Ok(())
}

fn copy_project_records(
    records: &impl RecordStore,
    config: &SandboxConfig,
    request: &CopyRequest,
    source_table: &str,
    target_table: &str,
    report: &mut CopyReport,
    on_event: &mut dyn FnMut(CopyEvent),
) -> Result<(), PipelineError> {
    for experiment_id in &request.experiments {
        let project_id = experiment_project_id(records, config, request.origin, experiment_id)?;
        let location = format!("{source_table}/{project_id}");

        let item = records
            .get_item(source_table, "projectUuid", &project_id)
            .map_err(|message| PipelineError::record(&location, message))?
            .ok_or_else(|| PipelineError::record(&location, "project record not found"))?;

        let remapped = remap_item(TableRole::Projects, &item, &request.sandbox_id, None)?;

        match records.put_item(target_table, &remapped) {
            Ok(()) => {
                report.copied_records += 1;
                on_event(CopyEvent::RecordsWritten {
                    table: target_table.to_string(),
                    experiment: experiment_id.clone(),
                    count: 1,
                });
            }
            Err(message) => {
                report.record_failure(&location, &message);
                on_event(CopyEvent::RecordFailed {
                    table: target_table.to_string(),
                    experiment: experiment_id.clone(),
                    message,
                });
            }
        }
    }

    Ok(())
}

/// After the copy, recompute the parameter hash of each copied experiment
/// from the destination records and write it back, so the downstream
/// pipeline treats the copy as already processed.
fn recompute_parameter_hashes(
    records: &impl RecordStore,
    config: &SandboxConfig,
    request: &CopyRequest,
    report: &mut CopyReport,
    on_event: &mut dyn FnMut(CopyEvent),
) -> Result<(), PipelineError> {
    let experiments_table = config.experiments_table(request.destination)?;
    let projects_table = config.projects_table(request.destination)?;
    let samples_table = config.samples_table(request.destination)?;

    for experiment_id in &request.experiments {
        let copied_id = prefixed(&request.sandbox_id, experiment_id);

        let experiment = required_item(records, experiments_table, "experimentId", &copied_id)?;
        let project_ref = experiment
            .get("projectId")
            .and_then(AttrValue::as_s)
            .ok_or_else(|| {
                PipelineError::record(
                    format!("{experiments_table}/{copied_id}"),
                    "copied experiment has no projectId",
                )
            })?
            .to_string();

        let project_item = required_item(records, projects_table, "projectUuid", &project_ref)?;
        let project = project_item
            .get("projects")
            .and_then(AttrValue::as_m)
            .ok_or_else(|| {
                PipelineError::record(
                    format!("{projects_table}/{project_ref}"),
                    "project record has no projects map",
                )
            })?;

        let samples_item = required_item(records, samples_table, "experimentId", &copied_id)?;
        let samples = samples_item
            .get("samples")
            .and_then(AttrValue::as_m)
            .ok_or_else(|| {
                PipelineError::record(
                    format!("{samples_table}/{copied_id}"),
                    "sample collection has no samples map",
                )
            })?;

        let hash = pipeline_params_hash(&experiment, project, samples)?;
        records
            .update_params_hash(experiments_table, &copied_id, &hash)
            .map_err(|message| {
                PipelineError::record(format!("{experiments_table}/{copied_id}"), message)
            })?;

        report.rehashed_experiments.push(copied_id.clone());
        on_event(CopyEvent::HashRecomputed {
            experiment: copied_id,
        });
    }

    Ok(())
}

fn experiment_project_id(
    records: &impl RecordStore,
    config: &SandboxConfig,
    origin: Environment,
    experiment_id: &str,
) -> Result<String, PipelineError> {
    let table = config.experiments_table(origin)?;
    let item = required_item(records, table, "experimentId", experiment_id)?;
    item.get("projectId")
        .and_then(AttrValue::as_s)
        .map(str::to_string)
        .ok_or_else(|| {
            PipelineError::record(
                format!("{table}/{experiment_id}"),
                "experiment record has no projectId",
            )
        })
}

fn required_item(
    records: &impl RecordStore,
    table: &str,
    key_attr: &str,
    key: &str,
) -> Result<sbx_core::record::Item, PipelineError> {
    records
        .get_item(table, key_attr, key)
        .map_err(|message| PipelineError::record(format!("{table}/{key}"), message))?
        .ok_or_else(|| PipelineError::record(format!("{table}/{key}"), "record not found"))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    use sbx_core::record::Item;
    use serde_json::json;

    use super::*;
    use crate::adapters::{ExperimentSummary, StoredObject};
    use crate::config::test_config;

    // ── fakes ──────────────────────────────────────────────────────────

    #[derive(Default)]
    pub(crate) struct InMemoryObjectStore {
        pub objects: Mutex<HashMap<(String, String), (String, Vec<u8>)>>,
        pub writes: Mutex<usize>,
        pub fail_copies_to: Mutex<Option<String>>,
    }

    impl InMemoryObjectStore {
        pub fn seed(&self, bucket: &str, key: &str, body: &[u8]) {
            self.objects.lock().expect("poisoned mutex").insert(
                (bucket.to_string(), key.to_string()),
                (fake_etag(body), body.to_vec()),
            );
        }

        pub fn body(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
            self.objects
                .lock()
                .expect("poisoned mutex")
                .get(&(bucket.to_string(), key.to_string()))
                .map(|(_, body)| body.clone())
        }

        pub fn keys_in(&self, bucket: &str) -> Vec<String> {
            let mut keys: Vec<String> = self
                .objects
                .lock()
                .expect("poisoned mutex")
                .keys()
                .filter(|(b, _)| b == bucket)
                .map(|(_, key)| key.clone())
                .collect();
            keys.sort();
            keys
        }

        pub fn write_count(&self) -> usize {
            *self.writes.lock().expect("poisoned mutex")
        }
    }

    pub(crate) fn fake_etag(body: &[u8]) -> String {
        let sum = body
            .iter()
            .fold(0u32, |acc, byte| acc.wrapping_mul(31).wrapping_add(*byte as u32));
        format!("\"{sum:08x}\"")
    }

    impl ObjectStore for InMemoryObjectStore {
        fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<StoredObject>, String> {
            let objects = self.objects.lock().expect("poisoned mutex");
            let mut listed: Vec<StoredObject> = objects
                .iter()
                .filter(|((b, key), _)| b == bucket && key.starts_with(prefix))
                .map(|((_, key), (etag, _))| StoredObject {
                    key: key.clone(),
                    etag: etag.clone(),
                })
                .collect();
            listed.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(listed)
        }

        fn head_matches(&self, bucket: &str, key: &str, etag: &str) -> Result<bool, String> {
            let objects = self.objects.lock().expect("poisoned mutex");
            match objects.get(&(bucket.to_string(), key.to_string())) {
                Some((existing, _)) => Ok(existing == etag),
                None => Ok(false),
            }
        }

        fn copy_object(
            &self,
            source_bucket: &str,
            source_key: &str,
            target_bucket: &str,
            target_key: &str,
        ) -> Result<(), String> {
            if let Some(denied) = &*self.fail_copies_to.lock().expect("poisoned mutex") {
                if target_bucket == denied {
                    return Err("simulated copy failure".to_string());
                }
            }
            let mut objects = self.objects.lock().expect("poisoned mutex");
            let source = objects
                .get(&(source_bucket.to_string(), source_key.to_string()))
                .cloned()
                .ok_or_else(|| format!("source object {source_bucket}/{source_key} missing"))?;
            objects.insert((target_bucket.to_string(), target_key.to_string()), source);
            *self.writes.lock().expect("poisoned mutex") += 1;
            Ok(())
        }

        fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, String> {
            self.body(bucket, key)
                .ok_or_else(|| format!("object {bucket}/{key} missing"))
        }

        fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), String> {
            self.objects.lock().expect("poisoned mutex").insert(
                (bucket.to_string(), key.to_string()),
                (fake_etag(body), body.to_vec()),
            );
            *self.writes.lock().expect("poisoned mutex") += 1;
            Ok(())
        }

        fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), String> {
            let mut objects = self.objects.lock().expect("poisoned mutex");
            for key in keys {
                objects.remove(&(bucket.to_string(), key.clone()));
            }
            Ok(())
        }

        fn list_buckets(&self) -> Result<Vec<String>, String> {
            let objects = self.objects.lock().expect("poisoned mutex");
            let mut buckets: Vec<String> = objects.keys().map(|(b, _)| b.clone()).collect();
            buckets.sort();
            buckets.dedup();
            Ok(buckets)
        }
    }

    #[derive(Default)]
    pub(crate) struct InMemoryRecordStore {
        pub tables: Mutex<HashMap<String, Vec<Item>>>,
        pub sort_keys: Mutex<HashMap<String, String>>,
        pub fail_batch_for: Mutex<Option<String>>,
    }

    impl InMemoryRecordStore {
        pub fn seed(&self, table: &str, item: Item) {
            self.tables
                .lock()
                .expect("poisoned mutex")
                .entry(table.to_string())
                .or_default()
                .push(item);
        }

        pub fn items(&self, table: &str) -> Vec<Item> {
            self.tables
                .lock()
                .expect("poisoned mutex")
                .get(table)
                .cloned()
                .unwrap_or_default()
        }

        fn partition_key(item: &Item) -> Option<(String, String)> {
            for attr in ["experimentId", "projectUuid"] {
                if let Some(value) = item.get(attr).and_then(AttrValue::as_s) {
                    return Some((attr.to_string(), value.to_string()));
                }
            }
            None
        }

        fn upsert(table: &mut Vec<Item>, item: Item) {
            let key = Self::partition_key(&item);
            table.retain(|existing| Self::partition_key(existing) != key);
            table.push(item);
        }
    }

    impl RecordStore for InMemoryRecordStore {
        fn query_by_experiment(
            &self,
            table: &str,
            experiment_id: &str,
        ) -> Result<Vec<Item>, String> {
            Ok(self
                .items(table)
                .into_iter()
                .filter(|item| {
                    item.get("experimentId").and_then(AttrValue::as_s) == Some(experiment_id)
                })
                .collect())
        }

        fn get_item(&self, table: &str, key_attr: &str, key: &str) -> Result<Option<Item>, String> {
            Ok(self
                .items(table)
                .into_iter()
                .find(|item| item.get(key_attr).and_then(AttrValue::as_s) == Some(key)))
        }

        fn put_item(&self, table: &str, item: &Item) -> Result<(), String> {
            let mut tables = self.tables.lock().expect("poisoned mutex");
            Self::upsert(tables.entry(table.to_string()).or_default(), item.clone());
            Ok(())
        }

        fn batch_put(&self, table: &str, items: &[Item]) -> Result<(), String> {
            if let Some(denied) = &*self.fail_batch_for.lock().expect("poisoned mutex") {
                if table == denied {
                    return Err("simulated batch write failure".to_string());
                }
            }
            let mut tables = self.tables.lock().expect("poisoned mutex");
            let entries = tables.entry(table.to_string()).or_default();
            for item in items {
                Self::upsert(entries, item.clone());
            }
            Ok(())
        }

        fn update_params_hash(
            &self,
            table: &str,
            experiment_id: &str,
            hash: &str,
        ) -> Result<(), String> {
            let mut tables = self.tables.lock().expect("poisoned mutex");
            let entries = tables
                .get_mut(table)
                .ok_or_else(|| format!("table {table} missing"))?;
            let item = entries
                .iter_mut()
                .find(|item| {
                    item.get("experimentId").and_then(AttrValue::as_s) == Some(experiment_id)
                })
                .ok_or_else(|| format!("experiment {experiment_id} missing in {table}"))?;

            let meta = item
                .entry("meta".to_string())
                .or_insert_with(|| AttrValue::M(BTreeMap::new()))
                .as_m_mut()
                .ok_or_else(|| "meta is not a map".to_string())?;
            let gem2s = meta
                .entry("gem2s".to_string())
                .or_insert_with(|| AttrValue::M(BTreeMap::new()))
                .as_m_mut()
                .ok_or_else(|| "meta.gem2s is not a map".to_string())?;
            gem2s.insert("paramsHash".to_string(), AttrValue::s(hash));
            Ok(())
        }

        fn scan_experiment_summaries(
            &self,
            table: &str,
        ) -> Result<Vec<ExperimentSummary>, String> {
            let mut summaries: Vec<ExperimentSummary> = self
                .items(table)
                .iter()
                .filter_map(|item| {
                    Some(ExperimentSummary {
                        id: item.get("experimentId")?.as_s()?.to_string(),
                        name: item
                            .get("experimentName")
                            .and_then(AttrValue::as_s)
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect();
            summaries.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(summaries)
        }

        fn scan_experiment_ids_with_prefix(
            &self,
            table: &str,
            prefix: &str,
        ) -> Result<Vec<String>, String> {
            Ok(self
                .items(table)
                .iter()
                .filter_map(|item| item.get("experimentId").and_then(AttrValue::as_s))
                .filter(|id| id.starts_with(prefix))
                .map(str::to_string)
                .collect())
        }

        fn list_tables(&self) -> Result<Vec<String>, String> {
            let mut names: Vec<String> = self
                .tables
                .lock()
                .expect("poisoned mutex")
                .keys()
                .cloned()
                .collect();
            names.sort();
            Ok(names)
        }

        fn sort_key(&self, table: &str) -> Result<Option<String>, String> {
            Ok(self
                .sort_keys
                .lock()
                .expect("poisoned mutex")
                .get(table)
                .cloned())
        }

        fn query_item_sort_keys(
            &self,
            table: &str,
            experiment_id: &str,
            sort_key: &str,
        ) -> Result<Vec<AttrValue>, String> {
            Ok(self
                .query_by_experiment(table, experiment_id)?
                .iter()
                .filter_map(|item| item.get(sort_key).cloned())
                .collect())
        }

        fn delete_item(&self, table: &str, key: &Item) -> Result<(), String> {
            let mut tables = self.tables.lock().expect("poisoned mutex");
            let Some(entries) = tables.get_mut(table) else {
                return Ok(());
            };
            entries.retain(|item| {
                !key.iter().all(|(attr, value)| item.get(attr) == Some(value))
            });
            Ok(())
        }
    }

    // ── fixtures ───────────────────────────────────────────────────────

    pub(crate) fn experiment_item(id: &str, project: &str) -> Item {
        BTreeMap::from([
            ("experimentId".to_string(), AttrValue::s(id)),
            ("projectId".to_string(), AttrValue::s(project)),
            ("experimentName".to_string(), AttrValue::s("PBMC run")),
            (
                "meta".to_string(),
                AttrValue::M(BTreeMap::from([
                    ("type".to_string(), AttrValue::s("10x")),
                    ("organism".to_string(), AttrValue::s("mouse")),
                    ("gem2s".to_string(), AttrValue::M(BTreeMap::new())),
                ])),
            ),
            (
                "rbac_can_write".to_string(),
                AttrValue::Ss(vec!["owner".to_string()]),
            ),
        ])
    }

    pub(crate) fn sample_collection_item(experiment: &str, project: &str) -> Item {
        BTreeMap::from([
            ("experimentId".to_string(), AttrValue::s(experiment)),
            ("projectUuid".to_string(), AttrValue::s(project)),
            (
                "samples".to_string(),
                AttrValue::M(BTreeMap::from([(
                    "s1".to_string(),
                    AttrValue::M(BTreeMap::from([
                        ("uuid".to_string(), AttrValue::s("s1")),
                        ("name".to_string(), AttrValue::s("WT1")),
                        ("projectUuid".to_string(), AttrValue::s(project)),
                        (
                            "metadata".to_string(),
                            AttrValue::M(BTreeMap::new()),
                        ),
                        (
                            "files".to_string(),
                            AttrValue::M(BTreeMap::from([(
                                "matrix.tsv.gz".to_string(),
                                AttrValue::M(BTreeMap::from([(
                                    "path".to_string(),
                                    AttrValue::s(format!("{project}/s1/matrix.tsv.gz")),
                                )])),
                            )])),
                        ),
                    ])),
                )])),
            ),
        ])
    }

    pub(crate) fn project_item(project: &str, experiment: &str) -> Item {
        BTreeMap::from([
            ("projectUuid".to_string(), AttrValue::s(project)),
            (
                "projects".to_string(),
                AttrValue::M(BTreeMap::from([
                    ("uuid".to_string(), AttrValue::s(project)),
                    (
                        "experiments".to_string(),
                        AttrValue::L(vec![AttrValue::s(experiment)]),
                    ),
                    (
                        "samples".to_string(),
                        AttrValue::L(vec![AttrValue::s("s1")]),
                    ),
                    ("metadataKeys".to_string(), AttrValue::L(Vec::new())),
                ])),
            ),
        ])
    }

    fn seed_environment(objects: &InMemoryObjectStore, records: &InMemoryRecordStore) {
        objects.seed(
            "biodata-source-production",
            "exp123/raw.rds",
            b"raw-object-bytes",
        );
        objects.seed(
            "biodata-cell-sets-production",
            "exp123",
            cell_sets_body().as_bytes(),
        );
        objects.seed(
            "biodata-originals-production",
            "p1/s1/matrix.tsv.gz",
            b"matrix-bytes",
        );

        records.seed("experiments-production", experiment_item("exp123", "p1"));
        records.seed(
            "samples-production",
            sample_collection_item("exp123", "p1"),
        );
        records.seed("projects-production", project_item("p1", "exp123"));
    }

    fn cell_sets_body() -> String {
        json!({
            "cellSets": [
                {
                    "key": "sample",
                    "children": [{"key": "s1", "cellIds": [1, 2]}]
                },
                {
                    "key": "louvain",
                    "children": [{"key": "louvain-0", "cellIds": [1]}]
                }
            ]
        })
        .to_string()
    }

    pub(crate) fn request() -> CopyRequest {
        CopyRequest {
            experiments: vec!["exp123".to_string()],
            sandbox_id: "sbx1".to_string(),
            origin: Environment::Production,
            destination: Environment::Staging,
            grantee: Some("alice".to_string()),
        }
    }

    fn run(
        objects: &InMemoryObjectStore,
        records: &InMemoryRecordStore,
        request: &CopyRequest,
    ) -> Result<CopyReport, PipelineError> {
        copy_experiments(objects, records, &test_config(), request, &mut |_| {})
    }

    // ── tests ──────────────────────────────────────────────────────────

    #[test]
    fn copies_objects_under_prefixed_keys() {
        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();
        seed_environment(&objects, &records);

        let report = run(&objects, &records, &request()).expect("copy should succeed");

        assert_eq!(
            objects.keys_in("biodata-source-staging"),
            vec!["sbx1-exp123/raw.rds".to_string()]
        );
        assert_eq!(
            objects.keys_in("biodata-originals-staging"),
            vec!["sbx1-p1/sbx1-s1/matrix.tsv.gz".to_string()]
        );
        assert_eq!(report.copied_objects.len(), 3);
        assert!(report.is_clean());
    }

    #[test]
    fn rewrites_cell_sets_sample_keys_on_copy() {
        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();
        seed_environment(&objects, &records);

        run(&objects, &records, &request()).expect("copy should succeed");

        let body = objects
            .body("biodata-cell-sets-staging", "sbx1-exp123")
            .expect("cell sets copy should exist");
        let document: Value = serde_json::from_slice(&body).expect("copy should be valid json");

        assert_eq!(document["cellSets"][0]["children"][0]["key"], "sbx1-s1");
        assert_eq!(document["cellSets"][1]["children"][0]["key"], "louvain-0");
    }

    #[test]
    fn end_to_end_scenario_produces_prefixed_records_and_a_hash() {
        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();
        seed_environment(&objects, &records);

        let report = run(&objects, &records, &request()).expect("copy should succeed");

        let experiment = records
            .get_item("experiments-staging", "experimentId", "sbx1-exp123")
            .expect("get should succeed")
            .expect("copied experiment should exist");
        assert_eq!(experiment["projectId"].as_s(), Some("sbx1-p1"));

        let hash = experiment["meta"].as_m().unwrap()["gem2s"].as_m().unwrap()["paramsHash"]
            .as_s()
            .expect("hash should be a string");
        assert_eq!(hash.len(), 40);

        let samples = records
            .get_item("samples-staging", "experimentId", "sbx1-exp123")
            .expect("get should succeed")
            .expect("copied sample collection should exist");
        assert_eq!(samples["projectUuid"].as_s(), Some("sbx1-p1"));
        let sample = samples["samples"].as_m().unwrap()["sbx1-s1"]
            .as_m()
            .expect("remapped sample should exist");
        assert_eq!(sample["projectUuid"].as_s(), Some("sbx1-p1"));

        let project = records
            .get_item("projects-staging", "projectUuid", "sbx1-p1")
            .expect("get should succeed")
            .expect("copied project should exist");
        let members = project["projects"].as_m().unwrap();
        assert_eq!(
            members["experiments"],
            AttrValue::L(vec![AttrValue::s("sbx1-exp123")])
        );

        assert_eq!(report.rehashed_experiments, vec!["sbx1-exp123".to_string()]);
    }

    #[test]
    fn no_unprefixed_foreign_keys_survive_the_copy() {
        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();
        seed_environment(&objects, &records);

        run(&objects, &records, &request()).expect("copy should succeed");

        for table in ["experiments-staging", "samples-staging", "projects-staging"] {
            let encoded = serde_json::to_string(&records.items(table))
                .expect("items should serialize");
            assert!(
                !encoded.contains(r#""exp123""#) && !encoded.contains(r#""p1""#),
                "table {table} still references an unprefixed entity: {encoded}"
            );
        }
    }

    #[test]
    fn second_run_is_idempotent_and_skips_identical_objects() {
        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();
        seed_environment(&objects, &records);

        run(&objects, &records, &request()).expect("first copy should succeed");
        let objects_after_first = objects.objects.lock().expect("poisoned mutex").clone();
        let writes_after_first = objects.write_count();

        let report = run(&objects, &records, &request()).expect("second copy should succeed");

        // server-side copies are skipped via the entity-tag match; the
        // cell-sets document is rewritten on every run (its destination tag
        // can never equal the source's) but the result is identical
        assert_eq!(
            report.copied_objects,
            vec!["biodata-cell-sets-staging/sbx1-exp123".to_string()]
        );
        assert_eq!(report.skipped_objects.len(), 2);
        assert_eq!(objects.write_count(), writes_after_first + 1);
        assert_eq!(
            *objects.objects.lock().expect("poisoned mutex"),
            objects_after_first
        );

        // records are overwritten identically, never duplicated
        assert_eq!(records.items("experiments-staging").len(), 1);
        assert_eq!(records.items("samples-staging").len(), 1);
        assert_eq!(records.items("projects-staging").len(), 1);
    }

    #[test]
    fn absent_destination_always_triggers_a_write() {
        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();
        seed_environment(&objects, &records);

        run(&objects, &records, &request()).expect("first copy should succeed");

        // drop one destination object; it is copied again alongside the
        // always-rewritten cell-sets document
        objects
            .objects
            .lock()
            .expect("poisoned mutex")
            .remove(&(
                "biodata-source-staging".to_string(),
                "sbx1-exp123/raw.rds".to_string(),
            ));

        let report = run(&objects, &records, &request()).expect("second copy should succeed");
        assert_eq!(
            report.copied_objects,
            vec![
                "biodata-source-staging/sbx1-exp123/raw.rds".to_string(),
                "biodata-cell-sets-staging/sbx1-exp123".to_string(),
            ]
        );
        assert_eq!(report.skipped_objects.len(), 1);
    }

    #[test]
    fn record_write_failures_do_not_abort_sibling_tables() {
        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();
        seed_environment(&objects, &records);
        *records.fail_batch_for.lock().expect("poisoned mutex") =
            Some("experiments-staging".to_string());

        let mut events = Vec::new();
        let outcome =
            copy_experiments(&objects, &records, &test_config(), &request(), &mut |event| {
                events.push(event)
            });

        // the rehash stage cannot find the failed experiment record, so the
        // run ends in error, but sibling tables were still copied first
        outcome.expect_err("rehash should fail for the missing record");
        let failed = events
            .iter()
            .position(|e| matches!(e, CopyEvent::RecordFailed { table, .. } if table == "experiments-staging"))
            .expect("experiments batch should fail");
        let samples_written = events
            .iter()
            .position(|e| matches!(e, CopyEvent::RecordsWritten { table, .. } if table == "samples-staging"))
            .expect("samples should still copy");
        assert!(failed < samples_written);
        assert_eq!(records.items("samples-staging").len(), 1);
        assert_eq!(records.items("projects-staging").len(), 1);
    }

    #[test]
    fn empty_source_prefix_is_fatal() {
        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();
        seed_environment(&objects, &records);

        let mut req = request();
        req.experiments = vec!["missing-exp".to_string()];

        let error = run(&objects, &records, &req).expect_err("missing prefix should fail");
        match error {
            PipelineError::EmptySource { location } => {
                assert_eq!(location, "biodata-source-production/missing-exp");
            }
            other => panic!("expected EmptySource, got {other:?}"),
        }
    }

    #[test]
    fn unknown_table_role_is_an_explicit_error() {
        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();
        seed_environment(&objects, &records);

        let mut config = test_config();
        config.source_tables.push("plots-tables-production".to_string());

        let error = copy_experiments(&objects, &records, &config, &request(), &mut |_| {})
            .expect_err("unknown table should fail");
        match error {
            PipelineError::Remap(RemapError::UnknownTable(table)) => {
                assert_eq!(table, "plots-tables-staging");
            }
            other => panic!("expected UnknownTable, got {other:?}"),
        }
    }

    #[test]
    fn per_object_copy_failures_do_not_abort_the_run() {
        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();
        seed_environment(&objects, &records);
        *objects.fail_copies_to.lock().expect("poisoned mutex") =
            Some("biodata-source-staging".to_string());

        let report = run(&objects, &records, &request()).expect("copy should finish");

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].location.starts_with("biodata-source-production/"));
        // the other buckets and the records still copied
        assert!(!objects.keys_in("biodata-originals-staging").is_empty());
        assert_eq!(records.items("experiments-staging").len(), 1);
    }

    #[test]
    fn copy_grants_write_access_to_the_invoking_user() {
        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();
        seed_environment(&objects, &records);

        run(&objects, &records, &request()).expect("copy should succeed");

        let experiment = records
            .get_item("experiments-staging", "experimentId", "sbx1-exp123")
            .expect("get should succeed")
            .expect("copied experiment should exist");
        assert_eq!(
            experiment["rbac_can_write"],
            AttrValue::Ss(vec!["owner".to_string(), "alice".to_string()])
        );
    }

    #[test]
    fn emits_progress_events_in_pipeline_order() {
        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();
        seed_environment(&objects, &records);

        let mut events = Vec::new();
        copy_experiments(&objects, &records, &test_config(), &request(), &mut |event| {
            events.push(event)
        })
        .expect("copy should succeed");

        let bucket_started = events
            .iter()
            .position(|e| matches!(e, CopyEvent::BucketStarted { .. }))
            .expect("bucket event");
        let table_started = events
            .iter()
            .position(|e| matches!(e, CopyEvent::TableStarted { .. }))
            .expect("table event");
        let rehash = events
            .iter()
            .position(|e| matches!(e, CopyEvent::HashRecomputed { .. }))
            .expect("rehash event");
        assert!(bucket_started < table_started && table_started < rehash);
    }
}
