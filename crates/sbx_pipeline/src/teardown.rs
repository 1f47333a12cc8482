use std::collections::BTreeMap;

use sbx_core::naming::Environment;
use sbx_core::record::{AttrValue, Item};
use sbx_core::report::CopyFailure;

use crate::adapters::{ObjectStore, RecordStore};
use crate::config::SandboxConfig;
use crate::error::PipelineError;

/// Outcome of one teardown pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub deleted_records: usize,
    pub deleted_objects: usize,
    /// Tables/buckets that held nothing for the sandbox.
    pub skipped_tables: Vec<String>,
    pub skipped_buckets: Vec<String>,
    pub failures: Vec<CopyFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownEvent {
    NoStagedExperiments {
        table: String,
    },
    TableStarted {
        table: String,
    },
    TableSkipped {
        table: String,
    },
    RecordDeleted {
        table: String,
        experiment: String,
    },
    RecordFailed {
        table: String,
        experiment: String,
        message: String,
    },
    BucketSkipped {
        bucket: String,
    },
    ObjectsDeleted {
        bucket: String,
        count: usize,
    },
    ObjectsFailed {
        bucket: String,
        message: String,
    },
}

/// Remove everything staged under `sandbox_id`: every record whose
/// partition key carries the prefix, from every staging table, and every
/// `{sandbox_id}-` object from every staging bucket. Per-item failures are
/// reported and skipped so a partially-failed teardown can simply be rerun.
pub fn remove_staged_resources(
    objects: &impl ObjectStore,
    records: &impl RecordStore,
    config: &SandboxConfig,
    sandbox_id: &str,
    on_event: &mut dyn FnMut(TeardownEvent),
) -> Result<TeardownReport, PipelineError> {
    let mut report = TeardownReport::default();

    let staged = records
        .scan_experiment_ids_with_prefix(&config.staging_experiments_table, sandbox_id)
        .map_err(|message| {
            PipelineError::listing(config.staging_experiments_table.clone(), message)
        })?;

    if staged.is_empty() {
        on_event(TeardownEvent::NoStagedExperiments {
            table: config.staging_experiments_table.clone(),
        });
    } else {
        delete_staged_records(records, &staged, &mut report, on_event)?;
    }

    delete_staged_objects(objects, sandbox_id, &mut report, on_event)?;

    Ok(report)
}

fn delete_staged_records(
    records: &impl RecordStore,
    staged: &[String],
    report: &mut TeardownReport,
    on_event: &mut dyn FnMut(TeardownEvent),
) -> Result<(), PipelineError> {
    let marker = staging_marker();
    let tables: Vec<String> = records
        .list_tables()
        .map_err(|message| PipelineError::listing("table service", message))?
        .into_iter()
        .filter(|table| table.contains(&marker))
        .collect();

    for table in tables {
        on_event(TeardownEvent::TableStarted {
            table: table.clone(),
        });
        let sort_key = records
            .sort_key(&table)
            .map_err(|message| PipelineError::record(&table, message))?;

        match sort_key {
            Some(sort_key) => {
                delete_composite_records(records, &table, &sort_key, staged, report, on_event)?
            }
            None => {
                for experiment_id in staged {
                    let key: Item = BTreeMap::from([(
                        "experimentId".to_string(),
                        AttrValue::s(experiment_id.clone()),
                    )]);
                    delete_one(records, &table, &key, experiment_id, report, on_event);
                }
            }
        }
    }

    Ok(())
}

fn delete_composite_records(
    records: &impl RecordStore,
    table: &str,
    sort_key: &str,
    staged: &[String],
    report: &mut TeardownReport,
    on_event: &mut dyn FnMut(TeardownEvent),
) -> Result<(), PipelineError> {
    for experiment_id in staged {
        let sort_values = records
            .query_item_sort_keys(table, experiment_id, sort_key)
            .map_err(|message| {
                PipelineError::listing(format!("{table}/{experiment_id}"), message)
            })?;

        if sort_values.is_empty() {
            report.skipped_tables.push(table.to_string());
            on_event(TeardownEvent::TableSkipped {
                table: table.to_string(),
            });
            break;
        }

        for sort_value in sort_values {
            let key: Item = BTreeMap::from([
                (
                    "experimentId".to_string(),
                    AttrValue::s(experiment_id.clone()),
                ),
                (sort_key.to_string(), sort_value),
            ]);
            delete_one(records, table, &key, experiment_id, report, on_event);
        }
    }

    Ok(())
}

fn delete_one(
    records: &impl RecordStore,
    table: &str,
    key: &Item,
    experiment_id: &str,
    report: &mut TeardownReport,
    on_event: &mut dyn FnMut(TeardownEvent),
) {
    match records.delete_item(table, key) {
        Ok(()) => {
            report.deleted_records += 1;
            on_event(TeardownEvent::RecordDeleted {
                table: table.to_string(),
                experiment: experiment_id.to_string(),
            });
        }
        Err(message) => {
            report.record_failure(format!("{table}/{experiment_id}"), &message);
            on_event(TeardownEvent::RecordFailed {
                table: table.to_string(),
                experiment: experiment_id.to_string(),
                message,
            });
        }
    }
}

fn delete_staged_objects(
    objects: &impl ObjectStore,
    sandbox_id: &str,
    report: &mut TeardownReport,
    on_event: &mut dyn FnMut(TeardownEvent),
) -> Result<(), PipelineError> {
    let marker = staging_marker();
    let prefix = format!("{sandbox_id}-");
    let buckets: Vec<String> = objects
        .list_buckets()
        .map_err(|message| PipelineError::listing("object store", message))?
        .into_iter()
        .filter(|bucket| bucket.contains(&marker))
        .collect();

    for bucket in buckets {
        let listed = objects
            .list_objects(&bucket, &prefix)
            .map_err(|message| PipelineError::listing(&bucket, message))?;

        let keys: Vec<String> = listed
            .into_iter()
            .map(|object| object.key)
            .filter(|key| key.starts_with(&prefix))
            .collect();

        if keys.is_empty() {
            report.skipped_buckets.push(bucket.clone());
            on_event(TeardownEvent::BucketSkipped { bucket });
            continue;
        }

        match objects.delete_objects(&bucket, &keys) {
            Ok(()) => {
                report.deleted_objects += keys.len();
                on_event(TeardownEvent::ObjectsDeleted {
                    bucket,
                    count: keys.len(),
                });
            }
            Err(message) => {
                report.record_failure(&bucket, &message);
                on_event(TeardownEvent::ObjectsFailed { bucket, message });
            }
        }
    }

    Ok(())
}

fn staging_marker() -> String {
    format!("-{}", Environment::Staging)
}

impl TeardownReport {
    fn record_failure(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.failures.push(CopyFailure {
            location: location.into(),
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::copy::tests::{
        experiment_item, project_item, request, sample_collection_item, InMemoryObjectStore,
        InMemoryRecordStore,
    };
    use crate::copy::copy_experiments;

    fn staged_environment() -> (InMemoryObjectStore, InMemoryRecordStore) {
        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();

        objects.seed(
            "biodata-source-staging",
            "sbx1-exp123/raw.rds",
            b"raw-bytes",
        );
        objects.seed(
            "biodata-source-staging",
            "other-exp/raw.rds",
            b"unrelated-bytes",
        );

        records.seed(
            "experiments-staging",
            experiment_item("sbx1-exp123", "sbx1-p1"),
        );
        records.seed(
            "samples-staging",
            sample_collection_item("sbx1-exp123", "sbx1-p1"),
        );
        records.seed("projects-staging", project_item("sbx1-p1", "sbx1-exp123"));
        records.seed(
            "experiments-staging",
            experiment_item("other-exp", "other-p"),
        );

        (objects, records)
    }

    #[test]
    fn removes_only_records_and_objects_with_the_sandbox_prefix() {
        let (objects, records) = staged_environment();

        let report = remove_staged_resources(
            &objects,
            &records,
            &test_config(),
            "sbx1",
            &mut |_| {},
        )
        .expect("teardown should succeed");

        assert!(report.deleted_records >= 1);
        assert_eq!(report.deleted_objects, 1);

        let remaining: Vec<String> = records
            .items("experiments-staging")
            .iter()
            .filter_map(|item| item.get("experimentId").and_then(AttrValue::as_s))
            .map(str::to_string)
            .collect();
        assert_eq!(remaining, vec!["other-exp".to_string()]);

        assert_eq!(
            objects.keys_in("biodata-source-staging"),
            vec!["other-exp/raw.rds".to_string()]
        );
    }

    #[test]
    fn reports_when_nothing_is_staged() {
        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();
        records.seed(
            "experiments-staging",
            experiment_item("other-exp", "other-p"),
        );

        let mut events = Vec::new();
        let report = remove_staged_resources(
            &objects,
            &records,
            &test_config(),
            "sbx1",
            &mut |event| events.push(event),
        )
        .expect("teardown should succeed");

        assert_eq!(report.deleted_records, 0);
        assert!(events
            .iter()
            .any(|e| matches!(e, TeardownEvent::NoStagedExperiments { .. })));
    }

    #[test]
    fn composite_key_tables_delete_per_sort_key() {
        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();

        records.seed(
            "experiments-staging",
            experiment_item("sbx1-exp123", "sbx1-p1"),
        );
        // a plots table keyed (experimentId, plotUuid) with two records
        for plot in ["plot-a", "plot-b"] {
            records.seed(
                "plots-tables-staging",
                std::collections::BTreeMap::from([
                    ("experimentId".to_string(), AttrValue::s("sbx1-exp123")),
                    ("plotUuid".to_string(), AttrValue::s(plot)),
                ]),
            );
        }
        records
            .sort_keys
            .lock()
            .expect("poisoned mutex")
            .insert("plots-tables-staging".to_string(), "plotUuid".to_string());

        let report = remove_staged_resources(
            &objects,
            &records,
            &test_config(),
            "sbx1",
            &mut |_| {},
        )
        .expect("teardown should succeed");

        assert!(records.items("plots-tables-staging").is_empty());
        // one experiments record plus two plots records
        assert_eq!(report.deleted_records, 3);
    }

    #[test]
    fn staging_after_teardown_leaves_the_same_state_as_staging_once() {
        use crate::copy::tests::fake_etag;

        let objects = InMemoryObjectStore::default();
        let records = InMemoryRecordStore::default();
        objects.seed(
            "biodata-source-production",
            "exp123/raw.rds",
            b"raw-object-bytes",
        );
        objects.seed(
            "biodata-cell-sets-production",
            "exp123",
            br#"{"cellSets":[{"key":"sample","children":[{"key":"s1"}]}]}"#,
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

        let config = test_config();
        copy_experiments(&objects, &records, &config, &request(), &mut |_| {})
            .expect("first stage should succeed");
        let staged_objects = objects.objects.lock().expect("poisoned mutex").clone();
        let staged_experiments = records.items("experiments-staging");

        remove_staged_resources(&objects, &records, &config, "sbx1", &mut |_| {})
            .expect("teardown should succeed");
        assert!(records.items("experiments-staging").is_empty());

        copy_experiments(&objects, &records, &config, &request(), &mut |_| {})
            .expect("second stage should succeed");

        assert_eq!(
            *objects.objects.lock().expect("poisoned mutex"),
            staged_objects
        );
        assert_eq!(records.items("experiments-staging"), staged_experiments);
        // sanity: the staged copy still carries a deterministic entity tag
        let body = objects
            .body("biodata-source-staging", "sbx1-exp123/raw.rds")
            .expect("staged object should exist");
        assert_eq!(fake_etag(&body), fake_etag(b"raw-object-bytes"));
    }
}
