//! The commit algorithm: baseline snapshot, per-medication sequential
//! processing, delta stock writes, authoritative re-read.
//!
//! Stock is the shared mutable resource. The current value is re-read
//! immediately before every write (read-modify-write, never
//! read-once-modify-many), which narrows — but cannot eliminate, absent a
//! server-side atomic increment — the lost-update window against editors in
//! other sessions. Within one commit, all writes for one medication are
//! strictly sequential; distinct medications proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::{
    client::{fetch_full_list, RemoteClient},
    error::{ClientError, CommitError, Result},
    query::QueryOptions,
    session::SessionHub,
};

use super::types::{CommitOutcome, LineAction, LineEdit, LineResult, ReconcilerConfig};

// ============================================================================
// QuantityReconciler
// ============================================================================

pub struct QuantityReconciler {
    client: Arc<dyn RemoteClient>,
    session: Arc<SessionHub>,
    config: Arc<ReconcilerConfig>,
}

/// One line's worth of work, resolved against the baseline snapshot.
/// Ordered within a medication: deletions (restores) first, then updates,
/// then creations, so freed stock is available to later lines.
enum MedOp {
    Delete {
        line_id: String,
        restore: f64,
        processed: bool,
    },
    Update {
        line_id: String,
        new_quantity: f64,
        baseline_quantity: f64,
        fields: Map<String, Value>,
    },
    Create {
        quantity: f64,
        fields: Map<String, Value>,
    },
}

/// Committed server-side state of one line at commit time.
struct BaselineLine {
    medication_id: String,
    quantity: f64,
    processed: bool,
}

impl QuantityReconciler {
    pub fn new(
        client: Arc<dyn RemoteClient>,
        session: Arc<SessionHub>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            client,
            session,
            config: Arc::new(config),
        }
    }

    /// Commit a batch of line edits for one parent (e.g. one encounter).
    ///
    /// The baseline (existing lines and their committed quantities) is
    /// snapshotted fresh from the server at commit time — never from a
    /// possibly-stale in-memory mirror. Insufficient stock fails only the
    /// offending line; a write failure does not roll back earlier writes
    /// (at-least-partial-success, no multi-record transaction is assumed).
    ///
    /// No-ops to an empty outcome when no valid session exists.
    pub async fn commit(&self, parent_id: &str, edits: Vec<LineEdit>) -> Result<CommitOutcome> {
        if !self.session.is_authenticated() {
            tracing::debug!("commit skipped: no session");
            return Ok(CommitOutcome::default());
        }
        if edits.is_empty() {
            return Ok(CommitOutcome::default());
        }

        // Baseline snapshot. A failure here is a real error: without the
        // committed quantities no delta can be computed safely.
        let baseline = self.fetch_baseline(parent_id).await.map_err(CommitError::Client)?;

        // Partition edits into per-medication work lists; edits that cannot
        // be resolved against the baseline fail immediately.
        let mut per_medication: HashMap<String, Vec<MedOp>> = HashMap::new();
        let mut failed: Vec<LineResult> = Vec::new();

        for edit in edits {
            match edit {
                LineEdit::Delete { line_id } => match baseline.get(&line_id) {
                    Some(line) => {
                        per_medication
                            .entry(line.medication_id.clone())
                            .or_default()
                            .push(MedOp::Delete {
                                line_id,
                                restore: line.quantity,
                                processed: line.processed,
                            });
                    }
                    None => failed.push(LineResult {
                        action: LineAction::Deleted,
                        line_id: Some(line_id.clone()),
                        medication_id: None,
                        error: Some(CommitError::MissingLine { line_id }),
                    }),
                },
                LineEdit::Update {
                    line_id,
                    medication_id,
                    quantity,
                    fields,
                } => match baseline.get(&line_id) {
                    Some(line) => {
                        per_medication
                            .entry(medication_id)
                            .or_default()
                            .push(MedOp::Update {
                                line_id,
                                new_quantity: quantity,
                                baseline_quantity: line.quantity,
                                fields,
                            });
                    }
                    None => failed.push(LineResult {
                        action: LineAction::Updated,
                        line_id: Some(line_id.clone()),
                        medication_id: Some(medication_id),
                        error: Some(CommitError::MissingLine { line_id }),
                    }),
                },
                LineEdit::Create {
                    medication_id,
                    quantity,
                    fields,
                } => {
                    per_medication
                        .entry(medication_id)
                        .or_default()
                        .push(MedOp::Create { quantity, fields });
                }
            }
        }

        let affected: Vec<String> = per_medication.keys().cloned().collect();

        // One sequential task per medication; medications run concurrently.
        let mut handles = Vec::new();
        for (medication_id, mut ops) in per_medication {
            sort_ops(&mut ops);
            let client = Arc::clone(&self.client);
            let config = Arc::clone(&self.config);
            let parent = parent_id.to_string();
            handles.push(tokio::spawn(async move {
                process_medication(client, config, parent, medication_id, ops).await
            }));
        }

        let mut succeeded: Vec<LineResult> = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(results) => {
                    for result in results {
                        if result.is_ok() {
                            succeeded.push(result);
                        } else {
                            failed.push(result);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "medication commit task panicked");
                }
            }
        }

        // Authoritative re-read: local optimistic state must never be
        // trusted after a commit — the server values win.
        let (stock_after, lines_after) = self.read_back(parent_id, &affected).await;

        Ok(CommitOutcome {
            succeeded,
            failed,
            stock_after,
            lines_after,
        })
    }

    // -----------------------------------------------------------------------
    // Snapshot / read-back
    // -----------------------------------------------------------------------

    fn parent_filter(&self, parent_id: &str) -> Value {
        let mut filter = Map::new();
        filter.insert(self.config.parent_field.clone(), json!(parent_id));
        Value::Object(filter)
    }

    async fn fetch_baseline(
        &self,
        parent_id: &str,
    ) -> std::result::Result<HashMap<String, BaselineLine>, ClientError> {
        let query = QueryOptions::filtered(self.parent_filter(parent_id));
        let lines =
            fetch_full_list(self.client.as_ref(), &self.config.line_collection, &query).await?;

        let mut baseline = HashMap::new();
        for line in lines {
            let medication_id = line
                .get_str(&self.config.medication_field)
                .unwrap_or_default()
                .to_string();
            baseline.insert(
                line.id.clone(),
                BaselineLine {
                    medication_id,
                    quantity: line.get_f64(&self.config.quantity_field).unwrap_or(0.0),
                    processed: line.get_bool(&self.config.processed_field).unwrap_or(false),
                },
            );
        }
        Ok(baseline)
    }

    async fn read_back(
        &self,
        parent_id: &str,
        affected: &[String],
    ) -> (HashMap<String, f64>, Vec<crate::types::Record>) {
        let mut stock_after = HashMap::new();
        for medication_id in affected {
            match self
                .client
                .get_one(&self.config.inventory_collection, medication_id, None)
                .await
            {
                Ok(record) => {
                    stock_after.insert(
                        medication_id.clone(),
                        record.get_f64(&self.config.stock_field).unwrap_or(0.0),
                    );
                }
                Err(e) => {
                    tracing::warn!(medication = %medication_id, error = %e, "post-commit stock read failed");
                }
            }
        }

        let query = QueryOptions::filtered(self.parent_filter(parent_id));
        let lines_after =
            match fetch_full_list(self.client.as_ref(), &self.config.line_collection, &query).await
            {
                Ok(lines) => lines,
                Err(e) => {
                    tracing::warn!(error = %e, "post-commit line read failed");
                    Vec::new()
                }
            };

        (stock_after, lines_after)
    }
}

// ============================================================================
// Per-medication processing
// ============================================================================

/// Deletions before updates before creations: restores free up stock for
/// the lines that draw from it later in the same batch.
fn sort_ops(ops: &mut [MedOp]) {
    ops.sort_by_key(|op| match op {
        MedOp::Delete { .. } => 0,
        MedOp::Update { .. } => 1,
        MedOp::Create { .. } => 2,
    });
}

async fn process_medication(
    client: Arc<dyn RemoteClient>,
    config: Arc<ReconcilerConfig>,
    parent_id: String,
    medication_id: String,
    ops: Vec<MedOp>,
) -> Vec<LineResult> {
    let mut results = Vec::with_capacity(ops.len());

    for op in ops {
        let result = apply_op(&*client, &config, &parent_id, &medication_id, op).await;
        results.push(result);
    }

    results
}

async fn apply_op(
    client: &dyn RemoteClient,
    config: &ReconcilerConfig,
    parent_id: &str,
    medication_id: &str,
    op: MedOp,
) -> LineResult {
    match op {
        MedOp::Delete {
            line_id,
            restore,
            processed,
        } => {
            // Restore skipped for processed lines: they are historical and
            // must not be re-adjusted.
            if !processed && restore != 0.0 {
                if let Err(e) = adjust_stock(client, config, medication_id, restore).await {
                    return line_result(LineAction::Deleted, Some(line_id), medication_id, Some(e));
                }
            }
            let error = client
                .delete(&config.line_collection, &line_id)
                .await
                .err()
                .map(CommitError::from);
            line_result(LineAction::Deleted, Some(line_id), medication_id, error)
        }
        MedOp::Update {
            line_id,
            new_quantity,
            baseline_quantity,
            fields,
        } => {
            let delta = new_quantity - baseline_quantity;
            if delta != 0.0 {
                if let Err(e) = draw_stock(client, config, medication_id, delta).await {
                    return line_result(LineAction::Updated, Some(line_id), medication_id, Some(e));
                }
            }

            let mut payload = fields;
            payload.insert(config.quantity_field.clone(), json!(new_quantity));
            let error = client
                .update(&config.line_collection, &line_id, &payload)
                .await
                .err()
                .map(CommitError::from);
            line_result(LineAction::Updated, Some(line_id), medication_id, error)
        }
        MedOp::Create { quantity, fields } => {
            if let Err(e) = draw_stock(client, config, medication_id, quantity).await {
                return line_result(LineAction::Created, None, medication_id, Some(e));
            }

            let mut payload = fields;
            payload.insert(config.quantity_field.clone(), json!(quantity));
            payload.insert(config.medication_field.clone(), json!(medication_id));
            payload.insert(config.parent_field.clone(), json!(parent_id));
            match client.create(&config.line_collection, &payload).await {
                Ok(record) => {
                    line_result(LineAction::Created, Some(record.id), medication_id, None)
                }
                Err(e) => line_result(
                    LineAction::Created,
                    None,
                    medication_id,
                    Some(CommitError::from(e)),
                ),
            }
        }
    }
}

/// Subtract `amount` from stock, refusing to drive it negative. Reads the
/// current value immediately before the write.
async fn draw_stock(
    client: &dyn RemoteClient,
    config: &ReconcilerConfig,
    medication_id: &str,
    amount: f64,
) -> std::result::Result<(), CommitError> {
    let current = read_stock(client, config, medication_id).await?;
    let next = current - amount;
    if next < 0.0 {
        return Err(CommitError::InsufficientStock {
            medication_id: medication_id.to_string(),
            available: current,
            requested: amount,
        });
    }
    write_stock(client, config, medication_id, next).await
}

/// Add `amount` back to stock (delete restore path).
async fn adjust_stock(
    client: &dyn RemoteClient,
    config: &ReconcilerConfig,
    medication_id: &str,
    amount: f64,
) -> std::result::Result<(), CommitError> {
    let current = read_stock(client, config, medication_id).await?;
    write_stock(client, config, medication_id, current + amount).await
}

async fn read_stock(
    client: &dyn RemoteClient,
    config: &ReconcilerConfig,
    medication_id: &str,
) -> std::result::Result<f64, CommitError> {
    let record = client
        .get_one(&config.inventory_collection, medication_id, None)
        .await?;
    Ok(record.get_f64(&config.stock_field).unwrap_or(0.0))
}

async fn write_stock(
    client: &dyn RemoteClient,
    config: &ReconcilerConfig,
    medication_id: &str,
    value: f64,
) -> std::result::Result<(), CommitError> {
    let mut payload = Map::new();
    payload.insert(config.stock_field.clone(), json!(value));
    client
        .update(&config.inventory_collection, medication_id, &payload)
        .await?;
    Ok(())
}

fn line_result(
    action: LineAction,
    line_id: Option<String>,
    medication_id: &str,
    error: Option<CommitError>,
) -> LineResult {
    LineResult {
        action,
        line_id,
        medication_id: Some(medication_id.to_string()),
        error,
    }
}
