//! Fragment triage and the tail of the report lifecycle.

use tracing::info;

use leakscan_shared::{
    LeakscanError, REJECT_VERIFIED, ReportStatus, Result,
};
use leakscan_storage::Storage;

/// Classify one fragment and propagate the consequences to its report.
///
/// Marking a fragment `verified` confirms the leak: every sibling not
/// already classified by hand is auto-removed and the report becomes
/// `validated`. Any other classification closes the report once none of
/// its fragments are left unreviewed.
pub async fn mark_fragment(storage: &Storage, fragment_id: i64, reject_id: i64) -> Result<()> {
    let rules = storage.all_rules().await?;
    if !rules.iter().any(|r| r.id == reject_id) {
        return Err(LeakscanError::validation(format!(
            "no rule with id {reject_id}"
        )));
    }

    let fragment = storage
        .get_fragment(fragment_id)
        .await?
        .ok_or_else(|| LeakscanError::validation(format!("no fragment with id {fragment_id}")))?;

    storage.update_fragment_reject(fragment_id, reject_id).await?;

    if reject_id == REJECT_VERIFIED {
        let removed = storage
            .auto_remove_siblings(fragment.report_id, fragment_id)
            .await?;
        storage
            .update_report_status(fragment.report_id, ReportStatus::Validated)
            .await?;
        info!(
            fragment_id,
            report_id = fragment.report_id,
            siblings_removed = removed,
            "fragment verified, report validated"
        );
        return Ok(());
    }

    let remaining = storage
        .count_unclassified_in_report(fragment.report_id)
        .await?;
    if remaining == 0 {
        storage
            .update_report_status(fragment.report_id, ReportStatus::Closed)
            .await?;
        info!(
            fragment_id,
            report_id = fragment.report_id,
            "last fragment classified, report closed"
        );
    }
    Ok(())
}
