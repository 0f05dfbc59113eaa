use snowberg_config::is_identifier;
use tracing::info;

use crate::error::{ProvisionError, Result};
use crate::types::{ExternalVolumeDescriptor, VolumeStatus};
use crate::warehouse::{sql, WarehouseClient};

/// Define the external volume with CREATE OR REPLACE. Replacement never fails
/// on an existing volume; a SHOW beforehand only decides what to report.
pub async fn ensure_external_volume(
    warehouse: &dyn WarehouseClient,
    volume: &ExternalVolumeDescriptor,
) -> Result<VolumeStatus> {
    if !is_identifier(&volume.name) {
        return Err(ProvisionError::invalid_request(format!(
            "external volume name '{}' is not a valid identifier",
            volume.name
        )));
    }

    let show = sql::show_external_volumes_like(&volume.name);
    let existing = warehouse
        .execute(&show)
        .await
        .map_err(|e| e.into_provision("SHOW EXTERNAL VOLUMES"))?;
    // LIKE treats `_` as a wildcard, so compare names exactly
    let existed = existing.column_index(&["name"]).is_some_and(|idx| {
        existing.rows.iter().any(|row| {
            row.get(idx)
                .and_then(|cell| cell.as_deref())
                .is_some_and(|name| name.eq_ignore_ascii_case(&volume.name))
        })
    });

    let create = sql::create_external_volume(volume);
    warehouse
        .execute(&create)
        .await
        .map_err(|e| {
            e.into_provision(&format!("CREATE OR REPLACE EXTERNAL VOLUME {}", volume.name))
        })?;

    let status = if existed {
        VolumeStatus::Replaced
    } else {
        VolumeStatus::Created
    };
    info!(volume = %volume.name, role_arn = %volume.role_arn, ?status, "External volume defined");
    Ok(status)
}
