//! Statement text for the warehouse control plane

use crate::types::ExternalVolumeDescriptor;

/// Quote a value as a single-quoted SQL string literal
pub fn string_literal(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

pub fn create_external_volume(volume: &ExternalVolumeDescriptor) -> String {
    format!(
        "CREATE OR REPLACE EXTERNAL VOLUME {name} STORAGE_LOCATIONS = ((NAME = {location} \
         STORAGE_PROVIDER = 'S3' STORAGE_BASE_URL = {url} STORAGE_AWS_ROLE_ARN = {role})) \
         ALLOW_WRITES = {writes};",
        name = volume.name,
        location = string_literal(&volume.name),
        url = string_literal(&volume.bucket_url),
        role = string_literal(&volume.role_arn),
        writes = if volume.allow_writes { "TRUE" } else { "FALSE" },
    )
}

pub fn describe_external_volume(name: &str) -> String {
    format!("DESC EXTERNAL VOLUME {};", name)
}

pub fn show_external_volumes_like(name: &str) -> String {
    format!("SHOW EXTERNAL VOLUMES LIKE {};", string_literal(name))
}
