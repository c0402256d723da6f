//! Library commands: scanning and renaming.

use anyhow::Result;
use longbox_core::Services;
use longbox_core::library::scan_files;
use longbox_core::naming::mass_rename;

/// Rescans a volume's folder.
pub async fn scan(services: &Services, volume_id: i64) -> Result<()> {
    scan_files(&services.volumes, &services.files, volume_id, None).await?;
    let files = services.files.files_for_volume(volume_id).await?;
    println!("Scan done; {} file(s) matched.", files.len());
    Ok(())
}

/// Renames a volume's files to the configured scheme.
pub async fn rename(services: &Services, volume_id: i64) -> Result<()> {
    let settings = services.settings.get();
    let renamed = mass_rename(
        &services.volumes,
        &services.files,
        &settings,
        volume_id,
        None,
    )
    .await?;
    if renamed.is_empty() {
        println!("Nothing to rename.");
    } else {
        for path in renamed {
            println!("-> {path}");
        }
    }
    Ok(())
}
