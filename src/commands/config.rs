//! Config, blocklist and root-folder commands.

use anyhow::{Context, Result, bail};
use longbox_core::Services;

use crate::cli::RootFolderAction;

/// Prints the settings document, or changes one key.
pub async fn config(
    services: &Services,
    key: Option<String>,
    value: Option<String>,
) -> Result<()> {
    let Some(key) = key else {
        println!("{}", serde_json::to_string_pretty(&services.settings.get())?);
        return Ok(());
    };
    let Some(value) = value else {
        let document = serde_json::to_value(services.settings.get())?;
        match document.get(&key) {
            Some(value) => println!("{value}"),
            None => bail!("unknown setting {key}"),
        }
        return Ok(());
    };

    // Apply the change through the document so every key stays reachable,
    // then let validation judge the result.
    let mut document = serde_json::to_value(services.settings.get())?;
    let object = document
        .as_object_mut()
        .context("settings document is not an object")?;
    if !object.contains_key(&key) {
        bail!("unknown setting {key}");
    }
    let parsed: serde_json::Value = serde_json::from_str(&value)
        .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
    object.insert(key.clone(), parsed);

    let candidate: longbox_core::Settings = serde_json::from_value(document)?;
    if key == "download_folder" {
        longbox_core::settings::validate_download_folder(&candidate, &services.root_folders)
            .await?;
    }
    services.settings.update(move |settings| *settings = candidate)?;
    println!("Updated {key}.");
    Ok(())
}

/// Prints or clears the blocklist.
pub async fn blocklist(services: &Services, clear: bool) -> Result<()> {
    if clear {
        services.blocklist.clear().await?;
        println!("Blocklist cleared.");
        return Ok(());
    }

    let entries = services.blocklist.list(0, 100).await?;
    if entries.is_empty() {
        println!("Blocklist is empty.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "#{} [{}] {}",
            entry.id,
            entry.reason.description(),
            entry
                .download_link
                .or(entry.web_link)
                .unwrap_or_default()
        );
    }
    Ok(())
}

/// Root folder management.
pub async fn root_folder(services: &Services, action: RootFolderAction) -> Result<()> {
    match action {
        RootFolderAction::Add { folder } => {
            let id = services.root_folders.add(&folder).await?;
            println!("Registered root folder {id}: {folder}");
        }
        RootFolderAction::List => {
            for folder in services.root_folders.list().await? {
                println!("#{} {}", folder.id, folder.folder);
            }
        }
        RootFolderAction::Delete { id } => {
            services.root_folders.delete(id).await?;
            println!("Deleted root folder {id}.");
        }
    }
    Ok(())
}
