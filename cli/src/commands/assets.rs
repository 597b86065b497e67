use crate::utils::format_size;
use std::path::Path;
use vphone_provision::AssetStore;

pub async fn list_assets(asset_dir: &Path, dir: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = AssetStore::new(asset_dir);
    let names = store.list(dir).await?;

    if names.is_empty() {
        println!("No assets found in {}", asset_dir.join(dir).display());
        return Ok(());
    }

    println!("{:<40} {:>12}", "NAME", "SIZE");
    for name in names {
        let relative = if dir.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", dir.trim_end_matches('/'), name)
        };

        let size = match store.resolve(&relative) {
            Some(path) => match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() => "-".to_string(),
                Ok(meta) => format_size(meta.len()),
                Err(_) => "?".to_string(),
            },
            None => "?".to_string(),
        };
        println!("{:<40} {:>12}", name, size);
    }

    Ok(())
}
