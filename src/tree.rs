//! Hash-gated global command sync.
//!
//! Registering commands on every start is slow and rate limited, so the bot
//! hashes its command tree and only bulk-overwrites when the hash changed
//! since the last successful sync.

use std::path::Path;

use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::error::{Error, HttpError, Result};
use crate::http::DiscordHttpClient;
use crate::paths::resolve_path_with_links;
use crate::types::ApplicationCommand;

pub const TREE_HASH_FILE: &str = "webfic_searcher_bot_tree.hash";

/// Order-independent fingerprint of a command set.
pub fn command_tree_hash(commands: &[ApplicationCommand]) -> Result<[u8; 8]> {
    let mut sorted: Vec<&ApplicationCommand> = commands.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    let payload = serde_json::to_vec(&sorted).map_err(|e| HttpError::Serde(e.to_string()))?;
    Ok(xxh3_64_with_seed(&payload, 1).to_be_bytes())
}

/// Whether the stored hash differs from `hash`. A missing file counts as
/// different.
fn needs_sync(hash_path: &Path, hash: &[u8; 8]) -> Result<bool> {
    let stored = std::fs::read(hash_path)?;
    Ok(stored.as_slice() != hash.as_slice())
}

/// Bulk-overwrite the global commands if they changed since the last sync.
///
/// Returns whether a sync happened.
pub async fn sync_if_commands_updated(
    http: &DiscordHttpClient,
    application_id: &str,
    commands: &[ApplicationCommand],
    cache_dir: &Path,
) -> Result<bool> {
    let hash = command_tree_hash(commands)?;
    let hash_path = resolve_path_with_links(&cache_dir.join(TREE_HASH_FILE), false)?;

    if !needs_sync(&hash_path, &hash)? {
        debug!(path = %hash_path.display(), "command tree unchanged, skipping sync");
        return Ok(false);
    }

    info!("new version of the command tree, syncing now");
    let registered = http.bulk_overwrite_global_commands(application_id, commands).await?;
    info!(count = registered.len(), "registered global slash commands");

    std::fs::write(&hash_path, hash).map_err(Error::Io)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::slash_commands;

    #[test]
    fn hash_ignores_command_order() {
        let commands = slash_commands();
        let mut reversed = commands.clone();
        reversed.reverse();
        assert_eq!(command_tree_hash(&commands).unwrap(), command_tree_hash(&reversed).unwrap());
    }

    #[test]
    fn hash_changes_with_content() {
        let commands = slash_commands();
        let mut edited = commands.clone();
        edited[0].description.push('!');
        assert_ne!(command_tree_hash(&commands).unwrap(), command_tree_hash(&edited).unwrap());
    }

    #[test]
    fn stored_hash_gates_sync() {
        let dir = tempfile::tempdir().unwrap();
        let path = resolve_path_with_links(&dir.path().join("cache").join(TREE_HASH_FILE), false).unwrap();
        let hash = command_tree_hash(&slash_commands()).unwrap();

        assert!(needs_sync(&path, &hash).unwrap(), "empty file must trigger a sync");
        std::fs::write(&path, hash).unwrap();
        assert!(!needs_sync(&path, &hash).unwrap());
        assert!(needs_sync(&path, &[0; 8]).unwrap());
    }
}
