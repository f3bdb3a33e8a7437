//! File-presence announcements over gossipsub.
//!
//! Peers periodically (and on demand) publish the relative paths they offer
//! under their shared root; folders carry a trailing slash. Everyone keeps
//! the latest list per peer to answer "who has this file".

use std::io;
use std::path::Path;

use meshsync_network::types::{IdentTopic, Message};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::Node;

pub const FILE_PRESENCE_TOPIC: &str = "file-presence";

#[derive(Debug, Serialize, Deserialize)]
pub struct FileAnnouncement {
    pub peer_id: String,
    pub file_list: Vec<String>,
}

pub fn topic() -> IdentTopic {
    IdentTopic::new(FILE_PRESENCE_TOPIC)
}

/// Walks the shared root and publishes the offer list.
pub async fn announce_local_files(node: &Node) -> eyre::Result<()> {
    let file_list = list_shared_paths(node.config().shared_root.as_std_path())?;

    let announcement = FileAnnouncement {
        peer_id: node.peer_id().to_string(),
        file_list,
    };

    let data = serde_json::to_vec(&announcement)?;

    node.network().publish(topic().hash(), data).await?;

    info!(files = announcement.file_list.len(), "Announced local files");

    Ok(())
}

/// Handles one incoming announcement; our own are ignored.
pub fn handle_announcement(node: &Node, message: &Message) {
    if message.topic != topic().hash() {
        return;
    }

    let announcement: FileAnnouncement = match serde_json::from_slice(&message.data) {
        Ok(announcement) => announcement,
        Err(err) => {
            warn!(%err, "Failed to parse file announcement");
            return;
        }
    };

    if announcement.peer_id == node.peer_id().to_string() {
        return;
    }

    debug!(
        peer_id = announcement.peer_id,
        files = announcement.file_list.len(),
        "Received file announcement"
    );

    if let Err(err) = node.record_announcement(announcement.peer_id, announcement.file_list) {
        warn!(%err, "Failed to record announcement");
        return;
    }

    show_available_files(node);
}

/// Prints the current availability view, the interactive shell's main
/// display.
pub fn show_available_files(node: &Node) {
    let known = match node.known_files_snapshot() {
        Ok(known) => known,
        Err(err) => {
            warn!(%err, "Failed to snapshot known files");
            return;
        }
    };

    println!("Available files/folders:");

    if known.is_empty() {
        println!("   (no announcements yet)");
        return;
    }

    let mut peers: Vec<_> = known.iter().collect();
    peers.sort_by_key(|(peer, _)| *peer);

    for (peer, files) in peers {
        println!("{peer}:");

        if files.is_empty() {
            println!("   (no files listed by this peer)");
        }

        for file in files {
            println!("   - {file}");
        }
    }
}

/// Relative paths under `shared_root`, sorted, depth-first; folders get a
/// trailing slash. The root itself is not listed.
pub fn list_shared_paths(shared_root: &Path) -> io::Result<Vec<String>> {
    let mut paths = Vec::new();

    if !shared_root.exists() {
        return Ok(paths);
    }

    collect(shared_root, Path::new(""), &mut paths)?;

    Ok(paths)
}

fn collect(root: &Path, rel_dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
    let mut entries = std::fs::read_dir(root.join(rel_dir))?.collect::<Result<Vec<_>, _>>()?;

    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let file_type = entry.file_type()?;
        let rel = rel_dir.join(entry.file_name());
        let Some(rel_str) = rel.to_str() else {
            warn!(path = %rel.display(), "Skipping non-UTF-8 path");
            continue;
        };

        if file_type.is_dir() {
            out.push(format!("{rel_str}/"));
            collect(root, &rel, out)?;
        } else if file_type.is_file() {
            out.push(rel_str.to_owned());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_list_shared_paths_marks_folders() {
        let shared = TempDir::new().unwrap();

        std::fs::create_dir_all(shared.path().join("docs/sub")).unwrap();
        std::fs::write(shared.path().join("docs/x.txt"), "X").unwrap();
        std::fs::write(shared.path().join("docs/sub/y.txt"), "YY").unwrap();
        std::fs::write(shared.path().join("notes.txt"), "n").unwrap();

        let paths = list_shared_paths(shared.path()).unwrap();

        assert_eq!(
            paths,
            ["docs/", "docs/sub/", "docs/sub/y.txt", "docs/x.txt", "notes.txt"]
        );
    }

    #[test]
    fn test_missing_shared_root_lists_nothing() {
        let shared = TempDir::new().unwrap();

        let paths = list_shared_paths(&shared.path().join("absent")).unwrap();

        assert!(paths.is_empty());
    }

    #[test]
    fn test_announcement_wire_shape() {
        let announcement = FileAnnouncement {
            peer_id: "12D3KooWExample".to_owned(),
            file_list: vec!["docs/".to_owned(), "notes.txt".to_owned()],
        };

        let value = serde_json::to_value(&announcement).unwrap();

        assert_eq!(value["peer_id"], "12D3KooWExample");
        assert_eq!(value["file_list"][0], "docs/");
    }
}
