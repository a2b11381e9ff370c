use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use iflow_providers::Message;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const EXTENSION: &str = "json";

/// A conversation file found in the history directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedConversation {
    pub name: String,
    pub path: PathBuf,
    pub modified: DateTime<Local>,
}

/// Conversations saved as `<dir>/<name>.json`, one pretty-printed message
/// array per file.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", sanitize_name(name), EXTENSION))
    }

    pub fn save(&self, name: &str, messages: &[Message]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.path_for(name);
        let json =
            serde_json::to_string_pretty(messages).context("Failed to serialize conversation")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Saved {} messages to {}", messages.len(), path.display());
        Ok(path)
    }

    /// Saved conversations, most recently modified first. A missing directory
    /// is an empty history.
    pub fn list(&self) -> Result<Vec<SavedConversation>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut conversations = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(time) => DateTime::<Local>::from(time),
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            conversations.push(SavedConversation {
                name: name.to_string(),
                path: path.clone(),
                modified,
            });
        }

        conversations.sort_by(|a, b| b.modified.cmp(&a.modified).then(a.name.cmp(&b.name)));
        Ok(conversations)
    }

    /// Load by name; a trailing `.json` is accepted.
    pub fn load(&self, name: &str) -> Result<Vec<Message>> {
        let name = name.trim();
        let name = name
            .strip_suffix(&format!(".{}", EXTENSION))
            .unwrap_or(name);
        let path = self.path_for(name);
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("No saved conversation named '{}'", name))?;
        crate::conversation::parse_messages(&json)
            .with_context(|| format!("Failed to load {}", path.display()))
    }
}

/// Make `name` safe to use as a file stem.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').trim();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Fallback name when no title can be generated: `%Y%m%d_%H%M%S`.
pub fn timestamp_name(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_save_list_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path().join("history"));
        assert!(store.list().unwrap().is_empty());

        let messages = vec![Message::system("s"), Message::user("hello")];
        let path = store.save("Disk usage", &messages).unwrap();
        assert!(path.ends_with("Disk usage.json"));
        std::fs::write(dir.path().join("history").join("notes.txt"), "ignored").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Disk usage");

        assert_eq!(store.load("Disk usage").unwrap(), messages);
        assert_eq!(store.load("Disk usage.json").unwrap(), messages);
        assert!(store.load("missing").is_err());
    }

    #[test]
    fn test_list_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        store.save("older", &[Message::user("a")]).unwrap();
        let older = std::fs::File::options()
            .write(true)
            .open(store.path_for("older"))
            .unwrap();
        older
            .set_modified(std::time::SystemTime::now() - std::time::Duration::from_secs(3600))
            .unwrap();
        store.save("newer", &[Message::user("b")]).unwrap();

        let names: Vec<String> = store.list().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["newer", "older"]);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("a/b:c?"), "a_b_c_");
        assert_eq!(sanitize_name("  ../  "), "_");
        assert_eq!(sanitize_name("..."), "untitled");
        assert_eq!(sanitize_name("Plan trip"), "Plan trip");
    }

    #[test]
    fn test_timestamp_name() {
        let time = Local.with_ymd_and_hms(2025, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(timestamp_name(time), "20250309_070501");
    }
}
