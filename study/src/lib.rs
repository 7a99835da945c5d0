//! Study tracker library: a fixed topic catalogue, locally persisted progress,
//! notes and goals, a focus/break timer, and pure progress projections.
//!
//! The core is synchronous and single-threaded. Persistence goes through the
//! [`store::KvStore`] port so every projection can be exercised against an
//! in-memory store.

pub mod catalog {
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeSet;

    const BUILTIN_CATALOG: &str = include_str!("../catalog/physiology.toml");

    /* ------------------------------ Entities ------------------------------ */

    /// A single checkable study topic.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TopicItem {
        pub id: String,
        pub text: String,
    }

    /// An ordered, named group of topics.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Section {
        pub id: String,
        pub title: String,
        #[serde(default)]
        pub items: Vec<TopicItem>,
    }

    #[derive(Debug, Deserialize)]
    struct CatalogFile {
        #[serde(default)]
        sections: Vec<Section>,
    }

    /* ------------------------------ Aggregate ------------------------------ */

    /// Immutable catalogue of sections. Item ids are unique across the whole tree,
    /// so they double as flat lookup keys for completion state and notes.
    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    pub struct ContentTree {
        sections: Vec<Section>,
        /// item id -> index of the owning section
        item_index: IndexMap<String, usize>,
    }

    impl ContentTree {
        /// The physiology catalogue bundled with the crate.
        pub fn builtin() -> Result<Self, CatalogError> {
            Self::from_toml_str(BUILTIN_CATALOG)
        }

        /// Parse a catalogue of `[[sections]]` with nested `[[sections.items]]`.
        pub fn from_toml_str(input: &str) -> Result<Self, CatalogError> {
            let file: CatalogFile = toml::from_str(input)?;
            Self::new(file.sections)
        }

        pub fn new(sections: Vec<Section>) -> Result<Self, CatalogError> {
            let mut section_ids = BTreeSet::new();
            let mut item_index = IndexMap::new();
            for (idx, section) in sections.iter().enumerate() {
                if section.id.trim().is_empty() {
                    return Err(CatalogError::EmptyId(section.title.clone()));
                }
                if !section_ids.insert(section.id.clone()) {
                    return Err(CatalogError::DuplicateSectionId(section.id.clone()));
                }
                for item in &section.items {
                    if item.id.trim().is_empty() {
                        return Err(CatalogError::EmptyId(section.id.clone()));
                    }
                    if item_index.insert(item.id.clone(), idx).is_some() {
                        return Err(CatalogError::DuplicateItemId(item.id.clone()));
                    }
                }
            }
            Ok(Self {
                sections,
                item_index,
            })
        }

        pub fn sections(&self) -> &[Section] {
            &self.sections
        }

        pub fn section(&self, id: &str) -> Option<&Section> {
            self.sections.iter().find(|s| s.id == id)
        }

        pub fn contains_item(&self, item_id: &str) -> bool {
            self.item_index.contains_key(item_id)
        }

        pub fn item(&self, item_id: &str) -> Option<&TopicItem> {
            let section = self.section_of(item_id)?;
            section.items.iter().find(|i| i.id == item_id)
        }

        /// Section that owns `item_id`.
        pub fn section_of(&self, item_id: &str) -> Option<&Section> {
            self.item_index
                .get(item_id)
                .and_then(|idx| self.sections.get(*idx))
        }

        /// Items in catalogue order.
        pub fn items(&self) -> impl Iterator<Item = &TopicItem> {
            self.sections.iter().flat_map(|s| s.items.iter())
        }

        pub fn total_items(&self) -> usize {
            self.sections.iter().map(|s| s.items.len()).sum()
        }

        /// Case-insensitive substring search over item text. The term is used as
        /// given, surrounding whitespace included. Sections left without matching
        /// items are dropped; an empty term keeps everything.
        pub fn filter(&self, term: &str) -> Vec<Section> {
            let needle = term.to_lowercase();
            self.sections
                .iter()
                .map(|section| Section {
                    id: section.id.clone(),
                    title: section.title.clone(),
                    items: section
                        .items
                        .iter()
                        .filter(|item| item.text.to_lowercase().contains(&needle))
                        .cloned()
                        .collect(),
                })
                .filter(|section| !section.items.is_empty())
                .collect()
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum CatalogError {
        #[error("catalogue is not valid TOML: {0}")]
        Parse(#[from] toml::de::Error),
        #[error("duplicate section id {0:?}")]
        DuplicateSectionId(String),
        #[error("duplicate item id {0:?}")]
        DuplicateItemId(String),
        #[error("empty id under {0:?}")]
        EmptyId(String),
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn builtin_catalogue_loads() {
            let tree = ContentTree::builtin().expect("builtin catalogue");
            assert_eq!(tree.sections().len(), 14);
            assert_eq!(tree.total_items(), 72);
            assert_eq!(tree.items().count(), 72);
            assert_eq!(
                tree.section_of("ecg-analysis").map(|s| s.id.as_str()),
                Some("circulatory-system")
            );
        }

        #[test]
        fn duplicate_item_ids_are_rejected() {
            let input = r#"
                [[sections]]
                id = "a"
                title = "A"
                [[sections.items]]
                id = "x"
                text = "first"

                [[sections]]
                id = "b"
                title = "B"
                [[sections.items]]
                id = "x"
                text = "second"
            "#;
            let err = ContentTree::from_toml_str(input).unwrap_err();
            assert!(matches!(err, CatalogError::DuplicateItemId(id) if id == "x"));
        }

        #[test]
        fn filter_is_case_insensitive_and_drops_empty_sections() {
            let input = r#"
                [[sections]]
                id = "heart"
                title = "Heart"
                [[sections.items]]
                id = "ecg"
                text = "ECG analysis"
                [[sections.items]]
                id = "cycle"
                text = "Cardiac cycle"

                [[sections]]
                id = "lungs"
                title = "Lungs"
                [[sections.items]]
                id = "vent"
                text = "Ventilation"
            "#;
            let tree = ContentTree::from_toml_str(input).expect("parse");
            let hits = tree.filter("ecg");
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].id, "heart");
            assert_eq!(hits[0].items.len(), 1);

            assert_eq!(tree.filter("").len(), 2);
            assert_eq!(tree.filter(" analysis").len(), 1);
            assert!(tree.filter(" ecg").is_empty());
            assert!(tree.filter("kidney").is_empty());
        }
    }
}

pub mod store {
    //! Key-value persistence port and its two adapters.
    //!
    //! Values are UTF-8 text. There is no atomicity across keys; the last write wins.

    use std::collections::BTreeMap;
    use std::fs;
    use std::io::Write;
    use serde_json::Value;
    use std::path::{Path, PathBuf};
    use tracing::{debug, warn};

    pub trait KvStore {
        fn get(&self, key: &str) -> Option<String>;
        fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
        fn remove(&mut self, key: &str) -> Result<(), StoreError>;
        /// All keys currently present, in sorted order.
        fn keys(&self) -> Vec<String>;
    }

    #[derive(Debug, thiserror::Error)]
    pub enum StoreError {
        #[error("store I/O failed for {path:?}: {source}")]
        Io {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("store file {path:?} is not a JSON object: {source}")]
        Corrupt {
            path: PathBuf,
            #[source]
            source: serde_json::Error,
        },
        #[error("failed to encode value: {0}")]
        Encode(#[from] serde_json::Error),
    }

    /* ---------------------------- Key layout ---------------------------- */

    /// Key names used by the tracker, all under one namespace prefix.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct StoreKeys {
        namespace: String,
    }

    impl Default for StoreKeys {
        fn default() -> Self {
            Self::new("physiology")
        }
    }

    impl StoreKeys {
        pub fn new(namespace: impl Into<String>) -> Self {
            Self {
                namespace: namespace.into(),
            }
        }

        pub fn namespace(&self) -> &str {
            &self.namespace
        }

        pub fn checklist(&self) -> String {
            format!("{}-checklist", self.namespace)
        }

        pub fn note_prefix(&self) -> String {
            format!("{}-note-", self.namespace)
        }

        pub fn note(&self, item_id: &str) -> String {
            format!("{}{}", self.note_prefix(), item_id)
        }

        pub fn goals(&self) -> String {
            format!("{}-study-goals", self.namespace)
        }

        pub fn streak(&self) -> String {
            format!("{}-streak", self.namespace)
        }

        pub fn streak_last_day(&self) -> String {
            format!("{}-streak-last-day", self.namespace)
        }

        pub fn study_time(&self) -> String {
            format!("{}-study-time", self.namespace)
        }

        pub fn dark_mode(&self) -> String {
            format!("{}-dark-mode", self.namespace)
        }
    }

    /* ---------------------------- Adapters ---------------------------- */

    /// Volatile store for tests and dry runs.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct MemoryStore {
        entries: BTreeMap<String, String>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl KvStore for MemoryStore {
        fn get(&self, key: &str) -> Option<String> {
            self.entries.get(key).cloned()
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
            self.entries.insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn remove(&mut self, key: &str) -> Result<(), StoreError> {
            self.entries.remove(key);
            Ok(())
        }

        fn keys(&self) -> Vec<String> {
            self.entries.keys().cloned().collect()
        }
    }

    /// A single JSON object on disk mirrored in memory. Every mutation rewrites
    /// the whole file through a temp file and a rename, so a failed write leaves
    /// the previous contents intact.
    #[derive(Debug, Clone)]
    pub struct JsonFileStore {
        path: PathBuf,
        entries: BTreeMap<String, String>,
    }

    impl JsonFileStore {
        /// Open `path`, treating a missing or blank file as an empty store.
        pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
            let path = path.into();
            let entries = match fs::read_to_string(&path) {
                Ok(text) if text.trim().is_empty() => BTreeMap::new(),
                Ok(text) => decode_entries(&path, &text)?,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
                Err(source) => return Err(StoreError::Io { path, source }),
            };
            debug!(path = %path.display(), keys = entries.len(), "opened store");
            Ok(Self { path, entries })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        fn flush(&self) -> Result<(), StoreError> {
            let io_err = |source| StoreError::Io {
                path: self.path.clone(),
                source,
            };
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).map_err(io_err)?;
                }
            }
            let json = serde_json::to_string_pretty(&self.entries)?;
            let tmp = self.path.with_extension("json.tmp");
            {
                let mut file = fs::File::create(&tmp).map_err(io_err)?;
                file.write_all(json.as_bytes()).map_err(io_err)?;
                file.sync_all().map_err(io_err)?;
            }
            fs::rename(&tmp, &self.path).map_err(io_err)?;
            Ok(())
        }
    }

    /// Only a file that is not a JSON object is corrupt. Non-string values are kept
    /// as their JSON text so the per-key loaders can recover them; nulls are dropped.
    fn decode_entries(path: &Path, text: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let raw: BTreeMap<String, Value> =
            serde_json::from_str(text).map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(raw
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::String(text) => Some((key, text)),
                Value::Null => {
                    warn!(key = %key, "dropping null store value");
                    None
                }
                other => {
                    warn!(key = %key, value = %other, "non-string store value; keeping its JSON text");
                    let text = other.to_string();
                    Some((key, text))
                }
            })
            .collect())
    }

    impl KvStore for JsonFileStore {
        fn get(&self, key: &str) -> Option<String> {
            self.entries.get(key).cloned()
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
            let previous = self.entries.insert(key.to_string(), value.to_string());
            if let Err(err) = self.flush() {
                match previous {
                    Some(old) => self.entries.insert(key.to_string(), old),
                    None => self.entries.remove(key),
                };
                return Err(err);
            }
            debug!(key, "stored value");
            Ok(())
        }

        fn remove(&mut self, key: &str) -> Result<(), StoreError> {
            let Some(previous) = self.entries.remove(key) else {
                return Ok(());
            };
            if let Err(err) = self.flush() {
                self.entries.insert(key.to_string(), previous);
                return Err(err);
            }
            debug!(key, "removed value");
            Ok(())
        }

        fn keys(&self) -> Vec<String> {
            self.entries.keys().cloned().collect()
        }
    }

}

pub mod state {
    //! In-memory mirrors of the persisted records. Loading never fails: an absent
    //! key yields the default, a malformed one is logged and replaced by the default.

    use crate::store::{KvStore, StoreError, StoreKeys};
    use chrono::{DateTime, NaiveDate, Utc};
    use indexmap::IndexMap;
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Serialize};
    use serde_with::{DefaultOnError, VecSkipError, serde_as};
    use std::fmt;
    use std::str::FromStr;
    use tracing::{debug, warn};

    fn load_json<T: DeserializeOwned + Default>(store: &dyn KvStore, key: &str) -> T {
        let Some(raw) = store.get(key) else {
            return T::default();
        };
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "malformed stored value; using default");
                T::default()
            }
        }
    }

    fn load_counter(store: &dyn KvStore, key: &str) -> u64 {
        let Some(raw) = store.get(key) else {
            return 0;
        };
        match raw.trim().parse() {
            Ok(value) => value,
            Err(err) => {
                warn!(key, value = %raw, error = %err, "malformed counter; using 0");
                0
            }
        }
    }

    /* --------------------------- Completion state --------------------------- */

    /// Item id -> done flag. A missing id means "not done".
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct CompletionState {
        items: IndexMap<String, bool>,
    }

    impl CompletionState {
        pub fn load(store: &dyn KvStore, keys: &StoreKeys) -> Self {
            load_json(store, &keys.checklist())
        }

        pub fn save(&self, store: &mut dyn KvStore, keys: &StoreKeys) -> Result<(), StoreError> {
            let json = serde_json::to_string(self)?;
            store.set(&keys.checklist(), &json)
        }

        pub fn is_completed(&self, item_id: &str) -> bool {
            self.items.get(item_id).copied().unwrap_or(false)
        }

        /// Record `done` for `item_id`; returns whether the effective value changed.
        pub fn set(&mut self, item_id: &str, done: bool) -> bool {
            let before = self.is_completed(item_id);
            self.items.insert(item_id.to_string(), done);
            before != done
        }

        /// Flip the flag and return the new value.
        pub fn toggle(&mut self, item_id: &str) -> bool {
            let next = !self.is_completed(item_id);
            self.items.insert(item_id.to_string(), next);
            next
        }

        /// Number of ids flagged done, whether or not the catalogue knows them.
        pub fn completed_count(&self) -> usize {
            self.items.values().filter(|done| **done).count()
        }

        pub fn clear(&mut self) {
            self.items.clear();
        }

        pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
            self.items.iter().map(|(id, done)| (id.as_str(), *done))
        }
    }

    /* --------------------------------- Notes --------------------------------- */

    pub fn load_note(store: &dyn KvStore, keys: &StoreKeys, item_id: &str) -> Option<String> {
        store.get(&keys.note(item_id))
    }

    pub fn has_note(store: &dyn KvStore, keys: &StoreKeys, item_id: &str) -> bool {
        store.get(&keys.note(item_id)).is_some()
    }

    /// Store the trimmed text, or drop the key when nothing is left after trimming.
    /// Returns the stored text.
    pub fn save_note(
        store: &mut dyn KvStore,
        keys: &StoreKeys,
        item_id: &str,
        text: &str,
    ) -> Result<Option<String>, StoreError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            store.remove(&keys.note(item_id))?;
            return Ok(None);
        }
        store.set(&keys.note(item_id), trimmed)?;
        Ok(Some(trimmed.to_string()))
    }

    pub fn delete_note(
        store: &mut dyn KvStore,
        keys: &StoreKeys,
        item_id: &str,
    ) -> Result<(), StoreError> {
        store.remove(&keys.note(item_id))
    }

    /// `(item id, text)` for every stored note, sorted by key.
    pub fn all_notes(store: &dyn KvStore, keys: &StoreKeys) -> Vec<(String, String)> {
        let prefix = keys.note_prefix();
        store
            .keys()
            .into_iter()
            .filter_map(|key| {
                let item_id = key.strip_prefix(&prefix)?.to_string();
                let text = store.get(&key)?;
                Some((item_id, text))
            })
            .collect()
    }

    pub fn notes_count(store: &dyn KvStore, keys: &StoreKeys) -> usize {
        let prefix = keys.note_prefix();
        store
            .keys()
            .iter()
            .filter(|key| key.starts_with(&prefix))
            .count()
    }

    /* --------------------------------- Goals --------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Priority {
        Low,
        #[default]
        Medium,
        High,
    }

    impl fmt::Display for Priority {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Priority::Low => "low",
                Priority::Medium => "medium",
                Priority::High => "high",
            })
        }
    }

    impl FromStr for Priority {
        type Err = GoalError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "low" => Ok(Priority::Low),
                "medium" => Ok(Priority::Medium),
                "high" => Ok(Priority::High),
                other => Err(GoalError::InvalidPriority(other.to_string())),
            }
        }
    }

    /// A user-defined target. `current_progress` and `completed` are a cached
    /// projection of the global completed count; see [`Goal::recompute`].
    #[serde_as]
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Goal {
        pub id: String,
        pub title: String,
        #[serde(default)]
        pub description: String,
        pub target_date: NaiveDate,
        pub target_topics: u32,
        #[serde(default)]
        pub current_progress: u32,
        #[serde_as(deserialize_as = "DefaultOnError")]
        #[serde(default)]
        pub priority: Priority,
        #[serde(default)]
        pub completed: bool,
        pub created_at: DateTime<Utc>,
    }

    /// How close a goal's target date is, relative to today.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "lowercase")]
    pub enum DeadlineStatus {
        Overdue,
        /// Seven days or fewer remain.
        Urgent,
        OnTrack,
    }

    impl Goal {
        pub fn recompute(&mut self, completed_items: usize) {
            let completed = u32::try_from(completed_items).unwrap_or(u32::MAX);
            self.current_progress = completed.min(self.target_topics);
            self.completed = completed >= self.target_topics;
        }

        pub fn percent(&self) -> u32 {
            crate::progress::percent(
                self.current_progress as usize,
                self.target_topics as usize,
            )
        }

        /// Whole days from `today` to the target date; negative once it has passed.
        pub fn days_until_target(&self, today: NaiveDate) -> i64 {
            (self.target_date - today).num_days()
        }

        pub fn deadline_status(&self, today: NaiveDate) -> DeadlineStatus {
            match self.days_until_target(today) {
                d if d < 0 => DeadlineStatus::Overdue,
                d if d <= 7 => DeadlineStatus::Urgent,
                _ => DeadlineStatus::OnTrack,
            }
        }
    }

    /// Raw form input, validated before any [`Goal`] is built.
    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    pub struct GoalDraft {
        pub title: String,
        pub description: String,
        pub target_date: String,
        pub target_topics: String,
        pub priority: Priority,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ValidGoal {
        pub title: String,
        pub description: String,
        pub target_date: NaiveDate,
        pub target_topics: u32,
        pub priority: Priority,
    }

    impl GoalDraft {
        pub fn validate(&self, total_items: usize) -> Result<ValidGoal, GoalError> {
            let title = self.title.trim();
            if title.is_empty() {
                return Err(GoalError::MissingTitle);
            }
            let date_text = self.target_date.trim();
            let target_date = NaiveDate::parse_from_str(date_text, "%Y-%m-%d")
                .map_err(|_| GoalError::InvalidDate(date_text.to_string()))?;
            let target_text = self.target_topics.trim();
            let target_topics: u32 = target_text
                .parse()
                .map_err(|_| GoalError::InvalidTarget(target_text.to_string()))?;
            if target_topics == 0 || target_topics as usize > total_items {
                return Err(GoalError::TargetOutOfRange {
                    target: target_topics,
                    total: total_items,
                });
            }
            Ok(ValidGoal {
                title: title.to_string(),
                description: self.description.trim().to_string(),
                target_date,
                target_topics,
                priority: self.priority,
            })
        }
    }

    #[derive(Debug, thiserror::Error)]
    pub enum GoalError {
        #[error("goal title is required")]
        MissingTitle,
        #[error("target date {0:?} is not a YYYY-MM-DD date")]
        InvalidDate(String),
        #[error("target topic count {0:?} is not a number")]
        InvalidTarget(String),
        #[error("target topic count {target} must be between 1 and {total}")]
        TargetOutOfRange { target: u32, total: usize },
        #[error("unknown priority {0:?} (expected low, medium or high)")]
        InvalidPriority(String),
        #[error("no goal with id {0:?}")]
        NotFound(String),
    }

    #[serde_as]
    #[derive(Deserialize)]
    struct LenientGoals(#[serde_as(as = "VecSkipError<_>")] Vec<Goal>);

    /// Ordered goal collection, persisted as one JSON array.
    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    pub struct GoalBook {
        goals: Vec<Goal>,
    }

    impl GoalBook {
        /// Load and re-derive progress from `completed_items`; stored progress is not trusted.
        /// Records that fail to decode are skipped individually.
        pub fn load(store: &dyn KvStore, keys: &StoreKeys, completed_items: usize) -> Self {
            let key = keys.goals();
            let mut goals = match store.get(&key) {
                None => Vec::new(),
                Some(raw) => match serde_json::from_str::<LenientGoals>(&raw) {
                    Ok(LenientGoals(goals)) => goals,
                    Err(err) => {
                        warn!(key = %key, error = %err, "malformed goals; starting empty");
                        Vec::new()
                    }
                },
            };
            for goal in &mut goals {
                goal.recompute(completed_items);
            }
            Self { goals }
        }

        pub fn save(&self, store: &mut dyn KvStore, keys: &StoreKeys) -> Result<(), StoreError> {
            let json = serde_json::to_string(&self.goals)?;
            store.set(&keys.goals(), &json)
        }

        pub fn goals(&self) -> &[Goal] {
            &self.goals
        }

        pub fn get(&self, id: &str) -> Option<&Goal> {
            self.goals.iter().find(|g| g.id == id)
        }

        pub fn active(&self) -> impl Iterator<Item = &Goal> {
            self.goals.iter().filter(|g| !g.completed)
        }

        pub fn achieved(&self) -> impl Iterator<Item = &Goal> {
            self.goals.iter().filter(|g| g.completed)
        }

        pub fn recompute(&mut self, completed_items: usize) {
            for goal in &mut self.goals {
                goal.recompute(completed_items);
            }
        }

        pub fn create(
            &mut self,
            valid: ValidGoal,
            completed_items: usize,
            now: DateTime<Utc>,
        ) -> &Goal {
            let mut goal = Goal {
                id: uuid::Uuid::now_v7().to_string(),
                title: valid.title,
                description: valid.description,
                target_date: valid.target_date,
                target_topics: valid.target_topics,
                current_progress: 0,
                priority: valid.priority,
                completed: false,
                created_at: now,
            };
            goal.recompute(completed_items);
            debug!(id = %goal.id, target = goal.target_topics, "created goal");
            self.goals.push(goal);
            &self.goals[self.goals.len() - 1]
        }

        /// Replace the editable fields in place; `id` and `created_at` are kept.
        pub fn update(
            &mut self,
            id: &str,
            valid: ValidGoal,
            completed_items: usize,
        ) -> Result<&Goal, GoalError> {
            let goal = self
                .goals
                .iter_mut()
                .find(|g| g.id == id)
                .ok_or_else(|| GoalError::NotFound(id.to_string()))?;
            goal.title = valid.title;
            goal.description = valid.description;
            goal.target_date = valid.target_date;
            goal.target_topics = valid.target_topics;
            goal.priority = valid.priority;
            goal.recompute(completed_items);
            debug!(id, "updated goal");
            Ok(&*goal)
        }

        pub fn delete(&mut self, id: &str) -> Result<Goal, GoalError> {
            let idx = self
                .goals
                .iter()
                .position(|g| g.id == id)
                .ok_or_else(|| GoalError::NotFound(id.to_string()))?;
            debug!(id, "deleted goal");
            Ok(self.goals.remove(idx))
        }
    }

    /* ------------------------------ Counters ------------------------------ */

    /// Streak and accumulated focus time. Only completed focus sessions move these.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
    pub struct StudyStats {
        pub streak: u64,
        pub total_minutes: u64,
        /// Day of the last counted session; only the calendar-day streak policy reads it.
        pub last_study_day: Option<NaiveDate>,
    }

    impl StudyStats {
        pub fn load(store: &dyn KvStore, keys: &StoreKeys) -> Self {
            let day_key = keys.streak_last_day();
            let last_study_day = store.get(&day_key).and_then(|raw| {
                match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
                    Ok(day) => Some(day),
                    Err(err) => {
                        warn!(key = %day_key, error = %err, "malformed streak day; ignoring");
                        None
                    }
                }
            });
            Self {
                streak: load_counter(store, &keys.streak()),
                total_minutes: load_counter(store, &keys.study_time()),
                last_study_day,
            }
        }

        /// Each counter is its own key and is written independently.
        pub fn save(&self, store: &mut dyn KvStore, keys: &StoreKeys) -> Result<(), StoreError> {
            store.set(&keys.streak(), &self.streak.to_string())?;
            store.set(&keys.study_time(), &self.total_minutes.to_string())?;
            match self.last_study_day {
                Some(day) => store.set(&keys.streak_last_day(), &day.format("%Y-%m-%d").to_string()),
                None => store.remove(&keys.streak_last_day()),
            }
        }
    }

    /* ------------------------------- Theme ------------------------------- */

    pub fn load_dark_mode(store: &dyn KvStore, keys: &StoreKeys) -> bool {
        load_json(store, &keys.dark_mode())
    }

    pub fn save_dark_mode(
        store: &mut dyn KvStore,
        keys: &StoreKeys,
        dark: bool,
    ) -> Result<(), StoreError> {
        store.set(&keys.dark_mode(), &serde_json::to_string(&dark)?)
    }

}

pub mod progress {
    //! Pure projections over the catalogue, completion state and counters.
    //! Nothing here mutates its inputs; everything is recomputed on each read.

    use crate::catalog::{ContentTree, Section};
    use crate::state::{CompletionState, StudyStats};
    use chrono::{DateTime, NaiveDate, Utc};
    use serde::Serialize;

    /// Minutes budgeted per unfinished topic.
    pub const MINUTES_PER_TOPIC: u64 = 2;

    /// `round(100 * part / whole)` with halves rounded up; 0 when `whole` is 0.
    pub fn percent(part: usize, whole: usize) -> u32 {
        if whole == 0 {
            return 0;
        }
        let (part, whole) = (part as u64, whole as u64);
        ((part * 200 + whole) / (whole * 2)) as u32
    }

    pub fn total_items(tree: &ContentTree) -> usize {
        tree.total_items()
    }

    /// Done items that exist in the catalogue. Stale ids from an older catalogue
    /// are not counted, which keeps the overall percentage within 0..=100.
    pub fn completed_items(tree: &ContentTree, cs: &CompletionState) -> usize {
        tree.items().filter(|item| cs.is_completed(&item.id)).count()
    }

    pub fn overall_progress(tree: &ContentTree, cs: &CompletionState) -> u32 {
        percent(completed_items(tree, cs), total_items(tree))
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct SectionProgress {
        pub id: String,
        pub title: String,
        pub completed: usize,
        pub total: usize,
        pub percent: u32,
    }

    pub fn section_progress(section: &Section, cs: &CompletionState) -> SectionProgress {
        let completed = section
            .items
            .iter()
            .filter(|item| cs.is_completed(&item.id))
            .count();
        let total = section.items.len();
        SectionProgress {
            id: section.id.clone(),
            title: section.title.clone(),
            completed,
            total,
            percent: percent(completed, total),
        }
    }

    /// Per-section rollups in catalogue order.
    pub fn sections_progress(tree: &ContentTree, cs: &CompletionState) -> Vec<SectionProgress> {
        tree.sections()
            .iter()
            .map(|s| section_progress(s, cs))
            .collect()
    }

    /// Dashboard ordering: highest percentage first, ties in catalogue order.
    pub fn ranked_sections(tree: &ContentTree, cs: &CompletionState) -> Vec<SectionProgress> {
        let mut out = sections_progress(tree, cs);
        out.sort_by(|a, b| b.percent.cmp(&a.percent));
        out
    }

    pub fn estimated_time_remaining_minutes(tree: &ContentTree, cs: &CompletionState) -> u64 {
        let remaining = total_items(tree).saturating_sub(completed_items(tree, cs));
        remaining as u64 * MINUTES_PER_TOPIC
    }

    /// Mean minutes per streak unit; `None` until the streak is positive.
    pub fn average_session_minutes(stats: &StudyStats) -> Option<u64> {
        if stats.streak == 0 {
            return None;
        }
        let whole = stats.total_minutes / stats.streak;
        let rem = stats.total_minutes % stats.streak;
        // Half up without widening: rem / streak >= 1/2.
        Some(if rem >= stats.streak - rem { whole + 1 } else { whole })
    }

    /* ----------------------------- Achievements ----------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Metric {
        CompletedItems,
        OverallProgress,
        StudyStreak,
        StudyMinutes,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct Achievement {
        pub name: &'static str,
        pub icon: &'static str,
        pub description: &'static str,
        pub metric: Metric,
        pub threshold: u64,
    }

    /// Display order is evaluation order.
    pub static ACHIEVEMENTS: [Achievement; 8] = [
        Achievement {
            name: "First Steps",
            icon: "🎯",
            description: "Completed 10 topics",
            metric: Metric::CompletedItems,
            threshold: 10,
        },
        Achievement {
            name: "Quarter Master",
            icon: "🏆",
            description: "Completed 25 topics",
            metric: Metric::CompletedItems,
            threshold: 25,
        },
        Achievement {
            name: "Half Way There",
            icon: "🌟",
            description: "Completed 50 topics",
            metric: Metric::CompletedItems,
            threshold: 50,
        },
        Achievement {
            name: "Physiology Master",
            icon: "👑",
            description: "Completed all topics",
            metric: Metric::OverallProgress,
            threshold: 100,
        },
        Achievement {
            name: "Week Warrior",
            icon: "🔥",
            description: "7 day study streak",
            metric: Metric::StudyStreak,
            threshold: 7,
        },
        Achievement {
            name: "Monthly Master",
            icon: "💎",
            description: "30 day study streak",
            metric: Metric::StudyStreak,
            threshold: 30,
        },
        Achievement {
            name: "Study Enthusiast",
            icon: "📚",
            description: "1+ hour of study time",
            metric: Metric::StudyMinutes,
            threshold: 60,
        },
        Achievement {
            name: "Dedicated Scholar",
            icon: "🎓",
            description: "5+ hours of study time",
            metric: Metric::StudyMinutes,
            threshold: 300,
        },
    ];

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AchievementInputs {
        pub completed_items: usize,
        pub overall_progress: u32,
        pub study_streak: u64,
        pub total_study_minutes: u64,
    }

    impl AchievementInputs {
        fn value(&self, metric: Metric) -> u64 {
            match metric {
                Metric::CompletedItems => self.completed_items as u64,
                Metric::OverallProgress => u64::from(self.overall_progress),
                Metric::StudyStreak => self.study_streak,
                Metric::StudyMinutes => self.total_study_minutes,
            }
        }
    }

    pub fn unlocked_achievements(inputs: &AchievementInputs) -> Vec<&'static Achievement> {
        ACHIEVEMENTS
            .iter()
            .filter(|a| inputs.value(a.metric) >= a.threshold)
            .collect()
    }

    /* ------------------------------ Snapshot ------------------------------ */

    /// Everything the dashboard shows, computed in one pass.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct ProgressSnapshot {
        pub total_items: usize,
        pub completed_items: usize,
        pub overall_progress: u32,
        pub estimated_time_remaining_minutes: u64,
        pub average_session_minutes: Option<u64>,
        pub study_streak: u64,
        pub total_study_minutes: u64,
        pub sections: Vec<SectionProgress>,
        pub achievements: Vec<&'static Achievement>,
    }

    impl ProgressSnapshot {
        pub fn compute(tree: &ContentTree, cs: &CompletionState, stats: &StudyStats) -> Self {
            let completed = completed_items(tree, cs);
            let overall = overall_progress(tree, cs);
            let achievements = unlocked_achievements(&AchievementInputs {
                completed_items: completed,
                overall_progress: overall,
                study_streak: stats.streak,
                total_study_minutes: stats.total_minutes,
            });
            Self {
                total_items: total_items(tree),
                completed_items: completed,
                overall_progress: overall,
                estimated_time_remaining_minutes: estimated_time_remaining_minutes(tree, cs),
                average_session_minutes: average_session_minutes(stats),
                study_streak: stats.streak,
                total_study_minutes: stats.total_minutes,
                sections: sections_progress(tree, cs),
                achievements,
            }
        }
    }

    /* ------------------------------- Export ------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ExportSection {
        pub title: String,
        pub completed: usize,
        pub total: usize,
        pub completion_rate: u32,
    }

    /// The downloadable progress report.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ExportReport {
        pub total_items: usize,
        pub completed_items: usize,
        pub progress: u32,
        pub study_streak: u64,
        pub total_study_time: u64,
        pub export_date: DateTime<Utc>,
        pub sections: Vec<ExportSection>,
    }

    impl ExportReport {
        pub fn build(
            tree: &ContentTree,
            cs: &CompletionState,
            stats: &StudyStats,
            now: DateTime<Utc>,
        ) -> Self {
            Self {
                total_items: total_items(tree),
                completed_items: completed_items(tree, cs),
                progress: overall_progress(tree, cs),
                study_streak: stats.streak,
                total_study_time: stats.total_minutes,
                export_date: now,
                sections: sections_progress(tree, cs)
                    .into_iter()
                    .map(|s| ExportSection {
                        title: s.title,
                        completed: s.completed,
                        total: s.total,
                        completion_rate: s.percent,
                    })
                    .collect(),
            }
        }
    }

    pub fn export_file_name(namespace: &str, date: NaiveDate) -> String {
        format!("{namespace}-study-progress-{}.json", date.format("%Y-%m-%d"))
    }

    /* ------------------------------ Display ------------------------------ */

    pub fn motivational_message(overall_progress: u32) -> &'static str {
        match overall_progress {
            p if p >= 100 => "🎉 Physiology Master!",
            p if p >= 75 => "🔥 Almost there!",
            p if p >= 50 => "💪 Great progress!",
            p if p >= 25 => "🌟 Keep going!",
            _ => "🚀 Let's start studying!",
        }
    }

    /// `1h 5m` once there is at least an hour, otherwise `45m`.
    pub fn format_study_time(minutes: u64) -> String {
        let hours = minutes / 60;
        let mins = minutes % 60;
        if hours > 0 {
            format!("{hours}h {mins}m")
        } else {
            format!("{mins}m")
        }
    }

}

pub mod timer {
    //! Focus/break interval state machine.
    //!
    //! The machine is driven by explicit ticks. Every entry into a running phase
    //! arms a fresh [`TickToken`]; every other transition disarms it, so a tick
    //! delivered with an old token after `stop`, `reset` or `pause` is ignored.

    use serde::Serialize;
    use std::fmt;
    use std::io::Write;
    use tracing::debug;

    pub const BREAK_SECONDS: u32 = 5 * 60;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum SessionLength {
        #[default]
        Short,
        Standard,
        Long,
    }

    impl SessionLength {
        pub const ALL: [SessionLength; 3] = [Self::Short, Self::Standard, Self::Long];

        pub fn minutes(self) -> u32 {
            match self {
                Self::Short => 25,
                Self::Standard => 45,
                Self::Long => 60,
            }
        }

        pub fn seconds(self) -> u32 {
            self.minutes() * 60
        }
    }

    impl TryFrom<u32> for SessionLength {
        type Error = u32;

        fn try_from(minutes: u32) -> Result<Self, Self::Error> {
            Self::ALL
                .into_iter()
                .find(|len| len.minutes() == minutes)
                .ok_or(minutes)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Phase {
        Focus,
        Break,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "lowercase")]
    pub enum RunState {
        Idle,
        Running,
        Paused,
    }

    /* ------------------------------ Ticker ------------------------------ */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TickToken(u64);

    /// Owns the right to advance the countdown. Only the most recently armed
    /// token is accepted, and only while armed.
    #[derive(Debug, Default)]
    struct Ticker {
        generation: u64,
        armed: Option<TickToken>,
    }

    impl Ticker {
        fn arm(&mut self) -> TickToken {
            self.generation += 1;
            let token = TickToken(self.generation);
            self.armed = Some(token);
            token
        }

        fn disarm(&mut self) {
            self.armed = None;
        }

        fn accepts(&self, token: TickToken) -> bool {
            self.armed == Some(token)
        }
    }

    /* --------------------------- Completion signal --------------------------- */

    #[derive(Debug, thiserror::Error)]
    #[error("completion signal unavailable: {0}")]
    pub struct SignalError(pub String);

    /// Audible or visual cue fired when a phase runs out. Best effort only.
    pub trait Chime {
        fn ring(&self, finished: Phase) -> Result<(), SignalError>;
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct SilentChime;

    impl Chime for SilentChime {
        fn ring(&self, _finished: Phase) -> Result<(), SignalError> {
            Ok(())
        }
    }

    /// Writes the ASCII bell to stderr.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TerminalBell;

    impl Chime for TerminalBell {
        fn ring(&self, _finished: Phase) -> Result<(), SignalError> {
            let mut err = std::io::stderr();
            err.write_all(b"\x07")
                .and_then(|_| err.flush())
                .map_err(|e| SignalError(e.to_string()))
        }
    }

    /* ------------------------------- Events ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(tag = "event", rename_all = "snake_case")]
    pub enum TimerEvent {
        /// The only event that feeds study time and the streak.
        FocusCompleted { session_minutes: u32 },
        BreakCompleted,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TickOutcome {
        /// Token was stale or the timer is not running; nothing changed.
        Ignored,
        Counted,
        Completed(TimerEvent),
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct TickSnapshot {
        pub phase: Phase,
        pub state: RunState,
        pub remaining_seconds: u32,
        pub display: String,
        pub progress: f64,
        pub session_minutes: u32,
        pub sessions_today: u32,
    }

    /* -------------------------------- Timer -------------------------------- */

    pub struct Timer {
        length: SessionLength,
        phase: Phase,
        state: RunState,
        remaining: u32,
        sessions_today: u32,
        ticker: Ticker,
        chime: Box<dyn Chime>,
    }

    impl fmt::Debug for Timer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Timer")
                .field("length", &self.length)
                .field("phase", &self.phase)
                .field("state", &self.state)
                .field("remaining", &self.remaining)
                .field("sessions_today", &self.sessions_today)
                .field("ticker", &self.ticker)
                .finish_non_exhaustive()
        }
    }

    impl Default for Timer {
        fn default() -> Self {
            Self::new(SessionLength::default())
        }
    }

    impl Timer {
        pub fn new(length: SessionLength) -> Self {
            Self::with_chime(length, Box::new(SilentChime))
        }

        pub fn with_chime(length: SessionLength, chime: Box<dyn Chime>) -> Self {
            Self {
                length,
                phase: Phase::Focus,
                state: RunState::Idle,
                remaining: length.seconds(),
                sessions_today: 0,
                ticker: Ticker::default(),
                chime,
            }
        }

        pub fn phase(&self) -> Phase {
            self.phase
        }

        pub fn state(&self) -> RunState {
            self.state
        }

        pub fn length(&self) -> SessionLength {
            self.length
        }

        pub fn remaining_seconds(&self) -> u32 {
            self.remaining
        }

        pub fn sessions_today(&self) -> u32 {
            self.sessions_today
        }

        /// Token the driver must pass to [`Timer::tick`]; `None` unless running.
        pub fn armed_token(&self) -> Option<TickToken> {
            self.ticker.armed
        }

        /// Begin or resume the current phase. Returns the freshly armed token, or
        /// `None` when already running.
        pub fn start(&mut self) -> Option<TickToken> {
            if self.state == RunState::Running {
                return None;
            }
            self.state = RunState::Running;
            let token = self.ticker.arm();
            debug!(phase = ?self.phase, remaining = self.remaining, "timer started");
            Some(token)
        }

        /// Only a running focus interval can be paused; breaks run to completion.
        pub fn pause(&mut self) {
            if self.state == RunState::Running && self.phase == Phase::Focus {
                self.state = RunState::Paused;
                self.ticker.disarm();
                debug!(remaining = self.remaining, "timer paused");
            }
        }

        /// Back to an idle focus interval at full length. Not a completed session.
        pub fn stop(&mut self) {
            self.ticker.disarm();
            self.phase = Phase::Focus;
            self.state = RunState::Idle;
            self.remaining = self.length.seconds();
            debug!("timer stopped");
        }

        pub fn reset(&mut self) {
            self.stop();
        }

        /// Change the focus length. Honored only while idle in focus; returns whether it applied.
        pub fn select_length(&mut self, length: SessionLength) -> bool {
            if self.state != RunState::Idle || self.phase != Phase::Focus {
                return false;
            }
            self.length = length;
            self.remaining = length.seconds();
            true
        }

        /// Advance one second.
        pub fn tick(&mut self, token: TickToken) -> TickOutcome {
            if self.state != RunState::Running || !self.ticker.accepts(token) {
                return TickOutcome::Ignored;
            }
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining > 0 {
                return TickOutcome::Counted;
            }

            let event = match self.phase {
                Phase::Focus => {
                    self.sessions_today += 1;
                    self.phase = Phase::Break;
                    self.remaining = BREAK_SECONDS;
                    self.ticker.arm();
                    TimerEvent::FocusCompleted {
                        session_minutes: self.length.minutes(),
                    }
                }
                Phase::Break => {
                    self.phase = Phase::Focus;
                    self.state = RunState::Idle;
                    self.remaining = self.length.seconds();
                    self.ticker.disarm();
                    TimerEvent::BreakCompleted
                }
            };
            debug!(?event, "phase finished");
            let finished = match event {
                TimerEvent::FocusCompleted { .. } => Phase::Focus,
                TimerEvent::BreakCompleted => Phase::Break,
            };
            if let Err(err) = self.chime.ring(finished) {
                debug!(error = %err, "completion signal dropped");
            }
            TickOutcome::Completed(event)
        }

        fn phase_duration(&self) -> u32 {
            match self.phase {
                Phase::Focus => self.length.seconds(),
                Phase::Break => BREAK_SECONDS,
            }
        }

        /// Elapsed share of the current phase, in `[0, 1]`.
        pub fn progress_fraction(&self) -> f64 {
            let total = self.phase_duration();
            if total == 0 {
                return 0.0;
            }
            let elapsed = total.saturating_sub(self.remaining);
            (f64::from(elapsed) / f64::from(total)).clamp(0.0, 1.0)
        }

        pub fn snapshot(&self) -> TickSnapshot {
            TickSnapshot {
                phase: self.phase,
                state: self.state,
                remaining_seconds: self.remaining,
                display: format_clock(self.remaining),
                progress: self.progress_fraction(),
                session_minutes: self.length.minutes(),
                sessions_today: self.sessions_today,
            }
        }
    }

    /// `MM:SS`, minutes unbounded.
    pub fn format_clock(seconds: u32) -> String {
        format!("{:02}:{:02}", seconds / 60, seconds % 60)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::cell::Cell;
        use std::rc::Rc;

        fn run_ticks(timer: &mut Timer, n: u32) -> Vec<TimerEvent> {
            let mut events = Vec::new();
            for _ in 0..n {
                let token = timer.armed_token().expect("timer should be running");
                if let TickOutcome::Completed(ev) = timer.tick(token) {
                    events.push(ev);
                }
            }
            events
        }

        struct BrokenChime(Rc<Cell<u32>>);

        impl Chime for BrokenChime {
            fn ring(&self, _finished: Phase) -> Result<(), SignalError> {
                self.0.set(self.0.get() + 1);
                Err(SignalError("no audio device".into()))
            }
        }

        #[test]
        fn full_focus_then_break_cycle() {
            let mut timer = Timer::new(SessionLength::Short);
            assert_eq!(timer.remaining_seconds(), 1500);
            timer.start().expect("armed");

            let events = run_ticks(&mut timer, 1500);
            assert_eq!(
                events,
                vec![TimerEvent::FocusCompleted { session_minutes: 25 }]
            );
            assert_eq!(timer.phase(), Phase::Break);
            assert_eq!(timer.state(), RunState::Running);
            assert_eq!(timer.remaining_seconds(), 300);
            assert_eq!(timer.sessions_today(), 1);

            let events = run_ticks(&mut timer, 300);
            assert_eq!(events, vec![TimerEvent::BreakCompleted]);
            assert_eq!(timer.phase(), Phase::Focus);
            assert_eq!(timer.state(), RunState::Idle);
            assert_eq!(timer.remaining_seconds(), 1500);
            assert_eq!(timer.armed_token(), None);
        }

        #[test]
        fn pause_resumes_from_the_same_second() {
            let mut timer = Timer::new(SessionLength::Short);
            let first = timer.start().unwrap();
            run_ticks(&mut timer, 600);
            assert_eq!(timer.remaining_seconds(), 900);

            timer.pause();
            assert_eq!(timer.state(), RunState::Paused);
            assert_eq!(timer.tick(first), TickOutcome::Ignored);
            assert_eq!(timer.remaining_seconds(), 900);

            let resumed = timer.start().unwrap();
            assert_ne!(resumed, first);
            assert_eq!(timer.remaining_seconds(), 900);
            assert_eq!(timer.tick(resumed), TickOutcome::Counted);
            assert_eq!(timer.remaining_seconds(), 899);
        }

        #[test]
        fn stale_tokens_cannot_tick_after_stop() {
            let mut timer = Timer::new(SessionLength::Standard);
            let token = timer.start().unwrap();
            run_ticks(&mut timer, 10);
            timer.stop();
            assert_eq!(timer.tick(token), TickOutcome::Ignored);
            assert_eq!(timer.remaining_seconds(), 45 * 60);

            // Restarting does not revive the old token.
            let fresh = timer.start().unwrap();
            assert_eq!(timer.tick(token), TickOutcome::Ignored);
            assert_eq!(timer.tick(fresh), TickOutcome::Counted);
        }

        #[test]
        fn focus_token_is_retired_when_break_begins() {
            let mut timer = Timer::new(SessionLength::Short);
            let focus_token = timer.start().unwrap();
            run_ticks(&mut timer, 1500);
            assert_eq!(timer.tick(focus_token), TickOutcome::Ignored);
            assert_eq!(timer.remaining_seconds(), 300);
        }

        #[test]
        fn start_while_running_is_noop_and_break_cannot_pause() {
            let mut timer = Timer::new(SessionLength::Short);
            let token = timer.start().unwrap();
            assert_eq!(timer.start(), None);
            assert_eq!(timer.armed_token(), Some(token));

            run_ticks(&mut timer, 1500);
            timer.pause();
            assert_eq!(timer.state(), RunState::Running);
            assert_eq!(timer.phase(), Phase::Break);
        }

        #[test]
        fn stop_during_break_returns_to_idle_focus_without_event() {
            let mut timer = Timer::new(SessionLength::Long);
            timer.start();
            run_ticks(&mut timer, 3600);
            assert_eq!(timer.phase(), Phase::Break);
            run_ticks(&mut timer, 100);
            timer.reset();
            assert_eq!(timer.phase(), Phase::Focus);
            assert_eq!(timer.state(), RunState::Idle);
            assert_eq!(timer.remaining_seconds(), 3600);
            assert_eq!(timer.sessions_today(), 1);
        }

        #[test]
        fn length_only_changes_while_idle_in_focus() {
            let mut timer = Timer::new(SessionLength::Short);
            assert!(timer.select_length(SessionLength::Long));
            assert_eq!(timer.remaining_seconds(), 3600);

            timer.start();
            run_ticks(&mut timer, 5);
            assert!(!timer.select_length(SessionLength::Short));
            assert_eq!(timer.remaining_seconds(), 3595);

            timer.pause();
            assert!(!timer.select_length(SessionLength::Short));
            assert_eq!(timer.length(), SessionLength::Long);
        }

        #[test]
        fn progress_fraction_tracks_phase_duration() {
            let mut timer = Timer::new(SessionLength::Short);
            assert_eq!(timer.progress_fraction(), 0.0);
            timer.start();
            run_ticks(&mut timer, 750);
            assert!((timer.progress_fraction() - 0.5).abs() < 1e-9);
            run_ticks(&mut timer, 750);
            assert_eq!(timer.phase(), Phase::Break);
            assert_eq!(timer.progress_fraction(), 0.0);
            run_ticks(&mut timer, 150);
            assert!((timer.progress_fraction() - 0.5).abs() < 1e-9);
        }

        #[test]
        fn failing_chime_does_not_block_transitions() {
            let rings = Rc::new(Cell::new(0));
            let mut timer =
                Timer::with_chime(SessionLength::Short, Box::new(BrokenChime(rings.clone())));
            timer.start();
            let events = run_ticks(&mut timer, 1800);
            assert_eq!(events.len(), 2);
            assert_eq!(rings.get(), 2);
            assert_eq!(timer.state(), RunState::Idle);
        }

        #[test]
        fn session_length_conversions_and_clock() {
            assert_eq!(SessionLength::try_from(45), Ok(SessionLength::Standard));
            assert_eq!(SessionLength::try_from(30), Err(30));
            assert_eq!(format_clock(1500), "25:00");
            assert_eq!(format_clock(61), "01:01");
            assert_eq!(format_clock(3600), "60:00");
        }
    }
}

pub mod streak {
    //! Streak accounting for completed focus sessions, kept apart from the timer
    //! so the day-boundary rule can change without touching the state machine.

    use crate::state::StudyStats;
    use chrono::NaiveDate;
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::str::FromStr;

    /// A finished focus interval as seen by the counters.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StudySession {
        pub minutes: u32,
        pub day: NaiveDate,
    }

    pub trait StreakPolicy {
        /// New streak fields for `prior` after `session`. Study minutes are not
        /// the policy's concern and must be passed through unchanged.
        fn apply(&self, session: &StudySession, prior: &StudyStats) -> StudyStats;
    }

    /// Every completed focus session adds one.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct PerSession;

    impl StreakPolicy for PerSession {
        fn apply(&self, session: &StudySession, prior: &StudyStats) -> StudyStats {
            StudyStats {
                streak: prior.streak.saturating_add(1),
                last_study_day: Some(session.day),
                ..*prior
            }
        }
    }

    /// Consecutive calendar days with at least one completed session.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct CalendarDay;

    impl StreakPolicy for CalendarDay {
        fn apply(&self, session: &StudySession, prior: &StudyStats) -> StudyStats {
            let streak = match prior.last_study_day {
                Some(last) if last == session.day => prior.streak.max(1),
                Some(last) if last.succ_opt() == Some(session.day) => prior.streak.saturating_add(1),
                // Clock moved backwards; leave the streak alone.
                Some(last) if session.day < last => {
                    return *prior;
                }
                _ => 1,
            };
            StudyStats {
                streak,
                last_study_day: Some(session.day),
                ..*prior
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum StreakPolicyKind {
        #[default]
        PerSession,
        CalendarDay,
    }

    impl StreakPolicyKind {
        pub fn policy(self) -> Box<dyn StreakPolicy> {
            match self {
                Self::PerSession => Box::new(PerSession),
                Self::CalendarDay => Box::new(CalendarDay),
            }
        }
    }

    impl fmt::Display for StreakPolicyKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Self::PerSession => "per-session",
                Self::CalendarDay => "calendar-day",
            })
        }
    }

    impl FromStr for StreakPolicyKind {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "per-session" => Ok(Self::PerSession),
                "calendar-day" => Ok(Self::CalendarDay),
                other => Err(format!(
                    "unknown streak policy {other:?} (expected per-session or calendar-day)"
                )),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn session(d: u32) -> StudySession {
            StudySession {
                minutes: 25,
                day: NaiveDate::from_ymd_opt(2025, 1, d).unwrap(),
            }
        }

        #[test]
        fn per_session_counts_every_interval() {
            let mut stats = StudyStats {
                total_minutes: 40,
                ..StudyStats::default()
            };
            for _ in 0..3 {
                stats = PerSession.apply(&session(5), &stats);
            }
            assert_eq!(stats.streak, 3);
            assert_eq!(stats.total_minutes, 40);
        }

        #[test]
        fn calendar_day_counts_consecutive_days_once() {
            let policy = CalendarDay;
            let mut stats = StudyStats::default();
            stats = policy.apply(&session(1), &stats);
            stats = policy.apply(&session(1), &stats);
            assert_eq!(stats.streak, 1);
            stats = policy.apply(&session(2), &stats);
            stats = policy.apply(&session(3), &stats);
            assert_eq!(stats.streak, 3);
            stats = policy.apply(&session(7), &stats);
            assert_eq!(stats.streak, 1);
            let before = stats;
            stats = policy.apply(&session(6), &stats);
            assert_eq!(stats, before);
        }

        #[test]
        fn streaks_saturate_at_the_counter_limit() {
            let prior = StudyStats {
                streak: u64::MAX,
                total_minutes: 0,
                last_study_day: Some(session(1).day),
            };
            assert_eq!(PerSession.apply(&session(2), &prior).streak, u64::MAX);
            assert_eq!(CalendarDay.apply(&session(2), &prior).streak, u64::MAX);
        }

        #[test]
        fn policy_names_parse() {
            assert_eq!(
                "calendar-day".parse::<StreakPolicyKind>(),
                Ok(StreakPolicyKind::CalendarDay)
            );
            assert!("weekly".parse::<StreakPolicyKind>().is_err());
            assert_eq!(StreakPolicyKind::PerSession.to_string(), "per-session");
        }
    }
}

pub mod tracker {
    //! The tracker ties the catalogue, the store and the in-memory mirrors together.
    //! Every mutation persists the affected key before returning.

    use crate::catalog::ContentTree;
    use crate::progress::{self, ExportReport, ProgressSnapshot};
    use crate::state::{self, CompletionState, Goal, GoalBook, GoalDraft, GoalError, StudyStats};
    use crate::store::{KvStore, StoreError, StoreKeys};
    use crate::streak::{StreakPolicy, StudySession};
    use chrono::{DateTime, Utc};
    use tracing::debug;

    #[derive(Debug, thiserror::Error)]
    pub enum TrackerError {
        #[error("no topic with id {0:?}")]
        UnknownItem(String),
        #[error(transparent)]
        Goal(#[from] GoalError),
        #[error(transparent)]
        Store(#[from] StoreError),
    }

    pub struct StudyTracker<S: KvStore> {
        tree: ContentTree,
        store: S,
        keys: StoreKeys,
        completion: CompletionState,
        goals: GoalBook,
        stats: StudyStats,
        streak_policy: Box<dyn StreakPolicy>,
    }

    impl<S: KvStore> StudyTracker<S> {
        pub fn open(
            tree: ContentTree,
            store: S,
            keys: StoreKeys,
            streak_policy: Box<dyn StreakPolicy>,
        ) -> Self {
            let completion = CompletionState::load(&store, &keys);
            let completed = progress::completed_items(&tree, &completion);
            let goals = GoalBook::load(&store, &keys, completed);
            let stats = StudyStats::load(&store, &keys);
            debug!(
                completed,
                goals = goals.goals().len(),
                streak = stats.streak,
                "tracker loaded"
            );
            Self {
                tree,
                store,
                keys,
                completion,
                goals,
                stats,
                streak_policy,
            }
        }

        pub fn tree(&self) -> &ContentTree {
            &self.tree
        }

        pub fn store(&self) -> &S {
            &self.store
        }

        pub fn keys(&self) -> &StoreKeys {
            &self.keys
        }

        pub fn completion(&self) -> &CompletionState {
            &self.completion
        }

        pub fn goals(&self) -> &GoalBook {
            &self.goals
        }

        pub fn stats(&self) -> &StudyStats {
            &self.stats
        }

        pub fn completed_items(&self) -> usize {
            progress::completed_items(&self.tree, &self.completion)
        }

        fn ensure_item(&self, item_id: &str) -> Result<(), TrackerError> {
            if self.tree.contains_item(item_id) {
                Ok(())
            } else {
                Err(TrackerError::UnknownItem(item_id.to_string()))
            }
        }

        /* ----------------------------- Completion ----------------------------- */

        /// Returns whether the item's state changed.
        pub fn set_completed(&mut self, item_id: &str, done: bool) -> Result<bool, TrackerError> {
            self.ensure_item(item_id)?;
            let before = self.completed_items();
            let changed = self.completion.set(item_id, done);
            self.completion.save(&mut self.store, &self.keys)?;
            self.sync_goals(before)?;
            debug!(item_id, done, changed, "completion updated");
            Ok(changed)
        }

        /// Flip an item; returns its new state.
        pub fn toggle(&mut self, item_id: &str) -> Result<bool, TrackerError> {
            self.ensure_item(item_id)?;
            let before = self.completed_items();
            let done = self.completion.toggle(item_id);
            self.completion.save(&mut self.store, &self.keys)?;
            self.sync_goals(before)?;
            Ok(done)
        }

        /// Clear every completion flag.
        pub fn reset_progress(&mut self) -> Result<(), TrackerError> {
            let before = self.completed_items();
            self.completion.clear();
            self.completion.save(&mut self.store, &self.keys)?;
            self.sync_goals(before)?;
            debug!("progress reset");
            Ok(())
        }

        fn sync_goals(&mut self, completed_before: usize) -> Result<(), TrackerError> {
            let completed = self.completed_items();
            if completed != completed_before {
                self.goals.recompute(completed);
                self.goals.save(&mut self.store, &self.keys)?;
            }
            Ok(())
        }

        /* -------------------------------- Notes -------------------------------- */

        pub fn note(&self, item_id: &str) -> Option<String> {
            state::load_note(&self.store, &self.keys, item_id)
        }

        pub fn has_note(&self, item_id: &str) -> bool {
            state::has_note(&self.store, &self.keys, item_id)
        }

        /// Blank text deletes the note. Returns what was stored.
        pub fn save_note(&mut self, item_id: &str, text: &str) -> Result<Option<String>, TrackerError> {
            self.ensure_item(item_id)?;
            Ok(state::save_note(&mut self.store, &self.keys, item_id, text)?)
        }

        /// Works for any stored note, including one whose topic is no longer in the catalogue.
        pub fn delete_note(&mut self, item_id: &str) -> Result<(), TrackerError> {
            Ok(state::delete_note(&mut self.store, &self.keys, item_id)?)
        }

        pub fn notes(&self) -> Vec<(String, String)> {
            state::all_notes(&self.store, &self.keys)
        }

        pub fn notes_count(&self) -> usize {
            state::notes_count(&self.store, &self.keys)
        }

        /* -------------------------------- Goals -------------------------------- */

        pub fn create_goal(
            &mut self,
            draft: &GoalDraft,
            now: DateTime<Utc>,
        ) -> Result<Goal, TrackerError> {
            let valid = draft.validate(self.tree.total_items())?;
            let completed = self.completed_items();
            let goal = self.goals.create(valid, completed, now).clone();
            self.goals.save(&mut self.store, &self.keys)?;
            Ok(goal)
        }

        pub fn update_goal(&mut self, id: &str, draft: &GoalDraft) -> Result<Goal, TrackerError> {
            let valid = draft.validate(self.tree.total_items())?;
            let completed = self.completed_items();
            let goal = self.goals.update(id, valid, completed)?.clone();
            self.goals.save(&mut self.store, &self.keys)?;
            Ok(goal)
        }

        pub fn delete_goal(&mut self, id: &str) -> Result<Goal, TrackerError> {
            let goal = self.goals.delete(id)?;
            self.goals.save(&mut self.store, &self.keys)?;
            Ok(goal)
        }

        /* ------------------------------- Sessions ------------------------------- */

        /// Consume a completed focus interval: add its minutes and advance the streak.
        pub fn record_focus_session(
            &mut self,
            session: StudySession,
        ) -> Result<StudyStats, TrackerError> {
            let mut next = self.streak_policy.apply(&session, &self.stats);
            next.total_minutes = self
                .stats
                .total_minutes
                .saturating_add(u64::from(session.minutes));
            next.save(&mut self.store, &self.keys)?;
            self.stats = next;
            debug!(
                minutes = session.minutes,
                streak = next.streak,
                total = next.total_minutes,
                "focus session recorded"
            );
            Ok(next)
        }

        /* ------------------------------ Projections ------------------------------ */

        pub fn snapshot(&self) -> ProgressSnapshot {
            ProgressSnapshot::compute(&self.tree, &self.completion, &self.stats)
        }

        pub fn export(&self, now: DateTime<Utc>) -> ExportReport {
            ExportReport::build(&self.tree, &self.completion, &self.stats, now)
        }

        /* -------------------------------- Theme -------------------------------- */

        pub fn dark_mode(&self) -> bool {
            state::load_dark_mode(&self.store, &self.keys)
        }

        pub fn set_dark_mode(&mut self, dark: bool) -> Result<(), TrackerError> {
            Ok(state::save_dark_mode(&mut self.store, &self.keys, dark)?)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::state::Priority;
        use crate::store::MemoryStore;
        use crate::streak::{CalendarDay, PerSession};
        use chrono::{NaiveDate, TimeZone};

        fn tracker() -> StudyTracker<MemoryStore> {
            let tree = ContentTree::builtin().expect("builtin");
            StudyTracker::open(tree, MemoryStore::new(), StoreKeys::default(), Box::new(PerSession))
        }

        fn goal_draft(target: &str) -> GoalDraft {
            GoalDraft {
                title: "First block".into(),
                description: String::new(),
                target_date: "2025-06-01".into(),
                target_topics: target.into(),
                priority: Priority::Medium,
            }
        }

        fn now() -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap()
        }

        #[test]
        fn completion_is_persisted_and_goals_follow() {
            let mut t = tracker();
            let goal = t.create_goal(&goal_draft("2"), now()).unwrap();
            assert_eq!(goal.current_progress, 0);

            assert!(t.set_completed("cell-structure", true).unwrap());
            assert!(!t.set_completed("cell-structure", true).unwrap());
            assert!(t.toggle("nephron").unwrap());
            assert!(t.goals().get(&goal.id).unwrap().completed);

            // Un-checking lowers the projection again.
            t.toggle("nephron").unwrap();
            let g = t.goals().get(&goal.id).unwrap();
            assert_eq!(g.current_progress, 1);
            assert!(!g.completed);

            let keys = t.keys().clone();
            let reloaded = CompletionState::load(t.store(), &keys);
            assert!(reloaded.is_completed("cell-structure"));
            assert!(!reloaded.is_completed("nephron"));
            let stored_goals = GoalBook::load(t.store(), &keys, 1);
            assert_eq!(stored_goals.goals()[0].current_progress, 1);
        }

        #[test]
        fn unknown_items_are_rejected() {
            let mut t = tracker();
            assert!(matches!(
                t.set_completed("no-such-topic", true),
                Err(TrackerError::UnknownItem(_))
            ));
            assert!(matches!(
                t.save_note("no-such-topic", "x"),
                Err(TrackerError::UnknownItem(_))
            ));
        }

        #[test]
        fn goal_target_is_bounded_by_catalogue_size() {
            let mut t = tracker();
            assert!(matches!(
                t.create_goal(&goal_draft("73"), now()),
                Err(TrackerError::Goal(GoalError::TargetOutOfRange { total: 72, .. }))
            ));
            assert!(t.goals().goals().is_empty());
            assert!(t.store().get(&t.keys().goals()).is_none());
        }

        #[test]
        fn focus_sessions_feed_counters() {
            let mut t = tracker();
            let day = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
            t.record_focus_session(StudySession { minutes: 25, day }).unwrap();
            t.record_focus_session(StudySession { minutes: 45, day }).unwrap();
            assert_eq!(t.stats().streak, 2);
            assert_eq!(t.stats().total_minutes, 70);
            assert_eq!(t.store().get(&t.keys().study_time()).as_deref(), Some("70"));

            let snap = t.snapshot();
            assert_eq!(snap.average_session_minutes, Some(35));
            assert_eq!(
                snap.achievements.iter().map(|a| a.name).collect::<Vec<_>>(),
                vec!["Study Enthusiast"]
            );
        }

        #[test]
        fn calendar_policy_is_pluggable() {
            let tree = ContentTree::builtin().unwrap();
            let mut t =
                StudyTracker::open(tree, MemoryStore::new(), StoreKeys::default(), Box::new(CalendarDay));
            let day = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
            t.record_focus_session(StudySession { minutes: 25, day }).unwrap();
            t.record_focus_session(StudySession { minutes: 25, day }).unwrap();
            assert_eq!(t.stats().streak, 1);
            assert_eq!(t.stats().total_minutes, 50);
        }

        #[test]
        fn oversized_stored_counters_saturate() {
            let keys = StoreKeys::default();
            let mut store = MemoryStore::new();
            store.set(&keys.streak(), "1").unwrap();
            store.set(&keys.study_time(), "10000000000000000000").unwrap();
            let t = StudyTracker::open(
                ContentTree::builtin().unwrap(),
                store,
                keys.clone(),
                Box::new(PerSession),
            );
            let snap = t.snapshot();
            assert_eq!(snap.average_session_minutes, Some(10_000_000_000_000_000_000));

            let mut store = MemoryStore::new();
            store.set(&keys.streak(), &u64::MAX.to_string()).unwrap();
            store.set(&keys.study_time(), &u64::MAX.to_string()).unwrap();
            let mut t = StudyTracker::open(
                ContentTree::builtin().unwrap(),
                store,
                keys,
                Box::new(PerSession),
            );
            let day = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
            let stats = t.record_focus_session(StudySession { minutes: 25, day }).unwrap();
            assert_eq!(stats.streak, u64::MAX);
            assert_eq!(stats.total_minutes, u64::MAX);
            assert_eq!(t.snapshot().average_session_minutes, Some(1));
        }

        #[test]
        fn orphaned_notes_can_be_deleted() {
            let keys = StoreKeys::default();
            let mut store = MemoryStore::new();
            store.set(&keys.note("retired-topic"), "old text").unwrap();
            let mut t = StudyTracker::open(
                ContentTree::builtin().unwrap(),
                store,
                keys,
                Box::new(PerSession),
            );
            assert_eq!(t.notes_count(), 1);
            assert!(matches!(
                t.save_note("retired-topic", "new"),
                Err(TrackerError::UnknownItem(_))
            ));

            t.delete_note("retired-topic").unwrap();
            assert_eq!(t.notes_count(), 0);
            assert!(t.notes().is_empty());
        }

        #[test]
        fn notes_and_reset() {
            let mut t = tracker();
            t.save_note("ecg-analysis", "  QRS  ").unwrap();
            assert!(t.has_note("ecg-analysis"));
            assert_eq!(t.note("ecg-analysis").as_deref(), Some("QRS"));
            assert_eq!(t.notes_count(), 1);

            t.set_completed("ecg-analysis", true).unwrap();
            t.reset_progress().unwrap();
            assert_eq!(t.completed_items(), 0);
            // Notes survive a progress reset.
            assert_eq!(t.notes_count(), 1);
            t.delete_note("ecg-analysis").unwrap();
            assert!(t.notes().is_empty());
        }

        #[test]
        fn state_survives_reopen() {
            let mut t = tracker();
            t.set_completed("absorption", true).unwrap();
            t.set_dark_mode(true).unwrap();
            let store = t.store().clone();

            let reopened = StudyTracker::open(
                ContentTree::builtin().unwrap(),
                store,
                StoreKeys::default(),
                Box::new(PerSession),
            );
            assert_eq!(reopened.completed_items(), 1);
            assert!(reopened.dark_mode());
            assert_eq!(reopened.export(now()).completed_items, 1);
        }
    }
}

pub mod config {
    //! Optional TOML configuration. Everything has a default, so a missing file
    //! is not an error.

    use crate::catalog::{CatalogError, ContentTree};
    use crate::streak::StreakPolicyKind;
    use crate::timer::SessionLength;
    use serde::{Deserialize, Serialize};
    use std::fs;
    use std::path::{Path, PathBuf};
    use tracing::debug;

    const APP_DIR: &str = "study-tracker";

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct StudyConfig {
        /// Store file; defaults to `<data dir>/study-tracker/store.json`.
        pub store_path: Option<PathBuf>,
        /// Prefix of every store key.
        pub namespace: String,
        /// Alternative catalogue in TOML; the bundled one is used when unset.
        pub catalog_path: Option<PathBuf>,
        pub default_session_minutes: u32,
        pub streak_policy: StreakPolicyKind,
        /// Ring the terminal bell when a phase finishes.
        pub chime: bool,
    }

    impl Default for StudyConfig {
        fn default() -> Self {
            Self {
                store_path: None,
                namespace: "physiology".to_string(),
                catalog_path: None,
                default_session_minutes: SessionLength::default().minutes(),
                streak_policy: StreakPolicyKind::default(),
                chime: true,
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    pub enum ConfigError {
        #[error("reading {path:?}: {source}")]
        Io {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("parsing {path:?}: {source}")]
        Parse {
            path: PathBuf,
            #[source]
            source: toml::de::Error,
        },
        #[error("catalogue {path:?}: {source}")]
        Catalog {
            path: PathBuf,
            #[source]
            source: CatalogError,
        },
        #[error("bundled catalogue: {0}")]
        BuiltinCatalog(#[source] CatalogError),
        #[error("session length must be 25, 45 or 60 minutes, got {0}")]
        InvalidSessionLength(u32),
        #[error("no platform data directory; set store_path explicitly")]
        NoDataDir,
    }

    impl StudyConfig {
        pub fn default_path() -> Option<PathBuf> {
            dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
        }

        /// Read `path`; a missing file yields the defaults.
        pub fn load(path: &Path) -> Result<Self, ConfigError> {
            let text = match fs::read_to_string(path) {
                Ok(text) => text,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "no config file; using defaults");
                    return Ok(Self::default());
                }
                Err(source) => {
                    return Err(ConfigError::Io {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            };
            let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            config.session_length()?;
            debug!(path = %path.display(), "loaded config");
            Ok(config)
        }

        pub fn load_default() -> Result<Self, ConfigError> {
            match Self::default_path() {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            }
        }

        pub fn store_path(&self) -> Result<PathBuf, ConfigError> {
            if let Some(path) = &self.store_path {
                return Ok(path.clone());
            }
            dirs::data_dir()
                .map(|dir| dir.join(APP_DIR).join("store.json"))
                .ok_or(ConfigError::NoDataDir)
        }

        pub fn session_length(&self) -> Result<SessionLength, ConfigError> {
            SessionLength::try_from(self.default_session_minutes)
                .map_err(ConfigError::InvalidSessionLength)
        }

        pub fn load_catalog(&self) -> Result<ContentTree, ConfigError> {
            let Some(path) = &self.catalog_path else {
                return ContentTree::builtin().map_err(ConfigError::BuiltinCatalog);
            };
            let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            ContentTree::from_toml_str(&text).map_err(|source| ConfigError::Catalog {
                path: path.clone(),
                source,
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn missing_file_gives_defaults() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let cfg = StudyConfig::load(&tmp.path().join("absent.toml")).expect("load");
            assert_eq!(cfg, StudyConfig::default());
            assert_eq!(cfg.session_length().unwrap(), SessionLength::Short);
        }

        #[test]
        fn partial_file_overrides_fields() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("config.toml");
            fs::write(
                &path,
                "namespace = \"anatomy\"\ndefault_session_minutes = 45\nstreak_policy = \"calendar-day\"\nstore_path = \"/tmp/s.json\"\n",
            )
            .expect("write config");

            let cfg = StudyConfig::load(&path).expect("load");
            assert_eq!(cfg.namespace, "anatomy");
            assert_eq!(cfg.session_length().unwrap(), SessionLength::Standard);
            assert_eq!(cfg.streak_policy, StreakPolicyKind::CalendarDay);
            assert_eq!(cfg.store_path().unwrap(), PathBuf::from("/tmp/s.json"));
            assert!(cfg.chime);
        }

        #[test]
        fn invalid_session_length_is_rejected() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("config.toml");
            fs::write(&path, "default_session_minutes = 30\n").expect("write config");
            assert!(matches!(
                StudyConfig::load(&path),
                Err(ConfigError::InvalidSessionLength(30))
            ));
        }

        #[test]
        fn custom_catalogue_is_loaded_from_path() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("catalog.toml");
            fs::write(
                &path,
                "[[sections]]\nid = \"s\"\ntitle = \"S\"\n[[sections.items]]\nid = \"a\"\ntext = \"A\"\n",
            )
            .expect("write catalogue");
            let cfg = StudyConfig {
                catalog_path: Some(path),
                ..StudyConfig::default()
            };
            assert_eq!(cfg.load_catalog().unwrap().total_items(), 1);
            assert_eq!(StudyConfig::default().load_catalog().unwrap().total_items(), 72);
        }
    }
}

pub use catalog::{ContentTree, Section, TopicItem};
pub use store::{JsonFileStore, KvStore, MemoryStore, StoreKeys};
pub use timer::{Timer, TimerEvent};
pub use tracker::{StudyTracker, TrackerError};
