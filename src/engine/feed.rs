use crate::models::NotificationRecord;

/// The merged notification feed.
///
/// Records are kept sorted by `occurred_at`, newest first, and ids are
/// unique. Every mutation keeps both properties, so readers never see an
/// unsorted or duplicated feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feed {
    records: Vec<NotificationRecord>,
}

impl Feed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a feed from arbitrary records (e.g. a persisted snapshot).
    ///
    /// Later duplicates replace earlier ones.
    pub fn from_records(records: Vec<NotificationRecord>) -> Self {
        let mut feed = Self::new();
        for record in records {
            feed.add(record);
        }
        feed
    }

    pub fn records(&self) -> &[NotificationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&NotificationRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.id.as_str())
    }

    pub fn unread_count(&self) -> usize {
        self.records.iter().filter(|r| !r.read).count()
    }

    /// Add a single record.
    ///
    /// A record with a known id replaces the old one entirely, read flag
    /// included. Returns true if an existing record was replaced.
    pub fn add(&mut self, record: NotificationRecord) -> bool {
        let replaced = match self.records.iter().position(|r| r.id == record.id) {
            Some(idx) => {
                self.records.remove(idx);
                true
            }
            None => false,
        };
        self.insert_sorted(record);
        replaced
    }

    /// Merge a batch from a source-of-truth fetch.
    ///
    /// Records already in the feed keep their current read flag. New
    /// records take the flag reported by `known_read` (unread unless the
    /// read-state map says otherwise). Returns the number of new records.
    pub fn bulk_add<F>(&mut self, records: Vec<NotificationRecord>, known_read: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut added = 0;
        for mut record in records {
            record.read = match self.get(&record.id) {
                Some(existing) => existing.read,
                None => known_read(&record.id),
            };
            if !self.add(record) {
                added += 1;
            }
        }
        added
    }

    /// Mark one record read. Returns false if the id is not in the feed.
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        for record in &mut self.records {
            record.read = true;
        }
    }

    /// Overwrite read flags from an external source of truth.
    pub fn annotate<F>(&mut self, is_read: F)
    where
        F: Fn(&str) -> bool,
    {
        for record in &mut self.records {
            record.read = is_read(&record.id);
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    fn insert_sorted(&mut self, record: NotificationRecord) {
        // Ahead of records with the same timestamp: newest arrival first
        let idx = self
            .records
            .partition_point(|r| r.occurred_at > record.occurred_at);
        self.records.insert(idx, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationKind;
    use chrono::{TimeZone, Utc};

    fn rec(id: &str, secs: i64, read: bool) -> NotificationRecord {
        NotificationRecord {
            id: id.to_string(),
            kind: NotificationKind::Score,
            content: format!("content {}", id),
            occurred_at: Utc.timestamp_opt(secs, 0).unwrap(),
            subject_entity_id: None,
            read,
        }
    }

    fn ids(feed: &Feed) -> Vec<&str> {
        feed.ids().collect()
    }

    #[test]
    fn test_add_keeps_newest_first() {
        let mut feed = Feed::new();
        feed.add(rec("b", 200, false));
        feed.add(rec("a", 100, false));
        feed.add(rec("c", 300, false));

        assert_eq!(ids(&feed), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_ties_put_latest_arrival_first() {
        let mut feed = Feed::new();
        feed.add(rec("first", 100, false));
        feed.add(rec("second", 100, false));

        assert_eq!(ids(&feed), vec!["second", "first"]);
    }

    #[test]
    fn test_add_replaces_and_resorts() {
        let mut feed = Feed::new();
        feed.add(rec("a", 100, true));
        feed.add(rec("b", 200, false));

        let mut edited = rec("a", 300, false);
        edited.content = "edited".to_string();
        assert!(feed.add(edited));

        assert_eq!(feed.len(), 2);
        assert_eq!(ids(&feed), vec!["a", "b"]);
        let a = feed.get("a").unwrap();
        assert_eq!(a.content, "edited");
        assert!(!a.read, "single add takes the incoming read flag");
    }

    #[test]
    fn test_bulk_add_preserves_existing_read_flags() {
        let mut feed = Feed::new();
        feed.add(rec("x", 100, true));

        let mut incoming = rec("x", 100, false);
        incoming.content = "A2".to_string();
        let added = feed.bulk_add(vec![incoming, rec("y", 50, false)], |_| false);

        assert_eq!(added, 1);
        let x = feed.get("x").unwrap();
        assert!(x.read);
        assert_eq!(x.content, "A2");
        assert!(!feed.get("y").unwrap().read);
    }

    #[test]
    fn test_bulk_add_consults_known_read_for_new_ids() {
        let mut feed = Feed::new();
        feed.bulk_add(vec![rec("seen", 10, false), rec("new", 20, false)], |id| {
            id == "seen"
        });

        assert!(feed.get("seen").unwrap().read);
        assert!(!feed.get("new").unwrap().read);
    }

    #[test]
    fn test_mark_read_and_unread_count() {
        let mut feed = Feed::from_records(vec![rec("a", 1, false), rec("b", 2, false)]);
        assert_eq!(feed.unread_count(), 2);

        assert!(feed.mark_read("a"));
        assert!(!feed.mark_read("missing"));
        assert_eq!(feed.unread_count(), 1);

        feed.mark_all_read();
        assert_eq!(feed.unread_count(), 0);
    }

    #[test]
    fn test_from_records_dedups_and_sorts() {
        let feed = Feed::from_records(vec![
            rec("a", 1, false),
            rec("b", 3, false),
            rec("a", 2, true),
        ]);
        assert_eq!(ids(&feed), vec!["b", "a"]);
        assert!(feed.get("a").unwrap().read);
    }

    #[test]
    fn test_annotate_and_clear() {
        let mut feed = Feed::from_records(vec![rec("a", 1, true), rec("b", 2, false)]);
        feed.annotate(|id| id == "b");
        assert!(!feed.get("a").unwrap().read);
        assert!(feed.get("b").unwrap().read);

        feed.clear();
        assert!(feed.is_empty());
    }
}
