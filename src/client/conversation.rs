use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Turn ids are milliseconds scaled by this factor, leaving room for a
/// per-millisecond sequence in the low digits.
const SEQUENCE_SLOTS: i64 = 1000;

const TITLE_WORDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: i64,
    pub text: String,
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
}

/// Turns in the order they happened. Only ever appended to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn count(&self, direction: Direction) -> usize {
        self.turns
            .iter()
            .filter(|turn| turn.direction == direction)
            .count()
    }

    /// Append a turn stamped at `now`. Ids stay unique and timestamps never
    /// go backwards, even if the clock does or two turns share a millisecond.
    pub fn push(&mut self, direction: Direction, text: impl Into<String>, now: DateTime<Utc>) -> &Turn {
        let (id, created_at) = match self.turns.last() {
            Some(last) => (
                (now.timestamp_millis() * SEQUENCE_SLOTS).max(last.id + 1),
                now.max(last.created_at),
            ),
            None => (now.timestamp_millis() * SEQUENCE_SLOTS, now),
        };

        self.turns.push(Turn {
            id,
            text: text.into(),
            direction,
            created_at,
        });
        &self.turns[self.turns.len() - 1]
    }

    /// First words of the opening turn, or `New Chat`.
    pub fn title(&self) -> String {
        let Some(first) = self.turns.first() else {
            return "New Chat".to_string();
        };

        let words: Vec<&str> = first.text.split_whitespace().collect();
        if words.is_empty() {
            return "New Chat".to_string();
        }

        let mut title = words[..words.len().min(TITLE_WORDS)].join(" ");
        if words.len() > TITLE_WORDS {
            title.push_str("...");
        }
        title
    }

    /// Case-insensitive match against the text of every turn. An empty
    /// conversation mentions nothing.
    pub fn mentions(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        self.turns
            .iter()
            .any(|turn| turn.text.to_lowercase().contains(&term))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Entry {
    /// Survives reuse of the display name after a delete.
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    name: String,
    turns: Conversation,
}

/// One user's conversations keyed by display name, in creation order.
///
/// Every entry also carries an id that is never reused, so work started
/// against one conversation can tell whether it still exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationSet {
    entries: Vec<Entry>,
}

impl ConversationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Conversation> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.turns)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Conversation> {
        self.entries
            .iter_mut()
            .find(|entry| entry.name == name)
            .map(|entry| &mut entry.turns)
    }

    pub fn id_of(&self, name: &str) -> Option<Uuid> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.id)
    }

    pub fn get_by_id_mut(&mut self, id: Uuid) -> Option<&mut Conversation> {
        self.entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .map(|entry| &mut entry.turns)
    }

    /// Insert or replace, returning the id of the stored conversation. A new
    /// name goes to the end. A replaced conversation gets a fresh id.
    pub fn insert(&mut self, name: impl Into<String>, conversation: Conversation) -> Uuid {
        let name = name.into();
        let id = Uuid::new_v4();
        match self.entries.iter_mut().find(|entry| entry.name == name) {
            Some(existing) => {
                existing.id = id;
                existing.turns = conversation;
            }
            None => self.entries.push(Entry {
                id,
                name,
                turns: conversation,
            }),
        }
        id
    }

    pub fn remove(&mut self, name: &str) -> Option<Conversation> {
        let index = self.entries.iter().position(|entry| entry.name == name)?;
        Some(self.entries.remove(index).turns)
    }

    pub fn first_name(&self) -> Option<&str> {
        self.entries.first().map(|entry| entry.name.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Conversation)> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), &entry.turns))
    }

    /// `Chat N` where N is one past the current count, bumped past any name
    /// already taken. Numbers can repeat after deletes.
    pub fn next_name(&self) -> String {
        let mut n = self.len() + 1;
        loop {
            let name = format!("Chat {n}");
            if !self.contains(&name) {
                return name;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[test]
    fn same_millisecond_turns_get_distinct_ids() {
        let mut conversation = Conversation::default();
        let a = conversation.push(Direction::Sent, "hi", at(1_000)).id;
        let b = conversation.push(Direction::Received, "hello", at(1_000)).id;
        let c = conversation.push(Direction::Sent, "again", at(1_000)).id;
        assert!(a < b && b < c);
    }

    #[test]
    fn clock_going_backwards_keeps_order() {
        let mut conversation = Conversation::default();
        conversation.push(Direction::Sent, "late", at(5_000));
        let turn = conversation.push(Direction::Received, "early", at(4_000)).clone();

        assert_eq!(turn.created_at, at(5_000));
        assert!(turn.id > conversation.turns()[0].id);
    }

    #[rstest]
    #[case(&[], "New Chat")]
    #[case(&["   "], "New Chat")]
    #[case(&["hello there"], "hello there")]
    #[case(&["one two three four five"], "one two three four five")]
    #[case(&["one two three four five six"], "one two three four five...")]
    #[case(&["first turn", "second turn is ignored"], "first turn")]
    fn titles(#[case] texts: &[&str], #[case] expected: &str) {
        let mut conversation = Conversation::default();
        for text in texts {
            conversation.push(Direction::Sent, *text, Utc::now());
        }
        assert_eq!(conversation.title(), expected);
    }

    #[test]
    fn mentions_is_case_insensitive() {
        let mut conversation = Conversation::default();
        conversation.push(Direction::Sent, "Plan a trip", Utc::now());
        conversation.push(Direction::Received, "Try <strong>Lisbon</strong>", Utc::now());
        assert!(conversation.mentions("PLAN"));
        assert!(conversation.mentions("lisbon"));
        assert!(!conversation.mentions("porto"));
    }

    #[test]
    fn empty_conversation_mentions_nothing() {
        let conversation = Conversation::default();
        assert_eq!(conversation.title(), "New Chat");
        assert!(!conversation.mentions("new chat"));
        assert!(!conversation.mentions("chat"));
    }

    #[test]
    fn reused_name_gets_a_new_id() {
        let mut set = ConversationSet::new();
        let old = set.insert("Chat 1", Conversation::default());
        set.remove("Chat 1");
        let new = set.insert("Chat 1", Conversation::default());

        assert_ne!(old, new);
        assert_eq!(set.id_of("Chat 1"), Some(new));
        assert!(set.get_by_id_mut(old).is_none());
        assert!(set.get_by_id_mut(new).is_some());

        let replaced = set.insert("Chat 1", Conversation::default());
        assert_ne!(replaced, new);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn set_keeps_creation_order() {
        let mut set = ConversationSet::new();
        set.insert("b", Conversation::default());
        set.insert("a", Conversation::default());
        set.insert("c", Conversation::default());
        assert_eq!(set.names().collect::<Vec<_>>(), ["b", "a", "c"]);

        set.remove("b");
        assert_eq!(set.first_name(), Some("a"));
        assert_eq!(set.remove("missing"), None);
    }

    #[test]
    fn next_name_skips_taken_names() {
        let mut set = ConversationSet::new();
        assert_eq!(set.next_name(), "Chat 1");

        set.insert("Chat 1", Conversation::default());
        set.insert("Chat 2", Conversation::default());
        set.remove("Chat 1");
        assert_eq!(set.next_name(), "Chat 3");
    }

    #[test]
    fn serialized_form_preserves_order_and_turns() {
        let mut set = ConversationSet::new();
        let mut conversation = Conversation::default();
        conversation.push(Direction::Sent, "hi", at(1_000));
        set.insert("Zed", conversation);
        set.insert("Alpha", Conversation::default());

        let json = serde_json::to_string(&set).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["name"], "Zed");
        assert_eq!(value[0]["turns"][0]["direction"], "sent");
        assert_eq!(value[1]["name"], "Alpha");

        let back: ConversationSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
        assert_eq!(back.id_of("Zed"), set.id_of("Zed"));
    }

    #[test]
    fn cache_without_ids_still_loads() {
        let json = r#"[{"name":"Chat 1","turns":[]},{"name":"Chat 2","turns":[]}]"#;
        let set: ConversationSet = serde_json::from_str(json).unwrap();
        let first = set.id_of("Chat 1").unwrap();
        let second = set.id_of("Chat 2").unwrap();
        assert_ne!(first, second);
    }
}
