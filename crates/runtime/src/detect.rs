//! Change detection: which items are new, and how busy a chat is.
//!
//! Everything here is a pure function of its inputs.

use chrono::{DateTime, TimeDelta, Utc};

use notifybot_squabbles::Item;
use notifybot_store::ChatStatus;

/// Items strictly newer than `last_processed_id`, oldest first.
///
/// Ordering uses `id` alone.  Repeated ids collapse to one entry.
pub fn new_posts(items: &[Item], last_processed_id: i64) -> Vec<Item> {
    let mut fresh: Vec<Item> = items
        .iter()
        .filter(|item| item.id > last_processed_id)
        .cloned()
        .collect();
    fresh.sort_by_key(|item| item.id);
    fresh.dedup_by_key(|item| item.id);
    fresh
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityPolicy {
    pub window: TimeDelta,
    pub busy_threshold: usize,
}

impl Default for ActivityPolicy {
    fn default() -> Self {
        Self {
            window: TimeDelta::seconds(900),
            busy_threshold: 5,
        }
    }
}

impl ActivityPolicy {
    pub fn window_minutes(&self) -> i64 {
        self.window.num_minutes().max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatActivity {
    pub status: ChatStatus,
    /// Newest message id, never below the previous watermark.
    pub latest_id: i64,
    /// Messages inside the trailing window.
    pub recent_count: usize,
}

/// Classify chat traffic at `now`.
///
/// Busy iff at least `busy_threshold` messages were created inside the
/// trailing window.  There is no hysteresis: each call depends only on the
/// current page.  An empty page keeps `previous_status`.
pub fn classify_chat_activity(
    messages: &[Item],
    previous_id: i64,
    previous_status: ChatStatus,
    now: DateTime<Utc>,
    policy: &ActivityPolicy,
) -> ChatActivity {
    if messages.is_empty() {
        return ChatActivity {
            status: previous_status,
            latest_id: previous_id,
            recent_count: 0,
        };
    }

    let cutoff = now
        .checked_sub_signed(policy.window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let recent_count = messages
        .iter()
        .filter(|m| m.created_at.is_some_and(|at| at >= cutoff))
        .count();
    let status = if recent_count >= policy.busy_threshold {
        ChatStatus::Busy
    } else {
        ChatStatus::Quiet
    };
    let latest_id = messages
        .iter()
        .map(|m| m.id)
        .max()
        .map_or(previous_id, |newest| newest.max(previous_id));

    ChatActivity {
        status,
        latest_id,
        recent_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: i64) -> Item {
        Item::new(id, "ann", format!("post {id}"))
    }

    fn message_at(id: i64, at: DateTime<Utc>) -> Item {
        Item::new(id, "ann", "hi").with_created_at(at)
    }

    fn policy() -> ActivityPolicy {
        ActivityPolicy::default()
    }

    fn ids(items: &[Item]) -> Vec<i64> {
        items.iter().map(|i| i.id).collect()
    }

    // ── new_posts ──────────────────────────────────────────────────────────

    #[test]
    fn newest_first_page_becomes_chronological() {
        let fresh = new_posts(&[post(102), post(101)], 100);
        assert_eq!(ids(&fresh), vec![101, 102]);
    }

    #[test]
    fn only_ids_above_watermark_are_new() {
        let page = [post(105), post(104), post(100), post(99)];
        assert_eq!(ids(&new_posts(&page, 100)), vec![104, 105]);
        assert!(new_posts(&page, 105).is_empty());
        assert!(new_posts(&page, 500).is_empty());
    }

    #[test]
    fn empty_page_has_nothing_new() {
        assert!(new_posts(&[], 0).is_empty());
    }

    #[test]
    fn id_order_wins_over_page_order() {
        let page = [post(7), post(9), post(8)];
        assert_eq!(ids(&new_posts(&page, 6)), vec![7, 8, 9]);
    }

    #[test]
    fn duplicate_ids_collapse() {
        let page = [post(3), post(3), post(2)];
        assert_eq!(ids(&new_posts(&page, 1)), vec![2, 3]);
    }

    #[test]
    fn same_inputs_same_result() {
        let page = [post(12), post(11), post(10)];
        assert_eq!(new_posts(&page, 10), new_posts(&page, 10));
    }

    // ── classify_chat_activity ─────────────────────────────────────────────

    #[test]
    fn five_recent_messages_are_busy() {
        let now = Utc::now();
        let msgs: Vec<Item> = (1..=5)
            .map(|i| message_at(i, now - TimeDelta::seconds(60 * i)))
            .collect();
        let act = classify_chat_activity(&msgs, 0, ChatStatus::Quiet, now, &policy());
        assert_eq!(act.status, ChatStatus::Busy);
        assert_eq!(act.recent_count, 5);
        assert_eq!(act.latest_id, 5);
    }

    #[test]
    fn four_recent_messages_are_quiet_even_if_previously_busy() {
        let now = Utc::now();
        let msgs: Vec<Item> = (1..=4)
            .map(|i| message_at(i, now - TimeDelta::seconds(30)))
            .collect();
        let act = classify_chat_activity(&msgs, 0, ChatStatus::Busy, now, &policy());
        assert_eq!(act.status, ChatStatus::Quiet);
    }

    #[test]
    fn messages_outside_window_do_not_count() {
        let now = Utc::now();
        let mut msgs: Vec<Item> = (1..=4)
            .map(|i| message_at(i, now - TimeDelta::seconds(100)))
            .collect();
        msgs.push(message_at(5, now - TimeDelta::seconds(901)));
        msgs.push(Item::new(6, "bob", "no timestamp"));
        let act = classify_chat_activity(&msgs, 0, ChatStatus::Quiet, now, &policy());
        assert_eq!(act.recent_count, 4);
        assert_eq!(act.status, ChatStatus::Quiet);
        assert_eq!(act.latest_id, 6);
    }

    #[test]
    fn window_edge_is_inclusive() {
        let now = Utc::now();
        let msgs: Vec<Item> = (1..=5)
            .map(|i| message_at(i, now - TimeDelta::seconds(900)))
            .collect();
        let act = classify_chat_activity(&msgs, 0, ChatStatus::Quiet, now, &policy());
        assert_eq!(act.status, ChatStatus::Busy);
    }

    #[test]
    fn empty_chat_keeps_previous_state() {
        let act = classify_chat_activity(&[], 42, ChatStatus::Busy, Utc::now(), &policy());
        assert_eq!(
            act,
            ChatActivity {
                status: ChatStatus::Busy,
                latest_id: 42,
                recent_count: 0
            }
        );
    }

    #[test]
    fn latest_id_never_moves_backwards() {
        let now = Utc::now();
        let act = classify_chat_activity(
            &[message_at(3, now)],
            10,
            ChatStatus::Quiet,
            now,
            &ActivityPolicy::default(),
        );
        assert_eq!(act.latest_id, 10);
    }

    #[test]
    fn window_wider_than_history_counts_every_timestamped_message() {
        let now = Utc::now();
        let policy = ActivityPolicy {
            window: TimeDelta::MAX,
            busy_threshold: 2,
        };
        let msgs = [
            message_at(1, now - TimeDelta::days(3650)),
            message_at(2, now - TimeDelta::days(1)),
            Item::new(3, "bob", "no timestamp"),
        ];
        let act = classify_chat_activity(&msgs, 0, ChatStatus::Quiet, now, &policy);
        assert_eq!(act.recent_count, 2);
        assert_eq!(act.status, ChatStatus::Busy);
    }

    #[test]
    fn custom_threshold_and_window() {
        let now = Utc::now();
        let policy = ActivityPolicy {
            window: TimeDelta::seconds(60),
            busy_threshold: 2,
        };
        let msgs = [
            message_at(1, now - TimeDelta::seconds(10)),
            message_at(2, now - TimeDelta::seconds(20)),
        ];
        let act = classify_chat_activity(&msgs, 0, ChatStatus::Quiet, now, &policy);
        assert_eq!(act.status, ChatStatus::Busy);
        assert_eq!(policy.window_minutes(), 1);
    }
}
