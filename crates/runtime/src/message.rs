//! Notification texts.

use notifybot_squabbles::Item;

const MAX_PREVIEW_CHARS: usize = 200;

pub fn new_post(community: &str, post: &Item) -> String {
    let url = post.url.as_deref().unwrap_or_default();
    format!(
        "/s/{community} has a new post by @{}: [{}]({url})",
        post.author, post.title
    )
}

pub fn chat_busy(community: &str, recent_count: usize, window_minutes: i64) -> String {
    format!(
        "/s/{community} chat is busy: {recent_count} messages in the last {window_minutes} minutes"
    )
}

pub fn chat_new_message(community: &str, message: &Item) -> String {
    format!(
        "/s/{community} chat has a new message by @{}: {}",
        message.author,
        preview(&message.title)
    )
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= MAX_PREVIEW_CHARS {
        return flat;
    }
    let mut out: String = flat.chars().take(MAX_PREVIEW_CHARS).collect();
    out.push('…');
    out
}
