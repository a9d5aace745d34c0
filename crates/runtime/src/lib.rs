pub mod detect;
mod dispatch;
pub mod limiter;
pub mod message;

pub use detect::{ActivityPolicy, ChatActivity, classify_chat_activity, new_posts};
pub use dispatch::{
    DispatchError, DispatchOptions, Dispatcher, RunReport, SourceOutcome, SourceReport,
};
pub use limiter::{Backoff, Cooldown};
