pub mod database;
pub mod grouping;
pub mod messages;
pub mod notices;
pub mod resolver;
pub mod selection;
pub mod settings;
pub mod store;
pub mod sync;

pub use database::Database;
pub use grouping::{group_messages, MessageGroup};
pub use messages::MessageStore;
pub use notices::{Notice, NoticeKind, NoticeLevel, Notifier};
pub use resolver::{ConversationResolver, PairState, Reconciled};
pub use selection::{
    SelectionController, SwipeAction, SwipeConfig, SwipeDirection, SwipeOutcome, SwipeRow,
    SwipeState, UndoKind, UndoToken, SWIPE_COMMIT_DISTANCE,
};
pub use settings::{ClientSettings, SettingsService};
pub use store::{ConversationStore, ReplaceOutcome, StoreError, Tombstone, UpsertOutcome};
pub use sync::{RemoteOp, RemoteSync};
