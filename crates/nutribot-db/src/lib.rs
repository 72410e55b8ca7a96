pub mod account;
pub mod conversation_store;
pub mod linking;
pub mod migrations;
pub mod nutrition;
pub mod reconcile;

pub use account::{MergeCounts, ResetCounts};
pub use conversation_store::{Chat, ConversationStore, SharedStore, StoredMessage, User};
pub use linking::{ClaimOutcome, LinkStatus, LinkingCode};
pub use nutrition::{MealType, NewNutritionRecord, NutritionRecord, SpreadsheetConfig};
pub use reconcile::{UserProfile, reconcile};
