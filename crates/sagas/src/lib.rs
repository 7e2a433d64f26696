//! Concrete sagas of the chat platform.
//!
//! Three flows run on the coordination substrate: orchestrated room
//! creation with compensation, orchestrated message delivery with an
//! accumulator for per-recipient confirmations, and choreographed bulk
//! message deletion keyed off the processed-event ledger. The
//! collaborating services (room storage, message store, push delivery)
//! appear only as traits with in-memory doubles for tests.

pub mod chat_creation;
pub mod contracts;
pub mod delete_messages;
pub mod message_delivery;
pub mod services;
mod staging;

pub use chat_creation::{
    ChatCreationData, ChatCreationSaga, ChatCreationState, CompensateCreationWorker,
    CreateRoomWorker, NotifyDownstreamWorker,
};
pub use delete_messages::{DeleteChatMessagesWorker, SendChatNotificationWorker};
pub use message_delivery::{
    CheckDeliveryStatusWorker, MessageDeliveryData, MessageDeliverySaga, MessageDeliveryState,
    PublishMessageWorker, SaveMessageWorker,
};
