pub mod config;
pub mod directory;
pub mod error;
pub mod logging;
pub mod model;
pub mod pager;
pub mod report;
pub mod service;
pub mod storage;

pub use directory::UserDirectory;
pub use error::{Error, ErrorKind};
pub use model::{
    ConversationKey, Event, EventId, FriendRequest, Friendship, Message, MessageId, MessageRecord,
    NewEvent, NewMessage, NewUser, RequestId, RequestStatus, Subscription, Timestamp, User, UserId,
};
pub use pager::{ConversationPager, DEFAULT_PAGE_SIZE};
pub use storage::Storage;
