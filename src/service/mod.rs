pub mod events;
pub mod friends;
pub mod messages;

pub use events::EventService;
pub use friends::{Friend, FriendEvent, FriendService};
pub use messages::MessageService;
