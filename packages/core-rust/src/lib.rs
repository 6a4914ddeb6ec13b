//! `SaltyChat` Core: rooms, messages, keyset pagination, and store contracts.

pub mod clock;
pub mod error;
pub mod pagination;
pub mod rid;
pub mod traits;
pub mod types;

pub use clock::{ClockSource, FixedClock, SystemClock};
pub use error::{error_code, ErrorCode, ServiceError};
pub use pagination::{
    parse_keyset_selector, KeysetSelector, Limit, QueryParams, MAX_PAGE_SIZE, QUERY_OPERATION,
};
pub use traits::{MessageStore, RoomStore, Store};
pub use types::{Message, MessageSelector, MessagesSelector, Room, RoomSelector, RoomsSelector};

