pub mod app_state;
pub mod auth;
pub mod credentials;
pub mod timeline;

pub use app_state::*;
pub use auth::*;
pub use credentials::StoredCredentials;
pub use timeline::{
    DayBoundary, Direction, Message, Stretch, StretchId, StretchLabel, Timeline, TimelineChange,
};
