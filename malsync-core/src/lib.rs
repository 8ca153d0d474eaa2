mod anilist;
mod mal;
mod oauth;
pub mod storage;
pub mod tokens;

pub use anilist::{AniListClient, AniListEntry, AniListError, AniListMedia, MediaListStatus};
pub use mal::{
    ApiErrorClass, MalClient, MalError, MalListItem, MalListStatus, MalListUpdate, MalNode,
    MalPacing,
};
pub use oauth::{
    Credentials, DEFAULT_REDIRECT_URI, OAuthClient, OAuthError, OAuthToken,
    extract_authorization_code,
};
pub use storage::{KeyValueStore, MemoryStore, StoreError};
pub use tokens::{Clock, SystemClock, TokenError, TokenManager, TokenSet};
